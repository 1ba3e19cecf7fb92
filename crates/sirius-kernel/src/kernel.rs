//! The kernel singleton: task lifecycle, the select-next scheduler, the
//! tick handler, and the thin per-object-kind wrappers that connect the
//! handle table to the wait engine and timer list (§4.2, §4.3, §4.6).
//!
//! `Kernel` is a plain struct with `&self` methods and no hidden global
//! state beyond the process-wide platform port binding, so a test can build
//! a fresh instance, bind [`sirius_hal::mock::MockPort`], and drive it by
//! hand without a real context switch.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use sirius_error::ErrorKind;
use sirius_hal::{platform_port, CriticalSection, PlatformPort, TaskEntry};

use crate::handle::{Handle, HandleTable};
use crate::object::{KernelObject, ObjectKind};
use crate::scheduler::ReadyQueues;
use crate::task::{PendingStreamIo, Task, TaskState, IDLE_PRIORITY};
use crate::wait::timer_list::{TimeoutTarget, TimerList};
use crate::wait::{Timeout, WaitDescriptor, WaiterEntry, WaitOutcome, WaitPolicy, MAX_WAIT};

#[cfg(feature = "mutex")]
use crate::sync::mutex::Mutex;
#[cfg(feature = "semaphore")]
use crate::sync::semaphore::Semaphore;
#[cfg(feature = "count-sem")]
use crate::sync::count_sem::CountSem;
#[cfg(feature = "event")]
use crate::sync::event::{Event, EventMode};
#[cfg(feature = "timer")]
use crate::sync::timer::Timer;
#[cfg(feature = "flags")]
use crate::sync::flags::{FlagPolicy, Flags};
#[cfg(feature = "shared-mem")]
use crate::ipc::shared_mem::SharedMem;
#[cfg(feature = "ptr-queue")]
use crate::ipc::ptr_queue::PtrQueue;
#[cfg(feature = "stream")]
use crate::ipc::byte_stream::ByteStream;
#[cfg(feature = "queue")]
use crate::ipc::message_queue::MessageQueue;
#[cfg(feature = "mailbox")]
use crate::ipc::mailbox::Mailbox;
#[cfg(any(
    feature = "stream",
    feature = "mailbox",
    feature = "queue",
    feature = "ptr-queue"
))]
use crate::ipc::protection::ProtectionMode;
use crate::wait::Waitable;

#[cfg(feature = "system-stat")]
const STATS_WINDOW_TICKS: u32 = 1000;

/// Fixed stack allocation for the reserved idle task.
const IDLE_STACK_SIZE: usize = 256;

extern "C" fn idle_task_entry(_arg: *mut ()) {
    loop {
        platform_port().cpu_idle();
    }
}

#[cfg(feature = "system-stat")]
#[derive(Debug, Clone, Copy)]
pub struct TaskStat {
    pub priority: u8,
    pub state: TaskState,
    pub suspended: bool,
    /// CPU ticks this task accumulated during the last completed
    /// statistics window.
    pub cpu_ticks: u32,
    /// The window's total length in ticks; callers compute a percentage
    /// as `cpu_ticks as f32 / window_ticks as f32`.
    pub window_ticks: u32,
}

#[cfg(feature = "system-stat")]
#[derive(Debug, Clone, Copy)]
pub struct SystemStat {
    /// Sum of `cpu_ticks` over every non-idle task during the last
    /// completed statistics window (§4.7: "the sum over non-idle tasks").
    pub cpu_ticks: u32,
    pub window_ticks: u32,
}

#[cfg(feature = "system-stat")]
struct StatsState {
    elapsed: u32,
}

/// The kernel's process-wide state: ready structure, handle table, timeout
/// delta list, and the small amount of bookkeeping (current task, process
/// fallback error) that does not belong to any single object.
pub struct Kernel {
    ready: ReadyQueues,
    handles: HandleTable,
    timers: TimerList,
    current: CriticalSection<Option<Handle>>,
    idle: CriticalSection<Option<Handle>>,
    last_error_fallback: CriticalSection<ErrorKind>,
    #[cfg(feature = "system-stat")]
    stats: CriticalSection<StatsState>,
    #[cfg(feature = "multi-wait")]
    pending_all_of: CriticalSection<Vec<Handle>>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: ReadyQueues::new(),
            handles: HandleTable::new(),
            timers: TimerList::new(),
            current: CriticalSection::new(None),
            idle: CriticalSection::new(None),
            last_error_fallback: CriticalSection::new(ErrorKind::NoError),
            #[cfg(feature = "system-stat")]
            stats: CriticalSection::new(StatsState { elapsed: 0 }),
            #[cfg(feature = "multi-wait")]
            pending_all_of: CriticalSection::new(Vec::new()),
        }
    }

    /// Binds the platform port, brings up hardware, and creates the
    /// reserved idle task. Must be called exactly once before any other
    /// kernel operation.
    pub fn init(&self, port: &'static dyn PlatformPort) -> Result<(), ErrorKind> {
        sirius_hal::bind_platform_port(port);
        port.hw_init();
        log::info!("[KERNEL] init: hardware bring-up complete");

        let stack = alloc::vec![0u8; IDLE_STACK_SIZE].into_boxed_slice();
        let idle = Arc::new(Task::new(stack, IDLE_PRIORITY, 1, true));
        // SAFETY: `stack_base`/`stack_size` come from the stack this task
        // owns, sized and aligned by the allocator above.
        let sp = unsafe {
            port.init_task_stack(idle.stack_base, idle.stack_size, idle_task_entry, core::ptr::null_mut())
        };
        idle.saved_sp.set(sp);

        let handle = self.handles.allocate(
            Arc::new(KernelObject::Task(Arc::clone(&idle))),
            ObjectKind::Task,
            Some(String::from("idle")),
        )?;
        idle.handle.set(Some(handle));
        self.ready.push_back(IDLE_PRIORITY, handle);
        *self.idle.lock() = Some(handle);
        Ok(())
    }

    /// Reverses [`Self::init`]'s hardware bring-up.
    pub fn deinit(&self) {
        log::info!("[KERNEL] deinit: tearing down hardware bring-up");
        platform_port().hw_deinit();
    }

    fn task_arc(&self, handle: Handle) -> Result<Arc<Task>, ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Task)?;
        match &*obj {
            KernelObject::Task(t) => Ok(Arc::clone(t)),
            KernelObject::Mutex(_)
            | KernelObject::Semaphore(_)
            | KernelObject::CountSem(_)
            | KernelObject::Event(_)
            | KernelObject::Timer(_)
            | KernelObject::SharedMem(_)
            | KernelObject::PtrQueue(_)
            | KernelObject::Stream(_)
            | KernelObject::Queue(_)
            | KernelObject::Mailbox(_)
            | KernelObject::Flags(_) => Err(ErrorKind::InvalidHandle),
        }
    }

    fn priority_of(&self, handle: Handle) -> u8 {
        self.handles
            .resolve_any(handle)
            .ok()
            .and_then(|o| match &*o {
                KernelObject::Task(t) => Some(t.priority.get()),
                _ => None,
            })
            .unwrap_or(u8::MAX)
    }

    /// Readies `task` for scheduling unless it is currently suspended, in
    /// which case it stays invisible to the ready structure until
    /// `resume_task` clears the flag (§5: blocked-and-suspended compose).
    fn ready_task(&self, task: &Task, handle: Handle) {
        task.state.set(TaskState::Ready);
        if !task.suspended.get() {
            self.ready.push_back(task.priority.get(), handle);
        }
    }

    // ---- Task lifecycle ---------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_task(
        &self,
        entry: TaskEntry,
        arg: *mut (),
        stack_size: usize,
        priority: u8,
        quantum: u8,
        suspended: bool,
    ) -> Result<Handle, ErrorKind> {
        if priority == IDLE_PRIORITY {
            return Err(ErrorKind::InvalidParameter);
        }
        let stack = alloc::vec![0u8; stack_size].into_boxed_slice();
        let task = Arc::new(Task::new(stack, priority, quantum.max(1), false));
        // SAFETY: see `init`'s comment; same contract.
        let sp = unsafe { platform_port().init_task_stack(task.stack_base, task.stack_size, entry, arg) };
        task.saved_sp.set(sp);
        task.suspended.set(suspended);

        let handle = self.handles.allocate(
            Arc::new(KernelObject::Task(Arc::clone(&task))),
            ObjectKind::Task,
            None,
        )?;
        task.handle.set(Some(handle));
        if task.is_schedulable() {
            self.ready.push_back(priority, handle);
        }
        log::trace!("[TASK] created handle={handle:?} priority={priority} quantum={quantum} suspended={suspended}");
        Ok(handle)
    }

    #[must_use]
    pub fn current_task(&self) -> Option<Handle> {
        *self.current.lock()
    }

    pub fn exit_task(&self, caller: Handle, exit_code: i32) -> Result<(), ErrorKind> {
        let task = self.task_arc(caller)?;
        task.exit_code.set(exit_code);
        self.terminate_task(caller)
    }

    pub fn get_task_exit_code(&self, handle: Handle) -> Result<i32, ErrorKind> {
        Ok(self.task_arc(handle)?.exit_code.get())
    }

    pub fn terminate_task(&self, handle: Handle) -> Result<(), ErrorKind> {
        let task = self.task_arc(handle)?;
        if task.is_idle {
            return Err(ErrorKind::InvalidParameter);
        }
        if task.state.get() == TaskState::Terminated {
            return Ok(());
        }

        if let Some(desc) = task.wait_descriptor.borrow_mut().take() {
            self.unlink_from_refs(handle, &desc.refs);
        }
        #[cfg(feature = "multi-wait")]
        self.pending_all_of.lock().retain(|&h| h != handle);
        task.pending_stream_io.borrow_mut().take();
        self.timers.cancel(TimeoutTarget::Wait(handle));

        if task.state.get() == TaskState::Ready {
            self.ready.remove(task.priority.get(), handle);
        }
        if *self.current.lock() == Some(handle) {
            *self.current.lock() = None;
        }

        #[cfg(feature = "mutex")]
        for (obj_handle, obj) in self
            .handles
            .collect_matching(|o| matches!(o, KernelObject::Mutex(m) if m.owner() == Some(handle)))
        {
            if let KernelObject::Mutex(m) = &*obj {
                if let Ok(Some(next)) = m.release(handle, |h| self.priority_of(h)) {
                    self.complete_wait(next, obj_handle);
                }
            }
        }
        #[cfg(feature = "shared-mem")]
        for (obj_handle, obj) in self.handles.collect_matching(|o| {
            matches!(o, KernelObject::SharedMem(sm) if sm.mutex().is_some_and(|m| m.owner() == Some(handle)))
        }) {
            if let KernelObject::SharedMem(sm) = &*obj {
                if let Ok(Some(next)) = sm.release_shared_memory(handle, |h| self.priority_of(h)) {
                    self.complete_wait(next, obj_handle);
                }
            }
        }

        task.state.set(TaskState::Terminated);
        log::debug!("[TASK] terminated handle={handle:?}");
        Ok(())
    }

    pub fn suspend_task(&self, handle: Handle) -> Result<(), ErrorKind> {
        let task = self.task_arc(handle)?;
        if task.is_idle {
            return Err(ErrorKind::InvalidParameter);
        }
        if task.suspended.get() {
            return Ok(());
        }
        task.suspended.set(true);
        if task.state.get() == TaskState::Ready {
            self.ready.remove(task.priority.get(), handle);
        }
        Ok(())
    }

    pub fn resume_task(&self, handle: Handle) -> Result<(), ErrorKind> {
        let task = self.task_arc(handle)?;
        if !task.suspended.get() {
            return Ok(());
        }
        task.suspended.set(false);
        if task.state.get() == TaskState::Ready {
            self.ready.push_back(task.priority.get(), handle);
        }
        Ok(())
    }

    pub fn get_task_priority(&self, handle: Handle) -> Result<u8, ErrorKind> {
        Ok(self.task_arc(handle)?.priority.get())
    }

    /// Sets both the task's base priority and its current effective
    /// priority. If a priority-ceiling boost is active, the next mutex
    /// release restores to this newly set base rather than whatever was
    /// active before the call.
    pub fn set_task_priority(&self, handle: Handle, new_priority: u8) -> Result<(), ErrorKind> {
        let task = self.task_arc(handle)?;
        if task.is_idle || new_priority == IDLE_PRIORITY {
            return Err(ErrorKind::InvalidParameter);
        }
        let old = task.priority.get();
        task.base_priority.set(new_priority);
        if old != new_priority {
            if task.state.get() == TaskState::Ready {
                self.ready.remove(old, handle);
                self.ready.push_back(new_priority, handle);
            }
            task.priority.set(new_priority);
        }
        Ok(())
    }

    pub fn get_task_quantum(&self, handle: Handle) -> Result<u8, ErrorKind> {
        Ok(self.task_arc(handle)?.quantum.get())
    }

    pub fn set_task_quantum(&self, handle: Handle, quantum: u8) -> Result<(), ErrorKind> {
        let task = self.task_arc(handle)?;
        let q = quantum.max(1);
        task.quantum.set(q);
        task.quantum_remaining.set(q);
        Ok(())
    }

    #[cfg(feature = "system-stat")]
    pub fn get_task_stat(&self, handle: Handle) -> Result<TaskStat, ErrorKind> {
        let task = self.task_arc(handle)?;
        Ok(TaskStat {
            priority: task.priority.get(),
            state: task.state.get(),
            suspended: task.suspended.get(),
            cpu_ticks: task.cpu_ticks_previous_window.get(),
            window_ticks: STATS_WINDOW_TICKS,
        })
    }

    /// Sum of `cpu_ticks` over every non-idle task plus the window length,
    /// so callers can compute system-wide CPU utilization (§4.7).
    #[cfg(feature = "system-stat")]
    #[must_use]
    pub fn get_system_stat(&self) -> SystemStat {
        let mut cpu_ticks = 0u32;
        self.handles.for_each(|o| {
            if let KernelObject::Task(t) = o {
                if !t.is_idle {
                    cpu_ticks += t.cpu_ticks_previous_window.get();
                }
            }
        });
        SystemStat {
            cpu_ticks,
            window_ticks: STATS_WINDOW_TICKS,
        }
    }

    #[must_use]
    pub fn get_last_error(&self, handle: Option<Handle>) -> ErrorKind {
        match handle.and_then(|h| self.handles.resolve(h, ObjectKind::Task).ok()) {
            Some(obj) => match &*obj {
                KernelObject::Task(t) => t.last_error.get(),
                _ => ErrorKind::NoError,
            },
            None => *self.last_error_fallback.lock(),
        }
    }

    pub fn set_last_error(&self, handle: Option<Handle>, err: ErrorKind) {
        match handle.and_then(|h| self.handles.resolve(h, ObjectKind::Task).ok()) {
            Some(obj) => {
                if let KernelObject::Task(t) = &*obj {
                    t.set_last_error(err);
                }
            }
            None => *self.last_error_fallback.lock() = err,
        }
    }

    #[cfg(feature = "open-by-handle")]
    pub fn open_by_handle(&self, handle: Handle) -> Result<(), ErrorKind> {
        self.handles.open_by_handle(handle)
    }

    pub fn open_by_name(&self, kind: ObjectKind, name: &str) -> Result<Handle, ErrorKind> {
        self.handles.open_by_name(kind, name)
    }

    #[cfg(feature = "object-deletion")]
    pub fn close_handle(&self, handle: Handle) -> Result<(), ErrorKind> {
        self.handles.close(handle)
    }

    // ---- Scheduler -----------------------------------------------------

    /// Selects the next task to run: requeues the outgoing task (if it is
    /// still `Running`, i.e. preempted rather than blocked/terminated) and
    /// pops the new highest-priority ready task.
    pub fn schedule(&self) -> Handle {
        let prev = self.current.lock().take();
        if let Some(prev_handle) = prev {
            if let Ok(obj) = self.handles.resolve_any(prev_handle) {
                if let KernelObject::Task(task) = &*obj {
                    if task.state.get() == TaskState::Running {
                        task.quantum_remaining.set(task.quantum.get());
                        self.ready_task(task, prev_handle);
                    }
                }
            }
        }
        let (_, next) = self
            .ready
            .pop_highest_priority()
            .expect("idle task is always ready");
        if let Ok(obj) = self.handles.resolve_any(next) {
            if let KernelObject::Task(task) = &*obj {
                task.state.set(TaskState::Running);
            }
        }
        *self.current.lock() = Some(next);
        next
    }

    /// Drives the tick-driven timer/statistics subsystem (§4.6): advances
    /// the timeout delta list by one tick, decrements the current task's
    /// quantum, and rotates the statistics window when it elapses. Returns
    /// whether the caller (the tick ISR) should perform a reschedule.
    pub fn tick_handler(&self) -> bool {
        let mut needs_resched = false;

        for target in self.timers.advance(1) {
            match target {
                TimeoutTarget::Wait(task) => {
                    self.timeout_wait(task);
                    needs_resched = true;
                }
                TimeoutTarget::Timer(timer) => {
                    #[cfg(feature = "timer")]
                    self.fire_timer(timer);
                    #[cfg(not(feature = "timer"))]
                    let _ = timer;
                }
            }
        }

        if let Some(current) = *self.current.lock() {
            if let Ok(obj) = self.handles.resolve_any(current) {
                if let KernelObject::Task(task) = &*obj {
                    task.tick();
                    if !task.is_idle {
                        let remaining = task.quantum_remaining.get().saturating_sub(1);
                        task.quantum_remaining.set(remaining);
                        if remaining == 0 {
                            needs_resched = true;
                        }
                    }
                }
            }
        }

        #[cfg(feature = "system-stat")]
        {
            let mut stats = self.stats.lock();
            stats.elapsed += 1;
            if stats.elapsed >= STATS_WINDOW_TICKS {
                stats.elapsed = 0;
                drop(stats);
                self.handles.for_each(|o| {
                    if let KernelObject::Task(t) = o {
                        t.rotate_stats_window();
                    }
                });
            }
        }

        needs_resched
    }

    // ---- Wait engine ----------------------------------------------------

    /// Removes `task_handle` from every object in `refs` it might still be
    /// linked to — the generic `Waitable` waiter list where one exists, or
    /// the object-specific not-empty/not-full/flag-waiter lists otherwise.
    /// Safe to call on a ref the task was never linked to.
    fn unlink_from_refs(&self, task_handle: Handle, refs: &[Handle]) {
        for r in refs {
            let Ok(obj) = self.handles.resolve_any(*r) else {
                continue;
            };
            if let Some(w) = obj.as_waitable() {
                w.waiter_list().remove_task(task_handle);
                continue;
            }
            #[allow(unused_variables)]
            match &*obj {
                #[cfg(feature = "flags")]
                KernelObject::Flags(f) => {
                    f.remove_waiter(task_handle);
                }
                #[cfg(feature = "stream")]
                KernelObject::Stream(s) => {
                    s.not_empty_waiters().remove_task(task_handle);
                    s.not_full_waiters().remove_task(task_handle);
                }
                #[cfg(feature = "mailbox")]
                KernelObject::Mailbox(m) => {
                    m.not_empty_waiters().remove_task(task_handle);
                    m.not_full_waiters().remove_task(task_handle);
                }
                #[cfg(feature = "queue")]
                KernelObject::Queue(q) => {
                    q.not_empty_waiters().remove_task(task_handle);
                    q.not_full_waiters().remove_task(task_handle);
                }
                #[cfg(feature = "ptr-queue")]
                KernelObject::PtrQueue(p) => {
                    p.not_empty_waiters().remove_task(task_handle);
                    p.not_full_waiters().remove_task(task_handle);
                }
                #[cfg(feature = "shared-mem")]
                KernelObject::SharedMem(sm) => {
                    if let Some(m) = sm.mutex() {
                        m.waiter_list().remove_task(task_handle);
                    }
                }
                _ => {}
            }
        }
    }

    /// Common wake path for a task blocked through the generic `Waitable`
    /// engine (mutex/semaphore/count-sem/event/timer): records which ref
    /// satisfied the wait, unlinks from every other ref, cancels any
    /// pending timeout, and readies the task.
    fn complete_wait(&self, woken: Handle, satisfied_object: Handle) {
        let Ok(obj) = self.handles.resolve_any(woken) else {
            return;
        };
        let KernelObject::Task(task) = &*obj else {
            return;
        };
        let refs = {
            let mut wd = task.wait_descriptor.borrow_mut();
            let Some(desc) = wd.as_mut() else {
                return;
            };
            desc.satisfied_index = desc.refs.iter().position(|&h| h == satisfied_object);
            desc.status = ErrorKind::NoError;
            desc.refs.clone()
        };
        self.unlink_from_refs(woken, &refs);
        self.timers.cancel(TimeoutTarget::Wait(woken));
        self.ready_task(task, woken);
    }

    /// Wake path for the IPC/flags objects that manage their own waiter
    /// lists directly rather than through `Waitable` — the object has
    /// already popped this waiter off its own list, so there is nothing
    /// left to unlink.
    fn wake_ipc_waiter(&self, handle: Handle) {
        let Ok(obj) = self.handles.resolve_any(handle) else {
            return;
        };
        let KernelObject::Task(task) = &*obj else {
            return;
        };
        self.timers.cancel(TimeoutTarget::Wait(handle));
        task.pending_stream_io.borrow_mut().take();
        if let Some(d) = task.wait_descriptor.borrow_mut().as_mut() {
            d.status = ErrorKind::NoError;
        }
        self.ready_task(task, handle);
    }

    fn timeout_wait(&self, task_handle: Handle) {
        let Ok(obj) = self.handles.resolve_any(task_handle) else {
            return;
        };
        let KernelObject::Task(task) = &*obj else {
            return;
        };
        let refs = {
            let mut wd = task.wait_descriptor.borrow_mut();
            let Some(desc) = wd.as_mut() else {
                return;
            };
            desc.status = if desc.is_sleep {
                ErrorKind::NoError
            } else {
                ErrorKind::TimedOut
            };
            desc.satisfied_index = None;
            desc.refs.clone()
        };
        self.unlink_from_refs(task_handle, &refs);
        #[cfg(feature = "multi-wait")]
        self.pending_all_of.lock().retain(|&h| h != task_handle);
        // A partially-completed stream transfer reports whatever it
        // accumulated so far (already reflected in the caller's `IoRequest`
        // by `continue_stream_transfer`); drop the bookkeeping, the wait is
        // over either way.
        task.pending_stream_io.borrow_mut().take();
        self.ready_task(task, task_handle);
    }

    #[cfg(feature = "timer")]
    fn fire_timer(&self, handle: Handle) {
        let Ok(obj) = self.handles.resolve_any(handle) else {
            return;
        };
        let KernelObject::Timer(t) = &*obj else {
            return;
        };
        let (woken, rearm) = t.fire();
        for w in woken {
            self.complete_wait(w, handle);
        }
        if rearm {
            self.timers.schedule(TimeoutTarget::Timer(handle), t.interval());
        }
        #[cfg(feature = "multi-wait")]
        self.reprobe_all_of();
    }

    #[cfg(feature = "priority-ceiling")]
    fn raise_to_ceiling(&self, owner: Handle, waiter: Handle) {
        let (Ok(owner_task), Ok(waiter_task)) = (self.task_arc(owner), self.task_arc(waiter)) else {
            return;
        };
        let waiter_prio = waiter_task.priority.get();
        if waiter_prio < owner_task.priority.get() {
            if owner_task.state.get() == TaskState::Ready {
                self.ready.remove(owner_task.priority.get(), owner);
                self.ready.push_back(waiter_prio, owner);
            }
            owner_task.priority.set(waiter_prio);
        }
    }

    #[cfg(feature = "priority-ceiling")]
    fn restore_from_ceiling(&self, handle: Handle) {
        let Ok(task) = self.task_arc(handle) else {
            return;
        };
        let base = task.base_priority.get();
        if task.priority.get() != base {
            if task.state.get() == TaskState::Ready {
                self.ready.remove(task.priority.get(), handle);
                self.ready.push_back(base, handle);
            }
            task.priority.set(base);
        }
    }

    /// Re-checks every task blocked on an all-of multi-wait: each such task
    /// is tracked in `pending_all_of` rather than linked onto any single
    /// object's waiter list, since satisfying it requires every referenced
    /// object to be simultaneously consumable. Called after any operation
    /// that could make an object newly satisfiable.
    #[cfg(feature = "multi-wait")]
    fn reprobe_all_of(&self) {
        let candidates = self.pending_all_of.lock().clone();
        for task_handle in candidates {
            let Ok(obj) = self.handles.resolve_any(task_handle) else {
                continue;
            };
            let KernelObject::Task(task) = &*obj else {
                continue;
            };
            let refs = {
                let wd = task.wait_descriptor.borrow();
                match wd.as_ref() {
                    Some(d) if d.policy == WaitPolicy::AllOf => d.refs.clone(),
                    _ => continue,
                }
            };
            let objects: Vec<_> = refs
                .iter()
                .filter_map(|h| self.handles.resolve_any(*h).ok())
                .collect();
            if objects.len() != refs.len() {
                continue;
            }
            let all_ready = objects
                .iter()
                .all(|o| o.as_waitable().is_some_and(|w| w.satisfy_probe(task_handle)));
            if !all_ready {
                continue;
            }
            for o in &objects {
                if let Some(w) = o.as_waitable() {
                    w.consume_one(task_handle);
                }
            }
            self.pending_all_of.lock().retain(|&h| h != task_handle);
            self.timers.cancel(TimeoutTarget::Wait(task_handle));
            {
                let mut wd = task.wait_descriptor.borrow_mut();
                if let Some(d) = wd.as_mut() {
                    d.status = ErrorKind::NoError;
                    d.satisfied_index = None;
                }
            }
            self.ready_task(task, task_handle);
        }
    }

    pub fn wait_for_object(
        &self,
        caller: Handle,
        object: Handle,
        timeout: Timeout,
    ) -> Result<WaitOutcome, ErrorKind> {
        self.wait_for_objects(caller, alloc::vec![object], WaitPolicy::AnyOf, timeout)
    }

    pub fn wait_for_objects(
        &self,
        caller: Handle,
        refs: Vec<Handle>,
        policy: WaitPolicy,
        timeout: Timeout,
    ) -> Result<WaitOutcome, ErrorKind> {
        if refs.is_empty() || refs.len() > MAX_WAIT {
            return Err(ErrorKind::InvalidParameter);
        }
        #[cfg(not(feature = "multi-wait"))]
        if policy == WaitPolicy::AllOf {
            return Err(ErrorKind::InvalidParameter);
        }

        let objects: Vec<Arc<KernelObject>> = refs
            .iter()
            .map(|h| self.handles.resolve_any(*h))
            .collect::<Result<_, _>>()?;

        match policy {
            WaitPolicy::AnyOf => {
                for (index, obj) in objects.iter().enumerate() {
                    if let Some(w) = obj.as_waitable() {
                        if w.satisfy_probe(caller) {
                            w.consume_one(caller);
                            return Ok(WaitOutcome::Satisfied { index });
                        }
                    }
                }
            }
            WaitPolicy::AllOf => {
                let all_ready = objects
                    .iter()
                    .all(|o| o.as_waitable().is_some_and(|w| w.satisfy_probe(caller)));
                if all_ready {
                    for o in &objects {
                        if let Some(w) = o.as_waitable() {
                            w.consume_one(caller);
                        }
                    }
                    return Ok(WaitOutcome::Satisfied { index: 0 });
                }
            }
        }

        if timeout == Timeout::NoBlock {
            return Err(ErrorKind::TimedOut);
        }

        #[cfg(feature = "priority-ceiling")]
        if policy == WaitPolicy::AnyOf {
            for (r, obj) in refs.iter().zip(objects.iter()) {
                if let KernelObject::Mutex(m) = &**obj {
                    if let Some(owner) = m.owner() {
                        self.raise_to_ceiling(owner, caller);
                    }
                }
                let _ = r;
            }
        }

        let task = self.task_arc(caller)?;
        *task.wait_descriptor.borrow_mut() = Some(WaitDescriptor::new(refs.clone(), policy));
        task.state.set(TaskState::Blocked);

        match policy {
            WaitPolicy::AnyOf => {
                for (r, obj) in refs.iter().zip(objects.iter()) {
                    if let Some(w) = obj.as_waitable() {
                        w.waiter_list().enqueue(WaiterEntry {
                            task: caller,
                            object: *r,
                        });
                    }
                }
            }
            WaitPolicy::AllOf => {
                #[cfg(feature = "multi-wait")]
                self.pending_all_of.lock().push(caller);
            }
        }

        if let Timeout::Ticks(n) = timeout {
            self.timers.schedule(TimeoutTarget::Wait(caller), n);
        }

        Ok(WaitOutcome::Blocked)
    }

    pub fn sleep(&self, caller: Handle, ticks: u32) -> Result<WaitOutcome, ErrorKind> {
        if ticks == 0 {
            return Ok(WaitOutcome::Satisfied { index: 0 });
        }
        let task = self.task_arc(caller)?;
        *task.wait_descriptor.borrow_mut() = Some(WaitDescriptor::sleep());
        task.state.set(TaskState::Blocked);
        self.timers.schedule(TimeoutTarget::Wait(caller), ticks);
        Ok(WaitOutcome::Blocked)
    }

    /// Blocks `caller` on an IPC not-empty/not-full/flag waiter list
    /// directly (outside the generic `Waitable` engine), recording a
    /// real (non-sleep) descriptor referencing `object` so a timeout
    /// reports `TimedOut` and `unlink_from_refs` can find it again.
    fn block_ipc_wait(
        &self,
        caller: Handle,
        object: Handle,
        list: &crate::wait::WaiterList,
        timeout: Timeout,
    ) -> Result<WaitOutcome, ErrorKind> {
        let task = self.task_arc(caller)?;
        *task.wait_descriptor.borrow_mut() =
            Some(WaitDescriptor::new(alloc::vec![object], WaitPolicy::AnyOf));
        task.state.set(TaskState::Blocked);
        list.enqueue(WaiterEntry {
            task: caller,
            object,
        });
        if let Timeout::Ticks(n) = timeout {
            self.timers.schedule(TimeoutTarget::Wait(caller), n);
        }
        Ok(WaitOutcome::Blocked)
    }

    // ---- Mutex -----------------------------------------------------------

    #[cfg(feature = "mutex")]
    pub fn create_mutex(&self, name: Option<String>) -> Result<Handle, ErrorKind> {
        self.handles
            .allocate(Arc::new(KernelObject::Mutex(Mutex::new(None))), ObjectKind::Mutex, name)
    }

    #[cfg(feature = "mutex")]
    pub fn mutex_release(&self, caller: Handle, handle: Handle) -> Result<(), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Mutex)?;
        let KernelObject::Mutex(m) = &*obj else {
            unreachable!("resolve checked kind")
        };
        let next = m.release(caller, |h| self.priority_of(h)).inspect_err(|e| {
            log::warn!("[MUTEX] release handle={handle:?} by caller={caller:?} rejected: {e}");
        })?;
        #[cfg(feature = "priority-ceiling")]
        let fully_released = m.owner() != Some(caller);
        if let Some(w) = next {
            self.complete_wait(w, handle);
        }
        #[cfg(feature = "priority-ceiling")]
        if fully_released {
            self.restore_from_ceiling(caller);
        }
        #[cfg(feature = "multi-wait")]
        self.reprobe_all_of();
        Ok(())
    }

    // ---- Semaphore ---------------------------------------------------

    #[cfg(feature = "semaphore")]
    pub fn create_semaphore(&self, initial: bool, name: Option<String>) -> Result<Handle, ErrorKind> {
        self.handles.allocate(
            Arc::new(KernelObject::Semaphore(Semaphore::new(initial))),
            ObjectKind::Semaphore,
            name,
        )
    }

    #[cfg(feature = "semaphore")]
    pub fn semaphore_release(&self, handle: Handle) -> Result<(), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Semaphore)?;
        let KernelObject::Semaphore(s) = &*obj else {
            unreachable!("resolve checked kind")
        };
        if let Some(w) = s.release() {
            self.complete_wait(w, handle);
        }
        #[cfg(feature = "multi-wait")]
        self.reprobe_all_of();
        Ok(())
    }

    // ---- Counting semaphore --------------------------------------------

    #[cfg(feature = "count-sem")]
    pub fn create_count_sem(&self, initial: u32, max: u32, name: Option<String>) -> Result<Handle, ErrorKind> {
        self.handles.allocate(
            Arc::new(KernelObject::CountSem(CountSem::new(initial, max))),
            ObjectKind::CountSem,
            name,
        )
    }

    #[cfg(feature = "count-sem")]
    pub fn count_sem_release(&self, handle: Handle, n: u32) -> Result<u32, ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::CountSem)?;
        let KernelObject::CountSem(c) = &*obj else {
            unreachable!("resolve checked kind")
        };
        let (prev, woken) = c.release(n).inspect_err(|e| {
            log::warn!("[COUNT_SEM] release handle={handle:?} n={n} rejected: {e}");
        })?;
        for w in woken {
            self.complete_wait(w, handle);
        }
        #[cfg(feature = "multi-wait")]
        self.reprobe_all_of();
        Ok(prev)
    }

    // ---- Event -----------------------------------------------------------

    #[cfg(feature = "event")]
    pub fn create_event(&self, mode: EventMode, initial: bool, name: Option<String>) -> Result<Handle, ErrorKind> {
        self.handles
            .allocate(Arc::new(KernelObject::Event(Event::new(mode, initial))), ObjectKind::Event, name)
    }

    #[cfg(feature = "event")]
    pub fn event_set(&self, handle: Handle) -> Result<(), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Event)?;
        let KernelObject::Event(e) = &*obj else {
            unreachable!("resolve checked kind")
        };
        for w in e.set() {
            self.complete_wait(w, handle);
        }
        #[cfg(feature = "multi-wait")]
        self.reprobe_all_of();
        Ok(())
    }

    #[cfg(feature = "event")]
    pub fn event_reset(&self, handle: Handle) -> Result<(), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Event)?;
        let KernelObject::Event(e) = &*obj else {
            unreachable!("resolve checked kind")
        };
        e.reset();
        Ok(())
    }

    // ---- Timer -------------------------------------------------------

    #[cfg(feature = "timer")]
    pub fn create_timer(
        &self,
        interval: u32,
        pass_count: u32,
        mode: EventMode,
        name: Option<String>,
    ) -> Result<Handle, ErrorKind> {
        let handle = self.handles.allocate(
            Arc::new(KernelObject::Timer(Timer::new(interval, pass_count, mode))),
            ObjectKind::Timer,
            name,
        )?;
        self.timers.schedule(TimeoutTarget::Timer(handle), interval);
        Ok(handle)
    }

    #[cfg(feature = "timer")]
    pub fn timer_cancel(&self, handle: Handle) -> Result<(), ErrorKind> {
        self.handles.resolve(handle, ObjectKind::Timer)?;
        self.timers.cancel(TimeoutTarget::Timer(handle));
        Ok(())
    }

    // ---- Flags -------------------------------------------------------

    #[cfg(feature = "flags")]
    pub fn create_flags(&self, initial: u32, name: Option<String>) -> Result<Handle, ErrorKind> {
        self.handles
            .allocate(Arc::new(KernelObject::Flags(Flags::new(initial))), ObjectKind::Flags, name)
    }

    #[cfg(feature = "flags")]
    pub fn flags_set(&self, handle: Handle, mask: u32) -> Result<(), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Flags)?;
        let KernelObject::Flags(f) = &*obj else {
            unreachable!("resolve checked kind")
        };
        for w in f.set(mask) {
            self.wake_ipc_waiter(w);
        }
        Ok(())
    }

    #[cfg(feature = "flags")]
    pub fn flags_reset(&self, handle: Handle, mask: u32) -> Result<(), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Flags)?;
        let KernelObject::Flags(f) = &*obj else {
            unreachable!("resolve checked kind")
        };
        f.reset(mask);
        Ok(())
    }

    #[cfg(feature = "flags")]
    pub fn flags_wait(
        &self,
        caller: Handle,
        handle: Handle,
        mask: u32,
        policy: FlagPolicy,
        timeout: Timeout,
    ) -> Result<WaitOutcome, ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Flags)?;
        let KernelObject::Flags(f) = &*obj else {
            unreachable!("resolve checked kind")
        };
        if f.try_satisfy(mask, policy) {
            return Ok(WaitOutcome::Satisfied { index: 0 });
        }
        if timeout == Timeout::NoBlock {
            return Err(ErrorKind::TimedOut);
        }
        let task = self.task_arc(caller)?;
        *task.wait_descriptor.borrow_mut() =
            Some(WaitDescriptor::new(alloc::vec![handle], WaitPolicy::AnyOf));
        task.state.set(TaskState::Blocked);
        f.enqueue_wait(caller, mask, policy);
        if let Timeout::Ticks(n) = timeout {
            self.timers.schedule(TimeoutTarget::Wait(caller), n);
        }
        Ok(WaitOutcome::Blocked)
    }

    // ---- Shared memory -------------------------------------------------

    #[cfg(feature = "shared-mem")]
    pub fn create_shared_mem(&self, size: usize, protected: bool, name: Option<String>) -> Result<Handle, ErrorKind> {
        self.handles.allocate(
            Arc::new(KernelObject::SharedMem(SharedMem::new(size, protected))),
            ObjectKind::SharedMem,
            name,
        )
    }

    #[cfg(feature = "shared-mem-address")]
    pub fn shared_mem_address(&self, handle: Handle) -> Result<*mut u8, ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::SharedMem)?;
        let KernelObject::SharedMem(sm) = &*obj else {
            unreachable!("resolve checked kind")
        };
        Ok(sm.get_address())
    }

    #[cfg(feature = "shared-mem")]
    pub fn shared_mem_acquire(&self, caller: Handle, handle: Handle, timeout: Timeout) -> Result<WaitOutcome, ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::SharedMem)?;
        let KernelObject::SharedMem(sm) = &*obj else {
            unreachable!("resolve checked kind")
        };
        let Some(mutex) = sm.mutex() else {
            return Ok(WaitOutcome::Satisfied { index: 0 });
        };
        if mutex.satisfy_probe(caller) {
            mutex.consume_one(caller);
            return Ok(WaitOutcome::Satisfied { index: 0 });
        }
        if timeout == Timeout::NoBlock {
            return Err(ErrorKind::TimedOut);
        }
        self.block_ipc_wait(caller, handle, mutex.waiter_list(), timeout)
    }

    #[cfg(feature = "shared-mem")]
    pub fn shared_mem_release(&self, caller: Handle, handle: Handle) -> Result<(), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::SharedMem)?;
        let KernelObject::SharedMem(sm) = &*obj else {
            unreachable!("resolve checked kind")
        };
        if let Some(next) = sm.release_shared_memory(caller, |h| self.priority_of(h))? {
            self.complete_wait(next, handle);
        }
        Ok(())
    }

    // ---- Byte stream -------------------------------------------------

    #[cfg(feature = "stream")]
    pub fn create_stream(&self, mode: ProtectionMode, capacity: usize, name: Option<String>) -> Result<Handle, ErrorKind> {
        self.handles
            .allocate(Arc::new(KernelObject::Stream(ByteStream::new(mode, capacity)?)), ObjectKind::Stream, name)
    }

    /// Continues a blocked task's byte-stream transfer after room or data
    /// freed up on the opposite side (§4.5: a blocking read/write "blocks
    /// until all bytes transferred or timeout", not until the first byte
    /// moves). Moves as much of the remaining buffer as fits right now,
    /// accumulates `IoRequest.transferred`, and either wakes the task (the
    /// transfer is complete) or re-enqueues it to wait for the rest.
    #[cfg(feature = "stream")]
    fn continue_stream_transfer(&self, stream_handle: Handle, woken: Handle) {
        let Ok(obj) = self.handles.resolve_any(stream_handle) else {
            self.wake_ipc_waiter(woken);
            return;
        };
        let KernelObject::Stream(s) = &*obj else {
            self.wake_ipc_waiter(woken);
            return;
        };
        let Ok(task) = self.task_arc(woken) else {
            return;
        };
        let Some(mut io) = task.pending_stream_io.borrow_mut().take() else {
            self.wake_ipc_waiter(woken);
            return;
        };
        // SAFETY: `io.buf` points at the unconsumed suffix of the caller's
        // own buffer, which stays live and exclusively owned by this task
        // for as long as it remains blocked on this wait.
        let slice = unsafe { core::slice::from_raw_parts_mut(io.buf, io.remaining) };
        let (n, next_woken) = if io.is_write { s.write_now(slice) } else { s.read_now(slice) };
        // SAFETY: `io.req` points at the caller's still-live `IoRequest`,
        // by the same contract.
        unsafe {
            (*io.req).transferred += n;
        }
        let remaining = io.remaining - n;
        if remaining == 0 {
            self.wake_ipc_waiter(woken);
        } else {
            // SAFETY: `n <= io.remaining`, so this stays within the buffer.
            io.buf = unsafe { io.buf.add(n) };
            io.remaining = remaining;
            let list = if io.is_write { s.not_full_waiters() } else { s.not_empty_waiters() };
            list.enqueue(WaiterEntry {
                task: woken,
                object: stream_handle,
            });
            *task.pending_stream_io.borrow_mut() = Some(io);
        }
        if let Some(w) = next_woken {
            self.continue_stream_transfer(stream_handle, w);
        }
    }

    #[cfg(feature = "stream")]
    pub fn stream_read(
        &self,
        caller: Handle,
        handle: Handle,
        dst: &mut [u8],
        req: &mut crate::io::IoRequest,
    ) -> Result<WaitOutcome, ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Stream)?;
        let KernelObject::Stream(s) = &*obj else {
            unreachable!("resolve checked kind")
        };
        let (n, woken) = s.read_now(dst);
        req.transferred = n;
        if let Some(w) = woken {
            self.continue_stream_transfer(handle, w);
        }
        if n == dst.len() {
            return Ok(WaitOutcome::Satisfied { index: 0 });
        }
        if !s.mode().contains(ProtectionMode::WAIT_IF_EMPTY) || req.timeout == Timeout::NoBlock {
            if n > 0 {
                return Ok(WaitOutcome::Satisfied { index: 0 });
            }
            return Err(ErrorKind::QueueEmpty);
        }
        let task = self.task_arc(caller)?;
        *task.pending_stream_io.borrow_mut() = Some(PendingStreamIo {
            stream: handle,
            is_write: false,
            // SAFETY: `n < dst.len()` here, so `dst.as_mut_ptr().add(n)` is
            // in-bounds (one-past-the-end is allowed when remaining is 0,
            // which cannot happen on this path).
            buf: unsafe { dst.as_mut_ptr().add(n) },
            remaining: dst.len() - n,
            req: req as *mut _,
        });
        self.block_ipc_wait(caller, handle, s.not_empty_waiters(), req.timeout)
    }

    #[cfg(feature = "stream")]
    pub fn stream_write(
        &self,
        caller: Handle,
        handle: Handle,
        src: &[u8],
        req: &mut crate::io::IoRequest,
    ) -> Result<WaitOutcome, ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Stream)?;
        let KernelObject::Stream(s) = &*obj else {
            unreachable!("resolve checked kind")
        };
        let (n, woken) = s.write_now(src);
        req.transferred = n;
        if let Some(w) = woken {
            self.continue_stream_transfer(handle, w);
        }
        if n == src.len() {
            return Ok(WaitOutcome::Satisfied { index: 0 });
        }
        if !s.mode().contains(ProtectionMode::WAIT_IF_FULL) || req.timeout == Timeout::NoBlock {
            if n > 0 {
                return Ok(WaitOutcome::Satisfied { index: 0 });
            }
            return Err(ErrorKind::QueueFull);
        }
        let task = self.task_arc(caller)?;
        *task.pending_stream_io.borrow_mut() = Some(PendingStreamIo {
            stream: handle,
            is_write: true,
            // SAFETY: same reasoning as `stream_read`; the source buffer
            // outlives the blocking call and is not otherwise aliased.
            buf: unsafe { src.as_ptr().add(n) as *mut u8 },
            remaining: src.len() - n,
            req: req as *mut _,
        });
        self.block_ipc_wait(caller, handle, s.not_full_waiters(), req.timeout)
    }

    /// Leases a readable region of up to `max_len` bytes for zero-copy
    /// direct access (§4.5); only valid on a stream created with
    /// [`ProtectionMode::DIRECT_RW`]. Pair with [`Self::stream_commit_read`].
    #[cfg(feature = "stream")]
    pub fn stream_lease_read(&self, handle: Handle, max_len: usize) -> Result<(*const u8, usize), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Stream)?;
        let KernelObject::Stream(s) = &*obj else {
            unreachable!("resolve checked kind")
        };
        if !s.mode().contains(ProtectionMode::DIRECT_RW) {
            return Err(ErrorKind::InvalidParameter);
        }
        // SAFETY: the returned pointer is handed to the caller under the
        // same lease/commit contract `ByteStream::lease_read` documents;
        // the kernel does not retain it past this call.
        Ok(unsafe { s.lease_read(max_len) })
    }

    #[cfg(feature = "stream")]
    pub fn stream_commit_read(&self, handle: Handle, len: usize) -> Result<(), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Stream)?;
        let KernelObject::Stream(s) = &*obj else {
            unreachable!("resolve checked kind")
        };
        if let Some(w) = s.commit_read(len) {
            self.continue_stream_transfer(handle, w);
        }
        Ok(())
    }

    /// Leases a writable region; see [`Self::stream_lease_read`].
    #[cfg(feature = "stream")]
    pub fn stream_lease_write(&self, handle: Handle, max_len: usize) -> Result<(*mut u8, usize), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Stream)?;
        let KernelObject::Stream(s) = &*obj else {
            unreachable!("resolve checked kind")
        };
        if !s.mode().contains(ProtectionMode::DIRECT_RW) {
            return Err(ErrorKind::InvalidParameter);
        }
        // SAFETY: see `stream_lease_read`.
        Ok(unsafe { s.lease_write(max_len) })
    }

    #[cfg(feature = "stream")]
    pub fn stream_commit_write(&self, handle: Handle, len: usize) -> Result<(), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Stream)?;
        let KernelObject::Stream(s) = &*obj else {
            unreachable!("resolve checked kind")
        };
        if let Some(w) = s.commit_write(len) {
            self.continue_stream_transfer(handle, w);
        }
        Ok(())
    }

    // ---- Message queue -------------------------------------------------

    #[cfg(feature = "queue")]
    pub fn create_queue(
        &self,
        mode: ProtectionMode,
        message_size: usize,
        capacity: usize,
        name: Option<String>,
    ) -> Result<Handle, ErrorKind> {
        self.handles.allocate(
            Arc::new(KernelObject::Queue(MessageQueue::new(mode, message_size, capacity)?)),
            ObjectKind::Queue,
            name,
        )
    }

    #[cfg(feature = "queue")]
    pub fn queue_post(&self, caller: Handle, handle: Handle, buf: &[u8], timeout: Timeout) -> Result<WaitOutcome, ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Queue)?;
        let KernelObject::Queue(q) = &*obj else {
            unreachable!("resolve checked kind")
        };
        match q.try_post(buf) {
            Ok(woken) => {
                if let Some(w) = woken {
                    self.wake_ipc_waiter(w);
                }
                Ok(WaitOutcome::Satisfied { index: 0 })
            }
            Err(ErrorKind::QueueFull) if q.mode().contains(ProtectionMode::WAIT_IF_FULL) && timeout != Timeout::NoBlock => {
                self.block_ipc_wait(caller, handle, q.not_full_waiters(), timeout)
            }
            Err(e) => Err(e),
        }
    }

    #[cfg(feature = "queue")]
    pub fn queue_pend(&self, caller: Handle, handle: Handle, buf: &mut [u8], timeout: Timeout) -> Result<WaitOutcome, ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Queue)?;
        let KernelObject::Queue(q) = &*obj else {
            unreachable!("resolve checked kind")
        };
        match q.try_pend(buf) {
            Ok(woken) => {
                if let Some(w) = woken {
                    self.wake_ipc_waiter(w);
                }
                Ok(WaitOutcome::Satisfied { index: 0 })
            }
            Err(ErrorKind::QueueEmpty) if q.mode().contains(ProtectionMode::WAIT_IF_EMPTY) && timeout != Timeout::NoBlock => {
                self.block_ipc_wait(caller, handle, q.not_empty_waiters(), timeout)
            }
            Err(e) => Err(e),
        }
    }

    // ---- Mailbox -------------------------------------------------------

    #[cfg(feature = "mailbox")]
    pub fn create_mailbox(&self, mode: ProtectionMode, capacity: usize, name: Option<String>) -> Result<Handle, ErrorKind> {
        self.handles
            .allocate(Arc::new(KernelObject::Mailbox(Mailbox::new(mode, capacity)?)), ObjectKind::Mailbox, name)
    }

    #[cfg(feature = "mailbox")]
    pub fn mailbox_post(&self, caller: Handle, handle: Handle, buf: &[u8], timeout: Timeout) -> Result<WaitOutcome, ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Mailbox)?;
        let KernelObject::Mailbox(mbox) = &*obj else {
            unreachable!("resolve checked kind")
        };
        match mbox.try_post(buf) {
            Ok(woken) => {
                if let Some(w) = woken {
                    self.wake_ipc_waiter(w);
                }
                Ok(WaitOutcome::Satisfied { index: 0 })
            }
            Err(ErrorKind::QueueFull)
                if mbox.mode().contains(ProtectionMode::WAIT_IF_FULL) && timeout != Timeout::NoBlock =>
            {
                self.block_ipc_wait(caller, handle, mbox.not_full_waiters(), timeout)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the original message length (possibly larger than `buf`,
    /// per the mailbox's truncate-but-report semantics) and the outcome.
    #[cfg(feature = "mailbox")]
    pub fn mailbox_pend(
        &self,
        caller: Handle,
        handle: Handle,
        buf: &mut [u8],
        timeout: Timeout,
    ) -> Result<(usize, WaitOutcome), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Mailbox)?;
        let KernelObject::Mailbox(mbox) = &*obj else {
            unreachable!("resolve checked kind")
        };
        match mbox.try_pend(buf) {
            Ok((len, woken)) => {
                if let Some(w) = woken {
                    self.wake_ipc_waiter(w);
                }
                Ok((len, WaitOutcome::Satisfied { index: 0 }))
            }
            Err(ErrorKind::QueueEmpty)
                if mbox.mode().contains(ProtectionMode::WAIT_IF_EMPTY) && timeout != Timeout::NoBlock =>
            {
                Ok((0, self.block_ipc_wait(caller, handle, mbox.not_empty_waiters(), timeout)?))
            }
            Err(e) => Err(e),
        }
    }

    // ---- Pointer queue -------------------------------------------------

    #[cfg(feature = "ptr-queue")]
    pub fn create_ptr_queue(&self, mode: ProtectionMode, capacity: usize, name: Option<String>) -> Result<Handle, ErrorKind> {
        self.handles.allocate(
            Arc::new(KernelObject::PtrQueue(PtrQueue::new(mode, capacity)?)),
            ObjectKind::PtrQueue,
            name,
        )
    }

    #[cfg(feature = "ptr-queue")]
    pub fn ptr_queue_post(
        &self,
        caller: Handle,
        handle: Handle,
        ptr: *mut (),
        timeout: Timeout,
    ) -> Result<WaitOutcome, ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::PtrQueue)?;
        let KernelObject::PtrQueue(q) = &*obj else {
            unreachable!("resolve checked kind")
        };
        match q.try_post(ptr) {
            Ok(woken) => {
                if let Some(w) = woken {
                    self.wake_ipc_waiter(w);
                }
                Ok(WaitOutcome::Satisfied { index: 0 })
            }
            Err(ErrorKind::QueueFull) if q.mode().contains(ProtectionMode::WAIT_IF_FULL) && timeout != Timeout::NoBlock => {
                self.block_ipc_wait(caller, handle, q.not_full_waiters(), timeout)
            }
            Err(e) => Err(e),
        }
    }

    #[cfg(feature = "ptr-queue")]
    pub fn ptr_queue_pend(&self, caller: Handle, handle: Handle, timeout: Timeout) -> Result<(*mut (), WaitOutcome), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::PtrQueue)?;
        let KernelObject::PtrQueue(q) = &*obj else {
            unreachable!("resolve checked kind")
        };
        match q.try_pend() {
            Ok((ptr, woken)) => {
                if let Some(w) = woken {
                    self.wake_ipc_waiter(w);
                }
                Ok((ptr, WaitOutcome::Satisfied { index: 0 }))
            }
            Err(ErrorKind::QueueEmpty) if q.mode().contains(ProtectionMode::WAIT_IF_EMPTY) && timeout != Timeout::NoBlock => {
                Ok((
                    core::ptr::null_mut(),
                    self.block_ipc_wait(caller, handle, q.not_empty_waiters(), timeout)?,
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Non-blocking look at the next pointer without removing it (§4.5).
    #[cfg(feature = "ptr-queue")]
    pub fn ptr_queue_peek(&self, handle: Handle) -> Result<*mut (), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::PtrQueue)?;
        let KernelObject::PtrQueue(q) = &*obj else {
            unreachable!("resolve checked kind")
        };
        q.peek()
    }

    #[cfg(feature = "ptr-queue")]
    pub fn ptr_queue_clear(&self, handle: Handle) -> Result<(), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::PtrQueue)?;
        let KernelObject::PtrQueue(q) = &*obj else {
            unreachable!("resolve checked kind")
        };
        q.clear();
        Ok(())
    }

    // ---- Message queue housekeeping ------------------------------------

    #[cfg(feature = "queue")]
    pub fn queue_clear(&self, handle: Handle) -> Result<(), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Queue)?;
        let KernelObject::Queue(q) = &*obj else {
            unreachable!("resolve checked kind")
        };
        q.clear();
        Ok(())
    }

    // ---- Mailbox housekeeping -------------------------------------------

    /// Non-blocking look at the next message without removing it (§4.5).
    #[cfg(feature = "mailbox")]
    pub fn mailbox_peek(&self, handle: Handle, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Mailbox)?;
        let KernelObject::Mailbox(mbox) = &*obj else {
            unreachable!("resolve checked kind")
        };
        mbox.peek(buf)
    }

    /// Returns `(next_message_size, queued_count)`.
    #[cfg(feature = "mailbox")]
    pub fn mailbox_get_info(&self, handle: Handle) -> Result<(usize, usize), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Mailbox)?;
        let KernelObject::Mailbox(mbox) = &*obj else {
            unreachable!("resolve checked kind")
        };
        Ok(mbox.get_info())
    }

    #[cfg(feature = "mailbox")]
    pub fn mailbox_clear(&self, handle: Handle) -> Result<(), ErrorKind> {
        let obj = self.handles.resolve(handle, ObjectKind::Mailbox)?;
        let KernelObject::Mailbox(mbox) = &*obj else {
            unreachable!("resolve checked kind")
        };
        mbox.clear();
        Ok(())
    }
}

// SAFETY: every field is either a `CriticalSection` (interrupt-lock-guarded
// `spin::Mutex`) or a type that is itself `Send + Sync`; there is no
// unsynchronized interior mutability reachable from `&Kernel`.
unsafe impl Sync for Kernel {}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use sirius_hal::mock::MockPort;
    use std::sync::Once as StdOnce;

    static MOCK: MockPort = MockPort::new();
    static BIND: StdOnce = StdOnce::new();

    fn new_kernel() -> Kernel {
        BIND.call_once(|| {
            sirius_hal::bind_platform_port(&MOCK);
        });
        let k = Kernel::new();
        k.init(&MOCK).unwrap();
        k
    }

    extern "C" fn noop_entry(_arg: *mut ()) {}

    #[test]
    fn schedule_picks_idle_when_nothing_else_ready() {
        let k = new_kernel();
        let idle = k.schedule();
        let stat = k.get_task_stat(idle).unwrap();
        assert_eq!(stat.priority, IDLE_PRIORITY);
    }

    #[test]
    fn higher_priority_task_preempts_idle() {
        let k = new_kernel();
        let t = k.create_task(noop_entry, core::ptr::null_mut(), 256, 5, 3, false).unwrap();
        let next = k.schedule();
        assert_eq!(next, t);
    }

    #[test]
    fn quantum_exhaustion_signals_reschedule() {
        let k = new_kernel();
        let t = k.create_task(noop_entry, core::ptr::null_mut(), 256, 5, 2, false).unwrap();
        k.schedule();
        assert_eq!(k.current_task(), Some(t));
        assert!(!k.tick_handler());
        assert!(k.tick_handler());
    }

    #[test]
    fn same_priority_round_robins_after_quantum() {
        let k = new_kernel();
        let a = k.create_task(noop_entry, core::ptr::null_mut(), 256, 5, 1, false).unwrap();
        let b = k.create_task(noop_entry, core::ptr::null_mut(), 256, 5, 1, false).unwrap();
        assert_eq!(k.schedule(), a);
        assert!(k.tick_handler());
        assert_eq!(k.schedule(), b);
        assert!(k.tick_handler());
        assert_eq!(k.schedule(), a);
    }

    #[test]
    fn sleep_blocks_and_wakes_on_timeout() {
        let k = new_kernel();
        let t = k.create_task(noop_entry, core::ptr::null_mut(), 256, 5, 3, false).unwrap();
        assert_eq!(k.schedule(), t);
        assert_eq!(k.sleep(t, 3).unwrap(), WaitOutcome::Blocked);
        let stat = k.get_task_stat(t).unwrap();
        assert_eq!(stat.state, TaskState::Blocked);
        assert!(!k.tick_handler());
        assert!(!k.tick_handler());
        assert!(k.tick_handler());
        assert_eq!(k.get_task_stat(t).unwrap().state, TaskState::Ready);
    }

    #[test]
    fn suspend_on_blocked_task_defers_resume_until_satisfied() {
        let k = new_kernel();
        let t = k.create_task(noop_entry, core::ptr::null_mut(), 256, 5, 3, false).unwrap();
        k.schedule();
        k.sleep(t, 2).unwrap();
        k.suspend_task(t).unwrap();
        k.tick_handler();
        k.tick_handler();
        // Timer fired but the task stays invisible to the ready queue.
        assert_eq!(k.get_task_stat(t).unwrap().state, TaskState::Ready);
        assert!(k.get_task_stat(t).unwrap().suspended);
        k.resume_task(t).unwrap();
        // resume alone doesn't re-run schedule(); but the task is now
        // reachable: prove it by scheduling and seeing it returned.
        let next = k.schedule();
        assert_eq!(next, t);
    }

    #[cfg(feature = "mutex")]
    #[test]
    fn mutex_wait_blocks_then_wakes_on_release() {
        let k = new_kernel();
        let m = k.create_mutex(None).unwrap();
        let owner = k.create_task(noop_entry, core::ptr::null_mut(), 256, 10, 3, false).unwrap();
        let waiter = k.create_task(noop_entry, core::ptr::null_mut(), 256, 5, 3, false).unwrap();

        assert_eq!(
            k.wait_for_object(owner, m, Timeout::Infinite).unwrap(),
            WaitOutcome::Satisfied { index: 0 }
        );
        assert_eq!(
            k.wait_for_object(waiter, m, Timeout::Infinite).unwrap(),
            WaitOutcome::Blocked
        );
        assert_eq!(k.get_task_stat(waiter).unwrap().state, TaskState::Blocked);

        k.mutex_release(owner, m).unwrap();
        assert_eq!(k.get_task_stat(waiter).unwrap().state, TaskState::Ready);
    }

    #[cfg(feature = "count-sem")]
    #[test]
    fn count_sem_overflow_rejected_and_release_wakes_fifo() {
        let k = new_kernel();
        let s = k.create_count_sem(0, 2, None).unwrap();
        let a = k.create_task(noop_entry, core::ptr::null_mut(), 256, 5, 3, false).unwrap();
        let b = k.create_task(noop_entry, core::ptr::null_mut(), 256, 5, 3, false).unwrap();

        assert_eq!(k.wait_for_object(a, s, Timeout::NoBlock).unwrap_err(), ErrorKind::TimedOut);
        assert_eq!(k.wait_for_object(a, s, Timeout::Infinite).unwrap(), WaitOutcome::Blocked);
        assert_eq!(k.wait_for_object(b, s, Timeout::Infinite).unwrap(), WaitOutcome::Blocked);

        assert_eq!(k.count_sem_release(s, 1).unwrap(), 0);
        assert_eq!(k.get_task_stat(a).unwrap().state, TaskState::Ready);
        assert_eq!(k.get_task_stat(b).unwrap().state, TaskState::Blocked);

        assert_eq!(
            k.count_sem_release(s, 5).unwrap_err(),
            ErrorKind::CountOverflow
        );
    }

    #[cfg(all(feature = "stream", feature = "system-stat"))]
    #[test]
    fn stream_read_blocks_until_every_byte_transferred() {
        let k = new_kernel();
        let mode = ProtectionMode::INTERRUPT_LOCK | ProtectionMode::WAIT_IF_EMPTY | ProtectionMode::WAIT_IF_FULL;
        let s = k.create_stream(mode, 8, None).unwrap();
        let reader = k.create_task(noop_entry, core::ptr::null_mut(), 256, 5, 3, false).unwrap();
        let writer = k.create_task(noop_entry, core::ptr::null_mut(), 256, 5, 3, false).unwrap();

        let mut buf = [0u8; 4];
        let mut req = crate::io::IoRequest::new(Timeout::Ticks(5));
        assert_eq!(
            k.stream_read(reader, s, &mut buf, &mut req).unwrap(),
            WaitOutcome::Blocked
        );
        assert_eq!(req.transferred, 0);

        // First delivery moves 3 of the 4 requested bytes: the reader must
        // stay blocked and accumulate, not wake on the first byte.
        let mut write_req = crate::io::IoRequest::new(Timeout::NoBlock);
        assert_eq!(
            k.stream_write(writer, s, &[1, 2, 3], &mut write_req).unwrap(),
            WaitOutcome::Satisfied { index: 0 }
        );
        assert_eq!(req.transferred, 3);
        assert_eq!(k.get_task_stat(reader).unwrap().state, TaskState::Blocked);

        // Second delivery completes the transfer: the reader wakes with the
        // cumulative total, not just the final delivery's byte count.
        let mut write_req2 = crate::io::IoRequest::new(Timeout::NoBlock);
        assert_eq!(
            k.stream_write(writer, s, &[4], &mut write_req2).unwrap(),
            WaitOutcome::Satisfied { index: 0 }
        );
        assert_eq!(req.transferred, 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(k.get_task_stat(reader).unwrap().state, TaskState::Ready);
        assert_eq!(
            k.task_arc(reader).unwrap().wait_descriptor.borrow().as_ref().unwrap().status,
            ErrorKind::NoError
        );
    }

    #[cfg(all(feature = "stream", feature = "system-stat"))]
    #[test]
    fn stream_write_partial_transfer_times_out_with_cumulative_total() {
        let k = new_kernel();
        let mode = ProtectionMode::INTERRUPT_LOCK | ProtectionMode::WAIT_IF_EMPTY | ProtectionMode::WAIT_IF_FULL;
        let s = k.create_stream(mode, 4, None).unwrap();
        let writer = k.create_task(noop_entry, core::ptr::null_mut(), 256, 5, 3, false).unwrap();

        // The stream has 4 bytes of capacity; a 6-byte write fills it
        // immediately (4 transferred) and blocks for the remaining 2.
        let mut req = crate::io::IoRequest::new(Timeout::Ticks(3));
        assert_eq!(
            k.stream_write(writer, s, &[1, 2, 3, 4, 5, 6], &mut req).unwrap(),
            WaitOutcome::Blocked
        );
        assert_eq!(req.transferred, 4);
        assert_eq!(k.get_task_stat(writer).unwrap().state, TaskState::Blocked);

        // Nobody ever reads, so the wait runs out the clock: the reported
        // total stays at the partial amount and the status is TimedOut.
        assert!(!k.tick_handler());
        assert!(!k.tick_handler());
        assert!(k.tick_handler());
        assert_eq!(req.transferred, 4);
        assert_eq!(k.get_task_stat(writer).unwrap().state, TaskState::Ready);
        assert_eq!(
            k.task_arc(writer).unwrap().wait_descriptor.borrow().as_ref().unwrap().status,
            ErrorKind::TimedOut
        );
    }

    #[cfg(feature = "multi-wait")]
    #[test]
    fn all_of_wait_completes_only_once_every_ref_is_ready() {
        let k = new_kernel();
        let a = k.create_semaphore(false, None).unwrap();
        let b = k.create_semaphore(false, None).unwrap();
        let t = k.create_task(noop_entry, core::ptr::null_mut(), 256, 5, 3, false).unwrap();

        assert_eq!(
            k.wait_for_objects(t, alloc::vec![a, b], WaitPolicy::AllOf, Timeout::Infinite)
                .unwrap(),
            WaitOutcome::Blocked
        );
        k.semaphore_release(a).unwrap();
        assert_eq!(k.get_task_stat(t).unwrap().state, TaskState::Blocked);
        k.semaphore_release(b).unwrap();
        assert_eq!(k.get_task_stat(t).unwrap().state, TaskState::Ready);
    }
}
