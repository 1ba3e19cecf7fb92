//! The platform-port contract: everything the kernel needs from hardware
//! and nothing more.

/// Opaque interrupt-mask snapshot returned by [`PlatformPort::interrupt_lock`]
/// and consumed by [`PlatformPort::interrupt_restore`]. Never constructed by
/// the kernel itself, only threaded through save/restore pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptState(pub u32);

/// A task entry point: `fn(arg: *mut ())`.
pub type TaskEntry = extern "C" fn(*mut ());

/// Hardware-abstraction contract a platform binding must implement.
///
/// Every method here is a leaf call with no further dispatch inside the
/// kernel; `sirius-kernel` depends only on this trait, never on a concrete
/// architecture.
pub trait PlatformPort: Sync {
    /// One-time hardware bring-up (clocks, tick timer, interrupt
    /// controller). Called once from `Kernel::init`.
    fn hw_init(&self);

    /// Reverses `hw_init`. Called once from `Kernel::deinit`.
    fn hw_deinit(&self);

    /// Disables interrupts, returning the previous mask state.
    fn interrupt_lock(&self) -> InterruptState;

    /// Restores a previously saved mask state. Never sets interrupts
    /// unconditionally.
    fn interrupt_restore(&self, prev: InterruptState);

    /// Monotonic tick counter; wraps on overflow.
    fn tick_count(&self) -> u32;

    /// Builds the initial register frame for a new task's stack and returns
    /// the resulting stack pointer, ready for `context_switch`.
    ///
    /// # Safety
    /// `base` must point to a region of at least `size` bytes, valid for
    /// the lifetime of the task, and not aliased by any other task's stack.
    unsafe fn init_task_stack(
        &self,
        base: *mut u8,
        size: usize,
        entry: TaskEntry,
        arg: *mut (),
    ) -> *mut ();

    /// Switches execution from the outgoing task to `incoming_sp`, saving
    /// the outgoing task's stack pointer through `outgoing_sp_slot`.
    ///
    /// # Safety
    /// Both pointers must reference stacks built by `init_task_stack` (or
    /// previously saved by this same function) and must not be aliased by
    /// any other live task.
    unsafe fn context_switch(&self, outgoing_sp_slot: *mut *mut (), incoming_sp: *mut ());

    /// Enters the lowest-power wait state the platform supports, returning
    /// on the next interrupt. Called only from the idle task.
    fn cpu_idle(&self);
}
