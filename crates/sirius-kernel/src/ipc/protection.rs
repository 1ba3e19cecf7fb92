//! Per-IPC-object protection mode: which critical-section discipline
//! serializes access, and which operations are allowed to block.

use bitflags::bitflags;
use sirius_error::ErrorKind;

bitflags! {
    /// Selected once at object-creation time; constrains which operations
    /// may block and whether they take the mutex/event path versus the
    /// interrupt-lock fast path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtectionMode: u8 {
        /// Serialize access by disabling interrupts (shortest critical
        /// section, usable from ISR-visible producers).
        const INTERRUPT_LOCK = 0b0000_0001;
        /// Serialize access through an internal auto-reset event, allowing
        /// long critical sections outside the interrupt-masked region.
        const AUTO_RESET_EVENT = 0b0000_0010;
        /// Serialize access through an internal mutex, same rationale as
        /// `AUTO_RESET_EVENT`.
        const MUTEX = 0b0000_0100;
        /// Reads block when the object has nothing to deliver.
        const WAIT_IF_EMPTY = 0b0000_1000;
        /// Writes block when the object has no room.
        const WAIT_IF_FULL = 0b0001_0000;
        /// Supports zero-copy lease-based direct read/write.
        const DIRECT_RW = 0b0010_0000;
    }
}

impl ProtectionMode {
    const DISCIPLINES: ProtectionMode = ProtectionMode::INTERRUPT_LOCK
        .union(ProtectionMode::AUTO_RESET_EVENT)
        .union(ProtectionMode::MUTEX);

    /// Validates the common invariants shared by every IPC object: exactly
    /// one serialization discipline, and direct R/W only ever requested
    /// alongside both blocking modes (its zero-copy lease protocol has no
    /// well-defined behavior for a caller that must not block).
    pub fn validate_common(self) -> Result<(), ErrorKind> {
        let disciplines = self & Self::DISCIPLINES;
        if disciplines.bits().count_ones() != 1 {
            return Err(ErrorKind::InvalidParameter);
        }
        if self.contains(Self::DIRECT_RW)
            && !(self.contains(Self::WAIT_IF_EMPTY) && self.contains(Self::WAIT_IF_FULL))
        {
            return Err(ErrorKind::InvalidParameter);
        }
        Ok(())
    }

    /// Pointer queues never support the direct R/W lease protocol (there is
    /// no backing byte-addressable buffer to lease a pointer into).
    pub fn validate_for_ptr_queue(self) -> Result<(), ErrorKind> {
        self.validate_common()?;
        if self.contains(Self::DIRECT_RW) {
            return Err(ErrorKind::InvalidParameter);
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_discipline_required() {
        assert!(ProtectionMode::INTERRUPT_LOCK.validate_common().is_ok());
        assert_eq!(
            ProtectionMode::empty().validate_common().unwrap_err(),
            ErrorKind::InvalidParameter
        );
        assert_eq!(
            (ProtectionMode::INTERRUPT_LOCK | ProtectionMode::MUTEX)
                .validate_common()
                .unwrap_err(),
            ErrorKind::InvalidParameter
        );
    }

    #[test]
    fn direct_rw_requires_both_blocking_modes() {
        let mode = ProtectionMode::MUTEX | ProtectionMode::DIRECT_RW;
        assert_eq!(mode.validate_common().unwrap_err(), ErrorKind::InvalidParameter);
        let mode = mode | ProtectionMode::WAIT_IF_EMPTY | ProtectionMode::WAIT_IF_FULL;
        assert!(mode.validate_common().is_ok());
    }

    #[test]
    fn ptr_queue_rejects_direct_rw_even_if_otherwise_valid() {
        let mode = ProtectionMode::MUTEX
            | ProtectionMode::DIRECT_RW
            | ProtectionMode::WAIT_IF_EMPTY
            | ProtectionMode::WAIT_IF_FULL;
        assert!(mode.validate_common().is_ok());
        assert_eq!(
            mode.validate_for_ptr_queue().unwrap_err(),
            ErrorKind::InvalidParameter
        );
    }
}
