//! Fault delivery to user space.
//!
//! When a user environment takes a page fault and has registered a fault
//! upcall, the kernel switches it onto its exception stack and invokes the
//! upcall with a [`UTrapframe`] describing the fault. Once the upcall
//! returns, the environment resumes at the faulting instruction and the
//! access is retried.

use crate::addressing::Va;

bitflags::bitflags! {
    /// Page fault error code, as pushed by the MMU.
    pub struct FaultErrorCode: u32 {
        /// The fault was caused by a protection violation on a present page.
        /// When clear, the page was not present.
        const PRESENT = 1 << 0;
        /// The faulting access was a write.
        const WRITE_ACCESS = 1 << 1;
        /// The fault occurred in user mode.
        const USER = 1 << 2;
    }
}

/// The fault context handed to a user fault upcall.
///
/// It is consumed exactly once, by the upcall that receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UTrapframe {
    /// The address whose access faulted.
    pub fault_va: Va,
    /// Why the access faulted.
    pub err: FaultErrorCode,
    /// Instruction pointer of the faulting instruction.
    pub eip: usize,
    /// Stack pointer at the time of the fault.
    pub esp: usize,
}

impl UTrapframe {
    /// Returns `true` if the fault was raised by a write.
    #[inline]
    pub fn is_write(&self) -> bool {
        self.err.contains(FaultErrorCode::WRITE_ACCESS)
    }
}
