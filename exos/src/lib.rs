//! # exos: the user/kernel ABI of the exos microkernel.
//!
//! exos follows the exokernel tradition: the kernel multiplexes physical
//! pages and CPUs between environments, and leaves policy to libraries that
//! run in user space. This crate holds the vocabulary both sides agree on:
//!
//! - [`addressing`]: virtual and physical addresses of the 32-bit,
//!   two-level paged address space.
//! - [`memlayout`]: the fixed user memory layout, including the exception
//!   stack and the temporary mapping slot.
//! - [`mm`]: page directory and page table entries and their bits, including
//!   the software-defined copy-on-write and share bits.
//! - [`env`]: environment identifiers and run states.
//! - [`trap`]: the fault context delivered to user fault upcalls.
//! - [`syscall`]: the system call boundary, the read-only page table self
//!   map, and user memory access.
//!
//! Failures crossing the boundary are reported as [`KernelError`].
#![cfg_attr(not(test), no_std)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod addressing;
pub mod env;
pub mod memlayout;
pub mod mm;
pub mod syscall;
pub mod trap;

/// Errors returned by the exos kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// Unspecified or unknown problem.
    #[error("unspecified error")]
    Unspecified,
    /// Environment doesn't exist or otherwise cannot be used in the
    /// requested action.
    #[error("bad environment")]
    BadEnv,
    /// Invalid parameter.
    #[error("invalid parameter")]
    InvalidArgument,
    /// Request failed due to memory shortage.
    #[error("out of memory")]
    NoMemory,
    /// Attempt to create a new environment beyond the maximum allowed.
    #[error("out of environments")]
    NoFreeEnv,
    /// Memory fault.
    #[error("segmentation fault")]
    Fault,
}

impl KernelError {
    /// Converts the [`KernelError`] into the negative code returned by a
    /// system call.
    pub fn into_isize(self) -> isize {
        match self {
            KernelError::Unspecified => -1,
            KernelError::BadEnv => -2,
            KernelError::InvalidArgument => -3,
            KernelError::NoMemory => -4,
            KernelError::NoFreeEnv => -5,
            KernelError::Fault => -6,
        }
    }
}

/// The given `isize` does not indicate a [`KernelError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError {
    e: isize,
}

impl TryFrom<isize> for KernelError {
    type Error = TryFromError;

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Unspecified),
            -2 => Ok(Self::BadEnv),
            -3 => Ok(Self::InvalidArgument),
            -4 => Ok(Self::NoMemory),
            -5 => Ok(Self::NoFreeEnv),
            -6 => Ok(Self::Fault),
            e => Err(TryFromError { e }),
        }
    }
}
