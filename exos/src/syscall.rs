//! The system call boundary of the exos microkernel.
//!
//! The kernel exports a deliberately small set of primitives: it creates
//! blank environments, allocates and maps pages on request, registers fault
//! upcalls and flips run states. Everything else, `fork` included, is built
//! in user space on top of them.
//!
//! The boundary is split in three capabilities:
//! - [`Syscall`]: the system calls proper.
//! - [`VirtualPageTable`]: the read-only self map through which an
//!   environment inspects its own page directory and page tables. Reading it
//!   never faults and never requires a fault upcall.
//! - [`UserMemory`]: ordinary loads and stores by the environment, which may
//!   fault.
//!
//! [`UserEnv`] bundles the three; it is what a fault [`Upcall`] receives.
use crate::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    env::{EnvId, EnvStatus},
    mm::{Pde, Pte, PteFlags},
    trap::UTrapframe,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Represents system call numbers of the exos kernel.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum SyscallNumber {
    /// Returns the identifier of the caller.
    GetEnvId = 0,
    /// Destroys an environment.
    EnvDestroy = 1,
    /// Creates a blank, not-runnable child environment.
    Exofork = 2,
    /// Sets the run state of an environment.
    EnvSetStatus = 3,
    /// Registers the page fault upcall of an environment.
    EnvSetPgfaultUpcall = 4,
    /// Allocates a zeroed page and maps it.
    PageAlloc = 5,
    /// Maps a page of one environment into another.
    PageMap = 6,
    /// Removes a mapping.
    PageUnmap = 7,
}

impl SyscallNumber {
    /// Number of system calls.
    pub const COUNT: usize = 8;
}

/// The entry point a kernel invokes to deliver a page fault to user space.
pub type Upcall = fn(&dyn UserEnv, &UTrapframe);

/// System calls available to a user environment.
///
/// Any `envid` argument may be [`EnvId::SELF`] to name the caller. Targets
/// other than the caller must be its immediate children.
pub trait Syscall {
    /// Returns the identifier of the calling environment.
    fn getenvid(&self) -> EnvId;

    /// Creates a new environment with an empty user address space and a copy
    /// of the caller's registers, in the [`EnvStatus::NotRunnable`] state.
    ///
    /// The single call is observed twice: the parent receives the child's
    /// identifier, while the child, once it runs, observes [`EnvId::SELF`].
    ///
    /// # Errors
    /// - [`KernelError::NoFreeEnv`] if all environment slots are in use.
    /// - [`KernelError::NoMemory`] if the child's page directory cannot be
    ///   allocated.
    fn exofork(&self) -> Result<EnvId, KernelError>;

    /// Destroys `envid`, releasing every page it maps.
    fn env_destroy(&self, envid: EnvId) -> Result<(), KernelError>;

    /// Sets the run state of `envid`. Only [`EnvStatus::Runnable`] and
    /// [`EnvStatus::NotRunnable`] may be requested.
    fn env_set_status(&self, envid: EnvId, status: EnvStatus) -> Result<(), KernelError>;

    /// Registers `upcall` as the page fault entry point of `envid`.
    fn env_set_pgfault_upcall(&self, envid: EnvId, upcall: Upcall) -> Result<(), KernelError>;

    /// Allocates a zeroed page and maps it at `va` in `envid` with `perm`,
    /// replacing any page already mapped there.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if `va` is at or above `UTOP`, not
    ///   page-aligned, or `perm` lacks `US | P` or carries bits outside
    ///   [`PteFlags::SYSCALL`].
    /// - [`KernelError::NoMemory`] if no frame is available.
    fn page_alloc(&self, envid: EnvId, va: Va, perm: PteFlags) -> Result<(), KernelError>;

    /// Maps the page at `srcva` of `srcenvid` at `dstva` of `dstenvid` with
    /// `perm`, replacing any page already mapped there.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if either address is invalid,
    ///   nothing is mapped at `srcva`, `perm` is malformed, or `perm` grants
    ///   [`PteFlags::RW`] on a read-only source page.
    /// - [`KernelError::NoMemory`] if a page table cannot be allocated.
    fn page_map(
        &self,
        srcenvid: EnvId,
        srcva: Va,
        dstenvid: EnvId,
        dstva: Va,
        perm: PteFlags,
    ) -> Result<(), KernelError>;

    /// Removes the mapping at `va` of `envid`, if any.
    fn page_unmap(&self, envid: EnvId, va: Va) -> Result<(), KernelError>;
}

/// Read-only view of the caller's own page directory and page tables.
pub trait VirtualPageTable {
    /// Reads the page directory entry with index `pdx`.
    fn uvpd(&self, pdx: usize) -> Pde;

    /// Reads the page table entry for virtual page number `pn`.
    ///
    /// Only meaningful when the page directory entry covering `pn` is
    /// present; consult [`VirtualPageTable::uvpd`] first.
    fn uvpt(&self, pn: usize) -> Pte;
}

/// Loads and stores performed by the environment itself.
///
/// An access that the current mapping does not permit raises a page fault,
/// which is delivered to the environment's upcall before the access is
/// retried.
pub trait UserMemory {
    /// Reads `buf.len()` bytes starting at `va`.
    ///
    /// # Errors
    /// [`KernelError::Fault`] if the access faulted and the fault could not
    /// be resolved. The environment no longer exists at that point.
    fn read(&self, va: Va, buf: &mut [u8]) -> Result<(), KernelError>;

    /// Writes `buf` starting at `va`.
    ///
    /// # Errors
    /// [`KernelError::Fault`] if the access faulted and the fault could not
    /// be resolved. The environment no longer exists at that point.
    fn write(&self, va: Va, buf: &[u8]) -> Result<(), KernelError>;

    /// Copies `len` bytes from `src` to `dst`, one page-sized chunk at a
    /// time. The ranges may overlap; when `dst` lies inside the source range
    /// the chunks are copied from the end.
    fn memmove(&self, dst: Va, src: Va, len: usize) -> Result<(), KernelError> {
        let mut chunk = [0u8; PAGE_SIZE];
        let backward = dst > src && dst.into_usize() - src.into_usize() < len;
        let mut done = 0;
        while done < len {
            let n = core::cmp::min(PAGE_SIZE, len - done);
            let at = if backward { len - done - n } else { done };
            self.read(src + at, &mut chunk[..n])?;
            self.write(dst + at, &chunk[..n])?;
            done += n;
        }
        Ok(())
    }
}

/// Everything a running user environment can do.
pub trait UserEnv: Syscall + VirtualPageTable + UserMemory {}

impl<T: Syscall + VirtualPageTable + UserMemory + ?Sized> UserEnv for T {}
