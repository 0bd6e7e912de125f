//! Fault Resolver.
//!
//! After `fork`, parent and child share every writable page copy-on-write:
//! both map the same frame with [`PteFlags::COW`] set and [`PteFlags::RW`]
//! clear. The first store to such a page faults, and the kernel delivers the
//! fault to [`pgfault_upcall`] on the exception stack. The resolver then
//! gives the writer a private copy:
//!
//! 1. Check that the fault is a write to a copy-on-write page. Anything else
//!    is a genuine access violation and kills the process.
//! 2. Allocate a fresh page at the temporary slot [`PFTEMP`].
//! 3. Copy the faulting page into it.
//! 4. Map the fresh page over the faulting address, writable and no longer
//!    copy-on-write.
//! 5. Unmap [`PFTEMP`].
//!
//! The copy has to go through a second address: the old contents must be
//! read before the mapping at the faulting address is replaced.
//!
//! Any failure is fatal for the process. The upcall reports it and destroys
//! the environment; the faulting access is never retried.
//!
//! [`PFTEMP`]: exos::memlayout::PFTEMP
use crate::vpt;
use exos::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    env::EnvId,
    memlayout,
    mm::PteFlags,
    syscall::{Syscall, UserEnv},
    trap::{FaultErrorCode, UTrapframe},
};

/// Permissions of the private copy, and of the temporary slot.
const PTE_PRIVATE: PteFlags = PteFlags::from_bits_truncate(
    PteFlags::P.bits() | PteFlags::RW.bits() | PteFlags::US.bits(),
);

/// Why a page fault could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FaultError {
    /// The fault is not a write to a copy-on-write page.
    #[error("user fault va {va:08x} ip {eip:08x} (err {err:?}, pte {flags:?})")]
    NotCopyOnWrite {
        /// The faulting address.
        va: Va,
        /// The faulting instruction.
        eip: usize,
        /// Hardware error code of the fault.
        err: FaultErrorCode,
        /// Permissions of the page at the time of the fault.
        flags: PteFlags,
    },
    /// The temporary page could not be allocated.
    #[error("page_alloc at PFTEMP failed: {0}")]
    PageAlloc(#[source] KernelError),
    /// The faulting page could not be copied.
    #[error("copy to PFTEMP failed: {0}")]
    Copy(#[source] KernelError),
    /// The private copy could not be mapped over the faulting page.
    #[error("page_map over the faulting page failed: {0}")]
    PageMap(#[source] KernelError),
}

/// The temporary mapping slot, mapped for the lifetime of the guard.
struct TempSlot<'a, E: Syscall + ?Sized> {
    env: &'a E,
}

impl<'a, E: Syscall + ?Sized> TempSlot<'a, E> {
    fn map(env: &'a E) -> Result<Self, KernelError> {
        env.page_alloc(EnvId::SELF, memlayout::pftemp(), PTE_PRIVATE)?;
        Ok(Self { env })
    }

    fn va(&self) -> Va {
        memlayout::pftemp()
    }
}

impl<E: Syscall + ?Sized> Drop for TempSlot<'_, E> {
    fn drop(&mut self) {
        if let Err(e) = self.env.page_unmap(EnvId::SELF, self.va()) {
            log::warn!("cannot unmap PFTEMP: {}", e);
        }
    }
}

/// Resolves a copy-on-write fault described by `utf`.
pub fn resolve(env: &(impl UserEnv + ?Sized), utf: &UTrapframe) -> Result<(), FaultError> {
    let va = utf.fault_va.page_down();
    let pte = vpt::get_pte(env, va);
    if !utf.is_write() || !pte.is_present() || !pte.flags().contains(PteFlags::COW) {
        return Err(FaultError::NotCopyOnWrite {
            va: utf.fault_va,
            eip: utf.eip,
            err: utf.err,
            flags: pte.flags(),
        });
    }

    let slot = TempSlot::map(env).map_err(FaultError::PageAlloc)?;
    env.memmove(slot.va(), va, PAGE_SIZE)
        .map_err(FaultError::Copy)?;
    env.page_map(EnvId::SELF, slot.va(), EnvId::SELF, va, PTE_PRIVATE)
        .map_err(FaultError::PageMap)?;
    Ok(())
}

/// The page fault entry point registered with the kernel.
///
/// Kills the calling environment if the fault cannot be resolved.
pub fn pgfault_upcall(env: &dyn UserEnv, utf: &UTrapframe) {
    if let Err(e) = resolve(env, utf) {
        let id = env.getenvid();
        log::error!("[{:08x}] {}", id, e);
        if let Err(e) = env.env_destroy(EnvId::SELF) {
            log::error!("[{:08x}] cannot exit: {}", id, e);
        }
    }
}

/// Installs [`pgfault_upcall`] as the caller's page fault upcall.
///
/// The first call also allocates the exception stack the kernel runs the
/// upcall on. Calling it again only re-registers the upcall.
pub fn set_pgfault_handler(env: &(impl UserEnv + ?Sized)) -> Result<(), KernelError> {
    let uxstack = memlayout::uxstack_page();
    if !vpt::get_pte(env, uxstack).is_present() {
        env.page_alloc(EnvId::SELF, uxstack, PTE_PRIVATE)?;
    }
    env.env_set_pgfault_upcall(EnvId::SELF, pgfault_upcall)
}
