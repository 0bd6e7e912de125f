//! `fork` with copy-on-write, built from exokernel primitives.
//!
//! The kernel only knows how to create a blank environment ([`exofork`]) and
//! how to map pages. `fork` builds the rest in user space:
//!
//! 1. Install the fault resolver for the caller.
//! 2. `exofork` a child. It is not runnable and its address space is empty.
//! 3. In the child, `exofork` returns [`EnvId::SELF`]. The child re-points its
//!    [`ProcessContext`] at itself and returns; the parent already built the
//!    rest of its state.
//! 4. In the parent, allocate the child's exception stack and register the
//!    child's upcall before any shared page exists. Then walk every page
//!    below [`UTOP`], except the exception stack, through [`duppage`].
//! 5. Mark the child runnable. This is the commit point: before it, the
//!    child never runs.
//!
//! [`duppage`] decides per page:
//!
//! | Page                          | Child gets          | Parent            |
//! |-------------------------------|---------------------|-------------------|
//! | [`PteFlags::SHARE`] set       | same permissions    | untouched         |
//! | read-only, not copy-on-write  | same permissions    | untouched         |
//! | writable or copy-on-write     | `COW`, not writable | remapped `COW`    |
//!
//! The parent's own mapping must drop to copy-on-write as well, or a store
//! by the parent would land in the frame the child still sees.
//!
//! [`exofork`]: exos::syscall::Syscall::exofork
//! [`UTOP`]: exos::memlayout::UTOP
use crate::{
    env::ProcessContext,
    pgfault,
    vpt::{self, PageState},
};
use exos::{
    KernelError,
    addressing::{NPTENTRIES, PAGE_SHIFT, Va},
    env::{EnvId, EnvStatus},
    memlayout::{self, UTOP},
    mm::PteFlags,
    syscall::{Syscall, UserEnv, VirtualPageTable},
};

/// What [`duppage`] did with a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupOutcome {
    /// Nothing is mapped at the page; nothing was done.
    Unmapped,
    /// Mapped into the child with the caller's permissions.
    Shared,
    /// Mapped read-only into the child.
    ReadOnly,
    /// Mapped copy-on-write into both child and caller.
    CopyOnWrite,
}

/// The two outcomes of a successful [`fork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkResult {
    /// Returned in the parent.
    Parent {
        /// The new, runnable child.
        child: EnvId,
    },
    /// Returned in the child.
    Child,
}

/// Errors of [`fork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ForkError {
    /// The page fault upcall could not be installed.
    #[error("cannot install the page fault upcall: {0}")]
    Upcall(#[source] KernelError),
    /// No child could be created.
    #[error("exofork failed: {0}")]
    Exofork(#[source] KernelError),
    /// The child's exception stack could not be allocated.
    #[error("cannot allocate the child's exception stack: {0}")]
    ExceptionStack(#[source] KernelError),
    /// A page could not be duplicated.
    #[error("duppage at {va} failed: {source}")]
    Duppage {
        /// The page being duplicated.
        va: Va,
        /// Why the mapping failed.
        source: KernelError,
    },
    /// The child could not be made runnable.
    #[error("cannot mark the child runnable: {0}")]
    SetStatus(#[source] KernelError),
    /// The operation is not supported.
    #[error("not supported")]
    Unsupported,
}

/// Maps page `pn` of the caller into `child`.
///
/// Calling it twice for the same page is harmless: after the first call a
/// writable page is already copy-on-write in the caller, and the second call
/// maps it copy-on-write again.
///
/// # Errors
/// Any [`KernelError`] of the underlying `page_map`. The caller's mapping is
/// only changed after the child's mapping succeeded.
pub fn duppage(
    env: &(impl Syscall + VirtualPageTable + ?Sized),
    child: EnvId,
    pn: usize,
) -> Result<DupOutcome, KernelError> {
    let va = Va::from_page_number(pn);
    match PageState::classify(vpt::get_pte(env, va)) {
        PageState::Absent => Ok(DupOutcome::Unmapped),
        PageState::Shared(flags) => {
            env.page_map(EnvId::SELF, va, child, va, flags & PteFlags::SYSCALL)?;
            Ok(DupOutcome::Shared)
        }
        PageState::ReadOnly(flags) => {
            env.page_map(EnvId::SELF, va, child, va, flags & PteFlags::SYSCALL)?;
            Ok(DupOutcome::ReadOnly)
        }
        PageState::CowOrWritable(flags) => {
            let perm = (flags & PteFlags::SYSCALL & !PteFlags::RW) | PteFlags::COW;
            env.page_map(EnvId::SELF, va, child, va, perm)?;
            env.page_map(EnvId::SELF, va, EnvId::SELF, va, perm)?;
            Ok(DupOutcome::CopyOnWrite)
        }
    }
}

/// Duplicates the calling environment.
///
/// Returns [`ForkResult::Parent`] with the new child in the parent, and
/// [`ForkResult::Child`] in the child, whose `ctx` then names the child.
///
/// # Errors
/// Every failure is reported to the parent. A child that was already created
/// is destroyed first, so no partially built child survives.
pub fn fork(env: &(impl UserEnv + ?Sized), ctx: &mut ProcessContext) -> Result<ForkResult, ForkError> {
    pgfault::set_pgfault_handler(env).map_err(ForkError::Upcall)?;

    let child = env.exofork().map_err(ForkError::Exofork)?;
    if child.is_self() {
        ctx.fixup(env);
        return Ok(ForkResult::Child);
    }

    if let Err(e) = populate(env, child) {
        log::error!("[{:08x}] fork: {}", ctx.thisenv(), e);
        if let Err(destroy) = env.env_destroy(child) {
            log::warn!("[{:08x}] cannot destroy {:08x}: {}", ctx.thisenv(), child, destroy);
        }
        return Err(e);
    }
    Ok(ForkResult::Parent { child })
}

/// Builds `child` from the caller's address space and makes it runnable.
fn populate(env: &(impl UserEnv + ?Sized), child: EnvId) -> Result<(), ForkError> {
    let perm = PteFlags::P | PteFlags::RW | PteFlags::US;
    env.page_alloc(child, memlayout::uxstack_page(), perm)
        .map_err(ForkError::ExceptionStack)?;
    env.env_set_pgfault_upcall(child, pgfault::pgfault_upcall)
        .map_err(ForkError::Upcall)?;

    let uxstack = memlayout::uxstack_page().page_number();
    let (mut cow, mut shared, mut readonly) = (0, 0, 0);
    let mut pn = 0;
    while pn < UTOP >> PAGE_SHIFT {
        if !env.uvpd(Va::from_page_number(pn).pdx()).is_present() {
            // Skip the whole page table.
            pn = (pn / NPTENTRIES + 1) * NPTENTRIES;
            continue;
        }
        if pn != uxstack {
            let outcome = duppage(env, child, pn).map_err(|source| ForkError::Duppage {
                va: Va::from_page_number(pn),
                source,
            })?;
            match outcome {
                DupOutcome::CopyOnWrite => cow += 1,
                DupOutcome::Shared => shared += 1,
                DupOutcome::ReadOnly => readonly += 1,
                DupOutcome::Unmapped => (),
            }
        }
        pn += 1;
    }
    log::debug!(
        "fork {:08x}: {} copy-on-write, {} shared, {} read-only",
        child,
        cow,
        shared,
        readonly
    );

    env.env_set_status(child, EnvStatus::Runnable)
        .map_err(ForkError::SetStatus)
}

/// Shared-memory `fork`. Not supported.
pub fn sfork(_env: &(impl UserEnv + ?Sized), _ctx: &mut ProcessContext) -> Result<ForkResult, ForkError> {
    Err(ForkError::Unsupported)
}
