//! System call implementations.
//!
//! Each call takes the machine lock, runs to completion against [`State`]
//! and releases the lock before returning. Argument checking follows the
//! exokernel rules:
//!
//! - Addresses must be page-aligned and below [`UTOP`].
//! - Permissions must include `US | P` and stay within
//!   [`PteFlags::SYSCALL`].
//! - An environment may only manipulate itself or its immediate children.
//!
//! [`UTOP`]: exos::memlayout::UTOP
use crate::{EnvHandle, State};
use exos::{
    KernelError,
    addressing::Va,
    env::{EnvId, EnvStatus},
    memlayout,
    mm::PteFlags,
    syscall::{Syscall, SyscallNumber, Upcall},
};

fn check_va(va: Va) -> Result<(), KernelError> {
    if memlayout::is_user(va) && va.is_page_aligned() {
        Ok(())
    } else {
        Err(KernelError::InvalidArgument)
    }
}

fn check_perm(perm: PteFlags) -> Result<(), KernelError> {
    if perm.contains(PteFlags::US | PteFlags::P) && PteFlags::SYSCALL.contains(perm) {
        Ok(())
    } else {
        Err(KernelError::InvalidArgument)
    }
}

impl State {
    /// Resolves `target` on behalf of `caller`.
    ///
    /// [`EnvId::SELF`] names the caller. With `checkperm`, the target must be
    /// the caller or one of its immediate children.
    fn envid2env(&self, caller: EnvId, target: EnvId, checkperm: bool) -> Result<EnvId, KernelError> {
        if target.is_self() {
            return self.envs.get(caller).map(|_| caller).ok_or(KernelError::BadEnv);
        }
        let env = self.envs.get(target).ok_or(KernelError::BadEnv)?;
        if checkperm && env.id != caller && env.parent != caller {
            return Err(KernelError::BadEnv);
        }
        Ok(env.id)
    }

    fn count(&mut self, caller: EnvId, nr: SyscallNumber) {
        if let Some(env) = self.envs.get_mut(caller) {
            env.stats.count(nr);
        }
    }

    fn sys_exofork(&mut self, caller: EnvId) -> Result<EnvId, KernelError> {
        let parent = self.envs.get_mut(caller).ok_or(KernelError::BadEnv)?;
        if parent.exofork_pending {
            // The child resumes from the parent's exofork.
            parent.exofork_pending = false;
            return Ok(EnvId::SELF);
        }
        let tf = parent.tf;
        let child = self.env_alloc(caller, tf)?;
        if let Some(env) = self.envs.get_mut(child) {
            env.exofork_pending = true;
        }
        Ok(child)
    }

    fn sys_env_destroy(&mut self, caller: EnvId, envid: EnvId) -> Result<(), KernelError> {
        let id = self.envid2env(caller, envid, true)?;
        if id == caller {
            log::debug!("[{:08x}] exiting gracefully", id);
        } else {
            log::debug!("[{:08x}] destroying {:08x}", caller, id);
        }
        self.env_free(id);
        Ok(())
    }

    /// Returns the environment if it just became runnable.
    fn sys_env_set_status(
        &mut self,
        caller: EnvId,
        envid: EnvId,
        status: EnvStatus,
    ) -> Result<Option<EnvId>, KernelError> {
        if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
            return Err(KernelError::InvalidArgument);
        }
        let id = self.envid2env(caller, envid, true)?;
        let env = self.envs.get_mut(id).ok_or(KernelError::BadEnv)?;
        let enqueue = status == EnvStatus::Runnable && !env.queued;
        env.status = status;
        env.queued |= enqueue;
        Ok(enqueue.then_some(id))
    }

    fn sys_env_set_pgfault_upcall(
        &mut self,
        caller: EnvId,
        envid: EnvId,
        upcall: Upcall,
    ) -> Result<(), KernelError> {
        let id = self.envid2env(caller, envid, true)?;
        let env = self.envs.get_mut(id).ok_or(KernelError::BadEnv)?;
        env.upcall = Some(upcall);
        Ok(())
    }

    fn sys_page_alloc(
        &mut self,
        caller: EnvId,
        envid: EnvId,
        va: Va,
        perm: PteFlags,
    ) -> Result<(), KernelError> {
        check_va(va)?;
        check_perm(perm)?;
        let id = self.envid2env(caller, envid, true)?;
        self.map_fresh(id, va, perm).map(|_| ())
    }

    fn sys_page_map(
        &mut self,
        caller: EnvId,
        (srcenvid, srcva): (EnvId, Va),
        (dstenvid, dstva): (EnvId, Va),
        perm: PteFlags,
    ) -> Result<(), KernelError> {
        check_va(srcva)?;
        check_va(dstva)?;
        let src = self.envid2env(caller, srcenvid, true)?;
        let dst = self.envid2env(caller, dstenvid, true)?;
        let pte = self
            .envs
            .get(src)
            .ok_or(KernelError::BadEnv)?
            .pgdir
            .walk(srcva);
        let pa = pte.pa().ok_or(KernelError::InvalidArgument)?;
        check_perm(perm)?;
        if perm.contains(PteFlags::RW) && !pte.flags().contains(PteFlags::RW) {
            return Err(KernelError::InvalidArgument);
        }
        let env = self.envs.get_mut(dst).ok_or(KernelError::BadEnv)?;
        env.pgdir.insert(&mut self.mem, dstva, pa, perm)
    }

    fn sys_page_unmap(&mut self, caller: EnvId, envid: EnvId, va: Va) -> Result<(), KernelError> {
        check_va(va)?;
        let id = self.envid2env(caller, envid, true)?;
        let env = self.envs.get_mut(id).ok_or(KernelError::BadEnv)?;
        env.pgdir.remove(&mut self.mem, va);
        Ok(())
    }
}

impl EnvHandle<'_> {
    /// Runs one system call under the machine lock.
    fn syscall<R>(
        &self,
        nr: SyscallNumber,
        f: impl FnOnce(&mut State, EnvId) -> Result<R, KernelError>,
    ) -> Result<R, KernelError> {
        let mut state = self.machine.state.lock();
        state.count(self.id, nr);
        let result = f(&mut *state, self.id);
        state.unlock();
        if let Err(e) = &result {
            log::trace!("[{:08x}] {:?} -> {}", self.id, nr, e.into_isize());
        } else {
            log::trace!("[{:08x}] {:?} -> ok", self.id, nr);
        }
        result
    }
}

impl Syscall for EnvHandle<'_> {
    fn getenvid(&self) -> EnvId {
        let mut state = self.machine.state.lock();
        state.count(self.id, SyscallNumber::GetEnvId);
        state.unlock();
        self.id
    }

    fn exofork(&self) -> Result<EnvId, KernelError> {
        self.syscall(SyscallNumber::Exofork, |state, caller| {
            state.sys_exofork(caller)
        })
    }

    fn env_destroy(&self, envid: EnvId) -> Result<(), KernelError> {
        self.syscall(SyscallNumber::EnvDestroy, |state, caller| {
            state.sys_env_destroy(caller, envid)
        })
    }

    fn env_set_status(&self, envid: EnvId, status: EnvStatus) -> Result<(), KernelError> {
        let woke = self.syscall(SyscallNumber::EnvSetStatus, |state, caller| {
            state.sys_env_set_status(caller, envid, status)
        })?;
        if let Some(id) = woke {
            self.machine.runq.push(id);
        }
        Ok(())
    }

    fn env_set_pgfault_upcall(&self, envid: EnvId, upcall: Upcall) -> Result<(), KernelError> {
        self.syscall(SyscallNumber::EnvSetPgfaultUpcall, |state, caller| {
            state.sys_env_set_pgfault_upcall(caller, envid, upcall)
        })
    }

    fn page_alloc(&self, envid: EnvId, va: Va, perm: PteFlags) -> Result<(), KernelError> {
        self.syscall(SyscallNumber::PageAlloc, |state, caller| {
            state.sys_page_alloc(caller, envid, va, perm)
        })
    }

    fn page_map(
        &self,
        srcenvid: EnvId,
        srcva: Va,
        dstenvid: EnvId,
        dstva: Va,
        perm: PteFlags,
    ) -> Result<(), KernelError> {
        self.syscall(SyscallNumber::PageMap, |state, caller| {
            state.sys_page_map(caller, (srcenvid, srcva), (dstenvid, dstva), perm)
        })
    }

    fn page_unmap(&self, envid: EnvId, va: Va) -> Result<(), KernelError> {
        self.syscall(SyscallNumber::PageUnmap, |state, caller| {
            state.sys_page_unmap(caller, envid, va)
        })
    }
}
