//! User memory accesses and page fault delivery.
//!
//! A load or store is checked against the environment's page table one page
//! at a time. When the mapping does not permit the access, the machine
//! raises a page fault:
//!
//! 1. The environment must have registered an upcall, must have a present
//!    and writable exception stack page, and must not already be running its
//!    upcall. Otherwise the environment is destroyed.
//! 2. The upcall runs with a [`UTrapframe`] describing the fault. The machine
//!    lock is not held while it runs, so the upcall may issue system calls
//!    and memory accesses of its own.
//! 3. The faulting access is retried once. If it faults again the
//!    environment is destroyed.
//!
//! Once the environment is gone, the access reports [`KernelError::Fault`].
use crate::{EnvHandle, State};
use exos::{
    KernelError,
    addressing::{PAGE_SIZE, Pa, Va},
    env::EnvId,
    memlayout,
    mm::{Pde, Pte, PteFlags},
    syscall::{Upcall, UserMemory, VirtualPageTable},
    trap::{FaultErrorCode, UTrapframe},
};

impl State {
    /// Translates an access by `id`, or describes the fault it raises.
    ///
    /// # Errors
    /// [`KernelError::Fault`] if `id` no longer exists.
    fn check_access(&self, id: EnvId, va: Va, write: bool) -> Result<Result<Pa, UTrapframe>, KernelError> {
        let env = self.envs.get(id).ok_or(KernelError::Fault)?;
        let pte = if memlayout::is_user(va) {
            env.pgdir.walk(va.page_down())
        } else {
            Pte::EMPTY
        };
        let mut need = PteFlags::P | PteFlags::US;
        if write {
            need |= PteFlags::RW;
        }
        match pte.pa() {
            Some(pa) if pte.flags().contains(need) => Ok(Ok(pa)),
            _ => {
                let mut err = FaultErrorCode::USER;
                err.set(FaultErrorCode::PRESENT, pte.is_present());
                err.set(FaultErrorCode::WRITE_ACCESS, write);
                Ok(Err(UTrapframe {
                    fault_va: va,
                    err,
                    eip: env.tf.eip,
                    esp: env.tf.esp,
                }))
            }
        }
    }

    /// Prepares to run the upcall of `id` for `utf`, or returns `None` if the
    /// fault cannot be delivered.
    fn begin_upcall(&mut self, id: EnvId, utf: &UTrapframe) -> Option<Upcall> {
        let env = self.envs.get_mut(id)?;
        let stack = env.pgdir.walk(memlayout::uxstack_page());
        let stack_ok = stack
            .flags()
            .contains(PteFlags::P | PteFlags::RW | PteFlags::US);
        if env.in_upcall {
            log::error!("[{:08x}] page fault in the page fault upcall at {}", id, utf.fault_va);
            return None;
        }
        let Some(upcall) = env.upcall else {
            log::error!(
                "[{:08x}] user fault va {:08x} ip {:08x} with no upcall",
                id,
                utf.fault_va,
                utf.eip
            );
            return None;
        };
        if !stack_ok {
            log::error!("[{:08x}] no exception stack for fault at {}", id, utf.fault_va);
            return None;
        }
        env.in_upcall = true;
        env.stats.faults += 1;
        Some(upcall)
    }

    fn end_upcall(&mut self, id: EnvId) {
        if let Some(env) = self.envs.get_mut(id) {
            env.in_upcall = false;
        }
    }
}

impl EnvHandle<'_> {
    /// Performs one access that stays within a single page, running `f` over
    /// the backing frame.
    fn access<R>(
        &self,
        va: Va,
        write: bool,
        f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R,
    ) -> Result<R, KernelError> {
        let mut f = Some(f);
        let mut retried = false;
        loop {
            let mut state = self.machine.state.lock();
            let utf = match state.check_access(self.id, va, write) {
                Err(e) => {
                    state.unlock();
                    return Err(e);
                }
                Ok(Ok(pa)) => {
                    let result = match (state.mem.bytes_mut(pa), f.take()) {
                        (Some(page), Some(f)) => Ok(f(page)),
                        _ => Err(KernelError::Unspecified),
                    };
                    state.unlock();
                    return result;
                }
                Ok(Err(utf)) => utf,
            };
            let upcall = if retried {
                log::error!("[{:08x}] unresolved fault at {}", self.id, utf.fault_va);
                None
            } else {
                state.begin_upcall(self.id, &utf)
            };
            let Some(upcall) = upcall else {
                state.env_free(self.id);
                state.unlock();
                return Err(KernelError::Fault);
            };
            state.unlock();

            upcall(self, &utf);

            let mut state = self.machine.state.lock();
            state.end_upcall(self.id);
            state.unlock();
            retried = true;
        }
    }
}

impl VirtualPageTable for EnvHandle<'_> {
    fn uvpd(&self, pdx: usize) -> Pde {
        let state = self.machine.state.lock();
        let pde = state
            .envs
            .get(self.id)
            .map(|env| env.pgdir.pde(pdx))
            .unwrap_or(Pde::EMPTY);
        state.unlock();
        pde
    }

    fn uvpt(&self, pn: usize) -> Pte {
        let state = self.machine.state.lock();
        let pte = state
            .envs
            .get(self.id)
            .map(|env| env.pgdir.walk(Va::from_page_number(pn)))
            .unwrap_or(Pte::EMPTY);
        state.unlock();
        pte
    }
}

impl UserMemory for EnvHandle<'_> {
    fn read(&self, va: Va, buf: &mut [u8]) -> Result<(), KernelError> {
        let mut done = 0;
        while done < buf.len() {
            let cur = va + done;
            let n = core::cmp::min(PAGE_SIZE - cur.offset(), buf.len() - done);
            let dst = &mut buf[done..done + n];
            self.access(cur, false, |page| {
                dst.copy_from_slice(&page[cur.offset()..cur.offset() + n])
            })?;
            done += n;
        }
        Ok(())
    }

    fn write(&self, va: Va, buf: &[u8]) -> Result<(), KernelError> {
        let mut done = 0;
        while done < buf.len() {
            let cur = va + done;
            let n = core::cmp::min(PAGE_SIZE - cur.offset(), buf.len() - done);
            let src = &buf[done..done + n];
            self.access(cur, true, |page| {
                page[cur.offset()..cur.offset() + n].copy_from_slice(src)
            })?;
            done += n;
        }
        Ok(())
    }
}
