//! # machine: a host-resident model of the exos microkernel.
//!
//! The exokernel's job is small: hand out physical pages, keep per
//! environment page tables, create blank environments and deliver faults.
//! [`Machine`] does exactly that on an ordinary host, so that user-level
//! libraries written against the [`exos::syscall`] traits can run unchanged
//! in tests.
//!
//! A running environment is represented by an [`EnvHandle`]. Everything the
//! environment does goes through the handle: system calls ([`Syscall`]),
//! reads of its own page tables ([`VirtualPageTable`]) and loads and stores
//! ([`UserMemory`]). A store that hits a read-only page raises a page fault
//! that is delivered to the environment's registered upcall on the same
//! thread, after which the store is retried, just as the hardware would
//! resume the faulting instruction.
//!
//! The machine only hands out handles for runnable environments. A child
//! created with `exofork` therefore cannot execute until its parent marks it
//! runnable.
//!
//! [`Syscall`]: exos::syscall::Syscall
//! [`VirtualPageTable`]: exos::syscall::VirtualPageTable
//! [`UserMemory`]: exos::syscall::UserMemory
#![cfg_attr(not(test), no_std)]
#![deny(rustdoc::broken_intra_doc_links)]

extern crate alloc;

mod config;
mod env;
mod pgdir;
mod pmem;
mod sync;
mod syscall;
mod trap;

pub use config::MachineConfig;
pub use env::EnvStats;

use crate::{
    env::{Env, EnvTable, Trapframe},
    pgdir::PageDirectory,
    pmem::PhysMem,
    sync::SpinLock,
};
use alloc::vec::Vec;
use crossbeam_queue::SegQueue;
use exos::{
    KernelError,
    addressing::{PAGE_SIZE, Pa, Va},
    env::{EnvId, EnvStatus},
    memlayout::{self, USTACKTOP, UTEXT},
    mm::{Pte, PteFlags},
};

/// Kernel state guarded by the machine lock.
pub(crate) struct State {
    mem: PhysMem,
    envs: EnvTable,
}

impl State {
    /// Creates an environment with an empty address space.
    fn env_alloc(&mut self, parent: EnvId, tf: Trapframe) -> Result<EnvId, KernelError> {
        let (index, id) = self.envs.reserve()?;
        let pgdir_pa = self.mem.alloc()?;
        self.mem.incref(pgdir_pa);
        self.envs.install(
            index,
            Env {
                id,
                parent,
                status: EnvStatus::NotRunnable,
                pgdir_pa,
                pgdir: PageDirectory::default(),
                upcall: None,
                tf,
                exofork_pending: false,
                in_upcall: false,
                queued: false,
                stats: Default::default(),
            },
        );
        Ok(id)
    }

    /// Tears down `id`, releasing its address space.
    fn env_free(&mut self, id: EnvId) {
        if let Some(mut env) = self.envs.remove(id) {
            env.pgdir.clear(&mut self.mem);
            self.mem.decref(env.pgdir_pa);
            log::debug!("[{:08x}] free env {:08x}", env.parent, id);
        }
    }

    /// Maps a fresh zeroed frame at `va` of `id`.
    fn map_fresh(&mut self, id: EnvId, va: Va, perm: PteFlags) -> Result<Pa, KernelError> {
        let pa = self.mem.alloc()?;
        let env = self.envs.get_mut(id).ok_or(KernelError::BadEnv)?;
        if let Err(e) = env.pgdir.insert(&mut self.mem, va, pa, perm) {
            // Never referenced; return it to the pool.
            self.mem.decref(pa);
            return Err(e);
        }
        Ok(pa)
    }

    fn spawn(&mut self) -> Result<EnvId, KernelError> {
        let tf = Trapframe {
            eip: UTEXT,
            esp: USTACKTOP,
        };
        let id = self.env_alloc(EnvId::SELF, tf)?;
        let perm = PteFlags::P | PteFlags::RW | PteFlags::US;
        if let Err(e) = self.map_fresh(id, memlayout::ustack_page(), perm) {
            self.env_free(id);
            return Err(e);
        }
        if let Some(env) = self.envs.get_mut(id) {
            env.status = EnvStatus::Runnable;
            env.queued = true;
        }
        Ok(id)
    }

    /// Whether the run-queue entry popped for `id` still names a runnable
    /// environment. A stale entry clears the mark so a later wake-up queues
    /// the environment again.
    fn still_queued(&mut self, id: EnvId) -> bool {
        match self.envs.get_mut(id) {
            Some(env) if matches!(env.status, EnvStatus::Runnable | EnvStatus::Running) => true,
            Some(env) => {
                env.queued = false;
                false
            }
            None => false,
        }
    }

    fn load(&mut self, id: EnvId, va: Va, bytes: &[u8], perm: PteFlags) -> Result<(), KernelError> {
        let mut done = 0;
        while done < bytes.len() {
            let cur = va + done;
            if !memlayout::is_user(cur) {
                return Err(KernelError::InvalidArgument);
            }
            let env = self.envs.get(id).ok_or(KernelError::BadEnv)?;
            let pa = match env.pgdir.walk(cur.page_down()).pa() {
                Some(pa) => pa,
                None => self.map_fresh(id, cur.page_down(), perm)?,
            };
            let n = core::cmp::min(PAGE_SIZE - cur.offset(), bytes.len() - done);
            let page = self.mem.bytes_mut(pa).ok_or(KernelError::Unspecified)?;
            page[cur.offset()..cur.offset() + n].copy_from_slice(&bytes[done..done + n]);
            done += n;
        }
        Ok(())
    }
}

/// A uniprocessor exokernel.
pub struct Machine {
    config: MachineConfig,
    state: SpinLock<State>,
    runq: SegQueue<EnvId>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}

impl Machine {
    /// Boots a machine sized by `config`.
    pub fn new(config: MachineConfig) -> Self {
        let mem = PhysMem::new(config.npages);
        log::debug!(
            "machine: {} page frames, {} env slots",
            mem.npages(),
            config.nenv
        );
        Self {
            config,
            state: SpinLock::new(State {
                mem,
                envs: EnvTable::new(config.nenv),
            }),
            runq: SegQueue::new(),
        }
    }

    /// The configuration this machine was booted with.
    pub fn config(&self) -> MachineConfig {
        self.config
    }

    /// Creates a runnable environment with a one-page user stack just below
    /// [`USTACKTOP`], about to execute at [`UTEXT`].
    pub fn spawn(&self) -> Result<EnvId, KernelError> {
        let mut state = self.state.lock();
        let result = state.spawn();
        state.unlock();
        let id = result?;
        self.runq.push(id);
        log::debug!("[00000000] new env {:08x}", id);
        Ok(id)
    }

    /// Places `bytes` at `va` in `env`, mapping zeroed pages with `perm` where
    /// nothing is mapped yet.
    ///
    /// This is the program loader: it acts with kernel privilege, so existing
    /// read-only pages are written as well.
    pub fn load(&self, env: EnvId, va: Va, bytes: &[u8], perm: PteFlags) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        let result = state.load(env, va, bytes, perm | PteFlags::P);
        state.unlock();
        result
    }

    /// Returns an execution handle for `id`.
    ///
    /// # Errors
    /// [`KernelError::BadEnv`] unless `id` names a runnable environment.
    pub fn env(&self, id: EnvId) -> Result<EnvHandle<'_>, KernelError> {
        match self.status(id) {
            EnvStatus::Runnable | EnvStatus::Running => Ok(EnvHandle { machine: self, id }),
            _ => Err(KernelError::BadEnv),
        }
    }

    /// Picks the next runnable environment in round-robin order.
    pub fn schedule(&self) -> Option<EnvHandle<'_>> {
        for _ in 0..self.runq.len() {
            let id = self.runq.pop()?;
            let mut state = self.state.lock();
            let live = state.still_queued(id);
            state.unlock();
            if live {
                self.runq.push(id);
                return Some(EnvHandle { machine: self, id });
            }
        }
        None
    }

    /// The run state of `id`; [`EnvStatus::Free`] if it does not exist.
    pub fn status(&self, id: EnvId) -> EnvStatus {
        let state = self.state.lock();
        let status = state
            .envs
            .get(id)
            .map(|env| env.status)
            .unwrap_or(EnvStatus::Free);
        state.unlock();
        status
    }

    /// The parent of `id`, if it exists and was created by `exofork`.
    pub fn parent(&self, id: EnvId) -> Option<EnvId> {
        let state = self.state.lock();
        let parent = state
            .envs
            .get(id)
            .map(|env| env.parent)
            .filter(|parent| !parent.is_self());
        state.unlock();
        parent
    }

    /// Counters of `id`.
    pub fn stats(&self, id: EnvId) -> Option<EnvStats> {
        let state = self.state.lock();
        let stats = state.envs.get(id).map(|env| env.stats);
        state.unlock();
        stats
    }

    /// Translates `va` in the address space of `id`.
    pub fn translate(&self, id: EnvId, va: Va) -> Option<(Pa, PteFlags)> {
        let state = self.state.lock();
        let pte = state.envs.get(id).map(|env| env.pgdir.walk(va.page_down()));
        state.unlock();
        let pte = pte?;
        Some((pte.pa()? + va.offset(), pte.flags()))
    }

    /// Every mapping of `id`, in address order.
    pub fn mappings(&self, id: EnvId) -> Vec<(Va, Pte)> {
        let state = self.state.lock();
        let mappings = state
            .envs
            .get(id)
            .map(|env| env.pgdir.mappings())
            .unwrap_or_default();
        state.unlock();
        mappings
    }

    /// How many page table entries reference the frame holding `pa`.
    pub fn frame_refcount(&self, pa: Pa) -> usize {
        let state = self.state.lock();
        let count = state.mem.refcount(pa.page_down());
        state.unlock();
        count
    }

    /// Number of unallocated page frames.
    pub fn free_pages(&self) -> usize {
        let state = self.state.lock();
        let free = state.mem.free_pages();
        state.unlock();
        free
    }
}

/// The execution context of one environment on a [`Machine`].
///
/// A handle stays valid after its environment is destroyed; every operation
/// through it then fails.
#[derive(Clone, Copy)]
pub struct EnvHandle<'m> {
    machine: &'m Machine,
    id: EnvId,
}

impl<'m> EnvHandle<'m> {
    /// The environment this handle executes.
    pub fn id(&self) -> EnvId {
        self.id
    }

    /// The machine the environment runs on.
    pub fn machine(&self) -> &'m Machine {
        self.machine
    }
}

impl core::fmt::Debug for EnvHandle<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("EnvHandle").field(&self.id).finish()
    }
}
