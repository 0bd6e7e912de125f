//! The environment table.
//!
//! Slots are recycled; every reuse bumps the slot's generation so that an
//! [`EnvId`] naming a destroyed environment never resolves to its successor.
use crate::pgdir::PageDirectory;
use alloc::vec::Vec;
use exos::{
    KernelError,
    addressing::Pa,
    env::{EnvId, EnvStatus, MAX_GENERATION},
    syscall::{SyscallNumber, Upcall},
};

/// Saved user registers relevant to the model.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Trapframe {
    pub eip: usize,
    pub esp: usize,
}

/// Per-environment counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvStats {
    /// Page faults delivered to the fault upcall.
    pub faults: usize,
    syscalls: [usize; SyscallNumber::COUNT],
}

impl EnvStats {
    /// How many times the environment invoked `nr`.
    pub fn syscalls(&self, nr: SyscallNumber) -> usize {
        self.syscalls[usize::from(nr)]
    }

    pub(crate) fn count(&mut self, nr: SyscallNumber) {
        self.syscalls[usize::from(nr)] += 1;
    }
}

pub(crate) struct Env {
    pub id: EnvId,
    /// [`EnvId::SELF`] for environments created by the machine itself.
    pub parent: EnvId,
    pub status: EnvStatus,
    /// Frame standing in for the page directory page.
    pub pgdir_pa: Pa,
    pub pgdir: PageDirectory,
    pub upcall: Option<Upcall>,
    pub tf: Trapframe,
    /// Set until a freshly exoforked child observes its own `exofork`
    /// return.
    pub exofork_pending: bool,
    /// Set while the fault upcall runs.
    pub in_upcall: bool,
    /// Set while the run queue holds an entry for this environment.
    pub queued: bool,
    pub stats: EnvStats,
}

#[derive(Default)]
struct Slot {
    generation: usize,
    env: Option<Env>,
}

pub(crate) struct EnvTable {
    slots: Vec<Slot>,
}

impl EnvTable {
    pub(crate) fn new(nenv: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(nenv, Slot::default);
        Self { slots }
    }

    /// Reserves a free slot and returns the identifier it will carry.
    pub(crate) fn reserve(&mut self) -> Result<(usize, EnvId), KernelError> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.env.is_none())
            .ok_or(KernelError::NoFreeEnv)?;
        slot.generation = slot.generation % MAX_GENERATION + 1;
        Ok((index, EnvId::from_parts(index, slot.generation)))
    }

    pub(crate) fn install(&mut self, index: usize, env: Env) {
        self.slots[index].env = Some(env);
    }

    pub(crate) fn get(&self, id: EnvId) -> Option<&Env> {
        self.slots
            .get(id.envx())?
            .env
            .as_ref()
            .filter(|env| env.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        self.slots
            .get_mut(id.envx())?
            .env
            .as_mut()
            .filter(|env| env.id == id)
    }

    pub(crate) fn remove(&mut self, id: EnvId) -> Option<Env> {
        let slot = self.slots.get_mut(id.envx())?;
        if slot.env.as_ref().is_some_and(|env| env.id == id) {
            slot.env.take()
        } else {
            None
        }
    }
}
