mod common;

use common::*;
use exos::{
    KernelError,
    addressing::Va,
    env::{EnvId, EnvStatus},
    memlayout,
    mm::{Pde, Pte, PteFlags},
    syscall::{Syscall, SyscallNumber, Upcall, UserMemory, VirtualPageTable},
};
use machine::{EnvHandle, Machine, MachineConfig};
use std::cell::RefCell;
use ulib::{ForkError, ForkResult, ProcessContext, fork};

#[test]
fn fork() {
    let machine = machine();
    let (id, mut ctx) = spawn_with_data(&machine, 2);
    let parent = machine.env(id).unwrap();

    let ForkResult::Parent { child } = fork::fork(&parent, &mut ctx).unwrap() else {
        panic!("parent observed the child branch");
    };
    assert_eq!(ctx.thisenv(), id);
    assert_eq!(machine.status(child), EnvStatus::Runnable);
    assert_eq!(machine.parent(child), Some(id));

    let (env, ctx) = resume(&machine, child, &ctx);
    assert_eq!(ctx.thisenv(), env.getenvid());
    for n in 0..2 {
        assert_eq!(read_byte(&env, data(n)), n as u8 + 1);
        assert_eq!(read_byte(&parent, data(n)), n as u8 + 1);
    }
}

#[test]
fn child_mirrors_every_parent_page_but_the_exception_stack() {
    let machine = machine();
    let (id, mut ctx) = spawn_with_data(&machine, 3);
    let parent = machine.env(id).unwrap();
    let (child, _) = fork_and_resume(&machine, &parent, &mut ctx);

    let uxstack = memlayout::uxstack_page();
    let pages = |id| -> Vec<Va> {
        machine
            .mappings(id)
            .into_iter()
            .map(|(va, _)| va)
            .filter(|va| *va != uxstack)
            .collect()
    };
    assert_eq!(pages(id), pages(child.id()));
    for va in pages(id) {
        assert_eq!(frame(&machine, id, va), frame(&machine, child.id(), va));
    }
    assert_ne!(
        frame(&machine, id, uxstack),
        frame(&machine, child.id(), uxstack)
    );
}

#[test]
fn child_cannot_run_before_the_commit_point() {
    let machine = machine();
    let (id, _) = spawn_with_data(&machine, 1);
    let parent = machine.env(id).unwrap();
    // Stop right after exofork, as `fork` would before populating the child.
    let child = parent.exofork().unwrap();
    assert_eq!(machine.env(child).err(), Some(KernelError::BadEnv));
    assert!(machine.schedule().is_some_and(|env| env.id() == id));
}

#[test]
fn sfork_is_unsupported() {
    let machine = machine();
    let (id, mut ctx) = spawn_with_data(&machine, 1);
    let parent = machine.env(id).unwrap();
    let free = machine.free_pages();

    assert_eq!(fork::sfork(&parent, &mut ctx), Err(ForkError::Unsupported));
    assert_eq!(machine.free_pages(), free);
    let stats = machine.stats(id).unwrap();
    assert_eq!(stats.syscalls(SyscallNumber::Exofork), 0);
    assert_eq!(ctx, ProcessContext::new(id));
}

#[test]
fn exofork_failure_is_reported() {
    let machine = Machine::new(MachineConfig::default().npages(64).nenv(1));
    let (id, mut ctx) = spawn_with_data(&machine, 1);
    let parent = machine.env(id).unwrap();
    assert_eq!(
        fork::fork(&parent, &mut ctx),
        Err(ForkError::Exofork(KernelError::NoFreeEnv))
    );
}

#[test]
fn failed_fork_leaves_no_child_behind() {
    // Exactly enough frames to build everything but the child's page table
    // for the data page.
    let machine = Machine::new(MachineConfig::default().npages(10));
    let (id, mut ctx) = spawn_with_data(&machine, 1);
    let parent = machine.env(id).unwrap();

    assert_eq!(
        fork::fork(&parent, &mut ctx),
        Err(ForkError::Duppage {
            va: data(0),
            source: KernelError::NoMemory
        })
    );
    // The child's frames are back; the parent's new exception stack stays.
    assert_eq!(machine.free_pages(), 3);
    assert!(machine.schedule().is_some_and(|env| env.id() == id));
    assert!(machine.schedule().is_some_and(|env| env.id() == id));

    // The parent's mapping was never downgraded.
    assert!(flags(&machine, id, data(0)).contains(PteFlags::RW));
    parent.write(data(0), &[9]).unwrap();
    assert_eq!(machine.stats(id).unwrap().faults, 0);
    assert_eq!(ctx.thisenv(), id);
    assert_ne!(ctx.thisenv(), EnvId::SELF);
}

/// A system call issued through [`Recorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    PageAlloc { env: EnvId, va: Va },
    PageMap { dst: EnvId, va: Va },
    SetUpcall { env: EnvId },
    Other(SyscallNumber),
}

/// Forwards to an [`EnvHandle`], logging every system call in order.
struct Recorder<'m> {
    env: EnvHandle<'m>,
    calls: RefCell<Vec<Call>>,
}

impl<'m> Recorder<'m> {
    fn new(env: EnvHandle<'m>) -> Self {
        Self {
            env,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn log(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

impl Syscall for Recorder<'_> {
    fn getenvid(&self) -> EnvId {
        self.log(Call::Other(SyscallNumber::GetEnvId));
        self.env.getenvid()
    }

    fn exofork(&self) -> Result<EnvId, KernelError> {
        self.log(Call::Other(SyscallNumber::Exofork));
        self.env.exofork()
    }

    fn env_destroy(&self, envid: EnvId) -> Result<(), KernelError> {
        self.log(Call::Other(SyscallNumber::EnvDestroy));
        self.env.env_destroy(envid)
    }

    fn env_set_status(&self, envid: EnvId, status: EnvStatus) -> Result<(), KernelError> {
        self.log(Call::Other(SyscallNumber::EnvSetStatus));
        self.env.env_set_status(envid, status)
    }

    fn env_set_pgfault_upcall(&self, envid: EnvId, upcall: Upcall) -> Result<(), KernelError> {
        self.log(Call::SetUpcall { env: envid });
        self.env.env_set_pgfault_upcall(envid, upcall)
    }

    fn page_alloc(&self, envid: EnvId, va: Va, perm: PteFlags) -> Result<(), KernelError> {
        self.log(Call::PageAlloc { env: envid, va });
        self.env.page_alloc(envid, va, perm)
    }

    fn page_map(
        &self,
        srcenvid: EnvId,
        srcva: Va,
        dstenvid: EnvId,
        dstva: Va,
        perm: PteFlags,
    ) -> Result<(), KernelError> {
        self.log(Call::PageMap {
            dst: dstenvid,
            va: dstva,
        });
        self.env.page_map(srcenvid, srcva, dstenvid, dstva, perm)
    }

    fn page_unmap(&self, envid: EnvId, va: Va) -> Result<(), KernelError> {
        self.log(Call::Other(SyscallNumber::PageUnmap));
        self.env.page_unmap(envid, va)
    }
}

impl VirtualPageTable for Recorder<'_> {
    fn uvpd(&self, pdx: usize) -> Pde {
        self.env.uvpd(pdx)
    }

    fn uvpt(&self, pn: usize) -> Pte {
        self.env.uvpt(pn)
    }
}

impl UserMemory for Recorder<'_> {
    fn read(&self, va: Va, buf: &mut [u8]) -> Result<(), KernelError> {
        self.env.read(va, buf)
    }

    fn write(&self, va: Va, buf: &[u8]) -> Result<(), KernelError> {
        self.env.write(va, buf)
    }
}

#[test]
fn child_can_take_faults_before_its_first_mapping() {
    let machine = machine();
    let (id, mut ctx) = spawn_with_data(&machine, 2);
    machine.load(id, data(2), b"text", UR).unwrap();
    machine
        .load(id, data(3), b"shm", URW | PteFlags::SHARE)
        .unwrap();
    let parent = Recorder::new(machine.env(id).unwrap());

    let ForkResult::Parent { child } = fork::fork(&parent, &mut ctx).unwrap() else {
        panic!("parent observed the child branch");
    };
    let calls = parent.calls.into_inner();
    let position = |call: Call| calls.iter().position(|c| *c == call);

    let uxstack = memlayout::uxstack_page();
    let stack = position(Call::PageAlloc { env: child, va: uxstack }).unwrap();
    let upcall = position(Call::SetUpcall { env: child }).unwrap();
    let first_map = calls
        .iter()
        .position(|c| matches!(c, Call::PageMap { dst, .. } if *dst == child))
        .unwrap();
    assert!(stack < first_map);
    assert!(upcall < first_map);

    // Every page of the parent reached the child through a mapping, the
    // exception stack never did.
    for n in 0..4 {
        assert!(position(Call::PageMap { dst: child, va: data(n) }).is_some());
    }
    assert!(position(Call::PageMap { dst: child, va: uxstack }).is_none());
    assert_eq!(
        calls.last(),
        Some(&Call::Other(SyscallNumber::EnvSetStatus))
    );
}
