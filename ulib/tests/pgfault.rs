mod common;

use common::*;
use exos::{
    KernelError,
    env::{EnvId, EnvStatus},
    memlayout,
    mm::PteFlags,
    syscall::{Syscall, SyscallNumber, UserMemory},
    trap::{FaultErrorCode, UTrapframe},
};
use machine::{Machine, MachineConfig};
use ulib::pgfault::{self, FaultError};

fn write_fault(va: exos::addressing::Va) -> UTrapframe {
    UTrapframe {
        fault_va: va,
        err: FaultErrorCode::USER | FaultErrorCode::WRITE_ACCESS | FaultErrorCode::PRESENT,
        eip: memlayout::UTEXT,
        esp: memlayout::UXSTACKTOP,
    }
}

#[test]
fn set_pgfault_handler_is_idempotent() {
    let machine = machine();
    let id = machine.spawn().unwrap();
    let env = machine.env(id).unwrap();
    let uxstack = memlayout::uxstack_page();

    pgfault::set_pgfault_handler(&env).unwrap();
    let first = frame(&machine, id, uxstack);
    pgfault::set_pgfault_handler(&env).unwrap();
    assert_eq!(frame(&machine, id, uxstack), first);
    assert_eq!(flags(&machine, id, uxstack), URW);

    let stats = machine.stats(id).unwrap();
    assert_eq!(stats.syscalls(SyscallNumber::PageAlloc), 1);
    assert_eq!(stats.syscalls(SyscallNumber::EnvSetPgfaultUpcall), 2);
}

#[test]
fn resolves_a_copy_on_write_fault() {
    let machine = machine();
    let (id, _) = spawn_with_data(&machine, 1);
    let env = machine.env(id).unwrap();
    env.page_map(EnvId::SELF, data(0), EnvId::SELF, data(0), UR | PteFlags::COW)
        .unwrap();
    let shared = frame(&machine, id, data(0));

    pgfault::resolve(&env, &write_fault(data(0) + 12)).unwrap();
    let private = frame(&machine, id, data(0));
    assert_ne!(private, shared);
    assert_eq!(flags(&machine, id, data(0)), URW);
    assert_eq!(read_byte(&env, data(0) + 4095), 1);
    assert!(machine.translate(id, memlayout::pftemp()).is_none());
}

#[test]
fn only_writes_to_copy_on_write_pages_are_resolved() {
    let machine = machine();
    let (id, _) = spawn_with_data(&machine, 1);
    machine.load(id, data(1), b"text", UR).unwrap();
    let env = machine.env(id).unwrap();

    // A write to a plain read-only page.
    let utf = write_fault(data(1) + 2);
    assert_eq!(
        pgfault::resolve(&env, &utf),
        Err(FaultError::NotCopyOnWrite {
            va: data(1) + 2,
            eip: memlayout::UTEXT,
            err: utf.err,
            flags: UR,
        })
    );

    // A read of a copy-on-write page.
    env.page_map(EnvId::SELF, data(0), EnvId::SELF, data(0), UR | PteFlags::COW)
        .unwrap();
    let read = UTrapframe {
        err: FaultErrorCode::USER | FaultErrorCode::PRESENT,
        ..write_fault(data(0))
    };
    assert!(matches!(
        pgfault::resolve(&env, &read),
        Err(FaultError::NotCopyOnWrite { .. })
    ));

    // A write to nothing at all.
    assert!(matches!(
        pgfault::resolve(&env, &write_fault(data(5))),
        Err(FaultError::NotCopyOnWrite { flags, .. }) if flags.is_empty()
    ));
    assert!(machine.translate(id, memlayout::pftemp()).is_none());
    assert_eq!(machine.stats(id).unwrap().syscalls(SyscallNumber::PageAlloc), 0);
}

#[test]
fn genuine_faults_kill_the_process() {
    let machine = machine();
    let (id, mut ctx) = spawn_with_data(&machine, 1);
    let env = machine.env(id).unwrap();
    ulib::fork::fork(&env, &mut ctx).unwrap();

    let mut buf = [0; 1];
    assert_eq!(env.read(data(7), &mut buf), Err(KernelError::Fault));
    assert_eq!(machine.status(id), EnvStatus::Free);
}

#[test]
fn running_out_of_memory_while_resolving_is_reported() {
    let machine = Machine::new(MachineConfig::default().npages(16));
    let (id, _) = spawn_with_data(&machine, 1);
    let env = machine.env(id).unwrap();
    env.page_map(EnvId::SELF, data(0), EnvId::SELF, data(0), UR | PteFlags::COW)
        .unwrap();
    let mut n = 1;
    while env.page_alloc(EnvId::SELF, data(n), URW).is_ok() {
        n += 1;
    }

    assert_eq!(
        pgfault::resolve(&env, &write_fault(data(0))),
        Err(FaultError::PageAlloc(KernelError::NoMemory))
    );
    assert!(machine.translate(id, memlayout::pftemp()).is_none());
    // The page keeps its copy-on-write mapping.
    assert_eq!(flags(&machine, id, data(0)), UR | PteFlags::COW);

    // Through the upcall, the same failure is fatal.
    pgfault::set_pgfault_handler(&env).unwrap_err();
    env.env_set_pgfault_upcall(EnvId::SELF, pgfault::pgfault_upcall)
        .unwrap();
    env.page_unmap(EnvId::SELF, data(1)).unwrap();
    env.page_alloc(EnvId::SELF, memlayout::uxstack_page(), URW)
        .unwrap();
    assert_eq!(env.write(data(0), &[0]), Err(KernelError::Fault));
    assert_eq!(machine.status(id), EnvStatus::Free);
}
