#![allow(dead_code)]

use exos::{
    addressing::{PAGE_SIZE, Pa, Va},
    env::EnvId,
    memlayout::UTEXT,
    mm::PteFlags,
    syscall::UserMemory,
};
use machine::{EnvHandle, Machine, MachineConfig};
use ulib::{ForkResult, ProcessContext, fork::fork};

pub const URW: PteFlags = PteFlags::from_bits_truncate(
    PteFlags::P.bits() | PteFlags::RW.bits() | PteFlags::US.bits(),
);
pub const UR: PteFlags =
    PteFlags::from_bits_truncate(PteFlags::P.bits() | PteFlags::US.bits());

pub fn machine() -> Machine {
    Machine::new(MachineConfig::default().npages(256).nenv(16))
}

/// Spawns a process with `pages` writable data pages at [`UTEXT`], page `n`
/// filled with the byte `n + 1`.
pub fn spawn_with_data(machine: &Machine, pages: usize) -> (EnvId, ProcessContext) {
    let id = machine.spawn().unwrap();
    for n in 0..pages {
        machine
            .load(id, data(n), &[n as u8 + 1; PAGE_SIZE], URW)
            .unwrap();
    }
    (id, ProcessContext::new(id))
}

/// The `n`th data page.
pub fn data(n: usize) -> Va {
    Va::new(UTEXT + n * PAGE_SIZE).unwrap()
}

/// Lets `child` run until its `fork` returns, with a copy of the parent's
/// context.
pub fn resume<'m>(machine: &'m Machine, child: EnvId, parent: &ProcessContext) -> (EnvHandle<'m>, ProcessContext) {
    let env = machine.env(child).unwrap();
    let mut ctx = *parent;
    assert_eq!(fork(&env, &mut ctx), Ok(ForkResult::Child));
    assert_eq!(ctx.thisenv(), child);
    (env, ctx)
}

/// Forks `parent` and resumes the child.
pub fn fork_and_resume<'m>(
    machine: &'m Machine,
    parent: &EnvHandle<'m>,
    ctx: &mut ProcessContext,
) -> (EnvHandle<'m>, ProcessContext) {
    let child = match fork(parent, ctx).unwrap() {
        ForkResult::Parent { child } => child,
        ForkResult::Child => panic!("parent observed the child branch"),
    };
    resume(machine, child, ctx)
}

pub fn read_byte(env: &EnvHandle<'_>, va: Va) -> u8 {
    let mut buf = [0];
    env.read(va, &mut buf).unwrap();
    buf[0]
}

pub fn frame(machine: &Machine, id: EnvId, va: Va) -> Pa {
    machine.translate(id, va).unwrap().0
}

pub fn flags(machine: &Machine, id: EnvId, va: Va) -> PteFlags {
    machine.translate(id, va).unwrap().1
}
