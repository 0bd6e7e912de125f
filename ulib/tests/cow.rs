mod common;

use common::*;
use exos::{
    addressing::PAGE_SIZE,
    env::EnvStatus,
    memlayout,
    mm::PteFlags,
    syscall::{Syscall, UserMemory},
};
use ulib::{DupOutcome, fork::duppage};

#[test]
fn cow() {
    let machine = machine();
    let (id, mut ctx) = spawn_with_data(&machine, 1);
    let parent = machine.env(id).unwrap();
    let (child, _) = fork_and_resume(&machine, &parent, &mut ctx);

    child.write(data(0), b"child").unwrap();
    parent.write(data(0) + 8, b"parent").unwrap();

    let mut buf = [0; 14];
    child.read(data(0), &mut buf).unwrap();
    assert_eq!(&buf, b"child\x01\x01\x01\x01\x01\x01\x01\x01\x01");
    parent.read(data(0), &mut buf).unwrap();
    assert_eq!(&buf, b"\x01\x01\x01\x01\x01\x01\x01\x01parent");

    assert_eq!(machine.stats(id).unwrap().faults, 1);
    assert_eq!(machine.stats(child.id()).unwrap().faults, 1);
}

#[test]
fn only_the_written_page_is_copied() {
    let machine = machine();
    let (id, mut ctx) = spawn_with_data(&machine, 4);
    let parent = machine.env(id).unwrap();
    let (child, _) = fork_and_resume(&machine, &parent, &mut ctx);
    let before = frame(&machine, id, data(2));

    child.write(data(2), &[0xff; PAGE_SIZE]).unwrap();

    for n in [0, 1, 3] {
        assert_eq!(frame(&machine, id, data(n)), frame(&machine, child.id(), data(n)));
        assert!(flags(&machine, child.id(), data(n)).contains(PteFlags::COW));
    }
    assert_eq!(frame(&machine, id, data(2)), before);
    assert_ne!(frame(&machine, child.id(), data(2)), before);
    assert_eq!(read_byte(&parent, data(2) + 100), 3);
    assert_eq!(read_byte(&child, data(2) + 100), 0xff);

    let private = flags(&machine, child.id(), data(2));
    assert!(private.contains(PteFlags::RW));
    assert!(!private.contains(PteFlags::COW));
    // The parent still sees the page as copy-on-write until it writes.
    assert!(flags(&machine, id, data(2)).contains(PteFlags::COW));
    assert_eq!(machine.frame_refcount(before), 1);
}

#[test]
fn cow_perm() {
    let machine = machine();
    let (id, mut ctx) = spawn_with_data(&machine, 3);
    machine.load(id, data(3), b"text", UR).unwrap();
    let parent = machine.env(id).unwrap();
    let (child, mut child_ctx) = fork_and_resume(&machine, &parent, &mut ctx);
    let (grandchild, _) = fork_and_resume(&machine, &child, &mut child_ctx);

    for env in [id, child.id(), grandchild.id()] {
        for (va, pte) in machine.mappings(env) {
            let bits = pte.flags();
            assert!(
                !(bits.contains(PteFlags::COW) && bits.contains(PteFlags::RW)),
                "{:?} maps {} writable and copy-on-write",
                env,
                va
            );
        }
        assert!(!flags(&machine, env, data(3)).intersects(PteFlags::RW | PteFlags::COW));
    }
}

#[test]
fn duppage_is_idempotent() {
    let machine = machine();
    let (id, _) = spawn_with_data(&machine, 1);
    let parent = machine.env(id).unwrap();
    let child = parent.exofork().unwrap();
    let pn = data(0).page_number();
    let pa = frame(&machine, id, data(0));

    assert_eq!(duppage(&parent, child, pn), Ok(DupOutcome::CopyOnWrite));
    let once = machine.translate(id, data(0));
    assert_eq!(duppage(&parent, child, pn), Ok(DupOutcome::CopyOnWrite));
    assert_eq!(machine.translate(id, data(0)), once);

    assert_eq!(frame(&machine, child, data(0)), pa);
    assert_eq!(machine.frame_refcount(pa), 2);
    let parent_flags = flags(&machine, id, data(0));
    assert!(parent_flags.contains(PteFlags::COW));
    assert!(!parent_flags.contains(PteFlags::RW));
    assert_eq!(read_byte(&parent, data(0)), 1);

    assert_eq!(
        duppage(&parent, child, data(1).page_number()),
        Ok(DupOutcome::Unmapped)
    );
    assert!(machine.translate(child, data(1)).is_none());
}

#[test]
fn duppage_keeps_read_only_pages_read_only() {
    let machine = machine();
    let id = machine.spawn().unwrap();
    machine.load(id, data(0), b"text", UR).unwrap();
    let parent = machine.env(id).unwrap();
    let child = parent.exofork().unwrap();

    assert_eq!(
        duppage(&parent, child, data(0).page_number()),
        Ok(DupOutcome::ReadOnly)
    );
    assert_eq!(flags(&machine, id, data(0)), UR);
    assert_eq!(flags(&machine, child, data(0)), UR);
}

#[test]
fn cow_cleanup_stress() {
    let machine = machine();
    let (id, mut ctx) = spawn_with_data(&machine, 2);
    let parent = machine.env(id).unwrap();
    let mut baseline = None;

    for round in 0..12u8 {
        let (child, _) = fork_and_resume(&machine, &parent, &mut ctx);
        child.write(data(0), &[round]).unwrap();
        parent.env_destroy(child.id()).unwrap();
        assert_eq!(machine.status(child.id()), EnvStatus::Free);
        parent.write(data(1), &[round]).unwrap();

        // Nothing is left behind in the temporary slot.
        assert!(machine.translate(id, memlayout::pftemp()).is_none());
        let free = machine.free_pages();
        assert_eq!(*baseline.get_or_insert(free), free);
    }
    assert_eq!(read_byte(&parent, data(0)), 1);
    assert_eq!(read_byte(&parent, data(1)), 11);
}
