//! Page-Table View.
//!
//! Reads the caller's own page tables through the kernel's read-only self
//! map ([`VirtualPageTable`]). Nothing here can fault, so it is safe to use
//! both inside the fault upcall and before the upcall is registered.
//!
//! The bit-level encoding stays in this module; the rest of the library works
//! on [`PageState`].
use exos::{
    addressing::Va,
    mm::{Pte, PteFlags},
    syscall::VirtualPageTable,
};

/// Reads the page table entry mapping `va`.
///
/// Returns [`Pte::EMPTY`] when the page directory entry covering `va` is
/// absent, instead of reading a page table that does not exist.
pub fn get_pte(env: &(impl VirtualPageTable + ?Sized), va: Va) -> Pte {
    if env.uvpd(va.pdx()).is_present() {
        env.uvpt(va.page_number())
    } else {
        Pte::EMPTY
    }
}

/// How a page must be treated when the address space is duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Nothing is mapped.
    Absent,
    /// Deliberately shared: [`PteFlags::SHARE`] is set. Carries the current
    /// permissions.
    Shared(PteFlags),
    /// Neither writable nor copy-on-write.
    ReadOnly(PteFlags),
    /// Writable, or already copy-on-write.
    CowOrWritable(PteFlags),
}

impl PageState {
    /// Classifies `pte`. The first matching rule wins: absent, shared,
    /// read-only, then copy-on-write or writable.
    pub fn classify(pte: Pte) -> Self {
        let flags = pte.flags();
        if !pte.is_present() {
            PageState::Absent
        } else if flags.contains(PteFlags::SHARE) {
            PageState::Shared(flags)
        } else if !flags.intersects(PteFlags::RW | PteFlags::COW) {
            PageState::ReadOnly(flags)
        } else {
            PageState::CowOrWritable(flags)
        }
    }

    /// The permission bits of the mapping; empty for [`PageState::Absent`].
    pub fn flags(&self) -> PteFlags {
        match *self {
            PageState::Absent => PteFlags::empty(),
            PageState::Shared(flags) | PageState::ReadOnly(flags) | PageState::CowOrWritable(flags) => {
                flags
            }
        }
    }
}

/// The state of the page holding `va`, or `None` if nothing is mapped there.
pub fn query(env: &(impl VirtualPageTable + ?Sized), va: Va) -> Option<PageState> {
    match PageState::classify(get_pte(env, va.page_down())) {
        PageState::Absent => None,
        state => Some(state),
    }
}
