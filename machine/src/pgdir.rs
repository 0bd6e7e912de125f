//! Two-level page directories.
//!
//! Each environment owns one [`PageDirectory`]. A page table is created the
//! first time a page is inserted into its 4-MByte span; the page table itself
//! occupies a physical frame, exactly as it would on hardware, so page tables
//! count against physical memory.
use crate::pmem::PhysMem;
use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};
use exos::{
    KernelError,
    addressing::{NPTENTRIES, Pa, Va},
    mm::{Pde, PdeFlags, Pte, PteFlags},
};

struct PageTable {
    pa: Pa,
    entries: Box<[Pte; NPTENTRIES]>,
}

#[derive(Default)]
pub(crate) struct PageDirectory {
    tables: BTreeMap<usize, PageTable>,
}

impl PageDirectory {
    pub(crate) fn pde(&self, pdx: usize) -> Pde {
        self.tables
            .get(&pdx)
            .map(|pt| Pde::new(pt.pa, PdeFlags::P | PdeFlags::RW | PdeFlags::US))
            .unwrap_or(Pde::EMPTY)
    }

    /// Reads the entry for `va`; an empty entry when no page table covers it.
    pub(crate) fn walk(&self, va: Va) -> Pte {
        self.tables
            .get(&va.pdx())
            .map(|pt| pt.entries[va.ptx()])
            .unwrap_or(Pte::EMPTY)
    }

    /// Maps `pa` at `va` with `perm`.
    ///
    /// The new reference is taken before the old one is dropped, so
    /// re-inserting the page already mapped at `va` (to change its
    /// permissions) never frees it.
    pub(crate) fn insert(
        &mut self,
        mem: &mut PhysMem,
        va: Va,
        pa: Pa,
        perm: PteFlags,
    ) -> Result<(), KernelError> {
        if !self.tables.contains_key(&va.pdx()) {
            let pt_pa = mem.alloc()?;
            mem.incref(pt_pa);
            self.tables.insert(
                va.pdx(),
                PageTable {
                    pa: pt_pa,
                    entries: Box::new([Pte::EMPTY; NPTENTRIES]),
                },
            );
        }
        let pt = self
            .tables
            .get_mut(&va.pdx())
            .ok_or(KernelError::Unspecified)?;
        mem.incref(pa);
        let old = core::mem::replace(&mut pt.entries[va.ptx()], Pte::new(pa, perm | PteFlags::P));
        if let Some(old) = old.pa() {
            mem.decref(old);
        }
        Ok(())
    }

    /// Removes the mapping at `va`, returning whether one existed.
    pub(crate) fn remove(&mut self, mem: &mut PhysMem, va: Va) -> bool {
        let Some(pt) = self.tables.get_mut(&va.pdx()) else {
            return false;
        };
        let old = core::mem::replace(&mut pt.entries[va.ptx()], Pte::EMPTY);
        match old.pa() {
            Some(pa) => {
                mem.decref(pa);
                true
            }
            None => false,
        }
    }

    /// Unmaps everything and frees every page table.
    pub(crate) fn clear(&mut self, mem: &mut PhysMem) {
        for (_, pt) in core::mem::take(&mut self.tables) {
            for pa in pt.entries.iter().filter_map(Pte::pa) {
                mem.decref(pa);
            }
            mem.decref(pt.pa);
        }
    }

    /// Every present mapping, in address order.
    pub(crate) fn mappings(&self) -> Vec<(Va, Pte)> {
        self.tables
            .iter()
            .flat_map(|(pdx, pt)| {
                pt.entries
                    .iter()
                    .enumerate()
                    .filter(|(_, pte)| pte.is_present())
                    .map(move |(ptx, pte)| (Va::from_page_number((pdx << 10) | ptx), *pte))
            })
            .collect()
    }
}
