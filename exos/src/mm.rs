//! Entries of the two-level page table and their permission bits.
//!
//! The kernel exposes every environment's own page directory and page tables
//! read-only through the [`VirtualPageTable`] self map, so user code can
//! decode the same [`Pde`]/[`Pte`] words the MMU walks. Two of the bits
//! marked available-to-software carry meaning for user libraries:
//!
//! - [`PteFlags::COW`]: the page is shared copy-on-write. It is never set
//!   together with [`PteFlags::RW`].
//! - [`PteFlags::SHARE`]: the page is deliberately shared; `fork` maps it
//!   into the child with the very same permissions.
//!
//! [`VirtualPageTable`]: crate::syscall::VirtualPageTable
use crate::addressing::{PAGE_MASK, Pa};

bitflags::bitflags! {
    /// Flags for pte.
    pub struct PteFlags: usize {
        /// Present; must be 1 to map a 4-KByte page.
        const P = 1 << 0;
        /// Read/write; if 0, writes may not be allowed to the page.
        const RW = 1 << 1;
        /// User/supervisor; if 0, user-mode accesses are not allowed.
        const US = 1 << 2;
        /// Page-level write-through.
        const PWT = 1 << 3;
        /// Page-level cache disable.
        const PCD = 1 << 4;
        /// Accessed; set by the MMU on any access.
        const A = 1 << 5;
        /// Dirty; set by the MMU on a write.
        const D = 1 << 6;
        /// Page size; must be 0 in a page table entry.
        const PS = 1 << 7;
        /// Global translation.
        const G = 1 << 8;
        /// Bits 9..11, available to software.
        const AVAIL = 0xe00;
        /// The page is shared verbatim across `fork`.
        const SHARE = 1 << 10;
        /// The page is shared copy-on-write.
        const COW = 1 << 11;
        /// Bits a user environment may pass to mapping system calls.
        const SYSCALL = Self::AVAIL.bits | Self::P.bits | Self::RW.bits | Self::US.bits;
    }
}

bitflags::bitflags! {
    /// Flags for pde.
    pub struct PdeFlags: usize {
        /// Present; must be 1 to reference a page table.
        const P = 1 << 0;
        /// Read/write; if 0, writes may not be allowed to the 4-MByte region.
        const RW = 1 << 1;
        /// User/supervisor; if 0, user-mode accesses are not allowed to the 4-MByte region.
        const US = 1 << 2;
        /// Accessed.
        const A = 1 << 5;
    }
}

/// Page Table Entry (PTE).
///
/// A raw entry of the last-level table: a page-aligned physical address in
/// the upper 20 bits and [`PteFlags`] in the lower 12.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Pte(pub usize);

impl core::fmt::Debug for Pte {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(pa) = self.pa() {
            write!(f, "Pte({:08x}, {:?})", pa.into_usize(), self.flags())
        } else {
            write!(f, ".")
        }
    }
}

impl Pte {
    /// An entry that maps nothing.
    pub const EMPTY: Self = Self(0);

    /// Builds an entry mapping `pa` with `flags`.
    #[inline]
    pub const fn new(pa: Pa, flags: PteFlags) -> Self {
        Self((pa.into_usize() & !PAGE_MASK) | flags.bits())
    }

    /// Get the physical address pointed to by this entry.
    ///
    /// # Returns
    /// - `Some(Pa)` if the page is present, containing the physical address.
    /// - `None` if the page is not present (i.e., the "P" flag is not set).
    #[inline]
    pub const fn pa(&self) -> Option<Pa> {
        if self.flags().contains(PteFlags::P) {
            Pa::new(self.0 & !PAGE_MASK)
        } else {
            None
        }
    }

    /// Get the flags associated with this page table entry.
    #[inline]
    pub const fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & PAGE_MASK)
    }

    /// Returns `true` if the entry maps a page.
    #[inline]
    pub const fn is_present(&self) -> bool {
        self.flags().contains(PteFlags::P)
    }
}

/// Page Directory Entry (PDE).
///
/// A raw entry of the page directory, referencing one page table that covers
/// [`PTSIZE`] bytes of address space.
///
/// [`PTSIZE`]: crate::addressing::PTSIZE
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Pde(pub usize);

impl core::fmt::Debug for Pde {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(pa) = self.pa() {
            write!(f, "Pde({:08x}, {:?})", pa.into_usize(), self.flags())
        } else {
            write!(f, ".")
        }
    }
}

impl Pde {
    /// An entry that references no page table.
    pub const EMPTY: Self = Self(0);

    /// Builds an entry referencing the page table at `pa`.
    #[inline]
    pub const fn new(pa: Pa, flags: PdeFlags) -> Self {
        Self((pa.into_usize() & !PAGE_MASK) | flags.bits())
    }

    /// Get the physical address of the page table, if present.
    #[inline]
    pub const fn pa(&self) -> Option<Pa> {
        if self.flags().contains(PdeFlags::P) {
            Pa::new(self.0 & !PAGE_MASK)
        } else {
            None
        }
    }

    /// Get the flags associated with this entry.
    #[inline]
    pub const fn flags(&self) -> PdeFlags {
        PdeFlags::from_bits_truncate(self.0 & PAGE_MASK)
    }

    /// Returns `true` if the entry references a page table.
    #[inline]
    pub const fn is_present(&self) -> bool {
        self.flags().contains(PdeFlags::P)
    }
}
