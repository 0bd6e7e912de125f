//! Physical and Virtual Memory Addressing.
//!
//! User environments in exos run in a 32-bit address space translated by a
//! two-level page table: a page directory of [`NPDENTRIES`] entries, each
//! referencing a page table of [`NPTENTRIES`] entries, each mapping one
//! [`PAGE_SIZE`]-byte page.
//!
//! ```text
//! 31                  22 21                  12 11                   0
//! +---------------------+---------------------+---------------------+
//! |  Page Directory Idx |   Page Table Index  |  Offset within Page |
//! +---------------------+---------------------+---------------------+
//!  \------ pdx(va) ----/ \------ ptx(va) ----/
//!  \-------------- page_number(va) ---------/
//! ```
//!
//! The module defines two address types: [`Va`] for virtual addresses and
//! [`Pa`] for physical addresses. Both support the usual address arithmetic
//! (addition, subtraction, bitwise operations) so that page walks read like
//! the arithmetic they perform.
//!
//! ## Example Usage:
//!
//! ```
//! use exos::addressing::{Va, PAGE_SIZE};
//!
//! let va = Va::new(0x0080_1234).unwrap();
//! assert_eq!(va.page_down().into_usize(), 0x0080_1000);
//! assert_eq!(va.page_number(), 0x801);
//! assert_eq!((va.page_down() + PAGE_SIZE).page_number(), 0x802);
//! ```

/// The size of a single page in memory, in bytes.
pub const PAGE_SIZE: usize = 0x1000;

/// The shift amount to get the page number from a given address.
pub const PAGE_SHIFT: usize = 12;

/// A mask for extracting the offset within a page from a given address.
pub const PAGE_MASK: usize = 0xfff;

/// Number of entries in a page table.
pub const NPTENTRIES: usize = 1024;

/// Number of entries in a page directory.
pub const NPDENTRIES: usize = 1024;

/// Bytes of address space mapped by a single page directory entry.
pub const PTSIZE: usize = PAGE_SIZE * NPTENTRIES;

/// The shift amount to get the page directory index from a given address.
pub const PDX_SHIFT: usize = 22;

/// Represents a physical address.
///
/// `Pa` is a wrapper around `usize` naming a location in physical memory.
/// Physical addresses are only meaningful to the kernel; user code observes
/// them through page table entries.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Pa(usize);

impl Pa {
    /// The physical address `0`.
    pub const ZERO: Self = Self(0);

    /// Creates a new physical address if the address fits in 32 bits.
    #[inline]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr <= u32::MAX as usize {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Cast the physical address into a raw `usize`.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Align down the physical address to the page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Align up the physical address to the page boundary.
    #[inline]
    pub const fn page_up(self) -> Self {
        Self((self.0 + PAGE_MASK) & !PAGE_MASK)
    }

    /// Extracts the page offset from the physical address.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Physical page (frame) number of this address.
    #[inline]
    pub const fn frame_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }
}

/// Represents a virtual address of a user environment.
///
/// A `Va` is valid if it fits in the 32-bit address space; whether anything
/// is mapped there is a question for the page table.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Va(usize);

impl Va {
    /// Creates a new virtual address if the address fits in 32 bits.
    ///
    /// # Returns
    /// - `Some(Va)` if the address is valid.
    /// - `None` if the address is outside the address space.
    #[inline]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr <= u32::MAX as usize {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// The address of the first byte of page `pn`.
    ///
    /// Page numbers produced by [`Va::page_number`] always round-trip, so
    /// this cannot fail for them.
    #[inline]
    pub const fn from_page_number(pn: usize) -> Self {
        Self(pn << PAGE_SHIFT)
    }

    /// Cast the virtual address into a raw `usize`.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Align down the virtual address to the page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Align up the virtual address to the page boundary.
    #[inline]
    pub const fn page_up(self) -> Self {
        Self((self.0 + PAGE_MASK) & !PAGE_MASK)
    }

    /// Extracts the page offset from the virtual address.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Returns `true` if the address lies on a page boundary.
    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Virtual page number of this address (`PGNUM`).
    #[inline]
    pub const fn page_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Page directory index of this address (`PDX`).
    #[inline]
    pub const fn pdx(self) -> usize {
        (self.0 >> PDX_SHIFT) & (NPDENTRIES - 1)
    }

    /// Page table index of this address (`PTX`).
    #[inline]
    pub const fn ptx(self) -> usize {
        (self.0 >> PAGE_SHIFT) & (NPTENTRIES - 1)
    }
}

macro_rules! impl_arith {
    ($t: ty) => {
        impl core::ops::Add<usize> for $t {
            type Output = Self;

            fn add(self, other: usize) -> Self::Output {
                Self(self.0 + other)
            }
        }
        impl core::ops::AddAssign<usize> for $t {
            fn add_assign(&mut self, other: usize) {
                self.0 += other
            }
        }
        impl core::ops::Sub<usize> for $t {
            type Output = Self;

            fn sub(self, other: usize) -> Self::Output {
                Self(self.0 - other)
            }
        }
        impl core::ops::Sub<Self> for $t {
            type Output = usize;

            fn sub(self, other: Self) -> Self::Output {
                self.0 - other.0
            }
        }
        impl core::ops::BitAnd<usize> for $t {
            type Output = Self;

            fn bitand(self, other: usize) -> Self {
                Self(self.0 & other)
            }
        }
        impl core::fmt::LowerHex for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

impl_arith!(Va);
impl_arith!(Pa);

impl core::fmt::Debug for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Va(0x{:08x})", self.0)
    }
}
impl core::fmt::Display for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Va(0x{:08x})", self.0)
    }
}
impl core::fmt::Debug for Pa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Pa(0x{:08x})", self.0)
    }
}
impl core::fmt::Display for Pa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Pa(0x{:08x})", self.0)
    }
}
