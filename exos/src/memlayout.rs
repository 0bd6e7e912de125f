//! User-visible memory layout.
//!
//! ```text
//!     UTOP, UXSTACKTOP -->  +------------------------------+ 0xeec00000
//!                           |     User Exception Stack     | RW/RW  PAGE_SIZE
//!                           +------------------------------+ 0xeebff000
//!                           |       Empty Memory (*)       | --/--  PAGE_SIZE
//!        USTACKTOP  --->    +------------------------------+ 0xeebfe000
//!                           |      Normal User Stack       | RW/RW  PAGE_SIZE
//!                           +------------------------------+ 0xeebfd000
//!                           .                              .
//!                           .   Program Data & Heap        .
//!        UTEXT -------->    +------------------------------+ 0x00800000
//!        PFTEMP ------->    |       Empty Memory (*)       |        PTSIZE
//!                           |                              |
//!        UTEMP -------->    +------------------------------+ 0x00400000
//!                           |       Empty Memory (*)       |
//!                           +------------------------------+ 0x00000000
//! ```
//!
//! Everything below [`UTOP`] belongs to the environment and is copied by
//! `fork`. Above it lives the kernel, which user code never maps.
use crate::addressing::{PAGE_SIZE, PTSIZE, Va};

/// Top of the user-mappable address space.
pub const UTOP: usize = 0xeec0_0000;

/// Top of the one-page user exception stack.
pub const UXSTACKTOP: usize = UTOP;

/// Top of the normal user stack. One empty page separates it from the
/// exception stack to catch overflows.
pub const USTACKTOP: usize = UTOP - 2 * PAGE_SIZE;

/// Base of the scratch region used for transient mappings.
pub const UTEMP: usize = PTSIZE;

/// The temporary mapping slot used while resolving a copy-on-write fault.
pub const PFTEMP: usize = UTEMP + PTSIZE - PAGE_SIZE;

/// Where user programs are loaded.
pub const UTEXT: usize = 2 * PTSIZE;

/// The page backing the user exception stack.
#[inline]
pub const fn uxstack_page() -> Va {
    Va::from_page_number((UXSTACKTOP - PAGE_SIZE) >> crate::addressing::PAGE_SHIFT)
}

/// The page backing the top of the normal user stack.
#[inline]
pub const fn ustack_page() -> Va {
    Va::from_page_number((USTACKTOP - PAGE_SIZE) >> crate::addressing::PAGE_SHIFT)
}

/// [`PFTEMP`] as an address.
#[inline]
pub const fn pftemp() -> Va {
    Va::from_page_number(PFTEMP >> crate::addressing::PAGE_SHIFT)
}

/// Returns `true` if `va` lies below [`UTOP`].
#[inline]
pub const fn is_user(va: Va) -> bool {
    va.into_usize() < UTOP
}
