//! # ulib: copy-on-write `fork` for exos user programs.
//!
//! An exokernel does not implement `fork`. It exports just enough to let a
//! library do it: a blank-environment system call, page mapping, a read-only
//! view of the caller's own page tables and page fault upcalls. This crate
//! is that library.
//!
//! - [`vpt`]: the Page-Table View, reading the caller's own page tables.
//! - [`pgfault`]: the Fault Resolver, which gives a writer its private copy
//!   of a copy-on-write page.
//! - [`fork`]: the Page Duplicator ([`fork::duppage`]) and the Clone
//!   Orchestrator ([`fork::fork`]).
//! - [`env`]: the [`ProcessContext`] naming the running environment.
//!
//! Everything is written against the [`exos::syscall`] traits, so the same
//! code runs on the real kernel and on a host model of it.
//!
//! ```ignore
//! let mut ctx = ProcessContext::current(env);
//! match ulib::fork::fork(env, &mut ctx)? {
//!     ForkResult::Parent { child } => { /* ... */ }
//!     ForkResult::Child => assert_eq!(ctx.thisenv(), env.getenvid()),
//! }
//! ```
//!
//! Each environment is single threaded: at most one fault is in flight per
//! environment, and the temporary mapping slot is reused across faults.
#![cfg_attr(not(test), no_std)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod env;
pub mod fork;
pub mod pgfault;
pub mod vpt;

pub use env::ProcessContext;
pub use fork::{DupOutcome, ForkError, ForkResult};
