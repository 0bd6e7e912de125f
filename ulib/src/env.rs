//! Process context.
use exos::{env::EnvId, syscall::Syscall};

/// Per-process state that names "the current environment".
///
/// A child created by [`fork`] starts with a verbatim copy of its parent's
/// context, which still names the parent. The child branch of [`fork`]
/// reassigns it once with [`ProcessContext::fixup`] before returning.
///
/// [`fork`]: crate::fork::fork
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessContext {
    thisenv: EnvId,
}

impl ProcessContext {
    /// Creates a context for `thisenv`.
    pub fn new(thisenv: EnvId) -> Self {
        Self { thisenv }
    }

    /// Creates a context for the calling environment.
    pub fn current(env: &(impl Syscall + ?Sized)) -> Self {
        Self::new(env.getenvid())
    }

    /// The environment this context belongs to.
    pub fn thisenv(&self) -> EnvId {
        self.thisenv
    }

    /// Re-points the context at the calling environment.
    pub fn fixup(&mut self, env: &(impl Syscall + ?Sized)) {
        self.thisenv = env.getenvid();
    }
}
