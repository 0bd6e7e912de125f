//! Environment identifiers and run states.
//!
//! An environment ("env") is an isolated address space together with the
//! saved execution context that runs in it. Each live environment is named
//! by an [`EnvId`] that packs a slot index together with a generation
//! counter, so a recycled slot never answers to a stale identifier.
//!
//! ```text
//! +1+---------------21-----------------+--------10--------+
//! |0|          Uniqueifier             |   Environment    |
//! | |                                  |      Index       |
//! +------------------------------------+------------------+
//!                                       \--- ENVX(eid) --/
//! ```
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Number of low bits of an [`EnvId`] used as the slot index.
pub const LOG2NENV: usize = 10;

/// Maximum number of environment slots addressable by an [`EnvId`].
pub const NENV: usize = 1 << LOG2NENV;

/// Shift of the generation counter inside an [`EnvId`].
pub const ENVGENSHIFT: usize = 12;

/// Largest generation an [`EnvId`] can carry. Generations run from 1 to this
/// value and then wrap back to 1, so no identifier is ever [`EnvId::SELF`].
pub const MAX_GENERATION: usize = (1 << (31 - ENVGENSHIFT)) - 1;

/// Identifier of an environment.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct EnvId(pub i32);

impl EnvId {
    /// The sentinel naming "the calling environment" in system calls. It is
    /// also what `exofork` returns inside the freshly created child.
    pub const SELF: Self = Self(0);

    /// Builds an identifier from a slot index and a generation.
    #[inline]
    pub const fn from_parts(index: usize, generation: usize) -> Self {
        Self((((generation << ENVGENSHIFT) & 0x7fff_ffff) | (index & (NENV - 1))) as i32)
    }

    /// Returns `true` for the [`EnvId::SELF`] sentinel.
    #[inline]
    pub const fn is_self(self) -> bool {
        self.0 == 0
    }

    /// The environment slot index (`ENVX`).
    #[inline]
    pub const fn envx(self) -> usize {
        (self.0 as usize) & (NENV - 1)
    }
}

impl core::fmt::Debug for EnvId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "EnvId({:08x})", self.0)
    }
}

impl core::fmt::LowerHex for EnvId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::LowerHex::fmt(&self.0, f)
    }
}

/// The run state of an environment.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum EnvStatus {
    /// The slot is unused.
    Free = 0,
    /// The environment is being torn down.
    Dying = 1,
    /// The environment may be scheduled.
    Runnable = 2,
    /// The environment is executing on a CPU.
    Running = 3,
    /// The environment exists but must not be scheduled.
    NotRunnable = 4,
}
