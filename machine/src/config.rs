//! Machine sizing.
use exos::env::NENV;

/// Sizing of a [`Machine`].
///
/// The [`MachineConfig`] struct provides an interface for configuring the
/// machine before it boots. Setters consume and return the configuration so
/// that they chain:
///
/// ```
/// let config = machine::MachineConfig::default().npages(64).nenv(4);
/// assert_eq!(config.nenv, 4);
/// ```
///
/// [`Machine`]: crate::Machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Number of physical page frames, frame 0 included.
    pub npages: usize,
    /// Number of environment slots.
    pub nenv: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            npages: 8192,
            nenv: NENV,
        }
    }
}

impl MachineConfig {
    /// Sets the number of physical page frames.
    pub fn npages(self, npages: usize) -> Self {
        Self { npages, ..self }
    }

    /// Sets the number of environment slots, capped at [`NENV`].
    pub fn nenv(self, nenv: usize) -> Self {
        Self {
            nenv: nenv.min(NENV),
            ..self
        }
    }
}
