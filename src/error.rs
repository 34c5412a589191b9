//! Error taxonomy shared by all hardware components.

use thiserror::Error;

/// Domain errors produced by device control, persistence and the
/// configuration hub. Orchestration layers wrap these in `anyhow` context.
#[derive(Debug, Error)]
pub enum Error {
    /// No HID endpoint matched the keyboard control interface filter.
    #[error("keyboard control interface not found")]
    DeviceNotFound,

    /// A write against the hardware endpoint failed.
    #[error("device i/o failed: {0}")]
    DeviceIo(String),

    /// A configuration request was malformed or incomplete.
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    /// Persisted state for a component could not be decoded.
    ///
    /// Never fatal: callers log it and keep the component's defaults.
    #[error("corrupt persisted state for \"{name}\": {reason}")]
    Decode { name: &'static str, reason: String },

    /// A supervised child failed before entering its run loop.
    ///
    /// Escalated past the restart policy, since an identical retry will
    /// not succeed without operator intervention.
    #[error("subsystem failed to start: {0}")]
    StartupFailure(String),
}
