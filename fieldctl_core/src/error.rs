use thiserror::Error;

/// Typed error kinds surfaced by the field-control core.
#[derive(Debug, Error, Clone)]
pub enum FieldError {
    /// Bad calibration parameter (degenerate slope, negative time constant).
    #[error("calibration error: {0}")]
    Calibration(String),
    /// Bad clamp/slew/ramp or other structural configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Output commanded while the supply is disabled.
    #[error("supply not enabled")]
    NotEnabled,
    /// Hardware call through the I/O port failed.
    #[error("io error: {0}")]
    Io(String),
    /// Logger used before `open_session` (or after close).
    #[error("session not open")]
    NotOpen,
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

/// Map a trait-boundary error to a typed `FieldError`.
///
/// The port traits use `Box<dyn Error + Send + Sync>` for flexibility; the
/// core folds those into `FieldError::Io` at the tick boundary.
pub fn map_io_error(e: &(dyn std::error::Error + 'static)) -> FieldError {
    FieldError::Io(e.to_string())
}
