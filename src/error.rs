//! Error types for the CFU host driver.

// Allow unused variants/methods - these are part of the error API surface
// and not every variant is produced by every transport backend.
#![allow(dead_code)]

use thiserror::Error;

/// Result type alias for CFU operations.
pub type CfuResult<T> = Result<T, CfuError>;

/// Errors that can occur while driving a CFU update.
#[derive(Debug, Error)]
pub enum CfuError {
    /// USB transport error from the rusb crate.
    #[error("USB transport error: {0}")]
    Usb(#[from] rusb::Error),

    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive error.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON parsing error for the package manifest.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Received report is shorter than the field layout being decoded.
    #[error("Report too short for {kind}: got {len} bytes, need {need}")]
    ShortReport {
        kind: &'static str,
        len: usize,
        need: usize,
    },

    /// Sub-record header runs past the end of the payload image.
    #[error("Truncated sub-record header at offset {offset}: {available} bytes remain")]
    TruncatedHeader { offset: usize, available: usize },

    /// Sub-record declares more data than the payload image holds.
    #[error("Sub-record at offset {offset} declares {declared} data bytes but only {available} remain")]
    TruncatedData {
        offset: usize,
        declared: usize,
        available: usize,
    },

    /// Payload image contains no sub-records at all.
    #[error("Payload image is empty")]
    EmptyPayload,

    /// No archive member matches the requested pattern.
    #[error("No archive member matches '{pattern}'")]
    MissingImage { pattern: String },

    /// Firmware package contents fail a semantic check.
    #[error("Invalid firmware package: {reason}")]
    InvalidPackage { reason: String },

    /// No matching USB device present.
    #[error("No device found matching {vid:04x}:{pid:04x}")]
    NoDeviceFound { vid: u16, pid: u16 },

    /// Hard failure wrapped with the protocol state it occurred in.
    #[error("Failed at state {state}: {source}")]
    State {
        state: &'static str,
        #[source]
        source: Box<CfuError>,
    },
}

impl CfuError {
    /// Wrap a hard failure with the name of the protocol state it occurred in.
    pub fn at_state(state: &'static str, source: CfuError) -> Self {
        CfuError::State {
            state,
            source: Box::new(source),
        }
    }

    /// Check if this error is retriable (transient errors that may succeed on retry).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CfuError::Usb(rusb::Error::Timeout) | CfuError::Usb(rusb::Error::Busy)
        )
    }

    /// Get a user-friendly error code for support purposes.
    pub fn error_code(&self) -> &'static str {
        match self {
            CfuError::Usb(_) => "CFU-001",
            CfuError::Io(_) => "CFU-002",
            CfuError::Zip(_) => "CFU-003",
            CfuError::Json(_) => "CFU-004",
            CfuError::ShortReport { .. } => "CFU-010",
            CfuError::TruncatedHeader { .. } => "CFU-020",
            CfuError::TruncatedData { .. } => "CFU-021",
            CfuError::EmptyPayload => "CFU-022",
            CfuError::MissingImage { .. } => "CFU-030",
            CfuError::InvalidPackage { .. } => "CFU-031",
            CfuError::NoDeviceFound { .. } => "CFU-040",
            CfuError::State { .. } => "CFU-050",
        }
    }
}
