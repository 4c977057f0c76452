//! Error taxonomy for the binding layer.
//!
//! Surfaced synchronously and never retried here: status errors (the
//! primary channel out of a native call), permanent resolution failures,
//! logical lookup misses and refusals, fatal startup failures, and
//! use-after-unload.

use crate::status::NvStatus;

/// Any failure produced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum NvapiError {
    /// A native call returned a status outside its allow-list.
    #[error("{call} failed: {status}")]
    Status { call: &'static str, status: NvStatus },

    /// `nvapi_QueryInterface` knows no entry point for this ordinal.
    ///
    /// Permanent for the lifetime of the process: the installed driver build
    /// simply does not export the interface. Callers probing optional feature
    /// groups match on this variant to disable the group.
    #[error("no native implementation for {call} (ordinal {ordinal:#010x})")]
    MissingInterface { call: &'static str, ordinal: u32 },

    /// The vendor library itself could not be loaded or is missing the
    /// `nvapi_QueryInterface` export. Fatal at startup.
    #[error("cannot load nvapi library: {0}")]
    Library(#[from] libloading::Error),

    /// No enumerated GPU sits at the requested bus address. A logical lookup
    /// miss, not a native-call failure.
    #[error("no GPU found at bus={bus} slot={slot}")]
    DeviceNotFound { bus: u32, slot: u32 },

    /// The installed driver predates the oldest version this binding is
    /// known to work against. Fatal at startup.
    #[error("driver version {found} is below the minimum supported {minimum}")]
    DriverTooOld { found: u32, minimum: u32 },

    /// The session was torn down; no further calls are possible.
    #[error("nvapi session already unloaded")]
    Unloaded,

    /// The CUDA discovery collaborator failed (attribute query or init).
    #[error("cuda error {code} in {call}")]
    Cuda { call: &'static str, code: i32 },

    /// The driver marks the performance state read-only; overclock reads and
    /// writes are refused up front rather than bounced off the driver.
    #[error("performance state P0 is not editable on this GPU")]
    NotEditable,

    /// An overclock delta outside the driver-reported editable range.
    #[error("{domain} delta {value} MHz outside editable range {min}..={max} MHz")]
    DeltaOutOfRange {
        domain: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl NvapiError {
    /// True when the underlying status was `NVAPI_NOT_SUPPORTED`.
    ///
    /// Callers above the binding treat this as a legitimate alternate
    /// outcome (a sensor or interface the GPU simply does not have).
    pub fn is_not_supported(&self) -> bool {
        matches!(
            self,
            NvapiError::Status {
                status: NvStatus::NotSupported,
                ..
            }
        )
    }

    /// The status carried by a status error, if this is one.
    pub fn status(&self) -> Option<NvStatus> {
        match self {
            NvapiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, NvapiError>;
