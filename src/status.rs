//! The `NvAPI_Status` return-code space.
//!
//! Every ordinal-dispatched call returns one of these codes as a raw `i32`.
//! The set is open: driver updates introduce new codes, so unknown values are
//! carried losslessly instead of being rejected.

use std::fmt;

/// A status code returned by an NVAPI call.
///
/// `Ok` is the single success sentinel. Everything else is a named failure
/// condition, except `Unknown`, which wraps any raw value this build does not
/// recognize and round-trips it unchanged through [`NvStatus::raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NvStatus {
    Ok,
    Error,
    LibraryNotFound,
    NoImplementation,
    ApiNotInitialized,
    InvalidArgument,
    NvidiaDeviceNotFound,
    EndEnumeration,
    InvalidHandle,
    IncompatibleStructVersion,
    HandleInvalidated,
    OpenGlContextNotCurrent,
    InvalidPointer,
    ExpectedLogicalGpuHandle,
    ExpectedPhysicalGpuHandle,
    InvalidCombination,
    NotSupported,
    PortIdNotFound,
    InvalidPerfLevel,
    DeviceBusy,
    OutOfMemory,
    GpuNotPowered,
    Unknown(i32),
}

impl NvStatus {
    /// Maps a raw return value onto the known code set.
    ///
    /// Accepts any integer; values outside the known set become
    /// `Unknown(raw)` rather than failing.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => NvStatus::Ok,
            -1 => NvStatus::Error,
            -2 => NvStatus::LibraryNotFound,
            -3 => NvStatus::NoImplementation,
            -4 => NvStatus::ApiNotInitialized,
            -5 => NvStatus::InvalidArgument,
            -6 => NvStatus::NvidiaDeviceNotFound,
            -7 => NvStatus::EndEnumeration,
            -8 => NvStatus::InvalidHandle,
            -9 => NvStatus::IncompatibleStructVersion,
            -10 => NvStatus::HandleInvalidated,
            -11 => NvStatus::OpenGlContextNotCurrent,
            -14 => NvStatus::InvalidPointer,
            -100 => NvStatus::ExpectedLogicalGpuHandle,
            -101 => NvStatus::ExpectedPhysicalGpuHandle,
            -103 => NvStatus::InvalidCombination,
            -104 => NvStatus::NotSupported,
            -105 => NvStatus::PortIdNotFound,
            -107 => NvStatus::InvalidPerfLevel,
            -108 => NvStatus::DeviceBusy,
            -130 => NvStatus::OutOfMemory,
            -220 => NvStatus::GpuNotPowered,
            other => NvStatus::Unknown(other),
        }
    }

    /// The raw integer value as the driver reports it.
    pub fn raw(self) -> i32 {
        match self {
            NvStatus::Ok => 0,
            NvStatus::Error => -1,
            NvStatus::LibraryNotFound => -2,
            NvStatus::NoImplementation => -3,
            NvStatus::ApiNotInitialized => -4,
            NvStatus::InvalidArgument => -5,
            NvStatus::NvidiaDeviceNotFound => -6,
            NvStatus::EndEnumeration => -7,
            NvStatus::InvalidHandle => -8,
            NvStatus::IncompatibleStructVersion => -9,
            NvStatus::HandleInvalidated => -10,
            NvStatus::OpenGlContextNotCurrent => -11,
            NvStatus::InvalidPointer => -14,
            NvStatus::ExpectedLogicalGpuHandle => -100,
            NvStatus::ExpectedPhysicalGpuHandle => -101,
            NvStatus::InvalidCombination => -103,
            NvStatus::NotSupported => -104,
            NvStatus::PortIdNotFound => -105,
            NvStatus::InvalidPerfLevel => -107,
            NvStatus::DeviceBusy => -108,
            NvStatus::OutOfMemory => -130,
            NvStatus::GpuNotPowered => -220,
            NvStatus::Unknown(raw) => raw,
        }
    }

    /// True for exactly the success sentinel.
    pub fn is_ok(self) -> bool {
        self == NvStatus::Ok
    }
}

impl fmt::Display for NvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NvStatus::Ok => "NVAPI_OK",
            NvStatus::Error => "NVAPI_ERROR",
            NvStatus::LibraryNotFound => "NVAPI_LIBRARY_NOT_FOUND",
            NvStatus::NoImplementation => "NVAPI_NO_IMPLEMENTATION",
            NvStatus::ApiNotInitialized => "NVAPI_API_NOT_INITIALIZED",
            NvStatus::InvalidArgument => "NVAPI_INVALID_ARGUMENT",
            NvStatus::NvidiaDeviceNotFound => "NVAPI_NVIDIA_DEVICE_NOT_FOUND",
            NvStatus::EndEnumeration => "NVAPI_END_ENUMERATION",
            NvStatus::InvalidHandle => "NVAPI_INVALID_HANDLE",
            NvStatus::IncompatibleStructVersion => "NVAPI_INCOMPATIBLE_STRUCT_VERSION",
            NvStatus::HandleInvalidated => "NVAPI_HANDLE_INVALIDATED",
            NvStatus::OpenGlContextNotCurrent => "NVAPI_OPENGL_CONTEXT_NOT_CURRENT",
            NvStatus::InvalidPointer => "NVAPI_INVALID_POINTER",
            NvStatus::ExpectedLogicalGpuHandle => "NVAPI_EXPECTED_LOGICAL_GPU_HANDLE",
            NvStatus::ExpectedPhysicalGpuHandle => "NVAPI_EXPECTED_PHYSICAL_GPU_HANDLE",
            NvStatus::InvalidCombination => "NVAPI_INVALID_COMBINATION",
            NvStatus::NotSupported => "NVAPI_NOT_SUPPORTED",
            NvStatus::PortIdNotFound => "NVAPI_PORTID_NOT_FOUND",
            NvStatus::InvalidPerfLevel => "NVAPI_INVALID_PERF_LEVEL",
            NvStatus::DeviceBusy => "NVAPI_DEVICE_BUSY",
            NvStatus::OutOfMemory => "NVAPI_OUT_OF_MEMORY",
            NvStatus::GpuNotPowered => "NVAPI_GPU_NOT_POWERED",
            NvStatus::Unknown(raw) => return write!(f, "NVAPI_UNKNOWN({raw})"),
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_round_trip() {
        for raw in [0, -1, -4, -9, -10, -104, -220] {
            let status = NvStatus::from_raw(raw);
            assert!(!matches!(status, NvStatus::Unknown(_)));
            assert_eq!(status.raw(), raw);
        }
    }

    #[test]
    fn unknown_codes_round_trip_losslessly() {
        for raw in [-9999, -42, 17, i32::MIN, i32::MAX] {
            let status = NvStatus::from_raw(raw);
            if let NvStatus::Unknown(inner) = status {
                assert_eq!(inner, raw);
            }
            assert_eq!(status.raw(), raw);
        }
    }

    #[test]
    fn exactly_one_success_value() {
        assert!(NvStatus::from_raw(0).is_ok());
        for raw in [-1, -104, 1, -9999] {
            assert!(!NvStatus::from_raw(raw).is_ok());
        }
    }

    #[test]
    fn display_names() {
        assert_eq!(NvStatus::NotSupported.to_string(), "NVAPI_NOT_SUPPORTED");
        assert_eq!(NvStatus::Unknown(-321).to_string(), "NVAPI_UNKNOWN(-321)");
    }
}
