//! CUDA-side device discovery.
//!
//! The NVAPI enumeration order and the CUDA device order do not match; the
//! PCI bus/slot address is the join key. This collaborator asks the CUDA
//! driver library for that address so callers can hand it to
//! [`NvApi::find_by_address`](crate::api::NvApi::find_by_address).

use std::os::raw::c_int;

use libloading::Library;

use crate::error::{NvapiError, Result};

const CU_DEVICE_ATTRIBUTE_PCI_BUS_ID: c_int = 33;
const CU_DEVICE_ATTRIBUTE_PCI_DEVICE_ID: c_int = 34;

fn cuda_lib_name() -> &'static str {
    if cfg!(windows) {
        "nvcuda.dll"
    } else {
        "libcuda.so.1"
    }
}

/// An initialized CUDA driver session, used only for attribute queries.
pub struct CudaProbe {
    device_get_attribute: unsafe extern "C" fn(*mut c_int, c_int, c_int) -> c_int,
    _lib: Library,
}

impl CudaProbe {
    /// Loads the CUDA driver library and runs `cuInit`.
    pub fn open() -> Result<Self> {
        // Safety: the CUDA driver library has no load-time side effects
        // beyond its own initializers.
        let lib = unsafe { Library::new(cuda_lib_name()) }?;
        let cu_init: unsafe extern "C" fn(c_int) -> c_int =
            *unsafe { lib.get(b"cuInit\0") }?;
        let device_get_attribute: unsafe extern "C" fn(*mut c_int, c_int, c_int) -> c_int =
            *unsafe { lib.get(b"cuDeviceGetAttribute\0") }?;

        let code = unsafe { cu_init(0) };
        if code != 0 {
            return Err(NvapiError::Cuda {
                call: "cuInit",
                code,
            });
        }
        log::debug!("cuda driver initialized via {}", cuda_lib_name());
        Ok(CudaProbe {
            device_get_attribute,
            _lib: lib,
        })
    }

    fn attribute(&self, device: c_int, attribute: c_int) -> Result<c_int> {
        let mut value: c_int = -1;
        let code = unsafe { (self.device_get_attribute)(&mut value, attribute, device) };
        if code != 0 {
            return Err(NvapiError::Cuda {
                call: "cuDeviceGetAttribute",
                code,
            });
        }
        Ok(value)
    }

    /// PCI bus and slot of a CUDA device ordinal.
    pub fn bus_slot(&self, device: i32) -> Result<(u32, u32)> {
        let bus = self.attribute(device, CU_DEVICE_ATTRIBUTE_PCI_BUS_ID)?;
        let slot = self.attribute(device, CU_DEVICE_ATTRIBUTE_PCI_DEVICE_ID)?;
        Ok((bus as u32, slot as u32))
    }
}
