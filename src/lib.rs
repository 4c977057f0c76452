//! Bindings to the NVIDIA private driver interface (NVAPI).
//!
//! The vendor library exports a single symbol, `nvapi_QueryInterface`, which
//! maps opaque numeric ordinals to callable entry points. Everything else
//! (session lifecycle, device enumeration, thermal, cooler, clock, power and
//! overclocking calls) goes through ordinals exchanging versioned
//! fixed-layout records. This crate resolves ordinals lazily and caches
//! them, stamps and decodes the records, and checks every returned status
//! against a per-method allow-list.
//!
//! Typical use:
//!
//! ```no_run
//! use nvraw::{Gpu, NvApi};
//!
//! # fn main() -> nvraw::Result<()> {
//! let api = NvApi::load()?;
//! for handle in api.gpu_handles()? {
//!     let gpu = Gpu::new(&api, handle);
//!     println!("{}: {:?} °C", gpu.name()?, gpu.core_temp()?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cuda;
pub mod error;
pub mod gpu;
pub mod interface;
pub mod records;
pub mod status;

pub use api::{MIN_DRIVER_VERSION, NvApi};
pub use cuda::CudaProbe;
pub use error::{NvapiError, Result};
pub use gpu::{ClockDelta, ClockOffsets, Delta, Gpu};
pub use interface::{NvMethod, QueryInterface};
pub use records::{ClockKind, ClockTable, PhysicalGpu};
pub use status::NvStatus;
