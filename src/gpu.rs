//! Per-GPU convenience object over the session facade.
//!
//! A [`Gpu`] borrows the session and memoizes the read-mostly bits (device
//! name, accepted sensor count) so repeated polling stays at one native call
//! per reading. Everything here decodes to physical units; raw records do
//! not leak past this layer.

use std::sync::{Mutex, OnceLock};

use serde::Serialize;

use crate::api::NvApi;
use crate::error::{NvapiError, Result};
use crate::records::{
    ClockKind, ClockTable, KHZ_PER_MHZ, PUBLIC_CLOCK_GRAPHICS, PUBLIC_CLOCK_MEMORY,
    PUBLIC_CLOCK_PROCESSOR, PUBLIC_CLOCK_VIDEO, PhysicalGpu, scale_i32,
};

/// Extended sensor slots with a fixed conventional meaning.
const SENSOR_CORE: usize = 0;
const SENSOR_HOTSPOT: usize = 1;
const SENSOR_VRAM_A: usize = 9;
const SENSOR_VRAM_B: usize = 10;

/// A clock offset: the applied value plus the editable range, in MHz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Delta {
    pub current: f64,
    pub min: f64,
    pub max: f64,
}

/// Per-domain clock offsets as the driver reports them. A `None` domain has
/// no offset entry in the P0 state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClockDelta {
    pub core: Option<Delta>,
    pub memory: Option<Delta>,
    pub processor: Option<Delta>,
    pub video: Option<Delta>,
}

/// Requested clock offsets in MHz; `None` leaves a domain untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClockOffsets {
    pub core: Option<f64>,
    pub memory: Option<f64>,
    pub processor: Option<f64>,
    pub video: Option<f64>,
}

/// One physical GPU bound to a live session.
pub struct Gpu<'a> {
    api: &'a NvApi,
    handle: PhysicalGpu,
    name: OnceLock<String>,
    /// Sensor count accepted by the last extended-temperature probe; seeds
    /// the next call so the descending probe walk runs once per device.
    sensor_hint: Mutex<Option<u32>>,
}

impl<'a> Gpu<'a> {
    pub fn new(api: &'a NvApi, handle: PhysicalGpu) -> Self {
        Gpu {
            api,
            handle,
            name: OnceLock::new(),
            sensor_hint: Mutex::new(None),
        }
    }

    /// Opens the GPU at a PCI bus/slot address.
    pub fn at_address(api: &'a NvApi, bus: u32, slot: u32) -> Result<Self> {
        Ok(Self::new(api, api.find_by_address(bus, slot)?))
    }

    pub fn handle(&self) -> PhysicalGpu {
        self.handle
    }

    /// Marketing name, fetched once and memoized.
    pub fn name(&self) -> Result<&str> {
        if let Some(name) = self.name.get() {
            return Ok(name);
        }
        let fetched = self.api.full_name(self.handle)?;
        Ok(self.name.get_or_init(|| fetched))
    }

    /// Reads the requested extended sensor slots. A slot past the accepted
    /// count reads as `None`; a GPU without the extended interface reads as
    /// all `None`.
    fn read_sensors(&self, indices: &[usize]) -> Result<Vec<Option<f64>>> {
        let hint = *self
            .sensor_hint
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (count, readings) = match self.api.all_temps_ex(self.handle, hint) {
            Ok(probed) => probed,
            Err(err) if err.is_not_supported() => return Ok(vec![None; indices.len()]),
            Err(err) => return Err(err),
        };
        *self
            .sensor_hint
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(count);
        Ok(indices
            .iter()
            .map(|&idx| readings.get(idx).copied().flatten())
            .collect())
    }

    /// Core temperature in °C.
    pub fn core_temp(&self) -> Result<Option<f64>> {
        Ok(self.read_sensors(&[SENSOR_CORE])?[0])
    }

    /// Hotspot temperature in °C, `None` when the GPU reports no such sensor.
    pub fn hotspot_temp(&self) -> Result<Option<f64>> {
        Ok(self.read_sensors(&[SENSOR_HOTSPOT])?[0])
    }

    /// Memory temperature in °C: the hotter of the two VRAM sensor slots,
    /// `None` when neither is populated.
    pub fn vram_temp(&self) -> Result<Option<f64>> {
        let readings = self.read_sensors(&[SENSOR_VRAM_A, SENSOR_VRAM_B])?;
        Ok(readings
            .into_iter()
            .flatten()
            .fold(None, |hottest: Option<f64>, t| {
                Some(hottest.map_or(t, |h| h.max(t)))
            }))
    }

    /// Lowest cooler duty cycle in percent, `None` when the GPU exposes no
    /// controllable coolers.
    pub fn fan(&self) -> Result<Option<i32>> {
        let Some(states) = self.api.cooler_settings(self.handle)? else {
            return Ok(None);
        };
        Ok(states.iter().map(|c| c.duty).min())
    }

    /// Sets every cooler to `duty` percent under the user policy.
    pub fn set_fan(&self, duty: u32) -> Result<()> {
        self.api.set_cooler_duty(self.handle, 0, duty)
    }

    /// Returns cooler control to the driver's automatic policy.
    pub fn restore_fans(&self) -> Result<bool> {
        self.api.restore_coolers(self.handle)
    }

    /// Well-known clock frequencies for one frequency set.
    pub fn clocks(&self, kind: ClockKind) -> Result<ClockTable> {
        self.api.clock_frequencies(self.handle, kind)
    }

    /// Current clock offsets of the P0 state, per well-known domain.
    pub fn overclock(&self) -> Result<ClockDelta> {
        let info = self.api.pstates(self.handle)?;
        let Some(p0) = info.states().first().filter(|p| p.is_editable()) else {
            return Err(NvapiError::NotEditable);
        };
        let mut result = ClockDelta::default();
        for clock in info.clocks_of(p0) {
            let delta = Delta {
                current: scale_i32(clock.freq_delta_khz.value, KHZ_PER_MHZ),
                min: scale_i32(clock.freq_delta_khz.value_min, KHZ_PER_MHZ),
                max: scale_i32(clock.freq_delta_khz.value_max, KHZ_PER_MHZ),
            };
            match clock.domain_id {
                id if id == PUBLIC_CLOCK_GRAPHICS as i32 => result.core = Some(delta),
                id if id == PUBLIC_CLOCK_MEMORY as i32 => result.memory = Some(delta),
                id if id == PUBLIC_CLOCK_PROCESSOR as i32 => result.processor = Some(delta),
                id if id == PUBLIC_CLOCK_VIDEO as i32 => result.video = Some(delta),
                _ => {}
            }
        }
        Ok(result)
    }

    /// Applies clock offsets to the P0 state.
    ///
    /// Read-modify-write of the whole overclocking record, explicitly not
    /// atomic with respect to other controllers of the same device. Each
    /// requested offset is validated against the editable range of the slot
    /// it lands in before anything is written back.
    pub fn set_overclock(&self, offsets: &ClockOffsets) -> Result<()> {
        let mut info = self.api.pstates(self.handle)?;
        if info.states().first().filter(|p| p.is_editable()).is_none() {
            return Err(NvapiError::NotEditable);
        }
        info.num_pstates = 1;

        let requested = [
            (PUBLIC_CLOCK_GRAPHICS as i32, "core", offsets.core),
            (PUBLIC_CLOCK_MEMORY as i32, "memory", offsets.memory),
            (PUBLIC_CLOCK_PROCESSOR as i32, "processor", offsets.processor),
            (PUBLIC_CLOCK_VIDEO as i32, "video", offsets.video),
        ];
        let mut slot = 0;
        for (domain_id, domain, value) in requested {
            let Some(mhz) = value else { continue };
            let clock = &mut info.pstates[0].clocks[slot];
            let khz = (mhz * KHZ_PER_MHZ).round() as i32;
            if khz < clock.freq_delta_khz.value_min || khz > clock.freq_delta_khz.value_max {
                return Err(NvapiError::DeltaOutOfRange {
                    domain,
                    value: mhz,
                    min: scale_i32(clock.freq_delta_khz.value_min, KHZ_PER_MHZ),
                    max: scale_i32(clock.freq_delta_khz.value_max, KHZ_PER_MHZ),
                });
            }
            clock.freq_delta_khz.value = khz;
            clock.domain_id = domain_id;
            slot += 1;
        }
        info.num_clocks = slot as u32;
        self.api.set_pstates(self.handle, &mut info)
    }

    /// Current power limit in percent of the default.
    pub fn power_limit(&self) -> Result<Option<f64>> {
        self.api.power_limit(self.handle)
    }

    /// Sets the power limit in percent of the default.
    pub fn set_power_limit(&self, percent: f64) -> Result<()> {
        self.api.set_power_limit(self.handle, percent)
    }

    /// Live power draw in percent of the limit.
    pub fn power(&self) -> Result<Option<f64>> {
        self.api.power_draw(self.handle)
    }
}
