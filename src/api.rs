//! The NVAPI session facade.
//!
//! One [`NvApi`] per process owns the native session lifecycle
//! (`Uninitialized → Initialized → Unloaded`), the enumerated GPU handle
//! cache, and the typed convenience calls that assemble records, dispatch by
//! ordinal, check statuses and decode results. All calls are synchronous
//! foreign calls; nothing here retries, times out or cancels.

use std::os::raw::{c_char, c_int};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{NvapiError, Result};
use crate::interface::{DispatchTable, NvMethod, NvapiLibrary, QueryInterface, nv_call};
use crate::records::{
    ClockKind, ClockTable, CoolerLevels, CoolerState, GpuClockFrequencies, GpuClocksInfo,
    GpuCoolerSettings, GpuPowerInfo, GpuPowerStatus, GpuPstates20Info, GpuThermalEx,
    GpuThermalSettings, MAX_PHYSICAL_GPUS, PUBLIC_CLOCK_GRAPHICS, PUBLIC_CLOCK_MEMORY,
    PUBLIC_CLOCK_PROCESSOR, PUBLIC_CLOCK_VIDEO, PhysicalGpu, PowerPolicyInfo, ShortString,
    THERMAL_TARGET_ALL, ThermalReading, TOPOLOGY_DOMAIN_GPU, GpuTopologyStatus,
};
use crate::status::NvStatus;

/// Oldest driver version (in `NvAPI_SYS_GetDriverAndBranchVersion` units,
/// e.g. 43000 = release 430.00) this binding is known to work against.
/// Older drivers lack the extended thermal interface and are refused.
pub const MIN_DRIVER_VERSION: u32 = 43_000;

/// The ordinal table. Ordinals are stable per driver major version; the
/// declared signatures live at the call sites below, next to the records
/// they exchange, and must match the native ABI exactly.
mod methods {
    use super::NvMethod;
    use crate::status::NvStatus;

    pub static INITIALIZE: NvMethod = NvMethod::new(0x0150_E828, "NvAPI_Initialize");
    pub static UNLOAD: NvMethod = NvMethod::new(0xD22B_DD7E, "NvAPI_Unload");
    pub static SYS_GET_DRIVER_AND_BRANCH_VERSION: NvMethod =
        NvMethod::new(0x2926_AAAD, "NvAPI_SYS_GetDriverAndBranchVersion");
    pub static ENUM_PHYSICAL_GPUS: NvMethod = NvMethod::new(0xE5AC_921F, "NvAPI_EnumPhysicalGPUs");
    pub static GET_BUS_ID: NvMethod = NvMethod::new(0x1BE0_B8E5, "NvAPI_GPU_GetBusId");
    pub static GET_BUS_SLOT_ID: NvMethod = NvMethod::new(0x2A0A_350F, "NvAPI_GPU_GetBusSlotId");
    pub static GET_FULL_NAME: NvMethod = NvMethod::new(0xCEEE_8E9F, "NvAPI_GPU_GetFullName");
    pub static GET_THERMAL_SETTINGS: NvMethod =
        NvMethod::new(0xE364_0A56, "NvAPI_GPU_GetThermalSettings");
    pub static GET_ALL_TEMPS_EX: NvMethod = NvMethod::new(0x65FE_3AAD, "NvAPI_GPU_GetAllTempsEx");
    pub static SET_COOLER_LEVELS: NvMethod = NvMethod::new(0x891F_A0AE, "NvAPI_GPU_SetCoolerLevels");
    pub static GET_COOLER_SETTINGS: NvMethod = NvMethod::tolerating(
        0xDA14_1340,
        "NvAPI_GPU_GetCoolerSettings",
        &[NvStatus::NotSupported],
    );
    pub static RESTORE_COOLER_SETTINGS: NvMethod = NvMethod::tolerating(
        0x8F6E_D0FB,
        "NvAPI_GPU_RestoreCoolerSettings",
        &[NvStatus::NotSupported],
    );
    pub static GET_ALL_CLOCK_FREQUENCIES: NvMethod =
        NvMethod::new(0xDCB6_16C3, "NvAPI_GPU_GetAllClockFrequencies");
    pub static GET_ALL_CLOCKS: NvMethod = NvMethod::new(0x1BD6_9F49, "NvAPI_GPU_GetAllClocks");
    pub static GET_PSTATES20: NvMethod = NvMethod::new(0x6FF8_1213, "NvAPI_GPU_GetPstates20");
    pub static SET_PSTATES20: NvMethod = NvMethod::new(0x0F4D_AE6B, "NvAPI_GPU_SetPstates20");
    pub static POWER_POLICIES_GET_INFO: NvMethod =
        NvMethod::new(0x3420_6D86, "NvAPI_GPU_ClientPowerPoliciesGetInfo");
    pub static POWER_POLICIES_GET_STATUS: NvMethod =
        NvMethod::new(0x7091_6171, "NvAPI_GPU_ClientPowerPoliciesGetStatus");
    pub static POWER_POLICIES_SET_STATUS: NvMethod =
        NvMethod::new(0xAD95_F5ED, "NvAPI_GPU_ClientPowerPoliciesSetStatus");
    pub static POWER_TOPOLOGY_GET_STATUS: NvMethod =
        NvMethod::new(0xEDCF_624E, "NvAPI_GPU_ClientPowerTopologyGetStatus");
}

/// The process-wide NVAPI session.
pub struct NvApi {
    table: DispatchTable,
    /// `Initialized → Unloaded` edge; checked on every entry point.
    unloaded: AtomicBool,
    /// Enumerated once per session; hot-plug changes are not reflected.
    handles: Mutex<Option<Vec<PhysicalGpu>>>,
    driver_version: u32,
    build_branch: String,
}

impl NvApi {
    /// Loads the vendor library and starts the session.
    ///
    /// Fatal on any failure: library not loadable, `NvAPI_Initialize`
    /// refused, or driver below [`MIN_DRIVER_VERSION`].
    pub fn load() -> Result<Self> {
        Self::with_provider(Box::new(NvapiLibrary::open()?))
    }

    /// Starts a session over an arbitrary ordinal resolver. Tests use this
    /// to drive the whole facade against an in-process mock driver.
    pub fn with_provider(provider: Box<dyn QueryInterface>) -> Result<Self> {
        let table = DispatchTable::new(provider);
        nv_call!(table, methods::INITIALIZE, fn(),)?;

        let mut api = NvApi {
            table,
            unloaded: AtomicBool::new(false),
            handles: Mutex::new(None),
            driver_version: 0,
            build_branch: String::new(),
        };
        match api.version_gate() {
            Ok((version, branch)) => {
                log::debug!("nvapi session up, driver {version} ({branch})");
                api.driver_version = version;
                api.build_branch = branch;
                Ok(api)
            }
            Err(err) => {
                // Fatal startup: abandon the session without issuing any
                // further native calls (including teardown).
                api.unloaded.store(true, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn version_gate(&self) -> Result<(u32, String)> {
        let mut version: u32 = 0;
        let mut branch = ShortString::zeroed();
        nv_call!(
            self.table,
            methods::SYS_GET_DRIVER_AND_BRANCH_VERSION,
            fn(*mut u32, *mut c_char),
            &mut version,
            branch.as_mut_ptr(),
        )?;
        if version < MIN_DRIVER_VERSION {
            return Err(NvapiError::DriverTooOld {
                found: version,
                minimum: MIN_DRIVER_VERSION,
            });
        }
        Ok((version, branch.to_string_lossy()))
    }

    /// Driver version as reported at session start.
    pub fn driver_version(&self) -> u32 {
        self.driver_version
    }

    /// Driver build branch as reported at session start.
    pub fn build_branch(&self) -> &str {
        &self.build_branch
    }

    fn ensure_live(&self) -> Result<()> {
        if self.unloaded.load(Ordering::SeqCst) {
            Err(NvapiError::Unloaded)
        } else {
            Ok(())
        }
    }

    /// Tears the session down. Idempotent; every call afterwards fails with
    /// [`NvapiError::Unloaded`].
    pub fn unload(&self) -> Result<()> {
        if self.unloaded.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        nv_call!(self.table, methods::UNLOAD, fn(),)?;
        Ok(())
    }

    /// The session's GPU handles, enumerated once and cached.
    pub fn gpu_handles(&self) -> Result<Vec<PhysicalGpu>> {
        self.ensure_live()?;
        let mut cache = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handles) = cache.as_ref() {
            return Ok(handles.clone());
        }
        let mut raw = [PhysicalGpu::default(); MAX_PHYSICAL_GPUS];
        let mut count: c_int = 0;
        nv_call!(
            self.table,
            methods::ENUM_PHYSICAL_GPUS,
            fn(*mut PhysicalGpu, *mut c_int),
            raw.as_mut_ptr(),
            &mut count,
        )?;
        let count = (count.max(0) as usize).min(MAX_PHYSICAL_GPUS);
        let handles = raw[..count].to_vec();
        log::debug!("enumerated {} physical GPUs", handles.len());
        *cache = Some(handles.clone());
        Ok(handles)
    }

    /// Finds the GPU sitting at a PCI bus/slot address.
    ///
    /// A miss is [`NvapiError::DeviceNotFound`], a lookup failure distinct
    /// from any native status error.
    pub fn find_by_address(&self, bus: u32, slot: u32) -> Result<PhysicalGpu> {
        for handle in self.gpu_handles()? {
            if self.bus_id(handle)? == bus && self.bus_slot_id(handle)? == slot {
                return Ok(handle);
            }
        }
        Err(NvapiError::DeviceNotFound { bus, slot })
    }

    pub fn bus_id(&self, gpu: PhysicalGpu) -> Result<u32> {
        self.ensure_live()?;
        let mut id: u32 = 0;
        nv_call!(
            self.table,
            methods::GET_BUS_ID,
            fn(PhysicalGpu, *mut u32),
            gpu,
            &mut id,
        )?;
        Ok(id)
    }

    pub fn bus_slot_id(&self, gpu: PhysicalGpu) -> Result<u32> {
        self.ensure_live()?;
        let mut id: u32 = 0;
        nv_call!(
            self.table,
            methods::GET_BUS_SLOT_ID,
            fn(PhysicalGpu, *mut u32),
            gpu,
            &mut id,
        )?;
        Ok(id)
    }

    /// Marketing name of the GPU, e.g. "GeForce RTX 3080".
    pub fn full_name(&self, gpu: PhysicalGpu) -> Result<String> {
        self.ensure_live()?;
        let mut name = ShortString::zeroed();
        nv_call!(
            self.table,
            methods::GET_FULL_NAME,
            fn(PhysicalGpu, *mut c_char),
            gpu,
            name.as_mut_ptr(),
        )?;
        Ok(name.to_string_lossy())
    }

    /// The public per-target thermal sensors, decoded.
    pub fn thermal_settings(&self, gpu: PhysicalGpu) -> Result<Vec<ThermalReading>> {
        self.ensure_live()?;
        let mut record = GpuThermalSettings::new();
        nv_call!(
            self.table,
            methods::GET_THERMAL_SETTINGS,
            fn(PhysicalGpu, u32, *mut GpuThermalSettings),
            gpu,
            THERMAL_TARGET_ALL as u32,
            &mut record,
        )?;
        Ok(record.readings())
    }

    /// All thermal sensors via the extended interface.
    ///
    /// The interface reports no capacity of its own, so the sensor count is
    /// probed with descending masks (32 down to 2) until the driver accepts
    /// one; if every candidate fails, the last failure is the reported
    /// error. A `count_hint` from a previous successful probe short-circuits
    /// the walk. Returns the accepted count and the per-slot readings in °C
    /// (`None` for slots the driver did not populate).
    pub fn all_temps_ex(
        &self,
        gpu: PhysicalGpu,
        count_hint: Option<u32>,
    ) -> Result<(u32, Vec<Option<f64>>)> {
        self.ensure_live()?;
        let candidates: Vec<u32> = match count_hint {
            Some(hint) => vec![hint],
            None => (2..=32).rev().collect(),
        };
        let mut outcome = None;
        for count in candidates {
            let mut record = GpuThermalEx::with_sensor_count(count);
            let call = nv_call!(
                self.table,
                methods::GET_ALL_TEMPS_EX,
                fn(PhysicalGpu, *mut GpuThermalEx),
                gpu,
                &mut record,
            );
            match call {
                Ok(_) => return Ok((count, record.readings(count))),
                Err(err) => {
                    log::debug!("temperature probe with {count} sensors rejected: {err}");
                    outcome = Some(err);
                }
            }
        }
        match outcome {
            Some(err) => Err(err),
            // the candidate list is never empty, so a probe always ran
            None => Err(NvapiError::Status {
                call: methods::GET_ALL_TEMPS_EX.name,
                status: NvStatus::Error,
            }),
        }
    }

    /// The GPU's coolers, decoded; `Ok(None)` when the GPU has no
    /// controllable cooler interface (`NVAPI_NOT_SUPPORTED` tolerated).
    pub fn cooler_settings(&self, gpu: PhysicalGpu) -> Result<Option<Vec<CoolerState>>> {
        self.ensure_live()?;
        let mut record = GpuCoolerSettings::new();
        let status = nv_call!(
            self.table,
            methods::GET_COOLER_SETTINGS,
            fn(PhysicalGpu, c_int, *mut GpuCoolerSettings),
            gpu,
            0,
            &mut record,
        )?;
        if status == NvStatus::NotSupported {
            return Ok(None);
        }
        Ok(Some(record.states()))
    }

    /// Sets every cooler of the GPU to `duty` percent (clamped to 0..=100)
    /// under the user policy.
    pub fn set_cooler_duty(&self, gpu: PhysicalGpu, cooler_index: i32, duty: u32) -> Result<()> {
        self.ensure_live()?;
        let mut levels = CoolerLevels::uniform_duty(duty);
        nv_call!(
            self.table,
            methods::SET_COOLER_LEVELS,
            fn(PhysicalGpu, c_int, *mut CoolerLevels),
            gpu,
            cooler_index,
            &mut levels,
        )?;
        Ok(())
    }

    /// Returns cooler control to the driver's automatic policy. `Ok(false)`
    /// when the GPU has no restorable cooler interface.
    pub fn restore_coolers(&self, gpu: PhysicalGpu) -> Result<bool> {
        self.ensure_live()?;
        let status = nv_call!(
            self.table,
            methods::RESTORE_COOLER_SETTINGS,
            fn(PhysicalGpu, *mut u32, u32),
            gpu,
            std::ptr::null_mut(),
            0,
        )?;
        Ok(status.is_ok())
    }

    /// The well-known public clocks for one frequency set, in MHz.
    pub fn clock_frequencies(&self, gpu: PhysicalGpu, kind: ClockKind) -> Result<ClockTable> {
        self.ensure_live()?;
        let mut record = GpuClockFrequencies::for_kind(kind);
        nv_call!(
            self.table,
            methods::GET_ALL_CLOCK_FREQUENCIES,
            fn(PhysicalGpu, *mut GpuClockFrequencies),
            gpu,
            &mut record,
        )?;
        for (index, mhz) in record.present_domains() {
            let known = matches!(
                index,
                PUBLIC_CLOCK_GRAPHICS | PUBLIC_CLOCK_MEMORY | PUBLIC_CLOCK_PROCESSOR
                    | PUBLIC_CLOCK_VIDEO
            );
            if !known {
                log::debug!("unknown clock domain #{index} present, {mhz} MHz");
            }
        }
        Ok(record.table())
    }

    /// The legacy flat clock dump.
    pub fn clocks_info(&self, gpu: PhysicalGpu) -> Result<GpuClocksInfo> {
        self.ensure_live()?;
        let mut record = GpuClocksInfo::new();
        nv_call!(
            self.table,
            methods::GET_ALL_CLOCKS,
            fn(PhysicalGpu, *mut GpuClocksInfo),
            gpu,
            &mut record,
        )?;
        Ok(record)
    }

    /// The full overclocking state. The returned record is the designated
    /// input for [`NvApi::set_pstates`] after mutation.
    pub fn pstates(&self, gpu: PhysicalGpu) -> Result<GpuPstates20Info> {
        self.ensure_live()?;
        let mut record = GpuPstates20Info::new();
        nv_call!(
            self.table,
            methods::GET_PSTATES20,
            fn(PhysicalGpu, *mut GpuPstates20Info),
            gpu,
            &mut record,
        )?;
        Ok(record)
    }

    /// Writes a mutated overclocking state back. Not atomic with respect to
    /// other processes controlling the same device.
    pub fn set_pstates(&self, gpu: PhysicalGpu, record: &mut GpuPstates20Info) -> Result<()> {
        self.ensure_live()?;
        nv_call!(
            self.table,
            methods::SET_PSTATES20,
            fn(PhysicalGpu, *mut GpuPstates20Info),
            gpu,
            record,
        )?;
        Ok(())
    }

    /// Static power-limit envelope per policy, in percent of the default.
    pub fn power_info(&self, gpu: PhysicalGpu) -> Result<Vec<PowerPolicyInfo>> {
        self.ensure_live()?;
        let mut record = GpuPowerInfo::new();
        nv_call!(
            self.table,
            methods::POWER_POLICIES_GET_INFO,
            fn(PhysicalGpu, *mut GpuPowerInfo),
            gpu,
            &mut record,
        )?;
        if record.valid == 0 {
            log::debug!("power policy info reported not valid");
        }
        Ok(record.policies())
    }

    /// Current power limit in percent of the default; `None` when the driver
    /// reports no policy entry.
    pub fn power_limit(&self, gpu: PhysicalGpu) -> Result<Option<f64>> {
        self.ensure_live()?;
        let mut record = GpuPowerStatus::new();
        nv_call!(
            self.table,
            methods::POWER_POLICIES_GET_STATUS,
            fn(PhysicalGpu, *mut GpuPowerStatus),
            gpu,
            &mut record,
        )?;
        Ok(record.limit_percent())
    }

    /// Sets the power limit, in percent of the default.
    pub fn set_power_limit(&self, gpu: PhysicalGpu, percent: f64) -> Result<()> {
        self.ensure_live()?;
        let mut record = GpuPowerStatus::with_limit(percent);
        nv_call!(
            self.table,
            methods::POWER_POLICIES_SET_STATUS,
            fn(PhysicalGpu, *mut GpuPowerStatus),
            gpu,
            &mut record,
        )?;
        Ok(())
    }

    /// Live whole-GPU power draw in percent of the limit; `None` when the
    /// topology carries no GPU domain entry.
    pub fn power_draw(&self, gpu: PhysicalGpu) -> Result<Option<f64>> {
        Ok(self
            .topology_status(gpu)?
            .domain_percent(TOPOLOGY_DOMAIN_GPU))
    }

    /// Live per-domain power topology.
    pub fn topology_status(&self, gpu: PhysicalGpu) -> Result<GpuTopologyStatus> {
        self.ensure_live()?;
        let mut record = GpuTopologyStatus::new();
        nv_call!(
            self.table,
            methods::POWER_TOPOLOGY_GET_STATUS,
            fn(PhysicalGpu, *mut GpuTopologyStatus),
            gpu,
            &mut record,
        )?;
        Ok(record)
    }
}

/// Best-effort teardown; failures are logged, never propagated from drop.
impl Drop for NvApi {
    fn drop(&mut self) {
        if let Err(err) = self.unload() {
            log::warn!("NvAPI unload during drop failed: {err}");
        }
    }
}
