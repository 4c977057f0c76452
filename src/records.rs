//! Fixed-layout binary records exchanged with the driver.
//!
//! Every struct here mirrors, byte for byte, a versioned record the native
//! side validates on each call. The leading `version` word of a record packs
//! the record's byte size in the low 16 bits and a record-specific schema
//! version in the high 16 bits; passing a record whose header does not match
//! what the installed driver expects fails the call with
//! `NVAPI_INCOMPATIBLE_STRUCT_VERSION`.
//!
//! Raw fields use driver units (kHz, µV, milli-percent, 1/256 °C). Decoded
//! accessors are the only supported way to read them: they convert to
//! physical units, honor presence bits, and truncate arrays to the reported
//! entry count. Reserved and padding words are preserved untouched.

use std::fmt;
use std::os::raw::{c_char, c_int};

use serde::Serialize;

// Compile-time maxima baked into the record layouts. Changing any of these
// changes struct sizes and therefore the wire contract.
pub const MAX_PHYSICAL_GPUS: usize = 64;
pub const MAX_THERMAL_SENSORS_PER_GPU: usize = 3;
pub const MAX_THERMAL_EX_SENSORS: usize = 32;
pub const MAX_COOLERS_PER_GPU: usize = 20;
pub const MAX_GPU_PUBLIC_CLOCKS: usize = 32;
pub const MAX_PSTATES: usize = 16;
pub const MAX_PSTATE_CLOCKS: usize = 8;
pub const MAX_BASE_VOLTAGES: usize = 4;
pub const MAX_POWER_POLICIES: usize = 4;
pub const MAX_TOPOLOGY_ENTRIES: usize = 4;
pub const SHORT_STRING_MAX: usize = 64;

/// Thermal targets accepted by `NvAPI_GPU_GetThermalSettings`.
pub const THERMAL_TARGET_GPU: i32 = 1;
pub const THERMAL_TARGET_ALL: i32 = 15;

/// Cooler policy value that makes a written duty cycle stick.
pub const COOLER_POLICY_USER: u32 = 1;

/// Well-known public clock domain indices.
pub const PUBLIC_CLOCK_GRAPHICS: usize = 0;
pub const PUBLIC_CLOCK_MEMORY: usize = 4;
pub const PUBLIC_CLOCK_PROCESSOR: usize = 7;
pub const PUBLIC_CLOCK_VIDEO: usize = 8;

// Raw-to-physical scale factors. These are part of the wire contract and
// must not drift: the driver reports kHz, microvolts, milli-percent and
// 1/256-degree steps.
pub const KHZ_PER_MHZ: f64 = 1000.0;
pub const UV_PER_VOLT: f64 = 1_000_000.0;
pub const MILLI_PERCENT_PER_PERCENT: f64 = 1000.0;
pub const THERMAL_EX_STEPS_PER_DEGREE: f64 = 256.0;

/// Packs a record byte size and schema version into a header word.
pub const fn make_version(byte_size: u16, version: u16) -> u32 {
    byte_size as u32 | ((version as u32) << 16)
}

/// The schema version half of a header word.
pub const fn version_of(tag: u32) -> u16 {
    (tag >> 16) as u16
}

/// The byte-size half of a header word.
pub const fn size_of_tag(tag: u32) -> u16 {
    tag as u16
}

/// Extracts a packed sub-field from a raw word.
pub fn bitfield(raw: u32, mask: u32, shift: u32) -> u32 {
    (raw >> shift) & mask
}

/// Converts a raw scaled integer to its physical unit.
pub fn scale(raw: u32, factor: f64) -> f64 {
    raw as f64 / factor
}

/// Signed variant of [`scale`] for delta fields.
pub fn scale_i32(raw: i32, factor: f64) -> f64 {
    raw as f64 / factor
}

/// A record whose first word is the `size | (version << 16)` header.
pub trait VersionedRecord: Sized {
    /// Record-specific schema version, the high half of the header.
    const VERSION: u16;
    /// Full header tag the driver validates on every call.
    const VERSION_TAG: u32 = make_version(size_of::<Self>() as u16, Self::VERSION);
}

/// Implements [`VersionedRecord`] plus a zeroing constructor that stamps the
/// header before the record crosses the boundary. Mirrors how the native
/// headers define each `*_VER` constant next to its struct.
macro_rules! versioned_record {
    ($ty:ty, $ver:expr) => {
        impl VersionedRecord for $ty {
            const VERSION: u16 = $ver;
        }

        impl $ty {
            /// Zero-initialized record with its header stamped.
            pub fn new() -> Self {
                // Plain-old-data layout; all-zero is a valid initial state.
                let mut record: Self = unsafe { std::mem::zeroed() };
                record.version = Self::VERSION_TAG;
                record
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

// --- Opaque handle and short string ---

/// Opaque handle to one physical GPU.
///
/// Owned by the driver: obtained from enumeration, passed back into
/// subsequent calls, never interpreted here. Eight bytes on the wire.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhysicalGpu {
    handle: c_int,
    pad: i8,
}

impl PhysicalGpu {
    /// Builds a handle from a raw tag. Meaningful values come only from
    /// device enumeration; this exists for diagnostics and mock drivers.
    pub const fn from_raw(handle: i32) -> Self {
        Self { handle, pad: 0 }
    }

    /// The raw tag, for diagnostics only.
    pub const fn raw(self) -> i32 {
        self.handle
    }
}

/// Fixed 64-byte NUL-terminated string buffer (`NvAPI_ShortString`).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ShortString([c_char; SHORT_STRING_MAX]);

impl ShortString {
    pub fn zeroed() -> Self {
        Self([0; SHORT_STRING_MAX])
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_char {
        self.0.as_mut_ptr()
    }

    /// Bytes up to the first NUL, lossily decoded as UTF-8.
    pub fn to_string_lossy(&self) -> String {
        let bytes: Vec<u8> = self
            .0
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

// --- Thermal records ---

/// One sensor slot of [`GpuThermalSettings`]. Temperatures in whole °C.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ThermalSensor {
    pub controller: i32,
    pub default_min_temp: i32,
    pub default_max_temp: i32,
    pub current_temp: i32,
    pub target: i32,
}

/// `NV_GPU_THERMAL_SETTINGS` v2: the public per-target sensor query.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GpuThermalSettings {
    pub version: u32,
    pub count: u32,
    pub sensor: [ThermalSensor; MAX_THERMAL_SENSORS_PER_GPU],
}
versioned_record!(GpuThermalSettings, 2);

impl GpuThermalSettings {
    /// Decoded readings, truncated to the driver-reported count.
    pub fn readings(&self) -> Vec<ThermalReading> {
        let count = (self.count as usize).min(MAX_THERMAL_SENSORS_PER_GPU);
        self.sensor[..count]
            .iter()
            .map(|s| ThermalReading {
                controller: s.controller,
                target: s.target,
                default_min_c: s.default_min_temp,
                default_max_c: s.default_max_temp,
                current_c: s.current_temp,
            })
            .collect()
    }
}

/// Decoded view of one [`ThermalSensor`] slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThermalReading {
    pub controller: i32,
    pub target: i32,
    pub default_min_c: i32,
    pub default_max_c: i32,
    pub current_c: i32,
}

impl fmt::Display for ThermalReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sensor(target={}, controller={}): {} °C (default {}..{} °C)",
            self.target, self.controller, self.current_c, self.default_min_c, self.default_max_c
        )
    }
}

/// `NV_GPU_THERMAL_EX` v2: the undocumented all-sensors query.
///
/// `mask` is a request/grant bitmap: callers set bit `i` to ask for sensor
/// `i`, and on return the driver leaves bits set only for sensors it actually
/// populated. Readings are fixed-point 1/256 °C.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GpuThermalEx {
    pub version: u32,
    pub mask: u32,
    pad: [u32; 8],
    sensors: [u32; MAX_THERMAL_EX_SENSORS],
}
versioned_record!(GpuThermalEx, 2);

impl GpuThermalEx {
    /// Fresh record requesting the `count` lowest sensor slots.
    pub fn with_sensor_count(count: u32) -> Self {
        let mut record = Self::new();
        record.mask = if count >= 32 { u32::MAX } else { (1 << count) - 1 };
        record
    }

    /// Decoded readings in °C for the first `count` slots.
    ///
    /// A slot whose mask bit is clear is reported as `None`, not zero: the
    /// backing storage of an absent sensor is uninitialized or stale.
    pub fn readings(&self, count: u32) -> Vec<Option<f64>> {
        let count = (count as usize).min(MAX_THERMAL_EX_SENSORS);
        (0..count)
            .map(|i| {
                if bitfield(self.mask, 1, i as u32) == 1 {
                    Some(scale(self.sensors[i], THERMAL_EX_STEPS_PER_DEGREE))
                } else {
                    None
                }
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn set_sensor_raw(&mut self, index: usize, raw: u32) {
        self.sensors[index] = raw;
    }
}

// --- Cooler records ---

/// One written cooler level: duty cycle in percent plus the policy that
/// makes the write stick.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CoolerLevel {
    pub level: u32,
    pub policy: u32,
}

/// `NV_COOLER_LEVELS` v1, input to `NvAPI_GPU_SetCoolerLevels`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CoolerLevels {
    pub version: u32,
    pub levels: [CoolerLevel; MAX_COOLERS_PER_GPU],
}
versioned_record!(CoolerLevels, 1);

impl CoolerLevels {
    /// Record setting every cooler slot to `duty` percent under the user
    /// policy. The duty cycle is clamped to 0..=100.
    pub fn uniform_duty(duty: u32) -> Self {
        let mut record = Self::new();
        let duty = duty.min(100);
        for slot in record.levels.iter_mut() {
            slot.level = duty;
            slot.policy = COOLER_POLICY_USER;
        }
        record
    }
}

/// One cooler slot of [`GpuCoolerSettings`].
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SingleCooler {
    pub kind: i32,
    pub controller: i32,
    pub default_min: i32,
    pub default_max: i32,
    pub current_min: i32,
    pub current_max: i32,
    pub current_level: i32,
    pub default_policy: i32,
    pub current_policy: i32,
    pub target: i32,
    pub control_type: i32,
    pub active: i32,
}

/// `NV_GPU_COOLER_SETTINGS` v2.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GpuCoolerSettings {
    pub version: u32,
    pub count: u32,
    pub coolers: [SingleCooler; MAX_COOLERS_PER_GPU],
}
versioned_record!(GpuCoolerSettings, 2);

impl GpuCoolerSettings {
    /// Decoded cooler states, truncated to the driver-reported count.
    pub fn states(&self) -> Vec<CoolerState> {
        let count = (self.count as usize).min(MAX_COOLERS_PER_GPU);
        self.coolers[..count]
            .iter()
            .enumerate()
            .map(|(index, c)| CoolerState {
                index,
                kind: c.kind,
                controller: c.controller,
                duty_min: c.current_min,
                duty_max: c.current_max,
                duty: c.current_level,
                policy: c.current_policy,
                target: c.target,
                active: c.active != 0,
            })
            .collect()
    }
}

/// Decoded view of one [`SingleCooler`] slot. Duty cycles in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoolerState {
    pub index: usize,
    pub kind: i32,
    pub controller: i32,
    pub duty_min: i32,
    pub duty_max: i32,
    pub duty: i32,
    pub policy: i32,
    pub target: i32,
    pub active: bool,
}

impl fmt::Display for CoolerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cooler #{}: {}% (range {}..{}%, policy={}, active={})",
            self.index, self.duty, self.duty_min, self.duty_max, self.policy, self.active
        )
    }
}

// --- Clock records ---

/// Which frequency set `NvAPI_GPU_GetAllClockFrequencies` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClockKind {
    Current = 0,
    Base = 1,
    Boost = 2,
}

/// One public clock domain slot: a presence bit packed ahead of 31 reserved
/// bits, then the frequency in kHz.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ClockDomain {
    flags: u32,
    frequency_khz: u32,
}

impl ClockDomain {
    pub fn is_present(&self) -> bool {
        bitfield(self.flags, 1, 0) == 1
    }

    /// Frequency in MHz, `None` when the presence bit is clear: a clock the
    /// driver did not populate is absent, not zero.
    pub fn frequency_mhz(&self) -> Option<f64> {
        if self.is_present() {
            Some(scale(self.frequency_khz, KHZ_PER_MHZ))
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn force(present: bool, frequency_khz: u32) -> Self {
        Self {
            flags: present as u32,
            frequency_khz,
        }
    }
}

/// `NV_GPU_CLOCK_FREQUENCIES` v3. The second word packs the 4-bit clock-type
/// selector ahead of 28 reserved bits.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GpuClockFrequencies {
    pub version: u32,
    clock_type: u32,
    pub domain: [ClockDomain; MAX_GPU_PUBLIC_CLOCKS],
}
versioned_record!(GpuClockFrequencies, 3);

impl GpuClockFrequencies {
    /// Fresh record requesting the given frequency set.
    pub fn for_kind(kind: ClockKind) -> Self {
        let mut record = Self::new();
        record.clock_type = (kind as u32) & 0xF;
        record
    }

    /// The well-known domains decoded to MHz.
    pub fn table(&self) -> ClockTable {
        ClockTable {
            core: self.domain[PUBLIC_CLOCK_GRAPHICS].frequency_mhz(),
            memory: self.domain[PUBLIC_CLOCK_MEMORY].frequency_mhz(),
            processor: self.domain[PUBLIC_CLOCK_PROCESSOR].frequency_mhz(),
            video: self.domain[PUBLIC_CLOCK_VIDEO].frequency_mhz(),
        }
    }

    /// Indices and MHz of every present domain, well-known or not.
    pub fn present_domains(&self) -> Vec<(usize, f64)> {
        self.domain
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.frequency_mhz().map(|mhz| (i, mhz)))
            .collect()
    }
}

/// Decoded frequencies of the four well-known public clocks, in MHz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClockTable {
    pub core: Option<f64>,
    pub memory: Option<f64>,
    pub processor: Option<f64>,
    pub video: Option<f64>,
}

impl fmt::Display for ClockTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn cell(v: Option<f64>) -> String {
            v.map_or_else(|| "-".to_string(), |mhz| format!("{mhz:.0} MHz"))
        }
        write!(
            f,
            "core={} memory={} processor={} video={}",
            cell(self.core),
            cell(self.memory),
            cell(self.processor),
            cell(self.video)
        )
    }
}

/// `NV_GPU_CLOCKS_INFO` v2: the legacy flat clock dump, 288 kHz words.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GpuClocksInfo {
    pub version: u32,
    clocks: [u32; 288],
}
versioned_record!(GpuClocksInfo, 2);

impl GpuClocksInfo {
    /// MHz value of one slot; zero slots are unpopulated.
    pub fn clock_mhz(&self, index: usize) -> Option<f64> {
        match self.clocks.get(index) {
            Some(&khz) if khz != 0 => Some(scale(khz, KHZ_PER_MHZ)),
            _ => None,
        }
    }
}

// --- P-state (overclock) records ---

/// Current value plus the editable range, all in the field's raw unit.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ParamDelta {
    pub value: i32,
    pub value_min: i32,
    pub value_max: i32,
}

/// Range payload of a [`PstateClockEntry`] whose `type_id` selects it.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PstateClockRange {
    pub min_freq_khz: u32,
    pub max_freq_khz: u32,
    pub domain_id: i32,
    pub min_voltage_uv: u32,
    pub max_voltage_uv: u32,
}

/// Overlapping payload storage; only [`PstateClockEntry::payload`] reads it.
#[repr(C)]
#[derive(Clone, Copy)]
union PstateClockData {
    single_freq_khz: u32,
    range: PstateClockRange,
}

/// Decoded payload of one p-state clock entry, selected by its type tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum PstateClockKind {
    /// A single fixed frequency.
    Fixed { freq_mhz: f64 },
    /// A min/max frequency-voltage envelope.
    Range {
        min_mhz: f64,
        max_mhz: f64,
        voltage_domain: i32,
        min_volts: f64,
        max_volts: f64,
    },
    /// A tag this build does not know; payload left undecoded.
    Unknown { type_id: i32 },
}

/// One clock domain inside a p-state.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PstateClockEntry {
    pub domain_id: i32,
    pub type_id: i32,
    flags: u32,
    pub freq_delta_khz: ParamDelta,
    data: PstateClockData,
}

impl PstateClockEntry {
    pub fn is_editable(&self) -> bool {
        bitfield(self.flags, 1, 0) == 1
    }

    /// Decodes the union payload by `type_id`. Raw overlapping storage never
    /// leaves this module.
    pub fn payload(&self) -> PstateClockKind {
        match self.type_id {
            0 => PstateClockKind::Fixed {
                freq_mhz: scale(unsafe { self.data.single_freq_khz }, KHZ_PER_MHZ),
            },
            1 => {
                let range = unsafe { self.data.range };
                PstateClockKind::Range {
                    min_mhz: scale(range.min_freq_khz, KHZ_PER_MHZ),
                    max_mhz: scale(range.max_freq_khz, KHZ_PER_MHZ),
                    voltage_domain: range.domain_id,
                    min_volts: scale(range.min_voltage_uv, UV_PER_VOLT),
                    max_volts: scale(range.max_voltage_uv, UV_PER_VOLT),
                }
            }
            other => PstateClockKind::Unknown { type_id: other },
        }
    }

    #[cfg(test)]
    pub(crate) fn set_payload_single(&mut self, type_id: i32, freq_khz: u32) {
        self.type_id = type_id;
        self.data.single_freq_khz = freq_khz;
    }
}

/// One base-voltage domain inside a p-state. Voltages in microvolts.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BaseVoltageEntry {
    pub domain_id: i32,
    flags: u32,
    pub volt_uv: u32,
    pub volt_delta_uv: ParamDelta,
}

impl BaseVoltageEntry {
    pub fn is_editable(&self) -> bool {
        bitfield(self.flags, 1, 0) == 1
    }

    pub fn volts(&self) -> f64 {
        scale(self.volt_uv, UV_PER_VOLT)
    }
}

/// One performance state.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Pstate {
    pub pstate_id: i32,
    flags: u32,
    pub clocks: [PstateClockEntry; MAX_PSTATE_CLOCKS],
    pub base_voltages: [BaseVoltageEntry; MAX_BASE_VOLTAGES],
}

impl Pstate {
    pub fn is_editable(&self) -> bool {
        bitfield(self.flags, 1, 0) == 1
    }
}

/// Over-voltage block trailing the p-state array.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Overvolt {
    pub num_voltages: u32,
    pub voltages: [BaseVoltageEntry; MAX_BASE_VOLTAGES],
}

/// `NV_GPU_PERF_PSTATES20_INFO` v2: the full overclocking state. Read,
/// mutated and written back whole.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GpuPstates20Info {
    pub version: u32,
    flags: u32,
    pub num_pstates: u32,
    pub num_clocks: u32,
    pub num_base_voltages: u32,
    pub pstates: [Pstate; MAX_PSTATES],
    pub ov: Overvolt,
}
versioned_record!(GpuPstates20Info, 2);

impl GpuPstates20Info {
    pub fn is_editable(&self) -> bool {
        bitfield(self.flags, 1, 0) == 1
    }

    /// Populated p-states, truncated to the driver-reported count.
    pub fn states(&self) -> &[Pstate] {
        &self.pstates[..(self.num_pstates as usize).min(MAX_PSTATES)]
    }

    /// Populated clock entries of one p-state.
    pub fn clocks_of<'a>(&self, pstate: &'a Pstate) -> &'a [PstateClockEntry] {
        &pstate.clocks[..(self.num_clocks as usize).min(MAX_PSTATE_CLOCKS)]
    }
}

// --- Power records ---

/// One power-policy slot; limits are milli-percent of the default limit.
/// The padding triplets are opaque driver words, preserved on round trip.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PowerInfoEntry {
    pub pstate: u32,
    pad0: [u32; 2],
    min_power: u32,
    pad1: [u32; 2],
    def_power: u32,
    pad2: [u32; 2],
    max_power: u32,
    pad3: u32,
}

/// `NV_GPU_POWER_INFO` v1: the static power-limit envelope.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GpuPowerInfo {
    pub version: u32,
    pub valid: u8,
    pub count: u8,
    padding: [u8; 2],
    pub entries: [PowerInfoEntry; MAX_POWER_POLICIES],
}
versioned_record!(GpuPowerInfo, 1);

impl GpuPowerInfo {
    /// Decoded policies, truncated to the reported count, limits in percent.
    pub fn policies(&self) -> Vec<PowerPolicyInfo> {
        let count = (self.count as usize).min(MAX_POWER_POLICIES);
        self.entries[..count]
            .iter()
            .map(|e| PowerPolicyInfo {
                pstate: e.pstate,
                min_percent: scale(e.min_power, MILLI_PERCENT_PER_PERCENT),
                default_percent: scale(e.def_power, MILLI_PERCENT_PER_PERCENT),
                max_percent: scale(e.max_power, MILLI_PERCENT_PER_PERCENT),
            })
            .collect()
    }
}

/// Decoded view of one [`PowerInfoEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerPolicyInfo {
    pub pstate: u32,
    pub min_percent: f64,
    pub default_percent: f64,
    pub max_percent: f64,
}

impl fmt::Display for PowerPolicyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pstate {}: min={}% default={}% max={}%",
            self.pstate, self.min_percent, self.default_percent, self.max_percent
        )
    }
}

/// One power-status slot; the limit sits between opaque driver words.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PowerStatusEntry {
    pad0: u32,
    pad1: u32,
    power: u32,
    pad2: u32,
}

/// `NV_GPU_POWER_STATUS` v1: the current power limit, read and written.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GpuPowerStatus {
    pub version: u32,
    pub count: u32,
    pub entries: [PowerStatusEntry; MAX_POWER_POLICIES],
}
versioned_record!(GpuPowerStatus, 1);

impl GpuPowerStatus {
    /// Record that sets the limit to `percent` of the default.
    pub fn with_limit(percent: f64) -> Self {
        let mut record = Self::new();
        record.count = 1;
        record.entries[0].power = (percent * MILLI_PERCENT_PER_PERCENT) as u32;
        record
    }

    /// Highest reported limit in percent; `None` when no entry came back.
    pub fn limit_percent(&self) -> Option<f64> {
        let count = (self.count as usize).min(MAX_POWER_POLICIES);
        self.entries[..count]
            .iter()
            .map(|e| e.power)
            .max()
            .map(|p| scale(p, MILLI_PERCENT_PER_PERCENT))
    }
}

/// One power-topology slot: consumption of one domain in milli-percent of
/// the power limit.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TopologyEntry {
    pub domain: u32,
    reserved0: u32,
    power: u32,
    reserved1: u32,
}

/// Topology domain id of whole-GPU consumption.
pub const TOPOLOGY_DOMAIN_GPU: u32 = 0;

/// `NV_GPU_TOPOLOGY_STATUS` v1: live per-domain power draw.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GpuTopologyStatus {
    pub version: u32,
    pub count: u32,
    pub entries: [TopologyEntry; MAX_TOPOLOGY_ENTRIES],
}
versioned_record!(GpuTopologyStatus, 1);

impl GpuTopologyStatus {
    /// Draw of one domain in percent of the limit, `None` when the domain is
    /// not among the reported entries.
    pub fn domain_percent(&self, domain: u32) -> Option<f64> {
        let count = (self.count as usize).min(MAX_TOPOLOGY_ENTRIES);
        self.entries[..count]
            .iter()
            .find(|e| e.domain == domain)
            .map(|e| scale(e.power, MILLI_PERCENT_PER_PERCENT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The record sizes are the wire contract: the driver rejects (or worse,
    // misreads) anything whose header size word disagrees with these.
    #[test]
    fn record_layouts_match_the_native_abi() {
        assert_eq!(size_of::<PhysicalGpu>(), 8);
        assert_eq!(size_of::<ShortString>(), 64);
        assert_eq!(size_of::<ThermalSensor>(), 20);
        assert_eq!(size_of::<GpuThermalSettings>(), 68);
        assert_eq!(size_of::<GpuThermalEx>(), 168);
        assert_eq!(size_of::<CoolerLevel>(), 8);
        assert_eq!(size_of::<CoolerLevels>(), 164);
        assert_eq!(size_of::<SingleCooler>(), 48);
        assert_eq!(size_of::<GpuCoolerSettings>(), 968);
        assert_eq!(size_of::<ClockDomain>(), 8);
        assert_eq!(size_of::<GpuClockFrequencies>(), 264);
        assert_eq!(size_of::<GpuClocksInfo>(), 1156);
        assert_eq!(size_of::<ParamDelta>(), 12);
        assert_eq!(size_of::<PstateClockRange>(), 20);
        assert_eq!(size_of::<PstateClockEntry>(), 44);
        assert_eq!(size_of::<BaseVoltageEntry>(), 24);
        assert_eq!(size_of::<Pstate>(), 456);
        assert_eq!(size_of::<GpuPstates20Info>(), 7416);
        assert_eq!(size_of::<PowerInfoEntry>(), 44);
        assert_eq!(size_of::<GpuPowerInfo>(), 184);
        assert_eq!(size_of::<PowerStatusEntry>(), 16);
        assert_eq!(size_of::<GpuPowerStatus>(), 72);
        assert_eq!(size_of::<TopologyEntry>(), 16);
        assert_eq!(size_of::<GpuTopologyStatus>(), 72);
    }

    #[test]
    fn header_round_trips_for_all_sizes_and_versions() {
        for &size in &[0u16, 1, 68, 7416, 0x7FFF, u16::MAX] {
            for &version in &[0u16, 1, 2, 3, 255, u16::MAX] {
                let tag = make_version(size, version);
                assert_eq!(size_of_tag(tag), size);
                assert_eq!(version_of(tag), version);
            }
        }
    }

    #[test]
    fn constructors_stamp_the_header() {
        assert_eq!(GpuThermalSettings::new().version, 68 | (2 << 16));
        assert_eq!(GpuThermalEx::new().version, 168 | (2 << 16));
        assert_eq!(CoolerLevels::new().version, 164 | (1 << 16));
        assert_eq!(GpuCoolerSettings::new().version, 968 | (2 << 16));
        assert_eq!(GpuClockFrequencies::new().version, 264 | (3 << 16));
        assert_eq!(GpuClocksInfo::new().version, 1156 | (2 << 16));
        assert_eq!(GpuPstates20Info::new().version, 7416 | (2 << 16));
        assert_eq!(GpuPowerInfo::new().version, 184 | (1 << 16));
        assert_eq!(GpuPowerStatus::new().version, 72 | (1 << 16));
        assert_eq!(GpuTopologyStatus::new().version, 72 | (1 << 16));
    }

    #[test]
    fn scale_is_exact_division() {
        assert_eq!(scale(48_000, KHZ_PER_MHZ), 48.0);
        assert_eq!(scale(7_680, THERMAL_EX_STEPS_PER_DEGREE), 30.0);
        assert_eq!(scale(1_050_000, UV_PER_VOLT), 1.05);
        assert_eq!(scale(0, KHZ_PER_MHZ), 0.0);
        assert_eq!(scale_i32(-150_000, KHZ_PER_MHZ), -150.0);
    }

    #[test]
    fn bitfield_extraction() {
        // presence bit packed ahead of a 31-bit reserved field
        assert_eq!(bitfield(0x0000_0001, 1, 0), 1);
        assert_eq!(bitfield(0xFFFF_FFFE, 1, 0), 0);
        // 4-bit clock-type selector
        assert_eq!(bitfield(0x0000_000A, 0xF, 0), 0xA);
        assert_eq!(bitfield(0xABCD_0000, 0xFFFF, 16), 0xABCD);
    }

    #[test]
    fn absent_clock_domain_is_none_even_with_zero_storage() {
        let absent = ClockDomain::force(false, 0);
        assert_eq!(absent.frequency_mhz(), None);
        let absent_stale = ClockDomain::force(false, 48_000);
        assert_eq!(absent_stale.frequency_mhz(), None);
        let present = ClockDomain::force(true, 48_000);
        assert_eq!(present.frequency_mhz(), Some(48.0));
    }

    #[test]
    fn thermal_ex_mask_distinguishes_absent_from_zero() {
        let mut record = GpuThermalEx::with_sensor_count(2);
        // grant only sensor 0
        record.mask = 0b01;
        record.set_sensor_raw(0, 7_680);
        record.set_sensor_raw(1, 0);
        assert_eq!(record.readings(2), vec![Some(30.0), None]);
    }

    #[test]
    fn thermal_ex_request_masks() {
        assert_eq!(GpuThermalEx::with_sensor_count(2).mask, 0b11);
        assert_eq!(GpuThermalEx::with_sensor_count(31).mask, 0x7FFF_FFFF);
        assert_eq!(GpuThermalEx::with_sensor_count(32).mask, u32::MAX);
    }

    #[test]
    fn decoded_arrays_truncate_to_reported_count() {
        let mut settings = GpuThermalSettings::new();
        settings.count = 1;
        settings.sensor[0].current_temp = 55;
        settings.sensor[1].current_temp = 99; // stale trailing slot
        let readings = settings.readings();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].current_c, 55);

        // a lying count must not walk past the compile-time maximum
        settings.count = 1000;
        assert_eq!(settings.readings().len(), MAX_THERMAL_SENSORS_PER_GPU);
    }

    #[test]
    fn pstate_clock_payload_decodes_by_tag() {
        let mut info = GpuPstates20Info::new();
        info.pstates[0].clocks[0].set_payload_single(0, 1_500_000);
        match info.pstates[0].clocks[0].payload() {
            PstateClockKind::Fixed { freq_mhz } => assert_eq!(freq_mhz, 1500.0),
            other => panic!("expected fixed payload, got {other:?}"),
        }

        info.pstates[0].clocks[1].set_payload_single(7, 0);
        assert_eq!(
            info.pstates[0].clocks[1].payload(),
            PstateClockKind::Unknown { type_id: 7 }
        );
    }

    #[test]
    fn power_status_limit_and_write_record() {
        let mut status = GpuPowerStatus::new();
        assert_eq!(status.limit_percent(), None);
        status.count = 2;
        status.entries[0].power = 80_000;
        status.entries[1].power = 115_000;
        assert_eq!(status.limit_percent(), Some(115.0));

        let write = GpuPowerStatus::with_limit(90.0);
        assert_eq!(write.count, 1);
        assert_eq!(write.limit_percent(), Some(90.0));
    }

    #[test]
    fn cooler_levels_clamp_and_fill_every_slot() {
        let levels = CoolerLevels::uniform_duty(250);
        for slot in &levels.levels {
            assert_eq!(slot.level, 100);
            assert_eq!(slot.policy, COOLER_POLICY_USER);
        }
    }

    #[test]
    fn short_string_decoding() {
        let mut name = ShortString::zeroed();
        for (i, b) in b"GeForce RTX 3080".iter().enumerate() {
            name.0[i] = *b as c_char;
        }
        assert_eq!(name.to_string_lossy(), "GeForce RTX 3080");
        assert_eq!(ShortString::zeroed().to_string_lossy(), "");
    }

    #[test]
    fn topology_reports_by_domain() {
        let mut topo = GpuTopologyStatus::new();
        topo.count = 2;
        topo.entries[0].domain = TOPOLOGY_DOMAIN_GPU;
        topo.entries[0].power = 87_500;
        topo.entries[1].domain = 1;
        topo.entries[1].power = 12_000;
        assert_eq!(topo.domain_percent(TOPOLOGY_DOMAIN_GPU), Some(87.5));
        assert_eq!(topo.domain_percent(1), Some(12.0));
        assert_eq!(topo.domain_percent(9), None);
    }
}
