//! Ordinal-based dispatch into the vendor library.
//!
//! The library exports a single usable symbol, `nvapi_QueryInterface`; every
//! other entry point is reachable only through it, keyed by a 32-bit ordinal
//! that is stable per driver major version. This module resolves ordinals to
//! raw entry points (once, cached for the process lifetime) and checks the
//! status each call returns against its per-call allow-list.

use std::collections::HashMap;
use std::env;
use std::ffi::c_void;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::Mutex;

use libloading::{Library, Symbol};

use crate::error::{NvapiError, Result};
use crate::status::NvStatus;

/// Resolves a numeric interface ordinal to a raw native entry point.
///
/// The production implementation is [`NvapiLibrary`]; tests drive the rest of
/// the crate through an in-process mock.
pub trait QueryInterface: Send + Sync {
    /// A `None` means the installed library build does not expose this
    /// ordinal at all: a permanently missing interface, not a failed call.
    fn query(&self, ordinal: u32) -> Option<NonNull<c_void>>;
}

/// A resolved native entry point.
#[derive(Clone, Copy, Debug)]
pub struct Entry(NonNull<c_void>);

impl Entry {
    pub fn addr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

// Entry points are immutable code addresses inside the mapped library.
unsafe impl Send for Entry {}
unsafe impl Sync for Entry {}

/// Declaration of one ordinal-dispatched call: its ordinal, its canonical
/// name (for error messages), and the status allow-list beyond plain `Ok`.
pub struct NvMethod {
    pub ordinal: u32,
    pub name: &'static str,
    pub tolerated: &'static [NvStatus],
}

impl NvMethod {
    pub const fn new(ordinal: u32, name: &'static str) -> Self {
        Self {
            ordinal,
            name,
            tolerated: &[],
        }
    }

    pub const fn tolerating(
        ordinal: u32,
        name: &'static str,
        tolerated: &'static [NvStatus],
    ) -> Self {
        Self {
            ordinal,
            name,
            tolerated,
        }
    }

    /// Maps a raw return value to a status and applies the allow-list.
    ///
    /// `Ok` and tolerated statuses come back as normal data for the caller
    /// to branch on; anything else is the typed error carrying this call's
    /// name. The one error path out of a native call, never retried.
    pub fn check(&self, raw: i32) -> Result<NvStatus> {
        let status = NvStatus::from_raw(raw);
        if status.is_ok() || self.tolerated.contains(&status) {
            Ok(status)
        } else {
            Err(NvapiError::Status {
                call: self.name,
                status,
            })
        }
    }
}

/// Per-ordinal resolution cache in front of a [`QueryInterface`] provider.
///
/// Resolution happens at most once per ordinal for the process lifetime; a
/// null answer is cached too, so a missing interface stays missing without
/// re-querying the loader. The lock covers only resolve-and-cache, never the
/// native call itself.
pub struct DispatchTable {
    provider: Box<dyn QueryInterface>,
    cache: Mutex<HashMap<u32, Option<Entry>>>,
}

impl DispatchTable {
    pub fn new(provider: Box<dyn QueryInterface>) -> Self {
        Self {
            provider,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a declared call to its entry point, caching the outcome.
    pub fn resolve(&self, method: &NvMethod) -> Result<Entry> {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = cache.entry(method.ordinal).or_insert_with(|| {
            log::debug!(
                "resolving {} (ordinal {:#010x})",
                method.name,
                method.ordinal
            );
            self.provider.query(method.ordinal).map(Entry)
        });
        (*slot).ok_or(NvapiError::MissingInterface {
            call: method.name,
            ordinal: method.ordinal,
        })
    }
}

/// Resolves an entry point, calls it with the signature declared at the call
/// site, and checks the returned status against the method's allow-list.
///
/// The declared signature must match the native one exactly; a mismatch is
/// undefined behavior at the boundary, the same as a mistyped symbol lookup.
macro_rules! nv_call {
    ($table:expr, $method:expr, fn($($ty:ty),* $(,)?), $($arg:expr),* $(,)?) => {{
        let entry = $table.resolve(&$method)?;
        let func: unsafe extern "C" fn($($ty),*) -> i32 =
            unsafe { std::mem::transmute::<*mut std::ffi::c_void, _>(entry.addr()) };
        let raw = unsafe { func($($arg),*) };
        $method.check(raw)
    }};
}
pub(crate) use nv_call;

/// The real vendor library, loaded dynamically.
pub struct NvapiLibrary {
    query_interface: unsafe extern "C" fn(u32) -> *mut c_void,
    // Keeps the mapping alive for as long as resolved pointers may be used.
    _lib: Library,
}

impl NvapiLibrary {
    /// Loads the vendor library and binds `nvapi_QueryInterface`.
    pub fn open() -> Result<Self> {
        let path = lib_path();
        log::debug!("loading nvapi library from {}", path.display());
        let lib = unsafe { Library::new(&path) }?;
        let query_interface = unsafe {
            let symbol: Symbol<unsafe extern "C" fn(u32) -> *mut c_void> =
                lib.get(b"nvapi_QueryInterface")?;
            *symbol
        };
        Ok(Self {
            query_interface,
            _lib: lib,
        })
    }
}

impl QueryInterface for NvapiLibrary {
    fn query(&self, ordinal: u32) -> Option<NonNull<c_void>> {
        NonNull::new(unsafe { (self.query_interface)(ordinal) })
    }
}

/// Where to load the vendor library from.
///
/// `NVAPI_DLL_PATH` overrides; otherwise the conventional name for the
/// platform, left to the system loader's search path.
fn lib_path() -> PathBuf {
    if let Ok(path) = env::var("NVAPI_DLL_PATH") {
        return PathBuf::from(path);
    }
    let name = if cfg!(windows) {
        if cfg!(target_pointer_width = "64") {
            "nvapi64.dll"
        } else {
            "nvapi.dll"
        }
    } else {
        // Recent Linux drivers ship the same ordinal interface here.
        "libnvidia-api.so.1"
    };
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    static PROBE: NvMethod = NvMethod::new(0x1111_2222, "NvAPI_Probe");
    static MISSING: NvMethod = NvMethod::new(0xDEAD_0000, "NvAPI_Missing");
    static TOLERANT: NvMethod = NvMethod::tolerating(
        0x3333_4444,
        "NvAPI_Tolerant",
        &[NvStatus::NotSupported],
    );

    extern "C" fn stub_ok() -> i32 {
        0
    }

    struct CountingResolver {
        calls: std::sync::Arc<AtomicUsize>,
    }

    impl QueryInterface for CountingResolver {
        fn query(&self, ordinal: u32) -> Option<NonNull<c_void>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match ordinal {
                0xDEAD_0000 => None,
                _ => NonNull::new(stub_ok as *mut c_void),
            }
        }
    }

    fn table() -> (DispatchTable, std::sync::Arc<AtomicUsize>) {
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let table = DispatchTable::new(Box::new(CountingResolver {
            calls: calls.clone(),
        }));
        (table, calls)
    }

    #[test]
    fn resolution_happens_once_and_is_cached() {
        let (table, calls) = table();
        let first = table.resolve(&PROBE).unwrap();
        let second = table.resolve(&PROBE).unwrap();
        assert_eq!(first.addr(), second.addr());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_first_use_resolves_exactly_once() {
        let (table, calls) = table();
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let entry = table.resolve(&PROBE).unwrap();
                    assert_eq!(entry.addr(), stub_ok as *mut c_void);
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_ordinal_is_a_distinct_permanent_error() {
        let (table, calls) = table();
        for _ in 0..3 {
            match table.resolve(&MISSING) {
                Err(NvapiError::MissingInterface { call, ordinal }) => {
                    assert_eq!(call, "NvAPI_Missing");
                    assert_eq!(ordinal, 0xDEAD_0000);
                }
                other => panic!("expected MissingInterface, got {other:?}"),
            }
        }
        // the null outcome is cached; the loader is not re-queried
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn check_applies_the_allow_list() {
        assert_eq!(PROBE.check(0).unwrap(), NvStatus::Ok);

        match PROBE.check(-104) {
            Err(NvapiError::Status { call, status }) => {
                assert_eq!(call, "NvAPI_Probe");
                assert_eq!(status, NvStatus::NotSupported);
            }
            other => panic!("expected status error, got {other:?}"),
        }

        // tolerated status comes back as normal data
        assert_eq!(TOLERANT.check(-104).unwrap(), NvStatus::NotSupported);
        // but only the listed one
        match TOLERANT.check(-8) {
            Err(NvapiError::Status { status, .. }) => {
                assert_eq!(status, NvStatus::InvalidHandle);
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[test]
    fn nv_call_invokes_through_the_table() {
        let (table, _calls) = table();
        let checked = || -> Result<NvStatus> { Ok(nv_call!(table, PROBE, fn(),)?) };
        assert_eq!(checked().unwrap(), NvStatus::Ok);
    }
}
