//! Native service table
//!
//! The engine owns the real implementations behind stub-mediated and direct
//! routines. It hands their entry addresses to the bridge here, keyed by
//! routine name, before routines are generated.

use rustc_hash::FxHashMap;

use crate::error::RegistrationError;
use crate::routines::INSTALL_EXCEPTIONAL_RETURN;

/// Service name of the engine's thread-context accessor.
///
/// Only consulted when stubs are configured to obtain the thread context
/// from the engine; the accessor must be `extern "C" fn() -> *mut ThreadContext`.
pub const CURRENT_THREAD_SERVICE: &str = "current_thread";

/// Engine-supplied entry addresses by routine name
#[derive(Clone, Default)]
pub struct NativeServices {
    entries: FxHashMap<&'static str, usize>,
}

impl std::fmt::Debug for NativeServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeServices")
            .field("count", &self.entries.len())
            .finish()
    }
}

impl NativeServices {
    /// Create an empty service table
    pub fn new() -> Self {
        Self::default()
    }

    /// A table pre-populated with the services the bridge implements itself
    pub fn with_bridge_services() -> Self {
        let raise = crate::runtime::exception::install_exceptional_return as *const u8;
        Self::new().with(INSTALL_EXCEPTIONAL_RETURN, raise)
    }

    /// Register `entry` for `name`, replacing any previous entry
    pub fn insert(&mut self, name: &'static str, entry: *const u8) {
        self.entries.insert(name, entry as usize);
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, name: &'static str, entry: *const u8) -> Self {
        self.insert(name, entry);
        self
    }

    /// Entry address registered for `name`
    pub fn get(&self, name: &str) -> Option<usize> {
        self.entries.get(name).copied().filter(|&addr| addr != 0)
    }

    /// Entry address for a routine that cannot be generated without one
    pub(crate) fn require(&self, name: &'static str) -> Result<usize, RegistrationError> {
        self.get(name).ok_or(RegistrationError::MissingService(name))
    }

    /// Check if a service is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of registered services
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no service is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
