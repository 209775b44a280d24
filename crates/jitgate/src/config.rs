//! Bridge configuration

use serde::Deserialize;

/// Cranelift optimization level for synthesized routines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    /// No optimization
    None,
    /// Optimize for speed
    #[default]
    Speed,
    /// Optimize for speed and size
    SpeedAndSize,
}

impl OptLevel {
    /// Value of Cranelift's `opt_level` setting
    pub fn as_setting(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

/// Where stubs obtain the calling thread's context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    /// The bridge's own thread-local slot, set by attaching a thread
    #[default]
    ThreadLocal,
    /// An engine accessor registered in the service table under
    /// [`CURRENT_THREAD_SERVICE`](crate::runtime::services::CURRENT_THREAD_SERVICE)
    EngineAccessor,
}

/// Configuration for routine generation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Optimization level for stubs (default: speed)
    pub opt_level: OptLevel,
    /// Run the Cranelift IR verifier on synthesized code (default: true)
    pub enable_verifier: bool,
    /// Thread-context source used by stubs (default: thread-local)
    pub context_source: ContextSource,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            opt_level: OptLevel::Speed,
            enable_verifier: true,
            context_source: ContextSource::ThreadLocal,
        }
    }
}
