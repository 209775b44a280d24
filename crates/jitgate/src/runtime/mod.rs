//! Runtime side of the bridge: thread state, exception metadata, services
//! and the routine registry

pub mod exception;
pub mod services;
pub mod trampoline;

#[cfg(feature = "jit")]
pub mod registry;
