//! Jitgate: runtime call bridge for JIT-compiled code
//!
//! Lets freshly generated native code call a fixed set of engine services
//! (safepoints, allocation, monitors, exception dispatch, math) without the
//! code generator knowing their calling convention, their thread-context
//! requirements or the provenance of the pointers it passes.
//!
//! - **Descriptors**: the build-time routine table (`descriptor`, `routines`)
//! - **Types**: address-space-tagged bridge types (`types`)
//! - **Backend**: Cranelift synthesis of stubs and control-transfer routines (`backend`)
//! - **Runtime**: thread context, exception metadata, services and the registry (`runtime`)
//! - **Callee**: typed call handles used while emitting generated code (`callee`)
//!
//! # Example
//!
//! ```rust,ignore
//! use jitgate::{BridgeConfig, DataLayout, NativeServices, RoutineRegistry, TargetPlatform};
//!
//! let config = BridgeConfig::default();
//! let target = TargetPlatform::host(&config)?;
//! let services = NativeServices::with_bridge_services()
//!     .with("safepoint_handler", engine::safepoint as *const u8);
//!     // ... one entry per stub-mediated and direct routine
//! let registry = RoutineRegistry::generate(&target, DataLayout::host(), &services, &config)?;
//!
//! let new_instance = registry.callee("new_instance")?;
//! let targets = new_instance.divert_targets(&mut builder);
//! let outcome = new_instance.emit_diverting_call(&mut builder, &[BridgeValue::native(klass)], targets)?;
//! // fill targets.unwind and targets.deoptimize, then continue in the current block
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod routines;
pub mod runtime;
pub mod types;

/// Cranelift code generation for bridge routines
#[cfg(feature = "jit")]
pub mod backend;

/// Typed call handles for generated code
#[cfg(feature = "jit")]
pub mod callee;

pub use config::{BridgeConfig, ContextSource, OptLevel};
pub use descriptor::{CallingConvention, RoutineDescriptor, RoutineKind, RoutineTable};
pub use error::{CallBuildError, ExceptionTableError, LookupError, RegistrationError};
pub use runtime::exception::{ExceptionTable, HandlerSearch};
pub use runtime::services::NativeServices;
pub use runtime::trampoline::{AttachedThread, CallStatus, DispatchState, FrameAnchor, ThreadContext};
pub use types::{AddressSpace, TypeDescriptor};

#[cfg(feature = "jit")]
pub use backend::target::{DataLayout, TargetArch, TargetPlatform};
#[cfg(feature = "jit")]
pub use callee::{BridgeValue, CallOutcome, DivertTargets, RoutineCallee};
#[cfg(feature = "jit")]
pub use runtime::registry::RoutineRegistry;
