//! The standard routine table
//!
//! One row per routine generated code may call. Rows are grouped by how the
//! call is reached: engine services behind stubs, engine services called at
//! their own address, and the two control-transfer routines the bridge
//! generates itself.

use once_cell::sync::Lazy;

use crate::descriptor::{RoutineDescriptor, RoutineTable};
use crate::types::TypeDescriptor::{self, F32, F64, I32, Void};

const MANAGED: TypeDescriptor = TypeDescriptor::MANAGED_PTR;
const NATIVE: TypeDescriptor = TypeDescriptor::NATIVE_PTR;

// ============================================================================
// Routine names
// ============================================================================

/// Safepoint poll slow path
pub const SAFEPOINT_HANDLER: &str = "safepoint_handler";
/// Raise an exception from generated code
pub const INSTALL_EXCEPTIONAL_RETURN: &str = "install_exceptional_return";
/// Allocate an instance of a class
pub const NEW_INSTANCE: &str = "new_instance";
/// Allocate a primitive-typed array
pub const NEW_TYPE_ARRAY: &str = "new_type_array";

/// Exceptional-return trampoline entered after a diverted call
pub const EXCEPTIONAL_RETURN: &str = "exceptional_return";
/// Landing-pad search for the in-flight exception
pub const EXCEPTION_HANDLER: &str = "exception_handler";

/// Shared-runtime `sin`
pub const SHARED_RUNTIME_DSIN: &str = "shared_runtime_dsin";
/// Intrinsic stub `sin`
pub const STUB_ROUTINES_DSIN: &str = "stub_routines_dsin";
/// Shared-runtime `cos`
pub const SHARED_RUNTIME_DCOS: &str = "shared_runtime_dcos";
/// Intrinsic stub `cos`
pub const STUB_ROUTINES_DCOS: &str = "stub_routines_dcos";
/// Shared-runtime `tan`
pub const SHARED_RUNTIME_DTAN: &str = "shared_runtime_dtan";
/// Intrinsic stub `tan`
pub const STUB_ROUTINES_DTAN: &str = "stub_routines_dtan";
/// Shared-runtime double remainder
pub const SHARED_RUNTIME_DREM: &str = "shared_runtime_drem";
/// Shared-runtime float remainder
pub const SHARED_RUNTIME_FREM: &str = "shared_runtime_frem";
/// Monitor enter slow path
pub const COMPLETE_MONITOR_LOCKING: &str = "complete_monitor_locking";
/// Monitor exit slow path
pub const COMPLETE_MONITOR_UNLOCKING: &str = "complete_monitor_unlocking";

// ============================================================================
// Table
// ============================================================================

/// Every routine in the standard table, in registration order
pub static STANDARD_ROUTINES: &[RoutineDescriptor] = &[
    // Engine services reached through stubs. The service receives the
    // listed arguments followed by the calling thread.
    RoutineDescriptor::stub(SAFEPOINT_HANDLER, Void, &[]),
    RoutineDescriptor::stub(INSTALL_EXCEPTIONAL_RETURN, Void, &[MANAGED]),
    RoutineDescriptor::stub(NEW_INSTANCE, MANAGED, &[NATIVE]),
    RoutineDescriptor::stub(NEW_TYPE_ARRAY, MANAGED, &[I32, I32]),
    // Control transfer
    RoutineDescriptor::control(EXCEPTIONAL_RETURN, NATIVE, &[NATIVE, NATIVE]),
    RoutineDescriptor::control(EXCEPTION_HANDLER, NATIVE, &[NATIVE]),
    // Engine services called directly
    RoutineDescriptor::direct(SHARED_RUNTIME_DSIN, F64, &[F64]),
    RoutineDescriptor::direct(STUB_ROUTINES_DSIN, F64, &[F64]),
    RoutineDescriptor::direct(SHARED_RUNTIME_DCOS, F64, &[F64]),
    RoutineDescriptor::direct(STUB_ROUTINES_DCOS, F64, &[F64]),
    RoutineDescriptor::direct(SHARED_RUNTIME_DTAN, F64, &[F64]),
    RoutineDescriptor::direct(STUB_ROUTINES_DTAN, F64, &[F64]),
    RoutineDescriptor::direct(SHARED_RUNTIME_DREM, F64, &[F64, F64]),
    RoutineDescriptor::direct(SHARED_RUNTIME_FREM, F32, &[F32, F32]),
    RoutineDescriptor::direct(COMPLETE_MONITOR_LOCKING, Void, &[MANAGED, NATIVE, NATIVE]),
    RoutineDescriptor::direct(COMPLETE_MONITOR_UNLOCKING, Void, &[MANAGED, NATIVE, NATIVE]),
];

static STANDARD_TABLE: Lazy<RoutineTable> = Lazy::new(|| RoutineTable::build(STANDARD_ROUTINES));

/// The standard routine table
pub fn standard_table() -> &'static RoutineTable {
    &STANDARD_TABLE
}

/// Descriptor of a standard routine.
///
/// The standard table is fixed at build time, so an unknown name is a
/// version mismatch between the bridge and its caller.
///
/// # Panics
/// Panics if `name` is not a standard routine.
pub fn describe(name: &str) -> &'static RoutineDescriptor {
    match STANDARD_TABLE.describe(name) {
        Some(descriptor) => descriptor,
        None => panic!("unknown runtime routine: {}", name),
    }
}
