//! Shared helpers for the integration tests: a JIT module for building
//! generated-code callers, and mock engine services.

#![allow(dead_code)]

use std::cell::Cell;
use std::sync::atomic::AtomicU64;

use cranelift_codegen::ir::{self, InstBuilder, Signature, TrapCode};
use cranelift_codegen::isa::{CallConv, OwnedTargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};

use jitgate::backend::abi;
use jitgate::routines::*;
use jitgate::{
    BridgeConfig, BridgeValue, CallOutcome, DataLayout, FrameAnchor, NativeServices, RoutineCallee,
    RoutineDescriptor, RoutineRegistry, RoutineTable, TargetPlatform, ThreadContext, TypeDescriptor,
};

// ============================================================================
// Targets and registries
// ============================================================================

pub fn host_isa() -> OwnedTargetIsa {
    let mut flag_builder = settings::builder();
    flag_builder.set("opt_level", "speed").unwrap();
    flag_builder.set("is_pic", "false").unwrap();
    flag_builder.set("preserve_frame_pointers", "true").unwrap();
    let flags = settings::Flags::new(flag_builder);

    cranelift_native::builder().unwrap().finish(flags).unwrap()
}

pub fn host_target() -> TargetPlatform {
    TargetPlatform::host(&BridgeConfig::default()).unwrap()
}

/// Registry of the standard table backed by the mock services below
pub fn standard_registry() -> RoutineRegistry {
    RoutineRegistry::generate(
        &host_target(),
        DataLayout::host(),
        &standard_services(),
        &BridgeConfig::default(),
    )
    .unwrap()
}

/// Registry of [`TEST_ROUTINES`]
pub fn test_registry() -> RoutineRegistry {
    let table = RoutineTable::new(TEST_ROUTINES).unwrap();
    RoutineRegistry::generate_table(
        &table,
        &host_target(),
        DataLayout::host(),
        &test_services(),
        &BridgeConfig::default(),
    )
    .unwrap()
}

// ============================================================================
// Caller module
// ============================================================================

/// A function placed in executable memory
#[derive(Debug, Clone, Copy)]
pub struct CompiledFn {
    pub address: usize,
    pub size: usize,
}

impl CompiledFn {
    pub fn contains(&self, pc: usize) -> bool {
        self.address <= pc && pc < self.address + self.size
    }

    /// # Safety
    /// `F` must be a function pointer type matching the compiled signature.
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
        std::mem::transmute_copy(&self.address)
    }
}

/// Builds functions playing the role of JIT-compiled methods
pub struct CallerModule {
    module: JITModule,
    ctx: Context,
    func_ctx: FunctionBuilderContext,
    pointer_type: ir::Type,
    platform: CallConv,
}

impl CallerModule {
    pub fn new() -> Self {
        Self::from_builder(JITBuilder::with_isa(host_isa(), cranelift_module::default_libcall_names()))
    }

    /// A module that can import routines from `registry` by name
    pub fn with_symbols(registry: &RoutineRegistry) -> Self {
        let mut builder = JITBuilder::with_isa(host_isa(), cranelift_module::default_libcall_names());
        registry.install_symbols(&mut builder);
        Self::from_builder(builder)
    }

    fn from_builder(builder: JITBuilder) -> Self {
        let module = JITModule::new(builder);
        let ctx = module.make_context();
        let pointer_type = module.isa().pointer_type();
        let platform = module.isa().default_call_conv();
        CallerModule {
            module,
            ctx,
            func_ctx: FunctionBuilderContext::new(),
            pointer_type,
            platform,
        }
    }

    pub fn pointer_type(&self) -> ir::Type {
        self.pointer_type
    }

    /// Platform-convention signature, callable from Rust as `extern "C"`
    pub fn signature(&self, params: &[TypeDescriptor], ret: TypeDescriptor) -> Signature {
        let mut sig = Signature::new(self.platform);
        sig.params
            .extend(params.iter().filter_map(|&ty| abi::platform_param(ty, self.pointer_type)));
        sig.returns.extend(abi::platform_param(ret, self.pointer_type));
        sig
    }

    /// Landing-pad signature for a routine returning `ret`
    pub fn landing_pad_signature(&self, ret: TypeDescriptor) -> Signature {
        abi::landing_pad_signature(ret, self.pointer_type)
    }

    pub fn compile(
        &mut self,
        name: &str,
        signature: Signature,
        body: impl FnOnce(&mut FunctionBuilder<'_>, &[ir::Value]),
    ) -> CompiledFn {
        self.compile_with_module(name, signature, |builder, params, _| body(builder, params))
    }

    /// Compile `name`; `body` starts in the sealed entry block and must
    /// terminate every block it creates
    pub fn compile_with_module(
        &mut self,
        name: &str,
        signature: Signature,
        body: impl FnOnce(&mut FunctionBuilder<'_>, &[ir::Value], &mut JITModule),
    ) -> CompiledFn {
        let func_id = self
            .module
            .declare_function(name, Linkage::Local, &signature)
            .unwrap();

        self.ctx.func.signature = signature;
        {
            let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.func_ctx);
            let entry = builder.create_block();
            builder.append_block_params_for_function_params(entry);
            builder.switch_to_block(entry);
            builder.seal_block(entry);
            let params = builder.block_params(entry).to_vec();
            body(&mut builder, &params, &mut self.module);
            builder.finalize();
        }

        self.module
            .define_function(func_id, &mut self.ctx)
            .expect("Define function failed");
        let size = self.ctx.compiled_code().unwrap().code_buffer().len();
        self.module.clear_context(&mut self.ctx);
        self.module.finalize_definitions().unwrap();

        CompiledFn {
            address: self.module.get_finalized_function(func_id) as usize,
            size,
        }
    }
}

// ============================================================================
// Emitting routine calls
// ============================================================================

/// User trap raised by [`emit_plain_call`] when a call diverts anyway
pub const UNEXPECTED_DIVERT_TRAP: u8 = 42;

/// Emit a call to `callee`; when it diverts, `unwind` or `deoptimize`
/// (given the call's results) fill the matching block and must leave the
/// frame. Afterwards the builder continues on the normal-return path.
pub fn emit_routine_call(
    builder: &mut FunctionBuilder<'_>,
    callee: &RoutineCallee,
    args: &[BridgeValue],
    unwind: impl FnOnce(&mut FunctionBuilder<'_>),
    deoptimize: impl FnOnce(&mut FunctionBuilder<'_>, &[ir::Value]),
) -> CallOutcome {
    if !callee.can_divert() {
        return callee.emit_call(builder, args).unwrap();
    }

    let targets = callee.divert_targets(builder);
    let outcome = callee.emit_diverting_call(builder, args, targets).unwrap();
    let returned = builder.current_block().unwrap();

    builder.switch_to_block(targets.unwind);
    builder.seal_block(targets.unwind);
    unwind(builder);

    builder.switch_to_block(targets.deoptimize);
    builder.seal_block(targets.deoptimize);
    let results = builder.block_params(targets.deoptimize).to_vec();
    deoptimize(builder, &results);

    builder.switch_to_block(returned);
    outcome
}

/// Emit a call that is expected to return normally
pub fn emit_plain_call(
    builder: &mut FunctionBuilder<'_>,
    callee: &RoutineCallee,
    args: &[BridgeValue],
) -> CallOutcome {
    emit_routine_call(
        builder,
        callee,
        args,
        |builder| {
            builder.ins().trap(TrapCode::unwrap_user(UNEXPECTED_DIVERT_TRAP));
        },
        |builder, _| {
            builder.ins().trap(TrapCode::unwrap_user(UNEXPECTED_DIVERT_TRAP));
        },
    )
}

// ============================================================================
// Mock engine services
// ============================================================================

/// The exception object raised by the mock services
pub static EXCEPTION: AtomicU64 = AtomicU64::new(0xE0E0);

pub fn exception_ptr() -> *mut u8 {
    &EXCEPTION as *const AtomicU64 as *mut u8
}

thread_local! {
    static OBSERVED_ANCHOR: Cell<FrameAnchor> = const { Cell::new(FrameAnchor { last_sp: 0, last_fp: 0, last_pc: 0 }) };
    static OBSERVED_THREAD: Cell<usize> = const { Cell::new(0) };
    static SAFEPOINTS: Cell<usize> = const { Cell::new(0) };
}

/// Anchor and thread observed by the last `observe` call on this thread
pub fn last_observed() -> (FrameAnchor, *mut ThreadContext) {
    (
        OBSERVED_ANCHOR.with(Cell::get),
        OBSERVED_THREAD.with(Cell::get) as *mut ThreadContext,
    )
}

pub fn reset_observed() {
    OBSERVED_ANCHOR.with(|anchor| anchor.set(FrameAnchor::default()));
    OBSERVED_THREAD.with(|slot| slot.set(0));
}

pub fn safepoint_count() -> usize {
    SAFEPOINTS.with(Cell::get)
}

extern "C" fn safepoint(_thread: *mut ThreadContext) {
    SAFEPOINTS.with(|count| count.set(count.get() + 1));
}

extern "C" fn new_instance(klass: *mut u8, _thread: *mut ThreadContext) -> *mut u8 {
    klass.wrapping_add(16)
}

extern "C" fn new_type_array(element_type: i32, length: i32, _thread: *mut ThreadContext) -> *mut u8 {
    ((element_type as usize) << 32 | length as usize) as *mut u8
}

extern "C" fn dsin(x: f64) -> f64 {
    x.sin()
}

extern "C" fn dcos(x: f64) -> f64 {
    x.cos()
}

extern "C" fn dtan(x: f64) -> f64 {
    x.tan()
}

extern "C" fn drem(x: f64, y: f64) -> f64 {
    x % y
}

extern "C" fn frem(x: f32, y: f32) -> f32 {
    x % y
}

extern "C" fn monitor(_obj: *mut u8, _lock: *mut u8, _thread: *mut u8) {}

pub fn standard_services() -> NativeServices {
    NativeServices::with_bridge_services()
        .with(SAFEPOINT_HANDLER, safepoint as *const u8)
        .with(NEW_INSTANCE, new_instance as *const u8)
        .with(NEW_TYPE_ARRAY, new_type_array as *const u8)
        .with(SHARED_RUNTIME_DSIN, dsin as *const u8)
        .with(STUB_ROUTINES_DSIN, dsin as *const u8)
        .with(SHARED_RUNTIME_DCOS, dcos as *const u8)
        .with(STUB_ROUTINES_DCOS, dcos as *const u8)
        .with(SHARED_RUNTIME_DTAN, dtan as *const u8)
        .with(STUB_ROUTINES_DTAN, dtan as *const u8)
        .with(SHARED_RUNTIME_DREM, drem as *const u8)
        .with(SHARED_RUNTIME_FREM, frem as *const u8)
        .with(COMPLETE_MONITOR_LOCKING, monitor as *const u8)
        .with(COMPLETE_MONITOR_UNLOCKING, monitor as *const u8)
}

// ============================================================================
// Test table: echo stubs per value type plus diverting services
// ============================================================================

pub const ECHO_I8: &str = "echo_i8";
pub const ECHO_I16: &str = "echo_i16";
pub const ECHO_I32: &str = "echo_i32";
pub const ECHO_I64: &str = "echo_i64";
pub const ECHO_F32: &str = "echo_f32";
pub const ECHO_F64: &str = "echo_f64";
pub const ECHO_MANAGED: &str = "echo_managed";
pub const ECHO_NATIVE: &str = "echo_native";
/// Raises [`EXCEPTION`] and returns its argument
pub const RAISE: &str = "raise";
/// Requests deoptimization and returns its argument plus one
pub const DEOPT: &str = "deopt";
/// Records the frame anchor and thread it observes, returns 7
pub const OBSERVE: &str = "observe";

const I8: TypeDescriptor = TypeDescriptor::I8;
const I16: TypeDescriptor = TypeDescriptor::I16;
const I32: TypeDescriptor = TypeDescriptor::I32;
const I64: TypeDescriptor = TypeDescriptor::I64;
const F32: TypeDescriptor = TypeDescriptor::F32;
const F64: TypeDescriptor = TypeDescriptor::F64;
const MANAGED: TypeDescriptor = TypeDescriptor::MANAGED_PTR;
const NATIVE: TypeDescriptor = TypeDescriptor::NATIVE_PTR;

pub static TEST_ROUTINES: &[RoutineDescriptor] = &[
    RoutineDescriptor::stub(ECHO_I8, I8, &[I8]),
    RoutineDescriptor::stub(ECHO_I16, I16, &[I16]),
    RoutineDescriptor::stub(ECHO_I32, I32, &[I32]),
    RoutineDescriptor::stub(ECHO_I64, I64, &[I64]),
    RoutineDescriptor::stub(ECHO_F32, F32, &[F32]),
    RoutineDescriptor::stub(ECHO_F64, F64, &[F64]),
    RoutineDescriptor::stub(ECHO_MANAGED, MANAGED, &[MANAGED]),
    RoutineDescriptor::stub(ECHO_NATIVE, NATIVE, &[NATIVE]),
    RoutineDescriptor::stub(RAISE, I64, &[I64]),
    RoutineDescriptor::stub(DEOPT, I64, &[I64]),
    RoutineDescriptor::stub(OBSERVE, I64, &[]),
    RoutineDescriptor::control(EXCEPTIONAL_RETURN, NATIVE, &[NATIVE, NATIVE]),
    RoutineDescriptor::control(EXCEPTION_HANDLER, NATIVE, &[NATIVE]),
];

/// Echo routine for each value type
pub fn echo_routine(ty: TypeDescriptor) -> &'static str {
    match ty {
        TypeDescriptor::I8 => ECHO_I8,
        TypeDescriptor::I16 => ECHO_I16,
        TypeDescriptor::I32 => ECHO_I32,
        TypeDescriptor::I64 => ECHO_I64,
        TypeDescriptor::F32 => ECHO_F32,
        TypeDescriptor::F64 => ECHO_F64,
        TypeDescriptor::MANAGED_PTR => ECHO_MANAGED,
        TypeDescriptor::NATIVE_PTR => ECHO_NATIVE,
        other => panic!("no echo routine for {}", other),
    }
}

extern "C" fn echo_i8(x: i8, _thread: *mut ThreadContext) -> i8 {
    x
}

extern "C" fn echo_i16(x: i16, _thread: *mut ThreadContext) -> i16 {
    x
}

extern "C" fn echo_i32(x: i32, _thread: *mut ThreadContext) -> i32 {
    x
}

extern "C" fn echo_i64(x: i64, _thread: *mut ThreadContext) -> i64 {
    x
}

extern "C" fn echo_f32(x: f32, _thread: *mut ThreadContext) -> f32 {
    x
}

extern "C" fn echo_f64(x: f64, _thread: *mut ThreadContext) -> f64 {
    x
}

extern "C" fn echo_ptr(x: *mut u8, _thread: *mut ThreadContext) -> *mut u8 {
    x
}

extern "C" fn raise(x: i64, thread: *mut ThreadContext) -> i64 {
    unsafe { (*thread).pending_exception = exception_ptr() };
    x
}

extern "C" fn deopt(x: i64, thread: *mut ThreadContext) -> i64 {
    unsafe { (*thread).deopt_requested = 1 };
    x + 1
}

extern "C" fn observe(thread: *mut ThreadContext) -> i64 {
    OBSERVED_ANCHOR.with(|anchor| anchor.set(unsafe { (*thread).anchor }));
    OBSERVED_THREAD.with(|slot| slot.set(thread as usize));
    7
}

pub fn test_services() -> NativeServices {
    NativeServices::new()
        .with(ECHO_I8, echo_i8 as *const u8)
        .with(ECHO_I16, echo_i16 as *const u8)
        .with(ECHO_I32, echo_i32 as *const u8)
        .with(ECHO_I64, echo_i64 as *const u8)
        .with(ECHO_F32, echo_f32 as *const u8)
        .with(ECHO_F64, echo_f64 as *const u8)
        .with(ECHO_MANAGED, echo_ptr as *const u8)
        .with(ECHO_NATIVE, echo_ptr as *const u8)
        .with(RAISE, raise as *const u8)
        .with(DEOPT, deopt as *const u8)
        .with(OBSERVE, observe as *const u8)
}
