//! Signature helpers for Cranelift IR generation
//!
//! Maps bridge types onto Cranelift types and builds the signatures used on
//! each side of a routine: the one generated code calls, the one the native
//! service implements, and the one a landing pad continues with.

use cranelift_codegen::ir::{self, AbiParam, InstBuilder, Signature};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::FunctionBuilder;

use crate::descriptor::{CallingConvention, RoutineDescriptor};
use crate::types::TypeDescriptor;

/// Cranelift convention for calls between generated code
pub const BRIDGE_CALL_CONV: CallConv = CallConv::Tail;

/// Type of the [`CallStatus`](crate::runtime::trampoline::CallStatus) word
/// trailing the results of a stub or landing pad
pub const STATUS_TYPE: ir::Type = ir::types::I32;

/// Cranelift type of a bridge value; `None` for void
pub fn clif_type(ty: TypeDescriptor, pointer_type: ir::Type) -> Option<ir::Type> {
    match ty {
        TypeDescriptor::Void => None,
        TypeDescriptor::I8 => Some(ir::types::I8),
        TypeDescriptor::I16 => Some(ir::types::I16),
        TypeDescriptor::I32 => Some(ir::types::I32),
        TypeDescriptor::I64 => Some(ir::types::I64),
        TypeDescriptor::F32 => Some(ir::types::F32),
        TypeDescriptor::F64 => Some(ir::types::F64),
        TypeDescriptor::Ptr(_) => Some(pointer_type),
    }
}

/// Parameter under the bridge convention
fn bridge_param(ty: TypeDescriptor, pointer_type: ir::Type) -> Option<AbiParam> {
    clif_type(ty, pointer_type).map(AbiParam::new)
}

/// Parameter under the platform convention; narrow integers are
/// sign-extended as the C ABI expects
pub fn platform_param(ty: TypeDescriptor, pointer_type: ir::Type) -> Option<AbiParam> {
    let param = AbiParam::new(clif_type(ty, pointer_type)?);
    Some(if ty.is_narrow_int() { param.sext() } else { param })
}

fn build_signature(
    call_conv: CallConv,
    args: impl IntoIterator<Item = TypeDescriptor>,
    ret: TypeDescriptor,
    param: fn(TypeDescriptor, ir::Type) -> Option<AbiParam>,
    pointer_type: ir::Type,
) -> Signature {
    let mut sig = Signature::new(call_conv);
    sig.params.extend(args.into_iter().filter_map(|ty| param(ty, pointer_type)));
    sig.returns.extend(param(ret, pointer_type));
    sig
}

/// Signature generated code uses to call `routine`
pub fn caller_signature(routine: &RoutineDescriptor, pointer_type: ir::Type, platform: CallConv) -> Signature {
    match routine.convention {
        CallingConvention::Bridge => {
            let mut sig = build_signature(
                BRIDGE_CALL_CONV,
                routine.args.iter().copied(),
                routine.ret,
                bridge_param,
                pointer_type,
            );
            sig.returns.push(AbiParam::new(STATUS_TYPE));
            sig
        }
        CallingConvention::Platform => build_signature(
            platform,
            routine.args.iter().copied(),
            routine.ret,
            platform_param,
            pointer_type,
        ),
    }
}

/// Signature of the native service behind `routine`, hidden thread
/// argument included
pub fn service_signature(routine: &RoutineDescriptor, pointer_type: ir::Type, platform: CallConv) -> Signature {
    build_signature(platform, routine.service_args(), routine.ret, platform_param, pointer_type)
}

/// Signature of a landing pad resuming a diverted call returning `ret`.
///
/// The pad takes the exception and produces what the stub would have: the
/// call's results followed by the status word. A stub tail-calls it in
/// place of returning.
pub fn landing_pad_signature(ret: TypeDescriptor, pointer_type: ir::Type) -> Signature {
    let mut sig = build_signature(
        BRIDGE_CALL_CONV,
        [TypeDescriptor::MANAGED_PTR],
        ret,
        bridge_param,
        pointer_type,
    );
    sig.returns.push(AbiParam::new(STATUS_TYPE));
    sig
}

/// Result types of a call to `routine` as seen by generated code, status
/// word excluded
pub fn result_types(routine: &RoutineDescriptor, pointer_type: ir::Type) -> Vec<ir::Type> {
    clif_type(routine.ret, pointer_type).into_iter().collect()
}

/// Platform signature taking `params` pointers and returning one pointer
pub fn pointer_signature(params: usize, pointer_type: ir::Type, platform: CallConv) -> Signature {
    let mut sig = Signature::new(platform);
    sig.params.extend(std::iter::repeat_n(AbiParam::new(pointer_type), params));
    sig.returns.push(AbiParam::new(pointer_type));
    sig
}

/// Zero of the given type; `None` for void
pub fn emit_zero(builder: &mut FunctionBuilder<'_>, ty: TypeDescriptor, pointer_type: ir::Type) -> Option<ir::Value> {
    let value = match ty {
        TypeDescriptor::Void => return None,
        TypeDescriptor::F32 => builder.ins().f32const(0.0),
        TypeDescriptor::F64 => builder.ins().f64const(0.0),
        _ => {
            let clif = clif_type(ty, pointer_type)?;
            builder.ins().iconst(clif, 0)
        }
    };
    Some(value)
}

/// Absolute address as a pointer-typed constant
pub fn emit_address(builder: &mut FunctionBuilder<'_>, address: usize, pointer_type: ir::Type) -> ir::Value {
    builder.ins().iconst(pointer_type, address as i64)
}
