//! Control-transfer routine generation
//!
//! `exceptional_return` is the only control-transfer routine the bridge
//! synthesizes; `exception_handler` is ordinary Rust
//! ([`crate::runtime::exception::exception_handler`]) reached by address.

use cranelift_codegen::ir::{InstBuilder, MemFlags};
use cranelift_module::FuncId;

use super::abi;
use super::CodeEmitter;
use crate::descriptor::RoutineDescriptor;
use crate::error::RegistrationError;
use crate::routines::{EXCEPTIONAL_RETURN, EXCEPTION_HANDLER};
use crate::runtime::exception::exception_handler;
use crate::runtime::trampoline::{offsets, DispatchState};
use crate::types::TypeDescriptor;

const EXCEPTIONAL_RETURN_ARGS: &[TypeDescriptor] = &[TypeDescriptor::NATIVE_PTR, TypeDescriptor::NATIVE_PTR];
const EXCEPTION_HANDLER_ARGS: &[TypeDescriptor] = &[TypeDescriptor::NATIVE_PTR];

/// Entry address of the hand-written landing-pad search
pub(crate) fn exception_handler_address() -> usize {
    exception_handler as *const () as usize
}

/// Check a table row against the routine the bridge provides under its name
pub(crate) fn check_descriptor(routine: &RoutineDescriptor) -> Result<(), RegistrationError> {
    let expected_args = match routine.name {
        EXCEPTIONAL_RETURN => EXCEPTIONAL_RETURN_ARGS,
        EXCEPTION_HANDLER => EXCEPTION_HANDLER_ARGS,
        _ => {
            return Err(RegistrationError::InvalidDescriptor {
                routine: routine.name,
                reason: "no control-transfer routine is known by this name".to_string(),
            })
        }
    };
    if routine.args != expected_args || routine.ret != TypeDescriptor::NATIVE_PTR {
        return Err(RegistrationError::InvalidDescriptor {
            routine: routine.name,
            reason: format!("signature must be ({}) -> {}", describe_args(expected_args), TypeDescriptor::NATIVE_PTR),
        });
    }
    Ok(())
}

fn describe_args(args: &[TypeDescriptor]) -> String {
    args.iter().map(|ty| ty.to_string()).collect::<Vec<_>>().join(", ")
}

/// Emit `exceptional_return(thread, return_pc) -> landing_pad | 0`.
///
/// Records the faulting call site, runs the handler search through
/// `handler`, and on success hands the pending exception over to the
/// landing pad through `exception_oop`.
pub(crate) fn emit_exceptional_return(emitter: &mut CodeEmitter, handler: usize) -> Result<FuncId, RegistrationError> {
    let ptr = emitter.pointer_type();
    let platform = emitter.platform_call_conv();
    let signature = abi::pointer_signature(2, ptr, platform);
    let handler_sig = abi::pointer_signature(1, ptr, platform);

    emitter.define(EXCEPTIONAL_RETURN, signature, |builder| {
        let entry = builder.create_block();
        let found = builder.create_block();
        let unwind = builder.create_block();
        let flags = MemFlags::trusted();

        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let thread = builder.block_params(entry)[0];
        let return_pc = builder.block_params(entry)[1];

        builder.ins().store(flags, return_pc, thread, offsets::EXCEPTION_PC);
        let searching = builder.ins().iconst(ptr, DispatchState::Searching as i64);
        builder.ins().store(flags, searching, thread, offsets::DISPATCH_STATE);

        let handler_ref = builder.import_signature(handler_sig);
        let handler = abi::emit_address(builder, handler, ptr);
        let call = builder.ins().call_indirect(handler_ref, handler, &[thread]);
        let pad = builder.inst_results(call)[0];
        builder.ins().brif(pad, found, &[], unwind, &[]);

        // Landing pad found: the exception moves from pending to in-flight
        builder.switch_to_block(found);
        builder.seal_block(found);
        let exception = builder.ins().load(ptr, flags, thread, offsets::PENDING_EXCEPTION);
        builder.ins().store(flags, exception, thread, offsets::EXCEPTION_OOP);
        let null = builder.ins().iconst(ptr, 0);
        builder.ins().store(flags, null, thread, offsets::PENDING_EXCEPTION);
        builder.ins().return_(&[pad]);

        builder.switch_to_block(unwind);
        builder.seal_block(unwind);
        let zero = builder.ins().iconst(ptr, 0);
        builder.ins().return_(&[zero]);
    })
}
