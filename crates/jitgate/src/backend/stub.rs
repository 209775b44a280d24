//! Stub synthesis for stub-mediated routines
//!
//! A stub is entered under the bridge convention and calls the engine service
//! under the platform convention. Around the native call it:
//!
//! 1. obtains the calling thread's context and appends it as the hidden
//!    trailing argument, trapping with [`DETACHED_THREAD_TRAP`] when the
//!    thread has none,
//! 2. records its stack pointer, frame pointer and return address in the
//!    thread's frame anchor, clearing them once the service returns,
//! 3. checks for a pending exception or deoptimization request.
//!
//! Every exit returns the routine's results followed by a [`CallStatus`]
//! word. A pending exception diverts through `exceptional_return`: a landing
//! pad found there is tail-called with the exception, otherwise the stub
//! reports [`CallStatus::Unwind`]. A deoptimization request is reported as
//! [`CallStatus::Deoptimize`] alongside the service's real results.

use cranelift_codegen::ir::{self, InstBuilder, MemFlags, TrapCode};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::FunctionBuilder;
use cranelift_module::FuncId;

use super::abi;
use super::CodeEmitter;
use crate::descriptor::RoutineDescriptor;
use crate::error::RegistrationError;
use crate::runtime::trampoline::{offsets, CallStatus, DispatchState, DETACHED_THREAD_TRAP};

/// Synthesizes stubs sharing one context accessor and one
/// `exceptional_return`
#[derive(Debug, Clone, Copy)]
pub(crate) struct StubGenerator {
    /// `extern "C" fn() -> *mut ThreadContext`
    accessor: usize,
    /// Entry of the finalized `exceptional_return`
    exceptional_return: usize,
}

impl StubGenerator {
    pub(crate) fn new(accessor: usize, exceptional_return: usize) -> Self {
        StubGenerator {
            accessor,
            exceptional_return,
        }
    }

    /// Emit the stub for `routine` calling `service`
    pub(crate) fn emit(
        &self,
        emitter: &mut CodeEmitter,
        routine: &'static RoutineDescriptor,
        service: usize,
    ) -> Result<FuncId, RegistrationError> {
        let ptr = emitter.pointer_type();
        let platform = emitter.platform_call_conv();
        let signature = abi::caller_signature(routine, ptr, platform);
        emitter.define(routine.name, signature, |builder| {
            self.lower(builder, routine, service, ptr, platform)
        })
    }

    /// Build the stub body into `builder`, whose signature is the routine's
    /// caller signature
    fn lower(
        &self,
        builder: &mut FunctionBuilder<'_>,
        routine: &RoutineDescriptor,
        service: usize,
        ptr: ir::Type,
        platform: CallConv,
    ) {
        let service_sig = abi::service_signature(routine, ptr, platform);
        let accessor_sig = abi::pointer_signature(0, ptr, platform);
        let divert_sig = abi::pointer_signature(2, ptr, platform);
        let pad_sig = abi::landing_pad_signature(routine.ret, ptr);

        let entry = builder.create_block();
        let attached = builder.create_block();
        let detached = builder.create_block();
        let check_deopt = builder.create_block();
        let normal = builder.create_block();
        let deoptimize = builder.create_block();
        let raised = builder.create_block();
        let resume = builder.create_block();
        let unwind = builder.create_block();
        let flags = MemFlags::trusted();

        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let args = builder.block_params(entry).to_vec();

        let accessor_ref = builder.import_signature(accessor_sig);
        let accessor = abi::emit_address(builder, self.accessor, ptr);
        let call = builder.ins().call_indirect(accessor_ref, accessor, &[]);
        let thread = builder.inst_results(call)[0];
        builder.ins().brif(thread, attached, &[], detached, &[]);

        builder.switch_to_block(detached);
        builder.seal_block(detached);
        builder.ins().trap(TrapCode::unwrap_user(DETACHED_THREAD_TRAP));

        builder.switch_to_block(attached);
        builder.seal_block(attached);
        let sp = builder.ins().get_stack_pointer(ptr);
        let fp = builder.ins().get_frame_pointer(ptr);
        let pc = builder.ins().get_return_address(ptr);
        builder.ins().store(flags, sp, thread, offsets::LAST_SP);
        builder.ins().store(flags, fp, thread, offsets::LAST_FP);
        builder.ins().store(flags, pc, thread, offsets::LAST_PC);

        let mut service_args = args;
        service_args.push(thread);
        let service_ref = builder.import_signature(service_sig);
        let service = abi::emit_address(builder, service, ptr);
        let call = builder.ins().call_indirect(service_ref, service, &service_args);
        let results = builder.inst_results(call).to_vec();

        // Back in generated code
        let zero = builder.ins().iconst(ptr, 0);
        builder.ins().store(flags, zero, thread, offsets::LAST_SP);
        builder.ins().store(flags, zero, thread, offsets::LAST_FP);
        builder.ins().store(flags, zero, thread, offsets::LAST_PC);

        let pending = builder.ins().load(ptr, flags, thread, offsets::PENDING_EXCEPTION);
        builder.ins().brif(pending, raised, &[], check_deopt, &[]);

        builder.switch_to_block(check_deopt);
        builder.seal_block(check_deopt);
        let deopt = builder.ins().load(ptr, flags, thread, offsets::DEOPT_REQUESTED);
        builder.ins().brif(deopt, deoptimize, &[], normal, &[]);

        builder.switch_to_block(normal);
        builder.seal_block(normal);
        let returned = with_status(builder, &results, CallStatus::Returned);
        builder.ins().return_(&returned);

        // The request is handed over with the status; the results stay valid
        builder.switch_to_block(deoptimize);
        builder.seal_block(deoptimize);
        builder.ins().store(flags, zero, thread, offsets::DEOPT_REQUESTED);
        let deoptimized = with_status(builder, &results, CallStatus::Deoptimize);
        builder.ins().return_(&deoptimized);

        builder.switch_to_block(raised);
        builder.seal_block(raised);
        let divert_ref = builder.import_signature(divert_sig);
        let target = abi::emit_address(builder, self.exceptional_return, ptr);
        let call = builder.ins().call_indirect(divert_ref, target, &[thread, pc]);
        let pad = builder.inst_results(call)[0];
        builder.ins().brif(pad, resume, &[], unwind, &[]);

        // The pad takes the exception as its argument and ends the dispatch;
        // its results are the call's
        builder.switch_to_block(resume);
        builder.seal_block(resume);
        let exception = builder.ins().load(ptr, flags, thread, offsets::EXCEPTION_OOP);
        builder.ins().store(flags, zero, thread, offsets::EXCEPTION_OOP);
        let idle = builder.ins().iconst(ptr, DispatchState::Idle as i64);
        builder.ins().store(flags, idle, thread, offsets::DISPATCH_STATE);
        let pad_ref = builder.import_signature(pad_sig);
        builder.ins().return_call_indirect(pad_ref, pad, &[exception]);

        // No handler in this frame; the caller unwinds with the exception pending
        builder.switch_to_block(unwind);
        builder.seal_block(unwind);
        let zeroes: Vec<_> = abi::emit_zero(builder, routine.ret, ptr).into_iter().collect();
        let unwound = with_status(builder, &zeroes, CallStatus::Unwind);
        builder.ins().return_(&unwound);
    }
}

/// `values` followed by the status word
fn with_status(builder: &mut FunctionBuilder<'_>, values: &[ir::Value], status: CallStatus) -> Vec<ir::Value> {
    let status = builder.ins().iconst(abi::STATUS_TYPE, status as i64);
    values.iter().copied().chain(std::iter::once(status)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routines::{describe, NEW_INSTANCE, SAFEPOINT_HANDLER};
    use cranelift_codegen::ir::{Function, InstructionData, Opcode, UserFuncName};
    use cranelift_frontend::FunctionBuilderContext;

    const PTR: ir::Type = ir::types::I64;

    fn lower(name: &str) -> Function {
        let routine = describe(name);
        let signature = abi::caller_signature(routine, PTR, CallConv::SystemV);
        let mut func = Function::with_name_signature(UserFuncName::user(0, 0), signature);
        let mut func_ctx = FunctionBuilderContext::new();
        {
            let mut builder = FunctionBuilder::new(&mut func, &mut func_ctx);
            StubGenerator::new(0x1000, 0x2000).lower(&mut builder, routine, 0x3000, PTR, CallConv::SystemV);
            builder.finalize();
        }
        func
    }

    fn insts(func: &Function) -> impl Iterator<Item = &InstructionData> + '_ {
        func.layout
            .blocks()
            .flat_map(move |block| func.layout.block_insts(block))
            .map(move |inst| &func.dfg.insts[inst])
    }

    #[test]
    fn test_detached_thread_traps() {
        let func = lower(NEW_INSTANCE);
        let traps: Vec<TrapCode> = insts(&func)
            .filter_map(|data| match *data {
                InstructionData::Trap { code, .. } => Some(code),
                _ => None,
            })
            .collect();
        assert_eq!(traps, vec![TrapCode::unwrap_user(DETACHED_THREAD_TRAP)]);
    }

    #[test]
    fn test_every_exit_carries_status() {
        for name in [NEW_INSTANCE, SAFEPOINT_HANDLER] {
            let func = lower(name);
            let expected = func.signature.returns.len();
            let returns: Vec<usize> = func
                .layout
                .blocks()
                .flat_map(|block| func.layout.block_insts(block))
                .filter(|&inst| func.dfg.insts[inst].opcode() == Opcode::Return)
                .map(|inst| func.dfg.inst_args(inst).len())
                .collect();
            // Normal, deoptimize and unwind
            assert_eq!(returns, vec![expected; 3], "{}", name);
            assert_eq!(
                insts(&func).filter(|data| data.opcode() == Opcode::ReturnCallIndirect).count(),
                1
            );
        }
    }
}
