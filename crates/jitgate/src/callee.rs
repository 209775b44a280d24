//! Typed call handles for generated code
//!
//! A [`RoutineCallee`] is what the code generator holds to call a routine:
//! the signature in the right convention plus the resolved entry address.
//! Calls are assembled from [`BridgeValue`]s so that address-space tags are
//! checked before any instruction is emitted.
//!
//! A stub-mediated call can divert: the service raised an exception that no
//! landing pad in the caller's frame takes, or asked the caller to
//! deoptimize. Such calls are emitted with [`DivertTargets`], and control
//! continues after the call only when the service returned normally.

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{self, BlockArg, InstBuilder, Signature};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::FunctionBuilder;

use crate::backend::abi;
use crate::descriptor::{RoutineDescriptor, RoutineKind};
use crate::error::CallBuildError;
use crate::runtime::trampoline::CallStatus;
use crate::types::TypeDescriptor;

/// A Cranelift value together with its declared bridge type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeValue {
    /// The SSA value
    pub value: ir::Value,
    /// Declared type, including the address space of pointers
    pub ty: TypeDescriptor,
}

impl BridgeValue {
    /// Tag `value` with `ty`
    pub fn new(value: ir::Value, ty: TypeDescriptor) -> Self {
        BridgeValue { value, ty }
    }

    /// A pointer into the managed heap
    pub fn managed(value: ir::Value) -> Self {
        Self::new(value, TypeDescriptor::MANAGED_PTR)
    }

    /// A pointer into the native heap
    pub fn native(value: ir::Value) -> Self {
        Self::new(value, TypeDescriptor::NATIVE_PTR)
    }
}

/// Result of emitting a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// Returned value, `None` for void routines
    pub result: Option<BridgeValue>,
    /// Positions of managed-heap arguments that a collection during the call
    /// may have moved; the caller must re-derive them before further use
    pub relocatable_args: Vec<usize>,
}

/// Blocks of the calling function that a diverted call continues in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DivertTargets {
    /// Entered without arguments when the call threw and no landing pad
    /// took the exception. The exception is still pending; the block must
    /// leave the frame.
    pub unwind: ir::Block,
    /// Entered with the call's results when the service asked the caller to
    /// deoptimize; takes one parameter per result
    pub deoptimize: ir::Block,
}

/// A callable handle for one registered routine
#[derive(Debug, Clone, Copy)]
pub struct RoutineCallee {
    descriptor: &'static RoutineDescriptor,
    address: usize,
    pointer_type: ir::Type,
    platform_call_conv: CallConv,
}

impl RoutineCallee {
    pub(crate) fn new(
        descriptor: &'static RoutineDescriptor,
        address: usize,
        pointer_type: ir::Type,
        platform_call_conv: CallConv,
    ) -> Self {
        RoutineCallee {
            descriptor,
            address,
            pointer_type,
            platform_call_conv,
        }
    }

    /// Routine name
    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// Descriptor of the routine
    pub fn descriptor(&self) -> &'static RoutineDescriptor {
        self.descriptor
    }

    /// Entry address
    pub fn address(&self) -> usize {
        self.address
    }

    /// Signature generated code calls the routine with
    pub fn signature(&self) -> Signature {
        abi::caller_signature(self.descriptor, self.pointer_type, self.platform_call_conv)
    }

    /// Check `args` against the descriptor without emitting anything
    pub fn check_args(&self, args: &[BridgeValue]) -> Result<(), CallBuildError> {
        let routine = self.descriptor.name;
        if args.len() != self.descriptor.args.len() {
            return Err(CallBuildError::ArityMismatch {
                routine,
                expected: self.descriptor.args.len(),
                found: args.len(),
            });
        }

        for (index, (arg, &expected)) in args.iter().zip(self.descriptor.args).enumerate() {
            let found = arg.ty;
            if found.is_void() {
                return Err(CallBuildError::VoidArgument { routine, index });
            }
            if !found.same_kind(expected) {
                return Err(CallBuildError::TypeMismatch {
                    routine,
                    index,
                    expected,
                    found,
                });
            }
            if let (Some(expected), Some(found)) = (expected.address_space(), found.address_space()) {
                if expected != found {
                    return Err(CallBuildError::AddressSpaceMismatch {
                        routine,
                        index,
                        expected,
                        found,
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether a call can divert instead of returning, which is the case for
    /// every stub-mediated routine
    pub fn can_divert(&self) -> bool {
        self.descriptor.kind == RoutineKind::StubMediated
    }

    /// Create unwind and deoptimize blocks shaped for this routine.
    ///
    /// The blocks are empty; the caller fills them once the call is emitted.
    pub fn divert_targets(&self, builder: &mut FunctionBuilder<'_>) -> DivertTargets {
        let unwind = builder.create_block();
        let deoptimize = builder.create_block();
        for ty in abi::result_types(self.descriptor, self.pointer_type) {
            builder.append_block_param(deoptimize, ty);
        }
        DivertTargets { unwind, deoptimize }
    }

    /// Emit a call to a routine that cannot divert.
    ///
    /// Nothing is emitted when the arguments do not match the descriptor or
    /// the routine can divert.
    pub fn emit_call(
        &self,
        builder: &mut FunctionBuilder<'_>,
        args: &[BridgeValue],
    ) -> Result<CallOutcome, CallBuildError> {
        self.check_args(args)?;
        if self.can_divert() {
            return Err(CallBuildError::DivertTargetsRequired(self.descriptor.name));
        }
        Ok(self.emit(builder, args, None))
    }

    /// Emit a call at the builder's current position, branching to
    /// `targets` when it diverts.
    ///
    /// On return the builder is positioned in a fresh block reached only
    /// when the service returned normally. Nothing is emitted when the
    /// arguments do not match the descriptor. Managed-heap arguments of a
    /// call that may collect are declared as needing stack maps. `targets`
    /// is unused for routines that cannot divert.
    pub fn emit_diverting_call(
        &self,
        builder: &mut FunctionBuilder<'_>,
        args: &[BridgeValue],
        targets: DivertTargets,
    ) -> Result<CallOutcome, CallBuildError> {
        self.check_args(args)?;
        Ok(self.emit(builder, args, Some(targets)))
    }

    fn emit(
        &self,
        builder: &mut FunctionBuilder<'_>,
        args: &[BridgeValue],
        targets: Option<DivertTargets>,
    ) -> CallOutcome {
        let mut relocatable_args = Vec::new();
        if self.descriptor.may_trigger_gc() {
            for (index, arg) in args.iter().enumerate() {
                if arg.ty.is_relocatable() {
                    builder.declare_value_needs_stack_map(arg.value);
                    relocatable_args.push(index);
                }
            }
        }

        let values: Vec<ir::Value> = args.iter().map(|arg| arg.value).collect();
        let sig_ref = builder.import_signature(self.signature());
        let callee = abi::emit_address(builder, self.address, self.pointer_type);
        let call = builder.ins().call_indirect(sig_ref, callee, &values);
        let mut results = builder.inst_results(call).to_vec();

        if self.can_divert() {
            if let (Some(status), Some(targets)) = (results.pop(), targets) {
                let returned = builder.create_block();
                let diverted = builder.create_block();
                builder.ins().brif(status, diverted, &[], returned, &[]);

                builder.switch_to_block(diverted);
                builder.seal_block(diverted);
                let unwinding = builder.ins().icmp_imm(IntCC::Equal, status, CallStatus::Unwind as i64);
                let deopt_args: Vec<BlockArg> = results.iter().map(|&value| BlockArg::Value(value)).collect();
                builder.ins().brif(unwinding, targets.unwind, &[], targets.deoptimize, &deopt_args);

                builder.switch_to_block(returned);
                builder.seal_block(returned);
            }
        }

        let result = results
            .first()
            .map(|&value| BridgeValue::new(value, self.descriptor.ret));

        CallOutcome {
            result,
            relocatable_args,
        }
    }
}
