//! Cranelift code generation for bridge routines
//!
//! Synthesized stubs and control-transfer routines are built as Cranelift IR
//! and placed in executable memory owned by a `cranelift_jit::JITModule`.
//! Supports x86_64 and AArch64 targets.

pub mod abi;
pub mod control;
pub mod stub;
pub mod target;

use cranelift_codegen::ir::{self, Signature, UserFuncName};
use cranelift_codegen::isa::CallConv;
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};

use crate::error::RegistrationError;
use self::target::TargetPlatform;

/// Builds routines into a private JIT module
pub(crate) struct CodeEmitter {
    module: JITModule,
    ctx: Context,
    func_ctx: FunctionBuilderContext,
    pointer_type: ir::Type,
    platform_call_conv: CallConv,
    defined: u32,
}

impl CodeEmitter {
    pub(crate) fn new(target: &TargetPlatform) -> Self {
        let builder = JITBuilder::with_isa(target.owned_isa(), cranelift_module::default_libcall_names());
        let module = JITModule::new(builder);
        let ctx = module.make_context();
        CodeEmitter {
            module,
            ctx,
            func_ctx: FunctionBuilderContext::new(),
            pointer_type: target.pointer_type(),
            platform_call_conv: target.platform_call_conv(),
            defined: 0,
        }
    }

    pub(crate) fn pointer_type(&self) -> ir::Type {
        self.pointer_type
    }

    pub(crate) fn platform_call_conv(&self) -> CallConv {
        self.platform_call_conv
    }

    /// Build and compile one routine; `body` fills in the function and must
    /// leave every block terminated
    pub(crate) fn define(
        &mut self,
        routine: &'static str,
        signature: Signature,
        body: impl FnOnce(&mut FunctionBuilder<'_>),
    ) -> Result<FuncId, RegistrationError> {
        let codegen = |message: String| RegistrationError::Codegen { routine, message };

        let func_id = self
            .module
            .declare_function(routine, Linkage::Local, &signature)
            .map_err(|e| codegen(format!("Failed to declare function: {}", e)))?;

        self.ctx.func.signature = signature;
        self.ctx.func.name = UserFuncName::user(0, self.defined);
        {
            let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.func_ctx);
            body(&mut builder);
            builder.finalize();
        }

        let result = self
            .module
            .define_function(func_id, &mut self.ctx)
            .map_err(|e| codegen(format!("Cranelift compilation failed: {:?}", e)));
        self.module.clear_context(&mut self.ctx);
        result?;

        self.defined += 1;
        Ok(func_id)
    }

    /// Make every routine defined so far executable
    pub(crate) fn finalize(&mut self) -> Result<(), RegistrationError> {
        self.module
            .finalize_definitions()
            .map_err(|e| RegistrationError::Codegen {
                routine: "<finalize>",
                message: e.to_string(),
            })
    }

    /// Entry address of a finalized routine
    pub(crate) fn address(&self, func_id: FuncId) -> usize {
        self.module.get_finalized_function(func_id) as usize
    }

    pub(crate) fn into_memory(self) -> CodeMemory {
        CodeMemory {
            module: Some(self.module),
        }
    }
}

/// Executable memory holding synthesized routines.
///
/// Released when dropped; every address handed out by the owner must be
/// dead by then.
pub(crate) struct CodeMemory {
    module: Option<JITModule>,
}

impl Drop for CodeMemory {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: the owning registry is being dropped, and with it every
            // address it handed out.
            unsafe { module.free_memory() };
        }
    }
}

// The module is never touched after finalization; only the code it owns is
// shared, and that is immutable.
unsafe impl Send for CodeMemory {}
unsafe impl Sync for CodeMemory {}
