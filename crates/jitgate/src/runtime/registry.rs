//! Routine registry
//!
//! Built by a single generation pass at engine startup, then shared
//! read-only with every compilation worker. Maps routine names to entry
//! addresses: the synthesized stub for stub-mediated routines, the service
//! itself for direct routines, and the bridge's own code for control
//! transfer.

use cranelift_codegen::ir;
use cranelift_codegen::isa::CallConv;
use cranelift_jit::JITBuilder;
use cranelift_module::FuncId;

use super::services::{NativeServices, CURRENT_THREAD_SERVICE};
use super::trampoline::current_thread;
use crate::backend::target::{DataLayout, TargetPlatform};
use crate::backend::{control, stub::StubGenerator, CodeEmitter, CodeMemory};
use crate::callee::RoutineCallee;
use crate::config::{BridgeConfig, ContextSource};
use crate::descriptor::{RoutineDescriptor, RoutineKind, RoutineTable};
use crate::error::{LookupError, RegistrationError};
use crate::routines::{standard_table, EXCEPTIONAL_RETURN};

/// Entry addresses of every routine in a table
pub struct RoutineRegistry {
    table: RoutineTable,
    /// Entry addresses in table order
    addresses: Vec<usize>,
    pointer_type: ir::Type,
    platform_call_conv: CallConv,
    /// Owns the stubs and `exceptional_return`
    _code: CodeMemory,
}

impl RoutineRegistry {
    /// Generate every routine of the standard table
    pub fn generate(
        target: &TargetPlatform,
        layout: DataLayout,
        services: &NativeServices,
        config: &BridgeConfig,
    ) -> Result<Self, RegistrationError> {
        Self::generate_table(standard_table(), target, layout, services, config)
    }

    /// Generate every routine of `table`.
    ///
    /// Either every routine is installed or none is.
    pub fn generate_table(
        table: &RoutineTable,
        target: &TargetPlatform,
        layout: DataLayout,
        services: &NativeServices,
        config: &BridgeConfig,
    ) -> Result<Self, RegistrationError> {
        layout.check(target)?;
        table.validate()?;

        let accessor = match config.context_source {
            ContextSource::ThreadLocal => current_thread as *const () as usize,
            ContextSource::EngineAccessor => services.require(CURRENT_THREAD_SERVICE)?,
        };

        let mut emitter = CodeEmitter::new(target);

        // Stubs embed the address of exceptional_return, so it is finalized first
        let handler = control::exception_handler_address();
        let exceptional_return = control::emit_exceptional_return(&mut emitter, handler)?;
        emitter.finalize()?;
        let exceptional_return = emitter.address(exceptional_return);

        let stubs = StubGenerator::new(accessor, exceptional_return);
        let mut addresses = vec![0usize; table.len()];
        let mut pending: Vec<(usize, FuncId)> = Vec::new();
        for (i, routine) in table.iter().enumerate() {
            match routine.kind {
                RoutineKind::StubMediated => {
                    let service = services.require(routine.name)?;
                    pending.push((i, stubs.emit(&mut emitter, routine, service)?));
                }
                RoutineKind::DirectNative => {
                    addresses[i] = services.require(routine.name)?;
                }
                RoutineKind::ControlTransfer => {
                    control::check_descriptor(routine)?;
                    addresses[i] = if routine.name == EXCEPTIONAL_RETURN {
                        exceptional_return
                    } else {
                        handler
                    };
                }
            }
        }

        emitter.finalize()?;
        for (i, func_id) in pending {
            addresses[i] = emitter.address(func_id);
        }

        for (routine, &address) in table.iter().zip(&addresses) {
            tracing::debug!(
                routine = routine.name,
                kind = %routine.kind,
                address = ?(address as *const u8),
                "installed runtime routine"
            );
        }
        tracing::info!(
            routines = table.len(),
            stubs = table.iter().filter(|r| r.kind == RoutineKind::StubMediated).count(),
            arch = ?target.arch(),
            "runtime routines generated"
        );

        Ok(RoutineRegistry {
            table: table.clone(),
            addresses,
            pointer_type: target.pointer_type(),
            platform_call_conv: target.platform_call_conv(),
            _code: emitter.into_memory(),
        })
    }

    /// [`generate`](Self::generate) for embedders that only need to know
    /// whether the bridge is usable; the error is logged.
    pub fn generate_ok(
        target: &TargetPlatform,
        layout: DataLayout,
        services: &NativeServices,
        config: &BridgeConfig,
    ) -> Option<Self> {
        match Self::generate(target, layout, services, config) {
            Ok(registry) => Some(registry),
            Err(e) => {
                tracing::error!(error = %e, "runtime routine generation failed");
                None
            }
        }
    }

    /// Entry address of `name`.
    ///
    /// # Panics
    /// Panics if no routine of that name was generated; callers only ask
    /// for names from the table they generated.
    pub fn lookup(&self, name: &str) -> usize {
        match self.try_lookup(name) {
            Ok(address) => address,
            Err(e) => panic!("{}", e),
        }
    }

    /// Entry address of `name`, or an error if it is unknown
    pub fn try_lookup(&self, name: &str) -> Result<usize, LookupError> {
        self.table
            .index_of(name)
            .map(|i| self.addresses[i])
            .ok_or_else(|| LookupError::UnknownRoutine(name.to_string()))
    }

    /// Typed call handle for `name`
    pub fn callee(&self, name: &str) -> Result<RoutineCallee, LookupError> {
        let i = self
            .table
            .index_of(name)
            .ok_or_else(|| LookupError::UnknownRoutine(name.to_string()))?;
        Ok(RoutineCallee::new(
            &self.table.routines()[i],
            self.addresses[i],
            self.pointer_type,
            self.platform_call_conv,
        ))
    }

    /// Expose every routine to `builder` as a named symbol, so modules built
    /// with it can import routines with `Linkage::Import`
    pub fn install_symbols(&self, builder: &mut JITBuilder) {
        for (routine, &address) in self.table.iter().zip(&self.addresses) {
            builder.symbol(routine.name, address as *const u8);
        }
    }

    /// Every routine with its entry address, in table order
    pub fn iter(&self) -> impl Iterator<Item = (&'static RoutineDescriptor, usize)> + '_ {
        self.table.iter().zip(self.addresses.iter().copied())
    }

    /// Number of routines
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Whether the registry holds no routine
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl std::fmt::Debug for RoutineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutineRegistry")
            .field("count", &self.addresses.len())
            .finish()
    }
}
