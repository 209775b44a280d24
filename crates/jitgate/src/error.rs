//! Bridge error types
//!
//! Three failure classes exist at this layer: a routine that cannot be
//! synthesized for the target (fatal at startup), a lookup of a routine the
//! registry does not know (fatal assertion), and a call assembled against a
//! descriptor with the wrong argument types (rejected before emission).
//! Diverted calls (pending exception, deoptimization) are not errors; they
//! reach the caller's unwind and deoptimize blocks.

use crate::types::{AddressSpace, TypeDescriptor};

/// A routine could not be registered for the target platform
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// The target architecture or its flags cannot host the bridge
    #[error("Unsupported target: {0}")]
    UnsupportedTarget(String),
    /// The supplied data layout disagrees with the target ISA
    #[error("Data layout mismatch: expected {expected}-byte pointers, target uses {found}")]
    DataLayoutMismatch {
        /// Pointer width the data layout declared
        expected: u8,
        /// Pointer width of the target ISA
        found: u8,
    },
    /// The engine did not supply an entry address for a routine
    #[error("No native service registered for routine '{0}'")]
    MissingService(&'static str),
    /// A descriptor is malformed (void argument, wrong convention, ...)
    #[error("Invalid descriptor for routine '{routine}': {reason}")]
    InvalidDescriptor {
        /// Routine name
        routine: &'static str,
        /// What is wrong with it
        reason: String,
    },
    /// Two descriptors share a name
    #[error("Duplicate runtime routine '{0}'")]
    DuplicateRoutine(&'static str),
    /// Cranelift rejected the synthesized code
    #[error("Code generation failed for routine '{routine}': {message}")]
    Codegen {
        /// Routine name
        routine: &'static str,
        /// Backend diagnostic
        message: String,
    },
}

/// A routine name is absent from the registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// No routine with this name was generated
    #[error("invalid runtime routine: {0}")]
    UnknownRoutine(String),
}

/// A call could not be assembled against a routine descriptor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallBuildError {
    /// Wrong number of arguments
    #[error("Routine '{routine}' takes {expected} arguments, got {found}")]
    ArityMismatch {
        /// Routine name
        routine: &'static str,
        /// Declared argument count
        expected: usize,
        /// Supplied argument count
        found: usize,
    },
    /// Argument is of the wrong primitive kind
    #[error("Routine '{routine}' argument {index}: expected {expected}, got {found}")]
    TypeMismatch {
        /// Routine name
        routine: &'static str,
        /// Argument position
        index: usize,
        /// Declared type
        expected: TypeDescriptor,
        /// Supplied type
        found: TypeDescriptor,
    },
    /// Pointer argument tagged with the wrong address space
    #[error("Routine '{routine}' argument {index}: expected {expected} heap pointer, got {found} heap pointer")]
    AddressSpaceMismatch {
        /// Routine name
        routine: &'static str,
        /// Argument position
        index: usize,
        /// Declared address space
        expected: AddressSpace,
        /// Supplied address space
        found: AddressSpace,
    },
    /// A void-typed value was supplied as an argument
    #[error("Routine '{routine}' argument {index} is void")]
    VoidArgument {
        /// Routine name
        routine: &'static str,
        /// Argument position
        index: usize,
    },
    /// A call that can divert was emitted without unwind and deoptimize targets
    #[error("Routine '{0}' can divert and needs unwind and deoptimize targets")]
    DivertTargetsRequired(&'static str),
}

/// Exception metadata could not be registered
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExceptionTableError {
    /// Range is empty or inverted
    #[error("Empty code range [{start:#x}, {end:#x})")]
    EmptyRange {
        /// Range start
        start: usize,
        /// Range end
        end: usize,
    },
    /// Range overlaps an already registered one
    #[error("Code range [{start:#x}, {end:#x}) overlaps an existing handler range")]
    OverlappingRange {
        /// Range start
        start: usize,
        /// Range end
        end: usize,
    },
}
