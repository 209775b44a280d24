//! Call descriptor table
//!
//! A [`RoutineDescriptor`] is one row of the fixed, build-time list of
//! routines generated code may call: its name, signature, classification and
//! the calling convention its callers use. The same row drives both the
//! signature declared inside generated code and stub synthesis.

use rustc_hash::FxHashMap;

use crate::error::RegistrationError;
use crate::types::TypeDescriptor;

/// How a call to a routine reaches its implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutineKind {
    /// Called through a synthesized stub that switches convention,
    /// materializes the thread context and marks the frame boundary
    StubMediated,
    /// Called at the service's own native address
    DirectNative,
    /// Hand-written routine that redirects control flow
    ControlTransfer,
}

impl std::fmt::Display for RoutineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutineKind::StubMediated => write!(f, "stub"),
            RoutineKind::DirectNative => write!(f, "direct"),
            RoutineKind::ControlTransfer => write!(f, "control"),
        }
    }
}

/// Calling convention used at a call boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    /// The code generator's own convention for calls between generated code
    Bridge,
    /// The platform C ABI expected by hand-written engine code
    Platform,
}

/// One routine callable from generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutineDescriptor {
    /// Unique routine name
    pub name: &'static str,
    /// Classification
    pub kind: RoutineKind,
    /// Return type (`Void` for none)
    pub ret: TypeDescriptor,
    /// Argument types as seen by generated code
    pub args: &'static [TypeDescriptor],
    /// Convention generated code uses when calling this routine
    pub convention: CallingConvention,
}

impl RoutineDescriptor {
    /// A routine reached through a convention-switching stub.
    ///
    /// The service behind it receives `args` followed by the thread context.
    pub const fn stub(
        name: &'static str,
        ret: TypeDescriptor,
        args: &'static [TypeDescriptor],
    ) -> Self {
        RoutineDescriptor {
            name,
            kind: RoutineKind::StubMediated,
            ret,
            args,
            convention: CallingConvention::Bridge,
        }
    }

    /// A routine called directly at its native address
    pub const fn direct(
        name: &'static str,
        ret: TypeDescriptor,
        args: &'static [TypeDescriptor],
    ) -> Self {
        RoutineDescriptor {
            name,
            kind: RoutineKind::DirectNative,
            ret,
            args,
            convention: CallingConvention::Platform,
        }
    }

    /// A control-transfer routine generated by the bridge itself
    pub const fn control(
        name: &'static str,
        ret: TypeDescriptor,
        args: &'static [TypeDescriptor],
    ) -> Self {
        RoutineDescriptor {
            name,
            kind: RoutineKind::ControlTransfer,
            ret,
            args,
            convention: CallingConvention::Platform,
        }
    }

    /// Whether calling this routine may run a garbage collection, making
    /// managed-heap values held by the caller stale
    pub fn may_trigger_gc(&self) -> bool {
        self.kind == RoutineKind::StubMediated
    }

    /// Whether a stub must bridge between the caller's convention and the
    /// platform convention of the implementation
    pub fn needs_convention_switch(&self) -> bool {
        self.convention != CallingConvention::Platform
    }

    /// Argument types of the native implementation, including the hidden
    /// thread-context argument stubs append
    pub fn service_args(&self) -> impl Iterator<Item = TypeDescriptor> + '_ {
        let hidden = match self.kind {
            RoutineKind::StubMediated => Some(TypeDescriptor::NATIVE_PTR),
            _ => None,
        };
        self.args.iter().copied().chain(hidden)
    }

    /// Check that the descriptor can be realised on any target
    pub fn validate(&self) -> Result<(), RegistrationError> {
        let invalid = |reason: String| RegistrationError::InvalidDescriptor {
            routine: self.name,
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("empty routine name".to_string()));
        }
        if let Some(index) = self.args.iter().position(|arg| arg.is_void()) {
            return Err(invalid(format!("argument {} is void", index)));
        }
        match (self.kind, self.convention) {
            (RoutineKind::StubMediated, CallingConvention::Bridge) => Ok(()),
            (RoutineKind::DirectNative | RoutineKind::ControlTransfer, CallingConvention::Platform) => Ok(()),
            (kind, convention) => Err(invalid(format!(
                "{} routines cannot be called with the {:?} convention",
                kind, convention
            ))),
        }
    }
}

impl std::fmt::Display for RoutineDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}(", self.kind, self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// A fixed list of routine descriptors indexed by name
#[derive(Debug, Clone)]
pub struct RoutineTable {
    routines: &'static [RoutineDescriptor],
    index: FxHashMap<&'static str, usize>,
}

impl RoutineTable {
    /// Build and validate a table.
    ///
    /// Fails on a malformed descriptor or a duplicate name.
    pub fn new(routines: &'static [RoutineDescriptor]) -> Result<Self, RegistrationError> {
        let table = Self::build(routines);
        table.validate()?;
        Ok(table)
    }

    /// Index a table without validating it; duplicates resolve to the first row
    pub(crate) fn build(routines: &'static [RoutineDescriptor]) -> Self {
        let mut index = FxHashMap::default();
        for (i, routine) in routines.iter().enumerate() {
            index.entry(routine.name).or_insert(i);
        }
        RoutineTable { routines, index }
    }

    /// Validate every descriptor and name uniqueness
    pub fn validate(&self) -> Result<(), RegistrationError> {
        if self.index.len() != self.routines.len() {
            let duplicate = self
                .routines
                .iter()
                .enumerate()
                .find(|(i, r)| self.index.get(r.name) != Some(i))
                .map(|(_, r)| r.name)
                .unwrap_or_default();
            return Err(RegistrationError::DuplicateRoutine(duplicate));
        }
        self.routines.iter().try_for_each(RoutineDescriptor::validate)
    }

    /// Descriptor for a routine name
    pub fn describe(&self, name: &str) -> Option<&'static RoutineDescriptor> {
        self.index_of(name).map(|i| &self.routines[i])
    }

    /// Dense index of a routine name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Descriptor at a dense index
    pub fn get(&self, index: usize) -> Option<&'static RoutineDescriptor> {
        self.routines.get(index)
    }

    /// All descriptors in table order
    pub fn iter(&self) -> impl Iterator<Item = &'static RoutineDescriptor> {
        self.routines.iter()
    }

    /// The underlying static rows
    pub fn routines(&self) -> &'static [RoutineDescriptor] {
        self.routines
    }

    /// Number of routines
    pub fn len(&self) -> usize {
        self.routines.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }
}
