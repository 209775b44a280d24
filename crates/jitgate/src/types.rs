//! Bridge type system
//!
//! Every value crossing the bridge is described by a [`TypeDescriptor`].
//! Pointer types carry an [`AddressSpace`] tag so the code generator knows
//! which pointers the garbage collector may move underneath it.

/// Heap a pointer value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    /// Collectable heap; objects may be relocated by the garbage collector.
    ManagedHeap,
    /// Native heap; addresses are stable for the allocation's lifetime.
    NativeHeap,
}

impl AddressSpace {
    /// Whether a pointer in this space must be re-derived after any call
    /// that can trigger a collection.
    pub fn is_relocatable(self) -> bool {
        matches!(self, AddressSpace::ManagedHeap)
    }
}

impl std::fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressSpace::ManagedHeap => write!(f, "managed"),
            AddressSpace::NativeHeap => write!(f, "native"),
        }
    }
}

/// Type of a routine argument or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// No value (return position only)
    Void,
    /// 8-bit integer
    I8,
    /// 16-bit integer
    I16,
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// Machine-word pointer into the given address space
    Ptr(AddressSpace),
}

impl TypeDescriptor {
    /// Pointer into the managed heap
    pub const MANAGED_PTR: TypeDescriptor = TypeDescriptor::Ptr(AddressSpace::ManagedHeap);
    /// Pointer into the native heap
    pub const NATIVE_PTR: TypeDescriptor = TypeDescriptor::Ptr(AddressSpace::NativeHeap);

    /// Every non-void descriptor, one per primitive and address space.
    pub const VALUE_TYPES: [TypeDescriptor; 8] = [
        TypeDescriptor::I8,
        TypeDescriptor::I16,
        TypeDescriptor::I32,
        TypeDescriptor::I64,
        TypeDescriptor::F32,
        TypeDescriptor::F64,
        TypeDescriptor::MANAGED_PTR,
        TypeDescriptor::NATIVE_PTR,
    ];

    /// Whether this is the void type
    pub fn is_void(self) -> bool {
        matches!(self, TypeDescriptor::Void)
    }

    /// Whether this is a pointer type
    pub fn is_pointer(self) -> bool {
        matches!(self, TypeDescriptor::Ptr(_))
    }

    /// Whether this is a floating-point type
    pub fn is_float(self) -> bool {
        matches!(self, TypeDescriptor::F32 | TypeDescriptor::F64)
    }

    /// Whether this integer is narrower than 32 bits and needs extension
    /// at a platform-ABI boundary
    pub fn is_narrow_int(self) -> bool {
        matches!(self, TypeDescriptor::I8 | TypeDescriptor::I16)
    }

    /// Address space of a pointer type, `None` for primitives
    pub fn address_space(self) -> Option<AddressSpace> {
        match self {
            TypeDescriptor::Ptr(space) => Some(space),
            _ => None,
        }
    }

    /// Whether a value of this type may be moved by a collection
    pub fn is_relocatable(self) -> bool {
        self.address_space().is_some_and(AddressSpace::is_relocatable)
    }

    /// Same kind of value, ignoring the address-space tag
    pub fn same_kind(self, other: TypeDescriptor) -> bool {
        match (self, other) {
            (TypeDescriptor::Ptr(_), TypeDescriptor::Ptr(_)) => true,
            (a, b) => a == b,
        }
    }
}

impl std::fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeDescriptor::Void => write!(f, "void"),
            TypeDescriptor::I8 => write!(f, "i8"),
            TypeDescriptor::I16 => write!(f, "i16"),
            TypeDescriptor::I32 => write!(f, "i32"),
            TypeDescriptor::I64 => write!(f, "i64"),
            TypeDescriptor::F32 => write!(f, "f32"),
            TypeDescriptor::F64 => write!(f, "f64"),
            TypeDescriptor::Ptr(space) => write!(f, "ptr({})", space),
        }
    }
}
