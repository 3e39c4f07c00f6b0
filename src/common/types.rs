use std::fmt;

/// Element type of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VecElem {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl VecElem {
    pub fn bit_width(self) -> u32 {
        match self {
            VecElem::I8 => 8,
            VecElem::I16 => 16,
            VecElem::I32 => 32,
            VecElem::I64 => 64,
            VecElem::F32 => 32,
            VecElem::F64 => 64,
        }
    }

    fn name(self) -> &'static str {
        match self {
            VecElem::I8 => "i8",
            VecElem::I16 => "i16",
            VecElem::I32 => "i32",
            VecElem::I64 => "i64",
            VecElem::F32 => "float",
            VecElem::F64 => "double",
        }
    }
}

/// IR-level types. Pointers are untyped; vectors carry an element type and a
/// lane count so barrier dispatch can distinguish the 128- and 256-bit shapes
/// the runtime has entry points for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    I128,
    F32,
    F64,
    Ptr,
    /// Opaque 64-bit MMX register type. No barrier exists for it.
    Mmx,
    Vector { elem: VecElem, lanes: u8 },
    /// Fixed-size array of a scalar element. Whole-array loads and stores
    /// have no barrier and are reported as unsupported.
    Array { elem: VecElem, len: u32 },
}

impl IrType {
    /// Size in bytes on a 64-bit target.
    pub fn size(&self) -> usize {
        match self {
            IrType::Void => 0,
            IrType::I1 | IrType::I8 => 1,
            IrType::I16 => 2,
            IrType::I32 | IrType::F32 => 4,
            IrType::I64 | IrType::F64 | IrType::Ptr | IrType::Mmx => 8,
            IrType::I128 => 16,
            IrType::Vector { elem, lanes } => elem.bit_width() as usize / 8 * *lanes as usize,
            IrType::Array { elem, len } => elem.bit_width() as usize / 8 * *len as usize,
        }
    }

    /// Alignment in bytes on a 64-bit target.
    pub fn align(&self) -> usize {
        match self {
            IrType::Vector { .. } => self.size().min(32),
            IrType::Array { elem, .. } => elem.bit_width() as usize / 8,
            _ => self.size().max(1),
        }
    }

    /// Total width in bits, for types that have one.
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            IrType::Void => None,
            IrType::I1 => Some(1),
            IrType::I8 => Some(8),
            IrType::I16 => Some(16),
            IrType::I32 | IrType::F32 => Some(32),
            IrType::I64 | IrType::F64 | IrType::Ptr | IrType::Mmx => Some(64),
            IrType::I128 => Some(128),
            IrType::Vector { elem, lanes } => Some(elem.bit_width() * *lanes as u32),
            IrType::Array { elem, len } => Some(elem.bit_width() * len),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            IrType::I1 | IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64 | IrType::I128
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, IrType::Ptr)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, IrType::Void)
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::I1 => write!(f, "i1"),
            IrType::I8 => write!(f, "i8"),
            IrType::I16 => write!(f, "i16"),
            IrType::I32 => write!(f, "i32"),
            IrType::I64 => write!(f, "i64"),
            IrType::I128 => write!(f, "i128"),
            IrType::F32 => write!(f, "float"),
            IrType::F64 => write!(f, "double"),
            IrType::Ptr => write!(f, "ptr"),
            IrType::Mmx => write!(f, "x86_mmx"),
            IrType::Vector { elem, lanes } => write!(f, "<{} x {}>", lanes, elem.name()),
            IrType::Array { elem, len } => write!(f, "[{} x {}]", len, elem.name()),
        }
    }
}
