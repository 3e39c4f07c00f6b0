//! The GNU Transactional Memory runtime ABI surface: sentinel intrinsic
//! names the front end emits, the clone-table layout the runtime scans, and
//! the typed barrier entry points with their signatures.
//!
//! Barrier names follow the ITM scheme: prefix `_ITM_`, then `R`/`W`/`L`
//! for read/write/log, then a type suffix (`U1`..`U8` for integer widths,
//! `F`/`D` for float/double, `M128*`/`M256*` for the vector shapes).

use crate::common::types::{IrType, VecElem};
use crate::ir::ir::{FnSig, InstKind, Callee};

// Sentinels emitted by the front end around each atomic region.
pub const TX_BEGIN: &str = "_ITM_beginTransaction";
pub const TX_COMMIT: &str = "_ITM_commitTransaction";
pub const FAST_PATH_BEGIN: &str = "__begin_tm_fast_path";
pub const FAST_PATH_END: &str = "__end_tm_fast_path";
pub const SLOW_PATH_BEGIN: &str = "__begin_tm_slow_path";
pub const SLOW_PATH_END: &str = "__end_tm_slow_path";

// Transactional clone naming and the runtime discovery table.
pub const CLONE_PREFIX: &str = "__transactional_clone.";
pub const CLONE_TABLE: &str = "__TMC_LIST__";
pub const CLONE_TABLE_END: &str = "__TMC_END__";
pub const CLONE_TABLE_SECTION: &str = ".tm_clone_table";

// Runtime entry points with fixed names.
pub const GET_TM_CLONE_SAFE: &str = "_ITM_getTMCloneSafe";
pub const ITM_MALLOC: &str = "_ITM_malloc";
pub const ITM_CALLOC: &str = "_ITM_calloc";
pub const ITM_FREE: &str = "_ITM_free";
pub const ITM_MEMCPY: &str = "_ITM_memcpy";
pub const ITM_MEMMOVE: &str = "_ITM_memmove";
pub const ITM_MEMSET: &str = "_ITM_memset";
pub const ITM_LOG_BYTES: &str = "_ITM_LB";

/// The region-boundary sentinels recognised by the scanner and erased by
/// cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    TxBegin,
    TxCommit,
    FastPathBegin,
    FastPathEnd,
    SlowPathBegin,
    SlowPathEnd,
}

impl Sentinel {
    pub fn from_name(name: &str) -> Option<Sentinel> {
        match name {
            TX_BEGIN => Some(Sentinel::TxBegin),
            TX_COMMIT => Some(Sentinel::TxCommit),
            FAST_PATH_BEGIN => Some(Sentinel::FastPathBegin),
            FAST_PATH_END => Some(Sentinel::FastPathEnd),
            SLOW_PATH_BEGIN => Some(Sentinel::SlowPathBegin),
            SLOW_PATH_END => Some(Sentinel::SlowPathEnd),
            _ => None,
        }
    }

    /// The four path-boundary sentinels removed by cleanup. The transaction
    /// begin/commit calls are real runtime entry points and survive.
    pub fn is_path_boundary(self) -> bool {
        matches!(
            self,
            Sentinel::FastPathBegin
                | Sentinel::FastPathEnd
                | Sentinel::SlowPathBegin
                | Sentinel::SlowPathEnd
        )
    }
}

/// The sentinel a direct call targets, if any.
pub fn call_sentinel(kind: &InstKind) -> Option<Sentinel> {
    if let InstKind::Call { callee: Callee::Direct(name), .. } = kind {
        return Sentinel::from_name(name);
    }
    None
}

/// The transactional clone name for a function.
pub fn clone_name(original: &str) -> String {
    format!("{CLONE_PREFIX}{original}")
}

pub fn is_clone_name(name: &str) -> bool {
    name.starts_with(CLONE_PREFIX)
}

/// Allocator call targets the locality analysis classifies. Intrinsic
/// variants keep the libc name somewhere inside theirs.
pub fn is_allocator_name(name: &str) -> bool {
    name == "malloc" || name == "calloc" || name.contains("malloc") || name.contains("calloc")
}

/// Closed set of types the runtime has typed barriers for. Pointers load
/// and store through the 64-bit integer entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    U1,
    U2,
    U4,
    U8,
    F,
    D,
    /// 128-bit vector of f32.
    M128,
    /// 128-bit vector of i32.
    M128i,
    /// 128-bit vector of i64.
    M128ii,
    /// 128-bit vector of f64.
    M128d,
    /// 256-bit vector of f32.
    M256,
    /// 256-bit vector of i32.
    M256i,
    /// 256-bit vector of i64.
    M256ii,
    /// 256-bit vector of f64.
    M256d,
}

impl TypeCategory {
    /// Classify a load/store value type. `Err` carries the type back for
    /// the `UnsupportedType` diagnostic.
    pub fn of(ty: IrType) -> Result<TypeCategory, IrType> {
        match ty {
            IrType::I8 => Ok(TypeCategory::U1),
            IrType::I16 => Ok(TypeCategory::U2),
            IrType::I32 => Ok(TypeCategory::U4),
            IrType::I64 | IrType::Ptr => Ok(TypeCategory::U8),
            IrType::F32 => Ok(TypeCategory::F),
            IrType::F64 => Ok(TypeCategory::D),
            IrType::Vector { elem, lanes } => {
                match (elem, elem.bit_width() * lanes as u32) {
                    (VecElem::F32, 128) => Ok(TypeCategory::M128),
                    (VecElem::I32, 128) => Ok(TypeCategory::M128i),
                    (VecElem::I64, 128) => Ok(TypeCategory::M128ii),
                    (VecElem::F64, 128) => Ok(TypeCategory::M128d),
                    (VecElem::F32, 256) => Ok(TypeCategory::M256),
                    (VecElem::I32, 256) => Ok(TypeCategory::M256i),
                    (VecElem::I64, 256) => Ok(TypeCategory::M256ii),
                    (VecElem::F64, 256) => Ok(TypeCategory::M256d),
                    _ => Err(ty),
                }
            }
            _ => Err(ty),
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            TypeCategory::U1 => "U1",
            TypeCategory::U2 => "U2",
            TypeCategory::U4 => "U4",
            TypeCategory::U8 => "U8",
            TypeCategory::F => "F",
            TypeCategory::D => "D",
            TypeCategory::M128 => "M128",
            TypeCategory::M128i => "M128i",
            TypeCategory::M128ii => "M128ii",
            TypeCategory::M128d => "M128d",
            TypeCategory::M256 => "M256",
            TypeCategory::M256i => "M256i",
            TypeCategory::M256ii => "M256ii",
            TypeCategory::M256d => "M256d",
        }
    }

    /// The value type the barrier traffics in. Pointer loads/stores go
    /// through the 64-bit integer barriers.
    pub fn value_type(self) -> IrType {
        match self {
            TypeCategory::U1 => IrType::I8,
            TypeCategory::U2 => IrType::I16,
            TypeCategory::U4 => IrType::I32,
            TypeCategory::U8 => IrType::I64,
            TypeCategory::F => IrType::F32,
            TypeCategory::D => IrType::F64,
            TypeCategory::M128 => IrType::Vector { elem: VecElem::F32, lanes: 4 },
            TypeCategory::M128i => IrType::Vector { elem: VecElem::I32, lanes: 4 },
            TypeCategory::M128ii => IrType::Vector { elem: VecElem::I64, lanes: 2 },
            TypeCategory::M128d => IrType::Vector { elem: VecElem::F64, lanes: 2 },
            TypeCategory::M256 => IrType::Vector { elem: VecElem::F32, lanes: 8 },
            TypeCategory::M256i => IrType::Vector { elem: VecElem::I32, lanes: 8 },
            TypeCategory::M256ii => IrType::Vector { elem: VecElem::I64, lanes: 4 },
            TypeCategory::M256d => IrType::Vector { elem: VecElem::F64, lanes: 4 },
        }
    }

    /// `T _ITM_R<suffix>(const T*)`
    pub fn read_barrier(self) -> String {
        format!("_ITM_R{}", self.suffix())
    }

    /// `void _ITM_W<suffix>(T*, T)`
    pub fn write_barrier(self) -> String {
        format!("_ITM_W{}", self.suffix())
    }

    /// `void _ITM_L<suffix>(const T*)`
    pub fn log_barrier(self) -> String {
        format!("_ITM_L{}", self.suffix())
    }

    pub fn read_sig(self) -> FnSig {
        FnSig::new(self.value_type(), vec![IrType::Ptr])
    }

    pub fn write_sig(self) -> FnSig {
        FnSig::new(IrType::Void, vec![IrType::Ptr, self.value_type()])
    }

    pub fn log_sig(self) -> FnSig {
        FnSig::new(IrType::Void, vec![IrType::Ptr])
    }
}

pub fn log_bytes_sig() -> FnSig {
    FnSig::new(IrType::Void, vec![IrType::Ptr, IrType::I64])
}

pub fn memcpy_sig() -> FnSig {
    FnSig::new(IrType::Void, vec![IrType::Ptr, IrType::Ptr, IrType::I64])
}

pub fn memmove_sig() -> FnSig {
    memcpy_sig()
}

pub fn memset_sig() -> FnSig {
    FnSig::new(IrType::Void, vec![IrType::Ptr, IrType::I32, IrType::I64])
}

pub fn malloc_sig() -> FnSig {
    FnSig::new(IrType::Ptr, vec![IrType::I64])
}

pub fn calloc_sig() -> FnSig {
    FnSig::new(IrType::Ptr, vec![IrType::I64, IrType::I64])
}

pub fn free_sig() -> FnSig {
    FnSig::new(IrType::Void, vec![IrType::Ptr])
}

pub fn get_tm_clone_safe_sig() -> FnSig {
    FnSig::new(IrType::Ptr, vec![IrType::Ptr])
}
