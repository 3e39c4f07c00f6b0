//! The SSA IR the transactification pipeline operates on.
//!
//! Functions own a flat `Vec<BasicBlock>`; blocks own their instructions and
//! a separate terminator. Values, blocks, and instructions are small integer
//! ids scoped to their function, so handles stay valid across the heavy
//! block surgery the passes perform (splitting, cloning, in-place
//! replacement). Modules additionally own external declarations and global
//! variables, which is where the clone table lives.

use bitflags::bitflags;

use crate::common::fx_hash::FxHashMap;
use crate::common::types::IrType;

/// An SSA value id, scoped to its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub u32);

/// A basic-block label, scoped to its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// A stable instruction id, scoped to its function. Survives block splits
/// and instruction insertion; cloning allocates fresh ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

bitflags! {
    /// Function and call-site attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Attributes: u32 {
        /// Callable from inside a transaction; gets a transactional clone.
        const TRANSACTION_SAFE = 1 << 0;
        /// Never inlined. Carried by every runtime barrier declaration.
        const NOINLINE = 1 << 1;
    }
}

/// Constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IrConst {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    NullPtr,
}

/// An instruction or terminator operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Const(IrConst),
    /// Address of a module global, by name.
    Global(String),
    /// Address of a function, by name.
    Function(String),
}

/// The target of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// Direct call to a named function or declaration.
    Direct(String),
    /// Indirect call through a pointer value.
    Indirect(Operand),
}

/// Binary operations. Only what the passes and their tests need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    And,
    Or,
    CmpEq,
    CmpNe,
}

/// An instruction body.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Load {
        dest: Value,
        ty: IrType,
        ptr: Operand,
    },
    Store {
        ty: IrType,
        value: Operand,
        ptr: Operand,
    },
    Call {
        dest: Option<Value>,
        ret_ty: IrType,
        callee: Callee,
        args: Vec<Operand>,
        attrs: Attributes,
    },
    /// Pointer arithmetic off a base pointer.
    Gep {
        dest: Value,
        base: Operand,
        offset: Operand,
    },
    Bitcast {
        dest: Value,
        ty: IrType,
        src: Operand,
    },
    BinOp {
        dest: Value,
        op: BinOpKind,
        ty: IrType,
        lhs: Operand,
        rhs: Operand,
    },
    Copy {
        dest: Value,
        src: Operand,
    },
    Phi {
        dest: Value,
        ty: IrType,
        incoming: Vec<(Operand, BlockId)>,
    },
}

impl InstKind {
    /// The value this instruction defines, if any.
    pub fn dest(&self) -> Option<Value> {
        match self {
            InstKind::Load { dest, .. }
            | InstKind::Gep { dest, .. }
            | InstKind::Bitcast { dest, .. }
            | InstKind::BinOp { dest, .. }
            | InstKind::Copy { dest, .. }
            | InstKind::Phi { dest, .. } => Some(*dest),
            InstKind::Call { dest, .. } => *dest,
            InstKind::Store { .. } => None,
        }
    }

    /// Visit every operand. Phi incoming values are operands; their source
    /// labels are not (see `for_each_operand_mut` users that remap labels
    /// separately).
    pub fn for_each_operand(&self, mut f: impl FnMut(&Operand)) {
        match self {
            InstKind::Load { ptr, .. } => f(ptr),
            InstKind::Store { value, ptr, .. } => {
                f(value);
                f(ptr);
            }
            InstKind::Call { callee, args, .. } => {
                if let Callee::Indirect(target) = callee {
                    f(target);
                }
                for arg in args {
                    f(arg);
                }
            }
            InstKind::Gep { base, offset, .. } => {
                f(base);
                f(offset);
            }
            InstKind::Bitcast { src, .. } => f(src),
            InstKind::BinOp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Copy { src, .. } => f(src),
            InstKind::Phi { incoming, .. } => {
                for (op, _) in incoming {
                    f(op);
                }
            }
        }
    }

    /// Visit every operand mutably.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Operand)) {
        match self {
            InstKind::Load { ptr, .. } => f(ptr),
            InstKind::Store { value, ptr, .. } => {
                f(value);
                f(ptr);
            }
            InstKind::Call { callee, args, .. } => {
                if let Callee::Indirect(target) = callee {
                    f(target);
                }
                for arg in args {
                    f(arg);
                }
            }
            InstKind::Gep { base, offset, .. } => {
                f(base);
                f(offset);
            }
            InstKind::Bitcast { src, .. } => f(src),
            InstKind::BinOp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Copy { src, .. } => f(src),
            InstKind::Phi { incoming, .. } => {
                for (op, _) in incoming {
                    f(op);
                }
            }
        }
    }
}

/// An instruction: a stable id plus its body.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub id: InstId,
    pub kind: InstKind,
}

/// Block terminators. The "first successor" of a terminator is the
/// fall-through / taken edge: the sole target of `Branch`, the true edge of
/// `CondBranch`.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Branch(BlockId),
    CondBranch {
        cond: Operand,
        true_label: BlockId,
        false_label: BlockId,
    },
    Return(Option<Operand>),
    Unreachable,
}

impl Terminator {
    pub fn for_each_operand(&self, mut f: impl FnMut(&Operand)) {
        match self {
            Terminator::CondBranch { cond, .. } => f(cond),
            Terminator::Return(Some(op)) => f(op),
            _ => {}
        }
    }

    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Operand)) {
        match self {
            Terminator::CondBranch { cond, .. } => f(cond),
            Terminator::Return(Some(op)) => f(op),
            _ => {}
        }
    }
}

/// A basic block: label, instructions in order, terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub label: BlockId,
    pub instructions: Vec<Inst>,
    pub terminator: Terminator,
}

/// A function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnSig {
    pub ret: IrType,
    pub params: Vec<IrType>,
    pub variadic: bool,
}

impl FnSig {
    pub fn new(ret: IrType, params: Vec<IrType>) -> Self {
        Self { ret, params, variadic: false }
    }
}

/// A function with a body.
#[derive(Debug, Clone)]
pub struct IrFunction {
    pub name: String,
    pub sig: FnSig,
    /// Values bound to the parameters, in signature order.
    pub params: Vec<Value>,
    pub attrs: Attributes,
    pub blocks: Vec<BasicBlock>,
    next_value: u32,
    next_block: u32,
    next_inst: u32,
}

impl IrFunction {
    pub fn new(name: impl Into<String>, sig: FnSig) -> Self {
        let mut func = Self {
            name: name.into(),
            sig,
            params: Vec::new(),
            attrs: Attributes::empty(),
            blocks: Vec::new(),
            next_value: 0,
            next_block: 0,
            next_inst: 0,
        };
        for _ in 0..func.sig.params.len() {
            let v = func.fresh_value();
            func.params.push(v);
        }
        func
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn fresh_value(&mut self) -> Value {
        let v = Value(self.next_value);
        self.next_value += 1;
        v
    }

    fn fresh_inst_id(&mut self) -> InstId {
        let id = InstId(self.next_inst);
        self.next_inst += 1;
        id
    }

    /// Append a new empty block (terminated by `Unreachable` until a real
    /// terminator is set) and return its label.
    pub fn add_block(&mut self) -> BlockId {
        let label = BlockId(self.next_block);
        self.next_block += 1;
        self.blocks.push(BasicBlock {
            label,
            instructions: Vec::new(),
            terminator: Terminator::Unreachable,
        });
        label
    }

    /// Wrap an instruction body in a fresh id without attaching it to a
    /// block. Used when edits splice instructions in by hand.
    pub fn make_inst(&mut self, kind: InstKind) -> Inst {
        Inst { id: self.fresh_inst_id(), kind }
    }

    /// Append an instruction to `block`.
    pub fn push(&mut self, block: BlockId, kind: InstKind) -> InstId {
        let inst = self.make_inst(kind);
        let id = inst.id;
        self.block_mut(block).instructions.push(inst);
        id
    }

    pub fn set_terminator(&mut self, block: BlockId, term: Terminator) {
        self.block_mut(block).terminator = term;
    }

    pub fn block_index(&self, label: BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    pub fn block(&self, label: BlockId) -> &BasicBlock {
        self.blocks.iter().find(|b| b.label == label).expect("unknown block label")
    }

    pub fn block_mut(&mut self, label: BlockId) -> &mut BasicBlock {
        self.blocks.iter_mut().find(|b| b.label == label).expect("unknown block label")
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.blocks.first().map(|b| b.label)
    }

    /// Split `block` immediately before the instruction at `at`. The new
    /// block inherits the instructions from `at` onward plus the original
    /// terminator; the original block is re-terminated with a branch to the
    /// new block. Returns the new block's label.
    pub fn split_block_before(&mut self, block: BlockId, at: usize) -> BlockId {
        let new_label = BlockId(self.next_block);
        self.next_block += 1;

        let idx = self.block_index(block).expect("unknown block label");
        let tail_insts = self.blocks[idx].instructions.split_off(at);
        let tail_term =
            std::mem::replace(&mut self.blocks[idx].terminator, Terminator::Branch(new_label));

        // Insert right after the split block to keep layout order readable.
        self.blocks.insert(
            idx + 1,
            BasicBlock { label: new_label, instructions: tail_insts, terminator: tail_term },
        );
        new_label
    }

    /// Find an instruction by id.
    pub fn find_inst(&self, id: InstId) -> Option<(&BasicBlock, usize)> {
        for block in &self.blocks {
            if let Some(pos) = block.instructions.iter().position(|i| i.id == id) {
                return Some((block, pos));
            }
        }
        None
    }

    /// Erase an instruction by id. Returns true if it existed.
    pub fn erase_inst(&mut self, id: InstId) -> bool {
        for block in &mut self.blocks {
            if let Some(pos) = block.instructions.iter().position(|i| i.id == id) {
                block.instructions.remove(pos);
                return true;
            }
        }
        false
    }

    /// Replace every use of `old` with `new` across the function body,
    /// including phi operands and terminator operands.
    pub fn replace_all_uses_with(&mut self, old: Value, new: Value) {
        let rewrite = |op: &mut Operand| {
            if *op == Operand::Value(old) {
                *op = Operand::Value(new);
            }
        };
        for block in &mut self.blocks {
            for inst in &mut block.instructions {
                inst.kind.for_each_operand_mut(rewrite);
            }
            block.terminator.for_each_operand_mut(rewrite);
        }
    }

    /// Map each value to the instructions that use it as an operand, in
    /// layout order.
    pub fn value_users(&self) -> FxHashMap<Value, Vec<InstId>> {
        let mut users: FxHashMap<Value, Vec<InstId>> = FxHashMap::default();
        for block in &self.blocks {
            for inst in &block.instructions {
                inst.kind.for_each_operand(|op| {
                    if let Operand::Value(v) = op {
                        users.entry(*v).or_default().push(inst.id);
                    }
                });
            }
        }
        users
    }
}

/// Linkage of a module global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    External,
    Internal,
    /// Mergeable across translation units; one copy survives linking.
    LinkOnceAny,
}

/// Symbol visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Default,
    Hidden,
}

/// Initializer of a module global.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    /// An array of function addresses, by name.
    FunctionPtrArray(Vec<String>),
    /// A zero-initialized array of `len` pointer-sized slots.
    ZeroArray { len: u32 },
}

/// A module-level global variable.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVar {
    pub name: String,
    pub section: Option<String>,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub align: u32,
    pub init: GlobalInit,
}

/// An external function declaration (no body).
#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub name: String,
    pub sig: FnSig,
    pub attrs: Attributes,
}

/// A module: functions with bodies, external declarations, globals, and the
/// `used` list that pins globals against linker garbage collection.
#[derive(Debug, Clone, Default)]
pub struct IrModule {
    pub functions: Vec<IrFunction>,
    pub declarations: Vec<FnDecl>,
    pub globals: Vec<GlobalVar>,
    pub used: Vec<String>,
}

impl IrModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut IrFunction> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn declaration(&self, name: &str) -> Option<&FnDecl> {
        self.declarations.iter().find(|d| d.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalVar> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// The signature and attributes of a named symbol, defined or declared.
    pub fn signature_of(&self, name: &str) -> Option<(&FnSig, Attributes)> {
        if let Some(f) = self.function(name) {
            return Some((&f.sig, f.attrs));
        }
        self.declaration(name).map(|d| (&d.sig, d.attrs))
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.signature_of(name).is_some()
    }

    pub fn add_used(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.used.contains(&name) {
            self.used.push(name);
        }
    }
}

/// Get or insert an external declaration into a declaration list. Returns
/// false when a declaration with the same name but a different signature is
/// already present (the existing declaration is left alone).
pub fn get_or_insert_declaration(
    declarations: &mut Vec<FnDecl>,
    name: &str,
    sig: FnSig,
    attrs: Attributes,
) -> bool {
    if let Some(existing) = declarations.iter().find(|d| d.name == name) {
        return existing.sig == sig;
    }
    declarations.push(FnDecl { name: name.to_string(), sig, attrs });
    true
}
