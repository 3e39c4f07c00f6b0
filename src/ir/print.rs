//! Plain-text dump of the IR, LLVM-flavored. Used by diagnostics and by
//! tests that want to assert on whole functions at once.

use std::fmt;

use crate::ir::ir::{
    Attributes, BasicBlock, BinOpKind, Callee, FnDecl, GlobalInit, GlobalVar, Inst, InstKind,
    IrConst, IrFunction, IrModule, Linkage, Operand, Terminator, Visibility,
};

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(v) => write!(f, "%v{}", v.0),
            Operand::Const(c) => write!(f, "{c}"),
            Operand::Global(name) => write!(f, "@{name}"),
            Operand::Function(name) => write!(f, "@{name}"),
        }
    }
}

impl fmt::Display for IrConst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrConst::I8(x) => write!(f, "{x}"),
            IrConst::I16(x) => write!(f, "{x}"),
            IrConst::I32(x) => write!(f, "{x}"),
            IrConst::I64(x) => write!(f, "{x}"),
            IrConst::F32(x) => write!(f, "{x}"),
            IrConst::F64(x) => write!(f, "{x}"),
            IrConst::NullPtr => write!(f, "null"),
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            InstKind::Load { dest, ty, ptr } => write!(f, "%v{} = load {ty}, ptr {ptr}", dest.0),
            InstKind::Store { ty, value, ptr } => write!(f, "store {ty} {value}, ptr {ptr}"),
            InstKind::Call { dest, ret_ty, callee, args, .. } => {
                if let Some(dest) = dest {
                    write!(f, "%v{} = ", dest.0)?;
                }
                match callee {
                    Callee::Direct(name) => write!(f, "call {ret_ty} @{name}(")?,
                    Callee::Indirect(target) => write!(f, "call {ret_ty} {target}(")?,
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            InstKind::Gep { dest, base, offset } => {
                write!(f, "%v{} = getelementptr {base}, {offset}", dest.0)
            }
            InstKind::Bitcast { dest, ty, src } => {
                write!(f, "%v{} = bitcast {src} to {ty}", dest.0)
            }
            InstKind::BinOp { dest, op, ty, lhs, rhs } => {
                let name = match op {
                    BinOpKind::Add => "add",
                    BinOpKind::Sub => "sub",
                    BinOpKind::Mul => "mul",
                    BinOpKind::And => "and",
                    BinOpKind::Or => "or",
                    BinOpKind::CmpEq => "icmp eq",
                    BinOpKind::CmpNe => "icmp ne",
                };
                write!(f, "%v{} = {name} {ty} {lhs}, {rhs}", dest.0)
            }
            InstKind::Copy { dest, src } => write!(f, "%v{} = copy {src}", dest.0),
            InstKind::Phi { dest, ty, incoming } => {
                write!(f, "%v{} = phi {ty} ", dest.0)?;
                for (i, (op, label)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[ {op}, bb{} ]", label.0)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Branch(target) => write!(f, "br bb{}", target.0),
            Terminator::CondBranch { cond, true_label, false_label } => {
                write!(f, "br {cond}, bb{}, bb{}", true_label.0, false_label.0)
            }
            Terminator::Return(None) => write!(f, "ret void"),
            Terminator::Return(Some(op)) => write!(f, "ret {op}"),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "bb{}:", self.label.0)?;
        for inst in &self.instructions {
            writeln!(f, "  {inst}")?;
        }
        writeln!(f, "  {}", self.terminator)
    }
}

fn attr_suffix(attrs: Attributes) -> String {
    let mut out = String::new();
    if attrs.contains(Attributes::TRANSACTION_SAFE) {
        out.push_str(" transaction_safe");
    }
    if attrs.contains(Attributes::NOINLINE) {
        out.push_str(" noinline");
    }
    out
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "define {} @{}(", self.sig.ret, self.name)?;
        for (i, (ty, v)) in self.sig.params.iter().zip(&self.params).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{ty} %v{}", v.0)?;
        }
        writeln!(f, "){} {{", attr_suffix(self.attrs))?;
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for FnDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "declare {} @{}(", self.sig.ret, self.name)?;
        for (i, ty) in self.sig.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{ty}")?;
        }
        write!(f, "){}", attr_suffix(self.attrs))
    }
}

impl fmt::Display for GlobalVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let linkage = match self.linkage {
            Linkage::External => "external",
            Linkage::Internal => "internal",
            Linkage::LinkOnceAny => "linkonce",
        };
        write!(f, "@{} = {linkage}", self.name)?;
        if self.visibility == Visibility::Hidden {
            write!(f, " hidden")?;
        }
        match &self.init {
            GlobalInit::FunctionPtrArray(names) => {
                write!(f, " [")?;
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "ptr @{name}")?;
                }
                write!(f, "]")?;
            }
            GlobalInit::ZeroArray { len } => write!(f, " [{len} x ptr] zeroinitializer")?,
        }
        if let Some(section) = &self.section {
            write!(f, ", section \"{section}\"")?;
        }
        write!(f, ", align {}", self.align)
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for global in &self.globals {
            writeln!(f, "{global}")?;
        }
        for decl in &self.declarations {
            writeln!(f, "{decl}")?;
        }
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{func}")?;
        }
        if !self.used.is_empty() {
            writeln!(f)?;
            write!(f, "; used:")?;
            for name in &self.used {
                write!(f, " @{name}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
