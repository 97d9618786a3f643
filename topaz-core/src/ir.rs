//! Lowered program representation.
//!
//! A [`Module`] is what the backends consume: global storage slots,
//! string constants, and functions. Each function owns exactly one
//! basic block. Variables live in addressable slots (globals or
//! function-local allocas); every intermediate result is a numbered
//! temporary with a fixed machine type.

use std::fmt;

use crate::span::SourceId;
use crate::types::TypeKind;
use crate::value::Value;

/// Machine-level type of a slot, temporary or constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Address of a string constant.
    Ptr,
    Void,
}

impl IrType {
    pub fn from_kind(kind: TypeKind) -> Self {
        match kind {
            TypeKind::Bool => IrType::I1,
            TypeKind::Char => IrType::I8,
            TypeKind::Short => IrType::I16,
            TypeKind::Int => IrType::I32,
            TypeKind::Long => IrType::I64,
            TypeKind::Float => IrType::F32,
            TypeKind::Double => IrType::F64,
            TypeKind::StringLiteral => IrType::Ptr,
            TypeKind::Noth => IrType::Void,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }

    pub fn bits(self) -> u32 {
        match self {
            IrType::I1 => 1,
            IrType::I8 => 8,
            IrType::I16 => 16,
            IrType::I32 | IrType::F32 | IrType::Ptr => 32,
            IrType::I64 | IrType::F64 => 64,
            IrType::Void => 0,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IrType::I1 => "i1",
            IrType::I8 => "i8",
            IrType::I16 => "i16",
            IrType::I32 => "i32",
            IrType::I64 => "i64",
            IrType::F32 => "float",
            IrType::F64 => "double",
            IrType::Ptr => "ptr",
            IrType::Void => "void",
        };
        f.write_str(name)
    }
}

/// A typed immediate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    I1(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Constant {
    /// Immediate for a literal payload. Strings are not immediates.
    pub fn from_value(value: &Value) -> Option<Self> {
        let constant = match *value {
            Value::Bool(v) => Constant::I1(v),
            Value::Char(v) => Constant::I8(v as i8),
            Value::Short(v) => Constant::I16(v),
            Value::Int(v) => Constant::I32(v),
            Value::Long(v) => Constant::I64(v),
            Value::Float(v) => Constant::F32(v),
            Value::Double(v) => Constant::F64(v),
            Value::Str(_) => return None,
        };
        Some(constant)
    }

    pub fn zero(ty: IrType) -> Option<Self> {
        let constant = match ty {
            IrType::I1 => Constant::I1(false),
            IrType::I8 => Constant::I8(0),
            IrType::I16 => Constant::I16(0),
            IrType::I32 => Constant::I32(0),
            IrType::I64 => Constant::I64(0),
            IrType::F32 => Constant::F32(0.0),
            IrType::F64 => Constant::F64(0.0),
            IrType::Ptr | IrType::Void => return None,
        };
        Some(constant)
    }

    pub fn ty(self) -> IrType {
        match self {
            Constant::I1(_) => IrType::I1,
            Constant::I8(_) => IrType::I8,
            Constant::I16(_) => IrType::I16,
            Constant::I32(_) => IrType::I32,
            Constant::I64(_) => IrType::I64,
            Constant::F32(_) => IrType::F32,
            Constant::F64(_) => IrType::F64,
        }
    }

    fn as_i64(self) -> Option<i64> {
        match self {
            Constant::I8(v) => Some(v as i64),
            Constant::I16(v) => Some(v as i64),
            Constant::I32(v) => Some(v as i64),
            Constant::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Apply a widening conversion at compile time.
    pub fn cast(self, op: CastOp, to: IrType) -> Option<Self> {
        match (op, self) {
            (CastOp::FPExt, Constant::F32(v)) if to == IrType::F64 => Some(Constant::F64(v as f64)),
            (CastOp::SIToFP, _) => {
                let v = self.as_i64()?;
                match to {
                    IrType::F32 => Some(Constant::F32(v as f32)),
                    IrType::F64 => Some(Constant::F64(v as f64)),
                    _ => None,
                }
            }
            (CastOp::SExt, _) => {
                let v = self.as_i64()?;
                match to {
                    IrType::I16 => Some(Constant::I16(v as i16)),
                    IrType::I32 => Some(Constant::I32(v as i32)),
                    IrType::I64 => Some(Constant::I64(v)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn negate(self) -> Option<Self> {
        match self {
            Constant::I8(v) => Some(Constant::I8(v.wrapping_neg())),
            Constant::I16(v) => Some(Constant::I16(v.wrapping_neg())),
            Constant::I32(v) => Some(Constant::I32(v.wrapping_neg())),
            Constant::I64(v) => Some(Constant::I64(v.wrapping_neg())),
            Constant::F32(v) => Some(Constant::F32(-v)),
            Constant::F64(v) => Some(Constant::F64(-v)),
            Constant::I1(_) => None,
        }
    }
}

/// Numbered intermediate result inside one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Temp(pub u32);

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%t{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Const(Constant),
    Temp(Temp),
    /// Incoming value of the parameter at this position.
    Param(u32),
    /// Address of the module string constant at this index.
    Str(u32),
}

/// Addressable storage for a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRef {
    Global(u32),
    Local(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    And,
    Or,
}

impl BinOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::SDiv => "sdiv",
            BinOp::SRem => "srem",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
            BinOp::FRem => "frem",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

/// Signed integer comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Sgt,
    Sge,
    Slt,
    Sle,
}

impl IntPredicate {
    pub fn mnemonic(self) -> &'static str {
        match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
        }
    }
}

/// Floating-point comparison. All are ordered except `Une`, which holds
/// when either operand is NaN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPredicate {
    Oeq,
    Une,
    Ogt,
    Oge,
    Olt,
    Ole,
}

impl FloatPredicate {
    pub fn mnemonic(self) -> &'static str {
        match self {
            FloatPredicate::Oeq => "oeq",
            FloatPredicate::Une => "une",
            FloatPredicate::Ogt => "ogt",
            FloatPredicate::Oge => "oge",
            FloatPredicate::Olt => "olt",
            FloatPredicate::Ole => "ole",
        }
    }
}

/// Implicit widening conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    SExt,
    SIToFP,
    FPExt,
}

impl CastOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CastOp::SExt => "sext",
            CastOp::SIToFP => "sitofp",
            CastOp::FPExt => "fpext",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Alloca {
        slot: u32,
    },
    Store {
        slot: SlotRef,
        value: Operand,
    },
    Load {
        dest: Temp,
        slot: SlotRef,
    },
    Binary {
        dest: Temp,
        op: BinOp,
        ty: IrType,
        lhs: Operand,
        rhs: Operand,
    },
    ICmp {
        dest: Temp,
        pred: IntPredicate,
        ty: IrType,
        lhs: Operand,
        rhs: Operand,
    },
    FCmp {
        dest: Temp,
        pred: FloatPredicate,
        ty: IrType,
        lhs: Operand,
        rhs: Operand,
    },
    /// Arithmetic negation (`sub 0, x` or `fneg x`).
    Neg {
        dest: Temp,
        ty: IrType,
        operand: Operand,
    },
    /// Boolean negation of an `i1`.
    Not {
        dest: Temp,
        operand: Operand,
    },
    Cast {
        dest: Temp,
        op: CastOp,
        from: IrType,
        to: IrType,
        operand: Operand,
    },
    Call {
        dest: Option<Temp>,
        callee: u32,
        args: Vec<Operand>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Ret(Option<Operand>),
    Unreachable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

/// A named, typed storage location.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub name: String,
    pub ty: IrType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Slot>,
    pub ret: IrType,
    /// Local slots in allocation order; `SlotRef::Local(i)` indexes here.
    pub locals: Vec<Slot>,
    /// Type of every temporary; `Temp(i)` indexes here.
    pub temps: Vec<IrType>,
    pub entry: Block,
    /// Not visible outside the module (the global initializer).
    pub internal: bool,
}

impl Function {
    pub fn operand_type(&self, operand: Operand) -> IrType {
        match operand {
            Operand::Const(constant) => constant.ty(),
            Operand::Temp(temp) => self
                .temps
                .get(temp.0 as usize)
                .copied()
                .unwrap_or(IrType::Void),
            Operand::Param(index) => self
                .params
                .get(index as usize)
                .map(|p| p.ty)
                .unwrap_or(IrType::Void),
            Operand::Str(_) => IrType::Ptr,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub ty: IrType,
    pub is_const: bool,
    /// Static initial value.
    pub init: Constant,
    /// The real initial value is computed by the module initializer;
    /// `init` is only the zero placeholder.
    pub deferred: bool,
}

impl Global {
    /// Whether the backend may place the slot in read-only storage.
    pub fn is_read_only(&self) -> bool {
        self.is_const && !self.deferred
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub source: SourceId,
    pub globals: Vec<Global>,
    /// String constants, without the terminating NUL.
    pub strings: Vec<String>,
    pub functions: Vec<Function>,
    /// Index of the function that runs global initializers, if any.
    pub init: Option<u32>,
}

impl Module {
    pub fn new(source: SourceId) -> Self {
        Module {
            source,
            globals: Vec::new(),
            strings: Vec::new(),
            functions: Vec::new(),
            init: None,
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn initializer(&self) -> Option<&Function> {
        self.init.and_then(|index| self.functions.get(index as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_kind_to_its_width() {
        assert_eq!(IrType::from_kind(TypeKind::Char).bits(), 8);
        assert_eq!(IrType::from_kind(TypeKind::Short).bits(), 16);
        assert_eq!(IrType::from_kind(TypeKind::Int).bits(), 32);
        assert_eq!(IrType::from_kind(TypeKind::Long).bits(), 64);
        assert_eq!(IrType::from_kind(TypeKind::Bool).bits(), 1);
        assert_eq!(IrType::from_kind(TypeKind::Float), IrType::F32);
        assert_eq!(IrType::from_kind(TypeKind::Double), IrType::F64);
        assert_eq!(IrType::from_kind(TypeKind::Noth), IrType::Void);
    }

    #[test]
    fn casts_constants_at_compile_time() {
        assert_eq!(
            Constant::I8(-1).cast(CastOp::SExt, IrType::I64),
            Some(Constant::I64(-1))
        );
        assert_eq!(
            Constant::I32(3).cast(CastOp::SIToFP, IrType::F64),
            Some(Constant::F64(3.0))
        );
        assert_eq!(
            Constant::F32(1.5).cast(CastOp::FPExt, IrType::F64),
            Some(Constant::F64(1.5))
        );
        assert_eq!(Constant::F64(1.5).cast(CastOp::SExt, IrType::I64), None);
    }

    #[test]
    fn char_constants_are_signed_bytes() {
        assert_eq!(
            Constant::from_value(&Value::Char(0xff)),
            Some(Constant::I8(-1))
        );
        assert_eq!(Constant::from_value(&Value::Str("s".into())), None);
    }
}
