//! Literal payloads and the constant folding performed during analysis.

use std::fmt;

use crate::ast::{BinaryOp, UnaryOp};
use crate::types::TypeKind;

/// Payload of a literal or of a folded expression.
///
/// `Char` stores the raw byte; arithmetic treats it as a signed 8-bit
/// integer, matching the lowered `i8`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Char(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn kind(&self) -> TypeKind {
        match self {
            Value::Char(_) => TypeKind::Char,
            Value::Short(_) => TypeKind::Short,
            Value::Int(_) => TypeKind::Int,
            Value::Long(_) => TypeKind::Long,
            Value::Float(_) => TypeKind::Float,
            Value::Double(_) => TypeKind::Double,
            Value::Bool(_) => TypeKind::Bool,
            Value::Str(_) => TypeKind::StringLiteral,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Char(v) => Some(v as i8 as i64),
            Value::Short(v) => Some(v as i64),
            Value::Int(v) => Some(v as i64),
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v as f64),
            Value::Double(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_f64() == Some(0.0)
    }

    /// Convert a numeric value to another numeric kind.
    ///
    /// Integer narrowing wraps. Non-numeric values only convert to
    /// their own kind.
    pub fn convert(&self, target: TypeKind) -> Option<Value> {
        if self.kind() == target {
            return Some(self.clone());
        }
        if !self.kind().is_numeric() {
            return None;
        }
        if self.kind().is_float() {
            let v = self.as_f64()?;
            return match target {
                TypeKind::Float => Some(Value::Float(v as f32)),
                TypeKind::Double => Some(Value::Double(v)),
                // Float to integer is never an implicit conversion.
                _ => None,
            };
        }
        let v = self.as_i64()?;
        let converted = match target {
            TypeKind::Char => Value::Char(v as u8),
            TypeKind::Short => Value::Short(v as i16),
            TypeKind::Int => Value::Int(v as i32),
            TypeKind::Long => Value::Long(v),
            TypeKind::Float => Value::Float(v as f32),
            TypeKind::Double => Value::Double(v as f64),
            TypeKind::Bool | TypeKind::StringLiteral | TypeKind::Noth => return None,
        };
        Some(converted)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Char(v) => write!(f, "{:?}", *v as char),
            Value::Short(v) => write!(f, "{v}s"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}l"),
            Value::Float(v) => write!(f, "{v:?}f"),
            Value::Double(v) => write!(f, "{v:?}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
        }
    }
}

/// Fold a binary operation whose operands are both known.
///
/// `common` is the kind both numeric operands are converted to before
/// the operation. Returns `None` when the operation cannot be folded
/// (for example an integer division by zero).
pub fn fold_binary(op: BinaryOp, common: TypeKind, lhs: &Value, rhs: &Value) -> Option<Value> {
    match op {
        BinaryOp::And => Some(Value::Bool(lhs.as_bool()? && rhs.as_bool()?)),
        BinaryOp::Or => Some(Value::Bool(lhs.as_bool()? || rhs.as_bool()?)),
        BinaryOp::Add => match (lhs, rhs) {
            (Value::Str(l), Value::Str(r)) => Some(Value::Str(format!("{l}{r}"))),
            _ => fold_arithmetic(op, common, lhs, rhs),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            fold_arithmetic(op, common, lhs, rhs)
        }
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Greater
        | BinaryOp::GreaterEq
        | BinaryOp::Less
        | BinaryOp::LessEq => fold_comparison(op, common, lhs, rhs).map(Value::Bool),
    }
}

fn fold_arithmetic(op: BinaryOp, common: TypeKind, lhs: &Value, rhs: &Value) -> Option<Value> {
    if common.is_float() {
        let (l, r) = (lhs.as_f64()?, rhs.as_f64()?);
        let result = match op {
            BinaryOp::Add => l + r,
            BinaryOp::Sub => l - r,
            BinaryOp::Mul => l * r,
            BinaryOp::Div => l / r,
            BinaryOp::Rem => l % r,
            _ => return None,
        };
        return Value::Double(result).convert(common);
    }

    let (l, r) = (lhs.as_i64()?, rhs.as_i64()?);
    if matches!(op, BinaryOp::Div | BinaryOp::Rem) && r == 0 {
        return None;
    }
    let result = match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Sub => l.wrapping_sub(r),
        BinaryOp::Mul => l.wrapping_mul(r),
        BinaryOp::Div => l.wrapping_div(r),
        BinaryOp::Rem => l.wrapping_rem(r),
        _ => return None,
    };
    Value::Long(result).convert(common)
}

fn fold_comparison(op: BinaryOp, common: TypeKind, lhs: &Value, rhs: &Value) -> Option<bool> {
    if let (Value::Bool(l), Value::Bool(r)) = (lhs, rhs) {
        return match op {
            BinaryOp::Eq => Some(l == r),
            BinaryOp::NotEq => Some(l != r),
            _ => None,
        };
    }

    let ordering = if common.is_float() {
        lhs.as_f64()?.partial_cmp(&rhs.as_f64()?)
    } else {
        Some(lhs.as_i64()?.cmp(&rhs.as_i64()?))
    };

    // NaN compares unordered: only `!=` holds.
    let Some(ordering) = ordering else {
        return Some(op == BinaryOp::NotEq);
    };
    let result = match op {
        BinaryOp::Eq => ordering.is_eq(),
        BinaryOp::NotEq => ordering.is_ne(),
        BinaryOp::Greater => ordering.is_gt(),
        BinaryOp::GreaterEq => ordering.is_ge(),
        BinaryOp::Less => ordering.is_lt(),
        BinaryOp::LessEq => ordering.is_le(),
        _ => return None,
    };
    Some(result)
}

/// Fold a unary operation over a known operand.
pub fn fold_unary(op: UnaryOp, operand: &Value) -> Option<Value> {
    match op {
        UnaryOp::Not => Some(Value::Bool(!operand.as_bool()?)),
        UnaryOp::Neg => match *operand {
            Value::Float(v) => Some(Value::Float(-v)),
            Value::Double(v) => Some(Value::Double(-v)),
            _ => Value::Long(operand.as_i64()?.wrapping_neg()).convert(operand.kind()),
        },
    }
}
