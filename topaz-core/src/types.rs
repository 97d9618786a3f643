//! Core type system for Topaz.
//!
//! Primitive kinds are ordered by width so that the implicit
//! conversion lattice can be expressed as a rank comparison:
//!
//!   char < short < int < long < float < double
//!
//! `bool`, the string-literal kind and `noth` sit outside the order and
//! never convert implicitly.

use std::fmt;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Bool,
    /// Type of string literals. It has no keyword and cannot be declared.
    StringLiteral,
    /// The "nothing" type of functions without a return value.
    Noth,
}

impl TypeKind {
    /// Position in the widening order, for the numeric kinds only.
    pub fn rank(self) -> Option<u8> {
        match self {
            TypeKind::Char => Some(0),
            TypeKind::Short => Some(1),
            TypeKind::Int => Some(2),
            TypeKind::Long => Some(3),
            TypeKind::Float => Some(4),
            TypeKind::Double => Some(5),
            TypeKind::Bool | TypeKind::StringLiteral | TypeKind::Noth => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.rank().is_some()
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeKind::Float | TypeKind::Double)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            TypeKind::Char | TypeKind::Short | TypeKind::Int | TypeKind::Long
        )
    }

    /// Source spelling of the kind.
    pub fn keyword(self) -> &'static str {
        match self {
            TypeKind::Char => "char",
            TypeKind::Short => "short",
            TypeKind::Int => "int",
            TypeKind::Long => "long",
            TypeKind::Float => "float",
            TypeKind::Double => "double",
            TypeKind::Bool => "bool",
            TypeKind::StringLiteral => "string",
            TypeKind::Noth => "noth",
        }
    }

    /// Whether a value of kind `self` converts implicitly to `target`.
    ///
    /// Conversions only ever widen, so the relation is reflexive and
    /// antisymmetric.
    pub fn widens_to(self, target: TypeKind) -> bool {
        if self == target {
            return true;
        }
        match (self.rank(), target.rank()) {
            (Some(from), Some(to)) => from < to,
            _ => false,
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A declared or inferred type.
///
/// The qualifiers do not take part in compatibility checks; only the
/// kind does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    pub kind: TypeKind,
    /// Display name, taken from the keyword that spelled the type.
    pub name: String,
    pub is_const: bool,
    pub is_pointer: bool,
    pub is_nullable: bool,
}

impl Type {
    /// An unqualified type named after its keyword.
    pub fn primitive(kind: TypeKind) -> Self {
        Type {
            kind,
            name: kind.keyword().to_string(),
            is_const: false,
            is_pointer: false,
            is_nullable: false,
        }
    }

    pub fn noth() -> Self {
        Type::primitive(TypeKind::Noth)
    }

    pub fn is_noth(&self) -> bool {
        self.kind == TypeKind::Noth
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_const {
            f.write_str("const ")?;
        }
        f.write_str(&self.name)?;
        if self.is_nullable {
            f.write_str("?")?;
        }
        Ok(())
    }
}

/// Whether a value of type `from` may be used where `to` is expected.
///
/// This is the directional check used for declarations, assignments,
/// arguments and returns: `has_common_type(int, long)` holds while
/// `has_common_type(long, int)` does not.
pub fn has_common_type(from: &Type, to: &Type) -> bool {
    from.kind.widens_to(to.kind)
}

/// The common kind of a mixed binary operation, if one exists.
///
/// * common(T, T) = T
/// * common(a, b) = the wider of the two when one widens to the other
pub fn common_type(a: TypeKind, b: TypeKind) -> Option<TypeKind> {
    if a.widens_to(b) {
        Some(b)
    } else if b.widens_to(a) {
        Some(a)
    } else {
        None
    }
}

/// Zero value used for a declaration without an initializer.
pub fn default_value(kind: TypeKind) -> Option<Value> {
    let value = match kind {
        TypeKind::Bool => Value::Bool(false),
        TypeKind::Char => Value::Char(0),
        TypeKind::Short => Value::Short(0),
        TypeKind::Int => Value::Int(0),
        TypeKind::Long => Value::Long(0),
        TypeKind::Float => Value::Float(0.0),
        TypeKind::Double => Value::Double(0.0),
        TypeKind::StringLiteral | TypeKind::Noth => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TypeKind; 9] = [
        TypeKind::Char,
        TypeKind::Short,
        TypeKind::Int,
        TypeKind::Long,
        TypeKind::Float,
        TypeKind::Double,
        TypeKind::Bool,
        TypeKind::StringLiteral,
        TypeKind::Noth,
    ];

    #[test]
    fn common_type_is_reflexive() {
        for kind in ALL {
            let ty = Type::primitive(kind);
            assert!(has_common_type(&ty, &ty), "{kind}");
        }
    }

    #[test]
    fn widening_is_one_directional() {
        let int = Type::primitive(TypeKind::Int);
        let long = Type::primitive(TypeKind::Long);
        assert!(has_common_type(&int, &long));
        assert!(!has_common_type(&long, &int));
    }

    #[test]
    fn char_widens_to_every_numeric_kind() {
        for target in [
            TypeKind::Short,
            TypeKind::Int,
            TypeKind::Long,
            TypeKind::Float,
            TypeKind::Double,
        ] {
            assert!(TypeKind::Char.widens_to(target));
        }
        assert!(!TypeKind::Double.widens_to(TypeKind::Float));
    }

    #[test]
    fn bool_and_strings_never_convert() {
        for kind in ALL {
            if kind != TypeKind::Bool {
                assert!(!TypeKind::Bool.widens_to(kind));
                assert!(!kind.widens_to(TypeKind::Bool));
            }
            if kind != TypeKind::StringLiteral {
                assert!(!TypeKind::StringLiteral.widens_to(kind));
            }
        }
    }

    #[test]
    fn common_type_picks_the_wider_kind() {
        assert_eq!(
            common_type(TypeKind::Long, TypeKind::Int),
            Some(TypeKind::Long)
        );
        assert_eq!(
            common_type(TypeKind::Char, TypeKind::Float),
            Some(TypeKind::Float)
        );
        assert_eq!(common_type(TypeKind::Int, TypeKind::Bool), None);
    }

    #[test]
    fn qualifiers_do_not_affect_compatibility() {
        let mut constant = Type::primitive(TypeKind::Int);
        constant.is_const = true;
        constant.is_nullable = true;
        assert!(has_common_type(&Type::primitive(TypeKind::Int), &constant));
        assert_eq!(constant.to_string(), "const int?");
    }

    #[test]
    fn defaults_exist_only_for_storable_kinds() {
        assert_eq!(default_value(TypeKind::Bool), Some(Value::Bool(false)));
        assert_eq!(default_value(TypeKind::Char), Some(Value::Char(0)));
        assert_eq!(default_value(TypeKind::Long), Some(Value::Long(0)));
        assert_eq!(default_value(TypeKind::Double), Some(Value::Double(0.0)));
        assert_eq!(default_value(TypeKind::Noth), None);
        assert_eq!(default_value(TypeKind::StringLiteral), None);
    }
}
