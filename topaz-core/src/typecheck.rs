//! Semantic analysis for Topaz.
//!
//! The analyzer walks the statements once, in order, keeping a stack of
//! variable scopes and a table of function signatures. Every expression
//! is checked and, where its operands are known, folded at the same time
//! (see [`Typed`]). The first violation aborts the analysis.
//!
//! Scoping is flat: a declaration is rejected when the name resolves in
//! *any* open scope, so a function body cannot shadow a global.

use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, ExprKind, Param, Program, Stmt, StmtKind, UnaryOp};
use crate::error::CoreError;
use crate::span::SourceId;
use crate::types::{Type, TypeKind, common_type, default_value, has_common_type};
use crate::value::{Value, fold_binary, fold_unary};

/// Check a whole program.
pub fn analyze(program: &Program) -> Result<(), CoreError> {
    let mut checker = TypeChecker::new(&program.source);
    for stmt in &program.statements {
        checker.check_stmt(stmt)?;
    }
    Ok(())
}

/// Result of checking one expression: its type and, when every input is
/// statically known, its folded value.
///
/// Folding is best effort. `value == None` only means "not known here".
#[derive(Debug, Clone, PartialEq)]
pub struct Typed {
    pub ty: Type,
    pub value: Option<Value>,
}

#[derive(Debug, Clone)]
struct Symbol {
    ty: Type,
    value: Option<Value>,
    /// Function nesting level the variable was declared at (0 = global).
    frame: usize,
    /// Set once a function body assigns the variable from outside its
    /// frame; the folded value can no longer be trusted anywhere.
    clobbered: bool,
}

#[derive(Debug, Clone)]
struct Signature {
    return_type: Type,
    params: Vec<Param>,
}

/// Stack of variable scopes, innermost last. The global scope at the
/// bottom is never popped.
#[derive(Debug)]
struct ScopeStack {
    scopes: Vec<HashMap<String, Symbol>>,
}

impl ScopeStack {
    fn new() -> Self {
        ScopeStack {
            scopes: vec![HashMap::new()],
        }
    }

    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    fn declare(&mut self, name: &str, symbol: Symbol) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), symbol);
        }
    }

    fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
    }
}

struct TypeChecker<'a> {
    source: &'a SourceId,
    scopes: ScopeStack,
    functions: HashMap<String, Signature>,
    /// Declared return types of the functions being analyzed.
    return_types: Vec<Type>,
}

impl<'a> TypeChecker<'a> {
    fn new(source: &'a SourceId) -> Self {
        TypeChecker {
            source,
            scopes: ScopeStack::new(),
            functions: HashMap::new(),
            return_types: Vec::new(),
        }
    }

    fn error(&self, line: u32, message: impl Into<String>) -> CoreError {
        CoreError::semantic(self.source, line, message)
    }

    fn frame(&self) -> usize {
        self.return_types.len()
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<(), CoreError> {
        match &stmt.kind {
            StmtKind::VarDecl { ty, name, init } => {
                self.check_var_decl(ty, name, init.as_ref(), stmt.line)
            }
            StmtKind::VarAssign { name, value } => self.check_assign(name, value, stmt.line),
            StmtKind::FuncDecl {
                name,
                params,
                return_type,
                body,
            } => self.check_func_decl(name, params, return_type, body, stmt.line),
            StmtKind::FuncCall { name, args } => {
                self.check_call(name, args, stmt.line)?;
                Ok(())
            }
            StmtKind::Return(value) => self.check_return(value.as_ref(), stmt.line),
        }
    }

    fn check_var_decl(
        &mut self,
        ty: &Type,
        name: &str,
        init: Option<&Expr>,
        line: u32,
    ) -> Result<(), CoreError> {
        if self.scopes.lookup(name).is_some() {
            return Err(self.error(line, format!("redeclaration of variable '{name}'")));
        }
        if self.functions.contains_key(name) {
            return Err(self.error(
                line,
                format!("'{name}' is already declared as a function"),
            ));
        }
        if ty.is_noth() {
            return Err(self.error(
                line,
                format!("variable '{name}' cannot be declared with type '{ty}'"),
            ));
        }

        let value = match init {
            Some(init) => {
                let typed = self.check_expr(init)?;
                if !has_common_type(&typed.ty, ty) {
                    return Err(self.error(
                        line,
                        format!(
                            "type mismatch: cannot initialize variable '{name}' of type '{ty}' with a value of type '{}'",
                            typed.ty
                        ),
                    ));
                }
                typed.value.and_then(|v| v.convert(ty.kind))
            }
            None => Some(default_value(ty.kind).ok_or_else(|| {
                self.error(line, format!("no default value exists for type '{ty}'"))
            })?),
        };

        let frame = self.frame();
        self.scopes.declare(
            name,
            Symbol {
                ty: ty.clone(),
                value,
                frame,
                clobbered: false,
            },
        );
        Ok(())
    }

    fn check_assign(&mut self, name: &str, value: &Expr, line: u32) -> Result<(), CoreError> {
        let typed = self.check_expr(value)?;
        let frame = self.frame();
        let source = self.source;
        let error = |message: String| CoreError::semantic(source, line, message);

        let Some(symbol) = self.scopes.lookup_mut(name) else {
            return Err(error(format!("variable '{name}' does not exist")));
        };
        if symbol.ty.is_const {
            return Err(error(format!("cannot assign to constant variable '{name}'")));
        }
        if !has_common_type(&typed.ty, &symbol.ty) {
            return Err(error(format!(
                "type mismatch: cannot assign a value of type '{}' to variable '{name}' of type '{}'",
                typed.ty, symbol.ty
            )));
        }

        if symbol.frame == frame {
            symbol.value = typed.value.and_then(|v| v.convert(symbol.ty.kind));
        } else {
            symbol.value = None;
            symbol.clobbered = true;
        }
        Ok(())
    }

    fn check_func_decl(
        &mut self,
        name: &str,
        params: &[Param],
        return_type: &Type,
        body: &[Stmt],
        line: u32,
    ) -> Result<(), CoreError> {
        if !self.return_types.is_empty() {
            return Err(self.error(
                line,
                format!("nested functions are not supported (found '{name}')"),
            ));
        }
        if self.functions.contains_key(name) {
            return Err(self.error(line, format!("redeclaration of function '{name}'")));
        }
        if self.scopes.lookup(name).is_some() {
            return Err(self.error(
                line,
                format!("'{name}' is already declared as a variable"),
            ));
        }
        for (index, param) in params.iter().enumerate() {
            if param.ty.is_noth() {
                return Err(self.error(
                    line,
                    format!("parameter '{}' of '{name}' cannot have type 'noth'", param.name),
                ));
            }
            if params[..index].iter().any(|p| p.name == param.name) {
                return Err(self.error(
                    line,
                    format!("duplicate parameter '{}' in function '{name}'", param.name),
                ));
            }
        }

        // Registered before the body so the body may refer to it.
        self.functions.insert(
            name.to_string(),
            Signature {
                return_type: return_type.clone(),
                params: params.to_vec(),
            },
        );

        self.return_types.push(return_type.clone());
        self.scopes.push();
        let frame = self.frame();
        for param in params {
            if self.scopes.lookup(&param.name).is_some() {
                return Err(self.error(
                    line,
                    format!("redeclaration of variable '{}'", param.name),
                ));
            }
            self.scopes.declare(
                &param.name,
                Symbol {
                    ty: param.ty.clone(),
                    value: None,
                    frame,
                    clobbered: false,
                },
            );
        }
        let mut returned = false;
        for stmt in body {
            if returned {
                return Err(self.error(stmt.line, "unreachable statement after 'return'"));
            }
            self.check_stmt(stmt)?;
            returned = matches!(stmt.kind, StmtKind::Return(_));
        }
        self.scopes.pop();
        self.return_types.pop();
        Ok(())
    }

    fn check_return(&mut self, value: Option<&Expr>, line: u32) -> Result<(), CoreError> {
        let Some(expected) = self.return_types.last().cloned() else {
            return Err(self.error(line, "return statement outside of a function"));
        };
        match value {
            Some(_) if expected.is_noth() => Err(self.error(
                line,
                "function returning 'noth' cannot return a value",
            )),
            None if expected.is_noth() => Ok(()),
            None => Err(self.error(
                line,
                format!("missing return value in function returning '{expected}'"),
            )),
            Some(value) => {
                let typed = self.check_expr(value)?;
                if has_common_type(&typed.ty, &expected) {
                    Ok(())
                } else {
                    Err(self.error(
                        line,
                        format!(
                            "type mismatch: cannot return a value of type '{}' from a function returning '{expected}'",
                            typed.ty
                        ),
                    ))
                }
            }
        }
    }

    fn check_call(&mut self, name: &str, args: &[Expr], line: u32) -> Result<Type, CoreError> {
        let Some(signature) = self.functions.get(name).cloned() else {
            return Err(self.error(line, format!("function '{name}' does not exist")));
        };
        if args.len() != signature.params.len() {
            let expected = signature.params.len();
            return Err(self.error(
                line,
                format!(
                    "arity mismatch in call to '{name}': expected {expected} argument{}, got {}",
                    if expected == 1 { "" } else { "s" },
                    args.len()
                ),
            ));
        }
        for (index, (arg, param)) in args.iter().zip(&signature.params).enumerate() {
            let typed = self.check_expr(arg)?;
            if !has_common_type(&typed.ty, &param.ty) {
                return Err(self.error(
                    arg.line,
                    format!(
                        "type mismatch: argument {} of '{name}' ('{}') expects '{}', got '{}'",
                        index + 1,
                        param.name,
                        param.ty,
                        typed.ty
                    ),
                ));
            }
        }
        Ok(signature.return_type)
    }

    fn check_expr(&mut self, expr: &Expr) -> Result<Typed, CoreError> {
        match &expr.kind {
            ExprKind::Literal { ty, value } => Ok(Typed {
                ty: ty.clone(),
                value: Some(value.clone()),
            }),
            ExprKind::Var(name) => {
                let frame = self.frame();
                let symbol = self.scopes.lookup(name).ok_or_else(|| {
                    self.error(expr.line, format!("variable '{name}' does not exist"))
                })?;
                let foldable =
                    !symbol.clobbered && (symbol.ty.is_const || symbol.frame == frame);
                Ok(Typed {
                    ty: Type::primitive(symbol.ty.kind),
                    value: if foldable { symbol.value.clone() } else { None },
                })
            }
            ExprKind::Call { name, args } => {
                let ty = self.check_call(name, args, expr.line)?;
                Ok(Typed { ty, value: None })
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.check_expr(operand)?;
                let valid = match op {
                    UnaryOp::Neg => operand.ty.kind.is_numeric(),
                    UnaryOp::Not => operand.ty.kind == TypeKind::Bool,
                };
                if !valid {
                    let expected = match op {
                        UnaryOp::Neg => "a numeric",
                        UnaryOp::Not => "a bool",
                    };
                    return Err(self.error(
                        expr.line,
                        format!(
                            "type mismatch: operator '{op}' requires {expected} operand, got '{}'",
                            operand.ty
                        ),
                    ));
                }
                Ok(Typed {
                    value: operand.value.as_ref().and_then(|v| fold_unary(*op, v)),
                    ty: Type::primitive(operand.ty.kind),
                })
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.check_expr(lhs)?;
                let rhs = self.check_expr(rhs)?;
                self.check_binary(*op, lhs, rhs, expr.line)
            }
        }
    }

    fn check_binary(
        &self,
        op: BinaryOp,
        lhs: Typed,
        rhs: Typed,
        line: u32,
    ) -> Result<Typed, CoreError> {
        let (l, r) = (lhs.ty.kind, rhs.ty.kind);
        let mismatch = |requirement: &str| {
            self.error(
                line,
                format!(
                    "type mismatch: operator '{op}' requires {requirement}, got '{}' and '{}'",
                    lhs.ty, rhs.ty
                ),
            )
        };

        let common = if op.is_logical() {
            if l != TypeKind::Bool || r != TypeKind::Bool {
                return Err(mismatch("bool operands"));
            }
            TypeKind::Bool
        } else if l == TypeKind::StringLiteral && r == TypeKind::StringLiteral {
            if op != BinaryOp::Add {
                return Err(mismatch("numeric operands ('+' is the only string operator)"));
            }
            TypeKind::StringLiteral
        } else if op.is_equality() && l == TypeKind::Bool && r == TypeKind::Bool {
            TypeKind::Bool
        } else {
            if !l.is_numeric() || !r.is_numeric() {
                return Err(mismatch("numeric operands"));
            }
            common_type(l, r).ok_or_else(|| mismatch("operands with a common type"))?
        };

        if matches!(op, BinaryOp::Div | BinaryOp::Rem)
            && rhs.value.as_ref().is_some_and(Value::is_zero)
        {
            let what = if op == BinaryOp::Div { "division" } else { "modulo" };
            return Err(self.error(line, format!("division by zero ({what} by a constant zero)")));
        }

        let result = if op.is_arithmetic() {
            common
        } else {
            TypeKind::Bool
        };
        let value = match (&lhs.value, &rhs.value) {
            (Some(l), Some(r)) => fold_binary(op, common, l, r),
            _ => None,
        };
        Ok(Typed {
            ty: Type::primitive(result),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn program(source: &str) -> Program {
        let id = SourceId::new("test.tp");
        let tokens = tokenize(source, &id).expect("lex");
        Program {
            statements: parse(&tokens).expect("parse"),
            source: id,
        }
    }

    fn check(source: &str) -> Result<(), CoreError> {
        analyze(&program(source))
    }

    fn check_err(source: &str) -> CoreError {
        let err = check(source).unwrap_err();
        assert!(matches!(err, CoreError::SemanticError { .. }), "{err}");
        err
    }

    #[test]
    fn declaration_and_use() {
        check("let int: x = 5; let int: y = x + 1;").expect("analyze");
    }

    #[test]
    fn rejects_division_by_constant_zero() {
        let err = check_err("let int: x = 1 / 0;");
        assert!(err.message().contains("division by zero"));
        let err = check_err("let int: x = 1 % (2 - 2);");
        assert!(err.message().contains("division by zero"));
    }

    #[test]
    fn division_by_folded_variable_is_caught() {
        let err = check_err("let int: z = 0; let int: x = 10 / z;");
        assert!(err.message().contains("division by zero"));
    }

    #[test]
    fn reassignment_refolds_the_variable() {
        check("let int: z = 0; z = 2; let int: x = 10 / z;").expect("analyze");
        let err = check_err("let int: z = 2; z = 0; let int: x = 10 / z;");
        assert!(err.message().contains("division by zero"));
    }

    #[test]
    fn rejects_statements_after_return() {
        let err = check_err("fun f -> int {\n  return 1;\n  let int: x = 2;\n}");
        assert!(err.message().contains("unreachable statement after 'return'"));
        assert_eq!(err.location().map(|l| l.line), Some(3));
        check("fun f { return; }").expect("trailing return is fine");
    }

    #[test]
    fn parameters_are_never_folded() {
        check("fun f(a: int) -> int { return 10 / a; }").expect("analyze");
    }

    #[test]
    fn globals_are_not_folded_inside_functions() {
        check("let int: z = 0; fun f -> int { return 10 / z; }").expect("analyze");
        let err = check_err("let const int: z = 0; fun f -> int { return 10 / z; }");
        assert!(err.message().contains("division by zero"));
    }

    #[test]
    fn assignment_from_a_function_clobbers_the_global() {
        check("let int: z = 0; fun set { z = 1; } set(); let int: x = 10 / z;")
            .expect("analyze");
    }

    #[test]
    fn operator_mismatch_names_both_types() {
        let err = check_err("let bool: x = 1 + true;");
        assert!(err.message().contains("type mismatch"));
        assert!(err.message().contains("'int'"));
        assert!(err.message().contains("'bool'"));
    }

    #[test]
    fn reports_arity_mismatch() {
        let err = check_err("fun f(a: int) -> int { return a; } let int: x = f();");
        assert!(err.message().contains("expected 1 argument, got 0"), "{err}");
        let err = check_err("fun f(a: int) -> int { return a; } f(1, 2);");
        assert!(err.message().contains("expected 1 argument, got 2"), "{err}");
    }

    #[test]
    fn arguments_widen_but_never_narrow() {
        check("fun f(a: long) -> long { return a; } let long: x = f(1);").expect("analyze");
        let err = check_err("fun f(a: int) -> int { return a; } let int: x = f(1l);");
        assert!(err.message().contains("argument 1"));
    }

    #[test]
    fn declarations_only_widen() {
        check("let double: d = 1; let long: l = 'a'; let float: f = 2s;").expect("analyze");
        check_err("let int: x = 1l;");
        check_err("let float: x = 1.5;");
        check_err("let int: x = true;");
    }

    #[test]
    fn rejects_redeclaration_across_scopes() {
        check_err("let int: x = 1; let int: x = 2;");
        check_err("let int: x = 1; fun f { let int: x = 2; }");
        check_err("let int: a = 1; fun f(a: int) { }");
    }

    #[test]
    fn functions_and_globals_share_one_namespace() {
        assert!(check_err("let int: f = 1; fun f { }").message().contains("variable"));
        assert!(check_err("fun f { } let int: f = 1;").message().contains("function"));
    }

    #[test]
    fn function_locals_are_discarded_on_exit() {
        check("fun f { let int: x = 1; } fun g { let int: x = 2; }").expect("analyze");
        let err = check_err("fun f { let int: x = 1; } let int: y = x;");
        assert!(err.message().contains("'x' does not exist"));
    }

    #[test]
    fn rejects_unknown_names() {
        assert!(check_err("x = 1;").message().contains("does not exist"));
        assert!(check_err("let int: x = y;").message().contains("does not exist"));
        assert!(check_err("g();").message().contains("function 'g' does not exist"));
    }

    #[test]
    fn checks_return_statements() {
        check("fun f -> long { return 1; }").expect("analyze");
        check("fun f { return; }").expect("analyze");
        check_err("fun f { return 1; }");
        check_err("fun f -> int { return; }");
        check_err("fun f -> int { return 1.5; }");
        assert!(check_err("return;").message().contains("outside of a function"));
    }

    #[test]
    fn recursion_resolves_through_the_function_table() {
        check("fun f(n: int) -> int { return f(n - 1); }").expect("analyze");
    }

    #[test]
    fn rejects_nested_functions_and_noth_parameters() {
        assert!(check_err("fun f { fun g { } }").message().contains("nested"));
        check_err("fun f(a: noth) { }");
        check_err("fun f(a: int, a: int) { }");
        check_err("let noth: x;");
    }

    #[test]
    fn rejects_assignment_to_constants() {
        let err = check_err("let const int: x = 1; x = 2;");
        assert!(err.message().contains("constant"));
    }

    #[test]
    fn logical_operators_require_bools() {
        check("let bool: b = true && 1 < 2 || !false;").expect("analyze");
        check_err("let bool: b = 1 && true;");
        check_err("let bool: b = !1;");
        check_err("let int: x = -true;");
    }

    #[test]
    fn equality_accepts_bool_pairs_only_for_equality() {
        check("let bool: b = true == false;").expect("analyze");
        check_err("let bool: b = true < false;");
    }

    #[test]
    fn string_literals_only_concatenate() {
        check_err("let int: x = \"a\" - \"b\";");
        // Concatenation type-checks; the result has no declarable type.
        let err = check_err("let int: x = \"a\" + \"b\";");
        assert!(err.message().contains("'string'"));
    }

    #[test]
    fn comparisons_yield_bool() {
        check("let bool: b = 1.5 >= 2;").expect("analyze");
        check_err("let int: x = 1 < 2;");
    }

    #[test]
    fn mixed_arithmetic_takes_the_wider_type() {
        check("let double: d = 1 + 2.5; let long: l = 1s * 2l;").expect("analyze");
        check_err("let int: x = 1 + 2l;");
    }

    #[test]
    fn noth_call_cannot_be_used_as_value() {
        check("fun f { } f();").expect("analyze");
        check_err("fun f { } let int: x = f();");
    }
}
