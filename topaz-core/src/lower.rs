//! Lowering of a checked syntax tree into an [`ir::Module`].
//!
//! Lowering keeps its own scope stack and re-derives the type of every
//! expression from the tree, so it does not depend on analyzer state.
//! Names are re-resolved here as well; a miss is reported as a codegen
//! error even though analysis would normally have caught it.
//!
//! Global declarations with a constant initializer become statically
//! initialized slots. Everything else that runs at global scope is
//! collected into a synthesized `__global_init` function.

use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, ExprKind, Param, Program, Stmt, StmtKind, UnaryOp};
use crate::error::CoreError;
use crate::ir::{
    BinOp, Block, CastOp, Constant, FloatPredicate, Function, Global, Instruction, IntPredicate,
    IrType, Module, Operand, Slot, SlotRef, Temp, Terminator,
};
use crate::span::SourceId;
use crate::types::{Type, TypeKind, common_type};
use crate::value::Value;

/// Name of the synthesized module initializer.
pub const GLOBAL_INIT: &str = "__global_init";

/// Lower a program. The tree is consumed.
pub fn lower(program: Program) -> Result<Module, CoreError> {
    let Program { source, statements } = program;
    let mut lowerer = Lowerer::new(source);
    for stmt in &statements {
        lowerer.lower_stmt(stmt)?;
    }
    Ok(lowerer.finish())
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    slot: SlotRef,
    kind: TypeKind,
}

#[derive(Debug, Clone)]
struct Signature {
    index: u32,
    params: Vec<TypeKind>,
    ret: TypeKind,
}

/// A function under construction.
struct Builder {
    function: Function,
    ret_kind: TypeKind,
    terminated: bool,
}

impl Builder {
    fn new(name: &str, params: Vec<Slot>, ret_kind: TypeKind, internal: bool) -> Self {
        Builder {
            function: Function {
                name: name.to_string(),
                params,
                ret: IrType::from_kind(ret_kind),
                locals: Vec::new(),
                temps: Vec::new(),
                entry: Block {
                    label: "entry".to_string(),
                    instructions: Vec::new(),
                    terminator: Terminator::Unreachable,
                },
                internal,
            },
            ret_kind,
            terminated: false,
        }
    }

    fn emit(&mut self, instruction: Instruction) {
        self.function.entry.instructions.push(instruction);
    }

    fn temp(&mut self, ty: IrType) -> Temp {
        self.function.temps.push(ty);
        Temp(self.function.temps.len() as u32 - 1)
    }

    /// Allocate a local slot and emit its `alloca`.
    fn alloca(&mut self, name: &str, ty: IrType) -> u32 {
        let index = self.function.locals.len() as u32;
        let name = if self.function.locals.iter().any(|slot| slot.name == name) {
            format!("{name}.{index}")
        } else {
            name.to_string()
        };
        self.function.locals.push(Slot { name, ty });
        self.emit(Instruction::Alloca { slot: index });
        index
    }

    fn terminate(&mut self, terminator: Terminator) {
        self.function.entry.terminator = terminator;
        self.terminated = true;
    }

    /// Close the block. A body that falls off the end returns `void`
    /// from a `noth` function and is unreachable otherwise.
    fn finish(mut self) -> Function {
        if !self.terminated {
            self.function.entry.terminator = if self.function.ret == IrType::Void {
                Terminator::Ret(None)
            } else {
                Terminator::Unreachable
            };
        }
        self.function
    }
}

struct Lowerer {
    source: SourceId,
    module: Module,
    scopes: Vec<HashMap<String, Binding>>,
    functions: HashMap<String, Signature>,
    current: Option<Builder>,
    init: Option<Builder>,
}

impl Lowerer {
    fn new(source: SourceId) -> Self {
        Lowerer {
            module: Module::new(source.clone()),
            source,
            scopes: vec![HashMap::new()],
            functions: HashMap::new(),
            current: None,
            init: None,
        }
    }

    fn error(&self, line: u32, message: impl Into<String>) -> CoreError {
        CoreError::codegen(&self.source, line, message)
    }

    /// The function receiving instructions: the one being lowered, or
    /// the module initializer at global scope.
    fn builder(&mut self) -> &mut Builder {
        match self.current {
            Some(ref mut builder) => builder,
            None => self
                .init
                .get_or_insert_with(|| Builder::new(GLOBAL_INIT, Vec::new(), TypeKind::Noth, true)),
        }
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .copied()
    }

    fn bind(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
    }

    /// Machine type of a variable or parameter.
    fn storage_type(&self, ty: &Type, line: u32) -> Result<IrType, CoreError> {
        match ty.kind {
            TypeKind::Noth | TypeKind::StringLiteral => Err(self.error(
                line,
                format!("unsupported type mapping for storage of type '{ty}'"),
            )),
            kind => Ok(IrType::from_kind(kind)),
        }
    }

    fn finish(mut self) -> Module {
        if let Some(init) = self.init.take() {
            if !init.function.entry.instructions.is_empty() {
                self.module.init = Some(self.module.functions.len() as u32);
                self.module.functions.push(init.finish());
            }
        }
        self.module
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CoreError> {
        // Also rejected by the analyzer; a block has a single terminator.
        if self.current.as_ref().is_some_and(|builder| builder.terminated) {
            return Err(self.error(stmt.line, "unreachable statement after 'return'"));
        }
        match &stmt.kind {
            StmtKind::VarDecl { ty, name, init } => {
                self.lower_var_decl(ty, name, init.as_ref(), stmt.line)
            }
            StmtKind::VarAssign { name, value } => self.lower_assign(name, value, stmt.line),
            StmtKind::FuncDecl {
                name,
                params,
                return_type,
                body,
            } => {
                if self.current.is_some() {
                    return Err(self.error(stmt.line, "nested functions are not supported"));
                }
                self.lower_function(name, params, return_type, body, stmt.line)
            }
            StmtKind::FuncCall { name, args } => {
                self.lower_call(name, args, stmt.line)?;
                Ok(())
            }
            StmtKind::Return(value) => self.lower_return(value.as_ref(), stmt.line),
        }
    }

    fn lower_var_decl(
        &mut self,
        ty: &Type,
        name: &str,
        init: Option<&Expr>,
        line: u32,
    ) -> Result<(), CoreError> {
        if self.lookup(name).is_some() {
            return Err(self.error(line, format!("variable '{name}' is already declared")));
        }
        let ir_ty = self.storage_type(ty, line)?;
        let zero = Constant::zero(ir_ty)
            .ok_or_else(|| self.error(line, format!("no zero value for type '{ty}'")))?;
        let value = match init {
            Some(expr) => {
                let (operand, kind) = self.lower_expr(expr)?;
                Some(self.coerce(operand, kind, ty.kind, line)?)
            }
            None => None,
        };
        let binding_kind = ty.kind;

        if self.current.is_none() {
            let index = self.module.globals.len() as u32;
            let (static_init, deferred) = match value {
                Some(Operand::Const(constant)) => (constant, false),
                Some(_) => (zero, true),
                None => (zero, false),
            };
            self.module.globals.push(Global {
                name: name.to_string(),
                ty: ir_ty,
                is_const: ty.is_const,
                init: static_init,
                deferred,
            });
            if let (true, Some(value)) = (deferred, value) {
                self.builder().emit(Instruction::Store {
                    slot: SlotRef::Global(index),
                    value,
                });
            }
            self.bind(
                name,
                Binding {
                    slot: SlotRef::Global(index),
                    kind: binding_kind,
                },
            );
        } else {
            let builder = self.builder();
            let slot = builder.alloca(name, ir_ty);
            builder.emit(Instruction::Store {
                slot: SlotRef::Local(slot),
                value: value.unwrap_or(Operand::Const(zero)),
            });
            self.bind(
                name,
                Binding {
                    slot: SlotRef::Local(slot),
                    kind: binding_kind,
                },
            );
        }
        Ok(())
    }

    fn lower_assign(&mut self, name: &str, value: &Expr, line: u32) -> Result<(), CoreError> {
        let binding = self
            .lookup(name)
            .ok_or_else(|| self.error(line, format!("variable '{name}' does not exist")))?;
        let (operand, kind) = self.lower_expr(value)?;
        let value = self.coerce(operand, kind, binding.kind, line)?;
        self.builder().emit(Instruction::Store {
            slot: binding.slot,
            value,
        });
        Ok(())
    }

    fn lower_function(
        &mut self,
        name: &str,
        params: &[Param],
        return_type: &Type,
        body: &[Stmt],
        line: u32,
    ) -> Result<(), CoreError> {
        if self.functions.contains_key(name) {
            return Err(self.error(line, format!("function '{name}' is already declared")));
        }
        let mut slots = Vec::with_capacity(params.len());
        for param in params {
            slots.push(Slot {
                name: param.name.clone(),
                ty: self.storage_type(&param.ty, line)?,
            });
        }

        self.functions.insert(
            name.to_string(),
            Signature {
                index: self.module.functions.len() as u32,
                params: params.iter().map(|p| p.ty.kind).collect(),
                ret: return_type.kind,
            },
        );

        let mut builder = Builder::new(name, slots.clone(), return_type.kind, false);
        self.scopes.push(HashMap::new());
        for (index, (param, slot)) in params.iter().zip(&slots).enumerate() {
            let local = builder.alloca(&slot.name, slot.ty);
            builder.emit(Instruction::Store {
                slot: SlotRef::Local(local),
                value: Operand::Param(index as u32),
            });
            self.bind(
                &param.name,
                Binding {
                    slot: SlotRef::Local(local),
                    kind: param.ty.kind,
                },
            );
        }
        self.current = Some(builder);

        for stmt in body {
            self.lower_stmt(stmt)?;
        }

        self.scopes.pop();
        if let Some(builder) = self.current.take() {
            self.module.functions.push(builder.finish());
        }
        Ok(())
    }

    fn lower_return(&mut self, value: Option<&Expr>, line: u32) -> Result<(), CoreError> {
        let Some(ret_kind) = self.current.as_ref().map(|builder| builder.ret_kind) else {
            return Err(self.error(line, "return statement outside of a function"));
        };
        let value = match value {
            Some(_) if ret_kind == TypeKind::Noth => {
                return Err(self.error(line, "cannot return a value from a 'noth' function"));
            }
            Some(expr) => {
                let (operand, kind) = self.lower_expr(expr)?;
                Some(self.coerce(operand, kind, ret_kind, line)?)
            }
            None if ret_kind != TypeKind::Noth => {
                return Err(self.error(line, format!("missing return value of type '{ret_kind}'")));
            }
            None => None,
        };
        self.builder().terminate(Terminator::Ret(value));
        Ok(())
    }

    /// Emit a call. Returns the result temporary (absent for `noth`
    /// callees) and the callee's return kind.
    fn lower_call(
        &mut self,
        name: &str,
        args: &[Expr],
        line: u32,
    ) -> Result<(Option<Temp>, TypeKind), CoreError> {
        let signature = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| self.error(line, format!("function '{name}' does not exist")))?;
        if args.len() != signature.params.len() {
            return Err(self.error(
                line,
                format!(
                    "call to '{name}' expected {} arguments, got {}",
                    signature.params.len(),
                    args.len()
                ),
            ));
        }

        let mut operands = Vec::with_capacity(args.len());
        for (arg, &param) in args.iter().zip(&signature.params) {
            let (operand, kind) = self.lower_expr(arg)?;
            operands.push(self.coerce(operand, kind, param, arg.line)?);
        }

        let ret = IrType::from_kind(signature.ret);
        let builder = self.builder();
        let dest = (ret != IrType::Void).then(|| builder.temp(ret));
        builder.emit(Instruction::Call {
            dest,
            callee: signature.index,
            args: operands,
        });
        Ok((dest, signature.ret))
    }

    /// Lower an expression to an operand and the kind it evaluates to.
    fn lower_expr(&mut self, expr: &Expr) -> Result<(Operand, TypeKind), CoreError> {
        match &expr.kind {
            ExprKind::Literal { value, .. } => self.lower_literal(value, expr.line),
            ExprKind::Var(name) => {
                let binding = self.lookup(name).ok_or_else(|| {
                    self.error(expr.line, format!("variable '{name}' does not exist"))
                })?;
                let builder = self.builder();
                let dest = builder.temp(IrType::from_kind(binding.kind));
                builder.emit(Instruction::Load {
                    dest,
                    slot: binding.slot,
                });
                Ok((Operand::Temp(dest), binding.kind))
            }
            ExprKind::Call { name, args } => {
                let (dest, kind) = self.lower_call(name, args, expr.line)?;
                let dest = dest.ok_or_else(|| {
                    self.error(
                        expr.line,
                        format!("function '{name}' returns 'noth' and cannot be used as a value"),
                    )
                })?;
                Ok((Operand::Temp(dest), kind))
            }
            ExprKind::Unary { op, operand } => self.lower_unary(*op, operand, expr.line),
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(*op, lhs, rhs, expr.line),
        }
    }

    fn lower_literal(&mut self, value: &Value, line: u32) -> Result<(Operand, TypeKind), CoreError> {
        if let Value::Str(text) = value {
            let index = self.module.strings.len() as u32;
            self.module.strings.push(text.clone());
            return Ok((Operand::Str(index), TypeKind::StringLiteral));
        }
        let constant = Constant::from_value(value)
            .ok_or_else(|| self.error(line, format!("unsupported literal {value}")))?;
        Ok((Operand::Const(constant), value.kind()))
    }

    fn lower_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        line: u32,
    ) -> Result<(Operand, TypeKind), CoreError> {
        let (operand, kind) = self.lower_expr(operand)?;
        let ty = IrType::from_kind(kind);
        match op {
            UnaryOp::Neg if kind.is_numeric() => {
                if let Operand::Const(constant) = operand {
                    if let Some(negated) = constant.negate() {
                        return Ok((Operand::Const(negated), kind));
                    }
                }
                let builder = self.builder();
                let dest = builder.temp(ty);
                builder.emit(Instruction::Neg { dest, ty, operand });
                Ok((Operand::Temp(dest), kind))
            }
            UnaryOp::Not if kind == TypeKind::Bool => {
                if let Operand::Const(Constant::I1(value)) = operand {
                    return Ok((Operand::Const(Constant::I1(!value)), kind));
                }
                let builder = self.builder();
                let dest = builder.temp(IrType::I1);
                builder.emit(Instruction::Not { dest, operand });
                Ok((Operand::Temp(dest), kind))
            }
            _ => Err(self.error(
                line,
                format!("unsupported unary operator '{op}' for type '{kind}'"),
            )),
        }
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        line: u32,
    ) -> Result<(Operand, TypeKind), CoreError> {
        let (lhs, lhs_kind) = self.lower_expr(lhs)?;
        let (rhs, rhs_kind) = self.lower_expr(rhs)?;
        let unsupported = |this: &Self| {
            this.error(
                line,
                format!("unsupported operator '{op}' for operands of type '{lhs_kind}' and '{rhs_kind}'"),
            )
        };

        let both_bool = lhs_kind == TypeKind::Bool && rhs_kind == TypeKind::Bool;
        if op.is_logical() || (both_bool && op.is_equality()) {
            if !both_bool {
                return Err(unsupported(self));
            }
            let builder = self.builder();
            let dest = builder.temp(IrType::I1);
            let instruction = match op {
                BinaryOp::And | BinaryOp::Or => Instruction::Binary {
                    dest,
                    op: if op == BinaryOp::And { BinOp::And } else { BinOp::Or },
                    ty: IrType::I1,
                    lhs,
                    rhs,
                },
                _ => Instruction::ICmp {
                    dest,
                    pred: if op == BinaryOp::Eq { IntPredicate::Eq } else { IntPredicate::Ne },
                    ty: IrType::I1,
                    lhs,
                    rhs,
                },
            };
            builder.emit(instruction);
            return Ok((Operand::Temp(dest), TypeKind::Bool));
        }

        let Some(common) = common_type(lhs_kind, rhs_kind).filter(|kind| kind.is_numeric()) else {
            return Err(unsupported(self));
        };
        let lhs = self.coerce(lhs, lhs_kind, common, line)?;
        let rhs = self.coerce(rhs, rhs_kind, common, line)?;
        let ty = IrType::from_kind(common);
        let float = common.is_float();

        let builder = self.builder();
        if op.is_arithmetic() {
            let bin = match (op, float) {
                (BinaryOp::Add, false) => BinOp::Add,
                (BinaryOp::Sub, false) => BinOp::Sub,
                (BinaryOp::Mul, false) => BinOp::Mul,
                (BinaryOp::Div, false) => BinOp::SDiv,
                (BinaryOp::Rem, false) => BinOp::SRem,
                (BinaryOp::Add, true) => BinOp::FAdd,
                (BinaryOp::Sub, true) => BinOp::FSub,
                (BinaryOp::Mul, true) => BinOp::FMul,
                (BinaryOp::Div, true) => BinOp::FDiv,
                _ => BinOp::FRem,
            };
            let dest = builder.temp(ty);
            builder.emit(Instruction::Binary {
                dest,
                op: bin,
                ty,
                lhs,
                rhs,
            });
            return Ok((Operand::Temp(dest), common));
        }

        let dest = builder.temp(IrType::I1);
        let instruction = if float {
            let pred = match op {
                BinaryOp::Eq => FloatPredicate::Oeq,
                BinaryOp::NotEq => FloatPredicate::Une,
                BinaryOp::Greater => FloatPredicate::Ogt,
                BinaryOp::GreaterEq => FloatPredicate::Oge,
                BinaryOp::Less => FloatPredicate::Olt,
                _ => FloatPredicate::Ole,
            };
            Instruction::FCmp {
                dest,
                pred,
                ty,
                lhs,
                rhs,
            }
        } else {
            let pred = match op {
                BinaryOp::Eq => IntPredicate::Eq,
                BinaryOp::NotEq => IntPredicate::Ne,
                BinaryOp::Greater => IntPredicate::Sgt,
                BinaryOp::GreaterEq => IntPredicate::Sge,
                BinaryOp::Less => IntPredicate::Slt,
                _ => IntPredicate::Sle,
            };
            Instruction::ICmp {
                dest,
                pred,
                ty,
                lhs,
                rhs,
            }
        };
        builder.emit(instruction);
        Ok((Operand::Temp(dest), TypeKind::Bool))
    }

    /// Widen `operand` from `from` to `to`. Constants are converted in
    /// place; anything else gets an explicit cast instruction.
    fn coerce(
        &mut self,
        operand: Operand,
        from: TypeKind,
        to: TypeKind,
        line: u32,
    ) -> Result<Operand, CoreError> {
        if from == to {
            return Ok(operand);
        }
        let op = if from.is_integer() && to.is_integer() && from.widens_to(to) {
            CastOp::SExt
        } else if from.is_integer() && to.is_float() {
            CastOp::SIToFP
        } else if from == TypeKind::Float && to == TypeKind::Double {
            CastOp::FPExt
        } else {
            return Err(self.error(
                line,
                format!("cannot convert a value of type '{from}' to '{to}'"),
            ));
        };

        let (from_ty, to_ty) = (IrType::from_kind(from), IrType::from_kind(to));
        if let Operand::Const(constant) = operand {
            if let Some(converted) = constant.cast(op, to_ty) {
                return Ok(Operand::Const(converted));
            }
        }
        let builder = self.builder();
        let dest = builder.temp(to_ty);
        builder.emit(Instruction::Cast {
            dest,
            op,
            from: from_ty,
            to: to_ty,
            operand,
        });
        Ok(Operand::Temp(dest))
    }
}
