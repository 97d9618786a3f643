//! WASM backend: encodes a lowered module with `wasm-encoder`.
//!
//! Layout of each function's locals:
//!
//!   [params][slots][temporaries]
//!
//! `i1`, `i8` and `i16` values live in `i32` locals. Narrow integer
//! results are sign-extended after every operation so that a stored
//! value always equals its sign-extended source value.
//!
//! WebAssembly has no floating-point remainder. Modules that use `frem`
//! get one extra internal function, placed after the lowered ones, that
//! computes the exact `fmod` of two `f64` values; `f32` operands are
//! promoted, which is exact.

use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, DataSection, ExportKind, ExportSection, Function as WasmFunction,
    FunctionSection, GlobalSection, GlobalType, Instruction as Wasm, MemorySection, MemoryType,
    Module as WasmModule, StartSection, TypeSection, ValType,
};

use crate::error::CoreError;
use crate::ir::{
    BinOp, CastOp, Constant, FloatPredicate, Function, Instruction, IntPredicate, IrType, Module,
    Operand, SlotRef, Temp, Terminator,
};

/// Offset of the first string constant in linear memory.
const DATA_BASE: u32 = 8;
const PAGE_SIZE: u32 = 65536;

/// Encode `module` as a WebAssembly binary.
///
/// Every non-internal function is exported under its own name. String
/// constants, if any, are placed in an exported memory named `memory`.
pub fn generate_wasm(module: &Module) -> Result<Vec<u8>, CoreError> {
    let mut wasm = WasmModule::new();

    // Types: one signature per function.
    let mut types = TypeSection::new();
    for function in &module.functions {
        let params = function
            .params
            .iter()
            .map(|param| val_type(param.ty))
            .collect::<Result<Vec<_>, _>>()?;
        let results = result_type(function.ret)?;
        types.ty().function(params, results);
    }
    let fmod = uses_frem(module).then_some(module.functions.len() as u32);
    if fmod.is_some() {
        types
            .ty()
            .function([ValType::F64, ValType::F64], [ValType::F64]);
    }
    wasm.section(&types);

    let mut functions = FunctionSection::new();
    for index in 0..module.functions.len() as u32 {
        functions.function(index);
    }
    if let Some(index) = fmod {
        functions.function(index);
    }
    wasm.section(&functions);

    let string_offsets = layout_strings(&module.strings)?;
    if let Some(&end) = string_offsets.last() {
        let last_len = module.strings.last().map_or(0, |s| s.len() as u32 + 1);
        let size = end
            .checked_add(last_len)
            .ok_or_else(|| CoreError::BackendError("string data exceeds 4 GiB".into()))?;
        let mut memories = MemorySection::new();
        memories.memory(MemoryType {
            minimum: u64::from(size.div_ceil(PAGE_SIZE).max(1)),
            maximum: None,
            memory64: false,
            shared: false,
            page_size_log2: None,
        });
        wasm.section(&memories);
    }

    if !module.globals.is_empty() {
        let mut globals = GlobalSection::new();
        for global in &module.globals {
            globals.global(
                GlobalType {
                    val_type: val_type(global.ty)?,
                    mutable: !global.is_read_only(),
                    shared: false,
                },
                &const_expr(global.init),
            );
        }
        wasm.section(&globals);
    }

    let mut exports = ExportSection::new();
    for (index, function) in module.functions.iter().enumerate() {
        if !function.internal {
            exports.export(&function.name, ExportKind::Func, index as u32);
        }
    }
    if !module.strings.is_empty() {
        exports.export("memory", ExportKind::Memory, 0);
    }
    wasm.section(&exports);

    if let Some(function_index) = module.init {
        wasm.section(&StartSection { function_index });
    }

    let mut code = CodeSection::new();
    for function in &module.functions {
        code.function(&encode_function(module, function, &string_offsets, fmod)?);
    }
    if fmod.is_some() {
        code.function(&fmod_body());
    }
    wasm.section(&code);

    if !module.strings.is_empty() {
        let mut data = DataSection::new();
        for (text, &offset) in module.strings.iter().zip(&string_offsets) {
            let bytes = text.bytes().chain(std::iter::once(0)).collect::<Vec<u8>>();
            data.active(0, &ConstExpr::i32_const(offset as i32), bytes);
        }
        wasm.section(&data);
    }

    Ok(wasm.finish())
}

/// Start address of every string constant.
fn layout_strings(strings: &[String]) -> Result<Vec<u32>, CoreError> {
    let mut offsets = Vec::with_capacity(strings.len());
    let mut next = DATA_BASE;
    for text in strings {
        offsets.push(next);
        let len = u32::try_from(text.len() + 1)
            .map_err(|_| CoreError::BackendError("string constant too large".into()))?;
        next = next
            .checked_add(len)
            .ok_or_else(|| CoreError::BackendError("string data exceeds 4 GiB".into()))?;
    }
    Ok(offsets)
}

fn uses_frem(module: &Module) -> bool {
    module.functions.iter().any(|function| {
        function.entry.instructions.iter().any(|instruction| {
            matches!(
                instruction,
                Instruction::Binary {
                    op: BinOp::FRem,
                    ..
                }
            )
        })
    })
}

/// Body of `__fmod(x: f64, y: f64) -> f64`.
///
/// Reduces `|x|` by `|y| * 2^k` for decreasing `k`. Each subtraction has
/// `d <= r < 2d`, so it is exact and so is the result. Non-finite `x`,
/// NaN `y` and zero `y` give NaN. The sign follows `x`.
fn fmod_body() -> WasmFunction {
    const X: u32 = 0;
    const Y: u32 = 1;
    const R: u32 = 2;
    const M: u32 = 3;
    const D: u32 = 4;

    let mut f = WasmFunction::new_with_locals_types([ValType::F64; 3]);
    let mut emit = |instruction: Wasm<'_>| {
        f.instruction(&instruction);
    };

    // x - x is NaN for infinities and NaN; y != y only for NaN.
    emit(Wasm::LocalGet(X));
    emit(Wasm::LocalGet(X));
    emit(Wasm::F64Sub);
    emit(Wasm::F64Const(0.0_f64.into()));
    emit(Wasm::F64Ne);
    emit(Wasm::LocalGet(Y));
    emit(Wasm::LocalGet(Y));
    emit(Wasm::F64Ne);
    emit(Wasm::I32Or);
    emit(Wasm::LocalGet(Y));
    emit(Wasm::F64Const(0.0_f64.into()));
    emit(Wasm::F64Eq);
    emit(Wasm::I32Or);
    emit(Wasm::If(BlockType::Empty));
    emit(Wasm::F64Const(f64::NAN.into()));
    emit(Wasm::Return);
    emit(Wasm::End);

    emit(Wasm::LocalGet(X));
    emit(Wasm::F64Abs);
    emit(Wasm::LocalSet(R));
    emit(Wasm::LocalGet(Y));
    emit(Wasm::F64Abs);
    emit(Wasm::LocalSet(M));

    // |x| < |y|, including an infinite y.
    emit(Wasm::LocalGet(R));
    emit(Wasm::LocalGet(M));
    emit(Wasm::F64Lt);
    emit(Wasm::If(BlockType::Empty));
    emit(Wasm::LocalGet(X));
    emit(Wasm::Return);
    emit(Wasm::End);

    // d = largest m * 2^k <= r
    emit(Wasm::LocalGet(M));
    emit(Wasm::LocalSet(D));
    emit(Wasm::Block(BlockType::Empty));
    emit(Wasm::Loop(BlockType::Empty));
    emit(Wasm::LocalGet(D));
    emit(Wasm::F64Const(2.0_f64.into()));
    emit(Wasm::F64Mul);
    emit(Wasm::LocalGet(R));
    emit(Wasm::F64Gt);
    emit(Wasm::BrIf(1));
    emit(Wasm::LocalGet(D));
    emit(Wasm::F64Const(2.0_f64.into()));
    emit(Wasm::F64Mul);
    emit(Wasm::LocalSet(D));
    emit(Wasm::Br(0));
    emit(Wasm::End);
    emit(Wasm::End);

    emit(Wasm::Block(BlockType::Empty));
    emit(Wasm::Loop(BlockType::Empty));
    emit(Wasm::LocalGet(R));
    emit(Wasm::LocalGet(D));
    emit(Wasm::F64Ge);
    emit(Wasm::If(BlockType::Empty));
    emit(Wasm::LocalGet(R));
    emit(Wasm::LocalGet(D));
    emit(Wasm::F64Sub);
    emit(Wasm::LocalSet(R));
    emit(Wasm::End);
    emit(Wasm::LocalGet(D));
    emit(Wasm::LocalGet(M));
    emit(Wasm::F64Eq);
    emit(Wasm::BrIf(1));
    emit(Wasm::LocalGet(D));
    emit(Wasm::F64Const(0.5_f64.into()));
    emit(Wasm::F64Mul);
    emit(Wasm::LocalSet(D));
    emit(Wasm::Br(0));
    emit(Wasm::End);
    emit(Wasm::End);

    emit(Wasm::LocalGet(R));
    emit(Wasm::LocalGet(X));
    emit(Wasm::F64Copysign);
    emit(Wasm::End);
    f
}

fn val_type(ty: IrType) -> Result<ValType, CoreError> {
    match ty {
        IrType::I1 | IrType::I8 | IrType::I16 | IrType::I32 | IrType::Ptr => Ok(ValType::I32),
        IrType::I64 => Ok(ValType::I64),
        IrType::F32 => Ok(ValType::F32),
        IrType::F64 => Ok(ValType::F64),
        IrType::Void => Err(CoreError::BackendError(
            "void has no value representation".into(),
        )),
    }
}

fn result_type(ty: IrType) -> Result<Vec<ValType>, CoreError> {
    if ty == IrType::Void {
        Ok(Vec::new())
    } else {
        Ok(vec![val_type(ty)?])
    }
}

fn const_expr(value: Constant) -> ConstExpr {
    match value {
        Constant::I1(v) => ConstExpr::i32_const(v as i32),
        Constant::I8(v) => ConstExpr::i32_const(v as i32),
        Constant::I16(v) => ConstExpr::i32_const(v as i32),
        Constant::I32(v) => ConstExpr::i32_const(v),
        Constant::I64(v) => ConstExpr::i64_const(v),
        Constant::F32(v) => ConstExpr::f32_const(v.into()),
        Constant::F64(v) => ConstExpr::f64_const(v.into()),
    }
}

struct FunctionEncoder<'a> {
    module: &'a Module,
    strings: &'a [u32],
    body: WasmFunction,
    slot_base: u32,
    temp_base: u32,
    fmod: Option<u32>,
}

fn encode_function(
    module: &Module,
    function: &Function,
    strings: &[u32],
    fmod: Option<u32>,
) -> Result<WasmFunction, CoreError> {
    let mut locals = Vec::with_capacity(function.locals.len() + function.temps.len());
    for slot in &function.locals {
        locals.push(val_type(slot.ty)?);
    }
    for &temp in &function.temps {
        locals.push(val_type(temp)?);
    }

    let slot_base = function.params.len() as u32;
    let mut encoder = FunctionEncoder {
        module,
        strings,
        body: WasmFunction::new_with_locals_types(locals),
        slot_base,
        temp_base: slot_base + function.locals.len() as u32,
        fmod,
    };

    for instruction in &function.entry.instructions {
        encoder.instruction(instruction)?;
    }
    match &function.entry.terminator {
        Terminator::Ret(Some(value)) => {
            encoder.push(*value)?;
            encoder.emit(&Wasm::Return);
        }
        Terminator::Ret(None) => encoder.emit(&Wasm::Return),
        Terminator::Unreachable => encoder.emit(&Wasm::Unreachable),
    }
    encoder.emit(&Wasm::End);
    Ok(encoder.body)
}

impl FunctionEncoder<'_> {
    fn emit(&mut self, instruction: &Wasm<'_>) {
        self.body.instruction(instruction);
    }

    fn push(&mut self, operand: Operand) -> Result<(), CoreError> {
        match operand {
            Operand::Const(constant) => self.emit(&match constant {
                Constant::I1(v) => Wasm::I32Const(v as i32),
                Constant::I8(v) => Wasm::I32Const(v as i32),
                Constant::I16(v) => Wasm::I32Const(v as i32),
                Constant::I32(v) => Wasm::I32Const(v),
                Constant::I64(v) => Wasm::I64Const(v),
                Constant::F32(v) => Wasm::F32Const(v.into()),
                Constant::F64(v) => Wasm::F64Const(v.into()),
            }),
            Operand::Temp(temp) => self.emit(&Wasm::LocalGet(self.temp_base + temp.0)),
            Operand::Param(index) => self.emit(&Wasm::LocalGet(index)),
            Operand::Str(index) => {
                let offset = self.strings.get(index as usize).copied().ok_or_else(|| {
                    CoreError::BackendError(format!("unknown string constant {index}"))
                })?;
                self.emit(&Wasm::I32Const(offset as i32));
            }
        }
        Ok(())
    }

    fn set(&mut self, dest: Temp) {
        self.emit(&Wasm::LocalSet(self.temp_base + dest.0));
    }

    /// Re-normalize a narrow integer result left on the stack.
    fn wrap(&mut self, ty: IrType) {
        match ty {
            IrType::I8 => self.emit(&Wasm::I32Extend8S),
            IrType::I16 => self.emit(&Wasm::I32Extend16S),
            _ => {}
        }
    }

    fn instruction(&mut self, instruction: &Instruction) -> Result<(), CoreError> {
        match instruction {
            Instruction::Alloca { .. } => {}
            Instruction::Store { slot, value } => {
                self.push(*value)?;
                match *slot {
                    SlotRef::Global(index) => self.emit(&Wasm::GlobalSet(index)),
                    SlotRef::Local(index) => self.emit(&Wasm::LocalSet(self.slot_base + index)),
                }
            }
            Instruction::Load { dest, slot } => {
                match *slot {
                    SlotRef::Global(index) => self.emit(&Wasm::GlobalGet(index)),
                    SlotRef::Local(index) => self.emit(&Wasm::LocalGet(self.slot_base + index)),
                }
                self.set(*dest);
            }
            Instruction::Binary {
                dest,
                op,
                ty,
                lhs,
                rhs,
            } => {
                if *op == BinOp::FRem {
                    let helper = self.fmod.ok_or_else(|| {
                        CoreError::BackendError("float remainder helper was not emitted".into())
                    })?;
                    let narrow = *ty == IrType::F32;
                    self.push(*lhs)?;
                    if narrow {
                        self.emit(&Wasm::F64PromoteF32);
                    }
                    self.push(*rhs)?;
                    if narrow {
                        self.emit(&Wasm::F64PromoteF32);
                    }
                    self.emit(&Wasm::Call(helper));
                    if narrow {
                        self.emit(&Wasm::F32DemoteF64);
                    }
                } else {
                    self.push(*lhs)?;
                    self.push(*rhs)?;
                    self.emit(&binary(*op, *ty)?);
                    self.wrap(*ty);
                }
                self.set(*dest);
            }
            Instruction::ICmp {
                dest,
                pred,
                ty,
                lhs,
                rhs,
            } => {
                self.push(*lhs)?;
                self.push(*rhs)?;
                self.emit(&int_compare(*pred, *ty == IrType::I64));
                self.set(*dest);
            }
            Instruction::FCmp {
                dest,
                pred,
                ty,
                lhs,
                rhs,
            } => {
                self.push(*lhs)?;
                self.push(*rhs)?;
                self.emit(&float_compare(*pred, *ty == IrType::F64));
                self.set(*dest);
            }
            Instruction::Neg { dest, ty, operand } => {
                match ty {
                    IrType::F32 => {
                        self.push(*operand)?;
                        self.emit(&Wasm::F32Neg);
                    }
                    IrType::F64 => {
                        self.push(*operand)?;
                        self.emit(&Wasm::F64Neg);
                    }
                    IrType::I64 => {
                        self.emit(&Wasm::I64Const(0));
                        self.push(*operand)?;
                        self.emit(&Wasm::I64Sub);
                    }
                    _ => {
                        self.emit(&Wasm::I32Const(0));
                        self.push(*operand)?;
                        self.emit(&Wasm::I32Sub);
                        self.wrap(*ty);
                    }
                }
                self.set(*dest);
            }
            Instruction::Not { dest, operand } => {
                self.push(*operand)?;
                self.emit(&Wasm::I32Eqz);
                self.set(*dest);
            }
            Instruction::Cast {
                dest,
                op,
                from,
                to,
                operand,
            } => {
                self.push(*operand)?;
                match (op, *from == IrType::I64, *to) {
                    (CastOp::SExt, _, IrType::I64) => self.emit(&Wasm::I64ExtendI32S),
                    // Narrow integers are already sign-extended in i32.
                    (CastOp::SExt, _, _) => {}
                    (CastOp::SIToFP, false, IrType::F32) => self.emit(&Wasm::F32ConvertI32S),
                    (CastOp::SIToFP, true, IrType::F32) => self.emit(&Wasm::F32ConvertI64S),
                    (CastOp::SIToFP, false, _) => self.emit(&Wasm::F64ConvertI32S),
                    (CastOp::SIToFP, true, _) => self.emit(&Wasm::F64ConvertI64S),
                    (CastOp::FPExt, _, _) => self.emit(&Wasm::F64PromoteF32),
                }
                self.set(*dest);
            }
            Instruction::Call { dest, callee, args } => {
                for arg in args {
                    self.push(*arg)?;
                }
                self.emit(&Wasm::Call(*callee));
                let returns_value = self
                    .module
                    .functions
                    .get(*callee as usize)
                    .is_some_and(|f| f.ret != IrType::Void);
                match dest {
                    Some(dest) => self.set(*dest),
                    None if returns_value => self.emit(&Wasm::Drop),
                    None => {}
                }
            }
        }
        Ok(())
    }
}

fn binary(op: BinOp, ty: IrType) -> Result<Wasm<'static>, CoreError> {
    let wide = ty == IrType::I64;
    let instruction = match (op, ty) {
        (BinOp::Add, _) if wide => Wasm::I64Add,
        (BinOp::Sub, _) if wide => Wasm::I64Sub,
        (BinOp::Mul, _) if wide => Wasm::I64Mul,
        (BinOp::SDiv, _) if wide => Wasm::I64DivS,
        (BinOp::SRem, _) if wide => Wasm::I64RemS,
        (BinOp::Add, _) => Wasm::I32Add,
        (BinOp::Sub, _) => Wasm::I32Sub,
        (BinOp::Mul, _) => Wasm::I32Mul,
        (BinOp::SDiv, _) => Wasm::I32DivS,
        (BinOp::SRem, _) => Wasm::I32RemS,
        (BinOp::And, _) => Wasm::I32And,
        (BinOp::Or, _) => Wasm::I32Or,
        (BinOp::FAdd, IrType::F32) => Wasm::F32Add,
        (BinOp::FSub, IrType::F32) => Wasm::F32Sub,
        (BinOp::FMul, IrType::F32) => Wasm::F32Mul,
        (BinOp::FDiv, IrType::F32) => Wasm::F32Div,
        (BinOp::FAdd, IrType::F64) => Wasm::F64Add,
        (BinOp::FSub, IrType::F64) => Wasm::F64Sub,
        (BinOp::FMul, IrType::F64) => Wasm::F64Mul,
        (BinOp::FDiv, IrType::F64) => Wasm::F64Div,
        _ => {
            return Err(CoreError::BackendError(format!(
                "no wasm instruction for '{}' on {ty}",
                op.mnemonic()
            )));
        }
    };
    Ok(instruction)
}

fn int_compare(pred: IntPredicate, wide: bool) -> Wasm<'static> {
    match (pred, wide) {
        (IntPredicate::Eq, false) => Wasm::I32Eq,
        (IntPredicate::Ne, false) => Wasm::I32Ne,
        (IntPredicate::Sgt, false) => Wasm::I32GtS,
        (IntPredicate::Sge, false) => Wasm::I32GeS,
        (IntPredicate::Slt, false) => Wasm::I32LtS,
        (IntPredicate::Sle, false) => Wasm::I32LeS,
        (IntPredicate::Eq, true) => Wasm::I64Eq,
        (IntPredicate::Ne, true) => Wasm::I64Ne,
        (IntPredicate::Sgt, true) => Wasm::I64GtS,
        (IntPredicate::Sge, true) => Wasm::I64GeS,
        (IntPredicate::Slt, true) => Wasm::I64LtS,
        (IntPredicate::Sle, true) => Wasm::I64LeS,
    }
}

fn float_compare(pred: FloatPredicate, wide: bool) -> Wasm<'static> {
    match (pred, wide) {
        (FloatPredicate::Oeq, false) => Wasm::F32Eq,
        (FloatPredicate::Une, false) => Wasm::F32Ne,
        (FloatPredicate::Ogt, false) => Wasm::F32Gt,
        (FloatPredicate::Oge, false) => Wasm::F32Ge,
        (FloatPredicate::Olt, false) => Wasm::F32Lt,
        (FloatPredicate::Ole, false) => Wasm::F32Le,
        (FloatPredicate::Oeq, true) => Wasm::F64Eq,
        (FloatPredicate::Une, true) => Wasm::F64Ne,
        (FloatPredicate::Ogt, true) => Wasm::F64Gt,
        (FloatPredicate::Oge, true) => Wasm::F64Ge,
        (FloatPredicate::Olt, true) => Wasm::F64Lt,
        (FloatPredicate::Ole, true) => Wasm::F64Le,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, Global, Slot};
    use crate::span::SourceId;

    fn function(
        name: &str,
        ret: IrType,
        instructions: Vec<Instruction>,
        temps: Vec<IrType>,
        terminator: Terminator,
    ) -> Function {
        Function {
            name: name.into(),
            params: Vec::new(),
            ret,
            locals: Vec::new(),
            temps,
            entry: Block {
                label: "entry".into(),
                instructions,
                terminator,
            },
            internal: false,
        }
    }

    fn run_i32(bytes: &[u8], name: &str) -> i32 {
        let engine = wasmi::Engine::default();
        let module = wasmi::Module::new(&engine, bytes).expect("module");
        let linker = wasmi::Linker::<()>::new(&engine);
        let mut store = wasmi::Store::new(&engine, ());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        let func = instance
            .get_typed_func::<(), i32>(&store, name)
            .expect("typed func");
        func.call(&mut store, ()).expect("call")
    }

    #[test]
    fn narrow_arithmetic_wraps_like_the_source_type() {
        let mut module = Module::new(SourceId::new("wrap.tp"));
        module.functions.push(function(
            "main",
            IrType::I32,
            vec![
                Instruction::Binary {
                    dest: Temp(0),
                    op: BinOp::Add,
                    ty: IrType::I8,
                    lhs: Operand::Const(Constant::I8(100)),
                    rhs: Operand::Const(Constant::I8(100)),
                },
                Instruction::Cast {
                    dest: Temp(1),
                    op: CastOp::SExt,
                    from: IrType::I8,
                    to: IrType::I32,
                    operand: Operand::Temp(Temp(0)),
                },
            ],
            vec![IrType::I8, IrType::I32],
            Terminator::Ret(Some(Operand::Temp(Temp(1)))),
        ));
        let bytes = generate_wasm(&module).expect("encode");
        wasmparser::Validator::new().validate_all(&bytes).expect("valid wasm");
        assert_eq!(run_i32(&bytes, "main"), -56);
    }

    #[test]
    fn start_function_initializes_globals() {
        let mut module = Module::new(SourceId::new("init.tp"));
        module.globals.push(Global {
            name: "x".into(),
            ty: IrType::I32,
            is_const: false,
            init: Constant::I32(0),
            deferred: true,
        });
        module.functions.push(function(
            "main",
            IrType::I32,
            vec![Instruction::Load {
                dest: Temp(0),
                slot: SlotRef::Global(0),
            }],
            vec![IrType::I32],
            Terminator::Ret(Some(Operand::Temp(Temp(0)))),
        ));
        let mut init = function(
            "__global_init",
            IrType::Void,
            vec![Instruction::Store {
                slot: SlotRef::Global(0),
                value: Operand::Const(Constant::I32(42)),
            }],
            Vec::new(),
            Terminator::Ret(None),
        );
        init.internal = true;
        module.functions.push(init);
        module.init = Some(1);

        let bytes = generate_wasm(&module).expect("encode");
        wasmparser::Validator::new().validate_all(&bytes).expect("valid wasm");
        assert_eq!(run_i32(&bytes, "main"), 42);
    }

    #[test]
    fn strings_are_placed_in_exported_memory() {
        let mut module = Module::new(SourceId::new("str.tp"));
        module.strings.push("ab".into());
        module.strings.push("c".into());
        module.functions.push(function(
            "second",
            IrType::Ptr,
            Vec::new(),
            Vec::new(),
            Terminator::Ret(Some(Operand::Str(1))),
        ));
        let bytes = generate_wasm(&module).expect("encode");
        wasmparser::Validator::new().validate_all(&bytes).expect("valid wasm");
        assert_eq!(run_i32(&bytes, "second"), (DATA_BASE + 3) as i32);

        let engine = wasmi::Engine::default();
        let wasm_module = wasmi::Module::new(&engine, &bytes[..]).expect("module");
        let mut store = wasmi::Store::new(&engine, ());
        let instance = wasmi::Linker::<()>::new(&engine)
            .instantiate_and_start(&mut store, &wasm_module)
            .expect("instantiate");
        let memory = instance.get_memory(&store, "memory").expect("memory export");
        let data = memory.data(&store);
        let base = DATA_BASE as usize;
        assert_eq!(&data[base..base + 5], b"ab\0c\0");
    }

    #[test]
    fn unused_call_results_are_dropped() {
        let mut module = Module::new(SourceId::new("drop.tp"));
        module.functions.push(function(
            "seven",
            IrType::I32,
            Vec::new(),
            Vec::new(),
            Terminator::Ret(Some(Operand::Const(Constant::I32(7)))),
        ));
        module.functions.push(function(
            "main",
            IrType::Void,
            vec![Instruction::Call {
                dest: None,
                callee: 0,
                args: Vec::new(),
            }],
            Vec::new(),
            Terminator::Ret(None),
        ));
        let bytes = generate_wasm(&module).expect("encode");
        wasmparser::Validator::new().validate_all(&bytes).expect("valid wasm");
    }

    #[test]
    fn float_remainder_uses_an_internal_helper() {
        let mut module = Module::new(SourceId::new("frem.tp"));
        module.functions.push(function(
            "main",
            IrType::F32,
            vec![Instruction::Binary {
                dest: Temp(0),
                op: BinOp::FRem,
                ty: IrType::F32,
                lhs: Operand::Const(Constant::F32(1e10)),
                rhs: Operand::Const(Constant::F32(3.0)),
            }],
            vec![IrType::F32],
            Terminator::Ret(Some(Operand::Temp(Temp(0)))),
        ));
        let bytes = generate_wasm(&module).expect("encode");
        wasmparser::Validator::new().validate_all(&bytes).expect("valid wasm");

        let engine = wasmi::Engine::default();
        let wasm_module = wasmi::Module::new(&engine, &bytes[..]).expect("module");
        assert_eq!(wasm_module.exports().count(), 1);
        let mut store = wasmi::Store::new(&engine, ());
        let instance = wasmi::Linker::<()>::new(&engine)
            .instantiate_and_start(&mut store, &wasm_module)
            .expect("instantiate");
        let main = instance
            .get_typed_func::<(), f32>(&store, "main")
            .expect("typed func");
        assert_eq!(main.call(&mut store, ()).expect("call"), 1.0);

        let mut plain = Module::new(SourceId::new("plain.tp"));
        plain.functions.push(function(
            "main",
            IrType::I32,
            Vec::new(),
            Vec::new(),
            Terminator::Ret(Some(Operand::Const(Constant::I32(0)))),
        ));
        let bytes = generate_wasm(&plain).expect("encode");
        let functions = wasmparser::Parser::new(0)
            .parse_all(&bytes)
            .filter_map(Result::ok)
            .find_map(|payload| match payload {
                wasmparser::Payload::FunctionSection(reader) => Some(reader.count()),
                _ => None,
            });
        assert_eq!(functions, Some(1));
    }

    #[test]
    fn locals_follow_parameters() {
        let mut module = Module::new(SourceId::new("locals.tp"));
        let mut f = function(
            "id",
            IrType::I64,
            vec![
                Instruction::Alloca { slot: 0 },
                Instruction::Store {
                    slot: SlotRef::Local(0),
                    value: Operand::Param(0),
                },
                Instruction::Load {
                    dest: Temp(0),
                    slot: SlotRef::Local(0),
                },
            ],
            vec![IrType::I64],
            Terminator::Ret(Some(Operand::Temp(Temp(0)))),
        );
        f.params.push(Slot {
            name: "a".into(),
            ty: IrType::I64,
        });
        f.locals.push(Slot {
            name: "a".into(),
            ty: IrType::I64,
        });
        module.functions.push(f);
        let bytes = generate_wasm(&module).expect("encode");
        wasmparser::Validator::new().validate_all(&bytes).expect("valid wasm");
    }
}
