//! LLVM backend: renders a lowered module as textual LLVM IR.
//!
//! Naming scheme inside a function: parameters are `%p.<name>`, their
//! slots and the other locals `%<name>.addr`, temporaries `%t<n>`.
//! Source identifiers cannot contain `.`, so none of these collide.

use crate::ir::{Constant, Function, Global, Instruction, Module, Operand, SlotRef, Terminator};

pub fn generate_llvm_ir(module: &Module) -> String {
    let mut out = String::new();
    out.push_str(&format!("; ModuleID = '{}'\n", module.source));
    out.push_str(&format!(
        "source_filename = \"{}\"\n",
        escape(module.source.as_str().as_bytes(), false)
    ));

    if !module.strings.is_empty() {
        out.push('\n');
    }
    for (index, text) in module.strings.iter().enumerate() {
        out.push_str(&format!(
            "@.str.{index} = private unnamed_addr constant [{} x i8] c\"{}\"\n",
            text.len() + 1,
            escape(text.as_bytes(), true)
        ));
    }

    if !module.globals.is_empty() {
        out.push('\n');
    }
    for global in &module.globals {
        out.push_str(&render_global(global));
    }

    for function in &module.functions {
        out.push('\n');
        render_function(&mut out, module, function);
    }

    if let Some(init) = module.initializer() {
        out.push('\n');
        out.push_str(&format!(
            "@llvm.global_ctors = appending global [1 x {{ i32, ptr, ptr }}] [{{ i32, ptr, ptr }} {{ i32 65535, ptr @{}, ptr null }}]\n",
            init.name
        ));
    }
    out
}

fn render_global(global: &Global) -> String {
    let linkage = if global.is_read_only() {
        "constant"
    } else {
        "global"
    };
    format!(
        "@{} = {linkage} {} {}\n",
        global.name,
        global.ty,
        constant(global.init)
    )
}

fn render_function(out: &mut String, module: &Module, function: &Function) {
    let params = function
        .params
        .iter()
        .map(|param| format!("{} %p.{}", param.ty, param.name))
        .collect::<Vec<_>>()
        .join(", ");
    let linkage = if function.internal { "internal " } else { "" };
    out.push_str(&format!(
        "define {linkage}{} @{}({params}) {{\n",
        function.ret, function.name
    ));
    out.push_str(&format!("{}:\n", function.entry.label));

    for instruction in &function.entry.instructions {
        out.push_str("  ");
        out.push_str(&render_instruction(module, function, instruction));
        out.push('\n');
    }

    match &function.entry.terminator {
        Terminator::Ret(Some(value)) => out.push_str(&format!(
            "  ret {} {}\n",
            function.operand_type(*value),
            operand(function, *value)
        )),
        Terminator::Ret(None) => out.push_str("  ret void\n"),
        Terminator::Unreachable => out.push_str("  unreachable\n"),
    }
    out.push_str("}\n");
}

fn render_instruction(module: &Module, function: &Function, instruction: &Instruction) -> String {
    let typed = |value: Operand| {
        format!(
            "{} {}",
            function.operand_type(value),
            operand(function, value)
        )
    };
    match instruction {
        Instruction::Alloca { slot } => {
            let ty = function
                .locals
                .get(*slot as usize)
                .map(|local| local.ty.to_string())
                .unwrap_or_default();
            format!("{} = alloca {ty}", slot_name(module, function, SlotRef::Local(*slot)))
        }
        Instruction::Store { slot, value } => format!(
            "store {}, ptr {}",
            typed(*value),
            slot_name(module, function, *slot)
        ),
        Instruction::Load { dest, slot } => format!(
            "{dest} = load {}, ptr {}",
            function.operand_type(Operand::Temp(*dest)),
            slot_name(module, function, *slot)
        ),
        Instruction::Binary {
            dest,
            op,
            ty,
            lhs,
            rhs,
        } => format!(
            "{dest} = {} {ty} {}, {}",
            op.mnemonic(),
            operand(function, *lhs),
            operand(function, *rhs)
        ),
        Instruction::ICmp {
            dest,
            pred,
            ty,
            lhs,
            rhs,
        } => format!(
            "{dest} = icmp {} {ty} {}, {}",
            pred.mnemonic(),
            operand(function, *lhs),
            operand(function, *rhs)
        ),
        Instruction::FCmp {
            dest,
            pred,
            ty,
            lhs,
            rhs,
        } => format!(
            "{dest} = fcmp {} {ty} {}, {}",
            pred.mnemonic(),
            operand(function, *lhs),
            operand(function, *rhs)
        ),
        Instruction::Neg { dest, ty, operand: value } => {
            if ty.is_float() {
                format!("{dest} = fneg {ty} {}", operand(function, *value))
            } else {
                format!("{dest} = sub {ty} 0, {}", operand(function, *value))
            }
        }
        Instruction::Not { dest, operand: value } => {
            format!("{dest} = xor i1 {}, true", operand(function, *value))
        }
        Instruction::Cast {
            dest,
            op,
            to,
            operand: value,
            ..
        } => format!("{dest} = {} {} to {to}", op.mnemonic(), typed(*value)),
        Instruction::Call { dest, callee, args } => {
            let (ret, name) = module
                .functions
                .get(*callee as usize)
                .map(|f| (f.ret.to_string(), f.name.as_str()))
                .unwrap_or_else(|| ("void".to_string(), "<unknown>"));
            let args = args
                .iter()
                .map(|arg| typed(*arg))
                .collect::<Vec<_>>()
                .join(", ");
            match dest {
                Some(dest) => format!("{dest} = call {ret} @{name}({args})"),
                None => format!("call {ret} @{name}({args})"),
            }
        }
    }
}

fn slot_name(module: &Module, function: &Function, slot: SlotRef) -> String {
    match slot {
        SlotRef::Global(index) => module
            .globals
            .get(index as usize)
            .map(|global| format!("@{}", global.name))
            .unwrap_or_else(|| format!("@global.{index}")),
        SlotRef::Local(index) => function
            .locals
            .get(index as usize)
            .map(|local| format!("%{}.addr", local.name))
            .unwrap_or_else(|| format!("%local.{index}")),
    }
}

fn operand(function: &Function, value: Operand) -> String {
    match value {
        Operand::Const(c) => constant(c),
        Operand::Temp(temp) => temp.to_string(),
        Operand::Param(index) => function
            .params
            .get(index as usize)
            .map(|param| format!("%p.{}", param.name))
            .unwrap_or_else(|| format!("%p.{index}")),
        Operand::Str(index) => format!("@.str.{index}"),
    }
}

/// Constants in LLVM syntax. Floating-point values use the exact
/// hexadecimal form; `float` constants are written as the equivalent
/// `double` bit pattern, as LLVM requires.
fn constant(value: Constant) -> String {
    match value {
        Constant::I1(v) => v.to_string(),
        Constant::I8(v) => v.to_string(),
        Constant::I16(v) => v.to_string(),
        Constant::I32(v) => v.to_string(),
        Constant::I64(v) => v.to_string(),
        Constant::F32(v) => format!("0x{:016X}", (v as f64).to_bits()),
        Constant::F64(v) => format!("0x{:016X}", v.to_bits()),
    }
}

/// Escape bytes for a `c"..."` string. Printable ASCII other than `"`
/// and `\` is kept, everything else becomes `\XX`.
fn escape(bytes: &[u8], nul_terminate: bool) -> String {
    let mut escaped = String::with_capacity(bytes.len());
    for &byte in bytes {
        if (0x20..0x7f).contains(&byte) && byte != b'"' && byte != b'\\' {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("\\{byte:02X}"));
        }
    }
    if nul_terminate {
        escaped.push_str("\\00");
    }
    escaped
}
