use crate::ast::Program;
use crate::codegen_llvm::generate_llvm_ir;
use crate::codegen_wasm::generate_wasm;
use crate::error::CoreError;
use crate::ir::Module;
use crate::lexer::tokenize;
use crate::lower::lower;
use crate::parser::parse;
use crate::span::SourceId;
use crate::typecheck::analyze;

#[derive(Debug, PartialEq)]
pub struct CompilationArtifact {
    pub wasm: Vec<u8>,
    pub module: Module,
}

/// Lex, parse and analyze one source unit.
///
/// The returned tree has passed semantic analysis and is ready to be
/// handed to [`lower`].
pub fn check(source: &str, source_id: &SourceId) -> Result<Program, CoreError> {
    let tokens = tokenize(source, source_id)?;
    let program = Program {
        statements: parse(&tokens)?,
        source: source_id.clone(),
    };
    analyze(&program)?;
    Ok(program)
}

/// Run the whole pipeline up to the lowered module.
pub fn compile(source: &str, source_id: &SourceId) -> Result<Module, CoreError> {
    let program = check(source, source_id)?;
    lower(program)
}

pub fn emit_llvm_ir(source: &str, source_id: &SourceId) -> Result<String, CoreError> {
    let module = compile(source, source_id)?;
    Ok(generate_llvm_ir(&module))
}

pub fn compile_wasm(source: &str, source_id: &SourceId) -> Result<CompilationArtifact, CoreError> {
    let module = compile(source, source_id)?;
    Ok(CompilationArtifact {
        wasm: generate_wasm(&module)?,
        module,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, Instruction, SlotRef};
    use wasmparser::Validator;

    fn id() -> SourceId {
        SourceId::new("test.tp")
    }

    fn instantiate(source: &str) -> (wasmi::Store<()>, wasmi::Instance) {
        let artifact = compile_wasm(source, &id()).expect("compile should succeed");
        Validator::new()
            .validate_all(&artifact.wasm)
            .expect("generated wasm validates");

        let engine = wasmi::Engine::default();
        let module = wasmi::Module::new(&engine, &artifact.wasm).expect("module");
        let linker = wasmi::Linker::new(&engine);
        let mut store = wasmi::Store::new(&engine, ());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        (store, instance)
    }

    fn run_i32(source: &str) -> i32 {
        let (mut store, instance) = instantiate(source);
        let main = instance
            .get_typed_func::<(), i32>(&store, "main")
            .expect("typed func");
        main.call(&mut store, ()).expect("execute main")
    }

    #[test]
    fn declaration_and_use_lowers_to_two_slots() {
        let module = compile("let int: x = 5; let int: y = x + 1;", &id()).expect("compile");
        assert_eq!(module.globals.len(), 2);
        let init = module.initializer().expect("initializer");
        let loads = init
            .entry
            .instructions
            .iter()
            .filter(|i| matches!(i, Instruction::Load { .. }))
            .count();
        let adds = init
            .entry
            .instructions
            .iter()
            .filter(|i| matches!(i, Instruction::Binary { op: BinOp::Add, .. }))
            .count();
        assert_eq!((loads, adds), (1, 1));
        assert!(matches!(
            init.entry.instructions.last(),
            Some(Instruction::Store {
                slot: SlotRef::Global(1),
                ..
            })
        ));
    }

    #[test]
    fn division_by_zero_stops_before_lowering() {
        let err = compile("let int: x = 1 / 0;", &id()).unwrap_err();
        assert!(matches!(err, CoreError::SemanticError { .. }));
        assert!(err.message().contains("division by zero"));
        assert_eq!(err.to_string(), format!("semantic error at test.tp:1: {}", err.message()));
    }

    #[test]
    fn type_mismatch_names_both_operands() {
        let err = compile("let bool: x = 1 + true;", &id()).unwrap_err();
        assert!(matches!(err, CoreError::SemanticError { .. }));
        assert!(err.message().contains("int") && err.message().contains("bool"));
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let err = compile(
            "fun f(a: int) -> int { return a; }\nlet int: r = f();",
            &id(),
        )
        .unwrap_err();
        assert!(err.message().contains("expected 1 argument, got 0"));
        assert_eq!(err.location().map(|l| l.line), Some(2));
    }

    #[test]
    fn statements_after_return_fail_analysis() {
        let err = check("fun f -> int { return 1; f(); }", &id()).unwrap_err();
        assert!(matches!(err, CoreError::SemanticError { .. }), "{err}");
        assert!(err.message().contains("unreachable statement after 'return'"));
    }

    #[test]
    fn lexical_errors_propagate() {
        let err = compile("let int: x = 1 & 2;", &id()).unwrap_err();
        assert!(matches!(err, CoreError::LexError { .. }));
    }

    #[test]
    fn emits_llvm_ir_for_globals_and_functions() {
        let ir = emit_llvm_ir(
            "let const int: base = 40;\nlet int: total = base + 2;\nfun main -> int { return total; }",
            &id(),
        )
        .expect("emit should succeed");
        assert!(ir.contains("@base = constant i32 40"));
        assert!(ir.contains("@total = global i32 0"));
        assert!(ir.contains("define i32 @main() {"));
        assert!(ir.contains("%t0 = load i32, ptr @total"));
        assert!(ir.contains("define internal void @__global_init() {"));
        assert!(ir.contains("@llvm.global_ctors"));
    }

    #[test]
    fn executes_arithmetic() {
        assert_eq!(run_i32("fun main -> int { return 6 * 7; }"), 42);
        assert_eq!(run_i32("fun main -> int { return 1 - 2 - 3; }"), -4);
        assert_eq!(run_i32("fun main -> int { return -7 / 2 + -7 % 2; }"), -4);
    }

    #[test]
    fn executes_global_initializers_before_main() {
        let source = "let int: base = 40;\nlet int: total = base + 2;\nfun main -> int { return total; }";
        assert_eq!(run_i32(source), 42);
    }

    #[test]
    fn executes_calls_with_widened_arguments() {
        let (mut store, instance) = instantiate(
            "fun twice(x: long) -> long { return x * 2l; }\n\
             fun main -> long { let int: v = 21; return twice(v); }",
        );
        let main = instance
            .get_typed_func::<(), i64>(&store, "main")
            .expect("typed func");
        assert_eq!(main.call(&mut store, ()).expect("execute main"), 42);
    }

    #[test]
    fn char_arithmetic_wraps_to_eight_bits() {
        assert_eq!(
            run_i32("fun main -> char { let char: c = 'd'; return c + c; }"),
            -56
        );
    }

    #[test]
    fn executes_floating_point_remainder() {
        let (mut store, instance) = instantiate("fun main -> double { return 7.5 % 2.0; }");
        let main = instance
            .get_typed_func::<(), f64>(&store, "main")
            .expect("typed func");
        assert_eq!(main.call(&mut store, ()).expect("execute main"), 1.5);
    }

    #[test]
    fn floating_point_remainder_is_exact() {
        let (mut store, instance) = instantiate(
            "fun wide -> double { let double: a = 100000000000000000.0; let double: b = 3.0; return a % b; }\n\
             fun narrow -> float { let float: a = 10000000000.0f; let float: b = 3.0f; return a % b; }\n\
             fun negative -> double { let double: a = -7.5; let double: b = 2.0; return a % b; }\n\
             fun tiny -> double { let double: a = 0.1; let double: b = 0.03; return a % b; }",
        );
        let call_f64 = |store: &mut wasmi::Store<()>, name: &str| {
            instance
                .get_typed_func::<(), f64>(&*store, name)
                .expect("typed func")
                .call(store, ())
                .expect("execute")
        };
        assert_eq!(call_f64(&mut store, "wide"), 1.0);
        assert_eq!(call_f64(&mut store, "negative"), -1.5);
        assert_eq!(call_f64(&mut store, "tiny"), 0.1_f64 % 0.03_f64);

        let narrow = instance
            .get_typed_func::<(), f32>(&store, "narrow")
            .expect("typed func");
        assert_eq!(narrow.call(&mut store, ()).expect("execute"), 1.0);
    }

    #[test]
    fn remainder_edge_cases_match_host_fmod() {
        let (mut store, instance) =
            instantiate("fun rem(a: double, b: double) -> double { return a % b; }");
        let rem = instance
            .get_typed_func::<(f64, f64), f64>(&store, "rem")
            .expect("typed func");
        for (a, b) in [
            (5.0, 3.0),
            (-0.0, 1.0),
            (1e300, 1e-300),
            (f64::MAX, 7.25),
            (3.0, f64::INFINITY),
            (-2.5, -0.75),
        ] {
            let got = rem.call(&mut store, (a, b)).expect("execute rem");
            assert_eq!(got.to_bits(), (a % b).to_bits(), "{a} % {b}");
        }
        for (a, b) in [(5.0, 0.0), (f64::INFINITY, 2.0), (f64::NAN, 2.0), (1.0, f64::NAN)] {
            assert!(rem.call(&mut store, (a, b)).expect("execute rem").is_nan());
        }
    }

    #[test]
    fn negates_variables_at_runtime() {
        assert_eq!(run_i32("fun main -> int { let int: a = 5; return -a; }"), -5);
        assert_eq!(run_i32("fun main -> char { let char: c = 'a'; return -c; }"), -97);

        let (mut store, instance) = instantiate(
            "fun half -> double { let double: d = 1.5; return -d; }\n\
             fun big -> long { let long: l = 9000000000l; return -l; }",
        );
        let half = instance
            .get_typed_func::<(), f64>(&store, "half")
            .expect("typed func");
        assert_eq!(half.call(&mut store, ()).expect("execute"), -1.5);
        let big = instance
            .get_typed_func::<(), i64>(&store, "big")
            .expect("typed func");
        assert_eq!(big.call(&mut store, ()).expect("execute"), -9_000_000_000);
    }

    #[test]
    fn negating_variables_emits_negate_instructions() {
        let ir = emit_llvm_ir(
            "fun i(a: int) -> int { return -a; }\n\
             fun d(x: double) -> double { return -x; }",
            &id(),
        )
        .expect("emit should succeed");
        assert!(ir.contains("%t1 = sub i32 0, %t0"), "{ir}");
        assert!(ir.contains("%t1 = fneg double %t0"), "{ir}");

        let module = compile("fun f(c: char) -> char { return -c; }", &id()).expect("compile");
        let f = module.function("f").expect("function");
        assert!(
            f.entry
                .instructions
                .iter()
                .any(|i| matches!(i, Instruction::Neg { ty: crate::ir::IrType::I8, .. }))
        );
    }

    #[test]
    fn executes_boolean_logic() {
        assert_eq!(
            run_i32("fun main -> bool { let int: a = 3; return a > 2 && !(a == 4); }"),
            1
        );
        assert_eq!(
            run_i32("fun main -> bool { let double: d = 0.5; return d >= 1 || false; }"),
            0
        );
    }

    #[test]
    fn executes_compound_assignment() {
        assert_eq!(
            run_i32("fun main -> int { let int: x = 5; x += 3; x *= 2; x -= 1; return x; }"),
            15
        );
    }

    #[test]
    fn functions_update_globals() {
        let source = "let int: counter;\n\
                      fun bump(by: short) { counter = counter + by; }\n\
                      bump(2s);\n\
                      fun main -> int { bump(5s); return counter; }";
        assert_eq!(run_i32(source), 7);
    }

    #[test]
    fn recursion_compiles() {
        // No branching exists, so the recursion is never executed.
        let artifact = compile_wasm("fun loop(n: int) -> int { return loop(n); }", &id())
            .expect("compile");
        Validator::new().validate_all(&artifact.wasm).expect("valid");
        assert!(artifact.module.function("loop").is_some());
    }
}
