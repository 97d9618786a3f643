use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use topaz_core::lexer::tokenize;
use topaz_core::parser::parse;
use topaz_core::{SourceId, compile_wasm, emit_llvm_ir};
use wasmi::{Engine, Linker, Module, Store};

/// Command line of the Topaz compiler driver.
#[derive(Parser, Debug)]
#[command(version, about = "Compile Topaz source to LLVM IR or WebAssembly", long_about = None)]
struct Cli {
    /// Source file; standard input when omitted.
    #[arg(short, long, value_name = "PATH")]
    input: Option<PathBuf>,

    /// Output file; standard output when omitted (text formats only).
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = Emit::Llvm)]
    emit: Emit,

    #[arg(long, help = "Run the exported `main` if the output format is wasm")]
    run: bool,

    #[arg(short, long, help = "Report each compilation stage on stderr")]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// Token dump, one token per line.
    Tokens,
    /// Debug dump of the syntax tree.
    Ast,
    /// Textual LLVM IR.
    Llvm,
    /// WebAssembly binary.
    Wasm,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    execute(cli)
}

fn execute(cli: Cli) -> Result<()> {
    let (source, source_id) = match &cli.input {
        Some(path) => (
            fs::read_to_string(path)
                .with_context(|| format!("failed to read input file {}", path.display()))?,
            SourceId::new(path.display().to_string()),
        ),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read source from stdin")?;
            (buffer, SourceId::new("<stdin>"))
        }
    };
    let log = |message: String| {
        if cli.verbose {
            eprintln!("[topaz] {message}");
        }
    };

    if cli.emit == Emit::Wasm && cli.output.is_none() && !cli.run {
        bail!("--emit wasm requires --output (or --run)");
    }
    if cli.run && cli.emit != Emit::Wasm {
        eprintln!("--run is ignored for non-wasm outputs");
    }

    match cli.emit {
        Emit::Tokens => {
            let tokens = tokenize(&source, &source_id)?;
            log(format!("lexed {} tokens from {source_id}", tokens.len()));
            let mut dump = String::new();
            for token in &tokens {
                dump.push_str(&format!(
                    "{:?} : '{}' ({}:{})\n",
                    token.kind, token.lexeme, token.line, token.column
                ));
            }
            write_output(cli.output.as_deref(), dump.as_bytes())?;
        }
        Emit::Ast => {
            let tokens = tokenize(&source, &source_id)?;
            let statements = parse(&tokens)?;
            log(format!("parsed {} statements", statements.len()));
            let dump = format!("{statements:#?}\n");
            write_output(cli.output.as_deref(), dump.as_bytes())?;
        }
        Emit::Llvm => {
            let ir = emit_llvm_ir(&source, &source_id)?;
            log(format!("emitted {} lines of LLVM IR", ir.lines().count()));
            write_output(cli.output.as_deref(), ir.as_bytes())?;
        }
        Emit::Wasm => {
            let artifact = compile_wasm(&source, &source_id)?;
            log(format!(
                "lowered {} globals and {} functions",
                artifact.module.globals.len(),
                artifact.module.functions.len()
            ));
            log(format!("encoded {} bytes of wasm", artifact.wasm.len()));
            if let Some(path) = cli.output.as_deref() {
                write_output(Some(path), &artifact.wasm)?;
            }
            if cli.run {
                match run_wasm(&artifact.wasm)? {
                    Some(result) => println!("Program exited with {result}"),
                    None => println!("Program finished"),
                }
            }
        }
    }

    Ok(())
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    let Some(path) = path else {
        io::stdout()
            .write_all(bytes)
            .context("failed to write to stdout")?;
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}

/// Instantiate the module (running its start function) and call the
/// exported zero-argument `main`. Returns the rendered result, or `None`
/// for a `noth` main.
fn run_wasm(wasm: &[u8]) -> Result<Option<String>> {
    let engine = Engine::default();
    let module = Module::new(&engine, wasm).context("failed to compile wasm artifact")?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let instance = linker
        .instantiate_and_start(&mut store, &module)
        .context("failed to instantiate module")?;

    if let Ok(main) = instance.get_typed_func::<(), i32>(&store, "main") {
        let result = main.call(&mut store, ()).context("failed to execute main")?;
        return Ok(Some(result.to_string()));
    }
    if let Ok(main) = instance.get_typed_func::<(), i64>(&store, "main") {
        let result = main.call(&mut store, ()).context("failed to execute main")?;
        return Ok(Some(result.to_string()));
    }
    if let Ok(main) = instance.get_typed_func::<(), f32>(&store, "main") {
        let result = main.call(&mut store, ()).context("failed to execute main")?;
        return Ok(Some(result.to_string()));
    }
    if let Ok(main) = instance.get_typed_func::<(), f64>(&store, "main") {
        let result = main.call(&mut store, ()).context("failed to execute main")?;
        return Ok(Some(result.to_string()));
    }
    let main = instance
        .get_typed_func::<(), ()>(&store, "main")
        .context("exported main function missing or takes parameters")?;
    main.call(&mut store, ()).context("failed to execute main")?;
    Ok(None)
}
