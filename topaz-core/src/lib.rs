//! Core compiler pipeline for the Topaz language.
//!
//! The pipeline is strictly sequential:
//!
//!   source text
//!     -> lexer      (tokens)
//!     -> parser     (AST)
//!     -> typecheck  (scopes, conversion lattice, constant folding)
//!     -> lower      (ir::Module: globals + single-block functions)
//!     -> codegen_llvm / codegen_wasm
//!
//! Every stage returns `Result<_, CoreError>` and the first error ends
//! the compilation. Drivers (such as `topaz-cli`) own file I/O and exit
//! codes and should go through [`compiler`] rather than wiring the
//! stages themselves.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod error;
pub mod span;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod ast;
pub mod lexer;
pub mod parser;

// ---------------------------------------------------------------------
// Semantic layers: types, values, type checking
// ---------------------------------------------------------------------

pub mod typecheck;
pub mod types;
pub mod value;

// ---------------------------------------------------------------------
// Back-end: lowering, code generation and orchestration
// ---------------------------------------------------------------------

pub mod codegen_llvm;
pub mod codegen_wasm;
pub mod compiler;
pub mod ir;
pub mod lower;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{CompilationArtifact, check, compile, compile_wasm, emit_llvm_ir};
pub use error::CoreError;
pub use span::{Location, SourceId};
