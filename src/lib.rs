// CMM Language Interpreter Library
//
// Lexer, parser and tree-walking evaluator for a small C-like scripting
// language whose programs can define their own infix operators.

// Public modules
pub mod ast;
pub mod config;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod natives;
pub mod operators;
pub mod parser;
pub mod runner;
pub mod source;
pub mod stack;
pub mod value;

// Re-export commonly used items
pub use ast::{Expr, Program, Stmt};
pub use config::Config;
pub use error::{CmmError, ErrorKind, Span, Warning};
pub use evaluator::{Evaluator, ExecutionResult};
pub use lexer::{Keyword, Lexer, Token, TokenType};
pub use natives::{NativeContext, NativeFn, NativeRegistry};
pub use parser::Parser;
pub use value::Value;

// Re-export main functions
pub use runner::run;
