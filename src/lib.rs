//! musil - an S-expression music/scientific scripting language
//!
//! A source text is read as parenthesized expressions, evaluated against a
//! lexically-scoped environment, and produces either a printed value or a
//! side effect (I/O, plotting hook, timed task). Values include symbols,
//! strings, numeric vectors, lists, user-defined procedures, and macros.
//!
//! ```lisp
//! (def add (\ (a b) (+ a b)))         ; closures capture their environment
//! (def inc (add (array 1)))           ; under-application curries
//! (inc (array 10))                    ; => [11]
//! (schedule ((display "x")) (array 50) (array 1)) ; deferred evaluation
//! ```
//!
//! ## Semantics at a glance
//!
//! - Numbers are dense real vectors ("arrays"); a scalar is an array of
//!   length one. Arithmetic is elementwise with length-1 broadcasting.
//! - Branching is defined only on arrays: a value is true iff its first
//!   element is nonzero.
//! - Lists are shared, mutable sequences; `lappend` mutates in place.
//! - The evaluator is an iterative loop: `if`, `begin`, `eval`, `apply`
//!   and the last body form of a procedure are tail positions, so
//!   properly tail-recursive code runs in constant stack space.
//! - Under-applying a procedure returns a new procedure closed over the
//!   partially-bound frame (currying).
//! - Macros receive unevaluated arguments; each body form is expanded on
//!   every call and the expansion is evaluated at the call site.
//!
//! ## Modules
//!
//! - `value`: the runtime value model (tagged union, equality, printing)
//! - `env`: chained environment frames
//! - `reader`: S-expression tokenizer and parser
//! - `eval`: the tree-walking evaluator and special forms
//! - `builtins`: host-provided primitive operations
//! - `numeric`: matrix, statistics and learning primitives

use std::fmt;

pub mod builtins;
pub mod env;
pub mod eval;
pub mod numeric;
pub mod reader;
pub mod value;

use env::Env;
use reader::Reader;
use value::Value;

/// Interpreter version reported by the banner and the `info` primitive.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Copyright line printed by the banner.
pub const COPYRIGHT: &str = "(c) 2011-2026 www.musil-lang.org";

/// Categorizes the failure modes of reading and evaluation.
///
/// Errors are reported as formatted strings to the user; the kind exists
/// so callers (the REPL, `load`) can distinguish recoverable conditions,
/// most importantly [`ErrorKind::Incomplete`] which means "the expression
/// is not finished yet, keep reading".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lookup or rebind of a name with no binding in the chain
    Unbound,
    /// A type check on the wrong variant
    InvalidType,
    /// Fewer arguments than an operation's declared minimum
    InsufficientArguments,
    /// More arguments than a procedure has formals
    TooManyArguments,
    /// Out-of-range slice or index
    InvalidIndexing,
    /// Numeric-op shape mismatch
    InvalidMatrixSize,
    /// Head of an application is not an op, lambda or macro
    FunctionExpected,
    /// A file cannot be opened, created, read or written
    Io,
    /// Malformed source text
    Syntax,
    /// Input ended before the expression was complete
    Incomplete,
    /// Anything signalled by a delegated kernel or by user code
    Other,
}

/// A reading or evaluation failure.
///
/// Carries the formatted message, the display form of the offending node
/// when one is known, and a snapshot of the evaluator's pending nodes
/// (innermost first) taken where the error was raised.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    /// Display form of the node the error is about, if any
    pub node: Option<String>,
    /// Pending evaluation nodes, innermost first; attached by the evaluator
    pub trace: Vec<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            node: None,
            trace: Vec::new(),
        }
    }

    /// Attach the offending node's display form.
    pub fn at(mut self, node: &Value) -> Self {
        self.node = Some(node.display_form());
        self
    }

    pub fn unbound(name: &str) -> Self {
        Error::new(ErrorKind::Unbound, format!("unbound identifier: {name}"))
    }

    pub fn invalid_type(required: &str, got: &Value) -> Self {
        Error::new(
            ErrorKind::InvalidType,
            format!("invalid type (required {required}, got {})", got.tag_name()),
        )
        .at(got)
    }

    pub fn insufficient_arguments(required: usize, got: usize) -> Self {
        Error::new(
            ErrorKind::InsufficientArguments,
            format!("insufficient number of arguments (required {required}, got {got})"),
        )
    }

    pub fn too_many_arguments(node: &Value) -> Self {
        Error::new(ErrorKind::TooManyArguments, "too many arguments").at(node)
    }

    pub fn invalid_indexing(node: &Value) -> Self {
        Error::new(ErrorKind::InvalidIndexing, "invalid indexing").at(node)
    }

    pub fn invalid_matrix_size(node: &Value) -> Self {
        Error::new(ErrorKind::InvalidMatrixSize, "invalid matrix size").at(node)
    }

    pub fn function_expected(node: &Value) -> Self {
        Error::new(ErrorKind::FunctionExpected, "function expected").at(node)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Io, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Syntax, message)
    }

    pub fn incomplete() -> Self {
        Error::new(ErrorKind::Incomplete, "unexpected end of input")
    }

    pub fn other(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Other, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(node) = &self.node {
            write!(f, " -> {node}")?;
        }
        if self.trace.len() > 1 {
            write!(f, "\n[--- stack trace ---]")?;
            for frame in &self.trace {
                write!(f, "\n{frame}")?;
            }
        }
        Ok(())
    }
}

/// Build the initial environment with every primitive bound.
pub fn global_env() -> Env {
    builtins::install(Env::root())
}

/// Read and evaluate every top-level form of `input` in `env`, returning
/// the display form of the last result.
///
/// This is the entry point an editor front-end drives: a single shared
/// environment across invocations gives an interactive session, and the
/// returned string is what a REPL would print for the final expression.
pub fn eval_source(input: &str, env: &Env) -> Result<String, Error> {
    let mut reader = Reader::new(input);
    let mut last = Value::nil();
    while let Some(expr) = reader.read()? {
        last = eval::eval(&expr, env)?;
    }
    Ok(last.display_form())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_source_returns_last_result() {
        let env = global_env();
        let out = eval_source("(def a (array 1 2)) (+ a (array 10))", &env).unwrap();
        assert_eq!(out, "[11 12]");
    }

    #[test]
    fn eval_source_shares_environment_across_calls() {
        let env = global_env();
        eval_source("(def x (array 41))", &env).unwrap();
        let out = eval_source("(+ x (array 1))", &env).unwrap();
        assert_eq!(out, "[42]");
    }

    #[test]
    fn error_display_carries_node_and_trace() {
        let mut err = Error::unbound("nope").at(&Value::symbol("nope"));
        assert_eq!(format!("{err}"), "unbound identifier: nope -> nope");
        err.trace = vec!["nope".into(), "(f nope)".into()];
        let text = format!("{err}");
        assert!(text.contains("[--- stack trace ---]"));
        assert!(text.ends_with("(f nope)"));
    }
}
