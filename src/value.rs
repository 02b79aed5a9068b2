//! This module defines the runtime value model of the interpreter. The main
//! enum, [`Value`], covers every variant the language manipulates: lists,
//! symbols, strings, numeric arrays, user-defined procedures and macros, and
//! host-provided primitive operations. Lists and arrays are shared handles
//! with interior mutability, so mutating primitives (`lappend`, `lset`,
//! `assign`) are visible through every reference to the same sequence.
//! Equality and printing are customized to match the language semantics:
//! structural equality for lists, epsilon tolerance for arrays, and distinct
//! "display" and "write" print modes.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::env::Env;
use crate::eval::Form;
use crate::Error;

/// Elementwise tolerance for array equality
pub const EPSILON: f64 = 1e-6;

/// Lock a shared handle, recovering the data if a worker panicked mid-update.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Signature of a host-provided primitive: the evaluated argument list and
/// the environment of the call site.
pub type NativeFn = fn(&[Value], &Env) -> Result<Value, Error>;

/// Declared argument-count contract of a primitive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// At least n arguments; the generic check rejects fewer
    AtLeast(usize),
    /// The operation validates its own argument count
    Internal,
}

impl Arity {
    pub(crate) fn validate(self, got: usize) -> Result<(), Error> {
        match self {
            Arity::AtLeast(required) if got < required => {
                Err(Error::insufficient_arguments(required, got))
            }
            _ => Ok(()),
        }
    }
}

/// How a primitive participates in evaluation.
///
/// Special forms receive unevaluated argument expressions and are dispatched
/// inside the evaluator loop (several of them are tail positions); functions
/// receive evaluated arguments through the uniform [`NativeFn`] contract.
pub enum OpKind {
    Special(Form),
    Function(NativeFn),
}

/// Descriptor of a host-provided operation: a printable lexeme, an arity
/// declaration, and the implementation. Descriptors live in a static
/// registry; a [`Value::Op`] is a reference to one, so op equality is
/// descriptor identity.
pub struct OpDef {
    pub name: &'static str,
    pub arity: Arity,
    pub kind: OpKind,
}

/// A user-defined procedure or macro: formal names, body forms, and the
/// environment captured at the creation site.
pub struct Closure {
    pub formals: Vec<String>,
    pub body: Vec<Value>,
    pub env: Env,
}

/// Core runtime value. The tag is intrinsic to the value and never changes.
#[derive(Clone)]
pub enum Value {
    /// Ordered sequence of values; the empty list is nil. Shared and
    /// interior-mutable so list mutators act in place.
    List(Arc<Mutex<Vec<Value>>>),
    /// Identifier with a lexeme
    Symbol(String),
    /// String literal
    Str(String),
    /// Dense real vector, never empty; a scalar is a length-1 array.
    /// Shared so `assign` acts in place.
    Array(Arc<Mutex<Vec<f64>>>),
    /// User-defined procedure
    Lambda(Arc<Closure>),
    /// User-defined macro (arguments unevaluated, result re-evaluated)
    Macro(Arc<Closure>),
    /// Host-provided primitive
    Op(&'static OpDef),
}

impl Value {
    pub fn nil() -> Value {
        Value::List(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(Mutex::new(items)))
    }

    pub fn symbol(name: impl Into<String>) -> Value {
        Value::Symbol(name.into())
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<f64>) -> Value {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    pub fn scalar(x: f64) -> Value {
        Value::array(vec![x])
    }

    /// True for the empty list, the language's absence value.
    pub fn is_nil(&self) -> bool {
        match self {
            Value::List(items) => lock(items).is_empty(),
            _ => false,
        }
    }

    /// Human-readable tag name used in diagnostics and by `type`.
    pub fn tag_name(&self) -> &'static str {
        match self {
            Value::List(_) => "list",
            Value::Symbol(_) => "symbol",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Lambda(_) => "lambda",
            Value::Macro(_) => "macro",
            Value::Op(_) => "op",
        }
    }

    /// Truthiness is defined only on arrays: true iff the first element is
    /// nonzero. Branching on any other variant is a type error.
    pub fn is_true(&self) -> Result<bool, Error> {
        match self {
            Value::Array(items) => Ok(lock(items).first().copied().unwrap_or(0.0) != 0.0),
            other => Err(Error::invalid_type("array", other)),
        }
    }

    /// Snapshot of a list's elements; error for any other variant.
    pub fn list_items(&self) -> Result<Vec<Value>, Error> {
        match self {
            Value::List(items) => Ok(lock(items).clone()),
            other => Err(Error::invalid_type("list", other)),
        }
    }

    /// Snapshot of an array's elements; error for any other variant.
    pub fn array_items(&self) -> Result<Vec<f64>, Error> {
        match self {
            Value::Array(items) => Ok(lock(items).clone()),
            other => Err(Error::invalid_type("array", other)),
        }
    }

    /// First element of an array, the scalar reading of a value.
    pub fn number(&self) -> Result<f64, Error> {
        match self {
            Value::Array(items) => lock(items)
                .first()
                .copied()
                .ok_or_else(|| Error::invalid_indexing(self)),
            other => Err(Error::invalid_type("array", other)),
        }
    }

    pub fn symbol_name(&self) -> Result<&str, Error> {
        match self {
            Value::Symbol(name) => Ok(name),
            other => Err(Error::invalid_type("symbol", other)),
        }
    }

    pub fn string_text(&self) -> Result<&str, Error> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(Error::invalid_type("string", other)),
        }
    }

    /// Print for humans: strings bare, no quoting.
    pub fn display_form(&self) -> String {
        let mut out = String::new();
        self.format(&mut out, false);
        out
    }

    /// Print for re-reading: strings quoted, ops by lexeme.
    pub fn write_form(&self) -> String {
        let mut out = String::new();
        self.format(&mut out, true);
        out
    }

    fn format(&self, out: &mut String, write_mode: bool) {
        match self {
            Value::List(items) => {
                out.push('(');
                let items = lock(items).clone();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    item.format(out, write_mode);
                }
                out.push(')');
            }
            Value::Symbol(name) => out.push_str(name),
            Value::Str(s) => {
                if write_mode {
                    out.push('"');
                    for ch in s.chars() {
                        match ch {
                            '"' => out.push_str("\\\""),
                            '\n' => out.push_str("\\n"),
                            '\t' => out.push_str("\\t"),
                            '\r' => out.push_str("\\r"),
                            c => out.push(c),
                        }
                    }
                    out.push('"');
                } else {
                    out.push_str(s);
                }
            }
            Value::Array(items) => {
                out.push('[');
                let items = lock(items);
                for (i, x) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    format_real(out, *x);
                }
                out.push(']');
            }
            Value::Lambda(c) => format_closure(out, "\\", c),
            Value::Macro(c) => format_closure(out, "macro", c),
            Value::Op(op) => {
                if write_mode {
                    out.push_str(op.name);
                }
            }
        }
    }
}

/// Reals print without a fractional part when they have none.
fn format_real(out: &mut String, x: f64) {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        let _ = write!(out, "{}", x as i64);
    } else {
        let _ = write!(out, "{x}");
    }
}

fn format_closure(out: &mut String, tag: &str, c: &Closure) {
    out.push('(');
    out.push_str(tag);
    out.push_str(" (");
    for (i, name) in c.formals.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(name);
    }
    out.push(')');
    for form in &c.body {
        out.push(' ');
        form.format(out, true);
    }
    out.push(')');
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.write_form())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = lock(a).clone();
                let b = lock(b).clone();
                a == b
            }
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = lock(a);
                let b = lock(b);
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < EPSILON)
            }
            // Ops compare by descriptor identity
            (Value::Op(a), Value::Op(b)) => std::ptr::eq(*a, *b),
            // Closures compare by formals and body; the captured env is not compared
            (Value::Lambda(a), Value::Lambda(b)) | (Value::Macro(a), Value::Macro(b)) => {
                Arc::ptr_eq(a, b) || (a.formals == b.formals && a.body == b.body)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_is_the_empty_list() {
        assert!(Value::nil().is_nil());
        assert!(Value::list(vec![]).is_nil());
        assert!(!Value::list(vec![Value::scalar(0.0)]).is_nil());
        assert!(!Value::scalar(0.0).is_nil());
    }

    #[test]
    fn array_equality_uses_epsilon() {
        assert_eq!(Value::array(vec![1.0000001]), Value::array(vec![1.0]));
        assert_ne!(Value::array(vec![1.001]), Value::array(vec![1.0]));
        assert_ne!(Value::array(vec![1.0]), Value::array(vec![1.0, 1.0]));
    }

    #[test]
    fn list_equality_is_structural() {
        let a = Value::list(vec![Value::scalar(1.0), Value::string("x")]);
        let b = Value::list(vec![Value::scalar(1.0), Value::string("x")]);
        let c = Value::list(vec![Value::scalar(2.0), Value::string("x")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn truthiness_is_array_only() {
        assert!(Value::scalar(1.0).is_true().unwrap());
        assert!(!Value::scalar(0.0).is_true().unwrap());
        assert!(Value::string("x").is_true().is_err());
        assert!(Value::nil().is_true().is_err());
    }

    #[test]
    fn display_and_write_modes() {
        let v = Value::list(vec![
            Value::string("a b"),
            Value::array(vec![1.0, 2.5]),
            Value::symbol("x"),
        ]);
        assert_eq!(v.display_form(), "(a b [1 2.5] x)");
        assert_eq!(v.write_form(), "(\"a b\" [1 2.5] x)");
    }

    #[test]
    fn shared_lists_alias() {
        let a = Value::list(vec![Value::scalar(1.0)]);
        let b = a.clone();
        if let Value::List(items) = &a {
            lock(items).push(Value::scalar(2.0));
        }
        assert_eq!(b.list_items().unwrap().len(), 2);
    }
}
