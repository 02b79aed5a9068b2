//! Host-provided primitive operations.
//!
//! Every primitive is described by an [`OpDef`] in a single static
//! registry: a printable lexeme, an arity declaration, and either a
//! special-form tag (handled inside the evaluator loop) or a function with
//! the uniform signature `fn(&[Value], &Env) -> Result<Value, Error>`.
//! [`install`] binds the whole registry into an environment frame, which is
//! how the driver builds the initial environment.
//!
//! Categories: list manipulation, elementwise array arithmetic with
//! length-1 broadcasting, printing and file I/O, string operations, the
//! environment/meta ops, and OS access (shell, clock, filesystem, UDP).
//! The matrix and statistics primitives live in [`crate::numeric`] and are
//! registered here alongside everything else.

use std::fs;
use std::io::{BufRead, Write};
use std::net::UdpSocket;
use std::process::Command;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;

use crate::env::Env;
use crate::eval::{eval, Form};
use crate::numeric;
use crate::reader::Reader;
use crate::value::{lock, Arity, NativeFn, OpDef, OpKind, Value};
use crate::{Error, ErrorKind, COPYRIGHT, VERSION};

fn native(name: &'static str, arity: Arity, f: NativeFn) -> OpDef {
    OpDef {
        name,
        arity,
        kind: OpKind::Function(f),
    }
}

fn special(name: &'static str, arity: Arity, form: Form) -> OpDef {
    OpDef {
        name,
        arity,
        kind: OpKind::Special(form),
    }
}

/// The complete primitive registry. Ops are bound into the root frame by
/// [`install`]; a [`Value::Op`] holds a reference into this table, so op
/// identity is table identity.
static OPS: LazyLock<Vec<OpDef>> = LazyLock::new(|| {
    use Arity::AtLeast;
    vec![
        // special forms
        special("quote", AtLeast(1), Form::Quote),
        special("def", AtLeast(2), Form::Def),
        special("=", AtLeast(2), Form::Set),
        special("\\", AtLeast(2), Form::Lambda),
        special("lambda", AtLeast(2), Form::Lambda),
        special("macro", AtLeast(2), Form::Macro),
        special("if", AtLeast(2), Form::If),
        special("while", AtLeast(2), Form::While),
        special("begin", AtLeast(0), Form::Begin),
        special("eval", AtLeast(1), Form::Eval),
        special("apply", AtLeast(2), Form::Apply),
        special("schedule", AtLeast(2), Form::Schedule),
        // lists
        native("list", AtLeast(0), fn_list),
        native("lindex", AtLeast(2), fn_lindex),
        native("lset", AtLeast(3), fn_lset),
        native("llength", AtLeast(1), fn_llength),
        native("lappend", AtLeast(2), fn_lappend),
        native("lrange", AtLeast(3), fn_lrange),
        native("lreplace", AtLeast(4), fn_lreplace),
        native("lshuffle", AtLeast(1), fn_lshuffle),
        // arrays
        native("array", AtLeast(1), fn_array),
        native("==", AtLeast(2), fn_eq),
        native("+", AtLeast(2), fn_add),
        native("-", AtLeast(2), fn_sub),
        native("*", AtLeast(2), fn_mul),
        native("/", AtLeast(2), fn_div),
        native("<", AtLeast(2), fn_lt),
        native("<=", AtLeast(2), fn_le),
        native(">", AtLeast(2), fn_gt),
        native(">=", AtLeast(2), fn_ge),
        native("min", AtLeast(1), fn_min),
        native("max", AtLeast(1), fn_max),
        native("sum", AtLeast(1), fn_sum),
        native("size", AtLeast(1), fn_size),
        native("sin", AtLeast(1), fn_sin),
        native("cos", AtLeast(1), fn_cos),
        native("tan", AtLeast(1), fn_tan),
        native("asin", AtLeast(1), fn_asin),
        native("acos", AtLeast(1), fn_acos),
        native("atan", AtLeast(1), fn_atan),
        native("sinh", AtLeast(1), fn_sinh),
        native("cosh", AtLeast(1), fn_cosh),
        native("tanh", AtLeast(1), fn_tanh),
        native("log", AtLeast(1), fn_log),
        native("log10", AtLeast(1), fn_log10),
        native("exp", AtLeast(1), fn_exp),
        native("abs", AtLeast(1), fn_abs),
        native("sqrt", AtLeast(1), fn_sqrt),
        native("floor", AtLeast(1), fn_floor),
        native("neg", AtLeast(1), fn_neg),
        native("slice", AtLeast(3), fn_slice),
        native("assign", AtLeast(4), fn_assign),
        // printing and I/O
        native("display", AtLeast(1), fn_display),
        native("print", AtLeast(0), fn_print),
        native("save", AtLeast(2), fn_save),
        native("read", AtLeast(0), fn_read),
        native("load", AtLeast(1), fn_load),
        // strings
        native("str", AtLeast(2), fn_str),
        // environment and meta
        native("env", AtLeast(0), fn_env),
        native("type", AtLeast(1), fn_type),
        native("getvar", AtLeast(1), fn_getvar),
        native("info", AtLeast(0), fn_info),
        native("tostr", AtLeast(1), fn_tostr),
        native("array2list", AtLeast(1), fn_array2list),
        // OS
        native("exec", AtLeast(1), fn_exec),
        native("exit", AtLeast(0), fn_exit),
        native("clock", AtLeast(0), fn_clock),
        native("sleep", AtLeast(1), fn_sleep),
        native("dirlist", AtLeast(1), fn_dirlist),
        native("filestat", AtLeast(1), fn_filestat),
        native("udpsend", AtLeast(3), fn_udpsend),
        native("udprecv", AtLeast(1), fn_udprecv),
        // misc numeric
        native("rand", AtLeast(1), fn_rand),
        native("bpf", AtLeast(3), fn_bpf),
        native("plot", AtLeast(1), fn_plot),
        native("scatter", AtLeast(1), fn_scatter),
        // matrices and statistics
        native("matdisp", AtLeast(1), numeric::fn_matdisp),
        native("matmul", AtLeast(2), numeric::fn_matmul),
        native("matadd", AtLeast(2), numeric::fn_matadd),
        native("matsub", AtLeast(2), numeric::fn_matsub),
        native("hadamard", AtLeast(2), numeric::fn_hadamard),
        native("matsum", AtLeast(2), numeric::fn_matsum),
        native("rows", AtLeast(1), numeric::fn_rows),
        native("cols", AtLeast(1), numeric::fn_cols),
        native("getrows", AtLeast(3), numeric::fn_getrows),
        native("getcols", AtLeast(3), numeric::fn_getcols),
        native("transp", AtLeast(1), numeric::fn_transp),
        native("eye", AtLeast(1), numeric::fn_eye),
        native("diag", AtLeast(1), numeric::fn_diag),
        native("inv", AtLeast(1), numeric::fn_inv),
        native("det", AtLeast(1), numeric::fn_det),
        native("rank", AtLeast(1), numeric::fn_rank),
        native("solve", AtLeast(2), numeric::fn_solve),
        native("matcol", AtLeast(2), numeric::fn_matcol),
        native("stack2", AtLeast(2), numeric::fn_stack2),
        native("matmean", AtLeast(1), numeric::fn_matmean),
        native("matstd", AtLeast(1), numeric::fn_matstd),
        native("zscore", AtLeast(1), numeric::fn_zscore),
        native("cov", AtLeast(1), numeric::fn_cov),
        native("median", AtLeast(2), numeric::fn_median),
        native("linefit", AtLeast(2), numeric::fn_linefit),
        native("pca", AtLeast(1), numeric::fn_pca),
        native("kmeans", AtLeast(2), numeric::fn_kmeans),
        native("knn", AtLeast(4), numeric::fn_knn),
    ]
});

/// Bind every primitive into `env` and return it.
pub fn install(env: Env) -> Env {
    let ops: &'static [OpDef] = OPS.as_slice();
    for op in ops {
        env.define(op.name, Value::Op(op));
    }
    env
}

//
// shared helpers
//

/// Non-negative integer read of a scalar, for indices and counts.
fn index_arg(v: &Value) -> Result<usize, Error> {
    let x = v.number()?;
    if x < 0.0 {
        return Err(Error::invalid_indexing(v));
    }
    Ok(x as usize)
}

/// Optional stride argument, defaulting to 1; zero is rejected.
fn stride_arg(args: &[Value], at: usize) -> Result<usize, Error> {
    match args.get(at) {
        Some(v) => {
            let stride = index_arg(v)?;
            if stride < 1 {
                return Err(Error::invalid_indexing(v));
            }
            Ok(stride)
        }
        None => Ok(1),
    }
}

/// Elementwise combination with length-1 broadcasting.
fn broadcast(a: &[f64], b: &[f64], f: impl Fn(f64, f64) -> f64) -> Result<Vec<f64>, Error> {
    if a.len() == b.len() {
        Ok(a.iter().zip(b).map(|(x, y)| f(*x, *y)).collect())
    } else if a.len() == 1 {
        Ok(b.iter().map(|y| f(a[0], *y)).collect())
    } else if b.len() == 1 {
        Ok(a.iter().map(|x| f(*x, b[0])).collect())
    } else {
        Err(Error::new(
            ErrorKind::InvalidMatrixSize,
            format!("invalid matrix size ({} vs {})", a.len(), b.len()),
        ))
    }
}

fn fold_arith(args: &[Value], f: impl Fn(f64, f64) -> f64) -> Result<Value, Error> {
    let mut acc = args[0].array_items()?;
    for arg in &args[1..] {
        acc = broadcast(&acc, &arg.array_items()?, &f)?;
    }
    Ok(Value::array(acc))
}

fn compare(args: &[Value], f: impl Fn(f64, f64) -> bool) -> Result<Value, Error> {
    let a = args[0].array_items()?;
    let b = args[1].array_items()?;
    Ok(Value::array(broadcast(&a, &b, |x, y| {
        if f(x, y) {
            1.0
        } else {
            0.0
        }
    })?))
}

//
// lists
//

fn fn_list(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::list(args.to_vec()))
}

fn fn_lindex(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let items = args[0].list_items()?;
    let i = index_arg(&args[1])?;
    items
        .get(i)
        .cloned()
        .ok_or_else(|| Error::invalid_indexing(&args[1]))
}

fn fn_lset(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let i = index_arg(&args[2])?;
    match &args[0] {
        Value::List(handle) => {
            let mut items = lock(handle);
            if i >= items.len() {
                return Err(Error::invalid_indexing(&args[2]));
            }
            items[i] = args[1].clone();
        }
        other => return Err(Error::invalid_type("list", other)),
    }
    Ok(args[0].clone())
}

fn fn_llength(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::scalar(args[0].list_items()?.len() as f64))
}

fn fn_lappend(args: &[Value], _env: &Env) -> Result<Value, Error> {
    match &args[0] {
        Value::List(handle) => {
            lock(handle).extend(args[1..].iter().cloned());
        }
        other => return Err(Error::invalid_type("list", other)),
    }
    Ok(args[0].clone())
}

fn fn_lrange(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let items = args[0].list_items()?;
    let start = index_arg(&args[1])?;
    let len = index_arg(&args[2])?;
    let stride = stride_arg(args, 3)?;
    let mut out = Vec::new();
    for k in 0..len {
        match items.get(start + k * stride) {
            Some(item) => out.push(item.clone()),
            None => break, // out-of-range clamps
        }
    }
    Ok(Value::list(out))
}

fn fn_lreplace(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let replacement = args[1].list_items()?;
    let start = args[2].number()?;
    let len = args[3].number()?;
    let stride = match args.get(4) {
        Some(v) => v.number()?,
        None => 1.0,
    };
    // bad indexing degrades to nil rather than failing
    if start < 0.0 || len < 0.0 || stride < 1.0 {
        return Ok(Value::nil());
    }
    let (start, len, stride) = (start as usize, len as usize, stride as usize);
    match &args[0] {
        Value::List(handle) => {
            let mut items = lock(handle);
            if start >= items.len() {
                return Ok(Value::nil());
            }
            for k in 0..len.min(replacement.len()) {
                let at = start + k * stride;
                if at >= items.len() {
                    break;
                }
                items[at] = replacement[k].clone();
            }
        }
        other => return Err(Error::invalid_type("list", other)),
    }
    Ok(args[1].clone())
}

fn fn_lshuffle(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let mut items = args[0].list_items()?;
    items.shuffle(&mut rand::thread_rng());
    Ok(Value::list(items))
}

//
// arrays
//

fn fn_array(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let mut out = Vec::new();
    for arg in args {
        out.extend(arg.array_items()?);
    }
    Ok(Value::array(out))
}

fn fn_eq(args: &[Value], _env: &Env) -> Result<Value, Error> {
    match (&args[0], &args[1]) {
        (Value::Array(_), Value::Array(_)) => {
            let a = args[0].array_items()?;
            let b = args[1].array_items()?;
            if a.len() != b.len() && a.len() != 1 && b.len() != 1 {
                return Ok(Value::scalar(0.0));
            }
            Ok(Value::array(broadcast(&a, &b, |x, y| {
                if (x - y).abs() < crate::value::EPSILON {
                    1.0
                } else {
                    0.0
                }
            })?))
        }
        (a, b) => Ok(Value::scalar(if a == b { 1.0 } else { 0.0 })),
    }
}

fn fn_add(args: &[Value], _env: &Env) -> Result<Value, Error> {
    fold_arith(args, |x, y| x + y)
}

fn fn_sub(args: &[Value], _env: &Env) -> Result<Value, Error> {
    fold_arith(args, |x, y| x - y)
}

fn fn_mul(args: &[Value], _env: &Env) -> Result<Value, Error> {
    fold_arith(args, |x, y| x * y)
}

fn fn_div(args: &[Value], _env: &Env) -> Result<Value, Error> {
    fold_arith(args, |x, y| x / y)
}

fn fn_lt(args: &[Value], _env: &Env) -> Result<Value, Error> {
    compare(args, |x, y| x < y)
}

fn fn_le(args: &[Value], _env: &Env) -> Result<Value, Error> {
    compare(args, |x, y| x <= y)
}

fn fn_gt(args: &[Value], _env: &Env) -> Result<Value, Error> {
    compare(args, |x, y| x > y)
}

fn fn_ge(args: &[Value], _env: &Env) -> Result<Value, Error> {
    compare(args, |x, y| x >= y)
}

fn fn_min(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let items = args[0].array_items()?;
    Ok(Value::scalar(items.iter().copied().fold(f64::INFINITY, f64::min)))
}

fn fn_max(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let items = args[0].array_items()?;
    Ok(Value::scalar(
        items.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    ))
}

fn fn_sum(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::scalar(args[0].array_items()?.iter().sum()))
}

fn fn_size(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::scalar(args[0].array_items()?.len() as f64))
}

macro_rules! elementwise {
    ($name:ident, $f:expr) => {
        fn $name(args: &[Value], _env: &Env) -> Result<Value, Error> {
            let items = args[0].array_items()?;
            Ok(Value::array(items.into_iter().map($f).collect()))
        }
    };
}

elementwise!(fn_sin, f64::sin);
elementwise!(fn_cos, f64::cos);
elementwise!(fn_tan, f64::tan);
elementwise!(fn_asin, f64::asin);
elementwise!(fn_acos, f64::acos);
elementwise!(fn_atan, f64::atan);
elementwise!(fn_sinh, f64::sinh);
elementwise!(fn_cosh, f64::cosh);
elementwise!(fn_tanh, f64::tanh);
elementwise!(fn_log, f64::ln);
elementwise!(fn_log10, f64::log10);
elementwise!(fn_exp, f64::exp);
elementwise!(fn_abs, f64::abs);
elementwise!(fn_sqrt, f64::sqrt);
elementwise!(fn_floor, f64::floor);
elementwise!(fn_neg, |x: f64| -x);

fn fn_slice(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let items = args[0].array_items()?;
    let start = index_arg(&args[1])?;
    let len = index_arg(&args[2])?;
    let stride = stride_arg(args, 3)?;
    if start >= items.len() {
        return Err(Error::invalid_indexing(&args[1]));
    }
    let mut out = Vec::new();
    for k in 0..len {
        match items.get(start + k * stride) {
            Some(x) => out.push(*x),
            None => break, // clips at source end
        }
    }
    if out.is_empty() {
        return Err(Error::invalid_indexing(&args[2]));
    }
    Ok(Value::array(out))
}

fn fn_assign(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let src = args[1].array_items()?;
    let start = index_arg(&args[2])?;
    let len = index_arg(&args[3])?;
    let stride = stride_arg(args, 4)?;
    match &args[0] {
        Value::Array(handle) => {
            let mut dst = lock(handle);
            if start >= dst.len() {
                return Err(Error::invalid_indexing(&args[2]));
            }
            for k in 0..len.min(src.len()) {
                let at = start + k * stride;
                if at >= dst.len() {
                    break; // clips at destination end
                }
                dst[at] = src[k];
            }
        }
        other => return Err(Error::invalid_type("array", other)),
    }
    Ok(args[0].clone())
}

//
// printing and I/O
//

fn fn_display(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let mut out = std::io::stdout();
    for arg in args {
        let _ = out.write_all(arg.display_form().as_bytes());
        // arrays print with a trailing newline
        if matches!(arg, Value::Array(_)) {
            let _ = out.write_all(b"\n");
        }
    }
    let _ = out.flush();
    Ok(Value::nil())
}

fn fn_print(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let mut out = std::io::stdout();
    for arg in args {
        let _ = out.write_all(arg.display_form().as_bytes());
    }
    let _ = out.write_all(b"\n");
    let _ = out.flush();
    Ok(Value::nil())
}

fn fn_save(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let path = args[0].string_text()?;
    let mut file =
        fs::File::create(path).map_err(|e| Error::io(format!("cannot create {path}: {e}")))?;
    for arg in &args[1..] {
        writeln!(file, "{}", arg.write_form())
            .map_err(|e| Error::io(format!("cannot write {path}: {e}")))?;
    }
    Ok(Value::nil())
}

fn fn_read(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let source = match args.first() {
        Some(path) => {
            let path = path.string_text()?;
            fs::read_to_string(path).map_err(|e| Error::io(format!("cannot open {path}: {e}")))?
        }
        None => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|e| Error::io(format!("cannot read stdin: {e}")))?;
            line
        }
    };
    let mut reader = Reader::new(&source);
    Ok(reader.read()?.unwrap_or_else(Value::nil))
}

/// Open `path` and evaluate each top-level form in `env`. Per-expression
/// errors are printed with a `[file:line]` prefix and evaluation continues
/// at the next form; only a missing file is an error to the caller.
pub fn load_file(path: &str, env: &Env) -> Result<Value, Error> {
    let source = fs::read_to_string(path)
        .map_err(|e| Error::io(format!("cannot open input file {path}: {e}")))?;
    let mut reader = Reader::new(&source);
    loop {
        match reader.read() {
            Ok(Some(form)) => {
                if let Err(err) = eval(&form, env) {
                    eprintln!("[{path}:{}] error: {err}", reader.line());
                }
            }
            Ok(None) => break,
            Err(err) => {
                eprintln!("[{path}:{}] error: {err}", reader.line());
                break;
            }
        }
    }
    Ok(Value::nil())
}

fn fn_load(args: &[Value], env: &Env) -> Result<Value, Error> {
    load_file(args[0].string_text()?, env)
}

//
// strings
//

fn fn_str(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let cmd = args[0].symbol_name()?;
    let text = args[1].string_text()?;
    match cmd {
        "length" => Ok(Value::scalar(text.len() as f64)),
        "find" => {
            let needle = str_arg(args, 2)?;
            Ok(Value::scalar(match text.find(needle) {
                Some(at) => at as f64,
                None => -1.0,
            }))
        }
        "range" => {
            let start = index_arg(str_val(args, 2)?)?;
            let len = index_arg(str_val(args, 3)?)?;
            let bytes = text.as_bytes();
            let start = start.min(bytes.len());
            let end = (start + len).min(bytes.len());
            Ok(Value::string(
                String::from_utf8_lossy(&bytes[start..end]).into_owned(),
            ))
        }
        "replace" => {
            let from = str_arg(args, 2)?;
            let to = str_arg(args, 3)?;
            Ok(Value::string(text.replace(from, to)))
        }
        "split" => {
            let sep = str_arg(args, 2)?;
            let Some(c) = sep.chars().next() else {
                return Err(Error::invalid_indexing(&args[2]));
            };
            Ok(Value::list(
                text.split(c).map(Value::string).collect(),
            ))
        }
        "regex" => {
            let pattern = str_arg(args, 2)?;
            let re = Regex::new(pattern).map_err(|e| Error::other(format!("bad pattern: {e}")))?;
            let groups = match re.captures(text) {
                Some(caps) => caps
                    .iter()
                    .map(|m| Value::string(m.map(|m| m.as_str()).unwrap_or("")))
                    .collect(),
                None => Vec::new(),
            };
            Ok(Value::list(groups))
        }
        other => Err(Error::other(format!("unknown string command: {other}"))),
    }
}

fn str_val<'a>(args: &'a [Value], at: usize) -> Result<&'a Value, Error> {
    args.get(at)
        .ok_or_else(|| Error::insufficient_arguments(at + 1, args.len()))
}

fn str_arg<'a>(args: &'a [Value], at: usize) -> Result<&'a str, Error> {
    str_val(args, at)?.string_text()
}

//
// environment and meta
//

fn fn_env(args: &[Value], env: &Env) -> Result<Value, Error> {
    let full = matches!(args.first(), Some(Value::Symbol(s)) if s == "full");
    if full {
        Ok(Value::list(
            env.local_bindings()
                .into_iter()
                .map(|(name, value)| Value::list(vec![Value::symbol(name), value]))
                .collect(),
        ))
    } else {
        Ok(Value::list(
            env.local_names().into_iter().map(Value::symbol).collect(),
        ))
    }
}

fn fn_type(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::symbol(args[0].tag_name()))
}

fn fn_getvar(args: &[Value], env: &Env) -> Result<Value, Error> {
    let name = match &args[0] {
        Value::Symbol(s) => s.as_str(),
        Value::Str(s) => s.as_str(),
        other => return Err(Error::invalid_type("symbol", other)),
    };
    env.lookup(name)
}

fn fn_info(_args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::list(vec![
        Value::string(VERSION),
        Value::string(std::env::consts::OS),
        Value::string(COPYRIGHT),
    ]))
}

fn fn_tostr(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let mut out = String::new();
    for arg in args {
        out.push_str(&arg.write_form());
    }
    Ok(Value::string(out))
}

fn fn_array2list(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::list(
        args[0]
            .array_items()?
            .into_iter()
            .map(Value::scalar)
            .collect(),
    ))
}

//
// OS
//

fn fn_exec(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let cmd = args[0].string_text()?;
    let status = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .status()
        .map_err(|e| Error::io(format!("cannot run shell: {e}")))?;
    Ok(Value::scalar(status.code().unwrap_or(-1) as f64))
}

fn fn_exit(_args: &[Value], _env: &Env) -> Result<Value, Error> {
    std::process::exit(0);
}

fn fn_clock(_args: &[Value], _env: &Env) -> Result<Value, Error> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0);
    Ok(Value::scalar(millis))
}

fn fn_sleep(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let msec = args[0].number()?;
    if msec < 0.0 {
        return Err(Error::invalid_indexing(&args[0]));
    }
    std::thread::sleep(std::time::Duration::from_millis(msec as u64));
    Ok(Value::nil())
}

fn fn_dirlist(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let path = args[0].string_text()?;
    let entries =
        fs::read_dir(path).map_err(|e| Error::io(format!("cannot open {path}: {e}")))?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(Value::list(names.into_iter().map(Value::string).collect()))
}

fn fn_filestat(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let path = args[0].string_text()?;
    let meta = fs::metadata(path).map_err(|e| Error::io(format!("cannot stat {path}: {e}")))?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as f64)
        .unwrap_or(0.0);
    Ok(Value::list(vec![
        Value::scalar(meta.len() as f64),
        Value::scalar(mtime),
    ]))
}

fn fn_udpsend(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let host = args[0].string_text()?;
    let port = index_arg(&args[1])? as u16;
    let payload = args[2].string_text()?;
    let socket =
        UdpSocket::bind("0.0.0.0:0").map_err(|e| Error::io(format!("cannot bind socket: {e}")))?;
    let sent = socket
        .send_to(payload.as_bytes(), (host, port))
        .map_err(|e| Error::io(format!("cannot send to {host}:{port}: {e}")))?;
    Ok(Value::scalar(sent as f64))
}

fn fn_udprecv(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let port = index_arg(&args[0])? as u16;
    let max = match args.get(1) {
        Some(v) => index_arg(v)?,
        None => 1024,
    };
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .map_err(|e| Error::io(format!("cannot bind port {port}: {e}")))?;
    let mut buf = vec![0u8; max.max(1)];
    let (n, _) = socket
        .recv_from(&mut buf)
        .map_err(|e| Error::io(format!("cannot receive: {e}")))?;
    Ok(Value::string(
        String::from_utf8_lossy(&buf[..n]).into_owned(),
    ))
}

//
// misc numeric
//

fn fn_rand(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let n = index_arg(&args[0])?;
    if n < 1 {
        return Err(Error::invalid_indexing(&args[0]));
    }
    let mut rng = rand::thread_rng();
    Ok(Value::array((0..n).map(|_| rng.gen::<f64>()).collect()))
}

/// `(bpf n v0 v1 ... vk)` - sample a piecewise-linear break-point function
/// through the given values, evenly spaced, at n points.
fn fn_bpf(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let n = index_arg(&args[0])?;
    if n < 1 {
        return Err(Error::invalid_indexing(&args[0]));
    }
    let mut points = Vec::with_capacity(args.len() - 1);
    for arg in &args[1..] {
        points.push(arg.number()?);
    }
    if points.len() == 1 || n == 1 {
        return Ok(Value::array(vec![points[0]; n]));
    }
    let segments = (points.len() - 1) as f64;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let t = i as f64 / (n - 1) as f64 * segments;
        let seg = (t.floor() as usize).min(points.len() - 2);
        let frac = t - seg as f64;
        out.push(points[seg] + (points[seg + 1] - points[seg]) * frac);
    }
    Ok(Value::array(out))
}

fn write_plot_data(args: &[Value]) -> Result<std::path::PathBuf, Error> {
    let mut series = Vec::with_capacity(args.len());
    for arg in args {
        series.push(arg.array_items()?);
    }
    let rows = series.iter().map(Vec::len).max().unwrap_or(0);
    let path = std::env::temp_dir().join("musil_plot.dat");
    let mut data = String::new();
    for row in 0..rows {
        for column in &series {
            match column.get(row) {
                Some(x) => data.push_str(&format!("{x} ")),
                None => data.push_str("- "),
            }
        }
        data.push('\n');
    }
    fs::write(&path, data).map_err(|e| Error::io(format!("cannot write plot data: {e}")))?;
    Ok(path)
}

fn run_gnuplot(args: &[Value], style: &str) -> Result<Value, Error> {
    let data = write_plot_data(args)?;
    let mut cmd = String::from("plot ");
    for (i, _) in args.iter().enumerate() {
        if i > 0 {
            cmd.push_str(", ");
        }
        cmd.push_str(&format!(
            "'{}' using {} with {style} title 'v{}'",
            data.display(),
            i + 1,
            i
        ));
    }
    Command::new("gnuplot")
        .arg("-persist")
        .arg("-e")
        .arg(&cmd)
        .spawn()
        .map_err(|e| Error::io(format!("cannot run gnuplot: {e}")))?;
    Ok(Value::nil())
}

fn fn_plot(args: &[Value], _env: &Env) -> Result<Value, Error> {
    run_gnuplot(args, "lines")
}

fn fn_scatter(args: &[Value], _env: &Env) -> Result<Value, Error> {
    run_gnuplot(args, "points")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_all;
    use crate::ErrorKind;

    fn run(input: &str) -> Result<Value, Error> {
        let env = crate::global_env();
        run_in(&env, input)
    }

    fn run_in(env: &Env, input: &str) -> Result<Value, Error> {
        let mut last = Value::nil();
        for form in read_all(input)? {
            last = eval(&form, env)?;
        }
        Ok(last)
    }

    fn expect_array(input: &str, want: &[f64]) {
        let got = run(input).unwrap_or_else(|e| panic!("'{input}' failed: {e}"));
        assert_eq!(got, Value::array(want.to_vec()), "'{input}'");
    }

    fn expect_kind(input: &str, kind: ErrorKind) {
        match run(input) {
            Err(err) => assert_eq!(err.kind, kind, "'{input}' gave {err}"),
            Ok(v) => panic!("'{input}' unexpectedly gave {v:?}"),
        }
    }

    #[test]
    fn test_arithmetic_and_broadcasting() {
        expect_array("(+ (array 1 2 3) (array 4 5 6))", &[5.0, 7.0, 9.0]);
        expect_array("(+ (array 1 2 3) 10)", &[11.0, 12.0, 13.0]);
        expect_array("(+ 10 (array 1 2 3))", &[11.0, 12.0, 13.0]);
        expect_array("(- (array 10 20) (array 1 2))", &[9.0, 18.0]);
        expect_array("(* (array 2 3) (array 4 5))", &[8.0, 15.0]);
        expect_array("(/ (array 9 8) (array 3 2))", &[3.0, 4.0]);
        expect_array("(+ 1 2 3)", &[6.0]);
        expect_kind("(+ (array 1 2) (array 1 2 3))", ErrorKind::InvalidMatrixSize);
        expect_kind("(+ 1 \"x\")", ErrorKind::InvalidType);
        expect_kind("(+ 1)", ErrorKind::InsufficientArguments);
    }

    #[test]
    fn test_comparisons_and_equality() {
        expect_array("(< (array 1 5) (array 2 2))", &[1.0, 0.0]);
        expect_array("(>= (array 3 1) 2)", &[1.0, 0.0]);
        expect_array("(== (array 1.0000001) (array 1))", &[1.0]);
        expect_array("(== (array 1 2) (array 1 3))", &[1.0, 0.0]);
        expect_array("(== (array 1 2) (array 1 2 3))", &[0.0]);
        expect_array("(== (list 1 2) (list 1 2))", &[1.0]);
        expect_array("(== (list 1 2) (list 1 3))", &[0.0]);
        expect_array("(== 'a 'a)", &[1.0]);
        expect_array("(== 'a \"a\")", &[0.0]);
        expect_array("(== \"ab\" \"ab\")", &[1.0]);
    }

    #[test]
    fn test_reductions_and_maps() {
        expect_array("(sum (array 1 2 3))", &[6.0]);
        expect_array("(min (array 3 1 2))", &[1.0]);
        expect_array("(max (array 3 1 2))", &[3.0]);
        expect_array("(size (array 4 5 6))", &[3.0]);
        expect_array("(neg (array 1 -2))", &[-1.0, 2.0]);
        expect_array("(abs (array -3 4))", &[3.0, 4.0]);
        expect_array("(floor (array 1.9 -0.5))", &[1.0, -1.0]);
        expect_array("(sqrt (array 4 9))", &[2.0, 3.0]);
        expect_array("(exp (array 0))", &[1.0]);
        expect_array("(log (exp (array 1)))", &[1.0]);
        expect_array("(log10 (array 100))", &[2.0]);
        expect_array("(sin (array 0))", &[0.0]);
        expect_array("(cos (array 0))", &[1.0]);
    }

    #[test]
    fn test_array_slice_and_assign() {
        expect_array("(array 1 (array 2 3) 4)", &[1.0, 2.0, 3.0, 4.0]);
        expect_array("(slice (array 1 2 3 4 5) 1 3)", &[2.0, 3.0, 4.0]);
        expect_array("(slice (array 1 2 3 4 5) 0 3 2)", &[1.0, 3.0, 5.0]);
        // clips at the source end
        expect_array("(slice (array 1 2 3) 1 10)", &[2.0, 3.0]);
        expect_kind("(slice (array 1 2 3) 5 1)", ErrorKind::InvalidIndexing);
        expect_array(
            "(def a (array 0 0 0 0)) (assign a (array 7 8) 1 2) a",
            &[0.0, 7.0, 8.0, 0.0],
        );
        expect_array(
            "(def a (array 0 0 0 0)) (assign a (array 7 8) 0 2 2) a",
            &[7.0, 0.0, 8.0, 0.0],
        );
        expect_kind("(assign (array 1) (array 2) 5 1)", ErrorKind::InvalidIndexing);
    }

    #[test]
    fn test_list_operations() {
        let env = crate::global_env();
        run_in(&env, "(def l (list 1 2 3))").unwrap();
        assert_eq!(run_in(&env, "(llength l)").unwrap(), Value::scalar(3.0));
        assert_eq!(run_in(&env, "(lindex l 1)").unwrap(), Value::scalar(2.0));

        // lappend mutates the shared list
        run_in(&env, "(lappend l 4 5)").unwrap();
        assert_eq!(run_in(&env, "(llength l)").unwrap(), Value::scalar(5.0));

        // lset writes in place
        run_in(&env, "(lset l 9 0)").unwrap();
        assert_eq!(run_in(&env, "(lindex l 0)").unwrap(), Value::scalar(9.0));

        // lrange returns a fresh list, clamped
        assert_eq!(
            run_in(&env, "(lrange l 1 2)").unwrap(),
            Value::list(vec![Value::scalar(2.0), Value::scalar(3.0)])
        );
        assert_eq!(
            run_in(&env, "(lrange l 3 10)").unwrap(),
            Value::list(vec![Value::scalar(4.0), Value::scalar(5.0)])
        );
        assert_eq!(
            run_in(&env, "(lrange l 0 3 2)").unwrap(),
            Value::list(vec![
                Value::scalar(9.0),
                Value::scalar(3.0),
                Value::scalar(5.0)
            ])
        );

        // lreplace writes back and returns the replacement
        assert_eq!(
            run_in(&env, "(lreplace l (list 70 80) 0 2)").unwrap(),
            Value::list(vec![Value::scalar(70.0), Value::scalar(80.0)])
        );
        assert_eq!(run_in(&env, "(lindex l 1)").unwrap(), Value::scalar(80.0));
        // bad indexing returns nil
        assert!(run_in(&env, "(lreplace l (list 1) 99 1)").unwrap().is_nil());

        // lshuffle preserves the elements
        assert_eq!(
            run_in(&env, "(sum (apply array (lshuffle (list 1 2 3 4))))").unwrap(),
            Value::scalar(10.0)
        );

        expect_kind("(lindex (list 1) 5)", ErrorKind::InvalidIndexing);
        expect_kind("(lindex (array 1) 0)", ErrorKind::InvalidType);
    }

    #[test]
    fn test_string_operations() {
        assert_eq!(
            run("(str 'length \"hello\")").unwrap(),
            Value::scalar(5.0)
        );
        assert_eq!(
            run("(str 'find \"hello\" \"llo\")").unwrap(),
            Value::scalar(2.0)
        );
        assert_eq!(
            run("(str 'find \"hello\" \"xyz\")").unwrap(),
            Value::scalar(-1.0)
        );
        assert_eq!(
            run("(str 'range \"hello\" 1 3)").unwrap(),
            Value::string("ell")
        );
        assert_eq!(
            run("(str 'range \"hi\" 1 99)").unwrap(),
            Value::string("i")
        );
        assert_eq!(
            run("(str 'replace \"a-b-c\" \"-\" \"+\")").unwrap(),
            Value::string("a+b+c")
        );
        assert_eq!(
            run("(str 'split \"a,b,c\" \",\")").unwrap(),
            Value::list(vec![
                Value::string("a"),
                Value::string("b"),
                Value::string("c")
            ])
        );
        assert_eq!(
            run("(str 'regex \"ab12cd\" \"([a-z]+)([0-9]+)\")").unwrap(),
            Value::list(vec![
                Value::string("ab12"),
                Value::string("ab"),
                Value::string("12")
            ])
        );
        assert!(run("(str 'regex \"abc\" \"[0-9]+\")").unwrap().is_nil());
        expect_kind("(str 'length 5)", ErrorKind::InvalidType);
    }

    #[test]
    fn test_meta_operations() {
        assert_eq!(run("(type (list 1))").unwrap(), Value::symbol("list"));
        assert_eq!(run("(type 'a)").unwrap(), Value::symbol("symbol"));
        assert_eq!(run("(type \"s\")").unwrap(), Value::symbol("string"));
        assert_eq!(run("(type 1)").unwrap(), Value::symbol("array"));
        assert_eq!(run("(type (\\ (x) x))").unwrap(), Value::symbol("lambda"));
        assert_eq!(run("(type type)").unwrap(), Value::symbol("op"));

        assert_eq!(
            run("(tostr (list 1 \"a\"))").unwrap(),
            Value::string("([1] \"a\")")
        );
        assert_eq!(
            run("(array2list (array 1 2))").unwrap(),
            Value::list(vec![Value::scalar(1.0), Value::scalar(2.0)])
        );

        let env = crate::global_env();
        run_in(&env, "(def inner (\\ (x) (env)))").unwrap();
        let names = run_in(&env, "(inner 5)").unwrap();
        assert_eq!(names, Value::list(vec![Value::symbol("x")]));
        assert_eq!(run_in(&env, "(getvar 'inner)").unwrap().tag_name(), "lambda");
        assert!(run_in(&env, "(getvar 'missing)").is_err());
    }

    #[test]
    fn test_bpf_and_rand() {
        expect_array("(bpf 5 0 1)", &[0.0, 0.25, 0.5, 0.75, 1.0]);
        expect_array("(bpf 3 0 1 0)", &[0.0, 1.0, 0.0]);
        let samples = run("(rand 8)").unwrap().array_items().unwrap();
        assert_eq!(samples.len(), 8);
        assert!(samples.iter().all(|x| (0.0..1.0).contains(x)));
    }

    #[test]
    fn test_save_read_and_load() {
        let dir = std::env::temp_dir();
        let data = dir.join("musil_test_data.txt");
        let prog = dir.join("musil_test_prog.txt");
        let data_path = data.to_string_lossy().into_owned();
        let prog_path = prog.to_string_lossy().into_owned();

        let env = crate::global_env();
        // symbols, strings and lists round-trip through write mode
        run_in(&env, &format!("(save \"{data_path}\" (list 'a \"b c\"))")).unwrap();
        assert_eq!(
            run_in(&env, &format!("(read \"{data_path}\")")).unwrap(),
            Value::list(vec![Value::symbol("a"), Value::string("b c")])
        );

        // load evaluates each form with per-form error isolation
        fs::write(&prog, "(bogus)\n(def x 1)\n").unwrap();
        run_in(&env, &format!("(load \"{prog_path}\")")).unwrap();
        assert_eq!(env.lookup("x").unwrap(), Value::scalar(1.0));

        expect_kind("(load \"/nonexistent/nowhere.m\")", ErrorKind::Io);

        let _ = fs::remove_file(&data);
        let _ = fs::remove_file(&prog);
    }

    #[test]
    fn test_exec_and_clock() {
        assert_eq!(run("(exec \"true\")").unwrap(), Value::scalar(0.0));
        assert_eq!(run("(exec \"exit 3\")").unwrap(), Value::scalar(3.0));
        let t = run("(clock)").unwrap().number().unwrap();
        assert!(t > 0.0);
    }
}
