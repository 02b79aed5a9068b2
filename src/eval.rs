//! The tree-walking evaluator.
//!
//! Evaluation is an iterative loop over a current (node, env) pair: tail
//! positions (`if` branches, the last form of `begin` and of a procedure
//! body, `eval`, `apply`) rebind the pair and continue instead of
//! recursing, so properly tail-recursive programs run in constant host
//! stack. Special forms are dispatched on the identity of the resolved
//! [`OpDef`] descriptor, never on the lexeme, so rebinding a name changes
//! what it does.
//!
//! Procedure application binds arguments in a fresh child of the
//! closure's captured frame. Under-application returns a new closure over
//! the remaining formals (currying); over-application is an error. Macros
//! receive their arguments unevaluated, expand their body forms in the
//! call frame, and the expansions are evaluated in the caller's
//! environment.
//!
//! A thread-local stack of the nodes currently under evaluation is
//! maintained for diagnostics: one slot per loop step, truncated on exit,
//! snapshotted into the error when evaluation fails.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::env::Env;
use crate::value::{Closure, OpKind, Value};
use crate::Error;

/// The special forms of the language. Each registry descriptor for a
/// special form carries one of these tags; the evaluator loop dispatches
/// on the tag after resolving the head of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    Quote,
    Def,
    Set,
    Lambda,
    Macro,
    If,
    While,
    Begin,
    Eval,
    Apply,
    Schedule,
}

thread_local! {
    /// Nodes currently being evaluated on this thread, outermost first
    static CALL_STACK: RefCell<Vec<Value>> = const { RefCell::new(Vec::new()) };
}

/// Evaluate `node` in `env`.
pub fn eval(node: &Value, env: &Env) -> Result<Value, Error> {
    let base = CALL_STACK.with(|s| s.borrow().len());
    let result = eval_loop(node.clone(), env.clone(), base).map_err(|mut err| {
        // the innermost failure snapshots the pending nodes, deepest first
        if err.trace.is_empty() {
            err.trace = CALL_STACK.with(|s| {
                s.borrow().iter().rev().map(Value::display_form).collect()
            });
        }
        err
    });
    CALL_STACK.with(|s| s.borrow_mut().truncate(base));
    result
}

fn eval_loop(mut node: Value, mut env: Env, base: usize) -> Result<Value, Error> {
    loop {
        // one diagnostic slot per step; a tail step replaces its predecessor
        CALL_STACK.with(|s| {
            let mut stack = s.borrow_mut();
            stack.truncate(base);
            stack.push(node.clone());
        });

        match &node {
            Value::Symbol(name) => return env.lookup(name),
            Value::List(_) => {}
            other => return Ok(other.clone()),
        }

        let items = node.list_items()?;
        let Some((head_expr, argv)) = items.split_first() else {
            return Ok(Value::nil());
        };

        let head = eval(head_expr, &env)?;
        let (closure, is_macro) = match head {
            Value::Op(op) => match &op.kind {
                OpKind::Special(form) => {
                    op.arity.validate(argv.len()).map_err(|e| e.at(&node))?;
                    match form {
                        Form::Quote => return Ok(argv[0].clone()),
                        Form::Def => {
                            let name = argv[0].symbol_name()?.to_string();
                            let value = eval(&argv[1], &env)?;
                            return Ok(env.define(&name, value));
                        }
                        Form::Set => {
                            let name = argv[0].symbol_name()?.to_string();
                            let value = eval(&argv[1], &env)?;
                            return env.set(&name, value);
                        }
                        Form::Lambda | Form::Macro => {
                            let closure = Arc::new(make_closure(argv, &env)?);
                            return Ok(match form {
                                Form::Macro => Value::Macro(closure),
                                _ => Value::Lambda(closure),
                            });
                        }
                        Form::If => {
                            if eval(&argv[0], &env)?.is_true()? {
                                node = argv[1].clone();
                            } else if argv.len() > 2 {
                                node = argv[2].clone();
                            } else {
                                return Ok(Value::nil());
                            }
                            continue;
                        }
                        Form::While => {
                            let mut last = Value::nil();
                            while eval(&argv[0], &env)?.is_true()? {
                                last = eval(&argv[1], &env)?;
                            }
                            return Ok(last);
                        }
                        Form::Begin => {
                            let Some((tail, init)) = argv.split_last() else {
                                return Ok(Value::nil());
                            };
                            for form in init {
                                eval(form, &env)?;
                            }
                            node = tail.clone();
                            continue;
                        }
                        Form::Eval => {
                            node = eval(&argv[0], &env)?;
                            continue;
                        }
                        Form::Apply => {
                            let args = eval(&argv[1], &env)?;
                            let mut call = vec![argv[0].clone()];
                            call.extend(args.list_items()?);
                            node = Value::list(call);
                            continue;
                        }
                        Form::Schedule => return eval_schedule(argv, &env),
                    }
                }
                OpKind::Function(f) => {
                    let mut args = Vec::with_capacity(argv.len());
                    for arg in argv {
                        args.push(eval(arg, &env)?);
                    }
                    op.arity.validate(args.len()).map_err(|e| e.at(&node))?;
                    return f(&args, &env);
                }
            },
            Value::Lambda(closure) => (closure, false),
            Value::Macro(closure) => (closure, true),
            other => return Err(Error::function_expected(&other)),
        };

        let args = if is_macro {
            argv.to_vec()
        } else {
            let mut out = Vec::with_capacity(argv.len());
            for arg in argv {
                out.push(eval(arg, &env)?);
            }
            out
        };

        let n = closure.formals.len();
        if args.len() > n {
            return Err(Error::too_many_arguments(&node));
        }

        let frame = closure.env.child();
        let bound = args.len();
        for (name, value) in closure.formals.iter().zip(args) {
            frame.define(name, value);
        }

        if bound < n {
            // under-application: close over the remaining formals with the
            // partially-bound frame as environment
            let curried = Arc::new(Closure {
                formals: closure.formals[bound..].to_vec(),
                body: closure.body.clone(),
                env: frame,
            });
            return Ok(if is_macro {
                Value::Macro(curried)
            } else {
                Value::Lambda(curried)
            });
        }

        let Some((tail, init)) = closure.body.split_last() else {
            return Ok(Value::nil());
        };
        if is_macro {
            // each body form is expanded in the call frame and the
            // expansion evaluated at the call site
            for form in init {
                let expansion = eval(form, &frame)?;
                eval(&expansion, &env)?;
            }
            node = eval(tail, &frame)?;
        } else {
            for form in init {
                eval(form, &frame)?;
            }
            node = tail.clone();
            env = frame;
        }
    }
}

fn make_closure(argv: &[Value], env: &Env) -> Result<Closure, Error> {
    let mut formals = Vec::new();
    for formal in argv[0].list_items()? {
        formals.push(formal.symbol_name()?.to_string());
    }
    Ok(Closure {
        formals,
        body: argv[1..].to_vec(),
        env: env.clone(),
    })
}

/// `(schedule (expr...) msec async?)` - arm a deferred evaluation of the
/// wrapped expressions in the current environment. With a truthy `async`
/// the delay and evaluation run on a detached worker and the call returns
/// Array 1 immediately; otherwise the current thread sleeps for `msec`,
/// evaluates inline and returns 1.
fn eval_schedule(argv: &[Value], env: &Env) -> Result<Value, Error> {
    let task = argv[0].list_items()?;
    let msec = eval(&argv[1], env)?.number()?;
    if msec < 0.0 {
        return Err(Error::other("invalid delay").at(&argv[1]));
    }
    let detached = match argv.get(2) {
        Some(flag) => eval(flag, env)?.is_true()?,
        None => false,
    };
    let delay = Duration::from_millis(msec as u64);

    if detached {
        let env = env.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            for expr in &task {
                if let Err(err) = eval(expr, &env) {
                    eprintln!("error: {err}");
                }
            }
        });
    } else {
        thread::sleep(delay);
        for expr in &task {
            eval(expr, env)?;
        }
    }
    Ok(Value::scalar(1.0))
}
