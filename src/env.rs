//! Environment frames for variable bindings.
//!
//! An environment is a chain of frames, each holding an ordered association
//! list of name/value pairs and a parent link. Lookup walks the chain and
//! the first match wins. `def` always binds in the current frame; `=`
//! rebinds the nearest enclosing binding and fails when none exists.
//!
//! Frames are shared handles: a closure keeps the frame it was created in
//! alive, and a call builds a fresh child of the closure's captured frame
//! (lexical scope). Parent links only point upward, so the frame graph is a
//! forest and plain reference counting reclaims it. Handles are
//! mutex-guarded because deferred tasks may evaluate against a frame from a
//! worker thread.

use std::sync::{Arc, Mutex};

use crate::value::{lock, Value};
use crate::Error;

struct Frame {
    parent: Option<Env>,
    bindings: Vec<(String, Value)>,
}

/// Shared handle to one environment frame.
#[derive(Clone)]
pub struct Env(Arc<Mutex<Frame>>);

impl Env {
    /// A frame with no parent, the root of a chain.
    pub fn root() -> Env {
        Env(Arc::new(Mutex::new(Frame {
            parent: None,
            bindings: Vec::new(),
        })))
    }

    /// A fresh empty frame whose parent is this one.
    pub fn child(&self) -> Env {
        Env(Arc::new(Mutex::new(Frame {
            parent: Some(self.clone()),
            bindings: Vec::new(),
        })))
    }

    /// Walk the chain for `name`; fails with an unbound-identifier error.
    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        let mut env = self.clone();
        loop {
            let parent = {
                let frame = lock(&env.0);
                for (bound, value) in &frame.bindings {
                    if bound == name {
                        return Ok(value.clone());
                    }
                }
                frame.parent.clone()
            };
            match parent {
                Some(p) => env = p,
                None => return Err(Error::unbound(name)),
            }
        }
    }

    /// Bind `name` in this frame, overwriting an existing local binding.
    /// Returns the value.
    pub fn define(&self, name: &str, value: Value) -> Value {
        let mut frame = lock(&self.0);
        for (bound, slot) in frame.bindings.iter_mut() {
            if bound == name {
                *slot = value.clone();
                return value;
            }
        }
        frame.bindings.push((name.to_string(), value.clone()));
        value
    }

    /// Rebind the nearest enclosing `name`; fails when the chain has none.
    pub fn set(&self, name: &str, value: Value) -> Result<Value, Error> {
        let mut env = self.clone();
        loop {
            let parent = {
                let mut frame = lock(&env.0);
                for (bound, slot) in frame.bindings.iter_mut() {
                    if bound == name {
                        *slot = value.clone();
                        return Ok(value);
                    }
                }
                frame.parent.clone()
            };
            match parent {
                Some(p) => env = p,
                None => return Err(Error::unbound(name)),
            }
        }
    }

    /// Names bound in this frame only, in binding order.
    pub fn local_names(&self) -> Vec<String> {
        lock(&self.0)
            .bindings
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// (name, value) pairs of this frame only, in binding order.
    pub fn local_bindings(&self) -> Vec<(String, Value)> {
        lock(&self.0).bindings.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_then_lookup() {
        let env = Env::root();
        env.define("a", Value::scalar(1.0));
        assert_eq!(env.lookup("a").unwrap(), Value::scalar(1.0));
        assert!(env.lookup("b").is_err());
    }

    #[test]
    fn lookup_walks_parents_and_child_shadows() {
        let root = Env::root();
        root.define("a", Value::scalar(1.0));
        root.define("b", Value::scalar(2.0));
        let child = root.child();
        child.define("a", Value::scalar(10.0));
        assert_eq!(child.lookup("a").unwrap(), Value::scalar(10.0));
        assert_eq!(child.lookup("b").unwrap(), Value::scalar(2.0));
        // the parent binding is untouched
        assert_eq!(root.lookup("a").unwrap(), Value::scalar(1.0));
    }

    #[test]
    fn set_rebinds_nearest_and_fails_unbound() {
        let root = Env::root();
        root.define("a", Value::scalar(1.0));
        let child = root.child();
        child.set("a", Value::scalar(5.0)).unwrap();
        assert_eq!(root.lookup("a").unwrap(), Value::scalar(5.0));
        assert!(child.set("missing", Value::nil()).is_err());
    }

    #[test]
    fn define_overwrites_in_current_frame() {
        let env = Env::root();
        env.define("a", Value::scalar(1.0));
        env.define("a", Value::scalar(2.0));
        assert_eq!(env.lookup("a").unwrap(), Value::scalar(2.0));
        assert_eq!(env.local_names(), vec!["a".to_string()]);
    }
}
