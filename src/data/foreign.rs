use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::data::value::Value;

/// An opaque handle to a loaded foreign code module (e.g. a
/// WebAssembly instance). The core only knows how to look exported
/// functions up by name; what the functions do happens behind the
/// foreign interface.
pub struct ForeignModule {
    pub name: Rc<str>,
    exports: RefCell<HashMap<Rc<str>, Value>>,
}

impl ForeignModule {
    pub fn new(name: &str) -> ForeignModule {
        ForeignModule {
            name: Rc::from(name),
            exports: RefCell::new(HashMap::new()),
        }
    }

    pub fn provide(&self, name: &str, export: Value) {
        self.exports.borrow_mut().insert(Rc::from(name), export);
    }

    pub fn lookup(&self, name: &str) -> Result<Value, Trace> {
        self.exports.borrow().get(name).cloned().ok_or_else(|| {
            Trace::error(
                ErrorKind::Name,
                &format!("module {} exports no {}", self.name, name),
                Span::empty(),
            )
        })
    }
}

impl Debug for ForeignModule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignModule({})", self.name)
    }
}

type ForeignImpl = Box<dyn Fn(&[Value]) -> Result<Value, Trace>>;

/// A callable foreign function: a name and a boxed entry point.
pub struct ForeignFn {
    pub name: Rc<str>,
    f: ForeignImpl,
}

impl ForeignFn {
    pub fn new(
        name: &str,
        f: impl Fn(&[Value]) -> Result<Value, Trace> + 'static,
    ) -> ForeignFn {
        ForeignFn {
            name: Rc::from(name),
            f: Box::new(f),
        }
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, Trace> {
        (self.f)(args)
    }
}

impl Debug for ForeignFn {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignFn({})", self.name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn module_export_lookup() {
        let module = ForeignModule::new("wasm/math");
        let double = Value::ForeignFn(Rc::new(ForeignFn::new("double", |args| {
            match args {
                [Value::Int(n)] => Ok(Value::Int(n * 2)),
                _ => Ok(Value::Nil),
            }
        })));
        module.provide("double", double);

        let found = module.lookup("double").unwrap();
        match found {
            Value::ForeignFn(f) => {
                assert_eq!(f.invoke(&[Value::Int(21)]).unwrap(), Value::Int(42));
            },
            other => panic!("expected a foreign fn, got {:?}", other),
        }

        assert_eq!(module.lookup("missing").unwrap_err().kind, ErrorKind::Name);
    }
}
