use std::fmt;

use thiserror::Error;

use crate::common::span::Span;
use crate::data::value::Value;

/// The closed set of runtime error kinds.
/// Everything an evaluator can raise is one of these;
/// user code can catch most of them (see [`ErrorKind::catchable`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("type error")]
    Type,
    #[error("arity error")]
    Arity,
    #[error("undefined var")]
    UndefinedVar,
    #[error("index error")]
    Index,
    #[error("value error")]
    ValueError,
    #[error("arithmetic error")]
    Arithmetic,
    #[error("stack overflow")]
    StackOverflow,
    #[error("out of memory")]
    OutOfMemory,
    #[error("user exception")]
    UserException,
    #[error("io error")]
    Io,
    #[error("name error")]
    Name,
    #[error("invalid instruction")]
    InvalidInstruction,
}

impl ErrorKind {
    /// Whether a `try` form may intercept this kind of error.
    /// Stack exhaustion, memory exhaustion, and corrupt bytecode
    /// always propagate to the top of the evaluation.
    pub fn catchable(self) -> bool {
        !matches!(
            self,
            ErrorKind::StackOverflow
                | ErrorKind::OutOfMemory
                | ErrorKind::InvalidInstruction
        )
    }
}

/// One entry in the call-frame log: enough to print
/// `(fn-name, namespace, file, line, column)` in a traceback.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub name: String,
    pub namespace: String,
    pub span: Span,
}

/// Represents a runtime error, i.e. a traceback.
/// A `Trace` is pushed through `Result` by both evaluators;
/// spans and call frames accumulate while the error unwinds,
/// so the final trace reflects the error path.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub kind: ErrorKind,
    pub message: String,
    pub spans: Vec<Span>,
    pub frames: Vec<Frame>,
    /// The `Value` a user `throw` raised, if any.
    /// Carried in the error itself so crossing an evaluator boundary
    /// preserves the thrown value's identity.
    pub thrown: Option<Value>,
}

impl Trace {
    /// Creates a new traceback.
    pub fn error(kind: ErrorKind, message: &str, span: Span) -> Trace {
        Trace {
            kind,
            message: message.to_string(),
            spans: vec![span],
            frames: vec![],
            thrown: None,
        }
    }

    /// A traceback for a user-thrown value.
    pub fn thrown(value: Value, span: Span) -> Trace {
        Trace {
            kind: ErrorKind::UserException,
            message: "user exception".to_string(),
            spans: vec![span],
            frames: vec![],
            thrown: Some(value),
        }
    }

    /// Used to add context (i.e. function calls) while unwinding the stack.
    pub fn add_context(&mut self, span: Span) {
        if !span.is_empty() {
            self.spans.push(span);
        }
    }

    /// Records a call frame on the error path.
    pub fn add_frame(&mut self, name: &str, namespace: &str, span: Span) {
        self.frames.push(Frame {
            name: name.to_string(),
            namespace: namespace.to_string(),
            span,
        });
    }

    /// Whether a `try` form may intercept this error.
    pub fn catchable(&self) -> bool {
        self.kind.catchable()
    }

    /// The value a `catch` body binds: the thrown value itself for a
    /// user exception, otherwise the native error lifted into the
    /// canonical ex-info map
    /// `{:__ex-info true, :message <str>, :data {}, :cause nil}`.
    pub fn to_exception_value(&self) -> Value {
        if let Some(thrown) = &self.thrown {
            return thrown.clone();
        }
        Value::map_from_pairs(vec![
            (Value::keyword("__ex-info"), Value::Bool(true)),
            (Value::keyword("message"), Value::from_str(&self.message)),
            (Value::keyword("data"), Value::map_from_pairs(vec![])),
            (Value::keyword("cause"), Value::Nil),
        ])
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Traceback, most recent call last:")?;

        for frame in self.frames.iter().rev() {
            writeln!(
                f,
                "  {}/{} at {}",
                frame.namespace, frame.name, frame.span
            )?;
        }

        for span in self.spans.iter().rev() {
            writeln!(f, "  at {}", span)?;
        }

        write!(f, "Runtime {}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Trace {}

#[cfg(test)]
mod test {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn uncatchable_kinds() {
        assert!(!ErrorKind::StackOverflow.catchable());
        assert!(!ErrorKind::OutOfMemory.catchable());
        assert!(!ErrorKind::InvalidInstruction.catchable());
        assert!(ErrorKind::Type.catchable());
        assert!(ErrorKind::UserException.catchable());
        assert!(ErrorKind::Io.catchable());
        assert!(ErrorKind::Name.catchable());
    }

    #[test]
    fn format() {
        let file: Rc<str> = Rc::from("core.clj");
        let mut trace = Trace::error(
            ErrorKind::Arithmetic,
            "divide by zero",
            Span::new(&file, 4, 2),
        );
        trace.add_frame("div-all", "user", Span::new(&file, 9, 1));

        let printed = format!("{}", trace);
        assert!(printed.contains("user/div-all at core.clj:9:1"));
        assert!(printed.contains("at core.clj:4:2"));
        assert!(printed.contains("Runtime arithmetic error: divide by zero"));
    }
}
