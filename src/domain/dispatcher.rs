//! Dispatcher Module
//!
//! Resolves a [`Command`] against an immutable [`DispatchTable`] and turns the
//! handler outcome into exactly one [`Reply`].
//!
//! ```text
//! Received ──► Resolving ──┬──► Executing ──► Completed (Success | Failure)
//!                          └──► Unhandled
//! ```

use crate::domain::command::{Command, Reply, ERROR_CODE};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Typed failure returned by a handler.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct HandlerError {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Failure in the generic `ERROR` category.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ERROR_CODE, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A command handler. Runs synchronously relative to the call.
pub trait Handler: Send + Sync {
    fn call(&self, arguments: Option<&Value>) -> Result<Value, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(Option<&Value>) -> Result<Value, HandlerError> + Send + Sync,
{
    fn call(&self, arguments: Option<&Value>) -> Result<Value, HandlerError> {
        self(arguments)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("command name must not be empty")]
    EmptyName,

    #[error("command '{0}' is already registered")]
    Duplicate(String),
}

/// Immutable mapping from command name to handler.
pub struct DispatchTable {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl DispatchTable {
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder {
            handlers: HashMap::new(),
        }
    }

    /// Exact-match lookup. No case folding, no prefixes.
    pub fn get(&self, name: &str) -> Option<&dyn Handler> {
        self.handlers.get(name).map(|h| &**h)
    }
}

pub struct DispatchTableBuilder {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl DispatchTableBuilder {
    pub fn register<H>(mut self, name: impl Into<String>, handler: H) -> Result<Self, TableError>
    where
        H: Handler + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(TableError::EmptyName);
        }
        if self.handlers.contains_key(&name) {
            return Err(TableError::Duplicate(name));
        }
        self.handlers.insert(name, Box::new(handler));
        Ok(self)
    }

    /// Same as [`register`](Self::register), but pins the closure signature.
    pub fn register_fn<F>(self, name: impl Into<String>, f: F) -> Result<Self, TableError>
    where
        F: Fn(Option<&Value>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.register(name, f)
    }

    pub fn build(self) -> DispatchTable {
        DispatchTable {
            handlers: self.handlers,
        }
    }
}

/// Resolves commands and produces one reply per command.
pub struct Dispatcher {
    table: DispatchTable,
}

impl Dispatcher {
    pub fn new(table: DispatchTable) -> Self {
        Self { table }
    }

    pub fn dispatch(&self, command: Command) -> Reply {
        let Command { name, arguments } = command;
        debug!(command = %name, "Resolving command");

        let Some(handler) = self.table.get(&name) else {
            debug!(command = %name, "No handler registered");
            return Reply::Unhandled;
        };

        debug!(command = %name, "Executing handler");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.call(arguments.as_ref())));

        match outcome {
            Ok(Ok(value)) => {
                debug!(command = %name, "Completed with success");
                Reply::Success(value)
            }
            Ok(Err(err)) => {
                warn!(command = %name, code = %err.code, "Handler failed: {}", err.message);
                Reply::Failure {
                    code: err.code,
                    message: err.message,
                    details: err.details,
                }
            }
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                error!(command = %name, "Handler panicked: {}", detail);
                Reply::failure(
                    ERROR_CODE,
                    format!("Unexpected fault in handler '{}': {}", name, detail),
                )
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn echo_dispatcher() -> Dispatcher {
        let table = DispatchTable::builder()
            .register_fn("echo", |args| Ok(args.cloned().unwrap_or(Value::Null)))
            .unwrap()
            .register_fn("fail", |_| {
                Err(HandlerError::new("DENIED", "not allowed").with_details(json!({"retry": false})))
            })
            .unwrap()
            .register_fn("explode", |_| panic!("wires crossed"))
            .unwrap()
            .build();
        Dispatcher::new(table)
    }

    #[test]
    fn test_exact_match_only() {
        let dispatcher = echo_dispatcher();
        for name in ["Echo", "ech", "echo ", "*", ""] {
            assert_eq!(dispatcher.dispatch(Command::new(name)), Reply::Unhandled);
        }
    }

    #[test]
    fn test_arguments_reach_handler() {
        let dispatcher = echo_dispatcher();
        let reply = dispatcher.dispatch(Command::with_arguments("echo", json!([1, 2])));
        assert_eq!(reply, Reply::Success(json!([1, 2])));
    }

    #[test]
    fn test_handler_error_keeps_code_and_details() {
        let dispatcher = echo_dispatcher();
        assert_eq!(
            dispatcher.dispatch(Command::new("fail")),
            Reply::Failure {
                code: "DENIED".into(),
                message: "not allowed".into(),
                details: Some(json!({"retry": false})),
            }
        );
    }

    #[test]
    fn test_panic_becomes_failure() {
        let dispatcher = echo_dispatcher();
        let reply = dispatcher.dispatch(Command::new("explode"));
        match reply {
            Reply::Failure { code, message, .. } => {
                assert_eq!(code, ERROR_CODE);
                assert!(message.contains("wires crossed"));
                assert!(message.contains("explode"));
            }
            other => panic!("expected failure, got {:?}", other),
        }

        // The dispatcher stays usable afterwards.
        assert_eq!(
            dispatcher.dispatch(Command::new("echo")),
            Reply::Success(Value::Null)
        );
    }

    #[test]
    fn test_builder_rejects_bad_keys() {
        let err = DispatchTable::builder()
            .register_fn("", |_| Ok(Value::Null))
            .err();
        assert_eq!(err, Some(TableError::EmptyName));

        let err = DispatchTable::builder()
            .register_fn("a", |_| Ok(Value::Null))
            .unwrap()
            .register_fn("a", |_| Ok(Value::Null))
            .err();
        assert_eq!(err, Some(TableError::Duplicate("a".into())));
    }

    #[test]
    fn test_calls_are_independent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let table = DispatchTable::builder()
            .register_fn("count", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            })
            .unwrap()
            .build();
        let dispatcher = Dispatcher::new(table);

        let first = dispatcher.dispatch(Command::new("count"));
        let second = dispatcher.dispatch(Command::new("count"));
        assert_eq!(first, Reply::empty());
        assert_eq!(second, Reply::empty());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_table_shared_across_threads() {
        let dispatcher = Arc::new(echo_dispatcher());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || dispatcher.dispatch(Command::with_arguments("echo", json!(i))))
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), Reply::Success(json!(i)));
        }
    }
}
