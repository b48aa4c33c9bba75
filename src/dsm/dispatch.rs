//! Notification dispatch for remote updates.

use std::fmt;

use super::error::{DsmError, Result};
use super::membership::ProcessId;

/// Receives every update that arrives from another process.
///
/// Called with the variable name, the new value and the rank of the local
/// process that applied it.
pub trait UpdateHandler: Send {
    fn on_update(&mut self, name: &str, value: i32, rank: ProcessId);
}

impl<F> UpdateHandler for F
where
    F: FnMut(&str, i32, ProcessId) + Send,
{
    fn on_update(&mut self, name: &str, value: i32, rank: ProcessId) {
        self(name, value, rank)
    }
}

/// Single handler slot.
///
/// Starts empty unless a handler is injected at construction. Dispatching
/// through an empty slot is an error, never a silent drop.
#[derive(Default)]
pub struct Dispatcher {
    handler: Option<Box<dyn UpdateHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher { handler: None }
    }

    pub fn with_handler<H: UpdateHandler + 'static>(handler: H) -> Self {
        Dispatcher {
            handler: Some(Box::new(handler)),
        }
    }

    /// Install or replace the handler.
    pub fn set<H: UpdateHandler + 'static>(&mut self, handler: H) {
        self.handler = Some(Box::new(handler));
    }

    pub fn is_set(&self) -> bool {
        self.handler.is_some()
    }

    /// Fail unless a handler is installed. Lets callers check before mutating state.
    pub fn ensure_ready(&self, name: &str) -> Result<()> {
        if self.handler.is_some() {
            Ok(())
        } else {
            Err(DsmError::HandlerNotSet {
                name: name.to_string(),
            })
        }
    }

    pub fn dispatch(&mut self, name: &str, value: i32, rank: ProcessId) -> Result<()> {
        match self.handler.as_mut() {
            Some(handler) => {
                handler.on_update(name, value, rank);
                Ok(())
            }
            None => Err(DsmError::HandlerNotSet {
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handler_set", &self.is_set())
            .finish()
    }
}
