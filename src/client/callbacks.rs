//! Callback registrations
//!
//! Each channel keeps an ordered list of handlers. A handler is registered
//! together with a fixed argument value and is invoked as
//! `handler(sensor_id, readings, &args)` for every push on its channel.
//!
//! Handlers run on the client's receive loop. A handler that blocks stalls
//! all further dispatch, so long work must be handed off to a task of its own.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::error;

pub type Handler = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Default)]
pub struct CallbackRegistry {
    handlers: HashMap<String, Vec<Handler>>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&str, usize> = self
            .handlers
            .iter()
            .map(|(channel, list)| (channel.as_str(), list.len()))
            .collect();
        f.debug_struct("CallbackRegistry")
            .field("handlers", &counts)
            .finish()
    }
}

impl CallbackRegistry {
    /// Appends a handler and returns how many the channel now has.
    pub fn register<F, A>(&mut self, sensor_id: &str, handler: F, args: A) -> usize
    where
        F: Fn(&str, &str, &A) + Send + Sync + 'static,
        A: Send + Sync + 'static,
    {
        let bound: Handler =
            Arc::new(move |sensor_id: &str, readings: &str| handler(sensor_id, readings, &args));
        let list = self.handlers.entry(sensor_id.to_string()).or_default();
        list.push(bound);
        list.len()
    }

    /// Drops the most recently registered handler for the channel.
    pub fn pop(&mut self, sensor_id: &str) -> Option<Handler> {
        let list = self.handlers.get_mut(sensor_id)?;
        let handler = list.pop();
        if list.is_empty() {
            self.handlers.remove(sensor_id);
        }
        handler
    }

    /// Drops every handler for the channel and returns how many there were.
    pub fn remove(&mut self, sensor_id: &str) -> usize {
        self.handlers.remove(sensor_id).map_or(0, |list| list.len())
    }

    pub fn handlers(&self, sensor_id: &str) -> Vec<Handler> {
        self.handlers.get(sensor_id).cloned().unwrap_or_default()
    }

    pub fn channels(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn count(&self, sensor_id: &str) -> usize {
        self.handlers.get(sensor_id).map_or(0, Vec::len)
    }
}

/// Invokes handlers in registration order. A panicking handler is logged and
/// does not prevent the rest from running. Returns the number that panicked.
pub fn dispatch(handlers: &[Handler], sensor_id: &str, readings: &str) -> usize {
    let mut failed = 0;
    for handler in handlers {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(sensor_id, readings))) {
            failed += 1;
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Callback for {sensor_id} panicked: {reason}");
        }
    }
    failed
}
