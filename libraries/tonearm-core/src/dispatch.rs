//! Fire-and-forget delivery of events to handlers

use crate::event::{Event, EventHandler};
use std::sync::Arc;

/// Run `f` detached from the caller
///
/// Uses the blocking pool of the ambient Tokio runtime when there is one,
/// otherwise a short-lived named thread.
pub fn spawn_detached<F>(name: &str, f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        drop(handle.spawn_blocking(f));
        return;
    }

    if let Err(e) = std::thread::Builder::new().name(name.to_string()).spawn(f) {
        tracing::error!(task = name, error = %e, "Failed to spawn detached task");
    }
}

/// Deliver `event` to each handler in its own task
///
/// Returns immediately; a slow handler never delays its siblings or the caller.
pub fn dispatch(handlers: Vec<EventHandler>, event: Event) {
    if handlers.is_empty() {
        return;
    }

    let event = Arc::new(event);
    for handler in handlers {
        let event = Arc::clone(&event);
        spawn_detached("tonearm-event", move || handler(&event));
    }
}
