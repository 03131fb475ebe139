//! Filesystem watch on the configuration file
//!
//! The parent directory is watched rather than the file itself: editors that
//! save by rename replace the inode, which would silently end a file watch.

use crate::error::Result;
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error};

/// Quiet period before a burst of writes counts as one change
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Keeps the debouncer (and the OS watch it owns) alive
pub(crate) struct ConfigWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl ConfigWatcher {
    /// Call `on_change` whenever `path` is written or created
    pub(crate) fn start<F>(path: &Path, on_change: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let file_name: Option<OsString> = path.file_name().map(ToOwned::to_owned);
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };

        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let touched = events.iter().any(|event| {
                        matches!(event.event.kind, EventKind::Modify(_) | EventKind::Create(_))
                            && event
                                .event
                                .paths
                                .iter()
                                .any(|p| p.file_name().map(ToOwned::to_owned) == file_name)
                    });
                    if touched {
                        debug!("Config file changed on disk");
                        on_change();
                    }
                }
                Err(errors) => {
                    for e in errors {
                        error!(error = ?e, "Config watcher error");
                    }
                }
            }
        })?;

        debouncer.watch(&dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}
