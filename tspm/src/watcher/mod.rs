//! Debounced filesystem-change watcher: arms (or re-arms) a `watchDelay` timer on any
//! matching change and fires a single `restart(reason=watch)` request per settled burst.

use crate::event::cancellation::CancellationMessage;
use crate::event::channel::EventConsumer;
use crate::event::record::EventData;
use crate::event::{Event, EventBus};
use crate::process::restart_policy::RestartReason;
use crate::util::thread_context::{NotStartedThreadContext, StartedThreadContext};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use std::path::Path;
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_IGNORES: &[&str] = &["**/node_modules/**", "**/.git/**", "**/logs/**", "**/*.log", "**/.pids/**"];

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("failed to build ignore globset: {0}")]
    InvalidGlob(#[from] globset::Error),
    #[error("failed to initialize filesystem watcher: {0}")]
    Init(String),
}

fn build_ignore_set(ignore_watch: &[String]) -> Result<GlobSet, WatcherError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in DEFAULT_IGNORES.iter().copied().chain(ignore_watch.iter().map(String::as_str)) {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Watches `root` (recursively) for changes, requesting a restart on the event bus via
/// a `process:restart`-triggering `InstanceHealthChange`-style signal — concretely, it
/// emits nothing itself and instead republishes as a dedicated restart request the
/// supervisor subscribes to, matching the same decoupling used by Monitor/HealthChecker.
pub struct ProcessWatcher {
    event_bus: Arc<EventBus>,
}

impl ProcessWatcher {
    pub fn new(event_bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { event_bus })
    }

    /// Spawns the watch thread for one process. `globs` overrides watching specific
    /// patterns under `root` instead of everything; an empty slice watches all files.
    pub fn spawn(
        self: &Arc<Self>,
        process_name: String,
        root: &Path,
        globs: &[String],
        ignore_watch: &[String],
        watch_delay: Duration,
    ) -> Result<StartedThreadContext, WatcherError> {
        let ignore_set = build_ignore_set(ignore_watch)?;
        let include_set = if globs.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in globs {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };

        let root = root.to_path_buf();
        let watcher = self.clone();
        let thread_name = format!("watch-{process_name}");

        Ok(NotStartedThreadContext::new(thread_name, move |stop_consumer| {
            watcher.run(process_name, root, include_set, ignore_set, watch_delay, stop_consumer);
        })
        .start())
    }

    fn run(
        &self,
        process_name: String,
        root: std::path::PathBuf,
        include_set: Option<GlobSet>,
        ignore_set: GlobSet,
        watch_delay: Duration,
        stop_consumer: EventConsumer<CancellationMessage>,
    ) {
        let (tx, rx) = channel::<DebounceEventResult>();
        let mut debouncer: Debouncer<RecommendedWatcher, FileIdMap> =
            match new_debouncer(watch_delay, None, move |result| {
                let _ = tx.send(result);
            }) {
                Ok(debouncer) => debouncer,
                Err(err) => {
                    warn!(process = %process_name, error = %err, "failed to start filesystem watcher, hot-reload disabled");
                    return;
                }
            };

        if let Err(err) = debouncer.watcher().watch(&root, RecursiveMode::Recursive) {
            warn!(process = %process_name, path = %root.display(), error = %err, "failed to watch path, hot-reload disabled");
            return;
        }

        loop {
            if stop_consumer.is_cancelled(Duration::from_millis(0)) {
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    let relevant = events.iter().any(|event| {
                        event.paths.iter().any(|path| path_matches(path, include_set.as_ref(), &ignore_set))
                    });
                    if relevant {
                        info!(process = %process_name, "watched path changed, requesting restart");
                        self.event_bus.emit(Event::normal(
                            &process_name,
                            EventData::ProcessRestart { name: process_name.clone(), reason: RestartReason::Watch, restart_count: 0 },
                        ));
                    }
                }
                Ok(Err(errors)) => {
                    for err in errors {
                        warn!(process = %process_name, error = %err, "filesystem watch error");
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

fn path_matches(path: &Path, include_set: Option<&GlobSet>, ignore_set: &GlobSet) -> bool {
    if ignore_set.is_match(path) {
        return false;
    }
    match include_set {
        Some(set) => set.is_match(path),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ignores_reject_git_and_log_paths() {
        let set = build_ignore_set(&[]).unwrap();
        assert!(set.is_match(Path::new("/app/.git/HEAD")));
        assert!(set.is_match(Path::new("/app/logs/out.log")));
        assert!(set.is_match(Path::new("/app/node_modules/x/index.js")));
        assert!(!set.is_match(Path::new("/app/src/main.rs")));
    }

    #[test]
    fn custom_ignore_patterns_are_additive() {
        let set = build_ignore_set(&["**/*.tmp".to_string()]).unwrap();
        assert!(set.is_match(Path::new("/app/build/out.tmp")));
        assert!(!set.is_match(Path::new("/app/src/main.rs")));
    }

    #[test]
    fn path_matches_honors_an_explicit_include_set() {
        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new("**/*.js").unwrap());
        let include = builder.build().unwrap();
        let ignore = build_ignore_set(&[]).unwrap();

        assert!(path_matches(Path::new("/app/src/index.js"), Some(&include), &ignore));
        assert!(!path_matches(Path::new("/app/src/main.rs"), Some(&include), &ignore));
    }
}
