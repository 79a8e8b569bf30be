use crate::errors::ProcessorError;
use crate::session::RootSession;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// Refreshes a session's ignore patterns whenever its ignore file is
/// created, written, renamed or removed.
pub struct IgnoreFileWatcher {
    session: Arc<RootSession>,
    file_name: OsString,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    _watcher: RecommendedWatcher,
}

impl IgnoreFileWatcher {
    /// Starts watching the session root. Only events naming the ignore
    /// file trigger a refresh.
    pub fn new(session: Arc<RootSession>) -> Result<Self, ProcessorError> {
        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if tx.send(res).is_err() {
                    trace!("Ignore file watcher is gone; dropping event");
                }
            },
            Config::default(),
        )
        .map_err(|e| ProcessorError::WatchError(format!("could not create watcher: {}", e)))?;

        watcher
            .watch(session.root(), RecursiveMode::NonRecursive)
            .map_err(|e| {
                ProcessorError::WatchError(format!(
                    "could not watch {}: {}",
                    session.root().display(),
                    e
                ))
            })?;

        let file_name = OsString::from(&session.config().ignore_file_name);
        debug!("Watching {}", session.ignore_file_path().display());

        Ok(IgnoreFileWatcher {
            session,
            file_name,
            events,
            _watcher: watcher,
        })
    }

    fn concerns_ignore_file(&self, event: &Event) -> bool {
        let relevant_kind = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
        );
        relevant_kind
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(self.file_name.as_os_str()))
    }

    /// Waits until the ignore file changes, then refreshes the session's
    /// patterns. Events already queued behind the first one are folded into
    /// the same refresh. Returns false once the event stream has ended.
    pub async fn next_change(&mut self) -> Result<bool, ProcessorError> {
        loop {
            let Some(res) = self.events.recv().await else {
                return Ok(false);
            };
            match res {
                Ok(event) if self.concerns_ignore_file(&event) => break,
                Ok(event) => trace!("Unrelated event: {:?} - {:?}", event.kind, event.paths),
                Err(e) => warn!("Watcher error: {}", e),
            }
        }
        while self.events.try_recv().is_ok() {}

        info!(
            "Ignore file changed: {}",
            self.session.ignore_file_path().display()
        );
        self.session.refresh_ignore_patterns().await?;
        Ok(true)
    }

    /// Refreshes on every change until `shutdown` flips to true or its
    /// sender is dropped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ProcessorError> {
        loop {
            tokio::select! {
                changed = self.next_change() => {
                    match changed {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => error!("Failed to refresh ignore patterns: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Terminating ignore file watch.");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
