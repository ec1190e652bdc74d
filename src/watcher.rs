//! File watching with per-path debounce.
//!
//! Editors write manuscripts in bursts (atomic saves, partial flushes), so a
//! raw change event is not a signal to ingest. Each path gets its own quiet
//! period; a new event while the timer is pending resets it, and only after
//! the path has been quiet for the full window does the settle callback fire.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const WATCHED_EXTENSIONS: &[&str] = &["md", "txt", "markdown"];

/// Keeps the underlying watcher alive; dropping it stops event delivery.
pub struct DocumentWatcher {
    _watcher: RecommendedWatcher,
}

fn is_manuscript(path: &Path) -> bool {
    if path
        .components()
        .any(|c| c.as_os_str() == ".canonkeeper")
    {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| WATCHED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Watch a project root recursively. `on_settle` fires once per path after
/// the debounce window elapses with no further events for that path.
pub fn watch_documents<F>(
    root: &Path,
    debounce: Duration,
    on_settle: F,
) -> Result<DocumentWatcher>
where
    F: Fn(PathBuf) + Send + Sync + Clone + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "watch event error");
                return;
            }
        };
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            return;
        }
        for path in event.paths {
            if is_manuscript(&path) {
                let _ = tx.send(path);
            }
        }
    })
    .context("Failed to create file watcher")?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", root.display()))?;

    // Debounce manager: one pending timer per path, reset on every event.
    tokio::spawn(async move {
        let mut timers: HashMap<PathBuf, JoinHandle<()>> = HashMap::new();
        while let Some(path) = rx.recv().await {
            if let Some(previous) = timers.remove(&path) {
                previous.abort();
            }
            debug!(path = %path.display(), "change detected, debouncing");
            let on_settle = on_settle.clone();
            let timer_path = path.clone();
            timers.insert(
                path,
                tokio::spawn(async move {
                    tokio::time::sleep(debounce).await;
                    on_settle(timer_path);
                }),
            );
        }
    });

    Ok(DocumentWatcher { _watcher: watcher })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manuscript_filter_accepts_markdown_and_text() {
        assert!(is_manuscript(Path::new("/p/draft.md")));
        assert!(is_manuscript(Path::new("/p/notes.TXT")));
        assert!(!is_manuscript(Path::new("/p/cover.png")));
        assert!(!is_manuscript(Path::new("/p/draft")));
    }

    #[test]
    fn data_directory_is_ignored() {
        assert!(!is_manuscript(Path::new(
            "/p/.canonkeeper/canonkeeper.db"
        )));
    }
}
