//! Debounced filesystem watching that keeps the index current.

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    notify_debouncer_full::{
        DebounceEventResult, new_debouncer,
        notify::{RecursiveMode, event::EventKind},
    },
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::{manager::MemoryManager, source::WorkspaceSource};

/// Document ids touched by a batch of changed paths, deduplicated.
pub fn dirty_ids<'a>(
    source: &WorkspaceSource,
    paths: impl IntoIterator<Item = &'a Path>,
) -> Vec<String> {
    let mut ids: Vec<String> = paths
        .into_iter()
        .filter_map(|path| source.source_id_for(path))
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Watch the workspace until `shutdown` resolves. Every debounced batch of
/// changes marks the affected documents dirty, then reindexes them.
pub async fn watch_workspace(
    manager: Arc<MemoryManager>,
    source: WorkspaceSource,
    debounce: Duration,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
    let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
        // The receiver is gone only once the watch loop has ended.
        let _ = tx.send(result);
    })?;

    debouncer.watch(source.root(), RecursiveMode::NonRecursive)?;
    for dir in source.watch_dirs() {
        if dir.is_dir() {
            debouncer.watch(&dir, RecursiveMode::Recursive)?;
        } else {
            warn!(dir = %dir.display(), "memory directory does not exist, not watching");
        }
    }
    info!(root = %source.root().display(), debounce_ms = debounce.as_millis() as u64, "watching workspace");

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            received = rx.recv() => {
                let Some(result) = received else { break };
                let paths: Vec<PathBuf> = match result {
                    Ok(events) => events
                        .into_iter()
                        .filter(|event| !matches!(event.kind, EventKind::Access(_)))
                        .flat_map(|event| event.event.paths)
                        .collect(),
                    Err(errors) => {
                        for error in errors {
                            warn!(error = %error, "file watcher error");
                        }
                        continue;
                    },
                };

                let ids = dirty_ids(&source, paths.iter().map(PathBuf::as_path));
                if ids.is_empty() {
                    continue;
                }
                debug!(files = ?ids, "workspace changed");
                for id in &ids {
                    manager.mark_dirty(id);
                }
                let report = manager.reindex_dirty().await;
                info!(
                    indexed = report.files_indexed,
                    unchanged = report.files_unchanged,
                    embedded = report.chunks_embedded,
                    errors = report.errors,
                    "reindexed changed files"
                );
            },
        }
    }

    info!("stopped watching workspace");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn maps_changed_paths_to_unique_ids() {
        let source = WorkspaceSource::new(
            "/ws",
            vec!["MEMORY.md".into()],
            vec!["memory".into()],
        );
        let paths = [
            PathBuf::from("/ws/memory/a.md"),
            PathBuf::from("/ws/memory/a.md"),
            PathBuf::from("/ws/MEMORY.md"),
            PathBuf::from("/ws/memory/.a.md.swp"),
            PathBuf::from("/ws/other/b.md"),
        ];
        let ids = dirty_ids(&source, paths.iter().map(PathBuf::as_path));
        assert_eq!(ids, vec!["MEMORY.md", "memory/a.md"]);
    }
}
