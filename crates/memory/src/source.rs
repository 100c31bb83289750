//! Where indexed documents come from.
//!
//! Documents are addressed by a logical id: a workspace-relative path with
//! `/` separators, e.g. `memory/2024-01-15.md`.

use std::path::{Component, Path, PathBuf};

use {async_trait::async_trait, tracing::debug, walkdir::WalkDir};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid document path: {0}")]
    InvalidPath(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Current text of a document, or `None` when it does not exist.
    async fn read(&self, source_file: &str) -> Result<Option<String>, SourceError>;

    /// Ids of every document that should be indexed, sorted.
    async fn list(&self) -> Result<Vec<String>, SourceError>;
}

/// Markdown files under a workspace directory: selected top-level files plus
/// directories walked recursively.
#[derive(Debug, Clone)]
pub struct WorkspaceSource {
    root: PathBuf,
    files: Vec<String>,
    dirs: Vec<String>,
}

impl WorkspaceSource {
    pub fn new(root: impl Into<PathBuf>, files: Vec<String>, dirs: Vec<String>) -> Self {
        Self {
            root: root.into(),
            files,
            dirs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute paths of the configured directories, for watching.
    pub fn watch_dirs(&self) -> Vec<PathBuf> {
        self.dirs.iter().map(|d| self.root.join(d)).collect()
    }

    /// Map a filesystem path back to the document id it would be listed
    /// under, if it is one this source indexes.
    pub fn source_id_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let id = relative
            .components()
            .map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?
            .join("/");

        if self.files.iter().any(|f| *f == id) {
            return Some(id);
        }
        let in_dir = self
            .dirs
            .iter()
            .any(|d| id.starts_with(&format!("{}/", d.trim_end_matches('/'))));
        (in_dir && is_markdown(relative)).then_some(id)
    }

    fn resolve(&self, source_file: &str) -> Result<PathBuf, SourceError> {
        let relative = Path::new(source_file);
        let safe = !source_file.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(SourceError::InvalidPath(source_file.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn is_markdown(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("md" | "markdown")
    )
}

#[async_trait]
impl DocumentSource for WorkspaceSource {
    async fn read(&self, source_file: &str) -> Result<Option<String>, SourceError> {
        let path = self.resolve(source_file)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SourceError::Io {
                path: source_file.to_string(),
                source,
            }),
        }
    }

    async fn list(&self) -> Result<Vec<String>, SourceError> {
        let mut ids = Vec::new();

        for file in &self.files {
            let path = self.resolve(file)?;
            if path.is_file() {
                ids.push(file.clone());
            }
        }

        for dir in &self.dirs {
            let base = self.resolve(dir)?;
            if !base.is_dir() {
                debug!(dir = %base.display(), "memory directory does not exist, skipping");
                continue;
            }
            for entry in WalkDir::new(&base).follow_links(true).into_iter().flatten() {
                let path = entry.path();
                if !path.is_file() || !is_markdown(path) {
                    continue;
                }
                if let Some(id) = self.source_id_for(path) {
                    ids.push(id);
                }
            }
        }

        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, tempfile::TempDir};

    fn workspace() -> (WorkspaceSource, TempDir) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("MEMORY.md"), "# Long term\nfacts").unwrap();
        std::fs::write(root.join("README.md"), "not indexed").unwrap();
        std::fs::create_dir_all(root.join("memory/2024")).unwrap();
        std::fs::write(root.join("memory/2024-01-01.md"), "day one").unwrap();
        std::fs::write(root.join("memory/2024/jan.markdown"), "nested").unwrap();
        std::fs::write(root.join("memory/image.png"), [0u8, 1, 2]).unwrap();

        let source = WorkspaceSource::new(
            root,
            vec!["MEMORY.md".into()],
            vec!["memory".into(), "notes".into()],
        );
        (source, tmp)
    }

    #[tokio::test]
    async fn lists_configured_files_and_markdown_dirs() {
        let (source, _tmp) = workspace();
        let ids = source.list().await.unwrap();
        assert_eq!(ids, vec![
            "MEMORY.md",
            "memory/2024-01-01.md",
            "memory/2024/jan.markdown"
        ]);
    }

    #[tokio::test]
    async fn read_missing_document_is_none() {
        let (source, _tmp) = workspace();
        assert!(source.read("memory/nope.md").await.unwrap().is_none());
        assert_eq!(
            source.read("MEMORY.md").await.unwrap().as_deref(),
            Some("# Long term\nfacts")
        );
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let (source, _tmp) = workspace();
        for bad in ["../etc/passwd", "/etc/passwd", "memory/../../x.md", ""] {
            let err = source.read(bad).await.unwrap_err();
            assert!(matches!(err, SourceError::InvalidPath(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn reading_a_directory_is_an_io_error() {
        let (source, _tmp) = workspace();
        let err = source.read("memory").await.unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }

    #[test]
    fn maps_paths_back_to_ids() {
        let (source, tmp) = workspace();
        let root = tmp.path();
        assert_eq!(
            source.source_id_for(&root.join("memory/2024/jan.markdown")),
            Some("memory/2024/jan.markdown".into())
        );
        assert_eq!(
            source.source_id_for(&root.join("MEMORY.md")),
            Some("MEMORY.md".into())
        );
        assert_eq!(source.source_id_for(&root.join("README.md")), None);
        assert_eq!(source.source_id_for(&root.join("memory/image.png")), None);
        assert_eq!(source.source_id_for(Path::new("/elsewhere/memory/a.md")), None);
    }
}
