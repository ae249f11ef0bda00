//! Code unit extraction from a project tree
//!
//! The [`ProjectExtractor`] walks a checkout and hands every file with a
//! registered extension to its [`LanguageRule`]. Unreadable or unparsable files
//! are skipped with a warning; one bad file never aborts the walk. Cancelling
//! the token passed in stops the walk at the next entry.

mod language;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

pub use language::LanguageRule;

use crate::models::Snippet;
use crate::{Error, Result};

/// Directories never descended into
const SKIPPED_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Walks a project and extracts snippets with per-extension rules
#[derive(Debug, Clone, Default)]
pub struct ProjectExtractor {
    rules: Arc<HashMap<String, LanguageRule>>,
}

impl ProjectExtractor {
    /// Create an extractor with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an extractor with the built-in Go and Python rules
    pub fn with_defaults() -> Self {
        Self::new()
            .with_rule(".go", LanguageRule::go())
            .with_rule(".py", LanguageRule::python())
    }

    /// Register a rule for a file extension (with or without the leading dot)
    pub fn with_rule(mut self, extension: &str, rule: LanguageRule) -> Self {
        Arc::make_mut(&mut self.rules).insert(normalize_extension(extension), rule);
        self
    }

    /// Registered extensions
    pub fn extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        exts.sort_unstable();
        exts
    }

    /// Extract snippets from every recognized file under `root`
    ///
    /// Runs the walk on a blocking thread. Dropping the returned future
    /// cancels the walk as well.
    pub async fn extract(&self, root: &Path, cancel: &CancellationToken) -> Result<Vec<Snippet>> {
        let extractor = self.clone();
        let root = root.to_path_buf();
        let walk = cancel.child_token();
        let _stop_walk = walk.clone().drop_guard();
        tokio::task::spawn_blocking(move || extractor.extract_blocking(&root, &walk))
            .await
            .map_err(|e| Error::Extract(format!("Extraction task failed: {}", e)))?
    }

    /// Synchronous form of [`ProjectExtractor::extract`]
    pub fn extract_blocking(&self, root: &Path, cancel: &CancellationToken) -> Result<Vec<Snippet>> {
        if !root.is_dir() {
            return Err(Error::Extract(format!(
                "Project root is not a directory: {}",
                root.display()
            )));
        }

        let mut snippets = Vec::new();
        let mut files = 0usize;

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e));

        for entry in walker {
            if cancel.is_cancelled() {
                debug!(root = %root.display(), files, "Extraction cancelled");
                return Err(Error::Cancelled);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable path");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let Some(rule) = self.rule_for(entry.path()) else {
                continue;
            };

            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");

            let source = match std::fs::read_to_string(entry.path()) {
                Ok(source) => source,
                Err(e) => {
                    warn!(file = %relative, error = %e, "Failed to read file, skipping");
                    continue;
                }
            };

            match rule.extract(&source, &relative) {
                Ok(found) => {
                    debug!(file = %relative, count = found.len(), "Extracted snippets");
                    files += 1;
                    snippets.extend(found);
                }
                Err(e) => {
                    warn!(file = %relative, error = %e, "Failed to extract file, skipping");
                }
            }
        }

        info!(
            root = %root.display(),
            files,
            snippets = snippets.len(),
            "Project extraction complete"
        );

        Ok(snippets)
    }

    fn rule_for(&self, path: &Path) -> Option<&LanguageRule> {
        let ext = path.extension()?.to_str()?;
        self.rules.get(&normalize_extension(ext))
    }
}

fn normalize_extension(ext: &str) -> String {
    format!(".{}", ext.trim_start_matches('.').to_ascii_lowercase())
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}
