//! Candidate discovery and batch planning.
//!
//! Discovery walks the input root once and returns a sorted, de-duplicated
//! path list. The planner then loads candidates lazily, drops already-done or
//! repeated content, applies the limit and chunks what is left into batches.

use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use ultravision_core::{Batch, ImageLoader, ImageRef, UltraError};

use crate::dispatcher::BatchSource;
use crate::resume::ResumeIndex;

/// Image patterns used when none are configured.
pub const DEFAULT_PATTERNS: &[&str] = &["*.png", "*.jpg", "*.jpeg", "*.webp", "*.gif", "*.bmp", "*.tiff"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled include patterns. Patterns without a `/` match the file name;
/// patterns with one match the path relative to the root.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, UltraError> {
        let sources: Vec<&str> = if patterns.is_empty() {
            DEFAULT_PATTERNS.to_vec()
        } else {
            patterns.iter().map(AsRef::as_ref).collect()
        };
        let patterns = sources
            .into_iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| UltraError::ConfigError(format!("invalid pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, relative: &Path) -> bool {
        let rel = relative.to_string_lossy().replace('\\', "/");
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.patterns.iter().any(|p| {
            let subject = if p.as_str().contains('/') { rel.as_str() } else { name.as_str() };
            p.matches_with(subject, MATCH_OPTIONS)
        })
    }
}

/// List regular files under `root` matching `patterns`, sorted by path.
///
/// An unreadable root is fatal. Unreadable entries below it are logged and
/// skipped.
pub fn discover_candidates(root: &Path, patterns: &PatternSet, recursive: bool) -> Result<Vec<PathBuf>, UltraError> {
    let unreadable = |reason: String| UltraError::RootUnreadable { path: root.to_path_buf(), reason };
    let meta = std::fs::metadata(root).map_err(|e| unreadable(e.to_string()))?;
    if !meta.is_dir() {
        return Err(unreadable("not a directory".into()));
    }
    std::fs::read_dir(root).map_err(|e| unreadable(e.to_string()))?;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name();

    let mut found = BTreeSet::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry during discovery");
                continue;
            }
        };
        // Follows symlinks so linked files count as files.
        if !entry.path().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if patterns.matches(relative) {
            found.insert(entry.into_path());
        }
    }
    debug!(root = %root.display(), count = found.len(), "Discovered candidates");
    Ok(found.into_iter().collect())
}

#[derive(Deserialize)]
struct FailedFiles {
    #[serde(default)]
    files: Vec<String>,
}

/// Candidate paths taken from a failure log, in first-seen order.
pub fn failed_candidates(log_path: &Path) -> Result<Vec<PathBuf>, UltraError> {
    let file = File::open(log_path).map_err(|e| {
        UltraError::ConfigError(format!("cannot open failure log {}: {e}", log_path.display()))
    })?;
    let mut seen = HashSet::new();
    let mut paths = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("reading failure log {}", log_path.display()))?;
        let Ok(record) = serde_json::from_str::<FailedFiles>(line.trim()) else {
            continue;
        };
        for f in record.files {
            if seen.insert(f.clone()) {
                paths.push(PathBuf::from(f));
            }
        }
    }
    Ok(paths)
}

/// Counters reported in the run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanStats {
    pub discovered: usize,
    pub skipped_resumed: usize,
    pub skipped_duplicate: usize,
    pub skipped_unreadable: usize,
    pub accepted: usize,
    pub batches: u64,
}

/// Lazily turns candidate paths into batches of at most `per_request` images.
pub struct BatchPlanner {
    candidates: std::vec::IntoIter<PathBuf>,
    loader: Arc<dyn ImageLoader>,
    resume: Arc<ResumeIndex>,
    seen: HashSet<String>,
    per_request: usize,
    limit: Option<usize>,
    stats: PlanStats,
}

impl BatchPlanner {
    pub fn new(
        candidates: Vec<PathBuf>,
        loader: Arc<dyn ImageLoader>,
        resume: Arc<ResumeIndex>,
        per_request: usize,
        limit: Option<usize>,
    ) -> Self {
        let stats = PlanStats { discovered: candidates.len(), ..Default::default() };
        Self {
            candidates: candidates.into_iter(),
            loader,
            resume,
            seen: HashSet::new(),
            per_request: per_request.max(1),
            limit,
            stats,
        }
    }

    pub fn stats(&self) -> &PlanStats {
        &self.stats
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|n| self.stats.accepted >= n)
    }

    async fn next_image(&mut self) -> Option<ImageRef> {
        while !self.limit_reached() {
            let path = self.candidates.next()?;
            let image = match self.loader.load(&path).await {
                Ok(img) => img,
                Err(e) => {
                    warn!(path = %path.display(), error = %e.reason, "Skipping unreadable image");
                    self.stats.skipped_unreadable += 1;
                    continue;
                }
            };
            if self.resume.contains(image.fingerprint()) {
                debug!(path = %path.display(), "Already processed; skipping");
                self.stats.skipped_resumed += 1;
                continue;
            }
            if !self.seen.insert(image.fingerprint().to_string()) {
                debug!(path = %path.display(), "Duplicate content in this run; skipping");
                self.stats.skipped_duplicate += 1;
                continue;
            }
            self.stats.accepted += 1;
            return Some(image);
        }
        None
    }
}

#[async_trait]
impl BatchSource for BatchPlanner {
    async fn next_batch(&mut self) -> Option<Batch> {
        let mut images = Vec::with_capacity(self.per_request);
        while images.len() < self.per_request {
            match self.next_image().await {
                Some(img) => images.push(img),
                None => break,
            }
        }
        if images.is_empty() {
            return None;
        }
        let batch = Batch::new(self.stats.batches, images);
        self.stats.batches += 1;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use ultravision_media::{sha256_hex, FsImageLoader};

    fn loader() -> Arc<dyn ImageLoader> {
        Arc::new(FsImageLoader::new())
    }

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, body).unwrap();
        path
    }

    async fn drain(planner: &mut BatchPlanner) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        while let Some(batch) = planner.next_batch().await {
            out.push(
                batch
                    .images
                    .iter()
                    .map(|i| i.path.file_name().unwrap().to_string_lossy().into_owned())
                    .collect(),
            );
        }
        out
    }

    #[test]
    fn discovery_is_sorted_and_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.PNG", "b");
        write(dir.path(), "a.jpg", "a");
        write(dir.path(), "notes.txt", "n");
        write(dir.path(), "sub/c.png", "c");

        let patterns = PatternSet::new::<&str>(&[]).unwrap();
        let flat = discover_candidates(dir.path(), &patterns, false).unwrap();
        let names: Vec<_> = flat.iter().map(|p| p.file_name().unwrap().to_str().unwrap()).collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG"]);

        let deep = discover_candidates(dir.path(), &patterns, true).unwrap();
        assert_eq!(deep.len(), 3);
    }

    #[test]
    fn path_patterns_match_relative_paths() {
        let patterns = PatternSet::new(&["shots/*.png"]).unwrap();
        assert!(patterns.matches(Path::new("shots/x.png")));
        assert!(!patterns.matches(Path::new("other/x.png")));
        assert!(!patterns.matches(Path::new("x.png")));
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let err = PatternSet::new(&["[".to_string()]).unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let patterns = PatternSet::new::<&str>(&[]).unwrap();
        let err = discover_candidates(&dir.path().join("gone"), &patterns, false).unwrap_err();
        assert!(matches!(err, UltraError::RootUnreadable { .. }));
    }

    #[tokio::test]
    async fn chunks_candidates_into_batches() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write(dir.path(), "a.png", "a"),
            write(dir.path(), "b.png", "b"),
            write(dir.path(), "c.png", "c"),
        ];
        let mut planner = BatchPlanner::new(paths, loader(), Arc::new(ResumeIndex::empty()), 2, None);
        assert_eq!(drain(&mut planner).await, vec![vec!["a.png", "b.png"], vec!["c.png"]]);
        assert_eq!(planner.stats().batches, 2);
    }

    #[tokio::test]
    async fn resumed_run_rebatches_only_new_images() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            write(dir.path(), name, name);
        }
        let patterns = PatternSet::new::<&str>(&[]).unwrap();

        let fresh = discover_candidates(dir.path(), &patterns, false).unwrap();
        let mut planner = BatchPlanner::new(fresh, loader(), Arc::new(ResumeIndex::empty()), 2, None);
        assert_eq!(drain(&mut planner).await, vec![vec!["a.jpg", "b.jpg"], vec!["c.jpg"]]);

        let resume = ResumeIndex::from_reader(std::io::Cursor::new(format!(
            "{{\"files\":[\"a.jpg\"],\"meta\":[{{\"sha256\":\"{}\"}}]}}\n",
            sha256_hex(b"a.jpg")
        )))
        .unwrap();
        let again = discover_candidates(dir.path(), &patterns, false).unwrap();
        let mut planner = BatchPlanner::new(again, loader(), Arc::new(resume), 2, None);
        assert_eq!(drain(&mut planner).await, vec![vec!["b.jpg", "c.jpg"]]);
        assert_eq!(planner.stats().skipped_resumed, 1);
    }

    #[tokio::test]
    async fn resume_filter_runs_before_limit() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write(dir.path(), "a.png", "a"),
            write(dir.path(), "b.png", "b"),
            write(dir.path(), "c.png", "c"),
        ];
        let resume = ResumeIndex::from_reader(std::io::Cursor::new(format!(
            "{{\"meta\":[{{\"sha256\":\"{}\"}}]}}\n",
            sha256_hex(b"a")
        )))
        .unwrap();
        let mut planner = BatchPlanner::new(paths, loader(), Arc::new(resume), 2, Some(1));
        assert_eq!(drain(&mut planner).await, vec![vec!["b.png"]]);
        assert_eq!(planner.stats().skipped_resumed, 1);
    }

    #[tokio::test]
    async fn duplicate_content_and_unreadable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write(dir.path(), "a.png", "same"),
            dir.path().join("missing.png"),
            write(dir.path(), "b.png", "same"),
            write(dir.path(), "c.png", "other"),
        ];
        let mut planner = BatchPlanner::new(paths, loader(), Arc::new(ResumeIndex::empty()), 5, None);
        assert_eq!(drain(&mut planner).await, vec![vec!["a.png", "c.png"]]);
        let stats = planner.stats();
        assert_eq!(stats.skipped_duplicate, 1);
        assert_eq!(stats.skipped_unreadable, 1);
        assert_eq!(stats.accepted, 2);
    }

    #[test]
    fn failure_log_replays_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = write(
            dir.path(),
            "failures.log",
            "{\"files\":[\"x.png\",\"y.png\"],\"error\":\"e\"}\nbroken\n{\"files\":[\"y.png\",\"z.png\"]}\n",
        );
        let paths = failed_candidates(&log).unwrap();
        assert_eq!(paths, vec![PathBuf::from("x.png"), PathBuf::from("y.png"), PathBuf::from("z.png")]);
    }
}
