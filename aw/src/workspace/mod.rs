//! Workspace manager - the job's durable memory
//!
//! One directory per job, exclusively owned by the worker while the job
//! runs. Everything the agent knows long-term lives here as files; the chat
//! history is just scratch. All mutations are transactional at file
//! granularity (write-temp, fsync, rename) and sandboxed to the root.

pub mod git;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use grep_regex::RegexMatcher;
use grep_searcher::sinks::UTF8;
use grep_searcher::{BinaryDetection, SearcherBuilder};
use thiserror::Error;
use tracing::{debug, info};

pub use git::GitWorkspace;

/// Files every workspace carries from init
pub const INSTRUCTIONS_FILE: &str = "instructions.md";
pub const MEMORY_FILE: &str = "workspace.md";
pub const PLAN_FILE: &str = "plan.md";
pub const TODOS_FILE: &str = "todos.yaml";
pub const FEEDBACK_FILE: &str = "feedback.md";

/// Standard subdirectories scaffolded at init
const SUBDIRS: [&str; 4] = ["archive", "output", "tools", "uploads"];

/// Errors from workspace operations
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("File not found: {path}")]
    NotFound { path: String },

    #[error("Path {path} escapes the workspace root")]
    OutsideRoot { path: String },

    #[error("Text to replace not found in {path}")]
    PatternNotFound { path: String },

    #[error("Text to replace found {count} times in {path}, expected 1 (use replace_all for multiple)")]
    PatternNotUnique { path: String, count: usize },

    #[error("Invalid glob pattern: {0}")]
    BadGlob(String),

    #[error("Invalid search pattern: {0}")]
    BadPattern(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single search hit
#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub path: String,
    pub line_number: u64,
    pub line: String,
}

/// Per-job workspace rooted at one directory
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open an existing workspace directory
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Scaffold the directory tree and write seed files that are missing.
    ///
    /// Seeds are (relative path, content) pairs; existing files are left
    /// untouched so resumed jobs keep their state.
    pub fn init(root: impl Into<PathBuf>, seeds: &[(String, String)]) -> Result<Self, WorkspaceError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        for sub in SUBDIRS {
            fs::create_dir_all(root.join(sub))?;
        }

        let ws = Self { root };
        for (path, content) in seeds {
            if !ws.exists(path) {
                ws.write(path, content)?;
            }
        }

        info!(root = %ws.root.display(), "Workspace initialized");
        Ok(ws)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path inside the root, rejecting escapes.
    ///
    /// Non-existent targets are validated against their nearest existing
    /// ancestor so new files can still be created.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, WorkspaceError> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let canonical = if joined.exists() {
            joined.canonicalize().unwrap_or_else(|_| joined.clone())
        } else if let Some(parent) = joined.parent() {
            let mut ancestor = parent.to_path_buf();
            let mut tail = PathBuf::from(joined.file_name().unwrap_or_default());
            while !ancestor.exists() {
                let Some(name) = ancestor.file_name().map(PathBuf::from) else { break };
                tail = name.join(&tail);
                let Some(up) = ancestor.parent().map(Path::to_path_buf) else { break };
                ancestor = up;
            }
            let canonical_ancestor = ancestor.canonicalize().unwrap_or(ancestor);
            canonical_ancestor.join(tail)
        } else {
            joined.clone()
        };

        let root_canonical = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        if canonical.starts_with(&root_canonical) {
            Ok(canonical)
        } else {
            Err(WorkspaceError::OutsideRoot {
                path: path.display().to_string(),
            })
        }
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(&path).map(|p| p.exists()).unwrap_or(false)
    }

    /// Read a file to a string
    pub fn read(&self, path: impl AsRef<Path>) -> Result<String, WorkspaceError> {
        let full = self.resolve(&path)?;
        if !full.exists() {
            return Err(WorkspaceError::NotFound {
                path: path.as_ref().display().to_string(),
            });
        }
        Ok(fs::read_to_string(full)?)
    }

    /// Read a file, or return the given default when it does not exist
    pub fn read_or_default(&self, path: impl AsRef<Path>, default: &str) -> String {
        self.read(path).unwrap_or_else(|_| default.to_string())
    }

    /// Full-content replacement: write-temp, fsync, rename.
    pub fn write(&self, path: impl AsRef<Path>, content: &str) -> Result<(), WorkspaceError> {
        let full = self.resolve(&path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = full.with_extension("tmp-write");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &full)?;
        debug!(path = %path.as_ref().display(), bytes = content.len(), "write");
        Ok(())
    }

    /// Append under an exclusive file lock (read-modify-write)
    pub fn append(&self, path: impl AsRef<Path>, content: &str) -> Result<(), WorkspaceError> {
        let full = self.resolve(&path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = fs::OpenOptions::new().read(true).create(true).append(true).open(&full)?;
        file.lock_exclusive()?;
        let result = (|| -> Result<(), WorkspaceError> {
            let mut file = &file;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            Ok(())
        })();
        let _ = fs2::FileExt::unlock(&file);
        result
    }

    /// Exact-match string replacement.
    ///
    /// Errors when `old` is absent, or ambiguous without `replace_all`.
    /// Never a silent no-op: the caller learns exactly why nothing changed.
    pub fn edit(
        &self,
        path: impl AsRef<Path>,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> Result<usize, WorkspaceError> {
        let content = self.read(&path)?;

        let count = content.matches(old).count();
        if count == 0 {
            return Err(WorkspaceError::PatternNotFound {
                path: path.as_ref().display().to_string(),
            });
        }
        if count > 1 && !replace_all {
            return Err(WorkspaceError::PatternNotUnique {
                path: path.as_ref().display().to_string(),
                count,
            });
        }

        let new_content = if replace_all {
            content.replace(old, new)
        } else {
            content.replacen(old, new, 1)
        };
        self.write(&path, &new_content)?;

        Ok(if replace_all { count } else { 1 })
    }

    pub fn delete(&self, path: impl AsRef<Path>) -> Result<(), WorkspaceError> {
        let full = self.resolve(&path)?;
        if !full.exists() {
            return Err(WorkspaceError::NotFound {
                path: path.as_ref().display().to_string(),
            });
        }
        fs::remove_file(full)?;
        Ok(())
    }

    /// List files relative to the root, optionally filtered by a glob
    /// pattern, sorted for stable output.
    pub fn list(&self, pattern: Option<&str>) -> Result<Vec<String>, WorkspaceError> {
        let matcher = match pattern {
            Some(p) => Some(glob::Pattern::new(p).map_err(|e| WorkspaceError::BadGlob(e.to_string()))?),
            None => None,
        };

        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.file_name().to_str().map(|n| n != ".git").unwrap_or(true))
        {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            if let Some(ref m) = matcher
                && !m.matches(&rel)
            {
                continue;
            }
            files.push(rel);
        }
        files.sort();
        Ok(files)
    }

    /// Regex search across workspace files
    pub fn search(&self, pattern: &str, max_results: usize) -> Result<Vec<SearchMatch>, WorkspaceError> {
        let matcher = RegexMatcher::new(pattern).map_err(|e| WorkspaceError::BadPattern(e.to_string()))?;
        let mut searcher = SearcherBuilder::new()
            .binary_detection(BinaryDetection::quit(b'\x00'))
            .line_number(true)
            .build();

        let mut matches = Vec::new();
        for rel in self.list(None)? {
            if matches.len() >= max_results {
                break;
            }
            let full = self.root.join(&rel);
            let rel_path = rel.clone();
            let sink_matches = &mut matches;
            let result = searcher.search_path(
                &matcher,
                &full,
                UTF8(|line_number, line| {
                    if sink_matches.len() >= max_results {
                        return Ok(false);
                    }
                    sink_matches.push(SearchMatch {
                        path: rel_path.clone(),
                        line_number,
                        line: line.trim_end().to_string(),
                    });
                    Ok(true)
                }),
            );
            if let Err(e) = result {
                debug!(path = %rel, error = %e, "search skipped file");
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let temp = tempdir().unwrap();
        let ws = Workspace::init(temp.path().join("job"), &[]).unwrap();
        (temp, ws)
    }

    #[test]
    fn test_init_scaffolds_subdirs_and_seeds() {
        let temp = tempdir().unwrap();
        let seeds = vec![
            (INSTRUCTIONS_FILE.to_string(), "# Task\nDo it".to_string()),
            (MEMORY_FILE.to_string(), String::new()),
        ];
        let ws = Workspace::init(temp.path().join("job"), &seeds).unwrap();

        assert!(ws.root().join("archive").is_dir());
        assert!(ws.root().join("output").is_dir());
        assert!(ws.root().join("tools").is_dir());
        assert!(ws.root().join("uploads").is_dir());
        assert_eq!(ws.read(INSTRUCTIONS_FILE).unwrap(), "# Task\nDo it");
    }

    #[test]
    fn test_init_keeps_existing_files() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("job");
        let seeds = vec![(PLAN_FILE.to_string(), "original".to_string())];
        Workspace::init(&root, &seeds).unwrap();

        // Re-init with different seed content must not clobber
        let seeds = vec![(PLAN_FILE.to_string(), "replacement".to_string())];
        let ws = Workspace::init(&root, &seeds).unwrap();
        assert_eq!(ws.read(PLAN_FILE).unwrap(), "original");
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let (_temp, ws) = workspace();
        let err = ws.read("nope.txt").unwrap_err();
        assert!(matches!(err, WorkspaceError::NotFound { .. }));
    }

    #[test]
    fn test_write_creates_parents() {
        let (_temp, ws) = workspace();
        ws.write("output/deep/nested.txt", "hello").unwrap();
        assert_eq!(ws.read("output/deep/nested.txt").unwrap(), "hello");
    }

    #[test]
    fn test_append() {
        let (_temp, ws) = workspace();
        ws.append("notes.md", "one\n").unwrap();
        ws.append("notes.md", "two\n").unwrap();
        assert_eq!(ws.read("notes.md").unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_edit_unique_match() {
        let (_temp, ws) = workspace();
        ws.write("a.txt", "hello world").unwrap();
        let n = ws.edit("a.txt", "world", "rust", false).unwrap();
        assert_eq!(n, 1);
        assert_eq!(ws.read("a.txt").unwrap(), "hello rust");
    }

    #[test]
    fn test_edit_missing_pattern_errors() {
        let (_temp, ws) = workspace();
        ws.write("a.txt", "hello").unwrap();
        let err = ws.edit("a.txt", "absent", "x", false).unwrap_err();
        assert!(matches!(err, WorkspaceError::PatternNotFound { .. }));
    }

    #[test]
    fn test_edit_ambiguous_requires_replace_all() {
        let (_temp, ws) = workspace();
        ws.write("a.txt", "x x x").unwrap();

        let err = ws.edit("a.txt", "x", "y", false).unwrap_err();
        assert!(matches!(err, WorkspaceError::PatternNotUnique { count: 3, .. }));

        let n = ws.edit("a.txt", "x", "y", true).unwrap();
        assert_eq!(n, 3);
        assert_eq!(ws.read("a.txt").unwrap(), "y y y");
    }

    #[test]
    fn test_edit_roundtrip_restores_bytes() {
        let (_temp, ws) = workspace();
        let original = "fn main() {\n    println!(\"hi\");\n}\n";
        ws.write("main.rs", original).unwrap();

        ws.edit("main.rs", "println!(\"hi\")", "eprintln!(\"hi\")", false).unwrap();
        ws.edit("main.rs", "eprintln!(\"hi\")", "println!(\"hi\")", false).unwrap();
        assert_eq!(ws.read("main.rs").unwrap(), original);
    }

    #[test]
    fn test_edit_identity_is_noop() {
        let (_temp, ws) = workspace();
        ws.write("a.txt", "same content").unwrap();
        ws.edit("a.txt", "same content", "same content", false).unwrap();
        assert_eq!(ws.read("a.txt").unwrap(), "same content");
    }

    #[test]
    fn test_sandbox_rejects_escapes() {
        let (_temp, ws) = workspace();
        assert!(matches!(
            ws.resolve("/etc/passwd"),
            Err(WorkspaceError::OutsideRoot { .. })
        ));
        assert!(matches!(
            ws.resolve("../outside.txt"),
            Err(WorkspaceError::OutsideRoot { .. })
        ));
    }

    #[test]
    fn test_list_with_glob() {
        let (_temp, ws) = workspace();
        ws.write("plan.md", "p").unwrap();
        ws.write("output/result.txt", "r").unwrap();
        ws.write("output/haiku.md", "h").unwrap();

        let all = ws.list(None).unwrap();
        assert!(all.contains(&"plan.md".to_string()));
        assert!(all.contains(&"output/result.txt".to_string()));

        let md = ws.list(Some("**/*.md")).unwrap();
        assert!(md.contains(&"output/haiku.md".to_string()));
        assert!(!md.contains(&"output/result.txt".to_string()));
    }

    #[test]
    fn test_search_finds_lines() {
        let (_temp, ws) = workspace();
        ws.write("plan.md", "phase one\nKEEP-ME-42\nphase two").unwrap();
        ws.write("other.md", "nothing here").unwrap();

        let matches = ws.search("KEEP-ME-\\d+", 10).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "plan.md");
        assert_eq!(matches[0].line_number, 2);
        assert!(matches[0].line.contains("KEEP-ME-42"));
    }

    #[test]
    fn test_delete() {
        let (_temp, ws) = workspace();
        ws.write("trash.txt", "x").unwrap();
        ws.delete("trash.txt").unwrap();
        assert!(!ws.exists("trash.txt"));
        assert!(matches!(ws.delete("trash.txt"), Err(WorkspaceError::NotFound { .. })));
    }
}
