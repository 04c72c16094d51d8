//! Source file enumeration.
//!
//! A [`SourceTree`] walks a root directory and yields [`FileEntry`] values for
//! files matching an include glob. Partials (any path component starting with
//! the private-marker prefix) and excluded files are never yielded.

use std::fs;
use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};
use walkdir::WalkDir;

/// Default prefix marking a file or directory as a partial.
pub const DEFAULT_PARTIAL_PREFIX: &str = "_";

/// File category, which decides the pipeline a file goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Markup,
    Style,
    Image,
}

impl Category {
    /// Classify a path by its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "html" | "htm" => Some(Self::Markup),
            "css" => Some(Self::Style),
            "svg" | "png" | "jpg" | "jpeg" => Some(Self::Image),
            _ => None,
        }
    }
}

/// A single file read from a source tree.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Path relative to the tree root
    pub path: PathBuf,

    /// Pipeline category
    pub category: Category,

    /// Raw file contents
    pub contents: Vec<u8>,
}

impl FileEntry {
    pub fn new(path: impl Into<PathBuf>, category: Category, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            category,
            contents: contents.into(),
        }
    }

    /// Contents as UTF-8 text.
    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.contents)
    }

    /// Relative path with `/` separators.
    pub fn display_path(&self) -> String {
        slash_path(&self.path)
    }
}

/// Render a relative path with forward slashes on every platform.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Errors raised while compiling glob patterns.
#[derive(Debug, thiserror::Error)]
#[error("Invalid glob pattern '{pattern}': {source}")]
pub struct GlobError {
    pub pattern: String,
    #[source]
    pub source: glob::PatternError,
}

/// A set of glob patterns with `{a,b}` alternation support.
///
/// Patterns are matched against `/`-separated relative paths; `*` never
/// crosses a directory separator while `**` spans any number of directories.
#[derive(Debug, Clone, Default)]
pub struct Globs {
    sources: Vec<String>,
    patterns: Vec<Pattern>,
}

impl Globs {
    /// Compile one or more patterns.
    pub fn new<I, S>(patterns: I) -> Result<Self, GlobError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut globs = Self::default();
        for raw in patterns {
            let raw = raw.as_ref();
            globs.sources.push(raw.to_string());
            for expanded in expand_braces(raw) {
                let pattern = Pattern::new(&expanded).map_err(|source| GlobError {
                    pattern: raw.to_string(),
                    source,
                })?;
                globs.patterns.push(pattern);
            }
        }
        Ok(globs)
    }

    /// A glob set that matches nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The patterns as written, before brace expansion.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Check whether a relative path matches any pattern.
    pub fn matches(&self, path: &Path) -> bool {
        let path = slash_path(path);
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        self.patterns
            .iter()
            .any(|p| p.matches_with(&path, options))
    }

    /// Check whether every file below a relative directory is matched.
    pub fn covers_dir(&self, dir: &Path) -> bool {
        self.matches(&dir.join("*"))
    }
}

/// Expand `{a,b,c}` groups into separate patterns. Groups do not nest.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };
    let Some(close) = pattern[open..].find('}').map(|i| open + i) else {
        return vec![pattern.to_string()];
    };

    let head = &pattern[..open];
    let tail = &pattern[close + 1..];

    pattern[open + 1..close]
        .split(',')
        .flat_map(|alt| expand_braces(&format!("{}{}{}", head, alt, tail)))
        .collect()
}

/// Check whether any component of a relative path starts with the prefix.
pub fn is_partial(path: &Path, prefix: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    path.components().any(|c| match c {
        Component::Normal(s) => s.to_string_lossy().starts_with(prefix),
        _ => false,
    })
}

/// Enumerates files under a root directory.
#[derive(Debug, Clone)]
pub struct SourceTree {
    root: PathBuf,
    partial_prefix: String,
}

impl SourceTree {
    /// Create a tree rooted at `root` using the default partial prefix.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            partial_prefix: DEFAULT_PARTIAL_PREFIX.to_string(),
        }
    }

    /// Override the partial prefix. An empty prefix disables partial filtering.
    pub fn with_partial_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.partial_prefix = prefix.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partial_prefix(&self) -> &str {
        &self.partial_prefix
    }

    /// Decide whether a root-relative path belongs to the selection.
    ///
    /// Partials and excluded paths are rejected before the include glob is
    /// consulted.
    pub fn selects(&self, relative: &Path, include: &Globs, exclude: &Globs) -> bool {
        if is_partial(relative, &self.partial_prefix) || exclude.matches(relative) {
            return false;
        }
        include.matches(relative)
    }

    /// Lazily list the files selected by `include` and not by `exclude`.
    ///
    /// Every call walks the filesystem again. A missing root yields nothing.
    /// Files that cannot be read or categorized are skipped.
    pub fn list<'a>(
        &'a self,
        include: &'a Globs,
        exclude: &'a Globs,
    ) -> impl Iterator<Item = FileEntry> + 'a {
        WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| {
                // Skip walking directories the exclude globs cover entirely.
                if e.depth() == 0 || !e.file_type().is_dir() {
                    return true;
                }
                match e.path().strip_prefix(&self.root) {
                    Ok(relative) => !exclude.covers_dir(relative),
                    Err(_) => true,
                }
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(move |entry| {
                let relative = entry.path().strip_prefix(&self.root).ok()?.to_path_buf();
                if !self.selects(&relative, include, exclude) {
                    return None;
                }

                let category = Category::from_path(&relative)?;
                match fs::read(entry.path()) {
                    Ok(contents) => Some(FileEntry {
                        path: relative,
                        category,
                        contents,
                    }),
                    Err(e) => {
                        tracing::warn!("Failed to read {}: {}", entry.path().display(), e);
                        None
                    }
                }
            })
    }
}
