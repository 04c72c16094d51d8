//! Stylesheet `@import` bundling with the lightningcss bundler.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lightningcss::bundler::{Bundler, ResolveResult, SourceProvider};
use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};

/// Import resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportError {
    #[error("not found (looked in {searched})")]
    NotFound { import: String, searched: String },

    #[error("import cycle through {0}")]
    Cycle(String),

    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("{path}: {message}")]
    Stylesheet { path: String, message: String },
}

impl ImportError {
    pub fn import(&self) -> &str {
        match self {
            Self::NotFound { import, .. } => import,
            Self::Cycle(import) => import,
            Self::Read { path, .. } | Self::Stylesheet { path, .. } => path,
        }
    }
}

/// Resolves and inlines local `@import` rules recursively.
///
/// Candidates are tried in order: the literal path, the path with `.css`
/// appended, then the same two with the partial prefix on the file name.
/// Remote imports are kept and hoisted above the bundled content.
#[derive(Debug, Clone)]
pub struct ImportResolver {
    partial_prefix: String,
}

impl ImportResolver {
    pub fn new(partial_prefix: impl Into<String>) -> Self {
        Self {
            partial_prefix: partial_prefix.into(),
        }
    }

    /// Inline every local import in `css`, which was read from `path`.
    ///
    /// A stylesheet without local imports is returned unchanged.
    pub fn resolve(&self, path: &Path, css: &str) -> Result<String, ImportError> {
        let entry = canonical(path);
        let mut sources = Sources::default();
        let mut stack = Vec::new();
        self.load(&entry, css.to_string(), &mut stack, &mut sources)?;

        if sources.files.len() == 1 {
            return Ok(css.to_string());
        }

        let mut bundler = Bundler::new(&sources, None, ParserOptions::default());
        let stylesheet = bundler.bundle(&entry).map_err(|e| ImportError::Stylesheet {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let printed = stylesheet
            .to_css(PrinterOptions::default())
            .map_err(|e| ImportError::Stylesheet {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        Ok(printed.code)
    }

    /// Read `file`'s import graph into `sources`, depth first.
    fn load(
        &self,
        file: &Path,
        text: String,
        stack: &mut Vec<PathBuf>,
        sources: &mut Sources,
    ) -> Result<(), ImportError> {
        let (imports, rewritten) = scan(file, &text)?;
        let dir = file.parent().unwrap_or(Path::new(""));

        stack.push(file.to_path_buf());
        for import in imports.iter().filter(|i| !is_remote(i)) {
            let found = canonical(&self.locate(dir, import)?);
            if stack.contains(&found) {
                return Err(ImportError::Cycle(import.clone()));
            }

            sources
                .resolved
                .insert((file.to_path_buf(), import.clone()), found.clone());
            if sources.files.contains_key(&found) {
                continue;
            }

            let content = fs::read_to_string(&found).map_err(|e| ImportError::Read {
                path: found.display().to_string(),
                message: e.to_string(),
            })?;
            self.load(&found, content, stack, sources)?;
        }
        stack.pop();

        sources
            .files
            .insert(file.to_path_buf(), rewritten.unwrap_or(text));
        Ok(())
    }

    fn locate(&self, dir: &Path, target: &str) -> Result<PathBuf, ImportError> {
        let candidates = self.candidates(dir, target);
        candidates
            .iter()
            .find(|c| c.is_file())
            .cloned()
            .ok_or_else(|| ImportError::NotFound {
                import: target.to_string(),
                searched: candidates
                    .iter()
                    .map(|c| c.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    fn candidates(&self, dir: &Path, target: &str) -> Vec<PathBuf> {
        let literal = dir.join(target);
        let mut names = vec![literal.clone()];
        if literal.extension().is_none() {
            names.push(dir.join(format!("{}.css", target)));
        }

        if !self.partial_prefix.is_empty() {
            let prefixed: Vec<PathBuf> = names
                .iter()
                .filter_map(|p| {
                    let name = p.file_name()?.to_str()?;
                    if name.starts_with(&self.partial_prefix) {
                        return None;
                    }
                    Some(p.with_file_name(format!("{}{}", self.partial_prefix, name)))
                })
                .collect();
            names.extend(prefixed);
        }

        names
    }
}

/// Every file of one import graph, keyed by canonical path.
#[derive(Debug, Default)]
struct Sources {
    files: HashMap<PathBuf, String>,
    resolved: HashMap<(PathBuf, String), PathBuf>,
}

impl SourceProvider for Sources {
    type Error = io::Error;

    fn read<'a>(&'a self, file: &Path) -> Result<&'a str, Self::Error> {
        self.files.get(file).map(String::as_str).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} was not loaded", file.display()),
            )
        })
    }

    fn resolve(
        &self,
        specifier: &str,
        originating_file: &Path,
    ) -> Result<ResolveResult, Self::Error> {
        if is_remote(specifier) {
            return Ok(ResolveResult::External(specifier.to_string()));
        }

        self.resolved
            .get(&(originating_file.to_path_buf(), specifier.to_string()))
            .cloned()
            .map(ResolveResult::File)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve '{}'", specifier))
            })
    }
}

/// The `@import` targets of one stylesheet, plus its text reprinted with
/// remote imports first when a remote import follows a local one.
fn scan(file: &Path, css: &str) -> Result<(Vec<String>, Option<String>), ImportError> {
    let stylesheet_error = |message: String| ImportError::Stylesheet {
        path: file.display().to_string(),
        message,
    };

    let mut stylesheet = StyleSheet::parse(
        css,
        ParserOptions {
            filename: file.display().to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| stylesheet_error(e.to_string()))?;

    let imports: Vec<String> = stylesheet
        .rules
        .0
        .iter()
        .filter_map(|rule| match rule {
            CssRule::Import(import) => Some(import.url.to_string()),
            _ => None,
        })
        .collect();

    let remote_after_local = imports
        .iter()
        .skip_while(|i| is_remote(i))
        .any(|i| is_remote(i));
    if !remote_after_local {
        return Ok((imports, None));
    }

    hoist_remote_imports(&mut stylesheet.rules.0);
    let printed = stylesheet
        .to_css(PrinterOptions::default())
        .map_err(|e| stylesheet_error(e.to_string()))?;
    Ok((imports, Some(printed.code)))
}

fn hoist_remote_imports(rules: &mut Vec<CssRule<'_>>) {
    let (remote, rest): (Vec<_>, Vec<_>) = rules
        .drain(..)
        .partition(|rule| matches!(rule, CssRule::Import(import) if is_remote(&import.url)));
    rules.extend(remote);
    rules.extend(rest);
}

fn is_remote(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://") || target.starts_with("//")
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
