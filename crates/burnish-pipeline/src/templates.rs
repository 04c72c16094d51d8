//! Template rendering for markup pages.

use std::path::{Path, PathBuf};

use minijinja::{context, path_loader, AutoEscape, Environment};

/// Build mode exposed to templates as `is_dev` and `isDev`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Development,
    #[default]
    Production,
}

impl Mode {
    /// Environment variable selecting the mode.
    pub const ENV_VAR: &'static str = "BURNISH_ENV";

    /// Parse a mode value. Only "development" (or "dev") selects development.
    pub fn from_value(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "development" || v == "dev" => Self::Development,
            _ => Self::Production,
        }
    }

    /// Read the mode from the process environment.
    pub fn from_env() -> Self {
        Self::from_value(std::env::var(Self::ENV_VAR).ok().as_deref())
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// Renders page templates with includes resolved against a source root.
pub trait TemplateRenderer: Send + Sync {
    /// Render `source` for the page identified by `page`.
    fn render(&self, name: &str, source: &str, page: &str) -> Result<String, String>;
}

/// Template engine using minijinja.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    root: PathBuf,
    mode: Mode,
}

impl TemplateEngine {
    /// Create an engine loading includes from `root`.
    pub fn new(root: impl Into<PathBuf>, mode: Mode) -> Self {
        Self {
            root: root.into(),
            mode,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// A fresh environment per render, so edited partials are always re-read.
    fn environment(&self) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_loader(path_loader(&self.root));
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_keep_trailing_newline(true);
        env
    }
}

impl TemplateRenderer for TemplateEngine {
    fn render(&self, name: &str, source: &str, page: &str) -> Result<String, String> {
        let env = self.environment();

        env.render_named_str(
            name,
            source,
            context! {
                page => page,
                is_dev => self.mode.is_dev(),
                isDev => self.mode.is_dev(),
            },
        )
        .map_err(|e| format_error(&e))
    }
}

/// Flatten a minijinja error and its causes into one line.
fn format_error(err: &minijinja::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Page identifier: the relative path with its `.html` suffix removed.
pub fn page_id(relative: &Path) -> String {
    let path = crate::source::slash_path(relative);
    path.strip_suffix(".html")
        .or_else(|| path.strip_suffix(".htm"))
        .unwrap_or(&path)
        .to_string()
}
