//! Diagnostics produced by validation and lint steps.

use std::fmt;
use std::path::PathBuf;

use crate::source::slash_path;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning = 1,
    Error = 2,
}

impl Severity {
    /// Convert a raw numeric level. Anything other than 1 or 2 has no severity.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::Warning),
            2 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// A single reportable issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Tool that produced the message (e.g. "HtmlValidate")
    pub tool: &'static str,

    /// File the diagnostic belongs to, relative to its tree root
    pub source_path: PathBuf,

    /// 1-based line in the processed content
    pub line: usize,

    /// 1-based column in the processed content
    pub column: usize,

    pub severity: Severity,

    pub message: String,

    /// Rule identifier, if the tool has one
    pub rule: Option<String>,

    /// Selector of the offending node
    pub selector: Option<String>,
}

impl Diagnostic {
    pub fn new(
        tool: &'static str,
        source_path: impl Into<PathBuf>,
        line: usize,
        column: usize,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tool,
            source_path: source_path.into(),
            line,
            column,
            severity,
            message: message.into(),
            rule: None,
            selector: None,
        }
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}:{})",
            self.tool,
            slash_path(&self.source_path),
            self.line,
            self.column
        )?;
        if let Some(selector) = &self.selector {
            write!(f, " {}", selector)?;
        }
        write!(f, ": {}: {}", self.severity.title(), self.message)?;
        if let Some(rule) = &self.rule {
            write!(f, " ({})", rule)?;
        }
        Ok(())
    }
}

/// Sort diagnostics by position and drop exact duplicates.
pub fn finalize(diagnostics: &mut Vec<Diagnostic>) {
    diagnostics.sort_by(|a, b| {
        (&a.source_path, a.line, a.column, &a.rule)
            .cmp(&(&b.source_path, b.line, b.column, &b.rule))
    });
    diagnostics.dedup();
}

/// Print diagnostics to the console.
///
/// Warnings go through `warn!`, errors through `error!`, so the subscriber's
/// level colouring doubles as the severity prefix.
pub fn report(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        match diagnostic.severity {
            Severity::Warning => tracing::warn!("{}", diagnostic),
            Severity::Error => tracing::error!("{}", diagnostic),
        }
    }
}

/// Maps byte offsets to 1-based line/column pairs.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    /// Line and column (in characters) of a byte offset.
    pub fn position(&self, text: &str, offset: usize) -> (usize, usize) {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.starts[line];
        let end = offset.min(text.len());
        let column = text.get(start..end).map(|s| s.chars().count()).unwrap_or(0) + 1;
        (line + 1, column)
    }
}

/// Count diagnostics of a given severity.
pub fn count(diagnostics: &[Diagnostic], severity: Severity) -> usize {
    diagnostics.iter().filter(|d| d.severity == severity).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_levels_one_and_two_have_a_severity() {
        assert_eq!(Severity::from_level(1), Some(Severity::Warning));
        assert_eq!(Severity::from_level(2), Some(Severity::Error));
        for level in [0, 3, 4, 255] {
            assert_eq!(Severity::from_level(level), None);
        }
    }

    #[test]
    fn maps_offsets_to_positions() {
        let text = "ab\ncde\n\nf";
        let index = LineIndex::new(text);

        assert_eq!(index.position(text, 0), (1, 1));
        assert_eq!(index.position(text, 1), (1, 2));
        assert_eq!(index.position(text, 3), (2, 1));
        assert_eq!(index.position(text, 5), (2, 3));
        assert_eq!(index.position(text, 7), (3, 1));
        assert_eq!(index.position(text, 8), (4, 1));
    }

    #[test]
    fn formats_with_tool_page_and_position() {
        let diagnostic = Diagnostic::new(
            "HtmlValidate",
            "blog/post.html",
            3,
            7,
            Severity::Error,
            "<img> is missing required \"alt\" attribute",
        )
        .with_rule("wcag/h37")
        .with_selector("img");

        assert_eq!(
            diagnostic.to_string(),
            "[HtmlValidate] blog/post.html (3:7) img: ERROR: <img> is missing required \"alt\" attribute (wcag/h37)"
        );
    }

    #[test]
    fn finalize_sorts_and_dedups() {
        let a = Diagnostic::new("Stylelint", "a.css", 2, 1, Severity::Error, "x");
        let b = Diagnostic::new("Stylelint", "a.css", 1, 4, Severity::Warning, "y");
        let mut all = vec![a.clone(), b.clone(), a.clone()];

        finalize(&mut all);

        assert_eq!(all, vec![b, a]);
    }
}
