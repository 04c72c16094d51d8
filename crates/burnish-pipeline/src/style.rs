//! Stylesheet stages: the build stage and the in-place verification pass.

use std::path::PathBuf;

use serde::Deserialize;

use crate::diagnostic::{finalize, Diagnostic};
use crate::imports::{ImportError, ImportResolver};
use crate::lint::{LintOptions, StyleLinter};
use crate::prefix::{BrowserTargets, Prefixer};
use crate::source::FileEntry;
use crate::stage::{entry_text, StageOutput, StepOrderError, TransformError, TransformStage};

/// A step of the style stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleStep {
    ResolveImports,
    Lint,
    Prefix,
    Report,
}

impl StyleStep {
    pub const DEFAULT_ORDER: [StyleStep; 4] =
        [Self::ResolveImports, Self::Lint, Self::Prefix, Self::Report];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ResolveImports => "resolve-imports",
            Self::Lint => "lint",
            Self::Prefix => "prefix",
            Self::Report => "report",
        }
    }
}

/// Style options as read from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StyleOptions {
    /// Browser versions that decide which prefixes are added
    pub targets: BrowserTargets,

    pub lint: LintOptions,
}

/// Resolves imports, lints, adds vendor prefixes and reports.
pub struct StyleStage {
    steps: Vec<StyleStep>,
    source_root: PathBuf,
    resolver: ImportResolver,
    linter: StyleLinter,
    prefixer: Prefixer,
}

impl StyleStage {
    pub fn new(
        source_root: impl Into<PathBuf>,
        partial_prefix: &str,
        options: &StyleOptions,
    ) -> Result<Self, String> {
        Ok(Self {
            steps: StyleStep::DEFAULT_ORDER.to_vec(),
            source_root: source_root.into(),
            resolver: ImportResolver::new(partial_prefix),
            linter: StyleLinter::new(&options.lint),
            prefixer: Prefixer::from_targets(&options.targets)?,
        })
    }

    /// Replace the step order.
    ///
    /// Lint must see resolved imports, and Report must be the final step.
    pub fn with_steps(mut self, steps: Vec<StyleStep>) -> Result<Self, StepOrderError> {
        let resolve = steps.iter().position(|s| *s == StyleStep::ResolveImports);
        let lint = steps.iter().position(|s| *s == StyleStep::Lint);
        if let (Some(resolve), Some(lint)) = (resolve, lint) {
            if lint < resolve {
                return Err(StepOrderError {
                    stage: "style",
                    step: StyleStep::Lint.name(),
                    after: StyleStep::ResolveImports.name(),
                });
            }
        }

        if let Some(report) = steps.iter().position(|s| *s == StyleStep::Report) {
            if let Some(later) = steps.get(report + 1) {
                return Err(StepOrderError {
                    stage: "style",
                    step: StyleStep::Report.name(),
                    after: later.name(),
                });
            }
        }

        self.steps = steps;
        Ok(self)
    }

    fn import_error(entry: &FileEntry, err: ImportError) -> TransformError {
        match err {
            ImportError::Stylesheet { message, .. } => TransformError::Stylesheet {
                path: entry.path.clone(),
                message,
            },
            err => TransformError::Import {
                path: entry.path.clone(),
                import: err.import().to_string(),
                message: err.to_string(),
            },
        }
    }
}

impl TransformStage for StyleStage {
    fn name(&self) -> &'static str {
        "style"
    }

    fn steps(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    fn run(&self, entry: &FileEntry) -> Result<StageOutput, TransformError> {
        let mut content = entry_text(entry)?.to_string();
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let absolute = self.source_root.join(&entry.path);

        for step in &self.steps {
            match step {
                StyleStep::ResolveImports => {
                    content = self
                        .resolver
                        .resolve(&absolute, &content)
                        .map_err(|e| Self::import_error(entry, e))?;
                }
                StyleStep::Lint => {
                    let report = self.linter.lint(&entry.path, &content, false);
                    diagnostics.extend(report.diagnostics);
                }
                StyleStep::Prefix => {
                    content = self
                        .prefixer
                        .prefix(&entry.display_path(), &content)
                        .map_err(|message| TransformError::Stylesheet {
                            path: entry.path.clone(),
                            message,
                        })?;
                }
                StyleStep::Report => finalize(&mut diagnostics),
            }
        }

        Ok(StageOutput::new(content, diagnostics))
    }
}

/// Lints built stylesheets with autofix.
///
/// The output is the fixed content; only problems that could not be fixed
/// are reported.
pub struct VerifyStyleStage {
    linter: StyleLinter,
}

impl VerifyStyleStage {
    pub fn new(options: &LintOptions) -> Self {
        Self {
            linter: StyleLinter::new(options),
        }
    }
}

impl TransformStage for VerifyStyleStage {
    fn name(&self) -> &'static str {
        "verify-style"
    }

    fn steps(&self) -> Vec<&'static str> {
        vec![StyleStep::Lint.name(), StyleStep::Report.name()]
    }

    fn run(&self, entry: &FileEntry) -> Result<StageOutput, TransformError> {
        let css = entry_text(entry)?;
        let mut report = self.linter.lint(&entry.path, css, true);
        finalize(&mut report.diagnostics);
        Ok(StageOutput::new(report.content, report.diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;

    use crate::source::Category;
    use tempfile::tempdir;

    fn options() -> StyleOptions {
        let mut targets = BTreeMap::new();
        targets.insert("safari".to_string(), "9".to_string());
        StyleOptions {
            targets: BrowserTargets(targets),
            lint: LintOptions::default(),
        }
    }

    fn sheet(path: &str, css: &str) -> FileEntry {
        FileEntry::new(path, Category::Style, css)
    }

    #[test]
    fn default_steps() {
        let stage = StyleStage::new("source", "_", &options()).unwrap();
        assert_eq!(stage.steps(), vec!["resolve-imports", "lint", "prefix", "report"]);
    }

    #[test]
    fn runs_all_steps() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("_base.css"), ".a { user-select: none; }\n").unwrap();
        let stage = StyleStage::new(temp.path(), "_", &options()).unwrap();

        let output = stage
            .run(&sheet("style.css", "@import 'base';\n.b {}\n"))
            .unwrap();

        let css = String::from_utf8(output.contents).unwrap();
        assert!(css.contains("-webkit-user-select"), "{}", css);
        assert_eq!(output.diagnostics.len(), 1);
        let diagnostic = &output.diagnostics[0];
        assert_eq!(diagnostic.rule.as_deref(), Some("block-no-empty"));
        assert!(diagnostic.line > 1);
        assert_eq!(diagnostic.source_path, PathBuf::from("style.css"));
    }

    #[test]
    fn commented_out_imports_are_not_resolved() {
        let temp = tempdir().unwrap();
        let stage = StyleStage::new(temp.path(), "_", &options()).unwrap();

        let output = stage
            .run(&sheet("style.css", "/* @import \"old.css\"; */\n.a { color: red; }\n"))
            .unwrap();

        let css = String::from_utf8(output.contents).unwrap();
        assert!(css.contains(".a"), "{}", css);
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn local_and_remote_imports_mix() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("_base.css"), ".a { color: red; }\n").unwrap();
        let stage = StyleStage::new(temp.path(), "_", &options()).unwrap();
        let source = concat!(
            "@import \"base\";\n",
            "@import url(\"https://fonts.example.com/x.css\");\n",
            ".b { color: blue; }\n",
        );

        let output = stage.run(&sheet("style.css", source)).unwrap();

        let css = String::from_utf8(output.contents).unwrap();
        assert!(css.starts_with("@import \"https://fonts.example.com/x.css\""), "{}", css);
        assert!(css.find(".a").unwrap() < css.find(".b").unwrap(), "{}", css);
    }

    #[test]
    fn invalid_stylesheets_fail_the_file() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("_base.css"), ".a { color: red; }\n").unwrap();
        let stage = StyleStage::new(temp.path(), "_", &options()).unwrap();

        let err = stage
            .run(&sheet("style.css", ".b { color: red; }\n@import 'base';\n"))
            .err()
            .unwrap();

        assert!(matches!(err, TransformError::Stylesheet { .. }), "{:?}", err);
    }

    #[test]
    fn missing_import_fails_the_file() {
        let temp = tempdir().unwrap();
        let stage = StyleStage::new(temp.path(), "_", &options()).unwrap();

        let err = stage.run(&sheet("style.css", "@import 'gone';")).err().unwrap();

        assert!(matches!(err, TransformError::Import { ref import, .. } if import == "gone"));
    }

    #[test]
    fn report_must_be_last() {
        let stage = StyleStage::new("source", "_", &options()).unwrap();

        let err = stage
            .with_steps(vec![StyleStep::Lint, StyleStep::Report, StyleStep::Prefix])
            .err()
            .unwrap();

        assert_eq!(err.step, "report");
    }

    #[test]
    fn lint_must_follow_imports() {
        let stage = StyleStage::new("source", "_", &options()).unwrap();

        let err = stage
            .with_steps(vec![StyleStep::Lint, StyleStep::ResolveImports])
            .err()
            .unwrap();

        assert_eq!(err.after, "resolve-imports");
    }

    #[test]
    fn steps_can_be_dropped() {
        let stage = StyleStage::new("source", "_", &options())
            .unwrap()
            .with_steps(vec![StyleStep::Lint, StyleStep::Report])
            .unwrap();

        let output = stage.run(&sheet("a.css", ".a { margin: 0px; }")).unwrap();

        assert_eq!(output.contents, b".a { margin: 0px; }");
        assert_eq!(output.diagnostics.len(), 1);
    }

    #[test]
    fn verification_fixes_and_reports_the_rest() {
        let stage = VerifyStyleStage::new(&LintOptions::default());

        let output = stage
            .run(&sheet("style.css", ".a {\n  margin: 0px;\n}\n.b {}\n"))
            .unwrap();

        assert_eq!(output.contents, b".a {\n  margin: 0;\n}\n.b {}\n");
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(output.diagnostics[0].rule.as_deref(), Some("block-no-empty"));
    }

    #[test]
    fn verification_is_idempotent() {
        let stage = VerifyStyleStage::new(&LintOptions::default());
        let first = stage
            .run(&sheet("style.css", ".a { color: #ffffff; margin: 0px; }\n"))
            .unwrap();

        let second = stage
            .run(&sheet("style.css", std::str::from_utf8(&first.contents).unwrap()))
            .unwrap();

        assert_eq!(first.contents, second.contents);
        assert!(second.diagnostics.is_empty());
    }
}
