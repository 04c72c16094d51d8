//! Markup stage: render, validate, beautify.

use std::sync::Arc;

use serde::Deserialize;

use crate::beautify::{Beautifier, BeautifyOptions, HtmlBeautifier};
use crate::diagnostic::{Diagnostic, Severity};
use crate::source::FileEntry;
use crate::stage::{entry_text, StageOutput, StepOrderError, TransformError, TransformStage};
use crate::templates::{page_id, Mode, TemplateEngine, TemplateRenderer};
use crate::validate::{HtmlValidator, MarkupValidator, ValidationOptions};

/// A step of the markup stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupStep {
    Render,
    Validate,
    Beautify,
}

impl MarkupStep {
    pub const DEFAULT_ORDER: [MarkupStep; 3] = [Self::Render, Self::Validate, Self::Beautify];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::Validate => "validate",
            Self::Beautify => "beautify",
        }
    }
}

/// Markup options as read from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MarkupOptions {
    pub validation: ValidationOptions,
    pub beautify: BeautifyOptions,
}

/// Renders page templates, validates the result and beautifies it.
pub struct MarkupStage {
    steps: Vec<MarkupStep>,
    renderer: Arc<dyn TemplateRenderer>,
    validator: Arc<dyn MarkupValidator>,
    beautifier: Arc<dyn Beautifier>,
}

impl MarkupStage {
    /// Default stage with built-in collaborators.
    pub fn new(engine: TemplateEngine, options: &MarkupOptions) -> Self {
        Self {
            steps: MarkupStep::DEFAULT_ORDER.to_vec(),
            renderer: Arc::new(engine),
            validator: Arc::new(HtmlValidator::new(&options.validation)),
            beautifier: Arc::new(HtmlBeautifier::new(options.beautify.clone())),
        }
    }

    /// Stage with explicit collaborators and the default step order.
    pub fn with_parts(
        renderer: Arc<dyn TemplateRenderer>,
        validator: Arc<dyn MarkupValidator>,
        beautifier: Arc<dyn Beautifier>,
    ) -> Self {
        Self {
            steps: MarkupStep::DEFAULT_ORDER.to_vec(),
            renderer,
            validator,
            beautifier,
        }
    }

    /// Replace the step order.
    ///
    /// Validation must come after rendering so positions refer to the
    /// rendered document.
    pub fn with_steps(mut self, steps: Vec<MarkupStep>) -> Result<Self, StepOrderError> {
        let render = steps.iter().position(|s| *s == MarkupStep::Render);
        let validate = steps.iter().position(|s| *s == MarkupStep::Validate);
        if let (Some(render), Some(validate)) = (render, validate) {
            if validate < render {
                return Err(StepOrderError {
                    stage: "markup",
                    step: MarkupStep::Validate.name(),
                    after: MarkupStep::Render.name(),
                });
            }
        }
        self.steps = steps;
        Ok(self)
    }

    fn convert(
        &self,
        entry: &FileEntry,
        messages: Vec<crate::validate::ValidationMessage>,
    ) -> Vec<Diagnostic> {
        messages
            .into_iter()
            .filter_map(|m| {
                let severity = Severity::from_level(m.severity)?;
                let mut diagnostic = Diagnostic::new(
                    self.validator.tool(),
                    entry.path.clone(),
                    m.line,
                    m.column,
                    severity,
                    m.message,
                )
                .with_rule(m.rule_id);
                if let Some(selector) = m.selector {
                    diagnostic = diagnostic.with_selector(selector);
                }
                Some(diagnostic)
            })
            .collect()
    }
}

impl TransformStage for MarkupStage {
    fn name(&self) -> &'static str {
        "markup"
    }

    fn steps(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    fn run(&self, entry: &FileEntry) -> Result<StageOutput, TransformError> {
        let mut content = entry_text(entry)?.to_string();
        let mut diagnostics = Vec::new();
        let page = page_id(&entry.path);

        for step in &self.steps {
            match step {
                MarkupStep::Render => {
                    content = self
                        .renderer
                        .render(&entry.display_path(), &content, &page)
                        .map_err(|message| TransformError::Template {
                            path: entry.path.clone(),
                            message,
                        })?;
                }
                MarkupStep::Validate => {
                    let messages = self.validator.validate(&content);
                    diagnostics.extend(self.convert(entry, messages));
                }
                MarkupStep::Beautify => {
                    content = self.beautifier.beautify(&content);
                }
            }
        }

        Ok(StageOutput::new(content, diagnostics))
    }
}

/// Markup stage for a source root in the given mode.
pub fn markup_stage(
    root: impl Into<std::path::PathBuf>,
    mode: Mode,
    options: &MarkupOptions,
) -> MarkupStage {
    MarkupStage::new(TemplateEngine::new(root, mode), options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::source::Category;
    use crate::validate::ValidationMessage;

    /// Validator returning canned messages and recording its input.
    struct Scripted {
        severities: Vec<u8>,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(severities: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                severities,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl MarkupValidator for Scripted {
        fn tool(&self) -> &'static str {
            "Scripted"
        }

        fn validate(&self, markup: &str) -> Vec<ValidationMessage> {
            self.seen.lock().unwrap().push(markup.to_string());
            self.severities
                .iter()
                .map(|&severity| ValidationMessage {
                    line: 1,
                    column: 1,
                    severity,
                    message: format!("level {}", severity),
                    rule_id: "scripted".to_string(),
                    selector: None,
                })
                .collect()
        }
    }

    fn stage_with(validator: Arc<Scripted>) -> MarkupStage {
        let temp = std::env::temp_dir();
        MarkupStage::with_parts(
            Arc::new(TemplateEngine::new(temp, Mode::Production)),
            validator,
            Arc::new(HtmlBeautifier::default()),
        )
    }

    fn page(body: &str) -> FileEntry {
        FileEntry::new("about.html", Category::Markup, body)
    }

    #[test]
    fn default_order_is_render_validate_beautify() {
        let stage = stage_with(Scripted::new(vec![]));
        assert_eq!(stage.steps(), vec!["render", "validate", "beautify"]);
    }

    #[test]
    fn validator_sees_rendered_markup() {
        let validator = Scripted::new(vec![]);
        let stage = stage_with(validator.clone());

        stage.run(&page("<p>{{ page }}</p>")).unwrap();

        let seen = validator.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), ["<p>about</p>"]);
    }

    #[test]
    fn drops_unrecognized_severities() {
        let validator = Scripted::new(vec![0, 1, 2, 3, 7]);
        let stage = stage_with(validator);

        let output = stage.run(&page("<p>x</p>")).unwrap();

        let levels: Vec<u8> = output.diagnostics.iter().map(|d| d.severity.level()).collect();
        assert_eq!(levels, vec![1, 2]);
        assert!(output.diagnostics.iter().all(|d| d.source_path.ends_with("about.html")));
    }

    #[test]
    fn only_unknown_severities_produce_nothing() {
        let stage = stage_with(Scripted::new(vec![0, 3, 4, 200]));

        let output = stage.run(&page("<p>x</p>")).unwrap();

        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn rejects_validate_before_render() {
        let stage = stage_with(Scripted::new(vec![]));

        let err = stage
            .with_steps(vec![MarkupStep::Validate, MarkupStep::Render])
            .err()
            .unwrap();

        assert_eq!(err.step, "validate");
    }

    #[test]
    fn template_errors_fail_the_file() {
        let stage = stage_with(Scripted::new(vec![]));

        let err = stage.run(&page("{% for %}")).err().unwrap();

        assert!(matches!(err, TransformError::Template { .. }));
    }

    #[test]
    fn non_utf8_fails_the_file() {
        let stage = stage_with(Scripted::new(vec![]));
        let entry = FileEntry::new("bin.html", Category::Markup, vec![0xff, 0xfe, 0x00]);

        assert!(matches!(stage.run(&entry), Err(TransformError::NotUtf8 { .. })));
    }
}
