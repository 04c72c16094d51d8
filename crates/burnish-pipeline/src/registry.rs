//! Build tasks, the registry that owns them, and the default watch bindings.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::images::{ImageOptions, ImageStage};
use crate::markup::{markup_stage, MarkupOptions};
use crate::source::{slash_path, Category, GlobError, Globs, SourceTree, DEFAULT_PARTIAL_PREFIX};
use crate::stage::TransformStage;
use crate::style::{StyleOptions, StyleStage, VerifyStyleStage};
use crate::templates::Mode;

/// Task names registered by default.
pub const MARKUP_TASK: &str = "markup";
pub const STYLE_TASK: &str = "style";
pub const IMAGES_TASK: &str = "images";
pub const VERIFY_STYLE_TASK: &str = "verify-style";

/// Options for the in-place stylesheet verification pass.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifyOptions {
    /// Globs (relative to the output directory) never verified
    pub exclude: Vec<String>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            exclude: vec!["node_modules/**".to_string(), "target/**".to_string()],
        }
    }
}

/// Configuration for every pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Source directory
    pub source_dir: PathBuf,

    /// Output directory; built files mirror their source-relative path here
    pub output_dir: PathBuf,

    /// Files with a path component starting with this are never built
    pub partial_prefix: String,

    pub mode: Mode,
    pub markup: MarkupOptions,
    pub style: StyleOptions,
    pub images: ImageOptions,
    pub verify: VerifyOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("source"),
            output_dir: PathBuf::from("."),
            partial_prefix: DEFAULT_PARTIAL_PREFIX.to_string(),
            mode: Mode::default(),
            markup: MarkupOptions::default(),
            style: StyleOptions::default(),
            images: ImageOptions::default(),
            verify: VerifyOptions::default(),
        }
    }
}

/// Errors raised while assembling the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error("Invalid {stage} configuration: {message}")]
    Stage { stage: &'static str, message: String },

    #[error("Unknown build task '{0}'")]
    UnknownTask(String),

    #[error("Build task '{0}' is already registered")]
    DuplicateTask(String),
}

/// A stage applied to the files of one source tree.
#[derive(Clone)]
pub struct BuildTask {
    pub name: String,
    pub include: Globs,
    pub exclude: Globs,
    pub stage: Arc<dyn TransformStage>,
    pub source: SourceTree,
    pub destination: PathBuf,
}

impl BuildTask {
    /// Where a source-relative path is written.
    pub fn output_path(&self, relative: &Path) -> PathBuf {
        self.destination.join(relative)
    }

    /// Whether a changed root-relative path is one of this task's inputs.
    pub fn selects(&self, relative: &Path) -> bool {
        self.source.selects(relative, &self.include, &self.exclude)
    }
}

impl fmt::Debug for BuildTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildTask")
            .field("name", &self.name)
            .field("include", &self.include.sources())
            .field("exclude", &self.exclude.sources())
            .field("stage", &self.stage.name())
            .field("source", &self.source.root())
            .field("destination", &self.destination)
            .finish()
    }
}

/// A glob bound to the tasks re-run when a matching file changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDef {
    pub name: String,
    pub pattern: String,
    pub tasks: Vec<String>,
    pub reload: bool,
}

impl BindingDef {
    pub fn new(name: &str, pattern: &str, tasks: &[&str], reload: bool) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            tasks: tasks.iter().map(|t| t.to_string()).collect(),
            reload,
        }
    }
}

/// Owns the build tasks for every file category.
#[derive(Debug)]
pub struct PipelineRegistry {
    config: PipelineConfig,
    tasks: Vec<BuildTask>,
    bindings: Vec<BindingDef>,
}

impl PipelineRegistry {
    /// Register the markup, style, images and verify-style tasks.
    pub fn new(config: PipelineConfig) -> Result<Self, RegistryError> {
        let source =
            SourceTree::new(&config.source_dir).with_partial_prefix(&config.partial_prefix);
        let output =
            SourceTree::new(&config.output_dir).with_partial_prefix(&config.partial_prefix);

        let markup = markup_stage(&config.source_dir, config.mode, &config.markup);
        let style = StyleStage::new(&config.source_dir, &config.partial_prefix, &config.style)
            .map_err(|message| RegistryError::Stage {
                stage: STYLE_TASK,
                message,
            })?;

        let mut verify_exclude = config.verify.exclude.clone();
        if let Some(source) = relative_dir(&config.output_dir, &config.source_dir) {
            verify_exclude.push(format!("{}/**", source));
        }

        let defaults = [
            BuildTask {
                name: MARKUP_TASK.to_string(),
                include: Globs::new(["**/*.html"])?,
                exclude: Globs::empty(),
                stage: Arc::new(markup),
                source: source.clone(),
                destination: config.output_dir.clone(),
            },
            BuildTask {
                name: STYLE_TASK.to_string(),
                include: Globs::new(["**/*.css"])?,
                exclude: Globs::empty(),
                stage: Arc::new(style),
                source: source.clone(),
                destination: config.output_dir.clone(),
            },
            BuildTask {
                name: IMAGES_TASK.to_string(),
                include: Globs::new(["**/*.{svg,png,jpg,jpeg}"])?,
                exclude: Globs::empty(),
                stage: Arc::new(ImageStage::new(config.images.clone())),
                source,
                destination: config.output_dir.clone(),
            },
            BuildTask {
                name: VERIFY_STYLE_TASK.to_string(),
                include: Globs::new(["**/*.css"])?,
                exclude: Globs::new(&verify_exclude)?,
                stage: Arc::new(VerifyStyleStage::new(&config.style.lint)),
                source: output,
                destination: config.output_dir.clone(),
            },
        ];

        let bindings = vec![
            BindingDef::new("markup", "**/*.html", &[MARKUP_TASK], true),
            BindingDef::new("style", "**/*.css", &[STYLE_TASK, VERIFY_STYLE_TASK], true),
            BindingDef::new("images", "**/*.{svg,png,jpg,jpeg}", &[IMAGES_TASK], true),
        ];

        let mut registry = Self {
            config,
            tasks: Vec::new(),
            bindings,
        };
        for task in defaults {
            registry.register(task)?;
        }
        Ok(registry)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Add a task. Names are unique.
    pub fn register(&mut self, task: BuildTask) -> Result<(), RegistryError> {
        if self.tasks.iter().any(|t| t.name == task.name) {
            return Err(RegistryError::DuplicateTask(task.name));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn task(&self, name: &str) -> Result<&BuildTask, RegistryError> {
        self.tasks
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| RegistryError::UnknownTask(name.to_string()))
    }

    /// Look up several tasks, preserving order.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<BuildTask>, RegistryError> {
        names.iter().map(|n| self.task(n).cloned()).collect()
    }

    pub fn tasks(&self) -> &[BuildTask] {
        &self.tasks
    }

    /// The build task for a file category.
    pub fn for_category(&self, category: Category) -> Result<&BuildTask, RegistryError> {
        self.task(match category {
            Category::Markup => MARKUP_TASK,
            Category::Style => STYLE_TASK,
            Category::Image => IMAGES_TASK,
        })
    }

    /// The tasks of a full build: markup, style and images.
    pub fn build_tasks(&self) -> Result<Vec<BuildTask>, RegistryError> {
        [Category::Markup, Category::Style, Category::Image]
            .into_iter()
            .map(|c| self.for_category(c).cloned())
            .collect()
    }

    /// The in-place stylesheet verification task.
    pub fn verify_task(&self) -> Result<BuildTask, RegistryError> {
        self.task(VERIFY_STYLE_TASK).cloned()
    }

    /// Default watch bindings over the source tree.
    pub fn bindings(&self) -> &[BindingDef] {
        &self.bindings
    }
}

/// `inner` as a `/`-separated path below `outer`, if it is one.
fn relative_dir(outer: &Path, inner: &Path) -> Option<String> {
    let resolve = |p: &Path| {
        p.canonicalize()
            .or_else(|_| std::path::absolute(p))
            .unwrap_or_else(|_| p.to_path_buf())
    };
    let (outer, inner) = (resolve(outer), resolve(inner));
    let relative = inner.strip_prefix(&outer).ok()?;
    let slashed = slash_path(relative);
    (!slashed.is_empty()).then_some(slashed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn registry(root: &Path) -> PipelineRegistry {
        fs::create_dir_all(root.join("source")).unwrap();
        PipelineRegistry::new(PipelineConfig {
            source_dir: root.join("source"),
            output_dir: root.to_path_buf(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn registers_default_tasks() {
        let temp = tempdir().unwrap();
        let registry = registry(temp.path());

        let names: Vec<&str> = registry.tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["markup", "style", "images", "verify-style"]);
        assert_eq!(registry.for_category(Category::Image).unwrap().name, "images");
        assert_eq!(registry.task("style").unwrap().stage.name(), "style");
    }

    #[test]
    fn default_bindings() {
        let temp = tempdir().unwrap();
        let registry = registry(temp.path());

        assert_eq!(
            registry.bindings(),
            &[
                BindingDef::new("markup", "**/*.html", &["markup"], true),
                BindingDef::new("style", "**/*.css", &["style", "verify-style"], true),
                BindingDef::new("images", "**/*.{svg,png,jpg,jpeg}", &["images"], true),
            ]
        );
        for binding in registry.bindings() {
            assert!(registry.resolve(&binding.tasks).is_ok());
        }
    }

    #[test]
    fn verification_skips_sources_and_dependencies() {
        let temp = tempdir().unwrap();
        let registry = registry(temp.path());
        let verify = registry.verify_task().unwrap();

        assert!(verify.selects(Path::new("css/main.css")));
        assert!(!verify.selects(Path::new("source/main.css")));
        assert!(!verify.selects(Path::new("node_modules/pkg/a.css")));
        assert!(!verify.selects(Path::new("target/doc/a.css")));
    }

    #[test]
    fn images_task_selects_by_extension() {
        let temp = tempdir().unwrap();
        let registry = registry(temp.path());
        let images = registry.task(IMAGES_TASK).unwrap();

        assert!(images.selects(Path::new("img/logo.svg")));
        assert!(images.selects(Path::new("photo.jpeg")));
        assert!(!images.selects(Path::new("_drafts/photo.jpg")));
        assert!(!images.selects(Path::new("anim.gif")));
    }

    #[test]
    fn unknown_and_duplicate_tasks() {
        let temp = tempdir().unwrap();
        let mut registry = registry(temp.path());

        assert!(matches!(registry.task("scripts"), Err(RegistryError::UnknownTask(_))));

        let copy = registry.task(MARKUP_TASK).unwrap().clone();
        assert!(matches!(registry.register(copy), Err(RegistryError::DuplicateTask(_))));
    }

    #[test]
    fn invalid_targets_are_rejected() {
        let mut config = PipelineConfig::default();
        config
            .style
            .targets
            .0
            .insert("netscape".to_string(), "4".to_string());

        assert!(matches!(
            PipelineRegistry::new(config),
            Err(RegistryError::Stage { stage: "style", .. })
        ));
    }
}
