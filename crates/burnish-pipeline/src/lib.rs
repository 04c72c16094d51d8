//! Asset pipelines for burnish sites.
//!
//! Markup is rendered from templates, validated and beautified; stylesheets
//! have their imports inlined, are linted and prefixed; images are
//! optimized. A [`PipelineRegistry`] owns one [`BuildTask`] per category and
//! a [`BuildOrchestrator`] runs them.

pub mod beautify;
pub mod builder;
pub mod diagnostic;
pub mod html;
pub mod images;
pub mod imports;
pub mod lint;
pub mod markup;
pub mod prefix;
pub mod registry;
pub mod source;
pub mod stage;
pub mod style;
pub mod templates;
pub mod validate;

pub use builder::{write_if_changed, BuildError, BuildOrchestrator, BuildResult, FileFailure};
pub use diagnostic::{Diagnostic, Severity};
pub use images::{ImageOptions, ImageStage, SvgPass};
pub use markup::{MarkupOptions, MarkupStage, MarkupStep};
pub use registry::{
    BindingDef, BuildTask, PipelineConfig, PipelineRegistry, RegistryError, VerifyOptions,
};
pub use source::{Category, FileEntry, GlobError, Globs, SourceTree};
pub use stage::{StageOutput, StepOrderError, TransformError, TransformStage};
pub use style::{StyleOptions, StyleStage, StyleStep, VerifyStyleStage};
pub use templates::Mode;
