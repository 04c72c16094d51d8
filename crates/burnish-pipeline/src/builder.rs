//! Runs build tasks over their source trees and writes the results.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::diagnostic::{self, finalize, Diagnostic, Severity};
use crate::registry::{BuildTask, PipelineRegistry};
use crate::source::FileEntry;

/// A file whose stage failed outright or whose output could not be written.
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Result of running one build task.
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// Task name
    pub task: String,

    /// Files selected by the task's globs
    pub files_matched: usize,

    /// Outputs written because their bytes changed
    pub files_written: usize,

    /// Outputs left alone because they were already up to date
    pub files_unchanged: usize,

    pub failures: Vec<FileFailure>,

    /// Diagnostics from every file, sorted by path and position
    pub diagnostics: Vec<Diagnostic>,

    /// Total build time in milliseconds
    pub duration_ms: u64,
}

impl BuildResult {
    /// At least one file matched and none of them could be built.
    pub fn is_total_failure(&self) -> bool {
        self.files_matched > 0 && self.failures.len() == self.files_matched
    }

    pub fn error_count(&self) -> usize {
        diagnostic::count(&self.diagnostics, Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        diagnostic::count(&self.diagnostics, Severity::Warning)
    }

    /// Print diagnostics, failures and a summary line.
    pub fn report(&self) {
        diagnostic::report(&self.diagnostics);
        for failure in &self.failures {
            tracing::error!("{}", failure.message);
        }
        tracing::info!(
            "{}: {} file(s), {} written, {} unchanged, {} failed, {} error(s), {} warning(s) in {}ms",
            self.task,
            self.files_matched,
            self.files_written,
            self.files_unchanged,
            self.failures.len(),
            self.error_count(),
            self.warning_count(),
            self.duration_ms
        );
    }
}

/// Errors that stop a whole task.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

enum FileOutcome {
    Written(Vec<Diagnostic>),
    Unchanged(Vec<Diagnostic>),
    /// Diagnostics survive a failed write
    Failed(FileFailure, Vec<Diagnostic>),
}

/// Runs build tasks from a registry.
#[derive(Debug, Clone)]
pub struct BuildOrchestrator {
    registry: Arc<PipelineRegistry>,
}

impl BuildOrchestrator {
    pub fn new(registry: Arc<PipelineRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// Build every file the task selects, in parallel.
    ///
    /// Diagnostics and single-file failures, including failed writes, never
    /// stop other files. Only an unusable destination root fails the task.
    pub fn build(&self, task: &BuildTask) -> Result<BuildResult, BuildError> {
        let start = Instant::now();

        fs::create_dir_all(&task.destination).map_err(|source| BuildError::CreateDir {
            path: task.destination.clone(),
            source,
        })?;

        let entries: Vec<FileEntry> = task.source.list(&task.include, &task.exclude).collect();
        tracing::debug!("{}: {} file(s) matched", task.name, entries.len());

        let outcomes: Vec<FileOutcome> = entries
            .par_iter()
            .map(|entry| build_file(task, entry))
            .collect();

        let mut result = BuildResult {
            task: task.name.clone(),
            files_matched: entries.len(),
            files_written: 0,
            files_unchanged: 0,
            failures: Vec::new(),
            diagnostics: Vec::new(),
            duration_ms: 0,
        };

        for outcome in outcomes {
            match outcome {
                FileOutcome::Written(diagnostics) => {
                    result.files_written += 1;
                    result.diagnostics.extend(diagnostics);
                }
                FileOutcome::Unchanged(diagnostics) => {
                    result.files_unchanged += 1;
                    result.diagnostics.extend(diagnostics);
                }
                FileOutcome::Failed(failure, diagnostics) => {
                    result.failures.push(failure);
                    result.diagnostics.extend(diagnostics);
                }
            }
        }

        finalize(&mut result.diagnostics);
        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Run several tasks in parallel.
    pub fn build_all(&self, tasks: &[BuildTask]) -> Vec<(String, Result<BuildResult, BuildError>)> {
        tasks
            .par_iter()
            .map(|task| (task.name.clone(), self.build(task)))
            .collect()
    }
}

fn build_file(task: &BuildTask, entry: &FileEntry) -> FileOutcome {
    let output = match task.stage.run(entry) {
        Ok(output) => output,
        Err(e) => {
            return FileOutcome::Failed(
                FileFailure {
                    path: entry.path.clone(),
                    message: e.to_string(),
                },
                Vec::new(),
            )
        }
    };

    let target = task.output_path(&entry.path);
    match write_if_changed(&target, &output.contents) {
        Ok(true) => {
            tracing::debug!("{}: wrote {}", task.name, target.display());
            FileOutcome::Written(output.diagnostics)
        }
        Ok(false) => FileOutcome::Unchanged(output.diagnostics),
        Err(e) => FileOutcome::Failed(
            FileFailure {
                path: entry.path.clone(),
                message: format!("Failed to write output {}: {}", target.display(), e),
            },
            output.diagnostics,
        ),
    }
}

/// Write `contents` unless the file already holds exactly these bytes.
///
/// Returns whether the file was written.
pub fn write_if_changed(path: &Path, contents: &[u8]) -> io::Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == contents {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PipelineConfig, MARKUP_TASK, STYLE_TASK, VERIFY_STYLE_TASK};
    use crate::templates::Mode;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn orchestrator(root: &Path) -> BuildOrchestrator {
        fs::create_dir_all(root.join("source")).unwrap();
        let registry = PipelineRegistry::new(PipelineConfig {
            source_dir: root.join("source"),
            output_dir: root.to_path_buf(),
            mode: Mode::Production,
            ..Default::default()
        })
        .unwrap();
        BuildOrchestrator::new(Arc::new(registry))
    }

    fn task(orchestrator: &BuildOrchestrator, name: &str) -> BuildTask {
        orchestrator.registry().task(name).unwrap().clone()
    }

    #[test]
    fn builds_about_page_end_to_end() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(
            root,
            "source/about.html",
            "<!DOCTYPE html>\n<html lang=\"en\"><head><title>About</title></head>\
             <body><main><h1>{{ page }}</h1>{% include \"_footer.html\" %}</main></body></html>\n",
        );
        write(root, "source/_footer.html", "<p>{% if is_dev %}dev{% else %}prod{% endif %}</p>");
        let orchestrator = orchestrator(root);

        let result = orchestrator.build(&task(&orchestrator, MARKUP_TASK)).unwrap();

        assert_eq!(result.files_matched, 1);
        assert_eq!(result.files_written, 1);
        assert_eq!(result.error_count(), 0);
        assert!(!root.join("_footer.html").exists());
        assert_eq!(
            fs::read_to_string(root.join("about.html")).unwrap(),
            "<!DOCTYPE html>\n\
             <html lang=\"en\">\n\
             <head>\n\
             \x20   <title>About</title>\n\
             </head>\n\
             <body>\n\
             \x20   <main>\n\
             \x20       <h1>about</h1>\n\
             \x20       <p>prod</p>\n\
             \x20   </main>\n\
             </body>\n\
             </html>\n"
        );
    }

    #[test]
    fn one_failing_style_file_does_not_stop_the_others() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(root, "source/a.css", ".a { color: red; }\n");
        write(root, "source/b.css", ".b { color: #ggg; }\n");
        write(root, "source/c/d.css", ".d { margin: 1px; }\n");
        let orchestrator = orchestrator(root);

        let result = orchestrator.build(&task(&orchestrator, STYLE_TASK)).unwrap();

        assert_eq!(result.files_matched, 3);
        assert_eq!(result.files_written, 3);
        assert!(result.failures.is_empty());
        for built in ["a.css", "b.css", "c/d.css"] {
            assert!(root.join(built).exists(), "{} missing", built);
        }

        assert!(result.error_count() > 0);
        assert!(result
            .diagnostics
            .iter()
            .all(|d| d.source_path == Path::new("b.css")));
    }

    #[test]
    fn transform_failures_skip_only_that_output() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(root, "source/ok.css", ".ok { color: red; }\n");
        write(root, "source/broken.css", "@import 'missing';\n");
        let orchestrator = orchestrator(root);

        let result = orchestrator.build(&task(&orchestrator, STYLE_TASK)).unwrap();

        assert_eq!(result.files_written, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].path, PathBuf::from("broken.css"));
        assert!(!result.is_total_failure());
        assert!(!root.join("broken.css").exists());
        assert!(root.join("ok.css").exists());
    }

    #[test]
    fn every_file_failing_is_a_total_failure() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(root, "source/page.html", "{% for %}");
        let orchestrator = orchestrator(root);

        let result = orchestrator.build(&task(&orchestrator, MARKUP_TASK)).unwrap();

        assert!(result.is_total_failure());
    }

    #[test]
    fn empty_task_is_not_a_failure() {
        let temp = tempdir().unwrap();
        let orchestrator = orchestrator(temp.path());

        let result = orchestrator.build(&task(&orchestrator, MARKUP_TASK)).unwrap();

        assert_eq!(result.files_matched, 0);
        assert!(!result.is_total_failure());
    }

    #[test]
    fn partials_are_never_built() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(root, "source/_partials/nav.html", "<nav></nav>");
        write(root, "source/_layout.html", "<main></main>");
        write(root, "source/index.html", "<p>index</p>");
        let orchestrator = orchestrator(root);

        let result = orchestrator.build(&task(&orchestrator, MARKUP_TASK)).unwrap();

        assert_eq!(result.files_matched, 1);
        assert!(root.join("index.html").exists());
        assert!(!root.join("_layout.html").exists());
        assert!(!root.join("_partials").exists());
    }

    #[test]
    fn verification_writes_fixes_once() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(root, "css/main.css", ".a {\n  margin: 0px;\n  color: #ffffff;\n}\n");
        write(root, "source/main.css", ".a { margin: 0px; }\n");
        write(root, "node_modules/pkg/x.css", ".x { margin: 0px; }\n");
        let orchestrator = orchestrator(root);
        let verify = task(&orchestrator, VERIFY_STYLE_TASK);

        let first = orchestrator.build(&verify).unwrap();
        let second = orchestrator.build(&verify).unwrap();

        assert_eq!(first.files_matched, 1);
        assert_eq!(first.files_written, 1);
        assert!(first.diagnostics.is_empty());
        assert_eq!(second.files_written, 0);
        assert_eq!(second.files_unchanged, 1);
        assert!(second.diagnostics.is_empty());
        assert_eq!(
            fs::read_to_string(root.join("css/main.css")).unwrap(),
            ".a {\n  margin: 0;\n  color: #fff;\n}\n"
        );
        assert_eq!(
            fs::read_to_string(root.join("source/main.css")).unwrap(),
            ".a { margin: 0px; }\n"
        );
    }

    #[test]
    fn unchanged_outputs_are_not_rewritten() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("out/a.txt");

        assert!(write_if_changed(&path, b"one").unwrap());
        assert!(!write_if_changed(&path, b"one").unwrap());
        assert!(write_if_changed(&path, b"two").unwrap());
    }

    #[test]
    fn builds_tasks_in_parallel() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(root, "source/index.html", "<p>x</p>");
        write(root, "source/a.css", ".a { color: red; }");
        let orchestrator = orchestrator(root);
        let tasks = orchestrator.registry().build_tasks().unwrap();

        let results = orchestrator.build_all(&tasks);

        let names: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["markup", "style", "images"]);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }

    #[test]
    fn failed_writes_do_not_stop_the_task() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(root, "source/a.css", ".a { color: #ggg; }\n");
        write(root, "source/b.css", ".b { color: red; }\n");
        fs::create_dir_all(root.join("b.css")).unwrap();
        let orchestrator = orchestrator(root);

        let result = orchestrator.build(&task(&orchestrator, STYLE_TASK)).unwrap();

        assert_eq!(result.files_matched, 2);
        assert_eq!(result.files_written, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].path, PathBuf::from("b.css"));
        assert!(result.failures[0].message.contains("Failed to write output"));
        assert!(!result.is_total_failure());
        assert!(root.join("a.css").is_file());
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.rule.as_deref() == Some("color-no-invalid-hex")));
    }

    #[test]
    fn unusable_destination_fails_the_task() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(root, "source/a.css", ".a { color: red; }\n");
        let orchestrator = orchestrator(root);
        let mut style = task(&orchestrator, STYLE_TASK);
        write(root, "occupied", "");
        style.destination = root.join("occupied/out");

        let err = orchestrator.build(&style).unwrap_err();

        assert!(matches!(err, BuildError::CreateDir { .. }));
    }
}
