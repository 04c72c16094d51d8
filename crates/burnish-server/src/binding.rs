//! Watch bindings and their per-binding scheduling loops.
//!
//! Each binding owns a queue. One loop per binding drains it, so runs of the
//! same binding never overlap while different bindings proceed concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use burnish_pipeline::{BindingDef, BuildOrchestrator, BuildTask, GlobError, Globs, RegistryError};

use crate::websocket::ReloadNotifier;

/// A glob bound to the tasks re-run when a matching file changes.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    pub name: String,
    pub globs: Globs,
    pub tasks: Vec<BuildTask>,
    pub reload: bool,
}

impl WatchBinding {
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        tasks: Vec<BuildTask>,
        reload: bool,
    ) -> Result<Self, GlobError> {
        Ok(Self {
            name: name.into(),
            globs: Globs::new([pattern])?,
            tasks,
            reload,
        })
    }

    /// Resolve a binding definition against the orchestrator's registry.
    pub fn from_def(
        def: &BindingDef,
        orchestrator: &BuildOrchestrator,
    ) -> Result<Self, RegistryError> {
        let tasks = orchestrator.registry().resolve(&def.tasks)?;
        Ok(Self::new(&def.name, &def.pattern, tasks, def.reload)?)
    }

    /// Whether a path relative to the watched root belongs to this binding.
    pub fn matches(&self, relative: &Path) -> bool {
        self.globs.matches(relative)
    }
}

/// Where a binding's loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Idle,
    Building,
    Notifying,
}

/// Outcome of one build-and-reload cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    pub binding: String,
    pub trigger: PathBuf,
    pub tasks_failed: usize,
    pub notified: bool,
}

/// Handle to the running binding loops.
pub struct BindingScheduler {
    queues: Vec<(WatchBinding, mpsc::UnboundedSender<PathBuf>)>,
    loops: Vec<JoinHandle<()>>,
}

impl BindingScheduler {
    /// Start one loop per binding.
    ///
    /// Completed cycles are reported on `cycles` when given.
    pub fn spawn(
        bindings: Vec<WatchBinding>,
        orchestrator: BuildOrchestrator,
        notifier: Arc<dyn ReloadNotifier>,
        cycles: Option<mpsc::UnboundedSender<Cycle>>,
    ) -> Self {
        let mut queues = Vec::with_capacity(bindings.len());
        let mut loops = Vec::with_capacity(bindings.len());

        for binding in bindings {
            let (tx, rx) = mpsc::unbounded_channel();
            loops.push(tokio::spawn(run_binding(
                binding.clone(),
                rx,
                orchestrator.clone(),
                Arc::clone(&notifier),
                cycles.clone(),
            )));
            queues.push((binding, tx));
        }

        Self { queues, loops }
    }

    /// Queue a change on every binding whose glob matches.
    ///
    /// Returns the names of the bindings that accepted it.
    pub fn dispatch(&self, relative: &Path) -> Vec<&str> {
        self.queues
            .iter()
            .filter(|(binding, _)| binding.matches(relative))
            .filter_map(|(binding, tx)| {
                tx.send(relative.to_path_buf()).ok()?;
                Some(binding.name.as_str())
            })
            .collect()
    }

    /// Close every queue and wait for queued cycles to finish.
    pub async fn shutdown(self) {
        drop(self.queues);
        for handle in self.loops {
            let _ = handle.await;
        }
    }
}

async fn run_binding(
    binding: WatchBinding,
    mut queue: mpsc::UnboundedReceiver<PathBuf>,
    orchestrator: BuildOrchestrator,
    notifier: Arc<dyn ReloadNotifier>,
    cycles: Option<mpsc::UnboundedSender<Cycle>>,
) {
    let mut state = BindingState::Idle;

    while let Some(trigger) = queue.recv().await {
        transition(&binding, &mut state, BindingState::Building);
        tracing::info!("{} changed, running {}", trigger.display(), binding.name);

        let mut failed = 0;
        for task in &binding.tasks {
            let runner = orchestrator.clone();
            let job = task.clone();
            let outcome = tokio::task::spawn_blocking(move || runner.build(&job)).await;

            match outcome {
                Ok(Ok(result)) => {
                    result.report();
                    if result.is_total_failure() {
                        failed += 1;
                    }
                }
                Ok(Err(e)) => {
                    tracing::error!("{}: {}", task.name, e);
                    failed += 1;
                }
                Err(e) => {
                    tracing::error!("{}: build panicked: {}", task.name, e);
                    failed += 1;
                }
            }
        }

        let all_failed = !binding.tasks.is_empty() && failed == binding.tasks.len();
        let notified = binding.reload && !all_failed;
        if notified {
            transition(&binding, &mut state, BindingState::Notifying);
            notifier.notify();
        } else if all_failed {
            tracing::warn!("{}: every task failed, skipping reload", binding.name);
        }
        transition(&binding, &mut state, BindingState::Idle);

        if let Some(cycles) = &cycles {
            let _ = cycles.send(Cycle {
                binding: binding.name.clone(),
                trigger,
                tasks_failed: failed,
                notified,
            });
        }
    }
}

fn transition(binding: &WatchBinding, state: &mut BindingState, next: BindingState) {
    tracing::debug!("{}: {:?} -> {:?}", binding.name, state, next);
    *state = next;
}
