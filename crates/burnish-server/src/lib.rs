//! Watch-driven rebuilds and a live-reload development server.
//!
//! Changes under the source directory are debounced, matched against watch
//! bindings and queued per binding. Each binding's loop re-runs its build
//! tasks and then tells connected pages to reload.

pub mod binding;
pub mod server;
pub mod watcher;
pub mod websocket;

pub use binding::{BindingScheduler, BindingState, Cycle, WatchBinding};
pub use server::{DevServer, DevServerConfig, ServerError};
pub use watcher::{ChangeEvent, ChangeKind, FileWatcher};
pub use websocket::{ReloadHub, ReloadMessage, ReloadNotifier};
