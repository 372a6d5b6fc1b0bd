//! Container lifecycle background tasks (spec §4.5, §4.6).
//!
//! Creation and readiness are split into two tasks, matching the two
//! observable steps in spec §4.5: `create()` resolves first (so the engine
//! can record the handle in `starting` as soon as it exists), then the
//! `wait_ready` hook — if configured — runs as a second task against that
//! same handle.

use std::sync::Arc;

use crate::adapters::RuntimeAdapter;
use crate::error::{EngineError, ErrorSummary};
use crate::intake::{Event, EventSender};
use crate::project::{ContainerHandle, ProjectId};

/// Request the runtime adapter create a detached container from `tag`.
pub fn spawn_create<R: RuntimeAdapter + 'static>(
    runtime: Arc<R>,
    project: ProjectId,
    tag: String,
    sender: &EventSender,
) {
    sender.spawn_task(move || {
        let result = runtime.create(&tag).map_err(|e| {
            ErrorSummary::from(&EngineError::Transient(e))
        });
        Event::ContainerCreated { project, result }
    });
}

/// Exec the `wait_ready` hook inside an already-`starting` container.
pub fn spawn_wait_ready<R: RuntimeAdapter + 'static>(
    runtime: Arc<R>,
    project: ProjectId,
    handle: ContainerHandle,
    hook_dir: String,
    sender: &EventSender,
) {
    sender.spawn_task(move || {
        let hook_path = format!("{}/wait_ready", hook_dir.trim_end_matches('/'));
        let result = match runtime.exec(&handle, &[&hook_path]) {
            Ok(_) => Ok(()),
            Err(e) => {
                let _ = runtime.stop(&handle);
                Err(ErrorSummary::from(&EngineError::ContainerHealth {
                    project: project.0,
                    reason: e.to_string(),
                }))
            }
        };
        Event::ContainerReady {
            project,
            handle,
            result,
        }
    });
}

/// Terminate and remove a container moved to `ending`.
pub fn spawn_stop<R: RuntimeAdapter + 'static>(
    runtime: Arc<R>,
    project: ProjectId,
    handle: ContainerHandle,
    sender: &EventSender,
) {
    sender.spawn_task(move || {
        let result = runtime
            .stop(&handle)
            .map_err(|e| ErrorSummary::from(&EngineError::Transient(e)));
        Event::ContainerStopped {
            project,
            handle,
            result,
        }
    });
}
