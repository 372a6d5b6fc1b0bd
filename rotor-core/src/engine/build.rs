//! Image build pipeline background task (spec §4.3).
//!
//! Runs entirely off the engine loop: acquiring/releasing the repo lock
//! happens synchronously in the dispatch handler (it only touches in-memory
//! state), but the build and hook-discovery subprocess calls are launched
//! here and report back through a `BuildCompleted` event.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::adapters::RuntimeAdapter;
use crate::error::{EngineError, ErrorSummary};
use crate::intake::{BuildOutcome, Event, EventSender};
use crate::project::ProjectId;

/// Everything the build task needs, independent of engine state.
pub struct BuildJob {
    pub project: ProjectId,
    pub tag: String,
    pub recipe_path: String,
    pub context_dir: PathBuf,
    pub hook_dir: String,
}

/// Launch the build pipeline (spec §4.3 steps 2-3) on a background thread.
/// Step 1 (acquiring the repo lock) and step 4 (releasing it) happen on the
/// engine loop around this call, since they mutate shared registry state.
pub fn spawn_build<R: RuntimeAdapter + 'static>(
    runtime: Arc<R>,
    job: BuildJob,
    sender: &EventSender,
) {
    sender.spawn_task(move || {
        let outcome = run_build(runtime.as_ref(), &job);
        Event::BuildCompleted {
            project: job.project,
            outcome,
        }
    });
}

fn run_build<R: RuntimeAdapter + ?Sized>(runtime: &R, job: &BuildJob) -> BuildOutcome {
    if let Err(e) = runtime.build(&job.tag, &job.recipe_path, &job.context_dir) {
        let err = EngineError::BuildFailed {
            project: job.project.0,
            source: e,
        };
        return BuildOutcome::Failed(ErrorSummary::from(&err));
    }

    let hooks: HashSet<String> = match runtime.list_hook_dir(&job.tag, &job.hook_dir) {
        Ok(hooks) => hooks,
        Err(e) => {
            let err = EngineError::Transient(e);
            return BuildOutcome::Failed(ErrorSummary::from(&err));
        }
    };

    BuildOutcome::Succeeded { hooks }
}
