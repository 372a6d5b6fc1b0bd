//! The orchestration engine (spec §4, §5): state machines, pending-update
//! coalescing, rolling rotation, and the lock-count protocol wired
//! together around a single-consumer event loop.
//!
//! Grounded on `sipag-core/src/worker/orchestrator.rs`'s
//! `WorkerOrchestrator<G, S, C>` — a struct generic over capability ports,
//! owning the entities it coordinates and exposing one operation
//! (`run_issue`) that drives a whole lifecycle. `Engine<V, R>` plays the
//! same role here, generic over `VcsAdapter` and `RuntimeAdapter`, except
//! its single operation (`dispatch`) drives one event at a time rather
//! than blocking for an entire lifecycle, per spec §4.7/§5.

mod build;
mod container;
mod dispatch;
mod rotation;

pub use build::BuildJob;
pub use rotation::{RotationAction, RotationState, StartFailureOutcome};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::adapters::{RuntimeAdapter, VcsAdapter};
use crate::config::EngineConfig;
use crate::intake::{Event, EventIntake, EventSender};
use crate::project::{ProjectId, ProjectRegistry};
use crate::repo::RepoRegistry;

/// Owns both registries and drives them through one event at a time.
///
/// `V` and `R` are bounded `'static` so background tasks can hold an
/// `Arc<V>`/`Arc<R>` across a thread spawn.
pub struct Engine<V: VcsAdapter + 'static, R: RuntimeAdapter + 'static> {
    repos: RepoRegistry,
    projects: ProjectRegistry,
    vcs: Arc<V>,
    runtime: Arc<R>,
    config: EngineConfig,
    sender: EventSender,
    rotations: HashMap<ProjectId, RotationState>,
}

impl<V: VcsAdapter + 'static, R: RuntimeAdapter + 'static> Engine<V, R> {
    /// Build the engine from resolved configuration, registering every
    /// repo (de-duplicated by clone URL) and project named there.
    pub fn new(config: EngineConfig, vcs: Arc<V>, runtime: Arc<R>, sender: EventSender) -> Self {
        let mut repos = RepoRegistry::new();
        let mut projects = ProjectRegistry::new();

        let state_root = std::env::temp_dir().join("rotor");
        for (index, p) in config.projects.iter().enumerate() {
            let working_dir = config
                .working_dir_for(&p.clone_url, &state_root)
                .unwrap_or_else(|| state_root.join(format!("repo-{index}")));
            repos.register(&p.clone_url, working_dir);
            let (min, max) = p.container_range;
            projects.register(
                p.clone_url.clone(),
                p.dockerfile.clone(),
                p.hook_dir.clone(),
                format!("rotor-project-{index}"),
                min,
                max,
            );
        }

        Engine {
            repos,
            projects,
            vcs,
            runtime,
            config,
            sender,
            rotations: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repos(&self) -> &RepoRegistry {
        &self.repos
    }

    pub fn projects(&self) -> &ProjectRegistry {
        &self.projects
    }

    /// Kick off the initial clone for every distinct repo (spec §4.1 row 1
    /// precondition, §4.2 `init` state).
    pub fn bootstrap(&mut self) {
        let clone_urls: Vec<(String, std::path::PathBuf)> = self
            .repos
            .iter()
            .map(|r| (r.clone_url.clone(), r.working_dir.clone()))
            .collect();
        for (clone_url, working_dir) in clone_urls {
            info!(clone_url = %clone_url, "starting initial clone");
            dispatch::spawn_pull(self.vcs.clone(), clone_url, working_dir, true, &self.sender);
        }
    }

    /// Dispatch a single event. Exposed so a caller that needs to interleave
    /// engine mutation with its own read access to the registries (the admin
    /// status endpoint, see `rotor-cli`) can drive the loop itself around a
    /// shared lock instead of calling [`Self::run`].
    pub fn dispatch_event(&mut self, event: Event) -> Result<(), crate::error::EngineError> {
        self.dispatch(event)
    }

    /// Run the event loop until the intake channel is closed (every sender
    /// dropped, or the process is shutting down).
    pub fn run(&mut self, intake: &EventIntake) {
        while let Some(event) = intake.recv() {
            if let Err(e) = self.dispatch(event) {
                warn!(error = %e, "event dispatch failed");
                if e.is_fatal() {
                    warn!("fatal error, engine loop stopping");
                    return;
                }
            }
        }
    }
}
