//! Event handlers: the actual state-machine wiring described in spec §4.
//!
//! Every method here runs on the engine's single logical thread of control
//! (spec §5) — none of it is `async`, none of it blocks on subprocess I/O;
//! the blocking work already happened on a background thread before the
//! event arrived. This module only touches in-memory registry state and
//! decides what background task (if any) to launch next.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::{build, container, Engine, RotationState};
use crate::adapters::{RuntimeAdapter, VcsAdapter};
use crate::error::{EngineError, ErrorSummary};
use crate::intake::{BuildOutcome, Event, EventSender};
use crate::project::{ContainerHandle, ProjectId, ProjectState};
use crate::repo::{PullOutcome, ReleaseOutcome, WebhookOutcome};

impl<V: VcsAdapter + 'static, R: RuntimeAdapter + 'static> Engine<V, R> {
    pub(super) fn dispatch(&mut self, event: Event) -> Result<(), EngineError> {
        match event {
            Event::Webhook { clone_url } => self.handle_webhook(clone_url),
            Event::AdminRefresh { project_index } => self.handle_admin_refresh(project_index),
            Event::LockReleased { clone_url } => self.handle_lock_released(&clone_url),
            Event::PullCompleted {
                clone_url,
                was_initial,
                result,
            } => self.handle_pull_completed(clone_url, was_initial, result),
            Event::BuildCompleted { project, outcome } => {
                self.handle_build_completed(project, outcome)
            }
            Event::ContainerCreated { project, result } => {
                self.handle_container_created(project, result)
            }
            Event::ContainerReady {
                project,
                handle,
                result,
            } => self.handle_container_ready(project, handle, result),
            Event::ContainerStopped {
                project,
                handle,
                result,
            } => self.handle_container_stopped(project, handle, result),
        }
    }

    fn handle_webhook(&mut self, clone_url: String) -> Result<(), EngineError> {
        if self.repos.get(&clone_url).is_none() {
            warn!(clone_url = %clone_url, "webhook for unknown repo, dropped");
            return Ok(());
        }
        match self.repos.webhook(&clone_url)? {
            WebhookOutcome::StartPull => self.start_pull(&clone_url),
            WebhookOutcome::Deferred => {}
        }
        Ok(())
    }

    fn handle_admin_refresh(&mut self, project_index: usize) -> Result<(), EngineError> {
        let project = ProjectId(project_index);
        if self.projects.get(project).is_none() {
            warn!(project_index, "admin refresh for unknown project, dropped");
            return Ok(());
        }
        match self.projects.notify_new_commit(project)? {
            crate::project::NotifyOutcome::StartBuild => self.start_build(project)?,
            crate::project::NotifyOutcome::Deferred => {}
        }
        Ok(())
    }

    fn handle_lock_released(&mut self, clone_url: &str) -> Result<(), EngineError> {
        match self.repos.release(clone_url)? {
            ReleaseOutcome::StartPull => self.start_pull(clone_url),
            ReleaseOutcome::Idle => {}
        }
        Ok(())
    }

    fn handle_pull_completed(
        &mut self,
        clone_url: String,
        was_initial: bool,
        result: Result<String, ErrorSummary>,
    ) -> Result<(), EngineError> {
        let commit = match result {
            Ok(commit) => commit,
            Err(summary) => {
                warn!(clone_url = %clone_url, error = %summary, "pull failed");
                self.repos.pull_failed(&clone_url, was_initial)?;
                return Ok(());
            }
        };

        if was_initial {
            self.repos.initial_pull_succeeded(&clone_url, commit)?;
            info!(clone_url = %clone_url, "initial clone complete");
            for project in self.projects.for_repo(&clone_url).collect::<Vec<_>>() {
                self.start_build(project)?;
            }
            return Ok(());
        }

        match self.repos.pull_finished(&clone_url, commit)? {
            PullOutcome::Unchanged => {}
            PullOutcome::Changed => {
                for project in self.projects.for_repo(&clone_url).collect::<Vec<_>>() {
                    if let crate::project::NotifyOutcome::StartBuild =
                        self.projects.notify_new_commit(project)?
                    {
                        self.start_build(project)?;
                    }
                }
            }
            PullOutcome::PullAgain => self.start_pull(&clone_url),
        }
        Ok(())
    }

    fn handle_build_completed(
        &mut self,
        project: ProjectId,
        outcome: BuildOutcome,
    ) -> Result<(), EngineError> {
        let clone_url = self
            .projects
            .get(project)
            .ok_or_else(|| EngineError::Invariant(format!("unknown project {}", project.0)))?
            .repo_clone_url
            .clone();

        match outcome {
            BuildOutcome::Succeeded { hooks } => {
                self.projects.set_hooks(project, hooks)?;
                if let ReleaseOutcome::StartPull = self.repos.release(&clone_url)? {
                    self.start_pull(&clone_url);
                }

                let state = self
                    .projects
                    .get(project)
                    .ok_or_else(|| EngineError::Invariant(format!("unknown project {}", project.0)))?
                    .state;
                match state {
                    ProjectState::Init => self.begin_initial_fleet(project),
                    ProjectState::Updating => self.begin_rotation(project),
                    ProjectState::Normal => Err(EngineError::Invariant(format!(
                        "project {} build completed while already Normal",
                        project.0
                    ))),
                }
            }
            BuildOutcome::Failed(summary) => {
                warn!(project = project.0, error = %summary, "build failed");
                if let ReleaseOutcome::StartPull = self.repos.release(&clone_url)? {
                    self.start_pull(&clone_url);
                }
                self.projects.cycle_failed(project)?;
                if self.projects.take_pending_retry(project)? {
                    self.start_build(project)?;
                }
                Ok(())
            }
        }
    }

    fn handle_container_created(
        &mut self,
        project: ProjectId,
        result: Result<ContainerHandle, ErrorSummary>,
    ) -> Result<(), EngineError> {
        match result {
            Ok(handle) => {
                self.projects.insert_starting(project, handle.clone())?;
                let (needs_wait, hook_dir) = {
                    let p = self.projects.get(project).ok_or_else(|| {
                        EngineError::Invariant(format!("unknown project {}", project.0))
                    })?;
                    (p.hooks.contains("wait_ready"), p.hook_dir.clone())
                };
                if needs_wait {
                    container::spawn_wait_ready(
                        self.runtime.clone(),
                        project,
                        handle,
                        hook_dir,
                        &self.sender,
                    );
                    if self.rotations.contains_key(&project) {
                        self.drive_rotation(project)?;
                    }
                    Ok(())
                } else {
                    self.handle_container_ready(project, handle, Ok(()))
                }
            }
            Err(summary) => {
                warn!(project = project.0, error = %summary, "container create failed");
                if self.rotations.contains_key(&project) {
                    match self.rotations.get_mut(&project).unwrap().record_start_failed() {
                        super::StartFailureOutcome::Retry => self.drive_rotation(project),
                        super::StartFailureOutcome::Exhausted => self.abort_rotation(project),
                    }
                } else {
                    // Init-path failure: reissue one replacement create.
                    let tag = self
                        .projects
                        .get(project)
                        .ok_or_else(|| {
                            EngineError::Invariant(format!("unknown project {}", project.0))
                        })?
                        .image_tag();
                    container::spawn_create(self.runtime.clone(), project, tag, &self.sender);
                    Ok(())
                }
            }
        }
    }

    pub(super) fn handle_container_ready(
        &mut self,
        project: ProjectId,
        handle: ContainerHandle,
        result: Result<(), ErrorSummary>,
    ) -> Result<(), EngineError> {
        match result {
            Ok(()) => {
                self.projects.promote_to_active(project, &handle)?;
                let (state, min, active_len) = {
                    let p = self.projects.get(project).ok_or_else(|| {
                        EngineError::Invariant(format!("unknown project {}", project.0))
                    })?;
                    (p.state, p.min, p.active.len())
                };
                if state == ProjectState::Init && active_len as u32 >= min {
                    match self.projects.initial_bootstrap_complete(project)? {
                        crate::project::NotifyOutcome::StartBuild => {
                            info!(
                                project = project.0,
                                "initial fleet ready, commit already pending, starting rebuild"
                            );
                            self.start_build(project)?;
                        }
                        crate::project::NotifyOutcome::Deferred => {
                            info!(project = project.0, "initial fleet ready, project normal");
                        }
                    }
                }
                if self.rotations.contains_key(&project) {
                    self.drive_rotation(project)?;
                }
                Ok(())
            }
            Err(summary) => {
                warn!(project = project.0, error = %summary, "container readiness failed");
                self.projects.drop_from_starting(project, &handle)?;
                let state = self
                    .projects
                    .get(project)
                    .ok_or_else(|| EngineError::Invariant(format!("unknown project {}", project.0)))?
                    .state;
                if self.rotations.contains_key(&project) {
                    match self.rotations.get_mut(&project).unwrap().record_start_failed() {
                        super::StartFailureOutcome::Retry => self.drive_rotation(project)?,
                        super::StartFailureOutcome::Exhausted => self.abort_rotation(project)?,
                    }
                } else if state == ProjectState::Init {
                    let tag = self.projects.get(project).unwrap().image_tag();
                    container::spawn_create(self.runtime.clone(), project, tag, &self.sender);
                }
                Ok(())
            }
        }
    }

    fn handle_container_stopped(
        &mut self,
        project: ProjectId,
        handle: ContainerHandle,
        result: Result<(), ErrorSummary>,
    ) -> Result<(), EngineError> {
        match result {
            Ok(()) => {
                self.projects.drop_from_ending(project, &handle)?;
                if let Some(r) = self.rotations.get_mut(&project) {
                    r.record_stop_complete();
                    self.drive_rotation(project)?;
                }
                Ok(())
            }
            Err(summary) => {
                // Left in `ending`; not auto-retried (see DESIGN.md).
                warn!(project = project.0, handle = handle.as_str(), error = %summary, "container stop failed");
                Ok(())
            }
        }
    }

    fn start_pull(&self, clone_url: &str) {
        if let Some(repo) = self.repos.get(clone_url) {
            spawn_pull(
                self.vcs.clone(),
                clone_url.to_string(),
                repo.working_dir.clone(),
                false,
                &self.sender,
            );
        }
    }

    fn start_build(&mut self, project: ProjectId) -> Result<(), EngineError> {
        let clone_url = self
            .projects
            .get(project)
            .ok_or_else(|| EngineError::Invariant(format!("unknown project {}", project.0)))?
            .repo_clone_url
            .clone();
        self.repos.acquire(&clone_url)?;

        let p = self.projects.get(project).unwrap();
        let context_dir = self
            .repos
            .get(&clone_url)
            .ok_or_else(|| EngineError::Invariant(format!("unknown repo {clone_url}")))?
            .working_dir
            .clone();
        let job = build::BuildJob {
            project,
            tag: p.image_tag(),
            recipe_path: p.recipe_path.clone(),
            context_dir,
            hook_dir: p.hook_dir.clone(),
        };
        build::spawn_build(self.runtime.clone(), job, &self.sender);
        Ok(())
    }

    fn begin_initial_fleet(&mut self, project: ProjectId) -> Result<(), EngineError> {
        let (tag, min) = {
            let p = self
                .projects
                .get(project)
                .ok_or_else(|| EngineError::Invariant(format!("unknown project {}", project.0)))?;
            (p.image_tag(), p.min)
        };
        for _ in 0..min {
            container::spawn_create(self.runtime.clone(), project, tag.clone(), &self.sender);
        }
        Ok(())
    }

    fn begin_rotation(&mut self, project: ProjectId) -> Result<(), EngineError> {
        let old: Vec<ContainerHandle> = self
            .projects
            .get(project)
            .ok_or_else(|| EngineError::Invariant(format!("unknown project {}", project.0)))?
            .active
            .iter()
            .cloned()
            .collect();
        let retry_budget = self.config.retry.readiness_retry_budget;
        self.rotations
            .insert(project, RotationState::start(old, retry_budget));
        self.drive_rotation(project)
    }

    fn finish_rotation(&mut self, project: ProjectId) -> Result<(), EngineError> {
        if let crate::project::NotifyOutcome::StartBuild = self.projects.rotation_complete(project)? {
            self.start_build(project)?;
        }
        Ok(())
    }

    /// Retry budget exhausted (spec §7 item 6): stop driving this rotation
    /// and settle the project the same way a clean finish would, leaving
    /// whichever containers the rotation had already swapped in place.
    fn abort_rotation(&mut self, project: ProjectId) -> Result<(), EngineError> {
        warn!(project = project.0, "rotation retry budget exhausted, aborting cycle");
        self.rotations.remove(&project);
        self.projects.cycle_failed(project)?;
        self.finish_rotation(project)
    }

    pub(super) fn drive_rotation(&mut self, project: ProjectId) -> Result<(), EngineError> {
        let (min, max, mut active_len, mut starting_len) = {
            let p = self
                .projects
                .get(project)
                .ok_or_else(|| EngineError::Invariant(format!("unknown project {}", project.0)))?;
            (p.min, p.max, p.active.len(), p.starting.len())
        };

        loop {
            let action = match self.rotations.get(&project) {
                Some(r) => r.next_action(min, max, active_len, starting_len),
                None => return Ok(()),
            };
            match action {
                super::RotationAction::StartContainer => {
                    if let Some(r) = self.rotations.get_mut(&project) {
                        r.record_start_issued();
                    }
                    let tag = self.projects.get(project).unwrap().image_tag();
                    container::spawn_create(self.runtime.clone(), project, tag, &self.sender);
                    starting_len += 1;
                }
                super::RotationAction::StopContainer(handle) => {
                    if let Some(r) = self.rotations.get_mut(&project) {
                        r.record_stop_issued(&handle);
                    }
                    self.projects.move_to_ending(project, &handle)?;
                    container::spawn_stop(self.runtime.clone(), project, handle, &self.sender);
                    active_len -= 1;
                }
                super::RotationAction::WaitForInFlight => return Ok(()),
                super::RotationAction::Complete => {
                    self.rotations.remove(&project);
                    return self.finish_rotation(project);
                }
            }
        }
    }
}

/// Clone (first pull) or fast-forward (subsequent pulls) a repo working
/// directory on a background thread, posting the result back.
pub(super) fn spawn_pull<V: VcsAdapter + 'static>(
    vcs: Arc<V>,
    clone_url: String,
    working_dir: PathBuf,
    was_initial: bool,
    sender: &EventSender,
) {
    sender.spawn_task(move || {
        let outcome = if was_initial {
            vcs.clone(&clone_url, &working_dir)
                .and_then(|()| vcs.get_commit(&working_dir))
        } else {
            vcs.pull(&working_dir)
        };
        let result = outcome.map_err(|e| ErrorSummary::from(&EngineError::Transient(e)));
        Event::PullCompleted {
            clone_url,
            was_initial,
            result,
        }
    });
}
