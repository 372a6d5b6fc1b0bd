//! Read-only status snapshot for the admin surface (spec §6: "Admin
//! surface: read-only snapshot of all projects and repos (states,
//! commits, container set sizes, pending flags, lock counts)").
//!
//! The teacher renders worker status as ad hoc display strings
//! (`sipag-core/src/worker/state.rs`'s `format_duration`/`branch_display`);
//! the admin surface here is a real HTTP endpoint returning JSON to a
//! caller, so the snapshot is a serde-derived struct instead. `generated_at`
//! uses `chrono`, the teacher's timestamp crate throughout
//! `sipag-core/src/events.rs` and `sipag-core/src/task/aggregate.rs`, so a
//! caller polling `/status` can tell how fresh a snapshot is.

use serde::Serialize;

use crate::project::{ProjectId, ProjectState};
use crate::repo::RepoState;

#[derive(Debug, Clone, Serialize)]
pub struct RepoStatus {
    pub clone_url: String,
    pub state: RepoStateLabel,
    pub commit: Option<String>,
    pub lock_count: u32,
    pub update_pending: bool,
}

/// Serializable mirror of [`RepoState`]; kept distinct so the wire label
/// (lowercase, stable) doesn't have to track the enum's `Debug` rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStateLabel {
    Init,
    Normal,
    Updating,
}

impl From<RepoState> for RepoStateLabel {
    fn from(s: RepoState) -> Self {
        match s {
            RepoState::Init => RepoStateLabel::Init,
            RepoState::Normal => RepoStateLabel::Normal,
            RepoState::Updating => RepoStateLabel::Updating,
        }
    }
}

/// Serializable mirror of [`ProjectState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStateLabel {
    Init,
    Normal,
    Updating,
}

impl From<ProjectState> for ProjectStateLabel {
    fn from(s: ProjectState) -> Self {
        match s {
            ProjectState::Init => ProjectStateLabel::Init,
            ProjectState::Normal => ProjectStateLabel::Normal,
            ProjectState::Updating => ProjectStateLabel::Updating,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub index: usize,
    pub base_name: String,
    pub repo_clone_url: String,
    pub state: ProjectStateLabel,
    pub active: usize,
    pub starting: usize,
    pub ending: usize,
    pub min: u32,
    pub max: u32,
    pub update_pending: bool,
    pub hooks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub repos: Vec<RepoStatus>,
    pub projects: Vec<ProjectStatus>,
}

impl StatusSnapshot {
    pub fn build(
        repos: &crate::repo::RepoRegistry,
        projects: &crate::project::ProjectRegistry,
    ) -> Self {
        let repos = repos
            .iter()
            .map(|r| RepoStatus {
                clone_url: r.clone_url.clone(),
                state: r.state.into(),
                commit: r.commit.clone(),
                lock_count: r.lock_count,
                update_pending: r.update_pending,
            })
            .collect();

        let projects = projects
            .iter()
            .map(|p| ProjectStatus {
                index: p.id.0,
                base_name: p.base_name.clone(),
                repo_clone_url: p.repo_clone_url.clone(),
                state: p.state.into(),
                active: p.active.len(),
                starting: p.starting.len(),
                ending: p.ending.len(),
                min: p.min,
                max: p.max,
                update_pending: p.update_pending,
                hooks: {
                    let mut h: Vec<String> = p.hooks.iter().cloned().collect();
                    h.sort();
                    h
                },
            })
            .collect();

        StatusSnapshot {
            generated_at: chrono::Utc::now(),
            repos,
            projects,
        }
    }

    /// Look up a project's status by its configured index, for the admin
    /// refresh endpoint's error path.
    pub fn project(&self, index: usize) -> Option<&ProjectStatus> {
        self.projects.iter().find(|p| p.index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectRegistry;
    use crate::repo::RepoRegistry;
    use std::path::PathBuf;

    #[test]
    fn snapshot_reflects_registry_contents() {
        let mut repos = RepoRegistry::new();
        repos.register("https://example/r", PathBuf::from("/work/r"));

        let mut projects = ProjectRegistry::new();
        projects.register(
            "https://example/r".into(),
            "Dockerfile".into(),
            "/hooks".into(),
            "proj-a".into(),
            1,
            3,
        );

        let snapshot = StatusSnapshot::build(&repos, &projects);
        assert_eq!(snapshot.repos.len(), 1);
        assert_eq!(snapshot.repos[0].clone_url, "https://example/r");
        assert_eq!(snapshot.repos[0].state, RepoStateLabel::Init);
        assert_eq!(snapshot.projects.len(), 1);
        assert_eq!(snapshot.projects[0].base_name, "proj-a");
        assert_eq!(snapshot.project(0).unwrap().base_name, "proj-a");
        assert!(snapshot.project(1).is_none());
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let repos = RepoRegistry::new();
        let projects = ProjectRegistry::new();
        let snapshot = StatusSnapshot::build(&repos, &projects);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"repos\""));
        assert!(json.contains("\"projects\""));
        assert!(json.contains("\"generated_at\""));
    }
}
