//! Project state machine and registry (spec §3, §4.2).
//!
//! Domain model:
//!   - `ProjectState`    — `Init`, `Normal`, `Updating`
//!   - `ContainerHandle` — opaque runtime identifier, validated on creation
//!   - `Project`         — entity: recipe path, container range, hook set,
//!                         the three disjoint container sets, a non-owning
//!                         key into the `RepoRegistry`
//!   - `ProjectRegistry` — owns all `Project`s, stable `ProjectId` identity

use std::collections::HashSet;

use crate::error::EngineError;

/// Lifecycle state of a deployable project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectState {
    /// Before the initial image build and minimum fleet creation.
    Init,
    /// Idle; `active` holds between `min` and `max` containers.
    Normal,
    /// A rolling rotation is in flight.
    Updating,
}

/// Opaque runtime identifier for a single container instance.
///
/// The reference runtime adapter returns 64 hex characters (a full Docker
/// container ID); validity is checked once at construction so a malformed
/// handle is caught at the adapter boundary rather than silently carried
/// through set membership logic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    /// Construct a handle from a runtime adapter response, validating its
    /// shape. A malformed handle is an invariant violation (spec §7.4).
    pub fn new(raw: impl Into<String>) -> Result<Self, EngineError> {
        let raw = raw.into();
        if raw.len() != 64 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EngineError::Invariant(format!(
                "runtime adapter returned malformed container handle: {raw:?}"
            )));
        }
        Ok(ContainerHandle(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Stable identity of a project, assigned by configuration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(pub usize);

/// A deployable unit: one build recipe, one container fleet, backed by a
/// (possibly shared) [`crate::repo::Repo`] referenced by clone URL only.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: ProjectId,
    pub repo_clone_url: String,
    pub recipe_path: String,
    pub hook_dir: String,
    pub base_name: String,
    pub min: u32,
    pub max: u32,
    pub state: ProjectState,
    pub update_pending: bool,
    pub hooks: HashSet<String>,
    pub active: HashSet<ContainerHandle>,
    pub starting: HashSet<ContainerHandle>,
    pub ending: HashSet<ContainerHandle>,
}

impl Project {
    fn new(
        id: ProjectId,
        repo_clone_url: String,
        recipe_path: String,
        hook_dir: String,
        base_name: String,
        min: u32,
        max: u32,
    ) -> Self {
        Project {
            id,
            repo_clone_url,
            recipe_path,
            hook_dir,
            base_name,
            min,
            max,
            state: ProjectState::Init,
            update_pending: false,
            hooks: HashSet::new(),
            active: HashSet::new(),
            starting: HashSet::new(),
            ending: HashSet::new(),
        }
    }

    pub fn image_tag(&self) -> String {
        format!("{}:latest", self.base_name)
    }

    /// Check the invariants from spec §3 hold for this project.
    pub fn check_invariants(&self) -> Result<(), EngineError> {
        if !self.active.is_disjoint(&self.starting) {
            return Err(self.invariant("active and starting overlap"));
        }
        if !self.active.is_disjoint(&self.ending) {
            return Err(self.invariant("active and ending overlap"));
        }
        if !self.starting.is_disjoint(&self.ending) {
            return Err(self.invariant("starting and ending overlap"));
        }
        if self.state == ProjectState::Normal {
            if !(self.min..=self.max).contains(&(self.active.len() as u32)) {
                return Err(self.invariant(&format!(
                    "Normal with |active| = {} outside [{}, {}]",
                    self.active.len(),
                    self.min,
                    self.max
                )));
            }
            if !self.starting.is_empty() || !self.ending.is_empty() {
                return Err(self.invariant("Normal with non-empty starting/ending"));
            }
        }
        if self.state == ProjectState::Updating {
            let live = self.active.len() + self.starting.len();
            if (live as u32) < self.min {
                return Err(self.invariant(&format!(
                    "Updating with |active ∪ starting| = {live} < min {}",
                    self.min
                )));
            }
        }
        if self.update_pending && self.state == ProjectState::Normal {
            return Err(self.invariant("update_pending set while Normal"));
        }
        Ok(())
    }

    fn invariant(&self, msg: &str) -> EngineError {
        EngineError::Invariant(format!("project {}: {}", self.id.0, msg))
    }
}

/// Outcome of a commit notification arriving for a project (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Project transitioned (or re-entered) `Updating`; caller must start
    /// a build.
    StartBuild,
    /// Project was already non-`Normal`; `update_pending` was set.
    Deferred,
}

/// Owns every [`Project`], in configuration order.
#[derive(Debug, Default)]
pub struct ProjectRegistry {
    projects: Vec<Project>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        ProjectRegistry { projects: Vec::new() }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &mut self,
        repo_clone_url: String,
        recipe_path: String,
        hook_dir: String,
        base_name: String,
        min: u32,
        max: u32,
    ) -> ProjectId {
        let id = ProjectId(self.projects.len());
        self.projects.push(Project::new(
            id,
            repo_clone_url,
            recipe_path,
            hook_dir,
            base_name,
            min,
            max,
        ));
        id
    }

    pub fn get(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Project> {
        self.projects.iter()
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = ProjectId> + '_ {
        (0..self.projects.len()).map(ProjectId)
    }

    /// Projects backed by a given repo clone URL, in registration order.
    pub fn for_repo<'a>(&'a self, clone_url: &'a str) -> impl Iterator<Item = ProjectId> + 'a {
        self.projects
            .iter()
            .filter(move |p| p.repo_clone_url == clone_url)
            .map(|p| p.id)
    }

    fn require_mut(&mut self, id: ProjectId) -> Result<&mut Project, EngineError> {
        self.projects
            .get_mut(id.0)
            .ok_or_else(|| EngineError::Invariant(format!("unknown project id: {}", id.0)))
    }

    /// Initial image build and minimum fleet creation completed: `Init` →
    /// `Normal`, inspecting `update_pending` on entry per spec §4.2 (a
    /// webhook can race bootstrap and defer a commit notification while
    /// still `Init` — see `notify_new_commit`'s `Init` arm).
    pub fn initial_bootstrap_complete(&mut self, id: ProjectId) -> Result<NotifyOutcome, EngineError> {
        let p = self.require_mut(id)?;
        if p.update_pending {
            p.update_pending = false;
            p.state = ProjectState::Updating;
            p.check_invariants()?;
            return Ok(NotifyOutcome::StartBuild);
        }
        p.state = ProjectState::Normal;
        p.check_invariants()?;
        Ok(NotifyOutcome::Deferred)
    }

    /// The repo backing this project completed a pull with a new commit.
    /// Spec §4.2: `Normal` → `Updating`, or defer if already non-`Normal`.
    pub fn notify_new_commit(&mut self, id: ProjectId) -> Result<NotifyOutcome, EngineError> {
        let p = self.require_mut(id)?;
        match p.state {
            ProjectState::Init => {
                // Shouldn't normally happen (repos don't pull until bootstrap
                // is done for every project that references them), but if a
                // webhook races bootstrap, defer rather than build mid-init.
                p.update_pending = true;
                Ok(NotifyOutcome::Deferred)
            }
            ProjectState::Normal => {
                p.state = ProjectState::Updating;
                Ok(NotifyOutcome::StartBuild)
            }
            ProjectState::Updating => {
                p.update_pending = true; // idempotent
                Ok(NotifyOutcome::Deferred)
            }
        }
    }

    /// Rolling rotation finished: `Updating` → `Normal`, inspecting
    /// `update_pending` on entry per spec §4.2.
    pub fn rotation_complete(&mut self, id: ProjectId) -> Result<NotifyOutcome, EngineError> {
        let p = self.require_mut(id)?;
        if p.update_pending {
            p.update_pending = false;
            // state stays Updating; caller must start another build.
            p.check_invariants()?;
            return Ok(NotifyOutcome::StartBuild);
        }
        p.state = ProjectState::Normal;
        p.check_invariants()?;
        Ok(NotifyOutcome::Deferred)
    }

    /// Build failed for this cycle: project remains `Updating` (spec
    /// §4.3/§7.2) so the fleet keeps serving the prior image. No state
    /// transition happens here; this exists so build failure and rotation
    /// failure both have a named call site even though only the latter
    /// changes `Project` state (see [`Self::rotation_complete`], which a
    /// rotation abort reuses — spec §7 item 6 gives rotation abort the
    /// same "back to normal, or updating again if pending" outcome as a
    /// clean finish).
    pub fn cycle_failed(&mut self, id: ProjectId) -> Result<(), EngineError> {
        self.require_mut(id)?;
        Ok(())
    }

    /// A build just failed. Returns whether a pending update means the
    /// pipeline should be retried immediately (spec §4.3: "the
    /// `update_pending` flag is consulted to decide whether to retry").
    /// Clears the flag if set, same coalescing discipline as
    /// [`Self::rotation_complete`].
    pub fn take_pending_retry(&mut self, id: ProjectId) -> Result<bool, EngineError> {
        let p = self.require_mut(id)?;
        if p.update_pending {
            p.update_pending = false;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn set_hooks(&mut self, id: ProjectId, hooks: HashSet<String>) -> Result<(), EngineError> {
        let p = self.require_mut(id)?;
        p.hooks = hooks;
        Ok(())
    }

    pub fn insert_starting(
        &mut self,
        id: ProjectId,
        handle: ContainerHandle,
    ) -> Result<(), EngineError> {
        let p = self.require_mut(id)?;
        p.starting.insert(handle);
        p.check_invariants()
    }

    pub fn promote_to_active(
        &mut self,
        id: ProjectId,
        handle: &ContainerHandle,
    ) -> Result<(), EngineError> {
        let p = self.require_mut(id)?;
        if !p.starting.remove(handle) {
            return Err(p.invariant("promote_to_active: handle was not in starting"));
        }
        p.active.insert(handle.clone());
        p.check_invariants()
    }

    pub fn drop_from_starting(
        &mut self,
        id: ProjectId,
        handle: &ContainerHandle,
    ) -> Result<(), EngineError> {
        let p = self.require_mut(id)?;
        p.starting.remove(handle);
        p.check_invariants()
    }

    pub fn move_to_ending(
        &mut self,
        id: ProjectId,
        handle: &ContainerHandle,
    ) -> Result<(), EngineError> {
        let p = self.require_mut(id)?;
        if !p.active.remove(handle) {
            return Err(p.invariant("move_to_ending: handle was not in active"));
        }
        p.ending.insert(handle.clone());
        p.check_invariants()
    }

    pub fn drop_from_ending(
        &mut self,
        id: ProjectId,
        handle: &ContainerHandle,
    ) -> Result<(), EngineError> {
        let p = self.require_mut(id)?;
        p.ending.remove(handle);
        p.check_invariants()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(byte: u8) -> ContainerHandle {
        ContainerHandle::new(format!("{:02x}", byte).repeat(32)).unwrap()
    }

    fn registry_with_project(min: u32, max: u32) -> (ProjectRegistry, ProjectId) {
        let mut reg = ProjectRegistry::new();
        let id = reg.register(
            "https://example/r".into(),
            "Dockerfile".into(),
            "/hooks".into(),
            "proj-a".into(),
            min,
            max,
        );
        (reg, id)
    }

    #[test]
    fn malformed_handle_is_rejected() {
        assert!(ContainerHandle::new("not-hex").is_err());
        assert!(ContainerHandle::new("a".repeat(63)).is_err());
        assert!(ContainerHandle::new("a".repeat(64)).is_ok());
    }

    #[test]
    fn new_project_starts_init_with_empty_sets() {
        let (reg, id) = registry_with_project(2, 5);
        let p = reg.get(id).unwrap();
        assert_eq!(p.state, ProjectState::Init);
        assert!(p.active.is_empty() && p.starting.is_empty() && p.ending.is_empty());
    }

    #[test]
    fn bootstrap_complete_moves_to_normal() {
        let (mut reg, id) = registry_with_project(2, 5);
        reg.insert_starting(id, handle(1)).unwrap();
        reg.promote_to_active(id, &handle(1)).unwrap();
        reg.insert_starting(id, handle(2)).unwrap();
        reg.promote_to_active(id, &handle(2)).unwrap();
        reg.initial_bootstrap_complete(id).unwrap();
        assert_eq!(reg.get(id).unwrap().state, ProjectState::Normal);
    }

    #[test]
    fn bootstrap_complete_below_min_is_invariant_violation() {
        let (mut reg, id) = registry_with_project(2, 5);
        reg.insert_starting(id, handle(1)).unwrap();
        reg.promote_to_active(id, &handle(1)).unwrap();
        let err = reg.initial_bootstrap_complete(id).unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn notify_new_commit_on_normal_starts_build() {
        let (mut reg, id) = registry_with_project(2, 5);
        for b in [1, 2] {
            reg.insert_starting(id, handle(b)).unwrap();
            reg.promote_to_active(id, &handle(b)).unwrap();
        }
        reg.initial_bootstrap_complete(id).unwrap();
        let outcome = reg.notify_new_commit(id).unwrap();
        assert_eq!(outcome, NotifyOutcome::StartBuild);
        assert_eq!(reg.get(id).unwrap().state, ProjectState::Updating);
    }

    #[test]
    fn notify_new_commit_while_updating_defers() {
        let (mut reg, id) = registry_with_project(2, 5);
        for b in [1, 2] {
            reg.insert_starting(id, handle(b)).unwrap();
            reg.promote_to_active(id, &handle(b)).unwrap();
        }
        reg.initial_bootstrap_complete(id).unwrap();
        reg.notify_new_commit(id).unwrap();
        let outcome = reg.notify_new_commit(id).unwrap();
        assert_eq!(outcome, NotifyOutcome::Deferred);
        assert!(reg.get(id).unwrap().update_pending);
    }

    #[test]
    fn rotation_complete_with_pending_starts_another_build() {
        let (mut reg, id) = registry_with_project(2, 5);
        for b in [1, 2] {
            reg.insert_starting(id, handle(b)).unwrap();
            reg.promote_to_active(id, &handle(b)).unwrap();
        }
        reg.initial_bootstrap_complete(id).unwrap();
        reg.notify_new_commit(id).unwrap();
        reg.notify_new_commit(id).unwrap(); // sets pending
        let outcome = reg.rotation_complete(id).unwrap();
        assert_eq!(outcome, NotifyOutcome::StartBuild);
        assert_eq!(reg.get(id).unwrap().state, ProjectState::Updating);
        assert!(!reg.get(id).unwrap().update_pending);
    }

    #[test]
    fn rotation_complete_without_pending_returns_to_normal() {
        let (mut reg, id) = registry_with_project(2, 5);
        for b in [1, 2] {
            reg.insert_starting(id, handle(b)).unwrap();
            reg.promote_to_active(id, &handle(b)).unwrap();
        }
        reg.initial_bootstrap_complete(id).unwrap();
        reg.notify_new_commit(id).unwrap();
        let outcome = reg.rotation_complete(id).unwrap();
        assert_eq!(outcome, NotifyOutcome::Deferred);
        assert_eq!(reg.get(id).unwrap().state, ProjectState::Normal);
    }

    #[test]
    fn bootstrap_complete_with_pending_enters_updating_instead_of_normal() {
        let (mut reg, id) = registry_with_project(2, 5);
        reg.insert_starting(id, handle(1)).unwrap();
        reg.promote_to_active(id, &handle(1)).unwrap();
        reg.insert_starting(id, handle(2)).unwrap();
        reg.promote_to_active(id, &handle(2)).unwrap();

        // A commit notification races bootstrap: the repo's pull finished
        // and fanned out before this project's fleet reached `min`.
        let outcome = reg.notify_new_commit(id).unwrap();
        assert_eq!(outcome, NotifyOutcome::Deferred);
        assert!(reg.get(id).unwrap().update_pending);

        let outcome = reg.initial_bootstrap_complete(id).unwrap();
        assert_eq!(outcome, NotifyOutcome::StartBuild);
        let p = reg.get(id).unwrap();
        assert_eq!(p.state, ProjectState::Updating);
        assert!(!p.update_pending);
    }

    #[test]
    fn for_repo_filters_to_matching_projects() {
        let mut reg = ProjectRegistry::new();
        let a = reg.register("https://example/r".into(), "D".into(), "/h".into(), "a".into(), 1, 1);
        let _b = reg.register("https://example/other".into(), "D".into(), "/h".into(), "b".into(), 1, 1);
        let c = reg.register("https://example/r".into(), "D".into(), "/h".into(), "c".into(), 1, 1);
        let ids: Vec<ProjectId> = reg.for_repo("https://example/r").collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn moving_active_container_to_ending_maintains_disjointness() {
        let (mut reg, id) = registry_with_project(1, 3);
        reg.insert_starting(id, handle(1)).unwrap();
        reg.promote_to_active(id, &handle(1)).unwrap();
        reg.move_to_ending(id, &handle(1)).unwrap();
        let p = reg.get(id).unwrap();
        assert!(!p.active.contains(&handle(1)));
        assert!(p.ending.contains(&handle(1)));
        reg.drop_from_ending(id, &handle(1)).unwrap();
        assert!(!reg.get(id).unwrap().ending.contains(&handle(1)));
    }

    #[test]
    fn updating_below_min_live_is_invariant_violation() {
        let (mut reg, id) = registry_with_project(2, 5);
        for b in [1, 2] {
            reg.insert_starting(id, handle(b)).unwrap();
            reg.promote_to_active(id, &handle(b)).unwrap();
        }
        reg.initial_bootstrap_complete(id).unwrap();
        reg.notify_new_commit(id).unwrap();
        // Drop one active to ending without a replacement starting yet —
        // live = 1 < min 2.
        let err = reg.move_to_ending(id, &handle(1)).unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn image_tag_uses_base_name() {
        let (reg, id) = registry_with_project(1, 1);
        assert_eq!(reg.get(id).unwrap().image_tag(), "proj-a:latest");
    }
}
