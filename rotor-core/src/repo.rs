//! Repo state machine and registry (spec §3, §4.1).
//!
//! Domain model:
//!   - `RepoState`    — the three-state lifecycle (`Init`, `Normal`, `Updating`)
//!   - `Repo`          — entity: working directory, last commit, pending flag, lock count
//!   - `RepoRegistry`  — owns all `Repo`s, keyed by clone URL; the sole place
//!                       that may mutate a `Repo`'s state or lock count
//!
//! Every mutating method here is the single source of truth for one of the
//! transitions in the table in spec §4.1. Callers (the engine's dispatch
//! handlers) never poke at `Repo` fields directly.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::EngineError;

/// Lifecycle state of a tracked repo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoState {
    /// Before the initial clone/pull has completed.
    Init,
    /// Idle; locks may be acquired, a webhook may start a pull.
    Normal,
    /// A VCS pull is in flight. No project build may read the working
    /// directory (lock_count == 0 for the duration, by invariant).
    Updating,
}

/// A tracked source working directory, identified by clone URL.
#[derive(Debug, Clone)]
pub struct Repo {
    pub clone_url: String,
    pub working_dir: PathBuf,
    pub commit: Option<String>,
    pub state: RepoState,
    pub update_pending: bool,
    pub lock_count: u32,
}

impl Repo {
    fn new(clone_url: String, working_dir: PathBuf) -> Self {
        Repo {
            clone_url,
            working_dir,
            commit: None,
            state: RepoState::Init,
            update_pending: false,
            lock_count: 0,
        }
    }

    /// Check the invariants from spec §3 hold for this repo. Called after
    /// every mutation in debug builds and by the property tests; a violation
    /// here is always a bug in the engine, never an operational failure.
    fn check_invariants(&self) -> Result<(), EngineError> {
        if self.lock_count > 0 && self.state != RepoState::Normal {
            return Err(EngineError::Invariant(format!(
                "repo {}: lock_count {} > 0 but state is {:?}, not Normal",
                self.clone_url, self.lock_count, self.state
            )));
        }
        Ok(())
    }
}

/// Outcome of a webhook arriving for a repo (spec §4.1 row 2/3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// `lock_count == 0`: the repo transitioned to `Updating` and a pull
    /// should be started by the caller.
    StartPull,
    /// `lock_count > 0` or already `Updating`: `update_pending` was set
    /// (or was already set — idempotent).
    Deferred,
}

/// Outcome of a pull completing (spec §4.1 rows 4/5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Commit unchanged: no fan-out to projects.
    Unchanged,
    /// Commit changed: caller must fan out `Updating` to every project
    /// backed by this repo.
    Changed,
    /// `update_pending` was set and cleared; caller must start another pull
    /// immediately instead of returning to `Normal`.
    PullAgain,
}

/// Outcome of a lock release (spec §4.1 last row).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Lock count is still positive, or was zero with nothing pending.
    Idle,
    /// Lock count dropped to zero with `update_pending` set: caller must
    /// start a pull now.
    StartPull,
}

/// Owns every tracked [`Repo`], keyed by clone URL.
#[derive(Debug, Default)]
pub struct RepoRegistry {
    repos: HashMap<String, Repo>,
}

impl RepoRegistry {
    pub fn new() -> Self {
        RepoRegistry {
            repos: HashMap::new(),
        }
    }

    /// Register a repo at engine start. Idempotent: registering the same
    /// clone URL twice returns the existing working directory rather than
    /// creating a second entry (multiple projects may share a repo).
    pub fn register(&mut self, clone_url: &str, working_dir: PathBuf) {
        self.repos
            .entry(clone_url.to_string())
            .or_insert_with(|| Repo::new(clone_url.to_string(), working_dir));
    }

    pub fn get(&self, clone_url: &str) -> Option<&Repo> {
        self.repos.get(clone_url)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Repo> {
        self.repos.values()
    }

    /// Mark the initial pull as complete (`Init` → `Normal`). Spec §4.1 row 1.
    pub fn initial_pull_succeeded(
        &mut self,
        clone_url: &str,
        commit: String,
    ) -> Result<(), EngineError> {
        let repo = self.require_mut(clone_url)?;
        repo.commit = Some(commit);
        repo.state = RepoState::Normal;
        repo.check_invariants()
    }

    /// A webhook arrived for `clone_url`. Returns what the caller must do.
    pub fn webhook(&mut self, clone_url: &str) -> Result<WebhookOutcome, EngineError> {
        let repo = self.require_mut(clone_url)?;
        match repo.state {
            RepoState::Init => {
                // A webhook racing the initial clone: defer, the bootstrap
                // pull will observe the latest commit anyway.
                repo.update_pending = true;
                Ok(WebhookOutcome::Deferred)
            }
            RepoState::Updating => {
                repo.update_pending = true; // idempotent if already set
                Ok(WebhookOutcome::Deferred)
            }
            RepoState::Normal => {
                if repo.lock_count == 0 {
                    repo.state = RepoState::Updating;
                    Ok(WebhookOutcome::StartPull)
                } else {
                    repo.update_pending = true;
                    Ok(WebhookOutcome::Deferred)
                }
            }
        }
    }

    /// Acquire the repo lock for a project build. Spec §4.1 lock-count
    /// protocol: requires `state == Normal`.
    pub fn acquire(&mut self, clone_url: &str) -> Result<(), EngineError> {
        let repo = self.require_mut(clone_url)?;
        if repo.state != RepoState::Normal {
            return Err(EngineError::Invariant(format!(
                "repo {}: acquire() called while state is {:?}, not Normal",
                clone_url, repo.state
            )));
        }
        repo.lock_count += 1;
        repo.check_invariants()
    }

    /// Release a previously acquired repo lock.
    pub fn release(&mut self, clone_url: &str) -> Result<ReleaseOutcome, EngineError> {
        let repo = self.require_mut(clone_url)?;
        if repo.lock_count == 0 {
            return Err(EngineError::Invariant(format!(
                "repo {}: release() called with lock_count already 0",
                clone_url
            )));
        }
        if repo.state != RepoState::Normal {
            return Err(EngineError::Invariant(format!(
                "repo {}: release() called while state is {:?}, not Normal",
                clone_url, repo.state
            )));
        }
        repo.lock_count -= 1;
        repo.check_invariants()?;
        if repo.lock_count == 0 && repo.update_pending {
            repo.update_pending = false;
            repo.state = RepoState::Updating;
            Ok(ReleaseOutcome::StartPull)
        } else {
            Ok(ReleaseOutcome::Idle)
        }
    }

    /// A pull finished (spec §4.1 rows 4/5). `lock_count` must be zero —
    /// invariant enforced by the caller never starting a pull otherwise.
    pub fn pull_finished(
        &mut self,
        clone_url: &str,
        new_commit: String,
    ) -> Result<PullOutcome, EngineError> {
        let repo = self.require_mut(clone_url)?;
        if repo.state != RepoState::Updating {
            return Err(EngineError::Invariant(format!(
                "repo {}: pull_finished() called while state is {:?}, not Updating",
                clone_url, repo.state
            )));
        }
        if repo.lock_count != 0 {
            return Err(EngineError::Invariant(format!(
                "repo {}: pull_finished() with lock_count {} != 0",
                clone_url, repo.lock_count
            )));
        }
        let changed = repo.commit.as_deref() != Some(new_commit.as_str());
        repo.commit = Some(new_commit);

        if repo.update_pending {
            // Inspect-on-entry-to-Normal rule: clear pending and pull again
            // instead of ever observably reaching Normal.
            repo.update_pending = false;
            // state stays Updating
            repo.check_invariants()?;
            return Ok(PullOutcome::PullAgain);
        }

        repo.state = RepoState::Normal;
        repo.check_invariants()?;
        Ok(if changed {
            PullOutcome::Changed
        } else {
            PullOutcome::Unchanged
        })
    }

    /// A pull (or the initial clone) failed. Returns the repo to `Normal`
    /// (or leaves it `Init` if this was the bootstrap clone) so that a
    /// later webhook can retry; `update_pending` is left untouched so a
    /// webhook that arrived mid-failure is not lost.
    pub fn pull_failed(&mut self, clone_url: &str, was_initial: bool) -> Result<(), EngineError> {
        let repo = self.require_mut(clone_url)?;
        repo.state = if was_initial {
            RepoState::Init
        } else {
            RepoState::Normal
        };
        repo.check_invariants()
    }

    fn require_mut(&mut self, clone_url: &str) -> Result<&mut Repo, EngineError> {
        self.repos.get_mut(clone_url).ok_or_else(|| {
            EngineError::Invariant(format!("unknown repo clone_url: {clone_url}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_one_repo() -> RepoRegistry {
        let mut reg = RepoRegistry::new();
        reg.register("https://example/r", PathBuf::from("/work/r"));
        reg
    }

    #[test]
    fn new_repo_starts_in_init() {
        let reg = registry_with_one_repo();
        assert_eq!(reg.get("https://example/r").unwrap().state, RepoState::Init);
        assert_eq!(reg.get("https://example/r").unwrap().lock_count, 0);
    }

    #[test]
    fn register_is_idempotent_for_shared_repo() {
        let mut reg = RepoRegistry::new();
        reg.register("https://example/r", PathBuf::from("/work/a"));
        reg.register("https://example/r", PathBuf::from("/work/b"));
        assert_eq!(reg.iter().count(), 1);
        assert_eq!(reg.get("https://example/r").unwrap().working_dir, PathBuf::from("/work/a"));
    }

    #[test]
    fn initial_pull_success_moves_to_normal() {
        let mut reg = registry_with_one_repo();
        reg.initial_pull_succeeded("https://example/r", "c1".into()).unwrap();
        let repo = reg.get("https://example/r").unwrap();
        assert_eq!(repo.state, RepoState::Normal);
        assert_eq!(repo.commit.as_deref(), Some("c1"));
    }

    #[test]
    fn webhook_on_normal_with_no_locks_starts_pull() {
        let mut reg = registry_with_one_repo();
        reg.initial_pull_succeeded("https://example/r", "c1".into()).unwrap();
        let outcome = reg.webhook("https://example/r").unwrap();
        assert_eq!(outcome, WebhookOutcome::StartPull);
        assert_eq!(reg.get("https://example/r").unwrap().state, RepoState::Updating);
    }

    #[test]
    fn webhook_on_normal_with_locks_defers() {
        let mut reg = registry_with_one_repo();
        reg.initial_pull_succeeded("https://example/r", "c1".into()).unwrap();
        reg.acquire("https://example/r").unwrap();
        let outcome = reg.webhook("https://example/r").unwrap();
        assert_eq!(outcome, WebhookOutcome::Deferred);
        let repo = reg.get("https://example/r").unwrap();
        assert_eq!(repo.state, RepoState::Normal);
        assert!(repo.update_pending);
    }

    #[test]
    fn webhook_during_updating_sets_pending_idempotently() {
        let mut reg = registry_with_one_repo();
        reg.initial_pull_succeeded("https://example/r", "c1".into()).unwrap();
        reg.webhook("https://example/r").unwrap(); // -> Updating
        let o1 = reg.webhook("https://example/r").unwrap();
        let o2 = reg.webhook("https://example/r").unwrap();
        assert_eq!(o1, WebhookOutcome::Deferred);
        assert_eq!(o2, WebhookOutcome::Deferred);
        assert!(reg.get("https://example/r").unwrap().update_pending);
    }

    #[test]
    fn acquire_requires_normal_state() {
        let mut reg = registry_with_one_repo();
        // still Init
        let err = reg.acquire("https://example/r").unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn release_drops_lock_count_to_zero() {
        let mut reg = registry_with_one_repo();
        reg.initial_pull_succeeded("https://example/r", "c1".into()).unwrap();
        reg.acquire("https://example/r").unwrap();
        let outcome = reg.release("https://example/r").unwrap();
        assert_eq!(outcome, ReleaseOutcome::Idle);
        assert_eq!(reg.get("https://example/r").unwrap().lock_count, 0);
    }

    #[test]
    fn release_to_zero_with_pending_triggers_pull() {
        let mut reg = registry_with_one_repo();
        reg.initial_pull_succeeded("https://example/r", "c1".into()).unwrap();
        reg.acquire("https://example/r").unwrap();
        reg.webhook("https://example/r").unwrap(); // lock_count>0 -> defers, sets pending
        let outcome = reg.release("https://example/r").unwrap();
        assert_eq!(outcome, ReleaseOutcome::StartPull);
        let repo = reg.get("https://example/r").unwrap();
        assert_eq!(repo.state, RepoState::Updating);
        assert!(!repo.update_pending);
    }

    #[test]
    fn release_below_zero_is_invariant_violation() {
        let mut reg = registry_with_one_repo();
        reg.initial_pull_succeeded("https://example/r", "c1".into()).unwrap();
        let err = reg.release("https://example/r").unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn pull_finished_same_commit_is_unchanged() {
        let mut reg = registry_with_one_repo();
        reg.initial_pull_succeeded("https://example/r", "c1".into()).unwrap();
        reg.webhook("https://example/r").unwrap();
        let outcome = reg.pull_finished("https://example/r", "c1".into()).unwrap();
        assert_eq!(outcome, PullOutcome::Unchanged);
        assert_eq!(reg.get("https://example/r").unwrap().state, RepoState::Normal);
    }

    #[test]
    fn pull_finished_new_commit_is_changed() {
        let mut reg = registry_with_one_repo();
        reg.initial_pull_succeeded("https://example/r", "c1".into()).unwrap();
        reg.webhook("https://example/r").unwrap();
        let outcome = reg.pull_finished("https://example/r", "c2".into()).unwrap();
        assert_eq!(outcome, PullOutcome::Changed);
        assert_eq!(reg.get("https://example/r").unwrap().commit.as_deref(), Some("c2"));
    }

    #[test]
    fn pull_finished_with_pending_pulls_again_without_reaching_normal() {
        let mut reg = registry_with_one_repo();
        reg.initial_pull_succeeded("https://example/r", "c1".into()).unwrap();
        reg.webhook("https://example/r").unwrap(); // -> Updating
        // second webhook arrives while pull in flight
        reg.webhook("https://example/r").unwrap(); // sets pending
        let outcome = reg.pull_finished("https://example/r", "c2".into()).unwrap();
        assert_eq!(outcome, PullOutcome::PullAgain);
        let repo = reg.get("https://example/r").unwrap();
        assert_eq!(repo.state, RepoState::Updating);
        assert!(!repo.update_pending);
    }

    #[test]
    fn burst_of_webhooks_coalesces_to_single_pending() {
        let mut reg = registry_with_one_repo();
        reg.initial_pull_succeeded("https://example/r", "c1".into()).unwrap();
        reg.webhook("https://example/r").unwrap(); // -> Updating, pull #1 starts
        for _ in 0..5 {
            reg.webhook("https://example/r").unwrap();
        }
        assert!(reg.get("https://example/r").unwrap().update_pending);
        let outcome = reg.pull_finished("https://example/r", "c2".into()).unwrap();
        assert_eq!(outcome, PullOutcome::PullAgain);
        // Only one additional pull is indicated; pending is now clear.
        assert!(!reg.get("https://example/r").unwrap().update_pending);
        let final_outcome = reg.pull_finished("https://example/r", "c2".into()).unwrap();
        assert_eq!(final_outcome, PullOutcome::Unchanged);
    }

    #[test]
    fn pull_failed_returns_to_normal_keeping_pending() {
        let mut reg = registry_with_one_repo();
        reg.initial_pull_succeeded("https://example/r", "c1".into()).unwrap();
        reg.webhook("https://example/r").unwrap();
        reg.webhook("https://example/r").unwrap(); // sets pending while updating
        reg.pull_failed("https://example/r", false).unwrap();
        let repo = reg.get("https://example/r").unwrap();
        assert_eq!(repo.state, RepoState::Normal);
        assert!(repo.update_pending);
    }

    #[test]
    fn pull_failed_on_initial_clone_stays_init() {
        let mut reg = registry_with_one_repo();
        reg.pull_failed("https://example/r", true).unwrap();
        assert_eq!(reg.get("https://example/r").unwrap().state, RepoState::Init);
    }

    #[test]
    fn unknown_repo_is_invariant_violation() {
        let mut reg = RepoRegistry::new();
        let err = reg.acquire("https://nope").unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }
}
