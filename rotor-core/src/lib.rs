//! # rotor-core
//!
//! The orchestration engine for `rotor`, a continuous deployment control
//! plane: watches source repositories, rebuilds container images when code
//! changes, and rolls running container instances forward so user code is
//! always served by healthy containers running the latest commit.
//!
//! This crate is the engine only — no HTTP listeners, no process entry
//! point, no `main`. It is used by the `rotor` binary (see the `rotor-cli`
//! crate) but is structured so the whole orchestration layer can be driven
//! and property-tested against in-memory fakes of the VCS and runtime
//! adapters, without a `git`/`docker` subprocess in sight.
//!
//! ## Module map
//!
//! - [`repo`] — the `Repo` state machine and registry: the lock-count
//!   protocol and pending-update coalescing.
//! - [`project`] — the `Project` state machine and registry: the three
//!   disjoint container sets and their invariants.
//! - [`adapters`] — the `VcsAdapter`/`RuntimeAdapter` ports and their
//!   subprocess-backed production implementations.
//! - [`engine`] — ties the above together: event dispatch, the image build
//!   pipeline, and the rolling rotation planner.
//! - [`intake`] — the single-consumer event queue background tasks post
//!   completion events back to.
//! - [`config`] — startup configuration loading and the retry/timeout
//!   tunables.
//! - [`status`] — the read-only snapshot consumed by the admin surface.
//! - [`error`] — the typed `EngineError` the rest of the crate returns.

pub mod adapters;
pub mod config;
pub mod engine;
pub mod error;
pub mod intake;
pub mod project;
pub mod repo;
pub mod status;

pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use intake::{Event, EventIntake, EventSender};
