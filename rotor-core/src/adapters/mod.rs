//! Capability ports the engine depends on, plus the subprocess-backed
//! implementations used in production.
//!
//! Both traits are narrow by design (spec §6): a fixed, small operation
//! vocabulary so tests can substitute in-memory fakes instead of invoking
//! `git`/`docker` subprocesses.

pub mod runtime;
pub mod vcs;

pub use runtime::{DockerCliRuntime, RuntimeAdapter};
pub use vcs::{GitCliVcs, VcsAdapter};
