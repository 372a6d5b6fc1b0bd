//! Container runtime adapter (spec §6): build, create, exec, run, stop, and
//! the hook-listing helper used by the build pipeline (spec §4.3 step 3).
//!
//! Grounded on `sipag-core/src/docker.rs` (preflight checks, `run_container`
//! subprocess shape, `timeout`-wrapped invocation) and
//! `sipag-core/src/worker/docker_runtime.rs` (`ContainerRuntime` port). Hook
//! discovery borrows the exists-means-present, fire-and-forget tolerance of
//! `sipag-core/src/worker/hook_runner.rs`: a missing hooks directory is not
//! an error here either, just an empty set.

use std::collections::HashSet;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::config::RetryPolicy;
use crate::project::ContainerHandle;

/// Capability set the engine needs from the container runtime.
pub trait RuntimeAdapter: Send + Sync {
    /// Build and tag an image from `recipe_path` (relative to `context_dir`)
    /// rooted in `context_dir`.
    fn build(&self, tag: &str, recipe_path: &str, context_dir: &Path) -> Result<()>;

    /// Create a detached container from `tag`, returning its opaque handle.
    fn create(&self, tag: &str) -> Result<ContainerHandle>;

    /// Run `cmd` inside a running container; non-zero exit is a failure.
    fn exec(&self, handle: &ContainerHandle, cmd: &[&str]) -> Result<String>;

    /// Ephemeral one-shot run of `tag`; container is auto-removed.
    fn run(&self, tag: &str, cmd: &[&str]) -> Result<String>;

    /// Terminate and remove a container.
    fn stop(&self, handle: &ContainerHandle) -> Result<()>;

    /// List the files directly inside `dir` within a throwaway container
    /// created from `tag`. A missing or empty directory yields an empty
    /// set rather than an error (spec §4.3 step 3).
    fn list_hook_dir(&self, tag: &str, dir: &str) -> Result<HashSet<String>> {
        match self.run(tag, &["ls", "-1", dir]) {
            Ok(stdout) => Ok(stdout.lines().map(str::to_string).collect()),
            Err(_) => Ok(HashSet::new()),
        }
    }
}

/// Production adapter: shells out to the `docker` binary on `$PATH`.
pub struct DockerCliRuntime {
    build_timeout: Duration,
    /// Applies to `create`, `exec`, `run`, `stop`: all short-lived relative
    /// to an image build.
    exec_timeout: Duration,
}

impl DockerCliRuntime {
    pub fn new(build_timeout: Duration, exec_timeout: Duration) -> Self {
        DockerCliRuntime {
            build_timeout,
            exec_timeout,
        }
    }

    /// Docker daemon reachability check, run once at startup.
    pub fn preflight(&self) -> Result<()> {
        let status = Command::new("docker")
            .args(["info"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("spawning docker info")?;
        if !status.success() {
            bail!("docker daemon is not reachable");
        }
        Ok(())
    }
}

impl Default for DockerCliRuntime {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        DockerCliRuntime::new(retry.build_timeout, retry.exec_timeout)
    }
}

/// `timeout <secs> docker <args...>`, matching `docker.rs::run_container`.
fn timeout_docker(timeout: Duration) -> Command {
    let mut cmd = Command::new("timeout");
    cmd.arg(timeout.as_secs().max(1).to_string()).arg("docker");
    cmd
}

impl RuntimeAdapter for DockerCliRuntime {
    fn build(&self, tag: &str, recipe_path: &str, context_dir: &Path) -> Result<()> {
        let status = timeout_docker(self.build_timeout)
            .arg("build")
            .arg("-t")
            .arg(tag)
            .arg("-f")
            .arg(context_dir.join(recipe_path))
            .arg(context_dir)
            .status()
            .context("spawning docker build")?;
        if !status.success() {
            bail!("docker build -t {tag} failed: {status}");
        }
        Ok(())
    }

    fn create(&self, tag: &str) -> Result<ContainerHandle> {
        let out = timeout_docker(self.exec_timeout)
            .args(["create", "--detach"])
            .arg(tag)
            .output()
            .context("spawning docker create")?;
        if !out.status.success() {
            bail!(
                "docker create {tag} failed: {}",
                String::from_utf8_lossy(&out.stderr)
            );
        }
        let id = String::from_utf8_lossy(&out.stdout).trim().to_string();
        let handle = ContainerHandle::new(id)?;
        let status = timeout_docker(self.exec_timeout)
            .arg("start")
            .arg(handle.as_str())
            .stdout(Stdio::null())
            .status()
            .context("spawning docker start")?;
        if !status.success() {
            bail!("docker start {} failed: {status}", handle.as_str());
        }
        Ok(handle)
    }

    fn exec(&self, handle: &ContainerHandle, cmd: &[&str]) -> Result<String> {
        let out = timeout_docker(self.exec_timeout)
            .arg("exec")
            .arg(handle.as_str())
            .args(cmd)
            .output()
            .context("spawning docker exec")?;
        if !out.status.success() {
            bail!(
                "docker exec in {} failed: {}",
                handle.as_str(),
                String::from_utf8_lossy(&out.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn run(&self, tag: &str, cmd: &[&str]) -> Result<String> {
        let out = timeout_docker(self.exec_timeout)
            .args(["run", "--rm"])
            .arg(tag)
            .args(cmd)
            .output()
            .context("spawning docker run")?;
        if !out.status.success() {
            bail!(
                "docker run {tag} failed: {}",
                String::from_utf8_lossy(&out.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        let status = timeout_docker(self.exec_timeout)
            .arg("rm")
            .arg("-f")
            .arg(handle.as_str())
            .stdout(Stdio::null())
            .status()
            .context("spawning docker rm -f")?;
        if !status.success() {
            bail!("docker rm -f {} failed: {status}", handle.as_str());
        }
        Ok(())
    }
}
