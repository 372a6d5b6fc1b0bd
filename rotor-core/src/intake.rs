//! Single-consumer event queue (spec §4.7, §5).
//!
//! All engine state mutation happens on one logical thread of control.
//! Background tasks — pulls, builds, container lifecycle calls — run on
//! plain OS threads and post completion events back here; they never touch
//! `Repo`/`Project` state directly. This mirrors the teacher's NDJSON event
//! log (`sipag-core/src/events.rs`) generalized from an on-disk log replayed
//! by a separate reader to an in-memory channel consumed by the engine loop
//! itself — there is no cross-process consumer to serialize for here, and
//! the spec rules out persisted state entirely (§6, "Persisted state: none").
//!
//! An async runtime was considered and rejected: every adapter call in this
//! crate is a blocking subprocess invocation, exactly the shape the teacher
//! handles with `std::process::Command` and no executor. `std::thread` plus
//! `std::sync::mpsc` gets the same background-task-posts-completion-event
//! property without pulling in a runtime the rest of the stack doesn't need.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::ErrorSummary;
use crate::project::{ContainerHandle, ProjectId};

/// Outcome of a build pipeline run against one project.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    /// Image built, hooks discovered, ready for rotation.
    Succeeded { hooks: std::collections::HashSet<String> },
    Failed(ErrorSummary),
}

/// Every event the engine loop can consume.
#[derive(Debug, Clone)]
pub enum Event {
    /// A webhook fired for this clone URL.
    Webhook { clone_url: String },
    /// An admin-triggered refresh of one project, by its configured index.
    AdminRefresh { project_index: usize },
    /// A repo lock was released by a project's build pipeline.
    LockReleased { clone_url: String },
    /// Initial clone, or a later pull, finished (successfully or not).
    PullCompleted {
        clone_url: String,
        was_initial: bool,
        result: Result<String, ErrorSummary>,
    },
    /// An image build (and hook discovery) pipeline finished for a project.
    BuildCompleted {
        project: ProjectId,
        outcome: BuildOutcome,
    },
    /// `create()` returned for a container started as part of this
    /// project's current rotation (spec §4.5 step 1).
    ContainerCreated {
        project: ProjectId,
        result: Result<ContainerHandle, ErrorSummary>,
    },
    /// The `wait_ready` hook (if any) finished for a container already in
    /// `starting` (spec §4.5 steps 2-3). `Ok(())` also covers the
    /// no-hook-configured case.
    ContainerReady {
        project: ProjectId,
        handle: ContainerHandle,
        result: Result<(), ErrorSummary>,
    },
    /// A container finished stopping.
    ContainerStopped {
        project: ProjectId,
        handle: ContainerHandle,
        result: Result<(), ErrorSummary>,
    },
}

/// The producer half, cloned into every background task.
#[derive(Clone)]
pub struct EventSender(mpsc::Sender<Event>);

impl EventSender {
    /// Post an event to the engine loop. The receiver outliving the engine
    /// for the process lifetime means this only fails if the engine has
    /// already shut down, in which case the event is simply dropped.
    pub fn send(&self, event: Event) {
        let _ = self.0.send(event);
    }

    /// Run `task` on a new OS thread, posting whatever event it produces.
    pub fn spawn_task<F>(&self, task: F)
    where
        F: FnOnce() -> Event + Send + 'static,
    {
        let tx = self.0.clone();
        thread::spawn(move || {
            let event = task();
            let _ = tx.send(event);
        });
    }
}

/// The single-consumer queue itself.
pub struct EventIntake {
    sender: EventSender,
    receiver: mpsc::Receiver<Event>,
}

impl EventIntake {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        EventIntake {
            sender: EventSender(tx),
            receiver: rx,
        }
    }

    /// A cloneable handle for posting events; hand this to HTTP handlers
    /// and background tasks.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Block until the next event arrives. Returns `None` once every
    /// sender (including the one held by this struct) has been dropped.
    pub fn recv(&self) -> Option<Event> {
        self.receiver.recv().ok()
    }

    /// Block for up to `timeout` for the next event. Used by tests to drain
    /// the queue until it goes quiet, and by callers that want a bounded
    /// wait instead of blocking forever (e.g. a shutdown poll loop).
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

impl Default for EventIntake {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_delivered_in_send_order() {
        let intake = EventIntake::new();
        let sender = intake.sender();
        sender.send(Event::Webhook { clone_url: "a".into() });
        sender.send(Event::Webhook { clone_url: "b".into() });

        let first = intake.recv().unwrap();
        let second = intake.recv().unwrap();
        match (first, second) {
            (Event::Webhook { clone_url: a }, Event::Webhook { clone_url: b }) => {
                assert_eq!(a, "a");
                assert_eq!(b, "b");
            }
            _ => panic!("unexpected event variants"),
        }
    }

    #[test]
    fn spawned_task_result_is_posted_back() {
        let intake = EventIntake::new();
        let sender = intake.sender();
        sender.spawn_task(|| Event::LockReleased {
            clone_url: "https://example/r".into(),
        });
        let event = intake.recv().unwrap();
        assert!(matches!(event, Event::LockReleased { .. }));
    }

    #[test]
    fn recv_returns_none_once_all_senders_dropped() {
        let (tx, rx) = mpsc::channel::<Event>();
        drop(tx);
        assert!(rx.recv().is_err());
    }
}
