//! Pure rolling-rotation planner (spec §4.4).
//!
//! Mirrors the shape of `sipag-core/src/worker/cycle.rs`'s `plan_cycle`: a
//! pure function over a snapshot of counts, returning what the caller
//! should do next, with all side effects (creating/stopping containers,
//! mutating the project's container sets) left to the engine dispatch
//! loop. Keeping this pure makes the tie-breaking rule in spec §4.4
//! testable without a runtime adapter.

use std::collections::VecDeque;

use crate::project::ContainerHandle;

/// What the rotation driver should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationAction {
    /// Start one new container from the rebuilt image.
    StartContainer,
    /// Stop this specific (old) container.
    StopContainer(ContainerHandle),
    /// Nothing is safe to do until an in-flight start or stop resolves.
    WaitForInFlight,
    /// `old` is empty and nothing is starting: the rotation is done.
    Complete,
}

/// What to do after a start (create or readiness) failure, per the
/// `readiness_retry_budget` tunable (spec §3 `RetryPolicy`, §7 item 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFailureOutcome {
    /// Budget remains: the driver should reissue the start.
    Retry,
    /// Budget exhausted: the whole cycle aborts.
    Exhausted,
}

/// Per-rotation bookkeeping the engine keeps alongside a `Project`.
///
/// Not part of the `Project` entity itself — spec §3 only grants `Project`
/// the three container sets, not a record of which containers predate the
/// current rotation. This is transient engine-loop state, discarded once
/// the rotation completes.
#[derive(Debug, Clone)]
pub struct RotationState {
    /// Containers present in `active` when the rotation began, oldest
    /// first, not yet told to stop.
    remaining_old: VecDeque<ContainerHandle>,
    /// New containers not yet requested from the runtime adapter.
    starts_remaining: u32,
    /// Retries left before a start failure aborts the cycle (spec §3
    /// `RetryPolicy::readiness_retry_budget`).
    retry_budget: u32,
    /// Stops issued but not yet confirmed by a `ContainerStopped` event.
    /// A rotation with old containers still draining out of a project's
    /// `ending` set is not done, even once `remaining_old` and
    /// `starting_len` both read empty — finishing here first would let
    /// the project re-enter `Normal` while `ending` is still non-empty,
    /// violating the disjoint-sets invariant (spec §3).
    pending_stops: u32,
}

impl RotationState {
    /// Snapshot `old` at the moment a project enters `updating`.
    pub fn start(old: impl IntoIterator<Item = ContainerHandle>, retry_budget: u32) -> Self {
        let remaining_old: VecDeque<ContainerHandle> = old.into_iter().collect();
        let starts_remaining = remaining_old.len() as u32;
        RotationState {
            remaining_old,
            starts_remaining,
            retry_budget,
            pending_stops: 0,
        }
    }

    pub fn is_complete(&self, starting_len: usize) -> bool {
        self.remaining_old.is_empty() && starting_len == 0 && self.pending_stops == 0
    }

    /// Decide the next action given the project's current container
    /// counts. Does not mutate `self`; callers apply the corresponding
    /// `record_*` method once the action has been carried out or accepted.
    pub fn next_action(&self, min: u32, max: u32, active_len: usize, starting_len: usize) -> RotationAction {
        if self.is_complete(starting_len) {
            return RotationAction::Complete;
        }

        // When there's no steady-state slack (max == min), the fleet must
        // still briefly overshoot by exactly one container to swap old for
        // new one at a time (spec §4.4 tie-breaking rule).
        let cap = if max > min { max } else { min + 1 };
        let live = active_len + starting_len;

        if self.starts_remaining > 0 && live < cap as usize {
            return RotationAction::StartContainer;
        }

        // Never stop an old container while a start is still in flight:
        // that would risk observing |active ∪ starting| < min if the
        // in-flight start later fails.
        if starting_len == 0 && !self.remaining_old.is_empty() && live > min as usize {
            let handle = self.remaining_old.front().expect("checked non-empty").clone();
            return RotationAction::StopContainer(handle);
        }

        RotationAction::WaitForInFlight
    }

    /// Record that a `StartContainer` action was carried out.
    pub fn record_start_issued(&mut self) {
        self.starts_remaining = self.starts_remaining.saturating_sub(1);
    }

    /// Record that an issued start never made it to `active` (creation or
    /// `wait_ready` failed). Consumes one unit of `retry_budget`; while
    /// budget remains, puts the start back so the driver reissues it
    /// (spec §7 item 6: "the rotation retries once"). Once exhausted, the
    /// caller must abort the cycle rather than call this again.
    pub fn record_start_failed(&mut self) -> StartFailureOutcome {
        if self.retry_budget == 0 {
            return StartFailureOutcome::Exhausted;
        }
        self.retry_budget -= 1;
        self.starts_remaining += 1;
        StartFailureOutcome::Retry
    }

    /// Record that the given old container has been told to stop (and was
    /// the one returned by `next_action`).
    pub fn record_stop_issued(&mut self, handle: &ContainerHandle) {
        if self.remaining_old.front() == Some(handle) {
            self.remaining_old.pop_front();
        } else {
            self.remaining_old.retain(|h| h != handle);
        }
        self.pending_stops += 1;
    }

    /// Record that a previously issued stop was confirmed by a
    /// `ContainerStopped` event (the container actually left `ending`).
    pub fn record_stop_complete(&mut self) {
        self.pending_stops = self.pending_stops.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(byte: u8) -> ContainerHandle {
        ContainerHandle::new(format!("{:02x}", byte).repeat(32)).unwrap()
    }

    #[test]
    fn empty_old_with_no_starting_is_immediately_complete() {
        let state = RotationState::start(Vec::<ContainerHandle>::new(), 1);
        assert_eq!(state.next_action(1, 3, 0, 0), RotationAction::Complete);
    }

    #[test]
    fn max_equals_min_requires_full_start_before_stop() {
        // min = max = 2, two old containers.
        let mut state = RotationState::start([handle(1), handle(2)], 1);

        // active=2 (both old), starting=0: room to start since live(2) < cap(3).
        assert_eq!(state.next_action(2, 2, 2, 0), RotationAction::StartContainer);
        state.record_start_issued();

        // One new container is starting; mustn't stop an old one yet.
        assert_eq!(state.next_action(2, 2, 2, 1), RotationAction::WaitForInFlight);

        // New container promoted to active: active=3, starting=0, live=3=cap.
        let action = state.next_action(2, 2, 3, 0);
        assert_eq!(action, RotationAction::StopContainer(handle(1)));
        state.record_stop_issued(&handle(1));

        // One old stopped: active=2 now (one ending, not counted as active).
        assert_eq!(state.next_action(2, 2, 2, 0), RotationAction::StartContainer);
        state.record_start_issued();
        assert_eq!(state.next_action(2, 2, 2, 1), RotationAction::WaitForInFlight);
        assert_eq!(
            state.next_action(2, 2, 3, 0),
            RotationAction::StopContainer(handle(2))
        );
        state.record_stop_issued(&handle(2));
        // Both stops confirmed (the project's `ending` set drained).
        state.record_stop_complete();
        state.record_stop_complete();

        assert!(state.is_complete(0));
        assert_eq!(state.next_action(2, 2, 2, 0), RotationAction::Complete);
    }

    #[test]
    fn completion_waits_for_in_flight_stop_confirmation() {
        // A rotation isn't done the instant the last stop is issued — the
        // container is still draining out of `ending` until its own
        // `ContainerStopped` event arrives.
        let mut state = RotationState::start([handle(1)], 1);

        assert_eq!(state.next_action(1, 1, 1, 0), RotationAction::StartContainer);
        state.record_start_issued();
        assert_eq!(state.next_action(1, 1, 1, 1), RotationAction::WaitForInFlight);

        let action = state.next_action(1, 1, 2, 0);
        assert_eq!(action, RotationAction::StopContainer(handle(1)));
        state.record_stop_issued(&handle(1));

        // remaining_old and starting are both empty now, but the stop
        // hasn't been confirmed: must not report Complete yet.
        assert!(!state.is_complete(0));
        assert_eq!(state.next_action(1, 1, 1, 0), RotationAction::WaitForInFlight);

        state.record_stop_complete();
        assert!(state.is_complete(0));
        assert_eq!(state.next_action(1, 1, 1, 0), RotationAction::Complete);
    }

    #[test]
    fn slack_allows_overshoot_up_to_max_before_any_stop() {
        // min=2, max=5, three old containers: two starts may run concurrently.
        let mut state = RotationState::start([handle(1), handle(2), handle(3)], 1);

        assert_eq!(state.next_action(2, 5, 3, 0), RotationAction::StartContainer);
        state.record_start_issued();
        assert_eq!(state.next_action(2, 5, 3, 1), RotationAction::StartContainer);
        state.record_start_issued();
        // live = 3 active + 2 starting = 5 = cap: neither start nor stop
        // is safe until a start resolves (stop is blocked while starting_len > 0).
        assert_eq!(state.next_action(2, 5, 3, 2), RotationAction::WaitForInFlight);
    }

    #[test]
    fn stop_never_drops_live_below_min() {
        let state = RotationState::start([handle(1)], 1);
        // active == min already: stopping would bring live below min, so we
        // must start first regardless of cap headroom.
        assert_eq!(state.next_action(1, 1, 1, 0), RotationAction::StartContainer);
    }

    #[test]
    fn record_stop_issued_removes_specific_handle_out_of_order() {
        let mut state = RotationState::start([handle(1), handle(2)], 1);
        state.record_stop_issued(&handle(2));
        assert_eq!(state.remaining_old.len(), 1);
        assert_eq!(state.remaining_old.front(), Some(&handle(1)));
    }

    #[test]
    fn start_failure_retries_once_then_is_exhausted() {
        let mut state = RotationState::start([handle(1)], 1);
        assert_eq!(state.record_start_failed(), StartFailureOutcome::Retry);
        assert_eq!(state.record_start_failed(), StartFailureOutcome::Exhausted);
    }

    #[test]
    fn zero_retry_budget_exhausts_on_first_failure() {
        let mut state = RotationState::start([handle(1)], 0);
        assert_eq!(state.record_start_failed(), StartFailureOutcome::Exhausted);
    }
}
