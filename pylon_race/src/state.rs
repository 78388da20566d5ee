//! The race state machine.
//!
//! Owns the race life-cycle: READY → SCHEDULED → STAGING → RACING →
//! OVERTIME → STOPPED, with operator-driven stop/pause/resume edges.
//! Wall-clock transitions are scheduled through the background task
//! manager's deadline scheduler; at most one transition timer is
//! pending at any time and it is cancelled by any manual stop or pause.
//!
//! Every status change appends a `(status, timestamp)` entry to the
//! race record before the corresponding event is triggered, so any
//! subscriber observing an event sees a status consistent with it.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

use pylon_common::background::BackgroundTasks;
use pylon_common::clock::MonotonicClock;
use pylon_common::format::RaceSchedule;
use pylon_events::{Event, EventBroker, EventPayload};

use crate::error::RaceError;
use crate::status::RaceStatus;

/// One entry of the race record.
pub type RaceRecordEntry = (RaceStatus, f64);

struct Core {
    status: RaceStatus,
    record: Vec<RaceRecordEntry>,
    schedule: Option<RaceSchedule>,
    pending: Option<AbortHandle>,
}

impl Core {
    /// Flip the status and append to the race record.
    fn set_status(&mut self, status: RaceStatus, timestamp: f64) {
        self.status = status;
        self.record.push((status, timestamp));
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

struct StateInner {
    core: Mutex<Core>,
    clock: MonotonicClock,
    broker: EventBroker,
    tasks: BackgroundTasks,
}

impl StateInner {
    fn trigger(&self, event: Event) {
        self.broker.trigger(event, EventPayload::new(), None);
    }

    /// Enter STAGING and schedule the start.
    fn stage(self: Arc<Self>, start_time: f64) {
        let mut core = self.core.lock();
        if core.status != RaceStatus::Scheduled {
            debug!(status = ?core.status, "stale staging timer ignored");
            return;
        }

        core.set_status(RaceStatus::Staging, self.clock.now());
        self.trigger(Event::RACE_STAGE);
        info!(start_time, "race staging");

        let next = Arc::clone(&self);
        core.pending = Some(self.tasks.spawn_at(start_time, move || next.start()));
    }

    /// Enter RACING and schedule the finish when the clock is bounded.
    fn start(self: Arc<Self>) {
        let mut core = self.core.lock();
        if core.status != RaceStatus::Staging {
            debug!(status = ?core.status, "stale start timer ignored");
            return;
        }

        let Some(schedule) = core.schedule.clone() else {
            error!("race started with no schedule set; forcing stop");
            core.set_status(RaceStatus::Stopped, self.clock.now());
            self.trigger(Event::RACE_STOP);
            return;
        };

        let now = self.clock.now();
        core.set_status(RaceStatus::Racing, now);
        self.trigger(Event::RACE_START);
        info!("race started");

        if schedule.unlimited_time {
            core.pending = None;
        } else {
            let next = Arc::clone(&self);
            core.pending = Some(
                self.tasks
                    .spawn_at(now + schedule.race_time_sec as f64, move || next.finish()),
            );
        }
    }

    /// Leave RACING at the race deadline: into overtime, or straight to
    /// STOPPED when the format has none.
    fn finish(self: Arc<Self>) {
        let mut core = self.core.lock();
        if core.status != RaceStatus::Racing {
            debug!(status = ?core.status, "stale finish timer ignored");
            return;
        }

        let Some(schedule) = core.schedule.clone() else {
            error!("race finished with no schedule set; forcing stop");
            core.set_status(RaceStatus::Stopped, self.clock.now());
            self.trigger(Event::RACE_STOP);
            return;
        };

        let now = self.clock.now();
        match schedule.overtime_sec {
            overtime if overtime > 0 => {
                core.set_status(RaceStatus::Overtime, now);
                self.trigger(Event::RACE_FINISH);
                info!(overtime_sec = overtime, "entering race overtime");

                let next = Arc::clone(&self);
                core.pending =
                    Some(self.tasks.spawn_at(now + overtime as f64, move || {
                        next.stop_from_overtime()
                    }));
            }
            0 => {
                core.set_status(RaceStatus::Stopped, now);
                self.trigger(Event::RACE_FINISH);
                self.trigger(Event::RACE_STOP);
                core.pending = None;
                info!("race stopped");
            }
            _ => {
                // Unlimited overtime: operator-only from here on.
                core.set_status(RaceStatus::Overtime, now);
                self.trigger(Event::RACE_FINISH);
                core.pending = None;
                info!("entering unlimited race overtime");
            }
        }
    }

    /// Enter STOPPED at the end of a bounded overtime window.
    fn stop_from_overtime(self: Arc<Self>) {
        let mut core = self.core.lock();
        if core.status != RaceStatus::Overtime {
            debug!(status = ?core.status, "stale stop timer ignored");
            return;
        }

        core.set_status(RaceStatus::Stopped, self.clock.now());
        self.trigger(Event::RACE_STOP);
        core.pending = None;
        info!("race stopped");
    }
}

/// The race state machine, shared by handle.
#[derive(Clone)]
pub struct RaceStateMachine {
    inner: Arc<StateInner>,
}

impl RaceStateMachine {
    /// Create a state machine in READY.
    pub fn new(clock: MonotonicClock, broker: EventBroker, tasks: BackgroundTasks) -> Self {
        Self {
            inner: Arc::new(StateInner {
                core: Mutex::new(Core {
                    status: RaceStatus::Ready,
                    record: Vec::new(),
                    schedule: None,
                    pending: None,
                }),
                clock,
                broker,
                tasks,
            }),
        }
    }

    /// The current status of the race.
    pub fn status(&self) -> RaceStatus {
        self.inner.core.lock().status
    }

    /// The schedule of the current race, if one is committed.
    pub fn schedule(&self) -> Option<RaceSchedule> {
        self.inner.core.lock().schedule.clone()
    }

    /// The race record: every `(status, timestamp)` change so far.
    pub fn race_record(&self) -> Vec<RaceRecordEntry> {
        self.inner.core.lock().record.clone()
    }

    /// The current race time: total time spent underway, frozen while
    /// paused or stopped, zero before the race.
    pub fn race_time(&self) -> f64 {
        let core = self.inner.core.lock();
        if core.status.is_prerace() {
            return 0.0;
        }
        race_time_over(&core.record, self.inner.clock.now())
    }

    /// Timestamp at which the race entered RACING.
    pub fn get_race_start_time(&self) -> Option<f64> {
        self.find_record(|status| status == RaceStatus::Racing)
    }

    /// Timestamp at which the race clock first expired.
    pub fn get_race_finish_time(&self) -> Option<f64> {
        self.find_record(|status| status.is_finished())
    }

    /// Timestamp at which the race entered STOPPED.
    pub fn get_race_stop_time(&self) -> Option<f64> {
        self.find_record(|status| status == RaceStatus::Stopped)
    }

    fn find_record(&self, matches: impl Fn(RaceStatus) -> bool) -> Option<f64> {
        self.inner
            .core
            .lock()
            .record
            .iter()
            .find(|(status, _)| matches(*status))
            .map(|(_, timestamp)| *timestamp)
    }

    /// Schedule the sequence of events for a race.
    ///
    /// `assigned_start` is a monotonic clock timestamp. The random
    /// stage delay is drawn once here and not re-drawn on retry.
    ///
    /// # Errors
    /// `RaceError::BadTime` when `assigned_start` is in the past,
    /// `RaceError::BadState` when a race is already committed.
    pub fn schedule_race(
        &self,
        schedule: RaceSchedule,
        assigned_start: f64,
    ) -> Result<(), RaceError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        if assigned_start < now {
            return Err(RaceError::BadTime {
                assigned: assigned_start,
                now,
            });
        }

        let mut core = inner.core.lock();
        if core.status != RaceStatus::Ready {
            return Err(RaceError::BadState {
                status: core.status,
            });
        }

        let random_delay_sec = if schedule.random_stage_delay_ms == 0 {
            0.0
        } else {
            rand::thread_rng().gen_range(0.0..=schedule.random_stage_delay_ms as f64) / 1000.0
        };
        let start_time = assigned_start + schedule.stage_time_sec as f64 + random_delay_sec;

        core.schedule = Some(schedule);
        core.set_status(RaceStatus::Scheduled, now);

        let next = Arc::clone(inner);
        core.pending = Some(
            inner
                .tasks
                .spawn_at(assigned_start, move || next.stage(start_time)),
        );

        info!(assigned_start, start_time, "race scheduled");
        Ok(())
    }

    /// Stop the race.
    ///
    /// Before the start this resets to READY with the record cleared;
    /// underway or paused it transitions to STOPPED, emitting
    /// RACE_FINISH first when the racing phase had not yet ended.
    pub fn stop_race(&self) {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        core.cancel_pending();

        match core.status {
            RaceStatus::Scheduled | RaceStatus::Staging => {
                core.status = RaceStatus::Ready;
                core.record.clear();
                core.schedule = None;
                info!("stopped race before start; state machine reset");
            }
            RaceStatus::Racing => {
                core.set_status(RaceStatus::Stopped, inner.clock.now());
                inner.trigger(Event::RACE_FINISH);
                inner.trigger(Event::RACE_STOP);
                info!("race stopped");
            }
            RaceStatus::Overtime => {
                core.set_status(RaceStatus::Stopped, inner.clock.now());
                inner.trigger(Event::RACE_STOP);
                info!("race stopped");
            }
            RaceStatus::Paused => {
                let last_underway = core
                    .record
                    .iter()
                    .rev()
                    .find(|(status, _)| status.is_underway())
                    .map(|(status, _)| *status);

                core.set_status(RaceStatus::Stopped, inner.clock.now());
                match last_underway {
                    Some(RaceStatus::Racing) => {
                        inner.trigger(Event::RACE_FINISH);
                        inner.trigger(Event::RACE_STOP);
                    }
                    Some(_) => inner.trigger(Event::RACE_STOP),
                    None => {
                        error!("paused race has no underway record; stopping anyway");
                        inner.trigger(Event::RACE_STOP);
                    }
                }
                info!("race stopped");
            }
            RaceStatus::Ready | RaceStatus::Stopped => {
                debug!(status = ?core.status, "stop ignored");
            }
        }
    }

    /// Pause the race. A no-op unless the race is underway.
    pub fn pause_race(&self) {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if !core.status.is_underway() {
            debug!(status = ?core.status, "pause ignored");
            return;
        }

        core.set_status(RaceStatus::Paused, inner.clock.now());
        inner.trigger(Event::RACE_PAUSE);
        core.cancel_pending();
        info!("race paused");
    }

    /// Resume a paused race.
    ///
    /// Returns to RACING while accumulated race time is under the race
    /// clock, otherwise to OVERTIME; the matching deadline timer is
    /// re-armed from the remaining duration.
    pub fn resume_race(&self) {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if core.status != RaceStatus::Paused {
            debug!(status = ?core.status, "resume ignored");
            return;
        }

        let Some(schedule) = core.schedule.clone() else {
            error!("cannot resume race with no schedule set");
            return;
        };

        let now = inner.clock.now();

        if schedule.unlimited_time {
            core.set_status(RaceStatus::Racing, now);
            core.pending = None;
        } else {
            let elapsed = race_time_over(&core.record, now);
            let race_time_sec = schedule.race_time_sec as f64;

            if elapsed < race_time_sec {
                core.set_status(RaceStatus::Racing, now);
                let next = Arc::clone(inner);
                core.pending = Some(
                    inner
                        .tasks
                        .spawn_at(now + (race_time_sec - elapsed), move || next.finish()),
                );
            } else if schedule.overtime_sec >= 0 {
                core.set_status(RaceStatus::Overtime, now);
                let remaining = (race_time_sec + schedule.overtime_sec as f64 - elapsed).max(0.0);
                let next = Arc::clone(inner);
                core.pending = Some(
                    inner
                        .tasks
                        .spawn_at(now + remaining, move || next.stop_from_overtime()),
                );
            } else {
                core.set_status(RaceStatus::Overtime, now);
                core.pending = None;
            }
        }

        inner.trigger(Event::RACE_RESUME);
        info!("race resumed");
    }

    /// Reset for the next race. A no-op unless the race is stopped.
    pub fn reset(&self) {
        let mut core = self.inner.core.lock();
        if core.status != RaceStatus::Stopped {
            debug!(status = ?core.status, "reset ignored");
            return;
        }

        debug_assert!(core.pending.is_none());
        core.schedule = None;
        core.record.clear();
        core.status = RaceStatus::Ready;
        info!("race state machine reset");
    }
}

/// Race time accumulated over a race record as of `now`: the sum of all
/// underway intervals, plus the live tail when the record does not end
/// in PAUSED or STOPPED.
fn race_time_over(record: &[RaceRecordEntry], now: f64) -> f64 {
    let mut duration = 0.0;
    let mut period_start = 0.0;
    let mut last: Option<RaceStatus> = None;
    let mut last_timestamp = 0.0;

    for &(status, timestamp) in record {
        match status {
            RaceStatus::Racing => period_start = timestamp,
            RaceStatus::Overtime => {
                if last != Some(RaceStatus::Racing) {
                    period_start = timestamp;
                }
            }
            RaceStatus::Paused => duration += timestamp - period_start,
            RaceStatus::Stopped => {
                if last.is_some_and(|s| s.is_underway()) {
                    duration += timestamp - period_start;
                }
                return duration;
            }
            _ => {}
        }
        last = Some(status);
        last_timestamp = timestamp;
    }

    if last == Some(RaceStatus::Paused) {
        return duration;
    }

    duration + (now - last_timestamp)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use RaceStatus::*;

    fn harness() -> (RaceStateMachine, MonotonicClock, BackgroundTasks, EventBroker) {
        let clock = MonotonicClock::new();
        let tasks = BackgroundTasks::new(clock);
        let broker = EventBroker::new(tasks.clone());
        let sm = RaceStateMachine::new(clock, broker.clone(), tasks.clone());
        (sm, clock, tasks, broker)
    }

    fn schedule(race_time_sec: u32, overtime_sec: i32) -> RaceSchedule {
        RaceSchedule {
            stage_time_sec: 0,
            random_stage_delay_ms: 0,
            unlimited_time: false,
            race_time_sec,
            overtime_sec,
            processor_id: "most_laps".to_string(),
        }
    }

    #[tokio::test]
    async fn schedule_in_the_past_is_bad_time() {
        let (sm, clock, _tasks, _broker) = harness();
        let result = sm.schedule_race(schedule(5, 0), clock.now() - 0.1);
        assert!(matches!(result, Err(RaceError::BadTime { .. })));
        assert_eq!(sm.status(), Ready);
    }

    #[tokio::test]
    async fn double_schedule_is_bad_state() {
        let (sm, clock, _tasks, _broker) = harness();
        sm.schedule_race(schedule(5, 0), clock.now() + 10.0).unwrap();
        let result = sm.schedule_race(schedule(5, 0), clock.now() + 10.0);
        assert!(matches!(result, Err(RaceError::BadState { status: Scheduled })));
    }

    #[tokio::test]
    async fn stop_before_start_resets_to_ready() {
        let (sm, clock, _tasks, _broker) = harness();
        sm.schedule_race(schedule(5, 0), clock.now() + 10.0).unwrap();
        assert_eq!(sm.status(), Scheduled);

        sm.stop_race();
        assert_eq!(sm.status(), Ready);
        assert!(sm.race_record().is_empty());
        assert!(sm.schedule().is_none());
        assert_eq!(sm.race_time(), 0.0);
    }

    #[tokio::test]
    async fn race_runs_to_stopped_without_overtime() {
        let (sm, clock, tasks, broker) = harness();
        let mut sub = broker.subscribe();

        sm.schedule_race(schedule(1, 0), clock.now() + 0.05).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(sm.status(), Racing);

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(sm.status(), Stopped);

        // STAGE, START, FINISH, STOP, all at highest priority in order.
        let mut seen = Vec::new();
        while let Some(event) = sub.try_next() {
            seen.push(event.event);
        }
        assert_eq!(
            seen,
            vec![
                Event::RACE_STAGE,
                Event::RACE_START,
                Event::RACE_FINISH,
                Event::RACE_STOP
            ]
        );

        tasks.shutdown(std::time::Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn record_timestamps_are_non_decreasing() {
        let (sm, clock, tasks, _broker) = harness();
        sm.schedule_race(schedule(1, 1), clock.now() + 0.05).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2300)).await;
        assert_eq!(sm.status(), Stopped);

        let record = sm.race_record();
        assert_eq!(
            record.iter().map(|(s, _)| *s).collect::<Vec<_>>(),
            vec![Scheduled, Staging, Racing, Overtime, Stopped]
        );
        for pair in record.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }

        tasks.shutdown(std::time::Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn reset_restores_post_construction_state() {
        let (sm, clock, tasks, _broker) = harness();
        sm.schedule_race(schedule(1, 0), clock.now() + 0.05).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1300)).await;
        assert_eq!(sm.status(), Stopped);

        sm.reset();
        assert_eq!(sm.status(), Ready);
        assert!(sm.race_record().is_empty());
        assert!(sm.schedule().is_none());

        // A new race can be committed immediately.
        sm.schedule_race(schedule(1, 0), clock.now() + 10.0).unwrap();
        tasks.shutdown(std::time::Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn reset_outside_stopped_is_ignored() {
        let (sm, clock, _tasks, _broker) = harness();
        sm.schedule_race(schedule(1, 0), clock.now() + 10.0).unwrap();
        sm.reset();
        assert_eq!(sm.status(), Scheduled);
    }

    #[tokio::test]
    async fn pause_outside_underway_is_ignored() {
        let (sm, _clock, _tasks, _broker) = harness();
        sm.pause_race();
        assert_eq!(sm.status(), Ready);
    }

    #[tokio::test]
    async fn unlimited_race_has_no_auto_finish() {
        let (sm, clock, tasks, _broker) = harness();
        let mut unlimited = schedule(1, 0);
        unlimited.unlimited_time = true;

        sm.schedule_race(unlimited, clock.now() + 0.05).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert_eq!(sm.status(), Racing);

        sm.stop_race();
        assert_eq!(sm.status(), Stopped);
        tasks.shutdown(std::time::Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn race_time_frozen_while_stopped() {
        let (sm, clock, tasks, _broker) = harness();
        sm.schedule_race(schedule(1, 0), clock.now() + 0.05).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1300)).await;
        assert_eq!(sm.status(), Stopped);

        let frozen = sm.race_time();
        assert!((frozen - 1.0).abs() < 0.1, "race time was {frozen}");
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(sm.race_time(), frozen);

        tasks.shutdown(std::time::Duration::from_secs(1)).await.unwrap();
    }

    #[test]
    fn race_time_arithmetic_over_record() {
        // Single racing period, live tail.
        let record = vec![(Scheduled, 0.0), (Staging, 1.0), (Racing, 4.0)];
        assert!((race_time_over(&record, 6.5) - 2.5).abs() < 1e-9);

        // Paused race holds its accumulated time.
        let record = vec![(Racing, 4.0), (Paused, 6.0)];
        assert!((race_time_over(&record, 100.0) - 2.0).abs() < 1e-9);

        // Resume and stop.
        let record = vec![(Racing, 4.0), (Paused, 6.0), (Racing, 10.0), (Stopped, 13.0)];
        assert!((race_time_over(&record, 100.0) - 5.0).abs() < 1e-9);

        // Overtime directly after racing continues the same period.
        let record = vec![(Racing, 4.0), (Overtime, 9.0), (Stopped, 11.0)];
        assert!((race_time_over(&record, 100.0) - 7.0).abs() < 1e-9);

        // Overtime resumed after a pause opens a fresh period.
        let record = vec![
            (Racing, 4.0),
            (Paused, 9.0),
            (Overtime, 20.0),
            (Stopped, 21.0),
        ];
        assert!((race_time_over(&record, 100.0) - 6.0).abs() < 1e-9);

        // Stop from paused adds nothing.
        let record = vec![(Racing, 4.0), (Paused, 6.0), (Stopped, 30.0)];
        assert!((race_time_over(&record, 100.0) - 2.0).abs() < 1e-9);
    }
}
