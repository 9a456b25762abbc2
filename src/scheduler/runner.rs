//! One loop per scheduled task.

use crate::portal::{PortalApi, SelectionOutcome, SelectionRequest};
use crate::scheduler::matching::best_candidate;
use crate::scheduler::task::{GrabTask, MatchedCourse, TaskStatus};
use crate::utils::{fmt_duration, until};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// What a tick decided.
#[derive(Debug, PartialEq, Eq)]
enum Tick {
    /// Nothing submitted or the submission failed; try again next tick.
    Retry,
    /// The task left Attempting.
    Stop,
}

/// Drives a single [`GrabTask`] from Pending to a terminal state.
pub struct TaskRunner {
    task: Arc<GrabTask>,
    api: PortalApi,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl TaskRunner {
    pub fn new(
        task: Arc<GrabTask>,
        api: PortalApi,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task,
            api,
            poll_interval,
            cancel,
        }
    }

    pub async fn run(self) {
        let span = info_span!("grab", task_id = %self.task.id, school = %self.task.school_id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) {
        let wait = until(self.task.activation_time - Utc::now());
        debug!(wait = fmt_duration(wait), "Task pending");

        tokio::select! {
            _ = self.cancel.cancelled() => {
                info!("Task cancelled before activation");
                return;
            }
            _ = time::sleep(wait) => {}
        }

        if !self.task.transition(&[TaskStatus::Pending], TaskStatus::Armed) {
            return;
        }
        info!("Task armed");
        if !self.task.transition(&[TaskStatus::Armed], TaskStatus::Attempting) {
            return;
        }
        info!(poll_interval = fmt_duration(self.poll_interval), "Task attempting");

        let expiry = time::sleep(until(self.task.expiry_time - Utc::now()));
        tokio::pin!(expiry);

        let mut ticker = time::interval(self.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Task cancelled");
                    return;
                }
                _ = &mut expiry => {
                    self.expire();
                    return;
                }
                _ = ticker.tick() => {}
            }

            if self.should_stop() {
                return;
            }
            if self.tick().await == Tick::Stop {
                return;
            }
        }
    }

    /// Cancellation and expiry check, run before each tick and each submission.
    fn should_stop(&self) -> bool {
        if self.cancel.is_cancelled() || self.task.status() != TaskStatus::Attempting {
            return true;
        }
        if Utc::now() >= self.task.expiry_time {
            self.expire();
            return true;
        }
        false
    }

    fn expire(&self) {
        if self.task.transition(&[TaskStatus::Attempting], TaskStatus::Expired) {
            let snapshot = self.task.snapshot();
            info!(attempts = snapshot.attempts, "Task expired");
        }
    }

    async fn tick(&self) -> Tick {
        let report = tokio::select! {
            _ = self.cancel.cancelled() => return Tick::Stop,
            report = self.api.fetch_report(&self.task.session, &self.task.scope) => report,
        };
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Fetch refused");
                return Tick::Retry;
            }
        };
        if report.session_expired() {
            warn!("Portal session appears expired; the credential needs refreshing");
        }

        let Some(candidate) =
            best_candidate(&report.courses, &self.task.keywords, self.task.skip_full)
        else {
            debug!(courses = report.courses.len(), "No course matched");
            return Tick::Retry;
        };

        if self.should_stop() {
            return Tick::Stop;
        }

        let record = candidate.record;
        let attempt = self
            .task
            .record_attempt(MatchedCourse::new(record, candidate.score));
        info!(
            attempt,
            section = %record.section_id,
            course = %record.name,
            score = candidate.score,
            keyword = %self.task.keywords[candidate.keyword_index],
            "Submitting selection"
        );

        let request = SelectionRequest::from(record);
        let start = Instant::now();
        let result = match self.api.select_single(&self.task.session, &request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Selection refused");
                return Tick::Retry;
            }
        };
        let success = result.success;
        let outcome = result.outcome;

        if let Some(rejection) = result.rejection() {
            info!(attempt, error = %rejection, "Selection rejected");
        } else if outcome == SelectionOutcome::SessionExpired {
            warn!(attempt, "Selection hit an expired session");
        } else if !success {
            warn!(attempt, outcome = ?outcome, message = %result.message, "Selection failed");
        }

        if !self.task.record_result(result) {
            debug!(
                status = %self.task.status(),
                "Discarding result of a task that already finished"
            );
            return Tick::Stop;
        }

        if success {
            info!(attempt, duration = fmt_duration(start.elapsed()), "Task succeeded");
            return Tick::Stop;
        }
        Tick::Retry
    }
}
