//! Scheduled task model, creation checks, and state transitions.

use crate::portal::{CategoryScope, CourseRecord, PortalSession, SelectionResult};
use crate::scheduler::ScheduleError;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::watch;
use ulid::Ulid;

/// Longest allowed span between creation and expiry.
pub const MAX_TASK_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(Ulid);

impl TaskId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for the activation time; no network activity.
    Pending,
    Armed,
    /// Polling the listing and submitting on each tick.
    Attempting,
    Succeeded,
    Expired,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Expired | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Armed => "armed",
            Self::Attempting => "attempting",
            Self::Succeeded => "succeeded",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Collaborator request for a scheduled grab.
#[derive(Debug, Clone)]
pub struct CreateTaskRequest {
    pub school_id: String,
    pub session: PortalSession,
    /// Keywords in priority order.
    pub keywords: Vec<String>,
    pub activation_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub scope: CategoryScope,
    /// Ignore sections whose enrollment has reached capacity.
    pub skip_full: bool,
}

impl CreateTaskRequest {
    pub fn new(
        school_id: impl Into<String>,
        session: PortalSession,
        keywords: Vec<String>,
        activation_time: DateTime<Utc>,
        expiry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            school_id: school_id.into(),
            session,
            keywords,
            activation_time,
            expiry_time,
            scope: CategoryScope::All,
            skip_full: true,
        }
    }

    /// Check the request against `now` and return the cleaned keyword list.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<Vec<String>, ScheduleError> {
        if self.session.ensure_credential().is_err() {
            return Err(ScheduleError::CredentialMissing);
        }

        let keywords: Vec<String> = self
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();
        if keywords.is_empty() {
            return Err(ScheduleError::NoKeywords);
        }

        if self.activation_time <= now {
            return Err(ScheduleError::ActivationNotInFuture {
                activation: self.activation_time,
            });
        }
        if self.expiry_time <= self.activation_time {
            return Err(ScheduleError::ExpiryNotAfterActivation {
                activation: self.activation_time,
                expiry: self.expiry_time,
            });
        }
        let window = self.expiry_time - now;
        if window > TimeDelta::hours(MAX_TASK_WINDOW_HOURS) {
            return Err(ScheduleError::WindowTooLong {
                hours: window.num_minutes() as f64 / 60.0,
            });
        }
        Ok(keywords)
    }
}

/// The record a task chose on its latest attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedCourse {
    pub section_id: String,
    pub course_id: String,
    pub name: String,
    pub score: f32,
}

impl MatchedCourse {
    pub fn new(record: &CourseRecord, score: f32) -> Self {
        Self {
            section_id: record.section_id.clone(),
            course_id: record.course_id.clone(),
            name: record.name.clone(),
            score,
        }
    }
}

/// Mutable part of a task, owned by its watch channel.
#[derive(Debug, Clone)]
pub struct TaskState {
    pub status: TaskStatus,
    pub attempts: u32,
    pub last_result: Option<SelectionResult>,
    pub matched: Option<MatchedCourse>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub school_id: String,
    pub keywords: Vec<String>,
    pub activation_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub status: TaskStatus,
    pub attempts: u32,
    pub last_result: Option<SelectionResult>,
    pub matched: Option<MatchedCourse>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A validated task. State changes go through [`GrabTask::transition`] and
/// friends so that terminal states stay terminal.
#[derive(Debug)]
pub struct GrabTask {
    pub id: TaskId,
    pub school_id: String,
    pub session: PortalSession,
    pub keywords: Vec<String>,
    pub activation_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub scope: CategoryScope,
    pub skip_full: bool,
    pub created_at: DateTime<Utc>,
    state: watch::Sender<TaskState>,
}

impl GrabTask {
    /// Validate `request` and build a Pending task.
    pub fn create(request: CreateTaskRequest, now: DateTime<Utc>) -> Result<Self, ScheduleError> {
        let keywords = request.validate(now)?;
        let (state, _) = watch::channel(TaskState {
            status: TaskStatus::Pending,
            attempts: 0,
            last_result: None,
            matched: None,
            finished_at: None,
        });
        Ok(Self {
            id: TaskId::new(),
            school_id: request.school_id,
            session: request.session,
            keywords,
            activation_time: request.activation_time,
            expiry_time: request.expiry_time,
            scope: request.scope,
            skip_full: request.skip_full,
            created_at: now,
            state,
        })
    }

    pub fn status(&self) -> TaskStatus {
        self.state.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// Move to `to` if the current status is one of `from`. Returns whether
    /// the move happened; the check and the write are atomic.
    pub fn transition(&self, from: &[TaskStatus], to: TaskStatus) -> bool {
        self.state.send_if_modified(|state| {
            if state.status.is_terminal() || !from.contains(&state.status) {
                return false;
            }
            state.status = to;
            if to.is_terminal() {
                state.finished_at = Some(Utc::now());
            }
            true
        })
    }

    /// Cancel from any live state. Returns the terminal status on failure.
    pub fn cancel(&self) -> Result<(), TaskStatus> {
        let moved = self.transition(
            &[TaskStatus::Pending, TaskStatus::Armed, TaskStatus::Attempting],
            TaskStatus::Cancelled,
        );
        if moved { Ok(()) } else { Err(self.status()) }
    }

    /// Count a submission against the chosen record.
    pub fn record_attempt(&self, matched: MatchedCourse) -> u32 {
        let mut attempts = 0;
        self.state.send_modify(|state| {
            state.attempts += 1;
            state.matched = Some(matched);
            attempts = state.attempts;
        });
        attempts
    }

    /// Store a submission result. A success also moves Attempting to
    /// Succeeded. Returns false when the task already left Attempting, in
    /// which case the result is discarded.
    pub fn record_result(&self, result: SelectionResult) -> bool {
        self.state.send_if_modified(|state| {
            if state.status != TaskStatus::Attempting {
                return false;
            }
            if result.success {
                state.status = TaskStatus::Succeeded;
                state.finished_at = Some(Utc::now());
            }
            state.last_result = Some(result);
            true
        })
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state.borrow();
        TaskSnapshot {
            id: self.id,
            school_id: self.school_id.clone(),
            keywords: self.keywords.clone(),
            activation_time: self.activation_time,
            expiry_time: self.expiry_time,
            status: state.status,
            attempts: state.attempts,
            last_result: state.last_result.clone(),
            matched: state.matched.clone(),
            created_at: self.created_at,
            finished_at: state.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::{EndpointConfig, Protocol, SelectionOutcome};

    fn session(credential: &str) -> PortalSession {
        PortalSession::new(credential, EndpointConfig::new("jwxt.example.edu.cn", Protocol::Https))
    }

    fn request(
        now: DateTime<Utc>,
        activate_in: TimeDelta,
        expire_in: TimeDelta,
    ) -> CreateTaskRequest {
        CreateTaskRequest::new(
            "demo",
            session("JSESSIONID=abc"),
            vec!["高等数学".to_string()],
            now + activate_in,
            now + expire_in,
        )
    }

    #[test]
    fn valid_request_creates_pending_task() {
        let now = Utc::now();
        let task = GrabTask::create(
            request(now, TimeDelta::minutes(5), TimeDelta::hours(2)),
            now,
        )
        .unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.snapshot().attempts, 0);
    }

    #[test]
    fn creation_rejections() {
        let now = Utc::now();

        let past = request(now, TimeDelta::minutes(-1), TimeDelta::hours(1));
        assert!(matches!(past.validate(now), Err(ScheduleError::ActivationNotInFuture { .. })));

        let at_now = request(now, TimeDelta::zero(), TimeDelta::hours(1));
        assert!(matches!(at_now.validate(now), Err(ScheduleError::ActivationNotInFuture { .. })));

        let backwards = request(now, TimeDelta::hours(2), TimeDelta::hours(1));
        assert!(matches!(
            backwards.validate(now),
            Err(ScheduleError::ExpiryNotAfterActivation { .. })
        ));

        let too_long = request(now, TimeDelta::hours(1), TimeDelta::hours(25));
        assert!(matches!(too_long.validate(now), Err(ScheduleError::WindowTooLong { .. })));

        let edge = request(now, TimeDelta::hours(1), TimeDelta::hours(24));
        assert!(edge.validate(now).is_ok());

        let mut blank = request(now, TimeDelta::hours(1), TimeDelta::hours(2));
        blank.keywords = vec!["  ".to_string()];
        assert!(matches!(blank.validate(now), Err(ScheduleError::NoKeywords)));

        let mut anonymous = request(now, TimeDelta::hours(1), TimeDelta::hours(2));
        anonymous.session = session("");
        assert!(matches!(anonymous.validate(now), Err(ScheduleError::CredentialMissing)));
    }

    #[test]
    fn keywords_are_trimmed_in_order() {
        let now = Utc::now();
        let mut req = request(now, TimeDelta::hours(1), TimeDelta::hours(2));
        req.keywords = vec![" 线性代数 ".into(), "".into(), "高等数学".into()];
        assert_eq!(req.validate(now).unwrap(), vec!["线性代数", "高等数学"]);
    }

    #[test]
    fn terminal_states_are_final() {
        let now = Utc::now();
        let task =
            GrabTask::create(request(now, TimeDelta::hours(1), TimeDelta::hours(2)), now).unwrap();

        assert!(task.transition(&[TaskStatus::Pending], TaskStatus::Armed));
        assert!(task.cancel().is_ok());
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert!(task.snapshot().finished_at.is_some());

        assert!(!task.transition(&[TaskStatus::Cancelled], TaskStatus::Attempting));
        assert_eq!(task.cancel(), Err(TaskStatus::Cancelled));
    }

    #[test]
    fn late_results_are_discarded() {
        let now = Utc::now();
        let task =
            GrabTask::create(request(now, TimeDelta::hours(1), TimeDelta::hours(2)), now).unwrap();
        task.transition(&[TaskStatus::Pending], TaskStatus::Attempting);
        task.cancel().unwrap();

        let ok = SelectionResult {
            success: true,
            flag: Some("1".into()),
            message: String::new(),
            outcome: SelectionOutcome::Selected,
        };
        assert!(!task.record_result(ok));
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert!(task.snapshot().last_result.is_none());
    }

    #[test]
    fn success_moves_to_succeeded() {
        let now = Utc::now();
        let task =
            GrabTask::create(request(now, TimeDelta::hours(1), TimeDelta::hours(2)), now).unwrap();
        task.transition(&[TaskStatus::Pending], TaskStatus::Attempting);

        let rejected = SelectionResult::failure(SelectionOutcome::Rejected, "已满");
        assert!(task.record_result(rejected));
        assert_eq!(task.status(), TaskStatus::Attempting);

        let ok = SelectionResult {
            success: true,
            flag: Some("1".into()),
            message: String::new(),
            outcome: SelectionOutcome::Selected,
        };
        assert!(task.record_result(ok));
        assert_eq!(task.status(), TaskStatus::Succeeded);
    }
}
