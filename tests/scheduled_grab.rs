//! Scheduled grabs end to end against a scripted portal, on the real clock.

mod helpers;

use chrono::{TimeDelta, Utc};
use coursegrab::portal::{PortalApi, PortalError, RawResponse};
use coursegrab::scheduler::{
    CreateTaskRequest, GrabScheduler, ScheduleError, TaskId, TaskSnapshot, TaskStatus,
};
use helpers::{
    FakeTransport, Page, Recorded, course_row, index_html, listing, parameters_html, rejected,
    selected, session,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const POLL: Duration = Duration::from_millis(50);

/// Portal with a single compulsory tab listing two courses; `select` answers submissions.
fn portal(
    select: impl Fn(&Recorded) -> Result<RawResponse, PortalError> + Send + Sync + 'static,
) -> FakeTransport {
    FakeTransport::new(move |req| match req.page {
        Page::Index => Ok(RawResponse::new(200, index_html(&[("01", "W01")]))),
        Page::Parameters => Ok(RawResponse::new(200, parameters_html(Some(1)))),
        Page::Listing => Ok(listing(vec![
            course_row("A1", "高等数学A"),
            course_row("B2", "大学英语"),
        ])),
        Page::Select => select(req),
        Page::Other => Ok(RawResponse::new(404, "")),
    })
}

fn scheduler(transport: &Arc<FakeTransport>) -> GrabScheduler {
    GrabScheduler::new(
        PortalApi::with_transport(transport.clone()),
        POLL,
        Duration::from_secs(1),
    )
}

fn grab(keywords: &[&str], activate_in: TimeDelta, expire_in: TimeDelta) -> CreateTaskRequest {
    let now = Utc::now();
    CreateTaskRequest::new(
        "test",
        session(),
        keywords.iter().map(|k| k.to_string()).collect(),
        now + activate_in,
        now + expire_in,
    )
}

async fn finish(scheduler: &GrabScheduler, id: TaskId) -> TaskSnapshot {
    tokio::time::timeout(Duration::from_secs(10), scheduler.wait_for_terminal(id))
        .await
        .expect("task did not finish in time")
        .unwrap()
}

#[tokio::test]
async fn grabs_the_best_match_once_active() {
    let transport = Arc::new(portal(|_| Ok(selected())));
    let scheduler = scheduler(&transport);

    let id = scheduler
        .create_scheduled_task(grab(
            &["高等数学"],
            TimeDelta::milliseconds(150),
            TimeDelta::seconds(30),
        ))
        .unwrap();
    assert_eq!(scheduler.get_scheduled_task_status(id).unwrap().status, TaskStatus::Pending);
    assert!(transport.requests().is_empty(), "no network activity while pending");

    let done = finish(&scheduler, id).await;
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.attempts, 1);
    assert_eq!(done.matched.as_ref().unwrap().section_id, "A1");
    assert!(done.finished_at.is_some());
    assert!(done.last_result.unwrap().success);

    let selects = transport.requests_to(Page::Select);
    assert_eq!(selects.len(), 1);
    assert_eq!(selects[0].field("jxb_id"), Some("A1"));
}

#[tokio::test]
async fn rejections_are_retried_until_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = Arc::new(portal({
        let calls = calls.clone();
        move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(rejected("选课人数已满"))
            } else {
                Ok(selected())
            }
        }
    }));
    let scheduler = scheduler(&transport);

    let id = scheduler
        .create_scheduled_task(grab(
            &["高等数学"],
            TimeDelta::milliseconds(100),
            TimeDelta::seconds(30),
        ))
        .unwrap();

    let done = finish(&scheduler, id).await;
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.attempts, 3);
    assert_eq!(transport.requests_to(Page::Select).len(), 3);
}

#[tokio::test]
async fn unmatched_keywords_expire_without_submitting() {
    let transport = Arc::new(portal(|_| Ok(selected())));
    let scheduler = scheduler(&transport);

    let id = scheduler
        .create_scheduled_task(grab(
            &["线性代数"],
            TimeDelta::milliseconds(100),
            TimeDelta::milliseconds(500),
        ))
        .unwrap();

    let done = finish(&scheduler, id).await;
    assert_eq!(done.status, TaskStatus::Expired);
    assert_eq!(done.attempts, 0);
    assert!(!transport.requests_to(Page::Listing).is_empty());
    assert!(transport.requests_to(Page::Select).is_empty());
}

#[tokio::test]
async fn cancelling_a_pending_task() {
    let transport = Arc::new(portal(|_| Ok(selected())));
    let scheduler = scheduler(&transport);

    let id = scheduler
        .create_scheduled_task(grab(
            &["高等数学"],
            TimeDelta::seconds(60),
            TimeDelta::seconds(120),
        ))
        .unwrap();

    let snapshot = scheduler.cancel_scheduled_task(id).unwrap();
    assert_eq!(snapshot.status, TaskStatus::Cancelled);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(transport.requests().is_empty());
    assert!(matches!(
        scheduler.cancel_scheduled_task(id),
        Err(ScheduleError::AlreadyTerminal { status: TaskStatus::Cancelled, .. })
    ));
    assert!(matches!(
        scheduler.get_scheduled_task_status(TaskId::new()),
        Err(ScheduleError::TaskNotFound(_))
    ));
}

#[tokio::test]
async fn cancellation_discards_an_in_flight_result() {
    let transport = Arc::new(portal(|_| Ok(selected())).with_delay(Duration::from_millis(150)));
    let scheduler = scheduler(&transport);

    let id = scheduler
        .create_scheduled_task(grab(
            &["高等数学"],
            TimeDelta::milliseconds(50),
            TimeDelta::seconds(30),
        ))
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.requests_to(Page::Select).is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("submission never started");

    scheduler.cancel_scheduled_task(id).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let snapshot = scheduler.get_scheduled_task_status(id).unwrap();
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    assert!(snapshot.last_result.is_none());
    assert_eq!(transport.requests_to(Page::Select).len(), 1);
}

#[tokio::test]
async fn never_two_submissions_in_flight() {
    let transport = Arc::new(
        portal(|_| Ok(rejected("已满"))).with_delay(Duration::from_millis(80)),
    );
    let scheduler = GrabScheduler::new(
        PortalApi::with_transport(transport.clone()),
        Duration::from_millis(10),
        Duration::from_secs(1),
    );

    let id = scheduler
        .create_scheduled_task(grab(
            &["高等数学"],
            TimeDelta::milliseconds(50),
            TimeDelta::milliseconds(1500),
        ))
        .unwrap();

    let done = finish(&scheduler, id).await;
    assert_eq!(done.status, TaskStatus::Expired);
    assert!(done.attempts >= 1);
    assert_eq!(transport.max_concurrent_selects(), 1);
}

#[tokio::test]
async fn invalid_requests_create_nothing() {
    let transport = Arc::new(portal(|_| Ok(selected())));
    let scheduler = scheduler(&transport);

    let past = grab(&["高等数学"], TimeDelta::seconds(-5), TimeDelta::hours(1));
    assert!(matches!(
        scheduler.create_scheduled_task(past),
        Err(ScheduleError::ActivationNotInFuture { .. })
    ));

    let too_long = grab(&["高等数学"], TimeDelta::hours(1), TimeDelta::hours(25));
    assert!(matches!(
        scheduler.create_scheduled_task(too_long),
        Err(ScheduleError::WindowTooLong { .. })
    ));

    assert!(scheduler.list_scheduled_tasks().is_empty());
}

#[tokio::test]
async fn shutdown_cancels_live_tasks() {
    let transport = Arc::new(portal(|_| Ok(selected())));
    let scheduler = scheduler(&transport);

    let first = scheduler
        .create_scheduled_task(grab(
            &["高等数学"],
            TimeDelta::seconds(60),
            TimeDelta::seconds(120),
        ))
        .unwrap();
    let second = scheduler
        .create_scheduled_task(grab(
            &["大学英语"],
            TimeDelta::seconds(90),
            TimeDelta::seconds(120),
        ))
        .unwrap();

    scheduler.shutdown().await;

    let listed = scheduler.list_scheduled_tasks();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, first);
    assert_eq!(listed[1].id, second);
    assert!(listed.iter().all(|t| t.status == TaskStatus::Cancelled));
}

#[tokio::test]
async fn pruning_forgets_only_finished_tasks() {
    let transport = Arc::new(portal(|_| Ok(selected())));
    let scheduler = scheduler(&transport);

    let done = scheduler
        .create_scheduled_task(grab(
            &["高等数学"],
            TimeDelta::seconds(60),
            TimeDelta::seconds(120),
        ))
        .unwrap();
    let live = scheduler
        .create_scheduled_task(grab(
            &["大学英语"],
            TimeDelta::seconds(60),
            TimeDelta::seconds(120),
        ))
        .unwrap();
    scheduler.cancel_scheduled_task(done).unwrap();

    assert_eq!(scheduler.prune_finished(TimeDelta::hours(1)), 0);
    assert_eq!(scheduler.prune_finished(TimeDelta::zero()), 1);

    assert!(matches!(
        scheduler.get_scheduled_task_status(done),
        Err(ScheduleError::TaskNotFound(_))
    ));
    let listed = scheduler.list_scheduled_tasks();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, live);
    assert_eq!(listed[0].status, TaskStatus::Pending);

    scheduler.shutdown().await;
}
