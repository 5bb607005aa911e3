//! End-to-end job lifecycle: submit → queue → worker → terminal state,
//! with lifecycle events observed through the notification hub.

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use common::{
    FlakyLeadSearch, RejectingLeadSearch, adapters_with_lead_search, fast_broker_config,
    happy_adapters, start_harness, wait_for_status,
};
use leadflow::jobs::model::{JobStatus, TaskType};
use leadflow::notify::JobEvent;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn lead_params() -> serde_json::Value {
    json!({"locations": ["Austin"], "businesses": ["software"], "jobTitles": ["CEO"]})
}

#[tokio::test]
async fn job_completes_with_ordered_events() {
    timeout(TEST_TIMEOUT, async {
        let harness = start_harness(fast_broker_config(3), happy_adapters()).await;
        let mut events = harness.hub.subscribe("alice").await;

        let job = harness
            .submission
            .submit("alice", TaskType::LeadGeneration, lead_params(), None)
            .await
            .unwrap();

        let done = wait_for_status(&harness.store, job.id, JobStatus::Completed, TEST_TIMEOUT)
            .await;
        assert_eq!(done.progress, 100);
        let output = done.output.unwrap();
        assert_eq!(output["lead_count"], 2);
        assert!(harness.store.count_artifacts(job.id).await.unwrap() >= 1);

        // Events arrive in lifecycle order with non-decreasing progress.
        let mut started = false;
        let mut last_percent = 0u8;
        loop {
            match events.recv().await.unwrap() {
                JobEvent::JobStarted { job_id, task_type } => {
                    assert_eq!(job_id, job.id);
                    assert_eq!(task_type, TaskType::LeadGeneration);
                    started = true;
                }
                JobEvent::JobProgress { percent, .. } => {
                    assert!(started, "progress before start");
                    assert!(percent >= last_percent, "progress went backwards");
                    last_percent = percent;
                }
                JobEvent::JobCompleted { job_id, summary } => {
                    assert_eq!(job_id, job.id);
                    assert!(summary.contains("leads"));
                    break;
                }
                JobEvent::JobFailed { error, .. } => panic!("unexpected failure: {error}"),
            }
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    timeout(TEST_TIMEOUT, async {
        let flaky = FlakyLeadSearch::new(2, json!({"results": [{"name": "Ada", "title": "CEO"}]}));
        let harness = start_harness(
            fast_broker_config(3),
            adapters_with_lead_search(flaky.clone()),
        )
        .await;

        let job = harness
            .submission
            .submit("alice", TaskType::LeadGeneration, lead_params(), None)
            .await
            .unwrap();

        let done = wait_for_status(&harness.store, job.id, JobStatus::Completed, TEST_TIMEOUT)
            .await;
        assert_eq!(done.attempts, 3);
        assert_eq!(flaky.calls(), 3);
        // The final state never exposes the intermediate errors.
        assert!(done.output.is_some());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn exhausted_retries_fail_the_job() {
    timeout(TEST_TIMEOUT, async {
        let flaky = FlakyLeadSearch::new(usize::MAX, json!({}));
        let harness = start_harness(
            fast_broker_config(2),
            adapters_with_lead_search(flaky.clone()),
        )
        .await;
        let mut events = harness.hub.subscribe("alice").await;

        let job = harness
            .submission
            .submit("alice", TaskType::LeadGeneration, lead_params(), None)
            .await
            .unwrap();

        let failed =
            wait_for_status(&harness.store, job.id, JobStatus::Failed, TEST_TIMEOUT).await;
        assert_eq!(failed.attempts, 2);
        assert_eq!(flaky.calls(), 2);
        assert!(failed.error.unwrap().contains("briefly down"));

        // The terminal event is a failure.
        loop {
            if let JobEvent::JobFailed { job_id, error, .. } = events.recv().await.unwrap() {
                assert_eq!(job_id, job.id);
                assert!(error.contains("briefly down"));
                break;
            }
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rejected_call_fails_without_retry() {
    timeout(TEST_TIMEOUT, async {
        let harness = start_harness(
            fast_broker_config(3),
            adapters_with_lead_search(std::sync::Arc::new(RejectingLeadSearch)),
        )
        .await;

        let job = harness
            .submission
            .submit("alice", TaskType::LeadGeneration, lead_params(), None)
            .await
            .unwrap();

        let failed =
            wait_for_status(&harness.store, job.id, JobStatus::Failed, TEST_TIMEOUT).await;
        // One attempt only; rejection is terminal.
        assert_eq!(failed.attempts, 1);
        assert!(failed.error.unwrap().contains("not permitted"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn profile_research_produces_a_dossier() {
    timeout(TEST_TIMEOUT, async {
        let harness = start_harness(fast_broker_config(3), happy_adapters()).await;

        let job = harness
            .submission
            .submit(
                "alice",
                TaskType::ProfileResearch,
                json!({"profile": {"name": "Ada Lovelace"}}),
                None,
            )
            .await
            .unwrap();

        let done = wait_for_status(&harness.store, job.id, JobStatus::Completed, TEST_TIMEOUT)
            .await;
        assert_eq!(done.output.unwrap()["subject"], "Ada Lovelace");

        let dossier = harness
            .store
            .get_artifact(job.id, "dossier")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dossier["profile"]["name"], "Ada Lovelace");
        assert_eq!(dossier["organization"]["industry"], "software");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn completed_output_is_immutable() {
    timeout(TEST_TIMEOUT, async {
        let harness = start_harness(fast_broker_config(3), happy_adapters()).await;

        let job = harness
            .submission
            .submit("alice", TaskType::LeadGeneration, lead_params(), None)
            .await
            .unwrap();
        let done = wait_for_status(&harness.store, job.id, JobStatus::Completed, TEST_TIMEOUT)
            .await;

        // Late writes against the terminal row are rejected.
        assert!(
            !harness
                .store
                .complete_job(job.id, &json!({"other": true}))
                .await
                .unwrap()
        );
        assert!(!harness.store.fail_job(job.id, "late failure").await.unwrap());
        assert!(!harness.store.advance_job_progress(job.id, 100).await.unwrap());

        let after = harness.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(after.output, done.output);
        assert_eq!(after.status, JobStatus::Completed);
    })
    .await
    .expect("test timed out");
}
