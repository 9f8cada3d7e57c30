use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use sqjobs::prelude::*;
use sqjobs::{Disposition, ErrorReport, ErrorReporter, RetryCall};

/// Shared log of hook calls, handed to jobs through their factory
type Calls = Arc<Mutex<Vec<String>>>;

struct Seven {
    calls: Calls,
}

#[async_trait]
impl Job for Seven {
    const NAME: Option<&'static str> = Some("seven");

    async fn run(&mut self, _ctx: &JobContext, _args: &JobArgs) -> HookResult<Outcome> {
        Outcome::success(7)
    }

    async fn post_run(&mut self, ctx: &mut JobContext, _args: &JobArgs) -> HookResult<()> {
        self.calls.lock().push(format!("post_run:{}", ctx.result.clone().unwrap_or_default()));
        Ok(())
    }

    async fn on_success(&mut self, _ctx: &JobContext, _args: &JobArgs) -> HookResult<()> {
        self.calls.lock().push("on_success".to_string());
        Ok(())
    }

    async fn on_failure(&mut self, _ctx: &JobContext, _error: &JobError) -> HookResult<()> {
        self.calls.lock().push("on_failure".to_string());
        Ok(())
    }
}

struct Divider {
    calls: Calls,
}

#[async_trait]
impl Job for Divider {
    const NAME: Option<&'static str> = Some("divider");
    const RETRY_TIME: Option<Duration> = Some(Duration::from_secs(10));

    async fn run(&mut self, ctx: &JobContext, args: &JobArgs) -> HookResult<Outcome> {
        self.calls.lock().push(format!("run:{}", ctx.retries));
        let num: i64 = args.get(0, "num")?;
        let by: i64 = args.get(1, "by")?;
        if by == 0 {
            return Err(JobError::failed("division by zero"));
        }
        Outcome::success(num / by)
    }

    async fn on_failure(&mut self, _ctx: &JobContext, error: &JobError) -> HookResult<()> {
        self.calls.lock().push(format!("on_failure:{error}"));
        Ok(())
    }
}

/// Fails without a retry time of its own
#[derive(Default)]
struct Broken;

#[async_trait]
impl Job for Broken {
    const NAME: Option<&'static str> = Some("broken");

    async fn run(&mut self, _ctx: &JobContext, _args: &JobArgs) -> HookResult<Outcome> {
        Err(anyhow::anyhow!("upstream unavailable").into())
    }
}

struct Impatient {
    calls: Calls,
}

#[async_trait]
impl Job for Impatient {
    const NAME: Option<&'static str> = Some("impatient");
    const RETRY_TIME: Option<Duration> = Some(Duration::from_secs(3));

    async fn run(&mut self, _ctx: &JobContext, _args: &JobArgs) -> HookResult<Outcome> {
        Ok(Outcome::retry())
    }

    async fn on_retry(&mut self, _ctx: &JobContext) -> HookResult<()> {
        self.calls.lock().push("on_retry".to_string());
        Ok(())
    }
}

#[derive(Default)]
struct CollectingReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, report: &ErrorReport) {
        self.reports.lock().push(report.clone());
    }
}

struct Harness {
    connector: Arc<MemoryConnector>,
    broker: Arc<StandardBroker<MemoryConnector>>,
    worker: Worker<StandardBroker<MemoryConnector>>,
    calls: Calls,
    reporter: Arc<CollectingReporter>,
}

fn harness() -> Harness {
    let connector = Arc::new(MemoryConnector::new().with_queues(["sqjobs"]));
    let broker = Arc::new(StandardBroker::new(connector.clone()));
    let calls: Calls = Arc::default();
    let reporter = Arc::new(CollectingReporter::default());

    let mut worker = Worker::new(broker.clone(), ["sqjobs"])
        .with_config(QueueConfig::default().with_wait_time(Duration::ZERO))
        .with_reporter(reporter.clone());

    let shared = calls.clone();
    worker.register_factory(move || Seven { calls: shared.clone() });
    let shared = calls.clone();
    worker.register_factory(move || Divider { calls: shared.clone() });
    let shared = calls.clone();
    worker.register_factory(move || Impatient { calls: shared.clone() });
    worker.register_job::<Broken>();

    Harness {
        connector,
        broker,
        worker,
        calls,
        reporter,
    }
}

async fn next_delivery(h: &Harness) -> sqjobs::Delivery {
    use futures::StreamExt;

    let mut jobs = h.broker.jobs(&["sqjobs".to_string()], Duration::ZERO);
    jobs.next().await.unwrap().unwrap().expect("a pending payload")
}

#[tokio::test]
async fn test_successful_job_is_deleted() {
    let h = harness();
    h.broker.add_job::<Seven>(JobArgs::new()).await.unwrap();

    let disposition = h.worker.process(next_delivery(&h).await).await;

    assert_eq!(disposition, Disposition::Completed);
    assert_eq!(*h.calls.lock(), vec!["post_run:7", "on_success"]);
    assert_eq!(h.connector.deleted().len(), 1);
    assert!(h.connector.retry_calls().is_empty());
    assert!(h.reporter.reports.lock().is_empty());
    assert_eq!(h.connector.pending("sqjobs"), 0);
}

#[tokio::test]
async fn test_failed_job_is_reported_and_retried() {
    let h = harness();
    let added = h
        .broker
        .add_job::<Divider>(JobArgs::new().arg(1).kwarg("by", 0))
        .await
        .unwrap();

    let delivery = next_delivery(&h).await;
    let receipt = delivery.payload.broker_id().cloned().unwrap();
    let disposition = h.worker.process(delivery).await;

    assert_eq!(disposition, Disposition::Failed(Some(Duration::from_secs(10))));
    assert_eq!(*h.calls.lock(), vec!["run:0", "on_failure:division by zero"]);
    assert!(h.connector.deleted().is_empty());
    assert_eq!(
        h.connector.retry_calls(),
        vec![RetryCall {
            queue: "sqjobs".to_string(),
            message_id: receipt,
            delay: Duration::from_secs(10),
        }]
    );

    let reports = h.reporter.reports.lock();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].job_id, Some(added.job_id));
    assert_eq!(reports[0].job_name, "divider");
    assert_eq!(reports[0].args, vec![json!(1)]);
    assert_eq!(reports[0].kwargs.get("by"), Some(&json!(0)));
    assert_eq!(reports[0].message, "division by zero");
}

#[tokio::test]
async fn test_failure_without_retry_time_keeps_visibility_timeout() {
    let h = harness();
    h.broker.add_job::<Broken>(JobArgs::new()).await.unwrap();

    let disposition = h.worker.process(next_delivery(&h).await).await;

    assert_eq!(disposition, Disposition::Failed(None));
    assert!(h.connector.retry_calls().is_empty());
    assert!(h.connector.deleted().is_empty());
    assert_eq!(h.connector.pending("sqjobs"), 1);

    let reports = h.reporter.reports.lock();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].trace.contains("upstream unavailable"));
}

#[tokio::test]
async fn test_retry_request_calls_on_retry() {
    let h = harness();
    h.broker.add_job::<Impatient>(JobArgs::new()).await.unwrap();

    let disposition = h.worker.process(next_delivery(&h).await).await;

    assert_eq!(disposition, Disposition::Retried(Some(Duration::from_secs(3))));
    assert_eq!(*h.calls.lock(), vec!["on_retry"]);
    assert_eq!(h.connector.retry_calls().len(), 1);
    assert!(h.reporter.reports.lock().is_empty());
    assert_eq!(h.worker.stats().snapshot().retried, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_job_is_redelivered_after_retry_time() {
    let h = harness();
    h.broker
        .add_job::<Divider>(JobArgs::new().arg(1).arg(0))
        .await
        .unwrap();

    h.worker.execute(false).await;
    // hidden until the retry time elapses
    h.worker.execute(false).await;
    assert_eq!(*h.calls.lock(), vec!["run:0", "on_failure:division by zero"]);

    tokio::time::advance(Duration::from_secs(10)).await;
    h.worker.execute(false).await;

    let calls = h.calls.lock();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[2], "run:1");
    assert_eq!(h.worker.stats().snapshot().failed, 2);
}

#[tokio::test]
async fn test_unknown_task_stays_queued() {
    let h = harness();
    h.connector
        .enqueue(
            "sqjobs",
            sqjobs::Payload::new("nobody.knows", JobId::new(), JobArgs::new()),
        )
        .await
        .unwrap();

    let disposition = h.worker.process(next_delivery(&h).await).await;

    assert_eq!(disposition, Disposition::Unregistered);
    assert!(h.connector.deleted().is_empty());
    assert!(h.connector.retry_calls().is_empty());
    assert!(h.calls.lock().is_empty());
}
