use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tracing::warn;

use crate::job::JobInstance;
use crate::{HookResult, JobError, Outcome, QueueError, QueueResult};

/// How the `pre_run`, `run`, `post_run` sequence of one attempt ended
#[derive(Debug)]
pub enum Attempt {
    /// All three steps passed; carries the job result
    Completed(Value),
    /// Job logic asked for another attempt
    RetryRequested,
    /// A step failed or panicked
    Failed(JobError),
}

/// Await a hook, turning a panic into [`JobError::Panicked`]
pub async fn guarded<T, F>(stage: &'static str, hook: F) -> HookResult<T>
where
    F: Future<Output = HookResult<T>>,
{
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(JobError::Panicked(format!("{stage}: {}", panic_message(panic.as_ref())))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Build a job instance, turning a panicking factory into an error
pub fn build_instance<F>(build: F) -> QueueResult<JobInstance>
where
    F: FnOnce() -> QueueResult<JobInstance>,
{
    std::panic::catch_unwind(AssertUnwindSafe(build)).unwrap_or_else(|panic| {
        Err(QueueError::Internal(format!(
            "job construction panicked: {}",
            panic_message(panic.as_ref())
        )))
    })
}

/// Run `pre_run`, `run` and `post_run`. The result is stored on the
/// context before `post_run` sees it.
pub async fn run_attempt(instance: &mut JobInstance) -> Attempt {
    let JobInstance { job, context, args } = instance;

    if let Err(e) = guarded("pre_run", job.pre_run(context, args)).await {
        return Attempt::Failed(e);
    }

    let outcome = match guarded("run", job.run(context, args)).await {
        Ok(outcome) => outcome,
        Err(e) => return Attempt::Failed(e),
    };

    match outcome {
        Outcome::Success(value) => {
            context.result = Some(value.clone());
            match guarded("post_run", job.post_run(context, args)).await {
                Ok(()) => Attempt::Completed(value),
                Err(e) => Attempt::Failed(e),
            }
        }
        Outcome::RetryRequested => Attempt::RetryRequested,
        Outcome::Failed(e) => Attempt::Failed(e),
    }
}

/// Delay requested by the job for its next attempt
pub fn retry_delay(instance: &JobInstance) -> Option<Duration> {
    std::panic::catch_unwind(AssertUnwindSafe(|| instance.job.next_retry_time(&instance.context)))
        .unwrap_or_else(|panic| {
            warn!(
                panic = %panic_message(panic.as_ref()),
                "next_retry_time panicked, keeping the queue default"
            );
            None
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Job, JobArgs, JobContext};
    use async_trait::async_trait;
    use std::sync::Arc;
    use parking_lot::Mutex;

    /// Records which hooks ran
    struct Scripted {
        calls: Arc<Mutex<Vec<&'static str>>>,
        run: fn(&JobArgs) -> HookResult<Outcome>,
        fail_post_run: bool,
    }

    #[async_trait]
    impl Job for Scripted {
        const NAME: Option<&'static str> = Some("scripted");

        async fn pre_run(&mut self, _ctx: &JobContext, args: &JobArgs) -> HookResult<()> {
            self.calls.lock().push("pre_run");
            if args.keyword_opt::<bool>("duplicate")?.unwrap_or(false) {
                return Err(JobError::failed("duplicate task"));
            }
            Ok(())
        }

        async fn run(&mut self, _ctx: &JobContext, args: &JobArgs) -> HookResult<Outcome> {
            self.calls.lock().push("run");
            (self.run)(args)
        }

        async fn post_run(&mut self, ctx: &mut JobContext, _args: &JobArgs) -> HookResult<()> {
            self.calls.lock().push("post_run");
            assert!(ctx.result.is_some());
            if self.fail_post_run {
                return Err(JobError::failed("post_run broke"));
            }
            Ok(())
        }
    }

    fn instance(run: fn(&JobArgs) -> HookResult<Outcome>, args: JobArgs) -> (JobInstance, Arc<Mutex<Vec<&'static str>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let job = Scripted {
            calls: calls.clone(),
            run,
            fail_post_run: false,
        };
        let instance = JobInstance {
            job: Box::new(job),
            context: JobContext::new("default"),
            args,
        };
        (instance, calls)
    }

    #[tokio::test]
    async fn test_completed_attempt_stores_result() {
        let (mut instance, calls) = instance(|_| Outcome::success(7), JobArgs::new());

        let attempt = run_attempt(&mut instance).await;
        assert!(matches!(attempt, Attempt::Completed(v) if v == 7));
        assert_eq!(instance.context.result, Some(serde_json::json!(7)));
        assert_eq!(*calls.lock(), vec!["pre_run", "run", "post_run"]);
    }

    #[tokio::test]
    async fn test_pre_run_short_circuits() {
        let (mut instance, calls) = instance(|_| Outcome::success(7), JobArgs::new().kwarg("duplicate", true));

        let attempt = run_attempt(&mut instance).await;
        assert!(matches!(attempt, Attempt::Failed(JobError::Failed(msg)) if msg == "duplicate task"));
        assert_eq!(*calls.lock(), vec!["pre_run"]);
    }

    #[tokio::test]
    async fn test_post_run_failure_fails_attempt() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut instance = JobInstance {
            job: Box::new(Scripted {
                calls: calls.clone(),
                run: |_| Ok(Outcome::done()),
                fail_post_run: true,
            }),
            context: JobContext::new("default"),
            args: JobArgs::new(),
        };

        assert!(matches!(run_attempt(&mut instance).await, Attempt::Failed(_)));
        assert_eq!(*calls.lock(), vec!["pre_run", "run", "post_run"]);
    }

    #[tokio::test]
    async fn test_retry_and_failure_outcomes() {
        let (mut instance, calls) = instance(|_| Ok(Outcome::retry()), JobArgs::new());
        assert!(matches!(run_attempt(&mut instance).await, Attempt::RetryRequested));
        assert_eq!(*calls.lock(), vec!["pre_run", "run"]);

        let (mut instance, _) = instance_failing();
        assert!(matches!(
            run_attempt(&mut instance).await,
            Attempt::Failed(JobError::Failed(msg)) if msg == "division by zero"
        ));
    }

    fn instance_failing() -> (JobInstance, Arc<Mutex<Vec<&'static str>>>) {
        instance(|_| Ok(Outcome::Failed(JobError::failed("division by zero"))), JobArgs::new())
    }

    #[tokio::test]
    async fn test_panics_become_failures() {
        let (mut instance, _) = instance(|_| panic!("boom"), JobArgs::new());

        let attempt = run_attempt(&mut instance).await;
        assert!(matches!(attempt, Attempt::Failed(JobError::Panicked(msg)) if msg == "run: boom"));
    }

    #[tokio::test]
    async fn test_guarded_passes_results_through() {
        async fn explode() -> HookResult<()> {
            panic!("code {}", 7)
        }

        let ok = guarded("stage", async { Ok::<u8, JobError>(1) }).await;
        assert_eq!(ok.unwrap(), 1);

        let formatted = guarded("stage", explode()).await;
        assert!(matches!(formatted, Err(JobError::Panicked(msg)) if msg == "stage: code 7"));
    }

    #[test]
    fn test_build_instance_catches_panics() {
        let built = build_instance(|| {
            let (instance, _) = instance(|_| Ok(Outcome::done()), JobArgs::new());
            Ok(instance)
        });
        assert!(built.is_ok());

        let err = build_instance(|| panic!("factory boom")).unwrap_err();
        assert!(matches!(err, QueueError::Internal(msg) if msg.contains("factory boom")));
    }
}
