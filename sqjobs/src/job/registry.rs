use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{info, warn};

use super::{DynJob, Job};

/// Type-erased factory for one job definition
pub trait JobHandler: Send + Sync {
    /// Task name the definition is dispatched under
    fn name(&self) -> &str;

    /// Rust type behind the definition, for diagnostics
    fn type_name(&self) -> &'static str;

    fn default_queue_name(&self) -> &'static str;

    fn is_abstract(&self) -> bool;

    /// Build a fresh job value for one execution attempt
    fn build(&self) -> Box<dyn DynJob>;
}

/// Concrete job handler implementation
struct ConcreteJobHandler<J, F> {
    name: String,
    factory: F,
    _phantom: PhantomData<fn() -> J>,
}

impl<J: Job, F: Fn() -> J + Send + Sync> JobHandler for ConcreteJobHandler<J, F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<J>()
    }

    fn default_queue_name(&self) -> &'static str {
        J::DEFAULT_QUEUE_NAME
    }

    fn is_abstract(&self) -> bool {
        J::ABSTRACT
    }

    fn build(&self) -> Box<dyn DynJob> {
        Box::new((self.factory)())
    }
}

/// Handler building `J` through `Default`
pub fn handler<J: Job + Default>() -> Arc<dyn JobHandler> {
    handler_with(J::default)
}

/// Handler building `J` through an explicit factory
pub fn handler_with<J, F>(factory: F) -> Arc<dyn JobHandler>
where
    J: Job,
    F: Fn() -> J + Send + Sync + 'static,
{
    Arc::new(ConcreteJobHandler {
        name: J::task_name(),
        factory,
        _phantom: PhantomData,
    })
}

/// Mapping from task name to job factory
#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    /// Create a new job registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a job type built through `Default`
    pub fn register<J: Job + Default>(&mut self) -> &mut Self {
        self.register_handler(handler::<J>())
    }

    /// Register a job type built by `factory` for every delivery
    pub fn register_factory<J, F>(&mut self, factory: F) -> &mut Self
    where
        J: Job,
        F: Fn() -> J + Send + Sync + 'static,
    {
        self.register_handler(handler_with(factory))
    }

    /// Register a handler. Abstract definitions are skipped; a name that is
    /// already taken is overwritten, last registration wins.
    pub fn register_handler(&mut self, handler: Arc<dyn JobHandler>) -> &mut Self {
        let name = handler.name().to_string();

        if handler.is_abstract() {
            info!(job_name = %name, "Skipping abstract job {}", handler.type_name());
            return self;
        }

        if let Some(previous) = self.handlers.get(&name) {
            warn!(
                job_name = %name,
                previous = previous.type_name(),
                replacement = handler.type_name(),
                "Job {} already registered",
                name
            );
        }

        self.handlers.insert(name, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Check if a job type is registered
    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Get all registered job names
    pub fn registered_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.registered_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HookResult, JobArgs, JobContext, Outcome};
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct Adder;

    #[async_trait]
    impl Job for Adder {
        const NAME: Option<&'static str> = Some("adder");
        const RETRY_TIME: Option<Duration> = Some(Duration::from_secs(10));

        async fn run(&mut self, _ctx: &JobContext, args: &JobArgs) -> HookResult<Outcome> {
            Outcome::success(args.get::<i64>(0, "num1")? + args.get::<i64>(1, "num2")?)
        }
    }

    /// Same task name as `Adder`, no retry time
    #[derive(Default)]
    struct FakeAdder;

    #[async_trait]
    impl Job for FakeAdder {
        const NAME: Option<&'static str> = Some("adder");

        async fn run(&mut self, _ctx: &JobContext, _args: &JobArgs) -> HookResult<Outcome> {
            Ok(Outcome::done())
        }
    }

    #[derive(Default)]
    struct AbstractAdder;

    #[async_trait]
    impl Job for AbstractAdder {
        const NAME: Option<&'static str> = Some("abstract_adder");
        const ABSTRACT: bool = true;

        async fn run(&mut self, _ctx: &JobContext, _args: &JobArgs) -> HookResult<Outcome> {
            Ok(Outcome::done())
        }
    }

    #[test]
    fn test_register_job() {
        let mut registry = JobRegistry::new();
        registry.register::<Adder>();

        assert_eq!(registry.len(), 1);
        assert!(registry.is_registered("adder"));
        assert_eq!(registry.registered_types(), vec!["adder"]);
        assert_eq!(registry.get("adder").unwrap().default_queue_name(), "sqjobs");
    }

    #[test]
    fn test_register_abstract_job() {
        let mut registry = JobRegistry::new();
        registry.register::<AbstractAdder>();

        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_job_twice() {
        let mut registry = JobRegistry::new();
        registry.register::<Adder>().register::<Adder>();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("adder").unwrap().type_name().ends_with("::Adder"));
    }

    #[test]
    fn test_register_job_overwrite() {
        let mut registry = JobRegistry::new();
        registry.register::<Adder>();
        registry.register::<FakeAdder>();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("adder").unwrap().type_name().ends_with("::FakeAdder"));
    }

    #[tokio::test]
    async fn test_factory_builds_fresh_jobs() {
        let mut registry = JobRegistry::new();
        registry.register_factory(|| Adder);

        let handler = registry.get("adder").unwrap();
        let mut job = handler.build();
        let ctx = JobContext::new("sqjobs");

        assert_eq!(job.name(), "adder");
        assert_eq!(job.next_retry_time(&ctx), Some(Duration::from_secs(10)));

        let outcome = job.run(&ctx, &JobArgs::new().arg(2).arg(3)).await.unwrap();
        assert!(matches!(outcome, Outcome::Success(v) if v == 5));
    }
}
