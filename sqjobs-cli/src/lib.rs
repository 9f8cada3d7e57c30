//! Command-line entry point: runs workers and small queue administration
//! tasks against a configured transport.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Map, Value};
use tracing::info;

use sqjobs::broker::QUEUE_NAME_KWARG;
use sqjobs::config::secs_f64;
use sqjobs::{
    Broker, Connector, HookResult, Job, JobArgs, JobContext, JobProducer, JobRegistry, LogFormat,
    MultiQueueBroker, Outcome, QueueConfig, RedisConfig, RedisConnector, StandardBroker, Worker,
};

#[derive(Parser, Debug)]
#[command(name = "sqjobs", version, about = "Run sqjobs workers and manage queues")]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, default_value = "text", env = "SQJOBS_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consume one or more queues until interrupted
    Worker(WorkerArgs),

    /// Enqueue the built-in `sqjobs.echo` job
    EnqueueEcho(EnqueueEchoArgs),

    /// List declared queues
    Queues(TransportArgs),

    /// Declare a queue
    CreateQueue(CreateQueueArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Redis,
}

#[derive(Args, Debug, Clone)]
pub struct TransportArgs {
    #[arg(long, value_enum, default_value_t = Transport::Redis)]
    pub transport: Transport,

    /// Transport endpoint; falls back to the transport's own environment
    #[arg(long)]
    pub endpoint_url: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub transport: TransportArgs,

    /// Queue to consume; repeat for several queues
    #[arg(long = "queue", required = true)]
    pub queues: Vec<String>,

    /// Long-poll wait in seconds for a single queue
    #[arg(long)]
    pub wait_time: Option<u64>,

    /// Seconds between sweeps over empty queues
    #[arg(long)]
    pub polling_interval: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct EnqueueEchoArgs {
    #[command(flatten)]
    pub transport: TransportArgs,

    #[arg(long, default_value = sqjobs::DEFAULT_QUEUE_NAME)]
    pub queue: String,

    /// JSON array of positional arguments
    #[arg(long)]
    pub args: Option<String>,

    /// JSON object of keyword arguments
    #[arg(long)]
    pub kwargs: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CreateQueueArgs {
    #[command(flatten)]
    pub transport: TransportArgs,

    pub name: String,
}

/// Diagnostic job echoing its arguments back as its result
#[derive(Debug, Default)]
pub struct EchoJob;

#[async_trait]
impl Job for EchoJob {
    const NAME: Option<&'static str> = Some("sqjobs.echo");

    async fn run(&mut self, ctx: &JobContext, args: &JobArgs) -> HookResult<Outcome> {
        let positional = Value::Array(args.args.clone());
        let keywords = Value::Object(args.kwargs.clone());
        info!(
            queue = %ctx.queue_name,
            retries = ctx.retries,
            args = %positional,
            kwargs = %keywords,
            "Echo"
        );
        Outcome::success(json!({ "args": args.args, "kwargs": args.kwargs }))
    }
}

/// Open the selected transport
pub async fn connect(args: &TransportArgs) -> anyhow::Result<Arc<RedisConnector>> {
    match args.transport {
        Transport::Redis => {
            let mut config = RedisConfig::from_env()?;
            if let Some(url) = &args.endpoint_url {
                config.url = url.clone();
            }
            let connector = RedisConnector::new(config)?;
            connector.declare_queues().await?;
            Ok(Arc::new(connector))
        }
    }
}

/// Run a worker until ctrl-c, with job definitions added by `register`.
///
/// One queue is consumed with long polling; several queues are swept in
/// round-robin order.
pub async fn run_worker<F>(args: WorkerArgs, register: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut JobRegistry),
{
    let mut config = QueueConfig::from_env()?;
    if let Some(secs) = args.wait_time {
        config = config.with_wait_time(Duration::from_secs(secs));
    }
    if let Some(secs) = args.polling_interval {
        config = config.with_polling_interval(secs_f64(secs)?);
    }

    let mut registry = JobRegistry::new();
    register(&mut registry);
    anyhow::ensure!(!registry.is_empty(), "no jobs registered");

    let connector = connect(&args.transport).await?;

    if args.queues.len() == 1 {
        let broker = Arc::new(StandardBroker::new(connector));
        serve(Worker::new(broker, args.queues).with_config(config).with_registry(registry)).await
    } else {
        let broker = Arc::new(MultiQueueBroker::new(connector).with_polling_interval(config.polling_interval));
        serve(Worker::new(broker, args.queues).with_config(config).with_registry(registry)).await
    }
}

async fn serve<B: Broker + 'static>(worker: Worker<B>) -> anyhow::Result<()> {
    let handle = worker.spawn();

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutting down worker");

    let stats = handle.stats().clone();
    handle.shutdown().await?;
    info!(stats = ?stats.snapshot(), "Worker exited");
    Ok(())
}

/// Parse the `--args` / `--kwargs` JSON of the echo command
pub fn echo_args(args: Option<&str>, kwargs: Option<&str>) -> anyhow::Result<JobArgs> {
    let args: Vec<Value> = match args {
        Some(raw) => serde_json::from_str(raw).context("--args must be a JSON array")?,
        None => Vec::new(),
    };
    let kwargs: Map<String, Value> = match kwargs {
        Some(raw) => serde_json::from_str(raw).context("--kwargs must be a JSON object")?,
        None => Map::new(),
    };
    Ok(JobArgs { args, kwargs })
}

pub async fn enqueue_echo(args: EnqueueEchoArgs) -> anyhow::Result<()> {
    let job_args = echo_args(args.args.as_deref(), args.kwargs.as_deref())?
        .kwarg(QUEUE_NAME_KWARG, args.queue.as_str());

    let broker = StandardBroker::new(connect(&args.transport).await?);
    let result = broker.add_job::<EchoJob>(job_args).await?;
    println!("{}", result.job_id);
    Ok(())
}

pub async fn list_queues(args: TransportArgs) -> anyhow::Result<()> {
    let connector = connect(&args).await?;
    for queue in connector.queues().await? {
        println!("{queue}");
    }
    Ok(())
}

pub async fn create_queue(args: CreateQueueArgs) -> anyhow::Result<()> {
    let connector = connect(&args.transport).await?;
    connector.create_queue(&args.name).await?;
    println!("{}", args.name);
    Ok(())
}
