use clap::Parser;
use sqjobs::init_tracing;
use sqjobs_cli::{Cli, Command, EchoJob};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Worker(args) => {
            sqjobs_cli::run_worker(args, |registry| {
                registry.register::<EchoJob>();
            })
            .await
        }
        Command::EnqueueEcho(args) => sqjobs_cli::enqueue_echo(args).await,
        Command::Queues(transport) => sqjobs_cli::list_queues(transport).await,
        Command::CreateQueue(args) => sqjobs_cli::create_queue(args).await,
    }
}
