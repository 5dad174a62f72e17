//! CLI for enqueueing sync tasks and inspecting the queue.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sellersync::model::{NewTask, TaskPriority, TaskType};
use sellersync::scheduler::TaskScheduler;
use sellersync::scraper::CatalogScraper;
use sellersync::store::{Db, PgStore, TaskStore};
use sellersync::sync::MarketplaceSyncService;
use sellersync::util::env as env_util;

#[derive(Parser)]
#[command(name = "enqueue_sync", about = "Enqueue marketplace sync tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a product catalog sync for one account.
    Products {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        account: Uuid,
        #[arg(long)]
        urgent: bool,
    },
    /// Enqueue a sales sync for one account.
    Sales {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        account: Uuid,
    },
    /// Enqueue the staged full sync (products, orders, sales, analytics).
    Full {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        account: Uuid,
    },
    /// Enqueue a report generation task.
    Report {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        report_type: String,
        /// JSON object with report parameters.
        #[arg(long, default_value = "{}")]
        parameters: String,
    },
    /// Cancel a pending or running task.
    Cancel {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        task: Uuid,
    },
    /// List the owner's pending and running tasks.
    Status {
        #[arg(long)]
        owner: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();
    let cli = Cli::parse();

    let db_url = env_util::db_url()?;
    let db = Db::connect(&db_url, 5).await?;
    let store: Arc<dyn TaskStore> = Arc::new(PgStore::new(db));
    let sync = Arc::new(MarketplaceSyncService::new(
        store.clone(),
        CatalogScraper::from_env(),
    ));
    let scheduler = TaskScheduler::new(store, sync);

    match cli.command {
        Command::Products {
            owner,
            account,
            urgent,
        } => {
            let mut task = NewTask::new(owner, TaskType::SyncProducts).account(account);
            if urgent {
                task = task.priority(TaskPriority::Urgent);
            }
            let id = scheduler.create_task(task).await?;
            println!("enqueued product sync {id}");
        }
        Command::Sales { owner, account } => {
            let id = scheduler.schedule_sales_sync(owner, account).await?;
            println!("enqueued sales sync {id}");
        }
        Command::Full { owner, account } => {
            let stages = scheduler.schedule_full_sync(owner, account).await?;
            println!("enqueued full sync:");
            println!("  products  {}", stages.products);
            println!("  orders    {}", stages.orders);
            println!("  sales     {}", stages.sales);
            println!("  analytics {}", stages.analytics);
        }
        Command::Report {
            owner,
            report_type,
            parameters,
        } => {
            let parameters: Value = serde_json::from_str(&parameters)?;
            let id = scheduler
                .schedule_report(owner, &report_type, parameters)
                .await?;
            println!("enqueued report {id}");
        }
        Command::Cancel { owner, task } => {
            if scheduler.cancel_task(task, owner).await? {
                println!("cancelled {task}");
            } else {
                println!("{task} was not pending or running, nothing to cancel");
            }
        }
        Command::Status { owner } => {
            let tasks = scheduler.get_user_tasks_status(owner).await?;
            if tasks.is_empty() {
                println!("no pending or running tasks");
            }
            for task in tasks {
                println!(
                    "{}  {:<20} {:<9} priority={} retries={}/{}",
                    task.id,
                    task.task_type.as_str(),
                    task.status.as_str(),
                    task.priority.as_str(),
                    task.retry_count,
                    task.max_retries,
                );
            }
        }
    }
    Ok(())
}
