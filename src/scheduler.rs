//! Polling task scheduler.
//!
//! One scheduler owns the poll loop: every cycle it claims up to five due
//! tasks in priority order and executes them sequentially. All task state
//! lives in the store, so any number of scheduler processes can share a
//! queue; the store's claim step guarantees a task is dispatched once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::SyncError;
use crate::model::{
    MarketplaceAccount, NewSyncLog, NewTask, Task, TaskPriority, TaskResult, TaskStatus, TaskType,
};
use crate::notify::SyncErrorHandler;
use crate::store::{FailureDisposition, TaskStore};
use crate::sync::CatalogSync;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const CLAIM_LIMIT: i64 = 5;
const DEFAULT_SALES_LOOKBACK_DAYS: i64 = 30;

/// Task ids created by `schedule_full_sync`, in execution order.
#[derive(Debug, Clone)]
pub struct FullSyncTasks {
    pub products: Uuid,
    pub orders: Uuid,
    pub sales: Uuid,
    pub analytics: Uuid,
}

pub struct TaskScheduler {
    store: Arc<dyn TaskStore>,
    sync: Arc<dyn CatalogSync>,
    notifier: SyncErrorHandler,
    poll_interval: Duration,
    running: AtomicBool,
    shutdown: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(store: Arc<dyn TaskStore>, sync: Arc<dyn CatalogSync>) -> Self {
        let notifier = SyncErrorHandler::new(store.clone());
        Self {
            store,
            sync,
            notifier,
            poll_interval: DEFAULT_POLL_INTERVAL,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            worker: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Start the poll loop. The first cycle runs immediately; repeated calls
    /// are no-ops while the loop is alive.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(interval_secs = self.poll_interval.as_secs_f64(), "task scheduler started");

        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(scheduler.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = scheduler.shutdown.notified() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = scheduler.process_pending_tasks().await {
                            warn!(error = %err, "poll cycle failed, will retry next tick");
                        }
                    }
                }
            }
        });
        if let Ok(mut worker) = self.worker.lock() {
            *worker = Some(handle);
        }
    }

    /// Stop the poll loop and wait for the in-flight cycle to finish.
    /// Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_one();
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("task scheduler stopped");
    }

    pub async fn create_task(&self, task: NewTask) -> Result<Uuid> {
        let task_type = task.task_type;
        let id = self.store.insert_task(task).await?;
        info!(task = %id, task_type = task_type.as_str(), "created task");
        Ok(id)
    }

    /// One poll cycle: claim due tasks (priority, then FIFO) and run them one
    /// after another.
    pub async fn process_pending_tasks(&self) -> Result<()> {
        let tasks = self.store.claim_due_tasks(CLAIM_LIMIT).await?;
        if tasks.is_empty() {
            return Ok(());
        }
        info!(count = tasks.len(), "processing pending tasks");
        for task in tasks {
            self.execute_task(task).await;
        }
        Ok(())
    }

    pub async fn get_user_tasks_status(&self, owner_id: Uuid) -> Result<Vec<Task>> {
        self.store.tasks_for_owner(owner_id).await
    }

    /// Owner-scoped cancel; true when a pending/running task was flipped.
    pub async fn cancel_task(&self, task_id: Uuid, owner_id: Uuid) -> Result<bool> {
        let cancelled = self.store.cancel_task(task_id, owner_id).await?;
        if cancelled {
            info!(task = %task_id, owner = %owner_id, "task cancelled");
        }
        Ok(cancelled)
    }

    async fn execute_task(&self, task: Task) {
        info!(task = %task.id, task_type = task.task_type.as_str(), "executing task");

        let account = match task.account_id {
            Some(account_id) => match self.store.account(account_id).await {
                Ok(account) => account,
                Err(err) => {
                    warn!(account = %account_id, error = %err, "account lookup failed");
                    None
                }
            },
            None => None,
        };

        match self.run_handler(&task, account.as_ref()).await {
            Ok(result) => match self.store.complete_task(task.id, &result).await {
                Ok(true) => {
                    info!(task = %task.id, processed = result.processed_items, "task completed");
                    self.append_log(&task, TaskStatus::Completed, Some(&result), None)
                        .await;
                    self.notifier.handle_success(&task, &result).await;
                }
                Ok(false) => {
                    // Cancelled while the handler ran; its result is dropped.
                    info!(task = %task.id, "task no longer running, result discarded");
                }
                Err(err) => {
                    warn!(task = %task.id, error = %err, "failed to record task completion");
                }
            },
            Err(sync_error) => {
                let message = sync_error.to_string();
                let disposition = if task.retry_count < task.max_retries {
                    FailureDisposition::Retry {
                        next_run_at: Utc::now() + backoff_delay(task.retry_count + 1),
                    }
                } else {
                    FailureDisposition::Terminal
                };
                match self.store.fail_task(task.id, &message, disposition).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(task = %task.id, "task no longer running, failure not recorded");
                    }
                    Err(err) => {
                        warn!(task = %task.id, error = %err, "failed to record task failure");
                    }
                }
                self.append_log(&task, TaskStatus::Failed, None, Some(&message))
                    .await;
                self.notifier
                    .handle_failure(&task, account.as_ref(), &sync_error)
                    .await;
            }
        }
    }

    async fn run_handler(
        &self,
        task: &Task,
        account: Option<&MarketplaceAccount>,
    ) -> Result<TaskResult, SyncError> {
        match task.task_type {
            TaskType::SyncProducts => {
                let account = require_account(account)?;
                self.report_progress(task.id, 10).await;
                let summary = self.sync.sync_account_products(account).await?;
                self.report_progress(task.id, 90).await;
                Ok(summary.into())
            }
            TaskType::SyncSales => {
                let account = require_account(account)?;
                self.report_progress(task.id, 10).await;
                let date_from = sales_date_from(task);
                let summary = self.sync.sync_account_sales(account, date_from).await?;
                self.report_progress(task.id, 90).await;
                Ok(summary.into())
            }
            TaskType::GenerateReport => {
                self.report_progress(task.id, 50).await;
                Ok(TaskResult {
                    processed_items: 1,
                    success_count: 1,
                    error_count: 0,
                    duration_ms: 0,
                })
            }
            // Remaining handlers only track their run for now.
            TaskType::SyncOrders
            | TaskType::SyncAnalytics
            | TaskType::UpdatePrices
            | TaskType::UpdateStocks
            | TaskType::CompetitorAnalysis => {
                self.report_progress(task.id, 50).await;
                Ok(TaskResult::default())
            }
        }
    }

    async fn report_progress(&self, task_id: Uuid, progress: i16) {
        if let Err(err) = self.store.update_progress(task_id, progress).await {
            warn!(task = %task_id, error = %err, "progress update failed");
        }
    }

    async fn append_log(
        &self,
        task: &Task,
        status: TaskStatus,
        result: Option<&TaskResult>,
        error_summary: Option<&str>,
    ) {
        let log = NewSyncLog {
            account_id: task.account_id,
            task_id: task.id,
            task_type: task.task_type,
            status,
            items_processed: result.map(|r| r.processed_items).unwrap_or(0),
            items_success: result.map(|r| r.success_count).unwrap_or(0),
            items_failed: result.map(|r| r.error_count).unwrap_or(0),
            duration_ms: result.map(|r| r.duration_ms).unwrap_or(0),
            error_summary: error_summary.map(str::to_string),
            started_at: task.started_at,
            completed_at: Some(Utc::now()),
        };
        if let Err(err) = self.store.append_sync_log(log).await {
            warn!(task = %task.id, error = %err, "sync log append failed");
        }
    }

    // Convenience enqueue helpers.

    pub async fn schedule_product_sync(&self, owner_id: Uuid, account_id: Uuid) -> Result<Uuid> {
        self.create_task(NewTask::new(owner_id, TaskType::SyncProducts).account(account_id))
            .await
    }

    pub async fn schedule_order_sync(&self, owner_id: Uuid, account_id: Uuid) -> Result<Uuid> {
        self.create_task(NewTask::new(owner_id, TaskType::SyncOrders).account(account_id))
            .await
    }

    pub async fn schedule_sales_sync(&self, owner_id: Uuid, account_id: Uuid) -> Result<Uuid> {
        self.create_task(NewTask::new(owner_id, TaskType::SyncSales).account(account_id))
            .await
    }

    pub async fn schedule_report(
        &self,
        owner_id: Uuid,
        report_type: &str,
        parameters: serde_json::Value,
    ) -> Result<Uuid> {
        self.create_task(
            NewTask::new(owner_id, TaskType::GenerateReport)
                .priority(TaskPriority::Low)
                .payload(json!({
                    "report_type": report_type,
                    "parameters": parameters,
                })),
        )
        .await
    }

    /// Four staged tasks: products now, orders +60s, sales +120s, analytics
    /// +180s. Each is independently retryable.
    pub async fn schedule_full_sync(
        &self,
        owner_id: Uuid,
        account_id: Uuid,
    ) -> Result<FullSyncTasks> {
        let now = Utc::now();
        let products = self
            .create_task(
                NewTask::new(owner_id, TaskType::SyncProducts)
                    .account(account_id)
                    .priority(TaskPriority::High),
            )
            .await?;
        let orders = self
            .create_task(
                NewTask::new(owner_id, TaskType::SyncOrders)
                    .account(account_id)
                    .priority(TaskPriority::High)
                    .scheduled_at(now + ChronoDuration::seconds(60)),
            )
            .await?;
        let sales = self
            .create_task(
                NewTask::new(owner_id, TaskType::SyncSales)
                    .account(account_id)
                    .priority(TaskPriority::High)
                    .scheduled_at(now + ChronoDuration::seconds(120)),
            )
            .await?;
        let analytics = self
            .create_task(
                NewTask::new(owner_id, TaskType::SyncAnalytics)
                    .account(account_id)
                    .scheduled_at(now + ChronoDuration::seconds(180)),
            )
            .await?;
        Ok(FullSyncTasks {
            products,
            orders,
            sales,
            analytics,
        })
    }
}

fn require_account<'a>(
    account: Option<&'a MarketplaceAccount>,
) -> Result<&'a MarketplaceAccount, SyncError> {
    account.ok_or_else(|| SyncError::Validation("task has no marketplace account".into()))
}

/// Exponential backoff with base one minute: the n-th retry waits 2^n
/// minutes. Capped so pathological retry counts cannot overflow.
fn backoff_delay(retry_number: i32) -> ChronoDuration {
    let exponent = retry_number.clamp(0, 16) as u32;
    ChronoDuration::minutes(2i64.pow(exponent))
}

fn sales_date_from(task: &Task) -> DateTime<Utc> {
    task.payload
        .get("date_from")
        .and_then(|v| v.as_str())
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc::now() - ChronoDuration::days(DEFAULT_SALES_LOOKBACK_DAYS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Credentials, Marketplace};
    use crate::store::MemoryStore;
    use crate::sync::SyncSummary;
    use async_trait::async_trait;

    struct FakeSync {
        outcome: Mutex<Box<dyn Fn() -> Result<SyncSummary, SyncError> + Send>>,
    }

    impl FakeSync {
        fn ok(summary: SyncSummary) -> Self {
            Self {
                outcome: Mutex::new(Box::new(move || Ok(summary.clone()))),
            }
        }

        fn err(factory: impl Fn() -> SyncError + Send + 'static) -> Self {
            Self {
                outcome: Mutex::new(Box::new(move || Err(factory()))),
            }
        }
    }

    #[async_trait]
    impl CatalogSync for FakeSync {
        async fn sync_account_products(
            &self,
            _account: &MarketplaceAccount,
        ) -> Result<SyncSummary, SyncError> {
            (self.outcome.lock().unwrap())()
        }

        async fn sync_account_sales(
            &self,
            _account: &MarketplaceAccount,
            _date_from: DateTime<Utc>,
        ) -> Result<SyncSummary, SyncError> {
            (self.outcome.lock().unwrap())()
        }
    }

    fn account(owner_id: Uuid) -> MarketplaceAccount {
        MarketplaceAccount {
            id: Uuid::new_v4(),
            owner_id,
            marketplace: Marketplace::Ozon,
            credentials: Credentials {
                client_id: Some("c".into()),
                api_key: Some("k".into()),
                campaign_id: None,
            },
            is_active: true,
            catalog_url: None,
            catalog_category: None,
            catalog_limit: None,
        }
    }

    fn scheduler_with(
        store: Arc<MemoryStore>,
        sync: FakeSync,
    ) -> TaskScheduler {
        TaskScheduler::new(store, Arc::new(sync))
    }

    #[tokio::test]
    async fn successful_sync_completes_task_with_log_and_notification() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let account = account(owner);
        store.add_account(account.clone());

        let scheduler = scheduler_with(
            store.clone(),
            FakeSync::ok(SyncSummary {
                processed: 110,
                succeeded: 110,
                failed: 0,
                duration_ms: 1234,
            }),
        );
        let task_id = scheduler
            .schedule_product_sync(owner, account.id)
            .await
            .unwrap();

        scheduler.process_pending_tasks().await.unwrap();

        let task = store.task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.result.as_ref().unwrap().processed_items, 110);

        let logs = store.sync_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, TaskStatus::Completed);
        assert_eq!(logs[0].items_success, 110);

        assert!(store
            .notifications()
            .iter()
            .any(|n| n.kind == crate::model::NotificationKind::SyncCompleted));
    }

    #[tokio::test]
    async fn rate_limit_backs_off_then_fails_terminally() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let account = account(owner);
        store.add_account(account.clone());

        let scheduler = scheduler_with(
            store.clone(),
            FakeSync::err(|| SyncError::RateLimit("rate limit exceeded".into())),
        );
        let task_id = scheduler
            .schedule_product_sync(owner, account.id)
            .await
            .unwrap();

        // Attempt 1: re-queued with retry_count 1 and a backoff of 2^1 min.
        let before = Utc::now();
        scheduler.process_pending_tasks().await.unwrap();
        let task = store.task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.error_message.as_deref(), Some("rate limited: rate limit exceeded"));
        let next_run_at = task.next_run_at.unwrap();
        assert!(next_run_at >= before + ChronoDuration::minutes(2));

        // Not due yet, so the next cycle claims nothing.
        scheduler.process_pending_tasks().await.unwrap();
        assert_eq!(store.task(task_id).unwrap().retry_count, 1);

        // Attempts 2..4, forcing each backoff window open.
        for expected_retry in 2..=3 {
            store.clear_backoff(task_id);
            scheduler.process_pending_tasks().await.unwrap();
            let task = store.task(task_id).unwrap();
            assert_eq!(task.status, TaskStatus::Pending);
            assert_eq!(task.retry_count, expected_retry);
        }

        // Attempt 4: retries exhausted, terminal failure, count not bumped.
        store.clear_backoff(task_id);
        scheduler.process_pending_tasks().await.unwrap();
        let task = store.task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, task.max_retries);
        assert!(task.completed_at.is_some());

        assert_eq!(store.sync_logs().len(), 4);
        assert!(store
            .sync_logs()
            .iter()
            .all(|l| l.status == TaskStatus::Failed));
    }

    #[tokio::test]
    async fn backoff_grows_exponentially() {
        assert_eq!(backoff_delay(1), ChronoDuration::minutes(2));
        assert_eq!(backoff_delay(2), ChronoDuration::minutes(4));
        assert_eq!(backoff_delay(3), ChronoDuration::minutes(8));
        // Cap keeps the arithmetic sane for absurd retry counts.
        assert_eq!(backoff_delay(500), ChronoDuration::minutes(65536));
    }

    struct CancellingSync {
        store: Arc<MemoryStore>,
        target: Mutex<Option<(Uuid, Uuid)>>,
    }

    #[async_trait]
    impl CatalogSync for CancellingSync {
        async fn sync_account_products(
            &self,
            _account: &MarketplaceAccount,
        ) -> Result<SyncSummary, SyncError> {
            // Simulate a user cancelling while the handler runs.
            let target = *self.target.lock().unwrap();
            if let Some((task_id, owner_id)) = target {
                self.store.cancel_task(task_id, owner_id).await.unwrap();
            }
            Ok(SyncSummary {
                processed: 7,
                succeeded: 7,
                failed: 0,
                duration_ms: 1,
            })
        }

        async fn sync_account_sales(
            &self,
            _account: &MarketplaceAccount,
            _date_from: DateTime<Utc>,
        ) -> Result<SyncSummary, SyncError> {
            unreachable!("not used in this test")
        }
    }

    #[tokio::test]
    async fn cancellation_during_execution_wins() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let account = account(owner);
        store.add_account(account.clone());

        let sync = Arc::new(CancellingSync {
            store: store.clone(),
            target: Mutex::new(None),
        });
        let scheduler = TaskScheduler::new(store.clone(), sync.clone());
        let task_id = scheduler
            .schedule_product_sync(owner, account.id)
            .await
            .unwrap();
        *sync.target.lock().unwrap() = Some((task_id, owner));

        scheduler.process_pending_tasks().await.unwrap();

        let task = store.task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.result.is_none());
        assert!(store.sync_logs().is_empty());
        assert!(store.notifications().is_empty());
    }

    #[tokio::test]
    async fn cancel_is_noop_on_terminal_task() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let account = account(owner);
        store.add_account(account.clone());

        let scheduler = scheduler_with(store.clone(), FakeSync::ok(SyncSummary::default()));
        let task_id = scheduler
            .schedule_product_sync(owner, account.id)
            .await
            .unwrap();
        scheduler.process_pending_tasks().await.unwrap();
        assert_eq!(store.task(task_id).unwrap().status, TaskStatus::Completed);

        assert!(!scheduler.cancel_task(task_id, owner).await.unwrap());
        assert_eq!(store.task(task_id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn full_sync_stages_are_spread_out() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let account = account(owner);
        store.add_account(account.clone());

        let scheduler = scheduler_with(
            store.clone(),
            FakeSync::ok(SyncSummary {
                processed: 1,
                succeeded: 1,
                failed: 0,
                duration_ms: 1,
            }),
        );
        let stages = scheduler
            .schedule_full_sync(owner, account.id)
            .await
            .unwrap();

        assert!(store.task(stages.products).unwrap().scheduled_at.is_none());
        let now = Utc::now();
        assert!(store.task(stages.orders).unwrap().scheduled_at.unwrap() > now);
        assert!(store.task(stages.sales).unwrap().scheduled_at.unwrap() > now);
        assert!(store.task(stages.analytics).unwrap().scheduled_at.unwrap() > now);

        // Only the products stage is due right now.
        scheduler.process_pending_tasks().await.unwrap();
        assert_eq!(
            store.task(stages.products).unwrap().status,
            TaskStatus::Completed
        );
        assert_eq!(
            store.task(stages.orders).unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn stub_handlers_complete_without_side_effects() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let scheduler = scheduler_with(store.clone(), FakeSync::ok(SyncSummary::default()));

        let task_id = scheduler
            .create_task(NewTask::new(owner, TaskType::UpdatePrices))
            .await
            .unwrap();
        scheduler.process_pending_tasks().await.unwrap();

        let task = store.task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_ref().unwrap().processed_items, 0);
        // Zero items processed: no completion notification.
        assert!(store.notifications().is_empty());
    }

    #[tokio::test]
    async fn missing_account_fails_the_sync_task() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let scheduler = scheduler_with(store.clone(), FakeSync::ok(SyncSummary::default()));

        // No account attached at all.
        let task_id = scheduler
            .create_task(NewTask::new(owner, TaskType::SyncProducts))
            .await
            .unwrap();
        scheduler.process_pending_tasks().await.unwrap();

        let task = store.task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let account = account(owner);
        store.add_account(account.clone());

        let scheduler = Arc::new(
            scheduler_with(
                store.clone(),
                FakeSync::ok(SyncSummary {
                    processed: 2,
                    succeeded: 2,
                    failed: 0,
                    duration_ms: 1,
                }),
            )
            .with_poll_interval(Duration::from_millis(10)),
        );
        let task_id = scheduler
            .schedule_product_sync(owner, account.id)
            .await
            .unwrap();

        scheduler.start();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;
        scheduler.stop().await;

        assert_eq!(store.task(task_id).unwrap().status, TaskStatus::Completed);
    }
}
