//! Task Store boundary.
//!
//! The relational store is the single source of truth for task state; no
//! in-memory task state survives between poll cycles. `store::pg` is the
//! production Postgres implementation, `store::memory` a mutex-guarded
//! in-memory one with identical claim/ordering semantics used by tests and
//! ephemeral runs.

pub mod db;
pub mod memory;
pub mod pg;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{
    MarketplaceAccount, NewNotification, NewSyncLog, NewTask, NotificationKind, NotificationPrefs,
    ProductRecord, SaleRecord, Task, TaskResult,
};

pub use db::Db;
pub use memory::MemoryStore;
pub use pg::PgStore;

/// What to do with a task whose handler failed.
#[derive(Debug, Clone, Copy)]
pub enum FailureDisposition {
    /// Re-queue as pending with an incremented retry count and a backoff
    /// deadline.
    Retry { next_run_at: DateTime<Utc> },
    /// Terminal failure; the task is never re-queued.
    Terminal,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new pending task and return its id.
    async fn insert_task(&self, task: NewTask) -> Result<Uuid>;

    /// Atomically claim up to `limit` due pending tasks, flipping them to
    /// running with `started_at = now` and `progress = 0`. Returned in
    /// priority-then-FIFO order. Claiming and marking happen in one step so
    /// two pollers can never dispatch the same task.
    async fn claim_due_tasks(&self, limit: i64) -> Result<Vec<Task>>;

    /// Monotonic progress update for a running task.
    async fn update_progress(&self, task_id: Uuid, progress: i16) -> Result<()>;

    /// Finish a running task. Returns false when the task was no longer
    /// running (e.g. cancelled mid-flight), in which case nothing is written.
    async fn complete_task(&self, task_id: Uuid, result: &TaskResult) -> Result<bool>;

    /// Record a handler failure. Conditional on the task still being running,
    /// like `complete_task`.
    async fn fail_task(
        &self,
        task_id: Uuid,
        error_message: &str,
        disposition: FailureDisposition,
    ) -> Result<bool>;

    /// Owner-scoped cancellation of a pending or running task. A no-op (Ok,
    /// false) on any other state or owner mismatch; cancellation is
    /// idempotent-safe.
    async fn cancel_task(&self, task_id: Uuid, owner_id: Uuid) -> Result<bool>;

    /// All pending/running tasks for one owner, most recent first.
    async fn tasks_for_owner(&self, owner_id: Uuid) -> Result<Vec<Task>>;

    async fn append_sync_log(&self, log: NewSyncLog) -> Result<()>;

    async fn insert_notification(&self, notification: NewNotification) -> Result<()>;

    async fn notification_prefs(
        &self,
        owner_id: Uuid,
        kind: NotificationKind,
    ) -> Result<Option<NotificationPrefs>>;

    async fn account(&self, account_id: Uuid) -> Result<Option<MarketplaceAccount>>;

    async fn deactivate_account(&self, account_id: Uuid) -> Result<()>;

    /// Insert or update the product identified by
    /// `(account_id, marketplace_product_id)`; only mutable fields change on
    /// update.
    async fn upsert_product(&self, product: &ProductRecord) -> Result<()>;

    /// Insert or update the sale identified by `(account_id, order_id)`.
    async fn upsert_sale(&self, sale: &SaleRecord) -> Result<()>;
}
