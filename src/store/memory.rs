//! In-memory Task Store.
//!
//! Mirrors the Postgres implementation's claim ordering and conditional
//! terminal writes so scheduler and sync tests exercise the same semantics
//! without a database. Also usable for ephemeral one-shot runs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::model::{
    MarketplaceAccount, NewNotification, NewSyncLog, NewTask, NotificationKind, NotificationPrefs,
    ProductRecord, SaleRecord, Task, TaskResult, TaskStatus,
};
use crate::store::{FailureDisposition, TaskStore};

#[derive(Default)]
struct Inner {
    // Insertion order doubles as FIFO order within a priority.
    tasks: Vec<Task>,
    accounts: HashMap<Uuid, MarketplaceAccount>,
    prefs: HashMap<(Uuid, NotificationKind), NotificationPrefs>,
    notifications: Vec<NewNotification>,
    sync_logs: Vec<NewSyncLog>,
    products: HashMap<(Uuid, String), ProductRecord>,
    sales: HashMap<(Uuid, String), SaleRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, account: MarketplaceAccount) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.accounts.insert(account.id, account);
    }

    pub fn set_notification_prefs(
        &self,
        owner_id: Uuid,
        kind: NotificationKind,
        prefs: NotificationPrefs,
    ) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.prefs.insert((owner_id, kind), prefs);
    }

    pub fn task(&self, task_id: Uuid) -> Option<Task> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tasks.iter().find(|t| t.id == task_id).cloned()
    }

    pub fn notifications(&self) -> Vec<NewNotification> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.notifications.clone()
    }

    pub fn sync_logs(&self) -> Vec<NewSyncLog> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.sync_logs.clone()
    }

    pub fn products_for(&self, account_id: Uuid) -> Vec<ProductRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = inner
            .products
            .values()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.marketplace_product_id.cmp(&b.marketplace_product_id));
        out
    }

    pub fn sales_for(&self, account_id: Uuid) -> Vec<SaleRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = inner
            .sales
            .values()
            .filter(|s| s.account_id == account_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        out
    }

    /// Make a backed-off task claimable immediately. Test hook for retry
    /// scenarios that should not sleep through real backoff windows.
    pub fn clear_backoff(&self, task_id: Uuid) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = inner.tasks.iter_mut().find(|t| t.id == task_id) {
            task.next_run_at = None;
            task.scheduled_at = None;
        }
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: NewTask) -> Result<Uuid> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tasks.push(Task {
            id,
            owner_id: task.owner_id,
            account_id: task.account_id,
            task_type: task.task_type,
            status: TaskStatus::Pending,
            priority: task.priority,
            progress: 0,
            payload: task.payload,
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: task.max_retries,
            scheduled_at: task.scheduled_at,
            started_at: None,
            completed_at: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn claim_due_tasks(&self, limit: i64) -> Result<Vec<Task>> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let mut due: Vec<usize> = inner
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.status == TaskStatus::Pending
                    && t.scheduled_at.map(|at| at <= now).unwrap_or(true)
                    && t.next_run_at.map(|at| at <= now).unwrap_or(true)
            })
            .map(|(i, _)| i)
            .collect();
        // Stable sort keeps insertion (FIFO) order within a priority.
        due.sort_by_key(|&i| inner.tasks[i].priority.rank());
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for i in due {
            let task = &mut inner.tasks[i];
            task.status = TaskStatus::Running;
            task.started_at = Some(now);
            task.progress = 0;
            task.updated_at = now;
            claimed.push(task.clone());
        }
        Ok(claimed)
    }

    async fn update_progress(&self, task_id: Uuid, progress: i16) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = inner
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id && t.status == TaskStatus::Running)
        {
            task.progress = task.progress.max(progress);
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete_task(&self, task_id: Uuid, result: &TaskResult) -> Result<bool> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id && t.status == TaskStatus::Running)
        {
            Some(task) => {
                task.status = TaskStatus::Completed;
                task.progress = 100;
                task.result = Some(result.clone());
                task.completed_at = Some(now);
                task.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        error_message: &str,
        disposition: FailureDisposition,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id && t.status == TaskStatus::Running)
        {
            Some(task) => {
                task.error_message = Some(error_message.to_string());
                task.updated_at = now;
                match disposition {
                    FailureDisposition::Retry { next_run_at } => {
                        task.status = TaskStatus::Pending;
                        task.retry_count += 1;
                        task.next_run_at = Some(next_run_at);
                    }
                    FailureDisposition::Terminal => {
                        task.status = TaskStatus::Failed;
                        task.completed_at = Some(now);
                    }
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn cancel_task(&self, task_id: Uuid, owner_id: Uuid) -> Result<bool> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.tasks.iter_mut().find(|t| {
            t.id == task_id
                && t.owner_id == owner_id
                && matches!(t.status, TaskStatus::Pending | TaskStatus::Running)
        }) {
            Some(task) => {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(now);
                task.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn tasks_for_owner(&self, owner_id: Uuid) -> Result<Vec<Task>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = inner
            .tasks
            .iter()
            .filter(|t| {
                t.owner_id == owner_id
                    && matches!(t.status, TaskStatus::Pending | TaskStatus::Running)
            })
            .cloned()
            .collect();
        out.reverse();
        Ok(out)
    }

    async fn append_sync_log(&self, log: NewSyncLog) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.sync_logs.push(log);
        Ok(())
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.notifications.push(notification);
        Ok(())
    }

    async fn notification_prefs(
        &self,
        owner_id: Uuid,
        kind: NotificationKind,
    ) -> Result<Option<NotificationPrefs>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.prefs.get(&(owner_id, kind)).cloned())
    }

    async fn account(&self, account_id: Uuid) -> Result<Option<MarketplaceAccount>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.accounts.get(&account_id).cloned())
    }

    async fn deactivate_account(&self, account_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(account) = inner.accounts.get_mut(&account_id) {
            account.is_active = false;
        }
        Ok(())
    }

    async fn upsert_product(&self, product: &ProductRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.products.insert(
            (product.account_id, product.marketplace_product_id.clone()),
            product.clone(),
        );
        Ok(())
    }

    async fn upsert_sale(&self, sale: &SaleRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .sales
            .insert((sale.account_id, sale.order_id.clone()), sale.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewTask, TaskPriority, TaskType};
    use chrono::Duration;

    #[tokio::test]
    async fn claim_orders_by_priority_then_fifo() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let normal = store
            .insert_task(NewTask::new(owner, TaskType::SyncProducts))
            .await
            .unwrap();
        let urgent = store
            .insert_task(
                NewTask::new(owner, TaskType::SyncSales).priority(TaskPriority::Urgent),
            )
            .await
            .unwrap();
        let high = store
            .insert_task(
                NewTask::new(owner, TaskType::SyncOrders).priority(TaskPriority::High),
            )
            .await
            .unwrap();

        let claimed = store.claim_due_tasks(5).await.unwrap();
        let ids: Vec<_> = claimed.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![urgent, high, normal]);
        assert!(claimed.iter().all(|t| t.status == TaskStatus::Running));

        // Everything is running now; nothing left to claim.
        assert!(store.claim_due_tasks(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scheduled_and_backed_off_tasks_are_not_due() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let future = Utc::now() + Duration::minutes(10);
        let id = store
            .insert_task(NewTask::new(owner, TaskType::SyncProducts).scheduled_at(future))
            .await
            .unwrap();
        assert!(store.claim_due_tasks(5).await.unwrap().is_empty());

        store.clear_backoff(id);
        assert_eq!(store.claim_due_tasks(5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_wins_over_running_completion() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let id = store
            .insert_task(NewTask::new(owner, TaskType::SyncProducts))
            .await
            .unwrap();
        store.claim_due_tasks(1).await.unwrap();
        assert!(store.cancel_task(id, owner).await.unwrap());

        // The worker finishes afterwards; the terminal write is refused.
        assert!(!store.complete_task(id, &TaskResult::default()).await.unwrap());
        assert_eq!(store.task(id).unwrap().status, TaskStatus::Cancelled);

        // Cancelling again is a no-op.
        assert!(!store.cancel_task(id, owner).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_requires_matching_owner() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let id = store
            .insert_task(NewTask::new(owner, TaskType::SyncProducts))
            .await
            .unwrap();
        assert!(!store.cancel_task(id, Uuid::new_v4()).await.unwrap());
        assert!(store.cancel_task(id, owner).await.unwrap());
    }
}
