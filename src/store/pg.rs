//! Postgres-backed Task Store.
//!
//! The claim step selects due pending tasks with `FOR UPDATE SKIP LOCKED`
//! and flips them to running inside one transaction, so multiple worker
//! processes can poll the same store without double-dispatching a task.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use crate::model::{
    Credentials, Marketplace, MarketplaceAccount, NewNotification, NewSyncLog, NewTask,
    NotificationChannel, NotificationKind, NotificationPrefs, ProductRecord, SaleRecord, Task,
    TaskPriority, TaskResult, TaskStatus, TaskType,
};
use crate::store::{Db, FailureDisposition, TaskStore};

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn task_from_row(row: &PgRow) -> Result<Task> {
    let task_type_raw: String = row.get("type");
    let status_raw: String = row.get("status");
    let priority_raw: String = row.get("priority");
    let result_json: Option<serde_json::Value> = row.get("result");
    Ok(Task {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        account_id: row.get("account_id"),
        task_type: TaskType::parse(&task_type_raw)
            .ok_or_else(|| anyhow!("unknown task type: {task_type_raw}"))?,
        status: TaskStatus::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown task status: {status_raw}"))?,
        priority: TaskPriority::parse(&priority_raw)
            .ok_or_else(|| anyhow!("unknown task priority: {priority_raw}"))?,
        progress: row.get("progress"),
        payload: row.get("payload"),
        result: result_json
            .map(serde_json::from_value)
            .transpose()
            .unwrap_or(None),
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        scheduled_at: row.get("scheduled_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        next_run_at: row.get("next_run_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const TASK_COLUMNS: &str = "id, owner_id, account_id, type, status, priority, progress, payload, \
     result, error_message, retry_count, max_retries, scheduled_at, started_at, completed_at, \
     next_run_at, created_at, updated_at";

#[async_trait]
impl TaskStore for PgStore {
    async fn insert_task(&self, task: NewTask) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO tasks (owner_id, account_id, type, priority, payload, scheduled_at, max_retries) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .persistent(false)
        .bind(task.owner_id)
        .bind(task.account_id)
        .bind(task.task_type.as_str())
        .bind(task.priority.as_str())
        .bind(&task.payload)
        .bind(task.scheduled_at)
        .bind(task.max_retries)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(id)
    }

    async fn claim_due_tasks(&self, limit: i64) -> Result<Vec<Task>> {
        let mut tx = self.db.pool.begin().await?;
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status = 'pending' \
               AND (scheduled_at IS NULL OR scheduled_at <= now()) \
               AND (next_run_at IS NULL OR next_run_at <= now()) \
             ORDER BY CASE priority \
                 WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 WHEN 'normal' THEN 2 ELSE 3 END, \
               created_at ASC \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED"
        ))
        .persistent(false)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            tasks.push(task_from_row(row)?);
        }
        if tasks.is_empty() {
            tx.rollback().await?;
            return Ok(tasks);
        }

        let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        sqlx::query(
            "UPDATE tasks \
             SET status = 'running', started_at = now(), progress = 0, updated_at = now() \
             WHERE id = ANY($1)",
        )
        .persistent(false)
        .bind(&ids)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let now = Utc::now();
        for task in &mut tasks {
            task.status = TaskStatus::Running;
            task.started_at = Some(now);
            task.progress = 0;
        }
        Ok(tasks)
    }

    async fn update_progress(&self, task_id: Uuid, progress: i16) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET progress = GREATEST(progress, $2), updated_at = now() \
             WHERE id = $1 AND status = 'running'",
        )
        .persistent(false)
        .bind(task_id)
        .bind(progress)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn complete_task(&self, task_id: Uuid, result: &TaskResult) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE tasks \
             SET status = 'completed', progress = 100, result = $2, completed_at = now(), \
                 updated_at = now() \
             WHERE id = $1 AND status = 'running'",
        )
        .persistent(false)
        .bind(task_id)
        .bind(serde_json::to_value(result)?)
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        error_message: &str,
        disposition: FailureDisposition,
    ) -> Result<bool> {
        let res = match disposition {
            FailureDisposition::Retry { next_run_at } => {
                sqlx::query(
                    "UPDATE tasks \
                     SET status = 'pending', retry_count = retry_count + 1, next_run_at = $3, \
                         error_message = $2, updated_at = now() \
                     WHERE id = $1 AND status = 'running'",
                )
                .persistent(false)
                .bind(task_id)
                .bind(error_message)
                .bind(next_run_at)
                .execute(&self.db.pool)
                .await?
            }
            FailureDisposition::Terminal => {
                sqlx::query(
                    "UPDATE tasks \
                     SET status = 'failed', error_message = $2, completed_at = now(), \
                         updated_at = now() \
                     WHERE id = $1 AND status = 'running'",
                )
                .persistent(false)
                .bind(task_id)
                .bind(error_message)
                .execute(&self.db.pool)
                .await?
            }
        };
        Ok(res.rows_affected() > 0)
    }

    async fn cancel_task(&self, task_id: Uuid, owner_id: Uuid) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE tasks SET status = 'cancelled', completed_at = now(), updated_at = now() \
             WHERE id = $1 AND owner_id = $2 AND status IN ('pending', 'running')",
        )
        .persistent(false)
        .bind(task_id)
        .bind(owner_id)
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn tasks_for_owner(&self, owner_id: Uuid) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE owner_id = $1 AND status IN ('pending', 'running') \
             ORDER BY created_at DESC"
        ))
        .persistent(false)
        .bind(owner_id)
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn append_sync_log(&self, log: NewSyncLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_logs (account_id, task_id, type, status, items_processed, \
                 items_success, items_failed, duration_ms, error_summary, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .persistent(false)
        .bind(log.account_id)
        .bind(log.task_id)
        .bind(log.task_type.as_str())
        .bind(log.status.as_str())
        .bind(log.items_processed as i64)
        .bind(log.items_success as i64)
        .bind(log.items_failed as i64)
        .bind(log.duration_ms as i64)
        .bind(log.error_summary)
        .bind(log.started_at)
        .bind(log.completed_at)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications (owner_id, type, channel, title, message, data) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .persistent(false)
        .bind(notification.owner_id)
        .bind(notification.kind.as_str())
        .bind(notification.channel.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.data)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn notification_prefs(
        &self,
        owner_id: Uuid,
        kind: NotificationKind,
    ) -> Result<Option<NotificationPrefs>> {
        let row = sqlx::query(
            "SELECT enabled, channels FROM notification_settings WHERE owner_id = $1 AND type = $2",
        )
        .persistent(false)
        .bind(owner_id)
        .bind(kind.as_str())
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row.map(|r| {
            let channels: Vec<String> = r.get("channels");
            NotificationPrefs {
                enabled: r.get("enabled"),
                channels: channels
                    .iter()
                    .filter_map(|c| NotificationChannel::parse(c))
                    .collect(),
            }
        }))
    }

    async fn account(&self, account_id: Uuid) -> Result<Option<MarketplaceAccount>> {
        let row = sqlx::query(
            "SELECT id, owner_id, marketplace, credentials, is_active, catalog_url, \
                 catalog_category, catalog_limit \
             FROM marketplace_accounts WHERE id = $1",
        )
        .persistent(false)
        .bind(account_id)
        .fetch_optional(&self.db.pool)
        .await?;
        row.map(|r| {
            let marketplace_raw: String = r.get("marketplace");
            let credentials: serde_json::Value = r.get("credentials");
            let catalog_limit: Option<i32> = r.get("catalog_limit");
            Ok(MarketplaceAccount {
                id: r.get("id"),
                owner_id: r.get("owner_id"),
                marketplace: Marketplace::parse(&marketplace_raw)
                    .ok_or_else(|| anyhow!("unknown marketplace: {marketplace_raw}"))?,
                credentials: serde_json::from_value::<Credentials>(credentials)
                    .unwrap_or_default(),
                is_active: r.get("is_active"),
                catalog_url: r.get("catalog_url"),
                catalog_category: r.get("catalog_category"),
                catalog_limit: catalog_limit.map(|v| v.max(0) as u32),
            })
        })
        .transpose()
    }

    async fn deactivate_account(&self, account_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE marketplace_accounts SET is_active = FALSE, updated_at = now() WHERE id = $1",
        )
        .persistent(false)
        .bind(account_id)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn upsert_product(&self, product: &ProductRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO products (account_id, marketplace_product_id, name, sku, price, stock, \
                 category, brand, is_active, last_sync) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now()) \
             ON CONFLICT (account_id, marketplace_product_id) DO UPDATE SET \
                 name = EXCLUDED.name, price = EXCLUDED.price, stock = EXCLUDED.stock, \
                 category = EXCLUDED.category, brand = EXCLUDED.brand, \
                 is_active = EXCLUDED.is_active, last_sync = now(), updated_at = now()",
        )
        .persistent(false)
        .bind(product.account_id)
        .bind(&product.marketplace_product_id)
        .bind(&product.name)
        .bind(&product.sku)
        .bind(product.price)
        .bind(product.stock)
        .bind(&product.category)
        .bind(&product.brand)
        .bind(product.active)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn upsert_sale(&self, sale: &SaleRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO sales (account_id, order_id, marketplace_product_id, quantity, price, \
                 commission, net_profit, sale_date) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (account_id, order_id) DO UPDATE SET \
                 quantity = EXCLUDED.quantity, price = EXCLUDED.price, \
                 commission = EXCLUDED.commission, net_profit = EXCLUDED.net_profit, \
                 sale_date = EXCLUDED.sale_date",
        )
        .persistent(false)
        .bind(sale.account_id)
        .bind(&sale.order_id)
        .bind(&sale.marketplace_product_id)
        .bind(sale.quantity)
        .bind(sale.price)
        .bind(sale.commission)
        .bind(sale.net_profit)
        .bind(sale.sale_date)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }
}
