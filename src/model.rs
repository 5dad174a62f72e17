//! Domain model: background tasks, sync logs, notifications, and the
//! canonical marketplace-agnostic product/sale shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const DEFAULT_MAX_RETRIES: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    SyncProducts,
    SyncOrders,
    SyncSales,
    SyncAnalytics,
    UpdatePrices,
    UpdateStocks,
    GenerateReport,
    CompetitorAnalysis,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SyncProducts => "sync_products",
            TaskType::SyncOrders => "sync_orders",
            TaskType::SyncSales => "sync_sales",
            TaskType::SyncAnalytics => "sync_analytics",
            TaskType::UpdatePrices => "update_prices",
            TaskType::UpdateStocks => "update_stocks",
            TaskType::GenerateReport => "generate_report",
            TaskType::CompetitorAnalysis => "competitor_analysis",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "sync_products" => TaskType::SyncProducts,
            "sync_orders" => TaskType::SyncOrders,
            "sync_sales" => TaskType::SyncSales,
            "sync_analytics" => TaskType::SyncAnalytics,
            "update_prices" => TaskType::UpdatePrices,
            "update_stocks" => TaskType::UpdateStocks,
            "generate_report" => TaskType::GenerateReport,
            "competitor_analysis" => TaskType::CompetitorAnalysis,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "pending" => TaskStatus::Pending,
            "running" => TaskStatus::Running,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            _ => return None,
        })
    }

    /// Pending and running are the only non-terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Total order: urgent > high > normal > low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "low" => TaskPriority::Low,
            "normal" => TaskPriority::Normal,
            "high" => TaskPriority::High,
            "urgent" => TaskPriority::Urgent,
            _ => return None,
        })
    }

    /// Claim ordering rank, 0 = most urgent.
    pub fn rank(&self) -> i16 {
        match self {
            TaskPriority::Urgent => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub processed_items: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub account_id: Option<Uuid>,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub progress: i16,
    pub payload: Value,
    pub result: Option<TaskResult>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation parameters for a task; everything else is store-assigned.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub owner_id: Uuid,
    pub account_id: Option<Uuid>,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub payload: Value,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: i32,
}

impl NewTask {
    pub fn new(owner_id: Uuid, task_type: TaskType) -> Self {
        Self {
            owner_id,
            account_id: None,
            task_type,
            priority: TaskPriority::Normal,
            payload: Value::Object(Default::default()),
            scheduled_at: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn account(mut self, account_id: Uuid) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// One immutable audit row per task execution attempt.
#[derive(Debug, Clone)]
pub struct NewSyncLog {
    pub account_id: Option<Uuid>,
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub items_processed: u64,
    pub items_success: u64,
    pub items_failed: u64,
    pub duration_ms: u64,
    pub error_summary: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SyncFailed,
    SyncCompleted,
    LowStock,
    PriceChanged,
    NewOrder,
    SystemError,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::SyncFailed => "sync_failed",
            NotificationKind::SyncCompleted => "sync_completed",
            NotificationKind::LowStock => "low_stock",
            NotificationKind::PriceChanged => "price_changed",
            NotificationKind::NewOrder => "new_order",
            NotificationKind::SystemError => "system_error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "sync_failed" => NotificationKind::SyncFailed,
            "sync_completed" => NotificationKind::SyncCompleted,
            "low_stock" => NotificationKind::LowStock,
            "price_changed" => NotificationKind::PriceChanged,
            "new_order" => NotificationKind::NewOrder,
            "system_error" => NotificationKind::SystemError,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    InApp,
    Email,
    Push,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::InApp => "in_app",
            NotificationChannel::Email => "email",
            NotificationChannel::Push => "push",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "in_app" => NotificationChannel::InApp,
            "email" => NotificationChannel::Email,
            "push" => NotificationChannel::Push,
            _ => return None,
        })
    }
}

/// One user-facing message on one delivery channel.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub owner_id: Uuid,
    pub kind: NotificationKind,
    pub channel: NotificationChannel,
    pub title: String,
    pub message: String,
    pub data: Value,
}

/// Per-user, per-kind delivery preferences.
#[derive(Debug, Clone)]
pub struct NotificationPrefs {
    pub enabled: bool,
    pub channels: Vec<NotificationChannel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marketplace {
    Ozon,
    Wildberries,
    YandexMarket,
}

impl Marketplace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Marketplace::Ozon => "ozon",
            Marketplace::Wildberries => "wildberries",
            Marketplace::YandexMarket => "yandex_market",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "ozon" => Marketplace::Ozon,
            "wildberries" => Marketplace::Wildberries,
            "yandex_market" => Marketplace::YandexMarket,
            _ => return None,
        })
    }
}

/// Credential bundle stored per account; which fields are required depends on
/// the marketplace (see `sync::service`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MarketplaceAccount {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub marketplace: Marketplace,
    pub credentials: Credentials,
    pub is_active: bool,
    pub catalog_url: Option<String>,
    pub catalog_category: Option<String>,
    pub catalog_limit: Option<u32>,
}

/// Canonical product keyed by `(account_id, marketplace_product_id)`.
/// Upserting on that composite key is the sync idempotency boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub account_id: Uuid,
    pub marketplace_product_id: String,
    pub name: String,
    pub sku: Option<String>,
    pub price: f64,
    pub stock: i32,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub active: bool,
}

/// Canonical sale keyed by `(account_id, order_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRecord {
    pub account_id: Uuid,
    pub order_id: String,
    pub marketplace_product_id: String,
    pub quantity: i32,
    pub price: f64,
    pub commission: f64,
    pub net_profit: f64,
    pub sale_date: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_total_order() {
        assert!(TaskPriority::Urgent > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
        assert!(TaskPriority::Urgent.rank() < TaskPriority::Low.rank());
    }

    #[test]
    fn enum_round_trips() {
        for t in [
            "sync_products",
            "sync_orders",
            "sync_sales",
            "sync_analytics",
            "update_prices",
            "update_stocks",
            "generate_report",
            "competitor_analysis",
        ] {
            assert_eq!(TaskType::parse(t).unwrap().as_str(), t);
        }
        assert!(TaskType::parse("mystery").is_none());
        assert_eq!(TaskStatus::parse("running").unwrap(), TaskStatus::Running);
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }
}
