//! Out-of-process catalog scraper.
//!
//! Wildberries' public catalog sits behind anti-bot protection, so the
//! preferred ingestion path is an external scraper script driven over argv
//! and a CSV result file. The script is free to rotate proxies or drive a
//! real browser; this side only spawns it, enforces a hard deadline, and
//! reads the rows back.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::SyncError;
use crate::model::ProductRecord;
use crate::util::env as env_util;

const DEFAULT_SCRIPT: &str = "scripts/wb_catalog.py";
const DEFAULT_INTERPRETER: &str = "python3";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct ScrapeParams {
    pub url: String,
    pub category: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CatalogScraper {
    interpreter: String,
    script: PathBuf,
    timeout: Duration,
}

/// One scraped catalog row. Numeric-ish columns stay as text; scraper output
/// is best-effort and locale-formatted.
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapedProduct {
    pub name: String,
    pub price: String,
    #[serde(default)]
    pub availability: String,
    pub article: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub rating: String,
    #[serde(default)]
    pub reviews: String,
    #[serde(default)]
    pub seller: String,
    #[serde(default)]
    pub url: String,
}

impl ScrapedProduct {
    pub fn to_record(&self, account_id: Uuid) -> ProductRecord {
        ProductRecord {
            account_id,
            marketplace_product_id: self.article.clone(),
            name: self.name.clone(),
            sku: Some(self.article.clone()),
            price: parse_price(&self.price),
            stock: 0,
            category: some_nonempty(&self.category),
            brand: some_nonempty(&self.brand),
            active: true,
        }
    }
}

fn some_nonempty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse a locale-formatted price like `"1 234,56 ₽"`. Digits, commas and
/// dots survive; a lone comma is a decimal separator, otherwise commas are
/// thousands grouping.
pub fn parse_price(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    let normalized = if cleaned.contains(',') && !cleaned.contains('.') {
        cleaned.replace(',', ".")
    } else {
        cleaned.replace(',', "")
    };
    normalized.parse().unwrap_or(0.0)
}

fn looks_blocked(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("498") || lower.contains("blocked") || lower.contains("captcha")
}

impl CatalogScraper {
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            timeout,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            env_util::env_opt("SCRAPER_INTERPRETER")
                .unwrap_or_else(|| DEFAULT_INTERPRETER.to_string()),
            env_util::env_opt("SCRAPER_SCRIPT").unwrap_or_else(|| DEFAULT_SCRIPT.to_string()),
            Duration::from_secs(env_util::env_parse("SCRAPER_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)),
        )
    }

    pub fn is_available(&self) -> bool {
        self.script.exists()
    }

    pub async fn run(&self, params: &ScrapeParams) -> Result<Vec<ScrapedProduct>, SyncError> {
        let out_path = std::env::temp_dir().join(format!("catalog_{}.csv", Uuid::new_v4()));

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&self.script).arg("--url").arg(&params.url);
        if let Some(category) = &params.category {
            cmd.arg("--category").arg(category);
        }
        if let Some(limit) = params.limit {
            cmd.arg("--limit").arg(limit.to_string());
        }
        cmd.arg("--out").arg(&out_path);
        cmd.kill_on_drop(true);

        debug!(script = %self.script.display(), url = %params.url, "running catalog scraper");

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(SyncError::Network(format!("scraper spawn failed: {err}")));
            }
            Err(_) => {
                // kill_on_drop reaps the child when the output future drops.
                let _ = std::fs::remove_file(&out_path);
                return Err(SyncError::Network(format!(
                    "scraper timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        if !output.status.success() {
            let _ = std::fs::remove_file(&out_path);
            return Err(SyncError::ProviderBlocked(format!(
                "scraper exited with {}: {}",
                output.status,
                combined.trim()
            )));
        }
        if looks_blocked(&combined) {
            let _ = std::fs::remove_file(&out_path);
            return Err(SyncError::ProviderBlocked(
                "scraper reported an anti-bot block".into(),
            ));
        }

        let rows = read_catalog(&out_path);
        if let Err(err) = std::fs::remove_file(&out_path) {
            warn!(error = %err, "failed to remove scraper output file");
        }
        rows
    }
}

fn read_catalog(path: &Path) -> Result<Vec<ScrapedProduct>, SyncError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| SyncError::Validation(format!("scraper output unreadable: {e}")))?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: ScrapedProduct =
            record.map_err(|e| SyncError::Validation(format!("scraper output row: {e}")))?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::io::Write;

    #[test]
    fn price_parsing_handles_locale_formats() {
        assert_eq!(parse_price("1 234,56 ₽"), 1234.56);
        assert_eq!(parse_price("999"), 999.0);
        assert_eq!(parse_price("1,299.50"), 1299.50);
        assert_eq!(parse_price("2 490 ₽"), 2490.0);
        assert_eq!(parse_price("n/a"), 0.0);
    }

    #[test]
    fn blocked_signatures_detected() {
        assert!(looks_blocked("HTTP 498 returned"));
        assert!(looks_blocked("please solve the CAPTCHA"));
        assert!(looks_blocked("request was Blocked by WAF"));
        assert!(!looks_blocked("parsed 100 items"));
    }

    #[test]
    fn catalog_csv_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,price,availability,article,category,brand,rating,reviews,seller,url").unwrap();
        writeln!(
            file,
            "Phone X,\"34 990 ₽\",in stock,112233,Phones,Acme,4.8,120,Acme Store,https://example.test/112233"
        )
        .unwrap();
        file.flush().unwrap();

        let rows = read_catalog(file.path()).unwrap();
        assert_eq!(rows.len(), 1);
        let rec = rows[0].to_record(Uuid::new_v4());
        assert_eq!(rec.marketplace_product_id, "112233");
        assert_eq!(rec.price, 34990.0);
        assert_eq!(rec.category.as_deref(), Some("Phones"));
        assert!(rec.active);
    }

    #[tokio::test]
    async fn scraper_runs_script_and_reads_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake_scraper.sh");
        // Last argv entry is the --out path.
        std::fs::write(
            &script,
            "for a; do out=$a; done\n\
             printf 'name,price,availability,article,category,brand,rating,reviews,seller,url\\n' > \"$out\"\n\
             printf 'Case,\"1 234,56\",in stock,42,Cases,Acme,4.5,3,Shop,https://x\\n' >> \"$out\"\n",
        )
        .unwrap();

        let scraper = CatalogScraper::new("sh", &script, Duration::from_secs(30));
        assert!(scraper.is_available());
        let rows = scraper
            .run(&ScrapeParams {
                url: "https://example.test/catalog".into(),
                category: Some("Cases".into()),
                limit: Some(10),
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(parse_price(&rows[0].price), 1234.56);
    }

    #[tokio::test]
    async fn nonzero_exit_is_provider_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("blocked.sh");
        std::fs::write(&script, "echo 'captcha page encountered' >&2\nexit 1\n").unwrap();

        let scraper = CatalogScraper::new("sh", &script, Duration::from_secs(30));
        let err = scraper
            .run(&ScrapeParams {
                url: "https://example.test".into(),
                category: None,
                limit: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderBlocked);
    }

    #[test]
    fn missing_script_is_unavailable() {
        let scraper = CatalogScraper::new("python3", "/nonexistent/scraper.py", Duration::from_secs(1));
        assert!(!scraper.is_available());
    }
}
