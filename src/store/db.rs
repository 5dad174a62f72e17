//! Postgres pool wrapper with an optional file-based migration runner.

use anyhow::Result;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, Row,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let use_prepared = crate::util::env::env_flag("USE_PREPARED", false);
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !use_prepared {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");

        if crate::util::env::env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on)");
            Self::run_migrations(&pool).await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(Self { pool })
    }

    /// Apply pending `migrations/*.sql` files in filename order, tracking the
    /// numeric prefix as the applied version. Uses `raw_sql` throughout so it
    /// works under PgBouncer without prepared statements.
    async fn run_migrations(pool: &PgPool) -> Result<()> {
        use std::{fs, path::Path};
        let dir = Path::new("./migrations");
        if !dir.exists() {
            return Ok(());
        }
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _schema_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT,
                installed_at TIMESTAMPTZ DEFAULT now()
             )",
        )
        .execute(pool)
        .await?;
        let applied: Vec<i64> = sqlx::raw_sql("SELECT version FROM _schema_migrations")
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|row| row.get::<i64, _>(0))
            .collect();

        let mut entries: Vec<_> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == "sql").unwrap_or(false))
            .collect();
        entries.sort();

        for path in entries {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let version: i64 = name
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0);
            if version == 0 || applied.contains(&version) {
                continue;
            }
            let sql = fs::read_to_string(&path)?;
            sqlx::raw_sql(&sql).execute(pool).await?;
            sqlx::query("INSERT INTO _schema_migrations (version, description) VALUES ($1, $2)")
                .persistent(false)
                .bind(version)
                .bind(&name)
                .execute(pool)
                .await?;
            info!(migration = %name, "applied migration");
        }
        Ok(())
    }
}
