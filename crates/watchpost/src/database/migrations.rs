use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 1;

/// Run database migrations
///
/// Single source of truth for the schema; idempotent across restarts.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Initial schema").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: monitors, check_events, monitor_status, and regions
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            monitor_type TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL DEFAULT 60,
            enabled INTEGER NOT NULL DEFAULT 1,
            monitoring_mode TEXT NOT NULL DEFAULT 'local',
            regions TEXT NOT NULL DEFAULT '[]',
            config TEXT NOT NULL,
            validation_rules TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    // Append-only time series; this engine never updates or deletes rows.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS check_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            monitor_id INTEGER NOT NULL,
            org_id INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            monitor_type TEXT NOT NULL,
            target TEXT NOT NULL,
            region TEXT NOT NULL,
            status TEXT NOT NULL,
            response_time_ms INTEGER NOT NULL,
            status_code INTEGER,
            dns_ms INTEGER,
            tcp_ms INTEGER,
            tls_ms INTEGER,
            ttfb_ms INTEGER,
            transfer_ms INTEGER,
            headers TEXT NOT NULL DEFAULT '{}',
            body_size_bytes INTEGER,
            validation_errors TEXT NOT NULL DEFAULT '[]',
            error_message TEXT,
            error_kind TEXT,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_check_events_monitor_time
         ON check_events (monitor_id, timestamp)",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_status (
            monitor_id INTEGER PRIMARY KEY,
            state TEXT NOT NULL,
            consecutive_successes INTEGER NOT NULL DEFAULT 0,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            last_checked_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS regions (
            code TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            endpoint_url TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            healthy INTEGER NOT NULL DEFAULT 1,
            last_health_check_at INTEGER
        )",
        (),
    )
    .await?;

    Ok(())
}
