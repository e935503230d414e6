use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rusqlite::{Connection, Result};

/// Months of comment partitions registered ahead on schema setup.
const PARTITION_MONTHS_AHEAD: u32 = 4;

/// Initialise the full schema. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    create_threads(conn)?;
    create_reddit_threads(conn)?;
    create_comments(conn)?;
    create_cast(conn)?;
    create_mentions(conn)?;
    create_aggregates(conn)?;
    create_alerts(conn)?;
    create_partition_registry(conn)?;
    register_partitions(conn, Utc::now())?;
    Ok(())
}

fn create_threads(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS threads (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            reddit_id             TEXT NOT NULL,
            subreddit             TEXT,
            title                 TEXT NOT NULL,
            url                   TEXT NOT NULL,
            air_time_utc          TEXT,
            created_utc           TEXT NOT NULL,
            status                TEXT NOT NULL DEFAULT 'scheduled',
            total_comments        INTEGER NOT NULL DEFAULT 0,
            synopsis              TEXT,
            last_polled_at        TEXT,
            latest_comment_utc    TEXT,
            poll_interval_seconds INTEGER NOT NULL DEFAULT 60,
            created_at            TEXT NOT NULL,
            updated_at            TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS ix_threads_reddit_id
            ON threads(reddit_id);
        CREATE INDEX IF NOT EXISTS ix_threads_status
            ON threads(status);
        CREATE INDEX IF NOT EXISTS ix_threads_air_time_utc
            ON threads(air_time_utc);",
    )
}

fn create_reddit_threads(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS reddit_threads (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id  TEXT NOT NULL,
            subreddit    TEXT NOT NULL,
            title        TEXT NOT NULL,
            url          TEXT NOT NULL,
            author       TEXT,
            flair        TEXT,
            score        INTEGER NOT NULL DEFAULT 0,
            num_comments INTEGER NOT NULL DEFAULT 0,
            is_archived  INTEGER NOT NULL DEFAULT 0,
            created_utc  TEXT NOT NULL,
            raw_json     TEXT,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS ix_reddit_threads_external_id
            ON reddit_threads(external_id);
        CREATE INDEX IF NOT EXISTS ix_reddit_threads_subreddit
            ON reddit_threads(subreddit);",
    )
}

/// Comments carry composite uniqueness so mentions can reference a row
/// by `(id, created_at)` — the shape the partitioned upstream store
/// requires of every child key.
fn create_comments(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS comments (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id           INTEGER NOT NULL
                                REFERENCES threads(id) ON DELETE CASCADE,
            reddit_id           TEXT NOT NULL,
            author_hash         TEXT,
            body                TEXT NOT NULL,
            created_utc         TEXT NOT NULL,
            score               INTEGER NOT NULL DEFAULT 0,
            parent_reddit_id    TEXT,
            reply_count         INTEGER NOT NULL DEFAULT 0,
            time_window         TEXT,
            sentiment_label     TEXT,
            sentiment_score     REAL,
            sentiment_breakdown TEXT,
            sarcasm_confidence  REAL,
            is_sarcastic        INTEGER NOT NULL DEFAULT 0,
            toxicity_confidence REAL,
            is_toxic            INTEGER NOT NULL DEFAULT 0,
            ml_model_version    TEXT,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL,
            UNIQUE(id, created_at),
            UNIQUE(reddit_id, created_at)
        );
        CREATE INDEX IF NOT EXISTS ix_comments_thread_id
            ON comments(thread_id, created_utc);
        CREATE INDEX IF NOT EXISTS ix_comments_thread_reddit
            ON comments(thread_id, reddit_id);
        CREATE INDEX IF NOT EXISTS ix_comments_time_window
            ON comments(time_window);",
    )
}

fn create_cast(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cast_members (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            slug         TEXT NOT NULL,
            full_name    TEXT NOT NULL,
            display_name TEXT,
            show         TEXT NOT NULL,
            is_active    INTEGER NOT NULL DEFAULT 1,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS ix_cast_members_slug
            ON cast_members(slug);
        CREATE INDEX IF NOT EXISTS ix_cast_members_is_active
            ON cast_members(is_active);
        CREATE TABLE IF NOT EXISTS cast_member_aliases (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            cast_member_id INTEGER NOT NULL
                           REFERENCES cast_members(id) ON DELETE CASCADE,
            alias          TEXT NOT NULL,
            created_at     TEXT NOT NULL,
            UNIQUE(cast_member_id, alias)
        );
        CREATE INDEX IF NOT EXISTS ix_cast_alias_alias
            ON cast_member_aliases(alias);",
    )
}

fn create_mentions(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS mentions (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            comment_id         INTEGER NOT NULL,
            comment_created_at TEXT NOT NULL,
            cast_member_id     INTEGER NOT NULL
                               REFERENCES cast_members(id) ON DELETE CASCADE,
            sentiment_label    TEXT NOT NULL,
            sentiment_score    REAL,
            confidence         REAL,
            weight             REAL,
            method             TEXT,
            quote              TEXT,
            is_sarcastic       INTEGER NOT NULL DEFAULT 0,
            is_toxic           INTEGER NOT NULL DEFAULT 0,
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL,
            FOREIGN KEY (comment_id, comment_created_at)
                REFERENCES comments(id, created_at) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS ix_mentions_comment_id
            ON mentions(comment_id);
        CREATE INDEX IF NOT EXISTS ix_mentions_cast_member_id
            ON mentions(cast_member_id);
        CREATE INDEX IF NOT EXISTS ix_mentions_cast_sentiment
            ON mentions(cast_member_id, sentiment_label);",
    )
}

fn create_aggregates(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS aggregates (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id       INTEGER NOT NULL
                            REFERENCES threads(id) ON DELETE CASCADE,
            cast_member_id  INTEGER NOT NULL
                            REFERENCES cast_members(id) ON DELETE CASCADE,
            time_window     TEXT NOT NULL,
            net_sentiment   REAL,
            ci_lower        REAL,
            ci_upper        REAL,
            positive_pct    REAL,
            neutral_pct     REAL,
            negative_pct    REAL,
            agreement_score REAL,
            mention_count   INTEGER NOT NULL DEFAULT 0,
            computed_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS ix_aggregates_thread_cast
            ON aggregates(thread_id, cast_member_id);
        CREATE INDEX IF NOT EXISTS ix_aggregates_time_window
            ON aggregates(time_window);",
    )
}

fn create_alerts(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS alert_rules (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            name           TEXT NOT NULL,
            description    TEXT,
            thread_id      INTEGER REFERENCES threads(id) ON DELETE CASCADE,
            cast_member_id INTEGER REFERENCES cast_members(id) ON DELETE SET NULL,
            rule_type      TEXT NOT NULL,
            condition      TEXT NOT NULL,
            is_active      INTEGER NOT NULL DEFAULT 1,
            channels       TEXT NOT NULL DEFAULT '[]',
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS ix_alert_rules_thread_active
            ON alert_rules(thread_id, is_active);
        CREATE TABLE IF NOT EXISTS alert_events (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            alert_rule_id      INTEGER NOT NULL
                               REFERENCES alert_rules(id) ON DELETE CASCADE,
            thread_id          INTEGER NOT NULL
                               REFERENCES threads(id) ON DELETE CASCADE,
            cast_member_id     INTEGER REFERENCES cast_members(id) ON DELETE SET NULL,
            triggered_at       TEXT NOT NULL,
            payload            TEXT NOT NULL,
            delivered_channels TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS ix_alert_events_rule
            ON alert_events(alert_rule_id);
        CREATE INDEX IF NOT EXISTS ix_alert_events_triggered_at
            ON alert_events(triggered_at);",
    )
}

/// Bookkeeping rows naming the month ranges comment storage spans.
/// The retention tooling prunes by month boundary; registering ahead
/// keeps inserts from outrunning the registry.
fn create_partition_registry(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS comment_partitions (
            month_start TEXT PRIMARY KEY,
            created_at  TEXT NOT NULL
        );",
    )
}

/// Register the current month plus the next `PARTITION_MONTHS_AHEAD`.
pub fn register_partitions(conn: &Connection, now: DateTime<Utc>) -> Result<()> {
    let now_str = ts(now);
    let mut year = now.year();
    let mut month = now.month();
    for _ in 0..=PARTITION_MONTHS_AHEAD {
        // First day of month is always valid.
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        conn.execute(
            "INSERT OR IGNORE INTO comment_partitions (month_start, created_at)
             VALUES (?1, ?2)",
            rusqlite::params![start, now_str],
        )?;
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    Ok(())
}

/// RFC 3339 UTC text; lexicographic order matches chronological order.
pub fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub fn ts_opt(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(ts)
}

pub fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub fn parse_ts_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(&v)).transpose()
}
