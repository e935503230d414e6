use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use castpulse_core::types::ThreadStatus;

use crate::db::{parse_ts, parse_ts_opt, ts, ts_opt};
use crate::error::{Result, StoreError};
use crate::models::{NewThread, RedditThreadRecord, Thread};
use crate::store::Store;

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<Thread> {
    let status_str: String = row.get("status")?;
    let status = status_str.parse::<ThreadStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("{e}").into(),
        )
    })?;
    Ok(Thread {
        id: row.get("id")?,
        reddit_id: row.get("reddit_id")?,
        subreddit: row.get("subreddit")?,
        title: row.get("title")?,
        url: row.get("url")?,
        air_time_utc: parse_ts_opt(row.get("air_time_utc")?)?,
        created_utc: parse_ts(&row.get::<_, String>("created_utc")?)?,
        status,
        total_comments: row.get("total_comments")?,
        synopsis: row.get("synopsis")?,
        last_polled_at: parse_ts_opt(row.get("last_polled_at")?)?,
        latest_comment_utc: parse_ts_opt(row.get("latest_comment_utc")?)?,
        poll_interval_seconds: row.get("poll_interval_seconds")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?)?,
    })
}

const THREAD_COLUMNS: &str = "id, reddit_id, subreddit, title, url, air_time_utc, created_utc,
     status, total_comments, synopsis, last_polled_at, latest_comment_utc,
     poll_interval_seconds, created_at, updated_at";

impl Store {
    pub fn insert_thread(&self, draft: &NewThread) -> Result<Thread> {
        let conn = self.lock();
        let now = ts(Utc::now());
        conn.execute(
            "INSERT INTO threads
             (reddit_id, subreddit, title, url, air_time_utc, created_utc, status,
              total_comments, synopsis, poll_interval_seconds, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?11)",
            params![
                draft.reddit_id,
                draft.subreddit,
                draft.title,
                draft.url,
                ts_opt(draft.air_time_utc),
                ts(draft.created_utc),
                draft.status.as_str(),
                draft.total_comments,
                draft.synopsis,
                draft.poll_interval_seconds,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.thread_by_id(id)?.ok_or(StoreError::NotFound {
            entity: "thread",
            id: id.to_string(),
        })
    }

    pub fn thread_by_id(&self, id: i64) -> Result<Option<Thread>> {
        let conn = self.lock();
        let thread = conn
            .query_row(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
                [id],
                thread_from_row,
            )
            .optional()?;
        Ok(thread)
    }

    pub fn thread_by_reddit_id(&self, reddit_id: &str) -> Result<Option<Thread>> {
        let conn = self.lock();
        let thread = conn
            .query_row(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE reddit_id = ?1"),
                [reddit_id],
                thread_from_row,
            )
            .optional()?;
        Ok(thread)
    }

    /// Write back every mutable field of an existing thread row.
    pub fn update_thread(&self, thread: &Thread) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE threads SET
                subreddit = ?1, title = ?2, url = ?3, air_time_utc = ?4,
                created_utc = ?5, status = ?6, total_comments = ?7, synopsis = ?8,
                last_polled_at = ?9, latest_comment_utc = ?10,
                poll_interval_seconds = ?11, updated_at = ?12
             WHERE id = ?13",
            params![
                thread.subreddit,
                thread.title,
                thread.url,
                ts_opt(thread.air_time_utc),
                ts(thread.created_utc),
                thread.status.as_str(),
                thread.total_comments,
                thread.synopsis,
                ts_opt(thread.last_polled_at),
                ts_opt(thread.latest_comment_utc),
                thread.poll_interval_seconds,
                ts(Utc::now()),
                thread.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "thread",
                id: thread.id.to_string(),
            });
        }
        Ok(())
    }

    /// Insert-or-refresh the raw archival row keyed by external id.
    pub fn upsert_reddit_thread(&self, record: &RedditThreadRecord) -> Result<i64> {
        let conn = self.lock();
        let now = ts(Utc::now());
        conn.execute(
            "INSERT INTO reddit_threads
             (external_id, subreddit, title, url, author, flair, score, num_comments,
              is_archived, created_utc, raw_json, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?12)
             ON CONFLICT(external_id) DO UPDATE SET
                subreddit = excluded.subreddit,
                title = excluded.title,
                url = excluded.url,
                author = excluded.author,
                flair = excluded.flair,
                score = excluded.score,
                num_comments = excluded.num_comments,
                is_archived = excluded.is_archived,
                created_utc = excluded.created_utc,
                raw_json = excluded.raw_json,
                updated_at = excluded.updated_at",
            params![
                record.external_id,
                record.subreddit,
                record.title,
                record.url,
                record.author,
                record.flair,
                record.score,
                record.num_comments,
                record.is_archived as i64,
                ts(record.created_utc),
                record.raw_json,
                now,
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM reddit_threads WHERE external_id = ?1",
            [&record.external_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draft(reddit_id: &str) -> NewThread {
        NewThread {
            reddit_id: reddit_id.to_string(),
            subreddit: Some("realitytv".to_string()),
            title: "Episode discussion".to_string(),
            url: "https://reddit.com/r/realitytv/abc".to_string(),
            air_time_utc: Some(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()),
            created_utc: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            status: ThreadStatus::Live,
            total_comments: 0,
            synopsis: None,
            poll_interval_seconds: 60,
        }
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let thread = store.insert_thread(&draft("abc123")).unwrap();
        assert_eq!(thread.reddit_id, "abc123");
        assert_eq!(thread.status, ThreadStatus::Live);

        let fetched = store.thread_by_reddit_id("abc123").unwrap().unwrap();
        assert_eq!(fetched.id, thread.id);
        assert_eq!(fetched.air_time_utc, thread.air_time_utc);
        assert!(store.thread_by_reddit_id("missing").unwrap().is_none());
    }

    #[test]
    fn update_persists_status_and_counters() {
        let store = Store::open_in_memory().unwrap();
        let mut thread = store.insert_thread(&draft("abc123")).unwrap();
        thread.status = ThreadStatus::Archived;
        thread.total_comments = 42;
        thread.latest_comment_utc = Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        store.update_thread(&thread).unwrap();

        let fetched = store.thread_by_id(thread.id).unwrap().unwrap();
        assert_eq!(fetched.status, ThreadStatus::Archived);
        assert_eq!(fetched.total_comments, 42);
        assert_eq!(fetched.latest_comment_utc, thread.latest_comment_utc);
    }

    #[test]
    fn reddit_thread_upsert_is_stable() {
        let store = Store::open_in_memory().unwrap();
        let record = RedditThreadRecord {
            external_id: "abc123".to_string(),
            subreddit: "realitytv".to_string(),
            title: "t".to_string(),
            url: "u".to_string(),
            author: Some("someone".to_string()),
            flair: None,
            score: 100,
            num_comments: 5,
            is_archived: false,
            created_utc: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            raw_json: None,
        };
        let first = store.upsert_reddit_thread(&record).unwrap();
        let second = store.upsert_reddit_thread(&record).unwrap();
        assert_eq!(first, second);
    }
}
