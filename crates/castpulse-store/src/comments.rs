use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use crate::db::{parse_ts, parse_ts_opt, ts};
use crate::error::Result;
use crate::models::{Comment, NewComment};
use crate::store::Store;

const COMMENT_COLUMNS: &str = "id, thread_id, reddit_id, author_hash, body, created_utc, score,
     parent_reddit_id, reply_count, time_window, sentiment_label, sentiment_score,
     sentiment_breakdown, sarcasm_confidence, is_sarcastic, toxicity_confidence,
     is_toxic, ml_model_version, created_at, updated_at";

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    let breakdown: Option<String> = row.get("sentiment_breakdown")?;
    let sentiment_breakdown = match breakdown {
        Some(raw) => Some(serde_json::from_str::<Value>(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?),
        None => None,
    };
    Ok(Comment {
        id: row.get("id")?,
        thread_id: row.get("thread_id")?,
        reddit_id: row.get("reddit_id")?,
        author_hash: row.get("author_hash")?,
        body: row.get("body")?,
        created_utc: parse_ts(&row.get::<_, String>("created_utc")?)?,
        score: row.get("score")?,
        parent_reddit_id: row.get("parent_reddit_id")?,
        reply_count: row.get("reply_count")?,
        time_window: row.get("time_window")?,
        sentiment_label: row.get("sentiment_label")?,
        sentiment_score: row.get("sentiment_score")?,
        sentiment_breakdown,
        sarcasm_confidence: row.get("sarcasm_confidence")?,
        is_sarcastic: row.get("is_sarcastic")?,
        toxicity_confidence: row.get("toxicity_confidence")?,
        is_toxic: row.get("is_toxic")?,
        ml_model_version: row.get("ml_model_version")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?)?,
    })
}

/// Build a `?1,?2,…` placeholder list of the given length.
fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(",")
}

impl Store {
    pub fn insert_comment(&self, draft: &NewComment) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO comments
             (thread_id, reddit_id, author_hash, body, created_utc, score,
              parent_reddit_id, time_window, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?9)",
            params![
                draft.thread_id,
                draft.reddit_id,
                draft.author_hash,
                draft.body,
                ts(draft.created_utc),
                draft.score,
                draft.parent_reddit_id,
                draft.time_window,
                ts(draft.created_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn comment_by_id(&self, id: i64) -> Result<Option<Comment>> {
        let conn = self.lock();
        let comment = conn
            .query_row(
                &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1"),
                [id],
                comment_from_row,
            )
            .optional()?;
        Ok(comment)
    }

    pub fn comments_by_ids(&self, ids: &[i64]) -> Result<Vec<Comment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock();
        let sql = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE id IN ({}) ORDER BY id",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), comment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Existing comments for a thread restricted to the given reddit ids.
    pub fn comments_by_thread_and_reddit_ids(
        &self,
        thread_id: i64,
        reddit_ids: &[String],
    ) -> Result<Vec<Comment>> {
        if reddit_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock();
        let sql = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments
             WHERE thread_id = ?1 AND reddit_id IN ({})",
            (2..=reddit_ids.len() + 1)
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(",")
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut bindings: Vec<&dyn rusqlite::ToSql> = vec![&thread_id];
        for id in reddit_ids {
            bindings.push(id);
        }
        let rows = stmt
            .query_map(&bindings[..], comment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Most recent comment row for a reddit id within a thread. Used by
    /// parent-context inheritance.
    pub fn comment_by_thread_and_reddit_id(
        &self,
        thread_id: i64,
        reddit_id: &str,
    ) -> Result<Option<Comment>> {
        let conn = self.lock();
        let comment = conn
            .query_row(
                &format!(
                    "SELECT {COMMENT_COLUMNS} FROM comments
                     WHERE thread_id = ?1 AND reddit_id = ?2
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![thread_id, reddit_id],
                comment_from_row,
            )
            .optional()?;
        Ok(comment)
    }

    pub fn count_comments_for_thread(&self, thread_id: i64) -> Result<i64> {
        let conn = self.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM comments WHERE thread_id = ?1",
            [thread_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Write back the fields the ingestion upsert path may change.
    pub fn update_comment_ingest_fields(&self, comment: &Comment) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE comments SET
                author_hash = ?1, body = ?2, score = ?3, parent_reddit_id = ?4,
                time_window = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                comment.author_hash,
                comment.body,
                comment.score,
                comment.parent_reddit_id,
                comment.time_window,
                ts(Utc::now()),
                comment.id,
            ],
        )?;
        Ok(())
    }

    /// Bump an ancestor's reply counter and, when the reply is newer,
    /// its activity stamp.
    pub fn bump_comment_replies(
        &self,
        comment_id: i64,
        increment: i64,
        activity: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE comments SET reply_count = reply_count + ?1 WHERE id = ?2",
            params![increment, comment_id],
        )?;
        if let Some(at) = activity {
            conn.execute(
                "UPDATE comments SET updated_at = ?1
                 WHERE id = ?2 AND updated_at < ?1",
                params![ts(at), comment_id],
            )?;
        }
        Ok(())
    }

    /// Classifier write-back: label, score, per-model breakdown and the
    /// model version stamp. Sarcasm/toxicity fields reset alongside.
    pub fn update_comment_sentiment(
        &self,
        comment_id: i64,
        sentiment_label: &str,
        sentiment_score: f64,
        breakdown: &Value,
        model_version: &str,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE comments SET
                sentiment_label = ?1, sentiment_score = ?2, sentiment_breakdown = ?3,
                sarcasm_confidence = NULL, is_sarcastic = 0,
                toxicity_confidence = NULL, is_toxic = 0,
                ml_model_version = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                sentiment_label,
                sentiment_score,
                serde_json::to_string(breakdown)?,
                model_version,
                ts(Utc::now()),
                comment_id,
            ],
        )?;
        Ok(())
    }

    /// Write-back for the external sarcasm/toxicity signals the
    /// attenuation step consumes.
    pub fn set_comment_signals(
        &self,
        comment_id: i64,
        is_sarcastic: bool,
        sarcasm_confidence: Option<f64>,
        is_toxic: bool,
        toxicity_confidence: Option<f64>,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE comments SET
                is_sarcastic = ?1, sarcasm_confidence = ?2,
                is_toxic = ?3, toxicity_confidence = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                is_sarcastic as i64,
                sarcasm_confidence,
                is_toxic as i64,
                toxicity_confidence,
                ts(Utc::now()),
                comment_id,
            ],
        )?;
        Ok(())
    }

    /// Latest comment timestamp for a thread, if any.
    pub fn latest_comment_utc(&self, thread_id: i64) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock();
        let raw: Option<String> = conn.query_row(
            "SELECT MAX(created_utc) FROM comments WHERE thread_id = ?1",
            [thread_id],
            |row| row.get(0),
        )?;
        parse_ts_opt(raw).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewThread;
    use castpulse_core::types::ThreadStatus;
    use chrono::TimeZone;

    fn seed_thread(store: &Store) -> i64 {
        store
            .insert_thread(&NewThread {
                reddit_id: "abc123".to_string(),
                subreddit: None,
                title: "t".to_string(),
                url: "u".to_string(),
                air_time_utc: None,
                created_utc: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                status: ThreadStatus::Live,
                total_comments: 0,
                synopsis: None,
                poll_interval_seconds: 60,
            })
            .unwrap()
            .id
    }

    fn draft(thread_id: i64, reddit_id: &str, minute: u32) -> NewComment {
        NewComment {
            thread_id,
            reddit_id: reddit_id.to_string(),
            author_hash: None,
            body: format!("body of {reddit_id}"),
            created_utc: Utc.with_ymd_and_hms(2024, 1, 1, 1, minute, 0).unwrap(),
            score: 3,
            parent_reddit_id: None,
            time_window: Some("live".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_fetch_and_count() {
        let store = Store::open_in_memory().unwrap();
        let thread_id = seed_thread(&store);
        let id1 = store.insert_comment(&draft(thread_id, "c1", 1)).unwrap();
        let id2 = store.insert_comment(&draft(thread_id, "c2", 2)).unwrap();

        assert_eq!(store.count_comments_for_thread(thread_id).unwrap(), 2);
        let comments = store.comments_by_ids(&[id1, id2]).unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].reddit_id, "c1");

        let existing = store
            .comments_by_thread_and_reddit_ids(thread_id, &["c2".to_string()])
            .unwrap();
        assert_eq!(existing.len(), 1);
        assert_eq!(existing[0].id, id2);
    }

    #[test]
    fn latest_comment_tracks_max_created_utc() {
        let store = Store::open_in_memory().unwrap();
        let thread_id = seed_thread(&store);
        assert!(store.latest_comment_utc(thread_id).unwrap().is_none());
        store.insert_comment(&draft(thread_id, "c1", 5)).unwrap();
        store.insert_comment(&draft(thread_id, "c2", 9)).unwrap();
        assert_eq!(
            store.latest_comment_utc(thread_id).unwrap().unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 9, 0).unwrap()
        );
    }

    #[test]
    fn sentiment_write_back_resets_flags() {
        let store = Store::open_in_memory().unwrap();
        let thread_id = seed_thread(&store);
        let id = store.insert_comment(&draft(thread_id, "c1", 1)).unwrap();
        let breakdown = serde_json::json!({"models": [], "combined_score": 0.9});
        store
            .update_comment_sentiment(id, "positive", 0.9, &breakdown, "m1")
            .unwrap();

        let comment = store.comment_by_id(id).unwrap().unwrap();
        assert_eq!(comment.sentiment_label.as_deref(), Some("positive"));
        assert_eq!(comment.sentiment_score, Some(0.9));
        assert!(!comment.is_sarcastic);
        assert_eq!(comment.ml_model_version.as_deref(), Some("m1"));
        assert_eq!(comment.sentiment_breakdown.unwrap()["combined_score"], 0.9);
    }

    #[test]
    fn reply_bump_updates_count_and_activity() {
        let store = Store::open_in_memory().unwrap();
        let thread_id = seed_thread(&store);
        let id = store.insert_comment(&draft(thread_id, "c1", 1)).unwrap();
        let later = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        store.bump_comment_replies(id, 2, Some(later)).unwrap();

        let comment = store.comment_by_id(id).unwrap().unwrap();
        assert_eq!(comment.reply_count, 2);
        assert_eq!(comment.updated_at, later);
    }
}
