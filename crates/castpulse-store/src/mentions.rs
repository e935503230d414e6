use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{parse_ts, ts};
use crate::error::Result;
use crate::models::{Mention, NewMention, ThreadMentionRow};
use crate::store::Store;

fn mention_from_row(row: &Row<'_>) -> rusqlite::Result<Mention> {
    Ok(Mention {
        id: row.get("id")?,
        comment_id: row.get("comment_id")?,
        comment_created_at: parse_ts(&row.get::<_, String>("comment_created_at")?)?,
        cast_member_id: row.get("cast_member_id")?,
        sentiment_label: row.get("sentiment_label")?,
        sentiment_score: row.get("sentiment_score")?,
        confidence: row.get("confidence")?,
        weight: row.get("weight")?,
        method: row.get("method")?,
        quote: row.get("quote")?,
        is_sarcastic: row.get("is_sarcastic")?,
        is_toxic: row.get("is_toxic")?,
    })
}

const MENTION_COLUMNS: &str = "id, comment_id, comment_created_at, cast_member_id, sentiment_label,
     sentiment_score, confidence, weight, method, quote, is_sarcastic, is_toxic";

impl Store {
    /// Replace the full mention set for a comment in one transaction.
    /// A concurrent reader sees either the previous set or the new one.
    pub fn replace_comment_mentions(
        &self,
        comment_id: i64,
        comment_created_at: DateTime<Utc>,
        mentions: &[NewMention],
    ) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM mentions WHERE comment_id = ?1 AND comment_created_at = ?2",
            params![comment_id, ts(comment_created_at)],
        )?;
        let now = ts(Utc::now());
        for mention in mentions {
            tx.execute(
                "INSERT INTO mentions
                 (comment_id, comment_created_at, cast_member_id, sentiment_label,
                  sentiment_score, confidence, weight, method, quote,
                  is_sarcastic, is_toxic, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?12)",
                params![
                    mention.comment_id,
                    ts(mention.comment_created_at),
                    mention.cast_member_id,
                    mention.sentiment_label,
                    mention.sentiment_score,
                    mention.confidence,
                    mention.weight,
                    mention.method,
                    mention.quote,
                    mention.is_sarcastic as i64,
                    mention.is_toxic as i64,
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn mentions_for_comment(
        &self,
        comment_id: i64,
        comment_created_at: DateTime<Utc>,
    ) -> Result<Vec<Mention>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MENTION_COLUMNS} FROM mentions
             WHERE comment_id = ?1 AND comment_created_at = ?2
             ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(
                params![comment_id, ts(comment_created_at)],
                mention_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Mention inputs for the aggregator: every mention in the thread
    /// joined with its comment's score and window, active cast only.
    pub fn mention_rows_for_thread(&self, thread_id: i64) -> Result<Vec<ThreadMentionRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT m.cast_member_id, m.sentiment_label, c.score, c.time_window, m.weight
             FROM mentions m
             JOIN comments c
               ON m.comment_id = c.id AND m.comment_created_at = c.created_at
             JOIN cast_members cm ON cm.id = m.cast_member_id
             WHERE c.thread_id = ?1 AND cm.is_active = 1",
        )?;
        let rows = stmt
            .query_map([thread_id], |row| {
                Ok(ThreadMentionRow {
                    cast_member_id: row.get(0)?,
                    sentiment_label: row.get(1)?,
                    comment_score: row.get(2)?,
                    time_window: row.get(3)?,
                    weight: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewComment, NewThread};
    use castpulse_core::types::ThreadStatus;
    use chrono::TimeZone;

    fn seed(store: &Store) -> (i64, i64, DateTime<Utc>, i64) {
        let thread_id = store
            .insert_thread(&NewThread {
                reddit_id: "abc".to_string(),
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
            .id;
        let created_at = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        let comment_id = store
            .insert_comment(&NewComment {
                thread_id,
                reddit_id: "c1".to_string(),
                author_hash: None,
                body: "Lisa owned tonight".to_string(),
                created_utc: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
                score: 10,
                parent_reddit_id: None,
                time_window: Some("live".to_string()),
                created_at,
            })
            .unwrap();
        let cast_id = store
            .insert_cast_member("lisa-barlow", "Lisa Barlow", None, "RHOSLC", true)
            .unwrap();
        (thread_id, comment_id, created_at, cast_id)
    }

    fn mention(comment_id: i64, created_at: DateTime<Utc>, cast_id: i64) -> NewMention {
        NewMention {
            comment_id,
            comment_created_at: created_at,
            cast_member_id: cast_id,
            sentiment_label: "positive".to_string(),
            sentiment_score: Some(0.54),
            confidence: Some(0.9),
            weight: Some(0.95),
            method: Some("exact".to_string()),
            quote: Some("Lisa".to_string()),
            is_sarcastic: false,
            is_toxic: false,
        }
    }

    #[test]
    fn replace_is_delete_then_insert() {
        let store = Store::open_in_memory().unwrap();
        let (_thread, comment_id, created_at, cast_id) = seed(&store);

        store
            .replace_comment_mentions(comment_id, created_at, &[mention(
                comment_id, created_at, cast_id,
            )])
            .unwrap();
        store
            .replace_comment_mentions(comment_id, created_at, &[mention(
                comment_id, created_at, cast_id,
            )])
            .unwrap();

        let mentions = store.mentions_for_comment(comment_id, created_at).unwrap();
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].cast_member_id, cast_id);
        assert_eq!(mentions[0].sentiment_score, Some(0.54));
    }

    #[test]
    fn thread_rows_join_comment_fields_and_skip_inactive_cast() {
        let store = Store::open_in_memory().unwrap();
        let (thread_id, comment_id, created_at, cast_id) = seed(&store);
        let retired = store
            .insert_cast_member("gone", "Gone Member", None, "RHOSLC", false)
            .unwrap();
        store
            .replace_comment_mentions(
                comment_id,
                created_at,
                &[
                    mention(comment_id, created_at, cast_id),
                    mention(comment_id, created_at, retired),
                ],
            )
            .unwrap();

        let rows = store.mention_rows_for_thread(thread_id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cast_member_id, cast_id);
        assert_eq!(rows[0].comment_score, 10);
        assert_eq!(rows[0].time_window.as_deref(), Some("live"));
    }
}
