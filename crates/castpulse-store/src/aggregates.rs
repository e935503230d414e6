use chrono::Utc;
use rusqlite::{params, Row};

use crate::db::{parse_ts, ts};
use crate::error::Result;
use crate::models::{Aggregate, AggregateRow};
use crate::store::Store;

fn aggregate_from_row(row: &Row<'_>) -> rusqlite::Result<Aggregate> {
    Ok(Aggregate {
        id: row.get("id")?,
        thread_id: row.get("thread_id")?,
        cast_member_id: row.get("cast_member_id")?,
        time_window: row.get("time_window")?,
        net_sentiment: row.get("net_sentiment")?,
        ci_lower: row.get("ci_lower")?,
        ci_upper: row.get("ci_upper")?,
        positive_pct: row.get("positive_pct")?,
        neutral_pct: row.get("neutral_pct")?,
        negative_pct: row.get("negative_pct")?,
        agreement_score: row.get("agreement_score")?,
        mention_count: row.get("mention_count")?,
        computed_at: parse_ts(&row.get::<_, String>("computed_at")?)?,
    })
}

impl Store {
    /// Full rewrite of a thread's aggregates: delete everything, insert
    /// the new rows, one transaction. Readers see old or new, never a mix.
    pub fn replace_aggregates(&self, thread_id: i64, rows: &[AggregateRow]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM aggregates WHERE thread_id = ?1", [thread_id])?;
        let computed_at = ts(Utc::now());
        for row in rows {
            tx.execute(
                "INSERT INTO aggregates
                 (thread_id, cast_member_id, time_window, net_sentiment, ci_lower,
                  ci_upper, positive_pct, neutral_pct, negative_pct, agreement_score,
                  mention_count, computed_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
                params![
                    row.thread_id,
                    row.cast_member_id,
                    row.time_window,
                    row.net_sentiment,
                    row.ci_lower,
                    row.ci_upper,
                    row.positive_pct,
                    row.neutral_pct,
                    row.negative_pct,
                    row.agreement_score,
                    row.mention_count,
                    computed_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn aggregates_for_thread(&self, thread_id: i64) -> Result<Vec<Aggregate>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, thread_id, cast_member_id, time_window, net_sentiment, ci_lower,
                    ci_upper, positive_pct, neutral_pct, negative_pct, agreement_score,
                    mention_count, computed_at
             FROM aggregates WHERE thread_id = ?1
             ORDER BY cast_member_id, time_window",
        )?;
        let rows = stmt
            .query_map([thread_id], aggregate_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
