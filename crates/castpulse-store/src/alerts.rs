use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use crate::db::{parse_ts, ts};
use crate::error::{Result, StoreError};
use crate::models::{AlertEvent, AlertRule, NewAlertEvent, NewAlertRule};
use crate::store::Store;

fn json_column(raw: String) -> rusqlite::Result<Value> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn string_list_column(raw: String) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<AlertRule> {
    Ok(AlertRule {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        thread_id: row.get("thread_id")?,
        cast_member_id: row.get("cast_member_id")?,
        rule_type: row.get("rule_type")?,
        condition: json_column(row.get("condition")?)?,
        is_active: row.get("is_active")?,
        channels: string_list_column(row.get("channels")?)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<AlertEvent> {
    Ok(AlertEvent {
        id: row.get("id")?,
        alert_rule_id: row.get("alert_rule_id")?,
        thread_id: row.get("thread_id")?,
        cast_member_id: row.get("cast_member_id")?,
        triggered_at: parse_ts(&row.get::<_, String>("triggered_at")?)?,
        payload: json_column(row.get("payload")?)?,
        delivered_channels: string_list_column(row.get("delivered_channels")?)?,
    })
}

const RULE_COLUMNS: &str = "id, name, description, thread_id, cast_member_id, rule_type,
     condition, is_active, channels";
const EVENT_COLUMNS: &str =
    "id, alert_rule_id, thread_id, cast_member_id, triggered_at, payload, delivered_channels";

impl Store {
    pub fn insert_alert_rule(&self, draft: &NewAlertRule) -> Result<AlertRule> {
        let conn = self.lock();
        let now = ts(Utc::now());
        conn.execute(
            "INSERT INTO alert_rules
             (name, description, thread_id, cast_member_id, rule_type, condition,
              is_active, channels, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?9)",
            params![
                draft.name,
                draft.description,
                draft.thread_id,
                draft.cast_member_id,
                draft.rule_type,
                serde_json::to_string(&draft.condition)?,
                draft.is_active as i64,
                serde_json::to_string(&draft.channels)?,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.alert_rule_by_id(id)?.ok_or(StoreError::NotFound {
            entity: "alert rule",
            id: id.to_string(),
        })
    }

    pub fn alert_rule_by_id(&self, id: i64) -> Result<Option<AlertRule>> {
        let conn = self.lock();
        let rule = conn
            .query_row(
                &format!("SELECT {RULE_COLUMNS} FROM alert_rules WHERE id = ?1"),
                [id],
                rule_from_row,
            )
            .optional()?;
        Ok(rule)
    }

    /// Active rules scoped to the thread plus globals (NULL thread_id).
    pub fn active_rules_for_thread(&self, thread_id: i64) -> Result<Vec<AlertRule>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM alert_rules
             WHERE is_active = 1 AND (thread_id = ?1 OR thread_id IS NULL)
             ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([thread_id], rule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn insert_alert_event(&self, draft: &NewAlertEvent) -> Result<AlertEvent> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO alert_events
             (alert_rule_id, thread_id, cast_member_id, triggered_at, payload,
              delivered_channels)
             VALUES (?1,?2,?3,?4,?5,'[]')",
            params![
                draft.alert_rule_id,
                draft.thread_id,
                draft.cast_member_id,
                ts(Utc::now()),
                serde_json::to_string(&draft.payload)?,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.alert_event_by_id(id)?.ok_or(StoreError::NotFound {
            entity: "alert event",
            id: id.to_string(),
        })
    }

    pub fn alert_event_by_id(&self, id: i64) -> Result<Option<AlertEvent>> {
        let conn = self.lock();
        let event = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM alert_events WHERE id = ?1"),
                [id],
                event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    /// Most recent event for a rule — the duplicate-suppression anchor.
    pub fn latest_event_for_rule(&self, alert_rule_id: i64) -> Result<Option<AlertEvent>> {
        let conn = self.lock();
        let event = conn
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM alert_events
                     WHERE alert_rule_id = ?1
                     ORDER BY triggered_at DESC, id DESC LIMIT 1"
                ),
                [alert_rule_id],
                event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    pub fn update_event_delivered_channels(&self, event_id: i64, channels: &[String]) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE alert_events SET delivered_channels = ?1 WHERE id = ?2",
            params![serde_json::to_string(channels)?, event_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewThread;
    use castpulse_core::types::ThreadStatus;
    use chrono::TimeZone;
    use serde_json::json;

    fn seed_thread(store: &Store) -> i64 {
        store
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
            .id
    }

    fn rule(thread_id: Option<i64>) -> NewAlertRule {
        NewAlertRule {
            name: "drop".to_string(),
            description: None,
            thread_id,
            cast_member_id: None,
            rule_type: "sentiment_drop".to_string(),
            condition: json!({"window": "live", "threshold": -0.4}),
            is_active: true,
            channels: vec!["slack".to_string()],
        }
    }

    #[test]
    fn global_rules_match_every_thread() {
        let store = Store::open_in_memory().unwrap();
        let thread_id = seed_thread(&store);
        store.insert_alert_rule(&rule(None)).unwrap();
        store.insert_alert_rule(&rule(Some(thread_id))).unwrap();

        let rules = store.active_rules_for_thread(thread_id).unwrap();
        assert_eq!(rules.len(), 2);
        let rules_other = store.active_rules_for_thread(thread_id + 100).unwrap();
        assert_eq!(rules_other.len(), 1);
        assert!(rules_other[0].thread_id.is_none());
    }

    #[test]
    fn latest_event_and_delivery_merge() {
        let store = Store::open_in_memory().unwrap();
        let thread_id = seed_thread(&store);
        let rule = store.insert_alert_rule(&rule(Some(thread_id))).unwrap();

        assert!(store.latest_event_for_rule(rule.id).unwrap().is_none());
        let first = store
            .insert_alert_event(&NewAlertEvent {
                alert_rule_id: rule.id,
                thread_id,
                cast_member_id: None,
                payload: json!({"value": -0.5}),
            })
            .unwrap();
        let second = store
            .insert_alert_event(&NewAlertEvent {
                alert_rule_id: rule.id,
                thread_id,
                cast_member_id: None,
                payload: json!({"value": -0.7}),
            })
            .unwrap();

        let latest = store.latest_event_for_rule(rule.id).unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert!(latest.delivered_channels.is_empty());

        store
            .update_event_delivered_channels(first.id, &["email".to_string(), "slack".to_string()])
            .unwrap();
        let updated = store.alert_event_by_id(first.id).unwrap().unwrap();
        assert_eq!(updated.delivered_channels, vec!["email", "slack"]);
    }
}
