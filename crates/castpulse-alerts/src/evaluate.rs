use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::{info, warn};

use castpulse_core::types::Comparison;
use castpulse_store::models::{AlertEvent, AlertRule, NewAlertEvent};
use castpulse_store::Store;

use crate::error::{AlertError, Result};

/// The payload fields that identify an alert occurrence; a new event
/// matching its rule's latest event on all of them is suppressed.
const DUPLICATE_KEYS: &[&str] = &["window", "metric", "cast_member_id", "value", "delta"];

#[derive(Debug, Clone)]
struct MetricSnapshot {
    net_sentiment: Option<f64>,
    mention_count: i64,
}

/// Evaluate alert rules for a thread against its precomputed aggregates.
pub struct AlertEvaluationService {
    store: Store,
}

impl AlertEvaluationService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Run every active rule (thread-scoped plus global) and insert an
    /// event per fresh trigger. Misconfigured rules are skipped with a
    /// warning; evaluation never aborts on one bad rule.
    pub fn evaluate_thread(&self, thread_id: i64) -> Result<Vec<AlertEvent>> {
        let rules = self.store.active_rules_for_thread(thread_id)?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let metrics = self.collect_metrics(thread_id)?;
        let mut triggered = Vec::new();

        for rule in rules {
            let payload = match self.evaluate_rule(&rule, &metrics) {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(AlertError::Config(reason)) => {
                    warn!(rule_id = rule.id, "skipping alert rule: {reason}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if self.is_duplicate(rule.id, &payload)? {
                continue;
            }

            let cast_member_id = payload
                .get("cast_member_id")
                .and_then(Value::as_i64);
            let event = self.store.insert_alert_event(&NewAlertEvent {
                alert_rule_id: rule.id,
                thread_id,
                cast_member_id,
                payload,
            })?;
            info!(rule_id = rule.id, event_id = event.id, "alert triggered");
            triggered.push(event);
        }

        Ok(triggered)
    }

    fn collect_metrics(&self, thread_id: i64) -> Result<HashMap<(i64, String), MetricSnapshot>> {
        let mut snapshots = HashMap::new();
        for aggregate in self.store.aggregates_for_thread(thread_id)? {
            snapshots.insert(
                (aggregate.cast_member_id, aggregate.time_window.clone()),
                MetricSnapshot {
                    net_sentiment: aggregate.net_sentiment,
                    mention_count: aggregate.mention_count,
                },
            );
        }
        Ok(snapshots)
    }

    fn evaluate_rule(
        &self,
        rule: &AlertRule,
        metrics: &HashMap<(i64, String), MetricSnapshot>,
    ) -> Result<Option<Value>> {
        if rule.rule_type != "sentiment_drop" {
            return Err(AlertError::Config(format!(
                "unsupported rule type: {}",
                rule.rule_type
            )));
        }

        let condition = &rule.condition;
        let metric_name = condition
            .get("metric")
            .and_then(Value::as_str)
            .unwrap_or("net_sentiment")
            .to_string();
        let comparison_raw = condition
            .get("comparison")
            .and_then(Value::as_str)
            .unwrap_or("lte");
        let window = condition
            .get("window")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AlertError::Config("sentiment_drop rule requires 'threshold' and 'window'".into())
            })?
            .to_string();
        let threshold = condition
            .get("threshold")
            .and_then(Value::as_f64)
            .ok_or_else(|| AlertError::Config("threshold must be numeric".into()))?;
        let baseline_window = condition
            .get("baseline_window")
            .and_then(Value::as_str)
            .map(String::from);

        let cast_member_id = condition
            .get("cast_member_id")
            .and_then(Value::as_i64)
            .or(rule.cast_member_id)
            .ok_or_else(|| {
                AlertError::Config("sentiment_drop rule requires cast_member_id".into())
            })?;

        let Some(snapshot) = metrics.get(&(cast_member_id, window.clone())) else {
            return Ok(None);
        };
        let Some(value) = extract_metric(snapshot, &metric_name)? else {
            return Ok(None);
        };

        let mut payload = json!({
            "rule_type": rule.rule_type,
            "metric": metric_name,
            "window": window,
            "cast_member_id": cast_member_id,
            "threshold": threshold,
            "value": value,
        });

        let triggered = if let Some(baseline_window) = baseline_window {
            let Some(baseline_snapshot) = metrics.get(&(cast_member_id, baseline_window.clone()))
            else {
                return Ok(None);
            };
            let Some(baseline_value) = extract_metric(baseline_snapshot, &metric_name)? else {
                return Ok(None);
            };
            let delta = value - baseline_value;
            payload["baseline_window"] = json!(baseline_window);
            payload["baseline_value"] = json!(baseline_value);
            payload["delta"] = json!(delta);
            // Unknown comparisons default to lte on the delta path.
            let comparison = comparison_raw.parse::<Comparison>().unwrap_or(Comparison::Lte);
            comparison.evaluate(delta, threshold)
        } else {
            let comparison = comparison_raw.parse::<Comparison>().map_err(|_| {
                AlertError::Config(format!("unsupported comparison operator: {comparison_raw}"))
            })?;
            comparison.evaluate(value, threshold)
        };

        Ok(triggered.then_some(payload))
    }

    fn is_duplicate(&self, alert_rule_id: i64, payload: &Value) -> Result<bool> {
        let Some(last_event) = self.store.latest_event_for_rule(alert_rule_id)? else {
            return Ok(false);
        };
        let last_payload = &last_event.payload;
        Ok(DUPLICATE_KEYS
            .iter()
            .all(|key| last_payload.get(key) == payload.get(key)))
    }
}

fn extract_metric(snapshot: &MetricSnapshot, metric_name: &str) -> Result<Option<f64>> {
    match metric_name {
        "net_sentiment" => Ok(snapshot.net_sentiment),
        "mention_count" => Ok(Some(snapshot.mention_count as f64)),
        other => Err(AlertError::Config(format!("unsupported metric: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castpulse_core::types::ThreadStatus;
    use castpulse_store::models::{AggregateRow, NewAlertRule, NewThread};
    use chrono::{TimeZone, Utc};

    fn seed(store: &Store) -> (i64, i64) {
        let thread_id = store
            .insert_thread(&NewThread {
                reddit_id: "abc".to_string(),
                subreddit: None,
                title: "Episode thread".to_string(),
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
        let cast_id = store
            .insert_cast_member("lisa-barlow", "Lisa Barlow", None, "RHOSLC", true)
            .unwrap();
        (thread_id, cast_id)
    }

    fn aggregate(thread_id: i64, cast_id: i64, window: &str, net: f64, count: i64) -> AggregateRow {
        AggregateRow {
            thread_id,
            cast_member_id: cast_id,
            time_window: window.to_string(),
            net_sentiment: net,
            ci_lower: net,
            ci_upper: net,
            positive_pct: 0.0,
            neutral_pct: 0.0,
            negative_pct: 0.0,
            agreement_score: 1.0,
            mention_count: count,
        }
    }

    fn rule(
        store: &Store,
        thread_id: i64,
        cast_id: Option<i64>,
        condition: Value,
    ) -> castpulse_store::models::AlertRule {
        store
            .insert_alert_rule(&NewAlertRule {
                name: "drop watch".to_string(),
                description: None,
                thread_id: Some(thread_id),
                cast_member_id: cast_id,
                rule_type: "sentiment_drop".to_string(),
                condition,
                is_active: true,
                channels: vec!["slack".to_string()],
            })
            .unwrap()
    }

    #[test]
    fn baseline_delta_triggers_once() {
        let store = Store::open_in_memory().unwrap();
        let (thread_id, cast_id) = seed(&store);
        store
            .replace_aggregates(
                thread_id,
                &[
                    aggregate(thread_id, cast_id, "overall", 0.2, 10),
                    aggregate(thread_id, cast_id, "live", -0.4, 4),
                ],
            )
            .unwrap();
        rule(
            &store,
            thread_id,
            Some(cast_id),
            json!({
                "metric": "net_sentiment",
                "window": "live",
                "baseline_window": "overall",
                "comparison": "lt",
                "threshold": -0.4,
            }),
        );

        let service = AlertEvaluationService::new(store.clone());
        let events = service.evaluate_thread(thread_id).unwrap();

        assert_eq!(events.len(), 1);
        let payload = &events[0].payload;
        assert!((payload["delta"].as_f64().unwrap() - (-0.6)).abs() < 1e-9);
        assert!((payload["baseline_value"].as_f64().unwrap() - 0.2).abs() < 1e-9);
        assert_eq!(payload["window"], "live");
        assert_eq!(events[0].cast_member_id, Some(cast_id));

        // Unchanged data produces no second event.
        let repeat = service.evaluate_thread(thread_id).unwrap();
        assert!(repeat.is_empty());
    }

    #[test]
    fn changed_value_breaks_suppression() {
        let store = Store::open_in_memory().unwrap();
        let (thread_id, cast_id) = seed(&store);
        store
            .replace_aggregates(thread_id, &[aggregate(thread_id, cast_id, "live", -0.5, 4)])
            .unwrap();
        rule(
            &store,
            thread_id,
            Some(cast_id),
            json!({"window": "live", "threshold": -0.4}),
        );

        let service = AlertEvaluationService::new(store.clone());
        assert_eq!(service.evaluate_thread(thread_id).unwrap().len(), 1);
        assert!(service.evaluate_thread(thread_id).unwrap().is_empty());

        store
            .replace_aggregates(thread_id, &[aggregate(thread_id, cast_id, "live", -0.7, 5)])
            .unwrap();
        assert_eq!(service.evaluate_thread(thread_id).unwrap().len(), 1);
    }

    #[test]
    fn default_comparison_is_lte_on_value() {
        let store = Store::open_in_memory().unwrap();
        let (thread_id, cast_id) = seed(&store);
        store
            .replace_aggregates(thread_id, &[aggregate(thread_id, cast_id, "live", -0.4, 4)])
            .unwrap();
        rule(
            &store,
            thread_id,
            Some(cast_id),
            json!({"window": "live", "threshold": -0.4}),
        );

        let events = AlertEvaluationService::new(store.clone())
            .evaluate_thread(thread_id)
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn mention_count_metric_with_gte() {
        let store = Store::open_in_memory().unwrap();
        let (thread_id, cast_id) = seed(&store);
        store
            .replace_aggregates(thread_id, &[aggregate(thread_id, cast_id, "overall", 0.1, 25)])
            .unwrap();
        rule(
            &store,
            thread_id,
            Some(cast_id),
            json!({"metric": "mention_count", "window": "overall", "comparison": "gte", "threshold": 20}),
        );

        let events = AlertEvaluationService::new(store.clone())
            .evaluate_thread(thread_id)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["value"], json!(25.0));
    }

    #[test]
    fn misconfigured_rules_are_skipped_not_fatal() {
        let store = Store::open_in_memory().unwrap();
        let (thread_id, cast_id) = seed(&store);
        store
            .replace_aggregates(thread_id, &[aggregate(thread_id, cast_id, "live", -0.5, 4)])
            .unwrap();
        // Missing window: config error, skipped.
        rule(&store, thread_id, Some(cast_id), json!({"threshold": -0.4}));
        // Missing cast: config error, skipped.
        rule(&store, thread_id, None, json!({"window": "live", "threshold": -0.4}));
        // Valid rule still fires.
        rule(
            &store,
            thread_id,
            Some(cast_id),
            json!({"window": "live", "threshold": -0.4}),
        );

        let events = AlertEvaluationService::new(store.clone())
            .evaluate_thread(thread_id)
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn missing_window_snapshot_is_no_trigger() {
        let store = Store::open_in_memory().unwrap();
        let (thread_id, cast_id) = seed(&store);
        rule(
            &store,
            thread_id,
            Some(cast_id),
            json!({"window": "live", "threshold": -0.4}),
        );
        let events = AlertEvaluationService::new(store.clone())
            .evaluate_thread(thread_id)
            .unwrap();
        assert!(events.is_empty());
    }
}
