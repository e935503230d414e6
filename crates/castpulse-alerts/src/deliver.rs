use std::collections::BTreeSet;

use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{json, Value};
use tracing::{info, warn};

use castpulse_core::config::NotificationsConfig;
use castpulse_store::models::{AlertEvent, AlertRule};
use castpulse_store::Store;

use crate::error::Result;

/// Webhook poster for the chat channel. Success is any 2xx response.
pub struct SlackNotifier {
    http: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url,
        }
    }

    pub async fn send(&self, text: &str, blocks: Option<&Value>) -> bool {
        let Some(webhook_url) = &self.webhook_url else {
            info!("Slack webhook not configured; skipping alert delivery");
            return false;
        };

        let mut payload = json!({ "text": text });
        if let Some(blocks) = blocks {
            payload["blocks"] = blocks.clone();
        }

        match self.http.post(webhook_url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("Slack delivery failed with status {}", response.status());
                false
            }
            Err(e) => {
                warn!("Slack delivery failed: {e}");
                false
            }
        }
    }
}

/// SMTP sender for the email channel.
pub struct EmailNotifier {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from_email: Option<String>,
    from_name: String,
}

impl EmailNotifier {
    pub fn new(config: &NotificationsConfig) -> Self {
        let transport = match (&config.smtp_host, &config.smtp_username, &config.smtp_password) {
            (Some(host), Some(username), Some(password)) => {
                match AsyncSmtpTransport::<Tokio1Executor>::relay(host) {
                    Ok(builder) => Some(
                        builder
                            .credentials(Credentials::new(username.clone(), password.clone()))
                            .build(),
                    ),
                    Err(e) => {
                        warn!("invalid SMTP relay {host}: {e}");
                        None
                    }
                }
            }
            _ => None,
        };
        Self {
            transport,
            from_email: config.from_email.clone(),
            from_name: config
                .from_name
                .clone()
                .unwrap_or_else(|| "Castpulse".to_string()),
        }
    }

    pub async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        html_body: &str,
        plain_body: &str,
    ) -> bool {
        let (Some(transport), Some(from_email)) = (&self.transport, &self.from_email) else {
            info!("email transport not configured; skipping alert delivery");
            return false;
        };
        if recipients.is_empty() {
            info!("no email recipients; skipping alert delivery");
            return false;
        }

        let from: Mailbox = match format!("{} <{}>", self.from_name, from_email).parse() {
            Ok(mailbox) => mailbox,
            Err(e) => {
                warn!("invalid from address {from_email}: {e}");
                return false;
            }
        };

        let mut builder = Message::builder().from(from).subject(subject);
        let mut any_recipient = false;
        for recipient in recipients {
            match recipient.parse::<Mailbox>() {
                Ok(mailbox) => {
                    builder = builder.to(mailbox);
                    any_recipient = true;
                }
                Err(e) => warn!("skipping invalid recipient {recipient}: {e}"),
            }
        }
        if !any_recipient {
            return false;
        }

        let message = match builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(plain_body.to_string()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html_body.to_string()),
                ),
        ) {
            Ok(message) => message,
            Err(e) => {
                warn!("failed to build alert email: {e}");
                return false;
            }
        };

        match transport.send(message).await {
            Ok(_) => true,
            Err(e) => {
                warn!("email delivery failed: {e}");
                false
            }
        }
    }
}

struct AlertSummary {
    subject: String,
    plain: String,
    html: String,
    slack_text: String,
    slack_blocks: Value,
}

/// Dispatch alert events to the rule's channels and record what
/// actually went out. Delivery is single-try: failures are logged and
/// the event's channel set simply doesn't grow.
pub struct AlertDeliveryService {
    store: Store,
    slack: SlackNotifier,
    email: EmailNotifier,
    fallback_recipient: Option<String>,
}

impl AlertDeliveryService {
    pub fn new(store: Store, config: &NotificationsConfig) -> Self {
        Self {
            store,
            slack: SlackNotifier::new(config.slack_webhook_url.clone()),
            email: EmailNotifier::new(config),
            fallback_recipient: config.from_email.clone(),
        }
    }

    pub async fn deliver(&self, event: &AlertEvent) -> Result<Vec<String>> {
        let Some(rule) = self.store.alert_rule_by_id(event.alert_rule_id)? else {
            warn!(event_id = event.id, "alert event has no rule; skipping delivery");
            return Ok(Vec::new());
        };

        let thread_title = self
            .store
            .thread_by_id(event.thread_id)?
            .map(|t| t.title)
            .unwrap_or_else(|| "Thread".to_string());
        let cast_name = match event.cast_member_id {
            Some(id) => self
                .store
                .cast_member_by_id(id)?
                .map(|c| c.full_name)
                .unwrap_or_else(|| "All cast".to_string()),
            None => "All cast".to_string(),
        };

        let summary = format_summary(event, &cast_name, &thread_title);
        let channels: Vec<String> = rule.channels.iter().map(|c| c.to_lowercase()).collect();
        let mut delivered: Vec<String> = Vec::new();

        if channels.iter().any(|c| c == "slack")
            && self
                .slack
                .send(&summary.slack_text, Some(&summary.slack_blocks))
                .await
        {
            delivered.push("slack".to_string());
        }

        if channels.iter().any(|c| c == "email") {
            let recipients = resolve_email_recipients(&rule, self.fallback_recipient.as_deref());
            if self
                .email
                .send(&recipients, &summary.subject, &summary.html, &summary.plain)
                .await
            {
                delivered.push("email".to_string());
            }
        }

        if !delivered.is_empty() {
            let merged: BTreeSet<String> = event
                .delivered_channels
                .iter()
                .cloned()
                .chain(delivered.iter().cloned())
                .collect();
            let merged: Vec<String> = merged.into_iter().collect();
            self.store
                .update_event_delivered_channels(event.id, &merged)?;
        }

        Ok(delivered)
    }
}

/// Recipients from the rule condition (`emails` as a list or a
/// comma-separated string), falling back to the system from-address.
fn resolve_email_recipients(rule: &AlertRule, fallback: Option<&str>) -> Vec<String> {
    match rule.condition.get("emails") {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(raw)) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => fallback
            .map(|f| vec![f.to_string()])
            .unwrap_or_default(),
    }
}

fn format_summary(event: &AlertEvent, cast_name: &str, thread_title: &str) -> AlertSummary {
    let payload = &event.payload;
    let window = payload
        .get("window")
        .and_then(Value::as_str)
        .unwrap_or("overall");
    let metric = payload
        .get("metric")
        .and_then(Value::as_str)
        .unwrap_or("net_sentiment");
    let value = payload.get("value").cloned().unwrap_or(Value::Null);
    let threshold = payload.get("threshold").cloned().unwrap_or(Value::Null);

    let metric_label = title_case(metric);
    let subject = format!("Alert: {cast_name} {metric_label} change on '{thread_title}'");

    let mut lines = vec![
        format!("Thread: {thread_title}"),
        format!("Cast Member: {cast_name}"),
        format!("Window: {window}"),
        format!("Metric: {metric_label}"),
        format!("Value: {value}"),
        format!("Threshold: {threshold}"),
    ];
    if let (Some(baseline), Some(delta)) = (
        payload.get("baseline_window").and_then(Value::as_str),
        payload.get("delta").and_then(Value::as_f64),
    ) {
        let baseline_value = payload.get("baseline_value").cloned().unwrap_or(Value::Null);
        lines.push(format!("Baseline ({baseline}): {baseline_value}"));
        lines.push(format!("Delta vs baseline: {delta:+}"));
    }

    let plain = format!("\n{}", lines.join("\n"));
    let html = lines.join("<br/>");
    let slack_text = format!("{subject}\n{}", lines.join("\n"));
    let slack_blocks = json!([
        {
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!(
                    "*{subject}*\nWindow `{window}` exceeded threshold `{threshold}` with value `{value}`."
                ),
            },
        }
    ]);

    AlertSummary {
        subject,
        plain,
        html,
        slack_text,
        slack_blocks,
    }
}

/// `net_sentiment` -> `Net Sentiment`.
fn title_case(value: &str) -> String {
    value
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(payload: Value) -> AlertEvent {
        AlertEvent {
            id: 1,
            alert_rule_id: 1,
            thread_id: 1,
            cast_member_id: Some(1),
            triggered_at: Utc::now(),
            payload,
            delivered_channels: Vec::new(),
        }
    }

    fn rule_with_condition(condition: Value) -> AlertRule {
        AlertRule {
            id: 1,
            name: "r".to_string(),
            description: None,
            thread_id: None,
            cast_member_id: None,
            rule_type: "sentiment_drop".to_string(),
            condition,
            is_active: true,
            channels: vec!["email".to_string()],
        }
    }

    #[test]
    fn summary_subject_and_baseline_lines() {
        let event = event(json!({
            "window": "live",
            "metric": "net_sentiment",
            "value": -0.4,
            "threshold": -0.4,
            "baseline_window": "overall",
            "baseline_value": 0.2,
            "delta": -0.6,
        }));
        let summary = format_summary(&event, "Lisa Barlow", "Episode thread");

        assert_eq!(
            summary.subject,
            "Alert: Lisa Barlow Net Sentiment change on 'Episode thread'"
        );
        assert!(summary.plain.contains("Baseline (overall): 0.2"));
        assert!(summary.plain.contains("Delta vs baseline: -0.6"));
        assert!(summary.slack_text.starts_with(&summary.subject));
        assert!(summary.html.contains("Window: live"));
    }

    #[test]
    fn recipients_from_list_string_and_fallback() {
        let list = rule_with_condition(json!({"emails": ["a@x.io", " b@x.io "]}));
        assert_eq!(
            resolve_email_recipients(&list, Some("sys@x.io")),
            vec!["a@x.io", "b@x.io"]
        );

        let comma = rule_with_condition(json!({"emails": "a@x.io, b@x.io,,"}));
        assert_eq!(
            resolve_email_recipients(&comma, None),
            vec!["a@x.io", "b@x.io"]
        );

        let fallback = rule_with_condition(json!({}));
        assert_eq!(
            resolve_email_recipients(&fallback, Some("sys@x.io")),
            vec!["sys@x.io"]
        );
        assert!(resolve_email_recipients(&fallback, None).is_empty());
    }

    #[test]
    fn title_case_metric_labels() {
        assert_eq!(title_case("net_sentiment"), "Net Sentiment");
        assert_eq!(title_case("mention_count"), "Mention Count");
    }
}
