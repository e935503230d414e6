use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a tracked discussion thread.
///
/// ARCHIVED is terminal for polling; no further poll tasks are
/// scheduled for ARCHIVED or COMPLETED threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Scheduled,
    Live,
    Completed,
    Archived,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Scheduled => "scheduled",
            ThreadStatus::Live => "live",
            ThreadStatus::Completed => "completed",
            ThreadStatus::Archived => "archived",
        }
    }

    /// True when no more poll tasks should be scheduled.
    pub fn is_terminal_for_polling(&self) -> bool {
        matches!(self, ThreadStatus::Archived | ThreadStatus::Completed)
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(ThreadStatus::Scheduled),
            "live" => Ok(ThreadStatus::Live),
            "completed" => Ok(ThreadStatus::Completed),
            "archived" => Ok(ThreadStatus::Archived),
            other => Err(format!("unknown thread status: {other}")),
        }
    }
}

/// Temporal bucket of a comment relative to the episode air time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    Live,
    DayOf,
    After,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Live => "live",
            TimeWindow::DayOf => "day_of",
            TimeWindow::After => "after",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(TimeWindow::Live),
            "day_of" => Ok(TimeWindow::DayOf),
            "after" => Ok(TimeWindow::After),
            other => Err(format!("unknown time window: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SentimentLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(SentimentLabel::Positive),
            "neutral" => Ok(SentimentLabel::Neutral),
            "negative" => Ok(SentimentLabel::Negative),
            other => Err(format!("unknown sentiment label: {other}")),
        }
    }
}

/// How a mention candidate was resolved to a cast member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionMethod {
    Exact,
    ExactNer,
    Fuzzy,
    InheritedContext,
}

impl MentionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MentionMethod::Exact => "exact",
            MentionMethod::ExactNer => "exact_ner",
            MentionMethod::Fuzzy => "fuzzy",
            MentionMethod::InheritedContext => "inherited_context",
        }
    }
}

impl fmt::Display for MentionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MentionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(MentionMethod::Exact),
            "exact_ner" => Ok(MentionMethod::ExactNer),
            "fuzzy" => Ok(MentionMethod::Fuzzy),
            "inherited_context" => Ok(MentionMethod::InheritedContext),
            other => Err(format!("unknown mention method: {other}")),
        }
    }
}

/// Delivery channel for alert events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Slack,
    Email,
}

impl AlertChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertChannel::Slack => "slack",
            AlertChannel::Email => "email",
        }
    }
}

impl FromStr for AlertChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "slack" => Ok(AlertChannel::Slack),
            "email" => Ok(AlertChannel::Email),
            other => Err(format!("unknown alert channel: {other}")),
        }
    }
}

/// Comparison operator used by alert rule conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparison {
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Lt => value < threshold,
            Comparison::Lte => value <= threshold,
            Comparison::Gt => value > threshold,
            Comparison::Gte => value >= threshold,
        }
    }
}

impl FromStr for Comparison {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lt" => Ok(Comparison::Lt),
            "lte" => Ok(Comparison::Lte),
            "gt" => Ok(Comparison::Gt),
            "gte" => Ok(Comparison::Gte),
            other => Err(format!("unknown comparison operator: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_status_round_trips() {
        for status in [
            ThreadStatus::Scheduled,
            ThreadStatus::Live,
            ThreadStatus::Completed,
            ThreadStatus::Archived,
        ] {
            assert_eq!(status.as_str().parse::<ThreadStatus>().unwrap(), status);
        }
    }

    #[test]
    fn polling_terminal_states() {
        assert!(ThreadStatus::Archived.is_terminal_for_polling());
        assert!(ThreadStatus::Completed.is_terminal_for_polling());
        assert!(!ThreadStatus::Live.is_terminal_for_polling());
        assert!(!ThreadStatus::Scheduled.is_terminal_for_polling());
    }

    #[test]
    fn comparison_operators() {
        assert!(Comparison::Lt.evaluate(-0.6, -0.4));
        assert!(!Comparison::Lt.evaluate(-0.4, -0.4));
        assert!(Comparison::Lte.evaluate(-0.4, -0.4));
        assert!(Comparison::Gt.evaluate(5.0, 2.0));
        assert!(Comparison::Gte.evaluate(2.0, 2.0));
    }

    #[test]
    fn window_serde_matches_storage_strings() {
        assert_eq!(
            serde_json::to_string(&TimeWindow::DayOf).unwrap(),
            "\"day_of\""
        );
        assert_eq!(TimeWindow::DayOf.as_str(), "day_of");
    }
}
