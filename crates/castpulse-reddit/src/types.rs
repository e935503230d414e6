use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// Headline submission metadata as returned by `/api/info`.
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    pub id: String,
    #[serde(default)]
    pub subreddit: String,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub link_flair_text: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub selftext: String,
}

impl Submission {
    /// Prefer the submission URL, falling back to the permalink.
    pub fn best_url(&self) -> String {
        match &self.url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!("https://reddit.com{}", self.permalink),
        }
    }

    pub fn created_datetime(&self) -> DateTime<Utc> {
        utc_from_epoch(self.created_utc)
    }
}

/// One flattened comment from the tree walk.
///
/// `author` is `"[deleted]"` when Reddit reports no author; `parent_id`
/// keeps the provider prefix (`t1_…` for a comment parent, `t3_…` for
/// the submission itself).
#[derive(Debug, Clone, PartialEq)]
pub struct CommentPayload {
    pub id: String,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_utc: f64,
    pub parent_id: Option<String>,
}

impl CommentPayload {
    pub fn created_datetime(&self) -> DateTime<Utc> {
        utc_from_epoch(self.created_utc)
    }
}

/// Epoch seconds (possibly fractional) to UTC, truncating to millis.
pub fn utc_from_epoch(epoch: f64) -> DateTime<Utc> {
    let secs = epoch.floor() as i64;
    let millis = ((epoch - epoch.floor()) * 1000.0).round() as u32;
    Utc.timestamp_opt(secs, millis * 1_000_000)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_url_prefers_explicit_url() {
        let mut submission = Submission {
            id: "abc".into(),
            subreddit: "realitytv".into(),
            title: "t".into(),
            url: Some("https://example.com/x".into()),
            permalink: "/r/realitytv/comments/abc".into(),
            author: None,
            link_flair_text: None,
            score: 0,
            num_comments: 0,
            archived: false,
            created_utc: 1_700_000_000.0,
            is_self: false,
            selftext: String::new(),
        };
        assert_eq!(submission.best_url(), "https://example.com/x");
        submission.url = None;
        assert_eq!(
            submission.best_url(),
            "https://reddit.com/r/realitytv/comments/abc"
        );
    }

    #[test]
    fn epoch_conversion_handles_fractions() {
        let dt = utc_from_epoch(1_700_000_000.5);
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(dt.timestamp_subsec_millis(), 500);
    }
}
