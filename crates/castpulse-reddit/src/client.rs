use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

use castpulse_core::config::RedditConfig;

use crate::error::{RedditError, Result};
use crate::limiter::RateLimiter;
use crate::types::{CommentPayload, Submission};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";
const MAX_ATTEMPTS: u32 = 3;
/// Reddit caps morechildren expansion at 100 ids per call.
const MORE_CHILDREN_CHUNK: usize = 100;

/// The surface the ingestion engine consumes. Tests substitute a stub.
#[async_trait]
pub trait RedditApi: Send + Sync {
    /// Headline metadata with the full payload hydrated.
    async fn get_submission(&self, submission_id: &str) -> Result<Submission>;

    /// Raw provider JSON for archival.
    async fn fetch_submission_raw(&self, submission_id: &str) -> Result<Value>;

    /// The submission plus its entire comment tree, flattened, with
    /// every "load more" node fully resolved.
    async fn fetch_comments(&self, submission_id: &str)
        -> Result<(Submission, Vec<CommentPayload>)>;
}

struct BearerToken {
    value: String,
    expires_at: Instant,
}

pub struct RedditClient {
    http: reqwest::Client,
    config: RedditConfig,
    limiter: Arc<RateLimiter>,
    token: tokio::sync::Mutex<Option<BearerToken>>,
}

impl RedditClient {
    pub fn new(config: RedditConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            config,
            limiter,
            token: tokio::sync::Mutex::new(None),
        })
    }

    /// Script-app password grant; token cached until shortly before expiry.
    async fn bearer_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!("requesting Reddit access token");
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            let text = response.text().await.unwrap_or_default();
            return Err(RedditError::Auth(text));
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RedditError::Api {
                status,
                message: text,
            });
        }

        let body: Value = response.json().await?;
        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| RedditError::Auth("token response missing access_token".into()))?
            .to_string();
        let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
        // Refresh a minute early to avoid using a token at its edge.
        let expires_at = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));

        *guard = Some(BearerToken {
            value: access_token.clone(),
            expires_at,
        });
        Ok(access_token)
    }

    /// One authenticated GET through the limiter. On 429 the limiter is
    /// blocked for the Retry-After duration and the typed error surfaces.
    async fn api_get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.limiter.acquire().await;
        let token = self.bearer_token().await?;

        let response = self
            .http
            .get(format!("{API_BASE}{path}"))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0);
            if retry_after > 0.0 {
                warn!("Reddit rate limited request; blocking for {retry_after}s");
                self.limiter.block_for(retry_after).await;
            }
            return Err(RedditError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if status == 401 || status == 403 {
            let text = response.text().await.unwrap_or_default();
            return Err(RedditError::Auth(text));
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RedditError::Api {
                status,
                message: text,
            });
        }

        Ok(response.json().await?)
    }

    async fn info_payload(&self, submission_id: &str) -> Result<Value> {
        self.api_get(
            "/api/info",
            &[
                ("id", format!("t3_{submission_id}")),
                ("raw_json", "1".to_string()),
            ],
        )
        .await
    }

    async fn fetch_comments_once(
        &self,
        submission_id: &str,
    ) -> Result<(Submission, Vec<CommentPayload>)> {
        let listing = self
            .api_get(
                &format!("/comments/{submission_id}"),
                &[
                    ("raw_json", "1".to_string()),
                    ("limit", "500".to_string()),
                ],
            )
            .await?;

        let submission_data = listing
            .get(0)
            .and_then(|l| l.pointer("/data/children/0/data"))
            .ok_or_else(|| RedditError::Parse("comments listing missing submission".into()))?;
        let submission: Submission = serde_json::from_value(submission_data.clone())
            .map_err(|e| RedditError::Parse(e.to_string()))?;

        let mut comments = Vec::new();
        let mut more_ids: Vec<String> = Vec::new();
        if let Some(children) = listing.pointer("/1/data/children").and_then(Value::as_array) {
            for child in children {
                collect_node(child, &mut comments, &mut more_ids);
            }
        }

        // Resolve every "load more" stub; each batch may surface new ones.
        while !more_ids.is_empty() {
            let chunk: Vec<String> = more_ids
                .drain(..more_ids.len().min(MORE_CHILDREN_CHUNK))
                .collect();
            let expansion = self
                .api_get(
                    "/api/morechildren",
                    &[
                        ("api_type", "json".to_string()),
                        ("link_id", format!("t3_{submission_id}")),
                        ("children", chunk.join(",")),
                        ("raw_json", "1".to_string()),
                    ],
                )
                .await?;
            if let Some(things) = expansion
                .pointer("/json/data/things")
                .and_then(Value::as_array)
            {
                for thing in things {
                    collect_node(thing, &mut comments, &mut more_ids);
                }
            }
        }

        Ok((submission, comments))
    }
}

#[async_trait]
impl RedditApi for RedditClient {
    async fn get_submission(&self, submission_id: &str) -> Result<Submission> {
        with_retry("get_submission", || async {
            let payload = self.info_payload(submission_id).await?;
            let data = payload
                .pointer("/data/children/0/data")
                .ok_or_else(|| RedditError::Parse("info payload missing submission".into()))?;
            serde_json::from_value(data.clone()).map_err(|e| RedditError::Parse(e.to_string()))
        })
        .await
    }

    async fn fetch_submission_raw(&self, submission_id: &str) -> Result<Value> {
        with_retry("fetch_submission_raw", || self.info_payload(submission_id)).await
    }

    async fn fetch_comments(
        &self,
        submission_id: &str,
    ) -> Result<(Submission, Vec<CommentPayload>)> {
        with_retry("fetch_comments", || self.fetch_comments_once(submission_id)).await
    }
}

/// Depth-first walk of a listing node: `t1` comments are flattened,
/// `more` stubs queue their children for expansion.
fn collect_node(node: &Value, comments: &mut Vec<CommentPayload>, more_ids: &mut Vec<String>) {
    let kind = node["kind"].as_str().unwrap_or_default();
    let data = &node["data"];
    match kind {
        "t1" => {
            if let Some(payload) = payload_from_data(data) {
                comments.push(payload);
            }
            if let Some(children) = data.pointer("/replies/data/children").and_then(Value::as_array)
            {
                for child in children {
                    collect_node(child, comments, more_ids);
                }
            }
        }
        "more" => {
            if let Some(children) = data["children"].as_array() {
                more_ids.extend(children.iter().filter_map(|c| c.as_str().map(String::from)));
            }
        }
        _ => {}
    }
}

fn payload_from_data(data: &Value) -> Option<CommentPayload> {
    let id = data["id"].as_str()?.to_string();
    let author = data["author"]
        .as_str()
        .filter(|a| !a.is_empty())
        .unwrap_or("[deleted]")
        .to_string();
    Some(CommentPayload {
        id,
        author,
        body: data["body"].as_str().unwrap_or_default().to_string(),
        score: data["score"].as_i64().unwrap_or(0),
        created_utc: data["created_utc"].as_f64().unwrap_or(0.0),
        parent_id: data["parent_id"].as_str().map(String::from),
    })
}

/// Bounded retry: a 429 waits its Retry-After (minimum 1 s), anything
/// else backs off `min(30, 2^(attempt−1))` seconds.
async fn with_retry<T, F, Fut>(op: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= MAX_ATTEMPTS => return Err(e),
            Err(e) => {
                let wait_secs = match &e {
                    RedditError::RateLimited { retry_after_secs } => retry_after_secs.max(1.0),
                    _ => f64::from(2u32.pow(attempt - 1).min(30)),
                };
                warn!("{op} attempt {attempt} failed ({e}); retrying in {wait_secs:.1}s");
                sleep(Duration::from_secs_f64(wait_secs)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tree_walk_flattens_replies_and_queues_more_stubs() {
        let node = json!({
            "kind": "t1",
            "data": {
                "id": "c1",
                "author": "alice",
                "body": "top level",
                "score": 5,
                "created_utc": 1_700_000_000.0,
                "parent_id": "t3_abc",
                "replies": {
                    "kind": "Listing",
                    "data": {
                        "children": [
                            {
                                "kind": "t1",
                                "data": {
                                    "id": "c2",
                                    "author": null,
                                    "body": "reply",
                                    "score": 1,
                                    "created_utc": 1_700_000_100.0,
                                    "parent_id": "t1_c1",
                                    "replies": ""
                                }
                            },
                            {
                                "kind": "more",
                                "data": { "children": ["c3", "c4"] }
                            }
                        ]
                    }
                }
            }
        });

        let mut comments = Vec::new();
        let mut more = Vec::new();
        collect_node(&node, &mut comments, &mut more);

        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].id, "c1");
        assert_eq!(comments[1].id, "c2");
        assert_eq!(comments[1].author, "[deleted]");
        assert_eq!(comments[1].parent_id.as_deref(), Some("t1_c1"));
        assert_eq!(more, vec!["c3", "c4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backs_off_and_surfaces_final_error() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<()> = with_retry("op", || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async {
                Err(RedditError::Api {
                    status: 500,
                    message: "boom".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(RedditError::Api { status: 500, .. })));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_honours_retry_after_over_backoff() {
        let start = Instant::now();
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<u32> = with_retry("op", || {
            let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(RedditError::RateLimited {
                        retry_after_secs: 7.0,
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert!(Instant::now() - start >= Duration::from_secs(7));
    }
}
