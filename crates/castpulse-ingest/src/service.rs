use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use castpulse_core::config::CastpulseConfig;
use castpulse_core::metrics;
use castpulse_core::types::ThreadStatus;
use castpulse_reddit::{CommentPayload, RedditApi, Submission};
use castpulse_store::models::{Comment, NewComment, NewThread, RedditThreadRecord, Thread};
use castpulse_store::Store;

use crate::blob::{raw_payload_key, BlobArchive};
use crate::error::{IngestError, Result};
use crate::hashing::hash_username;
use crate::timewindow::determine_time_window;

/// Self posts contribute at most this much selftext as the synopsis.
const SYNOPSIS_MAX_CHARS: usize = 500;

/// Result of one ingest or poll run, consumed by the task layer for
/// downstream scheduling.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub thread_id: i64,
    pub reddit_id: String,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Comments needing (re)classification: new rows plus edited bodies.
    pub comment_ids: Vec<i64>,
    pub poll_interval_seconds: i64,
    pub status: ThreadStatus,
    pub should_schedule_poll: bool,
    pub should_continue: bool,
}

#[derive(Debug, Default)]
struct CommentStats {
    inserted: usize,
    updated: usize,
    skipped: usize,
    total: usize,
    comment_ids: Vec<i64>,
}

pub struct IngestionService {
    client: Arc<dyn RedditApi>,
    store: Store,
    blob: Option<Arc<BlobArchive>>,
    config: Arc<CastpulseConfig>,
}

impl IngestionService {
    pub fn new(
        client: Arc<dyn RedditApi>,
        store: Store,
        blob: Option<Arc<BlobArchive>>,
        config: Arc<CastpulseConfig>,
    ) -> Self {
        Self {
            client,
            store,
            blob,
            config,
        }
    }

    /// Full ingest: fetch, archive, upsert thread + comments, apply the
    /// archive policy.
    pub async fn ingest_thread(&self, reddit_id: &str, subreddit: &str) -> Result<IngestOutcome> {
        let submission = self.client.get_submission(reddit_id).await?;
        let raw_payload = self.client.fetch_submission_raw(reddit_id).await?;
        let blob_key = self
            .archive_raw_payload(subreddit, reddit_id, &raw_payload)
            .await;

        self.upsert_reddit_record(&submission, &raw_payload, blob_key.as_deref())?;
        let mut thread = self.upsert_thread(&submission, subreddit)?;

        let (_, comments_payload) = self.client.fetch_comments(reddit_id).await?;
        let stats = self.persist_comments(&thread, &comments_payload)?;

        let now = Utc::now();
        thread.total_comments = submission.num_comments.max(stats.total as i64);
        thread.last_polled_at = Some(now);
        if let Some(latest) = latest_comment_timestamp(&comments_payload) {
            thread.latest_comment_utc = Some(latest.min(now));
        } else if thread.latest_comment_utc.is_none() {
            thread.latest_comment_utc = Some(thread.created_utc);
        }
        self.apply_archive_policy(&mut thread, now, Some(&submission));
        self.store.update_thread(&thread)?;

        info!(
            thread_id = thread.id,
            reddit_id,
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            "thread ingest complete"
        );
        Ok(self.outcome(&thread, stats))
    }

    /// Incremental poll: persist only comments newer than the last one
    /// seen, then refresh polling bookkeeping and the archive policy.
    pub async fn poll_thread(&self, thread_id: i64) -> Result<IngestOutcome> {
        let mut thread = self
            .store
            .thread_by_id(thread_id)?
            .ok_or(IngestError::ThreadNotFound(thread_id))?;

        let now = Utc::now();
        let last_seen = thread.latest_comment_utc.unwrap_or(thread.created_utc);

        let (submission, comments_payload) = self.client.fetch_comments(&thread.reddit_id).await?;
        let new_comments: Vec<CommentPayload> = comments_payload
            .into_iter()
            .filter(|payload| payload.created_datetime() > last_seen)
            .collect();

        let mut stats = CommentStats::default();
        if !new_comments.is_empty() {
            stats = self.persist_comments(&thread, &new_comments)?;
            if let Some(latest) = latest_comment_timestamp(&new_comments) {
                let clamped = latest.min(now);
                if thread.latest_comment_utc.is_none_or(|current| clamped > current) {
                    thread.latest_comment_utc = Some(clamped);
                }
            }
            thread.total_comments += stats.inserted as i64;
        }

        thread.last_polled_at = Some(now);
        self.apply_archive_policy(&mut thread, now, Some(&submission));
        self.store.update_thread(&thread)?;

        info!(
            thread_id,
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            "incremental poll complete"
        );
        Ok(self.outcome(&thread, stats))
    }

    fn outcome(&self, thread: &Thread, stats: CommentStats) -> IngestOutcome {
        metrics::inc_comments("inserted", stats.inserted as u64);
        metrics::inc_comments("updated", stats.updated as u64);
        metrics::inc_comments("skipped", stats.skipped as u64);
        let live = thread.status == ThreadStatus::Live;
        IngestOutcome {
            thread_id: thread.id,
            reddit_id: thread.reddit_id.clone(),
            inserted: stats.inserted,
            updated: stats.updated,
            skipped: stats.skipped,
            comment_ids: stats.comment_ids,
            poll_interval_seconds: thread.poll_interval_seconds,
            status: thread.status,
            should_schedule_poll: live,
            should_continue: live,
        }
    }

    async fn archive_raw_payload(
        &self,
        subreddit: &str,
        reddit_id: &str,
        payload: &Value,
    ) -> Option<String> {
        let Some(blob) = &self.blob else {
            debug!("blob archive not configured; skipping raw payload upload");
            return None;
        };
        let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let key = raw_payload_key(subreddit, reddit_id, &timestamp);
        match blob.put_json(&key, payload).await {
            Ok(object_key) => Some(object_key),
            Err(e) => {
                warn!("failed to archive raw payload for {reddit_id}: {e}");
                None
            }
        }
    }

    fn upsert_reddit_record(
        &self,
        submission: &Submission,
        raw_payload: &Value,
        blob_key: Option<&str>,
    ) -> Result<()> {
        let raw_json = json!({"payload": raw_payload, "blob_key": blob_key}).to_string();
        self.store.upsert_reddit_thread(&RedditThreadRecord {
            external_id: submission.id.clone(),
            subreddit: submission.subreddit.clone(),
            title: submission.title.clone(),
            url: submission.best_url(),
            author: submission.author.clone(),
            flair: submission.link_flair_text.clone(),
            score: submission.score,
            num_comments: submission.num_comments,
            is_archived: submission.archived,
            created_utc: submission.created_datetime(),
            raw_json: Some(raw_json),
        })?;
        Ok(())
    }

    fn upsert_thread(&self, submission: &Submission, subreddit: &str) -> Result<Thread> {
        let created_utc = submission.created_datetime();
        let synopsis: Option<String> = if submission.is_self && !submission.selftext.is_empty() {
            Some(submission.selftext.chars().take(SYNOPSIS_MAX_CHARS).collect())
        } else {
            None
        };
        let subreddit_value = if subreddit.trim().is_empty() {
            submission.subreddit.clone()
        } else {
            subreddit.to_string()
        };

        match self.store.thread_by_reddit_id(&submission.id)? {
            Some(mut thread) => {
                thread.subreddit = Some(subreddit_value);
                thread.title = submission.title.clone();
                thread.url = submission.best_url();
                thread.air_time_utc = thread.air_time_utc.or(Some(created_utc));
                thread.created_utc = created_utc;
                thread.total_comments = submission.num_comments;
                if synopsis.is_some() {
                    thread.synopsis = synopsis;
                }
                if submission.archived {
                    thread.status = ThreadStatus::Archived;
                } else if !thread.status.is_terminal_for_polling() {
                    thread.status = ThreadStatus::Live;
                }
                Ok(thread)
            }
            None => Ok(self.store.insert_thread(&NewThread {
                reddit_id: submission.id.clone(),
                subreddit: Some(subreddit_value),
                title: submission.title.clone(),
                url: submission.best_url(),
                air_time_utc: Some(created_utc),
                created_utc,
                status: if submission.archived {
                    ThreadStatus::Archived
                } else {
                    ThreadStatus::Live
                },
                total_comments: submission.num_comments,
                synopsis,
                poll_interval_seconds: 60,
            })?),
        }
    }

    /// Idempotent comment persistence: existing rows update in place
    /// (body edits flag reclassification), new rows insert, and the
    /// ancestor chain's reply counters and activity stamps reconcile
    /// after the inserts land.
    fn persist_comments(&self, thread: &Thread, raw_comments: &[CommentPayload]) -> Result<CommentStats> {
        if raw_comments.is_empty() {
            return Ok(CommentStats::default());
        }

        let reddit_ids: Vec<String> = raw_comments
            .iter()
            .filter(|p| !p.id.is_empty())
            .map(|p| p.id.clone())
            .collect();
        let existing: HashMap<String, Comment> = self
            .store
            .comments_by_thread_and_reddit_ids(thread.id, &reddit_ids)?
            .into_iter()
            .map(|c| (c.reddit_id.clone(), c))
            .collect();
        let existing_count = existing.len();

        let salt = &self.config.operational.author_hash_salt;
        let timezone = &self.config.operational.timezone;

        let mut parent_counter: HashMap<String, i64> = HashMap::new();
        let mut inserted_children: Vec<(Option<String>, DateTime<Utc>)> = Vec::new();
        let mut classification_ids: Vec<i64> = Vec::new();
        let mut inserted = 0usize;
        let mut updated = 0usize;

        for payload in raw_comments {
            if payload.id.is_empty() {
                continue;
            }
            let created_utc = payload.created_datetime();
            let time_window = determine_time_window(created_utc, thread.air_time_utc, timezone)
                .map(|w| w.as_str().to_string());
            let author_hash = hash_username(Some(&payload.author), salt);
            let normalized_parent = normalize_parent(payload.parent_id.as_deref());

            if let Some(existing_comment) = existing.get(&payload.id) {
                let mut row = existing_comment.clone();
                let mut changed = false;
                let mut reclassify = false;

                if row.author_hash != author_hash {
                    row.author_hash = author_hash;
                    changed = true;
                }
                if row.body != payload.body {
                    row.body = payload.body.clone();
                    changed = true;
                    reclassify = true;
                }
                if row.score != payload.score {
                    row.score = payload.score;
                    changed = true;
                }
                if row.parent_reddit_id != normalized_parent {
                    row.parent_reddit_id = normalized_parent.clone();
                    changed = true;
                }
                if row.time_window != time_window {
                    row.time_window = time_window;
                    changed = true;
                }

                if changed {
                    self.store.update_comment_ingest_fields(&row)?;
                    updated += 1;
                    if reclassify {
                        classification_ids.push(row.id);
                    }
                }
                continue;
            }

            if let Some(parent) = &normalized_parent {
                *parent_counter.entry(parent.clone()).or_insert(0) += 1;
            }
            let id = self.store.insert_comment(&NewComment {
                thread_id: thread.id,
                reddit_id: payload.id.clone(),
                author_hash,
                body: payload.body.clone(),
                created_utc,
                score: payload.score,
                parent_reddit_id: normalized_parent.clone(),
                time_window,
                created_at: Utc::now(),
            })?;
            inserted += 1;
            classification_ids.push(id);
            inserted_children.push((normalized_parent, created_utc));
        }

        // Inserts are flushed above, so newly-inserted parents resolve
        // here alongside pre-existing ones.
        let ancestor_map = self.resolve_ancestors(thread.id, parent_counter.keys().cloned())?;
        for (parent_reddit_id, increment) in &parent_counter {
            if let Some(parent) = ancestor_map.get(parent_reddit_id) {
                self.store.bump_comment_replies(parent.id, *increment, None)?;
            }
        }
        for (parent_id, created_utc) in &inserted_children {
            let mut current = parent_id.clone();
            let mut visited: HashSet<String> = HashSet::new();
            while let Some(parent_reddit_id) = current {
                if !visited.insert(parent_reddit_id.clone()) {
                    break;
                }
                let Some(parent) = ancestor_map.get(&parent_reddit_id) else {
                    break;
                };
                self.store
                    .bump_comment_replies(parent.id, 0, Some(*created_utc))?;
                current = parent.parent_reddit_id.clone();
            }
        }

        let mut seen = HashSet::new();
        classification_ids.retain(|id| seen.insert(*id));

        Ok(CommentStats {
            inserted,
            updated,
            skipped: existing_count.saturating_sub(updated),
            total: existing_count + inserted,
            comment_ids: classification_ids,
        })
    }

    /// Resolve the full ancestor chain of the given parents, chunked
    /// per generation.
    fn resolve_ancestors(
        &self,
        thread_id: i64,
        parents: impl Iterator<Item = String>,
    ) -> Result<HashMap<String, Comment>> {
        let mut ancestor_map: HashMap<String, Comment> = HashMap::new();
        let mut pending: HashSet<String> = parents.collect();

        while !pending.is_empty() {
            let chunk: Vec<String> = pending.iter().cloned().collect();
            let found = self
                .store
                .comments_by_thread_and_reddit_ids(thread_id, &chunk)?;
            let mut next: HashSet<String> = HashSet::new();
            for parent in found {
                if ancestor_map.contains_key(&parent.reddit_id) {
                    continue;
                }
                if let Some(grandparent) = &parent.parent_reddit_id {
                    next.insert(grandparent.clone());
                }
                ancestor_map.insert(parent.reddit_id.clone(), parent);
            }
            pending = next
                .into_iter()
                .filter(|id| !ancestor_map.contains_key(id))
                .collect();
        }
        Ok(ancestor_map)
    }

    /// Archive policy, in precedence order: the provider's archived
    /// flag, then idle-based auto-archive, then LIVE for anything not
    /// already terminal.
    fn apply_archive_policy(
        &self,
        thread: &mut Thread,
        now: DateTime<Utc>,
        submission: Option<&Submission>,
    ) -> bool {
        let mut archived = false;

        if submission.is_some_and(|s| s.archived) {
            if thread.status != ThreadStatus::Archived {
                info!(thread_id = thread.id, "archiving thread (provider archived flag)");
                thread.status = ThreadStatus::Archived;
                archived = true;
            }
            return true;
        }

        if thread.status == ThreadStatus::Archived {
            return archived;
        }

        if !self.config.operational.auto_archive {
            if !thread.status.is_terminal_for_polling() {
                thread.status = ThreadStatus::Live;
            }
            return archived;
        }

        let idle_minutes = self.config.operational.archive_idle_minutes;
        if idle_minutes <= 0 {
            return archived;
        }

        let latest_activity = thread.latest_comment_utc.unwrap_or(thread.created_utc);
        if now - latest_activity >= Duration::minutes(idle_minutes) {
            info!(
                thread_id = thread.id,
                idle_minutes, "archiving thread after idle period"
            );
            thread.status = ThreadStatus::Archived;
            archived = true;
        } else if !thread.status.is_terminal_for_polling() {
            thread.status = ThreadStatus::Live;
        }

        archived
    }
}

fn normalize_parent(parent_id: Option<&str>) -> Option<String> {
    let parent_id = parent_id?;
    parent_id.strip_prefix("t1_").map(String::from)
}

fn latest_comment_timestamp(raw_comments: &[CommentPayload]) -> Option<DateTime<Utc>> {
    raw_comments
        .iter()
        .filter(|p| p.created_utc > 0.0)
        .map(|p| p.created_datetime())
        .max()
}
