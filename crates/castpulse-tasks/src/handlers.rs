use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{info, warn};

use castpulse_alerts::{AlertDeliveryService, AlertEvaluationService};
use castpulse_analytics::AggregationService;
use castpulse_core::config::{CastpulseConfig, MIN_POLL_INTERVAL_SECS};
use castpulse_core::types::MentionMethod;
use castpulse_ingest::{IngestOutcome, IngestionService};
use castpulse_ml::catalog::roster_aliases;
use castpulse_ml::sentiment::{attenuate_score, AttenuationFlags, SentimentPipeline};
use castpulse_ml::{CastCatalogEntry, EntityLinker, MentionCandidate};
use castpulse_store::models::{Comment, NewMention};
use castpulse_store::Store;

use crate::error::{Result, TaskError};
use crate::queue::{TaskQueue, TaskRow};

/// Inherited parent-context candidates carry this confidence.
const INHERITED_CONFIDENCE: f64 = 0.55;
/// Context snippet window around a quote, in characters.
const CONTEXT_WINDOW_CHARS: usize = 200;
/// Version stamps on comments are truncated to the column width.
const MODEL_VERSION_MAX: usize = 32;

/// Everything a task handler needs, constructed once at worker start.
pub struct TaskContext {
    pub store: Store,
    pub queue: TaskQueue,
    pub ingestion: IngestionService,
    pub pipeline: Arc<SentimentPipeline>,
    pub analytics: AggregationService,
    pub alert_evaluation: AlertEvaluationService,
    pub alert_delivery: AlertDeliveryService,
    pub config: Arc<CastpulseConfig>,
    /// Last poll-enqueue instant per thread; suppresses duplicate poll
    /// scheduling from concurrent completions within the interval.
    poll_guard: DashMap<i64, Instant>,
}

impl TaskContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        queue: TaskQueue,
        ingestion: IngestionService,
        pipeline: Arc<SentimentPipeline>,
        analytics: AggregationService,
        alert_evaluation: AlertEvaluationService,
        alert_delivery: AlertDeliveryService,
        config: Arc<CastpulseConfig>,
    ) -> Self {
        Self {
            store,
            queue,
            ingestion,
            pipeline,
            analytics,
            alert_evaluation,
            alert_delivery,
            config,
            poll_guard: DashMap::new(),
        }
    }
}

/// Execute one claimed task. Unknown names and malformed args are
/// permanent errors; everything else propagates for the queue's retry
/// policy to handle.
pub async fn dispatch(ctx: &TaskContext, task: &TaskRow) -> Result<()> {
    match task.name.as_str() {
        "ingest_thread" => {
            let reddit_id = required_str(task, "reddit_id")?;
            let subreddit = required_str(task, "subreddit")?;
            let outcome = ctx.ingestion.ingest_thread(&reddit_id, &subreddit).await?;
            handle_ingest_outcome(ctx, &outcome)?;
            Ok(())
        }
        "poll_thread" => {
            let thread_id = required_i64(task, "thread_id")?;
            let outcome = ctx.ingestion.poll_thread(thread_id).await?;
            handle_ingest_outcome(ctx, &outcome)?;
            Ok(())
        }
        "classify_comments" => {
            let comment_ids = required_id_list(task, "comment_ids")?;
            classify_comments(ctx, &comment_ids).await
        }
        "link_entities" => {
            let comment_ids = required_id_list(task, "comment_ids")?;
            link_entities(ctx, &comment_ids).await
        }
        "compute_aggregates" => {
            let thread_id = required_i64(task, "thread_id")?;
            ctx.analytics.compute(thread_id)?;
            ctx.queue
                .enqueue("check_alerts", json!({"thread_id": thread_id}), 0)?;
            Ok(())
        }
        "check_alerts" => {
            let thread_id = required_i64(task, "thread_id")?;
            let events = ctx.alert_evaluation.evaluate_thread(thread_id)?;
            for event in &events {
                ctx.queue
                    .enqueue("deliver_alert_event", json!({"event_id": event.id}), 0)?;
            }
            info!(thread_id, events = events.len(), "alert evaluation complete");
            Ok(())
        }
        "deliver_alert_event" => {
            let event_id = required_i64(task, "event_id")?;
            let Some(event) = ctx.store.alert_event_by_id(event_id)? else {
                warn!(event_id, "alert event no longer exists");
                return Ok(());
            };
            let delivered = ctx.alert_delivery.deliver(&event).await?;
            info!(
                event_id,
                channels = delivered.join(","),
                "alert delivery attempted"
            );
            Ok(())
        }
        other => Err(TaskError::UnknownTask(other.to_string())),
    }
}

/// Shared tail of ingest and poll: queue classification for fresh
/// comments and self-schedule the next poll while the thread is LIVE.
fn handle_ingest_outcome(ctx: &TaskContext, outcome: &IngestOutcome) -> Result<()> {
    if !outcome.comment_ids.is_empty() {
        ctx.queue.enqueue(
            "classify_comments",
            json!({"comment_ids": outcome.comment_ids}),
            0,
        )?;
    }
    if outcome.should_continue {
        schedule_next_poll(ctx, outcome.thread_id, outcome.poll_interval_seconds)?;
    }
    Ok(())
}

fn schedule_next_poll(ctx: &TaskContext, thread_id: i64, poll_interval_seconds: i64) -> Result<()> {
    let interval = (poll_interval_seconds.max(1) as u64).max(MIN_POLL_INTERVAL_SECS);

    if let Some(last) = ctx.poll_guard.get(&thread_id) {
        if last.elapsed().as_secs() < interval {
            return Ok(());
        }
    }
    ctx.poll_guard.insert(thread_id, Instant::now());
    ctx.queue
        .enqueue("poll_thread", json!({"thread_id": thread_id}), interval)?;
    Ok(())
}

/// Score each comment, write back its sentiment fields, then queue
/// entity linking for everything scored.
async fn classify_comments(ctx: &TaskContext, comment_ids: &[i64]) -> Result<()> {
    let comments = ctx.store.comments_by_ids(comment_ids)?;
    if comments.is_empty() {
        return Ok(());
    }

    let model_version: String = ctx
        .config
        .sentiment
        .primary_model
        .chars()
        .take(MODEL_VERSION_MAX)
        .collect();
    let batch_size = ctx.config.sentiment.batch_size.max(1);
    let mut scored_ids = Vec::with_capacity(comments.len());

    for batch in comments.chunks(batch_size) {
        for comment in batch {
            let analysis = ctx.pipeline.analyze_comment(&comment.body).await;
            ctx.store.update_comment_sentiment(
                comment.id,
                analysis.resolved.sentiment_label.as_str(),
                analysis.resolved.sentiment_score,
                &analysis.breakdown_json(),
                &model_version,
            )?;
            info!(
                comment_id = comment.id,
                source = %analysis.resolved.source_model,
                label = %analysis.resolved.sentiment_label,
                score = analysis.resolved.sentiment_score,
                "comment classified"
            );
            scored_ids.push(comment.id);
        }
    }

    if !scored_ids.is_empty() {
        ctx.queue
            .enqueue("link_entities", json!({"comment_ids": scored_ids}), 0)?;
    }
    Ok(())
}

/// Re-link every comment: replace its mentions with freshly found and
/// inherited candidates, scored per mention with attenuation applied,
/// then queue aggregation for each touched thread.
async fn link_entities(ctx: &TaskContext, comment_ids: &[i64]) -> Result<()> {
    let comments = ctx.store.comments_by_ids(comment_ids)?;
    if comments.is_empty() {
        return Ok(());
    }

    let catalog_entries = load_cast_catalog(
        &ctx.store,
        ctx.config.operational.roster_dir.as_deref(),
    )?;
    if catalog_entries.is_empty() {
        info!("entity linking skipped: no active cast members configured");
        return Ok(());
    }

    let linker = EntityLinker::new(&catalog_entries);
    let catalog: HashMap<i64, CastCatalogEntry> = catalog_entries
        .into_iter()
        .map(|entry| (entry.cast_member_id, entry))
        .collect();

    let mut thread_ids: HashSet<i64> = HashSet::new();

    for comment in &comments {
        thread_ids.insert(comment.thread_id);

        let mut candidates = linker.find_mentions(&comment.body);
        let existing_ids: HashSet<i64> =
            candidates.iter().map(|c| c.cast_member_id).collect();
        let inherited = inherit_parent_mentions(ctx, comment, &catalog, &existing_ids)?;

        let mut contexts: Vec<String> = candidates
            .iter()
            .map(|candidate| extract_context(&comment.body, Some(&candidate.quote)))
            .collect();
        for (candidate, parent_body) in inherited {
            let current = extract_context(&comment.body, Some(&candidate.quote));
            let parent = extract_context(&parent_body, Some(&candidate.quote));
            let joined: Vec<&str> = [current.trim(), parent.trim()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect();
            contexts.push(if joined.is_empty() {
                parent_body.clone()
            } else {
                joined.join(" ")
            });
            candidates.push(candidate);
        }

        let sentiments = if candidates.is_empty() {
            Vec::new()
        } else {
            ctx.pipeline
                .analyze_mentions(&comment.body, &candidates, &contexts, &catalog)
                .await
        };

        let flags = AttenuationFlags {
            is_sarcastic: comment.is_sarcastic,
            sarcasm_confidence: comment.sarcasm_confidence,
            is_toxic: comment.is_toxic,
            toxicity_confidence: comment.toxicity_confidence,
        };
        let mut rows: Vec<NewMention> = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.iter().enumerate() {
            let context = contexts
                .get(index)
                .cloned()
                .unwrap_or_else(|| comment.body.clone());
            let sentiment = sentiments.get(index);

            let mut label = comment
                .sentiment_label
                .clone()
                .unwrap_or_else(|| "neutral".to_string());
            let mut raw_score = comment.sentiment_score;
            if let Some(sentiment) = sentiment {
                label = sentiment.sentiment_label.as_str().to_string();
                raw_score = Some(sentiment.sentiment_score);
            }

            let adjusted = attenuate_score(
                raw_score,
                &flags,
                ctx.config.sentiment.sarcasm_threshold,
                ctx.config.sentiment.toxicity_threshold,
            );

            rows.push(NewMention {
                comment_id: comment.id,
                comment_created_at: comment.created_at,
                cast_member_id: candidate.cast_member_id,
                sentiment_label: label,
                sentiment_score: adjusted,
                confidence: raw_score,
                weight: Some(candidate.confidence),
                method: Some(candidate.method.as_str().to_string()),
                quote: Some(context),
                is_sarcastic: comment.is_sarcastic,
                is_toxic: comment.is_toxic,
            });
        }

        ctx.store
            .replace_comment_mentions(comment.id, comment.created_at, &rows)?;
    }

    for thread_id in thread_ids {
        ctx.queue
            .enqueue("compute_aggregates", json!({"thread_id": thread_id}), 0)?;
    }
    Ok(())
}

/// The active catalog with the full alias set: full name, display
/// name, slug with dashes as spaces, stored aliases and roster-file
/// aliases.
pub fn load_cast_catalog(store: &Store, roster_dir: Option<&str>) -> Result<Vec<CastCatalogEntry>> {
    let roster = roster_dir
        .map(|dir| roster_aliases(std::path::Path::new(dir)))
        .unwrap_or_default();

    let mut entries = Vec::new();
    for member in store.active_cast_members()? {
        let mut aliases: HashSet<String> = HashSet::new();
        aliases.insert(member.full_name.clone());
        if let Some(display_name) = &member.display_name {
            aliases.insert(display_name.clone());
        }
        aliases.insert(member.slug.replace('-', " "));
        aliases.extend(store.aliases_for_cast_member(member.id)?);
        if let Some(extra) = roster.get(&member.slug) {
            aliases.extend(extra.iter().cloned());
        }
        aliases.retain(|alias| !alias.trim().is_empty());

        entries.push(CastCatalogEntry {
            cast_member_id: member.id,
            canonical_name: member.full_name.clone(),
            slug: Some(member.slug.clone()),
            aliases,
        });
    }
    Ok(entries)
}

/// Carry the parent comment's mentions onto a reply whose own text
/// lacks the alias, at reduced confidence.
fn inherit_parent_mentions(
    ctx: &TaskContext,
    comment: &Comment,
    catalog: &HashMap<i64, CastCatalogEntry>,
    existing_ids: &HashSet<i64>,
) -> Result<Vec<(MentionCandidate, String)>> {
    let Some(parent_reddit_id) = &comment.parent_reddit_id else {
        return Ok(Vec::new());
    };
    let Some(parent) = ctx
        .store
        .comment_by_thread_and_reddit_id(comment.thread_id, parent_reddit_id)?
    else {
        return Ok(Vec::new());
    };

    let parent_mentions = ctx
        .store
        .mentions_for_comment(parent.id, parent.created_at)?;

    let mut inherited = Vec::new();
    for mention in parent_mentions {
        if existing_ids.contains(&mention.cast_member_id) {
            continue;
        }
        let Some(entry) = catalog.get(&mention.cast_member_id) else {
            continue;
        };
        let quote = mention
            .quote
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| entry.canonical_name.clone());
        inherited.push((
            MentionCandidate {
                cast_member_id: mention.cast_member_id,
                confidence: INHERITED_CONFIDENCE,
                method: MentionMethod::InheritedContext,
                quote,
            },
            parent.body.clone(),
        ));
    }
    Ok(inherited)
}

/// Contextual snippet around a quote: the sentence containing it,
/// from a character window centred on the first occurrence.
fn extract_context(text: &str, quote: Option<&str>) -> String {
    if text.is_empty() {
        return quote.unwrap_or_default().to_string();
    }
    let Some(quote) = quote.filter(|q| !q.is_empty()) else {
        return text.chars().take(CONTEXT_WINDOW_CHARS).collect();
    };

    let pattern = match regex::Regex::new(&format!("(?i){}", regex::escape(quote))) {
        Ok(pattern) => pattern,
        Err(_) => return text.chars().take(CONTEXT_WINDOW_CHARS).collect(),
    };

    let Some(found) = pattern.find(text) else {
        let quote_lower = quote.to_lowercase();
        for sentence in castpulse_ml::text::split_sentences(text) {
            if sentence.to_lowercase().contains(&quote_lower) {
                return sentence.to_string();
            }
        }
        return quote.to_string();
    };

    let half = CONTEXT_WINDOW_CHARS / 2;
    let mut start = found.start().saturating_sub(half);
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (found.end() + half).min(text.len());
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    let snippet = text[start..end].trim();

    let quote_lower = quote.to_lowercase();
    for sentence in castpulse_ml::text::split_sentences(snippet) {
        if sentence.to_lowercase().contains(&quote_lower) {
            return sentence.to_string();
        }
    }
    if snippet.is_empty() {
        quote.to_string()
    } else {
        snippet.to_string()
    }
}

fn required_str(task: &TaskRow, key: &str) -> Result<String> {
    task.args
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| TaskError::InvalidArgs {
            task: task.name.clone(),
            reason: format!("missing string arg {key:?}"),
        })
}

fn required_i64(task: &TaskRow, key: &str) -> Result<i64> {
    task.args
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| TaskError::InvalidArgs {
            task: task.name.clone(),
            reason: format!("missing integer arg {key:?}"),
        })
}

fn required_id_list(task: &TaskRow, key: &str) -> Result<Vec<i64>> {
    task.args
        .get(key)
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_i64).collect())
        .ok_or_else(|| TaskError::InvalidArgs {
            task: task.name.clone(),
            reason: format!("missing id list arg {key:?}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueName;
    use async_trait::async_trait;
    use castpulse_core::types::{SentimentLabel, ThreadStatus};
    use castpulse_ml::sentiment::{
        LabelProbs, PrimaryPrediction, SentimentScorer,
    };
    use castpulse_reddit::error::Result as RedditResult;
    use castpulse_reddit::{CommentPayload, RedditApi, Submission};
    use castpulse_store::models::{NewAlertRule, NewComment, NewThread};
    use chrono::{TimeZone, Utc};

    struct KeywordScorer;

    impl SentimentScorer for KeywordScorer {
        fn model_id(&self) -> &str {
            "stub-scorer"
        }

        fn score(
            &self,
            texts: &[String],
        ) -> castpulse_ml::Result<Vec<PrimaryPrediction>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let lowered = text.to_lowercase();
                    let probs = if lowered.contains("love") || lowered.contains("owned") {
                        LabelProbs {
                            negative: 0.05,
                            neutral: 0.05,
                            positive: 0.9,
                        }
                    } else if lowered.contains("terrible") {
                        LabelProbs {
                            negative: 0.9,
                            neutral: 0.05,
                            positive: 0.05,
                        }
                    } else {
                        LabelProbs {
                            negative: 0.03,
                            neutral: 0.94,
                            positive: 0.03,
                        }
                    };
                    let (label, margin) = probs.top_label_and_margin();
                    PrimaryPrediction {
                        label,
                        score: probs.get(label),
                        margin,
                        probabilities: probs,
                    }
                })
                .collect())
        }
    }

    struct NoReddit;

    #[async_trait]
    impl RedditApi for NoReddit {
        async fn get_submission(&self, _id: &str) -> RedditResult<Submission> {
            unimplemented!("not used in these tests")
        }

        async fn fetch_submission_raw(&self, _id: &str) -> RedditResult<Value> {
            unimplemented!("not used in these tests")
        }

        async fn fetch_comments(
            &self,
            _id: &str,
        ) -> RedditResult<(Submission, Vec<CommentPayload>)> {
            unimplemented!("not used in these tests")
        }
    }

    async fn context() -> TaskContext {
        let store = Store::open_in_memory().unwrap();
        let queue = TaskQueue::open_in_memory(5, 2).unwrap();
        let config = Arc::new(CastpulseConfig {
            sentiment: castpulse_core::config::SentimentConfig {
                fallback_enabled: false,
                ..Default::default()
            },
            ..Default::default()
        });
        let pipeline = Arc::new(
            SentimentPipeline::new(
                Arc::new(KeywordScorer),
                None,
                &config.sentiment,
                &[],
                None,
            )
            .await,
        );
        TaskContext::new(
            store.clone(),
            queue,
            IngestionService::new(Arc::new(NoReddit), store.clone(), None, config.clone()),
            pipeline,
            AggregationService::new(store.clone()),
            AlertEvaluationService::new(store.clone()),
            AlertDeliveryService::new(store, &config.notifications),
            config,
        )
    }

    fn seed_thread(store: &Store) -> i64 {
        store
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
            .id
    }

    fn seed_comment(
        store: &Store,
        thread_id: i64,
        reddit_id: &str,
        parent: Option<&str>,
        body: &str,
    ) -> i64 {
        store
            .insert_comment(&NewComment {
                thread_id,
                reddit_id: reddit_id.to_string(),
                author_hash: None,
                body: body.to_string(),
                created_utc: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
                score: 10,
                parent_reddit_id: parent.map(String::from),
                time_window: Some("live".to_string()),
                created_at: Utc::now(),
            })
            .unwrap()
    }

    fn claimed(name: &str, args: Value) -> TaskRow {
        TaskRow {
            id: "t-1".to_string(),
            name: name.to_string(),
            queue: QueueName::route(name),
            args,
            attempts: 1,
            run_at: Utc::now(),
        }
    }

    async fn drain(ctx: &TaskContext) {
        loop {
            let mut ran_any = false;
            for queue in QueueName::ALL {
                while let Some(task) = ctx.queue.claim_due(queue).unwrap() {
                    dispatch(ctx, &task).await.unwrap();
                    ctx.queue.complete(&task).unwrap();
                    ran_any = true;
                }
            }
            if !ran_any {
                break;
            }
        }
    }

    #[tokio::test]
    async fn classify_link_aggregate_chain() {
        let ctx = context().await;
        let thread_id = seed_thread(&ctx.store);
        let lisa = ctx
            .store
            .insert_cast_member("lisa-barlow", "Lisa Barlow", None, "RHOSLC", true)
            .unwrap();
        ctx.store.insert_cast_alias(lisa, "Lisa").unwrap();
        let comment_id = seed_comment(
            &ctx.store,
            thread_id,
            "c1",
            None,
            "Honestly I loved how Lisa owned tonight.",
        );

        dispatch(
            &ctx,
            &claimed("classify_comments", json!({"comment_ids": [comment_id]})),
        )
        .await
        .unwrap();

        // Classification wrote back sentiment and queued linking.
        let comment = ctx.store.comment_by_id(comment_id).unwrap().unwrap();
        assert_eq!(comment.sentiment_label.as_deref(), Some("positive"));
        assert!(comment.sentiment_breakdown.is_some());
        assert_eq!(
            comment.ml_model_version.as_deref(),
            Some("bge-small-en-v1.5")
        );

        drain(&ctx).await;

        let mentions = ctx
            .store
            .mentions_for_comment(comment_id, comment.created_at)
            .unwrap();
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].cast_member_id, lisa);
        assert_eq!(mentions[0].method.as_deref(), Some("exact"));
        assert_eq!(mentions[0].sentiment_label, "positive");

        // Aggregates followed.
        let aggregates = ctx.store.aggregates_for_thread(thread_id).unwrap();
        assert_eq!(aggregates.len(), 2); // overall + live
    }

    #[tokio::test]
    async fn sarcasm_attenuates_stored_mentions() {
        let ctx = context().await;
        let thread_id = seed_thread(&ctx.store);
        let lisa = ctx
            .store
            .insert_cast_member("lisa-barlow", "Lisa Barlow", None, "RHOSLC", true)
            .unwrap();
        ctx.store.insert_cast_alias(lisa, "Lisa").unwrap();
        let comment_id = seed_comment(
            &ctx.store,
            thread_id,
            "c1",
            None,
            "Oh sure, Lisa totally owned tonight.",
        );

        dispatch(
            &ctx,
            &claimed("classify_comments", json!({"comment_ids": [comment_id]})),
        )
        .await
        .unwrap();
        ctx.store
            .set_comment_signals(comment_id, true, None, false, None)
            .unwrap();

        dispatch(
            &ctx,
            &claimed("link_entities", json!({"comment_ids": [comment_id]})),
        )
        .await
        .unwrap();

        let comment = ctx.store.comment_by_id(comment_id).unwrap().unwrap();
        let mentions = ctx
            .store
            .mentions_for_comment(comment_id, comment.created_at)
            .unwrap();
        assert_eq!(mentions.len(), 1);
        let mention = &mentions[0];
        // 0.9 primary score attenuated by the 0.6 sarcasm factor.
        assert!((mention.confidence.unwrap() - 0.9).abs() < 1e-9);
        assert!((mention.sentiment_score.unwrap() - 0.54).abs() < 1e-9);
        assert!(mention.is_sarcastic);
    }

    #[tokio::test]
    async fn replies_inherit_parent_mentions() {
        let ctx = context().await;
        let thread_id = seed_thread(&ctx.store);
        let lisa = ctx
            .store
            .insert_cast_member("lisa-barlow", "Lisa Barlow", None, "RHOSLC", true)
            .unwrap();
        ctx.store.insert_cast_alias(lisa, "Lisa").unwrap();
        let parent_id = seed_comment(
            &ctx.store,
            thread_id,
            "c1",
            None,
            "Lisa owned tonight, no contest.",
        );
        let reply_id = seed_comment(
            &ctx.store,
            thread_id,
            "c2",
            Some("c1"),
            "She really did, totally agree.",
        );

        dispatch(
            &ctx,
            &claimed(
                "classify_comments",
                json!({"comment_ids": [parent_id, reply_id]}),
            ),
        )
        .await
        .unwrap();
        dispatch(
            &ctx,
            &claimed(
                "link_entities",
                json!({"comment_ids": [parent_id, reply_id]}),
            ),
        )
        .await
        .unwrap();

        let reply = ctx.store.comment_by_id(reply_id).unwrap().unwrap();
        let mentions = ctx
            .store
            .mentions_for_comment(reply_id, reply.created_at)
            .unwrap();
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].cast_member_id, lisa);
        assert_eq!(mentions[0].method.as_deref(), Some("inherited_context"));
        assert!((mentions[0].weight.unwrap() - 0.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn chain_reaches_alert_delivery_queue() {
        let ctx = context().await;
        let thread_id = seed_thread(&ctx.store);
        let lisa = ctx
            .store
            .insert_cast_member("lisa-barlow", "Lisa Barlow", None, "RHOSLC", true)
            .unwrap();
        ctx.store.insert_cast_alias(lisa, "Lisa").unwrap();
        ctx.store
            .insert_alert_rule(&NewAlertRule {
                name: "positivity watch".to_string(),
                description: None,
                thread_id: Some(thread_id),
                cast_member_id: Some(lisa),
                rule_type: "sentiment_drop".to_string(),
                condition: json!({"window": "overall", "comparison": "gte", "threshold": 0.5}),
                is_active: true,
                channels: vec![],
            })
            .unwrap();
        let comment_id = seed_comment(
            &ctx.store,
            thread_id,
            "c1",
            None,
            "Lisa owned tonight.",
        );

        dispatch(
            &ctx,
            &claimed("classify_comments", json!({"comment_ids": [comment_id]})),
        )
        .await
        .unwrap();
        drain(&ctx).await;

        // The evaluation inserted an event and its delivery task ran
        // (no channels configured, so nothing was delivered).
        let latest = ctx.store.latest_event_for_rule(1).unwrap().unwrap();
        assert!(latest.delivered_channels.is_empty());
        assert_eq!(latest.thread_id, thread_id);
    }

    #[tokio::test]
    async fn poll_guard_suppresses_duplicate_scheduling() {
        let ctx = context().await;
        let outcome = IngestOutcome {
            thread_id: 7,
            reddit_id: "abc".to_string(),
            inserted: 0,
            updated: 0,
            skipped: 0,
            comment_ids: Vec::new(),
            poll_interval_seconds: 60,
            status: ThreadStatus::Live,
            should_schedule_poll: true,
            should_continue: true,
        };

        handle_ingest_outcome(&ctx, &outcome).unwrap();
        handle_ingest_outcome(&ctx, &outcome).unwrap();

        assert_eq!(
            ctx.queue
                .count_in_state(QueueName::Ingestion, "pending")
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_task_is_permanent_error() {
        let ctx = context().await;
        let result = dispatch(&ctx, &claimed("mystery_task", json!({}))).await;
        assert!(matches!(result, Err(TaskError::UnknownTask(_))));
    }
}
