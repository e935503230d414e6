use std::collections::HashMap;

use tracing::info;

use castpulse_store::models::{AggregateRow, ThreadMentionRow};
use castpulse_store::Store;

use crate::error::Result;

const OVERALL_WINDOW: &str = "overall";
const UNSPECIFIED_WINDOW: &str = "unspecified";
/// 95% normal quantile for the Wald interval.
const Z_95: f64 = 1.96;

/// One mention flattened for aggregation: its class, the comment's
/// vote score and window, and the linker's pre-computed weight if any.
#[derive(Debug, Clone)]
pub struct MentionAggregateInput {
    pub cast_member_id: i64,
    pub sentiment_label: Option<String>,
    pub comment_score: i64,
    pub time_window: Option<String>,
    pub weight: Option<f64>,
}

impl From<ThreadMentionRow> for MentionAggregateInput {
    fn from(row: ThreadMentionRow) -> Self {
        Self {
            cast_member_id: row.cast_member_id,
            sentiment_label: row.sentiment_label,
            comment_score: row.comment_score,
            time_window: row.time_window,
            weight: row.weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedMetrics {
    pub net_sentiment: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub positive_pct: f64,
    pub neutral_pct: f64,
    pub negative_pct: f64,
    pub agreement_score: f64,
    pub mention_count: i64,
}

#[derive(Debug, Clone)]
pub struct CastAggregation {
    pub cast_member_id: i64,
    pub share_of_voice: f64,
    pub overall: Option<AggregatedMetrics>,
    pub time_windows: HashMap<String, AggregatedMetrics>,
    pub sentiment_shifts: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct AggregationResult {
    pub thread_id: i64,
    pub total_mentions: i64,
    pub cast: HashMap<i64, CastAggregation>,
    pub time_windows: HashMap<String, AggregatedMetrics>,
    pub time_window_shifts: HashMap<String, f64>,
}

#[derive(Default)]
struct Accumulator {
    weighted: [f64; 3],
    counts: [i64; 3],
    weight_sum: f64,
}

const POSITIVE: usize = 0;
const NEUTRAL: usize = 1;
const NEGATIVE: usize = 2;

impl Accumulator {
    fn add(&mut self, label: Option<&str>, score: i64, weight: Option<f64>) {
        let class = normalize_label(label);
        // Pre-computed weight wins; otherwise vote-based with a floor
        // of one so downvoted mentions still count.
        let effective_weight = weight.unwrap_or_else(|| (score.max(0) + 1) as f64);
        self.counts[class] += 1;
        self.weighted[class] += effective_weight;
        self.weight_sum += effective_weight;
    }

    fn finalize(&self) -> Option<AggregatedMetrics> {
        let total_count: i64 = self.counts.iter().sum();
        if total_count == 0 {
            return None;
        }

        let mut total_weight: f64 = self.weighted.iter().sum();
        if total_weight == 0.0 {
            // All-zero weights still reflect mention counts.
            total_weight = total_count as f64;
        }

        let net_sentiment = clamp((self.weighted[POSITIVE] - self.weighted[NEGATIVE]) / total_weight);

        let positive_pct = self.counts[POSITIVE] as f64 / total_count as f64;
        let neutral_pct = self.counts[NEUTRAL] as f64 / total_count as f64;
        let negative_pct = self.counts[NEGATIVE] as f64 / total_count as f64;

        let se = standard_error(positive_pct, negative_pct, total_count);
        Some(AggregatedMetrics {
            net_sentiment,
            ci_lower: clamp(net_sentiment - Z_95 * se),
            ci_upper: clamp(net_sentiment + Z_95 * se),
            positive_pct,
            neutral_pct,
            negative_pct,
            agreement_score: self.weight_sum / total_count as f64,
            mention_count: total_count,
        })
    }
}

/// Pure aggregation over a thread's mentions.
pub struct AggregationCalculator {
    thread_id: i64,
    mentions: Vec<MentionAggregateInput>,
}

impl AggregationCalculator {
    pub fn new(thread_id: i64, mentions: Vec<MentionAggregateInput>) -> Self {
        Self {
            thread_id,
            mentions,
        }
    }

    pub fn run(&self) -> AggregationResult {
        let mut cast_window: HashMap<(i64, String), Accumulator> = HashMap::new();
        let mut cast_overall: HashMap<i64, Accumulator> = HashMap::new();
        let mut window_acc: HashMap<String, Accumulator> = HashMap::new();

        for mention in &self.mentions {
            let window = normalize_window(mention.time_window.as_deref());
            let label = mention.sentiment_label.as_deref();

            cast_window
                .entry((mention.cast_member_id, window.clone()))
                .or_default()
                .add(label, mention.comment_score, mention.weight);
            cast_overall
                .entry(mention.cast_member_id)
                .or_default()
                .add(label, mention.comment_score, mention.weight);
            window_acc
                .entry(window)
                .or_default()
                .add(label, mention.comment_score, mention.weight);
        }

        let finalized_overall: HashMap<i64, AggregatedMetrics> = cast_overall
            .iter()
            .filter_map(|(cast_id, acc)| acc.finalize().map(|m| (*cast_id, m)))
            .collect();
        let total_mentions: i64 = finalized_overall.values().map(|m| m.mention_count).sum();

        let mut cast_results: HashMap<i64, CastAggregation> = HashMap::new();
        for cast_id in cast_overall.keys() {
            let overall = finalized_overall.get(cast_id).cloned();

            let mut windows: HashMap<String, AggregatedMetrics> = HashMap::new();
            for ((candidate_id, window), acc) in &cast_window {
                if candidate_id != cast_id {
                    continue;
                }
                if let Some(metrics) = acc.finalize() {
                    windows.insert(window.clone(), metrics);
                }
            }

            let share_of_voice = match (&overall, total_mentions) {
                (Some(metrics), total) if total > 0 => metrics.mention_count as f64 / total as f64,
                _ => 0.0,
            };
            let sentiment_shifts = compute_sentiment_shifts(&windows);

            cast_results.insert(
                *cast_id,
                CastAggregation {
                    cast_member_id: *cast_id,
                    share_of_voice,
                    overall,
                    time_windows: windows,
                    sentiment_shifts,
                },
            );
        }

        let time_windows: HashMap<String, AggregatedMetrics> = window_acc
            .iter()
            .filter_map(|(window, acc)| acc.finalize().map(|m| (window.clone(), m)))
            .collect();
        let time_window_shifts = compute_sentiment_shifts(&time_windows);

        AggregationResult {
            thread_id: self.thread_id,
            total_mentions,
            cast: cast_results,
            time_windows,
            time_window_shifts,
        }
    }
}

/// Load mention data, run the calculator, and rewrite the thread's
/// aggregate rows.
pub struct AggregationService {
    store: Store,
}

impl AggregationService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn compute(&self, thread_id: i64) -> Result<AggregationResult> {
        let inputs: Vec<MentionAggregateInput> = self
            .store
            .mention_rows_for_thread(thread_id)?
            .into_iter()
            .map(Into::into)
            .collect();

        let result = AggregationCalculator::new(thread_id, inputs).run();
        self.persist(thread_id, &result)?;
        info!(
            thread_id,
            total_mentions = result.total_mentions,
            casts = result.cast.len(),
            "aggregates rewritten"
        );
        Ok(result)
    }

    /// One row per (cast, "overall") and one per (cast, window);
    /// window-only metrics are recomputed on read rather than stored.
    fn persist(&self, thread_id: i64, result: &AggregationResult) -> Result<()> {
        let mut rows: Vec<AggregateRow> = Vec::new();
        for cast in result.cast.values() {
            if let Some(overall) = &cast.overall {
                rows.push(to_row(thread_id, cast.cast_member_id, OVERALL_WINDOW, overall));
            }
            for (window, metrics) in &cast.time_windows {
                rows.push(to_row(thread_id, cast.cast_member_id, window, metrics));
            }
        }
        rows.sort_by(|a, b| {
            (a.cast_member_id, a.time_window.as_str())
                .cmp(&(b.cast_member_id, b.time_window.as_str()))
        });
        self.store.replace_aggregates(thread_id, &rows)?;
        Ok(())
    }
}

fn to_row(
    thread_id: i64,
    cast_member_id: i64,
    window: &str,
    metrics: &AggregatedMetrics,
) -> AggregateRow {
    AggregateRow {
        thread_id,
        cast_member_id,
        time_window: window.to_string(),
        net_sentiment: metrics.net_sentiment,
        ci_lower: metrics.ci_lower,
        ci_upper: metrics.ci_upper,
        positive_pct: metrics.positive_pct,
        neutral_pct: metrics.neutral_pct,
        negative_pct: metrics.negative_pct,
        agreement_score: metrics.agreement_score,
        mention_count: metrics.mention_count,
    }
}

fn normalize_label(label: Option<&str>) -> usize {
    match label.map(|l| l.to_lowercase()) {
        Some(ref l) if l == "positive" => POSITIVE,
        Some(ref l) if l == "negative" => NEGATIVE,
        _ => NEUTRAL,
    }
}

fn normalize_window(window: Option<&str>) -> String {
    match window {
        Some(w) if !w.is_empty() => w.to_lowercase(),
        _ => UNSPECIFIED_WINDOW.to_string(),
    }
}

fn standard_error(positive_pct: f64, negative_pct: f64, total_count: i64) -> f64 {
    if total_count <= 1 {
        return 0.0;
    }
    let n = total_count as f64;
    let var_pos = positive_pct * (1.0 - positive_pct) / n;
    let var_neg = negative_pct * (1.0 - negative_pct) / n;
    let value = var_pos + var_neg;
    if value > 0.0 {
        value.sqrt()
    } else {
        0.0
    }
}

fn compute_sentiment_shifts(metrics: &HashMap<String, AggregatedMetrics>) -> HashMap<String, f64> {
    let value = |window: &str| metrics.get(window).map(|m| m.net_sentiment);
    let live = value("live");
    let day_of = value("day_of");
    let after = value("after");

    let mut shifts = HashMap::new();
    if let (Some(live), Some(day_of)) = (live, day_of) {
        shifts.insert("day_of_vs_live".to_string(), day_of - live);
    }
    if let (Some(day_of), Some(after)) = (day_of, after) {
        shifts.insert("after_vs_day_of".to_string(), after - day_of);
    }
    if let (Some(live), Some(after)) = (live, after) {
        shifts.insert("after_vs_live".to_string(), after - live);
    }
    shifts
}

fn clamp(value: f64) -> f64 {
    value.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(
        cast_member_id: i64,
        label: &str,
        score: i64,
        window: &str,
    ) -> MentionAggregateInput {
        MentionAggregateInput {
            cast_member_id,
            sentiment_label: Some(label.to_string()),
            comment_score: score,
            time_window: Some(window.to_string()),
            weight: None,
        }
    }

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-3, "expected {b}, got {a}");
    }

    #[test]
    fn vote_weighted_metrics() {
        let mentions = vec![
            input(1, "positive", 10, "live"),
            input(1, "negative", 2, "day_of"),
            input(2, "neutral", 0, "live"),
            input(2, "negative", -3, "after"),
        ];

        let result = AggregationCalculator::new(99, mentions).run();

        assert_eq!(result.thread_id, 99);
        assert_eq!(result.total_mentions, 4);
        assert_eq!(result.cast.len(), 2);
        assert_eq!(result.time_windows.len(), 3);

        let cast_one = &result.cast[&1];
        let overall = cast_one.overall.as_ref().unwrap();
        assert_eq!(overall.mention_count, 2);
        approx(cast_one.share_of_voice, 0.5);
        approx(overall.net_sentiment, 8.0 / 14.0);
        assert!(cast_one.sentiment_shifts.contains_key("day_of_vs_live"));

        let live = &cast_one.time_windows["live"];
        approx(live.net_sentiment, 1.0);
        approx(live.positive_pct, 1.0);

        let cast_two = &result.cast[&2];
        approx(cast_two.overall.as_ref().unwrap().net_sentiment, -0.5);
        approx(cast_two.share_of_voice, 0.5);
        assert!(!cast_two.sentiment_shifts.contains_key("after_vs_day_of"));

        approx(result.time_window_shifts["day_of_vs_live"], -1.9167);
    }

    #[test]
    fn ci_brackets_net_sentiment() {
        let mentions = vec![
            input(1, "positive", 4, "live"),
            input(1, "positive", 2, "live"),
            input(1, "negative", 1, "live"),
            input(1, "neutral", 0, "live"),
        ];
        let result = AggregationCalculator::new(1, mentions).run();
        let overall = result.cast[&1].overall.as_ref().unwrap();

        assert!(overall.ci_lower <= overall.net_sentiment);
        assert!(overall.net_sentiment <= overall.ci_upper);
        assert!(overall.ci_lower >= -1.0 && overall.ci_upper <= 1.0);
        let pct_total = overall.positive_pct + overall.neutral_pct + overall.negative_pct;
        assert!((pct_total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn single_mention_has_zero_width_interval() {
        let result =
            AggregationCalculator::new(1, vec![input(1, "positive", 5, "live")]).run();
        let overall = result.cast[&1].overall.as_ref().unwrap();
        approx(overall.ci_lower, overall.net_sentiment);
        approx(overall.ci_upper, overall.net_sentiment);
    }

    #[test]
    fn precomputed_weight_overrides_votes() {
        let mut weighted = input(1, "positive", 100, "live");
        weighted.weight = Some(0.5);
        let result = AggregationCalculator::new(1, vec![
            weighted,
            input(1, "negative", 0, "live"),
        ])
        .run();
        let overall = result.cast[&1].overall.as_ref().unwrap();
        // weights: 0.5 positive vs 1.0 negative
        approx(overall.net_sentiment, (0.5 - 1.0) / 1.5);
    }

    #[test]
    fn missing_label_and_window_normalize() {
        let mentions = vec![MentionAggregateInput {
            cast_member_id: 1,
            sentiment_label: None,
            comment_score: 3,
            time_window: None,
            weight: None,
        }];
        let result = AggregationCalculator::new(1, mentions).run();
        assert!(result.time_windows.contains_key("unspecified"));
        approx(result.cast[&1].overall.as_ref().unwrap().neutral_pct, 1.0);
    }

    #[test]
    fn empty_input_is_empty_result() {
        let result = AggregationCalculator::new(123, Vec::new()).run();
        assert_eq!(result.thread_id, 123);
        assert_eq!(result.total_mentions, 0);
        assert!(result.cast.is_empty());
        assert!(result.time_windows.is_empty());
        assert!(result.time_window_shifts.is_empty());
    }

    mod service {
        use super::*;
        use castpulse_core::types::ThreadStatus;
        use castpulse_store::models::{NewComment, NewMention, NewThread};
        use chrono::{TimeZone, Utc};

        fn seed(store: &Store) -> (i64, i64) {
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
            let cast_id = store
                .insert_cast_member("lisa-barlow", "Lisa Barlow", None, "RHOSLC", true)
                .unwrap();
            (thread_id, cast_id)
        }

        fn seed_mention(store: &Store, thread_id: i64, cast_id: i64, label: &str, score: i64) {
            let created_at = Utc::now();
            let comment_id = store
                .insert_comment(&NewComment {
                    thread_id,
                    reddit_id: format!("c{label}{score}"),
                    author_hash: None,
                    body: "text".to_string(),
                    created_utc: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
                    score,
                    parent_reddit_id: None,
                    time_window: Some("live".to_string()),
                    created_at,
                })
                .unwrap();
            store
                .replace_comment_mentions(comment_id, created_at, &[NewMention {
                    comment_id,
                    comment_created_at: created_at,
                    cast_member_id: cast_id,
                    sentiment_label: label.to_string(),
                    sentiment_score: Some(0.8),
                    confidence: Some(0.9),
                    weight: None,
                    method: Some("exact".to_string()),
                    quote: None,
                    is_sarcastic: false,
                    is_toxic: false,
                }])
                .unwrap();
        }

        #[test]
        fn compute_rewrites_rows_and_is_idempotent() {
            let store = Store::open_in_memory().unwrap();
            let (thread_id, cast_id) = seed(&store);
            seed_mention(&store, thread_id, cast_id, "positive", 10);
            seed_mention(&store, thread_id, cast_id, "negative", 2);

            let service = AggregationService::new(store.clone());
            service.compute(thread_id).unwrap();
            let first = store.aggregates_for_thread(thread_id).unwrap();
            service.compute(thread_id).unwrap();
            let second = store.aggregates_for_thread(thread_id).unwrap();

            // overall + live
            assert_eq!(first.len(), 2);
            assert_eq!(first.len(), second.len());
            for (a, b) in first.iter().zip(&second) {
                assert_eq!(a.time_window, b.time_window);
                assert_eq!(a.net_sentiment, b.net_sentiment);
                assert_eq!(a.mention_count, b.mention_count);
                assert_eq!(a.agreement_score, b.agreement_score);
            }
        }

        #[test]
        fn compute_on_empty_thread_writes_nothing() {
            let store = Store::open_in_memory().unwrap();
            let (thread_id, _cast_id) = seed(&store);
            let service = AggregationService::new(store.clone());
            let result = service.compute(thread_id).unwrap();

            assert_eq!(result.total_mentions, 0);
            assert!(store.aggregates_for_thread(thread_id).unwrap().is_empty());
        }
    }
}
