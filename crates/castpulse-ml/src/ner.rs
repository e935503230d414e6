//! Capitalized-span entity recognizer.
//!
//! A lightweight stand-in for a full NER model: maximal runs of
//! capitalized tokens are treated as person-like entities. Two
//! guards keep the candidate set clean: capitalized function words
//! never join a run, and runs that open a sentence are dropped
//! entirely — sentence-initial capitalization carries no signal, and
//! the exact alias scan already owns those mentions.

use std::collections::HashSet;
use std::sync::LazyLock;

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "i", "a", "an", "the", "my", "this", "that", "these", "those", "she", "he", "they", "it",
        "we", "you", "but", "and", "or", "if", "so", "when", "what", "who", "why", "how", "not",
        "no", "yes", "omg", "lol", "also", "then", "now", "just", "still", "honestly",
    ]
    .into()
});

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpan {
    pub text: String,
}

fn is_capitalized(token: &str) -> bool {
    token
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() && c.is_uppercase())
}

fn strip_token(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
}

/// Extract capitalized-token runs from `text`.
pub fn extract_entities(text: &str) -> Vec<EntitySpan> {
    let mut spans = Vec::new();
    let mut run: Vec<&str> = Vec::new();
    let mut run_opens_sentence = false;
    let mut at_sentence_start = true;

    fn flush(run: &mut Vec<&str>, opens_sentence: bool, spans: &mut Vec<EntitySpan>) {
        if run.is_empty() {
            return;
        }
        let meaningful = run.iter().any(|t| t.len() >= 2);
        if meaningful && !opens_sentence {
            spans.push(EntitySpan {
                text: run.join(" "),
            });
        }
        run.clear();
    }

    for raw in text.split_whitespace() {
        let token = strip_token(raw);
        if token.is_empty() {
            flush(&mut run, run_opens_sentence, &mut spans);
            at_sentence_start = raw.ends_with(['.', '!', '?']);
            continue;
        }

        if is_capitalized(token) && !STOPWORDS.contains(token.to_lowercase().as_str()) {
            if run.is_empty() {
                run_opens_sentence = at_sentence_start;
            }
            run.push(token);
        } else {
            flush(&mut run, run_opens_sentence, &mut spans);
        }

        // Trailing punctuation ends the run even when the next word is
        // capitalized ("with Lisa. Meredith though" is two contexts).
        if raw.ends_with(['.', '!', '?', ',', ';', ':']) {
            flush(&mut run, run_opens_sentence, &mut spans);
        }
        at_sentence_start = raw.ends_with(['.', '!', '?']);
    }
    flush(&mut run, run_opens_sentence, &mut spans);
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(spans: Vec<EntitySpan>) -> Vec<String> {
        spans.into_iter().map(|s| s.text).collect()
    }

    #[test]
    fn multi_word_names_stay_together() {
        let spans = texts(extract_entities("I think Lisa Barlow owned tonight"));
        assert_eq!(spans, vec!["Lisa Barlow"]);
    }

    #[test]
    fn sentence_breaks_split_runs() {
        let spans = texts(extract_entities("I adore Lisa. So glad Meredith showed up."));
        assert_eq!(spans, vec!["Lisa", "Meredith"]);
    }

    #[test]
    fn sentence_initial_runs_are_dropped() {
        let spans = texts(extract_entities("Lisa absolutely owned tonight's episode."));
        assert!(spans.is_empty());
    }

    #[test]
    fn capitalized_function_words_are_ignored() {
        let spans = texts(extract_entities("The show was fine. She said so."));
        assert!(spans.is_empty());
    }
}
