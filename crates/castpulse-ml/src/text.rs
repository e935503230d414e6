//! Small text utilities shared by the linker and the sentiment heuristics.

/// Lowercase, strip social-media sigils, squash punctuation to spaces
/// and collapse runs of whitespace.
pub fn normalize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_space = true;
    for ch in value.trim().chars().flat_map(|c| c.to_lowercase()) {
        let mapped = match ch {
            '@' | '#' => ' ',
            c if c.is_ascii_alphanumeric() => c,
            c if c.is_whitespace() => ' ',
            _ => ' ',
        };
        if mapped == ' ' {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(mapped);
            last_space = false;
        }
    }
    out.trim_end().to_string()
}

/// Split on sentence-final punctuation followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if (b == b'.' || b == b'!' || b == b'?')
            && bytes.get(i + 1).is_some_and(|next| next.is_ascii_whitespace())
        {
            let sentence = text[start..=i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = i + 1;
        }
        i += 1;
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Best normalized-Levenshtein similarity of `needle` against any
/// equal-length character window of `haystack`, scaled to 0–100.
/// Mirrors a partial-ratio scorer: a short nickname inside a longer
/// span still scores high.
pub fn partial_ratio(needle: &str, haystack: &str) -> f64 {
    let (short, long) = if needle.chars().count() <= haystack.chars().count() {
        (needle, haystack)
    } else {
        (haystack, needle)
    };
    if short.is_empty() {
        return 0.0;
    }

    let long_chars: Vec<char> = long.chars().collect();
    let window = short.chars().count();
    let mut best: f64 = 0.0;
    for start in 0..=(long_chars.len() - window) {
        let candidate: String = long_chars[start..start + window].iter().collect();
        let score = strsim::normalized_levenshtein(short, &candidate);
        if score > best {
            best = score;
            if best >= 1.0 {
                break;
            }
        }
    }
    best * 100.0
}
