//! Sarcasm/toxicity attenuation applied when mention rows are built.

/// The comment-level signals attenuation reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttenuationFlags {
    pub is_sarcastic: bool,
    pub sarcasm_confidence: Option<f64>,
    pub is_toxic: bool,
    pub toxicity_confidence: Option<f64>,
}

/// Scale a sentiment magnitude down for sarcasm and toxicity.
///
/// A confirmed sarcastic comment keeps 60% of its magnitude; a
/// suspected one (confidence at or above the threshold) loses up to
/// 40% proportionally. Toxicity keeps 75% confirmed, up to 25%
/// suspected. The result is clamped to [0, 1]; callers keep the
/// unadjusted value separately.
pub fn attenuate_score(
    score: Option<f64>,
    flags: &AttenuationFlags,
    sarcasm_threshold: f64,
    toxicity_threshold: f64,
) -> Option<f64> {
    let mut adjusted = score?;

    let sarcasm_conf = flags.sarcasm_confidence.unwrap_or(0.0);
    if flags.is_sarcastic {
        adjusted *= 0.6;
    } else if sarcasm_conf >= sarcasm_threshold && sarcasm_conf > 0.0 {
        adjusted *= (1.0 - 0.4 * sarcasm_conf.min(1.0)).max(0.0);
    }

    let toxicity_conf = flags.toxicity_confidence.unwrap_or(0.0);
    if flags.is_toxic {
        adjusted *= 0.75;
    } else if toxicity_conf >= toxicity_threshold && toxicity_conf > 0.0 {
        adjusted *= (1.0 - 0.25 * toxicity_conf.min(1.0)).max(0.0);
    }

    Some(adjusted.clamp(0.0, 1.0))
}
