//! Scene tone vectors and drift scoring.
//!
//! The vector computation sits behind [`ToneModel`] so the heuristic can be
//! swapped without touching the runner. The default model scores five axes
//! from small word lists; drift is the mean absolute deviation of a scene's
//! vector from the rolling baseline of the preceding scenes, scaled to make
//! the threshold readable.

use serde::Serialize;

/// A scene's tone drift exceeding this emits a `tone_drift` issue.
pub const DRIFT_THRESHOLD: f64 = 2.5;

pub const AXES: [&str; 5] = ["dark", "light", "tense", "calm", "formal"];

#[derive(Debug, Clone, Serialize)]
pub struct ToneReading {
    pub vector: Vec<f64>,
    pub drift: f64,
}

/// Pluggable per-scene tone summary.
pub trait ToneModel: Send + Sync {
    /// Numeric tone vector for one scene's text. All implementations must
    /// return vectors of the same length for the same model instance.
    fn tone_vector(&self, text: &str) -> Vec<f64>;
}

/// Default word-list heuristic: per axis, matches per hundred words.
#[derive(Debug, Default)]
pub struct LexiconTone;

const DARK: &[&str] = &[
    "dark", "shadow", "blood", "dead", "death", "cold", "grave", "black", "fear", "night",
];
const LIGHT: &[&str] = &[
    "bright", "sun", "warm", "laugh", "smile", "golden", "gentle", "hope", "dawn", "soft",
];
const TENSE: &[&str] = &[
    "ran", "slammed", "screamed", "grabbed", "suddenly", "knife", "burst", "froze", "sharp",
    "panic",
];
const CALM: &[&str] = &[
    "quiet", "slow", "still", "rest", "breath", "settled", "drifted", "peace", "ease", "hush",
];
const FORMAL: &[&str] = &[
    "therefore", "indeed", "perhaps", "shall", "whom", "sir", "madam", "request", "regard",
    "honour",
];

impl ToneModel for LexiconTone {
    fn tone_vector(&self, text: &str) -> Vec<f64> {
        let words = super::repetition::tokenize_words(text);
        if words.is_empty() {
            return vec![0.0; AXES.len()];
        }
        let per_hundred = 100.0 / words.len() as f64;
        [DARK, LIGHT, TENSE, CALM, FORMAL]
            .iter()
            .map(|list| {
                let hits = words.iter().filter(|w| list.contains(&w.as_str())).count();
                hits as f64 * per_hundred
            })
            .collect()
    }
}

/// Mean absolute deviation from the baseline, scaled by 10 so word-list
/// frequencies land in the same range as the threshold.
pub fn drift_score(vector: &[f64], baseline: &[f64]) -> f64 {
    if vector.is_empty() || vector.len() != baseline.len() {
        return 0.0;
    }
    let sum: f64 = vector
        .iter()
        .zip(baseline)
        .map(|(v, b)| (v - b).abs())
        .sum();
    sum / vector.len() as f64 * 10.0
}

/// Element-wise mean of the baseline window. Empty window yields `None`.
pub fn rolling_baseline(window: &[Vec<f64>]) -> Option<Vec<f64>> {
    let first = window.first()?;
    let len = first.len();
    let mut mean = vec![0.0; len];
    for v in window {
        for (m, x) in mean.iter_mut().zip(v) {
            *m += x;
        }
    }
    for m in &mut mean {
        *m /= window.len() as f64;
    }
    Some(mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_zero_vector() {
        assert_eq!(LexiconTone.tone_vector(""), vec![0.0; AXES.len()]);
    }

    #[test]
    fn dark_text_scores_the_dark_axis() {
        let v = LexiconTone.tone_vector("blood and shadow in the dark night");
        assert!(v[0] > 0.0);
        assert_eq!(v[1], 0.0);
    }

    #[test]
    fn identical_vectors_have_zero_drift() {
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(drift_score(&v, &v), 0.0);
    }

    #[test]
    fn drift_scales_with_deviation() {
        let baseline = vec![0.0, 0.0];
        let near = drift_score(&[0.1, 0.1], &baseline);
        let far = drift_score(&[1.0, 1.0], &baseline);
        assert!(far > near);
        assert!(far >= DRIFT_THRESHOLD);
    }

    #[test]
    fn baseline_averages_the_window() {
        let base = rolling_baseline(&[vec![0.0, 2.0], vec![2.0, 4.0]]).unwrap();
        assert_eq!(base, vec![1.0, 3.0]);
    }

    #[test]
    fn empty_window_has_no_baseline() {
        assert!(rolling_baseline(&[]).is_none());
    }
}
