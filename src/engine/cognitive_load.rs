use super::config::CognitiveLoadParams;
use super::types::CognitiveLoad;

/// Estimates the working-memory demand the given material places on a
/// reader. The input is the candidate answer's raw text, or the
/// concatenated retrieved context when run before generation. Each
/// sub-score is a proxy in [0,1]; the total is their weighted mean.
pub fn estimate(text: &str, params: &CognitiveLoadParams) -> CognitiveLoad {
    let intrinsic = intrinsic_load(text);
    let extraneous = extraneous_load(text);
    let germane = germane_load(text);

    let weight_sum = params.intrinsic_weight + params.extraneous_weight + params.germane_weight;
    let total = if weight_sum > 0.0 {
        ((params.intrinsic_weight * intrinsic
            + params.extraneous_weight * extraneous
            + params.germane_weight * germane)
            / weight_sum)
            .clamp(0.0, 1.0)
    } else {
        0.0
    };

    CognitiveLoad {
        intrinsic,
        extraneous,
        germane,
        total,
        needs_simplification: total > params.simplification_threshold,
    }
}

/// Word count above which a technical-looking token is assumed; crude but
/// stable across corpora.
const TECHNICAL_WORD_LEN: usize = 9;

/// Technical-term density at which intrinsic load saturates.
const DENSITY_CEILING: f64 = 0.35;

/// Demand inherent to the material itself: the denser the technical
/// vocabulary, the more concepts the reader must hold at once.
fn intrinsic_load(text: &str) -> f64 {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }
    let technical = words
        .iter()
        .filter(|w| {
            let letters = w.chars().filter(|c| c.is_alphanumeric()).count();
            letters >= TECHNICAL_WORD_LEN || w.chars().any(|c| c.is_numeric())
        })
        .count();
    (technical as f64 / words.len() as f64 / DENSITY_CEILING).clamp(0.0, 1.0)
}

/// Sentence-length spread (in words) at which the variance proxy saturates.
const SPREAD_CEILING: f64 = 12.0;

/// Nested or clause-heavy punctuation per sentence at which the nesting
/// proxy saturates.
const NESTING_CEILING: f64 = 4.0;

/// Demand from how the material is presented: uneven sentence lengths and
/// heavily nested clauses make the same content harder to track.
fn extraneous_load(text: &str) -> f64 {
    let lengths: Vec<f64> = sentences(text)
        .iter()
        .map(|s| s.split_whitespace().count() as f64)
        .collect();
    if lengths.is_empty() {
        return 0.0;
    }

    let mean = lengths.iter().sum::<f64>() / lengths.len() as f64;
    let variance = lengths.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / lengths.len() as f64;
    let spread = (variance.sqrt() / SPREAD_CEILING).clamp(0.0, 1.0);

    let nesting_marks = text
        .chars()
        .filter(|c| matches!(c, ',' | '，' | '(' | ')' | ':' | '：'))
        .count();
    let nesting = (nesting_marks as f64 / lengths.len() as f64 / NESTING_CEILING).clamp(0.0, 1.0);

    (0.5 * spread + 0.5 * nesting).clamp(0.0, 1.0)
}

/// Word-count band a well-sized explanation should land in.
const TARGET_BAND: (f64, f64) = (30.0, 180.0);

/// Demand from integrating the material into a schema: text far outside the
/// target length band, in either direction, asks more of the reader.
fn germane_load(text: &str) -> f64 {
    let words = text.split_whitespace().count() as f64;
    let (low, high) = TARGET_BAND;
    if words < low {
        ((low - words) / low).clamp(0.0, 1.0)
    } else if words > high {
        ((words - high) / high).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?', '。', '！', '？', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_short_definition_is_light() {
        let text = "Osmosis is the movement of water across a membrane. \
                    Water moves from the dilute side to the concentrated side. \
                    This evens out the concentrations over time and needs no added energy.";
        let load = estimate(text, &CognitiveLoadParams::default());
        assert!(load.total < 0.5);
        assert!(!load.needs_simplification);
    }

    #[test]
    fn dense_technical_text_triggers_simplification() {
        let dense = "Phosphorylation cascades modulate transmembrane glycoprotein \
                     conformations (allosterically, cooperatively, hierarchically), \
                     wherein autophosphorylation, transphosphorylation, dephosphorylation \
                     equilibria determine downstream transcriptional amplification \
                     thresholds, dependencies, kinetics. Yes. ";
        let text = dense.repeat(10);
        let load = estimate(&text, &CognitiveLoadParams::default());
        assert!(load.intrinsic > 0.6);
        assert!(load.total > 0.65);
        assert!(load.needs_simplification);
    }

    #[test]
    fn sub_scores_and_total_stay_in_unit_interval() {
        for text in ["", "word", &"electroencephalography, ".repeat(400)] {
            let load = estimate(text, &CognitiveLoadParams::default());
            for v in [load.intrinsic, load.extraneous, load.germane, load.total] {
                assert!((0.0..=1.0).contains(&v), "out of range for {text:.20}");
            }
        }
    }

    #[test]
    fn overlong_text_raises_germane_load() {
        let in_band = "plain words ".repeat(50);
        let overlong = "plain words ".repeat(400);
        let short = estimate(&in_band, &CognitiveLoadParams::default());
        let long = estimate(&overlong, &CognitiveLoadParams::default());
        assert!((short.germane).abs() < f64::EPSILON);
        assert!(long.germane > short.germane);
    }

    #[test]
    fn default_weights_are_equal() {
        let params = CognitiveLoadParams::default();
        assert!((params.intrinsic_weight - params.extraneous_weight).abs() < 1e-9);
        assert!((params.extraneous_weight - params.germane_weight).abs() < 1e-9);

        let text = "Mitochondria synthesize adenosine triphosphate continuously.";
        let load = estimate(text, &params);
        let mean = (load.intrinsic + load.extraneous + load.germane) / 3.0;
        assert!((load.total - mean).abs() < 1e-9);
    }
}
