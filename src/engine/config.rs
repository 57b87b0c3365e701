use serde::{Deserialize, Serialize};

/// Blend weights for the context-aware composite score. Must sum to 1.0
/// (validated on load and on optimizer proposals).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacsWeights {
    pub base: f64,
    pub personal: f64,
    pub global: f64,
    pub context: f64,
}

impl Default for CacsWeights {
    fn default() -> Self {
        Self {
            base: 0.30,
            personal: 0.25,
            global: 0.25,
            context: 0.20,
        }
    }
}

impl CacsWeights {
    pub fn sum(&self) -> f64 {
        self.base + self.personal + self.global + self.context
    }

    pub fn is_valid(&self) -> bool {
        (self.sum() - 1.0).abs() < 1e-6
            && self.base >= 0.0
            && self.personal >= 0.0
            && self.global >= 0.0
            && self.context >= 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalParams {
    /// Passages fetched from the vector channel per query.
    pub passage_top_k: usize,
    /// Knowledge-base entries fetched per query.
    pub knowledge_top_k: usize,
    /// QA similarity at or above which the stored answer is returned directly.
    pub direct_match_threshold: f64,
    /// Below this best-candidate similarity the query is rejected.
    pub min_similarity: f64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            passage_top_k: 10,
            knowledge_top_k: 5,
            direct_match_threshold: 0.90,
            min_similarity: 0.40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZpdParams {
    /// Outcomes considered per estimate.
    pub window_size: usize,
    /// Minimum outcome-bearing interactions before any move is recommended.
    pub min_outcomes: usize,
    pub promote_threshold: f64,
    pub demote_threshold: f64,
}

impl Default for ZpdParams {
    fn default() -> Self {
        Self {
            window_size: 20,
            min_outcomes: 3,
            promote_threshold: 0.80,
            demote_threshold: 0.40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveLoadParams {
    pub intrinsic_weight: f64,
    pub extraneous_weight: f64,
    pub germane_weight: f64,
    /// Total load above this triggers simplification of the answer plan.
    pub simplification_threshold: f64,
}

impl Default for CognitiveLoadParams {
    fn default() -> Self {
        Self {
            intrinsic_weight: 1.0 / 3.0,
            extraneous_weight: 1.0 / 3.0,
            germane_weight: 1.0 / 3.0,
            simplification_threshold: 0.65,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    /// Hard ceiling on a single generation call, milliseconds.
    pub timeout_ms: u64,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Top scored candidates handed to the generator as grounding.
    pub grounding_top_n: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            max_tokens: 1024,
            temperature: 0.4,
            grounding_top_n: 3,
        }
    }
}

/// Global component switches. Per-session overrides and request-level
/// resolution live in the engine, not here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentFlags {
    pub cacs_enabled: bool,
    pub zpd_enabled: bool,
    pub bloom_enabled: bool,
    pub cognitive_load_enabled: bool,
    pub personalization_enabled: bool,
}

impl Default for ComponentFlags {
    fn default() -> Self {
        Self {
            cacs_enabled: true,
            zpd_enabled: true,
            bloom_enabled: true,
            cognitive_load_enabled: true,
            personalization_enabled: true,
        }
    }
}

/// Per-session partial flag overrides. Unset fields fall through to the
/// global flags; session settings always win where present.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FlagOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cacs_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zpd_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bloom_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cognitive_load_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personalization_enabled: Option<bool>,
}

impl FlagOverrides {
    pub fn is_empty(&self) -> bool {
        self.cacs_enabled.is_none()
            && self.zpd_enabled.is_none()
            && self.bloom_enabled.is_none()
            && self.cognitive_load_enabled.is_none()
            && self.personalization_enabled.is_none()
    }

    pub fn resolve(&self, base: ComponentFlags) -> crate::engine::types::ComponentActivation {
        crate::engine::types::ComponentActivation {
            cacs: self.cacs_enabled.unwrap_or(base.cacs_enabled),
            zpd: self.zpd_enabled.unwrap_or(base.zpd_enabled),
            bloom: self.bloom_enabled.unwrap_or(base.bloom_enabled),
            cognitive_load: self
                .cognitive_load_enabled
                .unwrap_or(base.cognitive_load_enabled),
            personalization: self
                .personalization_enabled
                .unwrap_or(base.personalization_enabled),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub weights: CacsWeights,
    pub retrieval: RetrievalParams,
    pub zpd: ZpdParams,
    pub cognitive_load: CognitiveLoadParams,
    pub generation: GenerationParams,
    pub flags: ComponentFlags,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ENGINE_CACS_ENABLED") {
            config.flags.cacs_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ENGINE_ZPD_ENABLED") {
            config.flags.zpd_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ENGINE_BLOOM_ENABLED") {
            config.flags.bloom_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ENGINE_COGNITIVE_LOAD_ENABLED") {
            config.flags.cognitive_load_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ENGINE_PERSONALIZATION_ENABLED") {
            config.flags.personalization_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ENGINE_PASSAGE_TOP_K") {
            if let Ok(k) = val.parse() {
                config.retrieval.passage_top_k = k;
            }
        }
        if let Ok(val) = std::env::var("ENGINE_KNOWLEDGE_TOP_K") {
            if let Ok(k) = val.parse() {
                config.retrieval.knowledge_top_k = k;
            }
        }
        if let Ok(val) = std::env::var("ENGINE_MIN_SIMILARITY") {
            if let Ok(v) = val.parse::<f64>() {
                config.retrieval.min_similarity = v.clamp(0.0, 1.0);
            }
        }
        if let Ok(val) = std::env::var("ENGINE_DIRECT_MATCH_THRESHOLD") {
            if let Ok(v) = val.parse::<f64>() {
                config.retrieval.direct_match_threshold = v.clamp(0.0, 1.0);
            }
        }
        if let Ok(val) = std::env::var("ENGINE_GENERATION_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                config.generation.timeout_ms = v;
            }
        }

        config
    }
}

/// A bounded parameter change proposed by the optimizer. Applied only after
/// an operator accepts it; every field is optional so a proposal can touch
/// a single knob.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<CacsWeights>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passage_top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simplification_threshold: Option<f64>,
}

impl ConfigDelta {
    pub fn is_empty(&self) -> bool {
        self.weights.is_none()
            && self.passage_top_k.is_none()
            && self.min_similarity.is_none()
            && self.simplification_threshold.is_none()
    }

    /// Returns a copy of `base` with the delta applied, or `None` when the
    /// delta would leave the config invalid.
    pub fn apply_to(&self, base: &EngineConfig) -> Option<EngineConfig> {
        let mut next = base.clone();
        if let Some(w) = self.weights {
            if !w.is_valid() {
                return None;
            }
            next.weights = w;
        }
        if let Some(k) = self.passage_top_k {
            if k == 0 || k > 100 {
                return None;
            }
            next.retrieval.passage_top_k = k;
        }
        if let Some(s) = self.min_similarity {
            if !(0.0..=1.0).contains(&s) {
                return None;
            }
            next.retrieval.min_similarity = s;
        }
        if let Some(t) = self.simplification_threshold {
            if !(0.0..=1.0).contains(&t) {
                return None;
            }
            next.cognitive_load.simplification_threshold = t;
        }
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        assert!(CacsWeights::default().is_valid());
    }

    #[test]
    fn default_estimator_windows_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.zpd.window_size, 20);
        assert_eq!(config.generation.grounding_top_n, 3);
    }

    #[test]
    fn delta_rejects_invalid_weights() {
        let delta = ConfigDelta {
            weights: Some(CacsWeights {
                base: 0.9,
                personal: 0.9,
                global: 0.0,
                context: 0.0,
            }),
            ..Default::default()
        };
        assert!(delta.apply_to(&EngineConfig::default()).is_none());
    }

    #[test]
    fn session_override_wins_over_global_flag() {
        let mut global = ComponentFlags::default();
        global.cacs_enabled = false;
        let overrides = FlagOverrides {
            cacs_enabled: Some(true),
            ..Default::default()
        };
        let active = overrides.resolve(global);
        assert!(active.cacs);
        // Untouched flags fall through.
        assert!(active.zpd);
    }

    #[test]
    fn delta_applies_partial_change() {
        let delta = ConfigDelta {
            min_similarity: Some(0.5),
            ..Default::default()
        };
        let next = delta.apply_to(&EngineConfig::default()).unwrap();
        assert!((next.retrieval.min_similarity - 0.5).abs() < f64::EPSILON);
        assert_eq!(next.retrieval.passage_top_k, 10);
    }
}
