use codex_bridge_backend::ReasoningEffort;
use serde::Serialize;

use ReasoningEffort::{High, Low, Medium};

#[derive(Debug, Clone, Copy)]
pub struct ReasoningPreset {
    pub level: ReasoningEffort,
    pub label: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ModelPreset {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub reasonings: &'static [ReasoningPreset],
    pub default_reasoning: ReasoningEffort,
}

impl ModelPreset {
    pub fn allows(&self, level: ReasoningEffort) -> bool {
        self.reasonings.iter().any(|reasoning| reasoning.level == level)
    }
}

pub const MODEL_PRESETS: &[ModelPreset] = &[
    ModelPreset {
        id: "gpt-5-codex",
        label: "GPT-5-Codex",
        description: "Flagship Codex for complex development work: deep code changes and heavy tool use.",
        reasonings: &[
            ReasoningPreset {
                level: Low,
                label: "Low",
                description: "Fastest responses with the shallowest reasoning; good for simple edits.",
            },
            ReasoningPreset {
                level: Medium,
                label: "Medium",
                description: "Balances reasoning depth and speed (default).",
            },
            ReasoningPreset {
                level: High,
                label: "High",
                description: "Deepest reasoning for hard bugs and large refactors.",
            },
        ],
        default_reasoning: Medium,
    },
    ModelPreset {
        id: "gpt-5-codex-mini",
        label: "GPT-5-Codex-Mini",
        description: "Lightweight Codex for everyday edits and scripting at lower cost.",
        reasonings: &[
            ReasoningPreset {
                level: Low,
                label: "Low",
                description: "Fastest responses for simple edits.",
            },
            ReasoningPreset {
                level: Medium,
                label: "Medium",
                description: "Balances speed and quality (default).",
            },
        ],
        default_reasoning: Medium,
    },
    ModelPreset {
        id: "gpt-5",
        label: "GPT-5",
        description: "General-purpose GPT-5 covering broad knowledge and natural language tasks.",
        reasonings: &[
            ReasoningPreset {
                level: Low,
                label: "Low",
                description: "High-speed mode for Q&A and summaries.",
            },
            ReasoningPreset {
                level: Medium,
                label: "Medium",
                description: "Standard reasoning depth (default) for most conversations.",
            },
            ReasoningPreset {
                level: High,
                label: "High",
                description: "Maximum reasoning for complex requests and long-form writing.",
            },
        ],
        default_reasoning: Medium,
    },
];

pub fn find_preset(model_id: &str) -> Option<&'static ModelPreset> {
    let normalized = model_id.trim().to_ascii_lowercase();
    MODEL_PRESETS.iter().find(|preset| preset.id == normalized)
}

/// Model and reasoning defaults configured for the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDefaults {
    pub model: String,
    pub reasoning: ReasoningEffort,
}

impl Default for ModelDefaults {
    fn default() -> Self {
        Self {
            model: "gpt-5-codex".to_string(),
            reasoning: Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub model: String,
    pub reasoning: ReasoningEffort,
}

/// Resolves `model` (optionally `base:reasoning`) and an explicit reasoning
/// request against the presets.
///
/// Unknown models fall back to the configured default preset. A requested
/// reasoning level the preset does not offer becomes the preset's default.
pub fn resolve_model(
    defaults: &ModelDefaults,
    model: Option<&str>,
    reasoning: Option<&str>,
) -> ResolvedModel {
    let Some(model) = model.filter(|value| !value.trim().is_empty()) else {
        return ResolvedModel {
            model: defaults.model.clone(),
            reasoning: defaults.reasoning,
        };
    };

    let lowered = model.trim().to_ascii_lowercase();
    let mut parts = lowered.splitn(2, ':');
    let model_id = parts.next().unwrap_or_default();
    let appended_reasoning = parts.next();

    let preset = find_preset(model_id).or_else(|| find_preset(&defaults.model));
    let requested = reasoning
        .or(appended_reasoning)
        .and_then(ReasoningEffort::parse);

    match preset {
        Some(preset) => ResolvedModel {
            model: preset.id.to_string(),
            reasoning: requested
                .filter(|level| preset.allows(*level))
                .unwrap_or(preset.default_reasoning),
        },
        None => ResolvedModel {
            model: defaults.model.clone(),
            reasoning: defaults.reasoning,
        },
    }
}

#[derive(Debug, Serialize)]
pub struct ModelEntry {
    pub object: &'static str,
    pub id: String,
    pub label: String,
    pub description: String,
    pub base_model: &'static str,
    pub reasoning: ReasoningEffort,
    pub default_reasoning: ReasoningEffort,
}

#[derive(Debug, Serialize)]
pub struct ModelListResponse {
    pub object: &'static str,
    pub data: Vec<ModelEntry>,
    pub defaults: ModelListDefaults,
}

#[derive(Debug, Serialize)]
pub struct ModelListDefaults {
    pub model: String,
}

pub fn list_models(defaults: &ModelDefaults) -> ModelListResponse {
    let data = MODEL_PRESETS
        .iter()
        .flat_map(|model| {
            model.reasonings.iter().map(move |reasoning| ModelEntry {
                object: "model",
                id: format!("{}:{}", model.id, reasoning.level),
                label: format!("{} · {}", model.label, reasoning.label),
                description: format!("{} (Reasoning: {})", model.description, reasoning.label),
                base_model: model.id,
                reasoning: reasoning.level,
                default_reasoning: model.default_reasoning,
            })
        })
        .collect();

    ModelListResponse {
        object: "list",
        data,
        defaults: ModelListDefaults {
            model: format!("{}:{}", defaults.model, defaults.reasoning),
        },
    }
}
