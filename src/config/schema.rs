//! Configuration surface consumed by the core. Every field uses
//! `#[serde(default)]` so a caller's TOML fragment only needs to name what
//! it's overriding.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderEntry {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: String,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub default_model: Option<String>,
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentDefaults {
    pub provider: String,
    pub model: String,
    pub fallback: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_tool_iterations: u32,
    pub extended_thinking: bool,
    pub thinking_budget: Option<u64>,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            provider: String::new(),
            model: String::new(),
            fallback: Vec::new(),
            max_tokens: 4096,
            temperature: 1.0,
            max_tool_iterations: 25,
            extended_thinking: false,
            thinking_budget: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CooldownSettings {
    pub failure_window_secs: i64,
    pub error_threshold: u32,
    pub cooldown_duration_secs: i64,
}

impl Default for CooldownSettings {
    fn default() -> Self {
        Self {
            failure_window_secs: 600,
            error_threshold: 3,
            cooldown_duration_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub providers: Vec<ProviderEntry>,
    pub agents: AgentsSection,
    pub cooldown: CooldownSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsSection {
    pub defaults: AgentDefaults,
}
