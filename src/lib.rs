//! LLM-driven browser operator core
//!
//! Drives a single headless Chromium instance in a perception-decide-act loop:
//! observe the page (indexed element markers + screenshot), ask a language
//! model for the next action, execute it, repeat until the model answers.

pub mod action;
pub mod agent;
mod browser;
pub mod browser_setup;
pub mod llm;
pub mod marker;
pub mod operator;
pub mod session;
pub mod snapshot;
mod utils;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Step ceiling for [`agent::AgentLoop::run`]. The loop itself has no
    /// built-in limit; callers bound cost with this.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub model: ModelConfig,
}

/// Browser security and launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Disable web security features (Same-Origin Policy, etc.)
    /// Required for cross-origin stylesheet introspection during snapshot
    /// normalization; turn off when operating on trusted same-origin pages only.
    #[serde(default = "default_disable_security")]
    pub disable_security: bool,

    /// Window dimensions
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

fn default_max_steps() -> usize {
    10
}

fn default_headless() -> bool {
    true
}

fn default_disable_security() -> bool {
    true
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            browser: BrowserConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            disable_security: default_disable_security(),
            window: WindowConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl Config {
    /// Load config from a YAML file, falling back to defaults when the file
    /// does not exist.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            let config: Config = serde_yaml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Load `config.yaml` from the current working directory if present.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_yaml_file("config.yaml")
    }
}

pub use action::{Action, ActionError, BatchOutcome, ScrollDirection};
pub use agent::{AgentError, AgentLoop, Conversation, StepRecord};
pub use browser::{BrowserError, BrowserResult, BrowserWrapper};
pub use llm::{
    ChatMessage, ContentPart, ImageUrl, MessageContent, ModelClient, ModelConfig, ModelError,
    OpenAiClient, Role,
};
pub use marker::{ElementMarker, MarkerSet};
pub use operator::{Operator, OperatorError, PageObservation, PerformRequest, PerformResponse};
pub use session::SessionController;
pub use snapshot::PageSnapshot;
