//! Engine Configuration
//!
//! Configuration is plain data with serde defaults, so a partial JSON document
//! fills in everything it leaves out:
//!
//! ```json
//! { "process_loop": { "mode": { "free": { "target_fps": 30.0 } } } }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How the process loop paces its iterations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    /// Each iteration waits for one [`allow_run_once`] permit.
    ///
    /// [`allow_run_once`]: crate::scheduler::ProcessLoop::allow_run_once
    Stepped,

    /// Iterations run back to back, optionally capped at a target rate.
    Free {
        #[serde(default)]
        target_fps: Option<f64>,
    },
}

impl Default for LoopMode {
    fn default() -> Self {
        Self::Stepped
    }
}

/// Process loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub mode: LoopMode,

    /// Name of the worker thread.
    pub thread_name: String,
}

impl LoopConfig {
    /// Stepped mode: one iteration per permit.
    pub fn stepped() -> Self {
        Self::default()
    }

    /// Free-running mode, capped at `target_fps` when given.
    pub fn free(target_fps: Option<f64>) -> Self {
        Self {
            mode: LoopMode::Free { target_fps },
            ..Self::default()
        }
    }

    /// Minimum duration of one iteration, if the loop is rate-capped.
    pub fn frame_budget(&self) -> Option<Duration> {
        match self.mode {
            LoopMode::Free {
                target_fps: Some(fps),
            } if fps.is_finite() && fps > 0.0 => Some(Duration::from_secs_f64(1.0 / fps)),
            _ => None,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            mode: LoopMode::default(),
            thread_name: "tickgraph-process".to_owned(),
        }
    }
}

/// Top-level engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub process_loop: LoopConfig,

    /// Install the lossless numeric widenings in the conversion table.
    pub builtin_conversions: bool,

    /// Register the bundled node types.
    pub builtin_nodes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            process_loop: LoopConfig::default(),
            builtin_conversions: true,
            builtin_nodes: true,
        }
    }
}

impl EngineConfig {
    /// Parse from JSON, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_the_default() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config =
            EngineConfig::from_json(r#"{ "process_loop": { "mode": { "free": { "target_fps": 50.0 } } } }"#)
                .unwrap();

        assert_eq!(config.process_loop.mode, LoopMode::Free { target_fps: Some(50.0) });
        assert_eq!(config.process_loop.thread_name, "tickgraph-process");
        assert!(config.builtin_nodes);
        assert_eq!(config.process_loop.frame_budget(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn stepped_and_uncapped_have_no_budget() {
        assert_eq!(LoopConfig::stepped().frame_budget(), None);
        assert_eq!(LoopConfig::free(None).frame_budget(), None);
        assert_eq!(LoopConfig::free(Some(0.0)).frame_budget(), None);
    }

    #[test]
    fn unit_variant_parses_from_a_string() {
        let config: LoopConfig = serde_json::from_str(r#"{ "mode": "stepped" }"#).unwrap();
        assert_eq!(config.mode, LoopMode::Stepped);
    }
}
