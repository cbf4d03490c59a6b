use crate::model::model_manager::WeightsOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Interleaved samples as decoded from / written to a file.
#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SplitOptions {
    pub output_dir: String,
    pub preset: String,
    /// Targets to extract; empty means every target of the preset.
    pub targets: Vec<String>,
    pub weights: WeightsOptions,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            output_dir: ".".into(),
            preset: "umxhq".into(),
            targets: Vec::new(),
            weights: WeightsOptions::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StemOutput {
    pub target: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct SplitResult {
    pub preset: String,
    pub stems: Vec<StemOutput>,
}

impl SplitResult {
    pub fn path_of(&self, target: &str) -> Option<&PathBuf> {
        self.stems.iter().find(|s| s.target == target).map(|s| &s.path)
    }
}
