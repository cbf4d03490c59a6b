use crate::{
    core::engine::ModelConfig,
    error::{Result, UnmixError},
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Extension of parameter blobs in the weight store.
pub const WEIGHTS_EXT: &str = "safetensors";

/// One converted parameter blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetBlob {
    /// Upstream content id; also the blob's file stem in the store.
    pub id: String,
    /// Full SHA-256 of the safetensors blob. The hex suffix of `id` digests
    /// the upstream checkpoint, not this file, so only this field is checked.
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sample_rate: u32,
    pub n_fft: usize,
    pub n_hop: usize,
    pub nb_channels: usize,
    pub hidden_size: usize,
    pub bandwidth: f64,
    /// Weight store serving `<id>.safetensors`; unset means the caller supplies one.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Where the upstream checkpoints were published.
    #[serde(default)]
    pub source: Option<String>,
    pub targets: BTreeMap<String, TargetBlob>,
}

impl PresetEntry {
    pub fn model_config(&self) -> Result<ModelConfig> {
        ModelConfig::new(
            self.sample_rate,
            self.n_fft,
            self.n_hop,
            self.nb_channels,
            self.hidden_size,
            self.bandwidth,
        )
    }

    pub fn target_names(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).collect()
    }

    pub fn blob(&self, target: &str) -> Result<&TargetBlob> {
        self.targets
            .get(target)
            .ok_or_else(|| UnmixError::UnknownTarget {
                preset: self.name.clone(),
                target: target.to_string(),
                available: self.target_names().join(", "),
            })
    }

    pub fn content_id(&self, target: &str) -> Result<&str> {
        Ok(self.blob(target)?.id.as_str())
    }

    /// Pinned blob digest for `target`, if the registry carries one.
    pub fn sha256(&self, target: &str) -> Result<Option<&str>> {
        Ok(self.blob(target)?.sha256.as_deref())
    }

    /// Blob URL for `target`, under `base_override` when given.
    pub fn weights_url(&self, target: &str, base_override: Option<&str>) -> Result<String> {
        let id = self.content_id(target)?;
        let base = base_override
            .or(self.base_url.as_deref())
            .ok_or_else(|| {
                UnmixError::InvalidConfig(format!(
                    "preset `{}` has no weight store; set UNMIX_WEIGHTS_BASE_URL or --weights-url",
                    self.name
                ))
            })?
            .trim_end_matches('/');
        Ok(format!("{base}/{id}.{WEIGHTS_EXT}"))
    }

    fn validate(&self) -> Result<()> {
        let bad = |msg: String| UnmixError::Registry(format!("preset `{}`: {msg}", self.name));

        if !matches!(self.nb_channels, 1 | 2) {
            return Err(bad(format!("unsupported channel count {}", self.nb_channels)));
        }
        self.model_config().map_err(|e| bad(e.to_string()))?;
        if self.targets.is_empty() {
            return Err(bad("no targets".into()));
        }
        for (target, blob) in &self.targets {
            if blob.id.trim().is_empty() {
                return Err(bad(format!("empty content id for target `{target}`")));
            }
            if let Some(digest) = &blob.sha256 {
                let is_sha256 = digest.len() == 64
                    && digest.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
                if !is_sha256 {
                    return Err(bad(format!("malformed sha256 for target `{target}`")));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Registry {
    pub default: String,
    pub presets: Vec<PresetEntry>,
}

impl Registry {
    pub fn parse(json: &str) -> Result<Self> {
        let reg: Registry = serde_json::from_str(json)?;
        reg.validate()?;
        Ok(reg)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for p in &self.presets {
            if !seen.insert(p.name.as_str()) {
                return Err(UnmixError::Registry(format!("duplicate preset `{}`", p.name)));
            }
            p.validate()?;
        }
        if !seen.contains(self.default.as_str()) {
            return Err(UnmixError::Registry(format!(
                "default preset `{}` is not defined",
                self.default
            )));
        }
        Ok(())
    }

    /// Look up a preset; an empty name selects the default.
    pub fn preset(&self, name: &str) -> Result<&PresetEntry> {
        let target = if name.is_empty() { self.default.as_str() } else { name };
        self.presets
            .iter()
            .find(|p| p.name == target)
            .ok_or_else(|| UnmixError::UnknownPreset(target.to_string()))
    }
}

const REGISTRY_JSON: &str = include_str!("../../models/registry.json");

static REGISTRY: OnceCell<Registry> = OnceCell::new();

/// The compiled-in registry, parsed and validated on first use.
pub fn registry() -> Result<&'static Registry> {
    REGISTRY.get_or_try_init(|| Registry::parse(REGISTRY_JSON))
}

pub fn resolve_preset(name: &str) -> Result<&'static PresetEntry> {
    registry()?.preset(name)
}
