use crate::{
    core::engine::Separator,
    error::{Result, UnmixError},
    io::{
        crypto::{digest_prefix, verify_sha256_prefix},
        net::{download_with_progress, http_client},
        paths::weights_cache_dir,
    },
    model::{
        registry::{resolve_preset, PresetEntry},
        weights::ParamSet,
    },
};

use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::{debug, info, warn};

/// Environment override for the weight store base URL.
pub const BASE_URL_ENV: &str = "UNMIX_WEIGHTS_BASE_URL";

/// Where parameter blobs come from and where they are cached.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WeightsOptions {
    /// Replaces the preset's base URL (falls back to `UNMIX_WEIGHTS_BASE_URL`).
    pub weights_base_url: Option<String>,
    /// Full blob URL; bypasses the registry location entirely.
    pub weights_url_override: Option<String>,
    /// Cache root; defaults to the platform cache directory.
    pub cache_dir: Option<PathBuf>,
}

pub struct WeightsHandle {
    pub preset: PresetEntry,
    pub target: String,
    pub url: String,
    pub local_path: PathBuf,
}

fn blob_url(preset: &PresetEntry, target: &str, opts: &WeightsOptions) -> Result<String> {
    // validates the target even when the URL is overridden
    preset.blob(target)?;
    if let Some(url) = &opts.weights_url_override {
        return Ok(url.clone());
    }
    let base = opts
        .weights_base_url
        .clone()
        .or_else(|| std::env::var(BASE_URL_ENV).ok().filter(|s| !s.is_empty()));
    preset.weights_url(target, base.as_deref())
}

/// Digest the blob must match: the registry pin for store URLs, the hub-style
/// `<name>-<hex>` file name for an explicit URL override.
fn expected_digest<'a>(
    preset: &'a PresetEntry,
    target: &str,
    opts: &WeightsOptions,
    file_name: &'a str,
) -> Result<Option<&'a str>> {
    if opts.weights_url_override.is_some() {
        Ok(digest_prefix(file_name))
    } else {
        preset.sha256(target)
    }
}

/// Make sure the blob for (`preset`, `target`) is in the local cache.
///
/// A blob with an expected digest must hash to it; a cached copy failing the
/// check is fetched again.
pub fn ensure_weights(preset: &str, target: &str, opts: &WeightsOptions) -> Result<WeightsHandle> {
    fetch_weights(resolve_preset(preset)?, target, opts)
}

fn fetch_weights(entry: &PresetEntry, target: &str, opts: &WeightsOptions) -> Result<WeightsHandle> {
    let url = blob_url(entry, target, opts)?;

    let file_name = url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| UnmixError::InvalidConfig(format!("no file name in weights URL `{url}`")))?
        .to_string();

    let cache_dir = match &opts.cache_dir {
        Some(dir) => dir.clone(),
        None => weights_cache_dir()?,
    }
    .join(&entry.name);
    fs::create_dir_all(&cache_dir)?;
    let local_path = cache_dir.join(&file_name);

    let digest = expected_digest(entry, target, opts, &file_name)?;
    if digest.is_none() {
        debug!(preset = %entry.name, target, "no pinned digest, blob is not verified");
    }
    let cached = match digest {
        Some(prefix) => matches!(verify_sha256_prefix(&local_path, prefix), Ok(true)),
        None => local_path.is_file(),
    };

    if !cached {
        if local_path.exists() {
            warn!(path = %local_path.display(), "cached weights failed verification, refetching");
        }
        let client = http_client()?;
        download_with_progress(&client, &url, &local_path)?;
        if let Some(prefix) = digest {
            if !verify_sha256_prefix(&local_path, prefix)? {
                return Err(UnmixError::Checksum {
                    path: local_path.display().to_string(),
                });
            }
        }
        info!(preset = %entry.name, target, path = %local_path.display(), "weights downloaded");
    }

    Ok(WeightsHandle {
        preset: entry.clone(),
        target: target.to_string(),
        url,
        local_path,
    })
}

/// Fetch (or reuse) the weights for (`preset`, `target`) and build a separator.
pub fn load_separator(preset: &str, target: &str, opts: &WeightsOptions) -> Result<Separator> {
    let handle = ensure_weights(preset, target, opts)?;
    let config = handle.preset.model_config()?;
    let params = ParamSet::open(&handle.local_path)?;
    info!(
        preset = %handle.preset.name,
        target,
        tensors = params.len(),
        "loading separator"
    );
    Separator::new(config, &params)
}

#[cfg(test)]
mod tests {
    use super::{fetch_weights, WeightsOptions};
    use crate::{error::UnmixError, io::crypto::sha256_file, model::registry::Registry};
    use httpmock::prelude::*;

    fn pinned_registry(sha256: &str) -> Registry {
        let json = format!(
            r#"{{"default": "m", "presets": [{{
                "name": "m", "sample_rate": 8000, "n_fft": 64, "n_hop": 16,
                "nb_channels": 2, "hidden_size": 8, "bandwidth": 2000,
                "targets": {{"vocals": {{"id": "vocals-b62c91ce", "sha256": "{sha256}"}}}}
            }}]}}"#
        );
        Registry::parse(&json).unwrap()
    }

    fn digest_of(bytes: &[u8]) -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, bytes).unwrap();
        sha256_file(&path).unwrap()
    }

    #[test]
    fn pinned_digest_wins_over_upstream_id_suffix() {
        let blob = b"converted weights".to_vec();
        let reg = pinned_registry(&digest_of(&blob));

        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/vocals-b62c91ce.safetensors");
            then.status(200).body(blob.clone());
        });
        let cache = tempfile::tempdir().unwrap();
        let opts = WeightsOptions {
            weights_base_url: Some(server.base_url()),
            weights_url_override: None,
            cache_dir: Some(cache.path().to_path_buf()),
        };

        let entry = reg.preset("m").unwrap();
        let handle = fetch_weights(entry, "vocals", &opts).unwrap();
        assert_eq!(std::fs::read(&handle.local_path).unwrap(), blob);
        fetch_weights(entry, "vocals", &opts).unwrap();
        mock.assert_hits(1);
    }

    #[test]
    fn blob_not_matching_the_pin_is_rejected() {
        let reg = pinned_registry(&digest_of(b"the real thing"));

        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/vocals-b62c91ce.safetensors");
            then.status(200).body("something else");
        });
        let cache = tempfile::tempdir().unwrap();
        let opts = WeightsOptions {
            weights_base_url: Some(server.base_url()),
            weights_url_override: None,
            cache_dir: Some(cache.path().to_path_buf()),
        };

        assert!(matches!(
            fetch_weights(reg.preset("m").unwrap(), "vocals", &opts),
            Err(UnmixError::Checksum { .. })
        ));
    }
}
