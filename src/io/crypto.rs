use crate::error::Result;
use sha2::{Digest, Sha256};
use std::{fs::File, io::Read, path::Path};

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest prefix carried in a hub-style file name, `<name>-<hex>.<ext>`.
pub fn digest_prefix(file_name: &str) -> Option<&str> {
    let stem = file_name.split('.').next()?;
    let (_, suffix) = stem.rsplit_once('-')?;
    let is_hex = suffix
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    (!suffix.is_empty() && is_hex).then_some(suffix)
}

/// `true` when the file's SHA-256 starts with `prefix_hex`.
pub fn verify_sha256_prefix(path: &Path, prefix_hex: &str) -> Result<bool> {
    let got = sha256_file(path)?;
    Ok(got.starts_with(&prefix_hex.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::digest_prefix;

    #[test]
    fn digest_prefix_follows_hub_naming() {
        assert_eq!(digest_prefix("vocals-b62c91ce.safetensors"), Some("b62c91ce"));
        assert_eq!(digest_prefix("my-model-0af3.bin"), Some("0af3"));
        assert_eq!(digest_prefix("speech_f5e0d9f9.safetensors"), None);
        assert_eq!(digest_prefix("vocals-final.safetensors"), None);
        assert_eq!(digest_prefix("vocals-.safetensors"), None);
    }
}
