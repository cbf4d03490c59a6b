use crate::error::{Result, UnmixError};
use directories::ProjectDirs;
use std::path::PathBuf;

pub fn weights_cache_dir() -> Result<PathBuf> {
    let proj = ProjectDirs::from("dev", "Unmix", "unmix-core").ok_or(UnmixError::CacheDirUnavailable)?;
    let mut p = PathBuf::from(proj.cache_dir());
    p.push("weights");
    Ok(p)
}
