use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use directories::ProjectDirs;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "styx";
pub const APP_NAME: &str = "styx";

pub fn default_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join("styx.db")
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("styx.json")
}
