use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "notelock";
pub const APP_NAME: &str = "notelock";

pub const DATA_DIR_ENV: &str = "NOTELOCK_DATA_DIR";
pub const CONFIG_FILE_NAME: &str = "config.json";

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))
}

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    Ok(project_dirs()?.data_dir().to_path_buf())
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE_NAME))
}
