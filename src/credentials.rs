use std::fs;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tempfile::Builder;
use tracing::{info, warn};

use crate::error::HarvestError;

#[derive(Clone, Deserialize, Serialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let username = std::env::var("OSU_USERNAME").ok()?;
        let password = std::env::var("OSU_PASSWORD").ok()?;
        if username.trim().is_empty() || password.is_empty() {
            return None;
        }
        Some(Self::new(username.trim(), password))
    }
}

/// JSON credential file, protected by filesystem permissions only.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new() -> Result<Self, HarvestError> {
        let path = BaseDirs::new()
            .map(|dirs| {
                dirs.home_dir()
                    .join(".osu-beatmap-downloader")
                    .join("credentials.json")
            })
            .ok_or_else(|| HarvestError::Filesystem("unable to resolve home directory".to_string()))?;
        Ok(Self { path })
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<Option<Credential>, HarvestError> {
        if !self.exists() {
            info!(path = %self.path.display(), "credential file not found");
            return Ok(None);
        }
        let content =
            fs::read_to_string(&self.path).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let credential = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(format!("{}: {err}", self.path.display())))?;
        Ok(Some(credential))
    }

    pub fn save(&self, credential: &Credential) -> Result<(), HarvestError> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| HarvestError::Filesystem("invalid credential path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let content = serde_json::to_vec_pretty(credential)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix("credentials")
            .tempfile_in(parent)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), &content).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        restrict_permissions(temp.path())?;
        temp.persist(&self.path)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        info!(path = %self.path.display(), "credentials saved");
        Ok(())
    }

    pub fn delete(&self) -> Result<bool, HarvestError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "no credential file to delete");
                Ok(false)
            }
            Err(err) => Err(HarvestError::Filesystem(err.to_string())),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), HarvestError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|err| HarvestError::Filesystem(err.to_string()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), HarvestError> {
    Ok(())
}
