//! Project configuration stored in `.env-stash.json`.
//!
//! Settings are resolved in order: command line flag, project file,
//! environment (`AWS_REGION`, `AWS_PROFILE`, `AWS_ACCOUNT_ID`), built-in
//! default. The environment is only consulted through the lookup function
//! passed to [`Config::resolve`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::debug;

use crate::collect::{CollectError, DEFAULT_EXCLUDE, DEFAULT_INCLUDE, EnvFileCollector};
use crate::gateway::{DEFAULT_REGION, RemoteConfig};

pub const CONFIG_FILENAME: &str = ".env-stash.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub aws_region: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub aws_profile: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub aws_account_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub include: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub exclude: Option<Vec<String>>,
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
  pub project: Option<String>,
  pub region: Option<String>,
  pub profile: Option<String>,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
  pub project_name: String,
  pub remote: RemoteConfig,
  pub include: Vec<String>,
  pub exclude: Vec<String>,
}

impl Settings {
  pub fn collector(&self) -> Result<EnvFileCollector, CollectError> {
    EnvFileCollector::new(&self.include, &self.exclude)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Invalid configuration in {path}: {source}")]
  Invalid {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

#[derive(Deserialize)]
struct PackageJson {
  name: Option<String>,
}

impl Config {
  pub fn path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILENAME)
  }

  /// Loads the project file, or the defaults when there is none.
  pub fn load(root: &Path) -> Result<Self, ConfigError> {
    let path = Self::path(root);
    if !path.exists() {
      #[cfg(feature = "tracing")]
      debug!("No {} in {:?}, using defaults", CONFIG_FILENAME, root);

      return Ok(Self::defaults(root));
    }

    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
      path: path.clone(),
      source,
    })?;

    serde_json::from_str(&content).map_err(|source| ConfigError::Invalid { path, source })
  }

  pub fn save(&self, root: &Path) -> Result<PathBuf, ConfigError> {
    let path = Self::path(root);
    let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Invalid {
      path: path.clone(),
      source,
    })?;

    std::fs::write(&path, content + "\n").map_err(|source| ConfigError::Io {
      path: path.clone(),
      source,
    })?;

    Ok(path)
  }

  pub fn defaults(root: &Path) -> Self {
    Self {
      project_name: Some(default_project_name(root)),
      include: Some(DEFAULT_INCLUDE.iter().map(|s| s.to_string()).collect()),
      exclude: Some(DEFAULT_EXCLUDE.iter().map(|s| s.to_string()).collect()),
      ..Self::default()
    }
  }

  pub fn resolve<F>(&self, root: &Path, overrides: Overrides, env: F) -> Settings
  where
    F: Fn(&str) -> Option<String>,
  {
    let project_name = overrides
      .project
      .or_else(|| self.project_name.clone())
      .unwrap_or_else(|| default_project_name(root));

    let region = overrides
      .region
      .or_else(|| self.aws_region.clone())
      .or_else(|| env("AWS_REGION"))
      .unwrap_or_else(|| DEFAULT_REGION.to_string());

    let profile = overrides
      .profile
      .or_else(|| self.aws_profile.clone())
      .or_else(|| env("AWS_PROFILE"));

    let account_id = self.aws_account_id.clone().or_else(|| env("AWS_ACCOUNT_ID"));

    Settings {
      project_name,
      remote: RemoteConfig {
        region,
        profile,
        account_id,
      },
      include: self
        .include
        .clone()
        .unwrap_or_else(|| DEFAULT_INCLUDE.iter().map(|s| s.to_string()).collect()),
      exclude: self
        .exclude
        .clone()
        .unwrap_or_else(|| DEFAULT_EXCLUDE.iter().map(|s| s.to_string()).collect()),
    }
  }
}

/// `name` from `package.json` when present, else the directory name.
fn default_project_name(root: &Path) -> String {
  let from_package = std::fs::read_to_string(root.join("package.json"))
    .ok()
    .and_then(|content| serde_json::from_str::<PackageJson>(&content).ok())
    .and_then(|package| package.name)
    .filter(|name| !name.is_empty());

  from_package.unwrap_or_else(|| {
    root
      .file_name()
      .and_then(|name| name.to_str())
      .unwrap_or("env-stash")
      .to_string()
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use tempfile::TempDir;

  fn no_env(_: &str) -> Option<String> {
    None
  }

  #[test]
  fn test_defaults_without_file() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("billing-api");
    std::fs::create_dir(&root).unwrap();

    let config = Config::load(&root).unwrap();
    assert_eq!(config.project_name.as_deref(), Some("billing-api"));
    assert_eq!(config.include.unwrap(), vec![".env", ".env.*"]);
  }

  #[test]
  fn test_project_name_from_package_json() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("package.json"), r#"{"name": "web-app", "version": "1.0.0"}"#)
      .unwrap();

    let config = Config::load(dir.path()).unwrap();
    assert_eq!(config.project_name.as_deref(), Some("web-app"));
  }

  #[test]
  fn test_load_camel_case_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
      Config::path(dir.path()),
      r#"{"projectName": "shop", "awsRegion": "eu-west-1", "exclude": [".env.test"]}"#,
    )
    .unwrap();

    let config = Config::load(dir.path()).unwrap();
    assert_eq!(config.project_name.as_deref(), Some("shop"));
    assert_eq!(config.aws_region.as_deref(), Some("eu-west-1"));
    assert!(config.include.is_none());
    assert_eq!(config.exclude.unwrap(), vec![".env.test"]);
  }

  #[test]
  fn test_invalid_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(Config::path(dir.path()), "{ not json").unwrap();

    assert!(matches!(
      Config::load(dir.path()),
      Err(ConfigError::Invalid { .. })
    ));
  }

  #[test]
  fn test_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let config = Config {
      project_name: Some("shop".to_string()),
      aws_profile: Some("dev-sso".to_string()),
      ..Config::default()
    };

    let path = config.save(dir.path()).unwrap();
    let written = std::fs::read_to_string(path).unwrap();
    assert!(written.contains("\"awsProfile\": \"dev-sso\""));
    assert!(!written.contains("awsRegion"));

    assert_eq!(Config::load(dir.path()).unwrap(), config);
  }

  #[test]
  fn test_resolve_precedence() {
    let dir = TempDir::new().unwrap();
    let env: HashMap<&str, &str> = [
      ("AWS_REGION", "ap-south-1"),
      ("AWS_PROFILE", "env-profile"),
      ("AWS_ACCOUNT_ID", "123456789012"),
    ]
    .into_iter()
    .collect();
    let lookup = |key: &str| env.get(key).map(|v| v.to_string());

    let config = Config {
      project_name: Some("from-file".to_string()),
      aws_region: Some("eu-central-1".to_string()),
      ..Config::default()
    };

    let settings = config.resolve(
      dir.path(),
      Overrides {
        project: Some("from-flag".to_string()),
        ..Overrides::default()
      },
      lookup,
    );

    assert_eq!(settings.project_name, "from-flag");
    assert_eq!(settings.remote.region, "eu-central-1");
    assert_eq!(settings.remote.profile.as_deref(), Some("env-profile"));
    assert_eq!(settings.remote.account_id.as_deref(), Some("123456789012"));
    assert_eq!(settings.include, vec![".env", ".env.*"]);
  }

  #[test]
  fn test_resolve_default_region() {
    let dir = TempDir::new().unwrap();
    let settings = Config::default().resolve(dir.path(), Overrides::default(), no_env);

    assert_eq!(settings.remote.region, DEFAULT_REGION);
    assert!(settings.remote.profile.is_none());
    assert!(settings.collector().is_ok());
  }
}
