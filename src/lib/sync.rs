//! Push and pull between a project's env files and one remote secret.
//!
//! # Push
//!
//! 1. Collect every env file under the root (unreadable files are reported,
//!    not fatal)
//! 2. Stop with [`PushOutcome::NothingToSync`] if no variable was found
//! 3. Encode the variables into a namespaced record and serialize it
//! 4. Update the secret if it exists, create it otherwise
//!
//! # Pull
//!
//! 1. Fetch and decode the secret into per-file mappings
//! 2. For each file: skip it if it exists and `overwrite` is off, otherwise
//!    replace its content wholesale
//!
//! Remote failures abort the whole operation. Local per-file failures are
//! recorded in the report and the remaining files are still processed.
//! Nothing is locked: two concurrent pushes to the same secret race and the
//! last writer wins.
//!
//! # Examples
//!
//! ```rust
//! use env_stash::collect::{DEFAULT_EXCLUDE, DEFAULT_INCLUDE, EnvFileCollector};
//! use env_stash::gateway::MemoryGateway;
//! use env_stash::sync::{PushOutcome, SyncEngine};
//!
//! let dir = tempfile::TempDir::new().unwrap();
//! std::fs::write(dir.path().join(".env"), "API_KEY=abc\n").unwrap();
//!
//! let collector = EnvFileCollector::new(DEFAULT_INCLUDE, DEFAULT_EXCLUDE).unwrap();
//! let engine = SyncEngine::new(MemoryGateway::new());
//!
//! let report = engine.push(&collector, dir.path(), "my-app").unwrap();
//! assert_eq!(report.outcome, PushOutcome::Created);
//! ```

use std::path::{Component, Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::{debug, info, warn};

use crate::codec::{self, DecodeError, EncodeError};
use crate::collect::{CollectError, EnvFileCollector};
use crate::gateway::{GatewayError, SecretGateway};

/// Moves variables between a project root and a gateway.
///
/// Only [`push`](Self::push) reads local files, so the collector is passed
/// to it directly and pulling never depends on the include/exclude patterns.
pub struct SyncEngine<G> {
  gateway: G,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
  NothingToSync,
  Created,
  Updated,
}

#[derive(Debug)]
pub struct PushReport {
  pub outcome: PushOutcome,
  /// Variable count per pushed file, ordered by file name.
  pub files: Vec<(String, usize)>,
  /// Files that were found but could not be read or parsed.
  pub failures: Vec<CollectError>,
  /// The serialized record sent to the gateway, if anything was sent.
  pub blob: Option<String>,
}

impl PushReport {
  pub fn variable_count(&self) -> usize {
    self.files.iter().map(|(_, count)| count).sum()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullStatus {
  Created,
  Overwritten,
  /// The file already exists and overwriting was not requested.
  Skipped,
  Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullFile {
  pub file: String,
  pub variables: usize,
  pub status: PullStatus,
}

#[derive(Debug, Default)]
pub struct PullReport {
  pub files: Vec<PullFile>,
}

impl PullReport {
  pub fn written(&self) -> impl Iterator<Item = &PullFile> {
    self
      .files
      .iter()
      .filter(|f| matches!(f.status, PullStatus::Created | PullStatus::Overwritten))
  }

  pub fn status_of(&self, file: &str) -> Option<&PullStatus> {
    self.files.iter().find(|f| f.file == file).map(|f| &f.status)
  }
}

impl<G: SecretGateway> SyncEngine<G> {
  pub fn new(gateway: G) -> Self {
    Self { gateway }
  }

  pub fn gateway(&self) -> &G {
    &self.gateway
  }

  pub fn push(
    &self,
    collector: &EnvFileCollector,
    root: &Path,
    name: &str,
  ) -> Result<PushReport, SyncError> {
    #[cfg(feature = "tracing")]
    info!("Pushing {:?} to secret {}", root, name);

    let collection = collector.collect_all(root);
    let files = collection
      .by_file()
      .into_iter()
      .map(|(file, vars)| (file, vars.len()))
      .collect();

    if collection.is_empty() {
      #[cfg(feature = "tracing")]
      info!("No env variables found, nothing to sync");

      return Ok(PushReport {
        outcome: PushOutcome::NothingToSync,
        files,
        failures: collection.failures,
        blob: None,
      });
    }

    let record = codec::encode(&collection.variables)?;
    let blob = codec::to_blob(&record).map_err(SyncError::Serialize)?;

    let outcome = if self.gateway.exists(name)? {
      #[cfg(feature = "tracing")]
      debug!("Secret {} exists, updating", name);

      self.gateway.update(name, &blob)?;
      PushOutcome::Updated
    } else {
      #[cfg(feature = "tracing")]
      debug!("Secret {} does not exist, creating", name);

      self.gateway.create(name, &blob, &description(name))?;
      PushOutcome::Created
    };

    Ok(PushReport {
      outcome,
      files,
      failures: collection.failures,
      blob: Some(blob),
    })
  }

  pub fn pull(&self, root: &Path, name: &str, overwrite: bool) -> Result<PullReport, SyncError> {
    #[cfg(feature = "tracing")]
    info!("Pulling secret {} into {:?}", name, root);

    let blob = self.gateway.fetch(name).map_err(|err| match err {
      GatewayError::NotFound(name) => SyncError::SecretNotFound(name),
      other => SyncError::Gateway(other),
    })?;

    let files = codec::decode(&codec::from_blob(&blob)?);

    #[cfg(feature = "tracing")]
    debug!("Decoded {} file(s)", files.len());

    let mut report = PullReport::default();

    for (file, content) in codec::render(&files) {
      let status = Self::write_file(root, file, &content, overwrite);
      report.files.push(PullFile {
        file: file.to_string(),
        variables: files[file].len(),
        status,
      });
    }

    Ok(report)
  }

  fn write_file(root: &Path, file: &str, content: &str, overwrite: bool) -> PullStatus {
    let Some(path) = contained_path(root, file) else {
      #[cfg(feature = "tracing")]
      warn!("Refusing to write {:?}: outside of {:?}", file, root);

      return PullStatus::Failed("path escapes the project root".to_string());
    };

    let existed = path.exists();
    if existed && !overwrite {
      #[cfg(feature = "tracing")]
      debug!("{} exists, skipping", file);

      return PullStatus::Skipped;
    }

    let written = match path.parent() {
      Some(parent) => std::fs::create_dir_all(parent),
      None => Ok(()),
    }
    .and_then(|()| std::fs::write(&path, content));

    match written {
      Ok(()) if existed => PullStatus::Overwritten,
      Ok(()) => PullStatus::Created,
      Err(err) => {
        #[cfg(feature = "tracing")]
        warn!("Failed to write {}: {}", file, err);

        PullStatus::Failed(err.to_string())
      }
    }
  }
}

fn description(name: &str) -> String {
  format!("Environment variables for project: {name}")
}

/// Joins a decoded file name onto the root, rejecting anything that could
/// resolve outside of it.
fn contained_path(root: &Path, file: &str) -> Option<PathBuf> {
  let relative = Path::new(file);
  let plain = relative
    .components()
    .all(|component| matches!(component, Component::Normal(_)));

  (plain && relative.components().next().is_some()).then(|| root.join(relative))
}

/// Errors that abort a push or pull.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error("Cannot namespace variables: {0}")]
  Encode(#[from] EncodeError),
  #[error("Failed to serialize secret: {0}")]
  Serialize(#[source] serde_json::Error),
  #[error("Failed to decode secret: {0}")]
  Decode(#[from] DecodeError),
  #[error("No secret named {0} exists yet, run `env-stash push` first")]
  SecretNotFound(String),
  #[error(transparent)]
  Gateway(#[from] GatewayError),
}
