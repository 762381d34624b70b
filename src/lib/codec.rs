//! Flattening of per-file variables into one namespaced record and back.
//!
//! A variable `KEY` from file `.env.production` is stored under the
//! namespaced key `.env.production.KEY`. Decoding splits on the **last**
//! [`SEPARATOR`], so file names may contain dots but keys may not;
//! [`encode`] refuses keys that would not survive that split.

use std::collections::BTreeMap;

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

use crate::collect::Variable;
use crate::parse::EnvFile;

pub const SEPARATOR: char = '.';

/// `namespaced key -> value`, the payload of the remote secret.
pub type NamespacedRecord = BTreeMap<String, String>;

/// `file -> key -> value`.
pub type EnvFileMap = BTreeMap<String, BTreeMap<String, String>>;

/// A variable whose namespaced key would not split back into its own
/// file and key.
///
/// Two files can only ever produce the same namespaced key when a key
/// contains the separator, so rejecting such keys also rules out
/// collisions between files.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EncodeError {
  #[error(
    "{file}: variable {key:?} contains '.', {namespaced:?} would decode as file {decodes_as:?}; rename it, e.g. to {suggested:?}",
    suggested = rename_hint(.key)
  )]
  Conflict {
    file: String,
    key: String,
    namespaced: String,
    decodes_as: String,
  },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
  #[error("Secret is not a flat JSON object of strings: {0}")]
  Malformed(#[from] serde_json::Error),
}

/// A separator-free spelling of `key`, offered when a key cannot be encoded.
pub fn rename_hint(key: &str) -> String {
  key.replace(SEPARATOR, "_")
}

pub fn namespaced_key(file: &str, key: &str) -> String {
  format!("{file}{SEPARATOR}{key}")
}

/// Splits a namespaced key on the last separator into `(file, key)`.
pub fn split_key(namespaced: &str) -> Option<(&str, &str)> {
  let (file, key) = namespaced.rsplit_once(SEPARATOR)?;
  if file.is_empty() || key.is_empty() {
    return None;
  }
  Some((file, key))
}

pub fn encode<'a, I>(variables: I) -> Result<NamespacedRecord, EncodeError>
where
  I: IntoIterator<Item = &'a Variable>,
{
  let mut record = NamespacedRecord::new();

  for var in variables {
    let key = namespaced_key(&var.file, &var.key);

    if let Some((file, _)) = split_key(&key)
      && file != var.file
    {
      return Err(EncodeError::Conflict {
        decodes_as: file.to_string(),
        file: var.file.clone(),
        key: var.key.clone(),
        namespaced: key,
      });
    }

    #[cfg(feature = "tracing")]
    trace!("Encoding {}", key);

    record.insert(key, var.value.clone());
  }

  #[cfg(feature = "tracing")]
  debug!("Encoded {} variables", record.len());

  Ok(record)
}

/// Splits a record back into per-file mappings.
///
/// Entries that cannot be attributed to a file (no separator, or an empty
/// file or key part) are skipped without error.
pub fn decode(record: &NamespacedRecord) -> EnvFileMap {
  let mut files = EnvFileMap::new();

  for (namespaced, value) in record {
    let Some((file, key)) = split_key(namespaced) else {
      #[cfg(feature = "tracing")]
      debug!("Dropping {:?}: no file component", namespaced);
      continue;
    };

    files
      .entry(file.to_string())
      .or_default()
      .insert(key.to_string(), value.clone());
  }

  files
}

/// Serializes a record into the opaque blob stored remotely.
pub fn to_blob(record: &NamespacedRecord) -> Result<String, serde_json::Error> {
  serde_json::to_string(record)
}

pub fn from_blob(blob: &str) -> Result<NamespacedRecord, DecodeError> {
  Ok(serde_json::from_str(blob)?)
}

/// Renders each file's variables as env-file text, ordered by file name.
pub fn render(files: &EnvFileMap) -> Vec<(&str, String)> {
  files
    .iter()
    .map(|(file, vars)| (file.as_str(), EnvFile::render_map(vars)))
    .collect()
}
