//! Discovery and parsing of the env files under a project root.
//!
//! Files are selected by glob patterns matched against the root-relative
//! path (always `/`-separated). A file that fails to read or parse is
//! recorded in [`Collection::failures`] and the remaining files are still
//! collected.

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
};

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

#[cfg(feature = "tracing")]
use tracing::{debug, trace, warn};

use crate::codec::EnvFileMap;
use crate::parse::{EnvFile, ParseError};

pub const DEFAULT_INCLUDE: &[&str] = &[".env", ".env.*"];
pub const DEFAULT_EXCLUDE: &[&str] = &["**/*.example", "**/*.sample"];

/// Directories that are never descended into.
pub const IGNORED_DIRS: &[&str] = &[".git", "node_modules", "target", ".venv", "vendor"];

/// One variable as found in one env file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
  /// Root-relative, `/`-separated path of the file.
  pub file: String,
  pub key: String,
  pub value: String,
}

/// Result of a collection pass over a project root.
#[derive(Debug, Default)]
pub struct Collection {
  pub variables: Vec<Variable>,
  pub failures: Vec<CollectError>,
}

impl Collection {
  pub fn is_empty(&self) -> bool {
    self.variables.is_empty()
  }

  /// Groups the variables per file.
  pub fn by_file(&self) -> EnvFileMap {
    let mut files = EnvFileMap::new();
    for var in &self.variables {
      files
        .entry(var.file.clone())
        .or_default()
        .insert(var.key.clone(), var.value.clone());
    }
    files
  }
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
  #[error("File not found: {0}")]
  NotFound(PathBuf),
  #[error("Failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse {file}: {source}")]
  Parse {
    file: String,
    #[source]
    source: ParseError,
  },
  #[error("Invalid file pattern {pattern:?}: {source}")]
  Pattern {
    pattern: String,
    #[source]
    source: globset::Error,
  },
}

/// Finds env files below a root and reads them into [`Variable`]s.
#[derive(Debug, Clone)]
pub struct EnvFileCollector {
  include: GlobSet,
  exclude: GlobSet,
  /// Deepest directory level an include pattern can reach, `None` if unbounded.
  max_depth: Option<usize>,
}

impl EnvFileCollector {
  pub fn new<I, E>(include: I, exclude: E) -> Result<Self, CollectError>
  where
    I: IntoIterator,
    I::Item: AsRef<str>,
    E: IntoIterator,
    E::Item: AsRef<str>,
  {
    let include: Vec<I::Item> = include.into_iter().collect();
    let max_depth = include_depth(include.iter().map(|pattern| AsRef::<str>::as_ref(pattern)));

    Ok(Self {
      include: build_globset(include)?,
      exclude: build_globset(exclude)?,
      max_depth,
    })
  }

  pub fn max_depth(&self) -> Option<usize> {
    self.max_depth
  }

  /// Returns the root-relative paths of all matching files, sorted.
  pub fn discover(&self, root: &Path) -> Vec<String> {
    let mut walker = WalkDir::new(root).min_depth(1);
    if let Some(depth) = self.max_depth {
      walker = walker.max_depth(depth);
    }

    let mut files: Vec<String> = walker
      .into_iter()
      .filter_entry(|entry| !is_ignored_dir(entry))
      .filter_map(|entry| match entry {
        Ok(entry) => Some(entry),
        Err(_err) => {
          #[cfg(feature = "tracing")]
          debug!("Skipping unreadable entry: {}", _err);
          None
        }
      })
      .filter(|entry| entry.file_type().is_file())
      .filter_map(|entry| relative_name(root, entry.path()))
      .filter(|name| self.matches(name))
      .collect();

    files.sort();

    #[cfg(feature = "tracing")]
    debug!(count = files.len(), ?root, "Discovered env files");

    files
  }

  /// Whether a root-relative path is selected by the include/exclude patterns.
  pub fn matches(&self, relative: &str) -> bool {
    self.include.is_match(relative) && !self.exclude.is_match(relative)
  }

  /// Parses one file into its effective key/value mapping.
  pub fn parse(&self, root: &Path, relative: &str) -> Result<BTreeMap<String, String>, CollectError> {
    let path = root.join(relative);
    if !path.exists() {
      return Err(CollectError::NotFound(path));
    }

    let content = std::fs::read_to_string(&path).map_err(|source| CollectError::Io {
      path: path.clone(),
      source,
    })?;

    let env = EnvFile::try_from(content.as_str()).map_err(|source| CollectError::Parse {
      file: relative.to_string(),
      source,
    })?;

    Ok(env.to_map())
  }

  /// Discovers and parses every env file under `root`.
  pub fn collect_all(&self, root: &Path) -> Collection {
    let mut collection = Collection::default();

    for file in self.discover(root) {
      match self.parse(root, &file) {
        Ok(map) => {
          #[cfg(feature = "tracing")]
          trace!(file = %file, variables = map.len(), "Parsed env file");

          collection
            .variables
            .extend(map.into_iter().map(|(key, value)| Variable {
              file: file.clone(),
              key,
              value,
            }));
        }
        Err(err) => {
          #[cfg(feature = "tracing")]
          warn!("Skipping {}: {}", file, err);

          collection.failures.push(err);
        }
      }
    }

    collection
  }
}

fn build_globset<P>(patterns: P) -> Result<GlobSet, CollectError>
where
  P: IntoIterator,
  P::Item: AsRef<str>,
{
  let mut builder = GlobSetBuilder::new();
  for pattern in patterns {
    let pattern = pattern.as_ref();
    builder.add(compile(pattern)?);
  }
  builder.build().map_err(|source| CollectError::Pattern {
    pattern: String::from("<set>"),
    source,
  })
}

/// Patterns are matched with a literal `/`, so a pattern with `n` separators
/// only matches files `n + 1` levels down. `**` matches at any depth.
fn include_depth<'a>(patterns: impl Iterator<Item = &'a str>) -> Option<usize> {
  let mut depth = 1;
  for pattern in patterns {
    if pattern.contains("**") {
      return None;
    }
    depth = depth.max(pattern.matches('/').count() + 1);
  }
  Some(depth)
}

fn compile(pattern: &str) -> Result<Glob, CollectError> {
  GlobBuilder::new(pattern)
    .literal_separator(true)
    .build()
    .map_err(|source| CollectError::Pattern {
      pattern: pattern.to_string(),
      source,
    })
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
  entry.file_type().is_dir()
    && entry
      .file_name()
      .to_str()
      .is_some_and(|name| IGNORED_DIRS.contains(&name))
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
  let relative = path.strip_prefix(root).ok()?;
  let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
  Some(parts?.join("/"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn collector() -> EnvFileCollector {
    EnvFileCollector::new(DEFAULT_INCLUDE, DEFAULT_EXCLUDE).unwrap()
  }

  fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
      let path = dir.path().join(name);
      if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
      }
      fs::write(path, content).unwrap();
    }
    dir
  }

  #[test]
  fn test_discover_default_patterns() {
    let dir = project(&[
      (".env", "A=1"),
      (".env.production", "A=2"),
      (".env.local", "A=3"),
      (".env.example", "A="),
      (".env.sample", "A="),
      (".envrc", "use flake"),
      ("config.env", "A=4"),
      ("nested/.env", "A=5"),
      ("node_modules/pkg/.env", "A=6"),
    ]);

    let files = collector().discover(dir.path());
    assert_eq!(files, vec![".env", ".env.local", ".env.production"]);
  }

  #[test]
  fn test_discover_nested_opt_in() {
    let dir = project(&[
      (".env", "A=1"),
      ("apps/web/.env", "B=2"),
      ("node_modules/pkg/.env", "C=3"),
      (".git/.env", "D=4"),
    ]);

    let collector = EnvFileCollector::new([".env", "**/.env"], DEFAULT_EXCLUDE).unwrap();
    assert_eq!(collector.discover(dir.path()), vec![".env", "apps/web/.env"]);
  }

  #[test]
  fn test_walk_depth_follows_include_patterns() {
    assert_eq!(collector().max_depth(), Some(1));

    let nested = EnvFileCollector::new([".env", "apps/*/.env"], DEFAULT_EXCLUDE).unwrap();
    assert_eq!(nested.max_depth(), Some(3));

    let anywhere = EnvFileCollector::new([".env", "**/.env"], DEFAULT_EXCLUDE).unwrap();
    assert_eq!(anywhere.max_depth(), None);

    let dir = project(&[
      (".env", "A=1"),
      ("apps/web/.env", "B=2"),
      ("apps/web/deep/er/.env", "C=3"),
    ]);
    assert_eq!(nested.discover(dir.path()), vec![".env", "apps/web/.env"]);
    assert_eq!(
      anywhere.discover(dir.path()),
      vec![".env", "apps/web/.env", "apps/web/deep/er/.env"]
    );
  }

  #[test]
  fn test_parse_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = collector()
      .parse(dir.path(), ".env")
      .unwrap_err();
    assert!(matches!(err, CollectError::NotFound(_)));
  }

  #[test]
  fn test_collect_all_isolates_parse_failures() {
    let dir = project(&[
      (".env", "API_KEY=abc\nDEBUG=true"),
      (".env.production", "API_KEY=xyz"),
      (".env.staging", "API_KEY=ok\nthis line is broken"),
    ]);

    let collection = collector().collect_all(dir.path());

    assert_eq!(collection.variables.len(), 3);
    assert!(collection.variables.iter().all(|v| v.file != ".env.staging"));
    assert_eq!(collection.failures.len(), 1);
    match &collection.failures[0] {
      CollectError::Parse { file, source } => {
        assert_eq!(file, ".env.staging");
        assert!(matches!(source, ParseError::InvalidLine { line: 2, .. }));
      }
      other => panic!("Expected parse failure, got {other:?}"),
    }
  }

  #[test]
  fn test_by_file_groups_variables() {
    let dir = project(&[(".env", "A=1\nB=2"), (".env.test", "A=3")]);
    let files = collector().collect_all(dir.path()).by_file();

    assert_eq!(files.len(), 2);
    assert_eq!(files[".env"]["B"], "2");
    assert_eq!(files[".env.test"]["A"], "3");
  }

  #[test]
  fn test_invalid_pattern() {
    let err = EnvFileCollector::new(["[unclosed"], Vec::<String>::new()).unwrap_err();
    assert!(matches!(err, CollectError::Pattern { .. }));
  }
}
