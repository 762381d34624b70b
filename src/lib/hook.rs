//! Git `pre-push` hook that pushes env files before every `git push`.

use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::info;

const HOOK_SCRIPT: &str = r#"#!/bin/sh
# env-stash pre-push hook
# Syncs .env files to the remote secret before every push

echo "Syncing .env files..."
env-stash push

if [ $? -ne 0 ]; then
  echo "Failed to sync .env files. Push aborted."
  exit 1
fi

echo "Environment sync complete."
"#;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
  #[error("Not in a git repository: {0} does not exist")]
  NotARepository(PathBuf),
  #[error("Failed to write hook {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Writes `.git/hooks/pre-push` under `root`, replacing any existing hook.
pub fn install_pre_push(root: &Path) -> Result<PathBuf, HookError> {
  let hooks = root.join(".git").join("hooks");
  if !hooks.is_dir() {
    return Err(HookError::NotARepository(hooks));
  }

  let path = hooks.join("pre-push");
  let write_err = |source| HookError::Write {
    path: path.clone(),
    source,
  };

  std::fs::write(&path, HOOK_SCRIPT).map_err(write_err)?;

  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).map_err(write_err)?;
  }

  #[cfg(feature = "tracing")]
  info!("Installed pre-push hook at {:?}", path);

  Ok(path)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_requires_git_directory() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
      install_pre_push(dir.path()),
      Err(HookError::NotARepository(_))
    ));
  }

  #[test]
  fn test_installs_executable_hook() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".git/hooks")).unwrap();

    let path = install_pre_push(dir.path()).unwrap();
    let script = std::fs::read_to_string(&path).unwrap();
    assert!(script.starts_with("#!/bin/sh"));
    assert!(script.contains("env-stash push"));

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      let mode = std::fs::metadata(&path).unwrap().permissions().mode();
      assert_eq!(mode & 0o777, 0o755);
    }
  }
}
