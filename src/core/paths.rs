// src/core/paths.rs

use crate::constants::{APP_NAME, CACHE_DIR, ENV_CONFIG_DIR, LOCAL_PROFILE_DIR};
use crate::system::environment::EnvSnapshot;
use lazy_static::lazy_static;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

lazy_static! {
    static ref CLK_CONFIG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    #[error("Could not create directory at '{path}': {source}")]
    DirCreation {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not expand path '{path}': {reason}")]
    Expansion { path: String, reason: String },
}

/// Returns the global profile directory (`$CLK_CONFIG_DIR` or `~/.config/clk`),
/// creating it if needed.
///
/// The first successful call is memoized for the rest of the process.
pub fn global_config_dir(env: &EnvSnapshot) -> Result<PathBuf, PathError> {
    let mut cached = CLK_CONFIG_DIR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(path) = &*cached {
        return Ok(path.clone());
    }

    let config_path = match env.get(ENV_CONFIG_DIR).filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::config_dir()
            .ok_or(PathError::ConfigDirNotFound)?
            .join(APP_NAME),
    };
    ensure_dir(&config_path)?;

    *cached = Some(config_path.clone());
    Ok(config_path)
}

/// Creates `path` and its parents if they do not exist yet.
pub fn ensure_dir(path: &Path) -> Result<(), PathError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| PathError::DirCreation {
            path: path.display().to_string(),
            source: e,
        })?;
    }
    Ok(())
}

/// The on-disk cache directory inside a global profile directory.
pub fn cache_dir(global_dir: &Path) -> PathBuf {
    global_dir.join(CACHE_DIR)
}

/// Walks up from `start` looking for a directory that contains a `.clk/` profile.
/// Returns the project root (the parent of `.clk/`), never the global directory itself.
pub fn find_project_root(start: &Path, global_dir: &Path) -> Option<PathBuf> {
    let global = dunce::canonicalize(global_dir).unwrap_or_else(|_| global_dir.to_path_buf());
    start.ancestors().find_map(|dir| {
        let candidate = dir.join(LOCAL_PROFILE_DIR);
        if !candidate.is_dir() {
            return None;
        }
        let canonical = dunce::canonicalize(&candidate).unwrap_or(candidate);
        (canonical != global).then(|| dir.to_path_buf())
    })
}

/// Expands `~` and environment variables, then anchors relative results at `base`.
pub fn expand_path(raw: &str, base: &Path) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(raw).map_err(|e| PathError::Expansion {
        path: raw.to_string(),
        reason: e.to_string(),
    })?;
    let path = PathBuf::from(expanded.into_owned());
    let absolute = if path.is_absolute() {
        path
    } else {
        base.join(path)
    };
    Ok(dunce::simplified(&absolute).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_find_project_root_walks_upward() {
        let dir = tempdir().unwrap();
        let global = dir.path().join("global");
        fs::create_dir_all(&global).unwrap();
        let project = dir.path().join("proj");
        fs::create_dir_all(project.join(LOCAL_PROFILE_DIR)).unwrap();
        let nested = project.join("src").join("deep");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_project_root(&nested, &global), Some(project));
        assert_eq!(find_project_root(&global, &global), None);
    }

    #[test]
    fn test_global_dir_is_never_a_project() {
        let dir = tempdir().unwrap();
        let global = dir.path().join(LOCAL_PROFILE_DIR);
        fs::create_dir_all(&global).unwrap();
        assert_eq!(find_project_root(dir.path(), &global), None);
    }

    #[test]
    fn test_expand_path_anchors_relative_paths() {
        let base = Path::new("/opt/profile");
        assert_eq!(
            expand_path("bin", base).unwrap(),
            PathBuf::from("/opt/profile/bin")
        );
        assert_eq!(
            expand_path("/usr/local/bin", base).unwrap(),
            PathBuf::from("/usr/local/bin")
        );
    }
}
