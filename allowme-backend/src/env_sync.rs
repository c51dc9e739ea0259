//! Agent environment file synchronization.
//!
//! The external agent process reads its API keys from a shared `KEY=value`
//! file at startup. Secret profile fields are written through to that file.
//! Updates are best-effort: failures are logged, never returned.

use std::fs;
use std::path::{Path, PathBuf};

use crate::profile_hooks::{ProfileListener, ProfileSaved};

/// Apply `vars` to the contents of an env file.
///
/// Blank values are skipped. An existing `KEY=` line is replaced in place and
/// any later duplicate lines for that key are dropped; unknown keys are
/// appended. Returns `None` when nothing changed.
pub fn apply_env_updates(content: &str, vars: &[(&str, String)]) -> Option<String> {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let mut changed = false;

    for (key, value) in vars {
        if value.trim().is_empty() {
            continue;
        }
        if key.is_empty() || key.contains('=') || value.contains(['\n', '\r']) {
            log::warn!("[ENV_SYNC] Skipping malformed entry for key {:?}", key);
            continue;
        }

        let prefix = format!("{}=", key);
        let entry = format!("{}{}", prefix, value);
        let mut found = false;
        lines.retain_mut(|line| {
            if !line.starts_with(&prefix) {
                return true;
            }
            if found {
                // Duplicate definition of the same key
                changed = true;
                return false;
            }
            found = true;
            if *line != entry {
                *line = entry.clone();
                changed = true;
            }
            true
        });

        if found {
            log::info!("[ENV_SYNC] Updated {}", key);
        } else {
            lines.push(entry);
            changed = true;
            log::info!("[ENV_SYNC] Added {}", key);
        }
    }

    if !changed {
        return None;
    }
    let mut updated = lines.join("\n");
    updated.push('\n');
    Some(updated)
}

/// The shared environment file consumed by the agent process
#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
}

impl EnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write `vars` into the file. Returns whether the file changed.
    ///
    /// The file belongs to the agent and must already exist. The new contents
    /// are written to a sibling file which is then renamed over it. Symlinks
    /// are followed and the file's permissions are kept.
    pub fn update(&self, vars: &[(&str, String)]) -> bool {
        match self.try_update(vars) {
            Ok(changed) => changed,
            Err(e) => {
                log::error!("[ENV_SYNC] Error updating {:?}: {}", self.path, e);
                false
            }
        }
    }

    fn try_update(&self, vars: &[(&str, String)]) -> std::io::Result<bool> {
        if !self.exists() {
            log::error!("[ENV_SYNC] .env file not found at {:?}", self.path);
            return Ok(false);
        }

        // Write through symlinks to the file the agent actually reads
        let target = fs::canonicalize(&self.path)?;
        let content = fs::read_to_string(&target)?;
        let Some(updated) = apply_env_updates(&content, vars) else {
            return Ok(false);
        };

        let permissions = fs::metadata(&target)?.permissions();
        let tmp_path = temp_path_for(&target);
        let replaced = fs::write(&tmp_path, updated)
            .and_then(|()| fs::set_permissions(&tmp_path, permissions))
            .and_then(|()| fs::rename(&tmp_path, &target));
        if let Err(e) = replaced {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        log::info!("[ENV_SYNC] Successfully updated {:?}", self.path);
        Ok(true)
    }
}

/// Sibling of `path` used for the replacement contents
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".allowme-tmp");
    path.with_file_name(name)
}

impl ProfileListener for EnvFile {
    fn name(&self) -> &'static str {
        "env_sync"
    }

    fn on_profile_saved(&self, event: &ProfileSaved) -> Result<(), String> {
        let vars = event.env_updates();
        if vars.is_empty() {
            return Ok(());
        }
        if !self.exists() {
            return Err(format!("env file not found at {:?}", self.path));
        }
        self.update(&vars);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn var(key: &'static str, value: &str) -> (&'static str, String) {
        (key, value.to_string())
    }

    #[test]
    fn test_replaces_existing_key_in_place() {
        let content = "PORT=3000\nOPENAI_API_KEY=old\nDEBUG=1\n";
        let updated = apply_env_updates(content, &[var("OPENAI_API_KEY", "new")]).unwrap();
        assert_eq!(updated, "PORT=3000\nOPENAI_API_KEY=new\nDEBUG=1\n");
    }

    #[test]
    fn test_appends_missing_key() {
        let updated = apply_env_updates("PORT=3000", &[var("EVM_PRIVATE_KEY", "0xkey")]).unwrap();
        assert_eq!(updated, "PORT=3000\nEVM_PRIVATE_KEY=0xkey\n");
    }

    #[test]
    fn test_blank_values_leave_file_unchanged() {
        let content = "OPENAI_API_KEY=old\n";
        assert_eq!(apply_env_updates(content, &[var("OPENAI_API_KEY", "")]), None);
        assert_eq!(apply_env_updates(content, &[var("OPENAI_API_KEY", "   ")]), None);
    }

    #[test]
    fn test_collapses_duplicate_definitions() {
        let content = "OPENAI_API_KEY=a\nOTHER=x\nOPENAI_API_KEY=b\n";
        let updated = apply_env_updates(content, &[var("OPENAI_API_KEY", "new")]).unwrap();
        assert_eq!(updated, "OPENAI_API_KEY=new\nOTHER=x\n");
    }

    #[test]
    fn test_similar_key_prefix_is_not_touched() {
        let content = "OPENAI_API_KEY_BACKUP=keep\n";
        let updated = apply_env_updates(content, &[var("OPENAI_API_KEY", "new")]).unwrap();
        assert_eq!(updated, "OPENAI_API_KEY_BACKUP=keep\nOPENAI_API_KEY=new\n");
    }

    #[test]
    fn test_rejects_values_with_newlines() {
        assert_eq!(
            apply_env_updates("", &[var("OPENAI_API_KEY", "sk\nINJECTED=1")]),
            None
        );
    }

    #[test]
    fn test_same_value_is_not_a_change() {
        assert_eq!(apply_env_updates("OPENAI_API_KEY=same\n", &[var("OPENAI_API_KEY", "same")]), None);
    }

    #[test]
    fn test_update_writes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "OPENAI_API_KEY=old\n").unwrap();
        let env = EnvFile::new(&path);

        assert!(env.update(&[var("OPENAI_API_KEY", "new"), var("TELEGRAM_BOT_TOKEN", "123:abc")]));

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("OPENAI_API_KEY=").count(), 1);
        assert!(content.contains("OPENAI_API_KEY=new\n"));
        assert!(content.contains("TELEGRAM_BOT_TOKEN=123:abc\n"));
        assert!(!dir.path().join(".env.allowme-tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_update_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "PORT=3000\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        assert!(EnvFile::new(&path).update(&[var("EVM_PRIVATE_KEY", "0xkey")]));

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert!(fs::read_to_string(&path).unwrap().contains("EVM_PRIVATE_KEY=0xkey\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_update_writes_through_symlink() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real.env");
        let link = dir.path().join(".env");
        fs::write(&real, "A=1\n").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        assert!(EnvFile::new(&link).update(&[var("OPENAI_API_KEY", "sk-new")]));

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&real).unwrap(), "A=1\nOPENAI_API_KEY=sk-new\n");
        assert!(!dir.path().join("real.env.allowme-tmp").exists());
    }

    #[test]
    fn test_update_missing_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let env = EnvFile::new(dir.path().join(".env"));
        assert!(!env.update(&[var("OPENAI_API_KEY", "new")]));
        assert!(!env.path().exists());
    }
}
