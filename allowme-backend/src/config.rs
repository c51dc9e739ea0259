use std::env;
use std::path::{Path, PathBuf};

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const PORT: &str = "PORT";
    pub const DATABASE_URL: &str = "DATABASE_URL";
    /// Shared KEY=value file read by the external agent process
    pub const AGENT_ENV_FILE: &str = "ALLOWME_AGENT_ENV_FILE";
    /// Directory holding `*.character.json` persona files
    pub const CHARACTERS_DIR: &str = "ALLOWME_CHARACTERS_DIR";
}

/// Default values
pub mod defaults {
    pub const PORT: u16 = 8080;
    pub const DATABASE_URL: &str = "./data/allowme.db";
    pub const AGENT_ENV_FILE: &str = ".env";
    pub const CHARACTERS_DIR: &str = "characters";
}

/// Returns the absolute path to the allowme-backend directory.
/// Uses CARGO_MANIFEST_DIR at compile time, so it always resolves
/// to allowme-backend/ regardless of the working directory at runtime.
pub fn backend_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Returns the absolute path to the monorepo root (parent of allowme-backend/).
pub fn repo_root() -> PathBuf {
    let backend = backend_dir();
    backend.parent().map(Path::to_path_buf).unwrap_or(backend)
}

/// Resolve a path relative to the repo root.
/// If the env var is set, use that as-is; otherwise join the default name onto repo_root().
fn resolve_repo_path(env_var: &str, default_name: &str) -> PathBuf {
    env::var(env_var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| repo_root().join(default_name))
}

/// Get the path of the agent's shared .env file
pub fn agent_env_file() -> PathBuf {
    resolve_repo_path(env_vars::AGENT_ENV_FILE, defaults::AGENT_ENV_FILE)
}

/// Get the characters directory from environment or default
pub fn characters_dir() -> PathBuf {
    resolve_repo_path(env_vars::CHARACTERS_DIR, defaults::CHARACTERS_DIR)
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub agent_env_file: PathBuf,
    pub characters_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env::var(env_vars::PORT)
            .ok()
            .and_then(|v| match v.parse() {
                Ok(port) => Some(port),
                Err(_) => {
                    log::warn!("Ignoring invalid {} value {:?}", env_vars::PORT, v);
                    None
                }
            })
            .unwrap_or(defaults::PORT);

        Self {
            port,
            database_url: env::var(env_vars::DATABASE_URL)
                .unwrap_or_else(|_| defaults::DATABASE_URL.to_string()),
            agent_env_file: agent_env_file(),
            characters_dir: characters_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_root_is_parent_of_backend_dir() {
        assert_eq!(repo_root(), backend_dir().parent().unwrap());
    }

    #[test]
    fn test_default_paths_live_under_repo_root() {
        assert_eq!(
            resolve_repo_path("ALLOWME_TEST_UNSET_VARIABLE", defaults::CHARACTERS_DIR),
            repo_root().join("characters")
        );
    }
}
