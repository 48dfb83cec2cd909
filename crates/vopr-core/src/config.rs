//! Environment-derived configuration.
//!
//! Each binary constructs its config record exactly once at startup; the
//! record is immutable and passed down by handle. Nothing reads the
//! environment after start. A missing or empty variable is a fatal
//! configuration error, surfaced with the variable's name and mapped to
//! exit code 1 by the binaries.

use std::path::PathBuf;

use secrecy::SecretString;
use thiserror::Error;

/// Base URL of the upstream source-tracker API.
pub const ENV_REPOSITORY_URL: &str = "REPOSITORY_URL";
/// Absolute path of the working copy used for replay (or its per-slot
/// prefix, for the organizer).
pub const ENV_WORKING_DIRECTORY: &str = "TIGERBEETLE_DIRECTORY";
/// Hub listen address, `host:port`.
pub const ENV_HUB_ADDRESS: &str = "VOPR_HUB_ADDRESS";
/// Artifact-store root directory.
pub const ENV_ISSUE_DIRECTORY: &str = "ISSUE_DIRECTORY";
/// Bearer credential for issue filing.
pub const ENV_DEVELOPER_TOKEN: &str = "DEVELOPER_TOKEN";
/// Total number of fuzzing slots (organizer).
pub const ENV_NUM_VOPRS: &str = "NUM_VOPRS";
/// This host's slot number, 1-based (organizer).
pub const ENV_CURRENT_VOPR: &str = "CURRENT_VOPR";

/// Configuration failure. Always fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The variable is not set.
    #[error("missing environment variable {name}")]
    Missing {
        /// Variable name.
        name: &'static str,
    },

    /// The variable is set but empty.
    #[error("environment variable {name} is empty")]
    Empty {
        /// Variable name.
        name: &'static str,
    },

    /// The variable is set but does not parse.
    #[error("environment variable {name} is invalid: {reason}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Why parsing failed.
        reason: String,
    },
}

/// Source of environment values, injectable for tests.
pub trait EnvSource {
    /// Looks up one variable.
    fn get(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Hub daemon configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Upstream tracker API base URL.
    pub repository_url: String,
    /// Replay working copy.
    pub working_directory: PathBuf,
    /// TCP listen address.
    pub listen_address: String,
    /// Artifact-store root.
    pub issue_directory: PathBuf,
    /// Issue-filing credential.
    pub developer_token: SecretString,
}

impl HubConfig {
    /// Reads the hub configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    /// Reads the hub configuration from an explicit source.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub fn from_source(env: &impl EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            repository_url: require(env, ENV_REPOSITORY_URL)?,
            working_directory: working_directory(env)?,
            listen_address: require(env, ENV_HUB_ADDRESS)?,
            issue_directory: PathBuf::from(require(env, ENV_ISSUE_DIRECTORY)?),
            developer_token: SecretString::from(require(env, ENV_DEVELOPER_TOKEN)?),
        })
    }

    /// Final path component of the working copy, used by the trace
    /// canonicalizer as the path-strip anchor.
    #[must_use]
    pub fn source_root_name(&self) -> String {
        self.working_directory
            .file_name()
            .map_or_else(String::new, |name| name.to_string_lossy().into_owned())
    }
}

/// Worker runner configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Working copy this worker fuzzes.
    pub working_directory: PathBuf,
    /// Hub address reports are sent to.
    pub hub_address: String,
}

impl WorkerConfig {
    /// Reads the worker configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    /// Reads the worker configuration from an explicit source.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub fn from_source(env: &impl EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            working_directory: working_directory(env)?,
            hub_address: require(env, ENV_HUB_ADDRESS)?,
        })
    }
}

/// Organizer configuration.
#[derive(Debug, Clone)]
pub struct OrganizerConfig {
    /// Upstream tracker API base URL.
    pub repository_url: String,
    /// Per-slot working-directory prefix; slot `n` lives at
    /// `{prefix}{n}`.
    pub working_directory: PathBuf,
    /// Total number of slots, greater than 0.
    pub num_voprs: usize,
    /// This invocation's slot, 1-based, greater than 0.
    pub current_vopr: usize,
}

impl OrganizerConfig {
    /// Reads the organizer configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    /// Reads the organizer configuration from an explicit source.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub fn from_source(env: &impl EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            repository_url: require(env, ENV_REPOSITORY_URL)?,
            working_directory: working_directory(env)?,
            num_voprs: positive_integer(env, ENV_NUM_VOPRS)?,
            current_vopr: positive_integer(env, ENV_CURRENT_VOPR)?,
        })
    }

    /// Working directory of a slot: the configured prefix with the slot
    /// number appended. Slots are numbered from 1.
    #[must_use]
    pub fn slot_directory(&self, slot: usize) -> PathBuf {
        let mut dir = self.working_directory.as_os_str().to_owned();
        dir.push(slot.to_string());
        PathBuf::from(dir)
    }
}

fn require(env: &impl EnvSource, name: &'static str) -> Result<String, ConfigError> {
    let value = env.get(name).ok_or(ConfigError::Missing { name })?;
    if value.is_empty() {
        return Err(ConfigError::Empty { name });
    }
    Ok(value)
}

/// The working directory is used both as a path and as a string prefix
/// (organizer slots), so trailing separators are trimmed on intake.
fn working_directory(env: &impl EnvSource) -> Result<PathBuf, ConfigError> {
    let raw = require(env, ENV_WORKING_DIRECTORY)?;
    let trimmed = raw.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid {
            name: ENV_WORKING_DIRECTORY,
            reason: "path has no components".to_string(),
        });
    }
    Ok(PathBuf::from(trimmed))
}

fn positive_integer(env: &impl EnvSource, name: &'static str) -> Result<usize, ConfigError> {
    let raw = require(env, name)?;
    let value: usize = raw.parse().map_err(|_| ConfigError::Invalid {
        name,
        reason: format!("not an integer: {raw:?}"),
    })?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct MapEnv(HashMap<&'static str, &'static str>);

    impl EnvSource for MapEnv {
        fn get(&self, name: &str) -> Option<String> {
            self.0.get(name).map(|v| (*v).to_string())
        }
    }

    fn hub_env() -> MapEnv {
        MapEnv(HashMap::from([
            (ENV_REPOSITORY_URL, "https://api.example.com/repos/org/db"),
            (ENV_WORKING_DIRECTORY, "/srv/vopr/tigerbeetle/"),
            (ENV_HUB_ADDRESS, "0.0.0.0:5555"),
            (ENV_ISSUE_DIRECTORY, "/srv/vopr/issues"),
            (ENV_DEVELOPER_TOKEN, "ghp_sssh"),
        ]))
    }

    #[test]
    fn hub_config_parses() {
        let config = HubConfig::from_source(&hub_env()).unwrap();
        assert_eq!(config.listen_address, "0.0.0.0:5555");
        // Trailing slash trimmed on intake.
        assert_eq!(
            config.working_directory,
            PathBuf::from("/srv/vopr/tigerbeetle")
        );
        assert_eq!(config.source_root_name(), "tigerbeetle");
    }

    #[test]
    fn missing_variable_is_fatal() {
        let mut env = hub_env();
        env.0.remove(ENV_DEVELOPER_TOKEN);
        assert_eq!(
            HubConfig::from_source(&env).unwrap_err(),
            ConfigError::Missing {
                name: ENV_DEVELOPER_TOKEN
            }
        );
    }

    #[test]
    fn empty_variable_is_fatal() {
        let mut env = hub_env();
        env.0.insert(ENV_REPOSITORY_URL, "");
        assert_eq!(
            HubConfig::from_source(&env).unwrap_err(),
            ConfigError::Empty {
                name: ENV_REPOSITORY_URL
            }
        );
    }

    #[test]
    fn organizer_rejects_zero_slots() {
        let env = MapEnv(HashMap::from([
            (ENV_REPOSITORY_URL, "https://api.example.com/repos/org/db"),
            (ENV_WORKING_DIRECTORY, "/srv/vopr/tigerbeetle"),
            (ENV_NUM_VOPRS, "0"),
            (ENV_CURRENT_VOPR, "1"),
        ]));
        assert!(matches!(
            OrganizerConfig::from_source(&env).unwrap_err(),
            ConfigError::Invalid {
                name: ENV_NUM_VOPRS,
                ..
            }
        ));
    }

    #[test]
    fn organizer_rejects_non_integer_slot() {
        let env = MapEnv(HashMap::from([
            (ENV_REPOSITORY_URL, "https://api.example.com/repos/org/db"),
            (ENV_WORKING_DIRECTORY, "/srv/vopr/tigerbeetle"),
            (ENV_NUM_VOPRS, "4"),
            (ENV_CURRENT_VOPR, "two"),
        ]));
        assert!(matches!(
            OrganizerConfig::from_source(&env).unwrap_err(),
            ConfigError::Invalid {
                name: ENV_CURRENT_VOPR,
                ..
            }
        ));
    }

    #[test]
    fn slot_directories_are_suffixed() {
        let env = MapEnv(HashMap::from([
            (ENV_REPOSITORY_URL, "https://api.example.com/repos/org/db"),
            (ENV_WORKING_DIRECTORY, "/srv/vopr/tigerbeetle/"),
            (ENV_NUM_VOPRS, "4"),
            (ENV_CURRENT_VOPR, "2"),
        ]));
        let config = OrganizerConfig::from_source(&env).unwrap();
        assert_eq!(
            config.slot_directory(2),
            PathBuf::from("/srv/vopr/tigerbeetle2")
        );
    }
}
