//! Configuration management for the backup runner.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`BACKUP_RUNNER_` prefix, `__` between nested keys), then resolves
//! defaults that depend on the file location and validates everything the
//! run relies on. A config that loads is a config that can run.

use crate::archive::{ArchiveFormat, DEFAULT_COMPRESSION_LEVEL};
use crate::ledger::retention::RetentionSpec;
use crate::remote::RemoteKind;
use crate::transfer::parse_url;
use crate::utils::errors::ConfigError;
use crate::utils::ids::{DEFAULT_ID_LENGTH, MAX_ID_LENGTH, MIN_ID_LENGTH};
use config::{Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SYSTEM_CONFIG_PATH: &str = "/etc/backup-runner/backup-runner.toml";
pub const LOCAL_CONFIG_PATH: &str = "backup-runner.toml";
pub const ENV_PREFIX: &str = "BACKUP_RUNNER";

/// Target selector meaning "every configured target".
pub const ALL_TARGETS: &str = "all";

const PASSWORD_FILE_PREFIX: &str = "file:";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Archive kind (tar, zip)
    #[serde(default = "default_archive")]
    pub archive: String,

    /// Compression (none, gzip, zstd for tar; none, deflate for zip)
    #[serde(default = "default_compression")]
    pub compression: String,

    /// Compression level (1-9, gzip and deflate only)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Where archives are written before upload
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    /// Directory holding the backup list. Defaults to the config file's directory.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub delete_after_upload: bool,

    #[serde(default = "default_id_length")]
    pub id_length: usize,

    #[serde(default)]
    pub backup_list: BackupListConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,

    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupListConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Remove entries older than `older_than` after each run
    #[serde(default)]
    pub clean_entries: bool,

    /// Retention period, e.g. "1y 2m" or "30d"
    #[serde(default)]
    pub older_than: String,
}

impl Default for BackupListConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clean_entries: false,
            older_than: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(rename = "type")]
    pub kind: RemoteKind,

    /// Base URL of the remote
    pub root: String,

    #[serde(default)]
    pub user: String,

    /// Plain password, or `file:<path>` to read it from a file
    #[serde(default)]
    pub password: Option<String>,

    /// Directory on the remote the archives go to
    #[serde(default)]
    pub dest_dir: String,

    /// Helper executable for external-helper remotes
    #[serde(default)]
    pub script: Option<String>,

    /// Chunk size in bytes for chunked uploads
    #[serde(default)]
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Directory to back up
    pub path: PathBuf,

    /// Name of the remote in `[remotes]`
    pub remote: String,

    /// systemd OnCalendar expression used by `--install`
    #[serde(default)]
    pub interval: Option<String>,
}

fn default_archive() -> String {
    "tar".to_string()
}

fn default_compression() -> String {
    "none".to_string()
}

fn default_compression_level() -> u32 {
    DEFAULT_COMPRESSION_LEVEL
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_id_length() -> usize {
    DEFAULT_ID_LENGTH
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load the configuration from `path`, or from the first of the default
    /// locations that exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = Self::locate(path)?;
        debug!("Loading configuration from {}", path.display());

        let settings = config::Config::builder()
            .add_source(File::from(path.as_path()).format(FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.resolve(&config_dir(&path))
    }

    /// Parse TOML text as if it were a config file living in `config_dir`.
    /// Environment overrides are not applied.
    pub fn parse(content: &str, config_dir: &Path) -> Result<Self, ConfigError> {
        let config: Config = config::Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.resolve(config_dir)
    }

    fn locate(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        let mut candidates = match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => vec![PathBuf::from(SYSTEM_CONFIG_PATH), PathBuf::from(LOCAL_CONFIG_PATH)],
        };

        match candidates.iter().position(|candidate| candidate.is_file()) {
            Some(found) => Ok(candidates.swap_remove(found)),
            None => Err(ConfigError::NotFound(candidates)),
        }
    }

    fn resolve(mut self, config_dir: &Path) -> Result<Self, ConfigError> {
        if self.state_dir.is_none() {
            self.state_dir = Some(config_dir.to_path_buf());
        }

        for (name, remote) in self.remotes.iter_mut() {
            if let Some(password) = remote.password.as_deref() {
                if let Some(file) = password.strip_prefix(PASSWORD_FILE_PREFIX) {
                    let file = config_dir.join(file);
                    let secret = std::fs::read_to_string(&file).map_err(|source| {
                        ConfigError::PasswordFile {
                            remote: name.clone(),
                            source,
                        }
                    })?;
                    remote.password = Some(secret.trim().to_string());
                }
            }
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.archive_format()?;
        self.retention()?;

        if !(MIN_ID_LENGTH..=MAX_ID_LENGTH).contains(&self.id_length) {
            return Err(ConfigError::Invalid(format!(
                "id_length must be between {} and {}, got {}",
                MIN_ID_LENGTH, MAX_ID_LENGTH, self.id_length
            )));
        }

        for (name, remote) in &self.remotes {
            parse_url(&remote.root).map_err(|e| {
                ConfigError::Invalid(format!("remote \"{}\" has an invalid root: {}", name, e))
            })?;
            if remote.kind == RemoteKind::Nextcloud && remote.user.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "remote \"{}\" needs a user for chunked uploads",
                    name
                )));
            }
            if remote.chunk_size == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "remote \"{}\" has a chunk_size of 0",
                    name
                )));
            }
        }

        for (name, target) in &self.targets {
            if !self.remotes.contains_key(&target.remote) {
                return Err(ConfigError::Invalid(format!(
                    "target \"{}\" references unknown remote \"{}\"",
                    name, target.remote
                )));
            }
        }

        Ok(())
    }

    pub fn archive_format(&self) -> Result<ArchiveFormat, ConfigError> {
        ArchiveFormat::parse(&self.archive, &self.compression, self.compression_level)
    }

    /// The retention period, `None` when cleaning is off.
    pub fn retention(&self) -> Result<Option<RetentionSpec>, ConfigError> {
        if !self.backup_list.clean_entries {
            return Ok(None);
        }
        self.backup_list.older_than.parse().map(Some)
    }

    pub fn state_dir(&self) -> &Path {
        self.state_dir.as_deref().unwrap_or_else(|| Path::new("."))
    }

    /// Expand a `--targets` selection into target names.
    ///
    /// `all` selects every configured target. Duplicates are dropped, the
    /// first occurrence keeps its position.
    pub fn resolve_targets(&self, selection: &[String]) -> Result<Vec<String>, ConfigError> {
        if selection.iter().any(|name| name == ALL_TARGETS) {
            return Ok(self.targets.keys().cloned().collect());
        }

        let mut names: Vec<String> = Vec::with_capacity(selection.len());
        for name in selection {
            if !self.targets.contains_key(name) {
                return Err(ConfigError::UnknownTarget(name.clone()));
            }
            if !names.contains(name) {
                names.push(name.clone());
            }
        }

        if names.is_empty() {
            return Err(ConfigError::Invalid("no targets selected".to_string()));
        }
        Ok(names)
    }
}

fn config_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveKind, Compression};
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
archive = "tar"
compression = "gzip"
archive_dir = "/var/backups"
delete_after_upload = true

[backup_list]
clean_entries = true
older_than = "1y 2m"

[remotes.cloud]
type = "nextcloud"
root = "https://cloud.example.com"
user = "alice"
password = "hunter2"
dest_dir = "backups"
chunk_size = 1048576

[remotes.party]
type = "copyparty"
root = "https://files.example.com"
password = "pw"

[targets.docs]
path = "/home/alice/docs"
remote = "cloud"
interval = "daily"

[targets.photos]
path = "/home/alice/photos"
remote = "party"
"#;

    #[test]
    fn test_parse_sample() {
        let dir = TempDir::new().unwrap();
        let config = Config::parse(SAMPLE, dir.path()).unwrap();

        let format = config.archive_format().unwrap();
        assert_eq!(format.kind(), ArchiveKind::Tar);
        assert_eq!(format.compression(), Compression::Gzip);
        assert_eq!(format.level(), DEFAULT_COMPRESSION_LEVEL);

        assert_eq!(config.archive_dir, PathBuf::from("/var/backups"));
        assert_eq!(config.state_dir(), dir.path());
        assert!(config.delete_after_upload);
        assert_eq!(config.id_length, DEFAULT_ID_LENGTH);
        assert!(config.backup_list.enabled);
        assert!(config.retention().unwrap().is_some());
        assert_eq!(config.log.level, "info");

        let cloud = &config.remotes["cloud"];
        assert_eq!(cloud.kind, RemoteKind::Nextcloud);
        assert_eq!(cloud.chunk_size, Some(1048576));
        assert_eq!(config.remotes["party"].kind, RemoteKind::Copyparty);
        assert_eq!(config.remotes["party"].script, None);

        assert_eq!(config.targets["docs"].interval.as_deref(), Some("daily"));
        assert_eq!(config.targets["photos"].interval, None);
    }

    #[test]
    fn test_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::parse("", dir.path()).unwrap();

        assert_eq!(config.archive, "tar");
        assert_eq!(config.compression, "none");
        assert_eq!(config.archive_dir, PathBuf::from("."));
        assert!(!config.delete_after_upload);
        assert!(config.backup_list.enabled);
        assert!(!config.backup_list.clean_entries);
        assert!(config.retention().unwrap().is_none());
        assert!(config.targets.is_empty());
    }

    #[test]
    fn test_explicit_state_dir() {
        let dir = TempDir::new().unwrap();
        let config = Config::parse("state_dir = \"/var/lib/backup-runner\"", dir.path()).unwrap();
        assert_eq!(config.state_dir(), Path::new("/var/lib/backup-runner"));
    }

    #[test]
    fn test_password_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("secret"), "s3cret\n").unwrap();

        let content = r#"
[remotes.cloud]
type = "nextcloud"
root = "https://cloud.example.com"
user = "alice"
password = "file:secret"
"#;
        let config = Config::parse(content, dir.path()).unwrap();
        assert_eq!(config.remotes["cloud"].password.as_deref(), Some("s3cret"));

        std::fs::remove_file(dir.path().join("secret")).unwrap();
        assert!(matches!(
            Config::parse(content, dir.path()),
            Err(ConfigError::PasswordFile { .. })
        ));
    }

    #[test]
    fn test_invalid_configs() {
        let dir = TempDir::new().unwrap();
        let parse = |content: &str| Config::parse(content, dir.path());

        assert!(matches!(parse("archive = \"rar\""), Err(ConfigError::UnknownArchive(_))));
        assert!(matches!(
            parse("compression = \"brotli\""),
            Err(ConfigError::UnknownCompression(_))
        ));
        assert!(matches!(
            parse("archive = \"zip\"\ncompression = \"zstd\""),
            Err(ConfigError::UnsupportedCompression { .. })
        ));
        assert!(matches!(parse("id_length = 2"), Err(ConfigError::Invalid(_))));
        assert!(matches!(
            parse("[backup_list]\nclean_entries = true\nolder_than = \"soon\""),
            Err(ConfigError::Retention { .. })
        ));
        assert!(matches!(
            parse("[backup_list]\nclean_entries = true"),
            Err(ConfigError::Retention { .. })
        ));
        assert!(matches!(
            parse("[targets.docs]\npath = \"/docs\"\nremote = \"nowhere\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse("[remotes.x]\ntype = \"ftp\"\nroot = \"https://x\""),
            Err(ConfigError::Load(_))
        ));
        assert!(matches!(
            parse("[remotes.x]\ntype = \"nextcloud\"\nroot = \"https://x\""),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_resolve_targets() {
        let dir = TempDir::new().unwrap();
        let config = Config::parse(SAMPLE, dir.path()).unwrap();
        let select = |names: &[&str]| {
            let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
            config.resolve_targets(&names)
        };

        assert_eq!(select(&["all"]).unwrap(), vec!["docs", "photos"]);
        assert_eq!(select(&["photos", "docs", "photos"]).unwrap(), vec!["photos", "docs"]);
        assert!(matches!(select(&["music"]), Err(ConfigError::UnknownTarget(_))));
        assert!(matches!(select(&[]), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup-runner.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.state_dir(), dir.path());
        assert_eq!(config.targets.len(), 2);

        assert!(matches!(
            Config::load(Some(&dir.path().join("missing.toml"))),
            Err(ConfigError::NotFound(_))
        ));
    }
}
