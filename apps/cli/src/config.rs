//! Client configuration.
//!
//! Read from TOML at `~/.config/coldvault/config.toml` (or the path given
//! with `--config`). Every key is optional. Values resolve in the order
//! command-line flag, config file, environment, built-in default.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use coldvault_backup::{BackupOptions, DedupScope};
use coldvault_glacier::{Credentials, mask};
use coldvault_transfer::chunk_size_from_mb;
use serde::{Deserialize, Serialize};

use crate::cli::GlobalArgs;

/// On-disk config format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub inventory: Option<PathBuf>,
    pub region: Option<String>,
    pub vault: Option<String>,
    pub upload_chunk_mb: u64,
    pub download_chunk_mb: u64,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub legacy_dedup: bool,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            inventory: None,
            region: None,
            vault: None,
            upload_chunk_mb: 16,
            download_chunk_mb: 4,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            legacy_dedup: false,
        }
    }
}

impl ConfigFile {
    /// Loads `path`, or the defaults when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Effective settings after applying flags, file and environment.
#[derive(Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub inventory: PathBuf,
    pub region: Option<String>,
    pub vault: Option<String>,
    pub upload_chunk_mb: u64,
    pub download_chunk_mb: u64,
    pub endpoint: Option<String>,
    pub credentials: Option<Credentials>,
    pub legacy_dedup: bool,
}

impl Settings {
    /// Resolves settings from the process environment.
    pub fn load(args: &GlobalArgs) -> anyhow::Result<Self> {
        let config_path = match &args.config {
            Some(path) => path.clone(),
            None => default_config_path()?,
        };
        let file = ConfigFile::load(&config_path)?;
        Self::resolve(args, config_path, file, |key| std::env::var(key).ok())
    }

    /// Merges flags, file values and environment `lookup`s.
    pub fn resolve(
        args: &GlobalArgs,
        config_path: PathBuf,
        file: ConfigFile,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let inventory = args
            .inventory
            .clone()
            .or(file.inventory)
            .unwrap_or_else(|| default_inventory_path(&config_path));

        chunk_size_from_mb(file.upload_chunk_mb).context("upload_chunk_mb")?;
        chunk_size_from_mb(file.download_chunk_mb).context("download_chunk_mb")?;

        let access_key = args
            .access_key
            .clone()
            .or(file.access_key_id)
            .or_else(|| env("AWS_ACCESS_KEY_ID"));
        let secret_key = args
            .secret_key
            .clone()
            .or(file.secret_access_key)
            .or_else(|| env("AWS_SECRET_ACCESS_KEY"));
        let session_token = file.session_token.or_else(|| env("AWS_SESSION_TOKEN"));
        let credentials = match (access_key, secret_key) {
            (Some(access), Some(secret)) => {
                let credentials = Credentials::new(access, secret);
                Some(match session_token {
                    Some(token) => credentials.with_session_token(token),
                    None => credentials,
                })
            }
            (None, None) => None,
            _ => bail!("both an access key and a secret key are required"),
        };

        Ok(Self {
            config_path,
            inventory,
            region: file.region.or_else(|| env("AWS_REGION")),
            vault: file.vault,
            upload_chunk_mb: file.upload_chunk_mb,
            download_chunk_mb: file.download_chunk_mb,
            endpoint: file.endpoint,
            credentials,
            legacy_dedup: file.legacy_dedup,
        })
    }

    pub fn backup_options(&self) -> anyhow::Result<BackupOptions> {
        Ok(BackupOptions {
            dedup: if self.legacy_dedup {
                DedupScope::legacy()
            } else {
                DedupScope::FullFile
            },
            upload_chunk_size: chunk_size_from_mb(self.upload_chunk_mb)?,
            download_chunk_size: chunk_size_from_mb(self.download_chunk_mb)?,
        })
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unset = "(unset)";
        writeln!(f, "config            {}", self.config_path.display())?;
        writeln!(f, "inventory         {}", self.inventory.display())?;
        writeln!(f, "region            {}", self.region.as_deref().unwrap_or(unset))?;
        writeln!(f, "vault             {}", self.vault.as_deref().unwrap_or(unset))?;
        writeln!(f, "upload_chunk_mb   {}", self.upload_chunk_mb)?;
        writeln!(f, "download_chunk_mb {}", self.download_chunk_mb)?;
        writeln!(f, "endpoint          {}", self.endpoint.as_deref().unwrap_or("(regional default)"))?;
        writeln!(f, "legacy_dedup      {}", self.legacy_dedup)?;
        match &self.credentials {
            Some(c) => {
                writeln!(f, "access_key_id     {}", c.access_key_id)?;
                writeln!(f, "secret_access_key {}", mask(&c.secret_access_key))?;
                write!(
                    f,
                    "session_token     {}",
                    c.session_token.as_deref().map(mask).as_deref().unwrap_or(unset)
                )
            }
            None => write!(f, "credentials       {unset}"),
        }
    }
}

fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("coldvault").join("config.toml"))
}

fn default_inventory_path(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) => dir.join("inventory.json"),
        None => PathBuf::from("inventory.json"),
    }
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").context("APPDATA is not set")?;
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        let home = std::env::var_os("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home).join(".config"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn resolve(args: &GlobalArgs, file: ConfigFile, vars: &[(&str, &str)]) -> anyhow::Result<Settings> {
        Settings::resolve(args, PathBuf::from("/cfg/coldvault/config.toml"), file, env(vars))
    }

    #[test]
    fn parses_partial_toml() {
        let file: ConfigFile = toml::from_str(
            r#"
            region = "eu-west-1"
            vault = "photos"
            upload_chunk_mb = 64
            "#,
        )
        .unwrap();
        assert_eq!(file.region.as_deref(), Some("eu-west-1"));
        assert_eq!(file.upload_chunk_mb, 64);
        assert_eq!(file.download_chunk_mb, 4);
        assert!(!file.legacy_dedup);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(file.upload_chunk_mb, 16);
        assert!(file.inventory.is_none());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "upload_chunk_mb = \"lots\"").unwrap();
        assert!(ConfigFile::load(&path).is_err());
    }

    #[test]
    fn inventory_defaults_next_to_config() {
        let settings = resolve(&GlobalArgs::default(), ConfigFile::default(), &[]).unwrap();
        assert_eq!(settings.inventory, PathBuf::from("/cfg/coldvault/inventory.json"));
        assert!(settings.credentials.is_none());
    }

    #[test]
    fn flags_beat_file_beat_environment() {
        let args = GlobalArgs {
            access_key: Some("FLAGKEY".into()),
            ..GlobalArgs::default()
        };
        let file = ConfigFile {
            access_key_id: Some("FILEKEY".into()),
            secret_access_key: Some("filesecret".into()),
            ..ConfigFile::default()
        };
        let vars = [
            ("AWS_ACCESS_KEY_ID", "ENVKEY"),
            ("AWS_SECRET_ACCESS_KEY", "envsecret"),
            ("AWS_SESSION_TOKEN", "envtoken"),
            ("AWS_REGION", "us-east-1"),
        ];
        let settings = resolve(&args, file, &vars).unwrap();
        let creds = settings.credentials.unwrap();
        assert_eq!(creds.access_key_id, "FLAGKEY");
        assert_eq!(creds.secret_access_key, "filesecret");
        assert_eq!(creds.session_token.as_deref(), Some("envtoken"));
        assert_eq!(settings.region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn half_a_key_pair_is_rejected() {
        let args = GlobalArgs {
            access_key: Some("AKID".into()),
            ..GlobalArgs::default()
        };
        assert!(resolve(&args, ConfigFile::default(), &[]).is_err());
    }

    #[test]
    fn bad_chunk_sizes_are_rejected() {
        let file = ConfigFile {
            download_chunk_mb: 3,
            ..ConfigFile::default()
        };
        assert!(resolve(&GlobalArgs::default(), file, &[]).is_err());
    }

    #[test]
    fn legacy_dedup_selects_prefix_scope() {
        let file = ConfigFile {
            legacy_dedup: true,
            ..ConfigFile::default()
        };
        let options = resolve(&GlobalArgs::default(), file, &[])
            .unwrap()
            .backup_options()
            .unwrap();
        assert_eq!(options.dedup, DedupScope::legacy());
        assert_eq!(options.upload_chunk_size, 16 << 20);
        assert_eq!(options.download_chunk_size, 4 << 20);
    }

    #[test]
    fn display_masks_secrets() {
        let file = ConfigFile {
            access_key_id: Some("AKIDEXAMPLE".into()),
            secret_access_key: Some("wJalrXUtnFEMI/K7MDENG".into()),
            ..ConfigFile::default()
        };
        let out = resolve(&GlobalArgs::default(), file, &[]).unwrap().to_string();
        assert!(out.contains("AKIDEXAMPLE"));
        assert!(out.contains("****DENG"));
        assert!(!out.contains("wJalrXUtnFEMI"));
    }
}
