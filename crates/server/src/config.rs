// crates/server/src/config.rs
//! Startup configuration.
//!
//! Resolved once into [`Settings`]. Precedence, highest first: command-line
//! flags, environment variables, the first config file that loads, defaults.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_BIN: &str = "tidal-dl-ng";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5050;

/// Config files tried after `--config`, in order.
pub const CONFIG_CANDIDATES: [&str; 2] = ["/etc/tidal-dl/config.toml", "config.toml"];

/// Table name a config file may nest its keys under.
const CONFIG_TABLE: &str = "tidal-dl";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Command-line flags for the `tidal-dl-web` binary.
#[derive(Debug, Default, Parser)]
#[command(name = "tidal-dl-web", version, about = "Web front end for tidal-dl-ng downloads")]
pub struct Cli {
    /// Config file tried before the standard locations.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind.
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory holding `index.html`.
    pub template_folder: PathBuf,
    /// Directory served under `/static` and for `/favicon.ico`.
    pub static_folder: PathBuf,
    pub tidal_dl_bin: String,
    /// Seconds; 0 disables the limit.
    pub download_timeout: u64,
    /// When set, `/download` requires a matching `X-Download-Token` header.
    pub download_token: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            template_folder: cwd.clone(),
            static_folder: cwd,
            tidal_dl_bin: DEFAULT_BIN.to_string(),
            download_timeout: 0,
            download_token: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// A scalar that may be written as a TOML integer or a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Text(String),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Int(n) => n.to_string(),
            Scalar::Text(s) => s,
        }
    }
}

/// Keys accepted in a config file. Everything is optional.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    template_folder: Option<PathBuf>,
    static_folder: Option<PathBuf>,
    tidal_dl_bin: Option<String>,
    download_timeout: Option<Scalar>,
    download_token: Option<String>,
    #[serde(alias = "flask_host")]
    host: Option<String>,
    #[serde(alias = "flask_port")]
    port: Option<Scalar>,
}

impl FileConfig {
    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let parse_err = |source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let mut table: toml::Table = toml::from_str(content).map_err(parse_err)?;
        let table = match table.remove(CONFIG_TABLE) {
            Some(toml::Value::Table(nested)) => nested,
            Some(other) => {
                table.insert(CONFIG_TABLE.to_string(), other);
                table
            }
            None => table,
        };
        toml::Value::Table(table).try_into().map_err(parse_err)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }
}

/// Load the first candidate that exists and parses. Broken files are logged
/// and skipped.
fn load_first_file(candidates: &[PathBuf]) -> FileConfig {
    for path in candidates {
        if !path.exists() {
            continue;
        }
        match FileConfig::read(path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config");
                return config;
            }
            Err(e) => tracing::warn!(error = %e, "skipping config file"),
        }
    }
    FileConfig::default()
}

fn parse_timeout(raw: &str) -> u64 {
    match raw.trim().parse::<i64>() {
        Ok(secs) if secs > 0 => secs as u64,
        Ok(_) => 0,
        Err(_) => {
            tracing::warn!(value = raw, "invalid download timeout, using no timeout");
            0
        }
    }
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key: "port",
        value: raw.to_string(),
    })
}

impl Settings {
    /// Resolve from the real environment and the standard file locations.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut candidates: Vec<PathBuf> = cli.config.iter().cloned().collect();
        candidates.extend(CONFIG_CANDIDATES.iter().map(PathBuf::from));
        Self::resolve(cli, |key| std::env::var(key).ok(), &candidates)
    }

    /// Resolve with an injectable environment lookup.
    pub fn resolve<F>(cli: &Cli, env: F, candidates: &[PathBuf]) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = load_first_file(candidates);
        let defaults = Settings::default();

        let template_folder = env("TEMPLATE_FOLDER")
            .map(PathBuf::from)
            .or(file.template_folder)
            .unwrap_or(defaults.template_folder);
        let static_folder = env("STATIC_FOLDER")
            .map(PathBuf::from)
            .or(file.static_folder)
            .unwrap_or(defaults.static_folder);
        let tidal_dl_bin = env("TIDAL_DL_BIN")
            .or(file.tidal_dl_bin)
            .unwrap_or(defaults.tidal_dl_bin);
        let download_timeout = env("DOWNLOAD_TIMEOUT")
            .or(file.download_timeout.map(Scalar::into_text))
            .map_or(0, |raw| parse_timeout(&raw));
        let download_token = env("DOWNLOAD_TOKEN")
            .or(file.download_token)
            .filter(|t| !t.is_empty());
        let host = cli
            .host
            .clone()
            .or_else(|| env("HOST"))
            .or_else(|| env("FLASK_HOST"))
            .or(file.host)
            .unwrap_or(defaults.host);
        let port = match cli.port {
            Some(port) => port,
            None => match env("PORT")
                .or_else(|| env("FLASK_PORT"))
                .or(file.port.map(Scalar::into_text))
            {
                Some(raw) => parse_port(&raw)?,
                None => defaults.port,
            },
        };

        Ok(Self {
            template_folder,
            static_folder,
            tidal_dl_bin,
            download_timeout,
            download_token,
            host,
            port,
        })
    }

    pub fn index_path(&self) -> PathBuf {
        self.template_folder.join("index.html")
    }

    pub fn favicon_path(&self) -> PathBuf {
        self.static_folder.join("favicon.ico")
    }
}
