//! Project settings.
//!
//! The source and destination layout is fixed, only the project root moves.
//! Everything else can be tuned in an optional `assetline.toml` placed in the
//! project root:
//!
//! ```toml
//! cache = ".cache"
//!
//! [server]
//! port = 8080
//! reload_port = 1337
//!
//! [deploy]
//! remote = "https://github.com/user/site.git"
//! branch = "main"
//!
//! [fonts]
//! command = "woff2_compress"
//!
//! [styles]
//! strict = false
//! ```

use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Name of the optional settings file inside the project root.
pub const CONFIG_FILE: &str = "assetline.toml";

/// Destination folder, relative to the project root.
pub const DEST_FOLDER: &str = "dist";

#[derive(Debug, Clone)]
pub struct Config {
    /// Project root, all fixed paths are resolved against it.
    pub root: Utf8PathBuf,
    /// Working directory for manifests, converted fonts and deploys.
    pub cache: Utf8PathBuf,
    pub server: ServerConfig,
    pub deploy: DeployConfig,
    pub fonts: FontsConfig,
    pub styles: StylesConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP port of the preview server.
    pub port: u16,
    /// Preferred websocket port for reload notifications.
    pub reload_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            reload_port: 1337,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub remote: Option<String>,
    pub branch: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            remote: None,
            branch: "main".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FontsConfig {
    /// Converter invoked as `<command> <file.ttf>`, must write `<file.woff2>`.
    pub command: String,
}

impl Default for FontsConfig {
    fn default() -> Self {
        Self {
            command: "woff2_compress".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StylesConfig {
    /// Treat a stylesheet compilation error as fatal.
    pub strict: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    cache: Option<Utf8PathBuf>,
    server: ServerConfig,
    deploy: DeployConfig,
    fonts: FontsConfig,
    styles: StylesConfig,
}

impl Config {
    /// Settings with every default, rooted at `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self::from_file(root.into(), ConfigFile::default())
    }

    /// Read `assetline.toml` from `root` when present, defaults otherwise.
    pub fn load(root: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref().to_path_buf();
        let path = root.join(CONFIG_FILE);

        let file = match fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text).map_err(|e| ConfigError::Parse(path, e))?,
            Err(e) if e.kind() == ErrorKind::NotFound => ConfigFile::default(),
            Err(e) => return Err(ConfigError::Read(path, e)),
        };

        Ok(Self::from_file(root, file))
    }

    fn from_file(root: Utf8PathBuf, file: ConfigFile) -> Self {
        let cache = file.cache.unwrap_or_else(|| ".cache".into());

        Self {
            cache: root.join(cache),
            root,
            server: file.server,
            deploy: file.deploy,
            fonts: file.fonts,
            styles: file.styles,
        }
    }

    /// Absolute destination folder.
    pub fn dist(&self) -> Utf8PathBuf {
        self.root.join(DEST_FOLDER)
    }
}
