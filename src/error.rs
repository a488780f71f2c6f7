#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

pub use crate::step::font::FontError;
pub use crate::step::image::ImageError;
pub use crate::step::markup::IncludeError;
pub use crate::step::script::ScriptError;
pub use crate::step::style::StyleError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Error while loading the configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Error while clearing the dist directory:\n{0}")]
    Clear(#[from] ClearError),

    #[error("Task '{0}':\n{1}")]
    Task(String, TaskError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Error while deploying:\n{0}")]
    Deploy(#[from] DeployError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read {0}.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse {0}.\n{1}")]
    Parse(Utf8PathBuf, toml::de::Error),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum ClearError {
    #[error("Couldn't remove {0}.\n{1}")]
    Remove(Utf8PathBuf, std::io::Error),

    #[error("{0} still exists after removal")]
    Lingering(Utf8PathBuf),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Couldn't load data from file.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Step '{0}' failed.\n{1}")]
    Step(&'static str, StepError),
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Style(#[from] StyleError),

    #[error(transparent)]
    Include(#[from] IncludeError),

    #[error(transparent)]
    Font(#[from] FontError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't decode manifest {0}.\n{1}")]
    Decode(Utf8PathBuf, String),

    #[error("Couldn't encode manifest {0}.\n{1}")]
    Encode(Utf8PathBuf, String),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Couldn't bind a socket.\n{0}")]
    Bind(std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Recv(#[from] RecvError),

    #[error("HTTP server stopped.\n{0}")]
    Server(String),
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Nothing to deploy, {0} does not exist")]
    MissingDirectory(Utf8PathBuf),

    #[error("No remote configured, set `deploy.remote` in assetline.toml")]
    MissingRemote,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("`git {0}` failed:\n{1}")]
    Git(String, String),
}
