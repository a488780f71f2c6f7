#![forbid(unsafe_code)]
//! A static asset pipeline. Source files under `src/` are grouped into
//! tasks by category (scripts, stylesheets, markup, fonts, images and
//! vendored libraries), every task applies an ordered list of
//! transformation steps to its files, and the results land under `dist/`.
//!
//! Two profiles exist. [`Profile::Prod`] minifies and optimizes,
//! [`Profile::Dev`] keeps the output readable and pairs with a
//! live-reloading preview server.
//!
//! ```no_run
//! use assetline::{Config, pipeline};
//!
//! let config = Config::load(".")?;
//! pipeline::build(&config)?;
//! # Ok::<(), assetline::PipelineError>(())
//! ```

mod config;
pub mod deploy;
mod error;
mod hash;
mod io;
#[cfg(feature = "logging")]
mod logging;
pub mod pipeline;
#[cfg(feature = "live")]
mod server;
pub mod step;
mod task;
#[cfg(feature = "live")]
mod watch;

pub use crate::config::{
    CONFIG_FILE, Config, DEST_FOLDER, DeployConfig, FontsConfig, ServerConfig, StylesConfig,
};
pub use crate::error::*;
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::step::Step;
pub use crate::task::{Asset, Profile, Task};
#[cfg(feature = "live")]
pub use crate::watch::DevServer;
