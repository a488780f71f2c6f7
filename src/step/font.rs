use std::fs;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::config::Config;
use crate::hash::Hash32;
use crate::task::Asset;

const DIR_CACHE: &str = "fonts";

/// Errors that can occur when converting fonts.
#[derive(Debug, Error)]
pub enum FontError {
    /// An I/O error occurred during process execution.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The converter couldn't be started.
    #[error("Couldn't run `{0}`, is it installed?\n{1}")]
    Spawn(String, std::io::Error),

    /// The converter returned a non-zero exit code.
    #[error("`{0}` failed on {1}:\n{2}")]
    Convert(String, Utf8PathBuf, String),

    /// The converter exited cleanly but left no output behind.
    #[error("`{0}` produced no output for {1}")]
    NoOutput(String, Utf8PathBuf),
}

/// Convert a TrueType font to WOFF2.
///
/// Converted fonts are kept in the cache directory under their content
/// hash, so the same font is only ever converted once. Each conversion
/// works in its own scratch folder and the result is moved into the cache
/// with a rename, so concurrent runs never see a partial file.
///
/// **Note:** This requires the configured converter (by default
/// `woff2_compress`) to be available in the system PATH.
pub fn woff2(asset: Asset, config: &Config) -> Result<Asset, FontError> {
    let dir = config.cache.join(DIR_CACHE);
    fs::create_dir_all(&dir)?;

    let hash = Hash32::hash(&asset.data).to_hex();
    let output = dir.join(&hash).with_extension("woff2");

    if output.exists() {
        tracing::debug!("reusing converted font for {}", asset.source);
    } else {
        let temp = tempfile::Builder::new()
            .prefix("convert-")
            .tempdir_in(&dir)?;
        let scratch = Utf8PathBuf::try_from(temp.path().to_path_buf())
            .map_err(|e| e.into_io_error())?;

        let input = scratch.join(&hash).with_extension("ttf");
        let converted = scratch.join(&hash).with_extension("woff2");

        fs::write(&input, &asset.data)?;
        convert(&config.fonts.command, &input, &asset.source)?;

        if !converted.exists() {
            return Err(FontError::NoOutput(
                config.fonts.command.clone(),
                asset.source,
            ));
        }

        fs::rename(&converted, &output)?;
    }

    Ok(Asset {
        data: fs::read(&output)?,
        path: asset.path.with_extension("woff2"),
        source: asset.source,
    })
}

fn convert(command: &str, input: &Utf8Path, source: &Utf8Path) -> Result<(), FontError> {
    let output = Command::new(command)
        .arg(input.as_str())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| FontError::Spawn(command.to_string(), e))?;

    if !output.status.success() {
        let message = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(FontError::Convert(
            command.to_string(),
            source.to_path_buf(),
            message,
        ));
    }

    Ok(())
}
