use camino::Utf8PathBuf;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use thiserror::Error;

use crate::error::StepError;
use crate::task::Asset;

/// Errors that can occur when processing stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// A Sass compilation error occurred.
    #[error("Sass compilation error in {0}:\n{1}")]
    Sass(Utf8PathBuf, Box<grass::Error>),

    /// The compiled CSS couldn't be parsed or printed.
    #[error("CSS error in {0}:\n{1}")]
    Css(Utf8PathBuf, String),

    /// The file is not valid UTF-8.
    #[error("{0} is not valid UTF-8")]
    Encoding(Utf8PathBuf),
}

/// Oldest browser versions prefixes are generated for, encoded as
/// `major << 16 | minor << 8`.
const fn version(major: u32, minor: u32) -> Option<u32> {
    Some(major << 16 | minor << 8)
}

fn targets() -> Targets {
    Targets::from(Browsers {
        android: version(4, 4),
        chrome: version(49, 0),
        edge: version(16, 0),
        firefox: version(52, 0),
        ios_saf: version(10, 0),
        opera: version(36, 0),
        safari: version(10, 0),
        samsung: version(5, 0),
        ..Browsers::default()
    })
}

/// Compile every stylesheet. Partials (`_name.scss`) are only meant to be
/// imported and produce no output. A file that fails to compile is logged
/// and dropped unless `strict` is set, in which case it aborts the task.
pub fn compile_all(assets: Vec<Asset>, strict: bool) -> Result<Vec<Asset>, StepError> {
    let results: Vec<_> = assets
        .into_par_iter()
        .filter(|asset| !is_partial(asset))
        .map(compile)
        .collect();

    let mut compiled = Vec::with_capacity(results.len());

    for result in results {
        match result {
            Ok(asset) => compiled.push(asset),
            Err(e) if strict => return Err(e.into()),
            Err(e) => tracing::error!("{e}"),
        }
    }

    Ok(compiled)
}

fn is_partial(asset: &Asset) -> bool {
    asset
        .path
        .file_name()
        .is_some_and(|name| name.starts_with('_'))
}

/// Compile a single SCSS file, imports resolve relative to its folder.
pub fn compile(asset: Asset) -> Result<Asset, StyleError> {
    let text = String::from_utf8(asset.data)
        .map_err(|_| StyleError::Encoding(asset.source.clone()))?;

    let mut options = grass::Options::default();
    if let Some(dir) = asset.source.parent() {
        options = options.load_path(dir);
    }

    let css = grass::from_string(text, &options)
        .map_err(|e| StyleError::Sass(asset.source.clone(), e))?;

    Ok(Asset {
        source: asset.source,
        path: asset.path.with_extension("css"),
        data: css.into_bytes(),
    })
}

/// Add the vendor prefixes required by the supported browsers. The output
/// stays readable.
pub fn autoprefix(asset: Asset) -> Result<Asset, StyleError> {
    print(asset, false)
}

/// Optimize and print the stylesheet without whitespace.
pub fn minify(asset: Asset) -> Result<Asset, StyleError> {
    print(asset, true)
}

fn print(asset: Asset, minify: bool) -> Result<Asset, StyleError> {
    let code = {
        let text = std::str::from_utf8(&asset.data)
            .map_err(|_| StyleError::Encoding(asset.source.clone()))?;
        let css_error = |e: &dyn std::fmt::Display| StyleError::Css(asset.source.clone(), e.to_string());

        let targets = targets();
        let mut sheet = StyleSheet::parse(text, ParserOptions::default())
            .map_err(|e| css_error(&e))?;

        sheet
            .minify(MinifyOptions {
                targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| css_error(&e))?;

        sheet
            .to_css(PrinterOptions {
                minify,
                targets,
                ..PrinterOptions::default()
            })
            .map_err(|e| css_error(&e))?
            .code
    };

    Ok(Asset {
        data: code.into_bytes(),
        ..asset
    })
}
