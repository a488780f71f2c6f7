//! Transformation steps. Every step maps the current list of assets to a new
//! one; most of them work on each asset independently and run in parallel.

pub(crate) mod changed;
pub mod font;
pub mod image;
pub mod markup;
pub mod script;
pub mod style;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::error::StepError;
use crate::task::{Asset, Run};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Parse and re-emit scripts.
    Transpile,
    /// Compress and mangle scripts.
    MinifyScript,
    /// Append a suffix to the file stem, `a/b.js` becomes `a/b<suffix>.js`.
    AppendStem(&'static str),
    /// Compile SCSS to CSS, partials produce nothing.
    CompileSass,
    /// Add vendor prefixes for the supported browsers.
    Autoprefix,
    MinifyStyle,
    /// Join all assets into a single file with the given name.
    Concat(&'static str),
    /// Resolve include directives written as `<prefix>include(...)`.
    Include { prefix: &'static str },
    CollapseWhitespace,
    /// Convert TrueType fonts to WOFF2.
    Woff2,
    /// Drop assets that are already up to date in the destination.
    Changed,
    /// Recompress images.
    Optimize,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Transpile => "transpile",
            Step::MinifyScript => "minify-script",
            Step::AppendStem(_) => "rename",
            Step::CompileSass => "sass",
            Step::Autoprefix => "autoprefix",
            Step::MinifyStyle => "minify-style",
            Step::Concat(_) => "concat",
            Step::Include { .. } => "include",
            Step::CollapseWhitespace => "collapse-whitespace",
            Step::Woff2 => "woff2",
            Step::Changed => "changed",
            Step::Optimize => "optimize",
        }
    }

    pub(crate) fn apply(&self, run: &mut Run, assets: Vec<Asset>) -> Result<Vec<Asset>, StepError> {
        match self {
            Step::Transpile => each(assets, |asset| script::transpile(asset).map_err(Into::into)),
            Step::MinifyScript => each(assets, |asset| script::minify(asset).map_err(Into::into)),
            Step::AppendStem(suffix) => Ok(assets
                .into_iter()
                .map(|asset| Asset {
                    path: append_stem(&asset.path, suffix),
                    ..asset
                })
                .collect()),
            Step::CompileSass => style::compile_all(assets, run.config.styles.strict),
            Step::Autoprefix => each(assets, |asset| style::autoprefix(asset).map_err(Into::into)),
            Step::MinifyStyle => each(assets, |asset| style::minify(asset).map_err(Into::into)),
            Step::Concat(name) => Ok(concat(assets, name)),
            Step::Include { prefix } => each(assets, |asset| {
                markup::include(asset, prefix).map_err(Into::into)
            }),
            Step::CollapseWhitespace => Ok(assets
                .into_par_iter()
                .map(markup::collapse_whitespace)
                .collect()),
            Step::Woff2 => {
                let config = run.config;
                each(assets, |asset| font::woff2(asset, config).map_err(Into::into))
            }
            Step::Changed => changed::filter(run, assets),
            Step::Optimize => each(assets, |asset| image::optimize(asset).map_err(Into::into)),
        }
    }
}

/// Apply a fallible transformation to every asset in parallel, keeping order.
fn each<F>(assets: Vec<Asset>, f: F) -> Result<Vec<Asset>, StepError>
where
    F: Fn(Asset) -> Result<Asset, StepError> + Send + Sync,
{
    assets.into_par_iter().map(f).collect()
}

/// Only the stem changes, directory and extension are preserved.
pub fn append_stem(path: &Utf8Path, suffix: &str) -> Utf8PathBuf {
    let stem = path.file_stem().unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{suffix}.{ext}"),
        None => format!("{stem}{suffix}"),
    };

    path.with_file_name(name)
}

/// Join every asset, ordered by path, with a newline in between.
fn concat(mut assets: Vec<Asset>, name: &str) -> Vec<Asset> {
    if assets.is_empty() {
        return assets;
    }

    assets.sort_by(|a, b| a.path.cmp(&b.path));

    let source = assets[0].source.clone();
    let mut data = Vec::new();

    for (i, asset) in assets.into_iter().enumerate() {
        if i > 0 {
            data.push(b'\n');
        }
        data.extend(asset.data);
    }

    vec![Asset {
        source,
        path: name.into(),
        data,
    }]
}
