use std::collections::BTreeSet;
use std::fmt::Display;
use std::fs;
use std::io::ErrorKind;
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;
use indicatif::ProgressStyle;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::error::{ClearError, TaskError};
use crate::task::Asset;

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) static PROGRESS_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("#>-")
});

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Delete the entire `dist` directory tree. A missing directory counts as
/// success. Returns once the directory is confirmed to be gone.
pub fn clear_dist(dist: &Utf8Path) -> Result<(), ClearError> {
    let s = Instant::now();

    match fs::remove_dir_all(dist) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(ClearError::Remove(dist.to_path_buf(), e)),
    }

    match fs::symlink_metadata(dist) {
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        _ => return Err(ClearError::Lingering(dist.to_path_buf())),
    }

    tracing::info!("cleaned {} {}", dist, as_overhead(s));

    Ok(())
}

/// Expand `{a,b}` alternations, which the glob engine doesn't understand,
/// into separate patterns. Nested groups are expanded left to right.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    let mut depth = 0;
    let mut close = None;
    let mut splits = Vec::new();

    for (i, c) in pattern[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + i);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(open + i),
            _ => {}
        }
    }

    // unbalanced, leave it to the glob engine
    let Some(close) = close else {
        return vec![pattern.to_string()];
    };

    let head = &pattern[..open];
    let tail = &pattern[close + 1..];

    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    bounds
        .windows(2)
        .map(|w| &pattern[w[0] + 1..w[1]])
        .flat_map(|alt| expand_braces(&format!("{head}{alt}{tail}")))
        .collect()
}

/// The static directory prefix of a glob, everything before the first
/// component containing a wildcard. Matched files keep their path relative
/// to this base when written to the destination.
pub fn glob_base(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);
    let components: Vec<_> = path.components().collect();

    let split = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[', '{']))
        .unwrap_or(components.len());

    // a concrete file is its own match, its base is the parent folder
    if split == components.len() {
        return path.parent().map(Utf8Path::to_path_buf).unwrap_or_default();
    }

    components.iter().take(split).collect()
}

/// Sorted list of regular files under `root` matching `pattern`. Matching
/// nothing is not an error.
pub fn collect(root: &Utf8Path, pattern: &str) -> Result<Vec<Utf8PathBuf>, TaskError> {
    let prefix = glob::Pattern::escape(root.as_str());
    let mut found = BTreeSet::new();

    for pattern in expand_braces(pattern) {
        for path in glob::glob(&format!("{prefix}/{pattern}"))? {
            let path = Utf8PathBuf::try_from(path?)?;
            if path.is_file() {
                found.insert(path);
            }
        }
    }

    Ok(found.into_iter().collect())
}

/// Write every asset below `dest`, creating folders as needed.
pub fn write_assets(dest: &Utf8Path, assets: &[Asset]) -> std::io::Result<()> {
    assets.par_iter().try_for_each(|asset| {
        let path = dest.join(&asset.path);

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        tracing::debug!("writing {}", path);
        fs::write(&path, &asset.data)
    })
}

/// Recursively copy the contents of `src` into `dst`.
pub fn copy_tree(src: &Utf8Path, dst: &Utf8Path) -> std::io::Result<usize> {
    fs::create_dir_all(dst)?;
    let mut count = 0;

    for entry in src.read_dir_utf8()? {
        let entry = entry?;
        let filetype = entry.file_type()?;
        if filetype.is_dir() {
            count += copy_tree(entry.path(), &dst.join(entry.file_name()))?;
        } else {
            fs::copy(entry.path(), dst.join(entry.file_name()))?;
            count += 1;
        }
    }

    Ok(count)
}
