//! The six asset tasks and the machinery to run one of them.
//!
//! A task is plain data: a source glob, a destination folder and an ordered
//! list of [`Step`]s. Running it reads every matching file into an
//! [`Asset`], folds the asset list through the steps and writes whatever is
//! left into the destination.

use std::fmt::Debug;
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::config::Config;
use crate::error::TaskError;
use crate::io;
use crate::step::Step;
use crate::step::changed::Manifest;

/// Which flavor of a task to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Fast output for the live preview.
    Dev,
    /// Optimized output for publishing.
    Prod,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Dev => "dev",
            Profile::Prod => "prod",
        }
    }
}

/// A single file flowing through the steps of a task.
#[derive(Clone)]
pub struct Asset {
    /// Absolute path of the file this asset was read from.
    pub source: Utf8PathBuf,
    /// Output path, relative to the destination folder of the task.
    pub path: Utf8PathBuf,
    pub data: Vec<u8>,
}

impl Debug for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Asset({} -> {}, {}B)", self.source, self.path, self.data.len())
    }
}

pub const JAVASCRIPT_SOURCE: &str = "src/js/**/*.js";
pub const JAVASCRIPT_FOLDER: &str = "dist/js";
pub const HTML_SOURCE: &str = "src/*.html";
pub const HTML_PARTIALS: &str = "src/**/*.html";
pub const HTML_FOLDER: &str = "dist";
pub const SCSS_SOURCE: &str = "src/scss/**/*.scss";
pub const SCSS_CONCAT_FILENAME: &str = "main.min.css";
pub const SCSS_FOLDER: &str = "dist/styles";
pub const FONTS_SOURCE: &str = "src/fonts/**/*.ttf";
pub const FONTS_FOLDER: &str = "dist/fonts";
pub const IMAGES_SOURCE: &str = "src/images/**/*.{png,jpg,jpeg,gif,svg,ico}";
pub const IMAGES_FOLDER: &str = "dist/images";
pub const LIBS_SOURCE: &str = "src/libs/**/*";
pub const LIBS_FOLDER: &str = "dist/libs";

/// Named unit mapping a source glob to a destination folder.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: &'static str,
    pub profile: Profile,
    /// Glob relative to the project root.
    pub source: &'static str,
    /// Folder relative to the project root.
    pub dest: &'static str,
    /// Extra globs that should re-run this task in watch mode.
    pub watch: &'static [&'static str],
    pub steps: Vec<Step>,
}

impl Task {
    pub fn script(profile: Profile) -> Self {
        let steps = match profile {
            Profile::Dev => vec![Step::AppendStem(".min")],
            Profile::Prod => vec![Step::Transpile, Step::MinifyScript, Step::AppendStem(".min")],
        };

        Self {
            name: "script",
            profile,
            source: JAVASCRIPT_SOURCE,
            dest: JAVASCRIPT_FOLDER,
            watch: &[JAVASCRIPT_SOURCE],
            steps,
        }
    }

    pub fn style(profile: Profile) -> Self {
        let steps = match profile {
            Profile::Dev => vec![Step::CompileSass, Step::Concat(SCSS_CONCAT_FILENAME)],
            Profile::Prod => vec![
                Step::CompileSass,
                Step::Autoprefix,
                Step::MinifyStyle,
                Step::Concat(SCSS_CONCAT_FILENAME),
            ],
        };

        Self {
            name: "style",
            profile,
            source: SCSS_SOURCE,
            dest: SCSS_FOLDER,
            watch: &[SCSS_SOURCE],
            steps,
        }
    }

    pub fn markup(profile: Profile) -> Self {
        let steps = match profile {
            Profile::Dev => vec![Step::Include { prefix: "@" }],
            Profile::Prod => vec![Step::Include { prefix: "@" }, Step::CollapseWhitespace],
        };

        Self {
            name: "markup",
            profile,
            source: HTML_SOURCE,
            dest: HTML_FOLDER,
            watch: &[HTML_PARTIALS, HTML_SOURCE],
            steps,
        }
    }

    /// Same output in both profiles.
    pub fn fonts(profile: Profile) -> Self {
        Self {
            name: "fonts",
            profile,
            source: FONTS_SOURCE,
            dest: FONTS_FOLDER,
            watch: &[FONTS_SOURCE],
            steps: vec![Step::Woff2],
        }
    }

    pub fn images(profile: Profile) -> Self {
        let steps = match profile {
            Profile::Dev => vec![Step::Changed],
            Profile::Prod => vec![Step::Changed, Step::Optimize],
        };

        Self {
            name: "images",
            profile,
            source: IMAGES_SOURCE,
            dest: IMAGES_FOLDER,
            watch: &[IMAGES_SOURCE],
            steps,
        }
    }

    /// Same output in both profiles.
    pub fn libs(profile: Profile) -> Self {
        Self {
            name: "libs",
            profile,
            source: LIBS_SOURCE,
            dest: LIBS_FOLDER,
            watch: &[LIBS_SOURCE],
            steps: vec![Step::Changed],
        }
    }

    /// Every task of a profile, in the order they are started.
    pub fn group(profile: Profile) -> Vec<Task> {
        vec![
            Task::style(profile),
            Task::markup(profile),
            Task::fonts(profile),
            Task::images(profile),
            Task::script(profile),
            Task::libs(profile),
        ]
    }

    /// Key under which the change-detection manifest of this task is kept.
    /// Tasks whose output differs by profile keep separate manifests.
    pub(crate) fn manifest_key(&self) -> String {
        let transforms = self
            .steps
            .iter()
            .any(|step| !matches!(step, Step::Changed));

        match transforms {
            true => format!("{}-{}", self.name, self.profile.as_str()),
            false => self.name.to_string(),
        }
    }

    /// Run the task once against the current state of its sources. Returns
    /// the number of files written.
    pub fn run(&self, config: &Config) -> Result<usize, TaskError> {
        let s = Instant::now();
        let base = config.root.join(io::glob_base(self.source));

        let assets = io::collect(&config.root, self.source)?
            .into_par_iter()
            .map(|source| read_asset(&base, source))
            .collect::<Result<Vec<_>, TaskError>>()?;

        tracing::debug!(task = self.name, "matched {} files", assets.len());

        let mut run = Run::new(self, config);
        let mut assets = assets;

        for step in &self.steps {
            assets = step
                .apply(&mut run, assets)
                .map_err(|e| TaskError::Step(step.name(), e))?;
        }

        let dest = self.dest(config);
        io::write_assets(&dest, &assets)?;

        run.commit()
            .map_err(|e| TaskError::Step(Step::Changed.name(), e.into()))?;

        tracing::info!(
            task = self.name,
            profile = self.profile.as_str(),
            "wrote {} files {}",
            assets.len(),
            io::as_overhead(s)
        );

        Ok(assets.len())
    }

    /// Absolute destination folder.
    pub fn dest(&self, config: &Config) -> Utf8PathBuf {
        config.root.join(self.dest)
    }
}

fn read_asset(base: &Utf8Path, source: Utf8PathBuf) -> Result<Asset, TaskError> {
    let data = fs::read(&source)?;
    let path = source
        .strip_prefix(base)
        .map(Utf8Path::to_path_buf)
        .unwrap_or_else(|_| source.file_name().unwrap_or_default().into());

    Ok(Asset { source, path, data })
}

/// State carried across the steps of one task invocation.
pub(crate) struct Run<'a> {
    pub task: &'a Task,
    pub config: &'a Config,
    /// Loaded lazily by the first step that needs change detection.
    pub manifest: Option<Manifest>,
}

impl<'a> Run<'a> {
    fn new(task: &'a Task, config: &'a Config) -> Self {
        Self {
            task,
            config,
            manifest: None,
        }
    }

    pub fn dest(&self) -> Utf8PathBuf {
        self.task.dest(self.config)
    }

    /// Persist change-detection entries, only called after a successful write.
    fn commit(self) -> Result<(), crate::error::ManifestError> {
        match self.manifest {
            Some(manifest) => manifest.commit(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_order() {
        let names: Vec<_> = Task::group(Profile::Prod)
            .into_iter()
            .map(|task| task.name)
            .collect();

        assert_eq!(
            names,
            vec!["style", "markup", "fonts", "images", "script", "libs"]
        );
    }

    #[test]
    fn test_destinations_are_disjoint() {
        let dests: Vec<_> = Task::group(Profile::Dev)
            .into_iter()
            .filter(|task| task.name != "markup")
            .map(|task| task.dest)
            .collect();

        for (i, a) in dests.iter().enumerate() {
            for b in &dests[i + 1..] {
                assert!(!a.starts_with(b) && !b.starts_with(a), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn test_prod_script_minifies_before_rename() {
        let task = Task::script(Profile::Prod);

        assert!(matches!(
            task.steps.as_slice(),
            [Step::Transpile, Step::MinifyScript, Step::AppendStem(".min")]
        ));
    }

    #[test]
    fn test_prod_style_concatenates_last() {
        let task = Task::style(Profile::Prod);

        assert!(matches!(task.steps.last(), Some(Step::Concat("main.min.css"))));
    }

    #[test]
    fn test_manifest_keys() {
        assert_eq!(Task::libs(Profile::Dev).manifest_key(), "libs");
        assert_eq!(Task::libs(Profile::Prod).manifest_key(), "libs");
        assert_eq!(Task::images(Profile::Dev).manifest_key(), "images");
        assert_eq!(Task::images(Profile::Prod).manifest_key(), "images-prod");
    }
}
