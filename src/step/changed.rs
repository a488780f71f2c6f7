//! Change detection for tasks that copy files into the destination.
//!
//! Each task keeps a manifest of source content hashes for the files it has
//! written. An asset is skipped when its destination file exists and the
//! recorded hash matches the current source, otherwise it flows on and the
//! new hash is recorded once the task has written it.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::error::{ManifestError, StepError};
use crate::hash::Hash32;
use crate::task::{Asset, Run};

const DIR_CACHE: &str = "changed";

pub(crate) struct Manifest {
    path: Utf8PathBuf,
    entries: BTreeMap<String, Hash32>,
    pending: Vec<(String, Hash32)>,
}

impl Manifest {
    pub fn load(cache: &Utf8Path, key: &str) -> Result<Self, ManifestError> {
        let path = cache.join(DIR_CACHE).join(key).with_extension("cbor");

        let entries = match File::open(&path) {
            Ok(file) => ciborium::from_reader(BufReader::new(file)).unwrap_or_else(|e| {
                // a corrupt manifest only costs a full copy
                tracing::warn!("ignoring unreadable manifest {}: {}", path, e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries,
            pending: Vec::new(),
        })
    }

    fn is_fresh(&self, key: &str, hash: Hash32) -> bool {
        self.entries.get(key) == Some(&hash)
    }

    /// Record the hashes of everything written in this run. Every commit
    /// writes its own temporary file and renames it over the manifest, so
    /// overlapping runs of one task never observe a torn manifest.
    pub fn commit(mut self) -> Result<(), ManifestError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        self.entries.extend(self.pending.drain(..));

        let dir = self.path.parent().unwrap_or(Utf8Path::new("."));
        fs::create_dir_all(dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        let mut writer = BufWriter::new(temp.as_file_mut());
        ciborium::into_writer(&self.entries, &mut writer)
            .map_err(|e| ManifestError::Encode(self.path.clone(), e.to_string()))?;
        writer.flush()?;
        drop(writer);
        temp.persist(&self.path).map_err(|e| e.error)?;

        Ok(())
    }
}

/// Keep only assets whose destination is missing or whose source changed
/// since the last successful write.
pub(crate) fn filter(run: &mut Run, assets: Vec<Asset>) -> Result<Vec<Asset>, StepError> {
    if run.manifest.is_none() {
        let key = run.task.manifest_key();
        run.manifest = Some(Manifest::load(&run.config.cache, &key)?);
    }

    let dest = run.dest();
    let Some(manifest) = run.manifest.as_mut() else {
        return Ok(assets);
    };

    let checked: Vec<_> = assets
        .into_par_iter()
        .map(|asset| {
            let key = asset.path.to_string();
            let hash = Hash32::hash(&asset.data);
            let fresh = dest.join(&asset.path).is_file() && manifest.is_fresh(&key, hash);
            (asset, key, hash, fresh)
        })
        .collect();

    let total = checked.len();
    let mut kept = Vec::new();

    for (asset, key, hash, fresh) in checked {
        if !fresh {
            manifest.pending.push((key, hash));
            kept.push(asset);
        }
    }

    tracing::debug!(
        task = run.task.name,
        "{} of {} files changed",
        kept.len(),
        total
    );

    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::task::{Profile, Task};

    struct Setup {
        _dir: tempfile::TempDir,
        config: Config,
        task: Task,
    }

    fn setup() -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        Setup {
            _dir: dir,
            config: Config::new(root),
            task: Task::libs(Profile::Dev),
        }
    }

    fn asset(s: &Setup, path: &str, data: &str) -> Asset {
        Asset {
            source: s.config.root.join("src/libs").join(path),
            path: path.into(),
            data: data.as_bytes().to_vec(),
        }
    }

    /// Filter, pretend the survivors were written, commit.
    fn pass(s: &Setup, assets: Vec<Asset>) -> Vec<Utf8PathBuf> {
        let mut run = Run {
            task: &s.task,
            config: &s.config,
            manifest: None,
        };

        let kept = filter(&mut run, assets).unwrap();
        let dest = s.task.dest(&s.config);
        crate::io::write_assets(&dest, &kept).unwrap();
        run.manifest.unwrap().commit().unwrap();

        kept.into_iter().map(|a| a.path).collect()
    }

    #[test]
    fn test_first_run_writes_everything() {
        let s = setup();

        let kept = pass(&s, vec![asset(&s, "a.js", "a"), asset(&s, "b/c.css", "c")]);

        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_unchanged_files_are_skipped() {
        let s = setup();
        pass(&s, vec![asset(&s, "a.js", "a"), asset(&s, "b.js", "b")]);

        let kept = pass(&s, vec![asset(&s, "a.js", "a"), asset(&s, "b.js", "b2")]);

        assert_eq!(kept, vec![Utf8PathBuf::from("b.js")]);
    }

    #[test]
    fn test_missing_destination_is_rewritten() {
        let s = setup();
        pass(&s, vec![asset(&s, "a.js", "a")]);
        fs::remove_file(s.task.dest(&s.config).join("a.js")).unwrap();

        let kept = pass(&s, vec![asset(&s, "a.js", "a")]);

        assert_eq!(kept, vec![Utf8PathBuf::from("a.js")]);
    }

    #[test]
    fn test_concurrent_commits_all_succeed() {
        let s = setup();

        std::thread::scope(|scope| {
            for t in 0u8..8 {
                let s = &s;
                scope.spawn(move || {
                    for i in 0u8..50 {
                        let mut manifest = Manifest::load(&s.config.cache, "libs").unwrap();
                        manifest
                            .pending
                            .push((format!("{t}/{i}.js"), Hash32::hash(&[t, i])));
                        manifest.commit().unwrap();
                    }
                });
            }
        });

        let manifest = Manifest::load(&s.config.cache, "libs").unwrap();
        assert!(!manifest.entries.is_empty());
        let left: Vec<_> = s
            .config
            .cache
            .join(DIR_CACHE)
            .read_dir_utf8()
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string())
            .collect();
        assert_eq!(left, vec!["libs.cbor"]);
    }

    #[test]
    fn test_uncommitted_run_is_forgotten() {
        let s = setup();
        let mut run = Run {
            task: &s.task,
            config: &s.config,
            manifest: None,
        };
        let kept = filter(&mut run, vec![asset(&s, "a.js", "a")]).unwrap();
        crate::io::write_assets(&s.task.dest(&s.config), &kept).unwrap();
        drop(run);

        let kept = pass(&s, vec![asset(&s, "a.js", "a")]);

        assert_eq!(kept.len(), 1);
    }
}
