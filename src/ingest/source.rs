use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use image::DynamicImage;

use crate::db::Source;
use crate::error::DecodeError;
use crate::events::{EventSink, PipelineEvent};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// A decoded input, already removed from its drop directory.
pub struct IngestedImage {
    pub source: Source,
    pub path: PathBuf,
    pub image: DynamicImage,
}

impl std::fmt::Debug for IngestedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestedImage")
            .field("source", &self.source)
            .field("path", &self.path)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

#[derive(Debug, Clone)]
struct Location {
    source: Source,
    dir: PathBuf,
}

/// Two drop directories, one per vantage point.
///
/// Each scan looks at the single first eligible file of a directory, in file name
/// order. A file that decodes is deleted before it is handed out. A file that does
/// not decode is left where it is and tried again on the next scan, which also keeps
/// every file sorted after it waiting.
pub struct ImageSource {
    locations: [Location; 2],
    extensions: Vec<String>,
    rejected: HashSet<PathBuf>,
    events: Arc<dyn EventSink>,
}

impl ImageSource {
    pub fn new(
        dir_x: PathBuf,
        dir_y: PathBuf,
        extensions: &[String],
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        if dir_x == dir_y {
            bail!("input directories must differ, both are {}", dir_x.display());
        }
        for dir in [&dir_x, &dir_y] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create input directory {}", dir.display()))?;
        }

        Ok(Self {
            locations: [
                Location {
                    source: Source::X,
                    dir: dir_x,
                },
                Location {
                    source: Source::Y,
                    dir: dir_y,
                },
            ],
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
            rejected: HashSet::new(),
            events,
        })
    }

    pub fn dir(&self, source: Source) -> &Path {
        match source {
            Source::X => &self.locations[0].dir,
            Source::Y => &self.locations[1].dir,
        }
    }

    /// One scan of both directories, x first. At most one item per directory.
    pub fn poll_cycle(&mut self) -> Vec<IngestedImage> {
        let mut items = Vec::with_capacity(2);
        for index in 0..self.locations.len() {
            let location = self.locations[index].clone();
            if let Some(item) = self.take_next(&location) {
                items.push(item);
            }
        }
        items
    }

    fn take_next(&mut self, location: &Location) -> Option<IngestedImage> {
        let path = match first_candidate(&location.dir, &self.extensions) {
            Ok(Some(path)) => path,
            Ok(None) => return None,
            Err(err) => {
                log_warn!("failed to scan {}: {err:?}", location.dir.display());
                return None;
            }
        };

        let image = match decode(&path) {
            Ok(image) => image,
            Err(err) => {
                self.reject(err);
                return None;
            }
        };

        if let Err(err) = fs::remove_file(&path) {
            // Handing the image out without deleting it would process it twice.
            log::error!("failed to remove consumed input {}: {err}", path.display());
            return None;
        }
        self.rejected.remove(&path);

        log_debug!("ingested {} from {}", path.display(), location.source);
        Some(IngestedImage {
            source: location.source,
            path,
            image,
        })
    }

    fn reject(&mut self, err: DecodeError) {
        if self.rejected.insert(err.path.clone()) {
            log_warn!("{err}; leaving it in place");
            self.events.emit(&PipelineEvent::InputRejected {
                path: err.path,
                reason: err.reason,
            });
        }
    }
}

pub(crate) fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// First regular file with a known extension, by file name. A missing directory has
/// no candidates.
fn first_candidate(dir: &Path, extensions: &[String]) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", dir.display())),
    };

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && has_image_extension(&path, extensions) {
            candidates.push(path);
        }
    }
    candidates.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(candidates.into_iter().next())
}

pub(crate) fn decode(path: &Path) -> Result<DynamicImage, DecodeError> {
    image::open(path).map_err(|err| DecodeError {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{testing::RecordingSink, NullEventSink};
    use crate::settings::default_extensions;
    use tempfile::{tempdir, TempDir};

    fn write_png(path: &Path) {
        DynamicImage::new_rgb8(3, 2).save(path).unwrap();
    }

    fn source_in(root: &TempDir, events: Arc<dyn EventSink>) -> ImageSource {
        ImageSource::new(
            root.path().join("x"),
            root.path().join("y"),
            &default_extensions(),
            events,
        )
        .unwrap()
    }

    #[test]
    fn cycle_yields_one_item_per_directory_in_name_order() {
        let root = tempdir().unwrap();
        let mut source = source_in(&root, Arc::new(NullEventSink));
        write_png(&source.dir(Source::X).join("b.png"));
        write_png(&source.dir(Source::X).join("a.png"));
        write_png(&source.dir(Source::Y).join("c.PNG"));
        fs::write(source.dir(Source::Y).join("notes.txt"), "ignored").unwrap();

        let first = source.poll_cycle();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].source, Source::X);
        assert_eq!(first[0].path.file_name().unwrap(), "a.png");
        assert_eq!(first[1].source, Source::Y);
        assert_eq!(first[0].image.width(), 3);
        assert!(!first[0].path.exists());

        let second = source.poll_cycle();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].path.file_name().unwrap(), "b.png");

        assert!(source.poll_cycle().is_empty());
        assert!(source.dir(Source::Y).join("notes.txt").exists());
    }

    #[test]
    fn undecodable_file_stays_and_blocks_later_files() {
        let root = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mut source = source_in(&root, sink.clone());
        let broken = source.dir(Source::X).join("0001.jpg");
        let good = source.dir(Source::X).join("0002.png");
        fs::write(&broken, b"not really a jpeg").unwrap();
        write_png(&good);

        for _ in 0..5 {
            assert!(source.poll_cycle().is_empty());
        }
        assert!(broken.exists());
        assert!(good.exists());
        // Reported once, not once per cycle.
        assert_eq!(sink.events().len(), 1);

        fs::remove_file(&broken).unwrap();
        let items = source.poll_cycle();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].path, good);
    }

    #[test]
    fn missing_directory_is_empty() {
        let root = tempdir().unwrap();
        let mut source = source_in(&root, Arc::new(NullEventSink));
        fs::remove_dir(source.dir(Source::Y)).unwrap();
        assert!(source.poll_cycle().is_empty());
    }

    #[test]
    fn same_directory_twice_is_rejected() {
        let root = tempdir().unwrap();
        let dir = root.path().join("shared");
        let result = ImageSource::new(dir.clone(), dir, &default_extensions(), Arc::new(NullEventSink));
        assert!(result.is_err());
    }
}
