use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use super::source::has_image_extension;

/// One file of a labelled batch data set.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub path: PathBuf,
    pub filename: String,
    pub classification: String,
}

/// Lists the images of `data_dir`, where each immediate subdirectory is a
/// classification. `classifications` restricts the labels when non-empty. Sorted by
/// classification then file name.
pub fn collect_classified_images(
    data_dir: &Path,
    classifications: &[String],
    extensions: &[String],
) -> Result<Vec<CatalogItem>> {
    let entries = fs::read_dir(data_dir)
        .with_context(|| format!("failed to read data directory {}", data_dir.display()))?;

    let mut items = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let classification = entry.file_name().to_string_lossy().into_owned();
        if !classifications.is_empty() && !classifications.contains(&classification) {
            continue;
        }

        for file in fs::read_dir(entry.path())
            .with_context(|| format!("failed to read {}", entry.path().display()))?
        {
            let file = file?;
            let path = file.path();
            if file.file_type()?.is_file() && has_image_extension(&path, extensions) {
                items.push(CatalogItem {
                    filename: file.file_name().to_string_lossy().into_owned(),
                    classification: classification.clone(),
                    path,
                });
            }
        }
    }

    items.sort_by(|a, b| {
        a.classification
            .cmp(&b.classification)
            .then_with(|| a.filename.cmp(&b.filename))
    });
    Ok(items)
}

/// Optionally shuffles, then keeps at most `max_items`.
pub fn plan_batch<R: Rng + ?Sized>(
    mut items: Vec<CatalogItem>,
    randomize: bool,
    max_items: Option<usize>,
    rng: &mut R,
) -> Vec<CatalogItem> {
    if randomize {
        items.shuffle(rng);
    }
    if let Some(max) = max_items {
        items.truncate(max);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::default_extensions;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    fn seed_dataset(root: &Path) {
        for (label, files) in [
            ("crowd", vec!["b.jpg", "a.png", "readme.md"]),
            ("empty", vec!["z.jpeg"]),
            ("single", vec!["one.webp"]),
        ] {
            let dir = root.join(label);
            fs::create_dir_all(&dir).unwrap();
            for file in files {
                fs::write(dir.join(file), b"").unwrap();
            }
        }
        fs::write(root.join("stray.jpg"), b"").unwrap();
    }

    #[test]
    fn collects_sorted_images_per_classification() {
        let root = tempdir().unwrap();
        seed_dataset(root.path());

        let items = collect_classified_images(root.path(), &[], &default_extensions()).unwrap();
        let names: Vec<(&str, &str)> = items
            .iter()
            .map(|i| (i.classification.as_str(), i.filename.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("crowd", "a.png"),
                ("crowd", "b.jpg"),
                ("empty", "z.jpeg"),
                ("single", "one.webp"),
            ]
        );
    }

    #[test]
    fn filters_by_classification() {
        let root = tempdir().unwrap();
        seed_dataset(root.path());

        let items =
            collect_classified_images(root.path(), &["empty".into()], &default_extensions()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].classification, "empty");
    }

    #[test]
    fn missing_data_directory_is_an_error() {
        let root = tempdir().unwrap();
        assert!(collect_classified_images(&root.path().join("nope"), &[], &default_extensions()).is_err());
    }

    #[test]
    fn plan_caps_and_keeps_order_without_shuffle() {
        let root = tempdir().unwrap();
        seed_dataset(root.path());
        let items = collect_classified_images(root.path(), &[], &default_extensions()).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let planned = plan_batch(items.clone(), false, Some(2), &mut rng);
        assert_eq!(planned, items[..2].to_vec());
    }

    #[test]
    fn shuffled_plan_keeps_the_same_items() {
        let root = tempdir().unwrap();
        seed_dataset(root.path());
        let items = collect_classified_images(root.path(), &[], &default_extensions()).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let mut planned = plan_batch(items.clone(), true, None, &mut rng);
        planned.sort_by(|a, b| a.path.cmp(&b.path));
        let mut expected = items;
        expected.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(planned, expected);
    }
}
