//! Getting images into the pipeline: the two live drop directories and the labelled
//! batch data set.

mod catalog;
mod controller;
mod source;
mod watcher;

pub use catalog::{collect_classified_images, plan_batch, CatalogItem};
pub use controller::IngestController;
pub use source::{ImageSource, IngestedImage};
pub use watcher::ImageWatcher;

pub(crate) use source::decode;
