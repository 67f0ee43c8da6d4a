//! Stage extractors
//!
//! An extractor performs one attempt for one task: it takes the stage's target
//! locator and exactly one [`Identity`], and returns either the stage payload or
//! a classified [`ExtractError`]. Nothing is shared between attempts; every call
//! builds its own HTTP client so no cookies or pooled connections carry over.
//!
//! - [`PageExtractor`]: Stage A, reads the address and image URL from a place page
//! - [`ImageExtractor`]: Stage B, downloads the image and stores it on disk

use async_trait::async_trait;

use crate::error::ExtractError;
use crate::identity::Identity;
use crate::types::Stage;

mod http;
mod image;
mod page;

pub use http::HttpSettings;
pub use image::{ImageExtractor, infer_extension};
pub use page::{PageExtractor, PlaceFields};

/// Payload of a successful attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageOutput {
    /// Stage A result
    Page {
        /// Place title, stored as the task's address
        address: String,
        /// Absolute URL of the place image
        image_url: String,
    },
    /// Stage B result
    Image {
        /// Name of the written file inside the output directory
        image_filename: String,
    },
}

/// One extraction attempt for a pipeline stage
///
/// Implementations must bound their network work by a timeout and must report
/// every failure as an [`ExtractError`] rather than panicking.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Stage this extractor serves
    fn stage(&self) -> Stage;

    /// Run one attempt against `target` through `identity`
    async fn extract(&self, target: &str, identity: &Identity)
    -> Result<StageOutput, ExtractError>;
}
