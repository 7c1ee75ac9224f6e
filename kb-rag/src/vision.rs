//! Vision provider trait for image-aware retrieval.

use async_trait::async_trait;

use crate::error::Result;

/// A computer-vision backend that embeds text and images into one shared
/// vector space and describes images in words.
///
/// The shared space is what lets a question containing an image link be
/// matched against the `cv_image_vector` and `cv_text_vector` fields.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Embed text into the vision vector space.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed the image at `url` into the vision vector space.
    async fn embed_image(&self, url: &str) -> Result<Vec<f32>>;

    /// Describe the image at `url` (caption plus any text read from it).
    async fn describe_image(&self, url: &str) -> Result<String>;
}
