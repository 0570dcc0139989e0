//! Record and blob storage the survey talks to.
//!
//! The hosted store is an external collaborator; everything the survey needs
//! from it goes through [`RecordStore`] and [`BlobStore`].

mod memory;
mod rest;

pub use memory::MemoryBackend;
pub use rest::RestBackend;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageDescriptor {
    pub id: String,
    pub file_path: String,
    pub file_name: String,
    #[serde(default)]
    pub response_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewImage {
    pub file_path: String,
    pub file_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnnotationRecord {
    pub id: String,
    pub image_id: String,
    pub annotated_image_url: String,
    pub session_id: String,
    pub form_token: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewAnnotation {
    pub image_id: String,
    pub annotated_image_url: String,
    pub session_id: String,
    pub form_token: String,
    pub user_agent: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageOrder {
    /// Ascending `response_count`; what participants are served.
    LeastAnswered,
    /// Descending `created_at`; what the admin panel lists.
    Newest,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: String,
    pub cache_control: Option<String>,
    pub upsert: bool,
}

impl UploadOptions {
    pub fn png(cache_seconds: u32) -> Self {
        Self {
            content_type: "image/png".to_string(),
            cache_control: Some(cache_seconds.to_string()),
            upsert: true,
        }
    }

    pub fn new_file(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            cache_control: None,
            upsert: false,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Transport(String),
    #[error("store rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("conflicting record: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

pub trait RecordStore: Send + Sync {
    fn list_images(
        &self,
        order: ImageOrder,
        limit: Option<usize>,
    ) -> Result<Vec<ImageDescriptor>, StoreError>;

    fn insert_image(&self, image: NewImage) -> Result<ImageDescriptor, StoreError>;

    fn delete_image(&self, id: &str) -> Result<(), StoreError>;

    /// Existing annotation submitted with `form_token` for `image_id`, if any.
    fn find_annotation(
        &self,
        form_token: &str,
        image_id: &str,
    ) -> Result<Option<AnnotationRecord>, StoreError>;

    fn insert_annotation(&self, annotation: NewAnnotation)
        -> Result<AnnotationRecord, StoreError>;
}

pub trait BlobStore: Send + Sync {
    fn upload(&self, path: &str, bytes: &[u8], options: &UploadOptions) -> Result<(), StoreError>;

    fn public_url(&self, path: &str) -> Result<String, StoreError>;

    /// Downloads the object behind a public URL.
    fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError>;

    fn remove(&self, paths: &[String]) -> Result<(), StoreError>;
}

/// Both halves of the hosted backend behind one object.
pub trait SurveyBackend: RecordStore + BlobStore {}

impl<T: RecordStore + BlobStore> SurveyBackend for T {}
