use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::Utc;
use uuid::Uuid;

use super::{
    AnnotationRecord, BlobStore, ImageDescriptor, ImageOrder, NewAnnotation, NewImage,
    RecordStore, StoreError, UploadOptions,
};

const MEMORY_ORIGIN: &str = "memory://survey";

#[derive(Clone, Debug)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub cache_control: Option<String>,
}

#[derive(Default)]
struct Tables {
    images: Vec<ImageDescriptor>,
    annotations: Vec<AnnotationRecord>,
    blobs: BTreeMap<String, StoredBlob>,
}

/// In-process store with the same contract as the hosted one.
///
/// Unlike a bare table, it enforces one annotation per `(form_token, image_id)`
/// on insert and bumps the image's `response_count`, the way the hosted schema's
/// unique index and trigger would.
pub struct MemoryBackend {
    bucket: String,
    tables: Mutex<Tables>,
    offline: AtomicBool,
}

impl MemoryBackend {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            tables: Mutex::new(Tables::default()),
            offline: AtomicBool::new(false),
        }
    }

    /// Loads every image file in `dir` as if an admin had uploaded it.
    pub fn seeded_from_dir(bucket: impl Into<String>, dir: &Path) -> Result<Self> {
        let backend = Self::new(bucket);
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("cannot read seed directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            if mime.type_() != mime_guess::mime::IMAGE {
                continue;
            }
            let bytes = std::fs::read(&path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            backend.upload(name, &bytes, &UploadOptions::new_file(mime.essence_str()))?;
            backend.insert_image(NewImage {
                file_path: name.to_string(),
                file_name: name.to_string(),
            })?;
        }
        tracing::info!(dir = %dir.display(), "seeded in-memory store");
        Ok(backend)
    }

    /// Makes every call fail with a transport error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn blob(&self, path: &str) -> Option<StoredBlob> {
        self.lock().ok()?.blobs.get(path).cloned()
    }

    pub fn annotations(&self) -> Vec<AnnotationRecord> {
        self.lock()
            .map(|tables| tables.annotations.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(StoreError::Transport("store is offline".to_string()));
        }
        self.tables
            .lock()
            .map_err(|_| StoreError::Transport("store state is poisoned".to_string()))
    }

    fn path_from_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(MEMORY_ORIGIN)?
            .strip_prefix("/storage/v1/object/public/")?
            .strip_prefix(self.bucket.as_str())?
            .strip_prefix('/')
    }
}

impl RecordStore for MemoryBackend {
    fn list_images(
        &self,
        order: ImageOrder,
        limit: Option<usize>,
    ) -> Result<Vec<ImageDescriptor>, StoreError> {
        let tables = self.lock()?;
        let mut images = tables.images.clone();
        match order {
            ImageOrder::LeastAnswered => images.sort_by_key(|image| image.response_count),
            ImageOrder::Newest => images.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }
        if let Some(limit) = limit {
            images.truncate(limit);
        }
        Ok(images)
    }

    fn insert_image(&self, image: NewImage) -> Result<ImageDescriptor, StoreError> {
        let mut tables = self.lock()?;
        let descriptor = ImageDescriptor {
            id: Uuid::new_v4().to_string(),
            file_path: image.file_path,
            file_name: image.file_name,
            response_count: 0,
            created_at: Utc::now(),
        };
        tables.images.push(descriptor.clone());
        Ok(descriptor)
    }

    fn delete_image(&self, id: &str) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let before = tables.images.len();
        tables.images.retain(|image| image.id != id);
        if tables.images.len() == before {
            return Err(StoreError::NotFound(format!("image {id}")));
        }
        Ok(())
    }

    fn find_annotation(
        &self,
        form_token: &str,
        image_id: &str,
    ) -> Result<Option<AnnotationRecord>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .annotations
            .iter()
            .find(|record| record.form_token == form_token && record.image_id == image_id)
            .cloned())
    }

    fn insert_annotation(
        &self,
        annotation: NewAnnotation,
    ) -> Result<AnnotationRecord, StoreError> {
        let mut tables = self.lock()?;
        let taken = tables.annotations.iter().any(|record| {
            record.form_token == annotation.form_token && record.image_id == annotation.image_id
        });
        if taken {
            return Err(StoreError::Conflict(format!(
                "form token {} already used for image {}",
                annotation.form_token, annotation.image_id
            )));
        }

        let Some(image) = tables
            .images
            .iter_mut()
            .find(|image| image.id == annotation.image_id)
        else {
            return Err(StoreError::Rejected {
                status: 409,
                message: format!("image {} does not exist", annotation.image_id),
            });
        };
        image.response_count += 1;

        let record = AnnotationRecord {
            id: Uuid::new_v4().to_string(),
            image_id: annotation.image_id,
            annotated_image_url: annotation.annotated_image_url,
            session_id: annotation.session_id,
            form_token: annotation.form_token,
            user_agent: Some(annotation.user_agent),
            created_at: Utc::now(),
        };
        tables.annotations.push(record.clone());
        Ok(record)
    }
}

impl BlobStore for MemoryBackend {
    fn upload(&self, path: &str, bytes: &[u8], options: &UploadOptions) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if !options.upsert && tables.blobs.contains_key(path) {
            return Err(StoreError::Conflict(format!("object {path} already exists")));
        }
        tables.blobs.insert(
            path.to_string(),
            StoredBlob {
                bytes: bytes.to_vec(),
                content_type: options.content_type.clone(),
                cache_control: options.cache_control.clone(),
            },
        );
        Ok(())
    }

    fn public_url(&self, path: &str) -> Result<String, StoreError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(StoreError::Transport("store is offline".to_string()));
        }
        Ok(format!(
            "{MEMORY_ORIGIN}/storage/v1/object/public/{}/{path}",
            self.bucket
        ))
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let path = self
            .path_from_url(url)
            .ok_or_else(|| StoreError::NotFound(url.to_string()))?;
        let tables = self.lock()?;
        tables
            .blobs
            .get(path)
            .map(|blob| blob.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn remove(&self, paths: &[String]) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        for path in paths {
            tables.blobs.remove(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryBackend;
    use crate::backend::{
        BlobStore, ImageOrder, NewAnnotation, NewImage, RecordStore, StoreError, UploadOptions,
    };

    fn new_image(backend: &MemoryBackend, name: &str) -> String {
        backend
            .insert_image(NewImage {
                file_path: name.to_string(),
                file_name: name.to_string(),
            })
            .expect("insert image")
            .id
    }

    fn annotation(image_id: &str, token: &str) -> NewAnnotation {
        NewAnnotation {
            image_id: image_id.to_string(),
            annotated_image_url: "memory://x".to_string(),
            session_id: "participant".to_string(),
            form_token: token.to_string(),
            user_agent: "tests".to_string(),
        }
    }

    #[test]
    fn least_answered_first_and_limited() {
        let backend = MemoryBackend::new("survey_images");
        let busy = new_image(&backend, "busy.png");
        let quiet = new_image(&backend, "quiet.png");
        new_image(&backend, "other.png");
        backend
            .insert_annotation(annotation(&busy, "t1"))
            .expect("insert");

        let batch = backend
            .list_images(ImageOrder::LeastAnswered, Some(2))
            .expect("list");
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|image| image.response_count == 0));
        assert!(batch.iter().any(|image| image.id == quiet));
    }

    #[test]
    fn same_token_and_image_is_rejected() {
        let backend = MemoryBackend::new("survey_images");
        let image = new_image(&backend, "a.png");
        backend
            .insert_annotation(annotation(&image, "token"))
            .expect("first insert");
        let second = backend.insert_annotation(annotation(&image, "token"));
        assert!(matches!(second, Err(StoreError::Conflict(_))));
        assert_eq!(backend.annotations().len(), 1);
    }

    #[test]
    fn public_url_round_trips_through_fetch() {
        let backend = MemoryBackend::new("survey_images");
        backend
            .upload("annotations/a.png", b"png", &UploadOptions::png(3600))
            .expect("upload");
        let url = backend.public_url("annotations/a.png").expect("url");
        assert_eq!(backend.fetch(&url).expect("fetch"), b"png".to_vec());

        let blob = backend.blob("annotations/a.png").expect("stored blob");
        assert_eq!(blob.content_type, "image/png");
        assert_eq!(blob.cache_control.as_deref(), Some("3600"));
    }

    #[test]
    fn offline_store_fails_every_call() {
        let backend = MemoryBackend::new("survey_images");
        backend.set_offline(true);
        assert!(matches!(
            backend.list_images(ImageOrder::Newest, None),
            Err(StoreError::Transport(_))
        ));
        assert!(backend.public_url("x").is_err());
    }
}
