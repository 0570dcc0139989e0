//! Image set management: list newest first, upload, delete.

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info};

use crate::backend::{
    BlobStore, ImageDescriptor, ImageOrder, NewImage, RecordStore, StoreError, UploadOptions,
};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("cannot upload {file}: {source}")]
    Upload { file: String, source: StoreError },
    #[error("cannot delete {file}: {source}")]
    Delete { file: String, source: StoreError },
    #[error("no image with id {0}")]
    UnknownImage(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn content_type(&self) -> String {
        mime_guess::from_path(&self.name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

/// Storage path for a newly uploaded file: `<unix millis>-<name>`.
pub fn storage_path(name: &str, millis: i64) -> String {
    format!("{millis}-{name}")
}

#[derive(Clone, Debug, Default)]
pub struct AdminPanel {
    images: Vec<ImageDescriptor>,
}

impl AdminPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn images(&self) -> &[ImageDescriptor] {
        &self.images
    }

    pub fn refresh<R: RecordStore + ?Sized>(&mut self, records: &R) -> Result<(), AdminError> {
        self.images = records.list_images(ImageOrder::Newest, None)?;
        Ok(())
    }

    /// Stores each file and its record, in order. Stops at the first failure;
    /// files before it stay uploaded.
    pub fn upload<R, B>(
        &mut self,
        records: &R,
        blobs: &B,
        files: &[UploadFile],
    ) -> Result<Vec<ImageDescriptor>, AdminError>
    where
        R: RecordStore + ?Sized,
        B: BlobStore + ?Sized,
    {
        let mut created = Vec::with_capacity(files.len());
        for file in files {
            let path = storage_path(&file.name, Utc::now().timestamp_millis());
            let stored = blobs
                .upload(&path, &file.bytes, &UploadOptions::new_file(file.content_type()))
                .and_then(|()| {
                    records.insert_image(NewImage {
                        file_path: path.clone(),
                        file_name: file.name.clone(),
                    })
                });
            match stored {
                Ok(descriptor) => {
                    info!(file = %file.name, %path, "image uploaded");
                    created.push(descriptor);
                }
                Err(source) => {
                    error!(file = %file.name, error = %source, "image upload failed");
                    return Err(AdminError::Upload {
                        file: file.name.clone(),
                        source,
                    });
                }
            }
        }
        self.refresh(records)?;
        Ok(created)
    }

    /// Removes the stored file, then the record, then the local entry.
    pub fn delete<R, B>(&mut self, records: &R, blobs: &B, id: &str) -> Result<(), AdminError>
    where
        R: RecordStore + ?Sized,
        B: BlobStore + ?Sized,
    {
        let image = self
            .images
            .iter()
            .find(|image| image.id == id)
            .cloned()
            .ok_or_else(|| AdminError::UnknownImage(id.to_string()))?;

        blobs
            .remove(std::slice::from_ref(&image.file_path))
            .and_then(|()| records.delete_image(&image.id))
            .map_err(|source| {
                error!(file = %image.file_name, error = %source, "image delete failed");
                AdminError::Delete {
                    file: image.file_name.clone(),
                    source,
                }
            })?;

        self.images.retain(|kept| kept.id != image.id);
        info!(file = %image.file_name, "image deleted");
        Ok(())
    }

    pub fn thumbnail_url<B: BlobStore + ?Sized>(
        &self,
        blobs: &B,
        image: &ImageDescriptor,
    ) -> Result<String, AdminError> {
        Ok(blobs.public_url(&image.file_path)?)
    }
}
