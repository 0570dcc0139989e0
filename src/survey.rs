//! Participant flow: serve a batch of least-answered images one at a time,
//! submit each annotated export, and signal completion once.

use thiserror::Error;
use tracing::{info, warn};

use crate::backend::{
    AnnotationRecord, BlobStore, ImageDescriptor, ImageOrder, NewAnnotation, RecordStore,
    StoreError, SurveyBackend, UploadOptions,
};
use crate::canvas::{AnnotationCanvas, CanvasError};
use crate::identity::{self, FormToken, IdentityProvider, ParticipantId};
use crate::surface::SurfaceSize;

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_ANNOTATION_PREFIX: &str = "annotations";
pub const DEFAULT_CACHE_SECONDS: u32 = 3600;

#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("there is no image to annotate")]
    NoCurrentImage,
    #[error("the survey is already complete")]
    Completed,
    #[error("submission for image {submitted} arrived while image {current} is open")]
    Stale { submitted: String, current: String },
    #[error(transparent)]
    Canvas(#[from] CanvasError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubmissionReceipt {
    Recorded(AnnotationRecord),
    /// A record for this token and image already exists; nothing was written.
    Duplicate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Advanced { index: usize },
    Completed,
    Duplicate,
}

/// Everything needed to store one annotated image, detached from the canvas
/// so it can be sent to a worker thread.
#[derive(Clone, Debug)]
pub struct Submission {
    pub image_id: String,
    pub path: String,
    pub png: Vec<u8>,
    pub cache_seconds: u32,
    pub participant: ParticipantId,
    pub form_token: FormToken,
    pub user_agent: String,
}

impl Submission {
    /// Uploads the export, then records it unless this token already has a
    /// record for the image. The existence check and the insert are separate
    /// calls; a store-side conflict on insert is reported as a duplicate.
    pub fn run<R, B>(&self, records: &R, blobs: &B) -> Result<SubmissionReceipt, SurveyError>
    where
        R: RecordStore + ?Sized,
        B: BlobStore + ?Sized,
    {
        blobs.upload(&self.path, &self.png, &UploadOptions::png(self.cache_seconds))?;
        let annotated_image_url = blobs.public_url(&self.path)?;

        if records
            .find_annotation(self.form_token.as_str(), &self.image_id)?
            .is_some()
        {
            warn!(image = %self.image_id, "submission already recorded");
            return Ok(SubmissionReceipt::Duplicate);
        }

        let insert = records.insert_annotation(NewAnnotation {
            image_id: self.image_id.clone(),
            annotated_image_url,
            session_id: self.participant.to_string(),
            form_token: self.form_token.to_string(),
            user_agent: self.user_agent.clone(),
        });
        match insert {
            Ok(record) => {
                info!(image = %self.image_id, record = %record.id, "annotation recorded");
                Ok(SubmissionReceipt::Recorded(record))
            }
            Err(StoreError::Conflict(reason)) => {
                warn!(image = %self.image_id, %reason, "store rejected a second submission");
                Ok(SubmissionReceipt::Duplicate)
            }
            Err(err) => Err(err.into()),
        }
    }
}

pub struct SurveyFlow {
    images: Vec<ImageDescriptor>,
    index: usize,
    completed: bool,
    canvas: Option<AnnotationCanvas>,
    annotation_prefix: String,
    cache_seconds: u32,
}

impl SurveyFlow {
    pub fn new(images: Vec<ImageDescriptor>) -> Self {
        Self {
            images,
            index: 0,
            completed: false,
            canvas: None,
            annotation_prefix: DEFAULT_ANNOTATION_PREFIX.to_string(),
            cache_seconds: DEFAULT_CACHE_SECONDS,
        }
    }

    /// Fetches the least-answered images, at most `batch_size` of them.
    pub fn start<R: RecordStore + ?Sized>(
        records: &R,
        batch_size: usize,
    ) -> Result<Self, SurveyError> {
        let images = records.list_images(ImageOrder::LeastAnswered, Some(batch_size))?;
        info!(count = images.len(), "survey batch loaded");
        Ok(Self::new(images))
    }

    pub fn with_storage_layout(
        mut self,
        annotation_prefix: impl Into<String>,
        cache_seconds: u32,
    ) -> Self {
        self.annotation_prefix = annotation_prefix.into();
        self.cache_seconds = cache_seconds;
        self
    }

    pub fn images(&self) -> &[ImageDescriptor] {
        &self.images
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn current_image(&self) -> Option<&ImageDescriptor> {
        if self.completed {
            return None;
        }
        self.images.get(self.index)
    }

    /// 1-based position and batch length, for "Image i of n".
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.current_image().map(|_| (self.index + 1, self.images.len()))
    }

    pub fn canvas(&self) -> Option<&AnnotationCanvas> {
        self.canvas.as_ref()
    }

    pub fn canvas_mut(&mut self) -> Option<&mut AnnotationCanvas> {
        self.canvas.as_mut()
    }

    /// Drops the previous canvas and its history, then builds a fresh one
    /// for the current image. The background still has to be loaded.
    pub fn open_current<B: BlobStore + ?Sized>(
        &mut self,
        blobs: &B,
        size: SurfaceSize,
        fill: [u8; 4],
    ) -> Result<&mut AnnotationCanvas, SurveyError> {
        self.canvas = None;
        if self.completed {
            return Err(SurveyError::Completed);
        }
        let image = self
            .images
            .get(self.index)
            .ok_or(SurveyError::NoCurrentImage)?;
        let url = blobs.public_url(&image.file_path)?;
        let canvas = AnnotationCanvas::new(size, fill, url)?;
        Ok(self.canvas.insert(canvas))
    }

    pub fn export_path(&self, image: &ImageDescriptor) -> String {
        format!("{}/{}", self.annotation_prefix, image.file_path)
    }

    /// Rasterises the open canvas and packages it with the participant's
    /// identity.
    pub fn prepare_submission(
        &self,
        identity: &mut IdentityProvider,
    ) -> Result<Submission, SurveyError> {
        if self.completed {
            return Err(SurveyError::Completed);
        }
        let image = self.current_image().ok_or(SurveyError::NoCurrentImage)?;
        let canvas = self.canvas.as_ref().ok_or(SurveyError::NoCurrentImage)?;
        let png = canvas.export_png()?;
        Ok(Submission {
            image_id: image.id.clone(),
            path: self.export_path(image),
            png,
            cache_seconds: self.cache_seconds,
            participant: identity.participant_id(),
            form_token: identity.form_token(),
            user_agent: identity::user_agent(),
        })
    }

    /// Applies the result of a submission for `image_id`. A recorded
    /// submission advances to the next image or, after the last one,
    /// completes the survey and forgets the session token.
    pub fn record_receipt(
        &mut self,
        image_id: &str,
        receipt: &SubmissionReceipt,
        identity: &mut IdentityProvider,
    ) -> Result<SaveOutcome, SurveyError> {
        if self.completed {
            return Err(SurveyError::Completed);
        }
        let current = self.current_image().ok_or(SurveyError::NoCurrentImage)?;
        if current.id != image_id {
            return Err(SurveyError::Stale {
                submitted: image_id.to_string(),
                current: current.id.clone(),
            });
        }

        match receipt {
            SubmissionReceipt::Duplicate => Ok(SaveOutcome::Duplicate),
            SubmissionReceipt::Recorded(_) => {
                self.canvas = None;
                if self.index + 1 < self.images.len() {
                    self.index += 1;
                    Ok(SaveOutcome::Advanced { index: self.index })
                } else {
                    self.completed = true;
                    identity.reset_session();
                    info!(images = self.images.len(), "survey completed");
                    Ok(SaveOutcome::Completed)
                }
            }
        }
    }

    /// Export, submit and advance in one blocking call.
    pub fn save<S: SurveyBackend + ?Sized>(
        &mut self,
        backend: &S,
        identity: &mut IdentityProvider,
    ) -> Result<SaveOutcome, SurveyError> {
        let submission = self.prepare_submission(identity)?;
        let receipt = submission.run(backend, backend)?;
        self.record_receipt(&submission.image_id, &receipt, identity)
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::{SaveOutcome, SubmissionReceipt, SurveyError, SurveyFlow};
    use crate::annotation::{Tool, SURFACE_FILL};
    use crate::backend::{
        AnnotationRecord, BlobStore, ImageDescriptor, ImageOrder, MemoryBackend, NewAnnotation,
        NewImage, RecordStore, StoreError, UploadOptions,
    };
    use crate::flatten::encode_png;
    use crate::identity::{CookieJar, IdentityProvider};
    use crate::surface::SurfaceSize;

    fn seeded(count: usize) -> MemoryBackend {
        let backend = MemoryBackend::new("survey_images");
        let png = encode_png(&RgbaImage::from_pixel(40, 30, Rgba([10, 20, 30, 255])))
            .expect("encode");
        for i in 0..count {
            let name = format!("img-{i}.png");
            backend
                .upload(&name, &png, &UploadOptions::new_file("image/png"))
                .expect("upload");
            backend
                .insert_image(NewImage {
                    file_path: name.clone(),
                    file_name: name,
                })
                .expect("insert");
        }
        backend
    }

    fn open_loaded(flow: &mut SurveyFlow, backend: &MemoryBackend) {
        let canvas = flow
            .open_current(backend, SurfaceSize::new(80, 60), SURFACE_FILL)
            .expect("open");
        let bytes = backend.fetch(canvas.image_url()).expect("fetch");
        canvas.load_background_bytes(&bytes).expect("load");
        canvas.set_tool(Tool::Line).expect("line");
    }

    #[test]
    fn batch_of_five_advances_then_completes_once() {
        let backend = seeded(7);
        let mut identity = IdentityProvider::new(CookieJar::in_memory());
        let token = identity.form_token();
        let mut flow = SurveyFlow::start(&backend, 5).expect("start");
        assert_eq!(flow.images().len(), 5);

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            open_loaded(&mut flow, &backend);
            outcomes.push(flow.save(&backend, &mut identity).expect("save"));
        }
        assert_eq!(
            outcomes,
            vec![
                SaveOutcome::Advanced { index: 1 },
                SaveOutcome::Advanced { index: 2 },
                SaveOutcome::Advanced { index: 3 },
                SaveOutcome::Advanced { index: 4 },
                SaveOutcome::Completed,
            ]
        );
        assert!(flow.is_complete());
        assert_eq!(flow.index(), 4);
        assert!(matches!(
            flow.save(&backend, &mut identity),
            Err(SurveyError::Completed)
        ));
        assert_eq!(backend.annotations().len(), 5);
        assert_ne!(identity.form_token(), token);
    }

    #[test]
    fn submissions_land_under_annotation_prefix() {
        let backend = seeded(1);
        let mut identity = IdentityProvider::new(CookieJar::in_memory());
        let mut flow = SurveyFlow::start(&backend, 5).expect("start");
        open_loaded(&mut flow, &backend);
        flow.save(&backend, &mut identity).expect("save");

        let blob = backend.blob("annotations/img-0.png").expect("export uploaded");
        assert_eq!(blob.content_type, "image/png");
        assert_eq!(blob.cache_control.as_deref(), Some("3600"));

        let record = &backend.annotations()[0];
        assert!(record.annotated_image_url.ends_with("/annotations/img-0.png"));
        assert_eq!(record.session_id, identity.participant_id().as_str());
        assert!(record.user_agent.is_some());
    }

    #[test]
    fn same_token_and_image_is_reported_as_duplicate() {
        let backend = seeded(2);
        let mut identity = IdentityProvider::new(CookieJar::in_memory());
        let mut flow = SurveyFlow::start(&backend, 5).expect("start");
        let first = flow.images()[0].id.clone();
        backend
            .insert_annotation(NewAnnotation {
                image_id: first,
                annotated_image_url: "memory://earlier".to_string(),
                session_id: identity.participant_id().to_string(),
                form_token: identity.form_token().to_string(),
                user_agent: "earlier".to_string(),
            })
            .expect("earlier record");

        open_loaded(&mut flow, &backend);
        let outcome = flow.save(&backend, &mut identity).expect("save");
        assert_eq!(outcome, SaveOutcome::Duplicate);
        assert_eq!(flow.index(), 0);
        assert_eq!(backend.annotations().len(), 1);
    }

    /// Skips the existence check, as if a concurrent writer won the race.
    struct RacingStore<'a>(&'a MemoryBackend);

    impl RecordStore for RacingStore<'_> {
        fn list_images(
            &self,
            order: ImageOrder,
            limit: Option<usize>,
        ) -> Result<Vec<ImageDescriptor>, StoreError> {
            self.0.list_images(order, limit)
        }

        fn insert_image(&self, image: NewImage) -> Result<ImageDescriptor, StoreError> {
            self.0.insert_image(image)
        }

        fn delete_image(&self, id: &str) -> Result<(), StoreError> {
            self.0.delete_image(id)
        }

        fn find_annotation(
            &self,
            _form_token: &str,
            _image_id: &str,
        ) -> Result<Option<AnnotationRecord>, StoreError> {
            Ok(None)
        }

        fn insert_annotation(
            &self,
            annotation: NewAnnotation,
        ) -> Result<AnnotationRecord, StoreError> {
            self.0.insert_annotation(annotation)
        }
    }

    #[test]
    fn store_conflict_on_insert_counts_as_duplicate() {
        let backend = seeded(1);
        let racing = RacingStore(&backend);
        let mut identity = IdentityProvider::new(CookieJar::in_memory());
        let mut flow = SurveyFlow::start(&backend, 5).expect("start");
        open_loaded(&mut flow, &backend);

        let submission = flow.prepare_submission(&mut identity).expect("prepare");
        let first = submission.run(&racing, &backend).expect("first run");
        assert!(matches!(first, SubmissionReceipt::Recorded(_)));
        let second = submission.run(&racing, &backend).expect("second run");
        assert_eq!(second, SubmissionReceipt::Duplicate);
        assert_eq!(backend.annotations().len(), 1);
    }

    #[test]
    fn store_failure_keeps_position() {
        let backend = seeded(3);
        let mut identity = IdentityProvider::new(CookieJar::in_memory());
        let mut flow = SurveyFlow::start(&backend, 5).expect("start");
        open_loaded(&mut flow, &backend);

        backend.set_offline(true);
        assert!(matches!(
            flow.save(&backend, &mut identity),
            Err(SurveyError::Store(StoreError::Transport(_)))
        ));
        assert_eq!(flow.index(), 0);
        assert!(flow.canvas().is_some());
    }

    #[test]
    fn unloaded_canvas_cannot_be_submitted() {
        let backend = seeded(1);
        let mut identity = IdentityProvider::new(CookieJar::in_memory());
        let mut flow = SurveyFlow::start(&backend, 5).expect("start");
        flow.open_current(&backend, SurfaceSize::new(80, 60), SURFACE_FILL)
            .expect("open");
        assert!(matches!(
            flow.save(&backend, &mut identity),
            Err(SurveyError::Canvas(_))
        ));
        assert!(backend.blob("annotations/img-0.png").is_none());
    }

    #[test]
    fn advancing_tears_down_the_previous_canvas() {
        let backend = seeded(2);
        let mut identity = IdentityProvider::new(CookieJar::in_memory());
        let mut flow = SurveyFlow::start(&backend, 5).expect("start");
        open_loaded(&mut flow, &backend);
        assert_eq!(flow.canvas().map(|c| c.history_len()), Some(2));

        flow.save(&backend, &mut identity).expect("save");
        assert!(flow.canvas().is_none());

        let canvas = flow
            .open_current(&backend, SurfaceSize::new(80, 60), SURFACE_FILL)
            .expect("open next");
        assert!(canvas.image_url().ends_with("/img-1.png"));
        assert_eq!(canvas.history_len(), 1);
        assert_eq!(flow.progress(), Some((2, 2)));
    }

    #[test]
    fn stale_receipt_is_refused() {
        let backend = seeded(2);
        let mut identity = IdentityProvider::new(CookieJar::in_memory());
        let mut flow = SurveyFlow::start(&backend, 5).expect("start");
        let result =
            flow.record_receipt("not-current", &SubmissionReceipt::Duplicate, &mut identity);
        assert!(matches!(result, Err(SurveyError::Stale { .. })));
    }

    #[test]
    fn empty_store_gives_empty_survey() {
        let backend = seeded(0);
        let mut flow = SurveyFlow::start(&backend, 5).expect("start");
        assert!(flow.is_empty());
        assert_eq!(flow.progress(), None);
        assert!(matches!(
            flow.open_current(&backend, SurfaceSize::new(80, 60), SURFACE_FILL),
            Err(SurveyError::NoCurrentImage)
        ));
    }
}
