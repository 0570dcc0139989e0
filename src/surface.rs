//! The drawing surface: a fixed-size raster area with a background image
//! layer and an ordered list of vector annotations on top of it.

use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::annotation::{Annotation, AnnotationId};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn center(self) -> (f32, f32) {
        (self.width as f32 / 2.0, self.height as f32 / 2.0)
    }
}

/// Where and how large the background image is drawn. Part of every snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BackgroundPlacement {
    pub source: String,
    pub native_width: u32,
    pub native_height: u32,
    pub scale: f32,
}

impl BackgroundPlacement {
    /// Uniform scale that fits the image inside the surface, anchored top-left.
    pub fn fit(source: &str, native_width: u32, native_height: u32, size: SurfaceSize) -> Self {
        let scale = (size.width as f32 / native_width.max(1) as f32)
            .min(size.height as f32 / native_height.max(1) as f32);
        Self {
            source: source.to_string(),
            native_width,
            native_height,
            scale,
        }
    }

    pub fn drawn_size(&self) -> (f32, f32) {
        (
            self.native_width as f32 * self.scale,
            self.native_height as f32 * self.scale,
        )
    }
}

#[derive(Clone, Debug)]
pub struct BackgroundLayer {
    pub placement: BackgroundPlacement,
    pub pixels: Arc<DynamicImage>,
}

#[derive(Clone, Debug)]
pub enum BackgroundState {
    Loading,
    Ready(BackgroundLayer),
    Failed(String),
}

/// Structural change notifications, drained by the owner of the surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SurfaceChange {
    Added(AnnotationId),
    Modified(Vec<AnnotationId>),
    Removed(AnnotationId),
}

/// Serialized capture of the complete surface state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot(Arc<str>);

impl Snapshot {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotBody {
    background: Option<BackgroundPlacement>,
    objects: Vec<Annotation>,
    next_id: AnnotationId,
}

pub struct DrawingSurface {
    size: SurfaceSize,
    fill: [u8; 4],
    source_url: String,
    background: BackgroundState,
    objects: Vec<Annotation>,
    next_id: AnnotationId,
    changes: Vec<SurfaceChange>,
}

impl DrawingSurface {
    pub fn new(size: SurfaceSize, fill: [u8; 4], source_url: impl Into<String>) -> Self {
        Self {
            size,
            fill,
            source_url: source_url.into(),
            background: BackgroundState::Loading,
            objects: Vec::new(),
            next_id: 1,
            changes: Vec::new(),
        }
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    pub fn fill(&self) -> [u8; 4] {
        self.fill
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn background(&self) -> &BackgroundState {
        &self.background
    }

    pub fn background_layer(&self) -> Option<&BackgroundLayer> {
        match &self.background {
            BackgroundState::Ready(layer) => Some(layer),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.background, BackgroundState::Ready(_))
    }

    /// Fixes the decoded image as the bottom-most, non-interactive layer.
    pub fn attach_background(&mut self, image: DynamicImage) -> BackgroundPlacement {
        let placement =
            BackgroundPlacement::fit(&self.source_url, image.width(), image.height(), self.size);
        self.background = BackgroundState::Ready(BackgroundLayer {
            placement: placement.clone(),
            pixels: Arc::new(image),
        });
        placement
    }

    pub fn fail_background(&mut self, reason: impl Into<String>) {
        self.background = BackgroundState::Failed(reason.into());
    }

    pub fn objects(&self) -> &[Annotation] {
        &self.objects
    }

    pub fn find(&self, id: AnnotationId) -> Option<&Annotation> {
        self.objects.iter().find(|annotation| annotation.id == id)
    }

    pub fn next_annotation_id(&mut self) -> AnnotationId {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    pub fn add(&mut self, annotation: Annotation) -> AnnotationId {
        let id = annotation.id;
        if id >= self.next_id {
            self.next_id = id.saturating_add(1);
        }
        self.objects.push(annotation);
        self.changes.push(SurfaceChange::Added(id));
        id
    }

    pub fn remove(&mut self, id: AnnotationId) -> Option<Annotation> {
        let index = self.objects.iter().position(|annotation| annotation.id == id)?;
        let removed = self.objects.remove(index);
        self.changes.push(SurfaceChange::Removed(id));
        Some(removed)
    }

    /// Mutable access for live previews; no change is recorded.
    pub fn preview_mut(&mut self, id: AnnotationId) -> Option<&mut Annotation> {
        self.objects.iter_mut().find(|annotation| annotation.id == id)
    }

    /// Records that a previewed edit of `ids` is final.
    pub fn commit_modified(&mut self, ids: Vec<AnnotationId>) {
        if ids.is_empty() {
            return;
        }
        self.changes.push(SurfaceChange::Modified(ids));
    }

    pub fn take_changes(&mut self) -> Vec<SurfaceChange> {
        std::mem::take(&mut self.changes)
    }

    /// Topmost selectable object under `point`.
    pub fn pick(&self, point: crate::annotation::Point, tolerance: f32) -> Option<AnnotationId> {
        self.objects
            .iter()
            .rev()
            .filter(|annotation| annotation.selectable)
            .find(|annotation| annotation.contains(point, tolerance))
            .map(|annotation| annotation.id)
    }

    pub fn snapshot(&self) -> serde_json::Result<Snapshot> {
        let body = SnapshotBody {
            background: self.background_layer().map(|layer| layer.placement.clone()),
            objects: self.objects.clone(),
            next_id: self.next_id,
        };
        let raw = serde_json::to_string(&body)?;
        Ok(Snapshot(Arc::from(raw)))
    }

    /// Replaces the whole surface with `snapshot`. Every restored object is
    /// reported as `Added`, so callers that record history must suppress it.
    pub fn restore(&mut self, snapshot: &Snapshot) -> serde_json::Result<()> {
        let body: SnapshotBody = serde_json::from_str(snapshot.as_str())?;
        if let (Some(placement), BackgroundState::Ready(layer)) =
            (body.background, &mut self.background)
        {
            layer.placement = placement;
        }
        self.objects.clear();
        self.next_id = body.next_id;
        for annotation in body.objects {
            self.changes.push(SurfaceChange::Added(annotation.id));
            self.objects.push(annotation);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, RgbaImage};

    use super::{BackgroundPlacement, DrawingSurface, SurfaceChange, SurfaceSize};
    use crate::annotation::{Annotation, AnnotationKind, Point, SURFACE_FILL};

    fn line(id: u64) -> Annotation {
        Annotation {
            id,
            kind: AnnotationKind::Line {
                from: Point::new(0.0, 0.0),
                to: Point::new(10.0, 10.0),
            },
            color: [255, 0, 0, 255],
            stroke_width: 2.0,
            selectable: true,
        }
    }

    #[test]
    fn fit_preserves_aspect_ratio() {
        let size = SurfaceSize::new(800, 600);
        let wide = BackgroundPlacement::fit("a", 1600, 400, size);
        assert_eq!(wide.scale, 0.5);
        assert_eq!(wide.drawn_size(), (800.0, 200.0));

        let small = BackgroundPlacement::fit("b", 200, 300, size);
        assert_eq!(small.scale, 2.0);
        assert_eq!(small.drawn_size(), (400.0, 600.0));
    }

    #[test]
    fn attach_makes_surface_ready() {
        let mut surface = DrawingSurface::new(SurfaceSize::new(80, 60), SURFACE_FILL, "img");
        assert!(!surface.is_ready());
        surface.attach_background(DynamicImage::ImageRgba8(RgbaImage::new(160, 60)));
        assert!(surface.is_ready());
        assert!(surface.take_changes().is_empty());
    }

    #[test]
    fn mutations_queue_changes_but_previews_do_not() {
        let mut surface = DrawingSurface::new(SurfaceSize::new(80, 60), SURFACE_FILL, "img");
        surface.add(line(1));
        if let Some(annotation) = surface.preview_mut(1) {
            annotation.move_by(egui::vec2(1.0, 1.0));
        }
        surface.commit_modified(vec![1]);
        surface.remove(1);
        assert_eq!(
            surface.take_changes(),
            vec![
                SurfaceChange::Added(1),
                SurfaceChange::Modified(vec![1]),
                SurfaceChange::Removed(1),
            ]
        );
    }

    #[test]
    fn restore_round_trips_and_reports_additions() {
        let mut surface = DrawingSurface::new(SurfaceSize::new(80, 60), SURFACE_FILL, "img");
        surface.add(line(1));
        surface.add(line(2));
        let snapshot = surface.snapshot().expect("snapshot");
        surface.remove(2);
        surface.take_changes();

        surface.restore(&snapshot).expect("restore");
        assert_eq!(surface.objects().len(), 2);
        assert_eq!(
            surface.take_changes(),
            vec![SurfaceChange::Added(1), SurfaceChange::Added(2)]
        );
        assert_eq!(surface.snapshot().expect("snapshot"), snapshot);
    }
}
