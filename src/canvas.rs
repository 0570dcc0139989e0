//! Annotation canvas: one drawing surface, its tool mode, its undo history.
//!
//! The history belongs to the canvas and dies with it; a new image gets a new
//! canvas. Every structural change the surface reports becomes one snapshot,
//! except while a snapshot is being restored.

use egui::Rect;
use image::{DynamicImage, RgbaImage};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::annotation::{
    Annotation, AnnotationId, AnnotationKind, Brush, Handle, Point, Tool, LINE_HALF_EXTENT,
    MARKUP_RED, PEN_WIDTH,
};
use crate::backend::{BlobStore, StoreError, UploadOptions};
use crate::flatten;
use crate::history::UndoHistory;
use crate::surface::{BackgroundState, DrawingSurface, Snapshot, SurfaceSize};

/// Samples closer than this to the previous one are dropped from a stroke.
pub const DECIMATE_DISTANCE: f32 = 0.4;
pub const PICK_TOLERANCE: f32 = 4.0;
pub const HANDLE_RADIUS: f32 = 6.0;
/// Marquee drags shorter than this count as a click on empty space.
const MARQUEE_MIN_DRAG: f32 = 1.0;

#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("the background image has not loaded")]
    NotReady,
    #[error("cannot capture or restore surface state: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("cannot decode background image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("cannot render surface: {0}")]
    Render(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Pen and eraser draw a straight segment from the press point.
    pub shift: bool,
}

#[derive(Clone, Debug)]
enum Gesture {
    Stroke {
        brush: Brush,
        start: Point,
        points: Vec<Point>,
    },
    Move {
        originals: Vec<Annotation>,
        start: Point,
    },
    Resize {
        handle: Handle,
        original: Annotation,
    },
    Marquee {
        start: Point,
        current: Point,
    },
}

pub struct AnnotationCanvas {
    surface: DrawingSurface,
    history: UndoHistory<Snapshot>,
    tool: Tool,
    selection: Vec<AnnotationId>,
    gesture: Option<Gesture>,
}

impl AnnotationCanvas {
    pub fn new(
        size: SurfaceSize,
        fill: [u8; 4],
        image_url: impl Into<String>,
    ) -> Result<Self, CanvasError> {
        let surface = DrawingSurface::new(size, fill, image_url);
        let initial = surface.snapshot()?;
        Ok(Self {
            surface,
            history: UndoHistory::new(initial),
            tool: Tool::Select,
            selection: Vec::new(),
            gesture: None,
        })
    }

    pub fn image_url(&self) -> &str {
        self.surface.source_url()
    }

    pub fn surface(&self) -> &DrawingSurface {
        &self.surface
    }

    pub fn is_ready(&self) -> bool {
        self.surface.is_ready()
    }

    pub fn load_failure(&self) -> Option<&str> {
        match self.surface.background() {
            BackgroundState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Completes the background fetch. On success the history is reseeded with
    /// the background-only state; on failure the canvas never becomes ready.
    pub fn finish_loading(&mut self, result: Result<DynamicImage, String>) -> Result<(), CanvasError> {
        if !matches!(self.surface.background(), BackgroundState::Loading) {
            warn!(url = self.image_url(), "background already settled, ignoring late load");
            return Ok(());
        }
        match result {
            Ok(image) => {
                let placement = self.surface.attach_background(image);
                self.history.clear_with(self.surface.snapshot()?);
                debug!(
                    url = self.image_url(),
                    scale = placement.scale,
                    "background attached"
                );
            }
            Err(reason) => {
                warn!(url = self.image_url(), %reason, "background failed to load");
                self.surface.fail_background(reason);
            }
        }
        Ok(())
    }

    pub fn load_background_bytes(&mut self, bytes: &[u8]) -> Result<(), CanvasError> {
        match image::load_from_memory(bytes) {
            Ok(image) => self.finish_loading(Ok(image)),
            Err(err) => {
                self.finish_loading(Err(err.to_string()))?;
                Err(err.into())
            }
        }
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn brush(&self) -> Option<Brush> {
        Brush::for_tool(self.tool, self.surface.fill())
    }

    /// Switches mode. `Tool::Line` inserts a line and lands in `Select`.
    /// A gesture in progress is abandoned and its preview reverted.
    pub fn set_tool(&mut self, tool: Tool) -> Result<(), CanvasError> {
        self.cancel_gesture();
        if tool.is_momentary() {
            self.add_line()?;
            return Ok(());
        }
        if tool.paints() {
            self.selection.clear();
        }
        if self.tool != tool {
            debug!(from = ?self.tool, to = ?tool, "tool changed");
        }
        self.tool = tool;
        Ok(())
    }

    pub fn selection(&self) -> &[AnnotationId] {
        &self.selection
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn current_snapshot(&self) -> &Snapshot {
        self.history.current()
    }

    /// Points of the stroke being drawn, with the brush painting it.
    pub fn stroke_preview(&self) -> Option<(Brush, &[Point])> {
        match &self.gesture {
            Some(Gesture::Stroke { brush, points, .. }) => Some((*brush, points.as_slice())),
            _ => None,
        }
    }

    pub fn marquee(&self) -> Option<Rect> {
        match &self.gesture {
            Some(Gesture::Marquee { start, current }) => {
                Some(Rect::from_two_pos(start.to_pos2(), current.to_pos2()))
            }
            _ => None,
        }
    }

    /// Resize handles, shown when exactly one object is selected.
    pub fn selection_handles(&self) -> Vec<(Handle, Point)> {
        match self.selection.as_slice() {
            [id] => self
                .surface
                .find(*id)
                .map(Annotation::handles)
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Starts a gesture. Returns false when the press is ignored.
    pub fn pointer_down(&mut self, pos: Point) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.cancel_gesture();
        match self.tool {
            Tool::Draw | Tool::Erase => {
                let Some(brush) = self.brush() else {
                    return false;
                };
                self.gesture = Some(Gesture::Stroke {
                    brush,
                    start: pos,
                    points: vec![pos],
                });
            }
            Tool::Select => self.begin_select_gesture(pos),
            Tool::Line => return false,
        }
        true
    }

    pub fn pointer_move(&mut self, pos: Point, modifiers: Modifiers) {
        let Some(gesture) = self.gesture.as_mut() else {
            return;
        };
        match gesture {
            Gesture::Stroke { start, points, .. } => {
                if modifiers.shift {
                    *points = vec![*start, pos];
                } else if points
                    .last()
                    .map_or(true, |last| last.distance(pos) >= DECIMATE_DISTANCE)
                {
                    points.push(pos);
                }
            }
            Gesture::Move { originals, start } => {
                let delta = start.delta(pos);
                for original in originals.iter() {
                    if let Some(annotation) = self.surface.preview_mut(original.id) {
                        *annotation = original.clone();
                        annotation.move_by(delta);
                    }
                }
            }
            Gesture::Resize { handle, original } => {
                if let Some(annotation) = self.surface.preview_mut(original.id) {
                    *annotation = original.clone();
                    annotation.resize_from_handle(*handle, pos);
                }
            }
            Gesture::Marquee { current, .. } => *current = pos,
        }
    }

    /// Ends the gesture, committing whatever it produced.
    pub fn pointer_up(&mut self, pos: Point, modifiers: Modifiers) -> Result<(), CanvasError> {
        self.pointer_move(pos, modifiers);
        let Some(gesture) = self.gesture.take() else {
            return Ok(());
        };

        match gesture {
            Gesture::Stroke { brush, points, .. } => {
                let id = self.surface.next_annotation_id();
                self.surface.add(Annotation {
                    id,
                    kind: AnnotationKind::Freehand { points },
                    color: brush.color,
                    stroke_width: brush.width,
                    selectable: true,
                });
            }
            Gesture::Move { originals, .. } => {
                let moved = self.changed_ids(&originals);
                self.surface.commit_modified(moved);
            }
            Gesture::Resize { original, .. } => {
                let resized = self.changed_ids(std::slice::from_ref(&original));
                self.surface.commit_modified(resized);
            }
            Gesture::Marquee { start, current } => {
                if start.distance(current) >= MARQUEE_MIN_DRAG {
                    let area = Rect::from_two_pos(start.to_pos2(), current.to_pos2());
                    self.selection = self
                        .surface
                        .objects()
                        .iter()
                        .filter(|annotation| annotation.selectable)
                        .filter(|annotation| annotation.bounds().intersects(area))
                        .map(|annotation| annotation.id)
                        .collect();
                }
            }
        }

        self.commit_changes()?;
        Ok(())
    }

    /// Inserts a diagonal line centred on the surface, selects it and returns
    /// to `Select`.
    pub fn add_line(&mut self) -> Result<AnnotationId, CanvasError> {
        if !self.is_ready() {
            return Err(CanvasError::NotReady);
        }
        self.cancel_gesture();
        let (cx, cy) = self.surface.size().center();
        let id = self.surface.next_annotation_id();
        self.surface.add(Annotation {
            id,
            kind: AnnotationKind::Line {
                from: Point::new(cx - LINE_HALF_EXTENT, cy - LINE_HALF_EXTENT),
                to: Point::new(cx + LINE_HALF_EXTENT, cy + LINE_HALF_EXTENT),
            },
            color: MARKUP_RED,
            stroke_width: PEN_WIDTH,
            selectable: true,
        });
        self.selection = vec![id];
        self.tool = Tool::Select;
        self.commit_changes()?;
        Ok(id)
    }

    /// Removes the selected objects, one history entry per object. Returns
    /// how many were removed.
    pub fn delete_selection(&mut self) -> Result<usize, CanvasError> {
        self.cancel_gesture();
        let mut removed = 0;
        for id in std::mem::take(&mut self.selection) {
            if self.surface.remove(id).is_some() {
                removed += 1;
                self.commit_changes()?;
            }
        }
        Ok(removed)
    }

    /// Steps back one snapshot. Returns false when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, CanvasError> {
        self.cancel_gesture();
        let Some(snapshot) = self.history.undo() else {
            return Ok(false);
        };
        self.selection.clear();

        let mut history = self.history.suppress();
        self.surface.restore(&snapshot)?;
        record_changes(&mut self.surface, &mut history)?;
        drop(history);

        debug!(history = self.history.len(), "undo");
        Ok(true)
    }

    pub fn export_image(&self) -> Result<RgbaImage, CanvasError> {
        if !self.is_ready() {
            return Err(CanvasError::NotReady);
        }
        flatten::flatten(&self.surface).map_err(|err| CanvasError::Render(format!("{err:#}")))
    }

    pub fn export_png(&self) -> Result<Vec<u8>, CanvasError> {
        let image = self.export_image()?;
        flatten::encode_png(&image).map_err(|err| CanvasError::Render(format!("{err:#}")))
    }

    /// Rasterises the surface, uploads it to `path` and returns its public URL.
    pub fn save<B: BlobStore + ?Sized>(
        &self,
        blobs: &B,
        path: &str,
        cache_seconds: u32,
    ) -> Result<String, CanvasError> {
        let png = self.export_png()?;
        blobs.upload(path, &png, &UploadOptions::png(cache_seconds))?;
        let url = blobs.public_url(path)?;
        info!(path, bytes = png.len(), "annotated image uploaded");
        Ok(url)
    }

    fn begin_select_gesture(&mut self, pos: Point) {
        if let [selected] = self.selection.as_slice() {
            if let Some(annotation) = self.surface.find(*selected) {
                let handle = annotation
                    .handles()
                    .into_iter()
                    .find(|(_, point)| point.distance(pos) <= HANDLE_RADIUS)
                    .map(|(handle, _)| handle);
                if let Some(handle) = handle {
                    self.gesture = Some(Gesture::Resize {
                        handle,
                        original: annotation.clone(),
                    });
                    return;
                }
            }
        }

        match self.surface.pick(pos, PICK_TOLERANCE) {
            Some(hit) => {
                if !self.selection.contains(&hit) {
                    self.selection = vec![hit];
                }
                let originals = self
                    .selection
                    .iter()
                    .filter_map(|id| self.surface.find(*id).cloned())
                    .collect();
                self.gesture = Some(Gesture::Move {
                    originals,
                    start: pos,
                });
            }
            None => {
                self.selection.clear();
                self.gesture = Some(Gesture::Marquee {
                    start: pos,
                    current: pos,
                });
            }
        }
    }

    fn changed_ids(&self, originals: &[Annotation]) -> Vec<AnnotationId> {
        originals
            .iter()
            .filter(|original| self.surface.find(original.id) != Some(*original))
            .map(|original| original.id)
            .collect()
    }

    fn cancel_gesture(&mut self) {
        let originals = match self.gesture.take() {
            Some(Gesture::Move { originals, .. }) => originals,
            Some(Gesture::Resize { original, .. }) => vec![original],
            _ => return,
        };
        for original in originals {
            if let Some(annotation) = self.surface.preview_mut(original.id) {
                *annotation = original;
            }
        }
    }

    fn commit_changes(&mut self) -> Result<usize, CanvasError> {
        record_changes(&mut self.surface, &mut self.history)
    }
}

/// Appends one snapshot per pending surface change. Callers commit after each
/// mutation, since every snapshot shows the surface as it is now.
fn record_changes(
    surface: &mut DrawingSurface,
    history: &mut UndoHistory<Snapshot>,
) -> Result<usize, CanvasError> {
    let mut recorded = 0;
    for change in surface.take_changes() {
        if history.push_snapshot(surface.snapshot()?) {
            recorded += 1;
            debug!(?change, history = history.len(), "snapshot captured");
        }
    }
    Ok(recorded)
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgba, RgbaImage};

    use super::{AnnotationCanvas, CanvasError, Modifiers};
    use crate::annotation::{AnnotationKind, Point, Tool, SURFACE_FILL};
    use crate::backend::{BlobStore, MemoryBackend};
    use crate::surface::SurfaceSize;

    fn ready_canvas() -> AnnotationCanvas {
        let mut canvas =
            AnnotationCanvas::new(SurfaceSize::new(800, 600), SURFACE_FILL, "memory://img")
                .expect("canvas");
        canvas
            .finish_loading(Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                400,
                300,
                Rgba([20, 120, 40, 255]),
            ))))
            .expect("load");
        canvas
    }

    fn drag(canvas: &mut AnnotationCanvas, from: (f32, f32), to: (f32, f32)) {
        let modifiers = Modifiers::default();
        assert!(canvas.pointer_down(Point::new(from.0, from.1)));
        let mid = Point::new((from.0 + to.0) / 2.0, (from.1 + to.1) / 2.0);
        canvas.pointer_move(mid, modifiers);
        canvas
            .pointer_up(Point::new(to.0, to.1), modifiers)
            .expect("pointer up");
    }

    #[test]
    fn history_has_one_entry_per_change_and_undo_walks_back_to_start() {
        let mut canvas = ready_canvas();
        let initial = canvas.current_snapshot().clone();

        canvas.set_tool(Tool::Draw).expect("tool");
        drag(&mut canvas, (10.0, 10.0), (60.0, 40.0));
        canvas.set_tool(Tool::Erase).expect("tool");
        drag(&mut canvas, (10.0, 10.0), (30.0, 30.0));
        canvas.add_line().expect("line");
        canvas.delete_selection().expect("delete");
        assert_eq!(canvas.history_len(), 5);

        for _ in 0..4 {
            assert!(canvas.undo().expect("undo"));
        }
        assert_eq!(canvas.history_len(), 1);
        assert!(canvas.surface().objects().is_empty());
        assert_eq!(canvas.surface().snapshot().expect("snapshot"), initial);
    }

    #[test]
    fn undo_at_the_boundary_changes_nothing() {
        let mut canvas = ready_canvas();
        let before = canvas.surface().snapshot().expect("snapshot");
        assert!(!canvas.undo().expect("undo"));
        assert!(!canvas.undo().expect("undo"));
        assert_eq!(canvas.history_len(), 1);
        assert_eq!(canvas.surface().snapshot().expect("snapshot"), before);
    }

    #[test]
    fn undo_restores_the_previous_state_exactly_without_new_entries() {
        let mut canvas = ready_canvas();
        canvas.add_line().expect("line");
        let after_first = canvas.current_snapshot().clone();

        canvas.set_tool(Tool::Draw).expect("tool");
        drag(&mut canvas, (100.0, 100.0), (200.0, 150.0));
        assert_eq!(canvas.history_len(), 3);

        assert!(canvas.undo().expect("undo"));
        assert_eq!(canvas.history_len(), 2);
        assert_eq!(canvas.surface().snapshot().expect("snapshot"), after_first);
        assert_eq!(canvas.surface().objects().len(), 1);
    }

    #[test]
    fn deleting_several_objects_undoes_one_at_a_time() {
        let mut canvas = ready_canvas();
        canvas.set_tool(Tool::Draw).expect("tool");
        drag(&mut canvas, (10.0, 10.0), (40.0, 40.0));
        drag(&mut canvas, (700.0, 500.0), (750.0, 550.0));
        canvas.set_tool(Tool::Select).expect("tool");
        drag(&mut canvas, (0.0, 0.0), (799.0, 599.0));
        assert_eq!(canvas.selection().len(), 2);
        let before = canvas.history_len();

        assert_eq!(canvas.delete_selection().expect("delete"), 2);
        assert_eq!(canvas.history_len(), before + 2);
        assert!(canvas.surface().objects().is_empty());

        assert!(canvas.undo().expect("undo"));
        assert_eq!(canvas.surface().objects().len(), 1);
        assert!(canvas.undo().expect("undo"));
        assert_eq!(canvas.surface().objects().len(), 2);
    }

    #[test]
    fn switching_tools_never_touches_objects() {
        let mut canvas = ready_canvas();
        canvas.set_tool(Tool::Draw).expect("tool");
        drag(&mut canvas, (10.0, 10.0), (80.0, 90.0));
        canvas.add_line().expect("line");
        let objects = canvas.surface().objects().to_vec();
        let history = canvas.history_len();

        for tool in [Tool::Select, Tool::Erase, Tool::Draw, Tool::Select] {
            canvas.set_tool(tool).expect("tool");
            assert_eq!(canvas.surface().objects(), objects.as_slice());
        }

        // A move in progress is reverted, not committed, when the mode changes.
        assert!(canvas.pointer_down(Point::new(400.0, 300.0)));
        canvas.pointer_move(Point::new(450.0, 320.0), Modifiers::default());
        assert_ne!(canvas.surface().objects(), objects.as_slice());
        canvas.set_tool(Tool::Draw).expect("tool");
        assert_eq!(canvas.surface().objects(), objects.as_slice());
        assert_eq!(canvas.history_len(), history);
    }

    #[test]
    fn add_line_inserts_one_centred_line_and_returns_to_select() {
        for prior in [Tool::Select, Tool::Draw, Tool::Erase] {
            let mut canvas = ready_canvas();
            canvas.set_tool(prior).expect("tool");
            canvas.set_tool(Tool::Line).expect("line");

            assert_eq!(canvas.tool(), Tool::Select);
            let objects = canvas.surface().objects();
            assert_eq!(objects.len(), 1);
            assert_eq!(
                objects[0].kind,
                AnnotationKind::Line {
                    from: Point::new(350.0, 250.0),
                    to: Point::new(450.0, 350.0),
                }
            );
            assert_eq!(canvas.selection(), &[objects[0].id]);
            assert_eq!(canvas.history_len(), 2);
        }
    }

    #[test]
    fn eraser_paints_over_instead_of_removing() {
        let mut canvas = ready_canvas();
        canvas.set_tool(Tool::Draw).expect("tool");
        drag(&mut canvas, (10.0, 10.0), (50.0, 10.0));
        canvas.set_tool(Tool::Erase).expect("tool");
        drag(&mut canvas, (10.0, 10.0), (50.0, 10.0));

        let objects = canvas.surface().objects();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].color, [255, 0, 0, 255]);
        assert_eq!(objects[0].stroke_width, 2.0);
        assert_eq!(objects[1].color, SURFACE_FILL);
        assert_eq!(objects[1].stroke_width, 20.0);
    }

    #[test]
    fn shift_draws_a_straight_stroke() {
        let mut canvas = ready_canvas();
        canvas.set_tool(Tool::Draw).expect("tool");
        let shift = Modifiers { shift: true };
        assert!(canvas.pointer_down(Point::new(0.0, 0.0)));
        canvas.pointer_move(Point::new(30.0, 70.0), shift);
        canvas.pointer_move(Point::new(60.0, 10.0), shift);
        canvas.pointer_up(Point::new(100.0, 100.0), shift).expect("up");

        match &canvas.surface().objects()[0].kind {
            AnnotationKind::Freehand { points } => {
                assert_eq!(points, &vec![Point::new(0.0, 0.0), Point::new(100.0, 100.0)]);
            }
            other => panic!("expected a freehand stroke, got {other:?}"),
        }
    }

    #[test]
    fn moving_a_selection_records_one_snapshot() {
        let mut canvas = ready_canvas();
        canvas.add_line().expect("line");
        drag(&mut canvas, (400.0, 300.0), (420.0, 310.0));
        assert_eq!(canvas.history_len(), 3);
        assert_eq!(
            canvas.surface().objects()[0].kind,
            AnnotationKind::Line {
                from: Point::new(370.0, 260.0),
                to: Point::new(470.0, 360.0),
            }
        );

        // A click without movement selects but records nothing.
        drag(&mut canvas, (420.0, 310.0), (420.0, 310.0));
        assert_eq!(canvas.history_len(), 3);
    }

    #[test]
    fn marquee_selects_intersecting_objects() {
        let mut canvas = ready_canvas();
        canvas.set_tool(Tool::Draw).expect("tool");
        drag(&mut canvas, (10.0, 10.0), (40.0, 40.0));
        drag(&mut canvas, (700.0, 500.0), (750.0, 550.0));
        canvas.set_tool(Tool::Select).expect("tool");

        drag(&mut canvas, (0.0, 0.0), (100.0, 100.0));
        assert_eq!(canvas.selection().len(), 1);

        drag(&mut canvas, (0.0, 0.0), (799.0, 599.0));
        assert_eq!(canvas.selection().len(), 2);
        assert_eq!(canvas.history_len(), 3);
    }

    #[test]
    fn failed_background_keeps_canvas_inert() {
        let mut canvas =
            AnnotationCanvas::new(SurfaceSize::new(800, 600), SURFACE_FILL, "memory://missing")
                .expect("canvas");
        canvas
            .finish_loading(Err("404".to_string()))
            .expect("settle");

        assert!(!canvas.is_ready());
        assert_eq!(canvas.load_failure(), Some("404"));
        assert!(!canvas.pointer_down(Point::new(1.0, 1.0)));
        assert!(matches!(canvas.add_line(), Err(CanvasError::NotReady)));
        assert!(matches!(canvas.export_png(), Err(CanvasError::NotReady)));
        assert_eq!(canvas.history_len(), 1);
    }

    #[test]
    fn undecodable_background_is_a_load_failure() {
        let mut canvas =
            AnnotationCanvas::new(SurfaceSize::new(80, 60), SURFACE_FILL, "memory://junk")
                .expect("canvas");
        assert!(canvas.load_background_bytes(b"not an image").is_err());
        assert!(canvas.load_failure().is_some());
    }

    #[test]
    fn export_matches_surface_size() {
        let canvas = ready_canvas();
        let image = canvas.export_image().expect("export");
        assert_eq!(image.dimensions(), (800, 600));

        for (width, height) in [(2000, 1500), (100, 900)] {
            let mut canvas =
                AnnotationCanvas::new(SurfaceSize::new(800, 600), SURFACE_FILL, "memory://big")
                    .expect("canvas");
            canvas
                .finish_loading(Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                    width,
                    height,
                    Rgba([20, 120, 40, 255]),
                ))))
                .expect("load");
            let image = canvas.export_image().expect("export");
            assert_eq!(image.dimensions(), (800, 600), "background {width}x{height}");
        }
    }

    #[test]
    fn save_uploads_png_and_returns_public_url() {
        let canvas = ready_canvas();
        let backend = MemoryBackend::new("survey_images");
        let url = canvas
            .save(&backend, "annotations/a.png", 3600)
            .expect("save");
        assert!(url.ends_with("/survey_images/annotations/a.png"));
        let bytes = backend.fetch(&url).expect("fetch");
        let decoded = image::load_from_memory(&bytes).expect("png");
        assert_eq!((decoded.width(), decoded.height()), (800, 600));
    }

    #[test]
    fn save_reports_store_failures() {
        let canvas = ready_canvas();
        let backend = MemoryBackend::new("survey_images");
        backend.set_offline(true);
        assert!(matches!(
            canvas.save(&backend, "annotations/a.png", 3600),
            Err(CanvasError::Store(_))
        ));
    }
}
