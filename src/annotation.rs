use egui::{Pos2, Rect, Vec2};
use serde::{Deserialize, Serialize};

pub type AnnotationId = u64;

/// Stroke colour used by the pen and the line tool.
pub const MARKUP_RED: [u8; 4] = [0xFF, 0x00, 0x00, 0xFF];
/// Default fill of a drawing surface; the eraser paints with it.
pub const SURFACE_FILL: [u8; 4] = [0xF5, 0xF5, 0xF5, 0xFF];

pub const PEN_WIDTH: f32 = 2.0;
pub const ERASER_WIDTH: f32 = 20.0;
/// Half the horizontal (and vertical) extent of the line inserted by the line tool.
pub const LINE_HALF_EXTENT: f32 = 50.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Tool {
    Select,
    Draw,
    Erase,
    /// Momentary: inserts a line and hands control back to `Select`.
    Line,
}

impl Tool {
    pub fn is_momentary(self) -> bool {
        matches!(self, Self::Line)
    }

    pub fn paints(self) -> bool {
        matches!(self, Self::Draw | Self::Erase)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Select => "Select",
            Self::Draw => "Draw",
            Self::Erase => "Eraser",
            Self::Line => "Add Line",
        }
    }
}

/// Colour and width a painting tool lays down.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Brush {
    pub color: [u8; 4],
    pub width: f32,
}

impl Brush {
    pub fn for_tool(tool: Tool, surface_fill: [u8; 4]) -> Option<Self> {
        match tool {
            Tool::Draw => Some(Self {
                color: MARKUP_RED,
                width: PEN_WIDTH,
            }),
            Tool::Erase => Some(Self {
                color: surface_fill,
                width: ERASER_WIDTH,
            }),
            Tool::Select | Tool::Line => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn to_pos2(self) -> Pos2 {
        Pos2::new(self.x, self.y)
    }

    pub fn from_pos2(value: Pos2) -> Self {
        Self {
            x: value.x,
            y: value.y,
        }
    }

    pub fn delta(self, other: Point) -> Vec2 {
        Vec2::new(other.x - self.x, other.y - self.y)
    }

    pub fn distance(self, other: Point) -> f32 {
        self.delta(other).length()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Handle {
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
    LineFrom,
    LineTo,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Annotation {
    pub id: AnnotationId,
    pub kind: AnnotationKind,
    pub color: [u8; 4],
    pub stroke_width: f32,
    pub selectable: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationKind {
    Freehand { points: Vec<Point> },
    Line { from: Point, to: Point },
}

impl Annotation {
    pub fn is_line(&self) -> bool {
        matches!(self.kind, AnnotationKind::Line { .. })
    }

    /// Tight bounds of the geometry, without stroke padding.
    pub fn geometry_bounds(&self) -> Rect {
        match &self.kind {
            AnnotationKind::Freehand { points } => {
                let mut rect = Rect::NOTHING;
                for point in points {
                    rect.extend_with(point.to_pos2());
                }
                rect
            }
            AnnotationKind::Line { from, to } => Rect::from_two_pos(from.to_pos2(), to.to_pos2()),
        }
    }

    pub fn bounds(&self) -> Rect {
        self.geometry_bounds().expand(self.stroke_width * 0.5)
    }

    pub fn contains(&self, point: Point, tolerance: f32) -> bool {
        let p = point.to_pos2();
        let reach = tolerance + self.stroke_width * 0.5;
        match &self.kind {
            AnnotationKind::Line { from, to } => {
                distance_to_segment(p, from.to_pos2(), to.to_pos2()) <= reach
            }
            AnnotationKind::Freehand { points } => match points.as_slice() {
                [] => false,
                [only] => only.to_pos2().distance(p) <= reach,
                _ => points
                    .windows(2)
                    .any(|pair| distance_to_segment(p, pair[0].to_pos2(), pair[1].to_pos2()) <= reach),
            },
        }
    }

    pub fn move_by(&mut self, delta: Vec2) {
        let move_point = |p: &mut Point| {
            p.x += delta.x;
            p.y += delta.y;
        };
        match &mut self.kind {
            AnnotationKind::Freehand { points } => points.iter_mut().for_each(move_point),
            AnnotationKind::Line { from, to } => {
                move_point(from);
                move_point(to);
            }
        }
    }

    pub fn handles(&self) -> Vec<(Handle, Point)> {
        match &self.kind {
            AnnotationKind::Line { from, to } => {
                vec![(Handle::LineFrom, *from), (Handle::LineTo, *to)]
            }
            AnnotationKind::Freehand { .. } => {
                let r = self.geometry_bounds();
                vec![
                    (Handle::TopLeft, Point::from_pos2(r.left_top())),
                    (Handle::TopRight, Point::from_pos2(r.right_top())),
                    (Handle::BottomRight, Point::from_pos2(r.right_bottom())),
                    (Handle::BottomLeft, Point::from_pos2(r.left_bottom())),
                ]
            }
        }
    }

    pub fn resize_from_handle(&mut self, handle: Handle, to: Point) {
        let bounds = self.geometry_bounds();
        match &mut self.kind {
            AnnotationKind::Line { from, to: target } => match handle {
                Handle::LineFrom => *from = to,
                Handle::LineTo => *target = to,
                _ => {}
            },
            AnnotationKind::Freehand { points } => {
                let (corner, anchor) = match handle {
                    Handle::TopLeft => (bounds.left_top(), bounds.right_bottom()),
                    Handle::TopRight => (bounds.right_top(), bounds.left_bottom()),
                    Handle::BottomRight => (bounds.right_bottom(), bounds.left_top()),
                    Handle::BottomLeft => (bounds.left_bottom(), bounds.right_top()),
                    Handle::LineFrom | Handle::LineTo => return,
                };
                let sx = axis_scale(corner.x, anchor.x, to.x);
                let sy = axis_scale(corner.y, anchor.y, to.y);
                for point in points.iter_mut() {
                    point.x = anchor.x + (point.x - anchor.x) * sx;
                    point.y = anchor.y + (point.y - anchor.y) * sy;
                }
            }
        }
    }
}

fn axis_scale(corner: f32, anchor: f32, target: f32) -> f32 {
    let span = corner - anchor;
    if span.abs() <= f32::EPSILON {
        return 1.0;
    }
    (target - anchor) / span
}

fn distance_to_segment(point: Pos2, a: Pos2, b: Pos2) -> f32 {
    let ab = b - a;
    let ap = point - a;
    let ab_len_sq = ab.length_sq();
    if ab_len_sq <= f32::EPSILON {
        return ap.length();
    }
    let t = (ap.dot(ab) / ab_len_sq).clamp(0.0, 1.0);
    let projection = a + ab * t;
    (point - projection).length()
}

#[cfg(test)]
mod tests {
    use super::{Annotation, AnnotationKind, Brush, Handle, Point, Tool, SURFACE_FILL};

    fn stroke(points: &[(f32, f32)]) -> Annotation {
        Annotation {
            id: 1,
            kind: AnnotationKind::Freehand {
                points: points.iter().map(|(x, y)| Point::new(*x, *y)).collect(),
            },
            color: [255, 0, 0, 255],
            stroke_width: 2.0,
            selectable: true,
        }
    }

    #[test]
    fn move_stroke_shifts_every_point() {
        let mut annotation = stroke(&[(10.0, 10.0), (20.0, 30.0)]);
        annotation.move_by(egui::Vec2::new(5.0, -3.0));
        let bounds = annotation.geometry_bounds();
        assert_eq!(bounds.min.x, 15.0);
        assert_eq!(bounds.min.y, 7.0);
        assert_eq!(bounds.max.y, 27.0);
    }

    #[test]
    fn hit_test_follows_polyline() {
        let annotation = stroke(&[(0.0, 0.0), (100.0, 0.0), (100.0, 100.0)]);
        assert!(annotation.contains(Point::new(50.0, 1.5), 1.0));
        assert!(annotation.contains(Point::new(99.0, 60.0), 1.0));
        assert!(!annotation.contains(Point::new(50.0, 50.0), 1.0));
    }

    #[test]
    fn resize_scales_stroke_from_opposite_corner() {
        let mut annotation = stroke(&[(10.0, 10.0), (20.0, 20.0)]);
        annotation.resize_from_handle(Handle::BottomRight, Point::new(30.0, 40.0));
        let bounds = annotation.geometry_bounds();
        assert_eq!(bounds.min, egui::pos2(10.0, 10.0));
        assert_eq!(bounds.max, egui::pos2(30.0, 40.0));
    }

    #[test]
    fn line_handles_move_endpoints() {
        let mut line = Annotation {
            id: 2,
            kind: AnnotationKind::Line {
                from: Point::new(0.0, 0.0),
                to: Point::new(10.0, 10.0),
            },
            color: [255, 0, 0, 255],
            stroke_width: 2.0,
            selectable: true,
        };
        line.resize_from_handle(Handle::LineTo, Point::new(40.0, 5.0));
        assert_eq!(
            line.kind,
            AnnotationKind::Line {
                from: Point::new(0.0, 0.0),
                to: Point::new(40.0, 5.0),
            }
        );
    }

    #[test]
    fn brushes_match_tools() {
        let pen = Brush::for_tool(Tool::Draw, SURFACE_FILL).expect("pen brush");
        assert_eq!(pen.width, 2.0);
        assert_eq!(pen.color, [255, 0, 0, 255]);

        let eraser = Brush::for_tool(Tool::Erase, SURFACE_FILL).expect("eraser brush");
        assert_eq!(eraser.width, 20.0);
        assert_eq!(eraser.color, SURFACE_FILL);

        assert!(Brush::for_tool(Tool::Select, SURFACE_FILL).is_none());
    }
}
