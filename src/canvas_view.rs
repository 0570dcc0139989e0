use egui::{
    vec2, Align2, Color32, ColorImage, Context, FontId, Painter, Pos2, Rect, Response, ScrollArea,
    Sense, Shape, Stroke, TextureHandle, TextureOptions, Ui, Vec2,
};
use tracing::error;

use crate::theme::AppTheme;
use markup_survey::annotation::{Annotation, AnnotationKind, Point};
use markup_survey::canvas::{AnnotationCanvas, Modifiers, HANDLE_RADIUS};
use markup_survey::surface::SurfaceSize;

const CANVAS_MARGIN: f32 = 24.0;

/// GPU copy of the background image, tied to the URL it was made from.
pub struct BackgroundTexture {
    url: String,
    handle: TextureHandle,
}

/// Uploads the canvas background once it is ready; drops a texture that
/// belongs to another image.
pub fn ensure_background_texture(
    ctx: &Context,
    slot: &mut Option<BackgroundTexture>,
    canvas: &AnnotationCanvas,
) {
    if slot
        .as_ref()
        .is_some_and(|texture| texture.url != canvas.image_url())
    {
        *slot = None;
    }
    if slot.is_some() {
        return;
    }
    let Some(layer) = canvas.surface().background_layer() else {
        return;
    };
    let rgba = layer.pixels.to_rgba8();
    let size = [rgba.width() as usize, rgba.height() as usize];
    let color = ColorImage::from_rgba_unmultiplied(size, rgba.as_raw());
    let handle = ctx.load_texture("survey-background", color, TextureOptions::LINEAR);
    *slot = Some(BackgroundTexture {
        url: canvas.image_url().to_string(),
        handle,
    });
}

/// Largest zoom at or below 1.0 that fits the surface in `available`.
pub fn fit_zoom(surface: SurfaceSize, available: Vec2) -> f32 {
    let zoom_x = available.x / surface.width.max(1) as f32;
    let zoom_y = available.y / surface.height.max(1) as f32;
    zoom_x.min(zoom_y).clamp(0.1, 1.0)
}

pub fn show_canvas(
    ui: &mut Ui,
    theme: &AppTheme,
    canvas: &mut AnnotationCanvas,
    texture: Option<&BackgroundTexture>,
) {
    let size = canvas.surface().size();
    let available = ui.available_size();
    let zoom = fit_zoom(size, available - vec2(CANVAS_MARGIN, CANVAS_MARGIN));
    let scaled = vec2(size.width as f32, size.height as f32) * zoom;
    let area = vec2(
        (scaled.x + CANVAS_MARGIN).max(available.x),
        (scaled.y + CANVAS_MARGIN).max(available.y),
    );

    ScrollArea::both()
        .id_source("survey_canvas_scroll")
        .show(ui, |ui| {
            let (area_rect, response) = ui.allocate_exact_size(area, Sense::click_and_drag());
            let origin = Pos2::new(
                area_rect.center().x - scaled.x * 0.5,
                area_rect.center().y - scaled.y * 0.5,
            );
            let image_rect = Rect::from_min_size(origin, scaled);

            let painter = ui.painter_at(area_rect);
            painter.rect_filled(
                image_rect.expand(1.0),
                0.0,
                theme.surfaces.stroke_strong,
            );

            let surface_painter = painter.with_clip_rect(image_rect);
            draw_surface(&surface_painter, canvas, texture, image_rect, zoom);
            draw_stroke_preview(&surface_painter, canvas, image_rect, zoom);
            draw_selection(&painter, theme, canvas, image_rect, zoom);
            draw_marquee(&painter, theme, canvas, image_rect, zoom);

            if canvas.is_ready() {
                handle_pointer_interaction(ui.ctx(), canvas, &response, image_rect, zoom);
            } else {
                draw_loading_overlay(&painter, theme, image_rect);
            }
        });
}

fn draw_surface(
    painter: &Painter,
    canvas: &AnnotationCanvas,
    texture: Option<&BackgroundTexture>,
    image_rect: Rect,
    zoom: f32,
) {
    let surface = canvas.surface();
    let [r, g, b, a] = surface.fill();
    painter.rect_filled(
        image_rect,
        0.0,
        Color32::from_rgba_unmultiplied(r, g, b, a),
    );

    if let (Some(layer), Some(texture)) = (surface.background_layer(), texture) {
        let (width, height) = layer.placement.drawn_size();
        painter.image(
            texture.handle.id(),
            Rect::from_min_size(image_rect.min, vec2(width, height) * zoom),
            Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
            Color32::WHITE,
        );
    }

    for annotation in surface.objects() {
        draw_annotation(painter, annotation, image_rect, zoom);
    }
}

fn draw_annotation(painter: &Painter, annotation: &Annotation, image_rect: Rect, zoom: f32) {
    let [r, g, b, a] = annotation.color;
    let color = Color32::from_rgba_unmultiplied(r, g, b, a);
    let width = (annotation.stroke_width * zoom).max(1.0);

    match &annotation.kind {
        AnnotationKind::Freehand { points } => {
            draw_polyline(painter, points, image_rect, zoom, width, color)
        }
        AnnotationKind::Line { from, to } => {
            painter.line_segment(
                [
                    image_to_screen(*from, image_rect, zoom),
                    image_to_screen(*to, image_rect, zoom),
                ],
                Stroke::new(width, color),
            );
        }
    }
}

fn draw_polyline(
    painter: &Painter,
    points: &[Point],
    image_rect: Rect,
    zoom: f32,
    width: f32,
    color: Color32,
) {
    let screen: Vec<Pos2> = points
        .iter()
        .map(|point| image_to_screen(*point, image_rect, zoom))
        .collect();

    if let [single] = screen.as_slice() {
        painter.circle_filled(*single, width * 0.5, color);
        return;
    }
    // Wide strokes get round joins and caps.
    if width >= 4.0 {
        for pos in &screen {
            painter.circle_filled(*pos, width * 0.5, color);
        }
    }
    painter.add(Shape::line(screen, Stroke::new(width, color)));
}

fn draw_stroke_preview(painter: &Painter, canvas: &AnnotationCanvas, image_rect: Rect, zoom: f32) {
    let Some((brush, points)) = canvas.stroke_preview() else {
        return;
    };
    let [r, g, b, a] = brush.color;
    draw_polyline(
        painter,
        points,
        image_rect,
        zoom,
        (brush.width * zoom).max(1.0),
        Color32::from_rgba_unmultiplied(r, g, b, a),
    );
}

fn draw_selection(
    painter: &Painter,
    theme: &AppTheme,
    canvas: &AnnotationCanvas,
    image_rect: Rect,
    zoom: f32,
) {
    let accent = theme.surfaces.accent;
    for id in canvas.selection() {
        let Some(annotation) = canvas.surface().find(*id) else {
            continue;
        };
        let bounds = annotation.bounds();
        let selection_rect = Rect::from_min_max(
            image_to_screen(Point::from_pos2(bounds.min), image_rect, zoom),
            image_to_screen(Point::from_pos2(bounds.max), image_rect, zoom),
        );
        painter.rect_stroke(selection_rect, 2.0, Stroke::new(1.5, accent));
    }

    for (_, point) in canvas.selection_handles() {
        let pos = image_to_screen(point, image_rect, zoom);
        painter.circle_filled(pos, HANDLE_RADIUS * zoom.max(0.75), Color32::WHITE);
        painter.circle_stroke(pos, HANDLE_RADIUS * zoom.max(0.75), Stroke::new(1.5, accent));
    }
}

fn draw_marquee(
    painter: &Painter,
    theme: &AppTheme,
    canvas: &AnnotationCanvas,
    image_rect: Rect,
    zoom: f32,
) {
    let Some(area) = canvas.marquee() else {
        return;
    };
    let rect = Rect::from_min_max(
        image_to_screen(Point::from_pos2(area.min), image_rect, zoom),
        image_to_screen(Point::from_pos2(area.max), image_rect, zoom),
    );
    let accent = theme.surfaces.accent;
    painter.rect_filled(
        rect,
        0.0,
        Color32::from_rgba_unmultiplied(accent.r(), accent.g(), accent.b(), 30),
    );
    painter.rect_stroke(rect, 0.0, Stroke::new(1.0, accent));
}

/// Stays up for a background that failed to load; there is no retry.
fn draw_loading_overlay(painter: &Painter, theme: &AppTheme, image_rect: Rect) {
    painter.rect_filled(
        image_rect,
        0.0,
        Color32::from_rgba_unmultiplied(255, 255, 255, 200),
    );
    painter.text(
        image_rect.center(),
        Align2::CENTER_CENTER,
        "Loading image...",
        FontId::proportional(16.0),
        theme.text.secondary,
    );
}

fn handle_pointer_interaction(
    ctx: &Context,
    canvas: &mut AnnotationCanvas,
    response: &Response,
    image_rect: Rect,
    zoom: f32,
) {
    let (pointer, modifiers) = ctx.input(|input| {
        (
            input.pointer.clone(),
            Modifiers {
                shift: input.modifiers.shift,
            },
        )
    });

    if response.drag_started() {
        if let Some(origin) = pointer.press_origin() {
            canvas.pointer_down(screen_to_image(origin, image_rect, zoom));
        }
    }

    let Some(pointer_pos) = pointer.interact_pos() else {
        return;
    };
    let image_pos = screen_to_image(pointer_pos, image_rect, zoom);

    if response.dragged() {
        canvas.pointer_move(image_pos, modifiers);
    }

    if response.drag_stopped() {
        if let Err(err) = canvas.pointer_up(image_pos, modifiers) {
            error!(error = %err, "cannot finish canvas gesture");
        }
    }

    if response.clicked() && canvas.pointer_down(image_pos) {
        if let Err(err) = canvas.pointer_up(image_pos, modifiers) {
            error!(error = %err, "cannot finish canvas click");
        }
    }
}

fn image_to_screen(pos: Point, image_rect: Rect, zoom: f32) -> Pos2 {
    Pos2::new(
        image_rect.min.x + pos.x * zoom,
        image_rect.min.y + pos.y * zoom,
    )
}

fn screen_to_image(pos: Pos2, image_rect: Rect, zoom: f32) -> Point {
    Point::new(
        (pos.x - image_rect.min.x) / zoom,
        (pos.y - image_rect.min.y) / zoom,
    )
}

#[cfg(test)]
mod tests {
    use egui::{vec2, Pos2, Rect};

    use super::{fit_zoom, image_to_screen, screen_to_image};
    use markup_survey::annotation::Point;
    use markup_survey::surface::SurfaceSize;

    #[test]
    fn fit_zoom_never_enlarges() {
        let size = SurfaceSize::new(800, 600);
        assert_eq!(fit_zoom(size, vec2(2000.0, 2000.0)), 1.0);
        assert_eq!(fit_zoom(size, vec2(400.0, 600.0)), 0.5);
        assert_eq!(fit_zoom(size, vec2(800.0, 150.0)), 0.25);
    }

    #[test]
    fn screen_and_image_coordinates_agree() {
        let image_rect = Rect::from_min_size(Pos2::new(100.0, 50.0), vec2(400.0, 300.0));
        let point = screen_to_image(Pos2::new(300.0, 200.0), image_rect, 0.5);
        assert_eq!(point, Point::new(400.0, 300.0));
        assert_eq!(
            image_to_screen(point, image_rect, 0.5),
            Pos2::new(300.0, 200.0)
        );
    }
}
