use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, ImageFormat, RgbaImage};
use tiny_skia::{
    Color, ColorU8, FillRule, FilterQuality, IntSize, LineCap, LineJoin, Paint, PathBuilder,
    Pixmap, PixmapPaint, Stroke, Transform,
};

use crate::annotation::{Annotation, AnnotationKind, Point};
use crate::surface::{BackgroundLayer, DrawingSurface};

/// Renders fill, background and every annotation at the surface's own size.
pub fn flatten(surface: &DrawingSurface) -> Result<RgbaImage> {
    let size = surface.size();
    let mut pixmap =
        Pixmap::new(size.width, size.height).ok_or_else(|| anyhow!("cannot allocate pixmap"))?;

    let [r, g, b, a] = surface.fill();
    pixmap.fill(Color::from_rgba8(r, g, b, a));

    if let Some(layer) = surface.background_layer() {
        draw_background(&mut pixmap, layer)?;
    }

    for annotation in surface.objects() {
        draw_annotation(&mut pixmap, annotation)?;
    }

    pixmap_to_image(&pixmap)
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut buffer, ImageFormat::Png)
        .context("cannot encode PNG")?;
    Ok(buffer.into_inner())
}

fn draw_background(pixmap: &mut Pixmap, layer: &BackgroundLayer) -> Result<()> {
    let source = image_to_pixmap(&layer.pixels)?;
    let scale = layer.placement.scale;
    let paint = PixmapPaint {
        quality: FilterQuality::Bicubic,
        ..PixmapPaint::default()
    };
    pixmap.draw_pixmap(
        0,
        0,
        source.as_ref(),
        &paint,
        Transform::from_scale(scale, scale),
        None,
    );
    Ok(())
}

fn image_to_pixmap(image: &DynamicImage) -> Result<Pixmap> {
    let rgba = image.to_rgba8();
    let size = IntSize::from_wh(rgba.width(), rgba.height())
        .ok_or_else(|| anyhow!("background image has no pixels"))?;
    // tiny-skia stores premultiplied alpha.
    let mut data = Vec::with_capacity(rgba.as_raw().len());
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        let premultiplied = ColorU8::from_rgba(r, g, b, a).premultiply();
        data.extend_from_slice(&[
            premultiplied.red(),
            premultiplied.green(),
            premultiplied.blue(),
            premultiplied.alpha(),
        ]);
    }
    Pixmap::from_vec(data, size).ok_or_else(|| anyhow!("cannot wrap background pixels"))
}

fn pixmap_to_image(pixmap: &Pixmap) -> Result<RgbaImage> {
    let mut data = Vec::with_capacity(pixmap.data().len());
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        data.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }
    RgbaImage::from_raw(pixmap.width(), pixmap.height(), data)
        .ok_or_else(|| anyhow!("cannot construct output image"))
}

fn draw_annotation(pixmap: &mut Pixmap, annotation: &Annotation) -> Result<()> {
    let mut paint = Paint::default();
    let [r, g, b, a] = annotation.color;
    paint.set_color_rgba8(r, g, b, a);
    paint.anti_alias = true;

    match &annotation.kind {
        AnnotationKind::Line { from, to } => {
            let stroke = Stroke {
                width: annotation.stroke_width,
                ..Default::default()
            };
            let mut pb = PathBuilder::new();
            pb.move_to(from.x, from.y);
            pb.line_to(to.x, to.y);
            // A collapsed line has no area to paint.
            if let Some(path) = pb.finish() {
                pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
            }
        }
        AnnotationKind::Freehand { points } => {
            if is_dot(points) {
                let center = points[0];
                let path = PathBuilder::from_circle(
                    center.x,
                    center.y,
                    (annotation.stroke_width * 0.5).max(0.5),
                )
                .ok_or_else(|| anyhow!("cannot build dot"))?;
                pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
                return Ok(());
            }

            let stroke = Stroke {
                width: annotation.stroke_width,
                line_cap: LineCap::Round,
                line_join: LineJoin::Round,
                ..Default::default()
            };
            let path = smooth_path(points).ok_or_else(|| anyhow!("cannot build stroke path"))?;
            pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        }
    }

    Ok(())
}

fn is_dot(points: &[Point]) -> bool {
    match points.first() {
        Some(first) => points.iter().all(|p| p.distance(*first) <= f32::EPSILON),
        None => false,
    }
}

/// Quadratic curve through the midpoints of consecutive samples, ending on the last one.
fn smooth_path(points: &[Point]) -> Option<tiny_skia::Path> {
    let (first, rest) = points.split_first()?;
    let mut pb = PathBuilder::new();
    pb.move_to(first.x, first.y);
    if rest.len() == 1 {
        pb.line_to(rest[0].x, rest[0].y);
        return pb.finish();
    }
    for pair in points[1..].windows(2) {
        let control = pair[0];
        let mid = Point::new((pair[0].x + pair[1].x) * 0.5, (pair[0].y + pair[1].y) * 0.5);
        pb.quad_to(control.x, control.y, mid.x, mid.y);
    }
    if let Some(last) = points.last() {
        pb.line_to(last.x, last.y);
    }
    pb.finish()
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgba, RgbaImage};

    use super::{encode_png, flatten};
    use crate::annotation::{Annotation, AnnotationKind, Point, SURFACE_FILL};
    use crate::surface::{DrawingSurface, SurfaceSize};

    fn assert_close(actual: Rgba<u8>, expected: [u8; 4]) {
        let near = actual
            .0
            .iter()
            .zip(expected.iter())
            .all(|(a, e)| a.abs_diff(*e) <= 2);
        assert!(near, "pixel {:?} is not close to {:?}", actual.0, expected);
    }

    fn surface_with_background(width: u32, height: u32) -> DrawingSurface {
        let mut surface = DrawingSurface::new(SurfaceSize::new(200, 100), SURFACE_FILL, "bg");
        surface.attach_background(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([0, 0, 255, 255]),
        )));
        surface
    }

    #[test]
    fn flatten_uses_surface_size_not_image_size() {
        for (w, h) in [(1600, 400), (20, 30), (200, 100)] {
            let surface = surface_with_background(w, h);
            let output = flatten(&surface).expect("flatten should succeed");
            assert_eq!(output.dimensions(), (200, 100));
        }
    }

    #[test]
    fn background_is_scaled_into_top_left() {
        // 400x100 scaled by 0.5 covers the top 50 rows only.
        let surface = surface_with_background(400, 100);
        let output = flatten(&surface).expect("flatten should succeed");
        assert_close(*output.get_pixel(100, 20), [0, 0, 255, 255]);
        assert_close(*output.get_pixel(100, 90), SURFACE_FILL);
    }

    #[test]
    fn annotations_are_painted_over_background() {
        let mut surface = surface_with_background(200, 100);
        surface.add(Annotation {
            id: 1,
            kind: AnnotationKind::Line {
                from: Point::new(0.0, 50.0),
                to: Point::new(200.0, 50.0),
            },
            color: [255, 0, 0, 255],
            stroke_width: 6.0,
            selectable: true,
        });
        surface.add(Annotation {
            id: 2,
            kind: AnnotationKind::Freehand {
                points: vec![Point::new(150.0, 10.0), Point::new(150.0, 10.0)],
            },
            color: SURFACE_FILL,
            stroke_width: 20.0,
            selectable: true,
        });
        let output = flatten(&surface).expect("flatten should succeed");
        assert_close(*output.get_pixel(100, 50), [255, 0, 0, 255]);
        assert_close(*output.get_pixel(150, 10), SURFACE_FILL);
        assert_close(*output.get_pixel(20, 20), [0, 0, 255, 255]);
    }

    #[test]
    fn png_bytes_decode_back_to_same_size() {
        let surface = surface_with_background(10, 10);
        let output = flatten(&surface).expect("flatten should succeed");
        let png = encode_png(&output).expect("encode");
        assert_eq!(&png[1..4], b"PNG");
        let decoded = image::load_from_memory(&png).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
    }
}
