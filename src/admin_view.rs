use std::collections::HashMap;

use egui::{vec2, Align, ColorImage, Grid, Layout, RichText, ScrollArea, Sense, TextureHandle, Ui};

use crate::theme::AppTheme;
use crate::ui_controls;
use markup_survey::backend::ImageDescriptor;

const THUMBNAIL_SIDE: u32 = 160;
const CARD_WIDTH: f32 = 200.0;

#[derive(Clone, Debug, PartialEq)]
pub enum AdminAction {
    Back,
    Upload,
    Delete(ImageDescriptor),
}

pub enum Thumbnail {
    Loading,
    Ready(TextureHandle),
    Failed,
}

pub type Thumbnails = HashMap<String, Thumbnail>;

/// Decodes and shrinks an image to fit a thumbnail cell.
pub fn make_thumbnail(bytes: &[u8]) -> Result<ColorImage, image::ImageError> {
    let rgba = image::load_from_memory(bytes)?
        .thumbnail(THUMBNAIL_SIDE, THUMBNAIL_SIDE)
        .to_rgba8();
    let size = [rgba.width() as usize, rgba.height() as usize];
    Ok(ColorImage::from_rgba_unmultiplied(size, rgba.as_raw()))
}

pub fn columns_for_width(width: f32, gap: f32) -> usize {
    (((width + gap) / (CARD_WIDTH + gap)).floor() as usize).max(1)
}

pub fn show_admin(
    ui: &mut Ui,
    theme: &AppTheme,
    images: &[ImageDescriptor],
    thumbnails: &Thumbnails,
    busy: bool,
) -> Option<AdminAction> {
    let mut action = None;

    ui.horizontal(|ui| {
        if ui_controls::ghost_button(ui, theme, "← Back to Survey", vec2(140.0, 32.0)).clicked() {
            action = Some(AdminAction::Back);
        }
        ui.add_space(theme.layout.space_3);
        ui.heading("Image Management");

        ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
            let label = if busy { "Working..." } else { "Upload Images" };
            if ui_controls::primary_button(ui, theme, label, vec2(140.0, 32.0), !busy).clicked() {
                action = Some(AdminAction::Upload);
            }
            if busy {
                ui.spinner();
            }
        });
    });
    ui.add_space(theme.layout.space_4);

    if images.is_empty() {
        ui.centered_and_justified(|ui| {
            ui.label(
                RichText::new("No images uploaded yet.")
                    .color(theme.text.muted)
                    .size(16.0),
            );
        });
        return action;
    }

    let gap = theme.layout.space_4;
    let columns = columns_for_width(ui.available_width(), gap);

    ScrollArea::vertical()
        .id_source("admin_image_grid")
        .show(ui, |ui| {
            Grid::new("admin_images")
                .spacing(vec2(gap, gap))
                .show(ui, |ui| {
                    for (index, image) in images.iter().enumerate() {
                        if image_card(ui, theme, image, thumbnails.get(&image.id), busy) {
                            action = Some(AdminAction::Delete(image.clone()));
                        }
                        if (index + 1) % columns == 0 {
                            ui.end_row();
                        }
                    }
                });
        });

    action
}

/// Returns true when Delete was clicked.
fn image_card(
    ui: &mut Ui,
    theme: &AppTheme,
    image: &ImageDescriptor,
    thumbnail: Option<&Thumbnail>,
    busy: bool,
) -> bool {
    let mut delete = false;
    ui_controls::card_frame(theme).show(ui, |ui| {
        ui.set_width(CARD_WIDTH - theme.layout.space_4 * 2.0);
        ui.vertical(|ui| {
            let side = THUMBNAIL_SIDE as f32;
            match thumbnail {
                Some(Thumbnail::Ready(texture)) => {
                    let fitted = texture.size_vec2() * (side / texture.size_vec2().max_elem());
                    ui.allocate_ui(vec2(side, side), |ui| {
                        ui.centered_and_justified(|ui| {
                            ui.image((texture.id(), fitted));
                        });
                    });
                }
                Some(Thumbnail::Failed) => placeholder(ui, theme, side, "Preview unavailable"),
                Some(Thumbnail::Loading) | None => placeholder(ui, theme, side, "Loading..."),
            }

            ui.add_space(theme.layout.space_2);
            ui.label(RichText::new(&image.file_name).strong().color(theme.text.primary))
                .on_hover_text(&image.file_path);
            ui.label(
                RichText::new(format!("Responses: {}", image.response_count))
                    .size(12.0)
                    .color(theme.text.muted),
            );
            ui.label(
                RichText::new(image.created_at.format("%Y-%m-%d %H:%M").to_string())
                    .size(12.0)
                    .color(theme.text.muted),
            );
            ui.add_space(theme.layout.space_1);
            if ui_controls::danger_button(ui, theme, "Delete", vec2(72.0, 28.0), !busy).clicked() {
                delete = true;
            }
        });
    });
    delete
}

fn placeholder(ui: &mut Ui, theme: &AppTheme, side: f32, text: &str) {
    let (rect, _) = ui.allocate_exact_size(vec2(side, side), Sense::hover());
    ui.painter().rect_filled(rect, 4.0, theme.surfaces.card_bg_alt);
    ui.painter().text(
        rect.center(),
        egui::Align2::CENTER_CENTER,
        text,
        egui::FontId::proportional(12.0),
        theme.text.muted,
    );
}
