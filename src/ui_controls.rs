use egui::{vec2, Color32, Frame, Margin, RichText, Rounding, Sense, Stroke, Ui, Vec2};

use crate::theme::AppTheme;

pub fn card_frame(theme: &AppTheme) -> Frame {
    Frame::none()
        .fill(theme.surfaces.card_bg)
        .rounding(Rounding::same(theme.controls.card_rounding))
        .stroke(Stroke::new(1.0, theme.surfaces.stroke_soft))
        .shadow(egui::epaint::Shadow {
            offset: vec2(0.0, 1.0),
            blur: 4.0,
            spread: 0.0,
            color: theme.shadows.ambient,
        })
        .inner_margin(Margin::symmetric(
            theme.layout.space_4,
            theme.layout.space_3,
        ))
}

pub fn toolbar_frame(theme: &AppTheme) -> Frame {
    Frame::none()
        .fill(theme.surfaces.card_bg)
        .rounding(Rounding::same(theme.controls.card_rounding))
        .stroke(Stroke::new(1.0, theme.surfaces.stroke_soft))
        .inner_margin(Margin::symmetric(
            theme.layout.panel_padding_x,
            theme.layout.panel_padding_y,
        ))
}

pub fn action_bar_frame(theme: &AppTheme) -> Frame {
    let vertical_padding = ((theme.layout.action_bar_height - theme.controls.action_height) * 0.5)
        .round()
        .max(theme.layout.space_1);

    Frame::none()
        .fill(theme.surfaces.panel_bg)
        .rounding(Rounding::ZERO)
        .inner_margin(Margin::symmetric(
            theme.layout.panel_padding_x,
            vertical_padding,
        ))
}

pub fn tool_chip(
    ui: &mut Ui,
    theme: &AppTheme,
    label: &str,
    selected: bool,
    enabled: bool,
) -> egui::Response {
    let text = if selected {
        RichText::new(label).color(theme.text.on_accent)
    } else {
        RichText::new(label).color(theme.text.secondary)
    };
    let mut button = egui::Button::new(text.size(theme.controls.toolbar_icon_size - 2.0))
        .min_size(vec2(theme.layout.chip_w_tool, theme.layout.chip_h))
        .rounding(Rounding::same(theme.controls.chip_rounding));

    if selected {
        button = button
            .fill(theme.surfaces.accent)
            .stroke(Stroke::new(1.0, theme.shadows.focus_ring));
    } else {
        button = button.fill(theme.surfaces.card_bg_alt);
    }

    ui.add_enabled(enabled, button)
}

pub fn primary_button(
    ui: &mut Ui,
    theme: &AppTheme,
    label: &str,
    min_size: Vec2,
    enabled: bool,
) -> egui::Response {
    ui.add_enabled(
        enabled,
        egui::Button::new(RichText::new(label).strong().color(theme.text.on_accent))
            .min_size(min_size)
            .fill(theme.surfaces.accent)
            .stroke(Stroke::new(1.0, theme.surfaces.accent))
            .rounding(Rounding::same(theme.controls.button_rounding)),
    )
}

pub fn ghost_button(ui: &mut Ui, theme: &AppTheme, label: &str, min_size: Vec2) -> egui::Response {
    ui.add(
        egui::Button::new(RichText::new(label).color(theme.text.secondary))
            .min_size(min_size)
            .fill(theme.surfaces.card_bg)
            .stroke(Stroke::new(1.0, theme.surfaces.stroke_strong))
            .rounding(Rounding::same(theme.controls.button_rounding)),
    )
}

pub fn danger_button(
    ui: &mut Ui,
    theme: &AppTheme,
    label: &str,
    min_size: Vec2,
    enabled: bool,
) -> egui::Response {
    ui.add_enabled(
        enabled,
        egui::Button::new(RichText::new(label).strong().color(theme.text.on_accent))
            .min_size(min_size)
            .fill(theme.surfaces.danger)
            .stroke(Stroke::new(1.0, theme.surfaces.danger))
            .rounding(Rounding::same(theme.controls.button_rounding)),
    )
}

pub fn subtle_badge(ui: &mut Ui, theme: &AppTheme, text: &str) {
    let label = RichText::new(text)
        .size(12.0)
        .color(theme.text.accent)
        .strong();
    Frame::none()
        .fill(theme.surfaces.accent_soft)
        .rounding(Rounding::same(10.0))
        .inner_margin(Margin::symmetric(8.0, 3.0))
        .show(ui, |ui| {
            ui.label(label);
        });
}

/// Rounded track with an accent fill; `fraction` is clamped to 0..=1.
pub fn progress_bar(ui: &mut Ui, theme: &AppTheme, fraction: f32, width: f32) {
    let height = theme.layout.progress_h;
    let (rect, _) = ui.allocate_exact_size(vec2(width, height), Sense::hover());
    let rounding = Rounding::same(height * 0.5);
    let painter = ui.painter();
    painter.rect_filled(rect, rounding, theme.surfaces.track);

    let fraction = fraction.clamp(0.0, 1.0);
    if fraction > 0.0 {
        let mut filled = rect;
        filled.set_width(rect.width() * fraction);
        painter.rect_filled(filled, rounding, theme.surfaces.accent);
    }
}

pub fn vertical_divider(ui: &mut Ui, theme: &AppTheme, height: f32) {
    let (rect, _) = ui.allocate_exact_size(vec2(1.0, height), Sense::hover());
    ui.painter().line_segment(
        [rect.center_top(), rect.center_bottom()],
        Stroke::new(1.0, theme.surfaces.stroke_soft),
    );
}

pub fn keycap(ui: &mut Ui, theme: &AppTheme, label: &str) {
    Frame::none()
        .fill(theme.surfaces.card_bg)
        .stroke(Stroke::new(1.0, theme.surfaces.stroke_strong))
        .rounding(Rounding::same(5.0))
        .inner_margin(Margin::symmetric(6.0, 2.0))
        .show(ui, |ui| {
            ui.label(
                RichText::new(label)
                    .size(11.0)
                    .strong()
                    .color(theme.text.muted),
            );
        });
}

/// Dimmed veil over `rect`, used behind modal cards.
pub fn scrim(ui: &Ui, rect: egui::Rect) {
    ui.painter()
        .rect_filled(rect, Rounding::ZERO, Color32::from_black_alpha(110));
}
