use egui::epaint::Shadow;
use egui::{
    vec2, Color32, Context, FontFamily, FontId, Rounding, Stroke, Style, TextStyle, Visuals,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WidthClass {
    Compact,
    Regular,
    Wide,
}

#[derive(Clone, Debug)]
pub struct AppTheme {
    pub surfaces: SurfaceTokens,
    pub text: TextTokens,
    pub controls: ControlTokens,
    pub layout: LayoutTokens,
    pub breakpoints: Breakpoints,
    pub shadows: ShadowTokens,
}

#[derive(Clone, Debug)]
pub struct SurfaceTokens {
    pub app_bg: Color32,
    pub panel_bg: Color32,
    pub card_bg: Color32,
    pub card_bg_alt: Color32,
    pub stroke_soft: Color32,
    pub stroke_strong: Color32,
    pub accent: Color32,
    pub accent_soft: Color32,
    pub danger: Color32,
    pub track: Color32,
}

#[derive(Clone, Debug)]
pub struct TextTokens {
    pub primary: Color32,
    pub secondary: Color32,
    pub muted: Color32,
    pub accent: Color32,
    pub on_accent: Color32,
}

#[derive(Clone, Debug)]
pub struct ControlTokens {
    pub card_rounding: f32,
    pub chip_rounding: f32,
    pub button_rounding: f32,
    pub toolbar_icon_size: f32,
    pub action_height: f32,
}

#[derive(Clone, Debug)]
pub struct LayoutTokens {
    pub space_1: f32,
    pub space_2: f32,
    pub space_3: f32,
    pub space_4: f32,
    pub panel_padding_x: f32,
    pub panel_padding_y: f32,
    pub control_gap: f32,
    pub group_gap: f32,
    pub action_bar_height: f32,
    pub chip_h: f32,
    pub chip_w_tool: f32,
    pub progress_h: f32,
}

#[derive(Clone, Debug)]
pub struct Breakpoints {
    pub compact_max: f32,
    pub regular_max: f32,
}

#[derive(Clone, Debug)]
pub struct ShadowTokens {
    pub ambient: Color32,
    pub elevation: Color32,
    pub focus_ring: Color32,
}

impl AppTheme {
    pub fn width_class(&self, width: f32) -> WidthClass {
        width_class(width, &self.breakpoints)
    }
}

pub fn width_class(width: f32, breakpoints: &Breakpoints) -> WidthClass {
    if width <= breakpoints.compact_max {
        WidthClass::Compact
    } else if width <= breakpoints.regular_max {
        WidthClass::Regular
    } else {
        WidthClass::Wide
    }
}

/// Light survey look: gray page, white cards, blue accent.
pub fn survey_light_theme() -> AppTheme {
    AppTheme {
        surfaces: SurfaceTokens {
            app_bg: Color32::from_rgb(0xF3, 0xF4, 0xF6),
            panel_bg: Color32::from_rgb(0xF3, 0xF4, 0xF6),
            card_bg: Color32::WHITE,
            card_bg_alt: Color32::from_rgb(0xF9, 0xFA, 0xFB),
            stroke_soft: Color32::from_rgb(0xE5, 0xE7, 0xEB),
            stroke_strong: Color32::from_rgb(0xD1, 0xD5, 0xDB),
            accent: Color32::from_rgb(0x3B, 0x82, 0xF6),
            accent_soft: Color32::from_rgb(0xDB, 0xEA, 0xFE),
            danger: Color32::from_rgb(0xEF, 0x44, 0x44),
            track: Color32::from_rgb(0xE5, 0xE7, 0xEB),
        },
        text: TextTokens {
            primary: Color32::from_rgb(0x11, 0x18, 0x27),
            secondary: Color32::from_rgb(0x4B, 0x55, 0x63),
            muted: Color32::from_rgb(0x6B, 0x72, 0x80),
            accent: Color32::from_rgb(0x25, 0x63, 0xEB),
            on_accent: Color32::WHITE,
        },
        controls: ControlTokens {
            card_rounding: 8.0,
            chip_rounding: 6.0,
            button_rounding: 6.0,
            toolbar_icon_size: 16.0,
            action_height: 32.0,
        },
        layout: LayoutTokens {
            space_1: 4.0,
            space_2: 8.0,
            space_3: 12.0,
            space_4: 16.0,
            panel_padding_x: 16.0,
            panel_padding_y: 8.0,
            control_gap: 8.0,
            group_gap: 16.0,
            action_bar_height: 52.0,
            chip_h: 32.0,
            chip_w_tool: 40.0,
            progress_h: 8.0,
        },
        breakpoints: Breakpoints {
            compact_max: 760.0,
            regular_max: 1024.0,
        },
        shadows: ShadowTokens {
            ambient: Color32::from_rgba_unmultiplied(0, 0, 0, 18),
            elevation: Color32::from_rgba_unmultiplied(0, 0, 0, 40),
            focus_ring: Color32::from_rgb(0x60, 0xA5, 0xFA),
        },
    }
}

pub fn apply_theme(ctx: &Context, theme: &AppTheme) {
    let mut style: Style = (*ctx.style()).clone();

    style.spacing.item_spacing = vec2(theme.layout.control_gap, theme.layout.space_2);
    style.spacing.button_padding = vec2(theme.layout.space_3, theme.layout.space_1 + 2.0);
    style.spacing.window_margin =
        egui::Margin::symmetric(theme.layout.space_4, theme.layout.space_4);

    style.visuals = Visuals::light();
    style.visuals.override_text_color = Some(theme.text.primary);
    style.visuals.panel_fill = theme.surfaces.panel_bg;
    style.visuals.window_fill = theme.surfaces.card_bg;
    style.visuals.faint_bg_color = theme.surfaces.card_bg_alt;
    style.visuals.extreme_bg_color = theme.surfaces.app_bg;
    style.visuals.window_rounding = Rounding::same(theme.controls.card_rounding);
    style.visuals.window_stroke = Stroke::new(1.0, theme.surfaces.stroke_soft);

    style.visuals.widgets.noninteractive.bg_fill = theme.surfaces.card_bg;
    style.visuals.widgets.noninteractive.fg_stroke = Stroke::new(1.0, theme.text.secondary);
    style.visuals.widgets.noninteractive.bg_stroke = Stroke::new(1.0, theme.surfaces.stroke_soft);

    style.visuals.widgets.inactive.bg_fill = theme.surfaces.card_bg;
    style.visuals.widgets.inactive.weak_bg_fill = theme.surfaces.card_bg;
    style.visuals.widgets.inactive.bg_stroke = Stroke::new(1.0, theme.surfaces.stroke_strong);
    style.visuals.widgets.inactive.fg_stroke = Stroke::new(1.0, theme.text.secondary);

    style.visuals.widgets.hovered.bg_fill = theme.surfaces.card_bg_alt;
    style.visuals.widgets.hovered.weak_bg_fill = theme.surfaces.card_bg_alt;
    style.visuals.widgets.hovered.bg_stroke = Stroke::new(1.0, theme.surfaces.accent);
    style.visuals.widgets.hovered.fg_stroke = Stroke::new(1.0, theme.text.primary);

    style.visuals.widgets.active.bg_fill = theme.surfaces.accent_soft;
    style.visuals.widgets.active.bg_stroke = Stroke::new(1.0, theme.surfaces.accent);
    style.visuals.widgets.active.fg_stroke = Stroke::new(1.0, theme.text.primary);

    style.visuals.selection.bg_fill = theme.surfaces.accent_soft;
    style.visuals.selection.stroke = Stroke::new(1.0, theme.surfaces.accent);
    style.visuals.hyperlink_color = theme.text.accent;
    style.visuals.popup_shadow = Shadow {
        offset: vec2(0.0, 4.0),
        blur: 12.0,
        spread: 0.0,
        color: theme.shadows.ambient,
    };
    style.visuals.window_shadow = Shadow {
        offset: vec2(0.0, 10.0),
        blur: 24.0,
        spread: 0.0,
        color: theme.shadows.elevation,
    };

    for widget in [
        &mut style.visuals.widgets.noninteractive,
        &mut style.visuals.widgets.inactive,
        &mut style.visuals.widgets.hovered,
        &mut style.visuals.widgets.active,
        &mut style.visuals.widgets.open,
    ] {
        widget.rounding = Rounding::same(theme.controls.button_rounding);
    }

    style.text_styles.insert(
        TextStyle::Heading,
        FontId::new(26.0, FontFamily::Proportional),
    );
    style.text_styles.insert(
        TextStyle::Name("Title".into()),
        FontId::new(20.0, FontFamily::Proportional),
    );
    style
        .text_styles
        .insert(TextStyle::Body, FontId::new(15.0, FontFamily::Proportional));
    style.text_styles.insert(
        TextStyle::Button,
        FontId::new(14.0, FontFamily::Proportional),
    );
    style.text_styles.insert(
        TextStyle::Small,
        FontId::new(12.0, FontFamily::Proportional),
    );

    ctx.set_style(style);
}
