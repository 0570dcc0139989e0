use egui::{vec2, Align, Layout, RichText, Ui};

use crate::theme::{AppTheme, WidthClass};
use crate::ui_controls;

pub struct ActionBarOutput {
    pub save: bool,
}

/// What the bar shows for the image currently open.
#[derive(Clone, Copy, Debug)]
pub struct ActionBarState {
    /// 1-based position of the open image.
    pub position: usize,
    pub total: usize,
    pub can_save: bool,
    pub saving: bool,
}

pub fn progress_fraction(position: usize, total: usize) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (position as f32 / total as f32).min(1.0)
}

pub fn should_show_shortcut_label(width_class: WidthClass, available_width: f32) -> bool {
    match width_class {
        WidthClass::Compact => available_width >= 420.0,
        WidthClass::Regular | WidthClass::Wide => true,
    }
}

pub fn show_action_bar(
    ui: &mut Ui,
    theme: &AppTheme,
    state: ActionBarState,
    width_class: WidthClass,
) -> ActionBarOutput {
    let action_h = theme.controls.action_height;
    let save_w = if width_class == WidthClass::Compact {
        132.0
    } else {
        156.0
    };
    let progress_w = match width_class {
        WidthClass::Compact => 120.0,
        WidthClass::Regular => 200.0,
        WidthClass::Wide => 280.0,
    };
    let shortcut_visible =
        should_show_shortcut_label(width_class, ui.available_width() - progress_w - save_w);

    let mut out = ActionBarOutput { save: false };

    ui.horizontal(|ui| {
        ui.spacing_mut().item_spacing = vec2(theme.layout.space_3, 0.0);

        ui.label(
            RichText::new(format!("Image {} of {}", state.position, state.total))
                .color(theme.text.secondary),
        );
        ui_controls::progress_bar(
            ui,
            theme,
            progress_fraction(state.position, state.total),
            progress_w,
        );

        ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
            let label = if state.saving {
                "Saving..."
            } else {
                "Save Annotation"
            };
            let mut save = ui_controls::primary_button(
                ui,
                theme,
                label,
                vec2(save_w, action_h),
                state.can_save && !state.saving,
            );
            if !shortcut_visible {
                save = save.on_hover_text("Ctrl+S");
            }
            if save.clicked() {
                out.save = true;
            }

            if shortcut_visible {
                ui.add_space(theme.layout.space_2);
                ui_controls::keycap(ui, theme, "S");
                ui_controls::keycap(ui, theme, shortcut_modifier());
                ui_controls::vertical_divider(ui, theme, 16.0);
            }
        });
    });

    out
}

fn shortcut_modifier() -> &'static str {
    if cfg!(target_os = "macos") {
        "⌘"
    } else {
        "Ctrl"
    }
}
