use egui::{vec2, Align, Color32, Layout, Pos2, Rect, RichText, Shape, Stroke, Ui};

use crate::theme::{AppTheme, WidthClass};
use crate::ui_controls;
use markup_survey::annotation::Tool;
use markup_survey::canvas::AnnotationCanvas;

const TOOLS: [(Tool, &str); 4] = [
    (Tool::Select, "Select (V / Esc)"),
    (Tool::Draw, "Draw (D)"),
    (Tool::Erase, "Eraser (E)"),
    (Tool::Line, "Add Line (L)"),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ToolbarOutput {
    pub tool: Option<Tool>,
    pub undo: bool,
    pub delete: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct ToolbarPlan {
    pub show_labels: bool,
    pub show_delete: bool,
    pub show_hint: bool,
}

pub fn plan_toolbar_items(width_class: WidthClass, has_selection: bool) -> ToolbarPlan {
    ToolbarPlan {
        show_labels: width_class != WidthClass::Compact,
        show_delete: has_selection,
        show_hint: width_class == WidthClass::Wide,
    }
}

/// Tool chips plus undo. Every control is disabled until the canvas has its
/// background.
pub fn show_toolbar(
    ui: &mut Ui,
    theme: &AppTheme,
    canvas: Option<&AnnotationCanvas>,
    width_class: WidthClass,
) -> ToolbarOutput {
    let ready = canvas.is_some_and(AnnotationCanvas::is_ready);
    let active = canvas.map(AnnotationCanvas::tool);
    let has_selection = canvas.is_some_and(|canvas| !canvas.selection().is_empty());
    let plan = plan_toolbar_items(width_class, has_selection);
    let mut out = ToolbarOutput::default();

    ui.with_layout(Layout::left_to_right(Align::Center), |ui| {
        ui.spacing_mut().interact_size.y = theme.layout.chip_h;
        ui.spacing_mut().item_spacing = vec2(theme.layout.control_gap, 0.0);

        for (tool, hint) in TOOLS {
            let selected = active == Some(tool) && !tool.is_momentary();
            let label = if plan.show_labels {
                format!("      {}", tool.label())
            } else {
                String::new()
            };
            let response = ui_controls::tool_chip(ui, theme, &label, selected, ready)
                .on_hover_text(hint);
            draw_tool_icon(ui, theme, icon_rect(response.rect), tool, selected);
            if response.clicked() {
                out.tool = Some(tool);
            }
        }

        group_separator(ui, theme);

        let can_undo = ready && canvas.is_some_and(AnnotationCanvas::can_undo);
        let undo = ui.add_enabled_ui(can_undo, |ui| {
            ui_controls::ghost_button(ui, theme, "↩ Undo", vec2(84.0, theme.layout.chip_h))
        });
        if undo.inner.on_hover_text("Undo (Ctrl+Z)").clicked() {
            out.undo = true;
        }

        if plan.show_delete {
            let size = vec2(72.0, theme.layout.chip_h);
            let delete = ui_controls::danger_button(ui, theme, "Delete", size, ready);
            if delete.on_hover_text("Delete selection (Del)").clicked() {
                out.delete = true;
            }
        }

        if plan.show_hint {
            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                ui.label(
                    RichText::new("Hold Shift for straight lines")
                        .color(theme.text.muted)
                        .size(12.0),
                );
            });
        }
    });

    out
}

fn icon_rect(chip: Rect) -> Rect {
    let side = chip.height() - 10.0;
    Rect::from_min_size(
        Pos2::new(chip.left() + 10.0, chip.center().y - side * 0.5),
        vec2(side, side),
    )
}

fn group_separator(ui: &mut Ui, theme: &AppTheme) {
    ui.separator();
    let extra = (theme.layout.group_gap - theme.layout.control_gap).max(0.0);
    if extra > 0.0 {
        ui.add_space(extra);
    }
}

fn draw_tool_icon(ui: &Ui, theme: &AppTheme, icon_rect: Rect, tool: Tool, selected: bool) {
    let color = if selected {
        theme.text.on_accent
    } else {
        theme.text.secondary
    };
    let stroke = Stroke::new(1.65, color);
    let painter = ui.painter();

    match tool {
        Tool::Select => {
            let tip = Pos2::new(icon_rect.left() + 2.0, icon_rect.top() + 1.0);
            let base = Pos2::new(icon_rect.left() + 8.6, icon_rect.bottom() - 1.6);
            let inner = Pos2::new(icon_rect.left() + 10.8, icon_rect.center().y + 1.8);
            let wing = Pos2::new(icon_rect.right() - 1.8, icon_rect.center().y - 0.6);

            painter.add(Shape::convex_polygon(
                vec![tip, base, inner, wing],
                Color32::from_rgba_unmultiplied(color.r(), color.g(), color.b(), 40),
                Stroke::NONE,
            ));
            painter.line_segment([tip, base], stroke);
            painter.line_segment([base, inner], stroke);
            painter.line_segment([inner, wing], stroke);
            painter.line_segment([wing, tip], stroke);
        }
        Tool::Draw => {
            let points: Vec<Pos2> = (0..=12)
                .map(|step| {
                    let t = step as f32 / 12.0;
                    Pos2::new(
                        icon_rect.left() + 1.0 + t * (icon_rect.width() - 2.0),
                        icon_rect.center().y + (t * std::f32::consts::TAU).sin() * 3.5,
                    )
                })
                .collect();
            painter.add(Shape::line(points, stroke));
        }
        Tool::Erase => {
            let body = icon_rect.shrink2(vec2(1.5, 4.0));
            painter.rect_stroke(body, 2.0, stroke);
            let split = body.left() + body.width() * 0.4;
            painter.line_segment(
                [Pos2::new(split, body.top()), Pos2::new(split, body.bottom())],
                stroke,
            );
        }
        Tool::Line => {
            let from = icon_rect.left_top() + vec2(2.0, 2.0);
            let to = icon_rect.right_bottom() - vec2(2.0, 2.0);
            painter.line_segment([from, to], stroke);
            painter.circle_filled(from, 1.8, color);
            painter.circle_filled(to, 1.8, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::plan_toolbar_items;
    use crate::theme::WidthClass;

    #[test]
    fn compact_toolbar_drops_labels_and_hint() {
        let plan = plan_toolbar_items(WidthClass::Compact, false);
        assert!(!plan.show_labels);
        assert!(!plan.show_hint);
        assert!(!plan.show_delete);
    }

    #[test]
    fn delete_appears_only_with_a_selection() {
        assert!(plan_toolbar_items(WidthClass::Regular, true).show_delete);
        assert!(!plan_toolbar_items(WidthClass::Wide, false).show_delete);
        assert!(plan_toolbar_items(WidthClass::Wide, false).show_hint);
    }
}
