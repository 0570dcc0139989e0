use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use eframe::egui::{self, Context as EguiContext, Key, RichText, TopBottomPanel};
use eframe::{App, Frame};
use image::DynamicImage;
use tracing::{debug, error, info, warn};

use crate::action_bar::{self, ActionBarState};
use crate::admin_view::{self, AdminAction, Thumbnail, Thumbnails};
use crate::canvas_view::{self, BackgroundTexture};
use crate::platform;
use crate::tasks::TaskRunner;
use crate::theme;
use crate::toolbar;
use crate::ui_controls;
use markup_survey::admin::{AdminPanel, UploadFile};
use markup_survey::annotation::Tool;
use markup_survey::backend::SurveyBackend;
use markup_survey::canvas::AnnotationCanvas;
use markup_survey::config::SurveyConfig;
use markup_survey::identity::IdentityProvider;
use markup_survey::survey::{SaveOutcome, SubmissionReceipt, SurveyError, SurveyFlow};

const SAVE_FAILED: &str = "Failed to save annotation. Please try again.";
const ALREADY_RECORDED: &str = "This submission has already been recorded.";
const SURVEY_COMPLETE: &str = "Thank you for completing the survey!";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Screen {
    Survey,
    Admin,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum AdminOp {
    List,
    Upload,
    Delete { file_name: String },
}

/// Results coming back from worker threads.
enum AppEvent {
    BatchLoaded(Result<SurveyFlow, SurveyError>),
    BackgroundFetched {
        url: String,
        result: Result<DynamicImage, String>,
    },
    Submitted {
        image_id: String,
        result: Result<SubmissionReceipt, SurveyError>,
    },
    AdminFinished {
        op: AdminOp,
        result: Result<AdminPanel>,
    },
    ThumbnailFetched {
        id: String,
        result: Result<egui::ColorImage, String>,
    },
}

#[derive(Default)]
struct SurveyScreen {
    flow: Option<SurveyFlow>,
    loading: bool,
    load_error: Option<String>,
    saving: bool,
    texture: Option<BackgroundTexture>,
    show_instructions: bool,
}

#[derive(Default)]
struct AdminScreen {
    panel: AdminPanel,
    thumbnails: Thumbnails,
    busy: bool,
    /// The image set changed; the survey batch is refetched on return.
    dirty: bool,
}

pub struct SurveyApp {
    config: SurveyConfig,
    backend: Arc<dyn SurveyBackend>,
    identity: IdentityProvider,
    theme: theme::AppTheme,
    tasks: TaskRunner<AppEvent>,
    screen: Screen,
    survey: SurveyScreen,
    admin: AdminScreen,
}

impl SurveyApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        config: SurveyConfig,
        backend: Arc<dyn SurveyBackend>,
        identity: IdentityProvider,
    ) -> Self {
        let theme = theme::survey_light_theme();
        theme::apply_theme(&cc.egui_ctx, &theme);

        let mut app = Self {
            config,
            backend,
            identity,
            theme,
            tasks: TaskRunner::new(cc.egui_ctx.clone()),
            screen: Screen::Survey,
            survey: SurveyScreen {
                show_instructions: true,
                ..SurveyScreen::default()
            },
            admin: AdminScreen::default(),
        };
        app.load_batch();
        app
    }

    fn load_batch(&mut self) {
        self.survey.flow = None;
        self.survey.texture = None;
        self.survey.saving = false;
        self.survey.load_error = None;
        self.survey.loading = true;

        let backend = Arc::clone(&self.backend);
        let batch_size = self.config.batch_size;
        self.tasks.spawn("load batch", move || {
            AppEvent::BatchLoaded(SurveyFlow::start(&*backend, batch_size))
        });
    }

    fn open_current_image(&mut self) {
        self.survey.texture = None;
        let Some(flow) = self.survey.flow.as_mut() else {
            return;
        };
        let size = self.config.surface_size();
        let opened = flow.open_current(&*self.backend, size, self.config.fill_color);
        let url = match opened {
            Ok(canvas) => canvas.image_url().to_string(),
            Err(SurveyError::NoCurrentImage) => return,
            Err(err) => {
                error!(error = %err, "cannot open image");
                self.survey.load_error = Some(err.to_string());
                return;
            }
        };

        let backend = Arc::clone(&self.backend);
        self.tasks.spawn("fetch background", move || {
            let result = backend
                .fetch(&url)
                .map_err(|err| err.to_string())
                .and_then(|bytes| image::load_from_memory(&bytes).map_err(|err| err.to_string()));
            AppEvent::BackgroundFetched { url, result }
        });
    }

    fn process_events(&mut self, ctx: &EguiContext) {
        while let Some(event) = self.tasks.try_recv() {
            match event {
                AppEvent::BatchLoaded(result) => self.on_batch_loaded(result),
                AppEvent::BackgroundFetched { url, result } => {
                    self.on_background_fetched(&url, result)
                }
                AppEvent::Submitted { image_id, result } => self.on_submitted(&image_id, result),
                AppEvent::AdminFinished { op, result } => self.on_admin_finished(op, result),
                AppEvent::ThumbnailFetched { id, result } => {
                    self.on_thumbnail_fetched(ctx, id, result)
                }
            }
        }
    }

    fn on_batch_loaded(&mut self, result: Result<SurveyFlow, SurveyError>) {
        self.survey.loading = false;
        match result {
            Ok(flow) => {
                let flow = flow.with_storage_layout(
                    self.config.annotation_prefix.clone(),
                    self.config.cache_control_seconds,
                );
                self.survey.flow = Some(flow);
                self.open_current_image();
            }
            Err(err) => {
                error!(error = %err, "cannot load survey images");
                self.survey.load_error = Some(err.to_string());
            }
        }
    }

    fn on_background_fetched(&mut self, url: &str, result: Result<DynamicImage, String>) {
        let Some(canvas) = self.survey.flow.as_mut().and_then(SurveyFlow::canvas_mut) else {
            debug!(url, "background arrived with no canvas open");
            return;
        };
        if canvas.image_url() != url {
            debug!(url, "background arrived for another image");
            return;
        }
        if let Err(err) = canvas.finish_loading(result) {
            error!(error = %err, "cannot attach background");
        }
    }

    fn save(&mut self) {
        if self.survey.saving {
            return;
        }
        let Some(flow) = self.survey.flow.as_ref() else {
            return;
        };
        if !flow.canvas().is_some_and(AnnotationCanvas::is_ready) {
            return;
        }
        let submission = match flow.prepare_submission(&mut self.identity) {
            Ok(submission) => submission,
            Err(err) => {
                error!(error = %err, "cannot export annotation");
                platform::show_error("Save failed", SAVE_FAILED);
                return;
            }
        };

        self.survey.saving = true;
        let backend = Arc::clone(&self.backend);
        self.tasks.spawn("submit annotation", move || {
            let result = submission.run(&*backend, &*backend);
            AppEvent::Submitted {
                image_id: submission.image_id,
                result,
            }
        });
    }

    fn on_submitted(&mut self, image_id: &str, result: Result<SubmissionReceipt, SurveyError>) {
        self.survey.saving = false;
        let Some(flow) = self.survey.flow.as_mut() else {
            return;
        };
        let outcome =
            result.and_then(|receipt| flow.record_receipt(image_id, &receipt, &mut self.identity));

        match outcome {
            Ok(SaveOutcome::Advanced { index }) => {
                info!(index, "moving to next image");
                self.open_current_image();
            }
            Ok(SaveOutcome::Completed) => {
                platform::show_alert("Survey complete", SURVEY_COMPLETE);
                self.load_batch();
            }
            Ok(SaveOutcome::Duplicate) => {
                platform::show_alert("Already saved", ALREADY_RECORDED);
            }
            Err(SurveyError::Stale { submitted, current }) => {
                warn!(%submitted, %current, "ignoring stale submission result");
            }
            Err(err) => {
                error!(error = %err, "annotation save failed");
                platform::show_error("Save failed", SAVE_FAILED);
            }
        }
    }

    fn open_admin(&mut self) {
        self.screen = Screen::Admin;
        self.run_admin(AdminOp::List, |mut panel, backend| {
            panel.refresh(&*backend)?;
            Ok(panel)
        });
    }

    fn close_admin(&mut self) {
        self.screen = Screen::Survey;
        if std::mem::take(&mut self.admin.dirty) {
            self.load_batch();
        }
    }

    fn run_admin(
        &mut self,
        op: AdminOp,
        job: impl FnOnce(AdminPanel, Arc<dyn SurveyBackend>) -> Result<AdminPanel> + Send + 'static,
    ) {
        if self.admin.busy {
            return;
        }
        self.admin.busy = true;
        let panel = self.admin.panel.clone();
        let backend = Arc::clone(&self.backend);
        self.tasks.spawn("admin", move || AppEvent::AdminFinished {
            op,
            result: job(panel, backend),
        });
    }

    fn upload_images(&mut self) {
        let paths = platform::pick_images();
        if paths.is_empty() {
            return;
        }
        self.run_admin(AdminOp::Upload, move |mut panel, backend| {
            let files = paths
                .iter()
                .map(|path| read_upload(path))
                .collect::<Result<Vec<_>>>()?;
            panel.upload(&*backend, &*backend, &files)?;
            Ok(panel)
        });
    }

    fn delete_image(&mut self, id: String, file_name: String) {
        if !platform::confirm("Delete image", "Are you sure you want to delete this image?") {
            return;
        }
        self.run_admin(AdminOp::Delete { file_name }, move |mut panel, backend| {
            panel.delete(&*backend, &*backend, &id)?;
            Ok(panel)
        });
    }

    fn on_admin_finished(&mut self, op: AdminOp, result: Result<AdminPanel>) {
        self.admin.busy = false;
        match result {
            Ok(panel) => {
                self.admin.panel = panel;
                self.admin
                    .thumbnails
                    .retain(|id, _| self.admin.panel.images().iter().any(|image| &image.id == id));
                self.request_thumbnails();
                match op {
                    AdminOp::List => {}
                    AdminOp::Upload => {
                        self.admin.dirty = true;
                        platform::show_alert("Upload complete", "Images uploaded successfully!");
                    }
                    AdminOp::Delete { file_name } => {
                        self.admin.dirty = true;
                        info!(%file_name, "image removed from survey");
                        platform::show_alert("Image deleted", "Image deleted successfully!");
                    }
                }
            }
            Err(err) => {
                error!(op = ?op, error = %format!("{err:#}"), "admin operation failed");
                let message = match op {
                    AdminOp::List => "Failed to load images. Please try again.",
                    AdminOp::Upload => {
                        self.admin.dirty = true;
                        "Failed to upload images. Please try again."
                    }
                    AdminOp::Delete { .. } => "Failed to delete image. Please try again.",
                };
                platform::show_error("Admin", message);
            }
        }
    }

    fn request_thumbnails(&mut self) {
        for image in self.admin.panel.images() {
            if self.admin.thumbnails.contains_key(&image.id) {
                continue;
            }
            self.admin
                .thumbnails
                .insert(image.id.clone(), Thumbnail::Loading);

            let backend = Arc::clone(&self.backend);
            let panel = self.admin.panel.clone();
            let image = image.clone();
            self.tasks.spawn("thumbnail", move || {
                let result = panel
                    .thumbnail_url(&*backend, &image)
                    .map_err(|err| err.to_string())
                    .and_then(|url| backend.fetch(&url).map_err(|err| err.to_string()))
                    .and_then(|bytes| {
                        admin_view::make_thumbnail(&bytes).map_err(|err| err.to_string())
                    });
                AppEvent::ThumbnailFetched {
                    id: image.id,
                    result,
                }
            });
        }
    }

    fn on_thumbnail_fetched(
        &mut self,
        ctx: &EguiContext,
        id: String,
        result: Result<egui::ColorImage, String>,
    ) {
        if !self.admin.thumbnails.contains_key(&id) {
            return;
        }
        let thumbnail = match result {
            Ok(color) => Thumbnail::Ready(ctx.load_texture(
                format!("thumbnail-{id}"),
                color,
                egui::TextureOptions::LINEAR,
            )),
            Err(reason) => {
                warn!(%id, %reason, "thumbnail unavailable");
                Thumbnail::Failed
            }
        };
        self.admin.thumbnails.insert(id, thumbnail);
    }

    fn select_tool(&mut self, tool: Tool) {
        let Some(canvas) = self.survey.flow.as_mut().and_then(SurveyFlow::canvas_mut) else {
            return;
        };
        if let Err(err) = canvas.set_tool(tool) {
            warn!(?tool, error = %err, "tool change refused");
        }
    }

    fn undo(&mut self) {
        let Some(canvas) = self.survey.flow.as_mut().and_then(SurveyFlow::canvas_mut) else {
            return;
        };
        if let Err(err) = canvas.undo() {
            error!(error = %err, "undo failed");
        }
    }

    fn delete_selection(&mut self) {
        let Some(canvas) = self.survey.flow.as_mut().and_then(SurveyFlow::canvas_mut) else {
            return;
        };
        match canvas.delete_selection() {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "selection deleted"),
            Err(err) => error!(error = %err, "delete failed"),
        }
    }

    fn handle_shortcuts(&mut self, ctx: &EguiContext) {
        if self.screen != Screen::Survey || self.survey.show_instructions {
            return;
        }
        let cmd = ctx.input(|input| input.modifiers.command || input.modifiers.ctrl);

        if cmd {
            if ctx.input(|input| input.key_pressed(Key::Z)) {
                self.undo();
            }
            if ctx.input(|input| input.key_pressed(Key::S)) {
                self.save();
            }
            return;
        }

        if ctx.input(|input| input.key_pressed(Key::Escape) || input.key_pressed(Key::V)) {
            self.select_tool(Tool::Select);
        }
        if ctx.input(|input| input.key_pressed(Key::D)) {
            self.select_tool(Tool::Draw);
        }
        if ctx.input(|input| input.key_pressed(Key::E)) {
            self.select_tool(Tool::Erase);
        }
        if ctx.input(|input| input.key_pressed(Key::L)) {
            self.select_tool(Tool::Line);
        }
        if ctx.input(|input| input.key_pressed(Key::Delete) || input.key_pressed(Key::Backspace)) {
            self.delete_selection();
        }
    }

    fn show_header(&mut self, ctx: &EguiContext) {
        let mut open_admin = false;
        let mut back = false;
        let mut help = false;

        TopBottomPanel::top("header")
            .frame(ui_controls::action_bar_frame(&self.theme))
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.heading(
                        RichText::new("Image Annotation Survey").color(self.theme.text.primary),
                    );
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        let size = egui::vec2(120.0, self.theme.controls.action_height);
                        match self.screen {
                            Screen::Survey => {
                                if ui_controls::ghost_button(ui, &self.theme, "Admin Panel", size)
                                    .clicked()
                                {
                                    open_admin = true;
                                }
                                if ui_controls::ghost_button(ui, &self.theme, "Instructions", size)
                                    .clicked()
                                {
                                    help = true;
                                }
                            }
                            Screen::Admin => {
                                ui_controls::subtle_badge(ui, &self.theme, "Admin");
                                back = ui.input(|input| input.key_pressed(Key::Escape));
                            }
                        }
                    });
                });
            });

        if open_admin {
            self.open_admin();
        }
        if back {
            self.close_admin();
        }
        if help {
            self.survey.show_instructions = true;
        }
    }

    fn show_instructions(&mut self, ctx: &EguiContext) {
        if !self.survey.show_instructions {
            return;
        }
        let screen = ctx.screen_rect();
        egui::Area::new(egui::Id::new("instructions_scrim"))
            .order(egui::Order::Middle)
            .fixed_pos(screen.min)
            .show(ctx, |ui| {
                ui_controls::scrim(ui, screen);
                ui.allocate_exact_size(screen.size(), egui::Sense::click());
            });

        let mut dismissed = false;
        egui::Window::new("Drawing Instructions")
            .collapsible(false)
            .resizable(false)
            .order(egui::Order::Foreground)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .frame(ui_controls::card_frame(&self.theme))
            .show(ctx, |ui| {
                ui.set_max_width(360.0);
                ui.horizontal(|ui| {
                    ui_controls::keycap(ui, &self.theme, "Shift + Drag");
                    ui.label(
                        RichText::new("Hold Shift and drag the mouse to draw straight lines")
                            .color(self.theme.text.secondary),
                    );
                });
                ui.add_space(self.theme.layout.space_2);
                ui.label(
                    RichText::new(
                        "Use Draw for freehand marks, Eraser to paint over them, and Select to \
                         move, resize or delete what you drew.",
                    )
                    .color(self.theme.text.muted)
                    .size(13.0),
                );
                ui.add_space(self.theme.layout.space_3);
                ui.vertical_centered(|ui| {
                    if ui_controls::primary_button(
                        ui,
                        &self.theme,
                        "Got it!",
                        egui::vec2(120.0, 34.0),
                        true,
                    )
                    .clicked()
                    {
                        dismissed = true;
                    }
                });
            });

        if dismissed || ctx.input(|input| input.key_pressed(Key::Enter)) {
            self.survey.show_instructions = false;
        }
    }

    fn show_survey(&mut self, ctx: &EguiContext) {
        let centered_message = |ctx: &EguiContext, theme: &theme::AppTheme, text: &str| {
            egui::CentralPanel::default()
                .frame(egui::Frame::none().fill(theme.surfaces.app_bg))
                .show(ctx, |ui| {
                    ui.centered_and_justified(|ui| {
                        ui.label(RichText::new(text).color(theme.text.secondary).size(18.0));
                    });
                });
        };

        if self.survey.loading {
            centered_message(ctx, &self.theme, "Loading...");
            return;
        }
        if let Some(reason) = self.survey.load_error.clone() {
            let mut retry = false;
            egui::CentralPanel::default()
                .frame(egui::Frame::none().fill(self.theme.surfaces.app_bg))
                .show(ctx, |ui| {
                    ui.vertical_centered(|ui| {
                        ui.add_space(ui.available_height() * 0.35);
                        ui.label(
                            RichText::new("Could not load the survey.")
                                .color(self.theme.text.primary)
                                .size(18.0),
                        );
                        ui.label(RichText::new(reason).color(self.theme.text.muted).size(13.0));
                        ui.add_space(self.theme.layout.space_3);
                        retry = ui_controls::primary_button(
                            ui,
                            &self.theme,
                            "Retry",
                            egui::vec2(100.0, 32.0),
                            true,
                        )
                        .clicked();
                    });
                });
            if retry {
                self.load_batch();
            }
            return;
        }
        let (position, total) = match self.survey.flow.as_ref().and_then(SurveyFlow::progress) {
            Some(progress) => progress,
            None => {
                centered_message(ctx, &self.theme, "No images available for annotation.");
                return;
            }
        };

        if let Some(canvas) = self.survey.flow.as_ref().and_then(SurveyFlow::canvas) {
            canvas_view::ensure_background_texture(ctx, &mut self.survey.texture, canvas);
        }

        let toolbar_output = TopBottomPanel::top("toolbar")
            .frame(egui::Frame::none().inner_margin(egui::Margin::symmetric(
                self.theme.layout.panel_padding_x,
                self.theme.layout.space_1,
            )))
            .show(ctx, |ui| {
                ui_controls::toolbar_frame(&self.theme)
                    .show(ui, |ui| {
                        let width_class = self.theme.width_class(ui.available_width());
                        let canvas = self.survey.flow.as_ref().and_then(SurveyFlow::canvas);
                        toolbar::show_toolbar(ui, &self.theme, canvas, width_class)
                    })
                    .inner
            })
            .inner;

        let can_save = self
            .survey
            .flow
            .as_ref()
            .and_then(SurveyFlow::canvas)
            .is_some_and(AnnotationCanvas::is_ready);
        let action_output = TopBottomPanel::bottom("action_bar")
            .exact_height(self.theme.layout.action_bar_height)
            .frame(ui_controls::action_bar_frame(&self.theme))
            .show(ctx, |ui| {
                let width_class = self.theme.width_class(ui.available_width());
                action_bar::show_action_bar(
                    ui,
                    &self.theme,
                    ActionBarState {
                        position,
                        total,
                        can_save,
                        saving: self.survey.saving,
                    },
                    width_class,
                )
            })
            .inner;

        egui::CentralPanel::default()
            .frame(
                egui::Frame::none()
                    .fill(self.theme.surfaces.app_bg)
                    .inner_margin(egui::Margin::symmetric(
                        self.theme.layout.panel_padding_x,
                        self.theme.layout.panel_padding_y,
                    )),
            )
            .show(ctx, |ui| {
                let texture = self.survey.texture.as_ref();
                match self.survey.flow.as_mut().and_then(SurveyFlow::canvas_mut) {
                    Some(canvas) => canvas_view::show_canvas(ui, &self.theme, canvas, texture),
                    None => {
                        ui.centered_and_justified(|ui| {
                            ui.spinner();
                        });
                    }
                }
            });

        if let Some(tool) = toolbar_output.tool {
            self.select_tool(tool);
        }
        if toolbar_output.undo {
            self.undo();
        }
        if toolbar_output.delete {
            self.delete_selection();
        }
        if action_output.save {
            self.save();
        }
    }

    fn show_admin(&mut self, ctx: &EguiContext) {
        let action = egui::CentralPanel::default()
            .frame(
                egui::Frame::none()
                    .fill(self.theme.surfaces.app_bg)
                    .inner_margin(egui::Margin::same(self.theme.layout.space_4)),
            )
            .show(ctx, |ui| {
                admin_view::show_admin(
                    ui,
                    &self.theme,
                    self.admin.panel.images(),
                    &self.admin.thumbnails,
                    self.admin.busy,
                )
            })
            .inner;

        match action {
            Some(AdminAction::Back) => self.close_admin(),
            Some(AdminAction::Upload) => self.upload_images(),
            Some(AdminAction::Delete(image)) => self.delete_image(image.id, image.file_name),
            None => {}
        }
    }
}

fn read_upload(path: &Path) -> Result<UploadFile> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("unusable file name: {}", path.display()))?
        .to_string();
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(UploadFile { name, bytes })
}

impl App for SurveyApp {
    fn update(&mut self, ctx: &EguiContext, _frame: &mut Frame) {
        self.process_events(ctx);
        self.handle_shortcuts(ctx);
        self.show_header(ctx);

        match self.screen {
            Screen::Survey => {
                self.show_survey(ctx);
                self.show_instructions(ctx);
            }
            Screen::Admin => self.show_admin(ctx),
        }

        if self.tasks.is_busy() {
            ctx.request_repaint_after(std::time::Duration::from_millis(120));
        }
    }
}
