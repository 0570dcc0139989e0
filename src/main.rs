mod action_bar;
mod admin_view;
mod app;
mod canvas_view;
mod platform;
mod tasks;
mod theme;
mod toolbar;
mod ui_controls;

use eframe::egui;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use markup_survey::config::{BackendConfig, SurveyConfig};
use markup_survey::identity::{CookieJar, IdentityProvider};

fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,markup_survey=debug")),
        )
        .init();

    let config = SurveyConfig::load().unwrap_or_else(|err| {
        warn!(error = %format!("{err:#}"), "using default survey config");
        SurveyConfig::default()
    });
    let backend = match config.build_backend() {
        Ok(backend) => backend,
        Err(err) => {
            platform::show_error("Markup Survey", &format!("Cannot start the survey: {err:#}"));
            return Ok(());
        }
    };
    let identity = IdentityProvider::new(open_cookie_jar()).with_names(
        config.participant_cookie.clone(),
        config.form_token_key.clone(),
        config.cookie_lifetime_days,
    );
    let hosted = matches!(config.backend, BackendConfig::Rest { .. });
    info!(hosted, batch = config.batch_size, "starting survey");

    let viewport = egui::ViewportBuilder::default()
        .with_title("Image Annotation Survey")
        .with_inner_size([1080.0, 820.0])
        .with_min_inner_size([640.0, 520.0]);

    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };

    eframe::run_native(
        "Markup Survey",
        options,
        Box::new(move |cc| Ok(Box::new(app::SurveyApp::new(cc, config, backend, identity)))),
    )
}

fn open_cookie_jar() -> CookieJar {
    let Some(path) = SurveyConfig::cookie_jar_path() else {
        warn!("no data directory, participant id lasts for this run only");
        return CookieJar::in_memory();
    };
    CookieJar::open(path).unwrap_or_else(|err| {
        warn!(error = %err, "cookie jar unreadable, starting a fresh one");
        CookieJar::in_memory()
    })
}
