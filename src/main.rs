use std::time::Duration;

use anyhow::Result;
use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use clap_serde_derive::ClapSerde;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::RunnerResult;
use crate::inference::client::{ImagePayload, StylistClient};
use crate::inference::retry::{RetryError, RetryPolicy};
use crate::inference::style::{StyleLabel, StyleParams};
use crate::inference::task::detect::DetectResponse;
use crate::inference::task::suggest::SuggestResponse;
use crate::telemetry::init_telemetry;

mod config;
mod error;
mod inference;
mod telemetry;

#[cfg(unix)]
use tikv_jemallocator::Jemalloc;

#[cfg(unix)]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env, default_value = "StyleRunner.toml")]
    config_file: String,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

#[derive(Clone)]
pub(crate) struct AppState {
    stylist: StylistClient,
    policy: RetryPolicy,
    fallback: StyleLabel,
    min_suggestion_chars: usize,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let mut args = Args::parse();
    let config = match Config::from_toml(&args.config_file) {
        Ok(file_config) => Config::from(file_config).merge(&mut args.opt_config),
        Err(err) => {
            if args.config_file == "StyleRunner.toml" {
                Config::from(&mut args.opt_config)
            } else {
                eprintln!(
                    "Failed to read configuration file {} with error: {}",
                    args.config_file, err
                );
                std::process::exit(1)
            }
        }
    };

    let otel_endpoint = (!config.otel_endpoint.is_empty()).then_some(config.otel_endpoint.as_str());
    init_telemetry(otel_endpoint, config.console)?;

    if config.api_key.is_empty() {
        exit_err!(1, "STYLE_API_KEY is required but was not provided");
    }
    if config.max_attempts == 0 {
        exit_err!(1, "max-attempts must be at least 1");
    }
    let Some(fallback) = StyleLabel::from_model_output(&config.fallback_style) else {
        exit_err!(1, "Unknown fallback style {}", config.fallback_style);
    };

    let stylist = StylistClient::new(
        &config.api_base_url,
        &config.api_key,
        &config.model,
        Duration::from_secs(config.request_timeout_secs),
    )?;
    let state = AppState {
        stylist,
        policy: RetryPolicy {
            max_attempts: config.max_attempts,
            backoff_base: Duration::from_secs(config.backoff_base_secs),
        },
        fallback,
        min_suggestion_chars: config.min_suggestion_chars,
    };

    let listener = TcpListener::bind(format!("{}:{}", config.address, config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn app(state: AppState) -> Router {
    let style_router = Router::new()
        .route("/detect", post(handle_detect_request))
        .route("/suggest", post(handle_suggest_request))
        // 10 MB limit
        .layer(DefaultBodyLimit::max(10_000_000));

    Router::new()
        .nest("/style", style_router)
        .route("/health", get(handle_health_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}

#[axum_macros::debug_handler]
async fn handle_health_request() -> StatusCode {
    StatusCode::OK
}

#[axum_macros::debug_handler]
async fn handle_detect_request(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> RunnerResult<(StatusCode, Json<DetectResponse>)> {
    let mut opt_image = None;

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "image" => opt_image = Some(read_image_field(field).await?),
            _ => bail_runner!(StatusCode::BAD_REQUEST, "Unknown field {}", name),
        }
    }
    let Some(image) = opt_image else {
        bail_runner!(
            StatusCode::BAD_REQUEST,
            "Missing field image in multipart form"
        )
    };

    match state
        .stylist
        .run_detect(&state.policy, &image, state.fallback)
        .await
    {
        Ok(response) => Ok((StatusCode::OK, Json(response))),
        Err(err) => bail_runner!(
            StatusCode::SERVICE_UNAVAILABLE,
            "Styling service unavailable: {}",
            err
        ),
    }
}

#[axum_macros::debug_handler]
async fn handle_suggest_request(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> RunnerResult<(StatusCode, Json<SuggestResponse>)> {
    let mut params = StyleParams::default();
    let mut opt_image = None;

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "image" => opt_image = Some(read_image_field(field).await?),
            "occasion" => params.occasion = field.text().await?,
            "season" => params.season = field.text().await?,
            "gender" => params.gender = field.text().await?,
            "body_type" => params.body_type = field.text().await?,
            "age" => params.age = field.text().await?,
            "mood" => params.mood = field.text().await?,
            _ => bail_runner!(StatusCode::BAD_REQUEST, "Unknown field {}", name),
        }
    }
    let Some(image) = opt_image else {
        bail_runner!(
            StatusCode::BAD_REQUEST,
            "Missing field image in multipart form"
        )
    };

    match state
        .stylist
        .run_suggest(&state.policy, &image, &params, state.min_suggestion_chars)
        .await
    {
        Ok(response) => Ok((StatusCode::OK, Json(response))),
        Err(RetryError::Rejected { attempts }) => bail_runner!(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Incomplete suggestion after {} attempts",
            attempts
        ),
        Err(err) => bail_runner!(
            StatusCode::SERVICE_UNAVAILABLE,
            "Styling service unavailable: {}",
            err
        ),
    }
}

async fn read_image_field(field: Field<'_>) -> RunnerResult<ImagePayload> {
    if field
        .content_type()
        .map_or(false, |content| !VALID_IMAGE_MIME_TYPES.contains(&content))
    {
        bail_runner!(
            StatusCode::BAD_REQUEST,
            "Invalid mime type in content-type header for image field"
        );
    }
    if let Some(file_name) = field.file_name() {
        let lower = file_name.to_lowercase();
        if !VALID_IMAGE_EXTENSIONS
            .iter()
            .any(|ext| lower.ends_with(ext))
        {
            bail_runner!(StatusCode::BAD_REQUEST, "Invalid file type {}", file_name);
        }
    }

    let mime = field.content_type().unwrap_or("image/jpeg").to_string();
    let bytes = field.bytes().await?.to_vec().into_boxed_slice();
    Ok(ImagePayload { bytes, mime })
}

// As per the upload form: JPEG and PNG only
static VALID_IMAGE_MIME_TYPES: [&str; 2] = ["image/jpeg", "image/png"];
static VALID_IMAGE_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

#[macro_export]
macro_rules! exit_err {
    ($code:expr, $fmt:expr $(, $arg:expr)*) => {{
        tracing::error!($fmt $(, $arg)*);
        std::process::exit($code)
    }};
}
