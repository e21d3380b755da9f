use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{HeaderName, HeaderValue, Uri, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use image::{DynamicImage, GenericImageView};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, instrument};

use crate::config::{self, ConfigManager};
use crate::convert::{self, ExportFormat, SizeReport};
use crate::download::download_filename;
use crate::error::ApiError;
use crate::extract::{self, ExtractOptions};
use crate::pipeline::{self, PreparedImage, RecolourParams};
use crate::recolour::{ColourPair, Palette, RecolourSettings};
use crate::resize::{self, ResizeMode};
use crate::tile;

/// Largest accepted upload body.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

const X_EFFECTIVE_PALETTE: &str = "x-effective-palette";
const X_ORIGINAL_SIZE: &str = "x-original-size";
const X_CONVERTED_SIZE: &str = "x-converted-size";
const X_SIZE_CHANGE: &str = "x-size-change";

#[derive(Clone)]
pub struct AppState {
    pub cfg: config::SharedConfig,
}

/// Multipart fields shared by every image route.
struct Upload {
    bytes: Vec<u8>,
    name: Option<String>,
    options: Option<String>,
}

impl Upload {
    fn options<T: DeserializeOwned + Default>(&self) -> Result<T, ApiError> {
        match self.options.as_deref().map(str::trim) {
            None | Some("") => Ok(T::default()),
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| ApiError::BadRequest(format!("invalid options: {e}"))),
        }
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut bytes = None;
    let mut file_name = None;
    let mut name = None;
    let mut options = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                bytes = Some(data.to_vec());
            }
            Some("name") => {
                name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                );
            }
            Some("options") => {
                options = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                );
            }
            other => tracing::debug!(field = ?other, "ignoring multipart field"),
        }
    }
    let bytes = bytes
        .filter(|b| !b.is_empty())
        .ok_or(ApiError::MissingField("file"))?;
    Ok(Upload {
        bytes,
        name: name.or(file_name),
        options,
    })
}

/// Run CPU-bound image work off the async executor.
async fn run_blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("image worker failed: {e}")))?
}

fn decode_upload(bytes: &[u8]) -> Result<DynamicImage, ApiError> {
    pipeline::decode(bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

fn header_value(v: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(v).map_err(|e| ApiError::Internal(format!("bad header value: {e}")))
}

/// Image body with content type, download name and any extra headers.
fn image_response(
    bytes: Vec<u8>,
    format: ExportFormat,
    filename: &str,
    extra: &[(&'static str, String)],
) -> Result<Response, ApiError> {
    let mut res = bytes.into_response();
    let headers = res.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(format.mime_type()),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&format!("attachment; filename=\"{filename}\""))?,
    );
    for (name, v) in extra {
        headers.insert(HeaderName::from_static(*name), header_value(v)?);
    }
    Ok(res)
}

fn palette_header(palette: &Palette) -> String {
    palette
        .pairs
        .iter()
        .map(|p| format!("{}>{}", p.target.to_hex(), p.replacement.to_hex()))
        .collect::<Vec<_>>()
        .join(",")
}

// Logs all 4xx/5xx responses with method, URI, status and latency.
async fn log_error_responses(req: axum::extract::Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();
    let res = next.run(req).await;
    let status = res.status();
    if status.is_server_error() {
        tracing::error!(%method, %uri, %status, elapsed_ms = start.elapsed().as_millis(), "http 5xx");
    } else if status.is_client_error() {
        tracing::warn!(%method, %uri, %status, elapsed_ms = start.elapsed().as_millis(), "http 4xx");
    }
    res
}

pub async fn get_config(State(state): State<AppState>) -> Result<Json<config::Config>, ApiError> {
    Ok(Json(ConfigManager::to_struct(&state.cfg).await?))
}

#[derive(Deserialize, Default)]
pub struct PreferencesUpdate {
    #[serde(default)]
    pub tolerance: Option<u32>,
    #[serde(default)]
    pub multiplier_mode: Option<bool>,
    /// Replaces the whole palette.
    #[serde(default)]
    pub pairs: Option<Vec<ColourPair>>,
    /// Grow or shrink the palette, filling from the defaults.
    #[serde(default)]
    pub pair_count: Option<usize>,
    #[serde(default)]
    pub remove_pair: Option<usize>,
    #[serde(default)]
    pub extract: Option<ExtractOptions>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub resize_mode: Option<ResizeMode>,
    #[serde(default)]
    pub lock_aspect_ratio: Option<bool>,
    #[serde(default)]
    pub tile_size: Option<u32>,
}

#[instrument(err, skip_all)]
pub async fn patch_preferences(
    State(state): State<AppState>,
    Json(payload): Json<PreferencesUpdate>,
) -> Result<Json<config::Config>, ApiError> {
    // reject bad values before anything is touched
    let format = payload
        .format
        .as_deref()
        .map(str::parse::<ExportFormat>)
        .transpose()?;
    if let Some(q) = payload.quality
        && q > 100
    {
        return Err(ApiError::BadRequest(format!("quality {q} out of range 0..=100")));
    }
    if payload.tile_size == Some(0) {
        return Err(ApiError::BadRequest("tile size must be positive".into()));
    }

    let checkpoint = ConfigManager::checkpoint(&state.cfg).await;
    if let Err(e) = apply_preferences(&state.cfg, payload, format).await {
        ConfigManager::restore(&state.cfg, checkpoint).await;
        return Err(e);
    }
    ConfigManager::save(&state.cfg).await?;

    Ok(Json(ConfigManager::to_struct(&state.cfg).await?))
}

async fn apply_preferences(
    cfg: &config::SharedConfig,
    payload: PreferencesUpdate,
    format: Option<ExportFormat>,
) -> Result<(), ApiError> {
    let bad = |e: anyhow::Error| ApiError::BadRequest(format!("{e:#}"));

    if payload.pairs.is_some() || payload.pair_count.is_some() || payload.remove_pair.is_some() {
        let current = ConfigManager::to_struct(cfg).await?;
        let mut palette = payload
            .pairs
            .map(Palette::new)
            .unwrap_or_else(|| current.recolour.palette());
        if let Some(count) = payload.pair_count {
            palette = palette.resized(count);
        }
        if let Some(index) = payload.remove_pair
            && !palette.remove_pair(index)
        {
            tracing::debug!(index, pairs = palette.len(), "pair removal refused");
        }
        ConfigManager::set_recolour_palette(cfg, &palette)
            .await
            .map_err(bad)?;
    }
    if payload.tolerance.is_some() || payload.multiplier_mode.is_some() {
        ConfigManager::set_recolour_settings(cfg, payload.tolerance, payload.multiplier_mode)
            .await
            .map_err(bad)?;
    }
    if let Some(opts) = &payload.extract {
        ConfigManager::set_extract_options(cfg, opts)
            .await
            .map_err(bad)?;
    }
    if format.is_some() || payload.quality.is_some() {
        ConfigManager::set_convert_defaults(cfg, format, payload.quality)
            .await
            .map_err(bad)?;
    }
    if payload.resize_mode.is_some() || payload.lock_aspect_ratio.is_some() {
        ConfigManager::set_resize_defaults(cfg, payload.resize_mode, payload.lock_aspect_ratio)
            .await
            .map_err(bad)?;
    }
    if let Some(size) = payload.tile_size {
        ConfigManager::set_tile_size(cfg, size).await.map_err(bad)?;
    }
    Ok(())
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

#[derive(Deserialize, Default)]
pub struct RecolourOptions {
    #[serde(default)]
    pub pairs: Option<Vec<ColourPair>>,
    #[serde(default)]
    pub tolerance: Option<u32>,
    #[serde(default)]
    pub multiplier_mode: Option<bool>,
    /// Store the applied palette and settings as the new defaults.
    #[serde(default)]
    pub persist: bool,
}

pub async fn recolour_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = read_upload(multipart).await?;
    let opts: RecolourOptions = upload.options()?;
    let cfg = ConfigManager::to_struct(&state.cfg).await?;
    let palette = opts
        .pairs
        .map(Palette::new)
        .unwrap_or_else(|| cfg.recolour.palette());
    let settings = RecolourSettings {
        tolerance: opts.tolerance.unwrap_or(cfg.recolour.tolerance),
        multiplier_mode: opts.multiplier_mode.unwrap_or(cfg.recolour.multiplier_mode),
    };

    let bytes = upload.bytes;
    let (png, effective) = run_blocking(move || {
        let img = decode_upload(&bytes)?;
        let (prepared, effective) = pipeline::process(RecolourParams {
            image: &img,
            palette: &palette,
            settings,
        });
        Ok((prepared.encode(ExportFormat::Png, 0)?, effective))
    })
    .await?;

    if opts.persist {
        ConfigManager::set_recolour_palette(&state.cfg, &effective).await?;
        ConfigManager::set_recolour_settings(
            &state.cfg,
            Some(settings.tolerance),
            Some(settings.multiplier_mode),
        )
        .await?;
        ConfigManager::save(&state.cfg).await?;
    }

    let filename = download_filename(upload.name.as_deref(), "recoloured", None, "png");
    image_response(
        png,
        ExportFormat::Png,
        &filename,
        &[(X_EFFECTIVE_PALETTE, palette_header(&effective))],
    )
}

#[derive(Deserialize, Default)]
pub struct DetectOptions {
    /// Per-request extractor overrides; the configured options otherwise.
    #[serde(default)]
    pub extract: Option<ExtractOptions>,
    #[serde(default)]
    pub persist: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedColour {
    pub hex: String,
    pub rgb: [u8; 3],
    pub count: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectResponse {
    pub width: u32,
    pub height: u32,
    pub colours: Vec<DetectedColour>,
    pub palette: Palette,
    pub persisted: bool,
}

pub async fn detect_palette(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DetectResponse>, ApiError> {
    let upload = read_upload(multipart).await?;
    let opts: DetectOptions = upload.options()?;
    let cfg = ConfigManager::to_struct(&state.cfg).await?;
    let extract_opts = opts.extract.unwrap_or_else(|| cfg.extract.clone());

    let bytes = upload.bytes;
    let (width, height, detected) = run_blocking(move || {
        let img = decode_upload(&bytes)?;
        let (w, h) = img.dimensions();
        Ok((w, h, extract::detect(&img, &extract_opts)))
    })
    .await?;

    let palette = cfg.recolour.palette().with_detected_targets(&detected);
    let persist = opts.persist && !palette.is_empty();
    if persist {
        ConfigManager::set_recolour_palette(&state.cfg, &palette).await?;
        ConfigManager::save(&state.cfg).await?;
    }
    tracing::info!(colours = detected.len(), persisted = persist, "detected palette");

    let colours = detected
        .iter()
        .map(|d| DetectedColour {
            hex: d.colour.to_hex(),
            rgb: d.colour.channels(),
            count: d.count,
        })
        .collect();
    Ok(Json(DetectResponse {
        width,
        height,
        colours,
        palette,
        persisted: persist,
    }))
}

#[derive(Deserialize, Default)]
pub struct ConvertOptions {
    /// Format name or MIME type.
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub quality: Option<u8>,
}

pub async fn convert_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = read_upload(multipart).await?;
    let opts: ConvertOptions = upload.options()?;
    let cfg = ConfigManager::to_struct(&state.cfg).await?;
    let format = match opts.format.as_deref() {
        Some(f) => f.parse::<ExportFormat>()?,
        None => cfg.convert.format,
    };
    let quality = opts.quality.unwrap_or(cfg.convert.quality);
    if !format.uses_quality() && opts.quality.is_some() {
        tracing::debug!(format = ?format, "quality ignored for lossless format");
    }
    if quality > 100 {
        return Err(ApiError::BadRequest(format!(
            "quality {quality} out of range 0..=100"
        )));
    }

    let bytes = upload.bytes;
    let original = bytes.len();
    let encoded = run_blocking(move || {
        let img = decode_upload(&bytes)?;
        Ok(convert::encode(&img, format, quality)?)
    })
    .await?;

    let report = SizeReport {
        original,
        converted: encoded.len(),
    };
    tracing::info!(format = ?format, quality, summary = %report.summary(), "converted image");
    let filename = download_filename(
        upload.name.as_deref(),
        "converted",
        None,
        format.extension(),
    );
    image_response(
        encoded,
        format,
        &filename,
        &[
            (X_ORIGINAL_SIZE, convert::format_file_size(report.original)),
            (X_CONVERTED_SIZE, convert::format_file_size(report.converted)),
            (X_SIZE_CHANGE, report.summary()),
        ],
    )
}

#[derive(Deserialize, Default)]
pub struct ResizeOptions {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub mode: Option<ResizeMode>,
    #[serde(default)]
    pub lock_aspect_ratio: Option<bool>,
}

pub async fn resize_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = read_upload(multipart).await?;
    let opts: ResizeOptions = upload.options()?;
    let cfg = ConfigManager::to_struct(&state.cfg).await?;
    let mode = opts.mode.unwrap_or(cfg.resize.mode);
    let lock = opts
        .lock_aspect_ratio
        .unwrap_or(cfg.resize.lock_aspect_ratio);

    let bytes = upload.bytes;
    let (png, (w, h)) = run_blocking(move || {
        let img = decode_upload(&bytes)?;
        let (w, h) = resize::target_dimensions(opts.width, opts.height, img.dimensions(), lock);
        let out = resize::resize(&img, w, h, mode)?;
        let png = PreparedImage::from_image(&out).encode(ExportFormat::Png, 0)?;
        Ok((png, (w, h)))
    })
    .await?;

    let dims = format!("{w}x{h}");
    let filename = download_filename(upload.name.as_deref(), "resized", Some(&dims), "png");
    image_response(png, ExportFormat::Png, &filename, &[])
}

#[derive(Deserialize, Default)]
pub struct TileOptions {
    #[serde(default)]
    pub tile_size: Option<u32>,
    /// Output canvas; defaults to a few tiles in each direction.
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub mode: Option<ResizeMode>,
}

pub async fn tile_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = read_upload(multipart).await?;
    let opts: TileOptions = upload.options()?;
    let cfg = ConfigManager::to_struct(&state.cfg).await?;
    let tile_size = opts.tile_size.unwrap_or(cfg.tile.tile_size);
    let mode = opts.mode.unwrap_or(cfg.resize.mode);

    let bytes = upload.bytes;
    let png = run_blocking(move || {
        let img = decode_upload(&bytes)?;
        let (iw, ih) = img.dimensions();
        let (dw, dh) = tile::default_canvas(tile_size, iw, ih);
        let canvas = tile::render_tiled(
            &img,
            tile_size,
            opts.width.unwrap_or(dw),
            opts.height.unwrap_or(dh),
            mode,
        )?;
        Ok(convert::encode(
            &DynamicImage::ImageRgba8(canvas),
            ExportFormat::Png,
            0,
        )?)
    })
    .await?;

    let filename = download_filename(upload.name.as_deref(), "tiled", None, "png");
    image_response(png, ExportFormat::Png, &filename, &[])
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    let trace = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_failure(DefaultOnFailure::new().level(Level::ERROR));

    let images = Router::new()
        .route("/recolour", post(recolour_image))
        .route("/palette/detect", post(detect_palette))
        .route("/convert", post(convert_image))
        .route("/resize", post(resize_image))
        .route("/tile", post(tile_image))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));

    let api = Router::new()
        .route("/config", get(get_config))
        .route("/preferences", patch(patch_preferences))
        .merge(images)
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
        .layer(trace)
        .layer(middleware::from_fn(log_error_responses));

    Router::new().nest("/api", api)
}

/// Serve the HTTP API. If `bind` is Some it is parsed as a socket address, otherwise
/// defaults to 0.0.0.0:8080.
pub async fn serve(app: Router, bind: Option<String>) -> anyhow::Result<()> {
    let bind_addr = bind.unwrap_or_else(|| "0.0.0.0:8080".to_string());
    let addr: SocketAddr = bind_addr.parse()?;
    tracing::info!(addr=%addr, "starting http server");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
