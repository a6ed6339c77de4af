use std::path::{Component, PathBuf};

use actix_files::NamedFile;
use actix_web::http::header::{ContentType, LOCATION};
use actix_web::http::StatusCode;
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::AppError;
use crate::state::AppState;
use crate::upstream::Submission;

/// Paths served by [`configure`], reported to the board with each post.
pub const ROUTES: &[&str] = &[
    "/",
    "/bbs",
    "/bbs/info",
    "/bbs/api",
    "/bbs/result",
    "/bbs/how",
    "/load_instance",
    "/static/{filename}",
];

fn default_channel() -> String {
    "main".to_string()
}

fn default_verify() -> String {
    "false".to_string()
}

#[derive(Deserialize)]
struct BoardParams {
    #[serde(default)]
    name: String,
    #[serde(default)]
    seed: String,
    #[serde(default = "default_channel")]
    channel: String,
    #[serde(default = "default_verify")]
    verify: String,
}

#[derive(Deserialize)]
struct ApiParams {
    /// Client-side cache buster; does not take part in server caching.
    t: String,
    #[serde(default = "default_channel")]
    channel: String,
    #[serde(default = "default_verify")]
    verify: String,
}

#[derive(Deserialize)]
struct SubmitBody {
    /// Base64 of the UTF-8 message text.
    message: String,
    name: Option<String>,
    seed: Option<String>,
    channel: Option<String>,
    verify: Option<String>,
}

#[get("/static/{filename:.*}")]
async fn get_static(
    filename: web::Path<String>,
    data: web::Data<AppState>,
) -> actix_web::Result<NamedFile> {
    let path = PathBuf::from(filename.into_inner());
    if path.components().any(|c| !matches!(c, Component::Normal(_))) {
        return Err(actix_web::error::ErrorNotFound("no such asset"));
    }
    Ok(NamedFile::open(data.static_dir.join(path))?)
}

#[get("/")]
async fn get_root() -> impl Responder {
    HttpResponse::TemporaryRedirect()
        .insert_header((LOCATION, "/bbs"))
        .finish()
}

#[get("/bbs")]
async fn get_board(
    params: web::Query<BoardParams>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let mut context = tera::Context::new();
    context.insert("name", &params.name);
    context.insert("seed", &params.seed);
    context.insert("channel", &params.channel);
    context.insert("verify", &params.verify);

    let output = data.tera.render("bbs.html", &context)?;
    Ok(HttpResponse::Ok().content_type(ContentType::html()).body(output))
}

#[get("/bbs/info")]
async fn get_info(data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let body = data.upstream.fetch_info().await?;
    Ok(HttpResponse::Ok().content_type(ContentType::html()).body(body))
}

#[get("/bbs/api")]
async fn get_api(
    params: web::Query<ApiParams>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let ApiParams { t, channel, verify } = params.into_inner();
    debug!(%t, %channel, %verify, "board snapshot requested");

    let upstream = &data.upstream;
    let key = (verify.clone(), channel.clone());
    let markup = data
        .api_cache
        .get_or_try_insert_with(key, || async move { upstream.fetch_api(&verify, &channel).await })
        .await?;

    let board = data.extractor.extract(&markup)?;
    Ok(HttpResponse::Ok()
        .content_type(ContentType::json())
        .body(board.to_json()?))
}

#[post("/bbs/result")]
async fn post_result(
    req: HttpRequest,
    body: web::Json<SubmitBody>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let submission = Submission {
        message: decode_message(&body.message)?,
        name: body.name.unwrap_or_default(),
        seed: body.seed.unwrap_or_default(),
        channel: body.channel.unwrap_or_else(default_channel),
        verify: body.verify.unwrap_or_else(default_verify),
        info: diagnostic_info(&req, data.external_url.as_deref())?,
    };
    info!(channel = %submission.channel, name = %submission.name, "relaying post");

    let relayed = data.upstream.submit(&submission).await?;

    let status = StatusCode::from_u16(relayed.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = HttpResponse::build(status);
    response.content_type(ContentType::html());
    if let Some(location) = relayed.location {
        response.insert_header((LOCATION, location));
    }
    Ok(response.body(relayed.body))
}

#[get("/bbs/how")]
async fn get_how(data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let upstream = &data.upstream;
    let text = data
        .how_cache
        .get_or_try_insert_with((), || upstream.fetch_how())
        .await?;
    Ok(HttpResponse::Ok().content_type(ContentType::plaintext()).body(text))
}

#[get("/load_instance")]
async fn load_instance(data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let current = data.upstream.reload_base(&data.instance_url).await?;
    Ok(HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body(current.to_string()))
}

/// Decodes a posted message and turns its newlines into board markup.
fn decode_message(encoded: &str) -> Result<String, AppError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| AppError::Validation(format!("message is not base64: {e}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| AppError::Validation(format!("message is not UTF-8: {e}")))?;
    Ok(text.replace('\n', "<br>"))
}

/// `[version, external url, request headers, routes]` as JSON.
fn diagnostic_info(req: &HttpRequest, external_url: Option<&str>) -> Result<String, AppError> {
    let headers: Vec<(&str, &str)> = req
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("")))
        .collect();
    Ok(serde_json::to_string(&(
        env!("CARGO_PKG_VERSION"),
        external_url,
        headers,
        ROUTES,
    ))?)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
    )
    .service(get_static)
    .service(get_root)
    .service(get_board)
    .service(get_info)
    .service(get_api)
    .service(post_result)
    .service(get_how)
    .service(load_instance);
}
