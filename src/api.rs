use std::any::Any;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::Local;
use rand::{rng, Rng};
use serde::Serialize;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ApiSettings;

pub const MAX_FLIPS: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Heads,
    Tails,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct FlipSummary {
    pub total: usize,
    pub heads: usize,
    pub tails: usize,
    pub heads_percentage: f64,
    pub tails_percentage: f64,
}

pub fn flip<R: Rng + ?Sized>(rng: &mut R) -> Side {
    if rng.random_bool(0.5) {
        Side::Heads
    } else {
        Side::Tails
    }
}

pub fn flip_many<R: Rng + ?Sized>(count: usize, rng: &mut R) -> (Vec<Side>, FlipSummary) {
    let results: Vec<Side> = (0..count).map(|_| flip(rng)).collect();
    let heads = results.iter().filter(|s| **s == Side::Heads).count();
    let tails = count - heads;
    let summary = FlipSummary {
        total: count,
        heads,
        tails,
        heads_percentage: percentage(heads, count),
        tails_percentage: percentage(tails, count),
    };
    (results, summary)
}

/// Share of `total` as a percentage, rounded to 2 decimals.
fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 10_000.0).round() / 100.0
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub fn router(debug: bool) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/flip", get(flip_once))
        .route("/flip/{count}", get(flip_count))
        .route("/stats", get(stats))
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(internal_error));
    if debug {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "message": "coin flip API",
        "endpoints": {
            "/": "API description",
            "/flip": "flip a coin once",
            "/flip/{count}": "flip a coin `count` times (1..=1000)",
            "/stats": "flip statistics",
        }
    }))
}

async fn flip_once() -> Json<serde_json::Value> {
    let side = flip(&mut rng());
    Json(json!({ "result": side, "timestamp": timestamp() }))
}

async fn flip_count(Path(raw): Path<String>) -> Response {
    let Some(count) = parse_count(&raw) else {
        return error(StatusCode::NOT_FOUND, "endpoint not found");
    };
    if count <= 0 {
        return error(StatusCode::BAD_REQUEST, "count must be a positive number");
    }
    if count > MAX_FLIPS {
        return error(StatusCode::BAD_REQUEST, "maximum number of flips is 1000");
    }

    let (results, summary) = flip_many(count as usize, &mut rng());
    Json(json!({
        "results": results,
        "summary": summary,
        "timestamp": timestamp(),
    }))
    .into_response()
}

/// Integer path segment. Out-of-range integers saturate so they still hit the bounds checks.
fn parse_count(raw: &str) -> Option<i64> {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(raw.parse().unwrap_or(if raw.starts_with('-') { i64::MIN } else { i64::MAX }))
}

async fn stats() -> Json<serde_json::Value> {
    Json(json!({
        "message": "flip statistics",
        "note": "demo API, statistics are not kept between requests",
        "possible_results": [Side::Heads, Side::Tails],
        "timestamp": timestamp(),
    }))
}

async fn not_found() -> Response {
    error(StatusCode::NOT_FOUND, "endpoint not found")
}

fn internal_error(_panic: Box<dyn Any + Send + 'static>) -> Response {
    error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

/// Serve on `0.0.0.0:port` until Ctrl-C.
pub async fn serve(settings: ApiSettings) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(%addr, debug = settings.debug, "coin flip API listening");

    axum::serve(listener, router(settings.debug))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
