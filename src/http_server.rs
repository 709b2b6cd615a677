// ============================================================================
// HTTP Surface
// ============================================================================

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::HttpConfig;
use crate::facade::{QueryResult, ScheduleService, local_now};

/// Source of "now" for queries.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    service: Arc<ScheduleService>,
    clock: Clock,
}

impl AppState {
    pub fn new(service: Arc<ScheduleService>) -> Self {
        Self::with_clock(service, Arc::new(local_now))
    }

    pub fn with_clock(service: Arc<ScheduleService>, clock: Clock) -> Self {
        Self { service, clock }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ErrorResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

// ============================================================================
// Routes
// ============================================================================

async fn get_next_stop(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let raw_code = path.into_inner();
    let stop_code = match raw_code.trim().parse::<u32>() {
        Ok(code) if code > 0 => code,
        _ => {
            return HttpResponse::BadRequest()
                .json(ErrorResponse::new("Stop code must be a positive integer"));
        }
    };

    let now = (state.clock)();
    let service = state.service.clone();
    match tokio::task::spawn_blocking(move || service.get_next_stop(stop_code, now)).await {
        Ok(QueryResult::Found(next)) => HttpResponse::Ok().json(next.payload(None)),
        Ok(QueryResult::NoMoreService) => {
            info!(stop_code, "No more buses for today");
            HttpResponse::Ok().json(ErrorResponse::new("No more buses for today"))
        }
        Ok(QueryResult::StopNotFound) => {
            warn!(stop_code, "Stop code not found");
            HttpResponse::NotFound().json(ErrorResponse::new("Stop code not found"))
        }
        Err(e) => {
            error!(error = %e, "Next stop query panicked");
            HttpResponse::InternalServerError().json(ErrorResponse::new("Query failed"))
        }
    }
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

async fn force_refresh(state: web::Data<AppState>) -> HttpResponse {
    info!("Manual refresh requested");

    let service = state.service.clone();
    match tokio::task::spawn_blocking(move || service.force_refresh()).await {
        Ok(Ok(())) => {
            info!("Manual refresh completed");
            HttpResponse::Ok().json(serde_json::json!({ "status": "refreshed" }))
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Manual refresh failed");
            HttpResponse::BadGateway().json(ErrorResponse::new(format!("Refresh failed: {}", e)))
        }
        Err(e) => {
            error!(error = %e, "Manual refresh task panicked");
            HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Refresh task panicked"))
        }
    }
}

/// Registers the routes under `/{route_prefix}` plus `/health`.
pub fn configure(cfg: &mut web::ServiceConfig, route_prefix: &str) {
    cfg.route("/health", web::get().to(health_check)).service(
        web::scope(&format!("/{}", route_prefix))
            .route("/nextstop/{stop_code}", web::get().to(get_next_stop))
            .route("/refresh", web::post().to(force_refresh)),
    );
}

// ============================================================================
// Server Setup
// ============================================================================

pub async fn run_server(config: HttpConfig, state: AppState) -> std::io::Result<()> {
    info!(
        host = %config.host,
        port = config.port,
        prefix = %config.route_prefix,
        "Starting HTTP server"
    );

    let route_prefix = config.route_prefix.clone();
    HttpServer::new(move || {
        let cors = Cors::permissive();
        let route_prefix = route_prefix.clone();

        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default().exclude("/health"))
            .configure(move |cfg| configure(cfg, &route_prefix))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
