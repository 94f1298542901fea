pub mod jobs;
pub mod logs;
pub mod metrics;

pub use jobs::{create_job, get_job, list_jobs, restart_job, stop_job};
pub use logs::{cleanup_logs, delete_logs, get_logs};
pub use metrics::{
    get_metrics, get_process_history, get_process_metrics, get_system_detailed,
    get_system_history, get_system_metrics, get_summary,
};

use actix_cors::Cors;
use actix_web::{web, HttpResponse, Responder};

use crate::error::JobError;
use crate::state::AppState;

pub async fn root() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "app": "Mini Orchestrator",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "jobs": "/jobs",
            "metrics": "/metrics",
            "logs": "/logs",
            "health": "/health"
        }
    }))
}

pub async fn health(data: web::Data<AppState>) -> impl Responder {
    let system = data.system().snapshot_async().await;
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "system": {
            "cpu_percent": system.cpu_percent,
            "ram_total_mb": system.ram_total_mb,
            "ram_used_mb": system.ram_used_mb,
            "ram_percent": system.ram_percent,
            "timestamp": system.timestamp
        },
        "active_jobs": data.job_count(),
        "monitored_processes": data.monitor().monitored_count()
    }))
}

pub(crate) fn error_response(err: &JobError) -> HttpResponse {
    let body = serde_json::json!({
        "status": "error",
        "message": err.to_string()
    });

    match err {
        JobError::NotFound(_) => HttpResponse::NotFound().json(body),
        e if e.is_client_error() => HttpResponse::BadRequest().json(body),
        e => {
            log::error!("Request failed: {}", e);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Rejects a query value outside `min..=max` with a 400.
pub(crate) fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<u64, HttpResponse> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(HttpResponse::BadRequest().json(serde_json::json!({
            "status": "error",
            "message": format!("'{}' must be between {} and {}", name, min, max)
        })))
    }
}

/// Browser access for `origins`; `*` allows any origin.
pub fn cors(origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .supports_credentials()
        .max_age(3600);

    origins.iter().fold(cors, |cors, origin| match origin.as_str() {
        "*" => cors.allow_any_origin(),
        origin => cors.allowed_origin(origin),
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(root))
        .route("/health", web::get().to(health))
        .route("/jobs", web::post().to(create_job))
        .route("/jobs", web::get().to(list_jobs))
        .route("/jobs/{job_id}", web::get().to(get_job))
        .route("/jobs/{job_id}", web::delete().to(stop_job))
        .route("/jobs/{job_id}/restart", web::post().to(restart_job))
        .route("/logs/cleanup", web::post().to(cleanup_logs))
        .route("/logs/{job_id}", web::get().to(get_logs))
        .route("/logs/{job_id}", web::delete().to(delete_logs))
        .route("/metrics", web::get().to(get_metrics))
        .route("/metrics/summary", web::get().to(get_summary))
        .route("/metrics/system", web::get().to(get_system_metrics))
        .route("/metrics/system/detailed", web::get().to(get_system_detailed))
        .route("/metrics/system/history", web::get().to(get_system_history))
        .route("/metrics/process/{pid}", web::get().to(get_process_metrics))
        .route("/metrics/process/{pid}/history", web::get().to(get_process_history));
}
