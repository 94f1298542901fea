use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use std::time::Duration;

use crate::api::{check_range, error_response};
use crate::error::JobError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_lines")]
    pub lines: u64,
}

fn default_lines() -> u64 {
    100
}

#[derive(Deserialize)]
pub struct CleanupQuery {
    #[serde(default = "default_days")]
    pub days: u64,
}

fn default_days() -> u64 {
    7
}

pub async fn get_logs(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<LogsQuery>,
) -> impl Responder {
    let job_id = path.into_inner();
    let lines = match check_range("lines", query.lines, 1, 10_000) {
        Ok(lines) => lines as usize,
        Err(resp) => return resp,
    };

    match data.logger().read_tail(&job_id, lines) {
        Ok(log_lines) if log_lines.is_empty() => {
            error_response(&JobError::NotFound(format!("logs of job {}", job_id)))
        }
        Ok(log_lines) => HttpResponse::Ok().json(serde_json::json!({
            "job_id": job_id,
            "total_lines": log_lines.len(),
            "lines": log_lines
        })),
        Err(e) => error_response(&e),
    }
}

pub async fn delete_logs(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let job_id = path.into_inner();

    match data.logger().delete(&job_id) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "message": format!("Logs of job {} deleted", job_id),
            "job_id": job_id
        })),
        Err(e) => error_response(&e),
    }
}

pub async fn cleanup_logs(
    data: web::Data<AppState>,
    query: web::Query<CleanupQuery>,
) -> impl Responder {
    let days = match check_range("days", query.days, 1, 365) {
        Ok(days) => days,
        Err(resp) => return resp,
    };

    let removed = data
        .logger()
        .purge_older_than(Duration::from_secs(days * 86_400));
    HttpResponse::Ok().json(serde_json::json!({
        "message": format!("Logs older than {} days removed", days),
        "removed": removed
    }))
}
