use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use std::time::Duration;

use crate::api::{check_range, error_response};
use crate::error::JobError;
use crate::metrics::METRICS;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_minutes")]
    pub minutes: u64,
}

fn default_minutes() -> u64 {
    5
}

fn history_window(query: &HistoryQuery) -> Result<Duration, HttpResponse> {
    check_range("minutes", query.minutes, 1, 60).map(|m| Duration::from_secs(m * 60))
}

/// Prometheus text exposition
pub async fn get_metrics(data: web::Data<AppState>) -> impl Responder {
    let jobs = data.list_jobs().await;
    METRICS.update_jobs(&jobs);

    let system = match data.history().latest_system() {
        Some(snapshot) => snapshot,
        None => data.system().snapshot_async().await,
    };
    METRICS.update_system(&system, data.monitor().monitored_count());

    match METRICS.render() {
        Ok(metrics_text) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(metrics_text),
        Err(e) => {
            log::error!("Failed to render metrics: {}", e);
            HttpResponse::InternalServerError().body("Failed to render metrics")
        }
    }
}

/// CPU and RAM only
pub async fn get_system_metrics(data: web::Data<AppState>) -> impl Responder {
    let snapshot = data.system().snapshot_async().await;
    HttpResponse::Ok().json(serde_json::json!({
        "cpu_percent": snapshot.cpu_percent,
        "ram_total_mb": snapshot.ram_total_mb,
        "ram_used_mb": snapshot.ram_used_mb,
        "ram_percent": snapshot.ram_percent,
        "timestamp": snapshot.timestamp
    }))
}

/// Full snapshot, also appended to the system history
pub async fn get_system_detailed(data: web::Data<AppState>) -> impl Responder {
    let snapshot = data.system().snapshot_async().await;
    data.history().record_system(snapshot.clone());
    HttpResponse::Ok().json(snapshot)
}

pub async fn get_system_history(
    data: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> impl Responder {
    match history_window(&query) {
        Ok(since) => HttpResponse::Ok().json(data.history().query_system(since)),
        Err(resp) => resp,
    }
}

/// Live sample and latest detailed snapshot of one pid
pub async fn get_process_metrics(data: web::Data<AppState>, path: web::Path<u32>) -> impl Responder {
    let pid = path.into_inner();
    let live = data.monitor().get_stats(pid);
    let latest = data.history().latest_process(pid);

    if live.is_none() && latest.is_none() {
        return error_response(&JobError::pid_not_found(pid));
    }
    HttpResponse::Ok().json(serde_json::json!({
        "pid": pid,
        "monitored": data.monitor().is_monitoring(pid),
        "live": live,
        "latest": latest
    }))
}

pub async fn get_process_history(
    data: web::Data<AppState>,
    path: web::Path<u32>,
    query: web::Query<HistoryQuery>,
) -> impl Responder {
    match history_window(&query) {
        Ok(since) => {
            HttpResponse::Ok().json(data.history().query_process(path.into_inner(), since))
        }
        Err(resp) => resp,
    }
}

pub async fn get_summary(data: web::Data<AppState>) -> impl Responder {
    let system = data.system().snapshot_async().await;
    let pids = data.history().monitored_pids();
    let mut processes: Vec<_> = data
        .registry()
        .list()
        .into_values()
        .map(|handle| {
            serde_json::json!({
                "pid": handle.pid,
                "command": handle.command,
                "started_at": handle.started_at
            })
        })
        .collect();
    processes.sort_by_key(|p| p["pid"].as_u64());

    HttpResponse::Ok().json(serde_json::json!({
        "system": system,
        "system_history_len": data.history().system_len(),
        "monitored_processes": data.monitor().monitored_count(),
        "process_pids": pids,
        "processes": processes,
        "live_stats": data.monitor().get_all_stats()
    }))
}
