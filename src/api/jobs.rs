use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use crate::api::error_response;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateJobRequest {
    pub command: Vec<String>,
    #[serde(default)]
    pub job_id: Option<String>,
}

pub async fn create_job(
    data: web::Data<AppState>,
    req: web::Json<CreateJobRequest>,
) -> impl Responder {
    let req = req.into_inner();

    match data.create_job(req.command, req.job_id).await {
        Ok(view) => HttpResponse::Created().json(serde_json::json!({
            "job_id": view.job.job_id,
            "pid": view.job.pid,
            "command": view.job.command,
            "status": view.job.status,
            "message": format!("Job {} started", view.job.job_id)
        })),
        Err(e) => error_response(&e),
    }
}

pub async fn list_jobs(data: web::Data<AppState>) -> impl Responder {
    let jobs = data.list_jobs().await;
    HttpResponse::Ok().json(serde_json::json!({
        "total": jobs.len(),
        "jobs": jobs
    }))
}

pub async fn get_job(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match data.get_job(&path.into_inner()).await {
        Ok(view) => HttpResponse::Ok().json(view),
        Err(e) => error_response(&e),
    }
}

pub async fn stop_job(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let job_id = path.into_inner();

    match data.stop_job(&job_id).await {
        Ok(stopped) => HttpResponse::Ok().json(serde_json::json!({
            "message": format!("Job {} stopped", job_id),
            "job_id": stopped.job_id,
            "pid": stopped.pid,
            "exit_code": stopped.exit_code
        })),
        Err(e) => error_response(&e),
    }
}

pub async fn restart_job(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match data.restart_job(&path.into_inner()).await {
        Ok(view) => HttpResponse::Created().json(serde_json::json!({
            "job_id": view.job.job_id,
            "pid": view.job.pid,
            "command": view.job.command,
            "status": view.job.status,
            "message": format!("Job {} restarted", view.job.job_id)
        })),
        Err(e) => error_response(&e),
    }
}
