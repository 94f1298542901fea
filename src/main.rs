use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;

mod api;
mod cli;
mod error;
mod metrics;
mod models;
mod services;
mod state;

use cli::CommandArgs;
use state::new_state;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CommandArgs::parse();
    let bind_address = args.bind_address();

    let state = new_state(&args)
        .with_context(|| format!("cannot create log dir {}", args.log_dir.display()))?;

    let removed = state.logger().purge_older_than(args.log_retention());
    log::info!(
        "Log retention in {}: {} days ({} old file(s) removed)",
        state.logger().log_dir().display(),
        args.log_retention_days,
        removed
    );

    state.start_background();
    print_banner(&args);

    let server_state = state.clone();
    let cors_origins = args.cors_origins.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(api::cors(&cors_origins))
            .wrap(middleware::NormalizePath::trim())
            .configure(api::configure)
    })
    .bind(&bind_address)
    .with_context(|| format!("cannot bind {}", bind_address))?
    .run()
    .await?;

    log::info!("🛑 Shutting down, stopping pollers");
    state.shutdown();
    Ok(())
}

fn print_banner(args: &CommandArgs) {
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║      Mini Orchestrator v{:<34}║", env!("CARGO_PKG_VERSION"));
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🚀 Server starting on http://{}", args.bind_address());
    println!("📊 Monitor interval: {}s", args.monitor_interval);
    println!("📁 Log directory: {}", args.log_dir.display());
    println!("🌐 CORS origins: {}", args.cors_origins.join(", "));
    println!();
    println!("📋 Available endpoints:");
    println!("  POST   /jobs                        - Start a job");
    println!("  GET    /jobs                        - List jobs");
    println!("  GET    /jobs/{{job_id}}               - Job details and live stats");
    println!("  DELETE /jobs/{{job_id}}               - Stop a job");
    println!("  POST   /jobs/{{job_id}}/restart       - Restart a job");
    println!("  GET    /logs/{{job_id}}?lines=N       - Tail a job log");
    println!("  DELETE /logs/{{job_id}}               - Delete a job log");
    println!("  POST   /logs/cleanup?days=N         - Remove old job logs");
    println!("  GET    /metrics                     - Prometheus metrics");
    println!("  GET    /metrics/system[/detailed]   - Host metrics");
    println!("  GET    /metrics/system/history      - Host history");
    println!("  GET    /metrics/process/{{pid}}       - Process metrics");
    println!("  GET    /metrics/process/{{pid}}/history");
    println!("  GET    /metrics/summary             - Overview");
    println!("  GET    /health                      - Health check");
    println!("═══════════════════════════════════════════════════════════");
}
