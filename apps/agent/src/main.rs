#![warn(clippy::all, clippy::pedantic)]

use std::net::SocketAddr;

use actix_web::{App, HttpServer, web};
use clap::Parser;

mod error;
mod routes;

use error::AppError;

/// Regional probe agent: executes checks dispatched by the core service
/// and reports normalized results back.
#[derive(Parser)]
#[command(name = "watchpost-agent")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8081")]
    listen: String,

    /// Region code stamped on every probe result
    #[arg(short, long)]
    region: String,

    /// Cap on response body bytes captured for validation
    #[arg(long, default_value_t = 256 * 1024)]
    body_capture_limit: usize,
}

/// Shared per-process agent settings
pub struct AgentState {
    pub region: String,
    pub body_capture_limit: usize,
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logger::init();

    let args = Args::parse();
    let addr: SocketAddr = args.listen.parse()?;

    tracing::info!(region = %args.region, %addr, "Starting regional agent");
    run_server(addr, args.region, args.body_capture_limit).await
}

async fn run_server(addr: SocketAddr, region: String, body_capture_limit: usize) -> Result<(), AppError> {
    let state = web::Data::new(AgentState { region, body_capture_limit });

    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes::routes))
        .bind(addr)?
        .run()
        .await?;

    Ok(())
}
