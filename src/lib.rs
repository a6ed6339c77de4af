//! Caching JSON gateway in front of a remote bulletin board.
//!
//! The board only renders HTML. This crate fetches it with the board's session
//! cookie, scrapes the message table into [`board::Board`] records and serves
//! them as JSON next to a small HTML front-end.

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use futures::executor::block_on;
use tracing::info;

pub mod board;
pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod routes;
pub mod state;
pub mod upstream;

use config::Config;
use state::AppState;

pub async fn start_server(config: Config) -> anyhow::Result<()> {
    info!(upstream = %config.upstream_url, "initializing state");
    let app_data = web::Data::new(AppState::new(&config)?);

    let (host, port) = config.bind_address();
    info!("binding to {host}:{port}");

    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Compress::default())
            .wrap(middleware::Logger::default())
            .app_data(app_data.clone())
            .configure(routes::configure)
    })
    .bind((host.as_str(), port))
    .with_context(|| format!("could not bind {host}:{port}"))?
    .disable_signals()
    .run();

    let handle = server.handle();
    ctrlc::set_handler(move || {
        info!("received Ctrl+C, shutting down");
        block_on(handle.stop(true));
    })
    .context("could not set up Ctrl+C handler")?;

    server.await?;
    info!("server stopped");
    Ok(())
}
