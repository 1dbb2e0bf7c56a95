use std::time::Duration;

use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};

use super::{configure, AppState};

/// Bind the HTTP server. The returned server runs once awaited or spawned.
///
/// Signal handling stays with the caller, which stops the server through
/// its handle during shutdown.
pub fn build_server(state: AppState, addr: &str, shutdown_timeout: Duration) -> std::io::Result<Server> {
    tracing::info!(addr = %addr, "Starting HTTP server");

    let data = web::Data::new(state);
    let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .bind(addr)?
        .disable_signals()
        .shutdown_timeout(shutdown_timeout.as_secs())
        .run();

    Ok(server)
}
