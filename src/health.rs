use actix_web::dev::ServerHandle;
use actix_web::{App, HttpResponse, HttpServer, Responder, get};
use tracing::{error, info};

#[get("/health")]
async fn health_check() -> impl Responder {
    // Just return a 200 OK response
    HttpResponse::Ok().body("OK")
}

/// Starts the health endpoint in the background and returns a handle to stop it.
pub fn spawn_health_server(port: u16) -> std::io::Result<ServerHandle> {
    let server = HttpServer::new(|| App::new().service(health_check))
        .bind(("0.0.0.0", port))? // Binds to all interfaces
        .disable_signals()
        .workers(1)
        .run();
    let handle = server.handle();

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Health server failed: {}", e);
        }
    });
    info!(port, "Health check server running.");

    Ok(handle)
}
