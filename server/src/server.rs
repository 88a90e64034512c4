/// HTTP server factory and configuration.
/// Provides a reusable function to create and configure the HTTP server
/// for use in both the main binary and tests.

use crate::db::DbPool;
use crate::handlers::{create_chat, get_messages, health, send_message, ServerConfig};
use actix_web::{middleware, web, App, HttpServer};

/// Register every route on an app
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/chats", web::post().to(create_chat))
        .route("/chats/{chat_id}/messages", web::get().to(get_messages))
        .route("/chats/{chat_id}/messages", web::post().to(send_message));
}

/// Create a configured HTTP server
///
/// # Arguments
/// * `pool` - Database connection pool wrapped in web::Data
/// * `config` - Handler settings wrapped in web::Data
/// * `bind_addr` - Address to bind the server to (e.g., "127.0.0.1:4000")
///
/// # Example
/// ```ignore
/// let pool = web::Data::new(db::create_pool("storychat.db")?);
/// let config = web::Data::new(ServerConfig::default());
/// let server = server::create_http_server(pool, config, "127.0.0.1:4000")?;
/// server.await?;
/// ```
pub fn create_http_server(
    pool: web::Data<DbPool>,
    config: web::Data<ServerConfig>,
    bind_addr: &str,
) -> std::io::Result<actix_web::dev::Server> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(pool.clone())
            .app_data(config.clone())
            .wrap(middleware::Logger::default())
            .configure(routes)
    })
    .bind(bind_addr)?
    .run();

    Ok(server)
}

/// Create a test HTTP server with an in-memory database and default settings
///
/// Binds to a random available port.
///
/// # Returns
/// A tuple of (server, bind_address) where bind_address can be used to make requests
#[cfg(any(test, feature = "test_utils"))]
pub fn create_test_http_server() -> std::io::Result<(actix_web::dev::Server, String)> {
    create_test_http_server_with(ServerConfig::default())
}

/// Like `create_test_http_server`, with explicit handler settings
#[cfg(any(test, feature = "test_utils"))]
pub fn create_test_http_server_with(
    config: ServerConfig,
) -> std::io::Result<(actix_web::dev::Server, String)> {
    let pool = web::Data::new(crate::db::create_test_pool());
    let config = web::Data::new(config);

    // Bind to 127.0.0.1:0 to get a random available port
    let server = HttpServer::new(move || {
        App::new()
            .app_data(pool.clone())
            .app_data(config.clone())
            .wrap(middleware::Logger::default())
            .configure(routes)
    })
    .workers(1)
    .bind("127.0.0.1:0")?;

    let addr_str = server
        .addrs()
        .first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "No bind address found"))?
        .to_string();

    Ok((server.run(), addr_str))
}
