use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pinconfirm_server::bootstrap::bootstrap;
use pinconfirm_server::config::ServerConfig;
use pinconfirm_server::cors::build_cors;
use pinconfirm_server::routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    tracing::debug!(?config, "configuration loaded");

    let state = match bootstrap(&config) {
        Ok(s) => web::Data::from(s),
        Err(e) => {
            tracing::error!("Refusing to start: {e}");
            std::process::exit(1);
        }
    };

    let port = config.port;
    tracing::info!("PIN confirmation server listening on port {port}");
    tracing::info!(
        "Lockout after {} failed attempts, transfers expire after {}s",
        config.max_failed_attempts,
        config.transfer_ttl_secs
    );
    tracing::info!("Rate limit: {} req/min per IP", config.rate_limit_rpm);
    tracing::info!("  POST http://localhost:{port}/api/verify-pin");
    tracing::info!("  POST http://localhost:{port}/api/transactions");
    tracing::info!("  PUT  http://localhost:{port}/api/accounts/{{account_id}}/pin");

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(config.rate_limit_rpm)
        .finish()
        .expect("failed to build rate limiter config");

    let cors_origins = config.allowed_origins.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_origins))
            .wrap(Governor::new(&governor_conf))
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(65_536))
            .app_data(web::PayloadConfig::new(65_536))
            .service(routes::health)
            .service(routes::metrics_endpoint)
            .service(routes::verify_pin)
            .service(routes::register_transaction)
            .service(routes::set_account_pin)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
