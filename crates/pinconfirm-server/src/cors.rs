//! CORS configuration for the confirmation page origin.

use actix_cors::Cors;

/// Build the CORS middleware from allowed origins.
///
/// With no origins configured, only `http://localhost` (any port) is allowed.
pub fn build_cors(allowed_origins: &[String]) -> Cors {
    let allowed = allowed_origins.to_vec();
    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            let origin = origin.to_str().unwrap_or("");
            if allowed.is_empty() {
                origin == "http://localhost" || origin.starts_with("http://localhost:")
            } else {
                allowed.iter().any(|a| a == origin)
            }
        })
        .allowed_methods(vec!["GET", "POST", "PUT", "OPTIONS"])
        .allowed_headers(vec![
            actix_web::http::header::AUTHORIZATION,
            actix_web::http::header::ACCEPT,
            actix_web::http::header::CONTENT_TYPE,
        ])
        .max_age(3600)
}
