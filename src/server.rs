use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::io_struct::ChatRequest;
use crate::relay::RelayHandler;
use actix_cors::Cors;
use actix_web::{HttpRequest, HttpResponse, HttpServer, error, get, post, web};
use std::io::Write;

#[get("/health")]
pub async fn health(_req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().body("Ok")
}

#[post("/chat")]
pub async fn chat(
    req: web::Json<ChatRequest>,
    handler: web::Data<RelayHandler>,
) -> Result<HttpResponse, RelayError> {
    handler.handle(req.into_inner()).await
}

/// Maps extractor failures onto the relay's JSON error bodies.
pub fn json_error_handler(err: error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    log::warn!("JSON payload error: {}", err);
    match &err {
        error::JsonPayloadError::ContentType => RelayError::UnsupportedMediaType.into(),
        error::JsonPayloadError::OverflowKnownLength { .. }
        | error::JsonPayloadError::Overflow { .. } => {
            RelayError::PayloadTooLarge(err.to_string()).into()
        }
        _ => RelayError::BadRequest(format!("Invalid JSON payload: {}", err)).into(),
    }
}

/// Registers the relay routes. Used by [`startup`] and by tests.
pub fn configure(
    handler: web::Data<RelayHandler>,
    max_payload_size: usize,
) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(handler)
            .app_data(
                web::JsonConfig::default()
                    .limit(max_payload_size)
                    .error_handler(json_error_handler),
            )
            .service(health)
            .service(web::scope("/api").wrap(Cors::permissive()).service(chat));
    }
}

/// Timestamped `log` output; `debug` lowers the level, `RUST_LOG` overrides both.
pub fn init_logging(debug: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let result = env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .try_init();
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

pub async fn startup(config: RelayConfig) -> std::io::Result<()> {
    let handler = web::Data::new(RelayHandler::new(config.upstream.clone()));
    let max_payload_size = config.max_payload_size;

    log::info!("Starting server at {}:{}", config.host, config.port);
    log::info!("Relaying to {}", config.upstream.base_url);
    log::debug!("Upstream config: {:?}", handler.upstream_config());
    if let Err(e) = config.upstream.credential.resolve() {
        log::warn!("{}; requests will fail until it is set", e);
    }

    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure(handler.clone(), max_payload_size))
    })
    .bind((config.host, config.port))?
    .run()
    .await
}
