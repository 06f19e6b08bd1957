//! fleetproxy server binary: wires configuration, the dispatch engine, and
//! the actix-web HTTP front end together, then serves until interrupted.

use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{error, info};
use tokio::signal;

use fleetproxy::config::settings::load_settings;
use fleetproxy::config::validation::ConfigValidator;
use fleetproxy::logs::logger::configure_logger;
use fleetproxy::models::registry::RouteRegistry;
use fleetproxy::routes::health::configure_health;
use fleetproxy::routes::proxy::configure_proxy;
use fleetproxy::services::round_trip::Engine;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings = load_settings().expect("failed to load configuration");

    if let Err(e) = settings.validate() {
        error!("configuration invalid: {e}");
        std::process::exit(1);
    }

    let validation = ConfigValidator::validate_comprehensive(&settings);
    validation.log();
    if !validation.is_valid {
        std::process::exit(1);
    }

    let bind_address = settings.bind_address.clone();
    let bind_port = settings.bind_port;

    let registry = web::Data::new(RouteRegistry::from_settings(&settings));
    let engine = web::Data::new(Engine::new(settings).expect("failed to build dispatch engine"));

    info!("starting fleetproxy on {bind_address}:{bind_port}");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(registry.clone())
            .app_data(engine.clone())
            .wrap(Logger::new(r#"%a "%r" %s %b %T"#))
            .configure(configure_health)
            .configure(configure_proxy)
    })
    .bind((bind_address.as_str(), bind_port))?
    .run();

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("server error: {e}");
            }
        }
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, stopping server");
        }
    }

    Ok(())
}
