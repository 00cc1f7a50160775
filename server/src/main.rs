use actix_web::{web, App, HttpServer};

use server::config::ServerConfig;
use server::handlers;
use server::server::spawn_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config = ServerConfig::from_env();
    let srv_tx = spawn_server(&config);
    log::info!("Listening on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(srv_tx.clone()))
            .configure(handlers::root)
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await
}
