use crate::admin::AdminCommand;
use crate::server::{ServerCommand, ServerTx};
use actix_web::error;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web::Result;
use askama::Template;
use serde::Deserialize;
use system::HubStats;

#[derive(Template)]
#[template(path = "admin-stats.html")]
pub struct AdminStatsTemplate {
    stats: HubStats,
    stats_url: String,
    refresh: Option<u32>,
}

#[derive(Deserialize)]
pub struct AdminIndexQuery {
    refresh: Option<u32>,
}

pub fn configure_admin_handlers(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .service(web::resource("").route(web::get().to(admin_index)))
            .service(
                web::resource("/stats")
                    .name("admin_stats")
                    .route(web::get().to(show_stats)),
            ),
    );
}

async fn fetch_stats(srv_tx: &ServerTx) -> Result<HubStats> {
    let (tx, rx) = tokio::sync::oneshot::channel::<HubStats>();

    srv_tx
        .send(ServerCommand::AdminCommand(AdminCommand::GetStats { tx }))
        .await
        .map_err(|_| error::ErrorInternalServerError("Internal Server Error"))?;

    rx.await
        .map_err(|_| error::ErrorInternalServerError("Receiver await error"))
}

pub async fn admin_index(
    req: HttpRequest,
    query: web::Query<AdminIndexQuery>,
    srv_tx: web::Data<ServerTx>,
) -> Result<HttpResponse> {
    let stats = fetch_stats(srv_tx.get_ref()).await?;
    let stats_url = req
        .url_for_static("admin_stats")
        .map_err(|_| error::ErrorInternalServerError("Internal Server Error"))?
        .to_string();
    let page = AdminStatsTemplate {
        stats,
        stats_url,
        refresh: query.refresh,
    }
    .render()
    .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(page))
}

pub async fn show_stats(srv_tx: web::Data<ServerTx>) -> Result<HttpResponse> {
    let stats = fetch_stats(srv_tx.get_ref()).await?;
    Ok(HttpResponse::Ok().json(stats))
}
