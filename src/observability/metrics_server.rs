use actix_web::dev::Server;
use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, Responder, HttpServer};

use crate::contract::lib::Error;
use crate::controller::controller_data::State;

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    match c.metrics() {
        Ok(metrics) => HttpResponse::Ok()
            .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
            .body(metrics),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

pub fn run_metrics_server(state: State, bind_address: &str) -> Result<Server, Error> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .workers(1)
    .bind(bind_address)
    .map_err(Error::HttpServerError)?
    .shutdown_timeout(5);

    Ok(server.run())
}
