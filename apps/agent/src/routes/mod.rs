mod execute;
mod health;

use actix_web::web;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health::health_route);
    cfg.service(execute::execute_route);
}
