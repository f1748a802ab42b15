use actix_web::{App, HttpServer, dev::Server, middleware, web};
use tokio::sync::Semaphore;

use crate::cases::CaseRepository;
use crate::config::ServerConfig;
use crate::routes;
use crate::sandbox::{IsolationEngine, Runner};

pub fn build_server<E: IsolationEngine>(
    server_config: ServerConfig,
    cases: CaseRepository,
    runner: Runner<E>,
) -> std::io::Result<Server> {
    let bind = (
        server_config.bind_address.clone(),
        server_config.bind_port,
    );
    let slots = web::Data::new(Semaphore::new(server_config.max_concurrent_evals));
    let server_config = web::Data::new(server_config);
    let cases = web::Data::new(cases);
    let runner = web::Data::new(runner);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(server_config.clone())
            .app_data(cases.clone())
            .app_data(runner.clone())
            .app_data(slots.clone())
            .wrap(middleware::Logger::default())
            .configure(routes::configure::<E>)
    })
    .bind(bind)?
    .run();

    Ok(server)
}
