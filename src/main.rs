use anyhow::Context;
use clap::Parser;

use aocjudge::cases::CaseRepository;
use aocjudge::config::{CliArgs, Config};
use aocjudge::routes::CONTRACT_TEXT;
use aocjudge::sandbox::{DockerEngine, Runner, StrategyTable};
use aocjudge::web_server::build_server;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config().context("Failed to load configuration")?;
    let cases = CaseRepository::load(config.cases_path()?)?;

    let Config {
        server: server_config,
        runner: runner_config,
        languages,
        ..
    } = config;

    let table = StrategyTable::new(languages);
    log::info!("Supported languages: {}", table.names().join(", "));
    log::info!(
        "Sandbox policy: timeout {} ms, memory {} bytes, {} cpus",
        runner_config.timeout.0,
        runner_config.memory_limit.0,
        runner_config.cpus
    );

    let engine = DockerEngine::new(
        runner_config.docker_binary.clone(),
        runner_config.output_limit,
    );
    let runner = Runner::new(runner_config, table, engine);

    log::info!(
        "{} listening on http://{}:{}",
        server_config.name,
        server_config.bind_address,
        server_config.bind_port
    );
    log::info!("CONTRACT: {CONTRACT_TEXT}");

    let server = build_server(server_config, cases, runner).context("Failed to build server")?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // In-flight evaluations finish and clean up before the workers exit
    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
