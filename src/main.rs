//! docker-ddns daemon entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tokio::signal;

use docker_ddns::backend::dynamic_update::DNS_TIMEOUT;
use docker_ddns::backend::{
    DnsBackend, DynamicUpdateBackend, HostedZoneBackend, Route53Api, TsigTcpTransport,
};
use docker_ddns::cache::ContainerCache;
use docker_ddns::config::{Cli, Config, Engine};
use docker_ddns::dispatcher::UpdateDispatcher;
use docker_ddns::error::RuntimeError;
use docker_ddns::event_loop::{EventLoop, Pipeline, WorkerPool};
use docker_ddns::resolver::MetadataResolver;
use docker_ddns::runtime::docker::{EVENT_TIMEOUT, STARTUP_TIMEOUT};
use docker_ddns::runtime::DockerRuntime;
use docker_ddns::secrets::TsigKey;
use docker_ddns::startup::StartupReconciler;

/// Exit status when the requested Docker API version is too old.
const EXIT_API_VERSION: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            match err.downcast_ref::<RuntimeError>() {
                Some(RuntimeError::UnsupportedApiVersion { .. }) => ExitCode::from(EXIT_API_VERSION),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn build_backend(cfg: &Config) -> anyhow::Result<Arc<dyn DnsBackend>> {
    Ok(match cfg.engine {
        Engine::Bind => {
            let key = TsigKey::load(&cfg.secrets, &cfg.keyname, &cfg.tsigalgorithm)?;
            let transport =
                TsigTcpTransport::new(&cfg.dnsserver, cfg.dnsport, key.signer()?, DNS_TIMEOUT)?;
            Arc::new(DynamicUpdateBackend::new(&cfg.zonename, cfg.ttl, transport)?)
        }
        Engine::Route53 => Arc::new(HostedZoneBackend::new(
            Route53Api::from_env(cfg.hostedzone.clone()).await,
        )),
    })
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load configuration
    let cfg = Config::load(&cli)?;
    info!("Starting docker-ddns {}", env!("CARGO_PKG_VERSION"));
    info!("Using {:?} as dns engine", cfg.engine);
    info!("Requested Docker API version: {}", cfg.apiversion);

    let runtime = DockerRuntime::connect(
        cfg.dockersocket.as_deref(),
        &cfg.apiversion,
        EVENT_TIMEOUT,
    )?;
    let backend = build_backend(&cfg).await?;

    // Shared state
    let cache = ContainerCache::new();
    let pipeline = Arc::new(Pipeline::new(
        MetadataResolver::new(Arc::new(runtime.clone()), cache),
        UpdateDispatcher::new(backend, cfg.ipv6_rewrite()),
    ));
    let (pool, workers) = WorkerPool::spawn(pipeline, cfg.workers, cfg.queuedepth);

    // Startup pass, racing the live event stream
    let startup = StartupReconciler::new(
        Arc::new(runtime.with_timeout(STARTUP_TIMEOUT)),
        pool.clone(),
    );
    let startup_handle = tokio::spawn(async move {
        startup.run().await;
    });

    let event_loop = EventLoop::new(Arc::new(runtime), pool);
    let loop_handle = tokio::spawn(async move {
        event_loop.run().await;
    });

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("CTRL-C pressed, goodbye!");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    // In-flight updates are abandoned
    startup_handle.abort();
    loop_handle.abort();
    for worker in workers {
        worker.abort();
    }

    info!("Shutdown complete.");
    Ok(())
}
