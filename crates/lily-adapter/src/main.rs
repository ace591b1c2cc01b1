//! lily-discord-adapter: bridges the Discord client process and the Lily
//! backend.
//!
//! Wires the pieces together: the backend link (static URL or Consul
//! lookup), the platform gateway the Discord client connects to, the
//! transcoder used by voice sessions, the music players, the health and
//! bot control server, and Consul registration. Runs until a shutdown
//! signal arrives or the backend becomes unreachable for good.

mod cli;
mod discovery;
mod gateway;
mod health;

use std::sync::Arc;

use anyhow::Context;
use lily_bridge::{
    BackendLink, Bridge, BridgeSettings, EndpointResolver, LinkConfig, MusicService,
    ProcessTranscoder, RunOutcome, StaticEndpoint,
};
use lily_config::schema::LoggingConfig;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::discovery::{ConsulResolver, Registrar};
use crate::gateway::PlatformGateway;
use crate::health::HealthState;

fn init_logging(args: &cli::Args, config: &LoggingConfig) {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or_else(|| config.level.as_str());
    let directive = if level.contains('=') {
        level.to_string()
    } else {
        format!("lily={level}")
    };
    let directive: Directive = directive
        .parse()
        .unwrap_or_else(|_| LevelFilter::INFO.into());
    let filter = EnvFilter::from_default_env().add_directive(directive);

    if args.json_logs || config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before anything reads the environment
    let _ = dotenvy::dotenv();

    let args = cli::parse();
    let config =
        lily_config::load_config(args.config.as_deref()).context("failed to load config")?;
    if args.print_config {
        println!("{}", lily_config::config_to_json(&config));
        return Ok(());
    }

    init_logging(&args, &config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "lily-discord-adapter starting");

    let cancel = CancellationToken::new();

    // Backend link
    let resolver: Arc<dyn EndpointResolver> = match &config.backend.discovery_service {
        Some(service) => {
            info!(service = %service, "resolving backend through consul");
            Arc::new(
                ConsulResolver::new(&config.discovery, service, &config.backend.discovery_tag)
                    .context("failed to create consul client")?,
            )
        }
        None => {
            info!(url = %config.backend.url, "using static backend url");
            Arc::new(StaticEndpoint::new(config.backend.url.clone()))
        }
    };
    let (link, link_events) = BackendLink::connect(LinkConfig::from(&config.backend), resolver);

    // Platform gateway
    let (gateway, platform_events) = PlatformGateway::from_config(&config.platform, &config.voice);
    let gateway_addr = format!("{}:{}", config.platform.bind_address, config.platform.port);
    let gateway_listener = TcpListener::bind(&gateway_addr)
        .await
        .with_context(|| format!("failed to bind platform gateway on {gateway_addr}"))?;
    tokio::spawn(gateway::serve(
        gateway.clone(),
        gateway_listener,
        cancel.child_token(),
    ));

    // Music
    let music = if config.music.enabled {
        info!(max_queue = config.music.max_queue, "music playback enabled");
        Some(MusicService::from_config(
            Arc::new(gateway.clone()),
            &config.music,
            config.voice.leave_grace(),
        ))
    } else {
        None
    };

    let bridge = Bridge::with_music(
        link,
        Arc::new(gateway.clone()),
        Arc::new(ProcessTranscoder::from_config(&config.voice)),
        music,
        BridgeSettings::from_config(&config),
    );

    // Health and bot control
    let health_addr = format!("{}:{}", config.health.bind_address, config.health.port);
    let health_listener = TcpListener::bind(&health_addr)
        .await
        .with_context(|| format!("failed to bind health server on {health_addr}"))?;
    let health_task = tokio::spawn(health::serve(
        health_listener,
        HealthState {
            bridge: bridge.clone(),
            gateway,
            cookies_path: config.music.cookies_path.clone(),
        },
        cancel.child_token(),
    ));

    // Consul registration
    let registrar = if config.discovery.enabled {
        let registrar = Registrar::from_config(&config.discovery, config.health.port)
            .context("failed to create consul client")?;
        let background = registrar.clone();
        let token = cancel.child_token();
        tokio::spawn(async move { background.register_until_done(token).await });
        Some(registrar)
    } else {
        None
    };

    let mut run = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.run(platform_events, link_events).await }
    });

    let outcome = tokio::select! {
        outcome = &mut run => outcome.context("bridge task failed")?,
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            bridge.shutdown().await;
            run.await.context("bridge task failed")?
        }
    };

    cancel.cancel();
    if let Some(registrar) = registrar {
        registrar.deregister().await;
    }
    match health_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "health server error"),
        Err(e) => warn!(error = %e, "health server task failed"),
    }

    match outcome {
        RunOutcome::Shutdown => {
            info!("lily-discord-adapter stopped");
            Ok(())
        }
        RunOutcome::LinkFailed { attempts } => {
            anyhow::bail!("backend unreachable after {attempts} reconnect attempts")
        }
    }
}
