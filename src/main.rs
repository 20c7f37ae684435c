use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use patgate::cli::{self, Commands, TokenCommands};
use patgate::config::{self, Config};
use patgate::models::token::NewTokenRequest;
use patgate::{api, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    init_tracing(&cfg)?;

    let args = cli::Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(Commands::Token { command }) => {
            let state = AppState::connect(cfg).await?;
            handle_token_command(command, &state).await
        }
        Some(Commands::Scopes) => {
            let state = AppState::in_memory(cfg)?;
            for (resource, permissions) in state.authorizer.scope_model().resources() {
                println!("{:<16} {}", resource, permissions.join(" > "));
            }
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing(cfg: &Config) -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // Export spans over OTLP only when a collector is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "patgate"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let (json_layer, text_layer) = if cfg.log_json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "patgate=debug,tower_http=debug".into()),
        ))
        .with(json_layer)
        .with(text_layer)
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let state = Arc::new(AppState::connect(cfg).await?);
    let app = api::app_router(state.clone())?;

    let _sweeper = jobs::cleanup::spawn(state.clone());
    tracing::info!(
        interval_secs = jobs::cleanup::SWEEP_INTERVAL.as_secs(),
        "Background sweep started"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("patgate listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn handle_token_command(cmd: TokenCommands, state: &AppState) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Create {
            owner,
            name,
            scopes,
            expires_in_days,
            allowed_ips,
        } => {
            let issued = state
                .store
                .create(
                    &owner,
                    NewTokenRequest {
                        name,
                        scopes,
                        expires_in_days,
                        allowed_ips,
                    },
                )
                .await?;
            let expires = issued
                .meta
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".into());
            println!(
                "Token created:\n  ID:      {}\n  Prefix:  {}\n  Scopes:  {}\n  Expires: {}\n  Secret:  {}\n\nStore the secret now; it cannot be shown again.",
                issued.meta.id,
                issued.meta.token_prefix,
                issued.meta.scopes.join(","),
                expires,
                issued.token
            );
        }
        TokenCommands::List { owner } => {
            let tokens = state.store.list(&owner).await?;
            if tokens.is_empty() {
                println!("No tokens found.");
            } else {
                println!(
                    "{:<38} {:<20} {:<14} {:<8} SCOPES",
                    "ID", "NAME", "PREFIX", "STATUS"
                );
                let now = chrono::Utc::now();
                for t in tokens {
                    let status = if t.is_revoked() {
                        "revoked"
                    } else if t.is_expired_at(now) {
                        "expired"
                    } else {
                        "active"
                    };
                    println!(
                        "{:<38} {:<20} {:<14} {:<8} {}",
                        t.id,
                        t.name,
                        t.token_prefix,
                        status,
                        t.scopes.join(",")
                    );
                }
            }
        }
        TokenCommands::Revoke { owner, id } => {
            let token = state.store.revoke(id, &owner).await?;
            println!(
                "Token {} revoked at {}.",
                token.id,
                token
                    .revoked_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
            );
        }
        TokenCommands::Logs { owner, id, limit } => {
            state.store.get(&owner, id).await?;
            let entries = state.audit.entries_for_token(id, limit).await?;
            if entries.is_empty() {
                println!("No audit entries.");
            } else {
                println!(
                    "{:<26} {:<16} {:<7} {:<32} {:<6} RESULT",
                    "TIME", "SOURCE", "METHOD", "ENDPOINT", "STATUS"
                );
                for e in entries {
                    let result = if e.authorized {
                        "allowed".to_string()
                    } else {
                        format!("denied: {}", e.reason.unwrap_or_default())
                    };
                    println!(
                        "{:<26} {:<16} {:<7} {:<32} {:<6} {}",
                        e.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                        e.source_address,
                        e.method,
                        e.endpoint,
                        e.status_code,
                        result
                    );
                }
            }
        }
    }
    Ok(())
}
