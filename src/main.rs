use std::net::SocketAddr;
use std::sync::Arc;

use agent_ideas_rs::{
    audio::{ClockOutput, PlaybackController},
    chat::ChatRegistry,
    cli::{Cli, Command, CommandArguments},
    controller::IdeaStudio,
    error::{ServiceError, ServiceResult},
    gateway::GeminiGateway,
    metadata::{PKG_NAME, PKG_VERSION},
    persistence::PersistenceAdapter,
    server::{IdeaStudioServer, StudioContext},
    storage::{JsonFileStore, KeyValueStore, MemoryStore},
};
use clap::Parser;
use colored::Colorize;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder,
    service::TowerToHyperService,
};
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use rmcp::{ServiceExt, transport::stdio};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const INSTRUCTIONS: &str = "Brainstorm AI agent business ideas. Call generate_ideas with a business, field or problem, \
then enrich single ideas by index with expand_idea, generate_code_scaffold (after expanding), play_pitch and start_chat. \
Ideas and favorites are saved between runs; images, plans, code and audio are not.";

fn open_storage(args: &CommandArguments) -> ServiceResult<Arc<dyn KeyValueStore>> {
    if args.ephemeral {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let path = args.resolved_storage_path()?;
    info!(path = %path.display(), "using idea storage");
    Ok(Arc::new(JsonFileStore::open(path)?))
}

async fn start(args: CommandArguments) -> ServiceResult<()> {
    args.validate().map_err(ServiceError::FromString)?;
    let gemini = args.gemini_config().map_err(ServiceError::FromString)?;

    let persistence = Arc::new(PersistenceAdapter::new(open_storage(&args)?));
    let studio = Arc::new(
        IdeaStudio::new(Arc::new(GeminiGateway::new(gemini))).with_observer(persistence.clone()),
    );

    let pass = studio.restore(persistence.load()).await;
    if !pass.is_empty() {
        let studio = Arc::clone(&studio);
        tokio::spawn(async move {
            let report = studio.run_image_pass(pass).await;
            info!(loaded = report.loaded, failed = report.failed, "restored idea images");
        });
    }

    let context = Arc::new(StudioContext {
        playback: PlaybackController::new(Arc::clone(&studio), Arc::new(ClockOutput)),
        chats: ChatRegistry::new(Arc::clone(&studio)),
        studio,
        instructions: INSTRUCTIONS.to_string(),
    });

    let shutdown = CancellationToken::new();
    let mut tasks: JoinSet<ServiceResult<()>> = JoinSet::new();

    if args.enable_stdio {
        let server = IdeaStudioServer::new(Arc::clone(&context));
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            let service = server
                .serve(stdio())
                .await
                .map_err(|e| ServiceError::FromString(format!("Stdio server error: {e}")))?;
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = service.waiting() => {
                    if let Err(e) = result {
                        warn!(error = %e, "stdio session ended with error");
                    }
                }
            }
            Ok(())
        });
    }

    if args.enable_http {
        let addr: SocketAddr = args
            .http_addr
            .parse()
            .map_err(|e| ServiceError::FromString(format!("Invalid IDEAS_HTTP_ADDR: {e}")))?;
        let context = Arc::clone(&context);
        let http_service = TowerToHyperService::new(StreamableHttpService::new(
            move || Ok(IdeaStudioServer::new(Arc::clone(&context))),
            LocalSessionManager::default().into(),
            Default::default(),
        ));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "streamable HTTP listening");
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            warn!(error = %e, "HTTP accept failed");
                            continue;
                        }
                    },
                };
                let io = TokioIo::new(stream);
                let service = http_service.clone();
                tokio::spawn(async move {
                    let _ = Builder::new(TokioExecutor::default())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        Some(finished) = tasks.join_next() => {
            match finished {
                Ok(Ok(())) => info!("transport closed"),
                Ok(Err(e)) => error!(error = %e, "transport failed"),
                Err(e) => error!(error = %e, "transport task panicked"),
            }
        }
    }
    shutdown.cancel();
    while tasks.join_next().await.is_some() {}
    Ok(())
}

fn status(args: CommandArguments) -> ServiceResult<()> {
    let key = if args.gemini_config().is_ok() {
        "set".green()
    } else {
        "missing".red()
    };
    println!("{} {}", PKG_NAME.bold(), PKG_VERSION);
    println!("  GEMINI_API_KEY: {key}");
    println!("  text model:     {}", args.text_model);
    println!("  image model:    {}", args.image_model);
    println!("  tts model:      {} ({})", args.tts_model, args.voice);
    println!("  scaffold model: {}", args.scaffold_model);
    println!(
        "  transports:     stdio={} http={} ({})",
        args.enable_stdio, args.enable_http, args.http_addr
    );
    if let Err(e) = args.validate() {
        println!("  {} {e}", "invalid:".red());
    }

    if args.ephemeral {
        println!("  storage:        {}", "memory only".yellow());
        return Ok(());
    }
    let path = args.resolved_storage_path()?;
    let storage = Arc::new(JsonFileStore::load(&path)?);
    match PersistenceAdapter::new(storage).inspect() {
        Ok(saved) => {
            let favorites = saved.iter().filter(|idea| idea.is_favorite).count();
            println!(
                "  storage:        {} ({} saved, {} favorite)",
                path.display(),
                saved.len(),
                favorites
            );
        }
        Err(e) => println!(
            "  storage:        {} ({} {e})",
            path.display(),
            "unreadable record:".red()
        ),
    }
    Ok(())
}

fn clear(args: CommandArguments) -> ServiceResult<()> {
    let storage = open_storage(&args)?;
    PersistenceAdapter::new(storage).erase()?;
    println!("{}", "Saved ideas erased".green());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the stdio transport
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Start(args) => {
            info!("Starting {PKG_NAME} {PKG_VERSION}");
            start(args).await?
        }
        Command::Status(args) => status(args)?,
        Command::Clear(args) => clear(args)?,
        Command::Version => println!("{PKG_NAME} {PKG_VERSION}"),
    }
    Ok(())
}
