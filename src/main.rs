use std::sync::Arc;

use audio_bus::{
    connection::ConnectionSlot,
    registry::Registry,
    resolver::{CommandResolver, PassthroughResolver, Resolver},
    transcoder::{ProcessPipelineFactory, TranscodeCommand},
    transport::{TransportServer, start_transport_server},
};
use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod handler;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("audio_bus", log::LevelFilter::Debug)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();

    let resolver: Arc<dyn Resolver> = match config.resolver() {
        Some(program) => Arc::new(CommandResolver::yt_dlp(program)),
        None => Arc::new(PassthroughResolver),
    };
    let factory = ProcessPipelineFactory::new(
        resolver,
        TranscodeCommand::ffmpeg(config.transcoder()),
        config.chunk_size(),
    );

    let slot = ConnectionSlot::new();
    let registry = Arc::new(Registry::new(slot.clone(), Arc::new(factory)));

    let cancel = CancellationToken::new();

    let transport = TransportServer::new(config.socket_path().clone(), slot);
    let transport_task = start_transport_server(transport, cancel.clone());

    let cancel_clone = cancel.clone();
    api::start_api_server(registry.clone(), cancel_clone);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("ctrl+c received");
                // finished events still reach the consumer before the socket closes
                registry.stop_all().await;
                cancel.cancel();
            },
        }
    }

    registry.stop_all().await;
    if let Err(e) = transport_task.await {
        log::warn!("Transport: task ended abnormally: {}", e);
    }

    std::process::exit(0);
}
