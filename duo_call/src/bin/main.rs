use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::select;

use duo_call::call::{CallParts, Coordinator, Role, Session};
use duo_call::config::{AppConfig, CONFIG};
use duo_call::msg_center::msg_bus::CallHandle;
use duo_call::server::data::{LogSurface, SyntheticDevices};
use duo_call::server::rtc::WebRtcEngine;
use duo_call::server::signal_cli::SignalCli;
use duo_call::utils::log::init_logger;
use duo_call::{error, info, warn};

const USAGE: &str = "usage: duo_call <A|B> [config-path]";

async fn build_session(role: Role, cfg: &AppConfig) -> Result<(Coordinator, CallHandle)> {
    let (engine, engine_events) = WebRtcEngine::new(&cfg.rtc).await?;
    let channel = Arc::new(SignalCli::new(cfg.server.signaling_server.clone()));
    let channel_events = channel.connect(role)?;

    let session = Session::new(cfg.call.call_id.clone(), role);
    Ok(Coordinator::new(
        session,
        CallParts {
            engine: Arc::new(engine),
            engine_events,
            channel,
            channel_events,
            devices: Arc::new(SyntheticDevices),
            surface: Arc::new(LogSurface),
            stats_interval: cfg.rtc.stats_interval(),
        },
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let role: Role = args.next().context(USAGE)?.parse()?;
    let config_path = args.next();

    let cfg = match &config_path {
        Some(path) => AppConfig::load(path)
            .await
            .with_context(|| format!("loading config from {}", path))?,
        None => AppConfig::default(),
    };
    *CONFIG.write().await = cfg.clone();
    // logging is set up once; the rest is read again for every Session
    init_logger(&cfg.log);

    let _watcher = match &config_path {
        Some(path) => match AppConfig::watch_config(path.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("config watch disabled: {}", e);
                None
            }
        },
        None => None,
    };

    loop {
        let cfg = AppConfig::current().await;
        let (coordinator, handle) = build_session(role, &cfg).await?;

        let mut status = handle.watch_status();
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                info!("call status: {:?}", current);
            }
        });

        let run = coordinator.run();
        tokio::pin!(run);
        let interrupted = select! {
            res = &mut run => {
                res?;
                false
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, leaving the call");
                if let Err(e) = handle.leave().await {
                    error!("leave failed: {}", e);
                }
                (&mut run).await?;
                true
            }
        };

        if let Some(stats) = handle.stats() {
            info!("last stats: {:?}", stats);
        }
        if interrupted || !cfg.call.rejoin {
            break;
        }
        info!("rejoining call {}", cfg.call.call_id);
    }
    Ok(())
}
