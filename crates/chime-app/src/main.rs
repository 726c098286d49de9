//! # chime
//!
//! Demo driver: `chime [config.json] [sound-key...]`.
//!
//! Preloads every configured sound using the connection hints in
//! `CHIME_EFFECTIVE_TYPE`, `CHIME_DOWNLINK_MBPS` and `CHIME_SAVE_DATA`, plays
//! the given keys (all of them if none are given), then prints the engine
//! state as JSON.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chime::SoundEngine;
use chime_core::{ChimeConfig, EngineEvent, SoundKey};
use chime_preload::{ConnectionInfo, EffectiveType};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to let the last sound ring out before exiting.
const TAIL: Duration = Duration::from_millis(800);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chime=info,chime_audio=info,chime_preload=debug".into()),
        )
        .init();

    info!("Starting chime v{}", env!("CARGO_PKG_VERSION"));

    let mut args = std::env::args().skip(1).peekable();
    let config = match args.peek() {
        Some(arg) if arg.ends_with(".json") => {
            let path = PathBuf::from(arg);
            args.next();
            ChimeConfig::load(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        _ => ChimeConfig::load_default(),
    };

    let keys = args
        .map(|arg| arg.parse::<SoundKey>())
        .collect::<Result<Vec<_>, _>>()
        .context("Unknown sound key")?;
    let keys = if keys.is_empty() {
        SoundKey::ALL.to_vec()
    } else {
        keys
    };

    let engine = SoundEngine::new(config).context("Failed to build sound engine")?;
    let status = engine.initialize();
    info!("Available strategies: {:?}", status.available_levels);

    let connection = connection_from_env();
    let progress = engine.preload_based_on_network(connection.as_ref()).await;
    info!(
        "Preloaded {}/{} sounds ({} failed)",
        progress.loaded, progress.total, progress.failed
    );

    for key in keys {
        let outcome = engine.play(key);
        info!("{key}: {outcome:?}");
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
    tokio::time::sleep(TAIL).await;

    for event in engine.events().try_iter() {
        match event {
            EngineEvent::Error(report) => warn!("{report:?}"),
            EngineEvent::UserInteractionRequired => {
                warn!("Output needs a user gesture, resuming");
                engine.resume_after_gesture();
            }
            EngineEvent::Indicator(indicator) => info!("[{}]", indicator.label),
            other => info!("{other:?}"),
        }
    }

    let summary = serde_json::json!({
        "fallback": engine.fallback_status(),
        "state": engine.detailed_audio_state(),
        "volume": engine.volume_state(),
        "preload": engine.preload_progress(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    engine.dispose();
    Ok(())
}

/// Connection hints from the environment. None when no type is set.
fn connection_from_env() -> Option<ConnectionInfo> {
    let effective_type = std::env::var("CHIME_EFFECTIVE_TYPE")
        .ok()?
        .parse::<EffectiveType>()
        .map_err(|e| warn!("Ignoring CHIME_EFFECTIVE_TYPE: {e}"))
        .ok()?;

    let mut info = ConnectionInfo::new(effective_type);
    if let Some(mbps) = std::env::var("CHIME_DOWNLINK_MBPS")
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
    {
        info = info.with_downlink(mbps);
    }
    if let Ok(flag) = std::env::var("CHIME_SAVE_DATA") {
        info = info.with_save_data(matches!(flag.as_str(), "1" | "true" | "on"));
    }
    Some(info)
}
