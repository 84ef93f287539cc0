//! Ascent Session Server
//!
//! `ascent-server serve` hosts one authoritative session over WebSocket.
//! Without arguments it runs a scripted local session and logs the result.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ascent::{
    TICK_RATE, VERSION,
    EndingCause, NodeRole, ObserverMirror, ParticipantId, SessionConfig, SessionCoordinator,
    SessionEventData,
    network::{GameServer, ServerConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Ascent Server v{}", VERSION);
    info!("Tick Rate: {} Hz", TICK_RATE);

    let session = match std::env::var("ASCENT_CONFIG") {
        Ok(path) => SessionConfig::from_json_file(&path)
            .with_context(|| format!("loading session config from {}", path))?,
        Err(_) => SessionConfig::default(),
    };
    info!("{} levels configured", session.levels.len());

    match std::env::args().nth(1).as_deref() {
        Some("serve") => {
            let server = GameServer::new(ServerConfig::from_env(), session);
            server.run().await.context("session host failed")?;
        }
        Some(other) => anyhow::bail!("unknown mode {:?} (expected `serve`)", other),
        None => demo_session(session),
    }
    Ok(())
}

/// Drive a session locally: clear the first level, die in the second, retry.
fn demo_session(config: SessionConfig) {
    info!("=== Starting Demo Session ===");

    let dt = 1.0 / TICK_RATE as f64;
    let mut session = SessionCoordinator::new(NodeRole::Authority, config);
    let mut mirror = ObserverMirror::new();

    let players = [ParticipantId::random(), ParticipantId::random()];
    for (rank, id) in players.iter().enumerate() {
        session.on_participant_joined(*id, rank as u32);
        info!("Added participant {} with rank {}", id, rank);
    }
    session.start_session();

    let report = |session: &mut SessionCoordinator, mirror: &mut ObserverMirror| {
        for update in session.drain_replication() {
            mirror.apply(update);
        }
        for event in session.drain_events() {
            match &event.data {
                SessionEventData::SceneLoadRequested { scene } => {
                    info!("#{} load {}", event.sequence, scene);
                }
                SessionEventData::SessionEntered { scene, gameplay } => {
                    info!("#{} entered {} (gameplay: {})", event.sequence, scene, gameplay);
                }
                SessionEventData::SessionEnding { cause } => {
                    info!("#{} session ending: {:?}", event.sequence, cause);
                }
                SessionEventData::AllReady { generation } => {
                    info!("#{} all ready (gate set {})", event.sequence, generation);
                }
                _ => {}
            }
        }
    };

    // Load whatever the flow machine expects, letting the loading delay run.
    let settle = |session: &mut SessionCoordinator| {
        for _ in 0..(TICK_RATE * 5) {
            if let Some(scene) = session.flow().expected_scene().cloned() {
                for id in &players {
                    session.on_load_acknowledged(&scene, *id);
                }
            } else if session.simulating() {
                break;
            }
            session.advance(dt);
        }
    };

    settle(&mut session);
    report(&mut session, &mut mirror);

    // A few turns with a bonus in the middle.
    for turn in 0..6 {
        if turn == 2 {
            session.on_hazard_bonus_requested(1.0, 3);
        }
        for _ in 0..TICK_RATE {
            session.advance(dt);
        }
        if let Some(active) = session.turns().active_id() {
            session.on_turn_end_requested(active);
        }
    }
    report(&mut session, &mut mirror);
    if let Some(hazard) = &mirror.hazard {
        info!("Hazard at {:.2} (rate {:.3})", hazard.position, hazard.rate);
    }

    for key in session.gate_keys() {
        if let Some(rank) = session.gates().owner_rank(&key) {
            session.on_gate_entered(&key, players[rank as usize % players.len()]);
        }
    }
    settle(&mut session);
    session.on_checkpoint_reached(3.0);
    report(&mut session, &mut mirror);

    session.on_session_ending_signal(EndingCause::ParticipantDied { participant: players[1] });
    session.on_session_ending_signal(EndingCause::ParticipantDied { participant: players[0] });
    settle(&mut session);
    report(&mut session, &mut mirror);

    session.on_retry_requested();
    settle(&mut session);
    report(&mut session, &mut mirror);

    info!("=== Session Results ===");
    let progress = session.persisted();
    info!("Last level: {:?}", progress.last_gameplay_target.as_ref().map(|s| s.as_str()));
    info!("Checkpoint: {:.2} (turn baseline {})", progress.checkpoint_coordinate, progress.hazard_turn_baseline);
    info!("Snapshot digest: {}", session.snapshot().digest_hex());
}
