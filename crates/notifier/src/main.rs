mod clock;
mod config;
mod coverage;
mod daytime;
mod db;
mod mqtt;
mod notifier;
mod parser;
mod platform;
mod preference;
mod roles;
mod scheduler;
mod state;
mod web;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use clock::TokioClock;
use db::Db;
use mqtt::{extract_message_id, StatusMsg, STATUS_SUBSCRIPTION};
use notifier::{Notifier, Settings};
use platform::MqttBridge;
use state::{SharedState, SystemState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let db_url = env::var("DB_URL")
        .unwrap_or_else(|_| "sqlite:tree-notifier.db?mode=rwc".to_string());

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (chat ids, schedule, preference seeds) ──────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    config::apply(&cfg, &db).await?;

    let prefs = db.load_preferences().await?;
    info!(
        preferences = prefs.len(),
        enabled = prefs.iter().filter(|p| p.enabled).count(),
        "db ready"
    );

    // ── Shared state (ephemeral, for the web API) ───────────────────
    let shared = SystemState::shared();
    shared
        .write()
        .await
        .record_system("notifier started".to_string());

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("tree-notifier", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, eventloop) = AsyncClient::new(mqttoptions, 20);

    // ── Driver ──────────────────────────────────────────────────────
    let (status_tx, status_rx) = mpsc::channel(16);
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();

    let platform = MqttBridge::new(
        client.clone(),
        db.clone(),
        cfg.chat.channel_id.clone(),
        cfg.chat.role_id.clone(),
    );
    let notifier = Arc::new(Notifier::new(
        db.clone(),
        Arc::clone(&shared),
        Arc::new(TokioClock::new(timer_tx)),
        Arc::new(platform),
        Settings::from_config(&cfg),
    ));

    // ── Web server ──────────────────────────────────────────────────
    let web_state = web::AppState {
        shared: Arc::clone(&shared),
        db: db.clone(),
        notifier: Arc::clone(&notifier),
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state).await {
            error!("web server error: {e:#}");
        }
    });

    tokio::spawn(pump_mqtt(
        eventloop,
        client.clone(),
        cfg.chat.message_id.clone(),
        status_tx,
        Arc::clone(&shared),
    ));

    notifier.run(status_rx, timer_rx).await;
    Ok(())
}

/// Poll the MQTT event loop and hand edits of the watched message to the
/// driver. Publishes from the platform only make progress while this runs.
async fn pump_mqtt(
    mut eventloop: EventLoop,
    client: AsyncClient,
    message_id: String,
    statuses: mpsc::Sender<StatusMsg>,
    shared: SharedState,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let topic = p.topic.clone();

                match extract_message_id(&topic) {
                    Some(id) if id == message_id => {
                        match serde_json::from_slice::<StatusMsg>(&p.payload) {
                            Ok(msg) => {
                                let title = msg.embeds.first().and_then(|e| e.title.as_deref());
                                debug!(title = title.unwrap_or("No Title"), "status message updated");

                                // Never block here: the driver may be waiting on a
                                // publish that needs this loop to keep polling.
                                match statuses.try_send(msg) {
                                    Ok(()) => {}
                                    Err(TrySendError::Full(_)) => {
                                        warn!("driver busy, dropping status update")
                                    }
                                    Err(TrySendError::Closed(_)) => {
                                        warn!("driver stopped, leaving mqtt loop");
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                error!(%topic, "bad status json: {e}");
                                shared
                                    .write()
                                    .await
                                    .record_error(format!("bad status json: {e}"));
                            }
                        }
                    }
                    Some(other) => debug!(message_id = other, "ignoring other message"),
                    None => warn!(%topic, "unhandled topic"),
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                // The session is clean, so every (re)connect subscribes again.
                // The retained status comes back with it.
                match client.try_subscribe(STATUS_SUBSCRIPTION, QoS::AtLeastOnce) {
                    Ok(()) => info!(topic = STATUS_SUBSCRIPTION, "subscribed"),
                    Err(e) => error!("subscribe failed: {e}"),
                }
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");

                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_error(format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
