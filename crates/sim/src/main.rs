mod sim;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sim::{Scenario, TreeSim};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env_or("MQTT_PORT", 1883);
    let message_id = env::var("MESSAGE_ID").unwrap_or_else(|_| "1100".to_string());
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let period_s: u64 = env_or("SIM_PERIOD_S", 60);
    let grow_s: i64 = env_or("SIM_GROW_S", 600);

    let mut mqttoptions = MqttOptions::new(format!("tree-sim-{message_id}"), broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    // We only publish, but the event loop still has to run to keep the
    // connection alive.
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("sim connected to mqtt"),
                Ok(_) => {}
                Err(e) => {
                    error!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let topic = format!("tree/{message_id}/status");
    info!(%topic, %scenario, period_s, grow_s, "publishing tree status");

    let mut sim = TreeSim::new(scenario, grow_s);
    loop {
        let msg = sim.next_status(OffsetDateTime::now_utc().unix_timestamp());
        let payload = serde_json::to_vec(&msg).context("failed to encode status")?;

        // Retained, like the edited message the notifier reads on start-up.
        match client.publish(&topic, QoS::AtLeastOnce, true, payload).await {
            Ok(()) => info!(description = %msg.embeds[0].description, "status published"),
            Err(e) => error!("publish error: {e}"),
        }

        sleep(Duration::from_secs(period_s)).await;
    }
}
