//! Chat-platform side effects: the watering announcement and notification
//! role membership. Production goes through an MQTT chat bridge; tests use
//! a recording double.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use std::collections::BTreeSet;
use tracing::debug;

use crate::db::Db;
use crate::mqtt::{announce_topic, role_topic, RoleCommand};
use crate::preference::UserId;

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post `text` in the announcement channel.
    async fn announce(&self, text: &str) -> Result<()>;

    /// Users currently holding the notification role.
    async fn role_holders(&self) -> Result<BTreeSet<UserId>>;

    async fn add_role(&self, user: UserId) -> Result<()>;

    async fn remove_role(&self, user: UserId) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MQTT chat bridge (production)
// ---------------------------------------------------------------------------

/// Publishes platform commands for the chat bridge and keeps the role
/// membership it has granted in the database.
pub struct MqttBridge {
    client: AsyncClient,
    db: Db,
    channel_id: String,
    role_id: String,
}

impl MqttBridge {
    pub fn new(client: AsyncClient, db: Db, channel_id: String, role_id: String) -> Self {
        Self {
            client,
            db,
            channel_id,
            role_id,
        }
    }

    async fn publish_role(&self, user: UserId, cmd: RoleCommand) -> Result<()> {
        self.client
            .publish(
                role_topic(&self.role_id, &user.to_string()),
                QoS::AtLeastOnce,
                false,
                cmd.as_payload().to_vec(),
            )
            .await
            .with_context(|| format!("failed to publish {cmd:?} role for user {user}"))
    }
}

#[async_trait]
impl ChatPlatform for MqttBridge {
    async fn announce(&self, text: &str) -> Result<()> {
        self.client
            .publish(
                announce_topic(&self.channel_id),
                QoS::AtLeastOnce,
                false,
                text.as_bytes().to_vec(),
            )
            .await
            .context("failed to publish announcement")?;
        debug!(channel = %self.channel_id, "announcement published");
        Ok(())
    }

    async fn role_holders(&self) -> Result<BTreeSet<UserId>> {
        self.db.load_role_members().await
    }

    async fn add_role(&self, user: UserId) -> Result<()> {
        self.publish_role(user, RoleCommand::Add).await?;
        self.db.add_role_member(user).await
    }

    async fn remove_role(&self, user: UserId) -> Result<()> {
        self.publish_role(user, RoleCommand::Remove).await?;
        self.db.remove_role_member(user).await
    }
}

// ---------------------------------------------------------------------------
// Recording platform (tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
#[derive(Default)]
pub struct RecordingPlatform {
    pub announcements: std::sync::Mutex<Vec<String>>,
    pub holders: std::sync::Mutex<BTreeSet<UserId>>,
    /// Role changes applied, in order: `(user, added)`.
    pub role_log: std::sync::Mutex<Vec<(UserId, bool)>>,
    pub fail_announce: std::sync::atomic::AtomicBool,
    pub fail_users: std::sync::Mutex<BTreeSet<UserId>>,
}

#[cfg(test)]
impl RecordingPlatform {
    pub fn with_holders(holders: &[u64]) -> Self {
        let platform = Self::default();
        platform
            .holders
            .lock()
            .unwrap()
            .extend(holders.iter().copied().map(UserId));
        platform
    }

    pub fn holders(&self) -> BTreeSet<UserId> {
        self.holders.lock().unwrap().clone()
    }

    pub fn announcements(&self) -> Vec<String> {
        self.announcements.lock().unwrap().clone()
    }

    fn check_user(&self, user: UserId) -> Result<()> {
        if self.fail_users.lock().unwrap().contains(&user) {
            anyhow::bail!("member {user} not found");
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn announce(&self, text: &str) -> Result<()> {
        if self.fail_announce.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("channel is not sendable");
        }
        self.announcements.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn role_holders(&self) -> Result<BTreeSet<UserId>> {
        Ok(self.holders())
    }

    async fn add_role(&self, user: UserId) -> Result<()> {
        self.check_user(user)?;
        self.holders.lock().unwrap().insert(user);
        self.role_log.lock().unwrap().push((user, true));
        Ok(())
    }

    async fn remove_role(&self, user: UserId) -> Result<()> {
        self.check_user(user)?;
        self.holders.lock().unwrap().remove(&user);
        self.role_log.lock().unwrap().push((user, false));
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal MQTT client. The event loop is never polled, so publishes
    /// just sit in the request buffer; it must stay alive for the test.
    fn test_mqtt() -> (AsyncClient, rumqttc::EventLoop) {
        let opts = rumqttc::MqttOptions::new("test-bridge", "127.0.0.1", 1883);
        AsyncClient::new(opts, 10)
    }

    async fn test_bridge() -> (MqttBridge, rumqttc::EventLoop) {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let (client, el) = test_mqtt();
        (MqttBridge::new(client, db, "55".into(), "9".into()), el)
    }

    #[tokio::test]
    async fn bridge_tracks_granted_roles() {
        let (bridge, _el) = test_bridge().await;
        bridge.add_role(UserId(1)).await.unwrap();
        bridge.add_role(UserId(2)).await.unwrap();
        bridge.remove_role(UserId(1)).await.unwrap();

        assert_eq!(bridge.role_holders().await.unwrap(), BTreeSet::from([UserId(2)]));
    }

    #[tokio::test]
    async fn bridge_announce_publishes() {
        let (bridge, _el) = test_bridge().await;
        bridge.announce("The tree is ready").await.unwrap();
    }

    #[tokio::test]
    async fn bridge_publish_fails_once_event_loop_is_gone() {
        let (bridge, el) = test_bridge().await;
        drop(el);
        assert!(bridge.announce("nobody listens").await.is_err());
        assert!(bridge.add_role(UserId(3)).await.is_err());
        // A failed publish must not record membership.
        assert!(bridge.role_holders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recording_platform_failures() {
        let platform = RecordingPlatform::with_holders(&[1]);
        platform.fail_users.lock().unwrap().insert(UserId(2));
        assert!(platform.add_role(UserId(2)).await.is_err());
        platform.remove_role(UserId(1)).await.unwrap();
        assert!(platform.holders().is_empty());
    }
}
