//! Zone actuator commands.
//!
//! The controller and the timer manager only see the [`Actuator`] trait.
//! In the hub, commands are published to `valve/<zone_id>/set` and reach the
//! valve board when the broker delivers them back to the event loop, so a
//! successful `set` means "submitted", not "the relay has switched".

use anyhow::{Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};

use crate::mqtt::{valve_payload, valve_topic};

#[async_trait]
pub trait Actuator: Send + Sync + 'static {
    async fn set(&self, zone_id: &str, on: bool) -> Result<()>;
}

/// Publishes valve commands through the MQTT broker.
pub struct MqttActuator {
    client: AsyncClient,
}

impl MqttActuator {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Actuator for MqttActuator {
    async fn set(&self, zone_id: &str, on: bool) -> Result<()> {
        self.client
            .publish(
                valve_topic(zone_id),
                QoS::AtLeastOnce,
                false,
                valve_payload(on).to_vec(),
            )
            .await
            .with_context(|| {
                format!(
                    "failed to publish {} for zone {zone_id}",
                    if on { "ON" } else { "OFF" }
                )
            })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::bail;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records every command; zones in `failing` reject them.
    #[derive(Default)]
    pub(crate) struct RecordingActuator {
        commands: Mutex<Vec<(String, bool)>>,
        failing: Mutex<HashSet<String>>,
    }

    impl RecordingActuator {
        pub(crate) fn fail_zone(&self, zone_id: &str) {
            self.failing.lock().unwrap().insert(zone_id.to_string());
        }

        pub(crate) fn heal_zone(&self, zone_id: &str) {
            self.failing.lock().unwrap().remove(zone_id);
        }

        pub(crate) fn commands(&self) -> Vec<(String, bool)> {
            self.commands.lock().unwrap().clone()
        }

        pub(crate) fn commands_for(&self, zone_id: &str) -> Vec<bool> {
            self.commands()
                .into_iter()
                .filter(|(z, _)| z == zone_id)
                .map(|(_, on)| on)
                .collect()
        }

        pub(crate) fn clear(&self) {
            self.commands.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl Actuator for RecordingActuator {
        async fn set(&self, zone_id: &str, on: bool) -> Result<()> {
            self.commands
                .lock()
                .unwrap()
                .push((zone_id.to_string(), on));
            if self.failing.lock().unwrap().contains(zone_id) {
                bail!("actuator rejected command for {zone_id}");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingActuator;
    use super::*;

    #[tokio::test]
    async fn recording_actuator_records_attempts_even_when_failing() {
        let act = RecordingActuator::default();
        act.set("lawn", true).await.unwrap();
        act.fail_zone("beds");
        assert!(act.set("beds", true).await.is_err());
        assert_eq!(
            act.commands(),
            vec![("lawn".to_string(), true), ("beds".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn mqtt_actuator_queues_publish() {
        let opts = rumqttc::MqttOptions::new("test-actuator", "127.0.0.1", 1883);
        // The event loop is never polled; the request sits in its channel.
        let (client, _eventloop) = AsyncClient::new(opts, 10);
        let act = MqttActuator::new(client);
        act.set("lawn_front", true).await.unwrap();
        act.set("lawn_front", false).await.unwrap();
    }
}
