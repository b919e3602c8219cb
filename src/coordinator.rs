use crate::prelude::*;

/// Routes meter events to their consumers: JSON payloads to the MQTT queues,
/// typed snapshots to the Modbus register map, availability transitions to
/// the availability topic.
#[derive(Clone)]
pub struct Coordinator {
    config: Config,
    channels: Channels,
    modbus: Option<ModbusSlave>,
    shutdown: Shutdown,
}

impl Coordinator {
    pub fn new(
        config: Config,
        channels: Channels,
        modbus: Option<ModbusSlave>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            config,
            channels,
            modbus,
            shutdown,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut receiver = self.channels.from_meter.subscribe();

        loop {
            let data = tokio::select! {
                data = receiver.recv() => data,
                _ = self.shutdown.wait() => break,
            };

            match data {
                Ok(meter::ChannelData::Connected) => {
                    self.publish("availability", "connected".to_string());
                }
                Ok(meter::ChannelData::Disconnected) => {
                    self.publish("availability", "disconnected".to_string());
                }
                Ok(meter::ChannelData::Device(json, device)) => {
                    self.publish("device", json);
                    if let Some(slave) = &self.modbus {
                        slave.update_device(&device);
                    }
                }
                Ok(meter::ChannelData::Values(json, values)) => {
                    self.publish("values", json);
                    if let Some(slave) = &self.modbus {
                        slave.update_values(&values);
                    }
                }
                Ok(meter::ChannelData::Shutdown) => break,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("coordinator lagged, {} meter events lost", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        debug!("Coordinator stopped");
        Ok(())
    }

    fn publish(&self, suffix: &str, payload: String) {
        let message = mqtt::Message {
            topic: format!("{}/{}", self.config.mqtt.topic(), suffix),
            payload,
        };
        if self
            .channels
            .to_mqtt
            .send(mqtt::ChannelData::Message(message))
            .is_err()
        {
            warn!("send(to_mqtt) failed - channel closed?");
        }
    }
}
