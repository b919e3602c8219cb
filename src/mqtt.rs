use crate::prelude::*;

use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing, QoS};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// Message {{{
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}
// }}}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;

/// Outcome of one enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Identical to the last payload queued for this topic; not queued.
    Duplicate,
    Queued {
        depth: usize,
        dropped: u64,
    },
}

// TopicQueues {{{
/// Per-topic bounded FIFOs with duplicate suppression. The meter repeats
/// unchanged payloads at ~1 Hz; only changes are worth delivering.
#[derive(Debug)]
pub struct TopicQueues {
    queue_size: usize,
    queues: HashMap<String, VecDeque<String>>,
    last_hashes: HashMap<String, u64>,
    dropped: HashMap<String, u64>,
}

fn payload_hash(payload: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}

impl TopicQueues {
    pub fn new(queue_size: usize) -> Self {
        Self {
            queue_size,
            queues: HashMap::new(),
            last_hashes: HashMap::new(),
            dropped: HashMap::new(),
        }
    }

    pub fn enqueue(&mut self, topic: &str, payload: String) -> Enqueue {
        let hash = payload_hash(&payload);
        if self.last_hashes.get(topic) == Some(&hash) {
            return Enqueue::Duplicate;
        }
        self.last_hashes.insert(topic.to_string(), hash);

        let queue = self.queues.entry(topic.to_string()).or_default();
        if queue.len() >= self.queue_size {
            queue.pop_front();
            *self.dropped.entry(topic.to_string()).or_default() += 1;
        }
        queue.push_back(payload);

        Enqueue::Queued {
            depth: queue.len(),
            dropped: self.dropped.get(topic).copied().unwrap_or(0),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.queues.values().any(|queue| !queue.is_empty())
    }

    pub fn topics(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    pub fn front(&self, topic: &str) -> Option<String> {
        self.queues.get(topic).and_then(|queue| queue.front()).cloned()
    }

    /// Drop the delivered head and reset the topic's dropped counter.
    pub fn pop(&mut self, topic: &str) {
        if let Some(queue) = self.queues.get_mut(topic) {
            queue.pop_front();
        }
        self.dropped.insert(topic.to_string(), 0);
    }

    pub fn len(&self, topic: &str) -> usize {
        self.queues.get(topic).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        !self.has_pending()
    }

    pub fn dropped(&self, topic: &str) -> u64 {
        self.dropped.get(topic).copied().unwrap_or(0)
    }
}
// }}}

struct State {
    queues: Mutex<TopicQueues>,
    notify: Notify,
    connected: AtomicBool,
}

/// Buffering MQTT publisher: enqueue on one side, deliver with QoS 1 +
/// retain on the other, reconnect with exponential backoff in between.
#[derive(Clone)]
pub struct Mqtt {
    config: config::Mqtt,
    channels: Channels,
    shutdown: Shutdown,
    state: Arc<State>,
}

impl Mqtt {
    pub fn new(config: config::Mqtt, channels: Channels, shutdown: Shutdown) -> Self {
        let state = Arc::new(State {
            queues: Mutex::new(TopicQueues::new(config.queue_size())),
            notify: Notify::new(),
            connected: AtomicBool::new(false),
        });
        Self {
            config,
            channels,
            shutdown,
            state,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        let mut options = MqttOptions::new("obis-bridge", c.broker(), c.port());
        options.set_keep_alive(Duration::from_secs(60));
        options.set_last_will(LastWill::new(
            format!("{}/availability", c.topic()),
            Bytes::from("disconnected"),
            QoS::AtLeastOnce,
            true,
        ));
        if let (Some(user), Some(password)) = (&c.user, &c.password) {
            options.set_credentials(user.clone(), password.clone());
        }

        info!("initializing mqtt at {}:{}", c.broker(), c.port());

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.receiver(),
            self.connection(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    // coordinator -> queues
    async fn receiver(&self) -> Result<()> {
        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            let data = tokio::select! {
                data = receiver.recv() => data,
                _ = self.shutdown.wait() => break,
            };
            match data {
                Ok(ChannelData::Message(message)) => self.enqueue(message),
                Ok(ChannelData::Shutdown) => break,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("mqtt receiver lagged, {} messages lost", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        // Wake the sender so it observes the shutdown.
        self.state.notify.notify_waiters();
        debug!("MQTT receiver loop stopped");
        Ok(())
    }

    /// Queue one payload for delivery. Unchanged payloads per topic are
    /// silently suppressed; a full queue drops its oldest entry.
    pub fn enqueue(&self, message: Message) {
        let outcome = {
            let mut queues = self.state.queues.lock().unwrap();
            queues.enqueue(&message.topic, message.payload)
        };

        match outcome {
            Enqueue::Duplicate => {}
            Enqueue::Queued { depth, dropped } => {
                if !self.state.connected.load(Ordering::SeqCst) {
                    if dropped > 0 {
                        warn!(
                            "MQTT queue full for topic '{}', dropped oldest message (total dropped: {})",
                            message.topic, dropped
                        );
                    } else {
                        debug!(
                            "Waiting for MQTT connection... ({} messages cached for '{}')",
                            depth, message.topic
                        );
                    }
                }
                self.state.notify.notify_one();
            }
        }
    }

    /// Owns the rumqttc event loop: connection state, reconnect backoff and
    /// the network I/O behind publishes.
    async fn connection(&self, mut eventloop: EventLoop) -> Result<()> {
        let mut backoff = Backoff::new(&self.config.reconnect_delay());

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("MQTT connected");
                    self.state.connected.store(true, Ordering::SeqCst);
                    backoff.reset();
                    self.state.notify.notify_waiters();
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("MQTT disconnected");
                    self.state.connected.store(false, Ordering::SeqCst);
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    self.state.connected.store(false, Ordering::SeqCst);
                    if !self.shutdown.is_running() {
                        break;
                    }
                    let delay = backoff.next_delay();
                    warn!(
                        "MQTT connection lost: {}, retrying in {}s...",
                        err,
                        delay.as_secs()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.wait() => break,
                    }
                }
            }
        }

        debug!("MQTT event loop stopped");
        Ok(())
    }

    // queues -> broker
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        loop {
            self.wait_for_work().await;

            if !self.shutdown.is_running() {
                let connected = self.state.connected.load(Ordering::SeqCst);
                if connected && self.state.queues.lock().unwrap().has_pending() {
                    debug!("Shutdown detected, flushing remaining messages");
                    self.drain(&client).await;
                }
                let _ = client.disconnect().await;
                break;
            }

            self.drain(&client).await;
        }

        debug!("MQTT sender loop stopped");
        Ok(())
    }

    /// Block until `(connected && pending) || shutdown`.
    async fn wait_for_work(&self) {
        loop {
            let notified = self.state.notify.notified();
            if !self.shutdown.is_running() {
                return;
            }
            if self.state.connected.load(Ordering::SeqCst)
                && self.state.queues.lock().unwrap().has_pending()
            {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = self.shutdown.wait() => return,
            }
        }
    }

    async fn drain(&self, client: &AsyncClient) {
        let topics = self.state.queues.lock().unwrap().topics();

        for topic in topics {
            while self.state.connected.load(Ordering::SeqCst) {
                let Some(payload) = self.state.queues.lock().unwrap().front(&topic) else {
                    break;
                };

                match client
                    .publish(&topic, QoS::AtLeastOnce, true, payload.clone().into_bytes())
                    .await
                {
                    Ok(()) => {
                        self.state.queues.lock().unwrap().pop(&topic);
                        debug!("Published MQTT message to topic '{}': {}", topic, payload);
                    }
                    Err(err) => {
                        // Head stays queued; connectivity events re-enter the
                        // wait and retry.
                        error!("MQTT publish failed for '{}': {}", topic, err);
                        break;
                    }
                }
            }
        }
    }
}
