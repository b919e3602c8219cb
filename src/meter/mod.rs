pub mod parser;
pub mod payload;
pub mod telegram;

pub use parser::{Device, Phase, Values};

use crate::prelude::*;

use std::time::Duration;
use telegram::TelegramReader;
use tokio::io::AsyncReadExt;
use tokio_serial::{ClearBuffer, SerialPort, SerialStream};

/// Events emitted towards the coordinator. Device always precedes Values
/// within one telegram cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Connected,
    Disconnected,
    Device(String, Device),
    Values(String, Values),
    Shutdown,
}

const READ_CHUNK: usize = 64;
const INTER_BYTE_TIMEOUT: Duration = Duration::from_millis(500);

/// Owns the meter's serial port: reads one telegram at a time, parses it and
/// emits availability, device and values events.
#[derive(Clone)]
pub struct Meter {
    config: config::Meter,
    channels: Channels,
    shutdown: Shutdown,
}

impl Meter {
    pub fn new(config: config::Meter, channels: Channels, shutdown: Shutdown) -> Self {
        Self {
            config,
            channels,
            shutdown,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut backoff = Backoff::new(&self.config.reconnect_delay());

        while self.shutdown.is_running() {
            let mut port = match self.connect().await {
                Ok(port) => {
                    backoff.reset();
                    port
                }
                Err(err) => {
                    if self.handle_error(&err) == ErrorAction::Shutdown {
                        break;
                    }
                    self.wait_reconnect(&mut backoff).await;
                    continue;
                }
            };

            loop {
                match self.cycle(&mut port).await {
                    Ok(()) => {}
                    Err(err) => {
                        let action = self.handle_error(&err);
                        self.disconnect(port);
                        if action == ErrorAction::Shutdown {
                            debug!("Meter run loop stopped");
                            return Ok(());
                        }
                        self.wait_reconnect(&mut backoff).await;
                        break;
                    }
                }
            }
        }

        debug!("Meter run loop stopped");
        Ok(())
    }

    /// One telegram: read, parse device, emit, parse values, emit.
    async fn cycle(&self, port: &mut SerialStream) -> Result<(), Error> {
        let telegram = self.read_telegram(port).await?;
        trace!(
            "Received telegram ({} bytes):\n{}",
            telegram.len(),
            telegram
        );

        let device = parser::parse_device(&telegram)?;
        let device_json = payload::DevicePayload::new(&device)
            .to_json()
            .map_err(|err| Error::protocol(format!("device serialization failed: {}", err)))?;
        debug!("{}", device_json);
        if !self.shutdown.is_running() {
            return Err(Error::shutdown("cycle"));
        }
        let _ = self
            .channels
            .from_meter
            .send(ChannelData::Device(device_json, device));

        let values = parser::parse_values(&telegram, &self.config.grid())?;
        let values_json = payload::ValuesPayload::new(&values)
            .to_json()
            .map_err(|err| Error::protocol(format!("values serialization failed: {}", err)))?;
        debug!("{}", values_json);
        if !self.shutdown.is_running() {
            return Err(Error::shutdown("cycle"));
        }
        let _ = self
            .channels
            .from_meter
            .send(ChannelData::Values(values_json, values));

        Ok(())
    }

    async fn connect(&self) -> Result<SerialStream, Error> {
        if !self.shutdown.is_running() {
            return Err(Error::shutdown("connect"));
        }

        let settings = self.config.serial();
        let builder = tokio_serial::new(self.config.device(), settings.baud)
            .data_bits(settings.data_bits())
            .stop_bits(settings.stop_bits())
            .parity(settings.parity.to_serial());

        let mut port = SerialStream::open(&builder)
            .map_err(|err| Error::serial("opening serial device failed", err))?;
        port.set_exclusive(true)
            .map_err(|err| Error::serial("failed to set exclusive mode", err))?;
        port.clear(ClearBuffer::All)
            .map_err(|err| Error::serial("failed to flush serial buffers", err))?;

        info!(
            "Meter connected on {} ({})",
            self.config.device(),
            settings.describe()
        );
        let _ = self.channels.from_meter.send(ChannelData::Connected);

        Ok(port)
    }

    fn disconnect(&self, port: SerialStream) {
        drop(port);
        let _ = self.channels.from_meter.send(ChannelData::Disconnected);
        info!("Meter disconnected");
    }

    /// Accumulate one telegram. The wait for the frame start is open-ended
    /// (but wakes on shutdown); once a frame has started, a silent gap longer
    /// than the inter-byte timeout aborts the read.
    async fn read_telegram(&self, port: &mut SerialStream) -> Result<String, Error> {
        let mut reader = TelegramReader::new();
        let mut buf = [0u8; READ_CHUNK];

        loop {
            if !self.shutdown.is_running() {
                return Err(Error::shutdown("read_telegram"));
            }

            let received = if reader.started() {
                match tokio::time::timeout(INTER_BYTE_TIMEOUT, port.read(&mut buf)).await {
                    Ok(result) => {
                        result.map_err(|err| Error::io("failed to read serial device", err))?
                    }
                    Err(_) => return Err(Error::timeout("timeout during telegram read")),
                }
            } else {
                tokio::select! {
                    result = port.read(&mut buf) => {
                        result.map_err(|err| Error::io("failed to read serial device", err))?
                    }
                    _ = self.shutdown.wait() => return Err(Error::shutdown("read_telegram")),
                }
            };

            if received == 0 {
                return Err(Error::timeout("serial stream ended mid telegram"));
            }

            if let Some(telegram) = reader.push(&buf[..received])? {
                return Ok(telegram);
            }
        }
    }

    fn handle_error(&self, err: &Error) -> ErrorAction {
        match err.severity() {
            Severity::Fatal => {
                error!("FATAL meter error: {}", err);
                self.shutdown.shutdown();
                ErrorAction::Shutdown
            }
            Severity::Transient => {
                warn!("Transient meter error: {}", err);
                ErrorAction::Reconnect
            }
            Severity::Shutdown => {
                trace!("Meter operation cancelled: {}", err);
                ErrorAction::Shutdown
            }
        }
    }

    async fn wait_reconnect(&self, backoff: &mut Backoff) {
        if !self.shutdown.is_running() {
            return;
        }
        let delay = backoff.next_delay();
        warn!(
            "Meter unavailable, trying to reconnect in {} {}...",
            delay.as_secs(),
            if delay.as_secs() == 1 { "second" } else { "seconds" }
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.shutdown.wait() => {}
        }
    }
}
