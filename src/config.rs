use crate::prelude::*;

use serde::Deserialize;

// Parity {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    pub fn to_serial(self) -> tokio_serial::Parity {
        match self {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
} // }}}

// Preset {{{
/// The two meter interfaces this bridge targets: the optical head and the
/// multifunctional (RJ12) port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum Preset {
    #[serde(rename = "od_type")]
    OdType,
    #[serde(rename = "sd_type")]
    SdType,
}

impl Preset {
    pub fn serial_settings(self) -> SerialSettings {
        match self {
            // Optical interface: 9600 7E1
            Preset::OdType => SerialSettings {
                baud: 9600,
                data_bits: 7,
                stop_bits: 1,
                parity: Parity::Even,
            },
            // Multifunctional interface: 9600 8N1
            Preset::SdType => SerialSettings {
                baud: 9600,
                data_bits: 8,
                stop_bits: 1,
                parity: Parity::None,
            },
        }
    }
} // }}}

// SerialSettings {{{
/// Resolved serial parameters (preset defaults + manual overrides applied).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl SerialSettings {
    fn resolve(
        preset: Option<Preset>,
        baud: Option<u32>,
        data_bits: Option<u8>,
        stop_bits: Option<u8>,
        parity: Option<Parity>,
    ) -> Self {
        let mut settings = preset
            .map(Preset::serial_settings)
            .unwrap_or_default();
        if let Some(baud) = baud {
            settings.baud = baud;
        }
        if let Some(data_bits) = data_bits {
            settings.data_bits = data_bits;
        }
        if let Some(stop_bits) = stop_bits {
            settings.stop_bits = stop_bits;
        }
        if let Some(parity) = parity {
            settings.parity = parity;
        }
        settings
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.baud == 0 {
            bail!("{}.baud must be positive", section);
        }
        if !(5..=8).contains(&self.data_bits) {
            bail!("{}.data_bits must be between 5 and 8", section);
        }
        if !(self.stop_bits == 1 || self.stop_bits == 2) {
            bail!("{}.stop_bits must be 1 or 2", section);
        }
        Ok(())
    }

    pub fn data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    pub fn stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }

    pub fn describe(&self) -> String {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        format!("{} {}{}{}", self.baud, self.data_bits, parity, self.stop_bits)
    }
} // }}}

// Grid {{{
/// Grid assumptions used for the derived quantities the meter does not
/// report itself.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Grid {
    #[serde(default = "Config::default_grid_power_factor")]
    pub power_factor: f64,

    #[serde(default = "Config::default_grid_frequency")]
    pub frequency: f64,
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            power_factor: Config::default_grid_power_factor(),
            frequency: Config::default_grid_frequency(),
        }
    }
} // }}}

// ReconnectDelay {{{
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct ReconnectDelay {
    #[serde(default = "Config::default_reconnect_min")]
    pub min: u64,

    #[serde(default = "Config::default_reconnect_max")]
    pub max: u64,

    #[serde(default = "Config::default_reconnect_exponential")]
    pub exponential: bool,
}

impl Default for ReconnectDelay {
    fn default() -> Self {
        Self {
            min: Config::default_reconnect_min(),
            max: Config::default_reconnect_max(),
            exponential: Config::default_reconnect_exponential(),
        }
    }
} // }}}

// Meter {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Meter {
    pub device: String,

    pub preset: Option<Preset>,
    pub baud: Option<u32>,
    pub data_bits: Option<u8>,
    pub stop_bits: Option<u8>,
    pub parity: Option<Parity>,

    pub grid: Option<Grid>,
    pub reconnect_delay: Option<ReconnectDelay>,
}

impl Meter {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn serial(&self) -> SerialSettings {
        SerialSettings::resolve(
            self.preset,
            self.baud,
            self.data_bits,
            self.stop_bits,
            self.parity,
        )
    }

    pub fn grid(&self) -> Grid {
        self.grid.unwrap_or_default()
    }

    pub fn reconnect_delay(&self) -> ReconnectDelay {
        self.reconnect_delay.unwrap_or_default()
    }
} // }}}

// ModbusTcp {{{
#[derive(Clone, Debug, Deserialize)]
pub struct ModbusTcp {
    #[serde(default = "Config::default_tcp_listen")]
    pub listen: String,

    #[serde(default = "Config::default_tcp_port")]
    pub port: u16,
}
// }}}

// ModbusRtu {{{
#[derive(Clone, Debug, Deserialize)]
pub struct ModbusRtu {
    pub device: String,

    pub preset: Option<Preset>,
    pub baud: Option<u32>,
    pub data_bits: Option<u8>,
    pub stop_bits: Option<u8>,
    pub parity: Option<Parity>,
}

impl ModbusRtu {
    pub fn serial(&self) -> SerialSettings {
        SerialSettings::resolve(
            self.preset,
            self.baud,
            self.data_bits,
            self.stop_bits,
            self.parity,
        )
    }
} // }}}

// Modbus {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Modbus {
    pub tcp: Option<ModbusTcp>,
    pub rtu: Option<ModbusRtu>,

    #[serde(default = "Config::default_slave_id")]
    pub slave_id: u8,

    #[serde(default = "Config::default_request_timeout")]
    pub request_timeout: u64,

    #[serde(default = "Config::default_idle_timeout")]
    pub idle_timeout: u64,

    // Mandatory on purpose: picking the wrong meter model silently confuses
    // every downstream SunSpec consumer.
    pub use_float_model: bool,
}

impl Modbus {
    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout)
    }

    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout)
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_mqtt_broker")]
    pub broker: String,

    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,

    pub topic: String,

    #[serde(default = "Config::default_mqtt_queue_size")]
    pub queue_size: usize,

    pub user: Option<String>,
    pub password: Option<String>,

    pub reconnect_delay: Option<ReconnectDelay>,
}

impl Mqtt {
    pub fn broker(&self) -> &str {
        &self.broker
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn reconnect_delay(&self) -> ReconnectDelay {
        self.reconnect_delay.unwrap_or_default()
    }
} // }}}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub meter: Meter,
    pub mqtt: Mqtt,
    pub modbus: Option<Modbus>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

impl Config {
    pub fn new(file: &str) -> Result<Self> {
        let content = std::fs::read_to_string(file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Both `modbus.tcp` and `modbus.rtu` present: TCP wins.
    fn normalize(&mut self) {
        if let Some(modbus) = &mut self.modbus {
            if modbus.tcp.is_some() && modbus.rtu.is_some() {
                modbus.rtu = None;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        self.meter.serial().validate("meter")?;
        if self.meter.device.is_empty() {
            bail!("meter.device must not be empty");
        }

        let grid = self.meter.grid();
        if grid.power_factor <= -1.0 || grid.power_factor > 1.0 {
            bail!("meter.grid.power_factor must be in range (-1.0, 1.0]");
        }
        if grid.frequency <= 0.0 {
            bail!("meter.grid.frequency must be positive");
        }

        let meter_delay = self.meter.reconnect_delay();
        Self::validate_reconnect_delay("meter.reconnect_delay", &meter_delay)?;

        if self.mqtt.topic.is_empty() {
            bail!("mqtt.topic is required");
        }
        if self.mqtt.port == 0 {
            bail!("mqtt.port must be between 1 and 65535");
        }
        if self.mqtt.queue_size == 0 {
            bail!("mqtt.queue_size must be greater than zero");
        }
        let mqtt_delay = self.mqtt.reconnect_delay();
        Self::validate_reconnect_delay("mqtt.reconnect_delay", &mqtt_delay)?;

        if let Some(modbus) = &self.modbus {
            if modbus.tcp.is_none() && modbus.rtu.is_none() {
                bail!("modbus requires one of 'modbus.tcp' or 'modbus.rtu'");
            }
            if let Some(tcp) = &modbus.tcp {
                if tcp.port == 0 {
                    bail!("modbus.tcp.port must be between 1 and 65535");
                }
            }
            if let Some(rtu) = &modbus.rtu {
                rtu.serial().validate("modbus.rtu")?;
                if rtu.device.is_empty() {
                    bail!("modbus.rtu.device must not be empty");
                }
            }
            if !(1..=247).contains(&modbus.slave_id) {
                bail!("modbus.slave_id must be in range 1-247");
            }
            if modbus.request_timeout == 0 {
                bail!("modbus.request_timeout must be positive");
            }
            if modbus.idle_timeout < modbus.request_timeout {
                bail!("modbus.idle_timeout must be >= request_timeout");
            }
        }

        Ok(())
    }

    fn validate_reconnect_delay(section: &str, delay: &ReconnectDelay) -> Result<()> {
        if delay.min == 0 {
            bail!("{}.min must be positive", section);
        }
        if delay.max < delay.min {
            bail!("{}.max must be >= min", section);
        }
        Ok(())
    }

    /// Startup summary at info level so a misread config is visible before
    /// the first connect attempt.
    pub fn log_summary(&self) {
        info!("Configuration loaded:");
        info!(
            "  Meter: {} ({})",
            self.meter.device,
            self.meter.serial().describe()
        );
        let grid = self.meter.grid();
        info!(
            "  Grid: power_factor={} frequency={}Hz",
            grid.power_factor, grid.frequency
        );
        info!("  MQTT: {}:{} topic '{}' (queue {})",
            self.mqtt.broker, self.mqtt.port, self.mqtt.topic, self.mqtt.queue_size);
        match &self.modbus {
            Some(modbus) => {
                match (&modbus.tcp, &modbus.rtu) {
                    (Some(tcp), _) => info!("  Modbus: TCP {}:{}", tcp.listen, tcp.port),
                    (None, Some(rtu)) => {
                        info!("  Modbus: RTU {} ({})", rtu.device, rtu.serial().describe())
                    }
                    (None, None) => {}
                }
                info!(
                    "    slave_id={} request_timeout={}s idle_timeout={}s model={}",
                    modbus.slave_id,
                    modbus.request_timeout,
                    modbus.idle_timeout,
                    if modbus.use_float_model { "float (213)" } else { "int+SF (203)" }
                );
            }
            None => info!("  Modbus: disabled (no modbus section)"),
        }
        info!("  Log level: {}", self.loglevel);
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_grid_power_factor() -> f64 {
        0.95
    }

    fn default_grid_frequency() -> f64 {
        50.0
    }

    fn default_reconnect_min() -> u64 {
        5
    }

    fn default_reconnect_max() -> u64 {
        365
    }

    fn default_reconnect_exponential() -> bool {
        true
    }

    fn default_tcp_listen() -> String {
        "0.0.0.0".to_string()
    }

    fn default_tcp_port() -> u16 {
        502
    }

    fn default_slave_id() -> u8 {
        1
    }

    fn default_request_timeout() -> u64 {
        5
    }

    fn default_idle_timeout() -> u64 {
        60
    }

    fn default_mqtt_broker() -> String {
        "localhost".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_queue_size() -> usize {
        1000
    }
}
