pub use std::io::Write;

pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use crate::backoff::Backoff;
pub use crate::channels::Channels;
pub use crate::config::{self, Config};
pub use crate::coordinator::Coordinator;
pub use crate::error::{Error, ErrorAction, Severity};
pub use crate::meter::{self, Meter};
pub use crate::modbus::{self, ModbusSlave};
pub use crate::mqtt::{self, Mqtt};
pub use crate::shutdown::Shutdown;
