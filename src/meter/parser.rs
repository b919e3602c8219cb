use crate::prelude::*;

use crate::config::Grid;
use once_cell::sync::Lazy;
use regex::Regex;

/// Meter family constants; the telegram itself does not carry them.
const MANUFACTURER: &str = "EasyMeter";
const MODEL: &str = "DD3-BZ06-ETA-ODZ1";
const PHASES: u8 = 3;

static OBIS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d-0:\d+\.\d+\.\d+\*255)\(([^)]+)\)").unwrap());

static HEADER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/([A-Za-z0-9]+)_([A-Za-z0-9]+)$").unwrap());

// Phase / Values {{{
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Phase {
    pub ph_voltage: f64,
    pub pp_voltage: f64,
    pub active_power: f64,
    pub reactive_power: f64,
    pub apparent_power: f64,
    pub current: f64,
    pub power_factor: f64,
}

/// One measurement snapshot per telegram. `time` is Unix epoch milliseconds
/// at parse time, `energy` the cumulative imported energy in kWh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    pub time: u64,
    pub active_sensor_time: u64,
    pub energy: f64,
    pub ph_voltage: f64,
    pub pp_voltage: f64,
    pub current: f64,
    pub active_power: f64,
    pub reactive_power: f64,
    pub apparent_power: f64,
    pub power_factor: f64,
    pub frequency: f64,
    pub phase1: Phase,
    pub phase2: Phase,
    pub phase3: Phase,
}
// }}}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    pub manufacturer: String,
    pub model: String,
    pub options: String,
    pub serial_number: String,
    pub fw_version: String,
    pub status: String,
    pub phases: u8,
}

/// Lines of a telegram with `\r` stripped, frame header/footer excluded.
fn data_lines(telegram: &str) -> impl Iterator<Item = &str> {
    telegram
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty() && !line.starts_with('/') && !line.starts_with('!'))
}

fn obis_line(line: &str) -> Result<(&str, &str), Error> {
    let captures = OBIS_LINE
        .captures(line)
        .ok_or_else(|| Error::protocol(format!("[{}]: malformed OBIS expression", line)))?;
    Ok((
        captures.get(1).unwrap().as_str(),
        captures.get(2).unwrap().as_str(),
    ))
}

/// Strip the `*unit` suffix and parse the decimal value.
fn numeric(value_unit: &str, line: &str) -> Result<f64, Error> {
    let number = match value_unit.find('*') {
        Some(pos) => &value_unit[..pos],
        None => value_unit,
    };
    number
        .parse()
        .map_err(|err| Error::protocol(format!("[{}]: {}", line, err)))
}

fn hex(value_unit: &str, line: &str) -> Result<u64, Error> {
    let number = match value_unit.find('*') {
        Some(pos) => &value_unit[..pos],
        None => value_unit,
    };
    u64::from_str_radix(number, 16)
        .map_err(|err| Error::protocol(format!("[{}]: {}", line, err)))
}

/// Device identity pass. The firmware version comes from the `/XXX_YYY`
/// header line when present, with the build string as fallback.
pub fn parse_device(telegram: &str) -> Result<Device, Error> {
    let mut device = Device {
        manufacturer: MANUFACTURER.to_string(),
        model: MODEL.to_string(),
        phases: PHASES,
        fw_version: format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        ..Device::default()
    };

    if let Some(header) = telegram
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .find(|line| line.starts_with('/'))
    {
        if let Some(captures) = HEADER_LINE.captures(header) {
            device.fw_version = captures.get(2).unwrap().as_str().to_string();
        }
    }

    for line in data_lines(telegram) {
        let (obis, value) = obis_line(line)?;
        match obis {
            "1-0:96.1.0*255" => device.serial_number = value.to_string(),
            "1-0:96.5.0*255" => device.status = value.to_string(),
            _ => {}
        }
    }

    Ok(device)
}

/// Measurement pass plus the derived quantities the meter does not report.
pub fn parse_values(telegram: &str, grid: &Grid) -> Result<Values, Error> {
    let mut values = Values::default();

    for line in data_lines(telegram) {
        let (obis, value) = obis_line(line)?;
        match obis {
            "1-0:1.8.0*255" => values.energy = numeric(value, line)?,
            "1-0:16.7.0*255" => values.active_power = numeric(value, line)?,
            "1-0:36.7.0*255" => values.phase1.active_power = numeric(value, line)?,
            "1-0:56.7.0*255" => values.phase2.active_power = numeric(value, line)?,
            "1-0:76.7.0*255" => values.phase3.active_power = numeric(value, line)?,
            "1-0:32.7.0*255" => values.phase1.ph_voltage = numeric(value, line)?,
            "1-0:52.7.0*255" => values.phase2.ph_voltage = numeric(value, line)?,
            "1-0:72.7.0*255" => values.phase3.ph_voltage = numeric(value, line)?,
            "0-0:96.8.0*255" => values.active_sensor_time = hex(value, line)?,
            _ => {}
        }
    }

    values.time = chrono::Utc::now().timestamp_millis() as u64;
    derive(&mut values, grid);

    Ok(values)
}

/// Zero denominators yield zero instead of dividing.
fn div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Phase-to-phase voltage from two phase-to-neutral voltages 120° apart.
fn pp_voltage(vi: f64, vj: f64) -> f64 {
    (vi * vi + vj * vj + vi * vj).sqrt()
}

fn derive(values: &mut Values, grid: &Grid) {
    let pf = grid.power_factor;

    values.power_factor = pf;
    values.frequency = grid.frequency;

    // tan(acos(pf)) without the intermediate angle
    let reactive_ratio = div((1.0 - pf * pf).max(0.0).sqrt(), pf);

    values.apparent_power = div(values.active_power, pf);
    values.reactive_power = reactive_ratio * values.active_power;

    let neighbor_voltages = [
        values.phase2.ph_voltage,
        values.phase3.ph_voltage,
        values.phase1.ph_voltage,
    ];
    for (phase, vj) in [
        &mut values.phase1,
        &mut values.phase2,
        &mut values.phase3,
    ]
    .into_iter()
    .zip(neighbor_voltages)
    {
        phase.power_factor = pf;
        phase.apparent_power = div(phase.active_power, pf);
        phase.reactive_power = reactive_ratio * phase.active_power;
        phase.pp_voltage = pp_voltage(phase.ph_voltage, vj);
        phase.current = div(phase.active_power, phase.ph_voltage * pf);
    }

    values.ph_voltage = (values.phase1.ph_voltage
        + values.phase2.ph_voltage
        + values.phase3.ph_voltage)
        / 3.0;
    values.pp_voltage = (values.phase1.pp_voltage
        + values.phase2.pp_voltage
        + values.phase3.pp_voltage)
        / 3.0;
    values.current = values.phase1.current + values.phase2.current + values.phase3.current;
}
