use serde::Serialize;

use super::parser::{Device, Phase, Values};

/// Round to a fixed number of decimal places for JSON output.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

// Key order in the emitted JSON is the declaration order below.

#[derive(Debug, Serialize)]
pub struct ValuesPayload {
    time: u64,
    energy: f64,
    active_power: f64,
    apparent_power: f64,
    reactive_power: f64,
    power_factor: f64,
    frequency: f64,
    voltage: f64,
    pp_voltage: f64,
    current: f64,
    phases: Vec<PhasePayload>,
    active_sensor_time: u64,
}

#[derive(Debug, Serialize)]
struct PhasePayload {
    id: u8,
    voltage: f64,
    pp_voltage: f64,
    current: f64,
    active_power: f64,
    apparent_power: f64,
    reactive_power: f64,
    power_factor: f64,
}

impl PhasePayload {
    fn new(id: u8, phase: &Phase) -> Self {
        Self {
            id,
            voltage: round_to(phase.ph_voltage, 1),
            pp_voltage: round_to(phase.pp_voltage, 1),
            current: round_to(phase.current, 3),
            active_power: round_to(phase.active_power, 2),
            apparent_power: round_to(phase.apparent_power, 2),
            reactive_power: round_to(phase.reactive_power, 2),
            power_factor: round_to(phase.power_factor, 2),
        }
    }
}

impl ValuesPayload {
    pub fn new(values: &Values) -> Self {
        Self {
            time: values.time,
            energy: round_to(values.energy, 6),
            active_power: round_to(values.active_power, 2),
            apparent_power: round_to(values.apparent_power, 2),
            reactive_power: round_to(values.reactive_power, 2),
            power_factor: round_to(values.power_factor, 2),
            frequency: round_to(values.frequency, 2),
            voltage: round_to(values.ph_voltage, 1),
            pp_voltage: round_to(values.pp_voltage, 1),
            current: round_to(values.current, 3),
            phases: vec![
                PhasePayload::new(1, &values.phase1),
                PhasePayload::new(2, &values.phase2),
                PhasePayload::new(3, &values.phase3),
            ],
            active_sensor_time: values.active_sensor_time,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Serialize)]
pub struct DevicePayload {
    manufacturer: String,
    model: String,
    serial_number: String,
    firmware_version: String,
    phases: u8,
    status: String,
}

impl DevicePayload {
    pub fn new(device: &Device) -> Self {
        Self {
            manufacturer: device.manufacturer.clone(),
            model: device.model.clone(),
            serial_number: device.serial_number.clone(),
            firmware_version: device.fw_version.clone(),
            phases: device.phases,
            status: device.status.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(round_to(125.25688570, 6), 125.256886);
        assert_eq!(round_to(272.842, 2), 272.84);
        assert_eq!(round_to(232.44, 1), 232.4);
    }

    #[test]
    fn values_key_order_is_stable() {
        let payload = ValuesPayload::new(&Values::default());
        let json = payload.to_json().unwrap();
        let time = json.find("\"time\"").unwrap();
        let energy = json.find("\"energy\"").unwrap();
        let sensor = json.find("\"active_sensor_time\"").unwrap();
        assert!(time < energy && energy < sensor);
    }
}
