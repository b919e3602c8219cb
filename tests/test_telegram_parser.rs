mod common;
use common::*;

use obis_bridge::error::Severity;
use obis_bridge::meter::{parser, payload};

fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {} within {} of {}",
        actual,
        tolerance,
        expected
    );
}

#[test]
fn nominal_telegram_measurements() {
    let values = Factory::values();

    assert_close(values.energy, 125.2568857, 1e-9);
    assert_close(values.active_power, 259.20, 1e-9);
    assert_close(values.phase1.active_power, 75.18, 1e-9);
    assert_close(values.phase2.active_power, 92.34, 1e-9);
    assert_close(values.phase3.active_power, 91.68, 1e-9);
    assert_close(values.phase1.ph_voltage, 232.4, 1e-9);
    assert_close(values.phase2.ph_voltage, 231.7, 1e-9);
    assert_close(values.phase3.ph_voltage, 233.7, 1e-9);
    assert_eq!(values.active_sensor_time, 0x104443);
    assert!(values.time > 0);
}

#[test]
fn nominal_telegram_derived_quantities() {
    let values = Factory::values();

    assert_close(values.power_factor, 0.95, 1e-9);
    assert_close(values.frequency, 50.0, 1e-9);
    assert_close(values.apparent_power, 272.84, 0.01);
    assert_close(values.reactive_power, 85.19, 0.01);
    assert_close(values.ph_voltage, 232.6, 0.01);

    // Phase-to-phase voltage from the cyclic neighbor pair.
    assert_close(values.phase1.pp_voltage, 401.92, 0.01);
    assert_close(values.pp_voltage, 402.88, 0.01);

    assert_close(values.phase1.current, 0.3405, 0.001);
    assert_close(values.phase2.current, 0.4195, 0.001);
    assert_close(values.phase3.current, 0.4130, 0.001);
    assert_close(
        values.current,
        values.phase1.current + values.phase2.current + values.phase3.current,
        1e-12,
    );
    assert_close(values.current, 1.173, 0.001);

    // Per-phase power factor mirrors the aggregate.
    assert_close(values.phase2.power_factor, 0.95, 1e-9);
    assert_close(values.phase2.apparent_power, 92.34 / 0.95, 1e-9);
}

#[test]
fn nominal_telegram_device() {
    let device = Factory::device();

    assert_eq!(device.manufacturer, "EasyMeter");
    assert_eq!(device.model, "DD3-BZ06-ETA-ODZ1");
    assert_eq!(device.serial_number, "1EBZ0100507409");
    assert_eq!(device.status, "001C0104");
    assert_eq!(device.fw_version, "107");
    assert_eq!(device.phases, 3);
}

#[test]
fn malformed_line_is_a_transient_protocol_error() {
    let telegram = Factory::telegram().replace("1-0:1.8.0*255(000125.25688570*kWh)", "garbage");

    let err = parser::parse_values(&telegram, &Factory::grid()).unwrap_err();
    assert_eq!(err.severity(), Severity::Transient);

    let err = parser::parse_device(&telegram).unwrap_err();
    assert_eq!(err.severity(), Severity::Transient);
}

#[test]
fn non_numeric_measurement_is_a_protocol_error() {
    let telegram = Factory::telegram().replace("000259.20*W", "banana*W");
    assert!(parser::parse_values(&telegram, &Factory::grid()).is_err());
}

#[test]
fn unknown_obis_codes_are_ignored() {
    // 1-0:0.0.0*255 in the nominal telegram is not bound to any field.
    let telegram = "/EBZ5DD3BZ06ETA_107\r\n1-0:0.0.0*255(1EBZ0100507409)\r\n!1B";
    let values = parser::parse_values(telegram, &Factory::grid()).unwrap();
    assert_eq!(values.energy, 0.0);
    assert_eq!(values.active_power, 0.0);
}

#[test]
fn fw_version_falls_back_to_build_string() {
    let telegram = Factory::telegram().replace("/EBZ5DD3BZ06ETA_107", "/EBZ5DD3BZ06ETA");
    let device = parser::parse_device(&telegram).unwrap();
    assert!(device.fw_version.starts_with("obis-bridge v"));
}

#[test]
fn zero_denominators_yield_zero() {
    let telegram = Factory::telegram().replace("1-0:32.7.0*255(232.4*V)", "1-0:32.7.0*255(0.0*V)");
    let values = parser::parse_values(&telegram, &Factory::grid()).unwrap();
    assert_eq!(values.phase1.current, 0.0);
    assert!(values.phase2.current > 0.0);

    let mut grid = Factory::grid();
    grid.power_factor = 0.0;
    let values = parser::parse_values(&Factory::telegram(), &grid).unwrap();
    assert_eq!(values.apparent_power, 0.0);
    assert_eq!(values.reactive_power, 0.0);
    assert_eq!(values.current, 0.0);
}

#[test]
fn values_json_applies_rounding() {
    let json = payload::ValuesPayload::new(&Factory::values())
        .to_json()
        .unwrap();

    assert!(json.contains("\"energy\":125.256886"));
    assert!(json.contains("\"apparent_power\":272.84"));
    assert!(json.contains("\"current\":1.173"));
    assert!(json.contains("\"active_sensor_time\":1066051"));
}

#[test]
fn device_json_key_order() {
    let json = payload::DevicePayload::new(&Factory::device())
        .to_json()
        .unwrap();

    let manufacturer = json.find("\"manufacturer\"").unwrap();
    let serial = json.find("\"serial_number\"").unwrap();
    let status = json.find("\"status\"").unwrap();
    assert!(manufacturer < serial && serial < status);
    assert!(json.contains("\"firmware_version\":\"107\""));
}
