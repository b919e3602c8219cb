use obis_bridge::config::{Config, Parity};

const MINIMAL: &str = r#"
meter:
  device: /dev/ttyUSB0
mqtt:
  topic: meter
"#;

#[test]
fn minimal_config_gets_defaults() {
    let config = Config::from_yaml(MINIMAL).unwrap();

    assert_eq!(config.loglevel(), "info");
    assert_eq!(config.mqtt.broker(), "localhost");
    assert_eq!(config.mqtt.port(), 1883);
    assert_eq!(config.mqtt.queue_size(), 1000);
    assert!(config.modbus.is_none());

    let serial = config.meter.serial();
    assert_eq!(serial.baud, 9600);
    assert_eq!(serial.data_bits, 8);
    assert_eq!(serial.stop_bits, 1);
    assert_eq!(serial.parity, Parity::None);

    let grid = config.meter.grid();
    assert_eq!(grid.power_factor, 0.95);
    assert_eq!(grid.frequency, 50.0);
}

#[test]
fn od_preset_resolves_to_7e1() {
    let yaml = r#"
meter:
  device: /dev/ttyUSB0
  preset: od_type
mqtt:
  topic: meter
"#;
    let serial = Config::from_yaml(yaml).unwrap().meter.serial();
    assert_eq!(serial.baud, 9600);
    assert_eq!(serial.data_bits, 7);
    assert_eq!(serial.parity, Parity::Even);
}

#[test]
fn explicit_values_override_the_preset() {
    let yaml = r#"
meter:
  device: /dev/ttyUSB0
  preset: od_type
  baud: 19200
  parity: none
mqtt:
  topic: meter
"#;
    let serial = Config::from_yaml(yaml).unwrap().meter.serial();
    assert_eq!(serial.baud, 19200);
    assert_eq!(serial.data_bits, 7);
    assert_eq!(serial.parity, Parity::None);
}

#[test]
fn tcp_wins_when_both_transports_are_configured() {
    let yaml = r#"
meter:
  device: /dev/ttyUSB0
mqtt:
  topic: meter
modbus:
  use_float_model: false
  tcp:
    port: 1502
  rtu:
    device: /dev/ttyUSB1
"#;
    let config = Config::from_yaml(yaml).unwrap();
    let modbus = config.modbus.unwrap();
    assert!(modbus.tcp.is_some());
    assert!(modbus.rtu.is_none());
    assert_eq!(modbus.tcp.unwrap().listen, "0.0.0.0");
}

#[test]
fn modbus_defaults() {
    let yaml = r#"
meter:
  device: /dev/ttyUSB0
mqtt:
  topic: meter
modbus:
  use_float_model: true
  tcp: {}
"#;
    let modbus = Config::from_yaml(yaml).unwrap().modbus.unwrap();
    assert_eq!(modbus.slave_id, 1);
    assert_eq!(modbus.request_timeout, 5);
    assert_eq!(modbus.idle_timeout, 60);
    assert_eq!(modbus.tcp.unwrap().port, 502);
    assert!(modbus.use_float_model);
}

#[test]
fn use_float_model_is_mandatory() {
    let yaml = r#"
meter:
  device: /dev/ttyUSB0
mqtt:
  topic: meter
modbus:
  tcp:
    port: 1502
"#;
    assert!(Config::from_yaml(yaml).is_err());
}

#[test]
fn modbus_without_a_transport_is_rejected() {
    let yaml = r#"
meter:
  device: /dev/ttyUSB0
mqtt:
  topic: meter
modbus:
  use_float_model: false
"#;
    assert!(Config::from_yaml(yaml).is_err());
}

#[test]
fn validation_rejects_out_of_range_values() {
    let bad_slave = MINIMAL.to_string()
        + r#"
modbus:
  use_float_model: false
  slave_id: 248
  tcp:
    port: 1502
"#;
    assert!(Config::from_yaml(&bad_slave).is_err());

    let bad_idle = MINIMAL.to_string()
        + r#"
modbus:
  use_float_model: false
  request_timeout: 30
  idle_timeout: 10
  tcp:
    port: 1502
"#;
    assert!(Config::from_yaml(&bad_idle).is_err());

    let bad_grid = r#"
meter:
  device: /dev/ttyUSB0
  grid:
    power_factor: 1.5
mqtt:
  topic: meter
"#;
    assert!(Config::from_yaml(bad_grid).is_err());

    let bad_parity = r#"
meter:
  device: /dev/ttyUSB0
  parity: sometimes
mqtt:
  topic: meter
"#;
    assert!(Config::from_yaml(bad_parity).is_err());

    let bad_bits = r#"
meter:
  device: /dev/ttyUSB0
  data_bits: 9
mqtt:
  topic: meter
"#;
    assert!(Config::from_yaml(bad_bits).is_err());
}

#[test]
fn mqtt_requires_a_topic() {
    let yaml = r#"
meter:
  device: /dev/ttyUSB0
mqtt:
  broker: broker.local
"#;
    assert!(Config::from_yaml(yaml).is_err());
}
