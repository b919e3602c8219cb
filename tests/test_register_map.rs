mod common;
use common::*;

use obis_bridge::meter::Values;
use obis_bridge::modbus::ModbusSlave;
use obis_bridge::shutdown::Shutdown;
use obis_bridge::sunspec::packing::{unpack_f32, unpack_string, unpack_u32};
use obis_bridge::sunspec::registers::{c001, m20x, m21x, m_end};
use obis_bridge::sunspec::RegisterMap;

fn int_slave() -> ModbusSlave {
    ModbusSlave::new(Factory::modbus_config(false), Shutdown::new())
}

fn float_slave() -> ModbusSlave {
    ModbusSlave::new(Factory::modbus_config(true), Shutdown::new())
}

#[test]
fn static_skeleton_int_model() {
    let map = RegisterMap::new(7, false);
    let words = map.words();

    assert_eq!(unpack_u32(words, c001::SID), 0x53756E53);
    assert_eq!(words[c001::ID.addr as usize], 1);
    assert_eq!(words[c001::L.addr as usize], 65);
    assert_eq!(words[c001::DA.addr as usize], 7);

    assert_eq!(words[m20x::ID.addr as usize], 203);
    assert_eq!(words[m20x::L.addr as usize], 105);
    assert_eq!(words[m_end::ID.addr as usize], 0xFFFF);
    assert_eq!(words[m_end::L.addr as usize], 0);
}

#[test]
fn static_skeleton_float_model_shifts_end_marker() {
    let map = RegisterMap::new(1, true);
    let words = map.words();

    assert_eq!(words[m21x::ID.addr as usize], 213);
    assert_eq!(words[m21x::L.addr as usize], 124);

    let end = m_end::ID.with_offset(m_end::FLOAT_OFFSET);
    assert_eq!(words[end.addr as usize], 0xFFFF);
    // 40176 is measurement space in the float layout, not an end marker.
    assert_eq!(words[m_end::ID.addr as usize], 0);
}

#[test]
fn int_model_values_packing() {
    let slave = int_slave();
    slave.update_values(&Factory::values());
    let snapshot = slave.snapshot();
    let words = snapshot.words();

    // W = 259 with SF 0; voltages at one decimal with SF -1.
    assert_eq!(words[m20x::W.addr as usize] as i16, 259);
    assert_eq!(words[m20x::W_SF.addr as usize], 0x0000);
    assert_eq!(words[m20x::WPHA.addr as usize] as i16, 75);
    assert_eq!(words[m20x::PHV.addr as usize] as i16, 2326);
    assert_eq!(words[m20x::PHVPHA.addr as usize] as i16, 2324);
    assert_eq!(words[m20x::V_SF.addr as usize], 0xFFFF);

    // Currents at three decimals, SF -3.
    assert_eq!(words[m20x::APHA.addr as usize] as i16, 341);
    assert_eq!(words[m20x::A.addr as usize] as i16, 1173);
    assert_eq!(words[m20x::A_SF.addr as usize] as i16, -3);

    // Frequency 50.00 Hz, SF -2; power factor as percent, SF 0.
    assert_eq!(words[m20x::FREQ.addr as usize] as i16, 5000);
    assert_eq!(words[m20x::FREQ_SF.addr as usize] as i16, -2);
    assert_eq!(words[m20x::PF.addr as usize] as i16, 95);
    assert_eq!(words[m20x::PF_SF.addr as usize], 0x0000);

    // Energy kWh -> Wh with one extra digit: 125256.8857 Wh -> raw 1252569.
    assert_eq!(unpack_u32(words, m20x::TOTWH_IMP), 1_252_569);
    assert_eq!(words[m20x::TOTWH_SF.addr as usize] as i16, -1);
}

#[test]
fn float_model_values_packing() {
    let slave = float_slave();
    slave.update_values(&Factory::values());
    let snapshot = slave.snapshot();
    let words = snapshot.words();

    // WPHA holds the IEEE-754 big-endian encoding of 75.18 at 40099.
    let bits = 75.18f32.to_bits();
    assert_eq!(words[40099], (bits >> 16) as u16);
    assert_eq!(words[40100], (bits & 0xFFFF) as u16);

    assert_eq!(unpack_f32(words, m21x::W), 259.2f32);
    assert_eq!(unpack_f32(words, m21x::FREQ), 50.0);
    assert!((unpack_f32(words, m21x::PF) - 95.0).abs() < 1e-4);
    assert!((unpack_f32(words, m21x::TOTWH_IMP) - 125_256.8857).abs() < 0.05);
}

#[test]
fn device_update_is_latched_after_first_success() {
    let slave = int_slave();

    let first = Factory::device();
    slave.update_device(&first);

    let mut second = Factory::device();
    second.serial_number = "9999999999".to_string();
    slave.update_device(&second);

    let snapshot = slave.snapshot();
    let serial = unpack_string(snapshot.words(), c001::SN);
    assert_eq!(serial.trim_end_matches('\0'), "1EBZ0100507409");
    assert_eq!(
        unpack_string(snapshot.words(), c001::MN).trim_end_matches('\0'),
        "EasyMeter"
    );
    assert_eq!(
        unpack_string(snapshot.words(), c001::VR).trim_end_matches('\0'),
        "107"
    );
}

#[test]
fn overlong_identity_strings_are_truncated() {
    let slave = int_slave();

    // The build-string firmware fallback is longer than VR's 16 bytes.
    let mut device = Factory::device();
    device.fw_version = "obis-bridge v0.3.1".to_string();
    slave.update_device(&device);

    let snapshot = slave.snapshot();
    assert_eq!(
        unpack_string(snapshot.words(), c001::VR).trim_end_matches('\0'),
        "obis-bridge v0.3"
    );
    assert_eq!(
        unpack_string(snapshot.words(), c001::SN).trim_end_matches('\0'),
        "1EBZ0100507409"
    );

    // The latch closed despite the oversized field.
    let mut second = Factory::device();
    second.serial_number = "9999999999".to_string();
    slave.update_device(&second);
    assert_eq!(
        unpack_string(slave.snapshot().words(), c001::SN).trim_end_matches('\0'),
        "1EBZ0100507409"
    );
}

#[test]
fn values_update_preserves_identity_blocks() {
    let slave = int_slave();
    slave.update_device(&Factory::device());
    slave.update_values(&Factory::values());

    let snapshot = slave.snapshot();
    assert_eq!(unpack_u32(snapshot.words(), c001::SID), 0x53756E53);
    assert_eq!(
        unpack_string(snapshot.words(), c001::SN).trim_end_matches('\0'),
        "1EBZ0100507409"
    );
    assert_eq!(snapshot.words()[m20x::ID.addr as usize], 203);
}

#[test]
fn snapshot_rotation_is_copy_on_write() {
    let slave = int_slave();
    let before = slave.snapshot();

    slave.update_values(&Factory::values());
    let after = slave.snapshot();

    // The old snapshot is untouched; readers holding it keep a consistent view.
    assert_eq!(before.words()[m20x::W.addr as usize], 0);
    assert_eq!(after.words()[m20x::W.addr as usize] as i16, 259);
    assert!(!std::ptr::eq(before.as_ref(), after.as_ref()));
}

#[test]
fn read_is_bounds_checked() {
    let map = RegisterMap::new(1, false);
    assert!(map.read(40000, 66).is_some());
    assert!(map.read(65535, 1).is_some());
    assert!(map.read(65535, 2).is_none());
}

#[test]
fn update_values_ignores_updates_after_shutdown() {
    let shutdown = Shutdown::new();
    let slave = ModbusSlave::new(Factory::modbus_config(false), shutdown.clone());
    shutdown.shutdown();

    slave.update_values(&Factory::values());
    assert_eq!(slave.snapshot().words()[m20x::W.addr as usize], 0);
}

#[test]
fn manual_values_roundtrip_all_zero() {
    // A default Values packs cleanly (no NaN, no panic).
    let slave = float_slave();
    slave.update_values(&Values::default());
    assert_eq!(unpack_f32(slave.snapshot().words(), m21x::W), 0.0);
}
