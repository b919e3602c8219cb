//! Register-word packing: big-endian across words and big-endian within each
//! word ("ABCD" for 32-bit values), ASCII strings two bytes per register
//! with the high byte first.

use crate::prelude::*;

use super::registers::{RegKind, Register};

pub fn pack_u16(words: &mut [u16], reg: Register, value: u16) {
    words[reg.addr as usize] = value;
}

pub fn pack_i16(words: &mut [u16], reg: Register, value: i16) {
    words[reg.addr as usize] = value as u16;
}

pub fn pack_u32(words: &mut [u16], reg: Register, value: u32) {
    let bytes = value.to_be_bytes();
    let base = reg.addr as usize;
    words[base] = u16::from_be_bytes([bytes[0], bytes[1]]);
    words[base + 1] = u16::from_be_bytes([bytes[2], bytes[3]]);
}

pub fn pack_u64(words: &mut [u16], reg: Register, value: u64) {
    let bytes = value.to_be_bytes();
    let base = reg.addr as usize;
    for (i, pair) in bytes.chunks(2).enumerate() {
        words[base + i] = u16::from_be_bytes([pair[0], pair[1]]);
    }
}

pub fn pack_f32(words: &mut [u16], reg: Register, value: f32) {
    pack_u32(words, reg, value.to_bits());
}

/// Pack an ASCII string into its register run, high byte first, the odd tail
/// byte in a high byte, the rest of the run zeroed.
pub fn pack_string(words: &mut [u16], reg: Register, value: &str) -> Result<(), Error> {
    let capacity = reg.nb as usize * 2;
    let bytes = value.as_bytes();
    if bytes.len() > capacity {
        return Err(Error::protocol(format!(
            "string length {} exceeds {} characters of register {}",
            bytes.len(),
            capacity,
            reg.addr
        )));
    }

    let base = reg.addr as usize;
    words[base..base + reg.nb as usize].fill(0);
    for (i, pair) in bytes.chunks(2).enumerate() {
        let hi = pair[0] as u16;
        let lo = if pair.len() == 2 { pair[1] as u16 } else { 0 };
        words[base + i] = (hi << 8) | lo;
    }

    Ok(())
}

/// Integer-with-scale-factor encoding: store `round(value * 10^decimals)` in
/// the value register (clamped to its width) and `-decimals` in the
/// scale-factor register.
pub fn pack_scaled(
    words: &mut [u16],
    reg: Register,
    sf_reg: Register,
    value: f64,
    decimals: i32,
) {
    let scaled = (value * 10f64.powi(decimals)).round();
    match reg.kind {
        RegKind::I16 => {
            let clamped = scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            pack_i16(words, reg, clamped);
        }
        RegKind::U16 => {
            let clamped = scaled.clamp(0.0, u16::MAX as f64) as u16;
            pack_u16(words, reg, clamped);
        }
        _ => {
            let clamped = scaled.clamp(0.0, u32::MAX as f64) as u32;
            pack_u32(words, reg, clamped);
        }
    }
    pack_i16(words, sf_reg, -decimals as i16);
}

// Unpack mirrors, used to verify the wire layout.

pub fn unpack_u32(words: &[u16], reg: Register) -> u32 {
    let base = reg.addr as usize;
    let hi = words[base].to_be_bytes();
    let lo = words[base + 1].to_be_bytes();
    u32::from_be_bytes([hi[0], hi[1], lo[0], lo[1]])
}

pub fn unpack_u64(words: &[u16], reg: Register) -> u64 {
    let base = reg.addr as usize;
    let mut bytes = [0u8; 8];
    for i in 0..4 {
        let pair = words[base + i].to_be_bytes();
        bytes[2 * i] = pair[0];
        bytes[2 * i + 1] = pair[1];
    }
    u64::from_be_bytes(bytes)
}

pub fn unpack_f32(words: &[u16], reg: Register) -> f32 {
    f32::from_bits(unpack_u32(words, reg))
}

pub fn unpack_string(words: &[u16], reg: Register) -> String {
    let base = reg.addr as usize;
    let mut bytes = Vec::with_capacity(reg.nb as usize * 2);
    for word in &words[base..base + reg.nb as usize] {
        let pair = word.to_be_bytes();
        bytes.push(pair[0]);
        bytes.push(pair[1]);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Decode an int+SF register pair back into a physical value.
pub fn unpack_scaled(words: &[u16], reg: Register, sf_reg: Register) -> f64 {
    let sf = words[sf_reg.addr as usize] as i16;
    let raw = match reg.kind {
        RegKind::I16 => words[reg.addr as usize] as i16 as f64,
        RegKind::U16 => words[reg.addr as usize] as f64,
        _ => unpack_u32(words, reg) as f64,
    };
    raw * 10f64.powi(sf as i32)
}
