use crate::prelude::*;

use super::packing;
use super::registers::{c001, m20x, m21x, m_end, Register};
use crate::meter::{Device, Values};

/// Size of the served register space. SunSpec addresses are used as absolute
/// indices, so the map covers the whole 16-bit address range.
pub const MODBUS_REGISTERS: usize = 65_536;

/// One immutable SunSpec register snapshot. Writers clone the current
/// snapshot, mutate their region and publish the clone; readers serve whole
/// replies from a single snapshot.
#[derive(Debug, Clone)]
pub struct RegisterMap {
    words: Vec<u16>,
}

impl RegisterMap {
    /// Fresh map with the static SunSpec skeleton: the well-known map marker,
    /// the Common Model header, the selected meter model header and the
    /// end-of-map block.
    pub fn new(slave_id: u8, use_float_model: bool) -> Self {
        let mut map = Self {
            words: vec![0; MODBUS_REGISTERS],
        };
        let words = &mut map.words;

        packing::pack_u32(words, c001::SID, 0x53756E53); // "SunS"
        packing::pack_u16(words, c001::ID, 1);
        packing::pack_u16(words, c001::L, c001::SIZE);
        packing::pack_u16(words, c001::DA, slave_id as u16);

        if use_float_model {
            packing::pack_u16(words, m21x::ID, m21x::MODEL_ID);
            packing::pack_u16(words, m21x::L, m21x::SIZE);
            packing::pack_u16(words, m_end::ID.with_offset(m_end::FLOAT_OFFSET), 0xFFFF);
        } else {
            packing::pack_u16(words, m20x::ID, m20x::MODEL_ID);
            packing::pack_u16(words, m20x::L, m20x::SIZE);
            packing::pack_u16(words, m_end::ID, 0xFFFF);
        }

        map
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// Register run for one read reply, bounds-checked against the map.
    pub fn read(&self, addr: u16, count: u16) -> Option<&[u16]> {
        let start = addr as usize;
        let end = start.checked_add(count as usize)?;
        self.words.get(start..end)
    }

    /// Write one telegram's measurements into the selected meter model.
    /// Energy arrives in kWh and is served in Wh; power factors are served
    /// as percent.
    pub fn apply_values(&mut self, values: &Values, use_float_model: bool) {
        let energy_wh = values.energy * 1e3;
        let pf = values.power_factor * 100.0;
        let pf_by_phase = [
            values.phase1.power_factor * 100.0,
            values.phase2.power_factor * 100.0,
            values.phase3.power_factor * 100.0,
        ];
        let phases = [&values.phase1, &values.phase2, &values.phase3];

        if use_float_model {
            let words = &mut self.words;

            packing::pack_f32(words, m21x::PF, pf as f32);
            packing::pack_f32(words, m21x::W, values.active_power as f32);
            packing::pack_f32(words, m21x::VA, values.apparent_power as f32);
            packing::pack_f32(words, m21x::VAR, values.reactive_power as f32);
            packing::pack_f32(words, m21x::PHV, values.ph_voltage as f32);
            packing::pack_f32(words, m21x::PPV, values.pp_voltage as f32);
            packing::pack_f32(words, m21x::A, values.current as f32);
            packing::pack_f32(words, m21x::FREQ, values.frequency as f32);
            packing::pack_f32(words, m21x::TOTWH_IMP, energy_wh as f32);

            let per_phase = [
                (m21x::PFPHA, m21x::WPHA, m21x::VAPHA, m21x::VARPHA),
                (m21x::PFPHB, m21x::WPHB, m21x::VAPHB, m21x::VARPHB),
                (m21x::PFPHC, m21x::WPHC, m21x::VAPHC, m21x::VARPHC),
            ];
            for ((regs, phase), pf_pct) in per_phase.iter().zip(phases).zip(pf_by_phase) {
                packing::pack_f32(words, regs.0, pf_pct as f32);
                packing::pack_f32(words, regs.1, phase.active_power as f32);
                packing::pack_f32(words, regs.2, phase.apparent_power as f32);
                packing::pack_f32(words, regs.3, phase.reactive_power as f32);
            }

            let voltages = [
                (m21x::PHVPHA, m21x::PPVPHAB),
                (m21x::PHVPHB, m21x::PPVPHBC),
                (m21x::PHVPHC, m21x::PPVPHCA),
            ];
            for (regs, phase) in voltages.iter().zip(phases) {
                packing::pack_f32(words, regs.0, phase.ph_voltage as f32);
                packing::pack_f32(words, regs.1, phase.pp_voltage as f32);
            }

            let currents = [m21x::APHA, m21x::APHB, m21x::APHC];
            for (reg, phase) in currents.iter().zip(phases) {
                packing::pack_f32(words, *reg, phase.current as f32);
            }
        } else {
            let words = &mut self.words;

            packing::pack_scaled(words, m20x::PF, m20x::PF_SF, pf, 0);
            packing::pack_scaled(words, m20x::W, m20x::W_SF, values.active_power, 0);
            packing::pack_scaled(words, m20x::VA, m20x::VA_SF, values.apparent_power, 0);
            packing::pack_scaled(words, m20x::VAR, m20x::VAR_SF, values.reactive_power, 0);
            packing::pack_scaled(words, m20x::PHV, m20x::V_SF, values.ph_voltage, 1);
            packing::pack_scaled(words, m20x::PPV, m20x::V_SF, values.pp_voltage, 1);
            packing::pack_scaled(words, m20x::A, m20x::A_SF, values.current, 3);
            packing::pack_scaled(words, m20x::FREQ, m20x::FREQ_SF, values.frequency, 2);
            packing::pack_scaled(words, m20x::TOTWH_IMP, m20x::TOTWH_SF, energy_wh, 1);

            let per_phase = [
                (m20x::PFPHA, m20x::WPHA, m20x::VAPHA, m20x::VARPHA),
                (m20x::PFPHB, m20x::WPHB, m20x::VAPHB, m20x::VARPHB),
                (m20x::PFPHC, m20x::WPHC, m20x::VAPHC, m20x::VARPHC),
            ];
            for ((regs, phase), pf_pct) in per_phase.iter().zip(phases).zip(pf_by_phase) {
                packing::pack_scaled(words, regs.0, m20x::PF_SF, pf_pct, 0);
                packing::pack_scaled(words, regs.1, m20x::W_SF, phase.active_power, 0);
                packing::pack_scaled(words, regs.2, m20x::VA_SF, phase.apparent_power, 0);
                packing::pack_scaled(words, regs.3, m20x::VAR_SF, phase.reactive_power, 0);
            }

            let voltages = [
                (m20x::PHVPHA, m20x::PPVPHAB),
                (m20x::PHVPHB, m20x::PPVPHBC),
                (m20x::PHVPHC, m20x::PPVPHCA),
            ];
            for (regs, phase) in voltages.iter().zip(phases) {
                packing::pack_scaled(words, regs.0, m20x::V_SF, phase.ph_voltage, 1);
                packing::pack_scaled(words, regs.1, m20x::V_SF, phase.pp_voltage, 1);
            }

            let currents = [m20x::APHA, m20x::APHB, m20x::APHC];
            for (reg, phase) in currents.iter().zip(phases) {
                packing::pack_scaled(words, *reg, m20x::A_SF, phase.current, 3);
            }
        }
    }

    /// Write the device identity strings into the Common Model. The fields
    /// are fixed-width; longer values are truncated to their register run.
    pub fn apply_device(&mut self, device: &Device) -> Result<(), Error> {
        packing::pack_string(&mut self.words, c001::MN, fit(&device.manufacturer, c001::MN))?;
        packing::pack_string(&mut self.words, c001::MD, fit(&device.model, c001::MD))?;
        packing::pack_string(&mut self.words, c001::OPT, fit(&device.options, c001::OPT))?;
        packing::pack_string(&mut self.words, c001::VR, fit(&device.fw_version, c001::VR))?;
        packing::pack_string(&mut self.words, c001::SN, fit(&device.serial_number, c001::SN))?;
        Ok(())
    }
}

fn fit(value: &str, reg: Register) -> &str {
    let capacity = reg.nb as usize * 2;
    if value.len() <= capacity {
        return value;
    }
    let mut end = capacity;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
