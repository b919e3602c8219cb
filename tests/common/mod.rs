#![allow(dead_code)]

use obis_bridge::config::{Grid, Modbus, ModbusTcp};
use obis_bridge::meter::{parser, Device, Values};

pub struct Factory;

impl Factory {
    /// One nominal telegram as emitted by the meter's optical head.
    pub fn telegram() -> String {
        concat!(
            "/EBZ5DD3BZ06ETA_107\r\n",
            "\r\n",
            "1-0:0.0.0*255(1EBZ0100507409)\r\n",
            "1-0:96.1.0*255(1EBZ0100507409)\r\n",
            "1-0:1.8.0*255(000125.25688570*kWh)\r\n",
            "1-0:16.7.0*255(000259.20*W)\r\n",
            "1-0:36.7.0*255(000075.18*W)\r\n",
            "1-0:56.7.0*255(000092.34*W)\r\n",
            "1-0:76.7.0*255(000091.68*W)\r\n",
            "1-0:32.7.0*255(232.4*V)\r\n",
            "1-0:52.7.0*255(231.7*V)\r\n",
            "1-0:72.7.0*255(233.7*V)\r\n",
            "1-0:96.5.0*255(001C0104)\r\n",
            "0-0:96.8.0*255(00104443)\r\n",
            "!1B"
        )
        .to_string()
    }

    pub fn grid() -> Grid {
        Grid::default()
    }

    pub fn values() -> Values {
        parser::parse_values(&Self::telegram(), &Self::grid()).unwrap()
    }

    pub fn device() -> Device {
        parser::parse_device(&Self::telegram()).unwrap()
    }

    /// Modbus config without a transport; tests bind their own listener and
    /// drive `serve_tcp` directly. Timeouts are short on purpose.
    pub fn modbus_config(use_float_model: bool) -> Modbus {
        Modbus {
            tcp: Some(ModbusTcp {
                listen: "127.0.0.1".to_string(),
                port: 0,
            }),
            rtu: None,
            slave_id: 1,
            request_timeout: 1,
            idle_timeout: 1,
            use_float_model,
        }
    }
}
