pub mod map;
pub mod packing;
pub mod registers;

pub use map::{RegisterMap, MODBUS_REGISTERS};
pub use registers::{Register, RegKind};
