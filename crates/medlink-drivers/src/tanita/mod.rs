//! Tanita scales, stadiometers and body composition analysers.
//!
//! | Module       | Models                     | Protocol                          |
//! |--------------|----------------------------|-----------------------------------|
//! | [`printout`] | TBF-210, DC-250 (T), BH-100 | one fixed-offset frame            |
//! | [`scale`]    | WB-110, WB-150, TBF-310    | polled / delimited frames          |
//! | [`tagged`]   | DC-217, DC-430             | one `TAG,value` record            |
//! | [`pc_mode`]  | DC-320, DC-250 (PCM)       | command/reply handshake then record |
//!
//! Slot 1 is height, slot 2 weight and slot 3 body fat throughout.

pub mod pc_mode;
pub mod printout;
pub mod scale;
pub mod tagged;

pub use pc_mode::{Dc250PcmDriver, Dc320Driver};
pub use printout::{Bh100Driver, PrintoutDriver};
pub use scale::{Tbf310Driver, Wb110Driver, Wb150Driver};
pub use tagged::Dc217Driver;
