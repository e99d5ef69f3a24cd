//! Instrument Protocol Drivers for medlink
//!
//! Every driver implements [`medlink_core::Driver`] (result readers) or
//! [`medlink_core::SendDriver`] (patient senders) and talks through a
//! [`medlink_core::Transport`], so the same code runs over a serial link or a
//! scripted test transport.
//!
//! # Available Drivers
//!
//! | Module       | Models                                              | Archetype          |
//! |--------------|-----------------------------------------------------|--------------------|
//! | [`tanita`]   | TBF-210, TBF-310, WB-110, WB-150, BH-100, DC-217/430, DC-320, DC-250 | fixed / tagged / handshake |
//! | [`terumo`]   | TM-2580, TM-2655                                    | fixed offset       |
//! | [`chest`]    | SP-350COPD                                          | control-byte ACK   |
//! | [`tomey`]    | CT-70                                               | tagged             |
//! | [`topcon`]   | TX-20P                                              | control-byte ACK   |
//! | [`vasera`]   | VS-3000 (receive and send)                          | fixed / send-only  |
//! | [`waist`]    | DTM-15                                              | fixed offset       |
//! | [`bone`]     | AOS-100NW                                           | handshake          |
//! | [`fukuda`]   | FCP-4521, Fukuda IMO/IMO2/CMN, QR CONNECT           | send-only          |
//!
//! # Registration
//!
//! [`builtin_drivers`] and [`builtin_senders`] return one instance per
//! supported model; the hardware layer builds its registry from them:
//!
//! ```rust
//! use medlink_core::DeviceModel;
//!
//! let drivers = medlink_drivers::builtin_drivers();
//! assert!(drivers.iter().any(|d| d.model() == DeviceModel::Tbf210));
//! ```

use std::sync::Arc;

use medlink_core::{DeviceModel, Driver, SendDriver};

pub mod bone;
pub mod chest;
pub mod fukuda;
pub mod handshake;
pub mod patient;
pub mod tanita;
pub mod terumo;
pub mod tomey;
pub mod topcon;
pub mod vasera;
pub mod waist;

pub use bone::Aos100NwDriver;
pub use chest::Sp350CopdDriver;
pub use fukuda::{FukudaEcgSender, FukudaImageSender, QrConnectSender};
pub use tanita::{
    Bh100Driver, Dc217Driver, Dc250PcmDriver, Dc320Driver, PrintoutDriver, Tbf310Driver,
    Wb110Driver, Wb150Driver,
};
pub use terumo::{Tm2580Driver, Tm2655Driver};
pub use tomey::Ct70Driver;
pub use topcon::Tx20PDriver;
pub use vasera::{Vs3000RecvDriver, Vs3000SendDriver};
pub use waist::Dtm15Driver;

/// One receive-side driver per supported model.
pub fn builtin_drivers() -> Vec<Arc<dyn Driver>> {
    vec![
        Arc::new(PrintoutDriver::tbf210()),
        Arc::new(PrintoutDriver::dc250t()),
        Arc::new(Bh100Driver),
        Arc::new(Tbf310Driver),
        Arc::new(Wb110Driver),
        Arc::new(Wb150Driver),
        Arc::new(Dc217Driver::dc217()),
        Arc::new(Dc217Driver::dc430()),
        Arc::new(Dc320Driver),
        Arc::new(Dc250PcmDriver),
        Arc::new(Tm2580Driver),
        Arc::new(Tm2655Driver),
        Arc::new(Sp350CopdDriver),
        Arc::new(Ct70Driver),
        Arc::new(Tx20PDriver),
        Arc::new(Dtm15Driver::default()),
        Arc::new(Vs3000RecvDriver),
        Arc::new(Aos100NwDriver),
    ]
}

/// One send-only driver per supported model.
pub fn builtin_senders() -> Vec<Arc<dyn SendDriver>> {
    let mut senders: Vec<Arc<dyn SendDriver>> = vec![
        Arc::new(Vs3000SendDriver),
        Arc::new(FukudaEcgSender::fcp4521()),
        Arc::new(FukudaEcgSender::imo2()),
        Arc::new(FukudaImageSender::imo()),
        Arc::new(FukudaImageSender::common()),
    ];
    for model in [DeviceModel::QrConnect, DeviceModel::QrConnectImo, DeviceModel::QrConnectDr] {
        if let Some(sender) = QrConnectSender::new(model) {
            senders.push(Arc::new(sender));
        }
    }
    senders
}
