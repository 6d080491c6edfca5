//! Satellite front-end control: DiSEqC/USALS dish positioning, DVB-S/S2
//! transponder scanning and EIT program guide decoding.

pub mod catalog;
pub mod channel;
pub mod config;
pub mod diseqc;
pub mod dmx;
pub mod driver;
pub mod dvb_device;
pub mod dvb_text;
pub mod eit;
pub mod error;
pub mod psi;
pub mod satellite;
pub mod scan;
pub mod sim;
pub mod sink;
pub mod transponder;
pub mod tuner;

pub use error::{Error, Result};
