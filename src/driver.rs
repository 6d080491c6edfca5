//! The seam between the scan orchestrator and a tuner front end.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::channel::Channel;
use crate::diseqc::SecBus;
use crate::error::Result;
use crate::transponder::Transponder;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SignalQuality {
    pub snr_db: f32,
    pub strength_pct: u8,
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SNR {:.1} dB, signal {}%", self.snr_db, self.strength_pct)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LockStatus {
    pub locked: bool,
    pub quality: SignalQuality,
}

impl LockStatus {
    pub fn locked(quality: SignalQuality) -> Self {
        LockStatus { locked: true, quality }
    }

    pub fn no_lock() -> Self {
        LockStatus::default()
    }
}

/// A front end the orchestrator can point at a transponder.
///
/// One driver is owned by one orchestrator; calls are strictly sequential.
/// Section reads and channel discovery refer to the most recent successful
/// lock.
pub trait TunerDriver: Send {
    /// Short label for logs, e.g. `adapter0` or `simulated`.
    fn name(&self) -> String;

    /// Tune and wait at most `timeout` for the demodulator to lock. An
    /// expired wait is `Ok` with `locked == false`; `Err` is reserved for
    /// the driver itself failing.
    fn attempt_lock(&mut self, transponder: &Transponder, timeout: Duration) -> Result<LockStatus>;

    /// Next EIT section from the locked transponder. Empty when there is
    /// nothing more to read.
    fn read_section_bytes(&mut self) -> Result<Vec<u8>>;

    /// Services carried by the locked transponder.
    fn discover_channels(&mut self, transponder: &Transponder) -> Result<Vec<Channel>>;

    /// NIT actual sections of the locked transponder. A driver without
    /// access to the network table returns none.
    fn read_network_table(&mut self) -> Result<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }

    /// The satellite equipment control bus in front of this tuner.
    fn sec_bus(&mut self) -> &mut dyn SecBus;

    fn is_simulated(&self) -> bool {
        false
    }
}
