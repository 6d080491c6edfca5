//! Scan passes: a catalog walk or a blind sweep, one transponder at a time
//! per adapter.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::catalog::{BlindSweep, TransponderCatalog};
use crate::channel::{Channel, ChannelKind};
use crate::config::TunerConfig;
use crate::diseqc::{self, Positioner, SwitchVersion};
use crate::driver::{SignalQuality, TunerDriver};
use crate::eit::{self, BroadcastEvent};
use crate::error::{Error, Result};
use crate::psi::{self, NetworkInfo};
use crate::sim::{SimMode, SimulatedTuner};
use crate::sink::ResultSink;
use crate::transponder::{LnbProfile, Polarization, Transponder};
use crate::tuner::LinuxFrontend;

/// Lifecycle of one tuning attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Pending,
    Tuning,
    Locked,
    Failed,
}

impl ScanState {
    /// `Pending → Tuning → {Locked, Failed}`; anything else is rejected.
    pub fn advance(self, next: ScanState) -> Result<ScanState> {
        match (self, next) {
            (ScanState::Pending, ScanState::Tuning)
            | (ScanState::Tuning, ScanState::Locked)
            | (ScanState::Tuning, ScanState::Failed) => Ok(next),
            _ => Err(Error::StateTransition { from: self, to: next }),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScanState::Locked | ScanState::Failed)
    }
}

/// What sits between the tuner and the LNB.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Antenna {
    #[default]
    Direct,
    Switch { version: SwitchVersion, port: u8 },
    /// DiSEqC 1.2 positioner slot.
    StoredPosition(u8),
    Usals {
        satellite_longitude_deg: f64,
        site_latitude_deg: f64,
        site_longitude_deg: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanOptions {
    pub lnb: LnbProfile,
    pub antenna: Antenna,
    pub lock_timeout: Duration,
    pub blind_lock_timeout: Duration,
    /// Upper bound on EIT sections read per locked transponder.
    pub eit_sections: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            lnb: LnbProfile::UNIVERSAL,
            antenna: Antenna::Direct,
            lock_timeout: Duration::from_secs(10),
            blind_lock_timeout: Duration::from_secs(5),
            eit_sections: 64,
        }
    }
}

/// Cooperative stop flag, checked between transponders.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// Catalog position, or the running attempt number of a blind sweep.
    pub index: usize,
    pub transponder: Transponder,
    pub state: ScanState,
    pub quality: Option<SignalQuality>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub attempted: usize,
    pub locked: usize,
    pub failed: usize,
    pub tv_channels: usize,
    pub radio_channels: usize,
    pub data_channels: usize,
    pub events: usize,
    pub cancelled: bool,
    pub attempts: Vec<AttemptRecord>,
    pub channels: Vec<Channel>,
}

impl ScanResult {
    pub fn channels_found(&self) -> usize {
        self.tv_channels + self.radio_channels + self.data_channels
    }

    pub fn merge(&mut self, other: ScanResult) {
        self.attempted += other.attempted;
        self.locked += other.locked;
        self.failed += other.failed;
        self.tv_channels += other.tv_channels;
        self.radio_channels += other.radio_channels;
        self.data_channels += other.data_channels;
        self.events += other.events;
        self.cancelled |= other.cancelled;
        self.attempts.extend(other.attempts);
        self.channels.extend(other.channels);
    }

    fn count_channels(&mut self, channels: &[Channel]) {
        for ch in channels {
            match ch.kind {
                ChannelKind::Tv => self.tv_channels += 1,
                ChannelKind::Radio => self.radio_channels += 1,
                ChannelKind::Data => self.data_channels += 1,
            }
        }
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempted, {} locked, {} failed; {} TV, {} radio, {} data channels; {} events",
            self.attempted,
            self.locked,
            self.failed,
            self.tv_channels,
            self.radio_channels,
            self.data_channels,
            self.events
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Where the transponder list of a network scan came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransponderSource {
    /// The NIT of the home transponder.
    Network { network_id: u16, name: String },
    /// The catalog itself, because no usable NIT was found.
    Catalog { reason: String },
}

impl fmt::Display for TransponderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransponderSource::Network { network_id, name } if name.is_empty() => {
                write!(f, "NIT of network {network_id:#06x}")
            }
            TransponderSource::Network { network_id, name } => {
                write!(f, "NIT of network {network_id:#06x} ({name})")
            }
            TransponderSource::Catalog { reason } => write!(f, "catalog ({reason})"),
        }
    }
}

/// Catalog entries tried as home transponder before giving up on the NIT.
const NIT_HOME_CANDIDATES: usize = 3;

/// Hands out catalog entries to one or more orchestrators, each entry once.
pub struct WorkQueue<'a> {
    catalog: &'a TransponderCatalog,
    cursor: AtomicUsize,
}

impl<'a> WorkQueue<'a> {
    pub fn new(catalog: &'a TransponderCatalog) -> Self {
        WorkQueue {
            catalog,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn next(&self) -> Option<(usize, &'a Transponder)> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.catalog.transponders().get(index).map(|tp| (index, tp))
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }
}

/// Drives one tuner through a pass and reports into a shared sink.
pub struct ScanOrchestrator<'a> {
    driver: &'a mut dyn TunerDriver,
    sink: &'a dyn ResultSink,
    options: ScanOptions,
    positioner: Positioner,
    dish_aimed: bool,
    lnb_state: Option<(Polarization, bool)>,
}

impl<'a> ScanOrchestrator<'a> {
    pub fn new(
        driver: &'a mut dyn TunerDriver,
        sink: &'a dyn ResultSink,
        options: ScanOptions,
    ) -> Self {
        ScanOrchestrator {
            driver,
            sink,
            options,
            positioner: Positioner::new(),
            dish_aimed: false,
            lnb_state: None,
        }
    }

    pub fn positioner(&self) -> &Positioner {
        &self.positioner
    }

    fn start_pass(&mut self) {
        self.dish_aimed = false;
        self.lnb_state = None;
    }

    /// Visit every catalog entry once, in order.
    pub fn scan_catalog(
        &mut self,
        catalog: &TransponderCatalog,
        cancel: &CancelToken,
    ) -> ScanResult {
        let queue = WorkQueue::new(catalog);
        self.scan_queue(&queue, cancel)
    }

    /// Take entries from `queue` until it is drained or `cancel` is set.
    pub fn scan_queue(&mut self, queue: &WorkQueue<'_>, cancel: &CancelToken) -> ScanResult {
        self.start_pass();
        let mut result = ScanResult::default();
        let total = queue.len();
        let timeout = self.options.lock_timeout;
        info!("{}: scanning {} transponders", self.driver.name(), total);

        loop {
            if cancel.is_cancelled() {
                info!("{}: scan cancelled", self.driver.name());
                result.cancelled = true;
                break;
            }
            let Some((index, tp)) = queue.next() else {
                break;
            };
            info!("[{}/{}] {}", index + 1, total, tp);
            if let Err(e) = self.scan_one(index, tp, timeout, &mut result) {
                warn!("skipping {tp}: {e}");
            }
        }

        info!("{}: {}", self.driver.name(), result);
        result
    }

    /// Sweep the grid; at each frequency and polarization stop at the
    /// first candidate that locks. Fails only on an invalid sweep.
    pub fn blind_scan(&mut self, sweep: &BlindSweep, cancel: &CancelToken) -> Result<ScanResult> {
        self.start_pass();
        let mut result = ScanResult::default();
        let points = sweep.points();
        let timeout = self.options.blind_lock_timeout;
        info!(
            "{}: blind scan {}-{} MHz step {}, {} points",
            self.driver.name(),
            sweep.start_mhz,
            sweep.end_mhz,
            sweep.step_mhz,
            points.len()
        );

        'points: for (n, &(freq, pol)) in points.iter().enumerate() {
            for tp in sweep.candidates_at(freq, pol)? {
                if cancel.is_cancelled() {
                    info!("{}: blind scan cancelled", self.driver.name());
                    result.cancelled = true;
                    break 'points;
                }
                let index = result.attempted;
                match self.scan_one(index, &tp, timeout, &mut result) {
                    Ok(()) => break,
                    Err(e) => debug!("{tp}: {e}"),
                }
            }
            if (n + 1) % 100 == 0 {
                info!("blind scan: {}/{} points, {} locked", n + 1, points.len(), result.locked);
            }
        }

        info!("{}: {}", self.driver.name(), result);
        Ok(result)
    }

    /// Tune `home` and read the transponder list its network announces.
    pub fn read_network(&mut self, home: &Transponder) -> Result<NetworkInfo> {
        self.start_pass();
        self.network_info(home)
    }

    /// The transponder list announced in the NIT of one of the first
    /// catalog entries. Falls back to `catalog` itself when none of them
    /// locks or carries satellite delivery descriptors.
    pub fn network_catalog(
        &mut self,
        catalog: &TransponderCatalog,
    ) -> (TransponderCatalog, TransponderSource) {
        self.start_pass();
        let mut reason = "catalog is empty".to_string();

        for home in catalog.iter().take(NIT_HOME_CANDIDATES) {
            let info = match self.network_info(home) {
                Ok(info) => info,
                Err(e) => {
                    debug!("no network table via {home}: {e}");
                    reason = format!("{home}: {e}");
                    continue;
                }
            };
            match TransponderCatalog::new(catalog.satellite(), info.transponders) {
                Ok(network) => {
                    let source = TransponderSource::Network {
                        network_id: info.network_id,
                        name: info.name,
                    };
                    let name = self.driver.name();
                    info!("{name}: {source} lists {} transponders", network.len());
                    return (network, source);
                }
                Err(e) => reason = e.to_string(),
            }
        }

        warn!("{}: network table unavailable, scanning the catalog: {reason}", self.driver.name());
        (catalog.clone(), TransponderSource::Catalog { reason })
    }

    /// Scan whatever `network_catalog` settles on.
    pub fn network_scan(
        &mut self,
        catalog: &TransponderCatalog,
        cancel: &CancelToken,
    ) -> (ScanResult, TransponderSource) {
        let (list, source) = self.network_catalog(catalog);
        (self.scan_catalog(&list, cancel), source)
    }

    fn network_info(&mut self, home: &Transponder) -> Result<NetworkInfo> {
        self.tune(home, self.options.lock_timeout)?;
        let info = psi::parse_nit_sections(&self.driver.read_network_table()?);
        if info.transponders.is_empty() {
            return Err(Error::Driver(format!(
                "no satellite delivery descriptors in the NIT on {home}"
            )));
        }
        debug!(
            "NIT of network {:#06x} on {home}: {} transponders",
            info.network_id,
            info.transponders.len()
        );
        Ok(info)
    }

    /// One attempt, recorded in `result` whatever the outcome. `Err` means
    /// the transponder ended up `Failed`.
    fn scan_one(
        &mut self,
        index: usize,
        tp: &Transponder,
        timeout: Duration,
        result: &mut ScanResult,
    ) -> Result<()> {
        result.attempted += 1;
        let mut state = ScanState::Pending.advance(ScanState::Tuning)?;

        let outcome = self.tune(tp, timeout);
        let (quality, error) = match outcome {
            Ok(quality) => {
                state = state.advance(ScanState::Locked)?;
                result.locked += 1;
                self.harvest(tp, quality, result);
                (Some(quality), None)
            }
            Err(ref e) => {
                state = state.advance(ScanState::Failed)?;
                result.failed += 1;
                (None, Some(e.to_string()))
            }
        };

        result.attempts.push(AttemptRecord {
            index,
            transponder: tp.clone(),
            state,
            quality,
            error,
        });
        outcome.map(|_| ())
    }

    fn tune(&mut self, tp: &Transponder, timeout: Duration) -> Result<SignalQuality> {
        self.position(tp)?;
        let status = self.driver.attempt_lock(tp, timeout)?;
        if !status.locked {
            return Err(Error::ProtocolTimeout {
                frequency_mhz: tp.frequency_mhz(),
                polarization: tp.polarization().letter(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(status.quality)
    }

    /// Aim the dish once per pass, then set LNB voltage and tone (through
    /// the switch if there is one) whenever polarization or band changes.
    fn position(&mut self, tp: &Transponder) -> Result<()> {
        let polarization = tp.polarization();
        let high_band = tp.is_high_band(&self.options.lnb);
        let bus = self.driver.sec_bus();

        if !self.dish_aimed {
            match self.options.antenna {
                Antenna::StoredPosition(position) => {
                    info!("driving positioner to stored position {position}");
                    self.positioner.goto_stored_position(bus, position)?;
                }
                Antenna::Usals {
                    satellite_longitude_deg,
                    site_latitude_deg,
                    site_longitude_deg,
                } => {
                    let angle = diseqc::compute_usals_angle(
                        satellite_longitude_deg,
                        site_latitude_deg,
                        site_longitude_deg,
                    );
                    info!(
                        "USALS: motor {:.2}°, elevation {:.2}°",
                        angle.motor_angle_deg, angle.elevation_deg
                    );
                    self.positioner.goto_angle(bus, &angle)?;
                }
                Antenna::Direct | Antenna::Switch { .. } => {}
            }
            self.dish_aimed = true;
        }

        if self.lnb_state == Some((polarization, high_band)) {
            return Ok(());
        }
        match self.options.antenna {
            Antenna::Switch { version, port } => {
                self.positioner
                    .select_switch_port(bus, version, port, polarization, high_band)?;
            }
            _ => self.positioner.set_lnb(bus, polarization, high_band)?,
        }
        self.lnb_state = Some((polarization, high_band));
        Ok(())
    }

    /// Pull the guide and the service list off a locked transponder. Sink
    /// and discovery failures are logged; the transponder stays locked.
    fn harvest(&mut self, tp: &Transponder, quality: SignalQuality, result: &mut ScanResult) {
        let events = self.collect_events();
        result.events += events.len();
        if !events.is_empty() {
            if let Err(e) = self.sink.save_events(&events) {
                warn!("{tp}: failed to store events: {e}");
            }
        }

        let channels = match self.driver.discover_channels(tp) {
            Ok(channels) => channels,
            Err(e) => {
                warn!("{tp}: service discovery failed: {e}");
                Vec::new()
            }
        };
        result.count_channels(&channels);
        if let Err(e) = self.sink.save_channels(&channels) {
            warn!("{tp}: failed to store channels: {e}");
        }

        if let Err(e) = self.sink.save_transponder_quality(tp, quality) {
            warn!("{tp}: failed to store signal quality: {e}");
        }

        info!(
            "locked {tp} ({quality}): {} channels, {} events",
            channels.len(),
            events.len()
        );
        result.channels.extend(channels);
    }

    fn collect_events(&mut self) -> Vec<BroadcastEvent> {
        let mut events = BTreeMap::new();
        for _ in 0..self.options.eit_sections {
            match self.driver.read_section_bytes() {
                Ok(bytes) if bytes.is_empty() => break,
                Ok(bytes) => {
                    for ev in eit::decode_section(&bytes) {
                        events.insert(ev.key(), ev);
                    }
                }
                Err(e) => {
                    warn!("EIT read failed: {e}");
                    break;
                }
            }
        }
        events.into_values().collect()
    }
}

/// Scan one catalog with several tuners at once. Each driver gets its own
/// thread and orchestrator; all pull from one queue, so every transponder
/// is tried by exactly one adapter.
pub fn run_parallel(
    drivers: Vec<Box<dyn TunerDriver>>,
    catalog: &TransponderCatalog,
    sink: &dyn ResultSink,
    options: &ScanOptions,
    cancel: &CancelToken,
) -> ScanResult {
    let queue = WorkQueue::new(catalog);
    let mut total = ScanResult::default();

    thread::scope(|s| {
        let handles: Vec<_> = drivers
            .into_iter()
            .map(|mut driver| {
                let queue = &queue;
                let options = options.clone();
                s.spawn(move || {
                    let mut orchestrator = ScanOrchestrator::new(driver.as_mut(), sink, options);
                    orchestrator.scan_queue(queue, cancel)
                })
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(result) => total.merge(result),
                Err(_) => {
                    error!("scan thread panicked; its transponders are missing from the result")
                }
            }
        }
    });

    total.attempts.sort_by_key(|a| a.index);
    total
}

pub struct DriverSelection {
    pub driver: Box<dyn TunerDriver>,
    pub simulated: bool,
    /// Why the simulated tuner was chosen.
    pub reason: Option<String>,
}

impl DriverSelection {
    fn simulated(mode: SimMode, reason: impl Into<String>) -> Self {
        DriverSelection {
            driver: Box::new(SimulatedTuner::new(mode)),
            simulated: true,
            reason: Some(reason.into()),
        }
    }
}

/// The one hardware check of a pass. A missing frontend selects the
/// simulated tuner with a warning; any other open failure is returned.
pub fn select_driver(
    tuner: &TunerConfig,
    adapter: u32,
    lnb: LnbProfile,
    mode: SimMode,
) -> Result<DriverSelection> {
    if tuner.simulate {
        info!("adapter{adapter}: simulated tuner selected by configuration");
        return Ok(DriverSelection::simulated(mode, "tuner.simulate is set"));
    }
    match LinuxFrontend::open(adapter, tuner.frontend, lnb) {
        Ok(frontend) => {
            info!("using {}", frontend.name());
            Ok(DriverSelection {
                driver: Box::new(frontend),
                simulated: false,
                reason: None,
            })
        }
        Err(Error::HardwareUnavailable(reason)) => {
            warn!("{reason}; falling back to the simulated tuner");
            Ok(DriverSelection::simulated(mode, reason))
        }
        Err(e) => Err(e),
    }
}
