use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use satscan::catalog::{BlindSweep, TransponderCatalog};
use satscan::channel;
use satscan::config::{Config, ConfigError, OutputConfig, TunerConfig};
use satscan::diseqc::{
    self, DiseqcCommand, MotorDirection, Positioner, SecBus, SecStep, SwitchVersion,
};
use satscan::driver::TunerDriver;
use satscan::dvb_device;
use satscan::eit::{self, BroadcastEvent};
use satscan::satellite;
use satscan::scan::{self, CancelToken, ScanOrchestrator, ScanResult, ScanState};
use satscan::sim::SimMode;
use satscan::sink::MemorySink;
use satscan::transponder::Polarization;
use satscan::tuner::LinuxFrontend;
use satscan::{Error, Result};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// satscan - DVB-S/S2 scanner with DiSEqC and USALS dish control
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ./satscan.toml, ~/.config/satscan, /etc/satscan)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the transponder catalog, save channels, EPG and signal report
    Scan(ScanArgs),
    /// Sweep a frequency range for carriers
    BlindScan(BlindScanArgs),
    /// Point a USALS positioner at a satellite
    Goto(GotoArgs),
    /// Select a DiSEqC 1.0/1.1 switch input
    Switch(SwitchArgs),
    /// Send a DiSEqC 1.2 positioner command
    Motor(MotorArgs),
    /// Decode EIT sections from a binary or hex dump file
    DecodeEit {
        file: PathBuf,
    },
    /// List known satellites and their USALS angles from the configured site
    Satellites,
    /// Show or export the transponder catalog
    Catalog(CatalogArgs),
    /// Check system readiness
    Doctor,
}

#[derive(Args, Debug, Default)]
struct TunerArgs {
    /// DVB adapter number; repeat to scan with several adapters in parallel
    #[arg(short, long = "adapter")]
    adapters: Vec<u32>,

    /// Use the simulated tuner even if hardware is present
    #[arg(long)]
    simulate: bool,
}

#[derive(Args, Debug)]
struct ScanArgs {
    #[command(flatten)]
    tuner: TunerArgs,

    /// Transponder catalog (JSON or dvbv5 scan file)
    #[arg(short = 'C', long)]
    catalog: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Start a new channel list instead of updating the existing one
    #[arg(long)]
    fresh: bool,

    /// Take the transponder list from the network table (NIT) of the first
    /// catalog entry that locks, falling back to the catalog
    #[arg(long)]
    nit: bool,
}

#[derive(Args, Debug)]
struct BlindScanArgs {
    #[command(flatten)]
    tuner: TunerArgs,

    /// First frequency in MHz
    #[arg(long)]
    start: Option<u32>,

    /// Last frequency in MHz
    #[arg(long)]
    end: Option<u32>,

    /// Step in MHz
    #[arg(long)]
    step: Option<u32>,

    /// Polarizations to sweep, e.g. H,V
    #[arg(long, value_delimiter = ',')]
    pol: Vec<Polarization>,

    /// Symbol rates to try in ksps, e.g. 27500,30000
    #[arg(long, value_delimiter = ',')]
    symbol_rates: Vec<u32>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write the carriers found as a dvbv5 catalog
    #[arg(long)]
    save_catalog: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SecArgs {
    /// DVB adapter number
    #[arg(short, long)]
    adapter: Option<u32>,

    /// Use the simulated tuner even if hardware is present
    #[arg(long)]
    simulate: bool,

    /// Only print the DiSEqC frames
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct GotoArgs {
    /// Satellite key, see `satscan satellites`
    satellite: String,

    /// Site latitude in degrees, north positive
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Site longitude in degrees, east positive
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,

    #[command(flatten)]
    sec: SecArgs,
}

#[derive(Args, Debug)]
struct SwitchArgs {
    /// Switch input, 0-3 for DiSEqC 1.0, 0-15 for 1.1
    port: u8,

    /// DiSEqC version of the switch (1.0 or 1.1)
    #[arg(long, default_value = "1.0")]
    diseqc: SwitchVersion,

    /// Polarization to select
    #[arg(long, default_value = "V")]
    pol: Polarization,

    /// Select the high band (22 kHz tone)
    #[arg(long)]
    high_band: bool,

    #[command(flatten)]
    sec: SecArgs,
}

#[derive(Args, Debug)]
struct MotorArgs {
    #[command(subcommand)]
    action: MotorAction,

    #[command(flatten)]
    sec: SecArgs,
}

#[derive(Subcommand, Debug)]
enum MotorAction {
    /// Drive to a stored position
    Goto { position: u8 },
    /// Store the current position
    Store { position: u8 },
    /// Drive east or west; 0 steps drives until stopped
    Drive {
        direction: MotorDirection,
        #[arg(default_value_t = 0)]
        steps: u8,
    },
    /// Halt the positioner
    Stop,
    /// Set the east or west soft limit at the current position
    Limit { direction: MotorDirection },
    /// Disable the soft limits
    ClearLimits,
}

#[derive(Args, Debug)]
struct CatalogArgs {
    /// Catalog file (JSON or dvbv5 scan file)
    #[arg(short = 'C', long)]
    catalog: Option<PathBuf>,

    /// Print in dvbv5 scan file format
    #[arg(long)]
    dvbv5: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (config, origin) = match Config::load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };
    match &origin {
        Some(path) => info!("configuration from {}", path.display()),
        None => info!("no configuration file found, using defaults"),
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted, stopping after the current transponder...");
        handler_token.cancel();
    }) {
        warn!("cannot install Ctrl-C handler: {e}");
    }

    let outcome = match cli.command {
        Command::Scan(args) => cmd_scan(&config, &args, &cancel),
        Command::BlindScan(args) => cmd_blind_scan(&config, &args, &cancel),
        Command::Goto(args) => cmd_goto(&config, &args),
        Command::Switch(args) => cmd_switch(&config, &args),
        Command::Motor(args) => cmd_motor(&config, &args),
        Command::DecodeEit { file } => cmd_decode_eit(&file),
        Command::Satellites => cmd_satellites(&config),
        Command::Catalog(args) => cmd_catalog(&config, &args),
        Command::Doctor => cmd_doctor(&config, origin.as_deref()),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

/// `[tuner]` with command line overrides applied.
fn tuner_config(config: &Config, args: &TunerArgs) -> TunerConfig {
    let mut tuner = config.tuner.clone();
    if !args.adapters.is_empty() {
        tuner.adapters = args.adapters.clone();
    }
    tuner.simulate |= args.simulate;
    tuner
}

fn output_config(config: &Config, dir: Option<&Path>) -> OutputConfig {
    let mut output = config.output.clone();
    if let Some(dir) = dir {
        output.dir = dir.to_path_buf();
    }
    output
}

fn load_catalog(config: &Config, explicit: Option<&Path>) -> Result<TransponderCatalog> {
    match explicit.or(config.scan.catalog.as_deref()) {
        Some(path) => TransponderCatalog::load(path),
        None => TransponderCatalog::builtin(),
    }
}

/// One driver per adapter, chosen by a single hardware check each.
fn select_drivers(
    config: &Config,
    tuner: &TunerConfig,
    mode: SimMode,
) -> Result<Vec<Box<dyn TunerDriver>>> {
    let mut drivers = Vec::new();
    for &adapter in &tuner.adapters {
        let selection = scan::select_driver(tuner, adapter, config.lnb, mode)?;
        if let Some(reason) = &selection.reason {
            println!("{YELLOW}adapter{adapter}: using simulated tuner ({reason}){RESET}");
        }
        drivers.push(selection.driver);
    }
    Ok(drivers)
}

fn cmd_scan(config: &Config, args: &ScanArgs, cancel: &CancelToken) -> Result<()> {
    let catalog = load_catalog(config, args.catalog.as_deref())?;
    let options = config.scan_options()?;
    let tuner = tuner_config(config, &args.tuner);
    let output = output_config(config, args.output.as_deref());
    let mode = SimMode::Targeted {
        invent_unknown: config.scan.simulate_unknown,
    };
    let mut drivers = select_drivers(config, &tuner, mode)?;

    let sink = if args.fresh {
        MemorySink::new()
    } else {
        existing_channels(&output.channels_path())
    };

    let catalog = match drivers.first_mut() {
        Some(driver) if args.nit => {
            let mut orchestrator = ScanOrchestrator::new(driver.as_mut(), &sink, options.clone());
            let (list, source) = orchestrator.network_catalog(&catalog);
            println!("Transponder list: {source}");
            list
        }
        _ => catalog,
    };

    println!(
        "Scanning {} transponders ({}) with {} adapter(s)...",
        catalog.len(),
        catalog.satellite(),
        drivers.len()
    );
    let result = match drivers.pop() {
        Some(mut driver) if drivers.is_empty() => {
            ScanOrchestrator::new(driver.as_mut(), &sink, options).scan_catalog(&catalog, cancel)
        }
        Some(driver) => {
            drivers.push(driver);
            scan::run_parallel(drivers, &catalog, &sink, &options, cancel)
        }
        None => ScanResult::default(),
    };

    println!();
    print_result(&result);
    save_outputs(&sink, &output)
}

/// Seed the sink with the current channel list so transponders that are
/// not re-scanned keep their channels.
fn existing_channels(path: &Path) -> MemorySink {
    if !path.exists() {
        return MemorySink::new();
    }
    match channel::parse_channels_conf(path) {
        Ok(channels) => {
            info!("updating {} channels from {}", channels.len(), path.display());
            MemorySink::with_channels(channels)
        }
        Err(e) => {
            warn!("ignoring unreadable {}: {e}", path.display());
            MemorySink::new()
        }
    }
}

fn print_result(result: &ScanResult) {
    for attempt in result.attempts.iter().filter(|a| a.state == ScanState::Failed) {
        println!(
            "  {RED}FAILED{RESET} {}: {}",
            attempt.transponder,
            attempt.error.as_deref().unwrap_or("no lock")
        );
    }
    for ch in &result.channels {
        let mut flags = String::new();
        if ch.hd {
            flags.push_str(" HD");
        }
        if !ch.free_to_air {
            flags.push_str(" scrambled");
        }
        println!(
            "  {} MHz {} SID={:<5} {:<5} {}{}",
            ch.frequency_mhz, ch.polarization, ch.service_id, ch.kind, ch.name, flags
        );
    }
    println!();
    println!("{BOLD}{result}{RESET}");
}

fn save_outputs(sink: &MemorySink, output: &OutputConfig) -> Result<()> {
    let channels_path = output.channels_path();
    if let Some(backup) = sink.write_channels_conf(&channels_path)? {
        println!("Previous channel list saved as {}", backup.display());
    }
    println!("Wrote {} channels to {}", sink.channel_count(), channels_path.display());

    let events_path = output.events_path();
    sink.write_events_json(&events_path)?;
    println!("Wrote {} events to {}", sink.event_count(), events_path.display());

    let transponders_path = output.transponders_path();
    sink.write_transponders_json(&transponders_path)?;
    println!("Wrote signal report to {}", transponders_path.display());
    Ok(())
}

fn blind_sweep(config: &Config, args: &BlindScanArgs) -> Result<BlindSweep> {
    let mut sweep = config.blind_sweep();
    if let Some(start) = args.start {
        sweep.start_mhz = start;
    }
    if let Some(end) = args.end {
        sweep.end_mhz = end;
    }
    if let Some(step) = args.step {
        sweep.step_mhz = step;
    }
    if !args.pol.is_empty() {
        sweep.polarizations = args.pol.clone();
    }
    if !args.symbol_rates.is_empty() {
        sweep.symbol_rates_ksps = args.symbol_rates.clone();
    }
    if sweep.step_mhz == 0 || sweep.start_mhz > sweep.end_mhz {
        return Err(ConfigError::Invalid(format!(
            "blind sweep {}..{} step {} is empty",
            sweep.start_mhz, sweep.end_mhz, sweep.step_mhz
        ))
        .into());
    }
    Ok(sweep)
}

fn cmd_blind_scan(config: &Config, args: &BlindScanArgs, cancel: &CancelToken) -> Result<()> {
    let sweep = blind_sweep(config, args)?;
    let options = config.scan_options()?;
    let tuner = tuner_config(config, &args.tuner);
    let output = output_config(config, args.output.as_deref());
    let adapter = tuner.adapters.first().copied().unwrap_or(0);
    if tuner.adapters.len() > 1 {
        warn!("blind scan uses one adapter; scanning with adapter{adapter}");
    }
    let selection = scan::select_driver(&tuner, adapter, config.lnb, SimMode::Blind)?;
    if let Some(reason) = &selection.reason {
        println!("{YELLOW}adapter{adapter}: using simulated tuner ({reason}){RESET}");
    }
    let mut driver = selection.driver;

    println!(
        "Blind scan {}-{} MHz, step {} MHz, {} polarization(s), {} symbol rate(s)...",
        sweep.start_mhz,
        sweep.end_mhz,
        sweep.step_mhz,
        sweep.polarizations.len(),
        sweep.symbol_rates_ksps.len()
    );
    let sink = MemorySink::new();
    let result = ScanOrchestrator::new(driver.as_mut(), &sink, options).blind_scan(&sweep, cancel)?;

    println!();
    let found: Vec<_> = result
        .attempts
        .iter()
        .filter(|a| a.state == ScanState::Locked)
        .map(|a| a.transponder.clone())
        .collect();
    for tp in &found {
        println!("  {GREEN}LOCK{RESET} {tp}");
    }
    println!();
    println!("{BOLD}Found {} carriers; {result}{RESET}", found.len());

    if let Some(path) = &args.save_catalog {
        let catalog = TransponderCatalog::new("blind", found)?;
        fs::write(path, catalog.to_dvbv5()).map_err(|e| Error::Io {
            context: format!("failed to write {}", path.display()),
            source: e,
        })?;
        println!("Wrote {} transponders to {}", catalog.len(), path.display());
    }
    save_outputs(&sink, &output)
}

/// Run `send` against the SEC bus of the first configured adapter.
fn with_sec_bus(
    config: &Config,
    sec: &SecArgs,
    send: impl FnOnce(&mut Positioner, &mut dyn SecBus) -> Result<()>,
) -> Result<()> {
    if sec.dry_run {
        return Ok(());
    }
    let tuner = tuner_config(
        config,
        &TunerArgs {
            adapters: sec.adapter.into_iter().collect(),
            simulate: sec.simulate,
        },
    );
    let adapter = tuner.adapters.first().copied().unwrap_or(0);
    let mode = SimMode::Targeted {
        invent_unknown: false,
    };
    let selection = scan::select_driver(&tuner, adapter, config.lnb, mode)?;
    if let Some(reason) = &selection.reason {
        println!("{YELLOW}adapter{adapter}: nothing sent, simulated tuner ({reason}){RESET}");
    }
    let mut driver = selection.driver;
    let mut positioner = Positioner::new();
    send(&mut positioner, driver.sec_bus())?;
    println!("Sent {} DiSEqC frame(s) on {}.", positioner.frames_sent(), driver.name());
    Ok(())
}

fn print_frame(cmd: &DiseqcCommand) {
    println!("  DiSEqC: [{cmd}]");
}

fn cmd_goto(config: &Config, args: &GotoArgs) -> Result<()> {
    let lat = args.lat.unwrap_or(config.site.latitude_deg);
    let lon = args.lon.unwrap_or(config.site.longitude_deg);
    let sat = satellite::find(&args.satellite)?;
    let (cmd, angle) = diseqc::goto_satellite(sat.key, lat, lon)?;

    println!("{} at {}", sat.name, sat.orbital_position());
    println!("  site {lat:.2}°, {lon:.2}°");
    println!(
        "  motor angle {:.2}°, elevation {:.2}°",
        angle.motor_angle_deg, angle.elevation_deg
    );
    if angle.elevation_deg < 0.0 {
        println!("  {YELLOW}satellite is below the horizon from this site{RESET}");
    }
    print_frame(&cmd);

    with_sec_bus(config, &args.sec, |positioner, bus| positioner.goto_angle(bus, &angle))
}

fn cmd_switch(config: &Config, args: &SwitchArgs) -> Result<()> {
    let steps = diseqc::switch_sequence(args.diseqc, args.port, args.pol, args.high_band)?;
    println!(
        "Port {} {} {} band:",
        args.port,
        args.pol,
        if args.high_band { "high" } else { "low" }
    );
    for step in &steps {
        match step {
            SecStep::SetVoltage(v) => println!("  voltage {v}"),
            SecStep::SetTone(on) => println!("  tone {}", if *on { "on" } else { "off" }),
            SecStep::Send(cmd) => print_frame(cmd),
            SecStep::Burst(burst) => println!("  tone burst SAT-{burst:?}"),
            SecStep::Wait(_) => {}
        }
    }

    with_sec_bus(config, &args.sec, |positioner, bus| positioner.run(bus, &steps))
}

fn motor_command(action: &MotorAction) -> Result<DiseqcCommand> {
    match *action {
        MotorAction::Goto { position } => Ok(diseqc::motor_goto_stored_position(position)),
        MotorAction::Store { position } => Ok(diseqc::motor_store_position(position)),
        MotorAction::Drive { direction, steps } => diseqc::motor_drive(direction, steps),
        MotorAction::Stop => diseqc::motor_drive(MotorDirection::Stop, 0),
        MotorAction::Limit { direction } => diseqc::motor_set_limit(direction),
        MotorAction::ClearLimits => Ok(diseqc::motor_clear_limits()),
    }
}

fn cmd_motor(config: &Config, args: &MotorArgs) -> Result<()> {
    let cmd = motor_command(&args.action)?;
    print_frame(&cmd);
    with_sec_bus(config, &args.sec, |positioner, bus| positioner.transmit(bus, &cmd))
}

/// Hex dumps may contain whitespace and line breaks.
fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).ok()?, 16).ok())
        .collect()
}

/// Cut a buffer of back-to-back sections at their declared lengths.
fn split_sections(data: &[u8]) -> Vec<&[u8]> {
    let mut sections = Vec::new();
    let mut rest = data;
    while rest.len() >= 3 && rest[0] != 0xFF {
        let len = 3 + ((((rest[1] & 0x0F) as usize) << 8) | rest[2] as usize);
        let (section, tail) = rest.split_at(len.min(rest.len()));
        sections.push(section);
        rest = tail;
    }
    sections
}

fn cmd_decode_eit(path: &Path) -> Result<()> {
    let raw = fs::read(path).map_err(|e| Error::Io {
        context: format!("failed to read {}", path.display()),
        source: e,
    })?;
    let data = match std::str::from_utf8(&raw).ok().and_then(parse_hex) {
        Some(bytes) => bytes,
        None => raw,
    };

    let sections = split_sections(&data);
    let mut events: Vec<BroadcastEvent> =
        sections.iter().flat_map(|s| eit::decode_section(s)).collect();
    events.sort_by_key(|e| (e.channel_id, e.start, e.event_id));

    println!("{} sections, {} events", sections.len(), events.len());
    for event in &events {
        let rating = if event.parental_rating > 0 {
            format!(" {}+", event.parental_rating)
        } else {
            String::new()
        };
        println!(
            "  SID={} [{}] {} ({} min) {} [{}] {}{}",
            event.channel_id,
            event.event_id,
            event.start.format("%Y-%m-%d %H:%M"),
            event.duration_min,
            event.title,
            event.language,
            event.genre,
            rating,
        );
        if !event.description.is_empty() {
            println!("      {}", event.description);
        }
    }
    Ok(())
}

fn cmd_satellites(config: &Config) -> Result<()> {
    let lat = config.site.latitude_deg;
    let lon = config.site.longitude_deg;
    println!("Site {lat:.2}°, {lon:.2}°");
    println!();
    println!(
        "{:<12} {:<22} {:>8} {:>8} {:>10}  port",
        "key", "name", "orbit", "motor", "elevation"
    );
    for sat in satellite::SATELLITES {
        let angle = diseqc::compute_usals_angle(sat.longitude_deg, lat, lon);
        let port = sat.switch_port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<22} {:>8} {:>7.2}° {:>9.2}°  {}",
            sat.key,
            sat.name,
            sat.orbital_position(),
            angle.motor_angle_deg,
            angle.elevation_deg,
            port
        );
    }
    Ok(())
}

fn cmd_catalog(config: &Config, args: &CatalogArgs) -> Result<()> {
    let catalog = load_catalog(config, args.catalog.as_deref())?;
    if args.dvbv5 {
        print!("{}", catalog.to_dvbv5());
        return Ok(());
    }
    println!("{}: {} transponders", catalog.satellite(), catalog.len());
    for tp in &catalog {
        let band = if tp.is_high_band(&config.lnb) { "high" } else { "low" };
        if tp.note().is_empty() {
            println!("  {tp} ({band} band)");
        } else {
            println!("  {tp} ({band} band) {}", tp.note());
        }
    }
    Ok(())
}

fn cmd_doctor(config: &Config, origin: Option<&Path>) -> Result<()> {
    let mut ok = true;

    // 1. Configuration
    print!("configuration ... ");
    match origin {
        Some(path) => println!("{GREEN}OK{RESET} ({})", path.display()),
        None => println!("{GREEN}OK{RESET} (built-in defaults)"),
    }

    // 2. DVB frontends known to the kernel
    print!("DVB frontends ... ");
    let devices = dvb_device::detect_devices();
    if devices.is_empty() {
        println!("{RED}{BOLD}NOT FOUND{RESET}");
        ok = false;
    } else {
        println!("{GREEN}OK{RESET} ({} found)", devices.len());
        for dev in &devices {
            println!(
                "  dvb{}.frontend{}: {} ({}:{})",
                dev.adapter,
                dev.frontend,
                dev.description(),
                dev.vendor_id,
                dev.device_id
            );
        }
    }

    // 3. Configured adapters can be opened
    for &adapter in &config.tuner.adapters {
        print!("adapter{adapter}/frontend{} ... ", config.tuner.frontend);
        match LinuxFrontend::open(adapter, config.tuner.frontend, config.lnb) {
            Ok(_) => println!("{GREEN}OK{RESET}"),
            Err(e) => {
                println!("{RED}{BOLD}UNAVAILABLE{RESET}");
                println!("  {e}");
                ok = false;
            }
        }
    }

    // 4. Transponder catalog
    print!("transponder catalog ... ");
    match load_catalog(config, None) {
        Ok(catalog) if catalog.is_empty() => {
            println!("{RED}{BOLD}EMPTY{RESET}");
            ok = false;
        }
        Ok(catalog) => println!(
            "{GREEN}OK{RESET} ({}, {} transponders)",
            catalog.satellite(),
            catalog.len()
        ),
        Err(e) => {
            println!("{RED}{BOLD}INVALID{RESET}");
            println!("  {e}");
            ok = false;
        }
    }

    // 5. Existing channel list
    let conf_path = config.output.channels_path();
    print!("{} ... ", conf_path.display());
    if !conf_path.exists() {
        println!("{YELLOW}NOT FOUND{RESET}");
        println!("  Run 'satscan scan' to create it.");
    } else {
        match channel::parse_channels_conf(&conf_path) {
            Ok(channels) => println!("{GREEN}OK{RESET} ({} channels)", channels.len()),
            Err(e) => {
                println!("{RED}{BOLD}INVALID{RESET}");
                println!("  {e}");
                ok = false;
            }
        }
    }

    println!();
    if ok {
        println!("{GREEN}{BOLD}All checks passed.{RESET}");
    } else {
        println!("{RED}{BOLD}Some checks failed.{RESET}");
        process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("4e f0 1a\n00"), Some(vec![0x4E, 0xF0, 0x1A, 0x00]));
        assert_eq!(parse_hex("4EF"), None);
        assert_eq!(parse_hex("zz"), None);
        assert_eq!(parse_hex("  "), None);
    }

    #[test]
    fn test_split_sections() {
        let mut data = vec![0x4E, 0xF0, 0x02, 0xAA, 0xBB];
        data.extend_from_slice(&[0x4F, 0xF0, 0x01, 0xCC]);
        data.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        let sections = split_sections(&data);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0], &[0x4E, 0xF0, 0x02, 0xAA, 0xBB]);
        assert_eq!(sections[1], &[0x4F, 0xF0, 0x01, 0xCC]);
    }

    #[test]
    fn test_split_truncated_section() {
        let sections = split_sections(&[0x4E, 0xF0, 0x20, 0x01]);
        assert_eq!(sections, vec![&[0x4E, 0xF0, 0x20, 0x01][..]]);
    }

    #[test]
    fn test_cli_scan_adapters() {
        let cli =
            Cli::try_parse_from(["satscan", "scan", "-a", "0", "-a", "1", "--simulate"]).unwrap();
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.tuner.adapters, vec![0, 1]);
        let tuner = tuner_config(&Config::default(), &args.tuner);
        assert_eq!(tuner.adapters, vec![0, 1]);
        assert!(tuner.simulate);
        assert!(!args.nit);
    }

    #[test]
    fn test_cli_scan_nit() {
        let cli = Cli::try_parse_from(["satscan", "scan", "--nit", "--simulate"]).unwrap();
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert!(args.nit);
        assert!(args.tuner.simulate);
    }

    #[test]
    fn test_cli_switch() {
        let argv = ["satscan", "switch", "2", "--pol", "H", "--high-band", "--dry-run"];
        let cli = Cli::try_parse_from(argv).unwrap();
        let Command::Switch(args) = cli.command else {
            panic!("expected switch");
        };
        assert_eq!(args.port, 2);
        assert_eq!(args.diseqc, SwitchVersion::V1_0);
        assert_eq!(args.pol, Polarization::Horizontal);
        assert!(args.high_band);
        assert!(args.sec.dry_run);
    }

    #[test]
    fn test_cli_goto_negative_longitude() {
        let argv = ["satscan", "goto", "hotbird", "--lat", "40.4", "--lon", "-3.7"];
        let cli = Cli::try_parse_from(argv).unwrap();
        let Command::Goto(args) = cli.command else {
            panic!("expected goto");
        };
        assert_eq!(args.lon, Some(-3.7));
    }

    #[test]
    fn test_cli_blind_scan_lists() {
        let cli = Cli::try_parse_from([
            "satscan",
            "blind-scan",
            "--pol",
            "H,V",
            "--symbol-rates",
            "27500,30000",
            "--start",
            "11000",
        ])
        .unwrap();
        let Command::BlindScan(args) = cli.command else {
            panic!("expected blind-scan");
        };
        let sweep = blind_sweep(&Config::default(), &args).unwrap();
        assert_eq!(sweep.start_mhz, 11000);
        assert_eq!(sweep.end_mhz, 12750);
        assert_eq!(sweep.polarizations, vec![Polarization::Horizontal, Polarization::Vertical]);
        assert_eq!(sweep.symbol_rates_ksps, vec![27500, 30000]);
    }

    #[test]
    fn test_blind_sweep_rejects_empty_range() {
        let argv = ["satscan", "blind-scan", "--start", "12000", "--end", "11000"];
        let cli = Cli::try_parse_from(argv).unwrap();
        let Command::BlindScan(args) = cli.command else {
            panic!("expected blind-scan");
        };
        assert!(blind_sweep(&Config::default(), &args).is_err());
    }

    #[test]
    fn test_motor_commands() {
        let cmd = motor_command(&MotorAction::Goto { position: 5 }).unwrap();
        assert_eq!(cmd.command(), 0x6B);
        assert_eq!(cmd.data(), &[5]);
        assert!(motor_command(&MotorAction::Drive {
            direction: MotorDirection::East,
            steps: 200
        })
        .is_err());
        assert!(motor_command(&MotorAction::Limit {
            direction: MotorDirection::Stop
        })
        .is_err());
        assert!(motor_command(&MotorAction::Stop).unwrap().data().is_empty());
    }

    #[test]
    fn test_cli_motor_drive() {
        let cli = Cli::try_parse_from(["satscan", "motor", "drive", "west", "10"]).unwrap();
        let Command::Motor(args) = cli.command else {
            panic!("expected motor");
        };
        let cmd = motor_command(&args.action).unwrap();
        assert_eq!(cmd.command(), 0x69);
        assert_eq!(cmd.data(), &[10]);
    }
}
