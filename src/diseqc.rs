//! DiSEqC master commands for LNB switches (1.0/1.1), positioners (1.2) and
//! USALS angular positioning.
//!
//! Builders in this module are pure: they validate parameters and return the
//! frames or the step sequence to perform. [`Positioner`] executes sequences
//! on a [`SecBus`], which is the frontend's satellite equipment control line.

use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use log::debug;

use crate::error::{Error, Result};
use crate::satellite;
use crate::transponder::{Polarization, Voltage};

// Framing bytes
pub const FRAMING_MASTER_NO_REPLY: u8 = 0xE0;
pub const FRAMING_MASTER_REPLY: u8 = 0xE1;
pub const FRAMING_REPEAT_NO_REPLY: u8 = 0xE3;

// Address bytes
pub const ADDR_SWITCH: u8 = 0x10;
pub const ADDR_POSITIONER: u8 = 0x31;

// Command bytes
const CMD_WRITE_N0: u8 = 0x38;
const CMD_WRITE_N1: u8 = 0x39;
const CMD_HALT: u8 = 0x60;
const CMD_LIMITS_OFF: u8 = 0x63;
const CMD_LIMIT_EAST: u8 = 0x66;
const CMD_LIMIT_WEST: u8 = 0x67;
const CMD_DRIVE_EAST: u8 = 0x68;
const CMD_DRIVE_WEST: u8 = 0x69;
const CMD_STORE_POSITION: u8 = 0x6A;
const CMD_GOTO_POSITION: u8 = 0x6B;
const CMD_GOTO_ANGULAR: u8 = 0x6E;

const MAX_DATA_LEN: usize = 3;

/// Settling time between voltage, tone and command changes.
pub const SETTLE: Duration = Duration::from_millis(15);
/// Gap between the uncommitted and committed command of a 1.1 selection.
pub const INTER_COMMAND_GAP: Duration = Duration::from_millis(25);
/// Bus quiet time after every master command.
pub const MASTER_COMMAND_SETTLE: Duration = Duration::from_millis(50);
/// Extra wait after asking a positioner to start moving.
pub const MOTOR_START: Duration = Duration::from_millis(100);

pub const GEO_ORBIT_RADIUS_KM: f64 = 42164.0;
pub const EARTH_RADIUS_KM: f64 = 6378.14;

/// One DiSEqC master frame: framing, address, command and up to 3 data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiseqcCommand {
    framing: u8,
    address: u8,
    command: u8,
    data: [u8; MAX_DATA_LEN],
    data_len: u8,
}

impl DiseqcCommand {
    pub fn new(framing: u8, address: u8, command: u8, data: &[u8]) -> Result<Self> {
        if data.len() > MAX_DATA_LEN {
            return Err(Error::range("DiSEqC data length", data.len() as i64, "0..=3"));
        }
        let mut buf = [0u8; MAX_DATA_LEN];
        buf[..data.len()].copy_from_slice(data);
        Ok(DiseqcCommand {
            framing,
            address,
            command,
            data: buf,
            data_len: data.len() as u8,
        })
    }

    /// Master command without reply, the only framing this crate transmits.
    fn master(address: u8, command: u8, data: &[u8]) -> Self {
        let mut buf = [0u8; MAX_DATA_LEN];
        let len = data.len().min(MAX_DATA_LEN);
        buf[..len].copy_from_slice(&data[..len]);
        DiseqcCommand {
            framing: FRAMING_MASTER_NO_REPLY,
            address,
            command,
            data: buf,
            data_len: len as u8,
        }
    }

    pub fn framing(&self) -> u8 {
        self.framing
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_len as usize]
    }

    pub fn len(&self) -> usize {
        3 + self.data_len as usize
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Wire layout of `struct dvb_diseqc_master_cmd`: 6 message bytes and
    /// the number of them in use.
    pub fn to_bytes(&self) -> ([u8; 6], u8) {
        let mut msg = [0u8; 6];
        msg[0] = self.framing;
        msg[1] = self.address;
        msg[2] = self.command;
        msg[3..3 + self.data_len as usize].copy_from_slice(self.data());
        (msg, self.len() as u8)
    }
}

impl fmt::Display for DiseqcCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (msg, len) = self.to_bytes();
        for (i, b) in msg[..len as usize].iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchVersion {
    /// Committed switch, 4 inputs.
    V1_0,
    /// Uncommitted switch cascaded before a committed one, 16 inputs.
    V1_1,
}

impl SwitchVersion {
    pub fn max_port(self) -> u8 {
        match self {
            SwitchVersion::V1_0 => 3,
            SwitchVersion::V1_1 => 15,
        }
    }
}

impl FromStr for SwitchVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1.0" | "10" => Ok(SwitchVersion::V1_0),
            "1.1" | "11" => Ok(SwitchVersion::V1_1),
            _ => Err(Error::NotFound {
                kind: "DiSEqC switch version",
                key: s.to_string(),
                known: vec!["1.0".to_string(), "1.1".to_string()],
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToneBurst {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorDirection {
    East,
    West,
    Stop,
}

impl FromStr for MotorDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "east" | "e" => Ok(MotorDirection::East),
            "west" | "w" => Ok(MotorDirection::West),
            "stop" | "halt" => Ok(MotorDirection::Stop),
            _ => Err(Error::NotFound {
                kind: "motor direction",
                key: s.to_string(),
                known: vec!["east".to_string(), "west".to_string(), "stop".to_string()],
            }),
        }
    }
}

/// One action on the satellite equipment control line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecStep {
    SetVoltage(Voltage),
    SetTone(bool),
    Send(DiseqcCommand),
    Burst(ToneBurst),
    Wait(Duration),
}

/// Committed switch data byte: fixed high nibble, port in bits 2-3,
/// 18 V polarization in bit 1, high band in bit 0.
fn committed_data(port: u8, polarization: Polarization, high_band: bool) -> u8 {
    let mut data = 0xF0;
    data |= (port & 0x03) << 2;
    if polarization.voltage() == Voltage::V18 {
        data |= 0x02;
    }
    if high_band {
        data |= 0x01;
    }
    data
}

pub fn build_switch_command(
    version: SwitchVersion,
    port: u8,
    polarization: Polarization,
    high_band: bool,
) -> Result<Vec<DiseqcCommand>> {
    match version {
        SwitchVersion::V1_0 => {
            if port > 3 {
                return Err(Error::range("DiSEqC 1.0 port", port, "0..=3"));
            }
            Ok(vec![DiseqcCommand::master(
                ADDR_SWITCH,
                CMD_WRITE_N0,
                &[committed_data(port, polarization, high_band)],
            )])
        }
        SwitchVersion::V1_1 => {
            if port > 15 {
                return Err(Error::range("DiSEqC 1.1 port", port, "0..=15"));
            }
            // Only the committed switch toggles polarization and band.
            Ok(vec![
                DiseqcCommand::master(ADDR_SWITCH, CMD_WRITE_N1, &[0xF0 | (port & 0x0F)]),
                DiseqcCommand::master(
                    ADDR_SWITCH,
                    CMD_WRITE_N0,
                    &[committed_data(port % 4, polarization, high_band)],
                ),
            ])
        }
    }
}

/// Full LNB input selection: voltage, tone off, switch command(s), tone
/// burst (1.0 only) and final tone state, with the settling waits between.
pub fn switch_sequence(
    version: SwitchVersion,
    port: u8,
    polarization: Polarization,
    high_band: bool,
) -> Result<Vec<SecStep>> {
    let commands = build_switch_command(version, port, polarization, high_band)?;

    let mut steps = vec![
        SecStep::SetVoltage(polarization.voltage()),
        SecStep::Wait(SETTLE),
        SecStep::SetTone(false),
        SecStep::Wait(SETTLE),
    ];
    for (i, cmd) in commands.iter().enumerate() {
        if i > 0 {
            steps.push(SecStep::Wait(INTER_COMMAND_GAP));
        }
        steps.push(SecStep::Send(*cmd));
    }
    steps.push(SecStep::Wait(SETTLE));
    if version == SwitchVersion::V1_0 {
        let burst = if port < 2 { ToneBurst::A } else { ToneBurst::B };
        steps.push(SecStep::Burst(burst));
        steps.push(SecStep::Wait(SETTLE));
    }
    steps.push(SecStep::SetTone(high_band));
    Ok(steps)
}

/// LNB setup for a dish without any switch in front of it.
pub fn lnb_sequence(polarization: Polarization, high_band: bool) -> Vec<SecStep> {
    vec![
        SecStep::SetVoltage(polarization.voltage()),
        SecStep::Wait(SETTLE),
        SecStep::SetTone(high_band),
    ]
}

pub fn motor_goto_stored_position(position: u8) -> DiseqcCommand {
    DiseqcCommand::master(ADDR_POSITIONER, CMD_GOTO_POSITION, &[position])
}

pub fn motor_store_position(position: u8) -> DiseqcCommand {
    DiseqcCommand::master(ADDR_POSITIONER, CMD_STORE_POSITION, &[position])
}

/// Drive the positioner. `steps == 0` drives continuously until halted.
pub fn motor_drive(direction: MotorDirection, steps: u8) -> Result<DiseqcCommand> {
    if steps > 0x7F {
        return Err(Error::range("motor step count", steps, "0..=127"));
    }
    Ok(match direction {
        MotorDirection::East => DiseqcCommand::master(ADDR_POSITIONER, CMD_DRIVE_EAST, &[steps]),
        MotorDirection::West => DiseqcCommand::master(ADDR_POSITIONER, CMD_DRIVE_WEST, &[steps]),
        MotorDirection::Stop => DiseqcCommand::master(ADDR_POSITIONER, CMD_HALT, &[]),
    })
}

pub fn motor_set_limit(direction: MotorDirection) -> Result<DiseqcCommand> {
    match direction {
        MotorDirection::East => Ok(DiseqcCommand::master(ADDR_POSITIONER, CMD_LIMIT_EAST, &[])),
        MotorDirection::West => Ok(DiseqcCommand::master(ADDR_POSITIONER, CMD_LIMIT_WEST, &[])),
        MotorDirection::Stop => Err(Error::range("limit direction", 2, "east or west")),
    }
}

pub fn motor_clear_limits() -> DiseqcCommand {
    DiseqcCommand::master(ADDR_POSITIONER, CMD_LIMITS_OFF, &[])
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsalsAngle {
    /// Rotation of the positioner shaft, east positive.
    pub motor_angle_deg: f64,
    pub elevation_deg: f64,
}

/// USALS motor angle and dish elevation for a satellite seen from a site.
///
/// The motor angle is `atan2(tan Δλ, sin φ)` folded into [-90°, 90°], so a
/// satellite on the site's meridian gives 0° in both hemispheres.
pub fn compute_usals_angle(
    satellite_longitude_deg: f64,
    site_latitude_deg: f64,
    site_longitude_deg: f64,
) -> UsalsAngle {
    let mut delta_deg = satellite_longitude_deg - site_longitude_deg;
    if delta_deg > 180.0 {
        delta_deg -= 360.0;
    } else if delta_deg < -180.0 {
        delta_deg += 360.0;
    }
    let delta = delta_deg.to_radians();
    let lat = site_latitude_deg.to_radians();

    let mut motor = delta.tan().atan2(lat.sin()).to_degrees();
    if motor > 90.0 {
        motor -= 180.0;
    } else if motor < -90.0 {
        motor += 180.0;
    }

    let cos_gamma = lat.cos() * delta.cos();
    let elevation = (cos_gamma - EARTH_RADIUS_KM / GEO_ORBIT_RADIUS_KM)
        .atan2((1.0 - cos_gamma * cos_gamma).max(0.0).sqrt());

    UsalsAngle {
        motor_angle_deg: motor,
        elevation_deg: elevation.to_degrees(),
    }
}

/// Two data bytes of the goto-angle command.
///
/// Byte 0: direction nibble (0xE east, 0xD west) and the high nibble of the
/// integer degrees. Byte 1: low nibble of the integer degrees and the
/// fraction in sixteenths. The fraction is truncated, not rounded, so up to
/// 1/16° is lost; positioners expect exactly this encoding.
pub fn encode_goto_angle(motor_angle_deg: f64) -> [u8; 2] {
    let direction: u8 = if motor_angle_deg >= 0.0 { 0xE0 } else { 0xD0 };
    let angle = motor_angle_deg.abs();
    let degrees = angle.trunc() as u8;
    let sixteenths = ((angle - angle.trunc()) * 16.0) as u8;
    [
        direction | (degrees >> 4),
        ((degrees & 0x0F) << 4) | (sixteenths & 0x0F),
    ]
}

pub fn motor_goto_angle(motor_angle_deg: f64) -> DiseqcCommand {
    DiseqcCommand::master(
        ADDR_POSITIONER,
        CMD_GOTO_ANGULAR,
        &encode_goto_angle(motor_angle_deg),
    )
}

/// Resolve a satellite from the static table and build its USALS command.
pub fn goto_satellite(
    key: &str,
    site_latitude_deg: f64,
    site_longitude_deg: f64,
) -> Result<(DiseqcCommand, UsalsAngle)> {
    let sat = satellite::find(key)?;
    let angle = compute_usals_angle(sat.longitude_deg, site_latitude_deg, site_longitude_deg);
    Ok((motor_goto_angle(angle.motor_angle_deg), angle))
}

/// Satellite equipment control of one frontend. Nothing is ever read back.
pub trait SecBus {
    fn set_voltage(&mut self, voltage: Voltage) -> Result<()>;
    fn set_tone(&mut self, on: bool) -> Result<()>;
    fn send_master_command(&mut self, cmd: &DiseqcCommand) -> Result<()>;
    fn send_burst(&mut self, burst: ToneBurst) -> Result<()>;

    fn settle(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Executes DiSEqC sequences and remembers the last LNB state it set.
#[derive(Debug, Default)]
pub struct Positioner {
    last_voltage: Option<Voltage>,
    last_tone: Option<bool>,
    frames_sent: u64,
}

impl Positioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_voltage(&self) -> Option<Voltage> {
        self.last_voltage
    }

    pub fn last_tone(&self) -> Option<bool> {
        self.last_tone
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn run(&mut self, bus: &mut dyn SecBus, steps: &[SecStep]) -> Result<()> {
        for step in steps {
            match *step {
                SecStep::SetVoltage(v) => {
                    debug!("LNB voltage {v}");
                    bus.set_voltage(v)?;
                    self.last_voltage = Some(v);
                }
                SecStep::SetTone(on) => {
                    debug!("22kHz tone {}", if on { "on" } else { "off" });
                    bus.set_tone(on)?;
                    self.last_tone = Some(on);
                }
                SecStep::Send(cmd) => self.transmit(bus, &cmd)?,
                SecStep::Burst(burst) => {
                    debug!("tone burst SAT-{burst:?}");
                    bus.send_burst(burst)?;
                }
                SecStep::Wait(d) => bus.settle(d),
            }
        }
        Ok(())
    }

    pub fn transmit(&mut self, bus: &mut dyn SecBus, cmd: &DiseqcCommand) -> Result<()> {
        debug!("DiSEqC TX: [{cmd}]");
        bus.send_master_command(cmd)?;
        self.frames_sent += 1;
        bus.settle(MASTER_COMMAND_SETTLE);
        Ok(())
    }

    pub fn select_switch_port(
        &mut self,
        bus: &mut dyn SecBus,
        version: SwitchVersion,
        port: u8,
        polarization: Polarization,
        high_band: bool,
    ) -> Result<()> {
        let steps = switch_sequence(version, port, polarization, high_band)?;
        self.run(bus, &steps)
    }

    pub fn set_lnb(
        &mut self,
        bus: &mut dyn SecBus,
        polarization: Polarization,
        high_band: bool,
    ) -> Result<()> {
        self.run(bus, &lnb_sequence(polarization, high_band))
    }

    /// Start the positioner towards the computed angle. Returns immediately
    /// after the start delay; the dish may still be moving.
    pub fn goto_angle(&mut self, bus: &mut dyn SecBus, angle: &UsalsAngle) -> Result<()> {
        self.transmit(bus, &motor_goto_angle(angle.motor_angle_deg))?;
        bus.settle(MOTOR_START);
        Ok(())
    }

    pub fn goto_stored_position(&mut self, bus: &mut dyn SecBus, position: u8) -> Result<()> {
        self.transmit(bus, &motor_goto_stored_position(position))?;
        bus.settle(MOTOR_START);
        Ok(())
    }
}
