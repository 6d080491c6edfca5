//! DVB-S/S2 frontend on the Linux DVB v5 API.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::channel::Channel;
use crate::diseqc::{DiseqcCommand, SecBus, ToneBurst};
use crate::dmx::{self, SectionStream};
use crate::driver::{LockStatus, SignalQuality, TunerDriver};
use crate::eit::{self, EIT_PID};
use crate::error::{Error, Result};
use crate::psi::{self, PmtInfo};
use crate::transponder::{DeliverySystem, LnbProfile, Modulation, Transponder, Voltage};

// DVB v5 API property command IDs
const DTV_TUNE: u32 = 1;
const DTV_CLEAR: u32 = 2;
const DTV_FREQUENCY: u32 = 3;
const DTV_MODULATION: u32 = 4;
const DTV_INVERSION: u32 = 6;
const DTV_SYMBOL_RATE: u32 = 8;
const DTV_INNER_FEC: u32 = 9;
const DTV_PILOT: u32 = 12;
const DTV_ROLLOFF: u32 = 13;
const DTV_DELIVERY_SYSTEM: u32 = 17;

// Delivery systems
const SYS_DVBS: u32 = 5;
const SYS_DVBS2: u32 = 6;

// enum fe_modulation
const QPSK: u32 = 0;
const PSK_8: u32 = 9;
const APSK_16: u32 = 10;
const APSK_32: u32 = 11;

const INVERSION_AUTO: u32 = 2;
const FEC_AUTO: u32 = 9;
const PILOT_AUTO: u32 = 2;
const ROLLOFF_AUTO: u32 = 3;

// Frontend status flags
const FE_HAS_LOCK: u32 = 0x10;

// SEC
const SEC_VOLTAGE_13: i32 = 0;
const SEC_VOLTAGE_18: i32 = 1;
const SEC_VOLTAGE_OFF: i32 = 2;
const SEC_TONE_ON: i32 = 0;
const SEC_TONE_OFF: i32 = 1;
const SEC_MINI_A: i32 = 0;
const SEC_MINI_B: i32 = 1;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
const PSI_TIMEOUT: Duration = Duration::from_secs(5);
const EIT_READ_TIMEOUT: Duration = Duration::from_secs(3);

// Kernel struct: dtv_property (76 bytes, packed)
//   cmd: u32, reserved: [u32; 3], u: union(56 bytes), result: i32
#[repr(C, packed)]
struct DtvProperty {
    cmd: u32,
    reserved: [u32; 3],
    data: u32,
    _padding: [u8; 52], // remaining union space (56 - 4)
    result: i32,
}

// Kernel struct: dtv_properties (16 bytes on 64-bit)
//   num: u32, (4 bytes padding), props: *mut DtvProperty
#[repr(C)]
struct DtvProperties {
    num: u32,
    props: *mut DtvProperty,
}

// Kernel struct: dvb_diseqc_master_cmd
#[repr(C)]
struct DiseqcMasterCmd {
    msg: [u8; 6],
    msg_len: u8,
}

nix::ioctl_write_ptr!(fe_set_property, b'o', 82, DtvProperties);
nix::ioctl_read!(fe_read_status, b'o', 69, u32);
nix::ioctl_read!(fe_read_signal_strength, b'o', 71, u16);
nix::ioctl_read!(fe_read_snr, b'o', 72, u16);
nix::ioctl_write_ptr!(fe_diseqc_send_master_cmd, b'o', 63, DiseqcMasterCmd);
nix::ioctl_write_int_bad!(fe_diseqc_send_burst, nix::request_code_none!(b'o', 65));
nix::ioctl_write_int_bad!(fe_set_tone, nix::request_code_none!(b'o', 66));
nix::ioctl_write_int_bad!(fe_set_voltage, nix::request_code_none!(b'o', 67));

impl DtvProperty {
    fn new(cmd: u32, data: u32) -> Self {
        DtvProperty {
            cmd,
            reserved: [0; 3],
            data,
            _padding: [0; 52],
            result: 0,
        }
    }
}

fn delivery_system_code(system: DeliverySystem) -> u32 {
    match system {
        DeliverySystem::DvbS => SYS_DVBS,
        // S2X carriers are tuned as DVB-S2 by the kernel API
        DeliverySystem::DvbS2 | DeliverySystem::DvbS2X => SYS_DVBS2,
    }
}

fn modulation_code(modulation: Modulation) -> u32 {
    match modulation {
        Modulation::Qpsk => QPSK,
        Modulation::Psk8 => PSK_8,
        Modulation::Apsk16 => APSK_16,
        Modulation::Apsk32 => APSK_32,
    }
}

fn fec_code(fec: &str) -> Result<u32> {
    match fec.trim().to_ascii_uppercase().as_str() {
        "NONE" => Ok(0),
        "1/2" => Ok(1),
        "2/3" => Ok(2),
        "3/4" => Ok(3),
        "4/5" => Ok(4),
        "5/6" => Ok(5),
        "6/7" => Ok(6),
        "7/8" => Ok(7),
        "8/9" => Ok(8),
        "AUTO" | "" => Ok(FEC_AUTO),
        "3/5" => Ok(10),
        "9/10" => Ok(11),
        "2/5" => Ok(12),
        _ => Err(Error::Driver(format!("unsupported FEC '{fec}'"))),
    }
}

/// Property list for one tune request, ending in DTV_TUNE.
fn tune_properties(tp: &Transponder, lnb: &LnbProfile) -> Result<Vec<(u32, u32)>> {
    let if_mhz = tp.if_frequency_mhz(lnb);
    let if_khz = if_mhz
        .checked_mul(1000)
        .ok_or_else(|| Error::range("IF frequency (MHz)", if_mhz, "0..=4294967"))?;
    let symbol_rate = tp
        .symbol_rate_ksps()
        .checked_mul(1000)
        .ok_or_else(|| Error::range("symbol rate (ksps)", tp.symbol_rate_ksps(), "0..=4294967"))?;
    let mut props = vec![
        (DTV_DELIVERY_SYSTEM, delivery_system_code(tp.system())),
        (DTV_FREQUENCY, if_khz),
        (DTV_SYMBOL_RATE, symbol_rate),
        (DTV_INNER_FEC, fec_code(tp.fec())?),
        (DTV_MODULATION, modulation_code(tp.modulation())),
        (DTV_INVERSION, INVERSION_AUTO),
    ];
    if tp.system() != DeliverySystem::DvbS {
        props.push((DTV_PILOT, PILOT_AUTO));
        props.push((DTV_ROLLOFF, ROLLOFF_AUTO));
    }
    props.push((DTV_TUNE, 0));
    Ok(props)
}

/// Drivers disagree on the SNR unit. Small values are read as 0.1 dB
/// steps, anything larger as a fraction of full scale over 0..=20 dB.
fn snr_to_db(raw: u16) -> f32 {
    if raw <= 400 {
        raw as f32 / 10.0
    } else {
        raw as f32 / u16::MAX as f32 * 20.0
    }
}

fn strength_to_pct(raw: u16) -> u8 {
    (raw as u32 * 100 / u16::MAX as u32) as u8
}

pub struct LinuxFrontend {
    adapter: u32,
    frontend: u32,
    fe_file: File,
    lnb: LnbProfile,
    eit: Option<SectionStream>,
}

impl LinuxFrontend {
    /// A missing device node is `HardwareUnavailable`, anything else an
    /// I/O error.
    pub fn open(adapter: u32, frontend: u32, lnb: LnbProfile) -> Result<Self> {
        let path = format!("/dev/dvb/adapter{adapter}/frontend{frontend}");
        let fe_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    Error::HardwareUnavailable(format!("{path} does not exist"))
                }
                io::ErrorKind::PermissionDenied => {
                    Error::HardwareUnavailable(format!("no permission to open {path}"))
                }
                _ => Error::io(format!("failed to open {path}"), e),
            })?;
        Ok(LinuxFrontend {
            adapter,
            frontend,
            fe_file,
            lnb,
            eit: None,
        })
    }

    pub fn has_lock(&self) -> bool {
        self.read_status().is_ok_and(|status| status & FE_HAS_LOCK != 0)
    }

    fn read_status(&self) -> Result<u32> {
        let mut status: u32 = 0;
        unsafe {
            fe_read_status(self.fe_file.as_raw_fd(), &mut status)
                .map_err(|e| Error::Driver(format!("FE_READ_STATUS failed: {e}")))?;
        }
        Ok(status)
    }

    /// Quality readings are best effort; a driver without them reports 0.
    pub fn signal_quality(&self) -> SignalQuality {
        let fd = self.fe_file.as_raw_fd();
        let mut snr: u16 = 0;
        let mut strength: u16 = 0;
        unsafe {
            if fe_read_snr(fd, &mut snr).is_err() {
                snr = 0;
            }
            if fe_read_signal_strength(fd, &mut strength).is_err() {
                strength = 0;
            }
        }
        SignalQuality {
            snr_db: snr_to_db(snr),
            strength_pct: strength_to_pct(strength),
        }
    }

    fn set_properties(&self, props: &[(u32, u32)], what: &str) -> Result<()> {
        let mut props: Vec<DtvProperty> =
            props.iter().map(|&(cmd, data)| DtvProperty::new(cmd, data)).collect();
        let mut dtv_props = DtvProperties {
            num: props.len() as u32,
            props: props.as_mut_ptr(),
        };
        unsafe {
            fe_set_property(self.fe_file.as_raw_fd(), &mut dtv_props)
                .map_err(|e| Error::Driver(format!("{what} failed: {e}")))?;
        }
        Ok(())
    }

    fn read_eit_section(&mut self) -> Result<Option<Vec<u8>>> {
        if self.eit.is_none() {
            self.eit = Some(SectionStream::open(
                self.adapter,
                EIT_PID,
                eit::is_eit_actual,
                EIT_READ_TIMEOUT,
            )?);
        }
        match self.eit.as_mut() {
            Some(stream) => stream.next_section(),
            None => Ok(None),
        }
    }
}

impl SecBus for LinuxFrontend {
    fn set_voltage(&mut self, voltage: Voltage) -> Result<()> {
        let arg = match voltage {
            Voltage::V13 => SEC_VOLTAGE_13,
            Voltage::V18 => SEC_VOLTAGE_18,
            Voltage::Off => SEC_VOLTAGE_OFF,
        };
        unsafe {
            fe_set_voltage(self.fe_file.as_raw_fd(), arg)
                .map_err(|e| Error::Driver(format!("FE_SET_VOLTAGE failed: {e}")))?;
        }
        Ok(())
    }

    fn set_tone(&mut self, on: bool) -> Result<()> {
        let arg = if on { SEC_TONE_ON } else { SEC_TONE_OFF };
        unsafe {
            fe_set_tone(self.fe_file.as_raw_fd(), arg)
                .map_err(|e| Error::Driver(format!("FE_SET_TONE failed: {e}")))?;
        }
        Ok(())
    }

    fn send_master_command(&mut self, cmd: &DiseqcCommand) -> Result<()> {
        let (msg, msg_len) = cmd.to_bytes();
        let master = DiseqcMasterCmd { msg, msg_len };
        unsafe {
            fe_diseqc_send_master_cmd(self.fe_file.as_raw_fd(), &master).map_err(|e| {
                Error::Driver(format!("FE_DISEQC_SEND_MASTER_CMD [{cmd}] failed: {e}"))
            })?;
        }
        Ok(())
    }

    fn send_burst(&mut self, burst: ToneBurst) -> Result<()> {
        let arg = match burst {
            ToneBurst::A => SEC_MINI_A,
            ToneBurst::B => SEC_MINI_B,
        };
        unsafe {
            fe_diseqc_send_burst(self.fe_file.as_raw_fd(), arg)
                .map_err(|e| Error::Driver(format!("FE_DISEQC_SEND_BURST failed: {e}")))?;
        }
        Ok(())
    }
}

impl TunerDriver for LinuxFrontend {
    fn name(&self) -> String {
        format!("adapter{}/frontend{}", self.adapter, self.frontend)
    }

    fn attempt_lock(&mut self, transponder: &Transponder, timeout: Duration) -> Result<LockStatus> {
        self.eit = None;

        self.set_properties(&[(DTV_CLEAR, 0)], "DTV_CLEAR")?;
        let props = tune_properties(transponder, &self.lnb)?;
        debug!(
            "tuning {transponder}: IF {} MHz",
            transponder.if_frequency_mhz(&self.lnb)
        );
        self.set_properties(&props, "FE_SET_PROPERTY")?;

        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.read_status()? & FE_HAS_LOCK != 0 {
                info!("{} locked after {}ms", self.name(), start.elapsed().as_millis());
                return Ok(LockStatus::locked(self.signal_quality()));
            }
            thread::sleep(LOCK_POLL_INTERVAL);
        }
        Ok(LockStatus::no_lock())
    }

    fn read_section_bytes(&mut self) -> Result<Vec<u8>> {
        Ok(self.read_eit_section()?.unwrap_or_default())
    }

    fn discover_channels(&mut self, transponder: &Transponder) -> Result<Vec<Channel>> {
        let adapter = self.adapter;
        let pat_sections = dmx::read_table(adapter, psi::PAT_PID, psi::PAT_TABLE_ID, PSI_TIMEOUT)?;
        let pat = psi::parse_pat_sections(&pat_sections);

        // A transponder without an SDT still yields channels named by service id.
        let sdt_sections =
            dmx::read_table(adapter, psi::SDT_PID, psi::SDT_ACTUAL_TABLE_ID, PSI_TIMEOUT);
        let sdt = match sdt_sections {
            Ok(sections) => psi::parse_sdt_sections(&sections),
            Err(e) => {
                debug!("no SDT on {transponder}: {e}");
                Vec::new()
            }
        };

        Ok(psi::assemble_channels(transponder, &pat, &sdt, |entry| -> Option<PmtInfo> {
            let sections =
                dmx::read_table(adapter, entry.pmt_pid, psi::PMT_TABLE_ID, PSI_TIMEOUT).ok()?;
            sections.first().and_then(|s| psi::parse_pmt(s))
        }))
    }

    fn read_network_table(&mut self) -> Result<Vec<Vec<u8>>> {
        dmx::read_table(self.adapter, psi::NIT_PID, psi::NIT_ACTUAL_TABLE_ID, PSI_TIMEOUT)
    }

    fn sec_bus(&mut self) -> &mut dyn SecBus {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transponder::Polarization;

    fn tp(freq: u32, system: DeliverySystem, modulation: Modulation, fec: &str) -> Transponder {
        Transponder::new(freq, Polarization::Vertical, 30000, fec, system, modulation).unwrap()
    }

    #[test]
    fn test_fec_codes() {
        assert_eq!(fec_code("NONE").unwrap(), 0);
        assert_eq!(fec_code("1/2").unwrap(), 1);
        assert_eq!(fec_code("3/4").unwrap(), 3);
        assert_eq!(fec_code("8/9").unwrap(), 8);
        assert_eq!(fec_code("auto").unwrap(), FEC_AUTO);
        assert_eq!(fec_code("").unwrap(), FEC_AUTO);
        assert_eq!(fec_code("3/5").unwrap(), 10);
        assert_eq!(fec_code("9/10").unwrap(), 11);
        assert_eq!(fec_code("2/5").unwrap(), 12);
        assert!(fec_code("1/3").is_err());
    }

    #[test]
    fn test_modulation_and_system_codes() {
        assert_eq!(modulation_code(Modulation::Qpsk), 0);
        assert_eq!(modulation_code(Modulation::Psk8), 9);
        assert_eq!(modulation_code(Modulation::Apsk16), 10);
        assert_eq!(modulation_code(Modulation::Apsk32), 11);
        assert_eq!(delivery_system_code(DeliverySystem::DvbS), 5);
        assert_eq!(delivery_system_code(DeliverySystem::DvbS2), 6);
        assert_eq!(delivery_system_code(DeliverySystem::DvbS2X), 6);
    }

    #[test]
    fn test_tune_properties_low_band_dvbs2() {
        let props = tune_properties(
            &tp(10970, DeliverySystem::DvbS2, Modulation::Psk8, "3/4"),
            &LnbProfile::UNIVERSAL,
        )
        .unwrap();
        assert_eq!(
            props,
            vec![
                (DTV_DELIVERY_SYSTEM, SYS_DVBS2),
                (DTV_FREQUENCY, 1_220_000),
                (DTV_SYMBOL_RATE, 30_000_000),
                (DTV_INNER_FEC, 3),
                (DTV_MODULATION, PSK_8),
                (DTV_INVERSION, INVERSION_AUTO),
                (DTV_PILOT, PILOT_AUTO),
                (DTV_ROLLOFF, ROLLOFF_AUTO),
                (DTV_TUNE, 0),
            ]
        );
    }

    #[test]
    fn test_tune_properties_high_band_dvbs() {
        let props = tune_properties(
            &tp(12180, DeliverySystem::DvbS, Modulation::Qpsk, "AUTO"),
            &LnbProfile::UNIVERSAL,
        )
        .unwrap();
        assert!(props.contains(&(DTV_FREQUENCY, 1_580_000)));
        assert!(!props.iter().any(|&(cmd, _)| cmd == DTV_PILOT));
        assert_eq!(props.last(), Some(&(DTV_TUNE, 0)));
    }

    #[test]
    fn test_tune_properties_bad_fec() {
        let bad = tp(10970, DeliverySystem::DvbS, Modulation::Qpsk, "7/9");
        assert!(tune_properties(&bad, &LnbProfile::UNIVERSAL).is_err());
    }

    #[test]
    fn test_tune_properties_huge_symbol_rate_is_range_error() {
        let huge = Transponder::new(
            11000,
            Polarization::Vertical,
            5_000_000,
            "AUTO",
            DeliverySystem::DvbS2,
            Modulation::Psk8,
        )
        .unwrap();
        let err = tune_properties(&huge, &LnbProfile::UNIVERSAL).unwrap_err();
        assert!(matches!(err, Error::Range { .. }));
    }

    #[test]
    fn test_snr_units() {
        assert_eq!(snr_to_db(125), 12.5);
        assert!((snr_to_db(u16::MAX) - 20.0).abs() < 0.01);
        assert!((snr_to_db(32768) - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_strength_pct() {
        assert_eq!(strength_to_pct(0), 0);
        assert_eq!(strength_to_pct(u16::MAX), 100);
        assert_eq!(strength_to_pct(32768), 50);
    }

    #[test]
    fn test_struct_layouts() {
        assert_eq!(std::mem::size_of::<DtvProperty>(), 76);
        assert_eq!(std::mem::size_of::<DiseqcMasterCmd>(), 7);
    }

    #[test]
    fn test_open_missing_frontend_is_unavailable() {
        let err = LinuxFrontend::open(250, 0, LnbProfile::UNIVERSAL).err().unwrap();
        assert!(matches!(err, Error::HardwareUnavailable(_)));
    }
}
