//! Simulated tuner used when no DVB-S frontend is available.
//!
//! Carries a fixed Türksat 42°E line-up keyed by frequency and a small
//! program guide that is served as real EIT sections, so the decoder and the
//! rest of the pipeline run exactly as they would on hardware.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, Timelike};
use log::{debug, trace};

use crate::channel::{Channel, ChannelKind};
use crate::diseqc::{DiseqcCommand, SecBus, ToneBurst};
use crate::driver::{LockStatus, SignalQuality, TunerDriver};
use crate::eit::{self, EIT_PRESENT_FOLLOWING_ACTUAL};
use crate::error::{Error, Result};
use crate::psi::NIT_ACTUAL_TABLE_ID;
use crate::transponder::{DeliverySystem, Polarization, Transponder, Voltage};

/// How the simulated demodulator decides whether a tuning attempt locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    /// Any known frequency locks whatever the other parameters. Unknown
    /// frequencies lock with two placeholder services when
    /// `invent_unknown` is set.
    Targeted { invent_unknown: bool },
    /// Only an exact frequency, polarization, symbol rate and delivery
    /// system match locks, so a sweep finds each carrier once.
    Blind,
}

struct SimService {
    name: &'static str,
    service_id: u16,
    video_pid: u16,
    audio_pid: u16,
    kind: ChannelKind,
    hd: bool,
    provider: &'static str,
}

struct SimTransponder {
    frequency_mhz: u32,
    polarization: Polarization,
    symbol_rate_ksps: u32,
    system: DeliverySystem,
    services: &'static [SimService],
}

const fn tv(
    name: &'static str,
    service_id: u16,
    audio_pid: u16,
    hd: bool,
    provider: &'static str,
) -> SimService {
    SimService {
        name,
        service_id,
        video_pid: audio_pid - 100,
        audio_pid,
        kind: ChannelKind::Tv,
        hd,
        provider,
    }
}

const fn radio(
    name: &'static str,
    service_id: u16,
    audio_pid: u16,
    provider: &'static str,
) -> SimService {
    SimService {
        name,
        service_id,
        video_pid: 0,
        audio_pid,
        kind: ChannelKind::Radio,
        hd: false,
        provider,
    }
}

const fn carrier(
    frequency_mhz: u32,
    polarization: Polarization,
    symbol_rate_ksps: u32,
    system: DeliverySystem,
    services: &'static [SimService],
) -> SimTransponder {
    SimTransponder {
        frequency_mhz,
        polarization,
        symbol_rate_ksps,
        system,
        services,
    }
}

use DeliverySystem::{DvbS, DvbS2};
use Polarization::{Horizontal as H, Vertical as V};

#[rustfmt::skip]
static LINEUP: &[SimTransponder] = &[
    carrier(10970, V, 30000, DvbS2, &[
        tv("TRT 1", 1001, 201, false, "TRT"),
        tv("TRT 2", 1002, 202, false, "TRT"),
        tv("TRT Haber", 1003, 203, false, "TRT"),
        tv("TRT Spor", 1004, 204, false, "TRT"),
    ]),
    carrier(11012, V, 30000, DvbS2, &[
        tv("TRT 1 HD", 2001, 301, true, "TRT"),
        tv("TRT World HD", 2002, 302, true, "TRT"),
        tv("TRT Belgesel HD", 2003, 303, true, "TRT"),
    ]),
    carrier(11054, V, 30000, DvbS2, &[
        tv("TRT 4K", 3001, 401, true, "TRT"),
        radio("TRT Radyo 1", 3002, 402, "TRT"),
        radio("TRT FM", 3003, 403, "TRT"),
        radio("TRT Nağme", 3004, 404, "TRT"),
    ]),
    carrier(11762, V, 30000, DvbS2, &[
        tv("ATV", 4001, 601, false, "Turkuvaz"),
        tv("A Haber", 4002, 602, false, "Turkuvaz"),
        tv("ATV Avrupa", 4003, 603, false, "Turkuvaz"),
        tv("A Spor", 4004, 604, false, "Turkuvaz"),
        tv("A Para", 4005, 605, false, "Turkuvaz"),
    ]),
    carrier(11804, V, 30000, DvbS2, &[
        tv("Show TV", 5001, 701, false, "Ciner"),
        tv("Habertürk TV", 5002, 702, false, "Ciner"),
        tv("Bloomberg HT", 5003, 703, false, "Ciner"),
        tv("Show Türk", 5004, 704, false, "Ciner"),
    ]),
    carrier(11838, H, 30000, DvbS2, &[
        tv("Star TV", 6001, 801, false, "Star"),
        tv("NTV", 6002, 802, false, "Doğuş"),
        tv("Star TV HD", 6003, 803, true, "Star"),
        tv("NTV Spor", 6004, 804, false, "Doğuş"),
    ]),
    carrier(11880, V, 30000, DvbS2, &[
        tv("Kanal D", 7001, 901, false, "Demirören"),
        tv("CNN Türk", 7002, 902, false, "Demirören"),
        tv("Kanal D HD", 7003, 903, true, "Demirören"),
        tv("Dream TV", 7004, 904, false, "Demirören"),
    ]),
    carrier(11919, V, 27500, DvbS, &[
        tv("Fox TV", 8001, 1001, false, "Fox"),
        tv("TV8", 8002, 1002, false, "TV8"),
        tv("Fox TV HD", 8003, 1003, true, "Fox"),
        tv("TV8.5", 8004, 1004, false, "TV8"),
    ]),
    carrier(11957, V, 27500, DvbS, &[
        tv("Beyaz TV", 9001, 1201, false, "Beyaz"),
        tv("TV360", 9002, 1202, false, "TV360"),
        tv("TGRT Haber", 9003, 1203, false, "İhlas"),
        tv("Halk TV", 9004, 1204, false, "Halk"),
        tv("Tele1", 9005, 1205, false, "Tele1"),
    ]),
];

const PLACEHOLDER_SERVICE_IDS: [u16; 2] = [9900, 9901];

// Content nibbles: movie/drama, news, sports.
const GENRE_DRAMA: u8 = 0x10;
const GENRE_NEWS: u8 = 0x20;
const GENRE_SPORTS: u8 = 0x40;

struct SimEvent {
    service_id: u16,
    event_id: u16,
    offset_min: i64,
    duration_min: u16,
    title: &'static str,
    description: &'static str,
    genre: u8,
}

const fn event(
    service_id: u16,
    event_id: u16,
    offset_min: i64,
    duration_min: u16,
    title: &'static str,
    description: &'static str,
    genre: u8,
) -> SimEvent {
    SimEvent {
        service_id,
        event_id,
        offset_min,
        duration_min,
        title,
        description,
        genre,
    }
}

#[rustfmt::skip]
static GUIDE: &[SimEvent] = &[
    event(1001, 1, -60, 120, "Ana Haber Bülteni", "Günün önemli haberleri", GENRE_NEWS),
    event(1001, 2, 60, 90, "Gönül Dağı", "Türk dizisi", GENRE_DRAMA),
    event(1001, 3, 150, 60, "Spor Bülteni", "Günün spor haberleri", GENRE_SPORTS),
    event(7001, 10, -30, 120, "Kara Sevda", "Türk dizisi", GENRE_DRAMA),
    event(7001, 11, 90, 90, "Ana Haber", "Gündem", GENRE_NEWS),
    event(4001, 20, 0, 120, "Kuruluş Osman", "Tarihî dizi", GENRE_DRAMA),
    event(4001, 21, 120, 60, "ATV Ana Haber", "Haberler", GENRE_NEWS),
];

/// SEC bus that only logs and remembers what it was told.
#[derive(Debug, Default)]
pub struct SimulatedBus {
    voltage: Option<Voltage>,
    tone: Option<bool>,
    frames: Vec<DiseqcCommand>,
    bursts: Vec<ToneBurst>,
}

impl SimulatedBus {
    pub fn voltage(&self) -> Option<Voltage> {
        self.voltage
    }

    pub fn tone(&self) -> Option<bool> {
        self.tone
    }

    pub fn frames(&self) -> &[DiseqcCommand] {
        &self.frames
    }

    pub fn bursts(&self) -> &[ToneBurst] {
        &self.bursts
    }
}

impl SecBus for SimulatedBus {
    fn set_voltage(&mut self, voltage: Voltage) -> Result<()> {
        self.voltage = Some(voltage);
        Ok(())
    }

    fn set_tone(&mut self, on: bool) -> Result<()> {
        self.tone = Some(on);
        Ok(())
    }

    fn send_master_command(&mut self, cmd: &DiseqcCommand) -> Result<()> {
        self.frames.push(*cmd);
        Ok(())
    }

    fn send_burst(&mut self, burst: ToneBurst) -> Result<()> {
        self.bursts.push(burst);
        Ok(())
    }

    // No cable to settle.
    fn settle(&mut self, duration: Duration) {
        trace!("simulated settle {duration:?}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Locked {
    Known(usize),
    Placeholder,
}

pub struct SimulatedTuner {
    mode: SimMode,
    guide_base: NaiveDateTime,
    bus: SimulatedBus,
    locked: Option<Locked>,
    pending_sections: VecDeque<Vec<u8>>,
}

impl SimulatedTuner {
    /// Guide times are relative to the current local hour.
    pub fn new(mode: SimMode) -> Self {
        let now = Local::now().naive_local();
        let guide_base = now
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        Self::with_guide_base(mode, guide_base)
    }

    pub fn with_guide_base(mode: SimMode, guide_base: NaiveDateTime) -> Self {
        SimulatedTuner {
            mode,
            guide_base,
            bus: SimulatedBus::default(),
            locked: None,
            pending_sections: VecDeque::new(),
        }
    }

    pub fn bus(&self) -> &SimulatedBus {
        &self.bus
    }

    fn find_carrier(&self, tp: &Transponder) -> Option<Locked> {
        match self.mode {
            SimMode::Targeted { invent_unknown } => {
                let known = LINEUP.iter().position(|c| c.frequency_mhz == tp.frequency_mhz());
                match known {
                    Some(idx) => Some(Locked::Known(idx)),
                    None if invent_unknown => Some(Locked::Placeholder),
                    None => None,
                }
            }
            SimMode::Blind => LINEUP
                .iter()
                .position(|c| {
                    c.frequency_mhz == tp.frequency_mhz()
                        && c.polarization == tp.polarization()
                        && c.symbol_rate_ksps == tp.symbol_rate_ksps()
                        && c.system == tp.system()
                })
                .map(Locked::Known),
        }
    }

    fn quality_for(frequency_mhz: u32) -> SignalQuality {
        SignalQuality {
            snr_db: 9.0 + (frequency_mhz % 60) as f32 / 10.0,
            strength_pct: 60 + (frequency_mhz % 35) as u8,
        }
    }

    fn eit_sections(&self, carrier: &SimTransponder) -> VecDeque<Vec<u8>> {
        carrier
            .services
            .iter()
            .filter_map(|svc| {
                let events: Vec<&SimEvent> =
                    GUIDE.iter().filter(|e| e.service_id == svc.service_id).collect();
                if events.is_empty() {
                    None
                } else {
                    Some(build_eit_section(svc.service_id, &events, self.guide_base))
                }
            })
            .collect()
    }
}

impl TunerDriver for SimulatedTuner {
    fn name(&self) -> String {
        "simulated".to_string()
    }

    fn attempt_lock(
        &mut self,
        transponder: &Transponder,
        _timeout: Duration,
    ) -> Result<LockStatus> {
        self.locked = self.find_carrier(transponder);
        self.pending_sections = match self.locked {
            Some(Locked::Known(idx)) => self.eit_sections(&LINEUP[idx]),
            _ => VecDeque::new(),
        };
        match self.locked {
            Some(_) => {
                debug!("simulated lock on {transponder}");
                Ok(LockStatus::locked(Self::quality_for(transponder.frequency_mhz())))
            }
            None => Ok(LockStatus::no_lock()),
        }
    }

    fn read_section_bytes(&mut self) -> Result<Vec<u8>> {
        Ok(self.pending_sections.pop_front().unwrap_or_default())
    }

    /// Every known carrier announces the whole line-up; placeholder
    /// carriers carry no NIT.
    fn read_network_table(&mut self) -> Result<Vec<Vec<u8>>> {
        match self.locked {
            Some(Locked::Known(_)) => Ok(vec![build_nit_section()]),
            Some(Locked::Placeholder) => Ok(Vec::new()),
            None => Err(Error::Driver("NIT read without a lock".to_string())),
        }
    }

    fn discover_channels(&mut self, transponder: &Transponder) -> Result<Vec<Channel>> {
        let freq = transponder.frequency_mhz();
        let pol = transponder.polarization();
        let channels = match self.locked {
            Some(Locked::Known(idx)) => LINEUP[idx]
                .services
                .iter()
                .map(|svc| Channel {
                    name: svc.name.to_string(),
                    service_id: svc.service_id,
                    frequency_mhz: freq,
                    polarization: pol,
                    video_pid: svc.video_pid,
                    audio_pid: svc.audio_pid,
                    pcr_pid: svc.video_pid,
                    pmt_pid: svc.service_id,
                    kind: svc.kind,
                    free_to_air: true,
                    hd: svc.hd,
                    provider: svc.provider.to_string(),
                })
                .collect(),
            Some(Locked::Placeholder) => PLACEHOLDER_SERVICE_IDS
                .iter()
                .enumerate()
                .map(|(i, &sid)| Channel {
                    name: format!("Service_{freq}_{pol}_{}", i + 1),
                    service_id: sid,
                    frequency_mhz: freq,
                    polarization: pol,
                    video_pid: 0,
                    audio_pid: 0,
                    pcr_pid: 0,
                    pmt_pid: 0,
                    kind: ChannelKind::Tv,
                    free_to_air: true,
                    hd: false,
                    provider: String::new(),
                })
                .collect(),
            None => Vec::new(),
        };
        Ok(channels)
    }

    fn sec_bus(&mut self) -> &mut dyn SecBus {
        &mut self.bus
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

/// Encode guide entries as one EIT present/following section with
/// ISO-8859-9 text, a zero CRC and Turkish language tags.
fn build_eit_section(service_id: u16, events: &[&SimEvent], base: NaiveDateTime) -> Vec<u8> {
    let mut body = Vec::new();
    for ev in events {
        let start = base + ChronoDuration::minutes(ev.offset_min);
        let Some(mjd) = eit::date_to_mjd(start.date()) else {
            continue;
        };

        let title = latin5(ev.title);
        let text = latin5(ev.description);
        let mut descriptors = vec![0x4D, (3 + 1 + title.len() + 1 + text.len()) as u8];
        descriptors.extend_from_slice(b"tur");
        descriptors.push(title.len() as u8);
        descriptors.extend_from_slice(&title);
        descriptors.push(text.len() as u8);
        descriptors.extend_from_slice(&text);
        descriptors.extend_from_slice(&[0x54, 2, ev.genre, 0x00]);

        body.extend_from_slice(&ev.event_id.to_be_bytes());
        body.extend_from_slice(&mjd.to_be_bytes());
        body.push(eit::u8_to_bcd(start.hour() as u8));
        body.push(eit::u8_to_bcd(start.minute() as u8));
        body.push(eit::u8_to_bcd(start.second() as u8));
        body.push(eit::u8_to_bcd((ev.duration_min / 60) as u8));
        body.push(eit::u8_to_bcd((ev.duration_min % 60) as u8));
        body.push(0x00);
        let loop_len = descriptors.len() as u16;
        body.push(0x80 | ((loop_len >> 8) as u8 & 0x0F));
        body.push(loop_len as u8);
        body.extend_from_slice(&descriptors);
    }

    let section_length = 11 + body.len() + 4;
    let mut section = vec![
        EIT_PRESENT_FOLLOWING_ACTUAL,
        0xF0 | ((section_length >> 8) as u8 & 0x0F),
        section_length as u8,
    ];
    section.extend_from_slice(&service_id.to_be_bytes());
    // version 0, current; section 0 of 0; ts id 1; network id 0x0046 (Türksat)
    section.extend_from_slice(&[0xC1, 0x00, 0x00, 0x00, 0x01, 0x00, 0x46, 0x00]);
    section.push(EIT_PRESENT_FOLLOWING_ACTUAL);
    section.extend_from_slice(&body);
    section.extend_from_slice(&[0, 0, 0, 0]);
    section
}

/// Encode the line-up as one NIT actual section for network 0x0046 at
/// 42.0°E: DVB-S2 carriers as 8PSK 3/4, DVB-S carriers as QPSK 5/6.
fn build_nit_section() -> Vec<u8> {
    let name = latin5("Türksat");
    let mut ts_loop = Vec::new();
    for (i, c) in LINEUP.iter().enumerate() {
        let pol_bits = match c.polarization {
            H => 0,
            V => 1,
            Polarization::CircularLeft => 2,
            Polarization::CircularRight => 3,
        };
        let (system_bits, fec) = match c.system {
            DvbS => (0x01, 4),
            _ => (0x04 | 0x02, 3),
        };
        let mut sr = bcd8(c.symbol_rate_ksps * 100);
        sr[3] |= fec;

        ts_loop.extend_from_slice(&(i as u16 + 1).to_be_bytes());
        ts_loop.extend_from_slice(&[0x00, 0x46, 0xF0, 13, 0x43, 11]);
        ts_loop.extend_from_slice(&bcd8(c.frequency_mhz * 100));
        ts_loop.extend_from_slice(&[0x04, 0x20, 0x80 | (pol_bits << 5) | system_bits]);
        ts_loop.extend_from_slice(&sr);
    }

    let mut body = vec![0xF0, (2 + name.len()) as u8, 0x40, name.len() as u8];
    body.extend_from_slice(&name);
    body.push(0xF0 | ((ts_loop.len() >> 8) as u8 & 0x0F));
    body.push(ts_loop.len() as u8);
    body.extend_from_slice(&ts_loop);

    let section_length = 5 + body.len() + 4;
    let mut section = vec![
        NIT_ACTUAL_TABLE_ID,
        0xF0 | ((section_length >> 8) as u8 & 0x0F),
        section_length as u8,
    ];
    // network id 0x0046, version 0, current, section 0 of 0
    section.extend_from_slice(&[0x00, 0x46, 0xC1, 0x00, 0x00]);
    section.extend_from_slice(&body);
    section.extend_from_slice(&[0, 0, 0, 0]);
    section
}

/// Eight BCD digits. The symbol rate fills seven and leaves the last
/// nibble for the FEC code.
fn bcd8(value: u32) -> [u8; 4] {
    let mut out = [0u8; 4];
    let mut rest = value;
    for byte in out.iter_mut().rev() {
        *byte = eit::u8_to_bcd((rest % 100) as u8);
        rest /= 100;
    }
    out
}

fn latin5(text: &str) -> Vec<u8> {
    let (bytes, _, _) = encoding_rs::WINDOWS_1254.encode(text);
    bytes.into_owned()
}
