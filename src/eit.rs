use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::dvb_text::decode_text;

// EIT PID
pub const EIT_PID: u16 = 0x12;

// EIT table IDs
pub const EIT_PRESENT_FOLLOWING_ACTUAL: u8 = 0x4E;
pub const EIT_SCHEDULE_ACTUAL_MIN: u8 = 0x50;
pub const EIT_SCHEDULE_ACTUAL_MAX: u8 = 0x5F;

// Descriptor tags
const SHORT_EVENT_DESCRIPTOR: u8 = 0x4D;
const CONTENT_DESCRIPTOR: u8 = 0x54;
const PARENTAL_RATING_DESCRIPTOR: u8 = 0x55;

const SECTION_HEADER_LEN: usize = 14;
const EVENT_HEADER_LEN: usize = 12;
const CRC_LEN: usize = 4;

const MJD_UNDEFINED: u16 = 0xFFFF;
/// `num_days_from_ce` of 1858-11-17, MJD day zero.
const MJD_EPOCH_DAYS_FROM_CE: i64 = 678_576;

/// One program guide entry, unique by `(channel_id, event_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastEvent {
    pub channel_id: u16,
    pub event_id: u16,
    pub start: NaiveDateTime,
    pub duration_min: u32,
    pub title: String,
    pub description: String,
    pub genre: String,
    /// Minimum age, 0 when unrated.
    pub parental_rating: u8,
    pub language: String,
}

impl BroadcastEvent {
    pub fn key(&self) -> (u16, u16) {
        (self.channel_id, self.event_id)
    }

    pub fn end(&self) -> NaiveDateTime {
        self.start + chrono::Duration::minutes(self.duration_min as i64)
    }
}

pub fn is_eit_actual(table_id: u8) -> bool {
    table_id == EIT_PRESENT_FOLLOWING_ACTUAL
        || (EIT_SCHEDULE_ACTUAL_MIN..=EIT_SCHEDULE_ACTUAL_MAX).contains(&table_id)
}

pub(crate) fn bcd_to_u8(bcd: u8) -> u8 {
    ((bcd >> 4) * 10) + (bcd & 0x0F)
}

pub(crate) fn u8_to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Modified Julian Date to calendar date (EN 300 468 annex C).
pub fn mjd_to_date(mjd: u16) -> Option<NaiveDate> {
    let mjd = mjd as f64;
    let y_prime = ((mjd - 15078.2) / 365.25).floor();
    let m_prime = ((mjd - 14956.1 - (y_prime * 365.25).floor()) / 30.6001).floor();
    let day = mjd - 14956.0 - (y_prime * 365.25).floor() - (m_prime * 30.6001).floor();
    let k = if m_prime == 14.0 || m_prime == 15.0 { 1.0 } else { 0.0 };
    let year = y_prime + k + 1900.0;
    let month = m_prime - 1.0 - k * 12.0;

    if !(1.0..=12.0).contains(&month) || !(1.0..=31.0).contains(&day) {
        return None;
    }
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
}

pub fn date_to_mjd(date: NaiveDate) -> Option<u16> {
    let mjd = date.num_days_from_ce() as i64 - MJD_EPOCH_DAYS_FROM_CE;
    u16::try_from(mjd).ok().filter(|&m| m != MJD_UNDEFINED)
}

/// MJD plus BCD hh:mm:ss. `None` for the undefined marker or an impossible
/// date or time.
fn decode_start_time(data: &[u8]) -> Option<NaiveDateTime> {
    let mjd = u16::from_be_bytes([data[0], data[1]]);
    if mjd == MJD_UNDEFINED {
        return None;
    }
    let date = mjd_to_date(mjd)?;
    let time = NaiveTime::from_hms_opt(
        bcd_to_u8(data[2]) as u32,
        bcd_to_u8(data[3]) as u32,
        bcd_to_u8(data[4]) as u32,
    )?;
    Some(date.and_time(time))
}

/// BCD hours and minutes; seconds are dropped.
fn decode_duration_min(data: &[u8]) -> u32 {
    let minutes = bcd_to_u8(data[0]) as u32 * 60 + bcd_to_u8(data[1]) as u32;
    minutes.max(1)
}

/// ETSI EN 300 468 content_nibble labels, level 1 and level 2.
pub fn genre_label(code: u8) -> String {
    let label = match code {
        0x10 => "Movie/Drama",
        0x11 => "Detective/Thriller",
        0x12 => "Adventure/Western/War",
        0x13 => "Science fiction/Fantasy/Horror",
        0x14 => "Comedy",
        0x15 => "Soap/Melodrama/Folklore",
        0x16 => "Romance",
        0x17 => "Serious/Classical/Religious/Historical drama",
        0x18 => "Adult movie/Drama",
        0x20 => "News/Current affairs",
        0x21 => "News/Weather report",
        0x22 => "News magazine",
        0x23 => "Documentary",
        0x24 => "Discussion/Interview/Debate",
        0x30 => "Show/Game show",
        0x31 => "Game show/Quiz/Contest",
        0x32 => "Variety show",
        0x33 => "Talk show",
        0x40 => "Sports",
        0x41 => "Special events",
        0x42 => "Sports magazine",
        0x43 => "Football/Soccer",
        0x44 => "Tennis/Squash",
        0x45 => "Team sports",
        0x46 => "Athletics",
        0x47 => "Motor sport",
        0x48 => "Water sport",
        0x49 => "Winter sports",
        0x4A => "Equestrian",
        0x4B => "Martial sports",
        0x50 => "Children's/Youth",
        0x51 => "Pre-school children's",
        0x52 => "Entertainment for 6 to 14",
        0x53 => "Entertainment for 10 to 16",
        0x54 => "Informational/Educational/School",
        0x55 => "Cartoons/Puppets",
        0x60 => "Music/Ballet/Dance",
        0x61 => "Rock/Pop",
        0x62 => "Serious music/Classical music",
        0x63 => "Folk/Traditional music",
        0x64 => "Jazz",
        0x65 => "Musical/Opera",
        0x66 => "Ballet",
        0x70 => "Arts/Culture",
        0x71 => "Performing arts",
        0x72 => "Fine arts",
        0x73 => "Religion",
        0x74 => "Popular culture/Traditional arts",
        0x75 => "Literature",
        0x76 => "Film/Cinema",
        0x77 => "Experimental film/Video",
        0x78 => "Broadcasting/Press",
        0x79 => "New media",
        0x7A => "Arts/Culture magazine",
        0x7B => "Fashion",
        0x80 => "Social/Political issues/Economics",
        0x81 => "Magazines/Reports/Documentary",
        0x82 => "Economics/Social advisory",
        0x83 => "Remarkable people",
        0x90 => "Education/Science/Factual topics",
        0x91 => "Nature/Animals/Environment",
        0x92 => "Technology/Natural sciences",
        0x93 => "Medicine/Physiology/Psychology",
        0x94 => "Foreign countries/Expeditions",
        0x95 => "Social/Spiritual sciences",
        0x96 => "Further education",
        0x97 => "Languages",
        0xA0 => "Leisure hobbies",
        0xA1 => "Tourism/Travel",
        0xA2 => "Handicraft",
        0xA3 => "Motoring",
        0xA4 => "Fitness and health",
        0xA5 => "Cooking",
        0xA6 => "Advertisement/Shopping",
        0xA7 => "Gardening",
        _ => return format!("Other (0x{code:02X})"),
    };
    label.to_string()
}

#[derive(Debug, Default, PartialEq)]
struct ShortEvent {
    language: String,
    title: String,
    description: String,
}

fn parse_short_event_descriptor(data: &[u8]) -> ShortEvent {
    // language: 3 bytes
    // event_name_length: 1 byte
    // event_name: N bytes
    // text_length: 1 byte
    // text: M bytes
    let mut out = ShortEvent::default();
    if data.len() < 4 {
        return out;
    }
    out.language = data[0..3]
        .iter()
        .filter(|b| b.is_ascii_alphabetic())
        .map(|&b| (b as char).to_ascii_lowercase())
        .collect();

    let name_len = data[3] as usize;
    let name_end = 4 + name_len;
    if name_len > 0 && name_end <= data.len() {
        out.title = decode_text(&data[4..name_end]);
    }

    if name_end < data.len() {
        let text_len = data[name_end] as usize;
        let text_end = name_end + 1 + text_len;
        if text_len > 0 && text_end <= data.len() {
            out.description = decode_text(&data[name_end + 1..text_end]);
        }
    }
    out
}

fn parse_content_descriptor(data: &[u8]) -> Option<String> {
    if data.len() < 2 {
        return None;
    }
    Some(genre_label(data[0]))
}

/// Country code (3 bytes) then the rating; DVB rating n means minimum age n + 3.
fn parse_parental_rating_descriptor(data: &[u8]) -> u8 {
    match data.get(3) {
        Some(&rating) if rating > 0 => rating.saturating_add(3),
        _ => 0,
    }
}

/// Decode one EIT section into program guide events.
///
/// Malformed input never fails: a truncated or inconsistent structure stops
/// decoding at that point and whatever was decoded before is returned. Events
/// without a title or with an undefined or invalid start time are skipped.
pub fn decode_section(data: &[u8]) -> Vec<BroadcastEvent> {
    let mut events = Vec::new();
    if data.len() < SECTION_HEADER_LEN {
        return events;
    }

    let section_length = (((data[1] & 0x0F) as usize) << 8) | data[2] as usize;
    let service_id = u16::from_be_bytes([data[3], data[4]]);

    // The CRC_32 trailer is not part of the event loop.
    let events_end = data
        .len()
        .saturating_sub(CRC_LEN)
        .min((3 + section_length).saturating_sub(CRC_LEN));

    let mut pos = SECTION_HEADER_LEN;
    while pos < events_end {
        if pos + EVENT_HEADER_LEN > data.len() {
            break;
        }
        let header = &data[pos..pos + EVENT_HEADER_LEN];
        let event_id = u16::from_be_bytes([header[0], header[1]]);
        let start = decode_start_time(&header[2..7]);
        let duration_min = decode_duration_min(&header[7..10]);
        let loop_len = (u16::from_be_bytes([header[10], header[11]]) & 0x0FFF) as usize;

        let desc_start = pos + EVENT_HEADER_LEN;
        let desc_end = desc_start + loop_len;
        let limit = desc_end.min(data.len());

        let mut short_event = ShortEvent::default();
        let mut genre = String::new();
        let mut parental_rating = 0;

        let mut d = desc_start;
        while d + 2 <= limit {
            let tag = data[d];
            let len = data[d + 1] as usize;
            let payload_end = d + 2 + len;
            if payload_end > limit {
                break;
            }
            let payload = &data[d + 2..payload_end];
            match tag {
                SHORT_EVENT_DESCRIPTOR => short_event = parse_short_event_descriptor(payload),
                CONTENT_DESCRIPTOR => {
                    if let Some(label) = parse_content_descriptor(payload) {
                        genre = label;
                    }
                }
                PARENTAL_RATING_DESCRIPTOR => {
                    parental_rating = parse_parental_rating_descriptor(payload);
                }
                _ => {}
            }
            d = payload_end;
        }

        if let Some(start) = start {
            if !short_event.title.is_empty() {
                let language = if short_event.language.is_empty() {
                    "und".to_string()
                } else {
                    short_event.language
                };
                events.push(BroadcastEvent {
                    channel_id: service_id,
                    event_id,
                    start,
                    duration_min,
                    title: short_event.title,
                    description: short_event.description,
                    genre,
                    parental_rating,
                    language,
                });
            }
        }

        pos = desc_end;
    }

    events
}
