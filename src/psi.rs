//! PAT, SDT, PMT and NIT parsing for service and network discovery on a
//! locked transponder.

use crate::channel::{Channel, ChannelKind};
use crate::dvb_text::decode_text;
use crate::transponder::{DeliverySystem, Modulation, Polarization, Transponder};

pub const PAT_PID: u16 = 0x0000;
pub const PAT_TABLE_ID: u8 = 0x00;
pub const PMT_TABLE_ID: u8 = 0x02;
pub const SDT_PID: u16 = 0x0011;
pub const SDT_ACTUAL_TABLE_ID: u8 = 0x42;
pub const NIT_PID: u16 = 0x0010;
pub const NIT_ACTUAL_TABLE_ID: u8 = 0x40;

const NETWORK_NAME_DESCRIPTOR: u8 = 0x40;
const SATELLITE_DELIVERY_DESCRIPTOR: u8 = 0x43;
const SERVICE_DESCRIPTOR: u8 = 0x48;
const AC3_DESCRIPTOR: u8 = 0x6A;
const ENHANCED_AC3_DESCRIPTOR: u8 = 0x7A;
const AAC_DESCRIPTOR: u8 = 0x7C;

/// Service types that are HD by definition (MPEG-2 HD, AVC HD, HEVC).
const HD_SERVICE_TYPES: [u8; 3] = [0x11, 0x19, 0x1F];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub service_id: u16,
    pub pmt_pid: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdtService {
    pub service_id: u16,
    pub service_type: u8,
    pub provider: String,
    pub name: String,
    /// free_CA_mode: at least one component is scrambled.
    pub scrambled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PmtInfo {
    pub pcr_pid: u16,
    pub video_pid: u16,
    pub audio_pid: u16,
}

fn section_length(data: &[u8]) -> usize {
    (((data[1] & 0x0F) as usize) << 8) | data[2] as usize
}

/// End of the payload (before CRC) when the buffer holds the whole section.
fn payload_end(data: &[u8], min_len: usize) -> Option<usize> {
    if data.len() < min_len {
        return None;
    }
    let section_end = 3 + section_length(data);
    if data.len() < section_end || section_end < 4 {
        return None;
    }
    Some(section_end - 4)
}

/// Walk the descriptors in `data[pos..end]`, stopping at the first one that
/// overruns the loop.
fn for_each_descriptor(data: &[u8], mut pos: usize, end: usize, mut f: impl FnMut(u8, &[u8])) {
    while pos + 2 <= end {
        let tag = data[pos];
        let len = data[pos + 1] as usize;
        if pos + 2 + len > end {
            break;
        }
        f(tag, &data[pos + 2..pos + 2 + len]);
        pos += 2 + len;
    }
}

/// Program number 0 points at the NIT and is skipped.
pub fn parse_pat_sections(sections: &[Vec<u8>]) -> Vec<PatEntry> {
    let mut entries = Vec::new();

    for data in sections {
        let Some(entries_end) = payload_end(data, 12) else {
            continue;
        };

        let mut pos = 8;
        while pos + 4 <= entries_end {
            let program_number = u16::from_be_bytes([data[pos], data[pos + 1]]);
            let pid = ((data[pos + 2] & 0x1F) as u16) << 8 | data[pos + 3] as u16;

            if program_number != 0 {
                entries.push(PatEntry {
                    service_id: program_number,
                    pmt_pid: pid,
                });
            }
            pos += 4;
        }
    }

    entries
}

pub fn parse_sdt_sections(sections: &[Vec<u8>]) -> Vec<SdtService> {
    let mut services = Vec::new();

    for data in sections {
        let Some(entries_end) = payload_end(data, 15) else {
            continue;
        };

        let mut pos = 11;
        while pos + 5 <= entries_end {
            let service_id = u16::from_be_bytes([data[pos], data[pos + 1]]);
            let scrambled = data[pos + 3] & 0x10 != 0;
            let desc_loop_length =
                (((data[pos + 3] & 0x0F) as usize) << 8) | data[pos + 4] as usize;
            pos += 5;

            if pos + desc_loop_length > entries_end {
                break;
            }

            let desc_end = pos + desc_loop_length;
            let mut service = SdtService {
                service_id,
                service_type: 0,
                provider: String::new(),
                name: String::new(),
                scrambled,
            };

            for_each_descriptor(data, pos, desc_end, |tag, desc| {
                if tag == SERVICE_DESCRIPTOR {
                    parse_service_descriptor(desc, &mut service);
                }
            });

            services.push(service);
            pos = desc_end;
        }
    }

    services
}

/// service_type, then length-prefixed provider and service names.
fn parse_service_descriptor(desc: &[u8], service: &mut SdtService) {
    let Some(&service_type) = desc.first() else {
        return;
    };
    service.service_type = service_type;

    let Some(&provider_len) = desc.get(1) else {
        return;
    };
    let provider_end = 2 + provider_len as usize;
    let Some(provider) = desc.get(2..provider_end) else {
        return;
    };
    service.provider = decode_text(provider);

    let Some(&name_len) = desc.get(provider_end) else {
        return;
    };
    if let Some(name) = desc.get(provider_end + 1..provider_end + 1 + name_len as usize) {
        service.name = decode_text(name);
    }
}

/// First video and first audio elementary stream of one program.
pub fn parse_pmt(data: &[u8]) -> Option<PmtInfo> {
    let entries_end = payload_end(data, 16)?;

    let pcr_pid = ((data[8] & 0x1F) as u16) << 8 | data[9] as u16;
    let program_info_length = (((data[10] & 0x0F) as usize) << 8) | data[11] as usize;
    let mut pos = 12 + program_info_length;

    let mut info = PmtInfo {
        pcr_pid,
        ..PmtInfo::default()
    };

    while pos + 5 <= entries_end {
        let stream_type = data[pos];
        let elementary_pid = ((data[pos + 1] & 0x1F) as u16) << 8 | data[pos + 2] as u16;
        let es_info_length = (((data[pos + 3] & 0x0F) as usize) << 8) | data[pos + 4] as usize;
        let es_info = data.get(pos + 5..(pos + 5 + es_info_length).min(entries_end)).unwrap_or(&[]);

        // MPEG-1, MPEG-2, MPEG-4 part 2, H.264, H.265
        if info.video_pid == 0 && matches!(stream_type, 0x01 | 0x02 | 0x10 | 0x1B | 0x24) {
            info.video_pid = elementary_pid;
        }
        // MPEG-1, MPEG-2, AAC, HE-AAC; DVB carries AC-3 as private data
        let is_audio = matches!(stream_type, 0x03 | 0x04 | 0x0F | 0x11)
            || (stream_type == 0x06 && has_audio_descriptor(es_info));
        if info.audio_pid == 0 && is_audio {
            info.audio_pid = elementary_pid;
        }

        pos += 5 + es_info_length;
    }

    Some(info)
}

fn has_audio_descriptor(mut es_info: &[u8]) -> bool {
    while es_info.len() >= 2 {
        let tag = es_info[0];
        if matches!(tag, AC3_DESCRIPTOR | ENHANCED_AC3_DESCRIPTOR | AAC_DESCRIPTOR) {
            return true;
        }
        let next = 2 + es_info[1] as usize;
        es_info = es_info.get(next..).unwrap_or(&[]);
    }
    false
}

/// Join PAT, SDT and PMT into channel records. A service the SDT does not
/// describe is named `Service <sid>` and classified from its streams.
pub fn assemble_channels(
    transponder: &Transponder,
    pat: &[PatEntry],
    sdt: &[SdtService],
    mut pmt_for: impl FnMut(&PatEntry) -> Option<PmtInfo>,
) -> Vec<Channel> {
    pat.iter()
        .map(|entry| {
            let pmt = pmt_for(entry).unwrap_or_default();
            let described = sdt.iter().find(|s| s.service_id == entry.service_id);

            let name = described
                .map(|s| s.name.clone())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("Service {}", entry.service_id));
            let kind = match described {
                Some(s) if s.service_type != 0 => ChannelKind::from_service_type(s.service_type),
                _ if pmt.video_pid != 0 => ChannelKind::Tv,
                _ if pmt.audio_pid != 0 => ChannelKind::Radio,
                _ => ChannelKind::Data,
            };
            let hd = described.is_some_and(|s| HD_SERVICE_TYPES.contains(&s.service_type))
                || name.ends_with(" HD");

            Channel {
                name,
                service_id: entry.service_id,
                frequency_mhz: transponder.frequency_mhz(),
                polarization: transponder.polarization(),
                video_pid: pmt.video_pid,
                audio_pid: pmt.audio_pid,
                pcr_pid: pmt.pcr_pid,
                pmt_pid: entry.pmt_pid,
                kind,
                free_to_air: !described.is_some_and(|s| s.scrambled),
                hd,
                provider: described.map(|s| s.provider.clone()).unwrap_or_default(),
            }
        })
        .collect()
}

/// What the NIT of the home transponder says about its network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkInfo {
    pub network_id: u16,
    pub name: String,
    pub transponders: Vec<Transponder>,
}

/// Packed BCD, two digits per byte, most significant first.
fn bcd_value(bytes: &[u8]) -> Option<u32> {
    bytes.iter().try_fold(0u32, |acc, &b| {
        let (hi, lo) = ((b >> 4) as u32, (b & 0x0F) as u32);
        (hi <= 9 && lo <= 9).then(|| acc * 100 + hi * 10 + lo)
    })
}

fn delivery_fec(code: u8) -> &'static str {
    match code {
        1 => "1/2",
        2 => "2/3",
        3 => "3/4",
        4 => "5/6",
        5 => "7/8",
        6 => "8/9",
        7 => "3/5",
        8 => "4/5",
        9 => "9/10",
        15 => "NONE",
        _ => "AUTO",
    }
}

/// satellite_delivery_system_descriptor payload (11 bytes): frequency in
/// 10 kHz BCD, orbital position, flags, symbol rate in 100 sym/s BCD with
/// the inner FEC in the last nibble.
fn parse_satellite_delivery(desc: &[u8]) -> Option<Transponder> {
    if desc.len() < 11 {
        return None;
    }
    let frequency_mhz = (bcd_value(&desc[0..4])? + 50) / 100;
    let orbital = bcd_value(&desc[4..6])?;
    let flags = desc[6];
    let polarization = match (flags >> 5) & 0x03 {
        0 => Polarization::Horizontal,
        1 => Polarization::Vertical,
        2 => Polarization::CircularLeft,
        _ => Polarization::CircularRight,
    };
    let system = if flags & 0x04 != 0 {
        DeliverySystem::DvbS2
    } else {
        DeliverySystem::DvbS
    };
    let modulation = match (flags & 0x03, system) {
        (1, _) => Modulation::Qpsk,
        (2, _) => Modulation::Psk8,
        (3, _) => Modulation::Apsk16,
        (_, DeliverySystem::DvbS) => Modulation::Qpsk,
        _ => Modulation::Psk8,
    };
    // seven digits of symbol rate, the eighth nibble is FEC
    let symbol_rate_ksps = bcd_value(&[desc[7], desc[8], desc[9], desc[10] & 0xF0])? / 100;
    let fec = delivery_fec(desc[10] & 0x0F);

    let east = if flags & 0x80 != 0 { 'E' } else { 'W' };
    Transponder::new(frequency_mhz, polarization, symbol_rate_ksps, fec, system, modulation)
        .ok()
        .map(|tp| tp.with_note(format!("NIT {}.{}°{east}", orbital / 10, orbital % 10)))
}

/// Collect the network name and every satellite delivery descriptor of an
/// actual-network NIT. A carrier listed twice (same frequency and
/// polarization) is kept once.
pub fn parse_nit_sections(sections: &[Vec<u8>]) -> NetworkInfo {
    let mut info = NetworkInfo::default();

    for data in sections {
        let Some(end) = payload_end(data, 16) else {
            continue;
        };
        info.network_id = u16::from_be_bytes([data[3], data[4]]);

        let net_desc_len = (((data[8] & 0x0F) as usize) << 8) | data[9] as usize;
        let net_desc_end = 10 + net_desc_len;
        if net_desc_end + 2 > end {
            continue;
        }
        for_each_descriptor(data, 10, net_desc_end, |tag, desc| {
            if tag == NETWORK_NAME_DESCRIPTOR && info.name.is_empty() {
                info.name = decode_text(desc);
            }
        });

        let ts_loop_len =
            (((data[net_desc_end] & 0x0F) as usize) << 8) | data[net_desc_end + 1] as usize;
        let ts_loop_end = (net_desc_end + 2 + ts_loop_len).min(end);
        let mut pos = net_desc_end + 2;
        while pos + 6 <= ts_loop_end {
            let desc_len = (((data[pos + 4] & 0x0F) as usize) << 8) | data[pos + 5] as usize;
            let desc_end = pos + 6 + desc_len;
            if desc_end > ts_loop_end {
                break;
            }
            for_each_descriptor(data, pos + 6, desc_end, |tag, desc| {
                if tag != SATELLITE_DELIVERY_DESCRIPTOR {
                    return;
                }
                let Some(tp) = parse_satellite_delivery(desc) else {
                    return;
                };
                let key = (tp.frequency_mhz(), tp.polarization());
                if !info.transponders.iter().any(|t| (t.frequency_mhz(), t.polarization()) == key) {
                    info.transponders.push(tp);
                }
            });
            pos = desc_end;
        }
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(table_id: u8, header: &[u8], body: &[u8]) -> Vec<u8> {
        let section_length = header.len() + body.len() + 4;
        let mut data = vec![
            table_id,
            0xB0 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
        ];
        data.extend_from_slice(header);
        data.extend_from_slice(body);
        data.extend_from_slice(&[0, 0, 0, 0]);
        data
    }

    fn pat(entries: &[(u16, u16)]) -> Vec<u8> {
        let mut body = Vec::new();
        for &(program, pid) in entries {
            body.extend_from_slice(&program.to_be_bytes());
            body.push(0xE0 | (pid >> 8) as u8);
            body.push(pid as u8);
        }
        wrap(PAT_TABLE_ID, &[0x00, 0x01, 0xC1, 0x00, 0x00], &body)
    }

    fn sdt_service(
        sid: u16,
        scrambled: bool,
        service_type: u8,
        provider: &[u8],
        name: &[u8],
    ) -> Vec<u8> {
        let desc_len = (3 + provider.len() + name.len()) as u8;
        let mut desc = vec![SERVICE_DESCRIPTOR, desc_len, service_type];
        desc.push(provider.len() as u8);
        desc.extend_from_slice(provider);
        desc.push(name.len() as u8);
        desc.extend_from_slice(name);

        let mut s = sid.to_be_bytes().to_vec();
        s.push(0xFC);
        let flags = 0x80 | if scrambled { 0x10 } else { 0 };
        s.push(flags | ((desc.len() >> 8) as u8 & 0x0F));
        s.push(desc.len() as u8);
        s.extend_from_slice(&desc);
        s
    }

    fn sdt(services: &[Vec<u8>]) -> Vec<u8> {
        wrap(
            SDT_ACTUAL_TABLE_ID,
            &[0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x46, 0xFF],
            &services.concat(),
        )
    }

    fn pmt(pcr: u16, streams: &[(u8, u16, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for &(stream_type, pid, es_info) in streams {
            body.push(stream_type);
            body.push(0xE0 | (pid >> 8) as u8);
            body.push(pid as u8);
            body.push(0xF0 | (es_info.len() >> 8) as u8);
            body.push(es_info.len() as u8);
            body.extend_from_slice(es_info);
        }
        wrap(
            PMT_TABLE_ID,
            &[0x00, 0x01, 0xC1, 0x00, 0x00, 0xE0 | (pcr >> 8) as u8, pcr as u8, 0xF0, 0x00],
            &body,
        )
    }

    fn sat_delivery(freq: [u8; 4], flags: u8, symbol_rate_fec: [u8; 4]) -> Vec<u8> {
        let mut desc = vec![SATELLITE_DELIVERY_DESCRIPTOR, 11];
        desc.extend_from_slice(&freq);
        // 42.0 E
        desc.extend_from_slice(&[0x04, 0x20, flags]);
        desc.extend_from_slice(&symbol_rate_fec);
        desc
    }

    fn nit(network_id: u16, name: &[u8], streams: &[(u16, Vec<u8>)]) -> Vec<u8> {
        let mut net_desc = Vec::new();
        if !name.is_empty() {
            net_desc.push(NETWORK_NAME_DESCRIPTOR);
            net_desc.push(name.len() as u8);
            net_desc.extend_from_slice(name);
        }
        let mut ts_loop = Vec::new();
        for (tsid, descriptors) in streams {
            ts_loop.extend_from_slice(&tsid.to_be_bytes());
            ts_loop.extend_from_slice(&network_id.to_be_bytes());
            ts_loop.push(0xF0 | (descriptors.len() >> 8) as u8);
            ts_loop.push(descriptors.len() as u8);
            ts_loop.extend_from_slice(descriptors);
        }

        let mut body = vec![0xF0 | (net_desc.len() >> 8) as u8, net_desc.len() as u8];
        body.extend_from_slice(&net_desc);
        body.push(0xF0 | (ts_loop.len() >> 8) as u8);
        body.push(ts_loop.len() as u8);
        body.extend_from_slice(&ts_loop);

        let [hi, lo] = network_id.to_be_bytes();
        wrap(NIT_ACTUAL_TABLE_ID, &[hi, lo, 0xC1, 0x00, 0x00], &body)
    }

    fn tp() -> Transponder {
        Transponder::new(
            11054,
            Polarization::Vertical,
            30000,
            "3/4",
            DeliverySystem::DvbS2,
            Modulation::Psk8,
        )
        .unwrap()
    }

    // --- PAT ---

    #[test]
    fn test_parse_pat_skips_nit_entry() {
        let entries = parse_pat_sections(&[pat(&[(0, 0x10), (1, 0x100)])]);
        assert_eq!(entries, vec![PatEntry { service_id: 1, pmt_pid: 0x100 }]);
    }

    #[test]
    fn test_parse_pat_multiple_sections() {
        let entries = parse_pat_sections(&[pat(&[(1, 0x100)]), pat(&[(2, 0x200), (3, 0x300)])]);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].pmt_pid, 0x300);
    }

    #[test]
    fn test_parse_pat_empty_and_truncated() {
        assert!(parse_pat_sections(&[]).is_empty());
        let mut short = pat(&[(1, 0x100)]);
        short.truncate(10);
        assert!(parse_pat_sections(&[short]).is_empty());
    }

    // --- SDT ---

    #[test]
    fn test_parse_sdt_service_descriptor() {
        let services = parse_sdt_sections(&[sdt(&[
            sdt_service(3001, false, 0x1F, b"TRT", b"TRT 4K"),
            sdt_service(3002, true, 0x02, b"TRT", b"TRT Radyo 1"),
        ])]);
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].name, "TRT 4K");
        assert_eq!(services[0].provider, "TRT");
        assert_eq!(services[0].service_type, 0x1F);
        assert!(!services[0].scrambled);
        assert!(services[1].scrambled);
    }

    #[test]
    fn test_parse_sdt_turkish_name() {
        // 0xF0 = ğ, 0xFE = ş in ISO-8859-9
        let service = sdt_service(6002, false, 0x01, b"Do\xf0u\xfe", b"NTV");
        let services = parse_sdt_sections(&[sdt(&[service])]);
        assert_eq!(services[0].provider, "Doğuş");
    }

    #[test]
    fn test_parse_sdt_empty() {
        assert!(parse_sdt_sections(&[]).is_empty());
    }

    #[test]
    fn test_parse_sdt_truncated_descriptor_keeps_service() {
        let mut svc = sdt_service(1001, false, 0x01, b"TRT", b"TRT 1");
        // claim a longer service descriptor than the loop holds
        svc[6] = 40;
        let services = parse_sdt_sections(&[sdt(&[svc])]);
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "");
    }

    // --- PMT ---

    #[test]
    fn test_parse_pmt_video_and_audio() {
        let info = parse_pmt(&pmt(0x100, &[(0x1B, 0x100, &[]), (0x0F, 0x101, &[])])).unwrap();
        assert_eq!(info, PmtInfo { pcr_pid: 0x100, video_pid: 0x100, audio_pid: 0x101 });
    }

    #[test]
    fn test_parse_pmt_private_ac3_audio() {
        let ac3: &[u8] = &[AC3_DESCRIPTOR, 0x00];
        let teletext: &[u8] = &[0x56, 0x00];
        let info = parse_pmt(&pmt(0x200, &[(0x06, 0x205, teletext), (0x06, 0x206, ac3)])).unwrap();
        assert_eq!(info.audio_pid, 0x206);
        assert_eq!(info.video_pid, 0);
    }

    #[test]
    fn test_parse_pmt_too_short() {
        assert!(parse_pmt(&[0u8; 15]).is_none());
    }

    #[test]
    fn test_parse_pmt_no_streams() {
        let info = parse_pmt(&pmt(0x1FFF, &[])).unwrap();
        assert_eq!(info.video_pid, 0);
        assert_eq!(info.audio_pid, 0);
        assert_eq!(info.pcr_pid, 0x1FFF);
    }

    // --- assemble_channels ---

    #[test]
    fn test_assemble_channels() {
        let pat = parse_pat_sections(&[pat(&[(3001, 3001), (3002, 3002), (3099, 3099)])]);
        let sdt = parse_sdt_sections(&[sdt(&[
            sdt_service(3001, false, 0x1F, b"TRT", b"TRT 4K"),
            sdt_service(3002, false, 0x02, b"TRT", b"TRT Radyo 1"),
        ])]);
        let channels = assemble_channels(&tp(), &pat, &sdt, |entry| match entry.service_id {
            3001 => Some(PmtInfo { pcr_pid: 301, video_pid: 301, audio_pid: 401 }),
            3002 => Some(PmtInfo { pcr_pid: 402, video_pid: 0, audio_pid: 402 }),
            _ => None,
        });

        assert_eq!(channels.len(), 3);
        assert_eq!(channels[0].name, "TRT 4K");
        assert_eq!(channels[0].kind, ChannelKind::Tv);
        assert!(channels[0].hd);
        assert_eq!(channels[0].frequency_mhz, 11054);
        assert_eq!(channels[0].pmt_pid, 3001);
        assert_eq!(channels[1].kind, ChannelKind::Radio);
        assert!(!channels[1].hd);
        assert_eq!(channels[2].name, "Service 3099");
        assert_eq!(channels[2].kind, ChannelKind::Data);
        assert!(channels[2].free_to_air);
    }

    #[test]
    fn test_assemble_hd_from_name() {
        let pat = [PatEntry { service_id: 2001, pmt_pid: 2001 }];
        let sdt = [SdtService {
            service_id: 2001,
            service_type: 0x01,
            provider: "TRT".to_string(),
            name: "TRT 1 HD".to_string(),
            scrambled: true,
        }];
        let channels = assemble_channels(&tp(), &pat, &sdt, |_| None);
        assert!(channels[0].hd);
        assert!(!channels[0].free_to_air);
    }

    // --- NIT ---

    #[test]
    fn test_parse_satellite_delivery_s2() {
        // 10970 MHz V, DVB-S2 8PSK, 30000 ksps, FEC 3/4
        let desc = sat_delivery([0x01, 0x09, 0x70, 0x00], 0xA6, [0x03, 0x00, 0x00, 0x03]);
        let tp = parse_satellite_delivery(&desc[2..]).unwrap();
        assert_eq!(tp.frequency_mhz(), 10970);
        assert_eq!(tp.polarization(), Polarization::Vertical);
        assert_eq!(tp.symbol_rate_ksps(), 30000);
        assert_eq!(tp.fec(), "3/4");
        assert_eq!(tp.system(), DeliverySystem::DvbS2);
        assert_eq!(tp.modulation(), Modulation::Psk8);
        assert_eq!(tp.note(), "NIT 42.0°E");
    }

    #[test]
    fn test_parse_satellite_delivery_dvbs_rounds_frequency() {
        // 11053.75 MHz H, DVB-S QPSK, 27500 ksps, FEC 7/8, west
        let desc = sat_delivery([0x01, 0x10, 0x53, 0x75], 0x01, [0x02, 0x75, 0x00, 0x05]);
        let tp = parse_satellite_delivery(&desc[2..]).unwrap();
        assert_eq!(tp.frequency_mhz(), 11054);
        assert_eq!(tp.polarization(), Polarization::Horizontal);
        assert_eq!(tp.symbol_rate_ksps(), 27500);
        assert_eq!(tp.fec(), "7/8");
        assert_eq!(tp.system(), DeliverySystem::DvbS);
        assert_eq!(tp.modulation(), Modulation::Qpsk);
        assert!(tp.note().ends_with("°W"));
    }

    #[test]
    fn test_parse_satellite_delivery_circular_and_auto() {
        let desc = sat_delivery([0x01, 0x20, 0x00, 0x00], 0xC4, [0x02, 0x20, 0x00, 0x00]);
        let tp = parse_satellite_delivery(&desc[2..]).unwrap();
        assert_eq!(tp.polarization(), Polarization::CircularLeft);
        assert_eq!(tp.modulation(), Modulation::Psk8);
        assert_eq!(tp.fec(), "AUTO");
        assert_eq!(tp.symbol_rate_ksps(), 22000);

        let desc = sat_delivery([0x01, 0x20, 0x00, 0x00], 0xE1, [0x02, 0x20, 0x00, 0x0F]);
        let tp = parse_satellite_delivery(&desc[2..]).unwrap();
        assert_eq!(tp.polarization(), Polarization::CircularRight);
        assert_eq!(tp.fec(), "NONE");
    }

    #[test]
    fn test_parse_satellite_delivery_rejects_bad_bcd_and_short() {
        let desc = sat_delivery([0x01, 0x0A, 0x70, 0x00], 0xA6, [0x03, 0x00, 0x00, 0x03]);
        assert!(parse_satellite_delivery(&desc[2..]).is_none());
        assert!(parse_satellite_delivery(&desc[2..10]).is_none());
        // zero symbol rate is not a tunable carrier
        let desc = sat_delivery([0x01, 0x09, 0x70, 0x00], 0xA6, [0x00, 0x00, 0x00, 0x03]);
        assert!(parse_satellite_delivery(&desc[2..]).is_none());
    }

    #[test]
    fn test_parse_nit_name_and_transponders() {
        let s2 = sat_delivery([0x01, 0x09, 0x70, 0x00], 0xA6, [0x03, 0x00, 0x00, 0x03]);
        let dvbs = sat_delivery([0x01, 0x10, 0x54, 0x00], 0x81, [0x03, 0x00, 0x00, 0x04]);
        // a private descriptor alongside the delivery descriptor is skipped
        let mut with_private = vec![0x83, 0x02, 0xAA, 0xBB];
        with_private.extend_from_slice(&dvbs);

        // 0xFC = ü in ISO-8859-9
        let info = parse_nit_sections(&[nit(0x0046, b"T\xfcrksat", &[(1, s2), (2, with_private)])]);
        assert_eq!(info.network_id, 0x0046);
        assert_eq!(info.name, "Türksat");
        assert_eq!(info.transponders.len(), 2);
        assert_eq!(info.transponders[0].frequency_mhz(), 10970);
        assert_eq!(info.transponders[1].frequency_mhz(), 11054);
        assert_eq!(info.transponders[1].fec(), "5/6");
    }

    #[test]
    fn test_parse_nit_deduplicates_across_sections() {
        let a = sat_delivery([0x01, 0x09, 0x70, 0x00], 0xA6, [0x03, 0x00, 0x00, 0x03]);
        let b = sat_delivery([0x01, 0x10, 0x54, 0x00], 0x81, [0x03, 0x00, 0x00, 0x04]);
        let info = parse_nit_sections(&[
            nit(0x0046, b"", &[(1, a.clone()), (2, b.clone())]),
            nit(0x0046, b"", &[(1, a), (2, b)]),
        ]);
        assert_eq!(info.transponders.len(), 2);
        assert_eq!(info.name, "");
    }

    #[test]
    fn test_parse_nit_empty_and_truncated() {
        assert_eq!(parse_nit_sections(&[]), NetworkInfo::default());

        let s2 = sat_delivery([0x01, 0x09, 0x70, 0x00], 0xA6, [0x03, 0x00, 0x00, 0x03]);
        let mut short = nit(0x0046, b"T", &[(1, s2)]);
        short.truncate(20);
        assert!(parse_nit_sections(&[short]).transponders.is_empty());
    }

    #[test]
    fn test_parse_nit_overrunning_descriptor_loop() {
        let s2 = sat_delivery([0x01, 0x09, 0x70, 0x00], 0xA6, [0x03, 0x00, 0x00, 0x03]);
        let mut section = nit(0x0046, b"", &[(1, s2)]);
        // transport_descriptors_length claims more than the loop holds
        section[17] = 0x40;
        assert!(parse_nit_sections(&[section]).transponders.is_empty());
    }
}
