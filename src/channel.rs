use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::transponder::Polarization;

const CONF_FIELDS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChannelKind {
    #[serde(rename = "TV")]
    Tv,
    Radio,
    Data,
}

impl ChannelKind {
    /// From the SDT service descriptor's service_type.
    pub fn from_service_type(service_type: u8) -> Self {
        match service_type {
            // digital TV: SD, MPEG-2 HD, AVC SD, AVC HD, HEVC
            0x01 | 0x11 | 0x16 | 0x19 | 0x1F => ChannelKind::Tv,
            // digital radio, advanced codec radio
            0x02 | 0x0A => ChannelKind::Radio,
            _ => ChannelKind::Data,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Tv => write!(f, "TV"),
            ChannelKind::Radio => write!(f, "Radio"),
            ChannelKind::Data => write!(f, "Data"),
        }
    }
}

impl FromStr for ChannelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tv" => Ok(ChannelKind::Tv),
            "radio" => Ok(ChannelKind::Radio),
            "data" => Ok(ChannelKind::Data),
            _ => Err(Error::ChannelList(format!("unknown channel kind '{s}'"))),
        }
    }
}

/// A service found on a locked transponder. Re-scans replace by
/// `(service_id, frequency, polarization)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub name: String,
    pub service_id: u16,
    pub frequency_mhz: u32,
    pub polarization: Polarization,
    pub video_pid: u16,
    pub audio_pid: u16,
    pub pcr_pid: u16,
    pub pmt_pid: u16,
    pub kind: ChannelKind,
    pub free_to_air: bool,
    pub hd: bool,
    pub provider: String,
}

impl Channel {
    pub fn key(&self) -> (u16, u32, Polarization) {
        (self.service_id, self.frequency_mhz, self.polarization)
    }

    /// One `channels.conf` line:
    /// `name:freq:pol:sid:vpid:apid:pcr:pmt:kind:fta:hd:provider`.
    pub fn to_conf_line(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.name.replace(':', " "),
            self.frequency_mhz,
            self.polarization,
            self.service_id,
            self.video_pid,
            self.audio_pid,
            self.pcr_pid,
            self.pmt_pid,
            self.kind,
            self.free_to_air as u8,
            self.hd as u8,
            self.provider.replace(':', " "),
        )
    }

    pub fn from_conf_line(line: &str, line_num: usize) -> Result<Self> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != CONF_FIELDS {
            return Err(Error::ChannelList(format!(
                "line {line_num}: expected {CONF_FIELDS} fields, got {}",
                fields.len()
            )));
        }

        let number = |idx: usize, what: &str| -> Result<u32> {
            let field = fields[idx];
            field.trim().parse::<u32>().map_err(|e| {
                Error::ChannelList(format!("line {line_num}: invalid {what} '{field}': {e}"))
            })
        };
        let pid = |idx: usize, what: &str| -> Result<u16> {
            let field = fields[idx];
            field.trim().parse::<u16>().map_err(|e| {
                Error::ChannelList(format!("line {line_num}: invalid {what} '{field}': {e}"))
            })
        };
        let flag = |idx: usize| fields[idx].trim() == "1";

        let polarization = fields[2]
            .parse()
            .map_err(|e| Error::ChannelList(format!("line {line_num}: {e}")))?;
        let kind = fields[8]
            .parse()
            .map_err(|e| Error::ChannelList(format!("line {line_num}: {e}")))?;

        Ok(Channel {
            name: fields[0].to_string(),
            frequency_mhz: number(1, "frequency")?,
            polarization,
            service_id: pid(3, "service ID")?,
            video_pid: pid(4, "video PID")?,
            audio_pid: pid(5, "audio PID")?,
            pcr_pid: pid(6, "PCR PID")?,
            pmt_pid: pid(7, "PMT PID")?,
            kind,
            free_to_air: flag(9),
            hd: flag(10),
            provider: fields[11].to_string(),
        })
    }
}

pub fn parse_channels(content: &str) -> Result<Vec<Channel>> {
    let mut channels = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        channels.push(Channel::from_conf_line(line, i + 1)?);
    }
    Ok(channels)
}

pub fn parse_channels_conf(path: &Path) -> Result<Vec<Channel>> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))?;
    parse_channels(&content)
}

/// Write the channel list, moving an existing file aside to `<path>.old`.
/// Returns the backup path if one was made.
pub fn write_channels_conf(path: &Path, channels: &[Channel]) -> Result<Option<PathBuf>> {
    let mut content = String::new();
    for ch in channels {
        content.push_str(&ch.to_conf_line());
        content.push('\n');
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|e| Error::io(format!("failed to create {}", dir.display()), e))?;
    }

    let mut backup = None;
    if path.exists() {
        let mut backup_path = path.as_os_str().to_owned();
        backup_path.push(".old");
        let backup_path = PathBuf::from(backup_path);
        fs::rename(path, &backup_path)
            .map_err(|e| Error::io(format!("failed to back up {}", path.display()), e))?;
        backup = Some(backup_path);
    }

    fs::write(path, content)
        .map_err(|e| Error::io(format!("failed to write {}", path.display()), e))?;
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn trt1() -> Channel {
        Channel {
            name: "TRT 1".to_string(),
            service_id: 1001,
            frequency_mhz: 10970,
            polarization: Polarization::Vertical,
            video_pid: 101,
            audio_pid: 201,
            pcr_pid: 101,
            pmt_pid: 1001,
            kind: ChannelKind::Tv,
            free_to_air: true,
            hd: false,
            provider: "TRT".to_string(),
        }
    }

    #[test]
    fn test_to_conf_line() {
        assert_eq!(trt1().to_conf_line(), "TRT 1:10970:V:1001:101:201:101:1001:TV:1:0:TRT");
    }

    #[test]
    fn test_conf_line_parses_back() {
        let ch = trt1();
        assert_eq!(Channel::from_conf_line(&ch.to_conf_line(), 1).unwrap(), ch);
    }

    #[test]
    fn test_colon_in_name_does_not_break_line() {
        let mut ch = trt1();
        ch.name = "Show: Live".to_string();
        let line = ch.to_conf_line();
        assert_eq!(line.split(':').count(), CONF_FIELDS);
    }

    #[test]
    fn test_wrong_field_count() {
        let err = Channel::from_conf_line("a:b:c", 3).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_invalid_pid() {
        assert!(Channel::from_conf_line("X:10970:V:1:abc:0:0:0:TV:1:0:P", 1).is_err());
        assert!(Channel::from_conf_line("X:10970:Q:1:0:0:0:0:TV:1:0:P", 1).is_err());
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let content = "# satscan\n\nTRT 1:10970:V:1001:101:201:101:1001:TV:1:0:TRT\n";
        let channels = parse_channels(content).unwrap();
        assert_eq!(channels, vec![trt1()]);
    }

    #[test]
    fn test_kind_from_service_type() {
        assert_eq!(ChannelKind::from_service_type(0x01), ChannelKind::Tv);
        assert_eq!(ChannelKind::from_service_type(0x19), ChannelKind::Tv);
        assert_eq!(ChannelKind::from_service_type(0x02), ChannelKind::Radio);
        assert_eq!(ChannelKind::from_service_type(0x0C), ChannelKind::Data);
    }

    #[test]
    fn test_write_backs_up_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("channels.conf");

        assert_eq!(write_channels_conf(&path, &[trt1()]).unwrap(), None);
        let backup = write_channels_conf(&path, &[]).unwrap().unwrap();

        assert_eq!(backup, dir.path().join("conf").join("channels.conf.old"));
        assert_eq!(parse_channels_conf(&backup).unwrap(), vec![trt1()]);
        assert!(parse_channels_conf(&path).unwrap().is_empty());
    }

    #[test]
    fn test_parse_missing_file() {
        assert!(matches!(
            parse_channels_conf(Path::new("/nonexistent/channels.conf")),
            Err(Error::Io { .. })
        ));
    }
}
