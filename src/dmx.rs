//! Linux DVB demux section filters.

use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::io::{AsFd, AsRawFd};
use std::time::{Duration, Instant};

use log::{trace, warn};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::error::{Error, Result};

pub const DMX_FILTER_SIZE: usize = 16;
pub const DMX_CHECK_CRC: u32 = 1;
pub const DMX_IMMEDIATE_START: u32 = 4;

/// Largest private section plus header.
const SECTION_BUF_LEN: usize = 4096;
/// Longest single poll() wait.
const POLL_SLICE_MS: u128 = 1000;

#[repr(C)]
pub struct DmxFilter {
    pub filter: [u8; DMX_FILTER_SIZE],
    pub mask: [u8; DMX_FILTER_SIZE],
    pub mode: [u8; DMX_FILTER_SIZE],
}

#[repr(C)]
pub struct DmxSctFilterParams {
    pub pid: u16,
    pub filter: DmxFilter,
    pub timeout: u32,
    pub flags: u32,
}

nix::ioctl_write_ptr!(dmx_set_filter, b'o', 43, DmxSctFilterParams);

/// An open demux device with one section filter running.
pub struct SectionFilter {
    file: File,
    pid: u16,
    buf: Box<[u8; SECTION_BUF_LEN]>,
}

impl SectionFilter {
    /// Filter `pid`, optionally on a table id in the kernel. The driver
    /// checks section CRCs and drops bad ones.
    pub fn open(adapter: u32, demux: u32, pid: u16, table_id: Option<u8>) -> Result<Self> {
        let path = format!("/dev/dvb/adapter{adapter}/demux{demux}");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(format!("failed to open {path}"), e))?;

        let mut filter = DmxFilter {
            filter: [0u8; DMX_FILTER_SIZE],
            mask: [0u8; DMX_FILTER_SIZE],
            mode: [0u8; DMX_FILTER_SIZE],
        };
        if let Some(table_id) = table_id {
            filter.filter[0] = table_id;
            filter.mask[0] = 0xFF;
        }

        let params = DmxSctFilterParams {
            pid,
            filter,
            timeout: 0,
            flags: DMX_IMMEDIATE_START | DMX_CHECK_CRC,
        };

        unsafe {
            dmx_set_filter(file.as_raw_fd(), &params).map_err(|e| {
                Error::Driver(format!("DMX_SET_FILTER on PID 0x{pid:04X} failed: {e}"))
            })?;
        }

        Ok(SectionFilter {
            file,
            pid,
            buf: Box::new([0u8; SECTION_BUF_LEN]),
        })
    }

    /// Wait up to `timeout` for the next section. `None` on timeout.
    pub fn read_section(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let poll_ms = remaining.as_millis().min(POLL_SLICE_MS) as u16;
            let nfds = {
                let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
                poll(&mut fds, PollTimeout::from(poll_ms))
                    .map_err(|e| Error::Driver(format!("poll on demux failed: {e}")))?
            };
            if nfds == 0 {
                continue;
            }

            let n = match self.file.read(&mut self.buf[..]) {
                Ok(n) => n,
                // EOVERFLOW after a slow reader; the next read resumes
                Err(e) => {
                    trace!("demux read on PID 0x{:04X}: {e}", self.pid);
                    continue;
                }
            };
            if n < 8 {
                continue;
            }
            return Ok(Some(self.buf[..n].to_vec()));
        }
    }
}

/// Identity of a section within a table version.
pub fn section_key(section: &[u8]) -> Option<(u8, u16, u8, u8)> {
    if section.len() < 8 {
        return None;
    }
    let table_id_extension = u16::from_be_bytes([section[3], section[4]]);
    let version = (section[5] >> 1) & 0x1F;
    Some((section[0], table_id_extension, version, section[6]))
}

/// Collect sections 0 through last_section_number of one table, sorted by
/// section number. Fails only when nothing arrived at all.
pub fn read_table(adapter: u32, pid: u16, table_id: u8, timeout: Duration) -> Result<Vec<Vec<u8>>> {
    let mut filter = SectionFilter::open(adapter, 0, pid, Some(table_id))?;
    let start = Instant::now();
    let mut sections: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
    let mut expected_last: Option<u8> = None;

    while let Some(remaining) = timeout.checked_sub(start.elapsed()) {
        let Some(data) = filter.read_section(remaining)? else {
            break;
        };
        if data[0] != table_id {
            continue;
        }

        let section_number = data[6];
        let last_section_number = data[7];
        expected_last = Some(last_section_number);
        sections.entry(section_number).or_insert(data);

        if sections.len() > last_section_number as usize {
            break;
        }
    }

    if sections.is_empty() {
        return Err(Error::Driver(format!(
            "timeout reading sections (PID=0x{pid:04X}, table_id=0x{table_id:02X})"
        )));
    }

    if let Some(last) = expected_last {
        if sections.len() <= last as usize {
            warn!(
                "only got {}/{} sections for PID=0x{pid:04X}",
                sections.len(),
                last as usize + 1
            );
        }
    }

    Ok(sections.into_values().collect())
}

/// Streams distinct sections of the tables accepted by `accept`, dropping
/// repeats of the carousel.
pub struct SectionStream {
    filter: SectionFilter,
    accept: fn(u8) -> bool,
    seen: HashSet<(u8, u16, u8, u8)>,
    read_timeout: Duration,
}

impl SectionStream {
    pub fn open(
        adapter: u32,
        pid: u16,
        accept: fn(u8) -> bool,
        read_timeout: Duration,
    ) -> Result<Self> {
        Ok(SectionStream {
            filter: SectionFilter::open(adapter, 0, pid, None)?,
            accept,
            seen: HashSet::new(),
            read_timeout,
        })
    }

    /// Next new section, or `None` once the carousel stays silent or only
    /// repeats itself for the read timeout.
    pub fn next_section(&mut self) -> Result<Option<Vec<u8>>> {
        let start = Instant::now();
        while let Some(remaining) = self.read_timeout.checked_sub(start.elapsed()) {
            let Some(data) = self.filter.read_section(remaining)? else {
                return Ok(None);
            };
            if !(self.accept)(data[0]) {
                continue;
            }
            let Some(key) = section_key(&data) else {
                continue;
            };
            if self.seen.insert(key) {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_key() {
        let section = [0x4E, 0xF0, 0x20, 0x03, 0xE9, 0xC3, 0x01, 0x01];
        // version 1, current_next set
        assert_eq!(section_key(&section), Some((0x4E, 1001, 1, 1)));
    }

    #[test]
    fn test_section_key_short() {
        assert_eq!(section_key(&[0x4E, 0xF0]), None);
    }

    #[test]
    fn test_open_missing_adapter() {
        let err = SectionFilter::open(250, 0, 0x12, None).err().unwrap();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_filter_params_layout() {
        // pid u16 padded to 4, 3 × 16 filter bytes, timeout, flags
        assert_eq!(std::mem::size_of::<DmxSctFilterParams>(), 60);
    }
}
