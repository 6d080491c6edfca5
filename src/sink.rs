//! Where a scan pass puts what it finds.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Local;
use log::debug;
use serde::Serialize;

use crate::channel::{self, Channel};
use crate::driver::SignalQuality;
use crate::eit::BroadcastEvent;
use crate::error::{Error, Result};
use crate::transponder::{Polarization, Transponder};

/// Receives results from one or more orchestrators at once. Every save is
/// an upsert on the record's natural key.
pub trait ResultSink: Send + Sync {
    fn save_channels(&self, channels: &[Channel]) -> Result<()>;
    fn save_events(&self, events: &[BroadcastEvent]) -> Result<()>;
    fn save_transponder_quality(
        &self,
        transponder: &Transponder,
        quality: SignalQuality,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransponderReport {
    #[serde(flatten)]
    pub transponder: Transponder,
    #[serde(flatten)]
    pub quality: SignalQuality,
}

#[derive(Serialize)]
struct EventsFile<'a> {
    generated: String,
    events: &'a [BroadcastEvent],
}

#[derive(Serialize)]
struct TranspondersFile<'a> {
    generated: String,
    transponders: &'a [TransponderReport],
}

type ChannelKey = (u32, Polarization, u16);

/// In-process store, ordered by frequency and service id.
#[derive(Debug, Default)]
pub struct MemorySink {
    channels: Mutex<BTreeMap<ChannelKey, Channel>>,
    events: Mutex<BTreeMap<(u16, u16), BroadcastEvent>>,
    transponders: Mutex<BTreeMap<(u32, Polarization), TransponderReport>>,
}

// A panic in another scan thread leaves the maps consistent; keep going.
fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn channel_key(ch: &Channel) -> ChannelKey {
    (ch.frequency_mhz, ch.polarization, ch.service_id)
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing channel list so a partial re-scan only
    /// replaces what it finds again.
    pub fn with_channels(channels: Vec<Channel>) -> Self {
        let sink = Self::default();
        locked(&sink.channels).extend(channels.into_iter().map(|ch| (channel_key(&ch), ch)));
        sink
    }

    pub fn channels(&self) -> Vec<Channel> {
        locked(&self.channels).values().cloned().collect()
    }

    pub fn events(&self) -> Vec<BroadcastEvent> {
        locked(&self.events).values().cloned().collect()
    }

    pub fn transponder_reports(&self) -> Vec<TransponderReport> {
        locked(&self.transponders).values().cloned().collect()
    }

    pub fn channel_count(&self) -> usize {
        locked(&self.channels).len()
    }

    pub fn event_count(&self) -> usize {
        locked(&self.events).len()
    }

    /// Returns the `.old` backup path if a previous list was moved aside.
    pub fn write_channels_conf(&self, path: &Path) -> Result<Option<PathBuf>> {
        channel::write_channels_conf(path, &self.channels())
    }

    pub fn write_events_json(&self, path: &Path) -> Result<()> {
        let events = self.events();
        let file = EventsFile {
            generated: Local::now().to_rfc3339(),
            events: &events,
        };
        write_json(path, &file)
    }

    pub fn write_transponders_json(&self, path: &Path) -> Result<()> {
        let reports = self.transponder_reports();
        let file = TranspondersFile {
            generated: Local::now().to_rfc3339(),
            transponders: &reports,
        };
        write_json(path, &file)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|e| Error::io(format!("failed to create {}", dir.display()), e))?;
    }
    fs::write(path, json + "\n")
        .map_err(|e| Error::io(format!("failed to write {}", path.display()), e))
}

impl ResultSink for MemorySink {
    fn save_channels(&self, channels: &[Channel]) -> Result<()> {
        let mut map = locked(&self.channels);
        for ch in channels {
            map.insert(channel_key(ch), ch.clone());
        }
        debug!("stored {} channels ({} total)", channels.len(), map.len());
        Ok(())
    }

    fn save_events(&self, events: &[BroadcastEvent]) -> Result<()> {
        let mut map = locked(&self.events);
        for ev in events {
            map.insert(ev.key(), ev.clone());
        }
        Ok(())
    }

    fn save_transponder_quality(
        &self,
        transponder: &Transponder,
        quality: SignalQuality,
    ) -> Result<()> {
        locked(&self.transponders).insert(
            (transponder.frequency_mhz(), transponder.polarization()),
            TransponderReport {
                transponder: transponder.clone(),
                quality,
            },
        );
        Ok(())
    }
}
