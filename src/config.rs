//! `satscan.toml` loading.
//!
//! Every key is optional; a missing file means built-in defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::BlindSweep;
use crate::diseqc::SwitchVersion;
use crate::satellite;
use crate::scan::{Antenna, ScanOptions};
use crate::transponder::{LnbProfile, Polarization};

pub const CONFIG_FILE_NAME: &str = "satscan.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, String),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tuner: TunerConfig,
    pub lnb: LnbProfile,
    pub site: SiteConfig,
    pub antenna: AntennaConfig,
    pub scan: ScanConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Adapters scanned in parallel, one orchestrator each.
    pub adapters: Vec<u32>,
    pub frontend: u32,
    /// Skip hardware detection and use the simulated tuner.
    pub simulate: bool,
}

impl Default for TunerConfig {
    fn default() -> Self {
        TunerConfig {
            adapters: vec![0],
            frontend: 0,
            simulate: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        // Istanbul
        SiteConfig {
            latitude_deg: 41.01,
            longitude_deg: 28.97,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AntennaConfig {
    /// LNB wired straight to the tuner.
    #[default]
    Direct,
    Switch {
        #[serde(default = "default_switch_version")]
        version: String,
        port: u8,
    },
    Usals {
        satellite: String,
    },
    Positioner {
        position: u8,
    },
}

fn default_switch_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// JSON or dvbv5 catalog; the built-in Türksat list when unset.
    pub catalog: Option<PathBuf>,
    pub lock_timeout_ms: u64,
    pub eit_sections: usize,
    /// Let the simulated tuner invent services on unknown frequencies.
    pub simulate_unknown: bool,
    pub blind: BlindConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            catalog: None,
            lock_timeout_ms: 10_000,
            eit_sections: 64,
            simulate_unknown: true,
            blind: BlindConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlindConfig {
    pub start_mhz: u32,
    pub end_mhz: u32,
    pub step_mhz: u32,
    pub polarizations: Vec<Polarization>,
    pub symbol_rates_ksps: Vec<u32>,
    pub lock_timeout_ms: u64,
}

impl Default for BlindConfig {
    fn default() -> Self {
        let sweep = BlindSweep::default();
        BlindConfig {
            start_mhz: sweep.start_mhz,
            end_mhz: sweep.end_mhz,
            step_mhz: sweep.step_mhz,
            polarizations: sweep.polarizations,
            symbol_rates_ksps: sweep.symbol_rates_ksps,
            lock_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub channels_file: String,
    pub events_file: String,
    pub transponders_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            dir: PathBuf::from("."),
            channels_file: "channels.conf".to_string(),
            events_file: "events.json".to_string(),
            transponders_file: "transponders.json".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn channels_path(&self) -> PathBuf {
        self.dir.join(&self.channels_file)
    }

    pub fn events_path(&self) -> PathBuf {
        self.dir.join(&self.events_file)
    }

    pub fn transponders_path(&self) -> PathBuf {
        self.dir.join(&self.transponders_file)
    }
}

/// `./satscan.toml`, then the user config dir, then `/etc/satscan`.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("satscan").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc/satscan").join(CONFIG_FILE_NAME));
    paths
}

impl Config {
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ConfigError::Parse(origin.to_path_buf(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e.to_string()))?;
        Self::from_toml_str(&content, path)
    }

    /// Load `explicit` if given, otherwise the first file found on the
    /// search path. Returns the defaults and `None` when nothing is found.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load_from_file(path)?, Some(path.to_path_buf())));
        }
        for path in search_paths() {
            if path.is_file() {
                let config = Self::load_from_file(&path)?;
                return Ok((config, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tuner.adapters.is_empty() {
            return Err(ConfigError::Invalid("tuner.adapters must not be empty".to_string()));
        }
        if self.lnb.low_lo_mhz == 0 || self.lnb.high_lo_mhz == 0 || self.lnb.switch_mhz == 0 {
            return Err(ConfigError::Invalid("lnb frequencies must be positive".to_string()));
        }
        if !(-90.0..=90.0).contains(&self.site.latitude_deg) {
            return Err(ConfigError::Invalid(format!(
                "site.latitude_deg {} outside -90..=90",
                self.site.latitude_deg
            )));
        }
        if !(-180.0..=180.0).contains(&self.site.longitude_deg) {
            return Err(ConfigError::Invalid(format!(
                "site.longitude_deg {} outside -180..=180",
                self.site.longitude_deg
            )));
        }
        if self.scan.lock_timeout_ms == 0 || self.scan.blind.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid("lock timeouts must be positive".to_string()));
        }
        let blind = &self.scan.blind;
        if blind.step_mhz == 0 || blind.start_mhz > blind.end_mhz {
            return Err(ConfigError::Invalid(format!(
                "blind sweep {}..{} step {} is empty",
                blind.start_mhz, blind.end_mhz, blind.step_mhz
            )));
        }
        if blind.polarizations.is_empty() || blind.symbol_rates_ksps.is_empty() {
            return Err(ConfigError::Invalid(
                "blind sweep needs at least one polarization and symbol rate".to_string(),
            ));
        }
        self.antenna()?;
        Ok(())
    }

    /// Resolve the `[antenna]` section against the satellite table.
    pub fn antenna(&self) -> Result<Antenna, ConfigError> {
        match &self.antenna {
            AntennaConfig::Direct => Ok(Antenna::Direct),
            AntennaConfig::Switch { version, port } => {
                let version: SwitchVersion = version
                    .parse()
                    .map_err(|e: crate::Error| ConfigError::Invalid(e.to_string()))?;
                if *port > version.max_port() {
                    return Err(ConfigError::Invalid(format!(
                        "antenna.port {port} outside 0..={} for DiSEqC {}",
                        version.max_port(),
                        if version == SwitchVersion::V1_0 { "1.0" } else { "1.1" }
                    )));
                }
                Ok(Antenna::Switch { version, port: *port })
            }
            AntennaConfig::Usals { satellite } => {
                let sat = satellite::find(satellite)
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                Ok(Antenna::Usals {
                    satellite_longitude_deg: sat.longitude_deg,
                    site_latitude_deg: self.site.latitude_deg,
                    site_longitude_deg: self.site.longitude_deg,
                })
            }
            AntennaConfig::Positioner { position } => Ok(Antenna::StoredPosition(*position)),
        }
    }

    pub fn blind_sweep(&self) -> BlindSweep {
        let blind = &self.scan.blind;
        BlindSweep {
            start_mhz: blind.start_mhz,
            end_mhz: blind.end_mhz,
            step_mhz: blind.step_mhz,
            polarizations: blind.polarizations.clone(),
            symbol_rates_ksps: blind.symbol_rates_ksps.clone(),
        }
    }

    pub fn scan_options(&self) -> Result<ScanOptions, ConfigError> {
        Ok(ScanOptions {
            lnb: self.lnb,
            antenna: self.antenna()?,
            lock_timeout: std::time::Duration::from_millis(self.scan.lock_timeout_ms),
            blind_lock_timeout: std::time::Duration::from_millis(self.scan.blind.lock_timeout_ms),
            eit_sections: self.scan.eit_sections,
        })
    }
}
