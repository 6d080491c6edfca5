//! Transponder lists.
//!
//! Three sources feed a [`TransponderCatalog`]: the built-in Türksat 42°E
//! table, JSON files in the same shape, and dvbv5 scan files. Blind scans use
//! a [`BlindSweep`] grid instead.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::transponder::{DeliverySystem, Modulation, Polarization, Transponder};

/// Symbol rates tried at every blind sweep point, in ksps.
pub const COMMON_SYMBOL_RATES_KSPS: [u32; 9] =
    [2400, 3125, 5000, 6000, 13000, 22000, 27500, 30000, 45000];

/// Delivery system and modulation pairs tried per symbol rate.
pub const BLIND_SYSTEMS: [(DeliverySystem, Modulation); 2] = [
    (DeliverySystem::DvbS, Modulation::Qpsk),
    (DeliverySystem::DvbS2, Modulation::Psk8),
];

const BUILTIN_TURKSAT: &str = include_str!("../etc/turksat_transponders.json");

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    satellite: Option<String>,
    transponders: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    freq: i64,
    pol: String,
    sr: i64,
    #[serde(default = "default_fec")]
    fec: String,
    #[serde(default = "default_system")]
    system: String,
    #[serde(default)]
    modulation: Option<String>,
    #[serde(default)]
    note: String,
}

fn default_fec() -> String {
    "AUTO".to_string()
}

fn default_system() -> String {
    "DVB-S2".to_string()
}

fn default_modulation(system: DeliverySystem) -> Modulation {
    match system {
        DeliverySystem::DvbS => Modulation::Qpsk,
        DeliverySystem::DvbS2 | DeliverySystem::DvbS2X => Modulation::Psk8,
    }
}

impl CatalogEntry {
    fn into_transponder(self) -> Result<Transponder> {
        let frequency_mhz = u32::try_from(self.freq)
            .map_err(|_| Error::range("frequency (MHz)", self.freq, "1..=4294967295"))?;
        let symbol_rate_ksps = u32::try_from(self.sr)
            .map_err(|_| Error::range("symbol rate (ksps)", self.sr, "1..=4294967295"))?;
        let system: DeliverySystem = self.system.parse()?;
        let modulation = match self.modulation.as_deref() {
            Some(m) => m.parse()?,
            None => default_modulation(system),
        };
        Ok(Transponder::new(
            frequency_mhz,
            self.pol.parse()?,
            symbol_rate_ksps,
            self.fec,
            system,
            modulation,
        )?
        .with_note(self.note))
    }
}

/// An ordered, read-only list of transponders for one satellite.
#[derive(Debug, Clone, PartialEq)]
pub struct TransponderCatalog {
    satellite: String,
    transponders: Vec<Transponder>,
}

impl TransponderCatalog {
    /// Rejects a list that names the same frequency and polarization twice.
    pub fn new(satellite: impl Into<String>, transponders: Vec<Transponder>) -> Result<Self> {
        let mut seen = HashSet::new();
        for tp in &transponders {
            if !seen.insert((tp.frequency_mhz(), tp.polarization())) {
                return Err(Error::Catalog(format!(
                    "duplicate transponder {} MHz {}",
                    tp.frequency_mhz(),
                    tp.polarization()
                )));
            }
        }
        Ok(TransponderCatalog {
            satellite: satellite.into(),
            transponders,
        })
    }

    /// The Türksat 42°E list shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_TURKSAT)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(content)?;
        let transponders = file
            .transponders
            .into_iter()
            .map(CatalogEntry::into_transponder)
            .collect::<Result<Vec<_>>>()?;
        Self::new(file.satellite.unwrap_or_default(), transponders)
    }

    /// dvbv5 scan file: one `[name]` block per transponder with
    /// `DELIVERY_SYSTEM`, `FREQUENCY` (kHz), `SYMBOL_RATE` (sps),
    /// `POLARIZATION`, `INNER_FEC` and `MODULATION` keys.
    pub fn from_dvbv5_str(content: &str) -> Result<Self> {
        let mut blocks: Vec<Dvbv5Block> = Vec::new();

        for (i, line) in content.lines().enumerate() {
            let trimmed = line.trim();

            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                blocks.push(Dvbv5Block::new(i + 1));
                continue;
            }

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some(block) = blocks.last_mut() else {
                continue;
            };

            let Some((key, value)) = trimmed.split_once('=') else {
                continue;
            };

            let key = key.trim();
            let value = value.trim();

            match key {
                "DELIVERY_SYSTEM" => block.delivery_system = value.to_string(),
                "FREQUENCY" => {
                    block.frequency_khz = value.parse().map_err(|e| {
                        Error::Catalog(format!("line {}: invalid FREQUENCY '{value}': {e}", i + 1))
                    })?;
                }
                "SYMBOL_RATE" => {
                    block.symbol_rate = value.parse().map_err(|e| {
                        let line = i + 1;
                        Error::Catalog(format!("line {line}: invalid SYMBOL_RATE '{value}': {e}"))
                    })?;
                }
                "POLARIZATION" => block.polarization = value.to_string(),
                "INNER_FEC" => block.inner_fec = value.to_string(),
                "MODULATION" => block.modulation = value.to_string(),
                _ => {}
            }
        }

        let transponders = blocks
            .into_iter()
            .map(Dvbv5Block::into_transponder)
            .collect::<Result<Vec<_>>>()?;
        Self::new(String::new(), transponders)
    }

    /// Load a JSON or dvbv5 file; JSON is recognised by extension or by a
    /// leading `{`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))?;
        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
            || content.trim_start().starts_with('{');
        let catalog = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_dvbv5_str(&content)?
        };
        debug!("Loaded {} transponders from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn satellite(&self) -> &str {
        &self.satellite
    }

    pub fn transponders(&self) -> &[Transponder] {
        &self.transponders
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transponder> {
        self.transponders.iter()
    }

    pub fn len(&self) -> usize {
        self.transponders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transponders.is_empty()
    }

    pub fn find(&self, frequency_mhz: u32, polarization: Polarization) -> Option<&Transponder> {
        self.transponders
            .iter()
            .find(|tp| tp.frequency_mhz() == frequency_mhz && tp.polarization() == polarization)
    }

    /// Render as a dvbv5 scan file that [`Self::from_dvbv5_str`] reads back.
    pub fn to_dvbv5(&self) -> String {
        let prefix = if self.satellite.is_empty() {
            "TP".to_string()
        } else {
            let mut s = self.satellite.clone();
            if let Some(first) = s.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            s
        };

        let mut out = String::new();
        let _ = writeln!(out, "# {} transponders", self.len());
        for tp in &self.transponders {
            let _ = writeln!(out);
            let _ = writeln!(out, "[{prefix}_{}{}]", tp.frequency_mhz(), tp.polarization());
            let _ = writeln!(out, "\tDELIVERY_SYSTEM = {}", dvbv5_delivery_system(tp.system()));
            let _ = writeln!(out, "\tFREQUENCY = {}", u64::from(tp.frequency_mhz()) * 1000);
            let _ = writeln!(out, "\tSYMBOL_RATE = {}", u64::from(tp.symbol_rate_ksps()) * 1000);
            let _ = writeln!(out, "\tPOLARIZATION = {}", dvbv5_polarization(tp.polarization()));
            let _ = writeln!(out, "\tINNER_FEC = {}", tp.fec());
            let _ = writeln!(out, "\tMODULATION = {}", dvbv5_modulation(tp.modulation()));
        }
        out
    }
}

impl<'a> IntoIterator for &'a TransponderCatalog {
    type Item = &'a Transponder;
    type IntoIter = std::slice::Iter<'a, Transponder>;

    fn into_iter(self) -> Self::IntoIter {
        self.transponders.iter()
    }
}

struct Dvbv5Block {
    line: usize,
    delivery_system: String,
    frequency_khz: u64,
    symbol_rate: u64,
    polarization: String,
    inner_fec: String,
    modulation: String,
}

impl Dvbv5Block {
    fn new(line: usize) -> Self {
        Dvbv5Block {
            line,
            delivery_system: String::new(),
            frequency_khz: 0,
            symbol_rate: 0,
            polarization: String::new(),
            inner_fec: String::new(),
            modulation: String::new(),
        }
    }

    fn into_transponder(self) -> Result<Transponder> {
        let context = |e: Error| Error::Catalog(format!("block at line {}: {e}", self.line));

        let system: DeliverySystem = self.delivery_system.parse().map_err(context)?;
        let modulation = if self.modulation.is_empty() {
            default_modulation(system)
        } else {
            self.modulation.parse().map_err(context)?
        };
        let polarization: Polarization = self.polarization.parse().map_err(context)?;
        let frequency_mhz = to_u32(self.frequency_khz / 1000, "frequency (MHz)").map_err(context)?;
        let symbol_rate_ksps =
            to_u32(self.symbol_rate / 1000, "symbol rate (ksps)").map_err(context)?;

        Transponder::new(
            frequency_mhz,
            polarization,
            symbol_rate_ksps,
            dvbv5_fec(&self.inner_fec),
            system,
            modulation,
        )
        .map_err(context)
    }
}

fn to_u32(value: u64, what: &'static str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::range(what, i64::try_from(value).unwrap_or(i64::MAX), "< 2^32"))
}

/// `FEC_3_4` and `3/4` both become `3/4`; empty means `AUTO`.
fn dvbv5_fec(s: &str) -> String {
    let s = s.trim().trim_start_matches("FEC_");
    if s.is_empty() {
        return default_fec();
    }
    s.replace('_', "/")
}

fn dvbv5_delivery_system(system: DeliverySystem) -> &'static str {
    match system {
        DeliverySystem::DvbS => "DVBS",
        // dvbv5 has no separate S2X system
        DeliverySystem::DvbS2 | DeliverySystem::DvbS2X => "DVBS2",
    }
}

fn dvbv5_polarization(pol: Polarization) -> &'static str {
    match pol {
        Polarization::Horizontal => "HORIZONTAL",
        Polarization::Vertical => "VERTICAL",
        Polarization::CircularLeft => "LEFT",
        Polarization::CircularRight => "RIGHT",
    }
}

fn dvbv5_modulation(modulation: Modulation) -> &'static str {
    match modulation {
        Modulation::Qpsk => "QPSK",
        Modulation::Psk8 => "PSK/8",
        Modulation::Apsk16 => "APSK/16",
        Modulation::Apsk32 => "APSK/32",
    }
}

/// The frequency × polarization × symbol rate × system grid of a blind scan.
#[derive(Debug, Clone, PartialEq)]
pub struct BlindSweep {
    pub start_mhz: u32,
    pub end_mhz: u32,
    pub step_mhz: u32,
    pub polarizations: Vec<Polarization>,
    pub symbol_rates_ksps: Vec<u32>,
}

impl Default for BlindSweep {
    /// Whole Ku band, 2 MHz steps, both linear polarizations.
    fn default() -> Self {
        BlindSweep {
            start_mhz: 10700,
            end_mhz: 12750,
            step_mhz: 2,
            polarizations: vec![Polarization::Horizontal, Polarization::Vertical],
            symbol_rates_ksps: COMMON_SYMBOL_RATES_KSPS.to_vec(),
        }
    }
}

impl BlindSweep {
    /// Inclusive of `end_mhz` when it falls on a step.
    pub fn frequencies(&self) -> impl Iterator<Item = u32> + '_ {
        (self.start_mhz..=self.end_mhz).step_by(self.step_mhz.max(1) as usize)
    }

    /// Frequency-major list of sweep points.
    pub fn points(&self) -> Vec<(u32, Polarization)> {
        self.frequencies()
            .flat_map(|freq| self.polarizations.iter().map(move |&pol| (freq, pol)))
            .collect()
    }

    /// Tuning candidates at one point, symbol rate outermost, FEC left to
    /// the demodulator.
    pub fn candidates_at(
        &self,
        frequency_mhz: u32,
        polarization: Polarization,
    ) -> Result<Vec<Transponder>> {
        let mut candidates =
            Vec::with_capacity(self.symbol_rates_ksps.len() * BLIND_SYSTEMS.len());
        for &sr in &self.symbol_rates_ksps {
            for (system, modulation) in BLIND_SYSTEMS {
                candidates.push(Transponder::new(
                    frequency_mhz,
                    polarization,
                    sr,
                    "AUTO",
                    system,
                    modulation,
                )?);
            }
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_catalog() {
        let catalog = TransponderCatalog::builtin().unwrap();
        assert_eq!(catalog.satellite(), "turksat");
        assert!(catalog.len() >= 12);
        let tp = catalog.find(11054, Polarization::Vertical).unwrap();
        assert_eq!(tp.symbol_rate_ksps(), 30000);
        assert_eq!(tp.system(), DeliverySystem::DvbS2);
        assert_eq!(tp.modulation(), Modulation::Psk8);
    }

    #[test]
    fn test_json_defaults() {
        let catalog = TransponderCatalog::from_json_str(
            r#"{"transponders":[{"freq":11096,"pol":"H","sr":30000,"system":"DVB-S"}]}"#,
        )
        .unwrap();
        let tp = &catalog.transponders()[0];
        assert_eq!(tp.fec(), "AUTO");
        assert_eq!(tp.modulation(), Modulation::Qpsk);
        assert_eq!(tp.note(), "");
        assert_eq!(catalog.satellite(), "");
    }

    #[test]
    fn test_json_preserves_order() {
        let catalog = TransponderCatalog::from_json_str(
            r#"{"transponders":[
                {"freq":12000,"pol":"V","sr":27500},
                {"freq":11000,"pol":"H","sr":27500}
            ]}"#,
        )
        .unwrap();
        let freqs: Vec<u32> = catalog.iter().map(|tp| tp.frequency_mhz()).collect();
        assert_eq!(freqs, vec![12000, 11000]);
    }

    #[test]
    fn test_json_negative_frequency_is_range_error() {
        let json = r#"{"transponders":[{"freq":-5,"pol":"H","sr":27500}]}"#;
        let err = TransponderCatalog::from_json_str(json).unwrap_err();
        assert!(matches!(err, Error::Range { value: -5, .. }));
    }

    #[test]
    fn test_json_zero_symbol_rate_is_range_error() {
        let json = r#"{"transponders":[{"freq":11000,"pol":"H","sr":0}]}"#;
        let err = TransponderCatalog::from_json_str(json).unwrap_err();
        assert!(matches!(err, Error::Range { .. }));
    }

    #[test]
    fn test_json_bad_polarization() {
        let json = r#"{"transponders":[{"freq":11000,"pol":"X","sr":27500}]}"#;
        let err = TransponderCatalog::from_json_str(json).unwrap_err();
        assert!(matches!(err, Error::Catalog(_)));
    }

    #[test]
    fn test_json_syntax_error() {
        assert!(matches!(
            TransponderCatalog::from_json_str("{\"transponders\": [").unwrap_err(),
            Error::Json(_)
        ));
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = TransponderCatalog::from_json_str(
            r#"{"transponders":[
                {"freq":11000,"pol":"H","sr":27500},
                {"freq":11000,"pol":"H","sr":30000}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Catalog(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn test_same_frequency_other_polarization_allowed() {
        let catalog = TransponderCatalog::from_json_str(
            r#"{"transponders":[
                {"freq":11000,"pol":"H","sr":27500},
                {"freq":11000,"pol":"V","sr":27500}
            ]}"#,
        )
        .unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = TransponderCatalog::from_json_str(r#"{"transponders":[]}"#).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_parse_dvbv5() {
        let content = "\
# comment
[Turksat_11054V]
\tDELIVERY_SYSTEM = DVBS2
\tFREQUENCY = 11054000
\tSYMBOL_RATE = 30000000
\tPOLARIZATION = VERTICAL
\tINNER_FEC = FEC_3_4
\tMODULATION = PSK/8
\tUNKNOWN_KEY = x

[CHANNEL]
\tDELIVERY_SYSTEM = DVBS
\tFREQUENCY = 12180000
\tSYMBOL_RATE = 27500000
\tPOLARIZATION = HORIZONTAL
";
        let catalog = TransponderCatalog::from_dvbv5_str(content).unwrap();
        assert_eq!(catalog.len(), 2);
        let first = &catalog.transponders()[0];
        assert_eq!(first.frequency_mhz(), 11054);
        assert_eq!(first.symbol_rate_ksps(), 30000);
        assert_eq!(first.fec(), "3/4");
        assert_eq!(first.modulation(), Modulation::Psk8);
        let second = &catalog.transponders()[1];
        assert_eq!(second.polarization(), Polarization::Horizontal);
        assert_eq!(second.fec(), "AUTO");
        assert_eq!(second.modulation(), Modulation::Qpsk);
    }

    #[test]
    fn test_parse_dvbv5_invalid_frequency() {
        let err = TransponderCatalog::from_dvbv5_str("[CHANNEL]\nFREQUENCY = abc\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_dvbv5_terrestrial_block_rejected() {
        let content = "[CHANNEL]\nDELIVERY_SYSTEM = DVBT\nFREQUENCY = 557000000\n";
        assert!(TransponderCatalog::from_dvbv5_str(content).is_err());
    }

    #[test]
    fn test_dvbv5_output_reads_back() {
        let catalog = TransponderCatalog::builtin().unwrap();
        let text = catalog.to_dvbv5();
        assert!(text.contains("[Turksat_11054V]"));
        assert!(text.contains("FREQUENCY = 11054000"));
        let parsed = TransponderCatalog::from_dvbv5_str(&text).unwrap();
        let expected: Vec<Transponder> =
            catalog.iter().map(|tp| tp.clone().with_note("")).collect();
        assert_eq!(parsed.transponders(), expected.as_slice());
    }

    #[test]
    fn test_load_by_extension_and_content() {
        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            json,
            r#"{{"satellite":"hotbird","transponders":[{{"freq":11034,"pol":"V","sr":27500}}]}}"#
        )
        .unwrap();
        assert_eq!(TransponderCatalog::load(json.path()).unwrap().satellite(), "hotbird");

        let mut conf = tempfile::NamedTempFile::new().unwrap();
        write!(
            conf,
            "[CHANNEL]\nDELIVERY_SYSTEM = DVBS\nFREQUENCY = 11034000\n\
             SYMBOL_RATE = 27500000\nPOLARIZATION = V\n"
        )
        .unwrap();
        assert_eq!(TransponderCatalog::load(conf.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            TransponderCatalog::load(Path::new("/nonexistent/tp.json")),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_default_sweep() {
        let sweep = BlindSweep::default();
        let freqs: Vec<u32> = sweep.frequencies().collect();
        assert_eq!(freqs.first(), Some(&10700));
        assert_eq!(freqs.last(), Some(&12750));
        assert_eq!(freqs.len(), 1026);
        assert_eq!(sweep.points().len(), 2052);
    }

    #[test]
    fn test_candidates_order() {
        let sweep = BlindSweep::default();
        let candidates = sweep.candidates_at(11054, Polarization::Vertical).unwrap();
        assert_eq!(candidates.len(), 18);
        assert_eq!(candidates[0].symbol_rate_ksps(), 2400);
        assert_eq!(candidates[0].system(), DeliverySystem::DvbS);
        assert_eq!(candidates[1].system(), DeliverySystem::DvbS2);
        assert_eq!(candidates[1].modulation(), Modulation::Psk8);
        assert_eq!(candidates[17].symbol_rate_ksps(), 45000);
        assert!(candidates.iter().all(|tp| tp.fec() == "AUTO"));
    }

    #[test]
    fn test_sweep_points_are_frequency_major() {
        let sweep = BlindSweep {
            start_mhz: 11000,
            end_mhz: 11004,
            step_mhz: 4,
            ..BlindSweep::default()
        };
        assert_eq!(
            sweep.points(),
            vec![
                (11000, Polarization::Horizontal),
                (11000, Polarization::Vertical),
                (11004, Polarization::Horizontal),
                (11004, Polarization::Vertical),
            ]
        );
    }
}
