use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarization {
    #[serde(rename = "H")]
    Horizontal,
    #[serde(rename = "V")]
    Vertical,
    #[serde(rename = "L")]
    CircularLeft,
    #[serde(rename = "R")]
    CircularRight,
}

impl Polarization {
    pub fn letter(self) -> char {
        match self {
            Polarization::Horizontal => 'H',
            Polarization::Vertical => 'V',
            Polarization::CircularLeft => 'L',
            Polarization::CircularRight => 'R',
        }
    }

    /// H and L are selected with 18 V on the LNB, V and R with 13 V.
    pub fn voltage(self) -> Voltage {
        match self {
            Polarization::Horizontal | Polarization::CircularLeft => Voltage::V18,
            Polarization::Vertical | Polarization::CircularRight => Voltage::V13,
        }
    }
}

impl fmt::Display for Polarization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for Polarization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "H" | "HORIZONTAL" => Ok(Polarization::Horizontal),
            "V" | "VERTICAL" => Ok(Polarization::Vertical),
            "L" | "LEFT" | "CIRCULAR_LEFT" => Ok(Polarization::CircularLeft),
            "R" | "RIGHT" | "CIRCULAR_RIGHT" => Ok(Polarization::CircularRight),
            _ => Err(Error::Catalog(format!("unknown polarization '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Voltage {
    V13,
    V18,
    Off,
}

impl fmt::Display for Voltage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Voltage::V13 => write!(f, "13V"),
            Voltage::V18 => write!(f, "18V"),
            Voltage::Off => write!(f, "off"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliverySystem {
    #[serde(rename = "DVB-S")]
    DvbS,
    #[serde(rename = "DVB-S2")]
    DvbS2,
    #[serde(rename = "DVB-S2X")]
    DvbS2X,
}

impl fmt::Display for DeliverySystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliverySystem::DvbS => "DVB-S",
            DeliverySystem::DvbS2 => "DVB-S2",
            DeliverySystem::DvbS2X => "DVB-S2X",
        };
        f.write_str(s)
    }
}

impl FromStr for DeliverySystem {
    type Err = Error;

    /// Accepts both the "DVB-S2" spelling and the dvbv5 "DVBS2" spelling.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "").as_str() {
            "DVBS" => Ok(DeliverySystem::DvbS),
            "DVBS2" => Ok(DeliverySystem::DvbS2),
            "DVBS2X" => Ok(DeliverySystem::DvbS2X),
            _ => Err(Error::Catalog(format!("unknown delivery system '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modulation {
    #[serde(rename = "QPSK")]
    Qpsk,
    #[serde(rename = "8PSK")]
    Psk8,
    #[serde(rename = "16APSK")]
    Apsk16,
    #[serde(rename = "32APSK")]
    Apsk32,
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Modulation::Qpsk => "QPSK",
            Modulation::Psk8 => "8PSK",
            Modulation::Apsk16 => "16APSK",
            Modulation::Apsk32 => "32APSK",
        };
        f.write_str(s)
    }
}

impl FromStr for Modulation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace(['/', '_'], "").as_str() {
            "QPSK" => Ok(Modulation::Qpsk),
            "8PSK" | "PSK8" => Ok(Modulation::Psk8),
            "16APSK" | "APSK16" => Ok(Modulation::Apsk16),
            "32APSK" | "APSK32" => Ok(Modulation::Apsk32),
            _ => Err(Error::Catalog(format!("unknown modulation '{s}'"))),
        }
    }
}

/// Local oscillator plan of a Ku-band LNB, all values in MHz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LnbProfile {
    pub low_lo_mhz: u32,
    pub high_lo_mhz: u32,
    pub switch_mhz: u32,
}

impl LnbProfile {
    pub const UNIVERSAL: LnbProfile = LnbProfile {
        low_lo_mhz: 9750,
        high_lo_mhz: 10600,
        switch_mhz: 11700,
    };
}

impl Default for LnbProfile {
    fn default() -> Self {
        LnbProfile::UNIVERSAL
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Transponder {
    frequency_mhz: u32,
    polarization: Polarization,
    symbol_rate_ksps: u32,
    fec: String,
    system: DeliverySystem,
    modulation: Modulation,
    note: String,
}

impl Transponder {
    pub fn new(
        frequency_mhz: u32,
        polarization: Polarization,
        symbol_rate_ksps: u32,
        fec: impl Into<String>,
        system: DeliverySystem,
        modulation: Modulation,
    ) -> Result<Self> {
        if frequency_mhz == 0 {
            return Err(Error::range("frequency (MHz)", frequency_mhz, "> 0"));
        }
        if symbol_rate_ksps == 0 {
            return Err(Error::range("symbol rate (ksps)", symbol_rate_ksps, "> 0"));
        }
        Ok(Transponder {
            frequency_mhz,
            polarization,
            symbol_rate_ksps,
            fec: fec.into(),
            system,
            modulation,
            note: String::new(),
        })
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn frequency_mhz(&self) -> u32 {
        self.frequency_mhz
    }

    pub fn polarization(&self) -> Polarization {
        self.polarization
    }

    pub fn symbol_rate_ksps(&self) -> u32 {
        self.symbol_rate_ksps
    }

    pub fn fec(&self) -> &str {
        &self.fec
    }

    pub fn system(&self) -> DeliverySystem {
        self.system
    }

    pub fn modulation(&self) -> Modulation {
        self.modulation
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn voltage(&self) -> Voltage {
        self.polarization.voltage()
    }

    pub fn is_high_band(&self, lnb: &LnbProfile) -> bool {
        self.frequency_mhz >= lnb.switch_mhz
    }

    /// The 22 kHz tone selects the high band local oscillator.
    pub fn tone(&self, lnb: &LnbProfile) -> bool {
        self.is_high_band(lnb)
    }

    /// Frequency after down-conversion in the LNB, in MHz.
    pub fn if_frequency_mhz(&self, lnb: &LnbProfile) -> u32 {
        let lo = if self.is_high_band(lnb) {
            lnb.high_lo_mhz
        } else {
            lnb.low_lo_mhz
        };
        self.frequency_mhz.abs_diff(lo)
    }
}

impl fmt::Display for Transponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} MHz {} SR:{} {} {} {}",
            self.frequency_mhz,
            self.polarization,
            self.symbol_rate_ksps,
            self.fec,
            self.system,
            self.modulation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tp(freq: u32, pol: Polarization) -> Transponder {
        Transponder::new(freq, pol, 27500, "3/4", DeliverySystem::DvbS2, Modulation::Psk8).unwrap()
    }

    #[test]
    fn test_rejects_zero_frequency() {
        let err = Transponder::new(
            0,
            Polarization::Horizontal,
            27500,
            "3/4",
            DeliverySystem::DvbS,
            Modulation::Qpsk,
        );
        assert!(matches!(err, Err(Error::Range { .. })));
    }

    #[test]
    fn test_rejects_zero_symbol_rate() {
        let err = Transponder::new(
            11054,
            Polarization::Vertical,
            0,
            "3/4",
            DeliverySystem::DvbS,
            Modulation::Qpsk,
        );
        assert!(matches!(err, Err(Error::Range { .. })));
    }

    #[test]
    fn test_voltage_follows_polarization() {
        assert_eq!(tp(11054, Polarization::Horizontal).voltage(), Voltage::V18);
        assert_eq!(tp(11054, Polarization::Vertical).voltage(), Voltage::V13);
        assert_eq!(tp(11054, Polarization::CircularLeft).voltage(), Voltage::V18);
        assert_eq!(tp(11054, Polarization::CircularRight).voltage(), Voltage::V13);
    }

    #[test]
    fn test_band_threshold() {
        let lnb = LnbProfile::UNIVERSAL;
        assert!(!tp(11699, Polarization::Horizontal).is_high_band(&lnb));
        assert!(tp(11700, Polarization::Horizontal).is_high_band(&lnb));
        assert!(tp(11762, Polarization::Vertical).tone(&lnb));
        assert!(!tp(10970, Polarization::Vertical).tone(&lnb));
    }

    #[test]
    fn test_if_frequency() {
        let lnb = LnbProfile::UNIVERSAL;
        assert_eq!(tp(10970, Polarization::Vertical).if_frequency_mhz(&lnb), 1220);
        assert_eq!(tp(11762, Polarization::Vertical).if_frequency_mhz(&lnb), 1162);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("h".parse::<Polarization>().unwrap(), Polarization::Horizontal);
        assert_eq!("DVBS2".parse::<DeliverySystem>().unwrap(), DeliverySystem::DvbS2);
        assert_eq!("DVB-S2X".parse::<DeliverySystem>().unwrap(), DeliverySystem::DvbS2X);
        assert_eq!("PSK/8".parse::<Modulation>().unwrap(), Modulation::Psk8);
        assert_eq!("16APSK".parse::<Modulation>().unwrap(), Modulation::Apsk16);
        assert!("QAM/64".parse::<Modulation>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            tp(11054, Polarization::Horizontal).to_string(),
            "11054 MHz H SR:27500 3/4 DVB-S2 8PSK"
        );
    }
}
