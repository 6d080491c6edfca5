use crate::error::{Error, Result};

/// A geostationary satellite the dish can be pointed at.
#[derive(Debug, Clone, PartialEq)]
pub struct SatellitePosition {
    pub key: &'static str,
    pub name: &'static str,
    /// Orbital longitude in degrees, east positive.
    pub longitude_deg: f64,
    pub lnb: &'static str,
    /// Fixed input on a DiSEqC switch, if the satellite has a dedicated LNB.
    pub switch_port: Option<u8>,
}

impl SatellitePosition {
    pub fn orbital_position(&self) -> String {
        let direction = if self.longitude_deg >= 0.0 { 'E' } else { 'W' };
        format!("{:.1}°{direction}", self.longitude_deg.abs())
    }
}

const fn sat(
    key: &'static str,
    name: &'static str,
    longitude_deg: f64,
    switch_port: Option<u8>,
) -> SatellitePosition {
    SatellitePosition {
        key,
        name,
        longitude_deg,
        lnb: "Universal",
        switch_port,
    }
}

pub static SATELLITES: &[SatellitePosition] = &[
    sat("turksat", "Türksat 4A/5A/6A", 42.0, Some(0)),
    sat("hotbird", "Eutelsat Hot Bird", 13.0, Some(1)),
    sat("astra_19", "Astra 1 (19.2°E)", 19.2, Some(2)),
    sat("astra_28", "Astra 2 (28.2°E)", 28.2, Some(3)),
    sat("eutelsat_7", "Eutelsat 7A", 7.0, None),
    sat("amos", "Amos (4°W)", -4.0, None),
    sat("nilesat", "Nilesat (7°W)", -7.0, None),
    sat("badr", "Badr/Arabsat (26°E)", 26.0, None),
    sat("hellas", "Hellas Sat (39°E)", 39.0, None),
    sat("yamal", "Yamal 402 (55°E)", 55.0, None),
];

pub fn known_keys() -> Vec<String> {
    SATELLITES.iter().map(|s| s.key.to_string()).collect()
}

/// Case-insensitive lookup by key.
pub fn find(key: &str) -> Result<&'static SatellitePosition> {
    SATELLITES
        .iter()
        .find(|s| s.key.eq_ignore_ascii_case(key.trim()))
        .ok_or_else(|| Error::NotFound {
            kind: "satellite",
            key: key.to_string(),
            known: known_keys(),
        })
}
