use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinates {
    /// Parses the `"lat, lon"` form used by DNO open-data exports.
    pub fn parse(value: &str) -> Option<Self> {
        let (lat, lon) = value.split_once(',')?;
        let lat = lat.trim().parse::<f64>().ok()?;
        let lon = lon.trim().parse::<f64>().ok()?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(Self { lon, lat })
    }
}

/// Public attributes of a grid or primary substation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstationRecord {
    pub sitefunctionallocation: String,
    pub licencearea: Option<String>,
    pub sitename: Option<String>,
    pub sitetype: Option<String>,
    pub sitevoltage: Option<i64>,
    pub esqcroverallrisk: Option<String>,
    pub gridref: Option<String>,
    pub siteassetcount: Option<i64>,
    pub powertransformercount: Option<i64>,
    pub electricalassetcount: Option<i64>,
    pub civilassetcount: Option<i64>,
    pub street: Option<String>,
    pub suburb: Option<String>,
    pub towncity: Option<String>,
    pub county: Option<String>,
    pub postcode: Option<String>,
    pub yearcommissioned: Option<String>,
    pub datecommissioned: Option<String>,
    pub siteclassification: Option<String>,
    pub assessmentdate: Option<String>,
    pub last_report: Option<String>,
    pub calculatedresistance: Option<String>,
    pub measuredresistance_ohm: Option<f64>,
    pub next_assessmentdate: Option<String>,
    pub easting: Option<String>,
    pub northing: Option<String>,
    pub transratingwinter: Option<String>,
    pub transratingsummer: Option<String>,
    pub reversepower: Option<String>,
    pub maxdemandsummer: Option<String>,
    pub maxdemandwinter: Option<String>,
    pub spatial_coordinates: Option<Coordinates>,
    pub local_authority: Option<String>,
    pub local_authority_code: Option<String>,
    pub what3words: Option<String>,
}

/// Stored substation: a sequential id plus its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substation {
    pub id: u64,
    #[serde(flatten)]
    pub record: SubstationRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_parse_lat_then_lon() {
        let coords = Coordinates::parse("52.0342568413421, 1.16325674714046").expect("valid");
        assert_eq!(coords.lat, 52.0342568413421);
        assert_eq!(coords.lon, 1.16325674714046);
    }

    #[test]
    fn coordinates_reject_out_of_range_values() {
        assert!(Coordinates::parse("152.0, 1.0").is_none());
        assert!(Coordinates::parse("not a point").is_none());
    }
}
