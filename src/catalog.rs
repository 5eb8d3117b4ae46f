use std::collections::HashSet;

use camino::Utf8Path;
use tracing::warn;

use crate::domain::RegionCode;
use crate::error::EtlError;

/// 2010 state, District of Columbia and island-area FIPS codes with TIGER tract files.
const STATE_FIPS_2010: &[&str] = &[
    "01", "02", "04", "05", "06", "08", "09", "10", "11", "12", "13", "15", "16", "17", "18",
    "19", "20", "21", "22", "23", "24", "25", "26", "27", "28", "29", "30", "31", "32", "33",
    "34", "35", "36", "37", "38", "39", "40", "41", "42", "44", "45", "46", "47", "48", "49",
    "50", "51", "53", "54", "55", "56", "60", "66", "69", "72", "78",
];

/// Fixed, ordered set of regions partitioning the national dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionCatalog {
    codes: Vec<RegionCode>,
}

impl RegionCatalog {
    pub fn builtin() -> Self {
        let codes = STATE_FIPS_2010
            .iter()
            .map(|code| RegionCode::new_unchecked(code))
            .collect();
        Self { codes }
    }

    /// Builds a catalog from explicit codes, dropping repeats.
    pub fn from_codes(codes: impl IntoIterator<Item = RegionCode>) -> Self {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for code in codes {
            if seen.insert(code.clone()) {
                unique.push(code);
            } else {
                warn!(region = %code, "duplicate region code in catalog, ignoring");
            }
        }
        Self { codes: unique }
    }

    /// Reads a headered reference CSV whose first column is the FIPS code
    /// (the layout of `fips_states_2010.csv`).
    pub fn from_csv(path: &Utf8Path) -> Result<Self, EtlError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path.as_std_path())
            .map_err(|err| EtlError::Filesystem(format!("open {path}: {err}")))?;

        let mut codes = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| EtlError::Filesystem(format!("{path}: {err}")))?;
            let Some(fips) = record.get(0) else {
                continue;
            };
            if fips.is_empty() {
                continue;
            }
            codes.push(fips.parse::<RegionCode>()?);
        }
        Ok(Self::from_codes(codes))
    }

    pub fn codes(&self) -> &[RegionCode] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn contains(&self, code: &RegionCode) -> bool {
        self.codes.contains(code)
    }
}
