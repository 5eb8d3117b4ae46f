use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::catalog::RegionCatalog;
use crate::census::{CensusSettings, DEFAULT_SOURCE_BASE_URL};
use crate::domain::RegionCode;
use crate::error::EtlError;
use crate::index::{DEFAULT_REGION_FIELD, DEFAULT_TRACT_ID_FIELD};
use crate::layout::DataLayout;
use crate::writer::NationalCsvPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "tract-etl.json";
pub const DEFAULT_DATA_ROOT: &str = "data";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub data_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub source_base_url: Option<String>,
    /// Local directory holding the source archives; replaces HTTP retrieval.
    #[serde(default)]
    pub source_mirror: Option<Utf8PathBuf>,
    #[serde(default)]
    pub regions: Option<Vec<String>>,
    #[serde(default)]
    pub fips_csv: Option<Utf8PathBuf>,
    #[serde(default)]
    pub parallel_conversion: Option<bool>,
    #[serde(default)]
    pub use_cached_sources: Option<bool>,
    #[serde(default)]
    pub tract_id_field: Option<String>,
    #[serde(default)]
    pub region_field: Option<String>,
    #[serde(default)]
    pub national_csv_policy: Option<NationalCsvPolicy>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_root: Utf8PathBuf,
    pub source_base_url: String,
    pub source_mirror: Option<Utf8PathBuf>,
    pub catalog: RegionCatalog,
    pub parallel_conversion: bool,
    pub use_cached_sources: bool,
    pub tract_id_field: String,
    pub region_field: String,
    pub national_csv_policy: NationalCsvPolicy,
}

impl ResolvedConfig {
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_root)
    }

    pub fn settings(&self) -> CensusSettings {
        CensusSettings {
            source_base_url: self.source_base_url.clone(),
            parallel_conversion: self.parallel_conversion,
            tract_id_field: self.tract_id_field.clone(),
            region_field: self.region_field.clone(),
            national_csv_policy: self.national_csv_policy,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `tract-etl.json` in the current directory when no
    /// path is given. Only an explicitly named file is required to exist.
    pub fn resolve(path: Option<&Utf8Path>) -> Result<ResolvedConfig, EtlError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| EtlError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| EtlError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    /// Region precedence: explicit `regions`, then `fips_csv`, then the
    /// built-in catalog.
    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, EtlError> {
        let catalog = match (config.regions, config.fips_csv) {
            (Some(regions), _) => RegionCatalog::from_codes(
                regions
                    .iter()
                    .map(|code| code.parse::<RegionCode>())
                    .collect::<Result<Vec<_>, EtlError>>()?,
            ),
            (None, Some(csv)) => RegionCatalog::from_csv(&csv)?,
            (None, None) => RegionCatalog::builtin(),
        };

        Ok(ResolvedConfig {
            data_root: config
                .data_root
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DATA_ROOT)),
            source_base_url: config
                .source_base_url
                .unwrap_or_else(|| DEFAULT_SOURCE_BASE_URL.to_string()),
            source_mirror: config.source_mirror,
            catalog,
            parallel_conversion: config.parallel_conversion.unwrap_or(false),
            use_cached_sources: config.use_cached_sources.unwrap_or(true),
            tract_id_field: config
                .tract_id_field
                .unwrap_or_else(|| DEFAULT_TRACT_ID_FIELD.to_string()),
            region_field: config
                .region_field
                .unwrap_or_else(|| DEFAULT_REGION_FIELD.to_string()),
            national_csv_policy: config.national_csv_policy.unwrap_or_default(),
        })
    }
}
