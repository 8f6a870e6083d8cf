use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::*;
use crate::fields::*;
use crate::time::*;

/// Parser configuration. Every key is optional in the JSON form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    /// Protocol versions to accept, any of 5, 9 and 10
    pub versions: Vec<u16>,
    pub switched_times_from_uptime: bool,
    pub switched_time_precision: TimePrecision,
    pub cache_ttl_secs: Option<u64>,
    pub cache_max_templates_per_exporter: Option<usize>,
    pub definitions: Vec<FieldExtension>,
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            versions: vec![5, 9, 10],
            switched_times_from_uptime: false,
            switched_time_precision: TimePrecision::Integer,
            cache_ttl_secs: None,
            cache_max_templates_per_exporter: None,
            definitions: Vec::new(),
        }
    }
}

impl ParserSettings {
    pub fn from_json_str(json: &str) -> std::result::Result<Self, SettingsError> {
        let settings: ParserSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads settings from `path`, writing the defaults there first when the
    /// file does not exist yet.
    pub fn load_or_create(path: impl AsRef<Path>) -> std::result::Result<Self, SettingsError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => ParserSettings::from_json_str(&contents),
            Err(e) => match e.kind() {
                ErrorKind::NotFound => {
                    let settings = ParserSettings::default();
                    fs::write(path, serde_json::to_string_pretty(&settings)?)?;
                    info!("wrote default settings to {}", path.display());
                    Ok(settings)
                },
                _ => Err(SettingsError::Io(e)),
            },
        }
    }

    pub fn validate(&self) -> std::result::Result<(), SettingsError> {
        if self.versions.is_empty() {
            return Err(SettingsError::Invalid("versions must not be empty".to_string()));
        }
        if let Some(v) = self.versions.iter().find(|v| NetflowVersion::from_wire(**v).is_none()) {
            return Err(SettingsError::Invalid(format!("unsupported version {} in versions, expected 5, 9 or 10", v)));
        }
        if self.cache_ttl_secs == Some(0) {
            return Err(SettingsError::Invalid("cache_ttl_secs must be positive".to_string()));
        }
        if self.cache_max_templates_per_exporter == Some(0) {
            return Err(SettingsError::Invalid("cache_max_templates_per_exporter must be positive".to_string()));
        }
        Ok(())
    }

    pub fn accepted_versions(&self) -> Vec<NetflowVersion> {
        self.versions.iter().filter_map(|v| NetflowVersion::from_wire(*v)).collect()
    }

    pub fn time_mode(&self) -> SwitchedTimeMode {
        SwitchedTimeMode::from_settings(self.switched_times_from_uptime, self.switched_time_precision)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }
}
