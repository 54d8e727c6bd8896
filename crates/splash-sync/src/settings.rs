//! Durable key/value settings kept in a single YAML section.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const SETTINGS_SECTION: &str = "SplashUtilities";
pub const SETTINGS_FILE_NAME: &str = "splashutilities.yaml";
pub const LOG_FILE_NAME: &str = "splashutilities.log";
pub const APP_DIR_NAME: &str = "SplashUtilities";
pub const CONFIG_ENV_VAR: &str = "SPLASH_UTILITIES_CONFIG";

pub const DEFAULTS: [(&str, &str); 13] = [
    ("splash_db", "SampleDB.sqlite"),
    ("splash_db_driver", "{SQLite3 ODBC Driver}"),
    ("csv_file", "ClubList.csv"),
    ("Theme", "System"),
    ("Scaling", "100%"),
    ("Colour", "blue"),
    ("client_id", ""),
    ("update_database", "False"),
    ("update_sdms", "False"),
    ("rollback_file", "rollback.csv"),
    ("para_level", "3"),
    ("home_nation", "CAN"),
    ("log_file", ""),
];

const BOOL_KEYS: [&str; 2] = ["update_database", "update_sdms"];

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("reading settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing settings {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("serializing settings: {0}")]
    Serialize(#[source] serde_yaml::Error),
    #[error("unknown setting {0}")]
    Unknown(String),
    #[error("invalid value {value:?} for {key}: expected {expected}")]
    Invalid {
        key: String,
        value: String,
        expected: String,
    },
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
}

type SettingsFile = BTreeMap<String, BTreeMap<String, serde_yaml::Value>>;

#[derive(Debug, Clone)]
pub struct Settings {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl Settings {
    /// `$SPLASH_UTILITIES_CONFIG`, else the platform config directory.
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
            .ok_or(SettingsError::NoConfigDir)
    }

    /// Defaults only, not backed by a saved file yet.
    pub fn with_defaults(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: DEFAULTS
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }

    /// Load saved values over the defaults. A missing file is not an error.
    /// A client id is generated and saved on first load.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let mut settings = Self::with_defaults(path);
        match fs::read_to_string(&settings.path) {
            Ok(text) => settings.merge_yaml(&text)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %settings.path.display(), "no saved settings, using defaults");
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: settings.path.clone(),
                    source,
                })
            }
        }

        if Uuid::parse_str(settings.client_id()).is_err() {
            let client_id = Uuid::new_v4().to_string();
            info!(%client_id, "generated client id");
            settings.values.insert("client_id".to_string(), client_id);
            settings.save()?;
        }
        Ok(settings)
    }

    fn merge_yaml(&mut self, text: &str) -> Result<(), SettingsError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let mut file: SettingsFile = serde_yaml::from_str(text).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let Some(section) = file.remove(SETTINGS_SECTION) else {
            return Ok(());
        };
        for (key, value) in section {
            let value = match value {
                serde_yaml::Value::Null => String::new(),
                serde_yaml::Value::Bool(true) => "True".to_string(),
                serde_yaml::Value::Bool(false) => "False".to_string(),
                serde_yaml::Value::Number(number) => number.to_string(),
                serde_yaml::Value::String(text) => text,
                other => {
                    return Err(SettingsError::Invalid {
                        key,
                        value: format!("{other:?}"),
                        expected: "a scalar value".to_string(),
                    })
                }
            };
            self.values.insert(key, value);
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = BTreeMap::from([(SETTINGS_SECTION, &self.values)]);
        let text = serde_yaml::to_string(&file).map_err(SettingsError::Serialize)?;
        fs::write(&self.path, text).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log file from `log_file`, else next to the settings file.
    pub fn log_path(&self) -> PathBuf {
        match self.values.get("log_file").map(|v| v.trim()) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => self.path.with_file_name(LOG_FILE_NAME),
        }
    }

    pub fn client_id(&self) -> &str {
        self.values.get("client_id").map(String::as_str).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.values.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn get_str(&self, key: &str) -> Result<&str, SettingsError> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| SettingsError::Unknown(key.to_string()))
    }

    pub fn get_int(&self, key: &str) -> Result<i64, SettingsError> {
        let value = self.get_str(key)?;
        value.trim().parse().map_err(|_| invalid(key, value, "an integer"))
    }

    pub fn get_float(&self, key: &str) -> Result<f64, SettingsError> {
        let value = self.get_str(key)?;
        value.trim().parse().map_err(|_| invalid(key, value, "a number"))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, SettingsError> {
        let value = self.get_str(key)?;
        parse_bool(value).ok_or_else(|| invalid(key, value, "a boolean"))
    }

    /// Set a known key after validating enumerated and boolean values.
    pub fn set_str(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        if !self.values.contains_key(key) {
            return Err(SettingsError::Unknown(key.to_string()));
        }
        let value = validate(key, value)?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn set_int(&mut self, key: &str, value: i64) -> Result<(), SettingsError> {
        self.set_str(key, &value.to_string())
    }

    pub fn set_float(&mut self, key: &str, value: f64) -> Result<(), SettingsError> {
        self.set_str(key, &value.to_string())
    }

    pub fn set_bool(&mut self, key: &str, value: bool) -> Result<(), SettingsError> {
        self.set_str(key, if value { "True" } else { "False" })
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(key: &str, value: &str, expected: &str) -> SettingsError {
    SettingsError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

fn one_of(key: &str, value: &str, allowed: &[&str]) -> Result<String, SettingsError> {
    if allowed.contains(&value) {
        Ok(value.to_string())
    } else {
        Err(invalid(key, value, &format!("one of {}", allowed.join(", "))))
    }
}

fn validate(key: &str, value: &str) -> Result<String, SettingsError> {
    match key {
        "Theme" => one_of(key, value, &["Light", "Dark", "System"]),
        "Scaling" => one_of(key, value, &["80%", "90%", "100%", "110%", "120%"]),
        "Colour" => one_of(key, value, &["blue", "green", "dark-blue"]),
        "para_level" => one_of(key, value, &["1", "2", "3", "Int"]),
        "client_id" => Uuid::parse_str(value)
            .map(|id| id.to_string())
            .map_err(|_| invalid(key, value, "a UUID")),
        key if BOOL_KEYS.contains(&key) => match parse_bool(value) {
            Some(true) => Ok("True".to_string()),
            Some(false) => Ok("False".to_string()),
            None => Err(invalid(key, value, "a boolean")),
        },
        _ => Ok(value.to_string()),
    }
}
