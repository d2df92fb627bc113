//! Persistent configuration: the list-source map, the VO→tenant mapping,
//! and the small set of top-level settings the CLI reads at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::catalog::VoMapping;
use crate::source::ListSourceConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot open file {file}: {source}")]
    CannotOpenFile {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {file} as YAML: {source}")]
    InvalidYaml {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Top-level settings: where the cache lives, where CA certificates live,
/// and which dispatchers are enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub cache_dir: PathBuf,
    pub ca_dir: PathBuf,
    #[serde(default = "default_dispatchers")]
    pub dispatchers: Vec<String>,
    #[serde(default)]
    pub global_prefix: String,
    /// VO name -> tenant/project id file, consulted by the `catalog`
    /// dispatcher. No VOs are mapped when absent.
    #[serde(default)]
    pub vo_mapping_path: Option<PathBuf>,
}

fn default_dispatchers() -> Vec<String> {
    vec!["noop".to_string()]
}

impl Settings {
    pub fn default_paths() -> Self {
        let dirs = directories::ProjectDirs::from("org", "atrope", "atrope")
            .expect("a valid home directory is required");
        Settings {
            cache_dir: dirs.cache_dir().join("lists"),
            ca_dir: PathBuf::from("/etc/grid-security/certificates"),
            dispatchers: default_dispatchers(),
            global_prefix: String::new(),
            vo_mapping_path: None,
        }
    }
}

/// Reads the dispatcher/client settings file; callers fall back to
/// `Settings::default_paths()` when it doesn't exist.
pub fn read_settings_file(path: &Path) -> Result<Settings, ConfigError> {
    let file = std::fs::File::open(path).map_err(|e| ConfigError::CannotOpenFile {
        file: path.display().to_string(),
        source: e,
    })?;
    serde_yaml::from_reader(file).map_err(|e| ConfigError::InvalidYaml {
        file: path.display().to_string(),
        source: e,
    })
}

/// Reads and writes the YAML file mapping list name -> `ListSourceConfig`.
pub fn read_sources_file(path: &Path) -> Result<HashMap<String, ListSourceConfig>, ConfigError> {
    let file = std::fs::File::open(path).map_err(|e| ConfigError::CannotOpenFile {
        file: path.display().to_string(),
        source: e,
    })?;
    serde_yaml::from_reader(file).map_err(|e| ConfigError::InvalidYaml {
        file: path.display().to_string(),
        source: e,
    })
}

pub fn write_sources_file(
    path: &Path,
    sources: &HashMap<String, ListSourceConfig>,
) -> Result<(), ConfigError> {
    let file = std::fs::File::create(path).map_err(|e| ConfigError::CannotOpenFile {
        file: path.display().to_string(),
        source: e,
    })?;
    serde_yaml::to_writer(file, sources).map_err(|e| ConfigError::InvalidYaml {
        file: path.display().to_string(),
        source: e,
    })
}

/// Reads the optional VO name -> tenant/project id mapping file used by the
/// image-catalog dispatcher.
pub fn read_vo_mapping(path: &Path) -> Result<VoMapping, ConfigError> {
    let file = std::fs::File::open(path).map_err(|e| ConfigError::CannotOpenFile {
        file: path.display().to_string(),
        source: e,
    })?;
    serde_yaml::from_reader(file).map_err(|e| ConfigError::InvalidYaml {
        file: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endorser::ExpectedEndorser;

    #[test]
    fn round_trips_sources_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lists.yaml");

        let mut sources = HashMap::new();
        sources.insert(
            "egi".to_string(),
            ListSourceConfig {
                url: "https://example.org/list.smime".to_string(),
                enabled: true,
                endorser: ExpectedEndorser {
                    dn: "/O=Org/CN=Endorser".to_string(),
                    ca: "/O=CA".to_string(),
                },
                token: None,
                prefix: String::new(),
                project: None,
                subscribed_images: vec![],
            },
        );

        write_sources_file(&path, &sources).expect("write ok");
        let loaded = read_sources_file(&path).expect("read ok");
        assert_eq!(loaded.get("egi").unwrap().url, sources["egi"].url);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = read_sources_file(Path::new("/nonexistent/lists.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::CannotOpenFile { .. }));
    }
}
