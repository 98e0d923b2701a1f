use std::path::{Path, PathBuf};

use discovery::Discoverer;
use discovery::xds::kuma::{KumaError, KumaSdConfig};
use metrics::Registry;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path:?} failed, {err}")]
    Read {
        path: PathBuf,
        err: std::io::Error,
    },

    #[error("parse config {path:?} failed, {err}")]
    Parse {
        path: PathBuf,
        err: serde_yaml::Error,
    },

    #[error("kuma_sd_configs[{index}]: {err}")]
    Invalid { index: usize, err: KumaError },

    #[error("no config file specified")]
    NoConfig,
}

/// Top level of a config file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub kuma_sd_configs: Vec<KumaSdConfig>,
}

impl Config {
    pub fn load_from_str(path: impl AsRef<Path>, content: &str) -> Result<Config, ConfigError> {
        serde_yaml::from_str(content).map_err(|err| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            err,
        })
    }

    /// Loads every file and appends their discovery configs, in the order
    /// the paths are given. All errors are collected, not just the first one.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<Config, Vec<ConfigError>> {
        if paths.is_empty() {
            return Err(vec![ConfigError::NoConfig]);
        }

        let mut config = Config::default();
        let mut errors = vec![];
        for path in paths {
            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(err) => {
                    errors.push(ConfigError::Read {
                        path: path.clone(),
                        err,
                    });
                    continue;
                }
            };

            match Config::load_from_str(path, &content) {
                Ok(partial) => config.kuma_sd_configs.extend(partial.kuma_sd_configs),
                Err(err) => errors.push(err),
            }
        }

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }

    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let errors = self
            .kuma_sd_configs
            .iter()
            .enumerate()
            .filter_map(|(index, config)| {
                config
                    .validate()
                    .err()
                    .map(|err| ConfigError::Invalid { index, err })
            })
            .collect::<Vec<_>>();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Builds one discoverer per configured mechanism, all recording into
    /// `registry`.
    pub fn build(&self, registry: &Registry) -> Result<Vec<Box<dyn Discoverer>>, Vec<ConfigError>> {
        let mut discoverers: Vec<Box<dyn Discoverer>> = Vec::with_capacity(self.kuma_sd_configs.len());
        let mut errors = vec![];

        for (index, config) in self.kuma_sd_configs.iter().enumerate() {
            match config.build(registry) {
                Ok(discoverer) => discoverers.push(Box::new(discoverer)),
                Err(err) => errors.push(ConfigError::Invalid { index, err }),
            }
        }

        if errors.is_empty() {
            Ok(discoverers)
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use discovery::http::Auth;
    use discovery::xds::ProtocolVersion;
    use discovery::xds::kuma::MadsApiVersion;
    use pretty_assertions::assert_eq;

    use super::*;

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("xds-sd-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parse() {
        let content = r#"
kuma_sd_configs:
  - server: http://kuma-control-plane.kuma-system.svc:5676
    client_id: prometheus-01
    refresh_interval: 15s
  - server: https://kuma.example.com:5676
    client_name: prometheus-02
    auth:
      strategy: bearer
      token: abcd
"#;

        let config = Config::load_from_str("test.yaml", content).unwrap();
        assert_eq!(config.kuma_sd_configs.len(), 2);

        let first = &config.kuma_sd_configs[0];
        assert_eq!(first.server, "http://kuma-control-plane.kuma-system.svc:5676");
        assert_eq!(first.client_id, "prometheus-01");
        assert_eq!(first.refresh_interval, Duration::from_secs(15));
        assert_eq!(first.api_version, MadsApiVersion::V1);
        assert_eq!(first.protocol_version, ProtocolVersion::V3);
        assert_eq!(first.auth, None);

        let second = &config.kuma_sd_configs[1];
        assert_eq!(second.client_id, "prometheus-02");
        assert_eq!(second.refresh_interval, Duration::from_secs(30));
        assert_eq!(
            second.auth,
            Some(Auth::Bearer {
                token: "abcd".to_string()
            })
        );

        config.validate().unwrap();
    }

    #[test]
    fn empty_file() {
        let config = Config::load_from_str("empty.yaml", "{}").unwrap();
        assert!(config.kuma_sd_configs.is_empty());
    }

    #[test]
    fn unknown_field() {
        let content = r#"
kuma_sd_configs:
  - server: http://localhost:5676
    client_id: test
    foo: bar
"#;

        let err = Config::load_from_str("unknown.yaml", content).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = Config::load_from_str("unknown.yaml", "consul_sd_configs: []").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn unsupported_versions() {
        let content = r#"
kuma_sd_configs:
  - server: http://localhost:5676
    client_id: test
    api_version: v2
"#;
        assert!(Config::load_from_str("api.yaml", content).is_err());

        let content = r#"
kuma_sd_configs:
  - server: http://localhost:5676
    client_id: test
    protocol_version: v2
"#;
        assert!(Config::load_from_str("protocol.yaml", content).is_err());
    }

    #[test]
    fn load_and_merge() {
        let first = write_temp(
            "first.yaml",
            "kuma_sd_configs:\n  - server: http://a:5676\n    client_id: a\n",
        );
        let second = write_temp(
            "second.yaml",
            "kuma_sd_configs:\n  - server: http://b:5676\n    client_id: b\n",
        );

        let config = Config::load_from_paths(&[first, second]).unwrap();
        let servers = config
            .kuma_sd_configs
            .iter()
            .map(|config| config.server.as_str())
            .collect::<Vec<_>>();
        assert_eq!(servers, vec!["http://a:5676", "http://b:5676"]);
    }

    #[test]
    fn load_collects_errors() {
        let broken = write_temp("broken.yaml", "kuma_sd_configs: [");
        let missing = PathBuf::from("/this/path/does/not/exist.yaml");

        let errs = Config::load_from_paths(&[broken, missing]).unwrap_err();
        assert_eq!(errs.len(), 2);
        assert!(matches!(errs[0], ConfigError::Parse { .. }));
        assert!(matches!(errs[1], ConfigError::Read { .. }));

        let errs = Config::load_from_paths(&[]).unwrap_err();
        assert!(matches!(errs[0], ConfigError::NoConfig));
    }

    #[tokio::test]
    async fn validate_reports_index() {
        let content = r#"
kuma_sd_configs:
  - server: http://localhost:5676
    client_id: good
  - server: ftp://localhost:5676
    client_id: bad-scheme
  - server: http://localhost:5676
    client_id: ""
"#;

        let config = Config::load_from_str("invalid.yaml", content).unwrap();
        let errs = config.validate().unwrap_err();
        let indexes = errs
            .iter()
            .map(|err| match err {
                ConfigError::Invalid { index, .. } => *index,
                _ => usize::MAX,
            })
            .collect::<Vec<_>>();
        assert_eq!(indexes, vec![1, 2]);
        assert!(errs[0].to_string().starts_with("kuma_sd_configs[1]: "));

        let registry = Registry::new();
        assert_eq!(config.build(&registry).err().map(|errs| errs.len()), Some(2));
    }

    #[tokio::test]
    async fn build() {
        let content = r#"
kuma_sd_configs:
  - server: http://localhost:5676
    client_id: a
  - server: http://localhost:5677
    client_id: b
"#;

        let config = Config::load_from_str("build.yaml", content).unwrap();
        let registry = Registry::new();
        let discoverers = config.build(&registry).unwrap();
        assert_eq!(discoverers.len(), 2);
    }
}
