//! Configuration for the stability driver.
//!
//! Configuration is merged from the following sources, later sources overriding earlier ones:
//!
//! 1. Defaults
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Environment variables prefixed with `S3STAB__`
//! 4. The mail environment variables `EMAIL_HOST`, `EMAIL_PORT`, `SENDER_MAIL_ID`,
//!    `RECEIVER_MAIL_ID` and `BUILD_URL`
//! 5. Command line flags, see [`cli`](crate::cli)
//!
//! # Environment Variables
//!
//! Environment variables use `S3STAB__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `S3STAB__ENDPOINT=10.0.0.5:9000` sets the S3 endpoint
//! - `S3STAB__MAIL__INTERVAL=1h` sets the interval between progress mails
//!
//! # YAML Configuration File
//!
//! ```yaml
//! endpoint: 10.0.0.5:9000
//! use_ssl: false
//! access_key: admin
//! secret_key: password
//!
//! mail:
//!   host: smtp.example.com
//!   interval: 1h
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::value::{Uncased, UncasedStr};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "S3STAB__";

/// Unprefixed environment variables read into [`Config::mail`].
const MAIL_ENV: [&str; 5] = [
    "EMAIL_HOST",
    "EMAIL_PORT",
    "SENDER_MAIL_ID",
    "RECEIVER_MAIL_ID",
    "BUILD_URL",
];

/// Serializes a [`LevelFilter`] through its string form, such as `"info"`.
mod level_filter {
    use std::borrow::Cow;

    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::level_filters::LevelFilter;

    pub fn serialize<S>(level: &LevelFilter, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(level)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level = Cow::<'de, str>::deserialize(deserializer)?;
        level.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr. The `RUST_LOG` environment variable provides more granular
/// control per module if needed.
#[derive(Debug, Deserialize, Serialize)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// # Default
    ///
    /// `INFO`, or `DEBUG` when the driver runs with `--verbose`.
    ///
    /// # Environment Variable
    ///
    /// `S3STAB__LOGGING__LEVEL`
    #[serde(with = "level_filter")]
    pub level: LevelFilter,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
        }
    }
}

/// Mail notification settings.
///
/// Notifications are sent only if [`host`](Self::host), [`sender`](Self::sender) and
/// [`receiver`](Self::receiver) are all set.
#[derive(Debug, Deserialize, Serialize)]
pub struct Mail {
    /// SMTP relay host. Read from `EMAIL_HOST`.
    pub host: Option<String>,

    /// SMTP relay port. Read from `EMAIL_PORT`.
    ///
    /// # Default
    ///
    /// `25`
    pub port: u16,

    /// Sender address. Read from `SENDER_MAIL_ID`.
    pub sender: Option<String>,

    /// Comma separated receiver addresses. Read from `RECEIVER_MAIL_ID`.
    pub receiver: Option<String>,

    /// Link to the CI job, included in every mail. Read from `BUILD_URL`.
    pub build_url: Option<String>,

    /// Time between two "in progress" mails.
    ///
    /// # Default
    ///
    /// `30m`
    ///
    /// # Environment Variable
    ///
    /// `S3STAB__MAIL__INTERVAL`
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Mail {
    /// Returns `true` if enough settings are present to send mails.
    pub fn is_enabled(&self) -> bool {
        self.host.is_some() && self.sender.is_some() && self.receiver.is_some()
    }

    /// The individual receiver addresses.
    pub fn receivers(&self) -> impl Iterator<Item = &str> {
        self.receiver
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|receiver| !receiver.is_empty())
    }
}

impl Default for Mail {
    fn default() -> Self {
        Self {
            host: None,
            port: 25,
            sender: None,
            receiver: None,
            build_url: None,
            interval: Duration::from_secs(30 * 60),
        }
    }
}

/// Main configuration struct for the stability driver.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Host and port of the S3 endpoint, without the scheme.
    ///
    /// A URL that already carries an `http://` or `https://` scheme is used as is, otherwise the
    /// scheme follows [`use_ssl`](Self::use_ssl).
    ///
    /// # Default
    ///
    /// `s3.example.com`
    pub endpoint: String,

    /// Connect to the endpoint with HTTPS.
    ///
    /// # Default
    ///
    /// `true`
    pub use_ssl: bool,

    /// Region sent with every request.
    ///
    /// # Default
    ///
    /// `us-east-1`
    pub region: String,

    /// S3 access key.
    pub access_key: Option<String>,

    /// S3 secret key. Redacted from logs and never serialized.
    #[serde(skip_serializing)]
    pub secret_key: Option<SecretString>,

    /// Number of nodes of the cluster under test.
    ///
    /// Multiplies `sessions_per_node` of every test.
    ///
    /// # Default
    ///
    /// `1`
    pub number_of_nodes: u64,

    /// Seed for all random decisions. A random seed is picked and logged if unset.
    pub seed: Option<u64>,

    /// Run tests one after another, ignoring their start time offsets.
    pub sequential_run: bool,

    /// Identifier of the test plan, used in mail subjects.
    pub test_plan: Option<String>,

    /// A YAML test plan, or a directory of them.
    pub test_input: Option<PathBuf>,

    /// Logging configuration.
    pub logging: Logging,

    /// Mail notification configuration.
    pub mail: Mail,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "s3.example.com".to_owned(),
            use_ssl: true,
            region: "us-east-1".to_owned(),
            access_key: None,
            secret_key: None,
            number_of_nodes: 1,
            seed: None,
            sequential_run: false,
            test_plan: None,
            test_input: None,
            logging: Logging::default(),
            mail: Mail::default(),
        }
    }
}

/// Maps the unprefixed mail variables onto their [`Mail`] fields.
fn mail_env_key(key: &UncasedStr) -> Uncased<'_> {
    let field = match key.as_str().to_ascii_uppercase().as_str() {
        "EMAIL_HOST" => "mail.host",
        "EMAIL_PORT" => "mail.port",
        "SENDER_MAIL_ID" => "mail.sender",
        "RECEIVER_MAIL_ID" => "mail.receiver",
        "BUILD_URL" => "mail.build_url",
        _ => return key.as_str().into(),
    };
    field.into()
}

impl Config {
    /// Loads configuration from defaults, an optional YAML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML file cannot be read or parsed, or if environment variables
    /// contain invalid values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Env::raw().only(&MAIL_ENV).map(mail_env_key))
            .extract()?;

        Ok(config)
    }

    /// The endpoint URL including its scheme.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            return self.endpoint.clone();
        }
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}", self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();
            assert!(config.use_ssl);
            assert_eq!(config.number_of_nodes, 1);
            assert_eq!(config.logging.level, LevelFilter::INFO);
            assert_eq!(config.mail.port, 25);
            assert_eq!(config.endpoint_url(), "https://s3.example.com");
            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("S3STAB__ENDPOINT", "10.0.0.5:9000");
            jail.set_env("S3STAB__USE_SSL", "false");
            jail.set_env("S3STAB__SECRET_KEY", "hunter2");
            jail.set_env("S3STAB__LOGGING__LEVEL", "warn");
            jail.set_env("S3STAB__MAIL__INTERVAL", "1h 30m");

            let config = Config::load(None).unwrap();
            assert_eq!(config.endpoint_url(), "http://10.0.0.5:9000");
            assert_eq!(
                config.secret_key.as_ref().unwrap().expose_secret(),
                "hunter2"
            );
            assert!(!format!("{config:?}").contains("hunter2"));
            assert_eq!(config.logging.level, LevelFilter::WARN);
            assert_eq!(config.mail.interval, Duration::from_secs(90 * 60));

            Ok(())
        });
    }

    #[test]
    fn mail_settings_from_plain_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("EMAIL_HOST", "smtp.example.com");
            jail.set_env("EMAIL_PORT", "2525");
            jail.set_env("SENDER_MAIL_ID", "ci@example.com");
            jail.set_env("RECEIVER_MAIL_ID", "a@example.com, b@example.com");
            jail.set_env("BUILD_URL", "https://ci.example.com/job/42");

            let config = Config::load(None).unwrap();
            assert!(config.mail.is_enabled());
            assert_eq!(config.mail.host.as_deref(), Some("smtp.example.com"));
            assert_eq!(config.mail.port, 2525);
            assert_eq!(config.mail.sender.as_deref(), Some("ci@example.com"));
            assert_eq!(
                config.mail.receivers().collect::<Vec<_>>(),
                ["a@example.com", "b@example.com"]
            );
            assert_eq!(
                config.mail.build_url.as_deref(),
                Some("https://ci.example.com/job/42")
            );

            Ok(())
        });
    }

    #[test]
    fn secret_key_is_redacted() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile.write_all(b"secret_key: s3cr3t-value\n").unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();
            let secret_key = config.secret_key.as_ref().unwrap();
            assert_eq!(secret_key.expose_secret(), "s3cr3t-value");
            assert!(!format!("{config:?}").contains("s3cr3t-value"));

            let reloaded: Config = figment::Figment::from(Serialized::defaults(&config))
                .extract()
                .unwrap();
            assert!(reloaded.secret_key.is_none());

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            endpoint: https://minio.local:9000
            use_ssl: false
            access_key: admin
            number_of_nodes: 3
            sequential_run: true
            mail:
                host: smtp.local
                interval: 10m
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("S3STAB__NUMBER_OF_NODES", "5");

            let config = Config::load(Some(tempfile.path())).unwrap();
            assert_eq!(config.endpoint_url(), "https://minio.local:9000");
            assert_eq!(config.access_key.as_deref(), Some("admin"));
            assert_eq!(config.number_of_nodes, 5);
            assert!(config.sequential_run);
            assert_eq!(config.mail.host.as_deref(), Some("smtp.local"));
            assert_eq!(config.mail.interval, Duration::from_secs(600));

            Ok(())
        });
    }
}
