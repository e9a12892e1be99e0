use crate::coordinator::CoordinatorOptions;
use crate::model::Credentials;
use crate::Error;
use ::config::{Config, Environment, Source};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const EU_API_URL: &str = "https://eu1-developer.deyecloud.com/v1.0";
const US_API_URL: &str = "https://us1-developer.deyecloud.com/v1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Eu,
    Us,
}

impl Region {
    pub fn base_url(&self) -> &'static str {
        match self {
            Region::Eu => EU_API_URL,
            Region::Us => US_API_URL,
        }
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eu" => Ok(Region::Eu),
            "us" => Ok(Region::Us),
            other => Err(Error::Config(format!(
                "unknown region {:?}, expected \"eu\" or \"us\"",
                other
            ))),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Eu => f.write_str("eu"),
            Region::Us => f.write_str("us"),
        }
    }
}

#[derive(serde::Deserialize)]
struct RawSettings {
    region: String,
    api_url: Option<String>,
    app_id: String,
    app_secret: String,
    email: String,
    password: String,
    interval: u64,
    failure_threshold: u32,
    timeout: u64,
    token_refresh_margin: u64,
}

impl From<RawSettings> for Settings {
    fn from(raw: RawSettings) -> Self {
        Settings {
            region: raw.region,
            api_url: raw.api_url,
            app_id: raw.app_id,
            app_secret: SecretString::from(raw.app_secret),
            email: raw.email,
            password: SecretString::from(raw.password),
            interval: raw.interval,
            failure_threshold: raw.failure_threshold,
            timeout: raw.timeout,
            token_refresh_margin: raw.token_refresh_margin,
        }
    }
}

/// Integration settings. All durations are in seconds.
#[derive(Debug)]
pub struct Settings {
    pub region: String,
    /// Overrides the region's API URL.
    pub api_url: Option<String>,
    pub app_id: String,
    pub app_secret: SecretString,
    pub email: String,
    pub password: SecretString,
    pub interval: u64,
    pub failure_threshold: u32,
    pub timeout: u64,
    pub token_refresh_margin: u64,
}

impl Settings {
    pub fn region(&self) -> Result<Region, Error> {
        self.region.parse()
    }

    pub fn base_url(&self) -> Result<String, Error> {
        match &self.api_url {
            Some(url) if !url.trim().is_empty() => Ok(url.trim().to_owned()),
            _ => Ok(self.region()?.base_url().to_owned()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn token_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin)
    }

    pub fn credentials(&self) -> Result<Credentials, Error> {
        Ok(Credentials {
            api_url: self.base_url()?,
            app_id: self.app_id.clone(),
            app_secret: SecretString::from(self.app_secret.expose_secret().to_owned()),
            email: self.email.clone(),
            password: SecretString::from(self.password.expose_secret().to_owned()),
        })
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions::new(Duration::from_secs(self.interval), self.failure_threshold)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.region()?;

        let required = [
            ("app_id", self.app_id.as_str()),
            ("app_secret", self.app_secret.expose_secret()),
            ("email", self.email.as_str()),
            ("password", self.password.expose_secret()),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(Error::Config(format!("{} must not be empty", name)));
        }

        check_range("interval", self.interval, 30, 3600)?;
        check_range("timeout", self.timeout, 5, 120)?;
        if self.failure_threshold < 1 {
            return Err(Error::Config(String::from(
                "failure_threshold must be at least 1",
            )));
        }
        Ok(())
    }
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<(), Error> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} must be between {} and {} seconds, got {}",
            name, min, max, value
        )))
    }
}

/// Read settings from `DEYE_*` environment variables.
pub fn read_settings() -> Result<Settings, Error> {
    read_settings_from(Environment::with_prefix("DEYE"))
}

/// Read settings from `source` on top of the defaults, and validate them.
pub fn read_settings_from<S>(source: S) -> Result<Settings, Error>
where
    S: Source + Send + Sync + 'static,
{
    let settings: Settings = Config::builder()
        .set_default("region", "eu")?
        .set_default("interval", 60)?
        .set_default("failure_threshold", 3)?
        .set_default("timeout", 30)?
        .set_default("token_refresh_margin", 60)?
        .add_source(source)
        .build()?
        .try_deserialize::<RawSettings>()?
        .into();

    settings.validate()?;
    log::debug!(
        "Configured for {} on {}, polling every {}s",
        settings.email,
        settings.base_url()?,
        settings.interval
    );
    Ok(settings)
}
