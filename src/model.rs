use crate::Error;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

type KWh = f64;
type Watts = f64;

pub const MAX_SELL_POWER_WATTS: u32 = 20_000;
pub const MAX_BATTERY_CURRENT_AMPS: u32 = 150;
/// Longest token lifetime taken at face value.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(90 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct Api {
    pub api_url: String,
    pub client: reqwest::Client,
}

/// Account credentials. Secrets are redacted from `Debug` output.
#[derive(Debug)]
pub struct Credentials {
    pub api_url: String,
    pub app_id: String,
    pub app_secret: SecretString,
    pub email: String,
    pub password: SecretString,
}

#[derive(Debug)]
pub struct Token {
    pub access_token: SecretString,
    pub token_type: Option<String>,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Instant,
}

impl Token {
    /// Lifetimes above `MAX_TOKEN_LIFETIME` are capped.
    pub fn new(access_token: String, expires_in: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(expires_in.min(MAX_TOKEN_LIFETIME))
            .unwrap_or(now);

        Token {
            access_token: SecretString::from(access_token),
            token_type: None,
            refresh_token: None,
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn expires_in(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Still valid for strictly longer than `margin`.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        self.expires_in() > margin
    }
}

/// Station as listed by the account, before its metrics are fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct StationListing {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationMetrics {
    pub today_energy: Option<KWh>,
    pub total_energy: Option<KWh>,
    pub current_power: Option<Watts>,
    pub grid_power: Option<Watts>,
    pub buy_power: Option<Watts>,
    pub sell_power: Option<Watts>,
    /// Any other numeric field the station reports, keyed as on the wire.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub metrics: StationMetrics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceListing {
    pub serial: String,
    pub device_id: Option<u64>,
    pub device_type: Option<String>,
    pub station_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MeasurementValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MeasurementValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MeasurementValue::Integer(v) => Some(*v as f64),
            MeasurementValue::Float(v) => Some(*v),
            MeasurementValue::Text(_) => None,
        }
    }
}

impl fmt::Display for MeasurementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementValue::Integer(v) => write!(f, "{}", v),
            MeasurementValue::Float(v) => write!(f, "{}", v),
            MeasurementValue::Text(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub value: MeasurementValue,
    pub unit: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Latest data points reported for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceData {
    pub serial: String,
    pub collected_at: Option<DateTime<Utc>>,
    pub measurements: BTreeMap<String, Measurement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub station_id: String,
    pub device_id: Option<u64>,
    pub device_type: Option<String>,
    pub measurements: BTreeMap<String, Measurement>,
}

impl Device {
    pub fn measurement(&self, key: &str) -> Option<&Measurement> {
        self.measurements.get(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// `None` until the first cycle has been published.
    pub timestamp: Option<DateTime<Utc>>,
    pub stations: Vec<Station>,
    pub devices: Vec<Device>,
}

impl Snapshot {
    pub fn station(&self, id: &str) -> Option<&Station> {
        self.stations.iter().find(|station| station.id == id)
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkMode {
    SellingFirst,
    ZeroExportToLoad,
    ZeroExportToCt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnergyPattern {
    BatteryFirst,
    LoadFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    ChargeMode(bool),
    SolarSell(bool),
    WorkMode(WorkMode),
    EnergyPattern(EnergyPattern),
    /// Watts.
    MaxSellPower(u32),
    /// Amps.
    MaxChargeCurrent(u32),
    /// Amps.
    MaxDischargeCurrent(u32),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ChargeMode(_) => "charge mode",
            Command::SolarSell(_) => "solar sell",
            Command::WorkMode(_) => "work mode",
            Command::EnergyPattern(_) => "energy pattern",
            Command::MaxSellPower(_) => "max sell power",
            Command::MaxChargeCurrent(_) => "max charge current",
            Command::MaxDischargeCurrent(_) => "max discharge current",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlCommand {
    pub device_sn: String,
    pub command: Command,
}

impl ControlCommand {
    pub fn new(device_sn: impl Into<String>, command: Command) -> Self {
        ControlCommand {
            device_sn: device_sn.into(),
            command,
        }
    }

    /// Reject values the inverter would refuse before anything goes on the wire.
    pub fn validate(&self) -> Result<(), Error> {
        if self.device_sn.trim().is_empty() {
            return Err(Error::InvalidCommand("device serial number is empty".into()));
        }

        let (value, max, unit) = match self.command {
            Command::MaxSellPower(v) => (v, MAX_SELL_POWER_WATTS, "W"),
            Command::MaxChargeCurrent(v) | Command::MaxDischargeCurrent(v) => {
                (v, MAX_BATTERY_CURRENT_AMPS, "A")
            }
            _ => return Ok(()),
        };

        if value > max {
            return Err(Error::InvalidCommand(format!(
                "{} of {}{} exceeds the {}{} limit",
                self.command.name(),
                value,
                unit,
                max,
                unit
            )));
        }
        Ok(())
    }
}
