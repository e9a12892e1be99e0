use crate::model::StationMetrics;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Envelope fields that are not measurements.
const METADATA_KEYS: &[&str] = &["code", "msg", "success", "requestId"];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetStationLatest {
    #[serde(default, deserialize_with = "super::opt_f64")]
    pub generation_value: Option<f64>,
    #[serde(default, deserialize_with = "super::opt_f64")]
    pub generation_total: Option<f64>,
    #[serde(default, deserialize_with = "super::opt_f64")]
    pub generation_power: Option<f64>,
    #[serde(default, deserialize_with = "super::opt_f64")]
    pub grid_power: Option<f64>,
    #[serde(default, deserialize_with = "super::opt_f64")]
    pub purchase_power: Option<f64>,
    #[serde(default, deserialize_with = "super::opt_f64")]
    pub wire_power: Option<f64>,
    #[serde(default, deserialize_with = "super::opt_timestamp")]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub rest: BTreeMap<String, Value>,
}

impl From<GetStationLatest> for StationMetrics {
    fn from(latest: GetStationLatest) -> Self {
        let extra = latest
            .rest
            .iter()
            .filter(|(key, _)| !METADATA_KEYS.contains(&key.as_str()))
            .filter_map(|(key, value)| super::number(value).map(|v| (key.to_owned(), v)))
            .collect();

        StationMetrics {
            today_energy: latest.generation_value,
            total_energy: latest.generation_total,
            current_power: latest.generation_power,
            grid_power: latest.grid_power,
            buy_power: latest.purchase_power,
            sell_power: latest.wire_power,
            extra,
            updated_at: latest.last_update_time,
        }
    }
}
