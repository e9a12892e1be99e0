use crate::model::{DeviceData, Measurement};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
pub struct DataPoint {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    #[serde(deserialize_with = "super::string_or_number")]
    pub device_sn: String,
    #[serde(default, deserialize_with = "super::opt_timestamp")]
    pub collection_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_list: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDeviceLatest {
    #[serde(default)]
    pub device_data_list: Vec<Value>,
}

impl From<Data> for DeviceData {
    fn from(data: Data) -> Self {
        let serial = data.device_sn;
        let collected_at = data.collection_time;

        let measurements = data
            .data_list
            .into_iter()
            .filter_map(|point| match serde_json::from_value::<DataPoint>(point) {
                Ok(point) => Some(point),
                Err(e) => {
                    log::debug!("Skipping malformed data point of device {}: {}", serial, e);
                    None
                }
            })
            .filter(|point| !point.key.is_empty())
            .filter_map(|point| {
                super::measurement_value(&point.value).map(|value| {
                    let measurement = Measurement {
                        value,
                        unit: point.unit,
                        timestamp: collected_at,
                    };
                    (point.key, measurement)
                })
            })
            .collect();

        DeviceData {
            serial,
            collected_at,
            measurements,
        }
    }
}
