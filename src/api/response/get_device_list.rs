use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    #[serde(deserialize_with = "super::string_or_number")]
    pub device_sn: String,
    #[serde(default, deserialize_with = "super::opt_u64")]
    pub device_id: Option<u64>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default, deserialize_with = "super::opt_string_or_number")]
    pub station_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDeviceList {
    #[serde(default, deserialize_with = "super::opt_u64")]
    pub total: Option<u64>,
    #[serde(default)]
    pub device_list_items: Vec<Value>,
}
