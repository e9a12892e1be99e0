use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
pub struct Data {
    #[serde(deserialize_with = "super::string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetStationList {
    #[serde(default, deserialize_with = "super::opt_u64")]
    pub total: Option<u64>,
    /* items are parsed one by one so a malformed station does not hide the others */
    #[serde(default)]
    pub station_list: Vec<Value>,
}
