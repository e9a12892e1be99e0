pub mod get_device_latest;
pub mod get_device_list;
pub mod get_station_latest;
pub mod get_station_list;
pub mod obtain_token;

use crate::model::MeasurementValue;
use chrono::{DateTime, Utc};
use num_derive::FromPrimitive;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/* Result codes the API puts in the `code` field of every response */
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ResponseCode {
    Ok = 0,
    TokenMissing = 1001,
    TokenInvalid = 1002,
    TokenExpired = 1003,
    Success = 1_000_000,
    AccountAuthFailed = 2_101_017,
}

/// Numeric view of a JSON number or numeric string.
pub fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Type a raw data point value: integers stay integers, other numbers become floats,
/// anything non-numeric is kept as text. `null` yields nothing.
pub fn measurement_value(value: &Value) -> Option<MeasurementValue> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(MeasurementValue::Integer)
            .or_else(|| n.as_f64().map(MeasurementValue::Float)),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(v) = trimmed.parse::<i64>() {
                Some(MeasurementValue::Integer(v))
            } else {
                match trimmed.parse::<f64>() {
                    Ok(v) if v.is_finite() => Some(MeasurementValue::Float(v)),
                    _ => Some(MeasurementValue::Text(s.to_owned())),
                }
            }
        }
        Value::Bool(b) => Some(MeasurementValue::Text(b.to_string())),
        _ => None,
    }
}

/// Epoch seconds (or milliseconds, for values too large to be seconds).
fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = number(value)?;
    let millis = if raw > 1e11 { raw } else { raw * 1000.0 };
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
}

fn id_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    id_string(Value::deserialize(d)?)
        .ok_or_else(|| serde::de::Error::custom("expected a non-empty string or a number"))
}

pub fn opt_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.and_then(id_string))
}

pub fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.and_then(|v| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

pub fn opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.as_ref().and_then(number))
}

pub fn opt_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.as_ref().and_then(timestamp))
}

#[cfg(test)]
mod test {
    use super::get_device_latest::{Data, GetDeviceLatest};
    use super::*;
    use crate::model::{DeviceData, StationMetrics};
    use std::fs;
    use std::path::PathBuf;

    fn read_resource(filename: &str) -> String {
        let mut d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        d.push(format!("resources/test/{}", filename));
        fs::read_to_string(d.as_path()).unwrap()
    }

    #[test]
    fn obtain_token() {
        let input = read_resource("obtainToken.json");
        let output: obtain_token::ObtainToken = serde_json::from_str(&input).unwrap();
        assert_eq!("token-1", output.access_token);
        assert_eq!(Some(5183999), output.expires_in);
        assert_eq!(Some("bearer".to_string()), output.token_type);
    }

    #[test]
    #[should_panic]
    fn obtain_token_without_access_token() {
        let _output: obtain_token::ObtainToken =
            serde_json::from_str(r#"{"code":"1000000","expiresIn":3600}"#).unwrap();
    }

    #[test]
    fn get_station_list() {
        let input = read_resource("stationList.json");
        let output: get_station_list::GetStationList = serde_json::from_str(&input).unwrap();
        assert_eq!(Some(3), output.total);
        assert_eq!(3, output.station_list.len());

        let first: get_station_list::Data =
            serde_json::from_value(output.station_list[0].clone()).unwrap();
        assert_eq!("12345", first.id);
        assert_eq!(Some("Home".to_string()), first.name);

        let second: get_station_list::Data =
            serde_json::from_value(output.station_list[1].clone()).unwrap();
        assert_eq!("S2", second.id);
        assert_eq!(None, second.name);

        /* third entry has no id */
        assert!(
            serde_json::from_value::<get_station_list::Data>(output.station_list[2].clone())
                .is_err()
        );
    }

    #[test]
    fn get_station_latest() {
        let input = read_resource("stationLatest.json");
        let output: get_station_latest::GetStationLatest = serde_json::from_str(&input).unwrap();
        let metrics = StationMetrics::from(output);

        assert_eq!(Some(12.5), metrics.today_energy);
        assert_eq!(Some(8123.4), metrics.total_energy);
        assert_eq!(Some(3200.0), metrics.current_power);
        assert_eq!(Some(-150.0), metrics.grid_power);
        assert_eq!(Some(0.0), metrics.buy_power);
        assert_eq!(Some(150.0), metrics.sell_power);
        assert_eq!(Some(&80.0), metrics.extra.get("batterySOC"));
        assert_eq!(Some(&410.0), metrics.extra.get("consumptionPower"));
        assert!(!metrics.extra.contains_key("code"));
        assert!(!metrics.extra.contains_key("requestId"));
        assert_eq!(1_700_000_000, metrics.updated_at.unwrap().timestamp());
    }

    #[test]
    fn get_dev_list() {
        let input = read_resource("deviceList.json");
        let output: get_device_list::GetDeviceList = serde_json::from_str(&input).unwrap();
        assert_eq!(2, output.device_list_items.len());

        let first: get_device_list::Data =
            serde_json::from_value(output.device_list_items[0].clone()).unwrap();
        assert_eq!("2301010001", first.device_sn);
        assert_eq!(Some(77), first.device_id);
        assert_eq!(Some("INVERTER".to_string()), first.device_type);
        assert_eq!(Some("12345".to_string()), first.station_id);
    }

    #[test]
    fn get_device_latest() {
        let input = read_resource("deviceLatest.json");
        let output: GetDeviceLatest = serde_json::from_str(&input).unwrap();
        let data: Data = serde_json::from_value(output.device_data_list[0].clone()).unwrap();
        let device = DeviceData::from(data);

        assert_eq!("2301010001", device.serial);
        let soc = &device.measurements["BMSSOC"];
        assert_eq!(MeasurementValue::Integer(80), soc.value);
        assert_eq!(Some("%".to_string()), soc.unit);
        assert_eq!(device.collected_at, soc.timestamp);

        assert_eq!(
            MeasurementValue::Float(231.4),
            device.measurements["ACVoltageRUA"].value
        );
        assert_eq!(
            MeasurementValue::Text("SELLING_FIRST".to_string()),
            device.measurements["workMode"].value
        );
        /* null values and points without a key are dropped */
        assert!(!device.measurements.contains_key("GridFrequency"));
        assert_eq!(3, device.measurements.len());
    }

    #[test]
    fn measurement_values_are_typed() {
        use serde_json::json;
        assert_eq!(
            Some(MeasurementValue::Integer(80)),
            measurement_value(&json!(80))
        );
        assert_eq!(
            Some(MeasurementValue::Float(80.5)),
            measurement_value(&json!(80.5))
        );
        assert_eq!(
            Some(MeasurementValue::Integer(-12)),
            measurement_value(&json!(" -12 "))
        );
        assert_eq!(
            Some(MeasurementValue::Text("NaN".to_string())),
            measurement_value(&json!("NaN"))
        );
        assert_eq!(None, measurement_value(&Value::Null));
    }

    #[test]
    fn response_codes() {
        assert_eq!(
            Some(ResponseCode::Success),
            num::FromPrimitive::from_u64(1_000_000)
        );
        assert_eq!(
            Some(ResponseCode::AccountAuthFailed),
            num::FromPrimitive::from_u64(2_101_017)
        );
        assert_eq!(None as Option<ResponseCode>, num::FromPrimitive::from_u64(42));
    }
}
