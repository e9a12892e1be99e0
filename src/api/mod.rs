pub mod endpoint;
pub mod error;
pub mod response;

use crate::model;
use crate::model::Command;
pub use error::{AuthFailure, Error};
use response::get_device_latest::{self, GetDeviceLatest};
use response::get_device_list::{self, GetDeviceList};
use response::get_station_latest::GetStationLatest;
use response::get_station_list::{self, GetStationList};
use response::obtain_token::ObtainToken;
use response::ResponseCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

/// The API refuses latest-data requests for more devices than this.
pub const MAX_DEVICES_PER_REQUEST: usize = 10;
const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 50;
/* seconds, used when the login response does not say */
const DEFAULT_TOKEN_LIFETIME: u64 = 3600;

pub fn api(api_url: impl Into<String>, timeout: Duration) -> Result<model::Api, Error> {
    let client = reqwest::ClientBuilder::new()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Internal(format!("Unable to build HTTP client: {}", e)))?;

    Ok(model::Api {
        api_url: api_url.into().trim_end_matches('/').to_owned(),
        client,
    })
}

/// Items of a list response that parsed, plus one error per item that didn't.
#[derive(Debug)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub rejected: Vec<Error>,
}

impl<T> Default for Listing<T> {
    fn default() -> Self {
        Listing {
            items: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

impl<T> Listing<T> {
    fn parse<R: DeserializeOwned>(values: Vec<Value>, what: &str, convert: impl Fn(R) -> T) -> Self {
        let mut listing = Listing::default();
        for value in values {
            match serde_json::from_value::<R>(value.clone()) {
                Ok(item) => listing.items.push(convert(item)),
                Err(e) => {
                    log::warn!("Ignoring malformed {}: {}", what, e);
                    listing.rejected.push(Error::InvalidResponse {
                        body: value.to_string(),
                        reason: format!("malformed {}: {}", what, e),
                    });
                }
            }
        }
        listing
    }

    fn append(&mut self, mut other: Listing<T>) {
        self.items.append(&mut other.items);
        self.rejected.append(&mut other.rejected);
    }
}

/// Map transport-level and non-2xx failures to Error
fn map_api_err(error: reqwest::Error) -> Error {
    match error.status() {
        Some(http::StatusCode::TOO_MANY_REQUESTS) => Error::RateExceeded(error.to_string()),
        Some(http::StatusCode::UNAUTHORIZED) | Some(http::StatusCode::FORBIDDEN) => {
            Error::rejected(error.to_string())
        }
        Some(status) => Error::Http {
            status: status.as_u16(),
            message: error.to_string(),
        },
        None if error.is_timeout() => Error::Timeout(error.to_string()),
        None => Error::Network(error.to_string()),
    }
}

fn result_code(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Inspect the `code` of a valid HTTP response (2xx). API-level failures come back as
/// 200 with a non-success code; turn those into errors and carry the `value` forward
/// otherwise.
fn map_response_status(value: Value) -> Result<Value, Error> {
    let message = value
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("(no error message received)")
        .to_owned();

    let code = match value.get("code") {
        Some(code) => code,
        None => {
            /* some endpoints only carry `success` */
            return match value.get("success").and_then(Value::as_bool) {
                Some(true) => Ok(value),
                _ => Err(Error::InvalidResponse {
                    body: value.to_string(),
                    reason: String::from("response carries neither code nor success"),
                }),
            };
        }
    };

    match result_code(code).and_then(num::FromPrimitive::from_u64) {
        Some(ResponseCode::Ok) | Some(ResponseCode::Success) => Ok(value),
        Some(ResponseCode::TokenMissing)
        | Some(ResponseCode::TokenInvalid)
        | Some(ResponseCode::TokenExpired)
        | Some(ResponseCode::AccountAuthFailed) => {
            Err(Error::rejected(format!("{} (code {})", message, code)))
        }
        None => Err(Error::Api {
            code: code.as_str().map(str::to_owned).unwrap_or_else(|| code.to_string()),
            message,
        }),
    }
}

/// Responses either wrap their payload in `data` or carry it next to `code`.
fn payload(mut value: Value) -> Value {
    if value.get("data").map_or(false, Value::is_object) {
        value["data"].take()
    } else {
        value
    }
}

/// Station ids are numeric on the wire; keep anything else as a string.
fn id_value(id: &str) -> Value {
    id.parse::<u64>().map(Value::from).unwrap_or_else(|_| Value::from(id))
}

fn unexpected(what: &str) -> impl Fn(serde_json::Error) -> Error + '_ {
    move |e| Error::InvalidResponse {
        body: String::from(what),
        reason: e.to_string(),
    }
}

async fn post<B: Serialize + ?Sized>(
    api: &model::Api,
    endpoint: &endpoint::Endpoint,
    token: Option<&model::Token>,
    query: &[(&str, &str)],
    body: &B,
) -> Result<Value, Error> {
    let url = format!("{}{}", api.api_url, endpoint);

    let request = api.client.post(url).query(query).json(body);
    let request = match token {
        Some(token) => request.bearer_auth(token.secret()),
        None => request,
    };

    let response_text = request
        .send()
        .await
        .map_err(map_api_err)?
        .error_for_status()
        .map_err(map_api_err)?
        .text()
        .await
        .map_err(|e| Error::Network(format!("Error reading API response: {}", e)))?;

    log::trace!("endpoint: {}, response_text: {}", endpoint, response_text);

    serde_json::from_str::<Value>(&response_text)
        .map_err(|e| Error::InvalidResponse {
            body: response_text,
            reason: e.to_string(),
        })
        .and_then(map_response_status)
        .map(payload)
}

fn login_failure(error: Error) -> Error {
    let unreachable = |message: String| Error::Auth {
        kind: AuthFailure::Unreachable,
        message,
    };

    match error {
        Error::Auth { .. } => error,
        Error::Network(message) | Error::Timeout(message) | Error::RateExceeded(message) => {
            unreachable(message)
        }
        Error::Http { status, .. } if status >= 500 => unreachable(error.to_string()),
        Error::InvalidResponse { .. } => unreachable(error.to_string()),
        other => Error::rejected(other.to_string()),
    }
}

/// Exchange credentials for an access token.
///
/// Every failure is reported as `Error::Auth`; `AuthFailure::Unreachable` when the
/// credentials were never actually checked.
pub async fn obtain_token(
    api: &model::Api,
    credentials: &model::Credentials,
) -> Result<model::Token, Error> {
    let request_body = json!({
        "appSecret": credentials.app_secret.expose_secret(),
        "email": credentials.email,
        "password": credentials.password.expose_secret(),
    });
    let query = [("appId", credentials.app_id.as_str())];

    let value = post(api, endpoint::LOGIN, None, &query, &request_body)
        .await
        .map_err(login_failure)?;

    let response = serde_json::from_value::<ObtainToken>(value)
        .map_err(|e| Error::rejected(format!("No access token in response: {}", e)))?;

    if response.access_token.is_empty() {
        return Err(Error::rejected("Empty access token in response"));
    }

    let expires_in = response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME);
    log::info!("Obtained access token, expires in {} seconds", expires_in);
    if Duration::from_secs(expires_in) > model::MAX_TOKEN_LIFETIME {
        log::warn!(
            "Token lifetime of {}s is implausible, treating it as {}s",
            expires_in,
            model::MAX_TOKEN_LIFETIME.as_secs()
        );
    }

    let mut token = model::Token::new(response.access_token, Duration::from_secs(expires_in));
    token.token_type = response.token_type;
    token.refresh_token = response.refresh_token.map(SecretString::from);
    Ok(token)
}

fn last_page(page: usize, received: usize, total: Option<u64>) -> bool {
    received < PAGE_SIZE
        || page >= MAX_PAGES
        || total.map_or(false, |total| (page * PAGE_SIZE) as u64 >= total)
}

/// List all stations of the account.
pub async fn stations(
    api: &model::Api,
    token: &model::Token,
) -> Result<Listing<model::StationListing>, Error> {
    let mut listing = Listing::default();

    for page in 1..=MAX_PAGES {
        let request_body = json!({ "page": page, "size": PAGE_SIZE });
        let response = post(api, endpoint::STATIONS, Some(token), &[], &request_body)
            .await
            .map(serde_json::from_value::<GetStationList>)?
            .map_err(unexpected("station list"))?;

        let received = response.station_list.len();
        listing.append(Listing::parse(
            response.station_list,
            "station",
            |data: get_station_list::Data| model::StationListing {
                name: data
                    .name
                    .unwrap_or_else(|| format!("Station {}", data.id)),
                id: data.id,
            },
        ));

        if last_page(page, received, response.total) {
            break;
        }
    }

    Ok(listing)
}

/// Read the aggregate metrics of one station.
pub async fn station_latest(
    api: &model::Api,
    token: &model::Token,
    station_id: &str,
) -> Result<model::StationMetrics, Error> {
    let request_body = json!({ "stationId": id_value(station_id) });

    post(api, endpoint::STATION_LATEST, Some(token), &[], &request_body)
        .await
        .map(serde_json::from_value::<GetStationLatest>)?
        .map_err(unexpected("station latest data"))
        .map(model::StationMetrics::from)
}

/// List the devices installed in `station_id`
pub async fn devices(
    api: &model::Api,
    token: &model::Token,
    station_id: &str,
) -> Result<Listing<model::DeviceListing>, Error> {
    let mut listing = Listing::default();

    for page in 1..=MAX_PAGES {
        let request_body = json!({
            "page": page,
            "size": PAGE_SIZE,
            "stationIds": [id_value(station_id)],
        });
        let response = post(api, endpoint::DEVICES, Some(token), &[], &request_body)
            .await
            .map(serde_json::from_value::<GetDeviceList>)?
            .map_err(unexpected("device list"))?;

        let received = response.device_list_items.len();
        listing.append(Listing::parse(
            response.device_list_items,
            "device",
            |data: get_device_list::Data| model::DeviceListing {
                serial: data.device_sn,
                device_id: data.device_id,
                device_type: data.device_type,
                station_id: data
                    .station_id
                    .unwrap_or_else(|| station_id.to_owned()),
            },
        ));

        if last_page(page, received, response.total) {
            break;
        }
    }

    Ok(listing)
}

/// Read the latest data points of up to `MAX_DEVICES_PER_REQUEST` devices.
pub async fn device_latest(
    api: &model::Api,
    token: &model::Token,
    serials: &[String],
) -> Result<Listing<model::DeviceData>, Error> {
    if serials.len() > MAX_DEVICES_PER_REQUEST {
        return Err(Error::Internal(format!(
            "At most {} devices per request, got {}",
            MAX_DEVICES_PER_REQUEST,
            serials.len()
        )));
    }

    let request_body = json!({ "deviceList": serials });

    post(api, endpoint::DEVICE_LATEST, Some(token), &[], &request_body)
        .await
        .map(serde_json::from_value::<GetDeviceLatest>)?
        .map_err(unexpected("device latest data"))
        .map(|response| {
            Listing::parse(
                response.device_data_list,
                "device data",
                |data: get_device_latest::Data| model::DeviceData::from(data),
            )
        })
}

fn control_request(command: &model::ControlCommand) -> (&'static endpoint::Endpoint, Value) {
    let device_sn = &command.device_sn;

    match command.command {
        Command::ChargeMode(enabled) => (
            endpoint::CHARGE_MODE,
            json!({ "deviceSn": device_sn, "chargeMode": enabled }),
        ),
        Command::SolarSell(enabled) => (
            endpoint::SOLAR_SELL,
            json!({ "action": if enabled { "on" } else { "off" }, "deviceSn": device_sn }),
        ),
        Command::WorkMode(mode) => (
            endpoint::WORK_MODE,
            json!({ "deviceSn": device_sn, "workMode": mode }),
        ),
        Command::EnergyPattern(pattern) => (
            endpoint::ENERGY_PATTERN,
            json!({ "deviceSn": device_sn, "energyPattern": pattern }),
        ),
        Command::MaxSellPower(watts) => (
            endpoint::SYSTEM_POWER,
            json!({ "deviceSn": device_sn, "powerType": "MAX_SELL_POWER", "value": watts }),
        ),
        Command::MaxChargeCurrent(amps) => (
            endpoint::BATTERY_PARAMETER,
            json!({ "deviceSn": device_sn, "parameterType": "MAX_CHARGE_CURRENT", "value": amps }),
        ),
        Command::MaxDischargeCurrent(amps) => (
            endpoint::BATTERY_PARAMETER,
            json!({ "deviceSn": device_sn, "parameterType": "MAX_DISCHARGE_CURRENT", "value": amps }),
        ),
    }
}

/// Send one control command. The API acknowledges the order; the device applies it later.
pub async fn control(
    api: &model::Api,
    token: &model::Token,
    command: &model::ControlCommand,
) -> Result<(), Error> {
    let (endpoint, request_body) = control_request(command);

    post(api, endpoint, Some(token), &[], &request_body)
        .await
        .map(|response| {
            log::debug!(
                "{} accepted for device {}: {}",
                command.command.name(),
                command.device_sn,
                response
            )
        })
}
