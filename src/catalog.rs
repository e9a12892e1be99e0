//! Walks the account hierarchy (stations, their metrics, their devices, the devices'
//! latest data points) into a `Snapshot`.
//!
//! One station or device failing does not fail the walk: the entity is left out and
//! the failure is reported next to the snapshot. An unreadable station list, a
//! rejected token or rate limiting ends the walk early, and so does a walk in which
//! every listed entity failed.

use crate::api::{self, Error, Listing, MAX_DEVICES_PER_REQUEST};
use crate::model::{Api, Device, DeviceData, DeviceListing, Snapshot, Station, Token};
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    /// Aggregate metrics of a station.
    Station(String),
    /// The device list of a station.
    StationDevices(String),
    /// Latest data points of a device.
    Device(String),
    /// A list item too malformed to tell which entity it was.
    Unidentified,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Station(id) => write!(f, "station {}", id),
            Entity::StationDevices(id) => write!(f, "devices of station {}", id),
            Entity::Device(serial) => write!(f, "device {}", serial),
            Entity::Unidentified => f.write_str("unidentified entity"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityError {
    pub entity: Entity,
    pub error: Error,
}

#[derive(Debug)]
pub struct FetchReport {
    pub snapshot: Snapshot,
    /// Entities missing from `snapshot`, and why.
    pub errors: Vec<EntityError>,
}

impl FetchReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

fn contain(entity: Entity, error: Error, errors: &mut Vec<EntityError>) -> Result<(), Error> {
    /* a refused token or an exhausted rate limit fails every later call too */
    if error.is_auth() || matches!(error, Error::RateExceeded(_)) {
        return Err(error);
    }
    log::warn!("Failed to get data for {}: {}", entity, error);
    errors.push(EntityError { entity, error });
    Ok(())
}

fn collect_rejected<T>(listing: &mut Listing<T>, errors: &mut Vec<EntityError>) {
    errors.extend(listing.rejected.drain(..).map(|error| EntityError {
        entity: Entity::Unidentified,
        error,
    }));
}

async fn fetch_devices(
    api: &Api,
    token: &Token,
    listed: &[DeviceListing],
    devices: &mut Vec<Device>,
    errors: &mut Vec<EntityError>,
) -> Result<(), Error> {
    for batch in listed.chunks(MAX_DEVICES_PER_REQUEST) {
        let serials: Vec<String> = batch.iter().map(|d| d.serial.clone()).collect();
        log::debug!("Fetching data for device batch: {:?}", serials);

        let mut listing = match api::device_latest(api, token, &serials).await {
            Ok(listing) => listing,
            Err(error) => {
                for device in batch {
                    contain(Entity::Device(device.serial.clone()), error.clone(), errors)?;
                }
                continue;
            }
        };
        collect_rejected(&mut listing, errors);

        let mut data: HashMap<String, DeviceData> = listing
            .items
            .into_iter()
            .map(|data| (data.serial.clone(), data))
            .collect();

        for device in batch {
            match data.remove(&device.serial) {
                Some(data) => devices.push(Device {
                    id: device.serial.clone(),
                    station_id: device.station_id.clone(),
                    device_id: device.device_id,
                    device_type: device.device_type.clone(),
                    measurements: data.measurements,
                }),
                None => contain(
                    Entity::Device(device.serial.clone()),
                    Error::NoData(format!("device {}", device.serial)),
                    errors,
                )?,
            }
        }
    }
    Ok(())
}

/// Fetch everything visible to `token`.
///
/// Fails if the station list cannot be read, the token is refused, the API rate
/// limits the walk, or nothing at all could be fetched for a non-empty station list.
/// Any other failure leaves the affected entity out of the snapshot and is listed in
/// the report.
pub async fn fetch_snapshot(api: &Api, token: &Token) -> Result<FetchReport, Error> {
    let mut errors = Vec::new();

    log::debug!("Fetching station list");
    let mut listing = api::stations(api, token).await?;
    collect_rejected(&mut listing, &mut errors);
    log::debug!("Received {} stations", listing.items.len());
    let station_count = listing.items.len();

    let mut stations = Vec::with_capacity(listing.items.len());
    let mut devices = Vec::new();

    for station in listing.items {
        match api::station_latest(api, token, &station.id).await {
            Ok(metrics) => stations.push(Station {
                id: station.id.clone(),
                name: station.name.clone(),
                metrics,
            }),
            Err(error) => contain(Entity::Station(station.id.clone()), error, &mut errors)?,
        }

        /* devices are fetched even when the station's own metrics are unavailable */
        match api::devices(api, token, &station.id).await {
            Ok(mut listed) => {
                collect_rejected(&mut listed, &mut errors);
                log::debug!("Station {} has {} devices", station.id, listed.items.len());
                fetch_devices(api, token, &listed.items, &mut devices, &mut errors).await?;
            }
            Err(error) => contain(
                Entity::StationDevices(station.id.clone()),
                error,
                &mut errors,
            )?,
        }
    }

    if station_count > 0 && stations.is_empty() && devices.is_empty() && !errors.is_empty() {
        log::warn!("All {} stations failed, discarding the empty snapshot", station_count);
        return Err(errors.swap_remove(0).error);
    }

    log::info!(
        "Fetched {} stations, {} devices ({} entities unavailable)",
        stations.len(),
        devices.len(),
        errors.len()
    );

    Ok(FetchReport {
        snapshot: Snapshot {
            timestamp: Some(Utc::now()),
            stations,
            devices,
        },
        errors,
    })
}
