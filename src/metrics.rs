use deyecloud_rs::coordinator::Update;
use deyecloud_rs::model::{Device, Snapshot, Station};
use prometheus::{Encoder, Gauge, GaugeVec, TextEncoder};

fn station_gauge(name: &str, help: &str) -> GaugeVec {
    register_gauge_vec!(opts!(name, help), &["station_id", "station_name"]).unwrap()
}

lazy_static! {
    static ref STATION_GAUGES: [GaugeVec; 6] = [
        station_gauge("deye_station_today_energy", "energy generated today (in kWh)"),
        station_gauge("deye_station_total_energy", "energy generated in total (in kWh)"),
        station_gauge("deye_station_current_power", "current generation power (in W)"),
        station_gauge("deye_station_grid_power", "power exchanged with the grid (in W)"),
        station_gauge("deye_station_buy_power", "power bought from the grid (in W)"),
        station_gauge("deye_station_sell_power", "power sold to the grid (in W)"),
    ];
    static ref STATION_EXTRA_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "deye_station_value",
            "any other numeric value reported for a station",
        ),
        &["station_id", "key"],
    )
    .unwrap();
    static ref DEVICE_MEASUREMENT_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "deye_device_measurement",
            "latest numeric data point reported by a device",
        ),
        &["station_id", "device_sn", "key", "unit"],
    )
    .unwrap();
    static ref LAST_UPDATE_GAUGE: Gauge = register_gauge!(opts!(
        "deye_last_update_timestamp_seconds",
        "time of the last published update",
    ))
    .unwrap();
    static ref UPDATE_FAILURES_GAUGE: Gauge = register_gauge!(opts!(
        "deye_update_consecutive_failures",
        "number of updates failed in a row",
    ))
    .unwrap();
}

fn record_station(station: &Station) {
    let metrics = &station.metrics;
    let values = [
        metrics.today_energy,
        metrics.total_energy,
        metrics.current_power,
        metrics.grid_power,
        metrics.buy_power,
        metrics.sell_power,
    ];

    for (gauge, value) in STATION_GAUGES.iter().zip(values) {
        if let Some(value) = value {
            gauge
                .with_label_values(&[&station.id, &station.name])
                .set(value);
        }
    }

    for (key, value) in &metrics.extra {
        STATION_EXTRA_GAUGE
            .with_label_values(&[&station.id, key])
            .set(*value);
    }
}

fn record_device(device: &Device) {
    for (key, measurement) in &device.measurements {
        /* text values such as work modes have no gauge */
        if let Some(value) = measurement.value.as_f64() {
            DEVICE_MEASUREMENT_GAUGE
                .with_label_values(&[
                    &device.station_id,
                    &device.id,
                    key,
                    measurement.unit.as_deref().unwrap_or(""),
                ])
                .set(value);
        }
    }
}

/// Feed a published snapshot to the Prometheus registry.
///
/// Gauges of entities missing from `snapshot` keep their last value.
fn record_snapshot(snapshot: &Snapshot) {
    snapshot.stations.iter().for_each(record_station);
    snapshot.devices.iter().for_each(record_device);

    if let Some(timestamp) = snapshot.timestamp {
        LAST_UPDATE_GAUGE.set(timestamp.timestamp() as f64);
    }
    UPDATE_FAILURES_GAUGE.set(0.0);
}

/// Coordinator subscriber.
pub fn record(update: &Update) {
    match update {
        Update::Published(snapshot) => record_snapshot(snapshot),
        Update::Failed {
            consecutive_failures,
            ..
        } => UPDATE_FAILURES_GAUGE.set(f64::from(*consecutive_failures)),
    }
}

/// Read metrics from Prometheus exporter registry.
pub fn read() -> Result<String, deyecloud_rs::Error> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| deyecloud_rs::Error::Internal(format!("Unable to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| deyecloud_rs::Error::Internal(format!("Metrics are not UTF-8: {}", e)))
}

#[cfg(test)]
mod test {
    use super::*;
    use deyecloud_rs::model::{Measurement, MeasurementValue, StationMetrics};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[test]
    fn published_snapshot_becomes_gauges() {
        let mut measurements = BTreeMap::new();
        measurements.insert(
            "BMSSOC".to_string(),
            Measurement {
                value: MeasurementValue::Integer(80),
                unit: Some("%".to_string()),
                timestamp: None,
            },
        );
        measurements.insert(
            "workMode".to_string(),
            Measurement {
                value: MeasurementValue::Text("SELLING_FIRST".to_string()),
                unit: None,
                timestamp: None,
            },
        );

        let snapshot = Snapshot {
            timestamp: Some(chrono::Utc::now()),
            stations: vec![Station {
                id: "S1".to_string(),
                name: "Home".to_string(),
                metrics: StationMetrics {
                    today_energy: Some(12.5),
                    ..StationMetrics::default()
                },
            }],
            devices: vec![Device {
                id: "D1".to_string(),
                station_id: "S1".to_string(),
                device_id: None,
                device_type: None,
                measurements,
            }],
        };
        record(&Update::Published(Arc::new(snapshot)));

        let text = read().unwrap();
        assert!(text.contains(r#"deye_station_today_energy{station_id="S1",station_name="Home"} 12.5"#));
        assert!(text.contains(r#"deye_device_measurement{device_sn="D1",key="BMSSOC",station_id="S1",unit="%"} 80"#));
        assert!(!text.contains("SELLING_FIRST"));
    }
}
