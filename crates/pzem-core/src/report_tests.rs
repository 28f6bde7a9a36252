use serde_json::Value;

use crate::report::{Announcement, Report, ReportContext};
use crate::sample::{Reading, Sample};
use crate::stats::AggregationWindow;

fn reading(voltage: f64, power: f64) -> Reading {
    Reading {
        address: 0x2A,
        voltage,
        current: power / voltage,
        active_power: power,
        active_energy: 1234.0,
        frequency: 50.0,
        power_factor: 0.98,
    }
}

fn context() -> ReportContext {
    ReportContext {
        address: 0x2A,
        now_ms: 300_500,
        link_signal_strength: Some(-61),
        interval_minutes: 5,
    }
}

fn filled_window() -> (AggregationWindow, Sample) {
    let mut window = AggregationWindow::new();
    let mut last = Sample::new(reading(230.0, 100.0), 0);
    for (i, (v, p)) in [(229.0, 90.0), (231.0, 110.0), (230.0, 100.0)].iter().enumerate() {
        last = Sample::new(reading(*v, *p), 1_000 * (i as u64 + 1));
        window.add_sample(&last);
    }
    (window, last)
}

#[test]
fn empty_window_builds_no_report() {
    let window = AggregationWindow::new();

    assert!(Report::build(&window, None, &context()).is_none());
}

#[test]
fn full_report_carries_window_summary() {
    // Arrange
    let (window, last) = filled_window();

    // Act
    let report = Report::build(&window, Some(&last), &context()).expect("report");
    let encoded = report.encode(1024).expect("encode");
    let json: Value = serde_json::from_slice(&encoded.payload).expect("json");

    // Assert
    assert!(!encoded.reduced);
    assert_eq!(json["device_address"], "2a");
    assert_eq!(json["timestamp"], 300_500);
    assert_eq!(json["link_signal_strength"], -61);
    assert_eq!(json["interval_minutes"], 5);
    assert_eq!(json["sample_count"], 3);
    assert_eq!(json["period_start"], 1_000);
    assert_eq!(json["period_end"], 3_000);
    assert_eq!(json["avg_voltage"], 230.0);
    assert_eq!(json["avg_power"], 100.0);
    assert_eq!(json["total_energy"], 1234.0);
    assert_eq!(json["min_voltage"], 229.0);
    assert_eq!(json["max_voltage"], 231.0);
    assert_eq!(json["min_power"], 90.0);
    assert_eq!(json["max_power"], 110.0);
    assert!(json.get("address").is_none(), "raw address is not part of the full report");
    assert_eq!(json["current_data"]["time"], 3_000);
    assert_eq!(json["current_data"]["voltage"], 230.0);
    assert_eq!(json["current_data"]["active_power"], 100.0);
    assert_eq!(json["current_data"]["address"], 0x2A);
}

#[test]
fn oversized_report_falls_back_to_reduced_record() {
    // Arrange
    let (window, last) = filled_window();
    let report = Report::build(&window, Some(&last), &context()).expect("report");
    let full_len = serde_json::to_vec(&report).expect("full").len();

    // Act
    let encoded = report.encode(full_len - 1).expect("encode");
    let json: Value = serde_json::from_slice(&encoded.payload).expect("json");

    // Assert
    assert!(encoded.reduced);
    assert!(encoded.payload.len() < full_len);
    assert!(encoded.payload.len() <= 256, "reduced record stays small");
    let mut keys: Vec<&str> = json
        .as_object()
        .expect("object")
        .keys()
        .map(String::as_str)
        .collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        [
            "address",
            "avg_current",
            "avg_power",
            "avg_voltage",
            "energy",
            "interval_min",
            "samples",
            "timestamp"
        ]
    );
    assert_eq!(json["address"], 0x2A);
    assert_eq!(json["samples"], 3);
    assert_eq!(json["energy"], 1234.0);
}

#[test]
fn report_at_exact_limit_is_sent_in_full() {
    let (window, last) = filled_window();
    let report = Report::build(&window, Some(&last), &context()).expect("report");
    let full_len = serde_json::to_vec(&report).expect("full").len();

    let encoded = report.encode(full_len).expect("encode");

    assert!(!encoded.reduced);
    assert_eq!(encoded.payload.len(), full_len);
}

#[test]
fn announcement_names_client_and_hex_address() {
    let announcement = Announcement::connected("PZEM_MONITOR_001", 0x02);

    let json = serde_json::to_value(&announcement).expect("json");

    assert_eq!(
        json,
        serde_json::json!({"status": "connected", "device": "PZEM_MONITOR_001", "address": "2"})
    );
}

#[test]
fn hex_addresses_are_lowercase() {
    let (window, last) = filled_window();

    let report = Report::build(&window, Some(&last), &context()).expect("report");
    let announcement = Announcement::connected("PZEM_MONITOR_001", 0x2A);

    assert_eq!(report.device_address, "2a");
    assert_eq!(announcement.address, "2a");
}
