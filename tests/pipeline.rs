//! End-to-end runs of both extractors over the in-memory collaborators.

use significant_locations::{
    reduce, ExtractionMethod, GpsReading, Location, LocationConfig, LocationEngine,
    MemoryAttachmentStore, MemoryGpsSource, ReductionParams, ReductionState,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn density_config() -> LocationConfig {
    LocationConfig {
        method: ExtractionMethod::DensityPartition,
        min_points: 2,
        ..LocationConfig::default()
    }
}

/// 20 readings at one site followed by 10 at another, one per second.
fn two_site_history() -> MemoryGpsSource {
    let mut gps = MemoryGpsSource::new();
    gps.insert(
        "U1",
        (0..20).map(|i| GpsReading::new(i * 1000, 37.0, -122.0)),
    );
    gps.insert(
        "U1",
        (20..30).map(|i| GpsReading::new(i * 1000, 38.0, -121.0)),
    );
    gps
}

fn assert_well_formed(locations: &[Location], start: i64, end: i64) {
    let mut total = 0.0;
    for (i, location) in locations.iter().enumerate() {
        assert_eq!(location.rank, i);
        assert_eq!(location.window_start, start);
        assert_eq!(location.window_end, end);
        assert!((0.0..=1.0).contains(&location.proportion));
        assert!(location.duration_ms <= (end - start) as u64);
        total += location.proportion;
    }
    assert!(total <= 1.0 + 1e-9);
}

#[test]
fn test_density_two_sites() {
    init_logging();
    let gps = two_site_history();
    let store = MemoryAttachmentStore::new();
    let engine = LocationEngine::new(&gps, &store, density_config());

    let locations = engine.significant_locations("U1", 0, 30_000).unwrap();

    assert_eq!(locations.len(), 2);
    assert_well_formed(&locations, 0, 30_000);
    assert!((locations[0].proportion - 2.0 / 3.0).abs() < 1e-9);
    assert!((locations[1].proportion - 1.0 / 3.0).abs() < 1e-9);
    assert!((locations[0].longitude + 122.0).abs() < 1e-6);
    assert!(locations[0].radius_meters.unwrap() < 1.0);
}

#[test]
fn test_density_separates_nearby_sites() {
    init_logging();
    // About 11 km apart, one reading per second at each
    let mut gps = MemoryGpsSource::new();
    gps.insert(
        "U1",
        (0..50).map(|i| GpsReading::new(i * 1000, 37.0, -122.0)),
    );
    gps.insert(
        "U1",
        (50..100).map(|i| GpsReading::new(i * 1000, 37.1, -122.0)),
    );
    let store = MemoryAttachmentStore::new();
    let engine = LocationEngine::new(&gps, &store, density_config());

    let locations = engine.significant_locations("U1", 0, 100_000).unwrap();

    assert_eq!(locations.len(), 2);
    assert_well_formed(&locations, 0, 100_000);
    for location in &locations {
        assert!((location.proportion - 0.5).abs() < 1e-9);
        assert_eq!(location.duration_ms, 49_000);
    }
    let mut latitudes: Vec<f64> = locations.iter().map(|l| l.latitude).collect();
    latitudes.sort_by(|a, b| a.total_cmp(b));
    assert!((latitudes[0] - 37.0).abs() < 1e-6);
    assert!((latitudes[1] - 37.1).abs() < 1e-6);
}

#[test]
fn test_frequency_dominant_cell() {
    init_logging();
    let mut gps = MemoryGpsSource::new();
    gps.insert(
        "U1",
        (0..6).map(|i| GpsReading::new(i * 1000, 37.7749, -122.4194)),
    );
    gps.insert(
        "U1",
        (0..4).map(|i| GpsReading::new(6000 + i * 1000, 10.0 * (i + 1) as f64, 20.0)),
    );
    let store = MemoryAttachmentStore::new();
    let config = LocationConfig {
        min_cluster_size: 0.5,
        ..LocationConfig::default()
    };
    let engine = LocationEngine::new(&gps, &store, config);

    let locations = engine.significant_locations("U1", 0, 10_000).unwrap();

    assert_eq!(locations.len(), 1);
    assert_well_formed(&locations, 0, 10_000);
    assert_eq!(locations[0].proportion, 1.0);
    assert_eq!(locations[0].latitude, 37.775);
    assert_eq!(locations[0].longitude, -122.419);
}

#[test]
fn test_reduction_is_idempotent() {
    let gps = two_site_history();
    let params = ReductionParams {
        min_points: 2,
        ..ReductionParams::default()
    };

    let once = reduce(&gps, "U1", 30_000, &ReductionState::default(), &params).unwrap();
    let twice = reduce(&gps, "U1", 30_000, &once, &params).unwrap();

    assert_eq!(once, twice);
    assert_eq!(once.watermark, 30_000);
    assert_eq!(once.total_count(), 30);
}

#[test]
fn test_watermark_never_moves_back() {
    let gps = two_site_history();
    let params = ReductionParams {
        min_points: 2,
        ..ReductionParams::default()
    };

    let state = reduce(&gps, "U1", 30_000, &ReductionState::default(), &params).unwrap();
    let earlier = reduce(&gps, "U1", 10_000, &state, &params).unwrap();

    assert_eq!(earlier.watermark, 30_000);
    assert_eq!(earlier, state);
}

#[test]
fn test_incremental_invocations_snap_into_existing_summary() {
    init_logging();
    let gps = two_site_history();
    let store = MemoryAttachmentStore::new();
    let engine = LocationEngine::new(&gps, &store, density_config());

    let first = engine.significant_locations("U1", 0, 15_000).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(engine.reduction_state("U1").unwrap().summary_points.len(), 1);

    let second = engine.significant_locations("U1", 0, 30_000).unwrap();
    assert_eq!(second.len(), 2);

    // The second pass snapped its readings at the first site into the
    // existing summary point instead of adding a new one
    let state = engine.reduction_state("U1").unwrap();
    assert_eq!(state.watermark, 30_000);
    assert_eq!(state.summary_points.len(), 2);
    assert_eq!(state.summary_points[0].count, 20);
    assert_eq!(state.total_count(), 30);
}

#[test]
fn test_duplicate_timestamps_collapsed() {
    let mut gps = MemoryGpsSource::new();
    gps.insert(
        "U1",
        (0..10).flat_map(|i| {
            [
                GpsReading::new(i * 1000, 37.0, -122.0),
                GpsReading::new(i * 1000, 37.0, -122.0),
            ]
        }),
    );
    let store = MemoryAttachmentStore::new();
    let engine = LocationEngine::new(&gps, &store, density_config());

    engine.significant_locations("U1", 0, 10_000).unwrap();
    assert_eq!(engine.reduction_state("U1").unwrap().total_count(), 10);
}

#[test]
fn test_unknown_subject_yields_nothing() {
    let gps = two_site_history();
    let store = MemoryAttachmentStore::new();

    for method in [ExtractionMethod::Frequency, ExtractionMethod::DensityPartition] {
        let config = LocationConfig {
            method,
            ..density_config()
        };
        let engine = LocationEngine::new(&gps, &store, config);
        assert!(engine.significant_locations("U2", 0, 30_000).unwrap().is_empty());
    }
    assert!(store.is_empty());
}

#[test]
fn test_output_serializes_to_records() {
    let gps = two_site_history();
    let store = MemoryAttachmentStore::new();
    let engine = LocationEngine::new(&gps, &store, LocationConfig::default());

    let locations = engine.significant_locations("U1", 0, 30_000).unwrap();
    let json = serde_json::to_value(&locations).unwrap();

    let first = &json[0];
    assert_eq!(first["start"], 0);
    assert_eq!(first["end"], 30_000);
    assert_eq!(first["rank"], 0);
    assert_eq!(first["duration"], 19_000);
    assert!(first["radius"].is_number());
}
