use crate::{EngineOptions, SearchOptions};

#[test]
fn search_defaults_are_valid() {
    let options = SearchOptions::default();
    assert!(options.validate().is_ok());
    assert_eq!(options.minibatch_size, 256);
    assert!((options.cpuct - 3.4).abs() < 1e-6);
    assert!((options.policy_softmax_temp - 2.2).abs() < 1e-6);
    assert_eq!(options.allowed_node_collisions, 32);
    assert_eq!(options.cache_history_length, 1);
    assert!(!options.noise);
}

#[test]
fn engine_defaults_are_valid() {
    let options = EngineOptions::default();
    assert!(options.validate().is_ok());
    assert_eq!(options.threads, 2);
    assert_eq!(options.nncache, 200_000);
    assert_eq!(options.move_overhead_ms, 100);
}

#[test]
fn out_of_range_is_rejected() {
    let options = SearchOptions::default().with_minibatch_size(0);
    let err = options.validate().unwrap_err();
    assert!(err.to_string().contains("minibatch-size"));

    let options = SearchOptions {
        policy_softmax_temp: 0.01,
        ..SearchOptions::default()
    };
    assert!(options.validate().is_err());

    let options = EngineOptions::default().with_threads(0);
    assert!(options.validate().is_err());
}

#[test]
fn nan_is_rejected() {
    let options = SearchOptions {
        cpuct: f32::NAN,
        ..SearchOptions::default()
    };
    assert!(options.validate().is_err());
}

#[test]
fn builders_compose() {
    let options = SearchOptions::default()
        .with_cpuct(1.2)
        .with_temperature(1.0)
        .with_seed(42);
    assert!((options.cpuct - 1.2).abs() < 1e-6);
    assert!((options.temperature - 1.0).abs() < 1e-6);
    assert_eq!(options.seed, Some(42));
}
