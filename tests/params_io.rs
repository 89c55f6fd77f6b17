use argsmc::model::ArgModel;
use argsmc::params::{load_params, save_params, ArgParamsFile};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_path(prefix: &str, ext: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before unix epoch")
        .as_nanos();
    path.push(format!("{prefix}_{}_{}.{}", std::process::id(), nanos, ext));
    path
}

#[test]
fn params_json_roundtrip() {
    let path = unique_temp_path("argsmc_params", "json");
    let params = ArgParamsFile {
        ntimes: 20,
        maxtime: 200_000.0,
        delta: 0.01,
        popsizes: vec![1e4; 20],
        rho: 1.5e-8,
        mu: 2.5e-8,
    };

    save_params(&path, &params).expect("failed to save params");
    let loaded = load_params(&path).expect("failed to load params");

    assert_eq!(loaded.ntimes, params.ntimes);
    assert!((loaded.maxtime - params.maxtime).abs() < 1e-9);
    assert!((loaded.delta - params.delta).abs() < 1e-12);
    assert_eq!(loaded.popsizes, params.popsizes);
    assert!((loaded.rho - params.rho).abs() < 1e-15);
    assert!((loaded.mu - params.mu).abs() < 1e-15);

    let _ = fs::remove_file(path);
}

#[test]
fn model_roundtrips_through_params_file() {
    let path = unique_temp_path("argsmc_model", "json");
    let model = ArgModel::new_log(20, 200_000.0, 0.01, 1e4, 1.5e-8, 2.5e-8).expect("model");

    model.save_params(&path).expect("failed to save model");
    let loaded = ArgModel::load(&path).expect("failed to load model");

    assert_eq!(loaded.ntimes, model.ntimes);
    assert_eq!(loaded.times.len(), model.times.len());
    for (a, b) in loaded.times.iter().zip(&model.times) {
        assert!((a - b).abs() <= 1e-9 * b.max(1.0));
    }
    assert_eq!(loaded.popsizes, model.popsizes);

    let _ = fs::remove_file(path);
}

#[test]
fn invalid_params_are_rejected_on_load() {
    let path = unique_temp_path("argsmc_bad_params", "json");
    let params = ArgParamsFile {
        ntimes: 20,
        maxtime: 200_000.0,
        delta: 0.01,
        // wrong length: one popsize per time point is required
        popsizes: vec![1e4; 3],
        rho: 1.5e-8,
        mu: 2.5e-8,
    };

    save_params(&path, &params).expect("failed to save params");
    assert!(ArgModel::load(&path).is_err());

    let _ = fs::remove_file(path);
}
