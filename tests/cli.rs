use std::fs;
use std::process::Command;

use tempfile::tempdir;

const TABLE: &str = "flops:deterministic\tmisses:nondeterministic\ttime:result\n\
1.0\t0.3\t2.1\n\
2.0\t0.1\t4.0\n\
3.0\t0.4\t6.2\n\
4.0\t0.2\t7.9\n\
5.0\t0.5\t10.1\n\
6.0\t0.3\t12.0\n\
7.0\t0.6\t14.2\n\
8.0\t0.2\t15.9\n";

#[test]
fn train_predict_and_convert_round_trip_through_files() {
    let tmp = tempdir().expect("temporary directory");
    let table_path = tmp.path().join("trials.tsv");
    fs::write(&table_path, TABLE).expect("write metric table");
    let exe = env!("CARGO_BIN_EXE_eiger");

    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            "train",
            table_path.to_str().expect("path str"),
            "--performance-metric",
            "time",
            "--threshold",
            "0.001",
            "--test-fit",
        ])
        .status()
        .expect("run eiger train");
    assert!(status.success(), "train exited with status {status:?}");
    assert!(tmp.path().join("model.eiger").exists(), "model.eiger missing");

    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args(["convert", "model.eiger", "model.json"])
        .status()
        .expect("run eiger convert");
    assert!(status.success(), "convert exited with status {status:?}");

    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            "predict",
            table_path.to_str().expect("path str"),
            "--model",
            "model.json",
            "--performance-metric",
            "time",
        ])
        .status()
        .expect("run eiger predict");
    assert!(status.success(), "predict exited with status {status:?}");

    let predictions = fs::read_to_string(tmp.path().join("predictions.tsv")).expect("predictions");
    assert_eq!(predictions.lines().count(), 9);
}

#[test]
fn unknown_metric_exits_with_error() {
    let tmp = tempdir().expect("temporary directory");
    let table_path = tmp.path().join("trials.tsv");
    fs::write(&table_path, TABLE).expect("write metric table");

    let output = Command::new(env!("CARGO_BIN_EXE_eiger"))
        .current_dir(tmp.path())
        .args([
            "train",
            table_path.to_str().expect("path str"),
            "--performance-metric",
            "latency",
        ])
        .output()
        .expect("run eiger train");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"), "stderr was: {stderr}");
    assert!(stderr.contains("latency"), "stderr was: {stderr}");
}
