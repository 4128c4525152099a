use std::{
    path::{Path, PathBuf},
    process::{Command, Output},
};

use serde_json::Value;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn chemdex_bin() -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_chemdex") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("chemdex");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}

fn chemdex(data_dir: &Path, args: &[&str]) -> Result<Output, std::io::Error> {
    let bin = chemdex_bin().map_err(std::io::Error::other)?;
    let mut cmd = Command::new(bin);
    cmd.arg("--data-dir").arg(data_dir).arg("--quiet").args(args);
    for var in [
        "CHEMDEX_LOG",
        "CHEMDEX_DATA_DIR",
        "CHEMDEX_BATCH_SIZE",
        "CHEMDEX_MAX_IN_FLIGHT",
        "CHEMDEX_PAGE_SIZE",
    ] {
        cmd.env_remove(var);
    }
    cmd.output()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn setup(root: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let tree = root.join("structures");
    std::fs::create_dir_all(&tree)?;
    std::fs::write(
        tree.join("organics.smi"),
        "CCO ethanol\nC methane\nCC(=O)O acetic acid\n",
    )?;
    std::fs::write(
        tree.join("reactions.smi"),
        "CCO.CC(=O)O>>CCOC(C)=O esterification\n",
    )?;
    std::fs::write(tree.join("notes.txt"), "not a structure")?;
    Ok(tree)
}

#[test]
fn add_index_search_dump_clear() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let data_dir = tmp.path().join("data");
    let tree = setup(tmp.path())?;

    let out = chemdex(
        &data_dir,
        &["collection", "add", tree.to_str().unwrap(), "--name", "lab"],
    )?;
    assert!(out.status.success(), "{out:?}");
    assert!(stdout(&out).contains("Added collection 'lab'"));

    let out = chemdex(&data_dir, &["index", "-c", "lab"])?;
    assert!(out.status.success(), "{out:?}");
    let log = String::from_utf8_lossy(&out.stderr);
    assert!(log.contains("Skipped notes.txt"), "{log}");

    let out = chemdex(
        &data_dir,
        &[
            "search",
            r#"{"operation":"equals","field":"name","value":"ethanol"}"#,
            "-c",
            "lab",
            "--json",
        ],
    )?;
    assert!(out.status.success(), "{out:?}");
    let results: Value = serde_json::from_str(&stdout(&out))?;
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["fields"]["name"], "ethanol");
    assert_eq!(results[0]["type"], "molecules");

    let out = chemdex(
        &data_dir,
        &[
            "search",
            r#"{"operation":"similar","field":"structure","value":{"structure":"OCC","threshold":0.5}}"#,
            "-c",
            "lab",
            "--json",
        ],
    )?;
    assert!(out.status.success(), "{out:?}");
    let results: Value = serde_json::from_str(&stdout(&out))?;
    let results = results.as_array().unwrap();
    let ranked: Vec<_> = results
        .iter()
        .map(|r| (r["fields"]["name"].clone(), r["score"].as_f64()))
        .collect();
    assert_eq!(ranked.len(), 2, "{ranked:?}");
    assert_eq!(ranked[0], (Value::from("ethanol"), Some(1.0)));
    assert_eq!(ranked[1].0, "acetic acid");
    let acid = ranked[1].1.unwrap();
    assert!((acid - 5.0 / 7.0).abs() < 1e-9, "{acid}");

    let out = chemdex(
        &data_dir,
        &[
            "search",
            r#"{"operation":"prefix","field":"name","value":"ester"}"#,
            "-c",
            "lab",
            "--schema",
            "reaction",
        ],
    )?;
    assert!(out.status.success(), "{out:?}");
    assert!(stdout(&out).contains("esterification"));

    let out = chemdex(&data_dir, &["dump", "-c", "lab"])?;
    assert!(out.status.success(), "{out:?}");
    let dumped = stdout(&out);
    assert_eq!(dumped.lines().count(), 3);
    for line in dumped.lines() {
        let record: Value = serde_json::from_str(line)?;
        assert!(record["id"].is_string());
    }

    let out = chemdex(&data_dir, &["clear", "-c", "lab"])?;
    assert!(out.status.success(), "{out:?}");
    let out = chemdex(&data_dir, &["dump", "-c", "lab"])?;
    assert!(stdout(&out).is_empty());
    Ok(())
}

#[test]
fn invalid_batch_size_is_rejected() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let data_dir = tmp.path().join("data");
    let tree = setup(tmp.path())?;
    chemdex(
        &data_dir,
        &["collection", "add", tree.to_str().unwrap(), "--name", "lab"],
    )?;

    for size in ["0", "-3"] {
        let out = chemdex(&data_dir, &["index", "--batch-size", size])?;
        assert!(!out.status.success(), "batch size {size} was accepted");
    }

    let out = chemdex(&data_dir, &["config", "set", "batch_size", "0"])?;
    assert!(!out.status.success());
    Ok(())
}

#[test]
fn settings_round_trip() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let data_dir = tmp.path().join("data");

    let out = chemdex(&data_dir, &["config", "set", "page_size", "2"])?;
    assert!(out.status.success(), "{out:?}");

    let out = chemdex(&data_dir, &["config", "show", "--json"])?;
    let shown: Value = serde_json::from_str(&stdout(&out))?;
    assert_eq!(shown["page_size"]["value"], 2);
    assert_eq!(shown["page_size"]["source"], "config");
    assert_eq!(shown["batch_size"]["value"], 500);
    assert_eq!(shown["batch_size"]["source"], "default");

    let out = chemdex(&data_dir, &["config", "set", "page_size", "5000"])?;
    assert!(!out.status.success());

    let out = chemdex(&data_dir, &["config", "clear", "page_size"])?;
    assert!(out.status.success());
    let out = chemdex(&data_dir, &["config", "clear", "page_size"])?;
    assert!(!out.status.success());
    Ok(())
}

#[test]
fn status_counts_records() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let data_dir = tmp.path().join("data");
    let tree = setup(tmp.path())?;
    chemdex(
        &data_dir,
        &["collection", "add", tree.to_str().unwrap(), "--name", "lab"],
    )?;
    let out = chemdex(&data_dir, &["index", "--async"])?;
    assert!(out.status.success(), "{out:?}");

    let out = chemdex(&data_dir, &["status", "--json"])?;
    let status: Value = serde_json::from_str(&stdout(&out))?;
    assert_eq!(status["collections"][0]["name"], "lab");
    assert_eq!(status["collections"][0]["molecules"], 3);
    assert_eq!(status["collections"][0]["reactions"], 1);
    Ok(())
}
