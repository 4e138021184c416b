use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_bp-cli"))
}

fn tmp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("bp_cli_{}_{}_{}", std::process::id(), nanos, tag));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn event_line(anchor: usize, companion: usize, far: bool) -> String {
    let c = format!(
        r#"{{"segment": {companion}, "energy": 1.5, "psd": 0.1, "z": -8.0, "mult_clust": 1, "mult_clust_ioni": 1, "time": {}}}"#,
        if far { 105.0 } else { 99.8 }
    );
    let (prompt, far_list) = if far { (String::new(), c) } else { (c, String::new()) };
    format!(
        r#"{{"anchor": {{"segment": {anchor}, "energy": 0.85, "psd": 0.25, "z": 0.0, "time": 100.0}}, "prompt": [{prompt}], "far": [{far_list}]}}"#
    )
}

fn write_events(dir: &PathBuf, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

fn stdout_json(out: &Output) -> serde_json::Value {
    assert!(
        out.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("stdout should be JSON")
}

#[test]
fn run_reports_directions_and_cutflow() {
    let dir = tmp_dir("run");
    let mut lines: Vec<String> = (0..8).map(|_| event_line(50, 50, false)).collect();
    lines.extend((0..3).map(|_| event_line(50, 51, false)));
    lines.extend((0..4).map(|_| event_line(50, 50, true)));
    lines.push(event_line(0, 0, false));
    let events = write_events(&dir, "events.ndjson", &lines);
    let hists = dir.join("hists.json");

    let out = run(&[
        "run",
        "--events",
        events.to_str().unwrap(),
        "--threads",
        "1",
        "--histograms",
        hists.to_str().unwrap(),
    ]);
    let v = stdout_json(&out);

    assert_eq!(v["cutflow"]["events"], 16);
    assert_eq!(v["cutflow"]["anchors_accepted"], 15);
    assert_eq!(v["cutflow"]["correlated"], 11);
    assert_eq!(v["cutflow"]["accidental"], 4);
    assert_eq!(v["cutflow"]["anchor_rejections"]["anchor_fiducial"], 1);
    assert!(v["directions"]["Data"]["px"]["value"].is_number());
    assert_eq!(v["directions"]["Data"]["px"]["status"], "valid");
    assert!(v["asymmetry"]["X"]["plus_minus"]["value"].is_number());
    assert!(v.get("histograms").is_none());

    let h: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&hists).unwrap()).unwrap();
    let records = h.as_array().unwrap();
    assert_eq!(records.len(), 24);
    assert_eq!(records[0]["histogram"]["name"], "Data Correlated X");

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn file_list_and_parallel_match_sequential() {
    let dir = tmp_dir("list");
    let a: Vec<String> = (0..20).map(|i| event_line(16 + i % 9, 17 + i % 9, i % 3 == 0)).collect();
    let b: Vec<String> = (0..20).map(|i| event_line(30 + i % 9, 30 + i % 9, i % 4 == 0)).collect();
    let fa = write_events(&dir, "a.ndjson", &a);
    write_events(&dir, "b.ndjson", &b);
    let list = dir.join("runs.txt");
    std::fs::write(&list, "# two runs\nb.ndjson\n\n").unwrap();

    let seq = stdout_json(&run(&[
        "run",
        "--events",
        fa.to_str().unwrap(),
        "--file-list",
        list.to_str().unwrap(),
        "--threads",
        "1",
    ]));
    let par = stdout_json(&run(&[
        "run",
        "--events",
        fa.to_str().unwrap(),
        "--file-list",
        list.to_str().unwrap(),
    ]));
    assert_eq!(seq["cutflow"]["events"], 40);
    assert_eq!(seq["cutflow"], par["cutflow"]);

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn run_without_events_fails() {
    let out = run(&["run"]);
    assert!(!out.status.success());
}

#[test]
fn unsorted_exclude_list_is_rejected() {
    let dir = tmp_dir("cfg");
    let cfg = dir.join("bad.yaml");
    std::fs::write(&cfg, "excluded_segments: [20, 10]\n").unwrap();
    let events = write_events(&dir, "e.ndjson", &[event_line(50, 50, false)]);

    let out = run(&[
        "run",
        "--config",
        cfg.to_str().unwrap(),
        "--events",
        events.to_str().unwrap(),
    ]);
    assert!(!out.status.success());
    let out = run(&["config", "--config", cfg.to_str().unwrap()]);
    assert!(!out.status.success());

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn json_config_overrides_defaults() {
    let dir = tmp_dir("json");
    let cfg = dir.join("cfg.json");
    std::fs::write(&cfg, r#"{"excluded_segments": [10, 49], "geometry": {"segment_pitch": 140.0}}"#)
        .unwrap();
    let out = run(&["config", "--config", cfg.to_str().unwrap()]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let text = String::from_utf8(out.stdout).unwrap();
    assert!(text.contains("segment_pitch: 140.0"), "{text}");
    assert!(text.contains("half_life: 0.1643"), "{text}");

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn topology_renders_grid() {
    let out = run(&["topology", "--exclude", "0,153"]);
    assert!(out.status.success());
    let text = String::from_utf8(out.stdout).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 12);
    assert!(lines[0].ends_with('□'));
    assert!(lines[10].starts_with('□'));
    assert_eq!(lines[11], "live segments: 152 / 154");
}
