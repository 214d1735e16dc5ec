use std::fs;
use std::path::Path;
use std::sync::Mutex;

use clap::Parser;

use peasoup_fold::args::Args;
use peasoup_fold::exec::{LineSink, StreamKind};
use peasoup_fold::pipeline::{run, FoldReport, RunConfig};
use peasoup_fold::FoldError;

#[derive(Default)]
struct Lines(Mutex<Vec<(StreamKind, String)>>);

impl LineSink for Lines {
    fn emit(&self, stream: StreamKind, line: &str) {
        self.0.lock().unwrap().push((stream, line.to_string()));
    }
}

impl Lines {
    fn stdout(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == StreamKind::Stdout)
            .map(|(_, l)| l.clone())
            .collect()
    }
}

// (id, period, dm, snr)
const CANDIDATES: [(u64, f64, f64, f64); 6] = [
    (0, 0.0025, 50.0, 12.0),
    (1, 0.0050, 50.0, 9.0),
    (2, 0.0080, 120.0, 20.0),
    (3, 0.2500, 80.0, 15.0),
    (4, 1.5000, 30.0, 7.0),
    (5, 0.0031, 55.0, 30.0),
];

fn write_overview(dir: &Path) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0"?>
<peasoup_search>
  <header_parameters>
    <source_name>Ter5</source_name>
    <tsamp>0.000128</tsamp>
    <nsamples>2000000</nsamples>
  </header_parameters>
  <search_parameters>
    <infilename>/data/raw/cfbf00088.fil</infilename>
    <size>2097152</size>
    <cdm>237.0</cdm>
  </search_parameters>
  <segment_parameters>
    <segment_start_sample>0</segment_start_sample>
    <segment_nsamples>2000000</segment_nsamples>
    <segment_pepoch>60310.5</segment_pepoch>
  </segment_parameters>
  <candidates>
"#,
    );
    for (id, period, dm, snr) in CANDIDATES {
        xml.push_str(&format!(
            "    <candidate id=\"{id}\"><period>{period}</period><dm>{dm}</dm><acc>0</acc>\
             <nh>1</nh><snr>{snr}</snr><nassoc>0</nassoc><pb>0</pb><a1>0</a1><phi>0</phi>\
             <t0>0</t0><omega>0</omega><ecc>0</ecc><jerk>0</jerk></candidate>\n"
        ));
    }
    xml.push_str("  </candidates>\n</peasoup_search>\n");
    let path = dir.join("overview.xml");
    fs::write(&path, xml).unwrap();
    path.to_string_lossy().into_owned()
}

fn config_from(argv: &[&str]) -> RunConfig {
    let mut full = vec!["peasoup_fold"];
    full.extend_from_slice(argv);
    RunConfig::from_args(&Args::try_parse_from(full).unwrap()).unwrap()
}

fn column(path: &Path, name: &str) -> Vec<String> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let idx = reader.headers().unwrap().iter().position(|h| h == name).unwrap();
    reader
        .records()
        .map(|r| r.unwrap().get(idx).unwrap().to_string())
        .collect()
}

#[cfg(unix)]
#[test]
fn avoid_then_select_then_fold_with_prepfold() {
    let dir = tempfile::tempdir().unwrap();
    let xml = write_overview(dir.path());
    let out = dir.path().join("out");
    let out_str = out.to_string_lossy().into_owned();

    let avoid = dir.path().join("known.csv");
    fs::write(&avoid, "period_ms,period_tolerance_ms,dm,dm_tolerance\n8.0,0.05,120.0,2.0\n").unwrap();
    let select = dir.path().join("select.json");
    fs::write(
        &select,
        r#"{"ter5": [
            {"period": {"min": 0.001, "max": 0.01}, "snr": {"min": 10, "max": 1000}, "total_cands_limit": 1},
            {"period": {"min": 0.1, "max": 10.0}, "snr": {"min": 0, "max": 1000}}
        ]}"#,
    )
    .unwrap();

    let config = config_from(&[
        "-i",
        &xml,
        "-o",
        &out_str,
        "-t",
        "presto",
        "--presto-threads",
        "2",
        "--prepfold-bin",
        "true",
        "--avoid-folding-file",
        avoid.to_str().unwrap(),
        "--config-file",
        select.to_str().unwrap(),
    ]);
    let summary = run(&config, &Lines::default()).unwrap();
    assert_eq!(summary.loaded, 6);
    assert_eq!(summary.avoided, 1);
    assert_eq!(summary.selected, 3);

    match &summary.report {
        FoldReport::Presto(outcomes) => {
            assert_eq!(outcomes.len(), 3);
            assert!(outcomes.iter().all(|o| o.is_success()));
        }
        other => panic!("expected prepfold outcomes, got {other:?}"),
    }

    let audit = out.join("filtered_df_for_folding.csv");
    assert_eq!(column(&audit, "cand_id_in_file"), vec!["0", "3", "4"]);
    assert_eq!(column(&audit, "period")[1], "0.250000000000000000");
    assert_eq!(column(&audit, "filterbank_file")[0], "/data/raw/cfbf00088.fil");

    let avoided = out.join("avoided_candidates_to_fold.csv");
    assert_eq!(column(&avoided, "cand_id_in_file"), vec!["2"]);
    assert_eq!(column(&avoided, "period"), vec!["0.008"]);
}

#[cfg(unix)]
#[test]
fn pulsarx_receives_one_candfile_for_the_whole_selection() {
    let dir = tempfile::tempdir().unwrap();
    let xml = write_overview(dir.path());
    let out = dir.path().to_string_lossy().into_owned();

    // `echo` stands in for PulsarX so the argument vector comes back on stdout.
    let config = config_from(&[
        "-i",
        &xml,
        "-o",
        &out,
        "--pulsarx-bin",
        "echo",
        "--pulsarx-threads",
        "2",
        "-b",
        "cfbf00088",
        "-c",
        "0:10",
    ]);

    let sink = Lines::default();
    let summary = run(&config, &sink).unwrap();
    assert_eq!(summary.selected, 6);
    assert!(matches!(summary.report, FoldReport::Pulsarx(ref inv) if inv.success()));

    let candfile = dir.path().join("pulsarx.candfile");
    let text = fs::read_to_string(&candfile).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "#id DM accel F0 F1 F2 S/N");
    assert_eq!(lines.len(), 7);
    assert_eq!(lines[1], "0 50.0 0.0 400.0 0 0 12.0");

    let echoed = sink.stdout().join(" ");
    assert!(echoed.contains(&format!("--candfile {}", candfile.display())));
    assert!(echoed.contains("-i 88"));
    assert!(echoed.contains("--rfi zap 0 10"));
    assert!(echoed.contains("-f /data/raw/cfbf00088.fil"));
    assert!(echoed.contains("--srcname Ter5"));
    assert!(echoed.contains("--cdm 237.0 "));
    assert!(echoed.contains("--pepoch 60310.5 --frac 0.0 1.0 "));
    assert!(echoed.ends_with("--render"));
}

#[test]
fn empty_selection_still_writes_audit_file() {
    let dir = tempfile::tempdir().unwrap();
    let xml = write_overview(dir.path());
    let out = dir.path().to_string_lossy().into_owned();
    let select = dir.path().join("select.json");
    fs::write(&select, r#"{"none": [{"period": {"min": 100, "max": 200}}]}"#).unwrap();

    let config = config_from(&["-i", &xml, "-o", &out, "--config-file", select.to_str().unwrap()]);
    let summary = run(&config, &Lines::default()).unwrap();
    assert_eq!(summary.selected, 0);
    assert!(matches!(summary.report, FoldReport::Skipped));

    let audit = dir.path().join("filtered_df_for_folding.csv");
    assert!(column(&audit, "cand_id_in_file").is_empty());
    assert!(!dir.path().join("avoided_candidates_to_fold.csv").exists());
    assert!(!dir.path().join("pulsarx.candfile").exists());
}

#[test]
fn unknown_filter_column_fails_before_any_output() {
    let dir = tempfile::tempdir().unwrap();
    let xml = write_overview(dir.path());
    let out = dir.path().to_string_lossy().into_owned();
    let select = dir.path().join("select.json");
    fs::write(&select, r#"{"bad": [{"spin": {"min": 0, "max": 1}}]}"#).unwrap();

    let config = config_from(&["-i", &xml, "-o", &out, "--config-file", select.to_str().unwrap()]);
    let err = run(&config, &Lines::default()).unwrap_err();
    assert!(matches!(err, FoldError::Config(_)), "{err}");
    assert!(!dir.path().join("filtered_df_for_folding.csv").exists());
}

#[cfg(unix)]
#[test]
fn failing_pulsarx_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let xml = write_overview(dir.path());
    let out = dir.path().to_string_lossy().into_owned();

    let config = config_from(&["-i", &xml, "-o", &out, "--pulsarx-bin", "false", "--pulsarx-threads", "1"]);
    let err = run(&config, &Lines::default()).unwrap_err();
    assert!(matches!(err, FoldError::ToolFailed { code: 1, .. }), "{err}");
    assert!(dir.path().join("filtered_df_for_folding.csv").exists());
}
