//! End-to-end extraction over a small on-disk feed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use feedclip_transit::prelude::*;

const STOPS: &str = "stop_id,stop_name,stop_lat,stop_lon
A,Alpha,5,1
B,Beta,5,9
C,Gamma,5,20
D,Delta,2,2
E,Echo,8,8
";

const ROUTES: &str = "route_id,route_short_name
R1,1
R2,2
R3,3
";

const TRIPS: &str = "route_id,service_id,trip_id,shape_id
R1,WK,T1,S1
R2,WK,T2,S2
R3,WK,T3,S1
R1,WK,T4,GONE
";

const STOP_TIMES: &str = "trip_id,arrival_time,departure_time,stop_id,stop_sequence
T1,08:00:00,08:00:00,A,10
T1,08:10:00,08:10:00,B,20
T1,08:20:00,08:20:00,C,30
T2,09:00:00,09:00:00,C,1
T3,10:00:00,10:00:00,D,1
T3,10:10:00,10:10:00,C,2
T4,11:10:00,11:10:00,B,5
T4,11:00:00,11:00:00,A,3
";

// Leaves the region through the top edge, comes back, and leaves again to the east
const SHAPES: &str = "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence
S1,5,-5,1
S1,5,5,2
S1,15,5,3
S1,15,8,4
S1,5,8,5
S1,5,15,6
S1,5,20,7
S2,5,20,1
S2,6,21,2
";

const CALENDAR: &str = "service_id,monday,tuesday,start_date,end_date
WK,1,1,20240101,20241231
";

const AGENCY: &str = "agency_id,agency_name,agency_url,agency_timezone
MT,Metro Transit,https://metro.example,Europe/Paris
";

fn write_feed(dir: &Path, with_agency: bool) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("stops.txt"), STOPS).unwrap();
    fs::write(dir.join("routes.txt"), ROUTES).unwrap();
    fs::write(dir.join("trips.txt"), TRIPS).unwrap();
    fs::write(dir.join("stop_times.txt"), STOP_TIMES).unwrap();
    fs::write(dir.join("shapes.txt"), SHAPES).unwrap();
    fs::write(dir.join("calendar.txt"), CALENDAR).unwrap();
    if with_agency {
        fs::write(dir.join("agency.txt"), AGENCY).unwrap();
    }
}

fn extractor() -> FeedExtractor {
    let region = FixedRegion::new(0.0, 0.0, 10.0, 10.0).unwrap();
    FeedExtractor::new(region).with_agency_resolver(SourceAgencyResolver::new(AgencyDefaults::default()))
}

fn read_dir_contents(dir: &Path) -> BTreeMap<String, String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            (name, fs::read_to_string(&path).unwrap())
        })
        .collect()
}

fn read_table(dir: &Path, name: &str) -> FeedTable {
    FeedTable::read(&dir.join(format!("{}.txt", name))).unwrap()
}

fn column(table: &FeedTable, name: &str) -> Vec<String> {
    let idx = table.columns().get(name).unwrap();
    table.rows().iter().map(|r| r.get(idx).unwrap_or("").to_string()).collect()
}

/// Check every referential and sequencing invariant of an output feed.
fn assert_feed_consistent(dir: &Path) {
    let stops = read_table(dir, "stops");
    let stop_times = read_table(dir, "stop_times");
    let trips = read_table(dir, "trips");
    let routes = read_table(dir, "routes");
    let shapes = read_table(dir, "shapes");

    let stop_ids: HashSet<String> = column(&stops, "stop_id").into_iter().collect();
    let trip_ids: HashSet<String> = column(&trips, "trip_id").into_iter().collect();
    let route_ids: HashSet<String> = column(&routes, "route_id").into_iter().collect();
    let shape_ids: HashSet<String> = column(&shapes, "shape_id").into_iter().collect();

    let mut sequences: HashMap<String, Vec<u64>> = HashMap::new();
    for ((trip, stop), seq) in column(&stop_times, "trip_id")
        .into_iter()
        .zip(column(&stop_times, "stop_id"))
        .zip(column(&stop_times, "stop_sequence"))
    {
        assert!(stop_ids.contains(&stop), "stop {} missing", stop);
        assert!(trip_ids.contains(&trip), "trip {} missing", trip);
        sequences.entry(trip).or_default().push(seq.parse().unwrap());
    }
    for (trip, seqs) in &sequences {
        assert!(seqs.len() >= 2, "trip {} has {} stop times", trip, seqs.len());
        assert_eq!(*seqs, (1..=seqs.len() as u64).collect::<Vec<_>>(), "trip {}", trip);
    }
    assert_eq!(sequences.len(), trip_ids.len());

    let mut shape_users: HashMap<String, usize> = HashMap::new();
    for (route, shape) in column(&trips, "route_id").into_iter().zip(column(&trips, "shape_id")) {
        assert!(route_ids.contains(&route), "route {} missing", route);
        if !shape.is_empty() {
            assert!(shape_ids.contains(&shape), "shape {} missing", shape);
            *shape_users.entry(shape).or_default() += 1;
        }
    }
    assert_eq!(shape_users.len(), shape_ids.len());
    assert!(shape_users.values().all(|&users| users == 1));

    let mut points: HashMap<String, Vec<u64>> = HashMap::new();
    for (shape, seq) in column(&shapes, "shape_id").into_iter().zip(column(&shapes, "shape_pt_sequence")) {
        points.entry(shape).or_default().push(seq.parse().unwrap());
    }
    for (shape, seqs) in &points {
        assert_eq!(*seqs, (1..=seqs.len() as u64).collect::<Vec<_>>(), "shape {}", shape);
    }
}

#[test]
fn test_extracts_region_with_closure() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    let output = dir.path().join("city");
    write_feed(&source, true);

    let summary = extractor().run(&ExtractOptions::new(&source, &output)).unwrap();

    let files = read_dir_contents(&output);
    assert_eq!(
        files.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["agency.txt", "calendar.txt", "routes.txt", "shapes.txt", "stop_times.txt", "stops.txt", "trips.txt"]
    );

    assert_eq!(files["stops.txt"], "stop_id,stop_name,stop_lat,stop_lon\nA,Alpha,5,1\nB,Beta,5,9\n");
    assert_eq!(
        files["stop_times.txt"],
        "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
         T1,08:00:00,08:00:00,A,1\n\
         T1,08:10:00,08:10:00,B,2\n\
         T4,11:00:00,11:00:00,A,1\n\
         T4,11:10:00,11:10:00,B,2\n"
    );
    assert_eq!(files["trips.txt"], "route_id,service_id,trip_id,shape_id\nR1,WK,T1,1\nR1,WK,T4,2\n");
    assert_eq!(files["routes.txt"], "route_id,route_short_name\nR1,1\n");
    assert_eq!(
        files["shapes.txt"],
        "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
         1,5,0,1\n\
         1,5,5,2\n\
         1,10,5,3\n\
         1,10,8,4\n\
         1,5,8,5\n\
         1,5,10,6\n\
         2,5,1,1\n\
         2,5,9,2\n"
    );
    assert_eq!(files["calendar.txt"], CALENDAR);
    assert_eq!(files["agency.txt"], AGENCY);

    assert_eq!(summary.trips, TableCount { seen: 4, kept: 2 });
    assert_eq!(summary.routes, TableCount { seen: 3, kept: 1 });
    assert_eq!(summary.stops.kept, 2);
    assert_eq!(summary.shape_count, 2);
    assert_eq!(summary.shape_stats.clipped, 1);
    assert_eq!(summary.shape_stats.fallback_missing, 1);
    assert_eq!(summary.calendar, Some(TableCount { seen: 1, kept: 1 }));
    assert_eq!(summary.calendar_dates, None);
    assert!(summary.validation.is_none());

    assert_feed_consistent(&output);
    assert!(!dir.path().join(".city.staging").exists());
    assert!(!dir.path().join(".city.staging.normalized").exists());
}

#[test]
fn test_extraction_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    write_feed(&source, true);

    let first = dir.path().join("first");
    let second = dir.path().join("second");
    extractor().run(&ExtractOptions::new(&source, &first)).unwrap();
    extractor().run(&ExtractOptions::new(&source, &second)).unwrap();

    assert_eq!(read_dir_contents(&first), read_dir_contents(&second));
}

#[test]
fn test_extraction_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    write_feed(&source, true);

    let once = dir.path().join("once");
    let twice = dir.path().join("twice");
    extractor().run(&ExtractOptions::new(&source, &once)).unwrap();
    let summary = extractor().run(&ExtractOptions::new(&once, &twice)).unwrap();

    assert_eq!(read_dir_contents(&once), read_dir_contents(&twice));
    assert_eq!(summary.prune.total_removed(), 0);
    assert_feed_consistent(&twice);
}

#[test]
fn test_trip_on_unknown_route_takes_no_shape_id() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    write_feed(&source, true);
    fs::write(source.join("trips.txt"), TRIPS.replacen("shape_id\n", "shape_id\nRX,WK,T0,S1\n", 1)).unwrap();
    fs::write(
        source.join("stop_times.txt"),
        format!("{}T0,07:00:00,07:00:00,A,1\nT0,07:10:00,07:10:00,B,2\n", STOP_TIMES),
    )
    .unwrap();

    let once = dir.path().join("once");
    let twice = dir.path().join("twice");
    extractor().run(&ExtractOptions::new(&source, &once)).unwrap();
    extractor().run(&ExtractOptions::new(&once, &twice)).unwrap();

    let trips = read_table(&once, "trips");
    assert_eq!(column(&trips, "trip_id"), vec!["T1", "T4"]);
    assert_eq!(column(&trips, "shape_id"), vec!["1", "2"]);
    assert_eq!(read_dir_contents(&once), read_dir_contents(&twice));
    assert_feed_consistent(&once);
}

#[test]
fn test_delimiter_and_missing_agency() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    write_feed(&source, false);
    fs::write(source.join("stops.txt"), STOPS.replace(',', ";")).unwrap();

    let output = dir.path().join("out");
    extractor().run(&ExtractOptions::new(&source, &output)).unwrap();

    let files = read_dir_contents(&output);
    // Normalization writes every table comma separated
    assert_eq!(files["stops.txt"], "stop_id,stop_name,stop_lat,stop_lon\nA,Alpha,5,1\nB,Beta,5,9\n");
    assert_eq!(
        files["agency.txt"],
        "agency_id,agency_name,agency_url,agency_timezone\n1,Unknown agency,https://example.com,UTC\n"
    );
    assert_feed_consistent(&output);
}

#[test]
fn test_overwrite_replaces_output() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    let output = dir.path().join("out");
    write_feed(&source, true);
    fs::create_dir(&output).unwrap();
    fs::write(output.join("stale.txt"), "old").unwrap();

    let options = ExtractOptions::new(&source, &output);
    assert!(matches!(extractor().run(&options), Err(ExtractError::OutputExists(_))));

    extractor().run(&options.overwrite(true)).unwrap();
    assert!(!output.join("stale.txt").exists());
    assert!(output.join("stops.txt").exists());
}

#[test]
fn test_missing_stop_times_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    write_feed(&source, true);
    fs::remove_file(source.join("stop_times.txt")).unwrap();

    let output = dir.path().join("out");
    let err = extractor().run(&ExtractOptions::new(&source, &output)).unwrap_err();
    assert!(matches!(err, ExtractError::MissingTable(_)));
    assert!(!output.exists());
    assert!(!dir.path().join(".out.staging").exists());
}

#[cfg(unix)]
#[test]
fn test_validator_runs_on_output() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    write_feed(&source, true);

    let output = dir.path().join("out");
    let validator = ProcessValidator::new("sh")
        .with_args(["-c", "test -f {feed}/stops.txt && echo ok"])
        .with_report_dir(dir.path().join("report"));
    let summary = extractor()
        .with_validator(validator)
        .run(&ExtractOptions::new(&source, &output))
        .unwrap();

    let report = summary.validation.unwrap();
    assert_eq!(report.verdict, ValidatorVerdict::Passed);
    assert!(report.output.contains("ok"));
}
