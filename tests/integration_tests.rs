//! Integration tests for tree-tester
//!
//! Builds trees against the in-memory and local filesystem backends,
//! damages them in various ways and checks what validation reports.

use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tree_tester::backend::{ConnectionId, DirEntry, LocalBackend, MemoryBackend, StorageBackend};
use tree_tester::content::{Manifest, MANIFEST_NAME};
use tree_tester::hierarchy::HierarchyOptions;
use tree_tester::tree::{TreeBuilder, TreeValidator, EARLY_TERMINATION};
use tree_tester::{CancelToken, TestStatus};

const BASE: &str = "/eos/pps/base";

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn build(rt: &tokio::runtime::Runtime, backend: Arc<dyn StorageBackend>, files: u64) -> TestStatus {
    TreeBuilder::new(
        backend,
        rt.handle().clone(),
        HierarchyOptions::new(BASE, 1234, 4, files),
    )
    .connections(8)
    .window(64)
    .start()
    .unwrap()
    .wait()
    .unwrap()
}

fn validate(rt: &tokio::runtime::Runtime, backend: Arc<dyn StorageBackend>) -> TestStatus {
    TreeValidator::new(backend, rt.handle().clone(), BASE)
        .connections(8)
        .start()
        .unwrap()
        .wait()
        .unwrap()
}

fn built_memory(rt: &tokio::runtime::Runtime) -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    let status = build(rt, backend.clone(), 400);
    assert!(status.ok(), "{}", status.pretty_print(0));
    backend
}

fn listing(rt: &tokio::runtime::Runtime, backend: &MemoryBackend, dir: &str) -> Vec<DirEntry> {
    rt.block_on(backend.list_dir(ConnectionId(0), dir)).unwrap()
}

fn first_file(dir: &str, entries: &[DirEntry]) -> String {
    entries
        .iter()
        .find(|e| !e.is_dir && e.name != MANIFEST_NAME)
        .map(|e| format!("{}/{}", dir, e.name))
        .unwrap()
}

fn first_subdir(entries: &[DirEntry]) -> String {
    entries
        .iter()
        .find(|e| e.is_dir)
        .map(|e| format!("{}/{}", BASE, e.name))
        .unwrap()
}

/// Every node carrying local errors, by description
fn failing_nodes(status: &TestStatus) -> Vec<(String, Vec<String>)> {
    let mut out = Vec::new();
    let mut stack = vec![status];
    while let Some(node) = stack.pop() {
        if !node.errors().is_empty() {
            out.push((node.description().to_string(), node.errors().to_vec()));
        }
        stack.extend(node.children());
    }
    out
}

#[test]
fn test_build_then_validate_memory() {
    let rt = runtime();
    let backend = built_memory(&rt);

    let status = validate(&rt, backend.clone());
    assert!(status.ok(), "{}", status.pretty_print(0));
    assert_eq!(status.description(), format!("Validate tree :: {}", BASE));

    let manifest = Manifest::parse(&backend.get(&format!("{}/MANIFEST", BASE)).unwrap()).unwrap();
    assert_eq!(manifest.directory(), BASE);
    assert!(manifest.file_count() >= 1);
}

#[test]
fn test_build_then_validate_local() {
    let rt = runtime();
    let tmp = tempdir().unwrap();
    let backend: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(tmp.path(), 8));

    let status = build(&rt, Arc::clone(&backend), 150);
    assert!(status.ok(), "{}", status.pretty_print(0));
    assert!(tmp.path().join("eos/pps/base/MANIFEST").is_file());

    let status = validate(&rt, backend);
    assert!(status.ok(), "{}", status.pretty_print(0));
}

#[test]
fn test_same_seed_builds_identical_trees() {
    let rt = runtime();
    let first = built_memory(&rt);
    let second = built_memory(&rt);

    let path = format!("{}/MANIFEST", BASE);
    assert_eq!(first.get(&path), second.get(&path));
    assert_eq!(first.file_count(), second.file_count());
    assert_eq!(first.dir_count(), second.dir_count());
}

#[test]
fn test_corrupted_manifest_yields_single_defect() {
    let rt = runtime();
    let backend = built_memory(&rt);
    let subdir = first_subdir(&listing(&rt, &backend, BASE));
    let manifest_path = format!("{}/{}", subdir, MANIFEST_NAME);

    let mut data = backend.get(&manifest_path).unwrap();
    data[3] ^= 0x01;
    backend.put(&manifest_path, data);

    let status = validate(&rt, backend);
    assert!(!status.ok());
    assert_eq!(status.error_count(), 1, "{}", status.pretty_print(0));

    let failing = failing_nodes(&status);
    assert_eq!(failing.len(), 1);
    assert_eq!(failing[0].0, format!("Validate directory :: {}", subdir));
    assert!(failing[0].1[0].contains(&manifest_path));
}

#[test]
fn test_removed_file_is_reported() {
    let rt = runtime();
    let backend = built_memory(&rt);
    let victim = first_file(BASE, &listing(&rt, &backend, BASE));
    backend.remove_tree(&victim);

    let status = validate(&rt, backend);
    assert!(!status.ok());

    let failing = failing_nodes(&status);
    assert_eq!(failing.len(), 1);
    assert_eq!(failing[0].0, format!("Validate directory :: {}", BASE));
    assert!(failing[0].1.iter().any(|e| e.contains("missing files")));
}

#[test]
fn test_extra_entries_are_reported() {
    let rt = runtime();
    let backend = built_memory(&rt);
    backend.put(&format!("{}/intruder", BASE), "not generated");
    backend.put(&format!("{}/stray/file", BASE), "neither");

    let status = validate(&rt, backend);
    let failing = failing_nodes(&status);
    assert_eq!(failing.len(), 1, "{}", status.pretty_print(0));

    let errors = &failing[0].1;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("unexpected files: [intruder]"));
    assert!(errors[0].contains("unexpected subdirs: [stray]"));
}

#[test]
fn test_misplaced_and_corrupted_files() {
    let rt = runtime();
    let backend = built_memory(&rt);
    let entries = listing(&rt, &backend, BASE);
    let files: Vec<String> = entries
        .iter()
        .filter(|e| !e.is_dir && e.name != MANIFEST_NAME)
        .map(|e| format!("{}/{}", BASE, e.name))
        .collect();
    let subdir = first_subdir(&entries);
    let nested = first_file(&subdir, &listing(&rt, &backend, &subdir));

    // a valid file stored under another file's name
    let donor = backend.get(&nested).unwrap();
    backend.put(&files[0], donor);

    // a payload byte flipped in a nested file
    let mut data = backend.get(&nested).unwrap();
    let idx = data.len() / 2;
    data[idx] = if data[idx] == b'A' { b'B' } else { b'A' };
    backend.put(&nested, data);

    let status = validate(&rt, backend);
    let failing = failing_nodes(&status);
    assert_eq!(failing.len(), 2, "{}", status.pretty_print(0));
    assert_eq!(status.error_count(), 2);

    let all: Vec<&String> = failing.iter().flat_map(|(_, errors)| errors).collect();
    assert!(all.iter().any(|e| e.starts_with("Mismatch between expected filename")));
    assert!(all.iter().any(|e| e.starts_with("Could not parse self-checked file")));
}

#[test]
fn test_failing_listing_keeps_walking() {
    let rt = runtime();
    let backend = built_memory(&rt);
    let subdir = first_subdir(&listing(&rt, &backend, BASE));
    backend.fail_path(&subdir);

    let status = validate(&rt, backend);
    let failing = failing_nodes(&status);
    assert_eq!(failing.len(), 1, "{}", status.pretty_print(0));
    assert_eq!(failing[0].1.len(), 1);
    assert!(failing[0].1[0].starts_with("Could not list directory"));
}

#[test]
fn test_window_bounds_outstanding_operations() {
    let rt = runtime();
    let backend = Arc::new(MemoryBackend::with_latency(Duration::from_millis(1)));

    let status = TreeBuilder::new(
        backend.clone(),
        rt.handle().clone(),
        HierarchyOptions::new(BASE, 5, 3, 200),
    )
    .window(16)
    .run(&CancelToken::new());

    assert!(status.ok());
    assert!(backend.peak_in_flight() <= 16);
    assert!(backend.peak_in_flight() > 1);
}

#[test]
fn test_cancelled_build_drains_and_reports() {
    let rt = runtime();
    let backend = Arc::new(MemoryBackend::with_latency(Duration::from_millis(1)));

    let builder = TreeBuilder::new(
        backend.clone(),
        rt.handle().clone(),
        HierarchyOptions::new(BASE, 5, 8, 1_000_000),
    )
    .window(8);
    let stats = builder.stats();
    let run = builder.start().unwrap();

    std::thread::sleep(Duration::from_millis(50));
    run.stop();
    let status = run.wait().unwrap();

    assert_eq!(status.errors(), [EARLY_TERMINATION.to_string()]);
    assert!(backend.peak_in_flight() <= 8);

    // every write issued before the stop has landed
    let issued = stats.snapshot();
    assert!(issued.files > 0);
    assert!(issued.files < 1_000_000);
    assert_eq!((issued.files + issued.manifests) as usize, backend.file_count());
}

#[test]
fn test_cancelled_validation_drains_pending_inspections() {
    let rt = runtime();
    let backend = built_memory(&rt);
    let subdir = first_subdir(&listing(&rt, &backend, BASE));
    backend.fail_path(&subdir);

    // stopped before the walk, so only the root's children get inspected
    let token = CancelToken::new();
    token.request_stop();
    let status = TreeValidator::new(backend, rt.handle().clone(), BASE)
        .connections(8)
        .run(&token);

    let early = status
        .errors()
        .iter()
        .filter(|e| e.as_str() == EARLY_TERMINATION)
        .count();
    assert_eq!(early, 1);

    let failing = failing_nodes(&status);
    assert_eq!(failing.len(), 2, "{}", status.pretty_print(0));
    let drained = failing
        .iter()
        .find(|(description, _)| *description == format!("Validate directory :: {}", subdir))
        .unwrap();
    assert!(drained.1[0].starts_with("Could not list directory"));
}

#[test]
fn test_report_serializes() {
    let rt = runtime();
    let backend = built_memory(&rt);
    backend.put(&format!("{}/intruder", BASE), "x");

    let status = validate(&rt, backend);
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["description"], format!("Validate tree :: {}", BASE));
    assert_eq!(json["children"].as_array().unwrap().len(), 1);
    assert!(json.get("sealed").is_none());
}
