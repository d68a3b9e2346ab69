//! End-to-end FileMove passes over local directory trees

mod common;

use std::fs;

use common::{policy, Faulty, Op, Trees};
use dirmirror_core::config::ExecutionPolicy;
use dirmirror_core::ports::Backend;
use dirmirror_core::walker::EventRecorder;
use dirmirror_sync::engine::run_pass;
use dirmirror_sync::SyncError;

// ============================================================================
// Core scenarios
// ============================================================================

#[test]
fn test_nested_file_reaches_destination_and_dustbin() {
    let trees = Trees::new();
    trees.put_source("a/b/file.txt", b"payload");

    let report = run_pass(&trees.source(), &trees.dest(), trees.bin.path(), &policy(2, false))
        .expect("pass");

    assert_eq!(fs::read(trees.in_dst("a/b/file.txt")).unwrap(), b"payload");
    assert_eq!(fs::read(trees.in_bin("a/b/file.txt")).unwrap(), b"payload");
    assert!(!trees.in_src("a/b/file.txt").exists());
    // a/b is at level 2 and now empty; a is at level 1, above the start level.
    assert!(!trees.in_src("a/b").exists());
    assert!(trees.in_src("a").is_dir());
    assert_eq!(report.files_copied, 1);
    assert_eq!(report.directories_removed, 1);
}

#[test]
fn test_existing_destination_name_gets_numbered_copy() {
    let trees = Trees::new();
    trees.put_dest("report.txt", b"original");
    trees.put_source("report.txt", b"incoming");

    run_pass(&trees.source(), &trees.dest(), trees.bin.path(), &policy(1, false)).unwrap();

    assert_eq!(fs::read(trees.in_dst("report.txt")).unwrap(), b"original");
    assert_eq!(fs::read(trees.in_dst("report(1).txt")).unwrap(), b"incoming");
    assert_eq!(fs::read(trees.in_bin("report.txt")).unwrap(), b"incoming");
    assert!(!trees.in_src("report.txt").exists());
}

#[test]
fn test_repeated_collisions_increment_the_counter() {
    let trees = Trees::new();
    trees.put_dest("d/x.csv", b"0");

    for round in 1..=3u8 {
        trees.put_source("d/x.csv", &[round]);
        run_pass(&trees.source(), &trees.dest(), trees.bin.path(), &policy(1, false)).unwrap();
    }

    assert_eq!(fs::read(trees.in_dst("d/x(1).csv")).unwrap(), [1]);
    assert_eq!(fs::read(trees.in_dst("d/x(2).csv")).unwrap(), [2]);
    assert_eq!(fs::read(trees.in_dst("d/x(3).csv")).unwrap(), [3]);
}

#[test]
fn test_overwrite_mode_replaces_existing_file() {
    let trees = Trees::new();
    trees.put_dest("report.txt", b"stale content that is longer");
    trees.put_source("report.txt", b"fresh");

    run_pass(&trees.source(), &trees.dest(), trees.bin.path(), &policy(1, true)).unwrap();

    assert_eq!(fs::read(trees.in_dst("report.txt")).unwrap(), b"fresh");
    assert!(!trees.in_dst("report(1).txt").exists());
}

#[test]
fn test_files_above_start_level_are_never_touched() {
    let trees = Trees::new();
    trees.put_source("loose.txt", b"l");
    trees.put_source("batch/ready.txt", b"r");

    let report =
        run_pass(&trees.source(), &trees.dest(), trees.bin.path(), &policy(2, true)).unwrap();

    assert!(trees.in_src("loose.txt").exists());
    assert!(!trees.in_dst("loose.txt").exists());
    assert!(!trees.in_bin("loose.txt").exists());
    assert!(trees.in_dst("batch/ready.txt").exists());
    assert_eq!(report.files_out_of_scope, 1);
}

#[test]
fn test_second_pass_without_new_files_copies_nothing() {
    let trees = Trees::new();
    trees.put_source("a/one.txt", b"1");
    trees.put_source("a/two.txt", b"2");

    let first =
        run_pass(&trees.source(), &trees.dest(), trees.bin.path(), &policy(1, false)).unwrap();
    let second =
        run_pass(&trees.source(), &trees.dest(), trees.bin.path(), &policy(1, false)).unwrap();

    assert_eq!(first.files_copied, 2);
    assert_eq!(second.files_copied, 0);
    assert!(!trees.in_dst("a/one(1).txt").exists());
}

#[test]
fn test_emptied_tree_is_pruned_bottom_up() {
    let trees = Trees::new();
    trees.put_source("x/y/z/deep.bin", b"d");
    trees.put_source("x/side.bin", b"s");

    let report =
        run_pass(&trees.source(), &trees.dest(), trees.bin.path(), &policy(1, false)).unwrap();

    assert!(!trees.in_src("x").exists());
    assert_eq!(report.directories_removed, 3);
    assert!(trees.in_bin("x/y/z/deep.bin").exists());
    assert!(trees.in_bin("x/side.bin").exists());
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_copy_failure_leaves_source_file_for_next_pass() {
    let trees = Trees::new();
    trees.put_source("a/file.txt", b"x");
    let dest = Faulty::new(trees.dest()).failing(Op::Create, "a/file.txt");

    let report = run_pass(&trees.source(), &dest, trees.bin.path(), &policy(1, false)).unwrap();

    assert_eq!(report.files_failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(trees.in_src("a/file.txt").exists());
    assert!(!trees.in_bin("a/file.txt").exists());
    // The directory still holds the file, so it was kept.
    assert!(trees.in_src("a").is_dir());

    // Next pass succeeds once the fault is gone.
    let report =
        run_pass(&trees.source(), &trees.dest(), trees.bin.path(), &policy(1, false)).unwrap();
    assert_eq!(report.files_copied, 1);
    assert!(trees.in_dst("a/file.txt").exists());
}

#[test]
fn test_failure_on_one_file_does_not_stop_siblings() {
    let trees = Trees::new();
    trees.put_source("d/bad.txt", b"b");
    trees.put_source("d/good.txt", b"g");
    let source = Faulty::new(trees.source()).failing(Op::Open, "d/bad.txt");

    let report = run_pass(&source, &trees.dest(), trees.bin.path(), &policy(1, false)).unwrap();

    assert_eq!(report.files_failed, 1);
    assert_eq!(report.files_copied, 1);
    assert!(trees.in_dst("d/good.txt").exists());
    assert!(trees.in_src("d/bad.txt").exists());
}

#[test]
fn test_metadata_failures_do_not_block_the_move() {
    let trees = Trees::new();
    trees.put_source("f.txt", b"x");
    let dest = Faulty::new(trees.dest()).failing(Op::Chmod, "f.txt");

    let report = run_pass(&trees.source(), &dest, trees.bin.path(), &policy(1, false)).unwrap();

    assert_eq!(report.files_copied, 1);
    assert_eq!(report.files_moved_to_dustbin, 1);
    assert!(report.errors.is_empty());
    assert!(trees.in_bin("f.txt").exists());
}

#[test]
fn test_ownership_is_applied_only_with_nonzero_gid() {
    let trees = Trees::new();
    trees.put_source("d/f.txt", b"x");
    let dest = Faulty::new(trees.dest());

    run_pass(&trees.source(), &dest, trees.bin.path(), &policy(1, false)).unwrap();
    assert!(dest.calls_of(Op::Chown).is_empty());

    trees.put_source("d/g.txt", b"y");
    let with_owner = ExecutionPolicy {
        uid: 1000,
        gid: 1000,
        ..policy(1, false)
    };
    run_pass(&trees.source(), &dest, trees.bin.path(), &with_owner).unwrap();

    assert_eq!(dest.calls_of(Op::Chown), vec!["d", "d/g.txt"]);
}

#[test]
fn test_chmod_targets_the_renamed_copy() {
    let trees = Trees::new();
    trees.put_dest("r.txt", b"old");
    trees.put_source("r.txt", b"new");
    let dest = Faulty::new(trees.dest());

    run_pass(&trees.source(), &dest, trees.bin.path(), &policy(1, false)).unwrap();

    assert_eq!(dest.calls_of(Op::Chmod), vec!["r(1).txt"]);
    assert_eq!(dest.calls_of(Op::Create), vec!["r(1).txt"]);
}

#[test]
fn test_disposable_artifact_is_deleted_when_dustbin_move_fails() {
    let trees = Trees::new();
    trees.put_source("photos/.DS_Store", b"junk");
    trees.put_source("photos/img.jpg", b"jpeg");
    let source = Faulty::new(trees.source())
        .failing(Op::MoveTo, "photos/.DS_Store")
        .failing(Op::MoveTo, "photos/img.jpg");

    let report = run_pass(&source, &trees.dest(), trees.bin.path(), &policy(1, false)).unwrap();

    assert!(!trees.in_src("photos/.DS_Store").exists());
    // Ordinary files are never deleted, only retried.
    assert!(trees.in_src("photos/img.jpg").exists());
    assert_eq!(report.artifacts_deleted, 1);
    assert_eq!(report.dustbin_failures, 2);
    assert_eq!(source.calls_of(Op::Remove), vec!["photos/.DS_Store", "photos"]);
}

#[test]
fn test_destination_mkdir_failure_skips_only_that_subtree() {
    let trees = Trees::new();
    trees.put_source("blocked/inner/f.txt", b"x");
    trees.put_source("open/g.txt", b"y");
    let dest = Faulty::new(trees.dest()).failing(Op::MkdirAll, "blocked");

    let report = run_pass(&trees.source(), &dest, trees.bin.path(), &policy(1, false)).unwrap();

    assert_eq!(report.directories_skipped, 1);
    assert!(trees.in_src("blocked/inner/f.txt").exists());
    assert!(trees.in_dst("open/g.txt").exists());
    // No ExitDir for a skipped subtree, so nothing under it was removed.
    assert!(trees.in_src("blocked").is_dir());
}

#[test]
fn test_dustbin_mkdir_failure_skips_subtree() {
    let trees = Trees::new();
    trees.put_source("a/f.txt", b"x");
    let source = Faulty::new(trees.source()).failing(Op::MkdirAllAbsolute, "a");

    let report = run_pass(&source, &trees.dest(), trees.bin.path(), &policy(1, false)).unwrap();

    assert_eq!(report.directories_skipped, 1);
    assert!(trees.in_src("a/f.txt").exists());
    assert!(source.calls_of(Op::Open).is_empty());
}

#[cfg(unix)]
#[test]
fn test_non_utf8_name_does_not_block_siblings() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let trees = Trees::new();
    trees.put_source("good.txt", b"g");
    let bad = trees.src.path().join(OsStr::from_bytes(b"bad\xff.txt"));
    fs::write(&bad, b"b").unwrap();

    let report =
        run_pass(&trees.source(), &trees.dest(), trees.bin.path(), &policy(1, false)).unwrap();

    assert_eq!(report.files_copied, 1);
    assert_eq!(fs::read(trees.in_dst("good.txt")).unwrap(), b"g");
    assert!(trees.in_bin("good.txt").exists());
    assert!(!trees.in_src("good.txt").exists());
    // The unlistable name is left where it is.
    assert!(bad.exists());
}

#[test]
fn test_missing_dustbin_root_stops_repeat_copies() {
    let trees = Trees::new();
    let bin = trees.bin.path().join("retained");
    trees.put_source("top.txt", b"t");

    for _ in 0..3 {
        run_pass(&trees.source(), &trees.dest(), &bin, &policy(1, false)).unwrap();
    }

    let mut names: Vec<_> = fs::read_dir(trees.dst.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["top.txt"]);
    assert!(bin.join("top.txt").exists());
    assert!(!trees.in_src("top.txt").exists());
}

#[test]
fn test_dustbin_root_failure_abandons_pass_before_copying() {
    let trees = Trees::new();
    trees.put_source("a/f.txt", b"x");
    let source = Faulty::new(trees.source()).failing(Op::MkdirAllAbsolute, "");

    let err = run_pass(&source, &trees.dest(), trees.bin.path(), &policy(1, false)).unwrap_err();

    assert!(matches!(err, SyncError::Dustbin { .. }));
    assert!(source.calls_of(Op::ReadDir).is_empty());
    assert!(!trees.in_dst("a").exists());
    assert!(trees.in_src("a/f.txt").exists());
}

#[test]
fn test_listing_failure_abandons_the_pass() {
    let trees = Trees::new();
    trees.put_source("a/first.txt", b"1");
    trees.put_source("b/second.txt", b"2");
    let source = Faulty::new(trees.source()).failing(Op::ReadDir, "a");

    let err = run_pass(&source, &trees.dest(), trees.bin.path(), &policy(1, false)).unwrap_err();

    match err {
        SyncError::Walk(walk) => assert_eq!(walk.dir.as_str(), "a"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_dry_walk_reports_events_without_moving() {
    let trees = Trees::new();
    trees.put_source("a/f.txt", b"x");
    let mut recorder = EventRecorder::new();

    trees.source().walk(&mut recorder).unwrap();

    assert_eq!(recorder.labels(), vec!["enter:a@1", "file:a/f.txt@2", "exit:a@1"]);
    assert!(trees.in_src("a/f.txt").exists());
}
