/// End-to-end tests for the undertow shell: each test drives the built
/// binary over stdin with its own scratch directory.
use std::path::Path;
use tempfile::tempdir;

/// Runs `commands` through the binary and returns its stdout.
fn run_cli(dir: &Path, env: &[(&str, &str)], commands: &str) -> String {
    use std::io::Write;
    use std::process::{Command, Stdio};

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_undertow"));
    cmd.env("UNDERTOW_TEMP_DIR", dir.join("scratch"))
        .env("UNDERTOW_MEMORY_MB", "1")
        .env("UNDERTOW_BLOCK_SIZE", "512")
        .env("UNDERTOW_BLOCK_FACTOR", "1")
        .env("UNDERTOW_CACHE_BLOCKS", "2")
        .env("UNDERTOW_MAX_STREAMS", "64")
        .env("UNDERTOW_LOG", "warn");
    for (k, v) in env {
        cmd.env(k, v);
    }
    let mut child = cmd
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn undertow");

    {
        // The binary may already have exited on a configuration error.
        let stdin = child.stdin.as_mut().expect("Failed to open stdin");
        let _ = stdin.write_all(commands.as_bytes());
        let _ = stdin.write_all(b"EXIT\n");
    }

    let output = child.wait_with_output().expect("Failed to read output");
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_startup_and_exit() {
    let dir = tempdir().unwrap();
    let output = run_cli(dir.path(), &[], "");
    assert!(output.contains("Undertow started"));
    assert!(output.contains("bye"));
}

#[test]
fn test_generate_and_sort() {
    let dir = tempdir().unwrap();
    let output = run_cli(
        dir.path(),
        &[],
        "GEN in.uts 200000 random\nSORT in.uts out.uts\nCHECK out.uts\nLEN out.uts\n",
    );
    assert!(output.contains("OK (200000 items)"));
    assert!(output.contains("OK (items=200000"));
    assert!(output.contains("sorted (200000 items)"));
    assert!(output.contains("200000\n"));
}

#[test]
fn test_sort_with_merge_passes() {
    let dir = tempdir().unwrap();
    // 1 MiB of memory holds ~130k u64 items per run: 300k items need 3 runs.
    let output = run_cli(
        dir.path(),
        &[],
        "GEN in.uts 300000 desc\nSORT in.uts out.uts\nHEAD out.uts 3\n",
    );
    assert!(output.contains("runs=[3, 1], passes=1"), "{}", output);
    assert!(output.contains("0 1 2"));
}

#[test]
fn test_key_sort() {
    let dir = tempdir().unwrap();
    let output = run_cli(
        dir.path(),
        &[],
        "GEN in.uts 5000 random\nKSORT in.uts out.uts\nCHECK out.uts\n",
    );
    assert!(output.contains("sorted (5000 items)"));
}

#[test]
fn test_every_backend() {
    for (backend, compression) in [("file", "zstd:1"), ("mmap", "none"), ("mmap", "zstd")] {
        let dir = tempdir().unwrap();
        let output = run_cli(
            dir.path(),
            &[
                ("UNDERTOW_BACKEND", backend),
                ("UNDERTOW_COMPRESSION", compression),
            ],
            "GEN in.uts 20000 random\nSORT in.uts out.uts\nCHECK out.uts\n",
        );
        assert!(
            output.contains("sorted (20000 items)"),
            "{}/{}: {}",
            backend,
            compression,
            output
        );
    }
}

#[test]
fn test_no_scratch_files_left() {
    let dir = tempdir().unwrap();
    run_cli(
        dir.path(),
        &[],
        "GEN in.uts 300000 random\nSORT in.uts out.uts\n",
    );
    let scratch = dir.path().join("scratch");
    let leftovers = std::fs::read_dir(&scratch)
        .map(|d| d.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn test_stats_and_plan() {
    let dir = tempdir().unwrap();
    let output = run_cli(dir.path(), &[], "STATS\nGEN a.uts 10\nSTATS\nPLAN\n");
    assert!(output.contains("(no activity)"));
    assert!(output.contains("item_write=10"));
    assert!(output.contains("max_run_items="));
}

#[test]
fn test_errors_keep_the_shell_alive() {
    let dir = tempdir().unwrap();
    let output = run_cli(
        dir.path(),
        &[],
        "LEN missing.uts\nSORT\nFROB\nGEN ok.uts 2\nLEN ok.uts\n",
    );
    assert!(output.contains("ERR cannot open missing.uts"));
    assert!(output.contains("ERR usage: SORT in out"));
    assert!(output.contains("unknown command: FROB"));
    assert!(output.contains("OK (2 items)"));
    assert!(output.contains("bye"));
}

#[test]
fn test_bad_configuration_fails_fast() {
    let dir = tempdir().unwrap();
    let output = run_cli(dir.path(), &[("UNDERTOW_BLOCK_SIZE", "1000")], "");
    assert!(!output.contains("Undertow started"));
}
