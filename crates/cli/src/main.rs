///! # CLI - Undertow Interactive Shell
///!
///! A REPL-style driver for the Undertow external-memory library. Reads
///! commands from stdin, runs them, and prints results to stdout. Works both
///! interactively and scripted (pipe commands via stdin). Every stream the
///! shell touches holds `u64` items.
///!
///! ## Commands
///!
///! ```text
///! GEN path n [asc|desc|random]  Write n numbers to a new stream
///! SORT in out                   Partition-and-merge sort
///! KSORT in out                  Key-based distribution sort
///! CHECK path                    Is the stream in non-decreasing order?
///! LEN path                      Number of items
///! HEAD path [n]                 First n items (default 10)
///! PLAN                          Run size and merge arity for u64 items
///! STATS                         Process-wide I/O counters
///! EXIT / QUIT                   Shut down
///! ```
///!
///! ## Configuration
///!
///! All settings come from environment variables (see the `config` crate):
///!
///! ```text
///! UNDERTOW_MEMORY_MB     Sort memory in MiB             (default: 64)
///! UNDERTOW_BLOCK_SIZE    Physical block size in bytes   (default: 4096)
///! UNDERTOW_BLOCK_FACTOR  Logical/physical block ratio   (default: 16)
///! UNDERTOW_CACHE_BLOCKS  Cached blocks per stream       (default: 4)
///! UNDERTOW_MAX_STREAMS   Open stream ceiling            (default: from fd limit)
///! UNDERTOW_BACKEND       file | mmap                    (default: file)
///! UNDERTOW_COMPRESSION   none | zstd | zstd:<level>    (default: none)
///! UNDERTOW_TEMP_DIR      Scratch directory              (default: $TMPDIR, /var/tmp)
///! UNDERTOW_SEED          Seed for GEN random            (default: 1)
///! UNDERTOW_LOG           Log filter                     (default: info)
///! ```
///!
///! ## Example
///!
///! ```text
///! $ cargo run -p cli
///! Undertow started (memory=64MiB, block=65536B, backend=File, temp_dir=/tmp)
///! > GEN nums.uts 100000 random
///! OK (100000 items)
///! > SORT nums.uts sorted.uts
///! OK (items=100000, runs=[1], passes=0)
///! > CHECK sorted.uts
///! sorted (100000 items)
///! > EXIT
///! bye
///! ```

mod commands;

use anyhow::{Context as _, Result};
use commands::{Pattern, Shell};
use config::Config;
use env_logger::Env;
use std::io::{self, BufRead, Write};
use stream::Context;

const DEFAULT_HEAD: u64 = 10;

fn main() -> Result<()> {
    let cfg = Config::from_env().context("invalid configuration")?;
    env_logger::Builder::from_env(Env::default().default_filter_or(cfg.log_level.as_str())).init();

    println!(
        "Undertow started (memory={}MiB, block={}B, backend={:?}, temp_dir={})",
        cfg.memory_limit / (1024 * 1024),
        cfg.logical_block_size(),
        cfg.backend,
        cfg.temp_dir.display()
    );
    let shell = Shell::new(Context::new(cfg)?);

    println!("Commands: GEN path n [asc|desc|random] | SORT in out | KSORT in out");
    println!("          CHECK path | LEN path | HEAD path [n] | PLAN | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if let Some(cmd) = parts.first() {
            match cmd.to_uppercase().as_str() {
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                _ => match dispatch(&shell, &parts) {
                    Ok(out) => println!("{}", out),
                    Err(e) => println!("ERR {:#}", e),
                },
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    Ok(())
}

/// Runs one command line (already split into words) against the shell.
fn dispatch(shell: &Shell, parts: &[&str]) -> Result<String> {
    let cmd = parts[0].to_uppercase();
    let args = &parts[1..];
    match (cmd.as_str(), args) {
        ("GEN", [path, n]) => shell.generate(path, parse_count(n)?, Pattern::Ascending),
        ("GEN", [path, n, pattern]) => shell.generate(path, parse_count(n)?, pattern.parse()?),
        ("GEN", _) => Ok("ERR usage: GEN path n [asc|desc|random]".to_string()),
        ("SORT", [input, output]) => shell.sort(input, output),
        ("SORT", _) => Ok("ERR usage: SORT in out".to_string()),
        ("KSORT", [input, output]) => shell.key_sort(input, output),
        ("KSORT", _) => Ok("ERR usage: KSORT in out".to_string()),
        ("CHECK", [path]) => shell.check(path),
        ("CHECK", _) => Ok("ERR usage: CHECK path".to_string()),
        ("LEN", [path]) => shell.len(path),
        ("LEN", _) => Ok("ERR usage: LEN path".to_string()),
        ("HEAD", [path]) => shell.head(path, DEFAULT_HEAD),
        ("HEAD", [path, n]) => shell.head(path, parse_count(n)?),
        ("HEAD", _) => Ok("ERR usage: HEAD path [n]".to_string()),
        ("PLAN", []) => shell.plan(),
        ("STATS", []) => Ok(shell.stats()),
        _ => Ok(format!("unknown command: {}", parts[0])),
    }
}

fn parse_count(s: &str) -> Result<u64> {
    s.parse().with_context(|| format!("'{}' is not a count", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Config;
    use tempfile::tempdir;

    fn shell_in(dir: &std::path::Path) -> Shell {
        let cfg = Config {
            memory_limit: 1 << 20,
            physical_block_size: 512,
            block_factor: 1,
            cache_blocks: 2,
            max_open_streams: Some(64),
            temp_dir: dir.to_path_buf(),
            ..Config::default()
        };
        Shell::new(Context::new(cfg).unwrap())
    }

    fn run(shell: &Shell, line: &str) -> String {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match dispatch(shell, &parts) {
            Ok(out) => out,
            Err(e) => format!("ERR {:#}", e),
        }
    }

    #[test]
    fn generate_sort_check() {
        let dir = tempdir().unwrap();
        let shell = shell_in(dir.path());
        let input = dir.path().join("in.uts");
        let output = dir.path().join("out.uts");
        let (input, output) = (input.to_str().unwrap(), output.to_str().unwrap());

        assert_eq!(run(&shell, &format!("GEN {} 5000 random", input)), "OK (5000 items)");
        assert!(run(&shell, &format!("CHECK {}", input)).starts_with("unsorted"));
        assert_eq!(run(&shell, &format!("LEN {}", input)), "5000");

        let out = run(&shell, &format!("SORT {} {}", input, output));
        assert!(out.starts_with("OK (items=5000"), "{}", out);
        assert_eq!(run(&shell, &format!("CHECK {}", output)), "sorted (5000 items)");
    }

    #[test]
    fn key_sort_and_head() {
        let dir = tempdir().unwrap();
        let shell = shell_in(dir.path());
        let input = dir.path().join("in.uts");
        let output = dir.path().join("out.uts");
        let (input, output) = (input.to_str().unwrap(), output.to_str().unwrap());

        run(&shell, &format!("GEN {} 300 desc", input));
        assert_eq!(run(&shell, &format!("HEAD {} 3", input)), "299 298 297");
        assert!(run(&shell, &format!("KSORT {} {}", input, output)).starts_with("OK"));
        assert_eq!(run(&shell, &format!("HEAD {} 4", output)), "0 1 2 3");
    }

    #[test]
    fn usage_and_errors() {
        let dir = tempdir().unwrap();
        let shell = shell_in(dir.path());
        assert!(run(&shell, "GEN").starts_with("ERR usage"));
        assert!(run(&shell, "GEN x.uts many").starts_with("ERR"));
        assert!(run(&shell, "GEN x.uts 3 sideways").contains("unknown pattern"));
        assert!(run(&shell, "LEN /definitely/not/here.uts").starts_with("ERR cannot open"));
        assert_eq!(run(&shell, "FROB"), "unknown command: FROB");
        assert!(run(&shell, "PLAN").contains("arity=62"));
    }

    #[test]
    fn empty_stream_head() {
        let dir = tempdir().unwrap();
        let shell = shell_in(dir.path());
        let path = dir.path().join("e.uts");
        let path = path.to_str().unwrap();
        run(&shell, &format!("GEN {} 0", path));
        assert_eq!(run(&shell, &format!("HEAD {}", path)), "(empty)");
        assert_eq!(run(&shell, &format!("CHECK {}", path)), "sorted (0 items)");
    }

    #[test]
    fn huge_head_count_stops_at_the_end() {
        let dir = tempdir().unwrap();
        let shell = shell_in(dir.path());
        let path = dir.path().join("h.uts");
        let path = path.to_str().unwrap();
        run(&shell, &format!("GEN {} 5 asc", path));
        assert_eq!(run(&shell, &format!("HEAD {} 100000000000", path)), "0 1 2 3 4");
        assert_eq!(run(&shell, &format!("HEAD {} 0", path)), "(empty)");
    }
}
