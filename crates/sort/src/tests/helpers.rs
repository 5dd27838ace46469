use std::path::{Path, PathBuf};

use config::Config;
use stream::{Context, Item, TypedStream};

/// 512-byte blocks, two cached blocks per stream, 64 stream handles.
pub fn small_config(dir: &Path) -> Config {
    Config {
        memory_limit: 1 << 20,
        physical_block_size: 512,
        block_factor: 1,
        cache_blocks: 2,
        cache_associativity: 0,
        max_open_streams: Some(64),
        temp_dir: dir.to_path_buf(),
        ..Config::default()
    }
}

pub fn ctx_in(dir: &Path) -> Context {
    Context::new(small_config(dir)).unwrap()
}

/// A scratch stream holding `items`, rewound to the start.
pub fn temp_stream<T: Item>(ctx: &Context, items: &[T]) -> TypedStream<T> {
    let mut s = TypedStream::temporary(ctx).unwrap();
    s.write_all_items(items).unwrap();
    s.seek(0).unwrap();
    s
}

pub fn read_all<T: Item>(s: &mut TypedStream<T>) -> Vec<T> {
    s.seek(0).unwrap();
    let mut out = Vec::new();
    while let Some(item) = s.read_item().unwrap() {
        out.push(item);
    }
    out
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    out.sort();
    out
}

pub fn random_pairs(n: usize, keys: u32, seed: u64) -> Vec<(u32, u32)> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..n as u32).map(|i| (rng.u32(..keys), i)).collect()
}
