use crate::backend::{self, uncompressed_length, BlockBackend, FRAME_BYTES};
use crate::error::StreamError;
use crate::header::BackendType;
use anyhow::Result;
use config::{BackendKind, Compression};
use std::fs;
use tempfile::tempdir;

use super::helpers::{all_backends, ctx_in, ctx_with};

fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

#[test]
fn every_backend_round_trips_blocks() -> Result<()> {
    for (kind, compression) in all_backends() {
        let dir = tempdir()?;
        let ctx = ctx_with(dir.path(), kind, compression);
        let path = dir.path().join("blocks.uts");

        let block_bytes = {
            let mut b = backend::create(&ctx, &path, 8)?;
            let g = b.geometry();
            b.write_block(0, &pattern(1, g.block_bytes))?;
            b.write_block(1, &pattern(2, g.block_bytes))?;
            b.write_block(2, &pattern(3, 40))?;
            b.set_item_len((2 * g.items_per_block + 5) as u64);
            b.close()?;
            g.block_bytes
        };

        let mut b = backend::open(&ctx, &path, true, Some(8))?;
        assert!(b.is_read_only());
        let mut buf = vec![0u8; block_bytes];
        assert_eq!(b.read_block(0, &mut buf)?, block_bytes, "{:?}", kind);
        assert_eq!(buf, pattern(1, block_bytes));
        assert_eq!(b.read_block(1, &mut buf)?, block_bytes);
        assert_eq!(buf, pattern(2, block_bytes));

        // The last block is short, and nothing lies beyond it.
        let n = b.read_block(2, &mut buf)?;
        assert!(n >= 40);
        assert_eq!(&buf[..40], &pattern(3, 40)[..]);
        assert_eq!(b.read_block(7, &mut buf)?, 0);

        assert!(matches!(
            b.write_block(0, &buf),
            Err(StreamError::ReadOnly)
        ));
    }
    Ok(())
}

#[test]
fn backend_type_is_recovered_from_header() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("m.uts");
    {
        let ctx = ctx_with(dir.path(), BackendKind::Mmap, Compression::Zstd { level: 1 });
        backend::create(&ctx, &path, 4)?.close()?;
    }
    // A context configured for plain files still opens the compressed map.
    let ctx = ctx_in(dir.path());
    let b = backend::open(&ctx, &path, false, None)?;
    assert_eq!(b.kind(), BackendType::CompressedMmap);
    assert_eq!(b.geometry().block_bytes, 512 - FRAME_BYTES);
    Ok(())
}

#[test]
fn truncate_resizes_storage_to_whole_blocks() -> Result<()> {
    for (kind, compression) in all_backends() {
        let dir = tempdir()?;
        let ctx = ctx_with(dir.path(), kind, compression);
        let path = dir.path().join("t.uts");
        let mut b = backend::create(&ctx, &path, 8)?;
        let g = b.geometry();

        b.truncate(g.items_per_block as u64 * 3)?;
        assert_eq!(b.item_len(), g.items_per_block as u64 * 3);
        let mut buf = vec![0xFFu8; g.block_bytes];
        let n = b.read_block(1, &mut buf)?;
        assert!(buf[..n].iter().all(|&x| x == 0), "grown blocks read as zeros");

        b.truncate(1)?;
        b.close()?;
        let raw_slot = if compression == Compression::None {
            g.block_bytes
        } else {
            g.block_bytes + FRAME_BYTES
        };
        assert_eq!(fs::metadata(&path)?.len(), 512 + raw_slot as u64);
    }
    Ok(())
}

#[test]
fn compressible_blocks_shrink_on_disk() -> Result<()> {
    let dir = tempdir()?;
    let ctx = ctx_with(dir.path(), BackendKind::File, Compression::Zstd { level: 3 });
    let path = dir.path().join("z.uts");
    let mut b = backend::create(&ctx, &path, 8)?;
    let g = b.geometry();

    b.write_block(0, &vec![0u8; g.block_bytes])?;
    b.set_item_len(g.items_per_block as u64);
    b.close()?;

    let on_disk = fs::read(&path)?;
    let frame = &on_disk[512..];
    assert_eq!(frame[0], 1, "zeros compress");
    assert_eq!(uncompressed_length(frame)?, g.block_bytes);
    assert!(on_disk.len() < 512 + g.block_bytes);
    Ok(())
}

#[test]
fn incompressible_blocks_are_stored_raw() -> Result<()> {
    let dir = tempdir()?;
    let ctx = ctx_with(dir.path(), BackendKind::File, Compression::Zstd { level: 3 });
    let path = dir.path().join("r.uts");
    let mut b = backend::create(&ctx, &path, 8)?;
    let g = b.geometry();

    let mut rng = fastrand::Rng::with_seed(7);
    let noise: Vec<u8> = (0..g.block_bytes).map(|_| rng.u8(..)).collect();
    b.write_block(0, &noise)?;
    let mut back = vec![0u8; g.block_bytes];
    assert_eq!(b.read_block(0, &mut back)?, g.block_bytes);
    assert_eq!(back, noise);
    b.close()?;

    let on_disk = fs::read(&path)?;
    assert_eq!(on_disk[512], 0, "stored raw");
    Ok(())
}

#[test]
fn corrupted_payload_fails_checksum() -> Result<()> {
    let dir = tempdir()?;
    let ctx = ctx_with(dir.path(), BackendKind::File, Compression::Zstd { level: 1 });
    let path = dir.path().join("c.uts");
    {
        let mut b = backend::create(&ctx, &path, 8)?;
        let g = b.geometry();
        b.write_block(0, &pattern(9, g.block_bytes))?;
        b.set_item_len(1);
        b.close()?;
    }
    let mut bytes = fs::read(&path)?;
    bytes[512 + FRAME_BYTES + 2] ^= 0xFF;
    fs::write(&path, &bytes)?;

    let mut b = backend::open(&ctx, &path, true, None)?;
    let mut buf = vec![0u8; b.geometry().block_bytes];
    match b.read_block(0, &mut buf) {
        Err(StreamError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidData),
        other => panic!("expected checksum failure, got {:?}", other),
    }
    Ok(())
}

#[test]
fn handles_count_against_the_ceiling() -> Result<()> {
    let dir = tempdir()?;
    let ctx = ctx_in(dir.path());
    ctx.set_stream_ceiling(2);

    let a = backend::create(&ctx, &dir.path().join("a.uts"), 8)?;
    let b = backend::create(&ctx, &dir.path().join("b.uts"), 8)?;
    assert_eq!(ctx.available_handles(), 0);
    assert!(matches!(
        backend::create(&ctx, &dir.path().join("c.uts"), 8),
        Err(StreamError::HandlesExhausted(2))
    ));

    a.close()?;
    assert_eq!(ctx.available_handles(), 1);
    drop(b);
    assert_eq!(ctx.open_handles(), 0);
    Ok(())
}
