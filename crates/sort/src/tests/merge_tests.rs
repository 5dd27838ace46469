use crate::*;
use anyhow::Result;
use stream::TypedStream;
use tempfile::tempdir;

use super::helpers::{ctx_in, read_all, temp_stream};

fn by_key(a: &(u32, u32), b: &(u32, u32)) -> std::cmp::Ordering {
    a.0.cmp(&b.0)
}

// -------------------- SortingMerge --------------------

#[test]
fn sorting_merge_interleaves_inputs() -> Result<()> {
    let dir = tempdir()?;
    let ctx = ctx_in(dir.path());
    let mut inputs = vec![
        temp_stream(&ctx, &[1u64, 4, 7, 10]),
        temp_stream(&ctx, &[2u64, 5, 8]),
        temp_stream(&ctx, &[]),
        temp_stream(&ctx, &[3u64, 6, 9, 11, 12]),
    ];
    let mut out = TypedStream::<u64>::temporary(&ctx)?;

    let mut engine = MergeEngine::new(SortingMerge::new(|a: &u64, b: &u64| a.cmp(b)));
    assert_eq!(engine.state(), MergeState::Init);
    assert_eq!(engine.run(&mut inputs, &mut out)?, 12);
    assert_eq!(engine.state(), MergeState::Done);
    assert_eq!(read_all(&mut out), (1..=12).collect::<Vec<u64>>());
    Ok(())
}

#[test]
fn ties_go_to_the_lowest_input() -> Result<()> {
    let dir = tempdir()?;
    let ctx = ctx_in(dir.path());
    // Second field records which input an item came from.
    let mut inputs = vec![
        temp_stream(&ctx, &[(1u32, 0u32), (5, 0), (5, 0)]),
        temp_stream(&ctx, &[(1u32, 1u32), (5, 1)]),
        temp_stream(&ctx, &[(0u32, 2u32), (1, 2), (5, 2)]),
    ];
    let mut out = TypedStream::temporary(&ctx)?;
    MergeEngine::new(SortingMerge::new(by_key)).run(&mut inputs, &mut out)?;

    assert_eq!(
        read_all(&mut out),
        vec![(0, 2), (1, 0), (1, 1), (1, 2), (5, 0), (5, 0), (5, 1), (5, 2)]
    );
    Ok(())
}

#[test]
fn merging_nothing_writes_nothing() -> Result<()> {
    let dir = tempdir()?;
    let ctx = ctx_in(dir.path());
    let mut inputs = vec![temp_stream::<u64>(&ctx, &[]), temp_stream(&ctx, &[])];
    let mut out = TypedStream::<u64>::temporary(&ctx)?;
    let mut engine = MergeEngine::new(SortingMerge::new(|a: &u64, b: &u64| a.cmp(b)));
    assert_eq!(engine.run(&mut inputs, &mut out)?, 0);
    assert_eq!(engine.state(), MergeState::Done);
    assert!(out.is_empty());
    Ok(())
}

// -------------------- DedupMerge --------------------

#[test]
fn dedup_merge_takes_every_equal_head() -> Result<()> {
    let dir = tempdir()?;
    let ctx = ctx_in(dir.path());
    let mut inputs = vec![
        temp_stream(&ctx, &[1u64, 1, 3, 9]),
        temp_stream(&ctx, &[1u64, 2, 3]),
        temp_stream(&ctx, &[3u64, 3, 3]),
    ];
    let mut out = TypedStream::<u64>::temporary(&ctx)?;
    let written =
        MergeEngine::new(DedupMerge::new(|a: &u64, b: &u64| a.cmp(b))).run(&mut inputs, &mut out)?;
    assert_eq!(written, 4);
    assert_eq!(read_all(&mut out), vec![1, 2, 3, 9]);
    Ok(())
}

#[test]
fn dedup_in_memory_shrinks_the_run() -> Result<()> {
    let mut object = DedupMerge::new(|a: &u64, b: &u64| a.cmp(b));
    let mut run = vec![4u64, 1, 4, 2, 1, 4];
    assert!(object.operate_in_memory(&mut run)?);
    assert_eq!(run, vec![1, 2, 4]);
    Ok(())
}

// -------------------- Engine states --------------------

/// Emits the smallest head like a sorting merge, but fails after `limit`
/// outputs.
struct FailAfter {
    limit: usize,
    emitted: usize,
}

impl MergeObject<u64> for FailAfter {
    fn initialize(&mut self, _heads: &[Option<u64>]) -> Result<(), SortError> {
        Ok(())
    }

    fn pick_next(
        &mut self,
        heads: &[Option<u64>],
        taken: &mut [bool],
    ) -> Result<MergeStep<u64>, SortError> {
        if self.emitted == self.limit {
            return Err(SortError::MergeObject("boom".into()));
        }
        let Some((i, v)) = heads
            .iter()
            .enumerate()
            .filter_map(|(i, h)| h.map(|v| (i, v)))
            .min_by_key(|&(_, v)| v)
        else {
            return Ok(MergeStep::Done);
        };
        taken[i] = true;
        self.emitted += 1;
        Ok(MergeStep::Output(v))
    }
}

#[test]
fn failure_is_terminal() -> Result<()> {
    let dir = tempdir()?;
    let ctx = ctx_in(dir.path());
    let mut inputs = vec![temp_stream(&ctx, &[1u64, 2, 3]), temp_stream(&ctx, &[4u64])];
    let mut out = TypedStream::<u64>::temporary(&ctx)?;

    let mut engine = MergeEngine::new(FailAfter { limit: 2, emitted: 0 });
    let err = engine.run(&mut inputs, &mut out).unwrap_err();
    assert!(matches!(err, SortError::MergeObject(_)));
    assert_eq!(engine.state(), MergeState::Failed);
    assert_eq!(engine.written(), 2);

    assert!(matches!(
        engine.run(&mut inputs, &mut out),
        Err(SortError::MergeFailed)
    ));
    Ok(())
}

#[test]
fn a_finished_engine_cannot_run_again() -> Result<()> {
    let dir = tempdir()?;
    let ctx = ctx_in(dir.path());
    let mut inputs = vec![temp_stream(&ctx, &[1u64])];
    let mut out = TypedStream::<u64>::temporary(&ctx)?;
    let mut engine = MergeEngine::new(FailAfter { limit: 10, emitted: 0 });
    engine.run(&mut inputs, &mut out)?;
    assert!(matches!(
        engine.run(&mut inputs, &mut out),
        Err(SortError::MergeFailed)
    ));
    assert_eq!(engine.into_inner().emitted, 1);
    Ok(())
}

struct Stalls;

impl MergeObject<u64> for Stalls {
    fn initialize(&mut self, _heads: &[Option<u64>]) -> Result<(), SortError> {
        Ok(())
    }

    fn pick_next(
        &mut self,
        _heads: &[Option<u64>],
        _taken: &mut [bool],
    ) -> Result<MergeStep<u64>, SortError> {
        Ok(MergeStep::Continue)
    }
}

#[test]
fn continue_without_progress_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let ctx = ctx_in(dir.path());
    let mut inputs = vec![temp_stream(&ctx, &[1u64])];
    let mut out = TypedStream::<u64>::temporary(&ctx)?;
    let mut engine = MergeEngine::new(Stalls);
    assert!(matches!(
        engine.run(&mut inputs, &mut out),
        Err(SortError::MergeObject(_))
    ));
    assert_eq!(engine.state(), MergeState::Failed);
    Ok(())
}

#[test]
fn base_object_has_no_in_memory_routine() -> Result<()> {
    let mut run = vec![3u64, 1, 2];
    assert!(!Stalls.operate_in_memory(&mut run)?);
    assert_eq!(run, vec![3, 1, 2]);
    Ok(())
}
