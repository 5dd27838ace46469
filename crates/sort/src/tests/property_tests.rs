use crate::*;
use proptest::prelude::*;
use stream::TypedStream;
use tempfile::tempdir;

use super::helpers::{ctx_in, read_all, temp_stream};

/// Sorts `items` by their first field with small runs and a small arity,
/// so most cases go through several merge passes.
fn external_sort(items: &[(u8, u16)], run: u64, arity: usize) -> Vec<(u8, u16)> {
    let dir = tempdir().unwrap();
    let ctx = ctx_in(dir.path());
    let mut input = temp_stream(&ctx, items);
    let mut output = TypedStream::temporary(&ctx).unwrap();
    Sorter::new(&ctx)
        .max_run_items(run)
        .merge_arity(arity)
        .sort_by(&mut input, &mut output, |a: &(u8, u16), b: &(u8, u16)| a.0.cmp(&b.0))
        .unwrap();
    read_all(&mut output)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Output is ordered, a permutation of the input, and stable.
    #[test]
    fn prop_sort_matches_stable_in_memory_sort(
        keys in prop::collection::vec(any::<u8>(), 0..400),
        run in 1u64..50,
        arity in 2usize..6,
    ) {
        let items: Vec<(u8, u16)> = keys.iter().enumerate().map(|(i, &k)| (k, i as u16)).collect();
        let mut expected = items.clone();
        expected.sort_by_key(|p| p.0);
        prop_assert_eq!(external_sort(&items, run, arity), expected);
    }

    /// Key sort agrees with the comparator sort on the same key.
    #[test]
    fn prop_key_sort_matches_sort(
        keys in prop::collection::vec(0u64..10_000, 0..300),
        run in 1u64..40,
    ) {
        let dir = tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        let items: Vec<(u64, u32)> = keys.iter().enumerate().map(|(i, &k)| (k, i as u32)).collect();
        let mut input = temp_stream(&ctx, &items);
        let mut output = TypedStream::temporary(&ctx).unwrap();
        Sorter::new(&ctx)
            .max_run_items(run)
            .merge_arity(3)
            .key_sort(&mut input, &mut output, |p: &(u64, u32)| p.0, KeyRange::new(0, 10_000))
            .unwrap();

        let mut expected = items;
        expected.sort_by_key(|p| p.0);
        prop_assert_eq!(read_all(&mut output), expected);
    }
}
