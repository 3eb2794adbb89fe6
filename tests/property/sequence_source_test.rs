// tests/property/sequence_source_test.rs

//! `InMemorySequenceSource` must hand out gap-free, strictly increasing ids
//! per channel regardless of how many times it's called or how many
//! distinct channels share the allocator, mirroring the guarantee
//! `SequenceAllocator` makes against the database.

use clinicmesh::core::sequence::{InMemorySequenceSource, SequenceSource};
use proptest::prelude::*;

proptest! {
    #[test]
    fn ids_for_one_channel_are_gap_free_and_start_at_one(draws in 1usize..500) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let sequence = InMemorySequenceSource::new();
            sequence.ensure_channel("claims").await.unwrap();
            for expected in 1..=draws as i64 {
                let id = sequence.next_id("claims").await.unwrap();
                prop_assert_eq!(id, expected);
            }
            Ok(())
        })?;
    }

    #[test]
    fn distinct_channels_each_get_their_own_gap_free_sequence(
        a_draws in 1usize..100,
        b_draws in 1usize..100,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let sequence = InMemorySequenceSource::new();
            sequence.ensure_channel("adt-feed").await.unwrap();
            sequence.ensure_channel("billing-feed").await.unwrap();

            let mut a_ids = Vec::new();
            let mut b_ids = Vec::new();
            for _ in 0..a_draws {
                a_ids.push(sequence.next_id("adt-feed").await.unwrap());
            }
            for _ in 0..b_draws {
                b_ids.push(sequence.next_id("billing-feed").await.unwrap());
            }

            prop_assert_eq!(&a_ids, &(1..=a_draws as i64).collect::<Vec<_>>());
            prop_assert_eq!(&b_ids, &(1..=b_draws as i64).collect::<Vec<_>>());
            Ok(())
        })?;
    }
}
