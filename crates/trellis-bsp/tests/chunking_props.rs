use proptest::prelude::*;
use trellis_bsp::{
    chunking::{chunk_size, chunk_targets},
    BuildTargetIdentifier,
};

const PROPTEST_CASES: u32 = 256;

fn arb_targets() -> impl Strategy<Value = Vec<BuildTargetIdentifier>> {
    prop::collection::vec("[a-z]{1,6}", 0..400).prop_map(|names| {
        names
            .into_iter()
            .map(|name| BuildTargetIdentifier::new(format!("file:///ws/{name}")))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: PROPTEST_CASES, .. ProptestConfig::default() })]

    #[test]
    fn chunks_concatenate_back_to_the_input(targets in arb_targets(), min_chunk_size in 0usize..64) {
        let chunks = chunk_targets(&targets, min_chunk_size);
        prop_assert_eq!(chunks.concat(), targets);
    }

    #[test]
    fn only_the_last_chunk_may_be_short(targets in arb_targets(), min_chunk_size in 0usize..64) {
        let chunks = chunk_targets(&targets, min_chunk_size);
        prop_assert!(!chunks.is_empty());
        if targets.is_empty() {
            prop_assert_eq!(chunks.len(), 1);
            prop_assert!(chunks[0].is_empty());
        } else {
            let size = chunk_size(targets.len(), min_chunk_size);
            prop_assert!(size >= 1);
            prop_assert!(size >= min_chunk_size);
            let (last, full) = chunks.split_last().unwrap();
            prop_assert!(full.iter().all(|chunk| chunk.len() == size));
            prop_assert!(!last.is_empty() && last.len() <= size);
        }
    }
}
