//! Property tests for quota accounting.

use draftsync_storage::{InMemoryMedium, StorageError, StorageMedium};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Op {
    Set(u8, usize),
    Remove(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..8, 0usize..40).prop_map(|(k, len)| Op::Set(k, len)),
        1 => (0u8..8).prop_map(Op::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn quota_is_never_exceeded_and_rejected_writes_change_nothing(
        quota in 16usize..200,
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let medium = InMemoryMedium::with_quota(quota);
        let mut model: BTreeMap<String, String> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Set(k, len) => {
                    let key = format!("k{k}");
                    let value = "x".repeat(len);
                    match medium.set(&key, &value) {
                        Ok(()) => {
                            model.insert(key, value);
                        }
                        Err(StorageError::QuotaExceeded { needed, quota: q }) => {
                            prop_assert_eq!(q, quota);
                            prop_assert!(needed > quota);
                        }
                        Err(e) => prop_assert!(false, "unexpected error: {e}"),
                    }
                }
                Op::Remove(k) => {
                    let key = format!("k{k}");
                    medium.remove(&key).unwrap();
                    model.remove(&key);
                }
            }

            prop_assert!(medium.used_bytes() <= quota);
            let used: usize = model.iter().map(|(k, v)| k.len() + v.len()).sum();
            prop_assert_eq!(medium.used_bytes(), used);
        }

        let mut keys = medium.keys().unwrap();
        keys.sort();
        prop_assert_eq!(keys, model.keys().cloned().collect::<Vec<_>>());
    }
}
