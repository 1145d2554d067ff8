//! Property tests over the persistent collections and the numeric
//! tower.

use std::collections::HashMap as StdMap;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use proptest_derive::Arbitrary;

use corvine::data::map::TrieMap;
use corvine::data::num;
use corvine::data::value::Value;
use corvine::data::vector::Vector;

/// One step against the map model.
#[derive(Debug, Clone, Arbitrary)]
enum MapOp {
    Assoc(#[proptest(strategy = "-64i64..64")] i64, i64),
    Dissoc(#[proptest(strategy = "-64i64..64")] i64),
}

proptest! {
    /// Appends from a common base never disturb the base or each
    /// other: the copy-on-write generations keep every branch
    /// reading its own prefix.
    #[test]
    fn vector_branches_stay_independent(
        base_items in prop::collection::vec(any::<i64>(), 0..64),
        left in any::<i64>(),
        right in any::<i64>(),
    ) {
        let mut base = Vector::empty();
        for item in &base_items {
            base = base.conj(Value::Int(*item));
        }

        let left_branch = base.conj(Value::Int(left));
        let right_branch = base.conj(Value::Int(right));

        prop_assert_eq!(base.len(), base_items.len());
        prop_assert_eq!(left_branch.nth(base_items.len()), Value::Int(left));
        prop_assert_eq!(right_branch.nth(base_items.len()), Value::Int(right));
        for (index, item) in base_items.iter().enumerate() {
            prop_assert_eq!(base.nth(index), Value::Int(*item));
            prop_assert_eq!(left_branch.nth(index), Value::Int(*item));
            prop_assert_eq!(right_branch.nth(index), Value::Int(*item));
        }
    }

    /// Sequential conj produces exactly the appended values, and the
    /// generation counter only ever grows. Every handle minted along
    /// the way, popped ones included, carries its own tag.
    #[test]
    fn vector_generations_increase(
        items in prop::collection::vec(any::<i64>(), 1..128),
    ) {
        let mut v = Vector::empty();
        let mut last_generation = v.generation();
        for item in &items {
            v = v.conj(Value::Int(*item));
            prop_assert!(v.generation() > last_generation);
            last_generation = v.generation();
        }
        for (index, item) in items.iter().enumerate() {
            prop_assert_eq!(v.nth(index), Value::Int(*item));
        }

        if let Some(popped) = v.pop() {
            prop_assert!(popped.generation() > v.generation());
            prop_assert_eq!(popped.len(), items.len() - 1);
            // the shortened handle never owns the frontier: growing
            // it copies instead of touching the original's slot
            let grown = popped.conj(Value::Int(-1));
            prop_assert_eq!(
                v.nth(items.len() - 1),
                Value::Int(items[items.len() - 1])
            );
            prop_assert_eq!(grown.nth(items.len() - 1), Value::Int(-1));
        }
    }

    /// Any interleaving of assoc and dissoc leaves the trie holding
    /// exactly the model's entries.
    #[test]
    fn trie_map_matches_model(
        ops in prop::collection::vec(any::<MapOp>(), 0..256),
    ) {
        let mut model: StdMap<i64, i64> = StdMap::new();
        let mut map = TrieMap::new();

        for op in &ops {
            match op {
                MapOp::Assoc(key, value) => {
                    model.insert(*key, *value);
                    map = map.assoc(Value::Int(*key), Value::Int(*value));
                },
                MapOp::Dissoc(key) => {
                    model.remove(key);
                    map = map.dissoc(&Value::Int(*key));
                },
            }
        }

        prop_assert_eq!(map.len(), model.len());
        for (key, value) in &model {
            prop_assert_eq!(
                map.get(&Value::Int(*key)),
                Some(Value::Int(*value))
            );
        }
        let mut walked = 0;
        for (key, value) in map.iter() {
            let (Value::Int(key), Value::Int(value)) = (key, value) else {
                return Err(TestCaseError::fail("non-integer entry"));
            };
            prop_assert_eq!(model.get(&key).copied(), Some(value));
            walked += 1;
        }
        prop_assert_eq!(walked, model.len());
    }

    /// Division is exact: multiplying back recovers the dividend.
    #[test]
    fn division_round_trips(a in -10_000i64..10_000, b in 1i64..10_000) {
        let quotient = num::div(&Value::Int(a), &Value::Int(b)).unwrap();
        let recovered = num::mul(&quotient, &Value::Int(b)).unwrap();
        prop_assert!(recovered.equiv(&Value::Int(a)));
    }

    /// The strict and promoting adders agree whenever the strict one
    /// succeeds.
    #[test]
    fn promoting_add_extends_strict_add(a in any::<i64>(), b in any::<i64>()) {
        let strict = num::add(&Value::Int(a), &Value::Int(b));
        let promoting = num::add_promote(&Value::Int(a), &Value::Int(b)).unwrap();
        match strict {
            Ok(result) => prop_assert!(result.equiv(&promoting)),
            Err(_) => {
                // overflow: the promoting result is a big integer
                // carrying the exact sum
                let back = num::sub_promote(&promoting, &Value::Int(b)).unwrap();
                prop_assert!(back.equiv(&Value::Int(a)));
            },
        }
    }

    /// Map-key equality implies equal hashes.
    #[test]
    fn hash_respects_eql(a in any::<i64>(), b in any::<i64>()) {
        use corvine::data::hash::hash_value;
        let (va, vb) = (Value::Int(a), Value::Int(b));
        if va.eql(&vb) {
            prop_assert_eq!(hash_value(&va), hash_value(&vb));
        }
        // and a value always hashes like itself inside a collection
        let list_a = Value::list(vec![va.clone()]);
        let list_b = Value::list(vec![va]);
        prop_assert_eq!(hash_value(&list_a), hash_value(&list_b));
    }
}
