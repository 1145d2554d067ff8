use std::cell::RefCell;
use std::rc::Rc;

use crate::data::map::TrieMap;
use crate::data::value::Value;

/// How the members are stored: a flat item list while the set is
/// small, the map trie (member -> member) once it grows, mirroring
/// the array-map/trie-map split.
#[derive(Debug)]
enum Members {
    Small(Vec<Value>),
    Large(TrieMap),
}

const SMALL_LIMIT: usize = 8;

/// A persistent hash set with structural member equality.
#[derive(Debug)]
pub struct Set {
    members: Members,
    pub meta: RefCell<Option<Value>>,
}

impl Set {
    pub fn empty() -> Set {
        Set {
            members: Members::Small(vec![]),
            meta: RefCell::new(None),
        }
    }

    pub fn from_items(items: Vec<Value>) -> Set {
        let mut set = Set::empty();
        for item in items {
            set = set.conj(item);
        }
        set
    }

    pub fn len(&self) -> usize {
        match &self.members {
            Members::Small(items) => items.len(),
            Members::Large(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, value: &Value) -> bool {
        match &self.members {
            Members::Small(items) => items.iter().any(|item| item.eql(value)),
            Members::Large(map) => map.contains(value),
        }
    }

    pub fn conj(&self, value: Value) -> Set {
        if self.contains(&value) {
            return Set {
                members: match &self.members {
                    Members::Small(items) => Members::Small(items.clone()),
                    Members::Large(map) => {
                        Members::Large(map.assoc(value.clone(), value))
                    },
                },
                meta: RefCell::new(None),
            };
        }

        let members = match &self.members {
            Members::Small(items) if items.len() < SMALL_LIMIT => {
                let mut items = items.clone();
                items.push(value);
                Members::Small(items)
            },
            Members::Small(items) => {
                let mut map = TrieMap::new();
                for item in items {
                    map = map.assoc(item.clone(), item.clone());
                }
                Members::Large(map.assoc(value.clone(), value))
            },
            Members::Large(map) => {
                Members::Large(map.assoc(value.clone(), value))
            },
        };
        Set {
            members,
            meta: RefCell::new(None),
        }
    }

    pub fn disj(&self, value: &Value) -> Set {
        let members = match &self.members {
            Members::Small(items) => Members::Small(
                items.iter().filter(|item| !item.eql(value)).cloned().collect(),
            ),
            Members::Large(map) => Members::Large(map.dissoc(value)),
        };
        Set {
            members,
            meta: RefCell::new(None),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> {
        let items: Vec<Value> = match &self.members {
            Members::Small(items) => items.clone(),
            Members::Large(map) => map.iter().map(|(k, _)| k).collect(),
        };
        items.into_iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn membership() {
        let set = Set::from_items(vec![Value::Int(1), Value::Int(2), Value::Int(1)]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&Value::Int(1)));
        assert!(!set.contains(&Value::Int(3)));
    }

    #[test]
    fn promotion_keeps_members() {
        let items: Vec<Value> = (0..100).map(Value::Int).collect();
        let set = Set::from_items(items);
        assert_eq!(set.len(), 100);
        for i in 0..100 {
            assert!(set.contains(&Value::Int(i)));
        }
        let shrunk = set.disj(&Value::Int(50));
        assert_eq!(shrunk.len(), 99);
        assert!(!shrunk.contains(&Value::Int(50)));
        assert!(set.contains(&Value::Int(50)));
    }
}
