use std::rc::Rc;

use crate::data::value::Value;

/// The Murmur3 32-bit finalizer. Every raw structural hash is run
/// through this before the HAMT slices it into 5-bit chunks, so keys
/// that differ only in low bits still spread across the trie.
pub fn mix(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^ (h >> 16)
}

/// FNV-1a over bytes, folded to 32 bits.
pub fn hash_str(s: &str) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for byte in s.as_bytes() {
        h ^= u32::from(*byte);
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

/// Combine an element hash into an ordered sequence hash.
fn combine_ordered(acc: u32, h: u32) -> u32 {
    acc.wrapping_mul(31).wrapping_add(h)
}

fn hash_slice(items: &[Value]) -> u32 {
    mix(items.iter().fold(1u32, |acc, v| combine_ordered(acc, hash_value(v))))
}

/// Unordered collections sum entry hashes so iteration order
/// cannot leak into the hash.
fn hash_unordered(hashes: impl Iterator<Item = u32>) -> u32 {
    mix(hashes.fold(0u32, u32::wrapping_add))
}

fn identity_hash<T>(rc: &Rc<T>) -> u32 {
    mix(Rc::as_ptr(rc) as usize as u32)
}

/// The structural hash of a value, consistent with [`Value::eql`]:
/// `a.eql(b)` implies `hash_value(a) == hash_value(b)`.
///
/// Floats hash by bit pattern (their map-key equality). Values with
/// no structure of their own (functions, reference cells, foreign
/// handles) hash by identity.
pub fn hash_value(value: &Value) -> u32 {
    match value {
        Value::Nil => 0,
        Value::Bool(false) => mix(0x42108420),
        Value::Bool(true) => mix(0x42108421),
        Value::Int(n) => mix((*n as u64 ^ (*n as u64 >> 32)) as u32),
        Value::Float(f) => {
            let bits = f.to_bits();
            mix((bits ^ (bits >> 32)) as u32)
        },
        Value::Char(c) => mix(*c as u32 ^ 0x00c0ffee),
        Value::Str(s) => mix(hash_str(s)),
        Value::Symbol(s) => s.hash(),
        Value::Keyword(k) => k.hash(),
        Value::List(l) => hash_slice(l.items()),
        Value::Vector(v) => hash_slice(&v.to_vec()),
        Value::ArrayMap(m) => {
            hash_unordered(m.entries().iter().map(|(k, v)| {
                hash_value(k) ^ hash_value(v).rotate_left(16)
            }))
        },
        Value::HashMap(m) => {
            hash_unordered(
                m.iter().map(|(k, v)| hash_value(&k) ^ hash_value(&v).rotate_left(16)),
            )
        },
        Value::Set(s) => hash_unordered(s.iter().map(|v| hash_value(&v))),
        Value::BigInt(n) => {
            let (_, bytes) = n.to_bytes_le();
            mix(bytes.iter().fold(0x5bd1_e995u32, |acc, b| {
                combine_ordered(acc, u32::from(*b))
            }))
        },
        Value::Ratio(r) => {
            let n = hash_value(&Value::BigInt(Rc::new(r.numer().clone())));
            let d = hash_value(&Value::BigInt(Rc::new(r.denom().clone())));
            mix(n ^ d.rotate_left(8))
        },
        Value::BigDec(d) => {
            let unscaled = hash_value(&Value::BigInt(Rc::new(d.unscaled.clone())));
            mix(unscaled ^ (d.scale as u32).rotate_left(24))
        },
        Value::Regex(p) => mix(hash_str(&p.source) ^ 0x7e6e_1234),
        Value::Reduced(inner) => mix(hash_value(inner) ^ 0x0000_5ced),

        // Sequences hash as the values they yield is a printer/seq
        // concern; realized chunks hash over their window.
        Value::ArrayChunk(c) => hash_slice(c.window()),
        Value::Cons(c) => {
            mix(combine_ordered(hash_value(&c.head), hash_value(&c.tail)))
        },

        // Everything below has identity, not structure.
        Value::Fn(c) => identity_hash(c),
        Value::Builtin(b) => identity_hash(b),
        Value::Protocol(p) => identity_hash(p),
        Value::ProtocolFn(p) => identity_hash(p),
        Value::MultiFn(m) => identity_hash(m),
        Value::Var(v) => identity_hash(v),
        Value::Atom(a) => identity_hash(a),
        Value::Volatile(v) => identity_hash(v),
        Value::LazySeq(l) => identity_hash(l),
        Value::ChunkedCons(c) => identity_hash(c),
        Value::ChunkBuffer(b) => identity_hash(b),
        Value::TransientVector(t) => identity_hash(t),
        Value::TransientMap(t) => identity_hash(t),
        Value::TransientSet(t) => identity_hash(t),
        Value::Delay(d) => identity_hash(d),
        Value::ForeignModule(m) => identity_hash(m),
        Value::ForeignFn(f) => identity_hash(f),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mix_spreads_low_bits() {
        // consecutive inputs should not map to consecutive outputs
        let a = mix(1);
        let b = mix(2);
        assert_ne!(a.wrapping_add(1), b);
        assert_ne!(a, b);
    }

    #[test]
    fn equal_values_hash_equal() {
        assert_eq!(
            hash_value(&Value::Int(42)),
            hash_value(&Value::Int(42))
        );
        assert_eq!(
            hash_value(&Value::from_str("abc")),
            hash_value(&Value::from_str("abc"))
        );
        assert_ne!(
            hash_value(&Value::Int(1)),
            hash_value(&Value::Float(1.0))
        );
    }

    #[test]
    fn float_hash_is_bitwise() {
        assert_eq!(
            hash_value(&Value::Float(f64::NAN)),
            hash_value(&Value::Float(f64::NAN))
        );
        assert_ne!(
            hash_value(&Value::Float(0.0)),
            hash_value(&Value::Float(-0.0))
        );
    }
}
