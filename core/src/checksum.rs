/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Ark Sovereign Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

//! Chunk, block and code fingerprints (SHA-256, hex encoded).
//!
//! A chunk's checksum covers its kind, id and type plus the checksums of its
//! binding and arguments, so equal computations hash equally no matter where
//! they sit in the code. Blocks hash the checksums of their chunks.

use crate::bytecode::{Chunk, Code, Primitive, PrimitiveValue, Ref};
use crate::types::Type;
use sha2::{Digest, Sha256};

const SEP: &[u8] = &[0];

pub fn hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn ref_checksum(code: &Code, r: Ref) -> String {
    if r.is_block() {
        return block_checksum(code, r);
    }
    code.checksum(r).unwrap_or_default().to_string()
}

fn digest_primitive(code: &Code, p: &Primitive, hasher: &mut Sha256) {
    hasher.update(p.typ.label().as_bytes());
    hasher.update(SEP);
    match &p.value {
        PrimitiveValue::None => hasher.update(b"none"),
        PrimitiveValue::Bool(v) => hasher.update([*v as u8]),
        PrimitiveValue::Int(v) => hasher.update(v.to_le_bytes()),
        PrimitiveValue::Float(v) => hasher.update(v.to_bits().to_le_bytes()),
        PrimitiveValue::String(v) => hasher.update(v.as_bytes()),
        PrimitiveValue::Ref(r) if p.typ == Type::FunctionLike => {
            hasher.update(block_checksum(code, *r).as_bytes())
        }
        PrimitiveValue::Ref(r) => hasher.update(ref_checksum(code, *r).as_bytes()),
        PrimitiveValue::Array(items) => {
            for item in items {
                digest_primitive(code, item, hasher);
                hasher.update(SEP);
            }
        }
        PrimitiveValue::Map(entries) => {
            for (key, value) in entries {
                hasher.update(key.as_bytes());
                hasher.update(SEP);
                digest_primitive(code, value, hasher);
                hasher.update(SEP);
            }
        }
        PrimitiveValue::Time(t) => {
            hasher.update(t.timestamp().to_le_bytes());
            hasher.update(t.timestamp_subsec_nanos().to_le_bytes());
        }
    }
}

pub fn chunk_checksum(code: &Code, chunk: &Chunk) -> String {
    let mut hasher = Sha256::new();
    match chunk {
        Chunk::Primitive { id, primitive } => {
            hasher.update(b"primitive");
            hasher.update(SEP);
            hasher.update(id.as_bytes());
            hasher.update(SEP);
            digest_primitive(code, primitive, &mut hasher);
        }
        Chunk::Function { id, function } => {
            hasher.update(b"function");
            hasher.update(SEP);
            hasher.update(id.as_bytes());
            hasher.update(SEP);
            hasher.update(function.typ.label().as_bytes());
            hasher.update(SEP);
            if let Some(binding) = function.binding {
                hasher.update(ref_checksum(code, binding).as_bytes());
            }
            for arg in &function.args {
                hasher.update(SEP);
                digest_primitive(code, arg, &mut hasher);
            }
        }
        Chunk::Property { id, typ } => {
            hasher.update(b"property");
            hasher.update(SEP);
            hasher.update(id.as_bytes());
            hasher.update(SEP);
            hasher.update(typ.label().as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Fingerprint of a block: the checksums of all its chunks in order.
pub fn block_checksum(code: &Code, block: Ref) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"block");
    if let Some(b) = code.block(block) {
        for slot in 1..=b.chunks.len() as u32 {
            hasher.update(SEP);
            hasher.update(code.checksum(block.with_slot(slot)).unwrap_or_default().as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Fingerprint of a whole program: every entry and data point of every block.
pub fn code_id(code: &Code) -> String {
    let mut hasher = Sha256::new();
    for b in &code.blocks {
        hasher.update(b"entrypoints");
        for r in &b.entrypoints {
            hasher.update(code.checksum(*r).unwrap_or_default().as_bytes());
        }
        hasher.update(b"datapoints");
        for r in &b.datapoints {
            hasher.update(code.checksum(*r).unwrap_or_default().as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_chunk_checksum_depends_on_binding() {
        let mut code = Code::new();
        let top = Ref::binding_of(1);
        let one = code.add_chunk(top, Chunk::primitive(Primitive::int(1)));
        let two = code.add_chunk(top, Chunk::primitive(Primitive::int(2)));

        let on_one = Chunk::function("==int", Type::Bool, Some(one), vec![Primitive::int(3)]);
        let on_two = Chunk::function("==int", Type::Bool, Some(two), vec![Primitive::int(3)]);
        assert_ne!(chunk_checksum(&code, &on_one), chunk_checksum(&code, &on_two));
        assert_eq!(chunk_checksum(&code, &on_one), chunk_checksum(&code, &on_one.clone()));
    }

    #[test]
    fn test_equal_values_hash_equally_across_slots() {
        let mut code = Code::new();
        let top = Ref::binding_of(1);
        let a = code.add_chunk(top, Chunk::primitive(Primitive::string("x")));
        let b = code.add_chunk(top, Chunk::primitive(Primitive::string("x")));
        assert_eq!(code.checksum(a), code.checksum(b));
    }

    #[test]
    fn test_block_checksum_tracks_content() {
        let mut code = Code::new();
        let first = code.add_block();
        let second = code.add_block();
        code.add_chunk(first, Chunk::primitive(Primitive::int(1)));
        code.add_chunk(second, Chunk::primitive(Primitive::int(2)));
        assert_ne!(block_checksum(&code, first), block_checksum(&code, second));
    }
}
