//! Head/tail ABI encoder.
//!
//! A sequence of values is written in two passes: the head holds static
//! values in place and a 32 byte offset (relative to the start of the head)
//! for every dynamic value, the tail holds the dynamic values themselves in
//! the same order. Nested sequences (tuples, arrays) repeat this recursively
//! with offsets relative to their own head.

use super::{types::U256, AbiValue};

pub const SLOT_SIZE: usize = 32;

pub trait Writer {
    fn write(&mut self, slot: &[u8]);
}

/// Collects the encoding, used for calldata.
impl Writer for Vec<u8> {
    fn write(&mut self, slot: &[u8]) {
        self.extend_from_slice(slot);
    }
}

/// `abi.encode(value)`: a dynamic value is preceded by its offset (always
/// `0x20`), exactly as if it were the only component of an outer tuple.
pub fn to_writer<W: Writer>(value: &AbiValue, writer: &mut W) {
    Encoder { writer }.write_sequence(core::slice::from_ref(value));
}

/// Encoding of function arguments: the values are written as the components
/// of an outer tuple, without an additional offset for the tuple itself.
pub fn to_fnargs_writer<W: Writer>(values: &[AbiValue], writer: &mut W) {
    Encoder { writer }.write_sequence(values);
}

/// Size of the value in the head of the enclosing sequence.
fn head_size(value: &AbiValue) -> usize {
    if value.is_dynamic() {
        return SLOT_SIZE;
    }
    match value {
        AbiValue::FixedArray(items) | AbiValue::Tuple(items) => items.iter().map(head_size).sum(),
        _ => SLOT_SIZE,
    }
}

/// Size of the complete encoding of a value, head and tail.
fn encoded_size(value: &AbiValue) -> usize {
    match value {
        AbiValue::Bytes(b) => SLOT_SIZE + padded_len(b.len()),
        AbiValue::String(s) => SLOT_SIZE + padded_len(s.len()),
        AbiValue::Array(items) => SLOT_SIZE + sequence_size(items),
        AbiValue::FixedArray(items) | AbiValue::Tuple(items) => sequence_size(items),
        _ => SLOT_SIZE,
    }
}

fn sequence_size(items: &[AbiValue]) -> usize {
    items
        .iter()
        .map(|item| {
            if item.is_dynamic() {
                SLOT_SIZE + encoded_size(item)
            } else {
                encoded_size(item)
            }
        })
        .sum()
}

fn padded_len(len: usize) -> usize {
    (len + SLOT_SIZE - 1) / SLOT_SIZE * SLOT_SIZE
}

struct Encoder<'a, W: Writer> {
    writer: &'a mut W,
}

impl<'a, W: Writer> Encoder<'a, W> {
    fn write_right_aligned(&mut self, data: &[u8]) {
        debug_assert!(data.len() <= SLOT_SIZE);
        let mut slot = [0u8; SLOT_SIZE];
        slot[SLOT_SIZE - data.len()..].copy_from_slice(data);
        self.writer.write(&slot);
    }

    fn write_left_aligned_slice(&mut self, data: &[u8]) {
        for chunk in data.chunks(SLOT_SIZE) {
            let mut slot = [0u8; SLOT_SIZE];
            slot[..chunk.len()].copy_from_slice(chunk);
            self.writer.write(&slot);
        }
    }

    fn write_usize(&mut self, v: usize) {
        self.write_right_aligned(&U256::from(v).to_word());
    }

    fn write_sequence(&mut self, items: &[AbiValue]) {
        // Head
        let mut offset: usize = items.iter().map(head_size).sum();
        for item in items {
            if item.is_dynamic() {
                self.write_usize(offset);
                offset += encoded_size(item);
            } else {
                self.write_value(item);
            }
        }
        // Tail
        for item in items.iter().filter(|item| item.is_dynamic()) {
            self.write_value(item);
        }
    }

    fn write_value(&mut self, value: &AbiValue) {
        match value {
            AbiValue::Uint(v) | AbiValue::Int(v) => self.write_right_aligned(&v.to_word()),
            AbiValue::Address(a) => self.write_right_aligned(&a.0),
            AbiValue::Bool(b) => self.write_right_aligned(&[*b as u8]),
            AbiValue::FixedBytes(b) => self.write_left_aligned_slice(b),
            AbiValue::Bytes(b) => {
                self.write_usize(b.len());
                self.write_left_aligned_slice(b);
            }
            AbiValue::String(s) => {
                self.write_usize(s.len());
                self.write_left_aligned_slice(s.as_bytes());
            }
            AbiValue::Array(items) => {
                self.write_usize(items.len());
                self.write_sequence(items);
            }
            AbiValue::FixedArray(items) | AbiValue::Tuple(items) => self.write_sequence(items),
        }
    }
}
