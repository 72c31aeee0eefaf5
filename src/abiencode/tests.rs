use super::*;
use serde_json::{json, Value};

use core::fmt::Debug;

/*
Python code to split output from remix into chunks of 32 bytes, the annotations
are done manually.
```python
s = "..."
print(*(s[i:i+64] for i in range(0, len(s), 64)), sep="\n")
```
*/

struct AssertWriter<'a, I>
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    expected_iter: I,
}

struct Slot<'a>(&'a [u8]);

impl<'a> Debug for Slot<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl<'a> PartialEq for Slot<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<'a, I> Writer for AssertWriter<'a, I>
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    fn write(&mut self, slot: &[u8]) {
        match self.expected_iter.next() {
            Some((expected, line)) => {
                assert_eq!(
                    expected.len(),
                    64,
                    "The expected input must be grouped into slots of 32 bytes as hex, without 0x."
                );
                assert_eq!(slot.len(), 32, "Each slot should have 32 bytes.");
                println!("{}", line);

                let expected = hex::decode(expected).unwrap();
                assert_eq!(
                    Slot(slot),
                    Slot(expected.as_slice()),
                    "slot did not match the expected value"
                );
            }
            None => {
                panic!("Expected end of data, got {:?}", Slot(slot));
            }
        }
    }
}

macro_rules! expected_iter {
    ( $expected:expr ) => {
        // 32-byte hex string at the beginning of each non-empty line, anything
        // after it is an annotation.
        $expected
            .split("\n")
            .filter(|&line| !line.trim().is_empty())
            .map(|line| {
                if line.trim().len() < 64 {
                    panic!("expected line is too short, it must start with a 32 byte hex string!");
                };
                (&line.trim()[..64], line)
            })
    };
}

fn coerce(types: &[&str], values: Value) -> Vec<AbiValue> {
    let values = values.as_array().unwrap().clone();
    assert_eq!(types.len(), values.len());
    types
        .iter()
        .zip(values.iter())
        .map(|(t, v)| AbiValue::from_json(&t.parse().unwrap(), v).unwrap())
        .collect()
}

pub fn encode_and_compare_fnargs(types: &[&str], values: Value, expected: &str) {
    let values = coerce(types, values);
    let mut writer = AssertWriter {
        expected_iter: expected_iter!(expected),
    };
    to_fnargs_writer(&values, &mut writer);
    assert_eq!(writer.expected_iter.next(), None, "there are less slots than expected.");
}

pub fn encode_and_compare(ty: &str, value: Value, expected: &str) {
    let value = AbiValue::from_json(&ty.parse().unwrap(), &value).unwrap();
    let mut writer = AssertWriter {
        expected_iter: expected_iter!(expected),
    };
    to_writer(&value, &mut writer);
    assert_eq!(writer.expected_iter.next(), None, "there are less slots than expected.");
}

// The following vectors come from the solidity documentation:
// https://docs.soliditylang.org/en/v0.8.17/abi-spec.html#examples
// without the 4 byte method id.

#[test]
fn foo_baz() {
    encode_and_compare(
        "tuple(uint32 x, bool y)",
        json!({"x": 69, "y": true}),
        "
0000000000000000000000000000000000000000000000000000000000000045
0000000000000000000000000000000000000000000000000000000000000001
        ",
    );
}

#[test]
fn foo_bar() {
    encode_and_compare_fnargs(
        &["bytes3[2]"],
        json!([["0x616263", "0x646566"]]),
        "
6162630000000000000000000000000000000000000000000000000000000000
6465660000000000000000000000000000000000000000000000000000000000
        ",
    );
}

#[test]
fn foo_sam() {
    encode_and_compare_fnargs(
        &["bytes", "bool", "uint[]"],
        json!(["0x64617665", true, [1, 2, 3]]),
        "
0000000000000000000000000000000000000000000000000000000000000060 // [0] (bytes) offset
0000000000000000000000000000000000000000000000000000000000000001 // [1] (bool)
00000000000000000000000000000000000000000000000000000000000000a0 // [2] (uint[]) offset
    0000000000000000000000000000000000000000000000000000000000000004 // [0] (bytes) length
    6461766500000000000000000000000000000000000000000000000000000000 // [0] (bytes)

    0000000000000000000000000000000000000000000000000000000000000003 // [2] (uint[]) length
    0000000000000000000000000000000000000000000000000000000000000001 // [2][0]
    0000000000000000000000000000000000000000000000000000000000000002 // [2][1]
    0000000000000000000000000000000000000000000000000000000000000003 // [2][2]
        ",
    );
}

#[test]
fn dynamictypes_f() {
    // f(uint256,uint32[],bytes10,bytes)
    encode_and_compare_fnargs(
        &["uint256", "uint32[]", "bytes10", "bytes"],
        json!([
            "0x123",
            ["0x456", "0x789"],
            "0x31323334353637383930",
            "0x48656c6c6f2c20776f726c6421"
        ]),
        "
0000000000000000000000000000000000000000000000000000000000000123 // [0]
0000000000000000000000000000000000000000000000000000000000000080 // [1] offset
3132333435363738393000000000000000000000000000000000000000000000 // [2]
00000000000000000000000000000000000000000000000000000000000000e0 // [3] offset
    0000000000000000000000000000000000000000000000000000000000000002 // [1] length
    0000000000000000000000000000000000000000000000000000000000000456 // [1][0]
    0000000000000000000000000000000000000000000000000000000000000789 // [1][1]

    000000000000000000000000000000000000000000000000000000000000000d // [3] length
    48656c6c6f2c20776f726c642100000000000000000000000000000000000000 // [3]
        ",
    );
}

#[test]
fn dynamictypes_g() {
    // g(uint256[][],string[])
    encode_and_compare_fnargs(
        &["uint256[][]", "string[]"],
        json!([[[1, 2], [3]], ["one", "two", "three"]]),
        "
0000000000000000000000000000000000000000000000000000000000000040 // offset of [[1, 2], [3]]
0000000000000000000000000000000000000000000000000000000000000140 // offset of [\"one\", \"two\", \"three\"]
    0000000000000000000000000000000000000000000000000000000000000002 // count for [[1, 2], [3]]
    0000000000000000000000000000000000000000000000000000000000000040 // offset of [1, 2]
    00000000000000000000000000000000000000000000000000000000000000a0 // offset of [3]
        0000000000000000000000000000000000000000000000000000000000000002 // count for [1, 2]
        0000000000000000000000000000000000000000000000000000000000000001 // encoding of 1
        0000000000000000000000000000000000000000000000000000000000000002 // encoding of 2

        0000000000000000000000000000000000000000000000000000000000000001 // count for [3]
        0000000000000000000000000000000000000000000000000000000000000003 // encoding of 3

    0000000000000000000000000000000000000000000000000000000000000003 // count for [\"one\", \"two\", \"three\"]
    0000000000000000000000000000000000000000000000000000000000000060 // offset for \"one\"
    00000000000000000000000000000000000000000000000000000000000000a0 // offset for \"two\"
    00000000000000000000000000000000000000000000000000000000000000e0 // offset for \"three\"
        0000000000000000000000000000000000000000000000000000000000000003 // count for \"one\"
        6f6e650000000000000000000000000000000000000000000000000000000000 // encoding of \"one\"

        0000000000000000000000000000000000000000000000000000000000000003 // count for \"two\"
        74776f0000000000000000000000000000000000000000000000000000000000 // encoding of \"two\"

        0000000000000000000000000000000000000000000000000000000000000005 // count for \"three\"
        7468726565000000000000000000000000000000000000000000000000000000 // encoding of \"three\"
        ",
    );
}

#[test]
fn dynamic_struct_gets_outer_offset() {
    // abi.encode of a struct with a dynamic member starts with the offset of
    // the struct itself.
    encode_and_compare(
        "tuple(address to, uint256[] amounts)",
        json!({
            "to": "0x00000000000000000000000000000000000000aa",
            "amounts": [7]
        }),
        "
0000000000000000000000000000000000000000000000000000000000000020 // struct offset
00000000000000000000000000000000000000000000000000000000000000aa // to
0000000000000000000000000000000000000000000000000000000000000040 // amounts offset
    0000000000000000000000000000000000000000000000000000000000000001 // amounts length
    0000000000000000000000000000000000000000000000000000000000000007 // amounts[0]
        ",
    );
}

#[test]
fn nested_tuple_arrays() {
    // Shape of the free balance state: (address, uint256)[][]
    encode_and_compare_fnargs(
        &["tuple(address to, uint256 amount)[][]"],
        json!([[[
            {"to": "0x0000000000000000000000000000000000000001", "amount": 5},
            {"to": "0x0000000000000000000000000000000000000002", "amount": 6}
        ]]]),
        "
0000000000000000000000000000000000000000000000000000000000000020 // offset of outer array
    0000000000000000000000000000000000000000000000000000000000000001 // outer length
    0000000000000000000000000000000000000000000000000000000000000020 // offset of row 0
        0000000000000000000000000000000000000000000000000000000000000002 // row length
        0000000000000000000000000000000000000000000000000000000000000001 // [0].to
        0000000000000000000000000000000000000000000000000000000000000005 // [0].amount
        0000000000000000000000000000000000000000000000000000000000000002 // [1].to
        0000000000000000000000000000000000000000000000000000000000000006 // [1].amount
        ",
    );
}
