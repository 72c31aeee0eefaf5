//! Parser for Solidity type strings as they appear in app definitions, e.g.
//! `tuple(address to, uint256 amount)[][]` or `(uint256,bool)`.

use core::{fmt, str::FromStr};

use super::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiType {
    Uint(usize),
    Int(usize),
    Address,
    Bool,
    FixedBytes(usize),
    Bytes,
    String,
    Array(Box<AbiType>),
    FixedArray(Box<AbiType>, usize),
    Tuple(Vec<Param>),
}

/// Tuple component. The name is what JSON objects are matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: Option<String>,
    pub kind: AbiType,
}

impl AbiType {
    pub fn is_dynamic(&self) -> bool {
        match self {
            AbiType::Bytes | AbiType::String | AbiType::Array(_) => true,
            AbiType::FixedArray(inner, _) => inner.is_dynamic(),
            AbiType::Tuple(params) => params.iter().any(|p| p.kind.is_dynamic()),
            _ => false,
        }
    }
}

/// Canonical form used in function signatures: no names, `(..)` for tuples.
impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiType::Uint(bits) => write!(f, "uint{}", bits),
            AbiType::Int(bits) => write!(f, "int{}", bits),
            AbiType::Address => f.write_str("address"),
            AbiType::Bool => f.write_str("bool"),
            AbiType::FixedBytes(n) => write!(f, "bytes{}", n),
            AbiType::Bytes => f.write_str("bytes"),
            AbiType::String => f.write_str("string"),
            AbiType::Array(inner) => write!(f, "{}[]", inner),
            AbiType::FixedArray(inner, n) => write!(f, "{}[{}]", inner, n),
            AbiType::Tuple(params) => {
                f.write_str("(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", p.kind)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl FromStr for AbiType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_type(s.trim())
    }
}

fn invalid(s: &str) -> Error {
    Error::InvalidType(s.to_string())
}

fn parse_type(s: &str) -> Result<AbiType, Error> {
    if s.is_empty() {
        return Err(invalid(s));
    }

    if let Some(without_close) = s.strip_suffix(']') {
        let open = without_close.rfind('[').ok_or_else(|| invalid(s))?;
        let inner = parse_type(without_close[..open].trim())?;
        let size = &without_close[open + 1..];
        return if size.is_empty() {
            Ok(AbiType::Array(Box::new(inner)))
        } else {
            let n = size.parse::<usize>().map_err(|_| invalid(s))?;
            Ok(AbiType::FixedArray(Box::new(inner), n))
        };
    }

    if let Some(body) = s.strip_suffix(')') {
        let body = body
            .strip_prefix("tuple(")
            .or_else(|| body.strip_prefix('('))
            .ok_or_else(|| invalid(s))?;
        let params = split_top_level(body)
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .map(parse_param)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(AbiType::Tuple(params));
    }

    parse_elementary(s)
}

fn parse_param(component: &str) -> Result<Param, Error> {
    let component = component.trim();
    // The name, if any, follows the last top-level whitespace.
    let mut depth = 0usize;
    let mut split = None;
    for (i, c) in component.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            c if c.is_whitespace() && depth == 0 => split = Some(i),
            _ => {}
        }
    }
    match split {
        Some(i) => {
            let name = component[i..].trim();
            if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(invalid(component));
            }
            Ok(Param {
                name: Some(name.to_string()),
                kind: parse_type(component[..i].trim())?,
            })
        }
        None => Ok(Param {
            name: None,
            kind: parse_type(component)?,
        }),
    }
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_bits(s: &str, digits: &str) -> Result<usize, Error> {
    if digits.is_empty() {
        return Ok(256);
    }
    let bits = digits.parse::<usize>().map_err(|_| invalid(s))?;
    if bits == 0 || bits > 256 || bits % 8 != 0 {
        return Err(invalid(s));
    }
    Ok(bits)
}

fn parse_elementary(s: &str) -> Result<AbiType, Error> {
    match s {
        "address" => return Ok(AbiType::Address),
        "bool" => return Ok(AbiType::Bool),
        "bytes" => return Ok(AbiType::Bytes),
        "string" => return Ok(AbiType::String),
        _ => {}
    }
    if let Some(digits) = s.strip_prefix("uint") {
        return Ok(AbiType::Uint(parse_bits(s, digits)?));
    }
    if let Some(digits) = s.strip_prefix("int") {
        return Ok(AbiType::Int(parse_bits(s, digits)?));
    }
    if let Some(digits) = s.strip_prefix("bytes") {
        let n = digits.parse::<usize>().map_err(|_| invalid(s))?;
        if n == 0 || n > 32 {
            return Err(invalid(s));
        }
        return Ok(AbiType::FixedBytes(n));
    }
    Err(invalid(s))
}
