use compact_str::CompactString;
use primitive_types::U256;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Field types of indexed tables. Chain schemas declare fields with
/// Solidity type names; `FieldType::parse` folds them into this set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FieldType {
    Boolean,
    Integer,
    U256,
    I256,
    Address,
    Text,
    Blob,
    Json,
}

impl FieldType {
    pub fn parse(raw: &str) -> Option<FieldType> {
        let ty = raw.trim().to_ascii_lowercase();
        if ty.ends_with(']') {
            return Some(FieldType::Json);
        }
        match ty.as_str() {
            "bool" | "boolean" => return Some(FieldType::Boolean),
            "address" => return Some(FieldType::Address),
            "string" | "text" => return Some(FieldType::Text),
            "bytes" | "blob" => return Some(FieldType::Blob),
            "json" => return Some(FieldType::Json),
            "integer" => return Some(FieldType::Integer),
            "u256" => return Some(FieldType::U256),
            "i256" => return Some(FieldType::I256),
            _ => {}
        }
        if let Some(width) = ty.strip_prefix("bytes") {
            return parse_width(width, 1, 32).map(|_| FieldType::Blob);
        }
        if let Some(width) = ty.strip_prefix("uint") {
            // Values wider than 63 bits do not fit an i64.
            return parse_width(width, 8, 256).map(|w| {
                if w < 64 {
                    FieldType::Integer
                } else {
                    FieldType::U256
                }
            });
        }
        if let Some(width) = ty.strip_prefix("int") {
            return parse_width(width, 8, 256).map(|w| {
                if w <= 64 {
                    FieldType::Integer
                } else {
                    FieldType::I256
                }
            });
        }
        None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::U256 => "u256",
            FieldType::I256 => "i256",
            FieldType::Address => "address",
            FieldType::Text => "text",
            FieldType::Blob => "blob",
            FieldType::Json => "json",
        }
    }
}

fn parse_width(width: &str, step: u32, max: u32) -> Option<u32> {
    if width.is_empty() {
        return Some(max);
    }
    let w = width.parse::<u32>().ok()?;
    (w > 0 && w <= max && w % step == 0).then_some(w)
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename = "_ExtStruct")]
struct MsgpackExt((i8, serde_bytes::ByteBuf));

fn serialize_u256_ext<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    MsgpackExt((1, serde_bytes::ByteBuf::from(value.to_vec()))).serialize(serializer)
}

fn serialize_i256_ext<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    MsgpackExt((2, serde_bytes::ByteBuf::from(value.to_vec()))).serialize(serializer)
}

fn deserialize_ext<'de, D>(deserializer: D, expected_tag: i8) -> Result<[u8; 32], D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WordPayload {
        Ext(MsgpackExt),
        Raw([u8; 32]),
        Vec(Vec<u8>),
    }
    let bytes = match WordPayload::deserialize(deserializer)? {
        WordPayload::Ext(MsgpackExt((tag, bytes))) => {
            if tag != expected_tag {
                return Err(serde::de::Error::custom("invalid 256-bit ext tag"));
            }
            bytes.into_vec()
        }
        WordPayload::Raw(v) => return Ok(v),
        WordPayload::Vec(v) => v,
    };
    if bytes.len() != 32 {
        return Err(serde::de::Error::custom("invalid 256-bit word length"));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn deserialize_u256_ext<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_ext(deserializer, 1)
}

fn deserialize_i256_ext<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_ext(deserializer, 2)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    #[serde(
        serialize_with = "serialize_u256_ext",
        deserialize_with = "deserialize_u256_ext"
    )]
    U256([u8; 32]),
    #[serde(
        serialize_with = "serialize_i256_ext",
        deserialize_with = "deserialize_i256_ext"
    )]
    I256([u8; 32]),
    Address(CompactString),
    Text(CompactString),
    Blob(Vec<u8>),
    Json(CompactString),
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Value {
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::U256(_) => 3,
            Value::I256(_) => 4,
            Value::Address(_) => 5,
            Value::Text(_) => 6,
            Value::Json(_) => 7,
            Value::Blob(_) => 8,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::U256(_) => "u256",
            Value::I256(_) => "i256",
            Value::Address(_) => "address",
            Value::Text(_) => "text",
            Value::Json(_) => "json",
            Value::Blob(_) => "blob",
        }
    }

    /// Whether this value may be stored in a field of `field_type`.
    pub fn conforms_to(&self, field_type: FieldType) -> bool {
        matches!(
            (self, field_type),
            (Value::Null, _)
                | (Value::Boolean(_), FieldType::Boolean)
                | (Value::Integer(_), FieldType::Integer)
                | (Value::U256(_), FieldType::U256)
                | (Value::I256(_), FieldType::I256)
                | (Value::Address(_), FieldType::Address)
                | (Value::Text(_), FieldType::Text)
                | (Value::Blob(_), FieldType::Blob)
                | (Value::Json(_), FieldType::Json)
        )
    }

    pub fn u256_from_u128(v: u128) -> Value {
        Value::U256(word_from_u256(U256::from(v)))
    }

    /// Parses a decimal or `0x` hex string into a U256 value.
    pub fn parse_u256(raw: &str) -> Option<Value> {
        parse_unsigned_word(raw).map(|v| Value::U256(word_from_u256(v)))
    }

    /// Parses an optionally negative decimal or `0x` hex string into an I256
    /// value stored as big-endian two's complement.
    pub fn parse_i256(raw: &str) -> Option<Value> {
        let raw = raw.trim();
        let (negative, digits) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let magnitude = parse_unsigned_word(digits)?;
        let sign_bit = U256::one() << 255;
        let word = if negative {
            if magnitude > sign_bit {
                return None;
            }
            (!magnitude).overflowing_add(U256::one()).0
        } else {
            if magnitude >= sign_bit {
                return None;
            }
            magnitude
        };
        Some(Value::I256(word_from_u256(word)))
    }

    /// Renders the value for JSON output. 256-bit words become decimal
    /// strings so clients without big-integer support can still read them.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::U256(word) => serde_json::Value::String(U256::from_big_endian(word).to_string()),
            Value::I256(word) => serde_json::Value::String(i256_to_string(word)),
            Value::Address(a) | Value::Text(a) | Value::Json(a) => {
                serde_json::Value::String(a.to_string())
            }
            Value::Blob(bytes) => serde_json::Value::String(format!("0x{}", hex::encode(bytes))),
        }
    }
}

fn parse_unsigned_word(raw: &str) -> Option<U256> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        if hex.is_empty() || hex.len() > 64 {
            return None;
        }
        return U256::from_str_radix(hex, 16).ok();
    }
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    U256::from_dec_str(raw).ok()
}

fn word_from_u256(v: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    v.to_big_endian(&mut out);
    out
}

fn i256_to_string(word: &[u8; 32]) -> String {
    let v = U256::from_big_endian(word);
    if word[0] & 0x80 == 0 {
        return v.to_string();
    }
    let magnitude = (!v).overflowing_add(U256::one()).0;
    format!("-{magnitude}")
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::U256(a), Value::U256(b)) => a.cmp(b),
            // Two's complement: flipping the sign bit gives unsigned order.
            (Value::I256(a), Value::I256(b)) => {
                let (mut a, mut b) = (*a, *b);
                a[0] ^= 0x80;
                b[0] ^= 0x80;
                a.cmp(&b)
            }
            (Value::Address(a), Value::Address(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Json(a), Value::Json(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}
