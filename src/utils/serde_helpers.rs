use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

/// Peers send some integers as JSON strings ("32570") and some as numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Num(u64),
}

/// Deserialize a `u64` given either as a number or a decimal string.
pub fn u64_from_str_or_num<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match StringOrNumber::deserialize(d)? {
        StringOrNumber::Num(n) => Ok(n),
        StringOrNumber::Str(s) => u64::from_str(s.trim()).map_err(D::Error::custom),
    }
}

/// Deserialize a `u32` given either as a number or a decimal string.
pub fn u32_from_str_or_num<'de, D>(d: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let n = u64_from_str_or_num(d)?;
    u32::try_from(n).map_err(D::Error::custom)
}

/// Canonical hash rendering: upper-case hex.
pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// True when `s` is a 64-character hex string (a 256-bit hash).
pub fn is_hash256(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
