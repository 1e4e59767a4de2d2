//! Registry value codec.
//!
//! Pure conversions between the text forms found in exported registry files
//! and the canonical in-memory forms used by device records:
//!
//! ```text
//! MAC          d51ffa421c4c           <->  D5:1F:FA:42:1C:4C
//! binary       hex:a6,1b,7f           <->  A61B7F
//! qword        hex(b):01,00,..,00     <->  1 (8 bytes, little-endian)
//! dword        dword:00000107         <->  0x107
//! EDIV dword   dword:01000000         <->  1 (see EdivByteOrder)
//! ```
//!
//! Every function rejects malformed input instead of truncating it.

use crate::error::{Result, SyncError};
use crate::mac::Mac;
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Cursor;

/// Prefix of a REG_BINARY literal.
pub const HEX_PREFIX: &str = "hex";

/// Registry type tag of a REG_QWORD written as a hex list (`hex(b):`).
pub const QWORD_TYPE_TAG: &str = "b";

/// Prefix of a REG_DWORD literal.
pub const DWORD_PREFIX: &str = "dword:";

/// Byte order of the digits in an ordinary `dword:` literal.
///
/// `reged` prints REG_DWORD data as a number, most significant digit first.
pub type DwordLiteralOrder = BigEndian;

/// Byte order of the digits in an `EDIV` dword literal.
///
/// Registry documentation says REG_DWORD data is little-endian, so an EDIV
/// of 1 would read `dword:00000001`. Real hives hold it with the bytes
/// reversed: `dword:01000000`. The divergence is intentional.
pub type EdivByteOrder = LittleEndian;

static MAC_REG_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{12}$").expect("static MAC key pattern"));

static REG_HEX_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^hex(?:\(([0-9a-fA-F]+)\))?$").expect("static hex type pattern"));

/// Splits hex text into 2-character byte strings.
///
/// # Errors
///
/// Returns [`SyncError::MalformedHex`] on an odd length or non-hex characters.
///
/// # Examples
///
/// ```rust
/// # use bt_dualboot::codec::hex_to_pairs;
/// assert_eq!(hex_to_pairs("ABCDEF").unwrap(), vec!["AB", "CD", "EF"]);
/// assert!(hex_to_pairs("ABC").is_err());
/// ```
pub fn hex_to_pairs(hex: &str) -> Result<Vec<&str>> {
    if hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SyncError::malformed_hex(hex));
    }

    Ok((0..hex.len()).step_by(2).map(|i| &hex[i..i + 2]).collect())
}

/// Validates hex text and returns it uppercased.
pub fn normalize_hex(hex: &str) -> Result<String> {
    hex_to_pairs(hex)?;
    Ok(hex.to_ascii_uppercase())
}

/// Strips one pair of surrounding double quotes, if present.
pub fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Wraps a value name in double quotes, as registry files expect.
pub fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

/// Returns true if `value` (optionally quoted) is a 12-digit MAC registry key.
pub fn is_mac_reg_key(value: &str) -> bool {
    MAC_REG_KEY.is_match(unquote(value))
}

/// Converts a registry MAC key (`d51ffa421c4c` or `"d51ffa421c4c"`) to a MAC.
///
/// # Errors
///
/// Returns [`SyncError::InvalidMacKey`] unless the unquoted text is exactly
/// 12 hex digits.
pub fn mac_from_reg_key(mac_key: &str) -> Result<Mac> {
    if !is_mac_reg_key(mac_key) {
        return Err(SyncError::invalid_mac_key(mac_key));
    }

    Mac::from_hex_digits(unquote(mac_key)).ok_or_else(|| SyncError::invalid_mac_key(mac_key))
}

/// Converts a MAC to registry key form (`d51ffa421c4c`).
pub fn mac_to_reg_key(mac: &Mac) -> String {
    hex::encode(mac.bytes())
}

/// Splits a registry literal at its first colon into `(type, body)`.
fn split_literal(text: &str) -> Result<(&str, &str)> {
    text.trim()
        .split_once(':')
        .ok_or_else(|| SyncError::format_error(format!("Not a typed registry value: {text:?}")))
}

/// Decodes the comma-separated byte list of a `hex:`/`hex(N):` literal.
fn hex_list_bytes(text: &str, expected_tag: Option<&str>) -> Result<Vec<u8>> {
    let (kind, body) = split_literal(text)?;
    let kind = kind.to_ascii_lowercase();
    let captures = REG_HEX_TYPE
        .captures(&kind)
        .ok_or_else(|| SyncError::format_error(format!("Not a hex registry value: {text:?}")))?;

    if let Some(tag) = expected_tag {
        let found = captures.get(1).map(|m| m.as_str().to_string());
        if found.as_deref() != Some(tag) {
            return Err(SyncError::format_error(format!(
                "Expected hex({tag}) registry value, found {text:?}"
            )));
        }
    }

    let body = body.trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }

    body.split(',')
        .map(|pair| {
            let pair = pair.trim();
            if pair.len() != 2 || !pair.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(SyncError::malformed_hex(pair));
            }
            u8::from_str_radix(pair, 16).map_err(|_| SyncError::malformed_hex(pair))
        })
        .collect()
}

/// Encodes bytes as a registry hex list with the given type prefix.
fn bytes_to_hex_list(prefix: &str, bytes: &[u8]) -> String {
    let pairs: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{prefix}:{}", pairs.join(","))
}

/// Converts a registry binary value to an uppercase hex blob.
///
/// Accepts `hex:` as well as typed `hex(N):` literals.
///
/// # Examples
///
/// ```rust
/// # use bt_dualboot::codec::hex_from_reg_value;
/// let blob = hex_from_reg_value("hex:a6,1b,7f,1b").unwrap();
/// assert_eq!(blob, "A61B7F1B");
/// ```
pub fn hex_from_reg_value(value: &str) -> Result<String> {
    Ok(hex::encode_upper(hex_list_bytes(value, None)?))
}

/// Converts a hex blob to a registry binary value (`hex:a6,1b,...`).
///
/// # Errors
///
/// Returns [`SyncError::MalformedHex`] for odd-length or non-hex input.
pub fn hex_to_reg_value(hex: &str) -> Result<String> {
    let pairs = hex_to_pairs(hex)?;
    Ok(format!("{HEX_PREFIX}:{}", pairs.join(",").to_ascii_lowercase()))
}

/// Decodes 16 hex digits as an 8-byte little-endian unsigned integer.
pub fn qword_le_from_hex(hex: &str) -> Result<u64> {
    let bytes = hex::decode(hex).map_err(|_| SyncError::malformed_hex(hex))?;
    if bytes.len() != 8 {
        return Err(SyncError::malformed_hex(hex));
    }

    let mut cursor = Cursor::new(bytes);
    Ok(cursor.read_u64::<LittleEndian>()?)
}

/// Encodes a u64 as 16 uppercase hex digits in little-endian byte order.
pub fn hex_to_qword_le(value: u64) -> String {
    let mut bytes = [0u8; 8];
    LittleEndian::write_u64(&mut bytes, value);
    hex::encode_upper(bytes)
}

/// Decodes a `hex(b):` REG_QWORD literal (used for `ERand`).
pub fn qword_from_reg_value(value: &str) -> Result<u64> {
    let bytes = hex_list_bytes(value, Some(QWORD_TYPE_TAG))?;
    if bytes.len() != 8 {
        return Err(SyncError::format_error(format!("Expected 8 bytes in qword value {value:?}")));
    }

    let mut cursor = Cursor::new(bytes);
    Ok(cursor.read_u64::<LittleEndian>()?)
}

/// Encodes a u64 as a `hex(b):` REG_QWORD literal, little-endian.
///
/// ```rust
/// # use bt_dualboot::codec::qword_to_reg_value;
/// assert_eq!(qword_to_reg_value(1), "hex(b):01,00,00,00,00,00,00,00");
/// ```
pub fn qword_to_reg_value(value: u64) -> String {
    let mut bytes = [0u8; 8];
    LittleEndian::write_u64(&mut bytes, value);
    bytes_to_hex_list(&format!("{HEX_PREFIX}({QWORD_TYPE_TAG})"), &bytes)
}

fn read_dword_literal<B: ByteOrder>(text: &str) -> Result<u32> {
    let trimmed = text.trim();
    let digits = trimmed
        .get(..DWORD_PREFIX.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(DWORD_PREFIX))
        .map(|_| &trimmed[DWORD_PREFIX.len()..])
        .ok_or_else(|| SyncError::format_error(format!("Not a dword registry value: {text:?}")))?;

    if digits.len() != 8 {
        return Err(SyncError::malformed_hex(digits));
    }
    let bytes = hex::decode(digits).map_err(|_| SyncError::malformed_hex(digits))?;

    let mut cursor = Cursor::new(bytes);
    Ok(cursor.read_u32::<B>()?)
}

fn write_dword_literal<B: ByteOrder>(value: u32) -> String {
    let mut bytes = [0u8; 4];
    B::write_u32(&mut bytes, value);
    format!("{DWORD_PREFIX}{}", hex::encode(bytes))
}

/// Decodes an ordinary `dword:0000abcd` literal.
pub fn dword_from_reg_text(text: &str) -> Result<u32> {
    read_dword_literal::<DwordLiteralOrder>(text)
}

/// Encodes an ordinary `dword:` literal (8 lowercase hex digits).
pub fn dword_to_reg_text(value: u32) -> String {
    write_dword_literal::<DwordLiteralOrder>(value)
}

/// Decodes the `EDIV` dword literal, honouring [`EdivByteOrder`].
pub fn ediv_from_reg_text(text: &str) -> Result<u32> {
    read_dword_literal::<EdivByteOrder>(text)
}

/// Encodes the `EDIV` dword literal, honouring [`EdivByteOrder`].
///
/// ```rust
/// # use bt_dualboot::codec::ediv_to_reg_text;
/// assert_eq!(ediv_to_reg_text(0x0001), "dword:01000000");
/// ```
pub fn ediv_to_reg_text(value: u32) -> String {
    write_dword_literal::<EdivByteOrder>(value)
}
