//! Codec primitives shared by every instrument driver.
//!
//! All functions here are pure and operate on byte buffers or on text decoded
//! with the single-byte codec ([`decode`] / [`encode`]). Offsets used by
//! [`FieldSpec`] are 1-based, matching instrument datasheets.
//!
//! ```text
//!   frame bytes   0 1 2 ... 33 34 35 36 37 38 39 40 41 ...
//!   datasheet     1 2 3 ... 34 35 36 37 38 39 40 41 42 ...
//!                           |<----- start=34, width=7 ---->|
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::model::ParsedField;

// =============================================================================
// Control Bytes
// =============================================================================

/// ASCII control bytes used by instrument framing.
pub mod control {
    /// Start of heading.
    pub const SOH: u8 = 0x01;
    /// Start of text.
    pub const STX: u8 = 0x02;
    /// End of text.
    pub const ETX: u8 = 0x03;
    /// End of transmission.
    pub const EOT: u8 = 0x04;
    /// Enquiry ("may I send").
    pub const ENQ: u8 = 0x05;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Shift out (double-byte text follows).
    pub const SO: u8 = 0x0E;
    /// Shift in (back to single-byte text).
    pub const SI: u8 = 0x0F;
    /// Negative acknowledge.
    pub const NAK: u8 = 0x15;
    /// Synchronous idle.
    pub const SYN: u8 = 0x16;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// Line terminator used by text-mode instruments.
    pub const CRLF: &[u8] = b"\r\n";
}

// =============================================================================
// Text Codec
// =============================================================================

/// Decode bytes with the single-byte (ISO-8859-1) text encoding.
///
/// Every byte maps to exactly one `char`, so character offsets in the result
/// equal byte offsets in the input.
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Encode text with the single-byte text encoding.
///
/// Characters outside `U+0000..=U+00FF` are written as `?`.
pub fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

// =============================================================================
// Block Check Character
// =============================================================================

/// Fold used to compute a block-check character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BccMode {
    /// Additive checksum, modulo 256.
    Sum,
    /// Exclusive-or of all bytes.
    Xor,
}

/// Compute the block-check character of `data`.
///
/// Returns `None` only for empty input.
pub fn bcc(data: &[u8], mode: BccMode) -> Option<u8> {
    if data.is_empty() {
        return None;
    }
    let check = match mode {
        BccMode::Sum => data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)),
        BccMode::Xor => data.iter().fold(0u8, |acc, &b| acc ^ b),
    };
    Some(check)
}

/// Return `data` followed by its block-check character.
///
/// Empty input is returned unchanged.
pub fn append_bcc(data: &[u8], mode: BccMode) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 1);
    out.extend_from_slice(data);
    if let Some(check) = bcc(data, mode) {
        out.push(check);
    }
    out
}

// =============================================================================
// Parity
// =============================================================================

/// Parity convention carried in the high bit of each byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// Total count of set bits is even.
    Even,
    /// Total count of set bits is odd.
    Odd,
}

/// Encode parity into the high bit of the first `len` bytes of `buf`, in place.
///
/// Never touches bytes past `min(len, buf.len())`.
pub fn set_parity(buf: &mut [u8], len: usize, parity: Parity) {
    let bound = len.min(buf.len());
    let seed = match parity {
        Parity::Even => 0u8,
        Parity::Odd => 1u8,
    };
    for byte in &mut buf[..bound] {
        let low = *byte & 0x7F;
        let fold = (0..7).fold(seed, |acc, bit| acc ^ ((low >> bit) & 1));
        *byte = if fold == 1 { low | 0x80 } else { low };
    }
}

/// Clear the parity bit of the first `len` bytes of `buf`, in place.
///
/// The return value is a structural signal only; parity is not verified.
pub fn strip_parity(buf: &mut [u8], len: usize) -> bool {
    let bound = len.min(buf.len());
    for byte in &mut buf[..bound] {
        *byte &= 0x7F;
    }
    true
}

// =============================================================================
// Fixed-Offset Fields
// =============================================================================

/// How the text of a fixed-offset field is normalised.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// Trimmed text, no numeric interpretation.
    Text,
    /// Whole number; leading zeros are dropped.
    Integer,
    /// Decimal number.
    ///
    /// `scale` divides the parsed value for devices that send digits with an
    /// implied decimal point. `decimals` fixes the rendered precision; `None`
    /// renders the shortest form that keeps one fractional digit.
    Decimal {
        /// Divisor applied to the parsed value.
        scale: u32,
        /// Fixed number of fractional digits in the output.
        decimals: Option<usize>,
    },
}

/// A field at a fixed 1-based position in a device frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    /// Field name, used in logs and errors.
    pub name: &'static str,
    /// 1-based start offset.
    pub start: usize,
    /// Width in bytes.
    pub width: usize,
    /// Normalisation applied after extraction.
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Text field.
    pub const fn text(name: &'static str, start: usize, width: usize) -> Self {
        Self {
            name,
            start,
            width,
            kind: FieldKind::Text,
        }
    }

    /// Integer field.
    pub const fn integer(name: &'static str, start: usize, width: usize) -> Self {
        Self {
            name,
            start,
            width,
            kind: FieldKind::Integer,
        }
    }

    /// Decimal field with a scale divisor and optional fixed precision.
    pub const fn decimal(
        name: &'static str,
        start: usize,
        width: usize,
        scale: u32,
        decimals: Option<usize>,
    ) -> Self {
        Self {
            name,
            start,
            width,
            kind: FieldKind::Decimal { scale, decimals },
        }
    }

    /// Raw bytes of the field.
    pub fn slice<'a>(&self, frame: &'a [u8]) -> Result<&'a [u8], ProtocolError> {
        let begin = self.start.saturating_sub(1);
        let end = begin + self.width;
        if self.start == 0 || end > frame.len() {
            return Err(ProtocolError::FrameTooShort {
                field: self.name,
                needed: end,
                available: frame.len(),
            });
        }
        Ok(&frame[begin..end])
    }

    /// Decoded, trimmed text of the field.
    pub fn raw(&self, frame: &[u8]) -> Result<String, ProtocolError> {
        Ok(decode(self.slice(frame)?).trim().to_string())
    }

    /// Extract and normalise the field.
    ///
    /// A value that fails numeric parsing is returned with `numeric == false`
    /// and its raw text; the caller decides whether that is fatal.
    pub fn read(&self, frame: &[u8]) -> Result<ParsedField, ProtocolError> {
        let raw = self.raw(frame)?;
        let value = match self.kind {
            FieldKind::Text => Some(raw.clone()),
            FieldKind::Integer => parse_integer(&raw).map(|n| n.to_string()),
            FieldKind::Decimal { scale, decimals } => parse_decimal(&raw).map(|v| {
                let scaled = v / f64::from(scale.max(1));
                match decimals {
                    Some(places) => format!("{scaled:.places$}"),
                    None => format_decimal(scaled),
                }
            }),
        };
        let numeric = value.as_deref().is_some_and(is_numeric);
        Ok(ParsedField {
            tag: self.name.to_string(),
            value: value.unwrap_or_else(|| raw.clone()),
            raw,
            numeric,
        })
    }
}

/// Decoded, trimmed text at a 1-based offset.
pub fn extract_fixed(frame: &[u8], start: usize, width: usize) -> Result<String, ProtocolError> {
    FieldSpec::text("field", start, width).raw(frame)
}

// =============================================================================
// Tagged Fields
// =============================================================================

/// Where a tagged value ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagWidth {
    /// Up to the next comma (or end of text).
    Delimited,
    /// Exactly `n` characters after the tag, with commas removed.
    Fixed(usize),
}

/// Raw window of `width` characters following the first `tag`.
///
/// Returns `None` when the tag is absent or fewer than `width` characters follow it.
pub fn tag_window(text: &str, tag: &str, width: usize) -> Option<String> {
    let begin = text.find(tag)? + tag.len();
    let window: String = text[begin..].chars().take(width).collect();
    (window.chars().count() == width).then_some(window)
}

/// Value following `tag` in a `TAG,value,TAG,value` record.
///
/// `tag` includes its trailing comma, e.g. `"Wk,"`.
pub fn extract_tagged(text: &str, tag: &str, width: TagWidth) -> Option<String> {
    match width {
        TagWidth::Delimited => {
            let begin = text.find(tag)? + tag.len();
            let rest = &text[begin..];
            let end = rest.find(',').unwrap_or(rest.len());
            Some(rest[..end].trim().to_string())
        }
        TagWidth::Fixed(n) => {
            tag_window(text, tag, n).map(|w| w.replace(',', "").trim().to_string())
        }
    }
}

/// Tagged extraction as a [`ParsedField`].
pub fn parse_tagged(text: &str, tag: &str, width: TagWidth) -> Option<ParsedField> {
    extract_tagged(text, tag, width).map(|raw| ParsedField {
        tag: tag.trim_end_matches(',').to_string(),
        value: raw.clone(),
        numeric: is_numeric(&raw),
        raw,
    })
}

/// Character index of the first `pattern` in `text`.
pub fn char_index(text: &str, pattern: &str) -> Option<usize> {
    text.find(pattern).map(|byte| text[..byte].chars().count())
}

/// `width` characters starting at the 0-based character index `begin`.
///
/// `None` when the text ends before the window does.
pub fn window_at(text: &str, begin: usize, width: usize) -> Option<String> {
    let window: String = text.chars().skip(begin).take(width).collect();
    (window.chars().count() == width).then_some(window)
}

/// Text strictly between the first `start` marker and the next `end` marker.
pub fn extract_between(text: &str, start: &str, end: &str) -> Option<String> {
    let begin = text.find(start)? + start.len();
    let len = text[begin..].find(end)?;
    Some(text[begin..begin + len].to_string())
}

/// The `n`-th delimited field after `key`.
///
/// Locates `key` immediately followed by `delimiter`, then returns the text of
/// the `n`-th field after it (`n == 1` is the field right after the key). The
/// field must be closed by another delimiter. Used for telegrams with repeated
/// tag blocks such as TAB-separated spirometry records.
pub fn nth_field_after(text: &str, key: &str, delimiter: char, n: usize) -> Option<String> {
    if n == 0 {
        return None;
    }
    let marker = format!("{key}{delimiter}");
    let mut pos = text.find(&marker)? + marker.len();
    for _ in 1..n {
        pos += text[pos..].find(delimiter)? + delimiter.len_utf8();
    }
    let len = text[pos..].find(delimiter)?;
    Some(text[pos..pos + len].to_string())
}

// =============================================================================
// Numeric Normalisation
// =============================================================================

/// Whether `s` is a plain decimal number.
///
/// Surrounding whitespace is ignored. The empty string, exponents, `inf`/`NaN`
/// and trailing unit letters are not numeric.
pub fn is_numeric(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))
        && s.parse::<f64>().is_ok()
}

/// Whether `s` is non-empty and made of ASCII digits only.
pub fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// Parse a decimal, returning `None` unless [`is_numeric`] holds.
pub fn parse_decimal(s: &str) -> Option<f64> {
    is_numeric(s).then(|| s.trim().parse::<f64>().ok()).flatten()
}

/// Parse a whole number, allowing surrounding whitespace and leading zeros.
pub fn parse_integer(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<i64>().ok()
}

/// Render a decimal keeping at least one fractional digit (`150` -> `"150.0"`).
pub fn format_decimal(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Round to one decimal place and render with [`format_decimal`].
pub fn round_one_decimal(value: f64) -> String {
    format_decimal((value * 10.0).round() / 10.0)
}

/// Strip leading zeros from an instrument number field.
///
/// One zero is kept before the decimal point: `"0062.5"` -> `"62.5"`,
/// `"000.5"` -> `"0.5"`, `" .5"` -> `"0.5"`. The result is trimmed.
pub fn edit_leading_zeros(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    for i in 0..chars.len().saturating_sub(1) {
        let c = chars[i];
        if c == '.' {
            let edited: String = match i.checked_sub(1).map(|p| chars[p]) {
                Some(prev) if prev.is_ascii_digit() => chars[i - 1..].iter().collect(),
                _ => std::iter::once('0').chain(chars[i..].iter().copied()).collect(),
            };
            return edited.trim().to_string();
        }
        if matches!(c, '1'..='9') {
            return chars[i..].iter().collect::<String>().trim().to_string();
        }
    }
    s.trim().to_string()
}

// =============================================================================
// Fixed-Width Composition
// =============================================================================

/// Keep ASCII digits only.
pub fn digits_only(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Left-pad with `'0'` to `width`, truncating longer input to `width`.
pub fn pad_left_zero(s: &str, width: usize) -> String {
    pad_left(s, width, '0')
}

/// Left-pad with spaces to `width`, truncating longer input to `width`.
pub fn pad_left_space(s: &str, width: usize) -> String {
    pad_left(s, width, ' ')
}

/// Right-pad with spaces to `width`, truncating longer input to `width`.
pub fn pad_right_space(s: &str, width: usize) -> String {
    let mut out: String = s.chars().take(width).collect();
    let len = out.chars().count();
    out.extend(std::iter::repeat(' ').take(width - len));
    out
}

fn pad_left(s: &str, width: usize, fill: char) -> String {
    let body: String = s.chars().take(width).collect();
    let len = body.chars().count();
    std::iter::repeat(fill).take(width - len).chain(body.chars()).collect()
}
