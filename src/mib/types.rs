//! MIB textual-convention type table, with DISPLAY-HINT format/scan.

use crate::error::{Error, Result};

pub type TypeId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestrictionKind {
    None,
    Size,
    Range,
    Enums,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Restriction {
    None,
    /// SIZE or numeric ranges, each a `min..max` pair.
    Size(Vec<(i64, i64)>),
    Range(Vec<(i64, i64)>),
    /// `{ label(n), ... }` enumeration or BITS.
    Enums(Vec<(String, i64)>),
}

impl Restriction {
    pub fn kind(&self) -> RestrictionKind {
        match self {
            Restriction::None => RestrictionKind::None,
            Restriction::Size(_) => RestrictionKind::Size,
            Restriction::Range(_) => RestrictionKind::Range,
            Restriction::Enums(_) => RestrictionKind::Enums,
        }
    }

    pub fn label_for(&self, v: i64) -> Option<&str> {
        match self {
            Restriction::Enums(pairs) => pairs.iter().find(|(_, n)| *n == v).map(|(l, _)| l.as_str()),
            _ => None,
        }
    }

    pub fn value_for(&self, label: &str) -> Option<i64> {
        match self {
            Restriction::Enums(pairs) => pairs.iter().find(|(l, _)| l == label).map(|(_, n)| *n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MibType {
    pub name: String,
    pub module: String,
    pub base_syntax: u8,
    pub display_hint: Option<String>,
    pub restriction: Restriction,
    pub status: super::node::MibStatus,
}

impl MibType {
    /// Keys this type is registered under in the type table.
    pub fn keys(&self) -> (String, String) {
        (self.name.clone(), format!("{}!{}", self.module, self.name))
    }
}

/// One parsed segment of a DISPLAY-HINT string, e.g. `2a`, `1d-2`, `*1x:`.
#[derive(Debug, Clone)]
struct HintField {
    repeat: bool,
    prefix: u32,
    format: char,
    fraction_digits: u32,
    separator: Option<char>,
}

fn parse_display_hint(hint: &str) -> Result<Vec<HintField>> {
    let mut fields = Vec::new();
    let mut chars = hint.chars().peekable();
    while let Some(&c) = chars.peek() {
        let repeat = if c == '*' {
            chars.next();
            true
        } else {
            false
        };
        let mut digits = String::new();
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() {
                digits.push(d);
                chars.next();
            } else {
                break;
            }
        }
        let prefix: u32 = if digits.is_empty() { 1 } else { digits.parse().unwrap_or(1) };
        let format = chars
            .next()
            .ok_or_else(|| Error::ber("truncated DISPLAY-HINT"))?;
        let mut fraction_digits = 0;
        if format == 'd' && chars.peek() == Some(&'-') {
            chars.next();
            let mut fdigits = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    fdigits.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            fraction_digits = fdigits.parse().unwrap_or(0);
        }
        let separator = chars.peek().copied().filter(|c| !c.is_ascii_digit() && *c != '*');
        if let Some(sep) = separator {
            // Only consume the separator if it isn't the start of the next field's digits.
            if !sep.is_alphabetic() {
                chars.next();
            }
        }
        fields.push(HintField {
            repeat,
            prefix,
            format,
            fraction_digits,
            separator,
        });
        if !repeat {
            // Non-repeating fields consume bytes one at a time; loop continues
            // to parse any further fields in the hint string.
        }
    }
    Ok(fields)
}

/// Format an OCTET STRING value per its DISPLAY-HINT.
pub fn format_octet_string(hint: &str, data: &[u8]) -> Result<String> {
    let fields = parse_display_hint(hint)?;
    if fields.is_empty() {
        return Ok(hex_fallback(data));
    }
    let mut out = String::new();
    let mut remaining = data;
    'outer: loop {
        for field in &fields {
            loop {
                if remaining.is_empty() {
                    break 'outer;
                }
                let take_n = (field.prefix as usize).min(remaining.len());
                let chunk = &remaining[..take_n];
                remaining = &remaining[take_n..];
                match field.format {
                    'a' => out.push_str(&String::from_utf8_lossy(chunk)),
                    't' => return Err(Error::ber("UTF-8 DISPLAY-HINT format 't' is unimplemented")),
                    'b' => out.push_str(&render_radix(chunk, 2)),
                    'd' => out.push_str(&render_radix(chunk, 10)),
                    'o' => out.push_str(&render_radix(chunk, 8)),
                    'x' => out.push_str(&render_radix(chunk, 16)),
                    other => return Err(Error::ber(format!("unknown DISPLAY-HINT format '{other}'"))),
                }
                if let Some(sep) = field.separator {
                    if !remaining.is_empty() {
                        out.push(sep);
                    }
                }
                if !field.repeat {
                    break;
                }
            }
        }
        if !fields.iter().any(|f| f.repeat) {
            break;
        }
    }
    Ok(out)
}

fn render_radix(bytes: &[u8], radix: u32) -> String {
    let mut v: u128 = 0;
    for &b in bytes {
        v = (v << 8) | b as u128;
    }
    match radix {
        2 => format!("{v:b}"),
        8 => format!("{v:o}"),
        16 => format!("{v:x}"),
        _ => format!("{v}"),
    }
}

fn hex_fallback(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

/// Format an INTEGER value per its DISPLAY-HINT: `d`, `d-n`
/// fixed point, `o`, `x`, `b`.
pub fn format_integer(hint: &str, value: i64) -> Result<String> {
    let fields = parse_display_hint(hint)?;
    let field = fields
        .first()
        .ok_or_else(|| Error::ber("empty DISPLAY-HINT for INTEGER"))?;
    match field.format {
        'd' if field.fraction_digits > 0 => {
            let divisor = 10i64.pow(field.fraction_digits);
            let whole = value / divisor;
            let frac = (value % divisor).unsigned_abs();
            Ok(format!("{whole}.{frac:0width$}", width = field.fraction_digits as usize))
        }
        'd' => Ok(value.to_string()),
        'o' => Ok(format!("{value:o}")),
        'x' => Ok(format!("{value:x}")),
        'b' => Ok(format!("{value:b}")),
        other => Err(Error::ber(format!("unknown DISPLAY-HINT format '{other}' for INTEGER"))),
}
}

/// Inverse of [`format_integer`]; must be lossless for values the
/// formatter produced.
pub fn scan_integer(hint: &str, text: &str) -> Result<i64> {
    let fields = parse_display_hint(hint)?;
    let field = fields
        .first()
        .ok_or_else(|| Error::ber("empty DISPLAY-HINT for INTEGER"))?;
    match field.format {
        'd' if field.fraction_digits > 0 => {
            let (whole, frac) = text
                .split_once('.')
                .ok_or_else(|| Error::ber("expected fixed-point value"))?;
            let whole: i64 = whole.parse().map_err(|_| Error::ber("invalid integer"))?;
            let frac_digits: i64 = frac.parse().map_err(|_| Error::ber("invalid fraction"))?;
            let divisor = 10i64.pow(field.fraction_digits);
            Ok(whole * divisor + if whole < 0 { -frac_digits } else { frac_digits })
        }
        'd' => text.parse().map_err(|_| Error::ber("invalid integer")),
        'o' => i64::from_str_radix(text, 8).map_err(|_| Error::ber("invalid octal integer")),
        'x' => i64::from_str_radix(text, 16).map_err(|_| Error::ber("invalid hex integer")),
        'b' => i64::from_str_radix(text, 2).map_err(|_| Error::ber("invalid binary integer")),
        other => Err(Error::ber(format!("unknown DISPLAY-HINT format '{other}' for INTEGER"))),
    }
}

/// Inverse of [`format_octet_string`]; must be lossless for values the
/// formatter produced. Tokenizes the text on each field's
/// separator where one is present; a repeated field with no separator
/// and a non-final plain field with no separator can't be tokenized
/// unambiguously and are rejected rather than guessed at.
pub fn scan_octet_string(hint: &str, text: &str) -> Result<Vec<u8>> {
    let fields = parse_display_hint(hint)?;
    if fields.is_empty() {
        return scan_hex_fallback(text);
    }
    if fields.len() == 1 {
        let field = &fields[0];
        let mut out = Vec::new();
        if field.repeat {
            let tokens: Vec<&str> = match field.separator {
                Some(sep) => text.split(sep).filter(|t| !t.is_empty()).collect(),
                None => vec![text],
            };
            for tok in tokens {
                append_field_bytes(field, tok, &mut out)?;
            }
        } else {
            append_field_bytes(field, text, &mut out)?;
        }
        return Ok(out);
    }
    let mut out = Vec::new();
    let mut rest = text;
    for (i, field) in fields.iter().enumerate() {
        let tok = if let Some(sep) = field.separator {
            match rest.find(sep) {
                Some(idx) => {
                    let tok = &rest[..idx];
                    rest = &rest[idx + sep.len_utf8()..];
                    tok
                }
                None => {
                    let tok = rest;
                    rest = "";
                    tok
                }
            }
        } else if i + 1 == fields.len() {
            let tok = rest;
            rest = "";
            tok
        } else {
            return Err(Error::ber("cannot scan DISPLAY-HINT field with no separator before another field"));
        };
        append_field_bytes(field, tok, &mut out)?;
    }
    Ok(out)
}

fn append_field_bytes(field: &HintField, tok: &str, out: &mut Vec<u8>) -> Result<()> {
    match field.format {
        'a' => out.extend_from_slice(tok.as_bytes()),
        't' => return Err(Error::ber("UTF-8 DISPLAY-HINT format 't' is unimplemented")),
        'b' | 'o' | 'd' | 'x' => {
            let radix = match field.format {
                'b' => 2,
                'o' => 8,
                'd' => 10,
                'x' => 16,
                _ => unreachable!(),
            };
            let v = u128::from_str_radix(tok, radix)
                .map_err(|_| Error::ber(format!("invalid '{}' value '{tok}' in DISPLAY-HINT scan", field.format)))?;
            let width = field.prefix as usize;
            let full = v.to_be_bytes();
            if width > full.len() {
                return Err(Error::ber("DISPLAY-HINT prefix too wide for integer field"));
            }
            out.extend_from_slice(&full[full.len() - width..]);
        }
        other => return Err(Error::ber(format!("unknown DISPLAY-HINT format '{other}'"))),
    }
    Ok(())
}

fn scan_hex_fallback(text: &str) -> Result<Vec<u8>> {
    hex::decode(text).map_err(|e| Error::ber(format!("invalid hex octet string: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octet_string_ascii_hint() {
        let out = format_octet_string("255a", b"hello world").unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn octet_string_hex_hint() {
        let out = format_octet_string("1x", &[0xDE, 0xAD]).unwrap();
        assert_eq!(out, "dead");
    }

    #[test]
    fn octet_string_scan_inverts_ascii() {
        let data = b"hello world";
        let formatted = format_octet_string("255a", data).unwrap();
        assert_eq!(scan_octet_string("255a", &formatted).unwrap(), data.to_vec());
    }

    #[test]
    fn octet_string_scan_inverts_repeated_hex_with_separator() {
        let hint = "*1x:";
        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        let formatted = format_octet_string(hint, &data).unwrap();
        assert_eq!(formatted, "de:ad:be:ef");
        assert_eq!(scan_octet_string(hint, &formatted).unwrap(), data.to_vec());
    }

    #[test]
    fn octet_string_scan_inverts_dotted_decimal() {
        let hint = "*1d.";
        let data = [192, 0, 2, 1];
        let formatted = format_octet_string(hint, &data).unwrap();
        assert_eq!(formatted, "192.0.2.1");
        assert_eq!(scan_octet_string(hint, &formatted).unwrap(), data.to_vec());
    }

    #[test]
    fn integer_fixed_point_roundtrip() {
        let hint = "d-2";
        let formatted = format_integer(hint, 12345).unwrap();
        assert_eq!(formatted, "123.45");
        assert_eq!(scan_integer(hint, &formatted).unwrap(), 12345);
    }

    #[test]
    fn integer_plain_decimal_roundtrip() {
        let formatted = format_integer("d", -17).unwrap();
        assert_eq!(formatted, "-17");
        assert_eq!(scan_integer("d", &formatted).unwrap(), -17);
    }

    #[test]
    fn utf8_hint_is_unimplemented() {
        assert!(format_octet_string("255t", b"x").is_err());
    }
}
