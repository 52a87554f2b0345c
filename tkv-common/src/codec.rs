//! # Byte Codec
//!
//! Purpose: Convert between binary strings (the universal representation of
//! keys, values and members) and human-readable text under an explicitly
//! named encoding.
//!
//! ## Design Principles
//! 1. **Binary by Default**: Commands never apply an encoding; text is an
//!    opt-in conversion done by the caller.
//! 2. **Explicit Encoding**: Every conversion names its encoding, there is no
//!    process-wide default.
//! 3. **Fail Loudly**: Invalid byte sequences are errors, never replaced with
//!    substitution characters.
//!
//! ## Supported Encodings
//! - `Utf8`: lossless encode, decode fails on invalid UTF-8.
//! - `Utf16Le`: lossless encode, decode fails on odd length or unpaired
//!   surrogates.
//! - `Latin1`: raw/binary passthrough where byte `n` maps to `U+00nn`. Decode
//!   never fails; encode rejects characters above `U+00FF`.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{CodecError, CodecResult};

/// Named character encoding for text conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// UTF-8.
    Utf8,
    /// UTF-16, little endian, no byte order mark.
    Utf16Le,
    /// ISO-8859-1; each byte is one character (binary passthrough).
    Latin1,
}

impl Encoding {
    /// Resolves an encoding from a case-insensitive label.
    ///
    /// Accepts `utf8`/`utf-8`, `utf16le`/`utf-16le`/`ucs2`, and
    /// `latin1`/`binary`.
    pub fn from_label(label: &str) -> CodecResult<Self> {
        match label.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "utf16le" | "utf-16le" | "ucs2" | "ucs-2" => Ok(Encoding::Utf16Le),
            "latin1" | "binary" | "iso-8859-1" => Ok(Encoding::Latin1),
            _ => Err(CodecError::UnknownEncoding(label.to_string())),
        }
    }

    /// Canonical label for this encoding.
    pub const fn label(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Utf16Le => "utf-16le",
            Encoding::Latin1 => "latin1",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Encoding {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Encoding::from_label(s)
    }
}

/// Encodes text into a binary string.
///
/// Only `Latin1` can fail, for characters outside `U+0000..=U+00FF`.
pub fn to_bytes(text: &str, encoding: Encoding) -> CodecResult<Bytes> {
    match encoding {
        Encoding::Utf8 => Ok(Bytes::copy_from_slice(text.as_bytes())),
        Encoding::Utf16Le => {
            let mut out = Vec::with_capacity(text.len() * 2);
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            Ok(Bytes::from(out))
        }
        Encoding::Latin1 => {
            let mut out = Vec::with_capacity(text.len());
            for ch in text.chars() {
                let code = u32::from(ch);
                if code > 0xFF {
                    return Err(CodecError::Unrepresentable { encoding, ch });
                }
                out.push(code as u8);
            }
            Ok(Bytes::from(out))
        }
    }
}

/// Decodes a binary string into text.
///
/// Fails with `CodecError::InvalidBytes` when the sequence is not valid
/// under `encoding`; the offset points at the first offending byte.
pub fn to_text(bytes: &[u8], encoding: Encoding) -> CodecResult<String> {
    match encoding {
        Encoding::Utf8 => match std::str::from_utf8(bytes) {
            Ok(text) => Ok(text.to_string()),
            Err(err) => Err(CodecError::InvalidBytes {
                encoding,
                offset: err.valid_up_to(),
            }),
        },
        Encoding::Utf16Le => decode_utf16le(bytes),
        Encoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}

fn decode_utf16le(bytes: &[u8]) -> CodecResult<String> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::InvalidBytes {
            encoding: Encoding::Utf16Le,
            offset: bytes.len() - 1,
        });
    }

    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));

    let mut text = String::with_capacity(bytes.len() / 2);
    // Track consumed code units so errors can report a byte offset.
    let mut consumed = 0usize;
    for decoded in char::decode_utf16(units) {
        match decoded {
            Ok(ch) => {
                consumed += ch.len_utf16();
                text.push(ch);
            }
            Err(_) => {
                return Err(CodecError::InvalidBytes {
                    encoding: Encoding::Utf16Le,
                    offset: consumed * 2,
                });
            }
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_roundtrip() {
        let bytes = to_bytes("héllo", Encoding::Utf8).unwrap();
        assert_eq!(&bytes[..], "héllo".as_bytes());
        assert_eq!(to_text(&bytes, Encoding::Utf8).unwrap(), "héllo");
    }

    #[test]
    fn utf8_rejects_invalid_sequence() {
        let err = to_text(b"ok\xff\xfe", Encoding::Utf8).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidBytes {
                encoding: Encoding::Utf8,
                offset: 2
            }
        );
    }

    #[test]
    fn utf16le_encodes_little_endian_units() {
        let bytes = to_bytes("A€", Encoding::Utf16Le).unwrap();
        assert_eq!(&bytes[..], &[0x41, 0x00, 0xAC, 0x20]);
        assert_eq!(to_text(&bytes, Encoding::Utf16Le).unwrap(), "A€");
    }

    #[test]
    fn utf16le_rejects_odd_length_and_lone_surrogate() {
        assert!(matches!(
            to_text(&[0x41, 0x00, 0x42], Encoding::Utf16Le),
            Err(CodecError::InvalidBytes { offset: 2, .. })
        ));
        // 'A' followed by an unpaired high surrogate.
        assert!(matches!(
            to_text(&[0x41, 0x00, 0x00, 0xD8], Encoding::Utf16Le),
            Err(CodecError::InvalidBytes { offset: 2, .. })
        ));
    }

    #[test]
    fn latin1_passes_every_byte_through() {
        let raw: Vec<u8> = (0u8..=255).collect();
        let text = to_text(&raw, Encoding::Latin1).unwrap();
        assert_eq!(text.chars().count(), 256);
        assert_eq!(&to_bytes(&text, Encoding::Latin1).unwrap()[..], &raw[..]);
    }

    #[test]
    fn latin1_rejects_wide_characters() {
        assert_eq!(
            to_bytes("a€", Encoding::Latin1),
            Err(CodecError::Unrepresentable {
                encoding: Encoding::Latin1,
                ch: '€'
            })
        );
    }

    #[test]
    fn labels_resolve_case_insensitively() {
        assert_eq!(Encoding::from_label("UTF-8").unwrap(), Encoding::Utf8);
        assert_eq!("binary".parse::<Encoding>().unwrap(), Encoding::Latin1);
        assert_eq!(Encoding::from_label("ucs2").unwrap(), Encoding::Utf16Le);
        assert!(Encoding::from_label("ebcdic").is_err());
    }
}
