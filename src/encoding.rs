//! Text encodings used on the NTLM wire.
//!
//! Names travel as UTF-16 in little-endian byte order without a Byte Order Mark. The LM hash is the
//! exception and works on the uppercased password in a 7-bit OEM code page; like most non-Windows
//! clients we assume US-ASCII there.


/// Encodes the given string as UTF-16LE without a Byte Order Mark.
pub(crate) fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}


/// Decodes UTF-16LE bytes into a string, replacing anything undecodable with U+FFFD.
///
/// A dangling odd byte also becomes a replacement character.
pub(crate) fn utf16le_lossy(bytes: &[u8]) -> String {
    let chunks = bytes.chunks_exact(2);
    let dangling = !chunks.remainder().is_empty();
    let units = chunks.map(|chk| u16::from_le_bytes([chk[0], chk[1]]));

    let mut ret: String = char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    if dangling {
        ret.push(char::REPLACEMENT_CHARACTER);
    }
    ret
}


/// Converts the given string into US-ASCII, substituting `?` for unrepresentable characters.
pub(crate) fn to_ascii_lossy(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect()
}


/// Cuts a host or domain name off at its first dot, keeping only the leading label.
pub(crate) fn strip_dot_suffix(value: &str) -> &str {
    match value.find('.') {
        Some(index) => &value[..index],
        None => value,
    }
}
