//! Frame decoding
//!
//! Turns one raw line read from the device into either validated ASCII text
//! or an `InvalidMessage` event.

use crate::event::Event;

/// Result of decoding one raw line
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Printable ASCII text with terminators and trailing whitespace removed
    Text(String),
    /// The line failed validation
    Invalid(Event),
}

/// Hex dump of a byte buffer using `-` as separator, e.g. `ff-0a`
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join("-")
}

/// Printable ASCII range accepted on the wire
fn is_printable(b: u8) -> bool {
    (0x20..=0x7E).contains(&b)
}

/// Decode one raw line.
///
/// Returns `None` when nothing was read (read timeout).
pub fn decode(raw: Option<&[u8]>) -> Option<Frame> {
    raw.map(decode_line)
}

/// Decode a line that includes its terminator(s).
///
/// One trailing `\n` and then one trailing `\r` are stripped. A second `\r`
/// (as in `\r\r\n`) is left in place and rejected as an illegal character.
pub fn decode_line(raw: &[u8]) -> Frame {
    let mut line = raw;

    if let Some(rest) = line.strip_suffix(b"\n") {
        if rest.is_empty() {
            return Frame::Invalid(Event::invalid(hex_dump(raw), "Msg only 0x0a"));
        }
        line = rest;
    }

    if let Some(rest) = line.strip_suffix(b"\r") {
        if rest.is_empty() {
            return Frame::Invalid(Event::invalid(hex_dump(raw), "Msg only 0x0d"));
        }
        line = rest;
    }

    if line.is_empty() {
        return Frame::Invalid(Event::invalid("", "Empty line"));
    }

    if !line.iter().copied().all(is_printable) {
        return Frame::Invalid(Event::invalid(hex_dump(line), "Illegal character(s)"));
    }

    let text = match std::str::from_utf8(line) {
        Ok(text) if text.is_ascii() => text,
        _ => return Frame::Invalid(Event::invalid(hex_dump(line), "Not ASCII")),
    };

    let text = text.trim_end();
    if text.is_empty() {
        return Frame::Invalid(Event::invalid("", "Empty line"));
    }

    Frame::Text(text.to_string())
}
