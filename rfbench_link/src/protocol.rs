//! Wire protocol: line framing and the command vocabulary.
//!
//! Requests are single ASCII lines terminated by `\n`. Instruments answer
//! queries with one line terminated by CR, LF or CRLF. Configuration
//! directives (`CONFigure:LINK ...`) are never answered.
//!
//! | Purpose          | Command                                   |
//! |------------------|-------------------------------------------|
//! | reach query      | `READ:MOTion:REACh? <AXIS>`               |
//! | home query       | `READ:MOTion:HOME? <AXIS>` / `... ALL`    |
//! | speed query      | `READ:MOTion:SPEed? <AXIS>`               |
//! | source queries   | `SOURce:FREQuency?`, `SOURce:POWer?`, `OUTPut:STATe?` |
//! | motion           | `MOTion:FEED <AXIS>`, `MOTion:HOME <AXIS>` |
//! | source settings  | `SOURce:FREQuency <f>GHz`, `SOURce:POWer <p>dBm`, `OUTPut:STATe ON` |
//! | link routing     | `CONFigure:LINK <NAME>`                   |

use crate::error::{LinkError, LinkResult};
use rfbench_common::axis::Axis;
use rfbench_common::compensation::{Compensation, commanded_power_dbm};
use rfbench_common::sample::SourceParam;

/// Prefixes (upper-case) of directives that produce no reply.
pub const CONFIG_DIRECTIVE_PREFIXES: [&str; 2] = ["CONFIGURE:LINK", "CONFIG:LINK"];

/// Home query covering every axis, used in place of the per-axis query for `Z`.
pub const HOME_ALL_QUERY: &str = "READ:MOTion:HOME? ALL";

/// Whether `command` is a configuration directive (case-insensitive prefix match).
pub fn is_config_directive(command: &str) -> bool {
    let upper = command.trim_start().to_ascii_uppercase();
    CONFIG_DIRECTIVE_PREFIXES
        .iter()
        .any(|prefix| upper.starts_with(prefix))
}

/// Whether `command` is a query (its mnemonic ends in `?`).
pub fn is_query(command: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .is_some_and(|mnemonic| mnemonic.ends_with('?'))
}

// ─── Status queries ─────────────────────────────────────────────────

pub fn reach_query(axis: Axis) -> String {
    format!("READ:MOTion:REACh? {axis}")
}

pub fn home_query(axis: Axis) -> String {
    format!("READ:MOTion:HOME? {axis}")
}

pub fn speed_query(axis: Axis) -> String {
    format!("READ:MOTion:SPEed? {axis}")
}

pub fn source_query(param: SourceParam) -> &'static str {
    match param {
        SourceParam::Frequency => "SOURce:FREQuency?",
        SourceParam::Power => "SOURce:POWer?",
        SourceParam::RfOutput => "OUTPut:STATe?",
    }
}

// ─── Commands ───────────────────────────────────────────────────────

pub fn feed_command(axis: Axis) -> String {
    format!("MOTion:FEED {axis}")
}

pub fn home_command(axis: Axis) -> String {
    format!("MOTion:HOME {axis}")
}

/// Route the RF path, e.g. `CONFigure:LINK FEED_X_THETA`.
pub fn link_command(name: &str) -> String {
    format!("CONFigure:LINK {}", name.trim())
}

pub fn frequency_command(freq_ghz: f64) -> String {
    format!("SOURce:FREQuency {freq_ghz}GHz")
}

/// Set-power command, compensated so `target_dbm` arrives at the device under test.
pub fn power_command(target_dbm: f64, freq_ghz: f64, comp: &dyn Compensation) -> String {
    format!(
        "SOURce:POWer {:.2}dBm",
        commanded_power_dbm(target_dbm, freq_ghz, comp)
    )
}

pub fn rf_output_command(on: bool) -> String {
    format!("OUTPut:STATe {}", if on { "ON" } else { "OFF" })
}

// ─── Framing ────────────────────────────────────────────────────────

#[inline]
fn is_terminator(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n'
}

/// Encode a request for the wire, appending `\n` when missing.
///
/// Non-ASCII payloads and embedded line breaks are rejected: either would
/// desynchronize the one-request/one-response pairing.
pub fn encode_request(payload: &str) -> LinkResult<Vec<u8>> {
    let body = payload.trim_end_matches(['\r', '\n']);
    if body.trim().is_empty() {
        return Err(LinkError::Protocol("empty request".to_string()));
    }
    if !body.is_ascii() {
        return Err(LinkError::Protocol(format!("non-ASCII request: {body:?}")));
    }
    if body.bytes().any(is_terminator) {
        return Err(LinkError::Protocol(format!("embedded line break in request: {body:?}")));
    }
    let mut frame = Vec::with_capacity(body.len() + 1);
    frame.extend_from_slice(body.as_bytes());
    frame.push(b'\n');
    Ok(frame)
}

/// Drop stray terminators left over from a previous CRLF.
pub fn skip_terminators(buf: &mut Vec<u8>) {
    let start = buf.iter().position(|b| !is_terminator(*b)).unwrap_or(buf.len());
    buf.drain(..start);
}

/// Whether `buf` holds a complete line.
pub fn has_line(buf: &[u8]) -> bool {
    buf.iter()
        .skip_while(|b| is_terminator(**b))
        .any(|b| is_terminator(*b))
}

/// Remove and return the first complete line, without its terminator.
///
/// Bytes after the terminator stay in `buf` for the next response.
pub fn take_line(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    skip_terminators(buf);
    let end = buf.iter().position(|b| is_terminator(*b))?;
    let line = buf[..end].to_vec();
    buf.drain(..=end);
    Some(line)
}

/// Remove and return whatever unterminated data `buf` holds, if any.
pub fn take_partial(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    skip_terminators(buf);
    if buf.is_empty() {
        None
    } else {
        Some(std::mem::take(buf))
    }
}

/// Decode a response line.
pub fn decode_line(line: Vec<u8>) -> LinkResult<String> {
    let text = String::from_utf8(line)
        .map_err(|e| LinkError::Protocol(format!("response is not valid UTF-8: {e}")))?;
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfbench_common::compensation::TableCompensation;

    #[test]
    fn config_directives_match_case_insensitively() {
        assert!(is_config_directive("CONFigure:LINK FEED_X_THETA"));
        assert!(is_config_directive("config:link HOME"));
        assert!(is_config_directive("  CONFIGURE:LINK A"));
        assert!(!is_config_directive("READ:MOTion:HOME? X"));
        assert!(!is_config_directive("SOURce:CONFigure:LINK"));
    }

    #[test]
    fn queries_end_in_question_mark() {
        assert!(is_query(&home_query(Axis::X)));
        assert!(is_query(source_query(SourceParam::RfOutput)));
        assert!(!is_query(&feed_command(Axis::Y)));
        assert!(!is_query(""));
    }

    #[test]
    fn command_text() {
        assert_eq!(reach_query(Axis::Theta), "READ:MOTion:REACh? THETA");
        assert_eq!(home_command(Axis::Phi), "MOTion:HOME PHI");
        assert_eq!(link_command(" FEED_X_THETA "), "CONFigure:LINK FEED_X_THETA");
        assert_eq!(frequency_command(10.0), "SOURce:FREQuency 10GHz");
        assert_eq!(rf_output_command(false), "OUTPut:STATe OFF");
        assert_eq!(
            power_command(-10.0, 10.0, &TableCompensation::flat(2.5)),
            "SOURce:POWer -7.50dBm"
        );
    }

    #[test]
    fn encode_appends_newline_once() {
        assert_eq!(encode_request("SOURce:POWer?").unwrap(), b"SOURce:POWer?\n");
        assert_eq!(encode_request("SOURce:POWer?\r\n").unwrap(), b"SOURce:POWer?\n");
    }

    #[test]
    fn encode_rejects_bad_payloads() {
        assert!(matches!(encode_request(""), Err(LinkError::Protocol(_))));
        assert!(matches!(encode_request("A\nB"), Err(LinkError::Protocol(_))));
        assert!(matches!(encode_request("FREQ 10µs"), Err(LinkError::Protocol(_))));
    }

    #[test]
    fn crlf_lines_frame_without_leftovers() {
        let mut buf = b"OK\r\nNO\r\n".to_vec();
        assert!(has_line(&buf));
        assert_eq!(take_line(&mut buf).unwrap(), b"OK");
        assert_eq!(take_line(&mut buf).unwrap(), b"NO");
        assert_eq!(take_line(&mut buf), None);
        assert!(buf.is_empty() || buf == b"\n");
    }

    #[test]
    fn bare_terminators_are_not_a_line() {
        let mut buf = b"\n\r".to_vec();
        assert!(!has_line(&buf));
        assert_eq!(take_line(&mut buf), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_data_is_taken_whole() {
        let mut buf = b"\n10.5".to_vec();
        assert!(!has_line(&buf));
        assert_eq!(take_partial(&mut buf).unwrap(), b"10.5");
        assert_eq!(take_partial(&mut buf), None);
    }

    #[test]
    fn decode_trims_and_rejects_invalid_utf8() {
        assert_eq!(decode_line(b" OK ".to_vec()).unwrap(), "OK");
        assert!(matches!(decode_line(vec![0xff, 0xfe]), Err(LinkError::Protocol(_))));
    }
}
