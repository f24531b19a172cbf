//! Line-oriented framing used to carry captured state out of the child
//! process on stdout.
//!
//! A block is a begin sentinel line, payload lines, and an end sentinel line.
//! Payload lines that start with the escape character or with the sentinel
//! prefix get one extra escape character in front, so no payload line can
//! ever equal a sentinel. The reader strips exactly one escape character.
//! When stdout holds several complete blocks (for instance because the
//! submission printed a sentinel itself), the last one wins: the epilogue
//! always writes after the submission has finished.

use std::borrow::Cow;

use crate::constants::{
    ERROR_BEGIN_MARKER, ERROR_END_MARKER, ESCAPE_CHAR, MARKER_PREFIX, STATE_BEGIN_MARKER,
    STATE_END_MARKER,
};

pub fn escape_line(line: &str) -> Cow<'_, str> {
    if line.starts_with(ESCAPE_CHAR) || line.starts_with(MARKER_PREFIX) {
        Cow::Owned(format!("{}{}", ESCAPE_CHAR, line))
    } else {
        Cow::Borrowed(line)
    }
}

pub fn unescape_line(line: &str) -> &str {
    line.strip_prefix(ESCAPE_CHAR).unwrap_or(line)
}

/// Frames `payload` between the two sentinels.
pub fn encode_block(begin: &str, end: &str, payload: &str) -> String {
    let mut out = String::with_capacity(payload.len() + begin.len() + end.len() + 8);
    out.push_str(begin);
    out.push('\n');
    for line in payload.lines() {
        out.push_str(&escape_line(line));
        out.push('\n');
    }
    out.push_str(end);
    out.push('\n');
    out
}

/// Returns the payload of the last complete block delimited by `begin`/`end`.
pub fn extract_block(stdout: &str, begin: &str, end: &str) -> Option<String> {
    let mut current: Option<Vec<&str>> = None;
    let mut complete: Option<Vec<&str>> = None;

    for raw in stdout.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line == begin {
            current = Some(Vec::new());
        } else if line == end {
            if let Some(lines) = current.take() {
                complete = Some(lines);
            }
        } else if let Some(lines) = current.as_mut() {
            lines.push(unescape_line(line));
        }
    }

    complete.map(|lines| lines.join("\n").trim_end().to_string())
}

pub fn extract_state(stdout: &str) -> Option<String> {
    extract_block(stdout, STATE_BEGIN_MARKER, STATE_END_MARKER)
}

pub fn extract_error(stdout: &str) -> Option<String> {
    extract_block(stdout, ERROR_BEGIN_MARKER, ERROR_END_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_block_amid_noise() {
        let stdout = format!(
            "drawing...\n{}\nNumber of turtles: 1\n{}\nbye\n",
            STATE_BEGIN_MARKER, STATE_END_MARKER
        );
        assert_eq!(extract_state(&stdout).as_deref(), Some("Number of turtles: 1"));
        assert_eq!(extract_error(&stdout), None);
    }

    #[test]
    fn test_unterminated_block_is_ignored() {
        let stdout = format!("{}\nPosition: 0.00, 0.00\n", STATE_BEGIN_MARKER);
        assert_eq!(extract_state(&stdout), None);
    }

    #[test]
    fn test_sentinel_like_payload_survives_framing() {
        let payload = format!("{}\n\\already escaped\nplain", STATE_END_MARKER);
        let framed = encode_block(STATE_BEGIN_MARKER, STATE_END_MARKER, &payload);
        assert!(framed.contains(&format!("\\{}", STATE_END_MARKER)));
        assert_eq!(extract_state(&framed), Some(payload));
    }

    #[test]
    fn test_last_block_wins_over_spoofed_output() {
        let spoof = encode_block(STATE_BEGIN_MARKER, STATE_END_MARKER, "Heading: 0.00");
        let real = encode_block(STATE_BEGIN_MARKER, STATE_END_MARKER, "Heading: 90.00");
        let stdout = format!("{}{}{}", spoof, "student output\n", real);
        assert_eq!(extract_state(&stdout).as_deref(), Some("Heading: 90.00"));
    }

    #[test]
    fn test_crlf_output_is_accepted() {
        let stdout = format!("{}\r\nERROR: boom\r\n{}\r\n", ERROR_BEGIN_MARKER, ERROR_END_MARKER);
        assert_eq!(extract_error(&stdout).as_deref(), Some("ERROR: boom"));
    }
}
