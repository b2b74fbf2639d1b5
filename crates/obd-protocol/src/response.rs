//! ELM327 Response Text Parsing
//!
//! Helpers shared by the decoder and discovery: line splitting, adapter
//! status filtering and hex payload extraction.

use crate::error::ObdError;

/// Answers the adapter gives instead of vehicle data
const ADAPTER_ERRORS: &[&str] = &[
    "NO DATA",
    "CAN ERROR",
    "BUS ERROR",
    "BUS BUSY",
    "DATA ERROR",
    "FB ERROR",
    "BUFFER FULL",
    "UNABLE TO CONNECT",
    "STOPPED",
    "ERROR",
    "ACT ALERT",
    "LV RESET",
    "?",
];

/// Informational lines printed before the actual answer
const STATUS_PREFIXES: &[&str] = &["SEARCHING", "BUS INIT"];

/// Split a response into trimmed, non-empty lines, dropping status chatter
pub fn lines(response: &str) -> Vec<&str> {
    response
        .split(['\r', '\n'])
        .map(|line| line.trim().trim_end_matches('>').trim())
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let upper = line.to_ascii_uppercase();
            !STATUS_PREFIXES.iter().any(|prefix| upper.starts_with(prefix))
        })
        .collect()
}

/// Whether a line is one of the adapter's error answers
pub fn is_adapter_error(line: &str) -> bool {
    let upper = line.to_ascii_uppercase();
    ADAPTER_ERRORS.iter().any(|e| upper.contains(e))
}

/// Parse the leading run of hex-digit pairs in `line`, ignoring whitespace
///
/// Returns `None` when the line does not start with at least one pair.
pub fn hex_payload(line: &str) -> Option<Vec<u8>> {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    let run = compact
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .count();
    let even = run - run % 2;
    if even == 0 {
        return None;
    }
    hex::decode(&compact[..even]).ok()
}

/// Extract the payload bytes of a single-answer response
pub fn first_payload(response: &str) -> Result<Vec<u8>, ObdError> {
    let line = lines(response)
        .into_iter()
        .next()
        .ok_or_else(|| ObdError::MalformedResponse("empty response".to_string()))?;
    line_payload(line)
}

/// Extract the payload answering `command`
///
/// Prefers the first line starting with `header`. Otherwise falls back to
/// the first line that is not an echo of `command`, so a bare payload still
/// decodes when the adapter left echo on.
pub fn answer_payload(response: &str, command: &str, header: &[u8]) -> Result<Vec<u8>, ObdError> {
    let candidates: Vec<&str> = lines(response)
        .into_iter()
        .filter(|line| !is_echo(line, command))
        .collect();

    let matching = candidates
        .iter()
        .filter(|line| !is_adapter_error(line))
        .filter_map(|line| hex_payload(line))
        .find(|bytes| bytes.starts_with(header));
    if let Some(bytes) = matching {
        return Ok(bytes);
    }

    let line = candidates
        .into_iter()
        .next()
        .ok_or_else(|| ObdError::MalformedResponse(format!("no answer to {}", command)))?;
    line_payload(line)
}

fn is_echo(line: &str, command: &str) -> bool {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    compact.eq_ignore_ascii_case(command.trim())
}

fn line_payload(line: &str) -> Result<Vec<u8>, ObdError> {
    if is_adapter_error(line) {
        return Err(ObdError::MalformedResponse(line.to_string()));
    }

    hex_payload(line).ok_or_else(|| ObdError::MalformedResponse(line.to_string()))
}
