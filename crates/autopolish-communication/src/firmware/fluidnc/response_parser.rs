//! Classification of received lines
//!
//! Precedence, first match wins:
//! 1. `ok` (case-insensitive, exact)
//! 2. `error...` / `alarm...` prefixes (case-insensitive)
//! 3. `<...>` angle-bracket status frames
//! 4. `{...}` JSON status objects
//! 5. `[GC:...]` parser state (case-insensitive prefix)
//! 6. anything else is an informational message

use super::error_decoder;
use super::status_parser::StatusParser;
use autopolish_core::MachineStatus;
use std::fmt;

/// A classified controller line
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerResponse {
    /// `ok` acknowledgement
    Ok,
    /// `error` response; the numeric code when present
    Error(Option<u8>),
    /// `alarm` response; the numeric code when present
    Alarm(Option<u8>),
    /// Parsed status frame
    Status(MachineStatus),
    /// Status-shaped line that failed to parse
    MalformedStatus,
    /// Parser state report (`[GC:...]`)
    ParserState(String),
    /// Banner, `[MSG:...]` or any other text
    Message(String),
}

impl ControllerResponse {
    /// Whether this line terminates the oldest outstanding command
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Error(_) | Self::Alarm(_))
    }
}

impl fmt::Display for ControllerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error(code) => write!(f, "error:{}", code_text(*code)),
            Self::Alarm(code) => write!(f, "alarm:{}", code_text(*code)),
            Self::Status(status) => write!(f, "status:{}", status.state),
            Self::MalformedStatus => write!(f, "malformed status"),
            Self::ParserState(state) => write!(f, "parser_state:{}", state),
            Self::Message(msg) => write!(f, "message:{}", msg),
        }
    }
}

fn code_text(code: Option<u8>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "?".to_string())
}

/// Classify one received line (already trimmed of its terminator)
pub fn classify(line: &str) -> ControllerResponse {
    let line = line.trim();
    let lower = line.to_ascii_lowercase();

    if lower == "ok" {
        return ControllerResponse::Ok;
    }
    if lower.starts_with("error") {
        return ControllerResponse::Error(response_code(line));
    }
    if lower.starts_with("alarm") {
        return ControllerResponse::Alarm(response_code(line));
    }

    let framed = |open: char, close: char| line.starts_with(open) && line.ends_with(close);
    if framed('<', '>') || framed('{', '}') {
        return match StatusParser::parse(line) {
            Some(status) => ControllerResponse::Status(status),
            None => ControllerResponse::MalformedStatus,
        };
    }

    if lower.starts_with("[gc:") {
        return ControllerResponse::ParserState(line.to_string());
    }

    ControllerResponse::Message(line.to_string())
}

fn response_code(line: &str) -> Option<u8> {
    line.split_once(':')
        .and_then(|(_, code)| code.trim().parse::<u8>().ok())
}

/// Human-readable form of an `error`/`alarm` line
pub fn describe_failure(line: &str) -> String {
    match classify(line) {
        ControllerResponse::Error(code) => error_decoder::describe(line, code, false),
        ControllerResponse::Alarm(code) => error_decoder::describe(line, code, true),
        _ => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_is_exact_and_case_insensitive() {
        assert_eq!(classify("ok"), ControllerResponse::Ok);
        assert_eq!(classify("OK"), ControllerResponse::Ok);
        assert!(matches!(classify("okay"), ControllerResponse::Message(_)));
    }

    #[test]
    fn test_error_and_alarm() {
        assert_eq!(classify("error:22"), ControllerResponse::Error(Some(22)));
        assert_eq!(classify("ERROR"), ControllerResponse::Error(None));
        assert_eq!(classify("ALARM:1"), ControllerResponse::Alarm(Some(1)));
        assert!(classify("alarm:x").is_terminal());
        assert!(!classify("[MSG:Reset to continue]").is_terminal());
    }

    #[test]
    fn test_status_and_malformed_status() {
        assert!(matches!(
            classify("<Idle|MPos:0,0,0>"),
            ControllerResponse::Status(_)
        ));
        assert_eq!(classify("<Idle|garbage>"), ControllerResponse::MalformedStatus);
        assert_eq!(classify("{broken"), ControllerResponse::Message("{broken".into()));
        assert_eq!(classify("{broken}"), ControllerResponse::MalformedStatus);
    }

    #[test]
    fn test_parser_state() {
        assert_eq!(
            classify("[gc:G0 G54 G17]"),
            ControllerResponse::ParserState("[gc:G0 G54 G17]".to_string())
        );
        assert!(matches!(
            classify("Grbl 1.1h ['$' for help]"),
            ControllerResponse::Message(_)
        ));
    }

    #[test]
    fn test_describe_failure() {
        assert_eq!(describe_failure("error:22"), "error:22 (Feed rate not set)");
        assert_eq!(describe_failure("ok"), "ok");
    }
}
