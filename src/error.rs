//! Error kinds shared across the crate.
//!
//! Start-time failures (`InvalidPreset`, `PermissionDenied`, `NoDevicesFound`)
//! are surfaced to the control caller as a rejection. Runtime failures are
//! logged and counted; they never take down the daemon.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Schema or semantic validation failure. Carries the offending record
    /// index where one record is to blame, `None` for preset-wide problems.
    #[error("invalid preset `{preset}`{}: {reason}", fmt_index(.index))]
    InvalidPreset {
        preset: String,
        index: Option<usize>,
        reason: String,
    },

    /// Grabbing a device or opening a uinput sink failed.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A start request referenced a group with no resolvable sub-devices.
    #[error("no devices found for group `{0}`")]
    NoDevicesFound(String),

    /// Macro text failed to parse. Raised at preset-load time; the mapping
    /// is disabled and reported, the rest of the preset keeps working.
    #[error("macro parse error at offset {position}: {message}")]
    MacroParse { position: usize, message: String },

    /// A macro failed during execution. Logged per mapping; further presses
    /// on the mapping are still attempted.
    #[error("macro runtime error in `{mapping}`: {message}")]
    MacroRuntime { mapping: String, message: String },

    /// A uinput write failed transiently; retried a few times, then the
    /// single emission is dropped.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// Internal invariant violation. Stops the affected injection only.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),
}

fn fmt_index(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" mapping #{i}"),
        None => String::new(),
    }
}

impl Error {
    /// Whether this error should reject a start request outright.
    pub fn rejects_start(&self) -> bool {
        matches!(
            self,
            Error::InvalidPreset { .. } | Error::PermissionDenied(_) | Error::NoDevicesFound(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_the_mapping_index() {
        let err = Error::InvalidPreset {
            preset: "gaming".into(),
            index: Some(3),
            reason: "empty input combination".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid preset `gaming` mapping #3: empty input combination"
        );

        let err = Error::InvalidPreset {
            preset: "gaming".into(),
            index: None,
            reason: "every mapping failed to parse".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid preset `gaming`: every mapping failed to parse"
        );
    }

    #[test]
    fn start_rejections_are_classified() {
        assert!(Error::NoDevicesFound("kbd".into()).rejects_start());
        assert!(Error::PermissionDenied("grab".into()).rejects_start());
        assert!(!Error::Fatal("invariant".into()).rejects_start());
        assert!(!Error::TransientIo("write".into()).rejects_start());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
