//! Named positions in the dialogue script

use super::script::{self, ScriptStep};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a call currently is in the script.
///
/// The provider echoes this back to us in the `step` query parameter of the
/// next webhook, so the string form is part of the callback URL contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMarker {
    #[default]
    Initial,
    SecondResponse,
    CheckAvailability,
    Assistant,
    Fallback,
}

impl ProgressMarker {
    pub const ALL: [ProgressMarker; 5] = [
        ProgressMarker::Initial,
        ProgressMarker::SecondResponse,
        ProgressMarker::CheckAvailability,
        ProgressMarker::Assistant,
        ProgressMarker::Fallback,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProgressMarker::Initial => "initial",
            ProgressMarker::SecondResponse => "second_response",
            ProgressMarker::CheckAvailability => "check_availability",
            ProgressMarker::Assistant => "assistant",
            ProgressMarker::Fallback => "fallback",
        }
    }

    /// Parse the `step` query parameter.
    ///
    /// A missing or blank parameter starts the script from the top; anything
    /// unrecognized lands on the fallback step.
    pub fn from_param(param: Option<&str>) -> Self {
        match param.map(str::trim) {
            None | Some("") => ProgressMarker::Initial,
            Some(raw) => Self::ALL
                .into_iter()
                .find(|marker| marker.as_str().eq_ignore_ascii_case(raw))
                .unwrap_or(ProgressMarker::Fallback),
        }
    }

    /// The script step this marker names
    pub fn step(self) -> &'static ScriptStep {
        match self {
            ProgressMarker::Initial => &script::INITIAL,
            ProgressMarker::SecondResponse => &script::SECOND_RESPONSE,
            ProgressMarker::CheckAvailability => &script::CHECK_AVAILABILITY,
            ProgressMarker::Assistant => &script::ASSISTANT,
            ProgressMarker::Fallback => &script::FALLBACK,
        }
    }

    /// Seconds the provider waits for speech after prompting at this step
    pub fn listen_timeout_secs(self) -> u32 {
        self.step().listen_timeout_secs
    }
}

impl fmt::Display for ProgressMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_param_starts_at_initial() {
        assert_eq!(ProgressMarker::from_param(None), ProgressMarker::Initial);
        assert_eq!(ProgressMarker::from_param(Some("  ")), ProgressMarker::Initial);
    }

    #[test]
    fn test_known_params_parse() {
        for marker in ProgressMarker::ALL {
            assert_eq!(ProgressMarker::from_param(Some(marker.as_str())), marker);
        }
        assert_eq!(
            ProgressMarker::from_param(Some("CHECK_AVAILABILITY")),
            ProgressMarker::CheckAvailability
        );
    }

    #[test]
    fn test_unknown_param_falls_back() {
        assert_eq!(ProgressMarker::from_param(Some("1")), ProgressMarker::Fallback);
        assert_eq!(ProgressMarker::from_param(Some("closing")), ProgressMarker::Fallback);
    }

    #[test]
    fn test_every_marker_names_its_own_step() {
        for marker in ProgressMarker::ALL {
            assert_eq!(marker.step().marker, marker);
            assert!(marker.listen_timeout_secs() > 0);
        }
    }
}
