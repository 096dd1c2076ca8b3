//! Pure decision function
//!
//! Given the same turn it always produces the same decision; the caller is
//! responsible for recording the outcome in the session store.

use super::script::{self, Next, Outcome, ScriptStep, OPERATOR_ROUTE};
use super::ProgressMarker;

/// Recognition confidence below which a transcript is ignored
pub const LOW_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Consecutive re-asks allowed before the call is escalated to the operator
pub const MAX_RETRIES: u32 = 3;

/// One inbound webhook, as seen by the router
#[derive(Debug, Clone, Copy)]
pub struct Turn<'a> {
    pub marker: ProgressMarker,
    pub text: Option<&'a str>,
    pub confidence: Option<f32>,
    /// Consecutive re-asks already issued for this call
    pub retries: u32,
}

impl<'a> Turn<'a> {
    pub fn new(marker: ProgressMarker, text: Option<&'a str>, confidence: Option<f32>) -> Self {
        Self {
            marker,
            text,
            confidence,
            retries: 0,
        }
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// What the provider should do once the utterances have been spoken
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// Listen for the next utterance, calling back with this marker
    Continue(ProgressMarker),
    /// Hand the call to another webhook path
    Redirect(String),
    Hangup,
}

/// Result of routing one turn
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub utterances: Vec<String>,
    pub action: NextAction,
    /// The chat model should produce one more utterance before rendering
    pub generate_reply: bool,
    /// Retry count to store for the call after this turn
    pub retries: u32,
    /// Name of the branch taken, for logging
    pub branch: &'static str,
}

impl Decision {
    fn new(utterances: &[&str], action: NextAction, branch: &'static str) -> Self {
        Self {
            utterances: utterances.iter().map(|u| (*u).to_string()).collect(),
            action,
            generate_reply: false,
            retries: 0,
            branch,
        }
    }

    pub fn is_operator_handoff(&self) -> bool {
        matches!(&self.action, NextAction::Redirect(target) if target == OPERATOR_ROUTE)
    }

    /// Rewrite an operator handoff into a polite hangup.
    ///
    /// Used when no operator number is configured, since redirecting to the
    /// operator webhook would then fail the call.
    #[must_use]
    pub fn without_operator(mut self) -> Self {
        if self.is_operator_handoff() {
            self.utterances.push(script::NO_OPERATOR.to_string());
            self.action = NextAction::Hangup;
        }
        self
    }
}

/// Route one turn through the script.
pub fn decide(turn: &Turn<'_>) -> Decision {
    let step = turn.marker.step();
    let text = turn.text.map(str::trim).filter(|t| !t.is_empty());

    // A reported confidence means recognition ran, even if the transcript is blank
    if let Some(confidence) = turn.confidence {
        if confidence.is_nan() || confidence < LOW_CONFIDENCE_THRESHOLD {
            return reask(step, &[script::LOW_CONFIDENCE_LEAD], turn.retries, "low_confidence");
        }
    }

    let Some(text) = text else {
        return resolve(step, "silence", &step.on_silence, turn.retries);
    };

    let (branch, outcome) = step.classify(text);
    resolve(step, branch, outcome, turn.retries)
}

fn resolve(step: &ScriptStep, branch: &'static str, outcome: &Outcome, retries: u32) -> Decision {
    match outcome.next {
        Next::Listen(marker) => {
            Decision::new(outcome.utterances, NextAction::Continue(marker), branch)
        }
        Next::Reask => reask(step, outcome.utterances, retries, branch),
        Next::Reply => Decision {
            generate_reply: true,
            ..Decision::new(outcome.utterances, NextAction::Continue(step.marker), branch)
        },
        Next::Operator => Decision::new(
            outcome.utterances,
            NextAction::Redirect(OPERATOR_ROUTE.to_string()),
            branch,
        ),
        Next::Hangup => Decision::new(outcome.utterances, NextAction::Hangup, branch),
    }
}

/// Re-ask at the same step, or escalate once the retry cap is reached.
fn reask(step: &ScriptStep, lead: &[&str], retries: u32, branch: &'static str) -> Decision {
    if retries >= MAX_RETRIES {
        return Decision::new(
            script::ESCALATION,
            NextAction::Redirect(OPERATOR_ROUTE.to_string()),
            "retry_limit",
        );
    }

    let utterances: Vec<&str> = lead.iter().chain(step.reask).copied().collect();
    Decision {
        retries: retries + 1,
        ..Decision::new(&utterances, NextAction::Continue(step.marker), branch)
    }
}
