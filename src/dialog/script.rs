//! Static sales script
//!
//! Each step is a declared table: an ordered list of keyword groups, each
//! paired with an outcome, evaluated first-match against the caller's speech.

use super::ProgressMarker;

/// Path the provider is redirected to when handing the call to a human
pub const OPERATOR_ROUTE: &str = "/api/twilio/voice/operator";

/// What happens after an outcome's utterances are spoken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Keep listening, continuing at the given step
    Listen(ProgressMarker),
    /// Re-ask at the current step (counts toward the retry cap)
    Reask,
    /// Ask the chat model for a reply, then keep listening at the current step
    Reply,
    /// Hand the call over to the operator
    Operator,
    Hangup,
}

#[derive(Debug)]
pub struct Outcome {
    pub utterances: &'static [&'static str],
    pub next: Next,
}

/// A keyword group and what to do when any of its keywords is heard
#[derive(Debug)]
pub struct Branch {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub outcome: Outcome,
}

impl Branch {
    /// Case-insensitive substring match; `lowered` must already be lowercase.
    fn matches(&self, lowered: &str) -> bool {
        self.keywords
            .iter()
            .any(|keyword| lowered.contains(&keyword.to_lowercase()))
    }
}

/// Immutable definition of what to say and how to branch at one marker
#[derive(Debug)]
pub struct ScriptStep {
    pub marker: ProgressMarker,
    /// Outcome when the webhook carries no recognized speech
    pub on_silence: Outcome,
    pub branches: &'static [Branch],
    /// Outcome when speech matched no branch
    pub otherwise: Outcome,
    /// Utterances used whenever this step re-asks
    pub reask: &'static [&'static str],
    pub listen_timeout_secs: u32,
}

impl ScriptStep {
    /// First branch whose keywords appear in `text`, or the step default.
    ///
    /// Returns the branch name alongside the outcome for logging.
    pub fn classify(&self, text: &str) -> (&'static str, &Outcome) {
        let lowered = text.to_lowercase();
        self.branches
            .iter()
            .find(|branch| branch.matches(&lowered))
            .map_or(("unrecognized", &self.otherwise), |branch| {
                (branch.name, &branch.outcome)
            })
    }
}

// ============================================================
// Shared keyword groups and outcomes
// ============================================================

const REJECTION_KEYWORDS: &[&str] = &[
    "お断り",
    "結構です",
    "必要ありません",
    "必要ない",
    "興味ありません",
    "興味ない",
    "いりません",
    "不要",
];

const UNAVAILABLE_KEYWORDS: &[&str] = &[
    "不在",
    "外出",
    "席を外",
    "いません",
    "いない",
    "会議中",
    "休み",
];

const REJECTION: Outcome = Outcome {
    utterances: &["承知いたしました。", "お忙しいところ失礼いたしました。"],
    next: Next::Hangup,
};

const UNAVAILABLE: Outcome = Outcome {
    utterances: &[
        "承知いたしました。それでは改めてお電話いたします。",
        "お忙しいところありがとうございました。",
    ],
    next: Next::Hangup,
};

pub const LOW_CONFIDENCE_LEAD: &str = "申し訳ございません。うまく聞き取れませんでした。";

pub const ESCALATION: &[&str] = &[
    "申し訳ございません。",
    "担当者にお繋ぎいたしますので、少々お待ちください。",
];

/// Spoken right before bridging the caller to the operator
pub const TRANSFER: &str = "担当者にお繋ぎいたします。少々お待ちください。";

pub const WEB_CALL: &str = "ウェブコールに切り替えます。少々お待ちください。";

pub const NO_OPERATOR: &str = "後ほど担当者より改めてご連絡いたします。失礼いたします。";

// ============================================================
// Steps
// ============================================================

pub static INITIAL: ScriptStep = ScriptStep {
    marker: ProgressMarker::Initial,
    on_silence: Outcome {
        utterances: GREETING,
        next: Next::Listen(ProgressMarker::SecondResponse),
    },
    branches: &[],
    otherwise: Outcome {
        utterances: GREETING,
        next: Next::Listen(ProgressMarker::SecondResponse),
    },
    reask: GREETING,
    listen_timeout_secs: 5,
};

const GREETING: &[&str] = &[
    "お忙しいところ恐れ入ります。株式会社ミライコネクトの佐藤と申します。",
    "本日は電話応対の自動化サービスのご案内でお電話いたしました。ご担当者様はいらっしゃいますか？",
];

pub static SECOND_RESPONSE: ScriptStep = ScriptStep {
    marker: ProgressMarker::SecondResponse,
    on_silence: Outcome {
        utterances: &[],
        next: Next::Reask,
    },
    branches: &[
        Branch {
            name: "rejection",
            keywords: REJECTION_KEYWORDS,
            outcome: REJECTION,
        },
        Branch {
            name: "unavailable",
            keywords: UNAVAILABLE_KEYWORDS,
            outcome: UNAVAILABLE,
        },
    ],
    otherwise: Outcome {
        utterances: &[
            "ありがとうございます。",
            "AIを活用した電話応対の自動化について、少しだけお時間をいただけますでしょうか？",
        ],
        next: Next::Listen(ProgressMarker::CheckAvailability),
    },
    reask: &["恐れ入ります。ご担当者様はいらっしゃいますでしょうか？"],
    listen_timeout_secs: 5,
};

/// Rejection is declared first so an explicit refusal always ends the call,
/// whatever else the caller said in the same breath.
pub static CHECK_AVAILABILITY: ScriptStep = ScriptStep {
    marker: ProgressMarker::CheckAvailability,
    on_silence: Outcome {
        utterances: &[],
        next: Next::Reask,
    },
    branches: &[
        Branch {
            name: "rejection",
            keywords: REJECTION_KEYWORDS,
            outcome: REJECTION,
        },
        Branch {
            name: "company_name",
            keywords: &[
                "どちら様",
                "どちらさま",
                "会社名",
                "どこの会社",
                "何の会社",
                "お名前",
            ],
            outcome: Outcome {
                utterances: &[
                    "株式会社ミライコネクトの佐藤でございます。",
                    "AIによる電話応対の自動化サービスをご案内しております。",
                    "少しだけお時間をいただけますでしょうか？",
                ],
                next: Next::Listen(ProgressMarker::CheckAvailability),
            },
        },
        Branch {
            name: "unavailable",
            keywords: UNAVAILABLE_KEYWORDS,
            outcome: UNAVAILABLE,
        },
        Branch {
            name: "website",
            keywords: &["ホームページ", "ウェブサイト", "サイト", "メール", "資料"],
            outcome: Outcome {
                utterances: &[
                    "承知いたしました。詳しい資料は弊社ホームページからご覧いただけます。",
                    "ご検討のほど、よろしくお願いいたします。",
                ],
                next: Next::Hangup,
            },
        },
        Branch {
            name: "affirmative",
            keywords: &[
                "はい",
                "ええ",
                "大丈夫",
                "どうぞ",
                "お願い",
                "詳しく",
                "担当者",
                "オペレーター",
                "yes",
            ],
            outcome: Outcome {
                utterances: &[
                    "ありがとうございます。",
                    "担当者にお繋ぎいたしますので、少々お待ちください。",
                ],
                next: Next::Operator,
            },
        },
    ],
    otherwise: Outcome {
        utterances: &[],
        next: Next::Reask,
    },
    reask: &["恐れ入ります。もう一度お聞かせいただけますでしょうか？"],
    listen_timeout_secs: 6,
};

/// Free conversation backed by the chat model
pub static ASSISTANT: ScriptStep = ScriptStep {
    marker: ProgressMarker::Assistant,
    on_silence: Outcome {
        utterances: &[],
        next: Next::Reask,
    },
    branches: &[Branch {
        name: "goodbye",
        keywords: &["さようなら", "さよなら", "goodbye"],
        outcome: Outcome {
            utterances: &["さようなら。ご利用ありがとうございました。"],
            next: Next::Hangup,
        },
    }],
    otherwise: Outcome {
        utterances: &[],
        next: Next::Reply,
    },
    reask: &["こんにちは。お手伝いできることはありますか？"],
    listen_timeout_secs: 5,
};

pub static FALLBACK: ScriptStep = ScriptStep {
    marker: ProgressMarker::Fallback,
    on_silence: Outcome {
        utterances: FALLBACK_APOLOGY,
        next: Next::Listen(ProgressMarker::CheckAvailability),
    },
    branches: &[],
    otherwise: Outcome {
        utterances: FALLBACK_APOLOGY,
        next: Next::Listen(ProgressMarker::CheckAvailability),
    },
    reask: FALLBACK_APOLOGY,
    listen_timeout_secs: 5,
};

const FALLBACK_APOLOGY: &[&str] = &[
    "申し訳ございません。うまく処理できませんでした。",
    "ご用件をもう一度お聞かせいただけますか？",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_first_match_wins() {
        let (name, outcome) = CHECK_AVAILABILITY.classify("はい、どちら様ですか？");
        assert_eq!(name, "company_name");
        assert_eq!(outcome.next, Next::Listen(ProgressMarker::CheckAvailability));
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        let (name, _) = CHECK_AVAILABILITY.classify("YES please");
        assert_eq!(name, "affirmative");
        let (name, _) = ASSISTANT.classify("OK, Goodbye");
        assert_eq!(name, "goodbye");
    }

    #[test]
    fn test_classify_unrecognized_uses_default() {
        let (name, outcome) = CHECK_AVAILABILITY.classify("天気がいいですね");
        assert_eq!(name, "unrecognized");
        assert_eq!(outcome.next, Next::Reask);
    }

    #[test]
    fn test_assistant_silence_counts_as_reask() {
        assert_eq!(ASSISTANT.on_silence.next, Next::Reask);
    }

    #[test]
    fn test_every_step_can_reask() {
        for marker in ProgressMarker::ALL {
            assert!(!marker.step().reask.is_empty(), "{marker} has no reask");
        }
    }
}
