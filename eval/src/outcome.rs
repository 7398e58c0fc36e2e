use serde::{Deserialize, Serialize};

use scout::turn::TurnPhase;

use crate::judge::Judgment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    /// The breaker tripped or the engine gave up.
    Aborted,
    /// The harness could not produce an answer at all.
    Error,
}

impl Outcome {
    pub fn passed(self) -> bool {
        self == Outcome::Pass
    }
}

pub fn classify_outcome(phase: Option<TurnPhase>, judgment: &Judgment) -> Outcome {
    match phase {
        Some(TurnPhase::Done) => {
            if judgment.all_passed() {
                Outcome::Pass
            } else {
                Outcome::Fail
            }
        }
        Some(TurnPhase::Aborted) => Outcome::Aborted,
        Some(_) | None => Outcome::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::CheckOutcome;

    fn judgment(pass: bool) -> Judgment {
        Judgment {
            checks: vec![CheckOutcome {
                label: "not_aborted".to_string(),
                passed: pass,
                detail: String::new(),
            }],
        }
    }

    #[test]
    fn pass_when_done_and_checks_pass() {
        let outcome = classify_outcome(Some(TurnPhase::Done), &judgment(true));
        assert_eq!(outcome, Outcome::Pass);
        assert!(outcome.passed());
    }

    #[test]
    fn fail_when_done_but_checks_fail() {
        let outcome = classify_outcome(Some(TurnPhase::Done), &judgment(false));
        assert_eq!(outcome, Outcome::Fail);
    }

    #[test]
    fn aborted_regardless_of_checks() {
        let outcome = classify_outcome(Some(TurnPhase::Aborted), &judgment(true));
        assert_eq!(outcome, Outcome::Aborted);
    }

    #[test]
    fn error_when_no_terminal_phase() {
        assert_eq!(classify_outcome(None, &judgment(true)), Outcome::Error);
        assert_eq!(
            classify_outcome(Some(TurnPhase::Verifying), &judgment(true)),
            Outcome::Error
        );
    }
}
