//! Ballot Validator (C3): checks a decoded ballot against a poll
//! configuration — method, options, amounts, and global flags.

use crate::domain::{BallotValue, GlobalChoice, Poll, PollMethod, YnaChoice};
use crate::error::ServiceError;

/// Validate a decoded ballot value against `poll`. Any violation yields a
/// single `Invalid` error with a descriptive message.
pub fn validate(poll: &Poll, value: &BallotValue) -> Result<(), ServiceError> {
    match poll.pollmethod {
        PollMethod::Y | PollMethod::N => validate_y_or_n(poll, value),
        PollMethod::YN => validate_yn(poll, value, false),
        PollMethod::YNA => validate_yn(poll, value, true),
    }
}

fn invalid(msg: impl Into<String>) -> ServiceError {
    ServiceError::Invalid(msg.into())
}

fn validate_y_or_n(poll: &Poll, value: &BallotValue) -> Result<(), ServiceError> {
    match value {
        BallotValue::Global(choice) => validate_global_flag(poll, *choice),
        BallotValue::Amounts(amounts) => validate_amount_map(poll, amounts),
        BallotValue::Yna(_) => Err(invalid("Y/N polls do not accept a yna-map ballot")),
    }
}

fn validate_yn(poll: &Poll, value: &BallotValue, allow_abstain: bool) -> Result<(), ServiceError> {
    match value {
        BallotValue::Global(choice) => validate_global_flag(poll, *choice),
        BallotValue::Yna(map) => validate_yna_map(poll, map, allow_abstain),
        BallotValue::Amounts(_) => Err(invalid("YN/YNA polls do not accept an amount-map ballot")),
    }
}

fn validate_global_flag(poll: &Poll, choice: GlobalChoice) -> Result<(), ServiceError> {
    let allowed = match choice {
        GlobalChoice::Y => poll.global_yes,
        GlobalChoice::N => poll.global_no,
        GlobalChoice::A => poll.global_abstain,
    };
    if allowed {
        Ok(())
    } else {
        Err(invalid(format!("global vote {choice:?} is not enabled for this poll")))
    }
}

fn validate_amount_map(
    poll: &Poll,
    amounts: &std::collections::BTreeMap<i64, u64>,
) -> Result<(), ServiceError> {
    let max_per_option = poll.max_votes_per_option();
    let mut sum: u64 = 0;
    for (option_id, amount) in amounts {
        if !poll.is_entitled_option(*option_id) {
            return Err(invalid(format!("option {option_id} is not part of this poll")));
        }
        if *amount > max_per_option {
            return Err(invalid(format!(
                "amount {amount} for option {option_id} exceeds max_votes_per_option {max_per_option}"
            )));
        }
        sum = sum.saturating_add(*amount);
    }
    let min = poll.min_votes_amount();
    let max = poll.max_votes_amount();
    if sum < min || sum > max {
        return Err(invalid(format!(
            "total amount {sum} is outside [{min}, {max}]"
        )));
    }
    Ok(())
}

fn validate_yna_map(
    poll: &Poll,
    map: &std::collections::BTreeMap<i64, YnaChoice>,
    allow_abstain: bool,
) -> Result<(), ServiceError> {
    for (option_id, choice) in map {
        if !poll.is_entitled_option(*option_id) {
            return Err(invalid(format!("option {option_id} is not part of this poll")));
        }
        if matches!(choice, YnaChoice::A) && !allow_abstain {
            return Err(invalid(format!("option {option_id}: abstain is not allowed for this pollmethod")));
        }
    }
    Ok(())
}
