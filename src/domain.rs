//! Core data model: polls, ballots, and the fixed-point vote weight.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Which ballot store backend a poll is configured to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollBackend {
    Fast,
    Long,
}

impl PollBackend {
    /// `poll.backend == "fast" -> fast backend, anything else -> long backend`.
    pub fn from_wire(value: &str) -> Self {
        if value.eq_ignore_ascii_case("fast") {
            PollBackend::Fast
        } else {
            PollBackend::Long
        }
    }
}

/// Anonymity class of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollKind {
    Named,
    Pseudonymous,
    Analog,
    Crypt,
}

/// Lifecycle state of a poll as read from the datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    Created,
    Started,
    Finished,
    Published,
}

/// Ballot method: determines which shapes and checks the validator applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollMethod {
    Y,
    N,
    YN,
    YNA,
}

impl PollMethod {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "Y" => Some(PollMethod::Y),
            "N" => Some(PollMethod::N),
            "YN" => Some(PollMethod::YN),
            "YNA" => Some(PollMethod::YNA),
            _ => None,
        }
    }
}

/// Read-only poll configuration snapshot, as loaded by the poll config loader (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: i64,
    pub meeting_id: i64,
    pub backend: PollBackend,
    pub kind: PollKind,
    pub state: PollState,
    pub pollmethod: PollMethod,
    pub entitled_group_ids: Vec<i64>,
    pub global_yes: bool,
    pub global_no: bool,
    pub global_abstain: bool,
    pub min_votes_amount: u64,
    pub max_votes_amount: u64,
    pub max_votes_per_option: u64,
    pub option_ids: Vec<i64>,
}

impl Poll {
    /// Zero is the sentinel "unset" value for these three fields; they default to 1.
    pub fn min_votes_amount(&self) -> u64 {
        if self.min_votes_amount == 0 {
            1
        } else {
            self.min_votes_amount
        }
    }

    pub fn max_votes_amount(&self) -> u64 {
        if self.max_votes_amount == 0 {
            1
        } else {
            self.max_votes_amount
        }
    }

    pub fn max_votes_per_option(&self) -> u64 {
        if self.max_votes_per_option == 0 {
            1
        } else {
            self.max_votes_per_option
        }
    }

    pub fn is_entitled_option(&self, option_id: i64) -> bool {
        self.option_ids.contains(&option_id)
    }
}

/// Fixed-point decimal with exactly 6 fractional digits, stored as a scaled integer.
///
/// Represented internally as `value * 10^6` so arithmetic never loses precision
/// to float rounding; `Display`/`FromStr` round-trip through the `"D.dddddd"`
/// wire shape the ballot payload requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Weight(i64);

const WEIGHT_SCALE: i64 = 1_000_000;

impl Weight {
    pub const ONE: Weight = Weight(WEIGHT_SCALE);

    pub fn from_scaled(scaled: i64) -> Self {
        Weight(scaled)
    }
}

impl Default for Weight {
    fn default() -> Self {
        Weight::ONE
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        let whole = magnitude / WEIGHT_SCALE as u64;
        let frac = magnitude % WEIGHT_SCALE as u64;
        write!(f, "{sign}{whole}.{frac:06}")
    }
}

impl FromStr for Weight {
    type Err = WeightParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sign, rest) = match s.strip_prefix('-') {
            Some(rest) => (-1i64, rest),
            None => (1i64, s),
        };
        let mut parts = rest.splitn(2, '.');
        let whole: i64 = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or(WeightParseError)?
            .parse()
            .map_err(|_| WeightParseError)?;
        let frac_str = parts.next().unwrap_or("0");
        if frac_str.len() > 6 || !frac_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(WeightParseError);
        }
        let padded = format!("{frac_str:0<6}");
        let frac: i64 = padded.parse().map_err(|_| WeightParseError)?;
        Ok(Weight(sign * (whole * WEIGHT_SCALE + frac)))
    }
}

impl TryFrom<String> for Weight {
    type Error = WeightParseError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Weight> for String {
    fn from(value: Weight) -> Self {
        value.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid weight string")]
pub struct WeightParseError;

/// A single global-choice value: `"Y" | "N" | "A"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalChoice {
    Y,
    N,
    A,
}

impl GlobalChoice {
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "Y" => Some(GlobalChoice::Y),
            "N" => Some(GlobalChoice::N),
            "A" => Some(GlobalChoice::A),
            _ => None,
        }
    }
}

/// Per-option Y/N/A choice used by yna-map ballots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum YnaChoice {
    Y,
    N,
    A,
}

impl YnaChoice {
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "Y" => Some(YnaChoice::Y),
            "N" => Some(YnaChoice::N),
            "A" => Some(YnaChoice::A),
            _ => None,
        }
    }
}

/// Decoded ballot value, one of three shapes discovered by structural
/// probing of the raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum BallotValue {
    Global(GlobalChoice),
    Amounts(BTreeMap<i64, u64>),
    Yna(BTreeMap<i64, YnaChoice>),
}

/// Decoding error: the raw JSON didn't match any of the three known shapes.
#[derive(Debug, thiserror::Error)]
#[error("ballot value does not match any known shape")]
pub struct BallotShapeError;

impl BallotValue {
    /// Decode a raw JSON value into one of the three shapes.
    ///
    /// Global strings are tried first, then amount-maps (all-integer values),
    /// then yna-maps (all Y/N/A string values). A map that mixes shapes, or
    /// contains a key that isn't a parseable option id, is rejected.
    pub fn decode(raw: &serde_json::Value) -> Result<Self, BallotShapeError> {
        if let Some(s) = raw.as_str() {
            return GlobalChoice::from_str_opt(s)
                .map(BallotValue::Global)
                .ok_or(BallotShapeError);
        }
        if let Some(obj) = raw.as_object() {
            // Try amount-map: every value a non-negative integer.
            let mut amounts = BTreeMap::new();
            let mut all_ints = true;
            for (k, v) in obj {
                let Ok(option_id) = k.parse::<i64>() else {
                    all_ints = false;
                    break;
                };
                match v.as_u64() {
                    Some(n) => {
                        amounts.insert(option_id, n);
                    }
                    None => {
                        all_ints = false;
                        break;
                    }
                }
            }
            if all_ints && !obj.is_empty() {
                return Ok(BallotValue::Amounts(amounts));
            }

            // Try yna-map: every value one of "Y"/"N"/"A".
            let mut yna = BTreeMap::new();
            for (k, v) in obj {
                let option_id: i64 = k.parse().map_err(|_| BallotShapeError)?;
                let choice = v
                    .as_str()
                    .and_then(YnaChoice::from_str_opt)
                    .ok_or(BallotShapeError)?;
                yna.insert(option_id, choice);
            }
            if !yna.is_empty() {
                return Ok(BallotValue::Yna(yna));
            }
        }
        Err(BallotShapeError)
    }
}

/// Opaque ballot payload persisted by the ballot store.
///
/// `request_user_id`/`vote_user_id` are omitted on the wire when the poll is
/// not `named`, preserving anonymity at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallotPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_user_id: Option<i64>,
    pub value: serde_json::Value,
    pub weight: Weight,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_round_trips() {
        let w: Weight = "1.000000".parse().unwrap();
        assert_eq!(w.to_string(), "1.000000");
        assert_eq!(w, Weight::ONE);
    }

    #[test]
    fn weight_parses_short_fraction() {
        let w: Weight = "2.5".parse().unwrap();
        assert_eq!(w.to_string(), "2.500000");
    }

    #[test]
    fn weight_rejects_garbage() {
        assert!("not-a-number".parse::<Weight>().is_err());
    }

    #[test]
    fn poll_zero_defaults_to_one() {
        let poll = Poll {
            id: 1,
            meeting_id: 1,
            backend: PollBackend::Fast,
            kind: PollKind::Named,
            state: PollState::Started,
            pollmethod: PollMethod::Y,
            entitled_group_ids: vec![1],
            global_yes: true,
            global_no: false,
            global_abstain: false,
            min_votes_amount: 0,
            max_votes_amount: 0,
            max_votes_per_option: 0,
            option_ids: vec![],
        };
        assert_eq!(poll.min_votes_amount(), 1);
        assert_eq!(poll.max_votes_amount(), 1);
        assert_eq!(poll.max_votes_per_option(), 1);
    }

    #[test]
    fn decode_global_string() {
        let raw = serde_json::json!("Y");
        assert_eq!(
            BallotValue::decode(&raw).unwrap(),
            BallotValue::Global(GlobalChoice::Y)
        );
    }

    #[test]
    fn decode_amount_map() {
        let raw = serde_json::json!({"1": 2, "2": 0});
        match BallotValue::decode(&raw).unwrap() {
            BallotValue::Amounts(m) => {
                assert_eq!(m.get(&1), Some(&2));
                assert_eq!(m.get(&2), Some(&0));
            }
            other => panic!("expected amounts, got {other:?}"),
        }
    }

    #[test]
    fn decode_yna_map() {
        let raw = serde_json::json!({"1": "Y", "2": "N"});
        match BallotValue::decode(&raw).unwrap() {
            BallotValue::Yna(m) => {
                assert_eq!(m.get(&1), Some(&YnaChoice::Y));
                assert_eq!(m.get(&2), Some(&YnaChoice::N));
            }
            other => panic!("expected yna, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_unknown_shape() {
        let raw = serde_json::json!(42);
        assert!(BallotValue::decode(&raw).is_err());
    }
}
