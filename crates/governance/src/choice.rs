//! Ballot choice codec and power-weighted tallying
//!
//! A single-choice value is the selected label itself. A multiple-choice
//! value is a JSON array of labels, kept sorted and free of duplicates so
//! that equal selections always encode to the same string. The empty string
//! means no selection for both types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::did::Did;
use crate::{GovernanceError, GovernanceResult};

/// How many options a ballot may select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BallotType {
    /// Exactly one option
    Single,
    /// Any number of options, each receiving the voter's full power
    Multiple,
}

impl BallotType {
    /// Selected options of an encoded value
    pub fn decode(self, value: &str) -> GovernanceResult<BTreeSet<String>> {
        if value.is_empty() {
            return Ok(BTreeSet::new());
        }
        match self {
            Self::Single => Ok(BTreeSet::from([value.to_string()])),
            Self::Multiple => {
                let labels: Vec<String> = serde_json::from_str(value).map_err(|e| {
                    GovernanceError::MalformedBallot(format!("{:?}: {}", value, e))
                })?;
                let mut options = BTreeSet::new();
                for label in labels {
                    if label.is_empty() {
                        return Err(GovernanceError::MalformedBallot(format!(
                            "{:?}: empty option",
                            value
                        )));
                    }
                    if !options.insert(label) {
                        return Err(GovernanceError::MalformedBallot(format!(
                            "{:?}: duplicate option",
                            value
                        )));
                    }
                }
                Ok(options)
            }
        }
    }

    /// Canonical encoding of a selection
    pub fn encode(self, options: &BTreeSet<String>) -> GovernanceResult<String> {
        if options.iter().any(String::is_empty) {
            return Err(GovernanceError::MalformedBallot("empty option".to_string()));
        }
        match self {
            Self::Single => match options.len() {
                0 => Ok(String::new()),
                1 => Ok(options.iter().next().cloned().unwrap_or_default()),
                n => Err(GovernanceError::MalformedBallot(format!(
                    "single choice with {} options",
                    n
                ))),
            },
            Self::Multiple if options.is_empty() => Ok(String::new()),
            Self::Multiple => serde_json::to_string(options)
                .map_err(|e| GovernanceError::MalformedBallot(e.to_string())),
        }
    }

    /// Whether `value` selects nothing
    pub fn is_empty(self, value: &str) -> GovernanceResult<bool> {
        Ok(self.decode(value)?.is_empty())
    }

    /// Whether `option` is selected in `value`
    pub fn contains(self, value: &str, option: &str) -> GovernanceResult<bool> {
        Ok(self.decode(value)?.contains(option))
    }

    /// Select or deselect `option`.
    ///
    /// A single-choice toggle always selects `option`, replacing any previous
    /// choice. A multiple-choice toggle adds `option` when absent and removes
    /// it when present.
    pub fn toggle(self, value: &str, option: &str) -> GovernanceResult<String> {
        if option.is_empty() {
            return Err(GovernanceError::MalformedBallot(
                "cannot toggle an empty option".to_string(),
            ));
        }
        match self {
            Self::Single => {
                self.decode(value)?;
                Ok(option.to_string())
            }
            Self::Multiple => {
                let mut options = self.decode(value)?;
                if !options.remove(option) {
                    options.insert(option.to_string());
                }
                self.encode(&options)
            }
        }
    }

    /// Power each selected option receives from a voter holding `power`
    pub fn power_by_option(
        self,
        value: &str,
        power: Decimal,
    ) -> GovernanceResult<BTreeMap<String, Decimal>> {
        Ok(self
            .decode(value)?
            .into_iter()
            .map(|option| (option, power))
            .collect())
    }
}

impl fmt::Display for BallotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => f.write_str("single"),
            Self::Multiple => f.write_str("multiple"),
        }
    }
}

/// An encoded choice together with the voter's power
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub ballot_type: BallotType,
    #[serde(default)]
    pub choice: String,
    pub power: Decimal,
}

impl Ballot {
    pub fn new(ballot_type: BallotType, choice: impl Into<String>, power: Decimal) -> Self {
        Self {
            ballot_type,
            choice: choice.into(),
            power,
        }
    }

    /// Whether the ballot selects nothing
    pub fn is_empty(&self) -> GovernanceResult<bool> {
        self.ballot_type.is_empty(&self.choice)
    }

    /// Power this ballot adds to each selected option
    pub fn power_by_option(&self) -> GovernanceResult<BTreeMap<String, Decimal>> {
        self.ballot_type.power_by_option(&self.choice, self.power)
    }
}

/// A cast ballot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Identity that cast the ballot
    pub voter: Did,
    #[serde(flatten)]
    pub ballot: Ballot,
}

/// Accumulated power per option
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceTally {
    /// Power per option
    pub powers: BTreeMap<String, Decimal>,
    /// Power of all non-empty ballots, each counted once
    pub total: Decimal,
}

impl ChoiceTally {
    /// A tally with no ballots
    pub fn new() -> Self {
        Self::default()
    }

    /// Tally with one more ballot merged in.
    ///
    /// Every selected option gains the ballot's full power while the total
    /// grows by that power once. An empty ballot changes nothing. Negative
    /// power is rejected.
    pub fn aggregate(&self, ballot: &Ballot) -> GovernanceResult<Self> {
        if ballot.power.is_sign_negative() && !ballot.power.is_zero() {
            return Err(GovernanceError::MalformedBallot(format!(
                "power {} is negative",
                ballot.power
            )));
        }
        let shares = ballot.power_by_option()?;
        let mut tally = self.clone();
        if shares.is_empty() {
            return Ok(tally);
        }
        for (option, power) in shares {
            let accumulated = tally.powers.entry(option).or_insert(Decimal::ZERO);
            *accumulated = accumulated
                .checked_add(power)
                .ok_or_else(|| GovernanceError::Overflow("option tally".to_string()))?;
        }
        tally.total = tally
            .total
            .checked_add(ballot.power)
            .ok_or_else(|| GovernanceError::Overflow("tally total".to_string()))?;
        Ok(tally)
    }

    /// Tally of a set of ballots
    pub fn from_ballots<'a>(
        ballots: impl IntoIterator<Item = &'a Ballot>,
    ) -> GovernanceResult<Self> {
        ballots
            .into_iter()
            .try_fold(Self::new(), |tally, ballot| tally.aggregate(ballot))
    }

    /// Tally of cast votes where only the latest vote of each voter counts
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> GovernanceResult<Self> {
        let mut latest: BTreeMap<&Did, &Ballot> = BTreeMap::new();
        let mut cast = 0usize;
        for vote in votes {
            latest.insert(&vote.voter, &vote.ballot);
            cast += 1;
        }
        debug!(cast, voters = latest.len(), "tallying votes");
        Self::from_ballots(latest.into_values())
    }

    /// Power accumulated by `option`
    pub fn power_of(&self, option: &str) -> Decimal {
        self.powers.get(option).copied().unwrap_or(Decimal::ZERO)
    }

    /// Share of the total held by `option`, in percent; 0 for an empty tally
    pub fn percentage(&self, option: &str) -> GovernanceResult<Decimal> {
        if self.total.is_zero() {
            return Ok(Decimal::ZERO);
        }
        // divide first: an option never holds more than the total
        self.power_of(option)
            .checked_div(self.total)
            .and_then(|share| share.checked_mul(Decimal::ONE_HUNDRED))
            .ok_or_else(|| GovernanceError::Overflow(format!("percentage of {}", option)))
    }

    /// Share `option` would hold, in percent, once `pending` is cast
    pub fn preview_percentage(&self, option: &str, pending: &Ballot) -> GovernanceResult<Decimal> {
        self.aggregate(pending)?.percentage(option)
    }

    /// Options by descending power, ties by label
    pub fn ranked(&self) -> Vec<(&str, Decimal)> {
        let mut ranked: Vec<(&str, Decimal)> = self
            .powers
            .iter()
            .map(|(option, power)| (option.as_str(), *power))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}
