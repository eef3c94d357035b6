//! Lifecycle phase state machine
//!
//! A time-boxed process passes through an ordered sequence of named phases
//! once its creation is confirmed. The current phase is derived purely from
//! elapsed time: phase `i` covers the half-open window `[c[i], c[i+1])` of
//! cumulative durations, so zero-length phases are never observed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::{GovernanceError, GovernanceResult};

/// Unix time in seconds
pub type Timestamp = u64;

const CONFIRMING: &str = "confirming";
const ENDED: &str = "ended";

/// One named phase and how long it lasts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDuration {
    /// Phase name
    pub name: String,
    /// Length in seconds
    pub seconds: u64,
}

impl PhaseDuration {
    pub fn new(name: impl Into<String>, seconds: u64) -> Self {
        Self {
            name: name.into(),
            seconds,
        }
    }
}

/// Validated, ordered phase sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PhaseDuration>", into = "Vec<PhaseDuration>")]
pub struct PhaseDurations(Vec<PhaseDuration>);

/// Half-open time window `[start, end)` of one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseWindow<'a> {
    /// Position in the sequence
    pub index: usize,
    /// Phase name
    pub name: &'a str,
    /// First instant of the phase
    pub start: Timestamp,
    /// First instant after the phase
    pub end: Timestamp,
}

impl PhaseWindow<'_> {
    /// Whether `at` falls inside the window
    pub fn contains(&self, at: Timestamp) -> bool {
        self.start <= at && at < self.end
    }

    /// Length in seconds
    pub fn length(&self) -> u64 {
        self.end - self.start
    }
}

impl PhaseDurations {
    /// Validate a phase sequence.
    ///
    /// Names must be non-empty, unique ignoring ASCII case and distinct from
    /// the reserved `confirming` and `ended` phases. At least one phase is
    /// required.
    pub fn new(durations: impl IntoIterator<Item = PhaseDuration>) -> GovernanceResult<Self> {
        let durations: Vec<PhaseDuration> = durations.into_iter().collect();
        if durations.is_empty() {
            return Err(GovernanceError::InvalidDurations(
                "at least one phase is required".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for duration in &durations {
            let name = duration.name.as_str();
            if name.trim().is_empty() {
                return Err(GovernanceError::InvalidDurations(
                    "phase name is empty".to_string(),
                ));
            }
            if name.eq_ignore_ascii_case(CONFIRMING) || name.eq_ignore_ascii_case(ENDED) {
                return Err(GovernanceError::InvalidDurations(format!(
                    "phase name {} is reserved",
                    name
                )));
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(GovernanceError::InvalidDurations(format!(
                    "duplicate phase {}",
                    name
                )));
            }
        }
        Ok(Self(durations))
    }

    /// Parse and validate a JSON list of `{name, seconds}`
    pub fn from_json(json: &str) -> GovernanceResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| GovernanceError::InvalidDurations(e.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhaseDuration> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|duration| duration.name == name)
    }

    /// Sum of all phase lengths
    pub fn total(&self) -> u64 {
        self.0
            .iter()
            .fold(0u64, |total, duration| total.saturating_add(duration.seconds))
    }

    /// Phase at `now` for a process confirmed at `confirmed_at`
    pub fn phase(&self, now: Timestamp, confirmed_at: Option<Timestamp>) -> Phase<'_> {
        phase(now, confirmed_at, self)
    }

    /// Window of every phase for a process confirmed at `confirmed_at`
    pub fn windows(&self, confirmed_at: Timestamp) -> Vec<PhaseWindow<'_>> {
        let mut start = confirmed_at;
        self.0
            .iter()
            .enumerate()
            .map(|(index, duration)| {
                let end = start.saturating_add(duration.seconds);
                let window = PhaseWindow {
                    index,
                    name: &duration.name,
                    start,
                    end,
                };
                start = end;
                window
            })
            .collect()
    }

    /// When the named phase starts
    pub fn starts_at(&self, name: &str, confirmed_at: Timestamp) -> Option<Timestamp> {
        let index = self.index_of(name)?;
        Some(self.windows(confirmed_at)[index].start)
    }

    /// When the named phase ends
    pub fn ends_at(&self, name: &str, confirmed_at: Timestamp) -> Option<Timestamp> {
        let index = self.index_of(name)?;
        Some(self.windows(confirmed_at)[index].end)
    }

    /// Seconds until the named phase starts; 0 once it has started
    pub fn time_until(&self, name: &str, now: Timestamp, confirmed_at: Timestamp) -> Option<u64> {
        self.starts_at(name, confirmed_at)
            .map(|start| start.saturating_sub(now))
    }
}

impl TryFrom<Vec<PhaseDuration>> for PhaseDurations {
    type Error = GovernanceError;

    fn try_from(durations: Vec<PhaseDuration>) -> GovernanceResult<Self> {
        Self::new(durations)
    }
}

impl From<PhaseDurations> for Vec<PhaseDuration> {
    fn from(durations: PhaseDurations) -> Self {
        durations.0
    }
}

/// Lifecycle phase of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase<'a> {
    /// Creation not yet confirmed
    Confirming,
    /// Inside a configured phase
    Active {
        /// Position in the sequence
        index: usize,
        /// Phase name
        name: &'a str,
    },
    /// Every phase has elapsed
    Ended,
}

impl Phase<'_> {
    /// Phase name, including the reserved `confirming` and `ended`
    pub fn name(&self) -> &str {
        match self {
            Self::Confirming => CONFIRMING,
            Self::Active { name, .. } => *name,
            Self::Ended => ENDED,
        }
    }

    /// Whether this is the named configured phase
    pub fn is(&self, phase: &str) -> bool {
        matches!(self, Self::Active { name, .. } if *name == phase)
    }
}

impl fmt::Display for Phase<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Derive the phase at `now` of a process confirmed at `confirmed_at`.
///
/// Time before confirmation counts as zero elapsed seconds.
pub fn phase(
    now: Timestamp,
    confirmed_at: Option<Timestamp>,
    durations: &PhaseDurations,
) -> Phase<'_> {
    let Some(confirmed_at) = confirmed_at else {
        return Phase::Confirming;
    };
    let elapsed = now.saturating_sub(confirmed_at);

    let mut boundary = 0u64;
    for (index, duration) in durations.iter().enumerate() {
        boundary = boundary.saturating_add(duration.seconds);
        if elapsed < boundary {
            return Phase::Active {
                index,
                name: &duration.name,
            };
        }
    }
    Phase::Ended
}

/// Phase lengths of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDuration {
    /// Seconds announcing the grant before proposals open
    pub announcing: u64,
    /// Seconds accepting proposals
    pub proposing: u64,
    /// Seconds voting on proposals
    pub voting: u64,
}

/// Lifecycle of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantPhase {
    Confirming,
    Announcing,
    Proposing,
    Voting,
    Ended,
}

impl GrantDuration {
    /// The generic phase sequence
    pub fn durations(&self) -> PhaseDurations {
        PhaseDurations(vec![
            PhaseDuration::new("announcing", self.announcing),
            PhaseDuration::new("proposing", self.proposing),
            PhaseDuration::new("voting", self.voting),
        ])
    }

    /// Grant phase at `now`
    pub fn phase(&self, now: Timestamp, confirmed_at: Option<Timestamp>) -> GrantPhase {
        match phase(now, confirmed_at, &self.durations()) {
            Phase::Confirming => GrantPhase::Confirming,
            Phase::Active { index: 0, .. } => GrantPhase::Announcing,
            Phase::Active { index: 1, .. } => GrantPhase::Proposing,
            Phase::Active { .. } => GrantPhase::Voting,
            Phase::Ended => GrantPhase::Ended,
        }
    }
}

impl fmt::Display for GrantPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Confirming => CONFIRMING,
            Self::Announcing => "announcing",
            Self::Proposing => "proposing",
            Self::Voting => "voting",
            Self::Ended => ENDED,
        };
        f.write_str(name)
    }
}

/// Phase lengths of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalDuration {
    /// Seconds between publication and the opening of the vote
    pub pending: u64,
    /// Seconds voting
    pub voting: u64,
}

/// Lifecycle of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalPhase {
    Confirming,
    Pending,
    Voting,
    Ended,
}

impl ProposalDuration {
    /// The generic phase sequence
    pub fn durations(&self) -> PhaseDurations {
        PhaseDurations(vec![
            PhaseDuration::new("pending", self.pending),
            PhaseDuration::new("voting", self.voting),
        ])
    }

    /// Proposal phase at `now`
    pub fn phase(&self, now: Timestamp, confirmed_at: Option<Timestamp>) -> ProposalPhase {
        match phase(now, confirmed_at, &self.durations()) {
            Phase::Confirming => ProposalPhase::Confirming,
            Phase::Active { index: 0, .. } => ProposalPhase::Pending,
            Phase::Active { .. } => ProposalPhase::Voting,
            Phase::Ended => ProposalPhase::Ended,
        }
    }
}

impl fmt::Display for ProposalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Confirming => CONFIRMING,
            Self::Pending => "pending",
            Self::Voting => "voting",
            Self::Ended => ENDED,
        };
        f.write_str(name)
    }
}

/// Units phase lengths are entered and displayed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DurationUnit {
    Minute,
    Hour,
    Day,
    Week,
    /// 30 days
    Month,
    /// 364 days
    Year,
}

impl DurationUnit {
    /// Largest unit first
    pub const ALL: [DurationUnit; 6] = [
        Self::Year,
        Self::Month,
        Self::Week,
        Self::Day,
        Self::Hour,
        Self::Minute,
    ];

    /// Length of the unit in seconds
    pub fn seconds(self) -> u64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 60 * 60,
            Self::Day => 24 * 60 * 60,
            Self::Week => 7 * 24 * 60 * 60,
            Self::Month => 30 * 24 * 60 * 60,
            Self::Year => 364 * 24 * 60 * 60,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Largest unit that divides `seconds` exactly
    pub fn largest_dividing(seconds: u64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|unit| seconds % unit.seconds() == 0)
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DurationUnit {
    type Err = GovernanceError;

    fn from_str(s: &str) -> GovernanceResult<Self> {
        let s = s.trim().to_ascii_lowercase();
        let singular = s.strip_suffix('s').unwrap_or(&s);
        Self::ALL
            .into_iter()
            .find(|unit| unit.label() == singular)
            .ok_or_else(|| GovernanceError::InvalidDurations(format!("unknown unit {}", s)))
    }
}

/// Render a phase length in the largest unit that divides it exactly
pub fn humanize(seconds: u64) -> String {
    let (amount, label) = match DurationUnit::largest_dividing(seconds) {
        _ if seconds == 0 => (0, "second"),
        Some(unit) => (seconds / unit.seconds(), unit.label()),
        None => (seconds, "second"),
    };
    if amount == 1 {
        format!("1 {}", label)
    } else {
        format!("{} {}s", amount, label)
    }
}
