use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;

use voty_governance::phase::{phase, DurationUnit};
use voty_governance::{
    Ballot, BallotType, ChoiceTally, DecimalExpression, Did, Evaluator, GrantDuration, GrantPhase,
    Phase, PhaseDuration, PhaseDurations, ProposalDuration, ProposalPhase, SnapshotSet,
    StaticChainReader, Vote,
};

const T: u64 = 1_690_000_000;

#[test]
fn test_grant_lifecycle_with_zero_length_announcing() {
    let grant = GrantDuration {
        announcing: 0,
        proposing: 100,
        voting: 100,
    };
    assert_eq!(grant.phase(T - 10, None), GrantPhase::Confirming);
    assert_eq!(grant.phase(T, Some(T)), GrantPhase::Proposing);
    assert_eq!(grant.phase(T + 99, Some(T)), GrantPhase::Proposing);
    assert_eq!(grant.phase(T + 100, Some(T)), GrantPhase::Voting);
    assert_eq!(grant.phase(T + 200, Some(T)), GrantPhase::Ended);

    let durations = grant.durations();
    assert_eq!(durations.starts_at("voting", T), Some(T + 100));
    assert_eq!(durations.time_until("voting", T + 30, T), Some(70));
}

#[test]
fn test_generic_machine_matches_typed_shapes() {
    let proposal = ProposalDuration {
        pending: DurationUnit::Hour.seconds(),
        voting: 3 * DurationUnit::Day.seconds(),
    };
    let durations: PhaseDurations = serde_json::from_value(json!([
        {"name": "pending", "seconds": 3600},
        {"name": "voting", "seconds": 259200}
    ]))
    .unwrap();
    assert_eq!(durations, proposal.durations());

    for offset in [0, 3599, 3600, 262_799, 262_800] {
        let generic = phase(T + offset, Some(T), &durations);
        let typed = proposal.phase(T + offset, Some(T));
        assert_eq!(generic.to_string(), typed.to_string());
    }
    assert_eq!(proposal.phase(T + 3600, Some(T)), ProposalPhase::Voting);
    assert_eq!(phase(T, None, &durations), Phase::Confirming);
}

#[test]
fn test_durations_are_validated_on_load() {
    let err = serde_json::from_value::<PhaseDurations>(json!([
        {"name": "voting", "seconds": 1},
        {"name": "voting", "seconds": 1}
    ]));
    assert!(err.is_err());

    let ok = PhaseDurations::new([
        PhaseDuration::new("review", 10),
        PhaseDuration::new("voting", 0),
    ])
    .unwrap();
    assert_eq!(ok.phase(T + 10, Some(T)), Phase::Ended);
}

#[tokio::test]
async fn test_votes_weighted_by_evaluated_power() {
    let evaluator = Evaluator::with_reader(Arc::new(StaticChainReader::default()));
    let rule = DecimalExpression::from_json(
        r#"{"operator":"sum","operands":[
            {"function":"did_weight","arguments":[["alice.bit"],"3"]},
            {"function":"did_weight","arguments":[["bob.bit"],"7"]},
            {"function":"sub_did_weight","arguments":[["dao.bit"],"10"]}
        ]}"#,
        evaluator.registry(),
    )
    .unwrap();

    let voters = vec![Did::new("alice.bit"), Did::new("bob.bit"), Did::new("x.dao.bit")];
    let powers = evaluator
        .powers_of(&rule, &voters, &SnapshotSet::default())
        .await
        .unwrap();

    let choices = [r#"["X"]"#, r#"["X","Y"]"#, ""];
    let votes: Vec<Vote> = voters
        .iter()
        .zip(choices)
        .map(|(voter, choice)| Vote {
            voter: voter.clone(),
            ballot: Ballot::new(BallotType::Multiple, choice, powers[voter]),
        })
        .collect();

    let tally = ChoiceTally::from_votes(&votes).unwrap();
    assert_eq!(tally.power_of("X"), Decimal::from(10));
    assert_eq!(tally.power_of("Y"), Decimal::from(7));
    assert_eq!(tally.total, Decimal::from(10));
    assert_eq!(tally.percentage("Y").unwrap(), Decimal::from(70));

    // the abstaining voter previews a choice before casting it
    let pending = Ballot::new(
        BallotType::Multiple,
        BallotType::Multiple.toggle("", "Y").unwrap(),
        powers[&Did::new("x.dao.bit")],
    );
    let preview = tally.preview_percentage("Y", &pending).unwrap();
    assert_eq!(preview, Decimal::from(85));
}

#[test]
fn test_single_choice_scenario() {
    let ballots = [
        Ballot::new(BallotType::Single, "X", Decimal::from(3)),
        Ballot::new(BallotType::Single, "X", Decimal::from(7)),
    ];
    let tally = ChoiceTally::from_ballots(&ballots).unwrap();
    assert_eq!(tally.power_of("X"), Decimal::from(10));
    assert_eq!(tally.total, Decimal::from(10));

    let switched = BallotType::Single
        .toggle(&BallotType::Single.toggle("", "A").unwrap(), "B")
        .unwrap();
    assert_eq!(switched, "B");
}
