use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::tempdir;
use tokio_test::block_on;

use voty_governance::requirements::required_coin_types_of_boolean;
use voty_governance::snapshot::coin_types::{ETH, MATIC};
use voty_governance::{
    BooleanExpression, CapabilityRegistry, DecimalExpression, Did, EngineConfig, Evaluator,
    GovernanceError, ParseOptions, RawExpression, RequiredCoinTypes, SnapshotHandle, SnapshotSet,
    StaticChainReader,
};

fn setup_test() -> (Evaluator, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let fixture = temp_dir.path().join("chain.json");
    std::fs::write(
        &fixture,
        json!({
            "holdings": [
                {"did": "alice.dao.bit", "coin_type": 60, "contract": "0xPass", "token_ids": ["1"]},
                {"did": "alice.dao.bit", "coin_type": 60, "contract": "0xgov", "balance": "120.5", "snapshot": "100"},
                {"did": "alice.dao.bit", "coin_type": 60, "contract": "0xgov", "balance": "999", "snapshot": "200"},
                {"did": "bob.bit", "coin_type": 966, "contract": "0xpoly", "token_ids": ["7", "8", "9"]},
                {"did": "bob.bit", "coin_type": 60, "contract": "0xgov", "balance": "3"}
            ]
        })
        .to_string(),
    )
    .unwrap();

    let reader = StaticChainReader::from_json_file(&fixture).unwrap();
    let evaluator = Evaluator::new(
        EngineConfig::default(),
        Arc::new(CapabilityRegistry::standard()),
        Arc::new(reader),
    );
    (evaluator, temp_dir)
}

fn snapshots_at(eth: &str) -> SnapshotSet {
    SnapshotSet::new([
        (ETH, SnapshotHandle::from(eth)),
        (MATIC, SnapshotHandle::from("5000")),
    ])
}

fn eligibility_rule() -> RawExpression {
    serde_json::from_value(json!({
        "operator": "or",
        "operands": [
            {"operator": "and", "operands": [
                {"function": "is_sub_did_of", "arguments": [["dao.bit"]]},
                {"function": "owns_erc721", "arguments": [60, "0xpass"]}
            ]},
            {"function": "owns_erc721", "arguments": [966, "0xpoly", "8"]}
        ]
    }))
    .unwrap()
}

fn power_rule() -> RawExpression {
    serde_json::from_value(json!({
        "operator": "sum",
        "operands": [
            {"function": "erc20_balance", "arguments": [60, "0xgov"]},
            {"function": "erc721_balance", "arguments": [966, "0xpoly"]},
            {"function": "sub_did_weight", "arguments": [["dao.bit"], "10"]}
        ]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_eligibility_against_fixture() {
    let (evaluator, _temp_dir) = setup_test();
    let snapshots = snapshots_at("100");

    for (did, expected) in [("alice.dao.bit", true), ("bob.bit", true), ("carol.dao.bit", false)] {
        assert_eq!(
            evaluator
                .check_boolean(&eligibility_rule(), &Did::new(did), &snapshots)
                .await
                .unwrap(),
            expected,
            "{}",
            did
        );
    }
}

#[tokio::test]
async fn test_power_depends_on_snapshot() {
    let (evaluator, _temp_dir) = setup_test();
    let alice = Did::new("alice.dao.bit");

    let at_100 = evaluator
        .calculate_decimal(&power_rule(), &alice, &snapshots_at("100"))
        .await
        .unwrap();
    assert_eq!(at_100, Decimal::new(1305, 1));

    let at_200 = evaluator
        .calculate_decimal(&power_rule(), &alice, &snapshots_at("200"))
        .await
        .unwrap();
    assert_eq!(at_200, Decimal::from(1009));

    let bob = evaluator
        .calculate_decimal(&power_rule(), &Did::new("bob.bit"), &snapshots_at("100"))
        .await
        .unwrap();
    assert_eq!(bob, Decimal::from(6));
}

#[tokio::test]
async fn test_missing_snapshot_is_surfaced() {
    let (evaluator, _temp_dir) = setup_test();
    let only_eth = SnapshotSet::new([(ETH, SnapshotHandle::from("100"))]);
    let err = evaluator
        .calculate_decimal(&power_rule(), &Did::new("bob.bit"), &only_eth)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::MissingSnapshot { coin_type: MATIC }));
}

#[test]
fn test_requirements_do_not_depend_on_inputs() {
    let (evaluator, _temp_dir) = setup_test();
    let registry = evaluator.registry();
    let expected = BTreeSet::from([ETH, MATIC]);

    assert_eq!(
        required_coin_types_of_boolean(&eligibility_rule(), registry, ParseOptions::default())
            .unwrap(),
        expected
    );

    let expr = DecimalExpression::parse(&power_rule(), registry).unwrap();
    let before = expr.required_coin_types();
    for (did, at) in [("alice.dao.bit", "100"), ("bob.bit", "200")] {
        block_on(evaluator.evaluate_decimal(&expr, &Did::new(did), &snapshots_at(at))).unwrap();
        assert_eq!(expr.required_coin_types(), before);
    }
    assert_eq!(before, expected);
}

#[tokio::test]
async fn test_batch_power_and_eligibility() {
    let (evaluator, _temp_dir) = setup_test();
    let dids = vec![
        Did::new("carol.dao.bit"),
        Did::new("bob.bit"),
        Did::new("alice.dao.bit"),
    ];
    let snapshots = snapshots_at("100");

    let rule = BooleanExpression::parse(
        &eligibility_rule(),
        evaluator.registry(),
        ParseOptions::default(),
    )
    .unwrap();
    assert_eq!(
        evaluator.eligible(&rule, &dids, &snapshots).await.unwrap(),
        vec![Did::new("bob.bit"), Did::new("alice.dao.bit")]
    );

    let expr = DecimalExpression::parse(&power_rule(), evaluator.registry()).unwrap();
    let powers = evaluator.powers_of(&expr, &dids, &snapshots).await.unwrap();
    assert_eq!(powers.len(), 3);
    assert_eq!(powers[&Did::new("carol.dao.bit")], Decimal::from(10));
    assert!(evaluator
        .has_power(&expr, &Did::new("carol.dao.bit"), &snapshots)
        .await
        .unwrap());
    assert!(!evaluator
        .has_power(&expr, &Did::new("dave.bit"), &snapshots)
        .await
        .unwrap());
}
