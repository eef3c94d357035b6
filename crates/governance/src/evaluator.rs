//! Expression evaluation
//!
//! Combinators fan out over their operands with at most
//! `concurrency_limit` evaluations in flight. Every operand runs to
//! completion before the combinator reduces, so a combinator never
//! short-circuits and its value never depends on completion order. When
//! several operands fail, the error of the first one in authored order wins.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::capability::{CapabilityRegistry, ChainReader};
use crate::config::EngineConfig;
use crate::did::Did;
use crate::expression::{BooleanExpression, DecimalExpression, RawExpression};
use crate::requirements::RequiredCoinTypes;
use crate::snapshot::{SnapshotResolver, SnapshotSet};
use crate::{GovernanceError, GovernanceResult};

/// Evaluates eligibility and voting-power rules for identities
pub struct Evaluator {
    config: EngineConfig,
    registry: Arc<CapabilityRegistry>,
    reader: Arc<dyn ChainReader>,
}

impl Evaluator {
    /// Create an evaluator from its collaborators
    pub fn new(
        config: EngineConfig,
        registry: Arc<CapabilityRegistry>,
        reader: Arc<dyn ChainReader>,
    ) -> Self {
        Self {
            config,
            registry,
            reader,
        }
    }

    /// Evaluator with the default configuration and the standard registry
    pub fn with_reader(reader: Arc<dyn ChainReader>) -> Self {
        Self::new(
            EngineConfig::default(),
            Arc::new(CapabilityRegistry::standard()),
            reader,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    fn limit(&self) -> usize {
        self.config.concurrency_limit.max(1)
    }

    /// Evaluate an eligibility rule for `did`
    pub fn evaluate_boolean<'a>(
        &'a self,
        expr: &'a BooleanExpression,
        did: &'a Did,
        snapshots: &'a SnapshotSet,
    ) -> BoxFuture<'a, GovernanceResult<bool>> {
        async move {
            match expr {
                BooleanExpression::Predicate(capability) => {
                    capability.execute(self.reader.as_ref(), did, snapshots).await
                }
                BooleanExpression::Not(operand) => {
                    Ok(!self.evaluate_boolean(operand, did, snapshots).await?)
                }
                BooleanExpression::And(operands) => {
                    let results = self.boolean_operands(operands, did, snapshots).await?;
                    let value = results.iter().all(|result| *result);
                    debug!(%did, operands = results.len(), value, "and evaluated");
                    Ok(value)
                }
                BooleanExpression::Or(operands) => {
                    let results = self.boolean_operands(operands, did, snapshots).await?;
                    let value = results.iter().any(|result| *result);
                    debug!(%did, operands = results.len(), value, "or evaluated");
                    Ok(value)
                }
            }
        }
        .boxed()
    }

    async fn boolean_operands(
        &self,
        operands: &[BooleanExpression],
        did: &Did,
        snapshots: &SnapshotSet,
    ) -> GovernanceResult<Vec<bool>> {
        let pending: Vec<_> = operands
            .iter()
            .map(|operand| self.evaluate_boolean(operand, did, snapshots))
            .collect();
        let results: Vec<GovernanceResult<bool>> = stream::iter(pending)
            .buffered(self.limit())
            .collect()
            .await;
        results.into_iter().collect()
    }

    /// Evaluate a voting-power rule for `did`
    pub fn evaluate_decimal<'a>(
        &'a self,
        expr: &'a DecimalExpression,
        did: &'a Did,
        snapshots: &'a SnapshotSet,
    ) -> BoxFuture<'a, GovernanceResult<Decimal>> {
        async move {
            match expr {
                DecimalExpression::Weight(capability) => {
                    capability.execute(self.reader.as_ref(), did, snapshots).await
                }
                DecimalExpression::Sum(operands) => {
                    let pending: Vec<_> = operands
                        .iter()
                        .map(|operand| self.evaluate_decimal(operand, did, snapshots))
                        .collect();
                    let results: Vec<GovernanceResult<Decimal>> = stream::iter(pending)
                        .buffered(self.limit())
                        .collect()
                        .await;
                    let amounts = results.into_iter().collect::<GovernanceResult<Vec<_>>>()?;
                    let total = amounts.iter().try_fold(Decimal::ZERO, |total, amount| {
                        total.checked_add(*amount).ok_or_else(|| {
                            GovernanceError::Overflow(format!("sum for {}", did))
                        })
                    })?;
                    debug!(%did, operands = amounts.len(), %total, "sum evaluated");
                    Ok(total)
                }
            }
        }
        .boxed()
    }

    /// Parse an eligibility rule with this evaluator's registry, then evaluate it
    pub async fn check_boolean(
        &self,
        raw: &RawExpression,
        did: &Did,
        snapshots: &SnapshotSet,
    ) -> GovernanceResult<bool> {
        let expr = BooleanExpression::parse(raw, &self.registry, self.config.parse_options())?;
        self.evaluate_boolean(&expr, did, snapshots).await
    }

    /// Parse a voting-power rule with this evaluator's registry, then evaluate it
    pub async fn calculate_decimal(
        &self,
        raw: &RawExpression,
        did: &Did,
        snapshots: &SnapshotSet,
    ) -> GovernanceResult<Decimal> {
        let expr = DecimalExpression::parse(raw, &self.registry)?;
        self.evaluate_decimal(&expr, did, snapshots).await
    }

    /// Whether `did` has any voting power under `expr`
    pub async fn has_power(
        &self,
        expr: &DecimalExpression,
        did: &Did,
        snapshots: &SnapshotSet,
    ) -> GovernanceResult<bool> {
        Ok(self.evaluate_decimal(expr, did, snapshots).await? > Decimal::ZERO)
    }

    /// Voting power of every identity under one rule
    pub async fn powers_of(
        &self,
        expr: &DecimalExpression,
        dids: &[Did],
        snapshots: &SnapshotSet,
    ) -> GovernanceResult<BTreeMap<Did, Decimal>> {
        let pending: Vec<_> = dids
            .iter()
            .map(|did| self.evaluate_decimal(expr, did, snapshots))
            .collect();
        let results: Vec<GovernanceResult<Decimal>> = stream::iter(pending)
            .buffered(self.limit())
            .collect()
            .await;

        let mut powers = BTreeMap::new();
        for (did, result) in dids.iter().zip(results) {
            powers.insert(did.clone(), result?);
        }
        info!(count = powers.len(), "voting powers calculated");
        Ok(powers)
    }

    /// Identities passing an eligibility rule, in input order
    pub async fn eligible(
        &self,
        expr: &BooleanExpression,
        dids: &[Did],
        snapshots: &SnapshotSet,
    ) -> GovernanceResult<Vec<Did>> {
        let pending: Vec<_> = dids
            .iter()
            .map(|did| self.evaluate_boolean(expr, did, snapshots))
            .collect();
        let results: Vec<GovernanceResult<bool>> = stream::iter(pending)
            .buffered(self.limit())
            .collect()
            .await;

        let mut passing = Vec::new();
        for (did, result) in dids.iter().zip(results) {
            if result? {
                passing.push(did.clone());
            }
        }
        info!(checked = dids.len(), passing = passing.len(), "eligibility checked");
        Ok(passing)
    }

    /// Resolve in one batch every snapshot a rule could read
    pub async fn resolve_snapshots<E>(
        &self,
        expr: &E,
        resolver: &dyn SnapshotResolver,
    ) -> GovernanceResult<SnapshotSet>
    where
        E: RequiredCoinTypes + ?Sized,
    {
        SnapshotSet::resolve(resolver, &expr.required_coin_types(), self.limit()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        BooleanCapability, DecimalCapability, MockChainReader, TokenQuery, TokenStandard,
    };
    use crate::expression::ParseOptions;
    use crate::snapshot::coin_types::{ETH, MATIC};
    use crate::snapshot::{MockSnapshotResolver, SnapshotHandle};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn is_did(did: &str) -> BooleanExpression {
        BooleanExpression::Predicate(BooleanCapability::IsDid {
            dids: vec![Did::new(did)],
        })
    }

    fn owns(coin_type: u32, contract: &str) -> BooleanExpression {
        BooleanExpression::Predicate(BooleanCapability::OwnsErc721 {
            query: TokenQuery {
                standard: TokenStandard::Erc721,
                coin_type,
                contract: contract.to_string(),
                token_id: None,
            },
        })
    }

    fn balance(contract: &str) -> DecimalExpression {
        DecimalExpression::Weight(DecimalCapability::Erc20Balance {
            query: TokenQuery {
                standard: TokenStandard::Erc20,
                coin_type: ETH,
                contract: contract.to_string(),
                token_id: None,
            },
        })
    }

    fn eth_snapshots() -> SnapshotSet {
        SnapshotSet::new([(ETH, SnapshotHandle::from(100u64))])
    }

    fn evaluator(reader: MockChainReader) -> Evaluator {
        Evaluator::with_reader(Arc::new(reader))
    }

    #[tokio::test]
    async fn test_boolean_laws() {
        let evaluator = evaluator(MockChainReader::new());
        let did = Did::new("alice.bit");
        let snapshots = SnapshotSet::default();
        let yes = is_did("alice.bit");
        let no = is_did("bob.bit");

        for a in [&yes, &no] {
            let va = evaluator.evaluate_boolean(a, &did, &snapshots).await.unwrap();
            let not = BooleanExpression::Not(Box::new(a.clone()));
            assert_eq!(
                evaluator.evaluate_boolean(&not, &did, &snapshots).await.unwrap(),
                !va
            );
            for b in [&yes, &no] {
                let vb = evaluator.evaluate_boolean(b, &did, &snapshots).await.unwrap();
                let and = BooleanExpression::And(vec![a.clone(), b.clone()]);
                let or = BooleanExpression::Or(vec![a.clone(), b.clone()]);
                assert_eq!(
                    evaluator.evaluate_boolean(&and, &did, &snapshots).await.unwrap(),
                    va && vb
                );
                assert_eq!(
                    evaluator.evaluate_boolean(&or, &did, &snapshots).await.unwrap(),
                    va || vb
                );
            }
        }
    }

    #[tokio::test]
    async fn test_empty_combinators() {
        let evaluator = evaluator(MockChainReader::new());
        let did = Did::new("alice.bit");
        let snapshots = SnapshotSet::default();
        assert!(evaluator
            .evaluate_boolean(&BooleanExpression::And(vec![]), &did, &snapshots)
            .await
            .unwrap());
        assert!(!evaluator
            .evaluate_boolean(&BooleanExpression::Or(vec![]), &did, &snapshots)
            .await
            .unwrap());
        assert_eq!(
            evaluator
                .evaluate_decimal(&DecimalExpression::Sum(vec![]), &did, &snapshots)
                .await
                .unwrap(),
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn test_no_short_circuit() {
        let mut reader = MockChainReader::new();
        reader
            .expect_owns_token()
            .times(3)
            .returning(|_, query, _| Ok(query.contract == "0xyes"));
        let evaluator = evaluator(reader);

        // the first operand already decides the OR, the rest still run
        let expr = BooleanExpression::Or(vec![
            owns(ETH, "0xyes"),
            owns(ETH, "0xno"),
            owns(ETH, "0xno"),
        ]);
        assert!(evaluator
            .evaluate_boolean(&expr, &Did::new("a.bit"), &eth_snapshots())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_failure_still_runs_every_operand() {
        let mut reader = MockChainReader::new();
        reader
            .expect_owns_token()
            .times(3)
            .returning(|_, query, _| {
                if query.contract == "0xfail" {
                    Err(anyhow::anyhow!("rpc timeout"))
                } else {
                    Ok(true)
                }
            });
        let evaluator = evaluator(reader);

        let expr = BooleanExpression::And(vec![
            owns(ETH, "0xok"),
            owns(ETH, "0xfail"),
            owns(ETH, "0xok"),
        ]);
        let err = evaluator
            .evaluate_boolean(&expr, &Did::new("a.bit"), &eth_snapshots())
            .await
            .unwrap_err();
        match err {
            GovernanceError::Resolution {
                capability,
                did,
                message,
            } => {
                assert_eq!(capability, "owns_erc721");
                assert_eq!(did, "a.bit");
                assert_eq!(message, "rpc timeout");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_error_in_authored_order() {
        let mut reader = MockChainReader::new();
        reader
            .expect_owns_token()
            .returning(|_, _, _| Err(anyhow::anyhow!("node down")));
        let evaluator = evaluator(reader);

        // MATIC has no snapshot, so the first operand fails before reaching the reader
        let expr = BooleanExpression::Or(vec![owns(MATIC, "0xa"), owns(ETH, "0xb")]);
        let err = evaluator
            .evaluate_boolean(&expr, &Did::new("a.bit"), &eth_snapshots())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::MissingSnapshot { coin_type: MATIC }
        ));

        let expr = BooleanExpression::Or(vec![owns(ETH, "0xb"), owns(MATIC, "0xa")]);
        let err = evaluator
            .evaluate_boolean(&expr, &Did::new("a.bit"), &eth_snapshots())
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_sum_is_exact() {
        let mut reader = MockChainReader::new();
        reader
            .expect_token_balance()
            .returning(|_, query, _| match query.contract.as_str() {
                "0xa" => Ok(Decimal::new(1, 1)),
                _ => Ok(Decimal::new(2, 1)),
            });
        let evaluator = evaluator(reader);

        let expr = DecimalExpression::Sum(vec![
            balance("0xa"),
            DecimalExpression::Sum(vec![balance("0xb")]),
        ]);
        let did = Did::new("a.bit");
        assert_eq!(
            evaluator
                .evaluate_decimal(&expr, &did, &eth_snapshots())
                .await
                .unwrap(),
            Decimal::new(3, 1)
        );
        assert!(evaluator
            .has_power(&expr, &did, &eth_snapshots())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_sum_overflow_is_an_error() {
        let evaluator = evaluator(MockChainReader::new());
        let expr = DecimalExpression::Sum(vec![
            DecimalExpression::Weight(DecimalCapability::DidWeight {
                dids: vec![Did::new("a.bit")],
                power: Decimal::MAX,
            }),
            DecimalExpression::Weight(DecimalCapability::DidWeight {
                dids: vec![Did::new("a.bit")],
                power: Decimal::ONE,
            }),
        ]);
        let err = evaluator
            .evaluate_decimal(&expr, &Did::new("a.bit"), &SnapshotSet::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Overflow(_)));
    }

    #[tokio::test]
    async fn test_check_boolean_from_raw() {
        let evaluator = evaluator(MockChainReader::new());
        let raw: RawExpression = serde_json::from_value(json!({
            "operator": "and",
            "operands": [
                {"function": "is_sub_did_of", "arguments": [["dao.bit"]]},
                {"operator": "not", "operands": [
                    {"function": "is_did", "arguments": [["banned.dao.bit"]]}
                ]}
            ]
        }))
        .unwrap();
        let snapshots = SnapshotSet::default();
        assert!(evaluator
            .check_boolean(&raw, &Did::new("alice.dao.bit"), &snapshots)
            .await
            .unwrap());
        assert!(!evaluator
            .check_boolean(&raw, &Did::new("banned.dao.bit"), &snapshots)
            .await
            .unwrap());

        let unknown: RawExpression =
            serde_json::from_value(json!({"function": "is_rich", "arguments": []})).unwrap();
        assert!(matches!(
            evaluator
                .check_boolean(&unknown, &Did::new("a.bit"), &snapshots)
                .await,
            Err(GovernanceError::UnknownFunction(_))
        ));
    }

    #[tokio::test]
    async fn test_lenient_not_follows_config() {
        let config = EngineConfig {
            lenient_not: true,
            ..EngineConfig::default()
        };
        let evaluator = Evaluator::new(
            config,
            Arc::new(CapabilityRegistry::standard()),
            Arc::new(MockChainReader::new()),
        );
        let raw: RawExpression = serde_json::from_value(json!({
            "operator": "not",
            "operands": [
                {"function": "is_did", "arguments": [["a.bit"]]},
                {"function": "is_did", "arguments": [["b.bit"]]}
            ]
        }))
        .unwrap();
        assert!(evaluator
            .check_boolean(&raw, &Did::new("b.bit"), &SnapshotSet::default())
            .await
            .unwrap());
        assert_eq!(evaluator.config().parse_options(), ParseOptions { lenient_not: true });
    }

    #[tokio::test]
    async fn test_powers_and_eligibility_for_many() {
        let evaluator = evaluator(MockChainReader::new());
        let expr = DecimalExpression::Sum(vec![
            DecimalExpression::Weight(DecimalCapability::DidWeight {
                dids: vec![Did::new("a.bit")],
                power: Decimal::new(10, 0),
            }),
            DecimalExpression::Weight(DecimalCapability::SubDidWeight {
                parents: vec![Did::new("a.bit")],
                power: Decimal::new(1, 0),
            }),
        ]);
        let dids = vec![Did::new("x.a.bit"), Did::new("a.bit"), Did::new("b.bit")];
        let snapshots = SnapshotSet::default();

        let powers = evaluator.powers_of(&expr, &dids, &snapshots).await.unwrap();
        assert_eq!(powers[&Did::new("a.bit")], Decimal::new(10, 0));
        assert_eq!(powers[&Did::new("x.a.bit")], Decimal::new(1, 0));
        assert_eq!(powers[&Did::new("b.bit")], Decimal::ZERO);

        let rule = BooleanExpression::Or(vec![is_did("b.bit"), is_did("x.a.bit")]);
        assert_eq!(
            evaluator.eligible(&rule, &dids, &snapshots).await.unwrap(),
            vec![Did::new("x.a.bit"), Did::new("b.bit")]
        );
    }

    #[tokio::test]
    async fn test_resolve_snapshots_for_rule() {
        let mut resolver = MockSnapshotResolver::new();
        resolver
            .expect_resolve_snapshot()
            .times(2)
            .returning(|coin_type| Ok(SnapshotHandle::from(u64::from(coin_type))));
        let evaluator = evaluator(MockChainReader::new());

        let expr = BooleanExpression::And(vec![
            owns(ETH, "0xa"),
            owns(MATIC, "0xb"),
            owns(ETH, "0xc"),
            is_did("a.bit"),
        ]);
        let snapshots = evaluator.resolve_snapshots(&expr, &resolver).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots.covers(&expr.required_coin_types()));
    }

    struct SlowReader {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChainReader for SlowReader {
        async fn owns_token(
            &self,
            _did: &Did,
            _query: &TokenQuery,
            _snapshot: &SnapshotHandle,
        ) -> anyhow::Result<bool> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }

        async fn token_balance(
            &self,
            _did: &Did,
            _query: &TokenQuery,
            _snapshot: &SnapshotHandle,
        ) -> anyhow::Result<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    #[tokio::test]
    async fn test_fan_out_respects_concurrency_limit() {
        let reader = Arc::new(SlowReader {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let evaluator = Evaluator::with_reader(reader.clone());

        let expr = BooleanExpression::Or((0..12).map(|i| owns(ETH, &format!("0x{i}"))).collect());
        assert!(!evaluator
            .evaluate_boolean(&expr, &Did::new("a.bit"), &eth_snapshots())
            .await
            .unwrap());
        assert_eq!(reader.calls.load(Ordering::SeqCst), 12);
        let peak = reader.peak.load(Ordering::SeqCst);
        assert!(peak > 1 && peak <= 5, "peak concurrency {peak}");
    }
}
