//! Rule set management.
//!
//! A watch carries a fixed, declarative set of forwarding rules that are
//! all removed when the watch transitions to `Blocked` (an implicit drop
//! policy upstream of the removed entries stops the traffic) and all
//! reinstalled on the transition back to `Allowed`. Mutations are issued
//! one table entry at a time; prior successes within the set are never
//! rolled back, so the report distinguishes partial application from total
//! failure and the caller decides what to do with its block state.

use std::time::Duration;

use tracing::debug;

use crate::errors::RpcError;
use crate::session::{with_rpc_timeout, SwitchSession};
use crate::types::{BlockState, FlowRule};

/// A fixed collection of forwarding rules toggled together.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    rules: Vec<FlowRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<FlowRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[FlowRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Drive the device's installed rules to match `to`: remove every rule
    /// for `Blocked`, install every rule for `Allowed`.
    ///
    /// All rules in the set are attempted in the same cycle even after a
    /// failure, so one refused entry does not mask the state of the rest.
    /// Each mutation is bounded by `rpc_timeout`.
    pub async fn apply<S: SwitchSession>(
        &self,
        session: &mut S,
        to: BlockState,
        rpc_timeout: Duration,
    ) -> ApplyReport {
        let mut report = ApplyReport::new(to);
        for rule in &self.rules {
            let result = match to {
                BlockState::Blocked => {
                    with_rpc_timeout(rpc_timeout, session.remove_rule(rule)).await
                }
                BlockState::Allowed => {
                    with_rpc_timeout(rpc_timeout, session.install_rule(rule)).await
                }
            };
            match result {
                Ok(()) => {
                    debug!(%rule, target_state = %to, "rule mutation applied");
                    report.applied.push(rule.clone());
                }
                Err(e) => {
                    debug!(%rule, target_state = %to, error = %e, "rule mutation failed");
                    report.failed.push((rule.clone(), e));
                }
            }
        }
        report
    }
}

/// Per-rule outcome of one [`RuleSet::apply`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    /// The block state the set was driven towards.
    pub target: BlockState,
    pub applied: Vec<FlowRule>,
    pub failed: Vec<(FlowRule, RpcError)>,
}

impl ApplyReport {
    fn new(target: BlockState) -> Self {
        Self {
            target,
            applied: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Every mutation in the set went through.
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    /// Some mutations went through and some failed: the device now holds a
    /// mix the block state cannot describe. Logged distinctly from total
    /// failure so an operator can reconcile by hand.
    pub fn is_partial(&self) -> bool {
        !self.applied.is_empty() && !self.failed.is_empty()
    }

    /// Human-readable summary of which rules failed, for error lines.
    pub fn failure_summary(&self) -> String {
        self.failed
            .iter()
            .map(|(rule, err)| format!("{rule}: {err}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use crate::session::sim::{SimConnector, SimFabric, SimSession};
    use crate::session::{DeviceSpec, SwitchConnector};
    use crate::types::MacAddr;

    const RPC_TIMEOUT: Duration = Duration::from_secs(2);

    fn rule(last_octet: u8, port: u32) -> FlowRule {
        FlowRule {
            table_id: 0x2101,
            dst_addr: Ipv4Addr::new(10, 0, last_octet, last_octet),
            prefix_len: 32,
            action_id: 0x3101,
            dst_mac: MacAddr([0x08, 0, 0, 0, last_octet, last_octet]),
            egress_port: port,
        }
    }

    async fn fabric_with_session(rules: &[FlowRule]) -> (SimFabric, SimSession) {
        let fabric = SimFabric::new();
        fabric.add_device(0);
        fabric.preload_rules(0, rules);
        let session = SimConnector::new(fabric.clone())
            .connect(&DeviceSpec {
                name: "s1".into(),
                address: "127.0.0.1:50051".into(),
                device_id: 0,
            })
            .await
            .unwrap();
        (fabric, session)
    }

    #[tokio::test]
    async fn block_then_allow_round_trips_installed_rules() {
        let rules = vec![rule(1, 1), rule(2, 2)];
        let (fabric, mut session) = fabric_with_session(&rules).await;
        let set = RuleSet::new(rules.clone());
        let before = fabric.installed_rules(0);

        let report = set.apply(&mut session, BlockState::Blocked, RPC_TIMEOUT).await;
        assert!(report.succeeded());
        assert!(fabric.installed_rules(0).is_empty());

        let report = set.apply(&mut session, BlockState::Allowed, RPC_TIMEOUT).await;
        assert!(report.succeeded());
        assert_eq!(fabric.installed_rules(0), before);
    }

    #[tokio::test]
    async fn partial_failure_is_reported_per_rule() {
        // Only the first rule is actually installed; removing the second
        // must fail while the first removal sticks.
        let rules = vec![rule(1, 1), rule(2, 2)];
        let (fabric, mut session) = fabric_with_session(&rules[..1]).await;
        let set = RuleSet::new(rules.clone());

        let report = set.apply(&mut session, BlockState::Blocked, RPC_TIMEOUT).await;
        assert!(!report.succeeded());
        assert!(report.is_partial());
        assert_eq!(report.applied, vec![rules[0].clone()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, rules[1]);
        assert!(report.failure_summary().contains("not found"));
        // No rollback of the successful removal.
        assert!(fabric.installed_rules(0).is_empty());
    }

    #[tokio::test]
    async fn total_failure_is_not_partial() {
        let rules = vec![rule(1, 1), rule(2, 2)];
        // Nothing preloaded: every removal is refused.
        let (_fabric, mut session) = fabric_with_session(&[]).await;
        let set = RuleSet::new(rules);

        let report = set.apply(&mut session, BlockState::Blocked, RPC_TIMEOUT).await;
        assert!(!report.succeeded());
        assert!(!report.is_partial());
        assert_eq!(report.failed.len(), 2);
    }

    #[tokio::test]
    async fn empty_rule_set_is_a_no_op() {
        let (_fabric, mut session) = fabric_with_session(&[]).await;
        let set = RuleSet::new(Vec::new());
        assert!(set.is_empty());
        let report = set.apply(&mut session, BlockState::Blocked, RPC_TIMEOUT).await;
        assert!(report.succeeded());
        assert!(report.applied.is_empty());
    }
}
