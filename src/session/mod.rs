//! Device session boundary.
//!
//! The control plane only ever talks to a switch through [`SwitchSession`],
//! and only obtains sessions through [`SwitchConnector`]. The real
//! P4Runtime/gRPC transport lives behind these traits as an external
//! collaborator; the crate ships [`sim`], an in-process fabric implementing
//! the same boundary, for the demo binary and the test suite.

pub mod sim;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, RpcError};
use crate::types::{CounterRef, FlowRule};

/// Identity of a managed forwarding element, as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Symbolic name used in logs ("s1", "edge-fw-2", ...).
    pub name: String,
    /// Transport address, e.g. "127.0.0.1:50051".
    pub address: String,
    /// Numeric device id the protocol requires.
    pub device_id: u64,
}

/// An open, primary-controller session to one switch.
///
/// Every call is a network round trip. The session holds primary-controller
/// status from the moment the connector returns it; without primacy the
/// device would reject writes. Callers guarantee they never install a rule
/// that is already present nor remove one that is absent (the block-state
/// bookkeeping upstream is the source of truth); a backend may surface such
/// duplicates as a non-fatal [`RpcError::Rejected`].
#[async_trait]
pub trait SwitchSession: Send {
    /// Read the cumulative packet count of one counter instance.
    async fn read_counter(&mut self, counter: CounterRef) -> std::result::Result<u64, RpcError>;

    /// Install one forwarding rule.
    async fn install_rule(&mut self, rule: &FlowRule) -> std::result::Result<(), RpcError>;

    /// Remove one forwarding rule.
    async fn remove_rule(&mut self, rule: &FlowRule) -> std::result::Result<(), RpcError>;

    /// Release primacy and close the session. Idempotent.
    async fn close(&mut self) -> std::result::Result<(), RpcError>;
}

/// Factory for sessions: connects to a device and claims primary-controller
/// status in one step. Any failure here is fatal at startup.
#[async_trait]
pub trait SwitchConnector: Send + Sync {
    type Session: SwitchSession;

    async fn connect(&self, spec: &DeviceSpec) -> Result<Self::Session>;
}

/// Bound an RPC future with a deadline. An unbounded RPC hang would stall
/// the whole control loop, so every session call the loop makes goes
/// through here.
pub async fn with_rpc_timeout<T, F>(
    timeout: Duration,
    rpc: F,
) -> std::result::Result<T, RpcError>
where
    F: Future<Output = std::result::Result<T, RpcError>>,
{
    match tokio::time::timeout(timeout, rpc).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rpc_timeout_passes_through_results() {
        let ok = with_rpc_timeout(Duration::from_secs(1), async { Ok(7u64) }).await;
        assert_eq!(ok, Ok(7));

        let err = with_rpc_timeout::<u64, _>(Duration::from_secs(1), async {
            Err(RpcError::Transport("boom".into()))
        })
        .await;
        assert_eq!(err, Err(RpcError::Transport("boom".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn rpc_timeout_fires_on_hang() {
        let hung = with_rpc_timeout::<u64, _>(Duration::from_millis(250), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(0)
        })
        .await;
        assert_eq!(hung, Err(RpcError::Timeout { timeout_ms: 250 }));
    }
}
