//! Simulated switch fabric.
//!
//! An in-process implementation of the session boundary that keeps per-device
//! counters and installed-rule tables in memory. The demo binary runs the
//! control loop against it, and the test suite uses it to drive every
//! scenario without hardware: counters can be advanced or reset at will and
//! read failures can be injected.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::errors::{Error, Result, RpcError};
use crate::session::{DeviceSpec, SwitchConnector, SwitchSession};
use crate::types::{CounterRef, FlowRule};

/// Per-device operation counters, for assertions and demo summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimDeviceStats {
    pub counter_reads: u64,
    pub installs: u64,
    pub removes: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct SimDevice {
    counters: HashMap<CounterRef, u64>,
    installed: HashSet<FlowRule>,
    /// Whether an open session currently holds primacy.
    primary_claimed: bool,
    /// Pending injected read failures, consumed one per read.
    failing_reads: u32,
    stats: SimDeviceStats,
}

/// Shared state of all simulated devices. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SimFabric {
    devices: Arc<RwLock<HashMap<u64, SimDevice>>>,
}

impl SimFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device so connections to it succeed.
    pub fn add_device(&self, device_id: u64) {
        self.devices
            .write()
            .unwrap()
            .entry(device_id)
            .or_default();
    }

    /// Install rules directly, bypassing the session. Used to establish the
    /// startup invariant that forwarding rules are already present.
    pub fn preload_rules(&self, device_id: u64, rules: &[FlowRule]) {
        let mut devices = self.devices.write().unwrap();
        let device = devices.entry(device_id).or_default();
        for rule in rules {
            device.installed.insert(rule.clone());
        }
    }

    /// Advance a cumulative counter, as traffic through the device would.
    pub fn advance_counter(&self, device_id: u64, counter: CounterRef, packets: u64) {
        let mut devices = self.devices.write().unwrap();
        if let Some(device) = devices.get_mut(&device_id) {
            *device.counters.entry(counter).or_insert(0) += packets;
        }
    }

    /// Clear a counter back to zero, as a device reboot would.
    pub fn reset_counter(&self, device_id: u64, counter: CounterRef) {
        let mut devices = self.devices.write().unwrap();
        if let Some(device) = devices.get_mut(&device_id) {
            device.counters.insert(counter, 0);
        }
    }

    /// Make the next `n` counter reads on this device fail with a transport
    /// error.
    pub fn inject_read_failures(&self, device_id: u64, n: u32) {
        let mut devices = self.devices.write().unwrap();
        if let Some(device) = devices.get_mut(&device_id) {
            device.failing_reads += n;
        }
    }

    /// Snapshot of the rules currently installed on a device.
    pub fn installed_rules(&self, device_id: u64) -> HashSet<FlowRule> {
        self.devices
            .read()
            .unwrap()
            .get(&device_id)
            .map(|d| d.installed.clone())
            .unwrap_or_default()
    }

    pub fn stats(&self, device_id: u64) -> SimDeviceStats {
        self.devices
            .read()
            .unwrap()
            .get(&device_id)
            .map(|d| d.stats)
            .unwrap_or_default()
    }

    pub fn has_primary(&self, device_id: u64) -> bool {
        self.devices
            .read()
            .unwrap()
            .get(&device_id)
            .map(|d| d.primary_claimed)
            .unwrap_or(false)
    }
}

/// Connector producing [`SimSession`]s against a shared fabric.
#[derive(Debug, Clone)]
pub struct SimConnector {
    fabric: SimFabric,
}

impl SimConnector {
    pub fn new(fabric: SimFabric) -> Self {
        Self { fabric }
    }
}

#[async_trait]
impl SwitchConnector for SimConnector {
    type Session = SimSession;

    async fn connect(&self, spec: &DeviceSpec) -> Result<Self::Session> {
        let mut devices = self.fabric.devices.write().unwrap();
        let device = devices.get_mut(&spec.device_id).ok_or_else(|| {
            Error::connection(&spec.name, &spec.address, "no such device in fabric")
        })?;
        if device.primary_claimed {
            return Err(Error::connection(
                &spec.name,
                &spec.address,
                "primacy already held by another controller",
            ));
        }
        device.primary_claimed = true;
        debug!(device = %spec.name, device_id = spec.device_id, "sim session opened, primacy claimed");
        Ok(SimSession {
            fabric: self.fabric.clone(),
            device_id: spec.device_id,
            name: spec.name.clone(),
            open: true,
        })
    }
}

/// One open session against the simulated fabric.
#[derive(Debug)]
pub struct SimSession {
    fabric: SimFabric,
    device_id: u64,
    name: String,
    open: bool,
}

#[async_trait]
impl SwitchSession for SimSession {
    async fn read_counter(&mut self, counter: CounterRef) -> std::result::Result<u64, RpcError> {
        if !self.open {
            return Err(RpcError::SessionClosed);
        }
        let mut devices = self.fabric.devices.write().unwrap();
        let device = devices
            .get_mut(&self.device_id)
            .ok_or_else(|| RpcError::Transport("device vanished".into()))?;
        device.stats.counter_reads += 1;
        if device.failing_reads > 0 {
            device.failing_reads -= 1;
            return Err(RpcError::Transport("injected read failure".into()));
        }
        Ok(device.counters.get(&counter).copied().unwrap_or(0))
    }

    async fn install_rule(&mut self, rule: &FlowRule) -> std::result::Result<(), RpcError> {
        if !self.open {
            return Err(RpcError::SessionClosed);
        }
        let mut devices = self.fabric.devices.write().unwrap();
        let device = devices
            .get_mut(&self.device_id)
            .ok_or_else(|| RpcError::Transport("device vanished".into()))?;
        if !device.installed.insert(rule.clone()) {
            // BMv2 behavior: inserting an existing entry is an error.
            device.stats.rejected += 1;
            return Err(RpcError::Rejected(format!("entry already exists: {rule}")));
        }
        device.stats.installs += 1;
        debug!(device = %self.name, %rule, "sim install");
        Ok(())
    }

    async fn remove_rule(&mut self, rule: &FlowRule) -> std::result::Result<(), RpcError> {
        if !self.open {
            return Err(RpcError::SessionClosed);
        }
        let mut devices = self.fabric.devices.write().unwrap();
        let device = devices
            .get_mut(&self.device_id)
            .ok_or_else(|| RpcError::Transport("device vanished".into()))?;
        if !device.installed.remove(rule) {
            device.stats.rejected += 1;
            return Err(RpcError::Rejected(format!("entry not found: {rule}")));
        }
        device.stats.removes += 1;
        debug!(device = %self.name, %rule, "sim remove");
        Ok(())
    }

    async fn close(&mut self) -> std::result::Result<(), RpcError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let mut devices = self.fabric.devices.write().unwrap();
        if let Some(device) = devices.get_mut(&self.device_id) {
            device.primary_claimed = false;
        }
        debug!(device = %self.name, "sim session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use crate::types::MacAddr;

    fn spec() -> DeviceSpec {
        DeviceSpec {
            name: "s1".into(),
            address: "127.0.0.1:50051".into(),
            device_id: 0,
        }
    }

    fn rule() -> FlowRule {
        FlowRule {
            table_id: 0x2101,
            dst_addr: Ipv4Addr::new(10, 0, 1, 1),
            prefix_len: 32,
            action_id: 0x3101,
            dst_mac: MacAddr([0x08, 0, 0, 0, 1, 0x11]),
            egress_port: 1,
        }
    }

    #[tokio::test]
    async fn connect_claims_and_close_releases_primacy() {
        let fabric = SimFabric::new();
        fabric.add_device(0);
        let connector = SimConnector::new(fabric.clone());

        let mut session = connector.connect(&spec()).await.unwrap();
        assert!(fabric.has_primary(0));
        // A second controller must be refused while primacy is held.
        assert!(connector.connect(&spec()).await.is_err());

        session.close().await.unwrap();
        assert!(!fabric.has_primary(0));
        assert!(connector.connect(&spec()).await.is_ok());
    }

    #[tokio::test]
    async fn connect_to_unknown_device_fails() {
        let connector = SimConnector::new(SimFabric::new());
        assert!(connector.connect(&spec()).await.is_err());
    }

    #[tokio::test]
    async fn counters_advance_and_reset() {
        let fabric = SimFabric::new();
        fabric.add_device(0);
        let mut session = SimConnector::new(fabric.clone()).connect(&spec()).await.unwrap();
        let counter = CounterRef::new(0x1201, 1);

        assert_eq!(session.read_counter(counter).await.unwrap(), 0);
        fabric.advance_counter(0, counter, 150);
        assert_eq!(session.read_counter(counter).await.unwrap(), 150);
        fabric.reset_counter(0, counter);
        assert_eq!(session.read_counter(counter).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_install_and_missing_remove_are_rejected() {
        let fabric = SimFabric::new();
        fabric.add_device(0);
        let mut session = SimConnector::new(fabric.clone()).connect(&spec()).await.unwrap();
        let r = rule();

        session.install_rule(&r).await.unwrap();
        assert!(matches!(
            session.install_rule(&r).await,
            Err(RpcError::Rejected(_))
        ));
        session.remove_rule(&r).await.unwrap();
        assert!(matches!(
            session.remove_rule(&r).await,
            Err(RpcError::Rejected(_))
        ));
        assert_eq!(fabric.stats(0).rejected, 2);
    }

    #[tokio::test]
    async fn injected_read_failures_are_consumed() {
        let fabric = SimFabric::new();
        fabric.add_device(0);
        let mut session = SimConnector::new(fabric.clone()).connect(&spec()).await.unwrap();
        let counter = CounterRef::new(0x1201, 1);

        fabric.inject_read_failures(0, 1);
        assert!(session.read_counter(counter).await.is_err());
        assert!(session.read_counter(counter).await.is_ok());
    }

    #[tokio::test]
    async fn closed_session_refuses_rpcs() {
        let fabric = SimFabric::new();
        fabric.add_device(0);
        let mut session = SimConnector::new(fabric).connect(&spec()).await.unwrap();
        session.close().await.unwrap();
        assert_eq!(
            session.read_counter(CounterRef::new(0x1201, 1)).await,
            Err(RpcError::SessionClosed)
        );
        // close is idempotent
        assert!(session.close().await.is_ok());
    }
}
