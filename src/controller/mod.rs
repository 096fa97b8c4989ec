//! The control loop.
//!
//! Owns every managed device for the lifetime of the run and drives the
//! cycle: sample → evaluate → on a transition, apply the rule set and flip
//! the block state. Devices are processed sequentially on one task, so the
//! true per-device cadence is `devices × (window + RPC latency)`. The
//! trade-off buys the absence of locking anywhere: each device's
//! session and block states are owned here exclusively, and a cycle's rule
//! mutation always completes or definitively fails before the next cycle
//! evaluates.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, ControllerSettings, DeviceConfig};
use crate::errors::{Error, Result};
use crate::logging::targets;
use crate::metrics::ControllerMetrics;
use crate::policy;
use crate::rules::RuleSet;
use crate::sampler;
use crate::schema::SchemaCatalog;
use crate::session::{DeviceSpec, SwitchConnector, SwitchSession};
use crate::types::{BlockState, CounterRef, FlowRule};

/// Cooperative shutdown handle. Cloned into the signal-handler task and the
/// control loop; `request` interrupts an in-progress averaging-window sleep
/// promptly.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn request(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives inside self, so changed() cannot fail here.
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Spawn the dedicated signal-handler task (SIGINT, plus SIGTERM on unix)
/// that trips the shutdown handle.
pub fn spawn_signal_listener(shutdown: Shutdown) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("shutdown signal received (SIGINT)");
                        }
                        _ = sigterm.recv() => {
                            info!("shutdown signal received (SIGTERM)");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to register SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("shutdown signal received (SIGINT)");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received (SIGINT)");
        }

        shutdown.request();
    });
}

/// One (counter, threshold, rule set) tuple under watch, with the single
/// bit of control-plane memory it owns.
#[derive(Debug)]
pub struct CounterWatch {
    pub counter_name: String,
    pub counter: CounterRef,
    pub threshold: f64,
    pub rules: RuleSet,
    pub state: BlockState,
}

struct ManagedDevice<S> {
    spec: DeviceSpec,
    session: S,
    watches: Vec<CounterWatch>,
}

/// Loop timing, derived from [`ControllerSettings`].
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub window: Duration,
    pub rpc_timeout: Duration,
}

impl From<&ControllerSettings> for LoopSettings {
    fn from(s: &ControllerSettings) -> Self {
        Self {
            window: Duration::from_secs(s.window_secs),
            rpc_timeout: Duration::from_millis(s.rpc_timeout_ms),
        }
    }
}

/// The control-plane agent: every configured device, connected and under
/// primacy, plus the loop that watches them.
pub struct Controller<C: SwitchConnector> {
    settings: LoopSettings,
    devices: Vec<ManagedDevice<C::Session>>,
    metrics: Arc<ControllerMetrics>,
    shutdown: Shutdown,
}

impl<C: SwitchConnector> Controller<C> {
    /// Resolve the configuration through the schema catalog and connect
    /// every device, claiming primacy. Any failure is fatal: sessions
    /// opened so far are closed and the error propagates.
    pub async fn connect_all(
        connector: &C,
        config: &AppConfig,
        catalog: &SchemaCatalog,
        metrics: Arc<ControllerMetrics>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let settings = LoopSettings::from(&config.controller);
        let mut devices: Vec<ManagedDevice<C::Session>> = Vec::new();

        for device_config in &config.devices {
            let watches = resolve_watches(device_config, catalog)?;
            let spec = device_config.spec();
            match connector.connect(&spec).await {
                Ok(session) => {
                    info!(
                        target: targets::SESSION,
                        device = %spec.name,
                        address = %spec.address,
                        device_id = spec.device_id,
                        watches = watches.len(),
                        "device connected, primacy established"
                    );
                    devices.push(ManagedDevice {
                        spec,
                        session,
                        watches,
                    });
                }
                Err(e) => {
                    error!(
                        target: targets::SESSION,
                        device = %spec.name,
                        address = %spec.address,
                        error = %e,
                        "device connection failed; aborting startup"
                    );
                    for device in &mut devices {
                        if let Err(close_err) = device.session.close().await {
                            warn!(device = %device.spec.name, error = %close_err, "close during abort failed");
                        }
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            settings,
            devices,
            metrics,
            shutdown,
        })
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run cycles until shutdown is requested, then close every session.
    ///
    /// Per cycle, per device, per watch: sample across the averaging
    /// window, evaluate against the threshold, and on a transition drive
    /// the rule set to the new state. A failed counter read abandons that
    /// watch's cycle; a failed or partial rule application leaves the block
    /// state unchanged so the next cycle re-issues the transition.
    pub async fn run(mut self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let settings = self.settings;

        info!(
            target: targets::CONTROLLER,
            devices = self.devices.len(),
            window_secs = settings.window.as_secs(),
            rpc_timeout_ms = settings.rpc_timeout.as_millis() as u64,
            "control loop running"
        );

        'run: while !shutdown.is_requested() {
            self.metrics.record_cycle();

            for device in &mut self.devices {
                let ManagedDevice {
                    spec,
                    session,
                    watches,
                } = device;

                for watch in watches.iter_mut() {
                    // The sleep inside sample() is where most of a cycle is
                    // spent; racing it against the shutdown handle keeps
                    // cancellation prompt.
                    let sampled = tokio::select! {
                        _ = shutdown.wait() => break 'run,
                        s = sampler::sample(session, watch.counter, settings.window, settings.rpc_timeout) => s,
                    };

                    let sample = match sampled {
                        Ok(s) => {
                            self.metrics.record_sample();
                            s
                        }
                        Err(e) => {
                            self.metrics.record_counter_read_error();
                            warn!(
                                target: targets::SESSION,
                                device = %spec.name,
                                counter = %watch.counter_name,
                                error = %e,
                                "counter read failed; cycle abandoned for this watch"
                            );
                            continue;
                        }
                    };

                    let decision = policy::evaluate(sample.rate, watch.threshold, watch.state);
                    if !decision.transitioned {
                        debug!(
                            target: targets::POLICY,
                            device = %spec.name,
                            counter = %watch.counter_name,
                            rate = sample.rate,
                            threshold = watch.threshold,
                            state = %watch.state,
                            "no transition"
                        );
                        continue;
                    }

                    // Once shutdown is requested no further rules are
                    // installed or removed.
                    if shutdown.is_requested() {
                        break 'run;
                    }

                    let report = watch
                        .rules
                        .apply(session, decision.next, settings.rpc_timeout)
                        .await;

                    if report.succeeded() {
                        watch.state = decision.next;
                        match decision.next {
                            BlockState::Blocked => {
                                self.metrics.record_transition_to_blocked();
                                info!(
                                    target: targets::POLICY,
                                    device = %spec.name,
                                    counter = %watch.counter_name,
                                    rate = sample.rate,
                                    threshold = watch.threshold,
                                    rules_removed = report.applied.len(),
                                    "rate above threshold; traffic blocked"
                                );
                            }
                            BlockState::Allowed => {
                                self.metrics.record_transition_to_allowed();
                                info!(
                                    target: targets::POLICY,
                                    device = %spec.name,
                                    counter = %watch.counter_name,
                                    rate = sample.rate,
                                    threshold = watch.threshold,
                                    rules_installed = report.applied.len(),
                                    "rate back under threshold; traffic allowed"
                                );
                            }
                        }
                    } else {
                        // Block state stays put: it must keep matching what
                        // is actually on the device, and the next cycle
                        // will re-issue the transition.
                        self.metrics.record_rule_mutation_failure();
                        if report.is_partial() {
                            error!(
                                target: targets::RULES,
                                device = %spec.name,
                                target_state = %report.target,
                                applied = report.applied.len(),
                                failed = %report.failure_summary(),
                                "rule set partially applied; block state unchanged"
                            );
                        } else {
                            error!(
                                target: targets::RULES,
                                device = %spec.name,
                                target_state = %report.target,
                                failed = %report.failure_summary(),
                                "rule set application failed; block state unchanged"
                            );
                        }
                    }
                }
            }
        }

        info!(target: targets::CONTROLLER, "shutting down; closing device sessions");
        self.close_all().await;
        Ok(())
    }

    async fn close_all(&mut self) {
        for device in &mut self.devices {
            match device.session.close().await {
                Ok(()) => debug!(target: targets::SESSION, device = %device.spec.name, "session closed"),
                Err(e) => {
                    warn!(target: targets::SESSION, device = %device.spec.name, error = %e, "session close failed")
                }
            }
        }
    }
}

/// Resolve one device's symbolic watch configuration into numeric form.
/// Performed once per symbolic reference, at startup.
pub fn resolve_watches(
    config: &DeviceConfig,
    catalog: &SchemaCatalog,
) -> Result<Vec<CounterWatch>> {
    config
        .watches
        .iter()
        .map(|watch| {
            let counter = CounterRef::new(catalog.counter_id(&watch.counter)?, watch.index);
            let rules = watch
                .rules
                .iter()
                .map(|rule| {
                    Ok(FlowRule {
                        table_id: catalog.table_id(&rule.table)?,
                        dst_addr: rule.dst_addr,
                        prefix_len: rule.prefix_len,
                        action_id: catalog.action_id(&rule.action)?,
                        dst_mac: rule.dst_mac.parse().map_err(Error::Config)?,
                        egress_port: rule.port,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(CounterWatch {
                counter_name: watch.counter.clone(),
                counter,
                threshold: watch.threshold,
                rules: RuleSet::new(rules),
                state: BlockState::initial(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RuleConfig, WatchConfig};
    use crate::schema::sim_catalog;

    fn device_config() -> DeviceConfig {
        DeviceConfig {
            name: "s1".into(),
            address: "127.0.0.1:50051".into(),
            device_id: 0,
            watches: vec![WatchConfig {
                counter: "MyIngress.icmp_counter".into(),
                index: 1,
                threshold: 10.0,
                rules: vec![RuleConfig {
                    table: "MyIngress.ipv4_lpm".into(),
                    action: "MyIngress.ipv4_forward".into(),
                    dst_addr: "10.0.1.1".parse().unwrap(),
                    prefix_len: 32,
                    dst_mac: "08:00:00:00:01:11".into(),
                    port: 1,
                }],
            }],
        }
    }

    #[test]
    fn watches_resolve_against_catalog() {
        let watches = resolve_watches(&device_config(), &sim_catalog()).unwrap();
        assert_eq!(watches.len(), 1);
        let watch = &watches[0];
        assert_eq!(watch.counter, CounterRef::new(0x1201, 1));
        assert_eq!(watch.state, BlockState::Allowed);
        assert_eq!(watch.rules.len(), 1);
        assert_eq!(watch.rules.rules()[0].table_id, 0x2101);
        assert_eq!(watch.rules.rules()[0].action_id, 0x3101);
    }

    #[test]
    fn unknown_counter_fails_resolution() {
        let mut config = device_config();
        config.watches[0].counter = "MyIngress.nope".into();
        assert!(resolve_watches(&config, &sim_catalog()).is_err());
    }

    #[tokio::test]
    async fn shutdown_wait_resolves_after_request() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        shutdown.request();
        handle.await.unwrap();
        assert!(shutdown.is_requested());
    }

    #[tokio::test]
    async fn shutdown_wait_returns_immediately_when_already_requested() {
        let shutdown = Shutdown::new();
        shutdown.request();
        shutdown.wait().await;
    }
}
