//! Core data model shared across the control plane.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifies a specific counter instance to sample: the numeric counter id
/// (resolved from its symbolic name by the schema catalog at startup) plus
/// an index within that counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterRef {
    pub counter_id: u32,
    pub index: u64,
}

impl CounterRef {
    pub fn new(counter_id: u32, index: u64) -> Self {
        Self { counter_id, index }
    }
}

/// Result of one sampling cycle over a cumulative counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub counter_old: u64,
    pub counter_new: u64,
    pub window: Duration,
    /// Packets per second over the window, never negative.
    pub rate: f64,
}

impl RateSample {
    /// Derive a rate from two cumulative readings separated by `window`.
    ///
    /// A counter that decreased between reads is evidence of a device reset
    /// (reboot, counter clear), never of negative traffic, so the delta is
    /// clamped to zero.
    pub fn from_readings(counter_old: u64, counter_new: u64, window: Duration) -> Self {
        let delta = counter_new.saturating_sub(counter_old);
        let secs = window.as_secs_f64();
        let rate = if secs > 0.0 { delta as f64 / secs } else { 0.0 };
        Self {
            counter_old,
            counter_new,
            window,
            rate,
        }
    }

    /// Raw packet count over the window (clamped like the rate).
    pub fn delta(&self) -> u64 {
        self.counter_new.saturating_sub(self.counter_old)
    }
}

/// One bit of control-plane memory per (device, watch): whether the watch's
/// forwarding rules are currently removed from the device.
///
/// This must always mirror the actual installed-rule state on the device:
/// it exists precisely so the engine never issues a redundant install or a
/// delete of a nonexistent rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    /// Forwarding rules are installed; traffic flows.
    Allowed,
    /// Forwarding rules have been removed; matched traffic is dropped.
    Blocked,
}

impl BlockState {
    /// Initial state at startup: rules are assumed present on the device.
    pub fn initial() -> Self {
        BlockState::Allowed
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockState::Allowed => write!(f, "allowed"),
            BlockState::Blocked => write!(f, "blocked"),
        }
    }
}

/// A link-layer address used as a forwarding action parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(format!("invalid MAC address: {s}"));
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] =
                u8::from_str_radix(part, 16).map_err(|_| format!("invalid MAC address: {s}"))?;
        }
        Ok(MacAddr(bytes))
    }
}

/// A resolved match-action forwarding rule: exact-length IPv4 destination
/// match, forward action, destination MAC and egress port as parameters.
///
/// All numeric ids come from the schema catalog; the symbolic form lives in
/// configuration only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowRule {
    pub table_id: u32,
    pub dst_addr: Ipv4Addr,
    pub prefix_len: u8,
    pub action_id: u32,
    pub dst_mac: MacAddr,
    pub egress_port: u32,
}

impl fmt::Display for FlowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} -> {} port {}",
            self.dst_addr, self.prefix_len, self.dst_mac, self.egress_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_from_increasing_readings() {
        let s = RateSample::from_readings(100, 250, Duration::from_secs(10));
        assert_eq!(s.delta(), 150);
        assert!((s.rate - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rate_from_equal_readings_is_zero() {
        let s = RateSample::from_readings(100, 100, Duration::from_secs(10));
        assert_eq!(s.rate, 0.0);
    }

    #[test]
    fn counter_regression_clamps_to_zero() {
        // Device reset between reads: new < old must never yield a negative rate.
        let s = RateSample::from_readings(500, 50, Duration::from_secs(10));
        assert_eq!(s.delta(), 0);
        assert_eq!(s.rate, 0.0);
    }

    #[test]
    fn zero_window_does_not_divide_by_zero() {
        let s = RateSample::from_readings(0, 100, Duration::from_secs(0));
        assert_eq!(s.rate, 0.0);
    }

    #[test]
    fn mac_addr_round_trip() {
        let mac: MacAddr = "08:00:00:00:01:11".parse().unwrap();
        assert_eq!(mac.to_string(), "08:00:00:00:01:11");
        assert!("08:00:00:01:11".parse::<MacAddr>().is_err());
        assert!("zz:00:00:00:01:11".parse::<MacAddr>().is_err());
    }
}
