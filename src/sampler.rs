//! Rate sampling over cumulative device counters.
//!
//! One sample is two counter reads separated by the configured averaging
//! window: read, sleep the window, read again, divide the (clamped)
//! difference by the window. The sleep is a deliberate pause, not a busy
//! poll; sampling a device blocks its task for the full window.

use std::time::Duration;

use tracing::trace;

use crate::errors::RpcError;
use crate::session::{with_rpc_timeout, SwitchSession};
use crate::types::{CounterRef, RateSample};

/// Sample one counter instance across the averaging window.
///
/// Both reads are bounded by `rpc_timeout`. A counter regression between
/// the reads clamps to rate 0 (see [`RateSample::from_readings`]).
pub async fn sample<S: SwitchSession>(
    session: &mut S,
    counter: CounterRef,
    window: Duration,
    rpc_timeout: Duration,
) -> Result<RateSample, RpcError> {
    let counter_old = with_rpc_timeout(rpc_timeout, session.read_counter(counter)).await?;
    tokio::time::sleep(window).await;
    let counter_new = with_rpc_timeout(rpc_timeout, session.read_counter(counter)).await?;

    let sample = RateSample::from_readings(counter_old, counter_new, window);
    trace!(
        counter_id = counter.counter_id,
        index = counter.index,
        counter_old,
        counter_new,
        rate = sample.rate,
        "sampled counter"
    );
    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::sim::{SimConnector, SimFabric};
    use crate::session::{DeviceSpec, SwitchConnector};

    const WINDOW: Duration = Duration::from_secs(10);
    const RPC_TIMEOUT: Duration = Duration::from_secs(2);

    fn spec() -> DeviceSpec {
        DeviceSpec {
            name: "s1".into(),
            address: "127.0.0.1:50051".into(),
            device_id: 0,
        }
    }

    async fn session_on(fabric: &SimFabric) -> crate::session::sim::SimSession {
        fabric.add_device(0);
        SimConnector::new(fabric.clone())
            .connect(&spec())
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn rate_over_growing_counter() {
        let fabric = SimFabric::new();
        let mut session = session_on(&fabric).await;
        let counter = CounterRef::new(0x1201, 1);
        fabric.advance_counter(0, counter, 100);

        // Mid-window the device sees another 150 packets.
        let pump = fabric.clone();
        tokio::spawn(async move {
            tokio::time::sleep(WINDOW / 2).await;
            pump.advance_counter(0, counter, 150);
        });

        let s = sample(&mut session, counter, WINDOW, RPC_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(s.counter_old, 100);
        assert_eq!(s.counter_new, 250);
        assert!((s.rate - 15.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_counter_samples_zero_rate() {
        let fabric = SimFabric::new();
        let mut session = session_on(&fabric).await;
        let counter = CounterRef::new(0x1201, 1);
        fabric.advance_counter(0, counter, 100);

        let s = sample(&mut session, counter, WINDOW, RPC_TIMEOUT)
            .await
            .unwrap();
        assert_eq!((s.counter_old, s.counter_new), (100, 100));
        assert_eq!(s.rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn counter_reset_mid_window_clamps_to_zero() {
        let fabric = SimFabric::new();
        let mut session = session_on(&fabric).await;
        let counter = CounterRef::new(0x1201, 1);
        fabric.advance_counter(0, counter, 500);

        let pump = fabric.clone();
        tokio::spawn(async move {
            tokio::time::sleep(WINDOW / 2).await;
            // Device reboot: counter restarts from zero, then counts 50.
            pump.reset_counter(0, counter);
            pump.advance_counter(0, counter, 50);
        });

        let s = sample(&mut session, counter, WINDOW, RPC_TIMEOUT)
            .await
            .unwrap();
        assert_eq!((s.counter_old, s.counter_new), (500, 50));
        assert_eq!(s.rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn read_failure_propagates() {
        let fabric = SimFabric::new();
        let mut session = session_on(&fabric).await;
        let counter = CounterRef::new(0x1201, 1);

        fabric.inject_read_failures(0, 1);
        let err = sample(&mut session, counter, WINDOW, RPC_TIMEOUT).await;
        assert!(matches!(err, Err(RpcError::Transport(_))));
    }
}
