//! Runs scheduled checks in the background.
//!
//! Each check gets its own task. Start times are spread over a window that
//! grows with the number of checks so a large check list does not probe the
//! network in bursts.

use crate::checkers::Checker;
use crate::dispatch::do_check;
use crate::metrics::MetricsRegistry;
use crate::types::ConnectivityCheck;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Start window per configured check.
pub const JITTER_PER_CHECK: Duration = Duration::from_secs(10);

/// Start one task per check with a random initial delay in
/// `[0, 10s × checks.len())`.
pub fn start_checks(
    checks: Vec<ConnectivityCheck>,
    checker: Arc<dyn Checker>,
    metrics: Arc<MetricsRegistry>,
    token: CancellationToken,
) -> Vec<JoinHandle<()>> {
    start_checks_with_jitter(checks, checker, metrics, token, |bound| {
        if bound.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..bound)
        }
    })
}

/// Like [`start_checks`], with `jitter` picking each initial delay from
/// the bound it is handed.
pub fn start_checks_with_jitter<F>(
    checks: Vec<ConnectivityCheck>,
    checker: Arc<dyn Checker>,
    metrics: Arc<MetricsRegistry>,
    token: CancellationToken,
    jitter: F,
) -> Vec<JoinHandle<()>>
where
    F: Fn(Duration) -> Duration,
{
    let bound = JITTER_PER_CHECK * checks.len() as u32;

    checks
        .into_iter()
        .map(|check| {
            let delay = jitter(bound);
            debug!(check = %check, delay_ms = delay.as_millis() as u64, "Scheduling check");
            tokio::spawn(run_check(
                check,
                checker.clone(),
                metrics.clone(),
                token.clone(),
                delay,
            ))
        })
        .collect()
}

/// Run one check every `check.interval` until the token is cancelled.
///
/// The first run happens after `delay`. Runs never overlap: the ticks
/// missed while a measurement overruns its period collapse into a single
/// immediate run, after which the ticker is back on its grid.
///
/// A check without a valid interval is logged and never run.
pub async fn run_check(
    check: ConnectivityCheck,
    checker: Arc<dyn Checker>,
    metrics: Arc<MetricsRegistry>,
    token: CancellationToken,
    delay: Duration,
) {
    if let Err(e) = check.validate_scheduled() {
        warn!(check = %check, error = %e, "Not scheduling invalid check");
        return;
    }

    tokio::select! {
        _ = token.cancelled() => return,
        _ = sleep(delay) => {}
    }

    let mut ticker = interval(check.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        info!(check = %check, "Running connectivity check");
        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = do_check(&check, checker.as_ref()) => result,
        };

        match result {
            Ok(observations) => metrics.record(&observations),
            Err(e) => {
                warn!(check = %check, error = %e, "Connectivity check failed");
                metrics.record_check_failure(&check);
            }
        }
    }

    debug!(check = %check, "Check stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::sample_value;
    use crate::resolver::{MockResolver, Resolver};
    use crate::types::{AddressFamily, PingStats, TransferStats};
    use async_trait::async_trait;
    use common::{Error, Result};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChecker {
        resolver: MockResolver,
        pings: AtomicUsize,
        ping_time: Duration,
    }

    impl CountingChecker {
        fn new(ping_time: Duration) -> Arc<Self> {
            let mut resolver = MockResolver::new();
            resolver
                .expect_lookup_ip()
                .returning(|_, _| Ok(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]));
            Arc::new(Self {
                resolver,
                pings: AtomicUsize::new(0),
                ping_time,
            })
        }

        fn pings(&self) -> usize {
            self.pings.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Checker for CountingChecker {
        async fn ping(&self, _: AddressFamily, _: IpAddr, _: bool) -> Result<PingStats> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            sleep(self.ping_time).await;
            Ok(PingStats::from_rtts(1, &[Duration::from_millis(5)]))
        }

        async fn connect(&self, _: AddressFamily, _: IpAddr, _: u16) -> Result<Duration> {
            Err(Error::measurement("connection refused"))
        }

        async fn transfer(&self, _: AddressFamily, _: IpAddr, _: u16) -> Result<TransferStats> {
            Err(Error::measurement("connection refused"))
        }

        fn resolver(&self) -> &dyn Resolver {
            &self.resolver
        }
    }

    fn ping_check(host: &str) -> ConnectivityCheck {
        ConnectivityCheck::from_flag(&format!("kind=ping,host={host},interval=10s")).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_interval_after_delay() {
        let checker = CountingChecker::new(Duration::ZERO);
        let metrics = Arc::new(MetricsRegistry::new());
        let token = CancellationToken::new();

        let handle = tokio::spawn(run_check(
            ping_check("localhost"),
            checker.clone(),
            metrics.clone(),
            token.clone(),
            Duration::from_secs(5),
        ));

        sleep(Duration::from_secs(4)).await;
        assert_eq!(checker.pings(), 0);

        // First run right after the delay, then every 10s.
        sleep(Duration::from_secs(2)).await;
        assert_eq!(checker.pings(), 1);
        sleep(Duration::from_secs(20)).await;
        assert_eq!(checker.pings(), 3);

        token.cancel();
        handle.await.unwrap();

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"connectivity_host_rtt{af="ip4",host="localhost"}"#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_skips_missed_ticks() {
        // Each run takes 25s against a 10s interval.
        let checker = CountingChecker::new(Duration::from_secs(25));
        let token = CancellationToken::new();

        let handle = tokio::spawn(run_check(
            ping_check("slow"),
            checker.clone(),
            Arc::new(MetricsRegistry::new()),
            token.clone(),
            Duration::ZERO,
        ));

        // The ticks missed during a run collapse into one, so runs start
        // at 0s, 25s and 50s instead of piling up.
        sleep(Duration::from_secs(1)).await;
        assert_eq!(checker.pings(), 1);
        sleep(Duration::from_secs(23)).await;
        assert_eq!(checker.pings(), 1);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(checker.pings(), 2);
        sleep(Duration::from_secs(25)).await;
        assert_eq!(checker.pings(), 3);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay() {
        let checker = CountingChecker::new(Duration::ZERO);
        let token = CancellationToken::new();

        let handle = tokio::spawn(run_check(
            ping_check("localhost"),
            checker.clone(),
            Arc::new(MetricsRegistry::new()),
            token.clone(),
            Duration::from_secs(3600),
        ));

        token.cancel();
        handle.await.unwrap();
        assert_eq!(checker.pings(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_inflight_measurement() {
        let checker = CountingChecker::new(Duration::from_secs(3600));
        let token = CancellationToken::new();

        let handle = tokio::spawn(run_check(
            ping_check("localhost"),
            checker.clone(),
            Arc::new(MetricsRegistry::new()),
            token.clone(),
            Duration::ZERO,
        ));

        sleep(Duration::from_secs(1)).await;
        assert_eq!(checker.pings(), 1);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_increments_counter() {
        let mut checker = CountingChecker::new(Duration::ZERO);
        Arc::get_mut(&mut checker)
            .unwrap()
            .resolver
            .expect_lookup_port()
            .returning(|_, _| Ok(5432));
        let metrics = Arc::new(MetricsRegistry::new());
        let token = CancellationToken::new();
        let check =
            ConnectivityCheck::from_flag("kind=connect,host=db,service=5432,interval=1m").unwrap();

        let handle = tokio::spawn(run_check(
            check,
            checker.clone(),
            metrics.clone(),
            token.clone(),
            Duration::ZERO,
        ));

        sleep(Duration::from_secs(1)).await;
        token.cancel();
        handle.await.unwrap();
        assert_eq!(checker.pings(), 0);

        let text = metrics.encode().unwrap();
        assert_eq!(
            sample_value(
                &text,
                r#"connectivity_check_failures_total{af="ip",host="db",service="5432",kind="connect"}"#
            ),
            Some(1.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_bound_scales_with_check_count() {
        let bounds = Arc::new(Mutex::new(Vec::new()));
        let seen = bounds.clone();
        let checks = vec![ping_check("a"), ping_check("b"), ping_check("c")];
        let token = CancellationToken::new();

        let handles = start_checks_with_jitter(
            checks,
            CountingChecker::new(Duration::ZERO),
            Arc::new(MetricsRegistry::new()),
            token.clone(),
            move |bound| {
                seen.lock().unwrap().push(bound);
                Duration::ZERO
            },
        );
        assert_eq!(handles.len(), 3);
        assert_eq!(*bounds.lock().unwrap(), vec![Duration::from_secs(30); 3]);

        token.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_check_is_not_run() {
        let checker = CountingChecker::new(Duration::ZERO);
        let metrics = Arc::new(MetricsRegistry::new());
        let check = ConnectivityCheck::on_demand("ping", None, Some("a"), None).unwrap();
        assert!(check.interval.is_zero());

        let handles = start_checks_with_jitter(
            vec![check, ping_check("b")],
            checker.clone(),
            metrics.clone(),
            CancellationToken::new(),
            |_| Duration::ZERO,
        );

        // The invalid check's task ends on its own; the valid one keeps going.
        let mut handles = handles.into_iter();
        let invalid = handles.next().unwrap();
        invalid.await.unwrap();

        sleep(Duration::from_secs(25)).await;
        assert_eq!(checker.pings(), 3);

        let text = metrics.encode().unwrap();
        assert!(!text.contains(r#"host="a""#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_delay_within_bound() {
        let checker = CountingChecker::new(Duration::ZERO);
        let token = CancellationToken::new();

        let handles = start_checks(
            vec![ping_check("a"), ping_check("b")],
            checker.clone(),
            Arc::new(MetricsRegistry::new()),
            token.clone(),
        );

        // Every task has run once by the end of the 20s window.
        sleep(Duration::from_secs(20)).await;
        assert!(checker.pings() >= 2);

        token.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
