//! The polling loop.
//!
//! Every cycle queries nftables, derives the exposed values and writes them
//! into [`ExporterMetrics`]. Any fetch or decode failure ends the loop with
//! an error; there is no per-cycle recovery.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::correlator::correlate;
use crate::enrich::{annotate_with_country, CountryLookup};
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::metrics::{ExporterMetrics, ObjectLabels};
use crate::shell::NftRunner;
use crate::types::CollectionKind;

/// Default time between two collection cycles.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Collector configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Time between the starts of two cycles.
    pub update_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
        }
    }
}

/// Periodically mirrors the nftables state into the metrics registry.
pub struct Collector<R> {
    fetcher: Fetcher<R>,
    metrics: Arc<ExporterMetrics>,
    lookup: Option<Arc<dyn CountryLookup>>,
    config: CollectorConfig,
}

impl<R: NftRunner> Collector<R> {
    pub fn new(
        runner: R,
        metrics: Arc<ExporterMetrics>,
        lookup: Option<Arc<dyn CountryLookup>>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            fetcher: Fetcher::new(runner),
            metrics,
            lookup,
            config,
        }
    }

    pub fn metrics(&self) -> &ExporterMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Runs one collection cycle.
    #[instrument(skip(self))]
    pub async fn collect_once(&self) -> Result<()> {
        let rules = self.fetcher.rules().await?;
        self.metrics.rules.set(rules.len() as f64);
        for counter in correlate(&rules) {
            self.metrics.record_counter(
                &ObjectLabels::from_comment_counter(&counter),
                counter.packets,
                counter.bytes,
            )?;
        }

        let chains = self.fetcher.chains().await?;
        self.metrics.chains.set(chains.len() as f64);

        let counters = self.fetcher.counters().await?;
        debug!(count = counters.len(), "Updating named counters");
        for counter in &counters {
            self.metrics.record_counter(
                &ObjectLabels::from_counter(counter),
                counter.packets,
                counter.bytes,
            )?;
        }

        let lookup = self.lookup.as_deref();
        for kind in CollectionKind::ALL {
            let collections = self.fetcher.collections(kind).await?;
            self.metrics.reconcile_elements(
                kind,
                collections
                    .iter()
                    .flat_map(|collection| annotate_with_country(collection, lookup)),
            )?;
        }

        Ok(())
    }

    /// Collects every `update_interval` until `shutdown` resolves.
    ///
    /// The interval is measured from the start of a cycle. Returns `Ok` on
    /// shutdown and the first cycle error otherwise; a cycle in flight when
    /// `shutdown` resolves is abandoned.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            interval_secs = self.config.update_interval.as_secs(),
            "Starting nftables collection loop"
        );

        loop {
            let started = Instant::now();
            tokio::select! {
                result = self.collect_once() => result?,
                _ = &mut shutdown => break,
            }
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Collection cycle done");

            let remaining = self.config.update_interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = &mut shutdown => break,
            }
        }

        info!("Collection loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExporterError;
    use crate::shell::testing::CannedRunner;
    use crate::types::{Collection, Family, KeyType};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    const EMPTY: &str = r#"{"nftables": [{"metainfo": {"json_schema_version": 1}}]}"#;

    const RULESET: &str = r#"{"nftables": [
        {"metainfo": {"json_schema_version": 1}},
        {"table": {"family": "ip", "name": "filter", "handle": 1}},
        {"chain": {"family": "ip", "table": "filter", "name": "input", "handle": 1}},
        {"chain": {"family": "ip", "table": "filter", "name": "output", "handle": 2}},
        {"rule": {"family": "ip", "table": "filter", "chain": "input", "handle": 4,
                  "comment": "ssh-in",
                  "expr": [{"match": {"op": "==", "left": {"payload": {"protocol": "tcp", "field": "dport"}}, "right": 22}},
                           {"counter": {"packets": 10, "bytes": 640}},
                           {"accept": null}]}},
        {"rule": {"family": "ip", "table": "filter", "chain": "input", "handle": 5,
                  "expr": [{"drop": null}]}}
    ]}"#;

    const COUNTERS: &str = r#"{"nftables": [
        {"metainfo": {"json_schema_version": 1}},
        {"counter": {"family": "inet", "table": "filter", "name": "web", "handle": 2,
                     "packets": 7, "bytes": 420}}
    ]}"#;

    const SETS: &str = r#"{"nftables": [
        {"metainfo": {"json_schema_version": 1}},
        {"set": {"family": "ip", "table": "filter", "name": "peers", "type": "ipv4_addr", "handle": 3}}
    ]}"#;

    fn peers(elements: &[&str]) -> String {
        let elem: Vec<String> = elements.iter().map(|e| format!("\"{e}\"")).collect();
        format!(
            r#"{{"nftables": [
                {{"metainfo": {{"json_schema_version": 1}}}},
                {{"set": {{"family": "ip", "table": "filter", "name": "peers",
                          "type": "ipv4_addr", "handle": 3, "elem": [{}]}}}}
            ]}}"#,
            elem.join(", ")
        )
    }

    fn runner() -> CannedRunner {
        CannedRunner::default()
            .with("ruleset", RULESET)
            .with("counters", COUNTERS)
            .with("maps", EMPTY)
            .with("meters", EMPTY)
            .with("sets", SETS)
            .with("set ip filter peers", &peers(&["1.1.1.1", "8.8.8.8"]))
    }

    struct StaticLookup(HashMap<&'static str, &'static str>);

    impl CountryLookup for StaticLookup {
        fn country_code(&self, address: &str) -> Option<String> {
            self.0.get(address).map(|code| code.to_string())
        }
    }

    fn collector(lookup: Option<Arc<dyn CountryLookup>>) -> Collector<CannedRunner> {
        Collector::new(
            runner(),
            Arc::new(ExporterMetrics::new("nftables").unwrap()),
            lookup,
            CollectorConfig::default(),
        )
    }

    fn peers_labels(country: &str) -> ObjectLabels {
        ObjectLabels::from_collection(&Collection {
            family: Family::Ip,
            table: "filter".to_string(),
            name: "peers".to_string(),
            key_type: KeyType::Single("ipv4_addr".to_string()),
            elem: vec![],
        })
        .with_country(country)
    }

    #[tokio::test]
    async fn test_collect_once_populates_metrics() {
        let collector = collector(None);
        collector.collect_once().await.unwrap();
        let metrics = collector.metrics();

        assert_eq!(metrics.rules.get(), 2.0);
        assert_eq!(metrics.chains.get(), 2.0);

        let ssh = ObjectLabels {
            family: Some("ip".to_string()),
            table: Some("filter".to_string()),
            name: Some("ssh-in".to_string()),
            ..Default::default()
        };
        assert_eq!(metrics.counter_packets.value(&ssh).unwrap(), 10);
        assert_eq!(metrics.counter_bytes.value(&ssh).unwrap(), 640);

        let web = ObjectLabels {
            family: Some("inet".to_string()),
            table: Some("filter".to_string()),
            name: Some("web".to_string()),
            ..Default::default()
        };
        assert_eq!(metrics.counter_packets.value(&web).unwrap(), 7);

        assert_eq!(metrics.set_elements.value(&peers_labels("")), Some(2.0));
        assert_eq!(metrics.map_elements.series_count(), 0);
    }

    #[tokio::test]
    async fn test_collect_once_queries_in_order() {
        let collector = collector(None);
        collector.collect_once().await.unwrap();

        assert_eq!(
            collector.fetcher.runner().calls(),
            vec![
                "ruleset",
                "ruleset",
                "counters",
                "maps",
                "meters",
                "sets",
                "set ip filter peers",
            ]
        );
    }

    #[tokio::test]
    async fn test_collect_once_with_country_lookup() {
        let lookup = StaticLookup(HashMap::from([("1.1.1.1", "AU"), ("8.8.8.8", "US")]));
        let collector = collector(Some(Arc::new(lookup)));
        collector.collect_once().await.unwrap();
        let sets = &collector.metrics().set_elements;

        assert_eq!(sets.value(&peers_labels("AU")), Some(1.0));
        assert_eq!(sets.value(&peers_labels("US")), Some(1.0));
        assert_eq!(sets.value(&peers_labels("")), None);
    }

    #[tokio::test]
    async fn test_vanished_elements_read_zero() {
        let lookup = StaticLookup(HashMap::from([("1.1.1.1", "AU"), ("8.8.8.8", "US")]));
        let collector = collector(Some(Arc::new(lookup)));
        collector.collect_once().await.unwrap();

        collector
            .fetcher
            .runner()
            .set("set ip filter peers", &peers(&["1.1.1.1"]));
        collector.collect_once().await.unwrap();
        let sets = &collector.metrics().set_elements;

        assert_eq!(sets.value(&peers_labels("AU")), Some(1.0));
        assert_eq!(sets.value(&peers_labels("US")), Some(0.0));
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_cycle() {
        let collector = Collector::new(
            CannedRunner::default().with("ruleset", RULESET),
            Arc::new(ExporterMetrics::new("nftables").unwrap()),
            None,
            CollectorConfig::default(),
        );

        let result = collector.collect_once().await;
        assert!(matches!(result, Err(ExporterError::CommandFailed { .. })));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let collector = collector(None);
        collector.run(async {}).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_repeats_every_interval() {
        let collector = collector(None);
        let shutdown = tokio::time::sleep(Duration::from_secs(150));

        collector.run(shutdown).await.unwrap();

        // Cycles at 0s, 60s and 120s.
        let rulesets = collector
            .fetcher
            .runner()
            .calls()
            .iter()
            .filter(|call| call.as_str() == "ruleset")
            .count();
        assert_eq!(rulesets, 6);
    }

    #[tokio::test]
    async fn test_run_propagates_cycle_error() {
        let collector = Collector::new(
            CannedRunner::default(),
            Arc::new(ExporterMetrics::new("nftables").unwrap()),
            None,
            CollectorConfig::default(),
        );

        let result = collector.run(std::future::pending()).await;
        assert!(result.is_err());
    }
}
