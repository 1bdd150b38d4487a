//! Prometheus metrics for nftables state.
//!
//! Every series declares its labels from a closed set of object attributes
//! ([`Label`]). Observations carry all attributes of the object they come
//! from ([`ObjectLabels`]) and are projected onto the declared labels when
//! written, so attributes a metric does not declare never become part of the
//! series identity.
//!
//! Element counts of sets, maps and meters are reconciled every cycle: all
//! series seen so far are reset to zero and the new snapshot repopulates the
//! ones that still exist. A collection that disappears therefore reads 0,
//! not its last value. Rule and counter series are only ever overwritten.

use parking_lot::Mutex;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::correlator::CommentCounter;
use crate::error::{ExporterError, Result};
use crate::types::{Collection, CollectionKind, CounterObject};

/// Default metric namespace.
pub const DEFAULT_NAMESPACE: &str = "nftables";

/// Attributes that may become labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Family,
    Table,
    Name,
    Type,
    Country,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Family => "family",
            Label::Table => "table",
            Label::Name => "name",
            Label::Type => "type",
            Label::Country => "country",
        }
    }
}

/// Labels of the named-counter series.
pub const COUNTER_LABELS: &[Label] = &[Label::Family, Label::Table, Label::Name];

/// Labels of the element-count series.
pub const ELEMENT_LABELS: &[Label] = &[
    Label::Family,
    Label::Table,
    Label::Name,
    Label::Type,
    Label::Country,
];

/// Attributes of an observed object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectLabels {
    pub family: Option<String>,
    pub table: Option<String>,
    pub name: Option<String>,
    pub comment: Option<String>,
    pub key_type: Option<String>,
    pub country: Option<String>,
}

impl ObjectLabels {
    pub fn from_collection(collection: &Collection) -> Self {
        Self {
            family: Some(collection.family.to_string()),
            table: Some(collection.table.clone()),
            name: Some(collection.name.clone()),
            key_type: Some(collection.key_type.to_string()),
            ..Self::default()
        }
    }

    pub fn from_counter(counter: &CounterObject) -> Self {
        Self {
            family: Some(counter.family.to_string()),
            table: Some(counter.table.clone()),
            name: Some(counter.name.clone()),
            comment: counter.comment.clone(),
            ..Self::default()
        }
    }

    /// Rules have no name; only the comment identifies them.
    pub fn from_comment_counter(counter: &CommentCounter) -> Self {
        Self {
            family: Some(counter.family.to_string()),
            table: Some(counter.table.clone()),
            comment: Some(counter.comment.clone()),
            ..Self::default()
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn get(&self, label: Label) -> Option<&str> {
        match label {
            Label::Family => self.family.as_deref(),
            Label::Table => self.table.as_deref(),
            Label::Name => self.name.as_deref(),
            Label::Type => self.key_type.as_deref(),
            Label::Country => self.country.as_deref(),
        }
    }

    /// Projects onto `labels`, in declaration order.
    fn project(&self, metric: &str, labels: &[Label]) -> Result<Vec<String>> {
        labels
            .iter()
            .map(|&label| {
                self.get(label)
                    .map(str::to_string)
                    .ok_or_else(|| ExporterError::MissingLabel {
                        metric: metric.to_string(),
                        label: label.as_str(),
                    })
            })
            .collect()
    }

    /// Like [`project`](Self::project), with the comment standing in for a
    /// missing name.
    fn project_identity(&self, metric: &str, labels: &[Label]) -> Result<Vec<String>> {
        if self.name.is_some() {
            return self.project(metric, labels);
        }
        match &self.comment {
            Some(comment) => Self {
                name: Some(comment.clone()),
                ..self.clone()
            }
            .project(metric, labels),
            None => Err(ExporterError::MissingIdentity {
                metric: metric.to_string(),
                family: self.family.clone().unwrap_or_default(),
                table: self.table.clone().unwrap_or_default(),
            }),
        }
    }
}

fn full_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}_{name}")
    }
}

fn label_names(labels: &[Label]) -> Vec<&'static str> {
    labels.iter().map(Label::as_str).collect()
}

/// Gauge family with reset-then-repopulate reconciliation.
pub struct ReconciledGauge {
    name: String,
    labels: &'static [Label],
    gauges: GaugeVec,
    tracked: Mutex<BTreeSet<Vec<String>>>,
}

impl ReconciledGauge {
    fn new(
        registry: &Registry,
        namespace: &str,
        name: &str,
        help: &str,
        labels: &'static [Label],
    ) -> Result<Self> {
        let gauges = GaugeVec::new(
            Opts::new(name, help).namespace(namespace),
            &label_names(labels),
        )?;
        registry.register(Box::new(gauges.clone()))?;

        Ok(Self {
            name: full_name(namespace, name),
            labels,
            gauges,
            tracked: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writes the series identified by the projection of `labels`.
    pub fn set(&self, labels: &ObjectLabels, value: f64) -> Result<()> {
        let values = labels.project(&self.name, self.labels)?;
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        self.gauges.with_label_values(&refs).set(value);
        self.tracked.lock().insert(values);
        Ok(())
    }

    /// Pins every series written so far to zero.
    pub fn reset_all(&self) {
        for values in self.tracked.lock().iter() {
            let refs: Vec<&str> = values.iter().map(String::as_str).collect();
            self.gauges.with_label_values(&refs).set(0.0);
        }
    }

    /// Current value of a series, `None` if it was never written.
    pub fn value(&self, labels: &ObjectLabels) -> Option<f64> {
        let values = labels.project(&self.name, self.labels).ok()?;
        if !self.tracked.lock().contains(&values) {
            return None;
        }
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        Some(self.gauges.with_label_values(&refs).get())
    }

    /// Number of series written so far.
    pub fn series_count(&self) -> usize {
        self.tracked.lock().len()
    }
}

/// Counter family whose values are copied from nftables.
///
/// nftables owns the count; the series is moved to the reported value
/// rather than incremented by events. A value that went backwards (counter
/// reset with `nft reset counters`) restarts the series.
pub struct SourceCounter {
    name: String,
    counters: IntCounterVec,
}

impl SourceCounter {
    fn new(registry: &Registry, namespace: &str, name: &str, help: &str) -> Result<Self> {
        let counters = IntCounterVec::new(
            Opts::new(name, help).namespace(namespace),
            &label_names(COUNTER_LABELS),
        )?;
        registry.register(Box::new(counters.clone()))?;

        Ok(Self {
            name: full_name(namespace, name),
            counters,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the series identified by `labels` to `value`.
    ///
    /// Fails with [`ExporterError::MissingIdentity`] if the object has
    /// neither a name nor a comment.
    pub fn set(&self, labels: &ObjectLabels, value: u64) -> Result<()> {
        let values = labels.project_identity(&self.name, COUNTER_LABELS)?;
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let counter = self.counters.with_label_values(&refs);
        let current = counter.get();
        if value >= current {
            counter.inc_by(value - current);
        } else {
            counter.reset();
            counter.inc_by(value);
        }
        Ok(())
    }

    /// Current value of a series; creates it at zero if absent.
    pub fn value(&self, labels: &ObjectLabels) -> Result<u64> {
        let values = labels.project_identity(&self.name, COUNTER_LABELS)?;
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        Ok(self.counters.with_label_values(&refs).get())
    }
}

/// All series exposed by the exporter.
///
/// Shared between the polling loop (sole writer) and the metrics server
/// (reader); the prometheus types synchronize concurrent access.
pub struct ExporterMetrics {
    pub chains: Gauge,
    pub rules: Gauge,
    pub counter_bytes: SourceCounter,
    pub counter_packets: SourceCounter,
    pub map_elements: ReconciledGauge,
    pub meter_elements: ReconciledGauge,
    pub set_elements: ReconciledGauge,
    registry: Arc<Registry>,
}

impl ExporterMetrics {
    /// Creates and registers all series under `namespace`.
    pub fn new(namespace: &str) -> Result<Self> {
        let registry = Registry::new();

        let chains = Gauge::with_opts(
            Opts::new("chains", "Number of chains in nftables ruleset").namespace(namespace),
        )?;
        registry.register(Box::new(chains.clone()))?;

        let rules = Gauge::with_opts(
            Opts::new("rules", "Number of rules in nftables ruleset").namespace(namespace),
        )?;
        registry.register(Box::new(rules.clone()))?;

        let counter_bytes = SourceCounter::new(
            &registry,
            namespace,
            "counter_bytes_total",
            "Byte value of named nftables counters",
        )?;
        let counter_packets = SourceCounter::new(
            &registry,
            namespace,
            "counter_packets_total",
            "Packet value of named nftables counters",
        )?;

        let map_elements = ReconciledGauge::new(
            &registry,
            namespace,
            "map_elements",
            "Element count of named nftables maps",
            ELEMENT_LABELS,
        )?;
        let meter_elements = ReconciledGauge::new(
            &registry,
            namespace,
            "meter_elements",
            "Element count of named nftables meters",
            ELEMENT_LABELS,
        )?;
        let set_elements = ReconciledGauge::new(
            &registry,
            namespace,
            "set_elements",
            "Element count of named nftables sets",
            ELEMENT_LABELS,
        )?;

        Ok(Self {
            chains,
            rules,
            counter_bytes,
            counter_packets,
            map_elements,
            meter_elements,
            set_elements,
            registry: Arc::new(registry),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn elements(&self, kind: CollectionKind) -> &ReconciledGauge {
        match kind {
            CollectionKind::Map => &self.map_elements,
            CollectionKind::Meter => &self.meter_elements,
            CollectionKind::Set => &self.set_elements,
        }
    }

    /// Publishes packet and byte counts of one counter-bearing object.
    pub fn record_counter(&self, labels: &ObjectLabels, packets: u64, bytes: u64) -> Result<()> {
        self.counter_bytes.set(labels, bytes)?;
        self.counter_packets.set(labels, packets)
    }

    /// Replaces the element counts of `kind` with a new snapshot.
    ///
    /// Series missing from `observations` read 0 afterwards.
    pub fn reconcile_elements<I>(&self, kind: CollectionKind, observations: I) -> Result<()>
    where
        I: IntoIterator<Item = (ObjectLabels, u64)>,
    {
        let gauge = self.elements(kind);
        gauge.reset_all();
        for (labels, count) in observations {
            gauge.set(&labels, count as f64)?;
        }
        Ok(())
    }

    /// Encodes all series in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ExporterError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}
