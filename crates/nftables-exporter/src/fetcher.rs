//! Snapshot fetcher: one `nft --json list` query per object family.
//!
//! Sets, maps and meters are listed without their elements, so every
//! returned object is queried again individually and the element collection
//! of the detailed answer is merged into it.

use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::error::{ExporterError, Result};
use crate::shell::NftRunner;
use crate::types::{
    Chain, Collection, CollectionKind, CounterObject, Document, Metainfo, ObjectKind, QueryScope,
    Rule, SUPPORTED_SCHEMA_VERSION,
};

/// Parses an `nft --json` document and returns the objects tagged `kind`,
/// in document order.
///
/// The first entry must be the metainfo envelope declaring schema version
/// [`SUPPORTED_SCHEMA_VERSION`]; any other version is a protocol error.
/// Entries of other types (tables, chains in a rule query, ...) are skipped.
pub fn parse_objects<T: DeserializeOwned>(json: &str, kind: ObjectKind) -> Result<Vec<T>> {
    let document: Document = serde_json::from_str(json)
        .map_err(|e| ExporterError::decode(format!("nft output listing {kind}s"), e))?;

    let mut entries = document.nftables.into_iter();
    let metainfo = entries
        .next()
        .and_then(|mut entry| entry.remove("metainfo"))
        .ok_or(ExporterError::MissingMetainfo)?;
    let metainfo: Metainfo =
        serde_json::from_value(metainfo).map_err(|e| ExporterError::decode("metainfo", e))?;
    if metainfo.json_schema_version != SUPPORTED_SCHEMA_VERSION {
        return Err(ExporterError::UnsupportedSchema {
            version: metainfo.json_schema_version,
        });
    }

    entries
        .filter_map(|mut entry| entry.remove(kind.tag()))
        .map(|value| serde_json::from_value(value).map_err(|e| ExporterError::decode(kind.tag(), e)))
        .collect()
}

/// Fetches ruleset objects through an [`NftRunner`].
pub struct Fetcher<R> {
    runner: R,
}

impl<R: NftRunner> Fetcher<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs `nft --json list <scope>` and returns the objects tagged `kind`.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        scope: QueryScope,
        kind: ObjectKind,
    ) -> Result<Vec<T>> {
        debug!(scope = %scope, kind = %kind, "Fetching nftables objects");
        let json = self.runner.list(&[scope.as_str()]).await?;
        parse_objects(&json, kind)
    }

    pub async fn rules(&self) -> Result<Vec<Rule>> {
        self.fetch(QueryScope::Ruleset, ObjectKind::Rule).await
    }

    pub async fn chains(&self) -> Result<Vec<Chain>> {
        self.fetch(QueryScope::Ruleset, ObjectKind::Chain).await
    }

    pub async fn counters(&self) -> Result<Vec<CounterObject>> {
        self.fetch(QueryScope::Counters, ObjectKind::Counter).await
    }

    /// Lists all collections of `kind` and fills in their elements.
    ///
    /// Issues one detail query per listed object. An object whose detail
    /// answer does not contain it keeps the (empty) elements of the listing.
    #[instrument(skip(self))]
    pub async fn collections(&self, kind: CollectionKind) -> Result<Vec<Collection>> {
        let mut collections: Vec<Collection> = self.fetch(kind.scope(), kind.object_kind()).await?;
        debug!(count = collections.len(), "Fetching {} elements", kind);

        for collection in &mut collections {
            debug!(name = %collection.name, table = %collection.table, "Fetching elements");
            let tag = kind.object_kind().tag();
            let json = self
                .runner
                .list(&[
                    tag,
                    collection.family.as_str(),
                    collection.table.as_str(),
                    collection.name.as_str(),
                ])
                .await?;
            let detail: Vec<Collection> = parse_objects(&json, kind.object_kind())?;
            if let Some(detail) = detail.into_iter().next() {
                collection.elem = detail.elem;
            }
        }

        Ok(collections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::CannedRunner;
    use crate::types::{Element, Family};
    use pretty_assertions::assert_eq;

    const RULESET: &str = r#"{"nftables": [
        {"metainfo": {"version": "1.0.9", "release_name": "Old Doc Yak #3", "json_schema_version": 1}},
        {"table": {"family": "ip", "name": "filter", "handle": 1}},
        {"chain": {"family": "ip", "table": "filter", "name": "input", "handle": 1,
                   "type": "filter", "hook": "input", "prio": 0, "policy": "accept"}},
        {"chain": {"family": "ip", "table": "filter", "name": "forward", "handle": 2}},
        {"rule": {"family": "ip", "table": "filter", "chain": "input", "handle": 4,
                  "comment": "ssh-in",
                  "expr": [{"match": {"op": "==", "left": {"payload": {"protocol": "tcp", "field": "dport"}}, "right": 22}},
                           {"counter": {"packets": 10, "bytes": 640}},
                           {"accept": null}]}},
        {"rule": {"family": "ip", "table": "filter", "chain": "input", "handle": 5,
                  "expr": [{"drop": null}]}}
    ]}"#;

    const SETS: &str = r#"{"nftables": [
        {"metainfo": {"json_schema_version": 1}},
        {"set": {"family": "ip", "table": "filter", "name": "blocklist", "type": "ipv4_addr", "handle": 3}},
        {"set": {"family": "inet", "table": "filter", "name": "ports", "type": "inet_service", "handle": 4}}
    ]}"#;

    const BLOCKLIST: &str = r#"{"nftables": [
        {"metainfo": {"json_schema_version": 1}},
        {"set": {"family": "ip", "table": "filter", "name": "blocklist", "type": "ipv4_addr",
                 "handle": 3, "elem": ["1.1.1.1", "8.8.8.8"]}}
    ]}"#;

    const PORTS: &str = r#"{"nftables": [
        {"metainfo": {"json_schema_version": 1}},
        {"set": {"family": "inet", "table": "filter", "name": "ports", "type": "inet_service", "handle": 4}}
    ]}"#;

    #[test]
    fn test_parse_filters_by_tag_in_order() {
        let chains: Vec<Chain> = parse_objects(RULESET, ObjectKind::Chain).unwrap();
        let names: Vec<&str> = chains.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["input", "forward"]);

        let rules: Vec<Rule> = parse_objects(RULESET, ObjectKind::Rule).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].handle, Some(4));
        assert_eq!(rules[1].comment, None);
    }

    #[test]
    fn test_parse_rejects_unsupported_schema() {
        let json = r#"{"nftables": [{"metainfo": {"json_schema_version": 2}}]}"#;
        let result: Result<Vec<Chain>> = parse_objects(json, ObjectKind::Chain);
        assert!(matches!(
            result,
            Err(ExporterError::UnsupportedSchema { version: 2 })
        ));
    }

    #[test]
    fn test_parse_requires_metainfo_first() {
        let json = r#"{"nftables": [{"table": {"family": "ip", "name": "filter"}}]}"#;
        let result: Result<Vec<Chain>> = parse_objects(json, ObjectKind::Chain);
        assert!(matches!(result, Err(ExporterError::MissingMetainfo)));

        let empty = r#"{"nftables": []}"#;
        let result: Result<Vec<Chain>> = parse_objects(empty, ObjectKind::Chain);
        assert!(matches!(result, Err(ExporterError::MissingMetainfo)));
    }

    #[test]
    fn test_parse_invalid_json() {
        let result: Result<Vec<Chain>> = parse_objects("{invalid json", ObjectKind::Chain);
        assert!(matches!(result, Err(ExporterError::Decode { .. })));
    }

    #[test]
    fn test_parse_incomplete_record_fails() {
        let json = r#"{"nftables": [
            {"metainfo": {"json_schema_version": 1}},
            {"counter": {"family": "ip", "table": "filter", "name": "c"}}
        ]}"#;
        let result: Result<Vec<CounterObject>> = parse_objects(json, ObjectKind::Counter);
        assert!(matches!(result, Err(ExporterError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_fetch_rules_and_chains() {
        let fetcher = Fetcher::new(CannedRunner::default().with("ruleset", RULESET));

        let rules = fetcher.rules().await.unwrap();
        let chains = fetcher.chains().await.unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].family, Family::Ip);
        assert_eq!(fetcher.runner().calls(), vec!["ruleset", "ruleset"]);
    }

    #[tokio::test]
    async fn test_fetch_collections_merges_elements() {
        let runner = CannedRunner::default()
            .with("sets", SETS)
            .with("set ip filter blocklist", BLOCKLIST)
            .with("set inet filter ports", PORTS);
        let fetcher = Fetcher::new(runner);

        let sets = fetcher.collections(CollectionKind::Set).await.unwrap();

        assert_eq!(sets.len(), 2);
        assert_eq!(
            sets[0].elem,
            vec![
                Element::Value("1.1.1.1".to_string()),
                Element::Value("8.8.8.8".to_string())
            ]
        );
        assert!(sets[1].elem.is_empty());
        assert_eq!(
            fetcher.runner().calls(),
            vec!["sets", "set ip filter blocklist", "set inet filter ports"]
        );
    }

    #[tokio::test]
    async fn test_fetch_collections_detail_failure_propagates() {
        let runner = CannedRunner::default().with("sets", SETS);
        let fetcher = Fetcher::new(runner);

        let result = fetcher.collections(CollectionKind::Set).await;
        let err = result.unwrap_err();
        assert!(err.is_execution_failure());
    }

    #[tokio::test]
    async fn test_fetch_empty_listing_skips_detail_queries() {
        let runner = CannedRunner::default().with(
            "meters",
            r#"{"nftables": [{"metainfo": {"json_schema_version": 1}}]}"#,
        );
        let fetcher = Fetcher::new(runner);

        let meters = fetcher.collections(CollectionKind::Meter).await.unwrap();
        assert!(meters.is_empty());
        assert_eq!(fetcher.runner().calls(), vec!["meters"]);
    }
}
