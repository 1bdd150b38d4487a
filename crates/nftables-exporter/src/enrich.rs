//! Country enrichment of set, map and meter element counts.
//!
//! Without a lookup source, or for collections whose elements are not
//! addresses, a collection yields a single observation: its own labels with
//! an empty country and the total element count. With a lookup source every
//! address is resolved and the elements are grouped per country, so the
//! label space grows by country and not by address.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::metrics::ObjectLabels;
use crate::types::{Collection, Element};

/// Resolves an address to the ISO code of its country of origin.
pub trait CountryLookup: Send + Sync {
    /// Returns `None` when the address does not parse or is unknown.
    fn country_code(&self, address: &str) -> Option<String>;
}

/// Address carried by an element, if it has a recognized shape.
///
/// `Some(None)` marks a structured element whose value is not a string; it
/// still counts, in the unresolved bucket.
fn element_address(element: &Element) -> Option<Option<&str>> {
    match element {
        Element::Value(address) => Some(Some(address.as_str())),
        Element::Wrapped { elem } => match &elem.val {
            Value::String(address) => Some(Some(address.as_str())),
            _ => Some(None),
        },
        Element::Other(_) => None,
    }
}

/// Groups the collection's elements by country.
///
/// Returns `(country, count)` pairs; the empty country collects elements
/// that could not be resolved. Pair order is unspecified.
fn count_by_country(collection: &Collection, lookup: &dyn CountryLookup) -> Vec<(String, u64)> {
    let mut buckets: HashMap<String, u64> = HashMap::new();
    for element in &collection.elem {
        match element_address(element) {
            Some(address) => {
                let country = address
                    .and_then(|address| lookup.country_code(address))
                    .unwrap_or_default();
                *buckets.entry(country).or_default() += 1;
            }
            None => debug!(
                set = %collection.name,
                table = %collection.table,
                element = ?element,
                "Got element of unexpected shape"
            ),
        }
    }
    buckets.into_iter().collect()
}

/// Expands a collection into `(labels, element count)` observations.
pub fn annotate_with_country<'a>(
    collection: &'a Collection,
    lookup: Option<&dyn CountryLookup>,
) -> impl Iterator<Item = (ObjectLabels, u64)> + 'a {
    let buckets = match lookup {
        Some(lookup) if collection.key_type.is_address() => count_by_country(collection, lookup),
        _ => vec![(String::new(), collection.elem.len() as u64)],
    };

    buckets.into_iter().map(move |(country, count)| {
        (
            ObjectLabels::from_collection(collection).with_country(country),
            count,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Family, KeyType, WrappedElement};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct StaticLookup(HashMap<&'static str, &'static str>);

    impl CountryLookup for StaticLookup {
        fn country_code(&self, address: &str) -> Option<String> {
            self.0.get(address).map(|code| code.to_string())
        }
    }

    fn lookup() -> StaticLookup {
        StaticLookup(HashMap::from([
            ("1.1.1.1", "AU"),
            ("1.0.0.1", "AU"),
            ("8.8.8.8", "US"),
            ("2001:4860:4860::8888", "US"),
        ]))
    }

    fn make_set(key_type: &str, elem: Vec<Element>) -> Collection {
        Collection {
            family: Family::Inet,
            table: "filter".to_string(),
            name: "peers".to_string(),
            key_type: KeyType::Single(key_type.to_string()),
            elem,
        }
    }

    fn addr(address: &str) -> Element {
        Element::Value(address.to_string())
    }

    fn sorted(observations: impl Iterator<Item = (ObjectLabels, u64)>) -> Vec<(String, u64)> {
        let mut pairs: Vec<(String, u64)> = observations
            .map(|(labels, count)| (labels.country.unwrap_or_default(), count))
            .collect();
        pairs.sort();
        pairs
    }

    #[test]
    fn test_pass_through_without_lookup() {
        let set = make_set("ipv4_addr", vec![addr("1.1.1.1"), addr("8.8.8.8"), addr("9.9.9.9")]);

        let observations: Vec<_> = annotate_with_country(&set, None).collect();

        assert_eq!(observations.len(), 1);
        let (labels, count) = &observations[0];
        assert_eq!(labels.country.as_deref(), Some(""));
        assert_eq!(labels.name.as_deref(), Some("peers"));
        assert_eq!(labels.key_type.as_deref(), Some("ipv4_addr"));
        assert_eq!(*count, 3);
    }

    #[test]
    fn test_pass_through_for_non_address_type() {
        let set = make_set(
            "inet_service",
            vec![Element::Other(json!(22)), Element::Other(json!(443))],
        );
        let lookup = lookup();

        assert_eq!(
            sorted(annotate_with_country(&set, Some(&lookup))),
            vec![(String::new(), 2)]
        );
    }

    #[test]
    fn test_pass_through_for_empty_collection() {
        let set = make_set("ipv4_addr", vec![]);
        assert_eq!(
            sorted(annotate_with_country(&set, None)),
            vec![(String::new(), 0)]
        );
    }

    #[test]
    fn test_groups_by_country() {
        let set = make_set("ipv4_addr", vec![addr("1.1.1.1"), addr("8.8.8.8")]);
        let lookup = lookup();

        assert_eq!(
            sorted(annotate_with_country(&set, Some(&lookup))),
            vec![("AU".to_string(), 1), ("US".to_string(), 1)]
        );
    }

    #[test]
    fn test_unresolved_addresses_share_empty_bucket() {
        let set = make_set(
            "ipv4_addr",
            vec![
                addr("1.1.1.1"),
                addr("1.0.0.1"),
                addr("192.0.2.1"),
                addr("not-an-address"),
            ],
        );
        let lookup = lookup();

        let pairs = sorted(annotate_with_country(&set, Some(&lookup)));
        assert_eq!(pairs, vec![(String::new(), 2), ("AU".to_string(), 2)]);
        assert_eq!(pairs.iter().map(|(_, n)| n).sum::<u64>(), 4);
    }

    #[test]
    fn test_wrapped_elements_use_value() {
        let set = make_set(
            "ipv6_addr",
            vec![
                Element::Wrapped {
                    elem: WrappedElement {
                        val: json!("2001:4860:4860::8888"),
                    },
                },
                Element::Wrapped {
                    elem: WrappedElement {
                        val: json!({"prefix": {"addr": "2001:db8::", "len": 32}}),
                    },
                },
            ],
        );
        let lookup = lookup();

        assert_eq!(
            sorted(annotate_with_country(&set, Some(&lookup))),
            vec![(String::new(), 1), ("US".to_string(), 1)]
        );
    }

    #[test]
    fn test_unexpected_shapes_are_skipped() {
        let set = make_set(
            "ipv4_addr",
            vec![
                addr("8.8.8.8"),
                Element::Other(json!({"prefix": {"addr": "10.0.0.0", "len": 8}})),
            ],
        );
        let lookup = lookup();

        assert_eq!(
            sorted(annotate_with_country(&set, Some(&lookup))),
            vec![("US".to_string(), 1)]
        );
    }
}
