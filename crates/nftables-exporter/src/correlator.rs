//! Publishes the anonymous counters of commented rules under their comment.
//!
//! Rules have no name, so a rule written as
//!
//! ```text
//! tcp dport 22 counter accept comment "ssh-in"
//! ```
//!
//! becomes queryable as `counter_packets{name="ssh-in"}`. The counter
//! statement must directly follow the rule's first match, i.e. be the
//! second element of the expression list. Comments are expected to be
//! unique within a table; on collision the rule listed last wins.

use tracing::{debug, warn};

use crate::types::{CounterValues, Family, Rule};

/// Index of the counter statement in a commented rule's expression list.
pub const COUNTER_POSITION: usize = 1;

/// Counter values of one commented rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentCounter {
    pub family: Family,
    pub table: String,
    pub comment: String,
    pub packets: u64,
    pub bytes: u64,
}

/// Returns the counter at [`COUNTER_POSITION`], if the rule has one there.
pub fn rule_counter(rule: &Rule) -> Option<&CounterValues> {
    rule.expr
        .get(COUNTER_POSITION)
        .and_then(|expr| expr.counter())
}

/// Extracts one [`CommentCounter`] per commented rule, in rule order.
///
/// A commented rule without a counter at the expected position is logged
/// and skipped; it never fails the collection cycle.
pub fn correlate(rules: &[Rule]) -> Vec<CommentCounter> {
    let commented: Vec<(&Rule, &str)> = rules
        .iter()
        .filter_map(|rule| match rule.comment.as_deref() {
            Some(comment) if !comment.is_empty() => Some((rule, comment)),
            _ => None,
        })
        .collect();

    if !commented.is_empty() {
        debug!(count = commented.len(), "Iterating over rules with comments");
    }

    commented
        .into_iter()
        .filter_map(|(rule, comment)| {
            debug!(comment, "Correlating rule counter");
            match rule_counter(rule) {
                Some(counter) => Some(CommentCounter {
                    family: rule.family,
                    table: rule.table.clone(),
                    comment: comment.to_string(),
                    packets: counter.packets,
                    bytes: counter.bytes,
                }),
                None => {
                    warn!(
                        comment,
                        family = %rule.family,
                        table = %rule.table,
                        chain = %rule.chain,
                        handle = ?rule.handle,
                        "Rule with comment does not specify a counter and cannot be used"
                    );
                    None
                }
            }
        })
        .collect()
}
