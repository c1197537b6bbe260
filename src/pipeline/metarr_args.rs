//! Resolves the `filename_ops`/`meta_ops` lists handed to `metarr` (spec
//! §4.6 post-processing stage): a channel/channel-URL can declare ops in the
//! database, and a per-invocation file can declare more. Two tie-break rules
//! apply when two ops share a conflict `key`:
//!
//! - a `filtered` op (one gated on a matched metadata predicate) always
//!   outranks a plain op with the same key, regardless of which side
//!   declared it;
//! - within the same filtered-ness, a file-declared op outranks a
//!   DB-declared one.

use crate::config::MetarrOp;
use std::collections::HashMap;

fn op_rank(filtered: bool, is_file: bool) -> u8 {
    match (filtered, is_file) {
        (true, true) => 3,
        (true, false) => 2,
        (false, true) => 1,
        (false, false) => 0,
    }
}

/// Resolves one ops list (either `filename_ops` or `meta_ops`) to its final
/// set for a given channel URL. Channel-url-scoped ops that don't name
/// `cu_url` are dropped first.
pub(crate) fn resolve_ops(db_ops: &[MetarrOp], file_ops: &[MetarrOp], cu_url: &str) -> Vec<MetarrOp> {
    let mut best: HashMap<String, (u8, MetarrOp)> = HashMap::new();

    for (ops, is_file) in [(db_ops, false), (file_ops, true)] {
        for op in ops {
            if let Some(scope) = &op.channel_url {
                if scope != cu_url {
                    continue;
                }
            }
            let rank = op_rank(op.filtered, is_file);
            best.entry(op.key.clone())
                .and_modify(|(best_rank, best_op)| {
                    if rank >= *best_rank {
                        *best_rank = rank;
                        *best_op = op.clone();
                    }
                })
                .or_insert((rank, op.clone()));
        }
    }

    let mut resolved: Vec<MetarrOp> = best.into_values().map(|(_, op)| op).collect();
    resolved.sort_by(|a, b| a.key.cmp(&b.key));
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(key: &str, filtered: bool, channel_url: Option<&str>) -> MetarrOp {
        MetarrOp {
            key: key.to_string(),
            value: format!("{key}-value"),
            channel_url: channel_url.map(str::to_string),
            filtered,
        }
    }

    #[test]
    fn file_op_overrides_db_op_same_key() {
        let db = vec![op("rename-style", false, None)];
        let file = vec![MetarrOp {
            value: "spaces".into(),
            ..op("rename-style", false, None)
        }];
        let resolved = resolve_ops(&db, &file, "cu");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].value, "spaces");
    }

    #[test]
    fn filtered_op_beats_plain_op_regardless_of_source() {
        let db = vec![op("date-tag", true, None)];
        let file = vec![op("date-tag", false, None)];
        let resolved = resolve_ops(&db, &file, "cu");
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].filtered);
    }

    #[test]
    fn scoped_op_for_other_channel_url_is_dropped() {
        let db = vec![op("ext", false, Some("other-cu"))];
        let resolved = resolve_ops(&db, &[], "cu");
        assert!(resolved.is_empty());
    }
}
