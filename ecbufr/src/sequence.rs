use std::cmp::Reverse;
use std::ops::Range;

use crate::core::FXY;
use crate::core::tables::TableLookup;
use crate::errors::{Error, Result};

/// Sequences nested deeper than this are treated as a table cycle.
const MAX_NESTING: usize = 32;

/// A replication operator with its optional delayed count and body.
struct ReplicationGroup {
    operator: FXY,
    count: Option<FXY>,
    body: Range<usize>,
}

impl ReplicationGroup {
    fn end(&self) -> usize {
        self.body.end
    }
}

fn replication_group(list: &[FXY], at: usize) -> Result<ReplicationGroup> {
    let operator = list[at];
    let mut start = at + 1;
    let count = if operator.y == 0 {
        match list.get(start) {
            Some(c) if c.f == 0 && c.x == 31 => {
                start += 1;
                Some(*c)
            }
            Some(c) => {
                return Err(Error::MalformedReplication(format!(
                    "delayed replication {} followed by {} instead of a class 31 count",
                    operator, c
                )));
            }
            None => {
                return Err(Error::MalformedReplication(format!(
                    "delayed replication {} has no count descriptor",
                    operator
                )));
            }
        }
    } else {
        None
    };

    let end = start + operator.x as usize;
    if end > list.len() {
        return Err(Error::MalformedReplication(format!(
            "{} needs {} descriptors, {} left",
            operator,
            operator.x,
            list.len() - start
        )));
    }
    Ok(ReplicationGroup {
        operator,
        count,
        body: start..end,
    })
}

fn emit_group(out: &mut Vec<FXY>, group: &ReplicationGroup, body: Vec<FXY>) -> Result<()> {
    out.push(FXY::replication(body.len(), group.operator.y as usize)?);
    out.extend(group.count);
    out.extend(body);
    Ok(())
}

/// Longest closed Table D chain that literally equals the run at `at`.
/// Equal lengths go to the lowest descriptor.
fn best_match<T: TableLookup + ?Sized>(tables: &T, list: &[FXY], at: usize) -> Option<(FXY, usize)> {
    let rest = &list[at..];
    tables
        .sequences_starting_with(&list[at])
        .into_iter()
        .filter(|d| {
            let chain = d.fxy_chain();
            !chain.is_empty() && rest.starts_with(chain) && d.is_closed()
        })
        .max_by_key(|d| (d.fxy_chain().len(), Reverse(d.fxy.to_code())))
        .map(|d| (d.fxy, d.fxy_chain().len()))
}

/// One left-to-right compaction pass. A replication operator keeps its
/// place and only its body is compacted; any other position is replaced by
/// the best Table D match starting there.
pub fn zip_once<T: TableLookup + ?Sized>(tables: &T, list: &[FXY]) -> Result<Vec<FXY>> {
    let mut out = Vec::with_capacity(list.len());
    let mut i = 0;
    while i < list.len() {
        let d = list[i];
        if d.is_replication() {
            let group = replication_group(list, i)?;
            let body = zip_once(tables, &list[group.body.clone()])?;
            emit_group(&mut out, &group, body)?;
            i = group.end();
        } else if let Some((sequence, len)) = best_match(tables, list, i) {
            out.push(sequence);
            i += len;
        } else {
            out.push(d);
            i += 1;
        }
    }
    Ok(out)
}

/// Repeats [`zip_once`] until a pass no longer shortens the list.
pub fn zip<T: TableLookup + ?Sized>(tables: &T, list: &[FXY]) -> Result<Vec<FXY>> {
    let mut current = list.to_vec();
    let mut passes = 0;
    loop {
        let next = zip_once(tables, &current)?;
        passes += 1;
        if next.len() >= current.len() {
            break;
        }
        current = next;
    }
    tracing::debug!(
        "zip: {} -> {} descriptors in {} passes",
        list.len(),
        current.len(),
        passes
    );
    Ok(current)
}

/// Replaces every Table D descriptor by its chain, recursively. Replication
/// counts are recomputed over the expanded bodies.
pub fn expand<T: TableLookup + ?Sized>(tables: &T, list: &[FXY]) -> Result<Vec<FXY>> {
    expand_nested(tables, list, 0)
}

fn expand_nested<T: TableLookup + ?Sized>(
    tables: &T,
    list: &[FXY],
    depth: usize,
) -> Result<Vec<FXY>> {
    if depth > MAX_NESTING {
        return Err(Error::ParseError(format!(
            "sequences nested deeper than {}",
            MAX_NESTING
        )));
    }

    let mut out = Vec::with_capacity(list.len());
    let mut i = 0;
    while i < list.len() {
        let d = list[i];
        if d.is_sequence() {
            let entry = tables.lookup_d(&d).ok_or(Error::TableDNotFound(d))?;
            out.extend(expand_nested(tables, entry.fxy_chain(), depth + 1)?);
            i += 1;
        } else if d.is_replication() {
            let group = replication_group(list, i)?;
            let body = expand_nested(tables, &list[group.body.clone()], depth)?;
            emit_group(&mut out, &group, body)?;
            i = group.end();
        } else {
            out.push(d);
            i += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tables::{DTableEntry, TableSet};
    use proptest::prelude::*;

    fn f(code: i32) -> FXY {
        FXY::from_code(code)
    }

    fn list(codes: &[i32]) -> Vec<FXY> {
        codes.iter().map(|c| f(*c)).collect()
    }

    fn tables() -> TableSet {
        let d = |code: i32, chain: &[i32]| DTableEntry::new(f(code), list(chain));
        TableSet::from_entries(
            Vec::new(),
            [
                d(301001, &[1001, 1002]),
                d(301011, &[4001, 4002, 4003]),
                d(301012, &[4004, 4005]),
                d(301013, &[4004, 4005, 4006]),
                d(301021, &[5001, 6001]),
                d(301022, &[5001, 6001]),
                d(307001, &[301001, 301011]),
                d(303001, &[101000, 31001, 7004]),
                d(303002, &[7004, 101000, 31001, 7004]),
                d(309001, &[7004, 102000]),
            ],
        )
    }

    #[test]
    fn test_irreducible_is_unchanged() {
        let t = tables();
        let input = list(&[12001, 1001, 12003, 4002]);
        assert_eq!(zip(&t, &input).unwrap(), input);
    }

    #[test]
    fn test_nested_compaction() {
        let t = tables();
        let input = list(&[1001, 1002, 4001, 4002, 4003, 12001]);
        assert_eq!(zip_once(&t, &input).unwrap(), list(&[301001, 301011, 12001]));
        assert_eq!(zip(&t, &input).unwrap(), list(&[307001, 12001]));
    }

    #[test]
    fn test_tie_breaks() {
        let t = tables();
        // longest chain first
        assert_eq!(
            zip(&t, &list(&[4004, 4005, 4006])).unwrap(),
            list(&[301013])
        );
        assert_eq!(zip(&t, &list(&[4004, 4005, 4007])).unwrap(), list(&[301012, 4007]));
        // then lowest code
        assert_eq!(zip(&t, &list(&[5001, 6001])).unwrap(), list(&[301021]));
    }

    #[test]
    fn test_replication_bodies() {
        let t = tables();
        let input = list(&[102003, 1001, 1002, 12001]);
        assert_eq!(zip(&t, &input).unwrap(), list(&[101003, 301001, 12001]));

        let delayed = list(&[103000, 31001, 1001, 1002, 12001]);
        assert_eq!(zip(&t, &delayed).unwrap(), list(&[102000, 31001, 301001, 12001]));
    }

    #[test]
    fn test_closed_chain_with_replication() {
        let t = tables();
        // a replication operator is never folded into a sequence
        let input = list(&[101000, 31001, 7004, 12001]);
        assert_eq!(zip(&t, &input).unwrap(), input);
        let inner = list(&[7004, 101000, 31001, 7004, 12001]);
        assert_eq!(zip(&t, &inner).unwrap(), list(&[303002, 12001]));
        // 309001 ends with an open replication and never matches
        let open = list(&[7004, 102000, 31001, 1001, 1002]);
        assert_eq!(zip(&t, &open).unwrap(), list(&[7004, 101000, 31001, 301001]));
    }

    #[test]
    fn test_malformed_replication() {
        let t = tables();
        assert!(matches!(
            zip(&t, &list(&[103002, 1001])),
            Err(Error::MalformedReplication(_))
        ));
        assert!(matches!(
            zip(&t, &list(&[101000, 12001, 1001])),
            Err(Error::MalformedReplication(_))
        ));
        assert!(matches!(
            expand(&t, &list(&[101000])),
            Err(Error::MalformedReplication(_))
        ));
    }

    #[test]
    fn test_expand() {
        let t = tables();
        assert_eq!(
            expand(&t, &list(&[307001, 101002, 301001])).unwrap(),
            list(&[1001, 1002, 4001, 4002, 4003, 102002, 1001, 1002])
        );
        assert!(matches!(
            expand(&t, &list(&[399999])),
            Err(Error::TableDNotFound(_))
        ));
    }

    #[test]
    fn test_expand_count_overflow() {
        let mut t = tables();
        t.insert_d(DTableEntry::new(f(301099), vec![f(1001); 40]));
        assert!(matches!(
            expand(&t, &list(&[102000, 31001, 301099, 301099])),
            Err(Error::MalformedReplication(_))
        ));
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut t = tables();
        t.insert_d(DTableEntry::new(f(301098), list(&[301098])));
        assert!(matches!(expand(&t, &list(&[301098])), Err(Error::ParseError(_))));
    }

    const POOL: &[i32] = &[1001, 1002, 4001, 4002, 4003, 4004, 4005, 4006, 5001, 6001, 7004, 12001];

    fn descriptor_list() -> impl Strategy<Value = Vec<FXY>> {
        (
            prop::collection::vec(prop::sample::select(POOL), 0..30),
            prop::option::of((0usize..30, 1usize..12, any::<bool>())),
        )
            .prop_map(|(codes, repl)| {
                let mut out = list(&codes);
                if let Some((at, len, delayed)) = repl {
                    let at = at.min(out.len());
                    let len = len.min(out.len() - at);
                    let mut head = if delayed {
                        vec![FXY::new(1, len as i32, 0), f(31001)]
                    } else {
                        vec![FXY::new(1, len as i32, 3)]
                    };
                    head.reverse();
                    for d in head {
                        out.insert(at, d);
                    }
                }
                out
            })
    }

    proptest! {
        #[test]
        fn prop_zip_preserves_expansion(input in descriptor_list()) {
            let t = tables();
            let zipped = zip(&t, &input).unwrap();
            prop_assert!(zipped.len() <= input.len());
            prop_assert_eq!(expand(&t, &zipped).unwrap(), expand(&t, &input).unwrap());
        }
    }
}
