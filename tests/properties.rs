//! Property tests for singleton removal, bracket serialization, and cuts.

use coreflink::aggregate::{aggregate, ObservationLog};
use coreflink::bracket::{parse_documents, render};
use coreflink::cluster::{cut, CutCriterion, DistanceMatrix, LinkageTree};
use coreflink::singleton::{remove_singletons, SINGLETON_ID};
use coreflink::{AggregationPolicy, Document, PairKey, Span};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Spans with distinct bounds inside `[0, len)`, each with a cluster id.
fn labelled_spans() -> impl Strategy<Value = (usize, Vec<(Span, i64)>)> {
    (1usize..30).prop_flat_map(|len| {
        let span = (0..len, 0usize..4).prop_map(move |(start, width)| {
            let end = (start + width).min(len - 1);
            (start, end)
        });
        (
            Just(len),
            prop::collection::btree_map(span, 1i64..6, 0..12).prop_map(|m| {
                m.into_iter()
                    .map(|((s, e), id)| (Span::new(s, e).unwrap(), id))
                    .collect()
            }),
        )
    })
}

/// Non-overlapping spans, so bracket nesting is unambiguous.
fn disjoint_spans() -> impl Strategy<Value = (usize, Vec<(Span, i64)>)> {
    prop::collection::vec((0usize..3, 0usize..3, 1i64..5), 0..10).prop_map(|pieces| {
        let mut cursor = 0;
        let mut spans = Vec::new();
        for (gap, width, id) in pieces {
            let start = cursor + gap;
            let end = start + width;
            spans.push((Span::new(start, end).unwrap(), id));
            cursor = end + 1;
        }
        (cursor + 1, spans)
    })
}

fn partition(mentions: &[(Span, i64)]) -> BTreeSet<BTreeSet<Span>> {
    let mut groups: BTreeMap<i64, BTreeSet<Span>> = BTreeMap::new();
    for (span, id) in mentions {
        groups.entry(*id).or_default().insert(*span);
    }
    groups.into_values().collect()
}

fn distance_matrix() -> impl Strategy<Value = DistanceMatrix> {
    (1usize..12).prop_flat_map(|n| {
        prop::collection::vec(0.0f64..=1.0, n * (n - 1) / 2).prop_map(move |values| {
            let mut m = DistanceMatrix::new(n);
            let mut k = 0;
            for i in 0..n {
                for j in i + 1..n {
                    m.set(i, j, values[k]);
                    k += 1;
                }
            }
            m
        })
    })
}

proptest! {
    #[test]
    fn singleton_removal_is_idempotent(labels in prop::collection::vec(1i64..8, 0..40)) {
        let once = remove_singletons(&labels);
        prop_assert_eq!(remove_singletons(&once), once.clone());
        prop_assert_eq!(once.len(), labels.len());
    }

    #[test]
    fn singleton_removal_keeps_shared_labels(labels in prop::collection::vec(1i64..8, 0..40)) {
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for l in &labels {
            *counts.entry(*l).or_default() += 1;
        }
        for (before, after) in labels.iter().zip(remove_singletons(&labels)) {
            if counts[before] > 1 {
                prop_assert_eq!(after, *before);
            } else {
                prop_assert_eq!(after, SINGLETON_ID);
            }
        }
    }

    #[test]
    fn bracket_markers_balance_and_open_before_close((len, clusters) in labelled_spans()) {
        let doc = Document::new("d", len);
        let text = render(&doc, &clusters).unwrap();

        // token index of every open and close marker, per cluster id
        let mut opens: HashMap<i64, Vec<usize>> = HashMap::new();
        let mut closes: HashMap<i64, Vec<usize>> = HashMap::new();
        let rows: Vec<&str> = text.lines().filter(|l| l.starts_with("d\t")).collect();
        for (index, line) in rows.iter().enumerate() {
            let cell = line.rsplit('\t').next().unwrap();
            if cell == "-" {
                continue;
            }
            for marker in cell.split('|') {
                let id: i64 = marker.trim_matches(|c: char| c == '(' || c == ')').parse().unwrap();
                if marker.starts_with('(') {
                    opens.entry(id).or_default().push(index);
                }
                if marker.ends_with(')') {
                    closes.entry(id).or_default().push(index);
                }
            }
        }

        let mut starts: HashMap<i64, Vec<usize>> = HashMap::new();
        let mut ends: HashMap<i64, Vec<usize>> = HashMap::new();
        for (span, id) in &clusters {
            starts.entry(*id).or_default().push(span.start());
            ends.entry(*id).or_default().push(span.end());
        }
        for map in [&mut opens, &mut closes, &mut starts, &mut ends] {
            for positions in map.values_mut() {
                positions.sort_unstable();
            }
        }

        prop_assert_eq!(&opens, &starts);
        prop_assert_eq!(&closes, &ends);
        // k-th opening of an id never comes after its k-th closing
        for (id, open) in &opens {
            for (o, c) in open.iter().zip(&closes[id]) {
                prop_assert!(o <= c);
            }
        }
        prop_assert_eq!(rows.len(), len);
        prop_assert_eq!(text.lines().count(), len + 3);
    }

    #[test]
    fn bracket_round_trip_preserves_partition((len, clusters) in disjoint_spans()) {
        let doc = Document::new("nw/x", len);
        let text = render(&doc, &clusters).unwrap();
        let parsed = parse_documents(&text).unwrap();
        prop_assert_eq!(parsed.len(), 1);
        prop_assert_eq!(parsed[0].to_document(), doc);

        let mentions = parsed[0].mentions().unwrap();
        for (span, _) in &mentions {
            prop_assert!(span.start() <= span.end());
        }
        prop_assert_eq!(partition(&mentions), partition(&clusters));
    }

    #[test]
    fn round_trip_ignores_cluster_numbering((len, clusters) in disjoint_spans(), shift in 1i64..50) {
        let doc = Document::new("d", len);
        let renumbered: Vec<(Span, i64)> = clusters.iter().map(|(s, id)| (*s, id * 7 + shift)).collect();
        let a = parse_documents(&render(&doc, &clusters).unwrap()).unwrap();
        let b = parse_documents(&render(&doc, &renumbered).unwrap()).unwrap();
        prop_assert_eq!(
            partition(&a[0].mentions().unwrap()),
            partition(&b[0].mentions().unwrap())
        );
    }

    #[test]
    fn cut_labels_every_leaf_contiguously(matrix in distance_matrix(), t in 0.0f64..1.2) {
        let tree = LinkageTree::average_linkage(&matrix);
        let labels = cut(&tree, t, CutCriterion::Distance);
        prop_assert_eq!(labels.len(), matrix.len());
        let distinct: BTreeSet<i64> = labels.iter().copied().collect();
        let expected: BTreeSet<i64> = (1..=distinct.len() as i64).collect();
        prop_assert_eq!(distinct, expected);
    }

    #[test]
    fn higher_threshold_never_splits(matrix in distance_matrix(), a in 0.0f64..1.0, b in 0.0f64..1.0) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let tree = LinkageTree::average_linkage(&matrix);
        let fine = cut(&tree, low, CutCriterion::Distance);
        let coarse = cut(&tree, high, CutCriterion::Distance);
        // leaves together at the lower threshold stay together at the higher one
        for i in 0..fine.len() {
            for j in i + 1..fine.len() {
                if fine[i] == fine[j] {
                    prop_assert_eq!(coarse[i], coarse[j]);
                }
            }
        }
    }

    #[test]
    fn threshold_above_every_merge_gives_one_cluster(matrix in distance_matrix()) {
        let tree = LinkageTree::average_linkage(&matrix);
        let labels = cut(&tree, 1.0, CutCriterion::Distance);
        prop_assert!(labels.iter().all(|&l| l == 1));
    }

    #[test]
    fn inconsistency_cut_is_a_partition(matrix in distance_matrix(), t in 0.0f64..2.0, depth in 1usize..8) {
        let tree = LinkageTree::average_linkage(&matrix);
        let labels = cut(&tree, t, CutCriterion::Inconsistent { depth });
        prop_assert_eq!(labels.len(), matrix.len());
        prop_assert!(labels.iter().all(|&l| l >= 1));
    }

    #[test]
    fn last_n_mean_stays_within_observations(scores in prop::collection::vec(0.0f64..=1.0, 1..10), n in 1usize..5) {
        let pair = PairKey::new(Span::token(0), Span::token(1));
        let mut log = ObservationLog::new();
        for s in &scores {
            log.push(pair, *s);
        }
        let value = aggregate(&log, AggregationPolicy::LastN(n)).unwrap().get(&pair).unwrap();
        let tail = &scores[scores.len().saturating_sub(n)..];
        let lo = tail.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = tail.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(value >= lo - 1e-12 && value <= hi + 1e-12);
    }
}

#[test]
fn aggregation_reference_values() {
    let pair = PairKey::new(Span::token(0), Span::token(4));
    let mut log = ObservationLog::new();
    for s in [0.1, 0.9, 0.4] {
        log.push(pair, s);
    }
    let scores = aggregate(&log, AggregationPolicy::LastN(2)).unwrap();
    assert!((scores.get(&pair).unwrap() - 0.65).abs() < 1e-12);

    let mut single = ObservationLog::new();
    single.push(pair, 0.7);
    let scores = aggregate(&single, AggregationPolicy::LastN(2)).unwrap();
    assert!((scores.get(&pair).unwrap() - 0.7).abs() < 1e-12);
}
