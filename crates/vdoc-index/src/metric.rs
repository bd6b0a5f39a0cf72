use std::cmp::Ordering;

use vdoc_core::traits::Neighbor;
use vdoc_core::MetricType;

/// Relevance order for raw distances, ties broken by ascending doc number.
pub fn neighbor_order(metric: MetricType, a: &Neighbor, b: &Neighbor) -> Ordering {
    metric
        .rank(f64::from(a.distance), f64::from(b.distance))
        .then(a.docid.cmp(&b.docid))
}

/// Sorts `hits` best first and keeps at most `k`.
pub fn top_k(metric: MetricType, mut hits: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    if hits.len() > k {
        hits.select_nth_unstable_by(k, |a, b| neighbor_order(metric, a, b));
        hits.truncate(k);
    }
    hits.sort_by(|a, b| neighbor_order(metric, a, b));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(docid: u32, distance: f32) -> Neighbor {
        Neighbor { docid, distance }
    }

    #[test]
    fn ties_by_docid() {
        let hits = vec![n(5, 1.0), n(2, 1.0), n(9, 0.5), n(1, 3.0)];
        let top = top_k(MetricType::L2, hits.clone(), 3);
        assert_eq!(top.iter().map(|h| h.docid).collect::<Vec<_>>(), vec![9, 2, 5]);

        let top = top_k(MetricType::InnerProduct, hits, 2);
        assert_eq!(top.iter().map(|h| h.docid).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn k_zero_is_empty() {
        assert!(top_k(MetricType::L2, vec![n(1, 1.0)], 0).is_empty());
    }
}
