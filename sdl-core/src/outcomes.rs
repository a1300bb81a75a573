//! Discrete probability distributions over typed values.
//!
//! An [`Outcomes`] is an ordered list of weighted buckets. Weights are
//! positive finite reals and need not sum to 1; consumers normalize on
//! demand. Composition never enumerates exponential state spaces: sequential
//! stages combine with [`Outcomes::and`], mutually exclusive branches with
//! [`Outcomes::split`] + [`Outcomes::append`], and oversized distributions
//! are reduced with [`Outcomes::trim_to_size`].

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdlError};

/// One point of probability mass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket<V> {
    pub weight: f64,
    pub value: V,
}

/// A discrete probability mass function over `V`. Empty is legal (the
/// impossible event).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcomes<V> {
    pub buckets: Vec<Bucket<V>>,
}

impl<V> Default for Outcomes<V> {
    fn default() -> Self {
        Self { buckets: Vec::new() }
    }
}

impl<V> Outcomes<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bucket. Rejects non-positive or non-finite weights.
    pub fn add(&mut self, weight: f64, value: V) -> Result<()> {
        if !(weight > 0.0 && weight.is_finite()) {
            return Err(SdlError::InvalidArgument(format!(
                "bucket weight must be a positive finite real, got {weight}"
            )));
        }
        self.buckets.push(Bucket { weight, value });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.buckets.iter().map(|b| b.weight).sum()
    }

    /// Partition buckets by `pred`, preserving weights. Returns
    /// `(matched, unmatched)`.
    pub fn split(self, pred: impl Fn(&V) -> bool) -> (Self, Self) {
        let mut matched = Self::new();
        let mut unmatched = Self::new();
        for b in self.buckets {
            if pred(&b.value) {
                matched.buckets.push(b);
            } else {
                unmatched.buckets.push(b);
            }
        }
        (matched, unmatched)
    }

    /// Transform values; weights unchanged.
    pub fn map<U>(self, f: impl Fn(V) -> U) -> Outcomes<U> {
        Outcomes {
            buckets: self
                .buckets
                .into_iter()
                .map(|b| Bucket {
                    weight: b.weight,
                    value: f(b.value),
                })
                .collect(),
        }
    }

    /// Concatenate bucket lists. Used to merge mutually exclusive branches
    /// produced by `split` + conditional composition.
    pub fn append(&mut self, other: Self) {
        self.buckets.extend(other.buckets);
    }

    /// Compose two independent stages. The product carries `|a|·|b|` buckets
    /// with weight `w_a · w_b / totalWeight(b)`, so the result's total weight
    /// equals `totalWeight(a)`.
    pub fn and<B, C>(a: &Self, b: &Outcomes<B>, combine: impl Fn(&V, &B) -> C) -> Outcomes<C> {
        let norm = b.total_weight();
        let mut out = Outcomes::new();
        for ba in &a.buckets {
            for bb in &b.buckets {
                out.buckets.push(Bucket {
                    weight: ba.weight * bb.weight / norm,
                    value: combine(&ba.value, &bb.value),
                });
            }
        }
        out
    }

    /// Draw one bucket by weighted random using `pick`, a uniform draw in
    /// `[0, total_weight)`. Returns `None` on an empty distribution.
    pub fn sample_at(&self, pick: f64) -> Option<&V> {
        let mut acc = 0.0;
        for b in &self.buckets {
            acc += b.weight;
            if pick < acc {
                return Some(&b.value);
            }
        }
        self.buckets.last().map(|b| &b.value)
    }
}

/// Values that can participate in adaptive bucket merging: they project to a
/// scalar axis (latency) and know how to weight-average themselves.
pub trait MergeValue: Clone {
    fn scalar(&self) -> f64;
    fn merged(a: &Self, wa: f64, b: &Self, wb: f64) -> Self;
}

impl MergeValue for f64 {
    fn scalar(&self) -> f64 {
        *self
    }
    fn merged(a: &Self, wa: f64, b: &Self, wb: f64) -> Self {
        (a * wa + b * wb) / (wa + wb)
    }
}

impl<V: MergeValue> Outcomes<V> {
    /// Reduce to `max_buckets` buckets when the distribution has grown past
    /// `threshold`, merging the least important adjacent pairs.
    ///
    /// Importance of an interior bucket = weight × max(scalar gap to
    /// previous, scalar gap to next); the two endpoints are pinned. Merging
    /// combines weights and weight-averages the value scalars. Total weight
    /// is preserved.
    pub fn trim_to_size(&mut self, threshold: usize, max_buckets: usize) {
        if self.buckets.len() <= threshold || self.buckets.len() <= max_buckets {
            return;
        }
        self.buckets
            .sort_by(|x, y| x.value.scalar().total_cmp(&y.value.scalar()));

        while self.buckets.len() > max_buckets.max(2) {
            let mut least = 1usize;
            let mut least_importance = f64::INFINITY;
            for i in 1..self.buckets.len() - 1 {
                let s = self.buckets[i].value.scalar();
                let gap_prev = s - self.buckets[i - 1].value.scalar();
                let gap_next = self.buckets[i + 1].value.scalar() - s;
                let importance = self.buckets[i].weight * gap_prev.max(gap_next);
                if importance < least_importance {
                    least_importance = importance;
                    least = i;
                }
            }

            // Merge into the scalar-nearer neighbor, keeping endpoints pinned.
            let s = self.buckets[least].value.scalar();
            let gap_prev = s - self.buckets[least - 1].value.scalar();
            let gap_next = self.buckets[least + 1].value.scalar() - s;
            let into = if gap_prev <= gap_next && least - 1 > 0 {
                least - 1
            } else if least + 1 < self.buckets.len() - 1 {
                least + 1
            } else {
                least - 1
            };

            let removed = self.buckets.remove(least);
            let keep = if into > least { into - 1 } else { into };
            let last = self.buckets.len() - 1;
            let target = &mut self.buckets[keep];
            if keep == 0 || keep == last {
                // Pinned endpoint: absorb the weight, keep the value.
                target.weight += removed.weight;
            } else {
                let merged = V::merged(
                    &target.value,
                    target.weight,
                    &removed.value,
                    removed.weight,
                );
                target.weight += removed.weight;
                target.value = merged;
            }
        }
    }
}

// ─── AccessResult ─────────────────────────────────────────────

/// The standard `(success, latency)` shape produced by storage, network, and
/// component operations. Latency is in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccessResult {
    pub success: bool,
    pub latency: f64,
}

impl AccessResult {
    pub fn ok(latency: f64) -> Self {
        Self {
            success: true,
            latency,
        }
    }

    pub fn fail(latency: f64) -> Self {
        Self {
            success: false,
            latency,
        }
    }
}

impl MergeValue for AccessResult {
    fn scalar(&self) -> f64 {
        self.latency
    }

    // Success is never merged across partitions (callers split by success
    // first); within a partition a merged bucket is success if any
    // contributor was.
    fn merged(a: &Self, wa: f64, b: &Self, wb: f64) -> Self {
        Self {
            success: a.success || b.success,
            latency: (a.latency * wa + b.latency * wb) / (wa + wb),
        }
    }
}

impl Outcomes<AccessResult> {
    /// Weight fraction of successful buckets. 0 for an empty distribution.
    pub fn availability(&self) -> f64 {
        let total = self.total_weight();
        if total == 0.0 {
            return 0.0;
        }
        let ok: f64 = self
            .buckets
            .iter()
            .filter(|b| b.value.success)
            .map(|b| b.weight)
            .sum();
        ok / total
    }

    /// Latency at percentile `p` (0..1) over the successful buckets: the
    /// smallest latency whose cumulative mass strictly exceeds `p`.
    pub fn percentile_latency(&self, p: f64) -> Option<f64> {
        let mut ok: Vec<&Bucket<AccessResult>> =
            self.buckets.iter().filter(|b| b.value.success).collect();
        if ok.is_empty() {
            return None;
        }
        ok.sort_by(|x, y| x.value.latency.total_cmp(&y.value.latency));
        let total: f64 = ok.iter().map(|b| b.weight).sum();
        let p = p.clamp(0.0, 1.0);
        let mut acc = 0.0;
        for b in &ok {
            acc += b.weight;
            if acc / total > p {
                return Some(b.value.latency);
            }
        }
        ok.last().map(|b| b.value.latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(pairs: &[(f64, f64)]) -> Outcomes<AccessResult> {
        let mut o = Outcomes::new();
        for &(w, lat) in pairs {
            o.add(w, AccessResult::ok(lat)).unwrap();
        }
        o
    }

    #[test]
    fn add_rejects_non_positive_weight() {
        let mut o: Outcomes<f64> = Outcomes::new();
        assert!(matches!(
            o.add(0.0, 1.0),
            Err(SdlError::InvalidArgument(_))
        ));
        assert!(matches!(
            o.add(-2.5, 1.0),
            Err(SdlError::InvalidArgument(_))
        ));
        assert!(o.add(0.5, 1.0).is_ok());
    }

    #[test]
    fn split_append_preserves_weight_and_buckets() {
        let o = dist(&[(0.5, 0.010), (0.4, 0.020), (0.1, 0.500)]);
        let total = o.total_weight();
        let original = o.buckets.clone();

        let (mut matched, unmatched) = o.split(|v| v.latency < 0.1);
        matched.append(unmatched);

        assert!((matched.total_weight() - total).abs() < 1e-12);
        assert_eq!(matched.len(), original.len());
        for b in &original {
            assert!(matched.buckets.iter().any(|m| m == b));
        }
    }

    #[test]
    fn map_preserves_total_weight() {
        let o = dist(&[(0.7, 0.001), (0.3, 0.004)]);
        let total = o.total_weight();
        let mapped = o.map(|v| v.latency * 2.0);
        assert!((mapped.total_weight() - total).abs() < 1e-12);
    }

    #[test]
    fn and_bucket_count_and_weight() {
        let a = dist(&[(0.6, 0.001), (0.4, 0.002)]);
        let b = dist(&[(2.0, 0.010), (1.0, 0.020), (1.0, 0.100)]);
        let combined = Outcomes::and(&a, &b, |x, y| AccessResult {
            success: x.success && y.success,
            latency: x.latency + y.latency,
        });
        assert_eq!(combined.len(), a.len() * b.len());
        assert!((combined.total_weight() - a.total_weight()).abs() < 1e-9);
    }

    #[test]
    fn trim_is_idempotent_and_weight_preserving() {
        let mut o = Outcomes::new();
        for i in 0..50 {
            o.add(1.0 + (i % 3) as f64, AccessResult::ok(0.001 * (i + 1) as f64))
                .unwrap();
        }
        let total = o.total_weight();

        o.trim_to_size(20, 8);
        assert_eq!(o.len(), 8);
        assert!((o.total_weight() - total).abs() < 1e-9);
        let after_first = o.clone();

        o.trim_to_size(20, 8);
        assert_eq!(o, after_first);
        assert!((o.total_weight() - total).abs() < 1e-9);
    }

    #[test]
    fn trim_pins_endpoints() {
        let mut o = Outcomes::new();
        for i in 0..20 {
            o.add(1.0, AccessResult::ok(0.01 * (i + 1) as f64)).unwrap();
        }
        o.trim_to_size(10, 4);
        assert!((o.buckets[0].value.latency - 0.01).abs() < 1e-12);
        assert!((o.buckets.last().unwrap().value.latency - 0.20).abs() < 1e-12);
    }

    #[test]
    fn availability_and_percentiles() {
        let mut o = dist(&[(0.5, 0.010), (0.49, 0.020)]);
        o.add(0.01, AccessResult::ok(0.500)).unwrap();
        o.add(1.0, AccessResult::fail(0.001)).unwrap();

        assert!((o.availability() - 1.0 / 2.0).abs() < 1e-9);
        let p99 = o.percentile_latency(0.99).unwrap();
        assert!((p99 - 0.500).abs() < 1e-9);
        let p50 = o.percentile_latency(0.50).unwrap();
        assert!((p50 - 0.010).abs() < 1e-9);
    }

    #[test]
    fn sample_at_walks_weights() {
        let o = dist(&[(1.0, 0.010), (3.0, 0.020)]);
        assert_eq!(o.sample_at(0.5).unwrap().latency, 0.010);
        assert_eq!(o.sample_at(2.0).unwrap().latency, 0.020);
        assert!(Outcomes::<AccessResult>::new().sample_at(0.1).is_none());
    }
}
