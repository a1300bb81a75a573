//! Storage natives: Disk, Cache, and the index structures layered on a Disk.
//!
//! The disk builds an access distribution from its configured p50/p99
//! latencies, inflated by an M/M/c utilization factor when an arrival rate
//! has been applied. Index natives derive a page-access count analytically
//! from their geometry and compose that many disk reads.

use rand::rngs::StdRng;
use rand::Rng;

use super::{p_f64, p_u64, unknown_method, NativeCall, NativeKind, NativeReturn, ParamMap};
use crate::error::Result;
use crate::outcomes::{AccessResult, Outcomes};
use crate::value::Value;

/// Build the access distribution for one disk operation from its percentile
/// configuration: mass at p50, a p99 shoulder, a thin far tail, and the
/// configured failure rate.
fn disk_distribution(p50: f64, p99: f64, failure_rate: f64, factor: f64) -> Outcomes<AccessResult> {
    let mut o = Outcomes::new();
    let ok = (1.0 - failure_rate).max(0.0);
    if ok > 0.0 {
        let _ = o.add(ok * 0.50, AccessResult::ok(p50 * factor));
        let _ = o.add(ok * 0.40, AccessResult::ok((p50 + p99) * 0.5 * factor));
        let _ = o.add(ok * 0.09, AccessResult::ok(p99 * factor));
        let _ = o.add(ok * 0.01, AccessResult::ok(p99 * 3.0 * factor));
    }
    if failure_rate > 0.0 {
        let _ = o.add(failure_rate, AccessResult::fail(p99 * factor));
    }
    o
}

/// Latency inflation from contention: 1/(1 − ρ) below saturation, a hard
/// multiplier above it.
fn contention_factor(params: &ParamMap, service_time: f64) -> f64 {
    let lambda = p_f64(params, "ArrivalRate", 0.0);
    let c = p_u64(params, "Size", 1);
    let rho = super::mmc_utilization(lambda, c, service_time);
    if rho <= 0.0 {
        1.0
    } else if rho < 1.0 {
        1.0 / (1.0 - rho)
    } else {
        10.0 * rho
    }
}

fn sample_access(
    dist: &Outcomes<AccessResult>,
    rng: &mut StdRng,
) -> NativeReturn {
    let total = dist.total_weight();
    let pick = rng.gen::<f64>() * total;
    match dist.sample_at(pick) {
        Some(r) => NativeReturn {
            value: Value::Bool(r.success),
            latency: r.latency,
        },
        None => NativeReturn {
            value: Value::Bool(false),
            latency: 0.0,
        },
    }
}

fn disk_op_distribution(params: &ParamMap, write: bool) -> Outcomes<AccessResult> {
    let (p50, p99) = if write {
        (p_f64(params, "WriteP50", 0.001), p_f64(params, "WriteP99", 0.008))
    } else {
        (p_f64(params, "ReadP50", 0.0005), p_f64(params, "ReadP99", 0.004))
    };
    let failure_rate = p_f64(params, "FailureRate", 0.0001);
    let factor = contention_factor(params, p50);
    disk_distribution(p50, p99, failure_rate, factor)
}

pub(super) fn disk(call: NativeCall<'_>, rng: &mut StdRng) -> Result<NativeReturn> {
    let dist = match call.method {
        "Read" => disk_op_distribution(call.params, false),
        "Write" => disk_op_distribution(call.params, true),
        other => return Err(unknown_method(NativeKind::Disk, other)),
    };
    Ok(sample_access(&dist, rng))
}

pub(super) fn disk_utilization(params: &ParamMap) -> super::UtilizationSample {
    let service = p_f64(params, "ReadP50", 0.0005);
    let lambda = p_f64(params, "ArrivalRate", 0.0);
    let c = p_u64(params, "Size", 1);
    let capacity = if service > 0.0 { c as f64 / service } else { 0.0 };
    super::UtilizationSample {
        utilization: super::mmc_utilization(lambda, c, service),
        capacity,
        current_load: lambda,
    }
}

pub(super) fn cache(call: NativeCall<'_>, rng: &mut StdRng) -> Result<NativeReturn> {
    match call.method {
        "Read" => {
            let hit_rate = p_f64(call.params, "HitRate", 0.8);
            let hit = rng.gen::<f64>() < hit_rate;
            let latency = if hit {
                p_f64(call.params, "HitLatency", 0.0002)
            } else {
                p_f64(call.params, "MissLatency", 0.001)
            };
            Ok(NativeReturn {
                value: Value::Bool(hit),
                latency,
            })
        }
        "Write" => Ok(NativeReturn {
            value: Value::Bool(true),
            latency: p_f64(call.params, "WriteLatency", 0.0005),
        }),
        other => Err(unknown_method(NativeKind::Cache, other)),
    }
}

/// Page accesses one index operation costs, from the structure's geometry.
fn page_accesses(kind: NativeKind, params: &ParamMap, write: bool) -> u64 {
    let records = p_f64(params, "NumRecords", 1_000_000.0).max(1.0);
    let page = p_f64(params, "PageSize", 4096.0).max(1.0);
    let record = p_f64(params, "RecordSize", 128.0).max(1.0);
    let fanout = (page / record).max(2.0);

    match kind {
        // One bucket probe; a small chance of chained overflow pages is
        // folded into the constant.
        NativeKind::HashIndex => {
            if write {
                2
            } else {
                1
            }
        }
        NativeKind::BTreeIndex => {
            let height = records.log(fanout).ceil().max(1.0) as u64;
            if write {
                height + 1
            } else {
                height
            }
        }
        NativeKind::LsmTree => {
            let levels = p_u64(params, "Levels", 4).max(1);
            if write {
                // Memtable append + one flush amortization.
                1
            } else {
                levels
            }
        }
        NativeKind::Bitmap => 1,
        _ => 1,
    }
}

pub(super) fn index(
    kind: NativeKind,
    call: NativeCall<'_>,
    rng: &mut StdRng,
) -> Result<NativeReturn> {
    let write = matches!(call.method, "Insert" | "Write" | "Set");
    let read = matches!(call.method, "Find" | "Read" | "Get");
    if !write && !read {
        return Err(unknown_method(kind, call.method));
    }

    let empty = ParamMap::new();
    let disk_params = call.disk.unwrap_or(&empty);
    let per_access = disk_op_distribution(disk_params, write);

    // Compose k sequential page accesses: success = all succeed, latency
    // adds. Trim keeps the product from growing past a few dozen buckets.
    let k = page_accesses(kind, call.params, write).max(1);
    let mut dist = per_access.clone();
    for _ in 1..k {
        dist = Outcomes::and(&dist, &per_access, |a, b| AccessResult {
            success: a.success && b.success,
            latency: a.latency + b.latency,
        });
        let (mut ok, fail) = dist.split(|r| r.success);
        ok.trim_to_size(32, 16);
        let mut fail = fail;
        fail.trim_to_size(32, 8);
        ok.append(fail);
        dist = ok;
    }

    Ok(sample_access(&dist, rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn disk_distribution_honors_failure_rate() {
        let d = disk_distribution(0.0005, 0.004, 0.01, 1.0);
        assert!((d.total_weight() - 1.0).abs() < 1e-9);
        assert!((d.availability() - 0.99).abs() < 1e-9);
    }

    #[test]
    fn contention_inflates_latency() {
        let mut params = ParamMap::new();
        params.insert("ReadP50".to_string(), Value::Duration(0.001));
        params.insert("Size".to_string(), Value::Int(1));

        let idle = disk_op_distribution(&params, false);
        params.insert("ArrivalRate".to_string(), Value::Float(500.0));
        let busy = disk_op_distribution(&params, false);

        let idle_p50 = idle.percentile_latency(0.5).unwrap();
        let busy_p50 = busy.percentile_latency(0.5).unwrap();
        assert!(busy_p50 > idle_p50 * 1.5);
    }

    #[test]
    fn cache_hits_follow_hit_rate() {
        let mut params = ParamMap::new();
        params.insert("HitRate".to_string(), Value::Float(0.8));
        let mut rng = StdRng::seed_from_u64(42);
        let mut hits = 0;
        for _ in 0..2000 {
            let call = NativeCall {
                method: "Read",
                args: &[],
                params: &params,
                disk: None,
            };
            if cache(call, &mut rng).unwrap().value == Value::Bool(true) {
                hits += 1;
            }
        }
        let rate = hits as f64 / 2000.0;
        assert!((rate - 0.8).abs() < 0.05);
    }

    #[test]
    fn btree_costs_more_pages_than_hash() {
        let params = ParamMap::new();
        let hash = page_accesses(NativeKind::HashIndex, &params, false);
        let btree = page_accesses(NativeKind::BTreeIndex, &params, false);
        assert!(btree > hash);
    }

    #[test]
    fn index_read_samples_composed_distribution() {
        let params = ParamMap::new();
        let disk_params = ParamMap::new();
        let mut rng = StdRng::seed_from_u64(1);
        let call = NativeCall {
            method: "Find",
            args: &[],
            params: &params,
            disk: Some(&disk_params),
        };
        let ret = index(NativeKind::BTreeIndex, call, &mut rng).unwrap();
        assert!(matches!(ret.value, Value::Bool(_)));
        assert!(ret.latency > 0.0);
    }
}
