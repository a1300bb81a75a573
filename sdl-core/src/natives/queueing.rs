//! M/M/c contention math shared by the queue-like natives.
//!
//! Arrival rate λ comes from the flow evaluator (or a manual override), the
//! server count c from `Size`, and the mean hold time 1/μ from `AvgHoldTime`.
//! Waiting time below saturation is Erlang-C × 1/(cμ − λ); at or above
//! saturation the acquire probability collapses toward zero and the wait is
//! capped at a full-queue drain estimate.

use rand::rngs::StdRng;
use rand::Rng;

use super::{p_f64, p_u64, unknown_method, NativeCall, NativeKind, NativeReturn, ParamMap};
use crate::error::Result;
use crate::value::Value;

/// Erlang-C: probability an arrival has to wait, for `c` servers at offered
/// load `a = λ/μ`. Returns 1.0 at or above saturation.
pub fn erlang_c(c: u64, a: f64) -> f64 {
    if c == 0 {
        return 1.0;
    }
    let rho = a / c as f64;
    if rho >= 1.0 {
        return 1.0;
    }
    // Iterative a^k/k! accumulation keeps the terms in range for large c.
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..c {
        term *= a / k as f64;
        sum += term;
    }
    let top = term * a / c as f64 / (1.0 - rho);
    top / (sum + top)
}

/// Mean waiting time in queue for M/M/c, in seconds. `None` at saturation.
pub fn mmc_wait_time(lambda: f64, c: u64, hold_time: f64) -> Option<f64> {
    if hold_time <= 0.0 || c == 0 {
        return Some(0.0);
    }
    let mu = 1.0 / hold_time;
    let capacity = c as f64 * mu;
    if lambda >= capacity {
        return None;
    }
    let a = lambda / mu;
    Some(erlang_c(c, a) / (capacity - lambda))
}

/// ρ = λ/(cμ). Unclamped, so saturated pools report > 1.
pub fn mmc_utilization(lambda: f64, c: u64, hold_time: f64) -> f64 {
    if c == 0 || hold_time <= 0.0 {
        return 0.0;
    }
    lambda * hold_time / c as f64
}

fn rho_of(params: &ParamMap) -> f64 {
    mmc_utilization(
        p_f64(params, "ArrivalRate", 0.0),
        p_u64(params, "Size", 1),
        p_f64(params, "AvgHoldTime", 0.01),
    )
}

/// Probability an Acquire/Enqueue succeeds under the current load. Below
/// saturation acquisition always succeeds; past it the probability falls off
/// linearly toward zero at ρ = 2.
pub fn success_probability(params: &ParamMap) -> f64 {
    let rho = rho_of(params);
    if rho < 1.0 {
        1.0
    } else {
        ((2.0 - rho) / 2.0).clamp(0.0, 0.5)
    }
}

pub fn utilization_sample(params: &ParamMap) -> super::UtilizationSample {
    let lambda = p_f64(params, "ArrivalRate", 0.0);
    let c = p_u64(params, "Size", 1);
    let hold = p_f64(params, "AvgHoldTime", 0.01);
    let capacity = if hold > 0.0 { c as f64 / hold } else { 0.0 };
    super::UtilizationSample {
        utilization: mmc_utilization(lambda, c, hold),
        capacity,
        current_load: lambda,
    }
}

pub(super) fn pool(
    kind: NativeKind,
    call: NativeCall<'_>,
    rng: &mut StdRng,
) -> Result<NativeReturn> {
    let lambda = p_f64(call.params, "ArrivalRate", 0.0);
    let c = p_u64(call.params, "Size", 1);
    let hold = p_f64(call.params, "AvgHoldTime", 0.01);

    match call.method {
        "Acquire" | "Enqueue" => {
            let p_ok = success_probability(call.params);
            let ok = rng.gen::<f64>() < p_ok;
            let wait = match mmc_wait_time(lambda, c, hold) {
                Some(w) => w,
                // Saturated: a rejected acquire still pays a full-queue scan.
                None => hold * c as f64,
            };
            Ok(NativeReturn {
                value: Value::Bool(ok),
                latency: wait,
            })
        }
        "Dequeue" => {
            let ok = rho_of(call.params) > 0.0;
            Ok(NativeReturn {
                value: Value::Bool(ok),
                latency: hold,
            })
        }
        "Release" => Ok(NativeReturn {
            value: Value::Nil,
            latency: 0.0,
        }),
        other => Err(unknown_method(kind, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn erlang_c_bounds() {
        // Single server: C(1, a) = a for a < 1.
        assert!((erlang_c(1, 0.5) - 0.5).abs() < 1e-9);
        // Saturated.
        assert_eq!(erlang_c(4, 4.0), 1.0);
        // More servers at the same offered load wait less.
        assert!(erlang_c(8, 4.0) < erlang_c(5, 4.0));
    }

    #[test]
    fn wait_time_explodes_near_saturation() {
        let near = mmc_wait_time(99.0, 10, 0.1).unwrap();
        let mid = mmc_wait_time(50.0, 10, 0.1).unwrap();
        assert!(near > mid * 10.0);
        assert!(mmc_wait_time(120.0, 10, 0.1).is_none());
    }

    #[test]
    fn saturated_pool_fails_most_acquires() {
        // Size=10, AvgHoldTime=100ms → capacity 100 rps; drive at 120 rps.
        let mut params = ParamMap::new();
        params.insert("ArrivalRate".to_string(), Value::Float(120.0));
        params.insert("Size".to_string(), Value::Int(10));
        params.insert("AvgHoldTime".to_string(), Value::Duration(0.1));

        let rho = rho_of(&params);
        assert!(rho > 1.0);
        assert!(success_probability(&params) < 0.5);

        let mut rng = StdRng::seed_from_u64(7);
        let mut ok = 0;
        for _ in 0..1000 {
            let call = NativeCall {
                method: "Acquire",
                args: &[],
                params: &params,
                disk: None,
            };
            let ret = pool(NativeKind::ResourcePool, call, &mut rng).unwrap();
            if ret.value == Value::Bool(true) {
                ok += 1;
            }
        }
        assert!((ok as f64) / 1000.0 < 0.5);
    }

    #[test]
    fn unsaturated_pool_always_admits() {
        let mut params = ParamMap::new();
        params.insert("ArrivalRate".to_string(), Value::Float(40.0));
        params.insert("Size".to_string(), Value::Int(10));
        params.insert("AvgHoldTime".to_string(), Value::Duration(0.1));
        assert_eq!(success_probability(&params), 1.0);
        let wait = mmc_wait_time(40.0, 10, 0.1).unwrap();
        assert!(wait >= 0.0 && wait < 0.01);
    }
}
