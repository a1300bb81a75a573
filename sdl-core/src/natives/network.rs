//! Network link and batcher natives.

use rand::rngs::StdRng;
use rand::Rng;

use super::{p_f64, p_str, p_u64, unknown_method, NativeCall, NativeKind, NativeReturn};
use crate::error::Result;
use crate::value::Value;

/// Latency = base + a uniform jitter draw; success = 1 − loss probability.
pub(super) fn link(call: NativeCall<'_>, rng: &mut StdRng) -> Result<NativeReturn> {
    match call.method {
        "Send" => {
            let base = p_f64(call.params, "BaseLatency", 0.001);
            let jitter = p_f64(call.params, "Jitter", 0.0005);
            let loss = p_f64(call.params, "LossProb", 0.0);
            let latency = base + rng.gen::<f64>() * jitter.max(0.0);
            let ok = rng.gen::<f64>() >= loss;
            Ok(NativeReturn {
                value: Value::Bool(ok),
                latency,
            })
        }
        other => Err(unknown_method(NativeKind::NetworkLink, other)),
    }
}

/// Expected batching wait plus the downstream processing latency.
///
/// Size-based batching waits on average for half the batch to fill at the
/// current arrival rate; time-based batching waits half the flush interval.
pub(super) fn batcher(call: NativeCall<'_>) -> Result<NativeReturn> {
    match call.method {
        "Submit" => {
            let mode = p_str(call.params, "Mode", "size");
            let wait = if mode == "time" {
                p_f64(call.params, "FlushInterval", 0.01) * 0.5
            } else {
                let batch = p_u64(call.params, "BatchSize", 16).max(1);
                let rate = p_f64(call.params, "ArrivalRate", 0.0);
                if rate > 0.0 {
                    (batch.saturating_sub(1)) as f64 * 0.5 / rate
                } else {
                    // Nothing else arriving: fall back to the flush interval.
                    p_f64(call.params, "FlushInterval", 0.01)
                }
            };
            let downstream = p_f64(call.params, "DownstreamLatency", 0.002);
            Ok(NativeReturn {
                value: Value::Bool(true),
                latency: wait + downstream,
            })
        }
        other => Err(unknown_method(NativeKind::Batcher, other)),
    }
}
