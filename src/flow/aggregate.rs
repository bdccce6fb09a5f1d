// src/flow/aggregate.rs

//! Metric update laws.
//!
//! Pure functions: they never touch the store. The reconciler reads a row,
//! asks these for the next version of it and writes that back whole, so an
//! update either lands completely or not at all.

use super::record::{FlowRecord, Observation};
use chrono::{DateTime, Utc};

/// Row for the first sighting of a flow instance.
pub fn start_flow(
    obs: &Observation,
    flow_num: u32,
    iface: Option<String>,
    now: DateTime<Utc>,
) -> FlowRecord {
    FlowRecord {
        tuple: obs.tuple,
        flow_num,
        iface,
        mss: obs.mss,
        rtt_avg: obs.rtt,
        wscale_avg: obs.wscale,
        max_cwnd: obs.cwnd,
        sum_cwnd: obs.cwnd,
        unacked: obs.unacked,
        retrans: obs.retrans.unwrap_or(0),
        lost: obs.lost,
        tcp_state: obs.tcp_state.clone(),
        congestion: obs.congestion.clone(),
        intervals: 0,
        created: now,
        modified: now,
    }
}

/// Fold a continuation observation into `existing`.
pub fn continue_flow(
    existing: &FlowRecord,
    obs: &Observation,
    iface: Option<String>,
    now: DateTime<Utc>,
) -> FlowRecord {
    FlowRecord {
        tuple: existing.tuple,
        flow_num: existing.flow_num,
        iface,
        mss: obs.mss,
        rtt_avg: min_rtt(existing.rtt_avg, obs.rtt),
        wscale_avg: obs.wscale,
        max_cwnd: existing.max_cwnd.max(obs.cwnd),
        sum_cwnd: existing.sum_cwnd + obs.cwnd,
        unacked: obs.unacked,
        retrans: obs
            .retrans
            .and_then(|r| merge_retrans(existing.retrans, r))
            .unwrap_or(existing.retrans),
        lost: obs.lost,
        tcp_state: obs.tcp_state.clone(),
        congestion: obs.congestion.clone(),
        intervals: existing.intervals + 1,
        created: existing.created,
        modified: now,
    }
}

/// Smallest positive RTT seen so far. A stored value that is zero,
/// negative or NaN is replaced outright. Unlike a plain `min`, a zero
/// sample never wins over a positive stored value: zero means the kernel
/// had no measurement yet, not a faster path.
pub fn min_rtt(stored: f64, sample: f64) -> f64 {
    if stored > 0.0 && (stored < sample || sample <= 0.0) {
        stored
    } else {
        sample
    }
}

/// Cumulative counters only move forward: `Some(new)` when `reported`
/// exceeds `stored`, `None` when the stored value must stay.
pub fn merge_retrans(stored: i64, reported: i64) -> Option<i64> {
    (reported > stored).then_some(reported)
}
