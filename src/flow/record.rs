// src/flow/record.rs

//! Flow identity and the stored row shape.
//!
//! A logical flow is a 4-tuple plus a `flow_num` that separates successive
//! reuses of the same tuple. `FlowRecord` mirrors one row of the `conns`
//! table; `Field` names its columns so callers never build SQL by hand.

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use serde::Serialize;
use std::{fmt, net::IpAddr};

/// Source/destination endpoints of one TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FlowTuple {
    pub src_ip:   IpAddr,
    pub src_port: u16,
    pub dst_ip:   IpAddr,
    pub dst_port: u16,
}

impl FlowTuple {
    pub fn new(src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16) -> Self {
        Self { src_ip, src_port, dst_ip, dst_port }
    }

    /// File-name friendly form, e.g. `10.0.0.1_40000_10.0.0.2_5001`.
    pub fn slug(&self) -> String {
        format!("{}_{}_{}_{}", self.src_ip, self.src_port, self.dst_ip, self.dst_port)
            .replace(':', "-")
    }
}

impl fmt::Display for FlowTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.src_ip, self.dst_ip) {
            (IpAddr::V4(s), IpAddr::V4(d)) => {
                write!(f, "{}:{} -> {}:{}", s, self.src_port, d, self.dst_port)
            }
            (s, d) => write!(f, "[{}]:{} -> [{}]:{}", s, self.src_port, d, self.dst_port),
        }
    }
}

/// A snapshot line that passed field validation. Only the optional fields
/// may still be missing.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub tuple:      FlowTuple,
    pub mss:        i64,
    pub rtt:        f64,
    pub wscale:     f64,
    pub cwnd:       i64,
    pub unacked:    Option<i64>,
    pub retrans:    Option<i64>,
    pub lost:       Option<i64>,
    pub tcp_state:  Option<String>,
    pub congestion: Option<String>,
}

/// One row of the `conns` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowRecord {
    pub tuple:      FlowTuple,
    pub flow_num:   u32,
    pub iface:      Option<String>,
    pub mss:        i64,
    /// Running minimum of positive RTT samples, not a mean.
    pub rtt_avg:    f64,
    /// Last reported send window scale.
    pub wscale_avg: f64,
    pub max_cwnd:   i64,
    pub sum_cwnd:   i64,
    pub unacked:    Option<i64>,
    pub retrans:    i64,
    pub lost:       Option<i64>,
    pub tcp_state:  Option<String>,
    pub congestion: Option<String>,
    pub intervals:  u32,
    pub created:    DateTime<Utc>,
    pub modified:   DateTime<Utc>,
}

impl FlowRecord {
    /// Every column an update may overwrite, with its current value.
    pub fn mutable_fields(&self) -> Vec<(Field, FieldValue)> {
        vec![
            (Field::Iface, self.iface.clone().into()),
            (Field::Mss, self.mss.into()),
            (Field::RttAvg, self.rtt_avg.into()),
            (Field::WscaleAvg, self.wscale_avg.into()),
            (Field::MaxCwnd, self.max_cwnd.into()),
            (Field::SumCwnd, self.sum_cwnd.into()),
            (Field::Unacked, self.unacked.into()),
            (Field::Retrans, self.retrans.into()),
            (Field::Lost, self.lost.into()),
            (Field::Tcp, self.tcp_state.clone().into()),
            (Field::Congestion, self.congestion.clone().into()),
            (Field::Intervals, i64::from(self.intervals).into()),
        ]
    }
}

/// Non-key columns of `conns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Iface,
    Mss,
    RttAvg,
    WscaleAvg,
    MaxCwnd,
    SumCwnd,
    Unacked,
    Retrans,
    Lost,
    Tcp,
    Congestion,
    Intervals,
    Created,
    Modified,
}

impl Field {
    pub fn column(self) -> &'static str {
        match self {
            Field::Iface      => "iface",
            Field::Mss        => "mss",
            Field::RttAvg     => "rttavg",
            Field::WscaleAvg  => "wscaleavg",
            Field::MaxCwnd    => "maxcwnd",
            Field::SumCwnd    => "sumcwnd",
            Field::Unacked    => "unacked",
            Field::Retrans    => "retrans",
            Field::Lost       => "lost",
            Field::Tcp        => "tcp",
            Field::Congestion => "congestion",
            Field::Intervals  => "intervals",
            Field::Created    => "created",
            Field::Modified   => "modified",
        }
    }
}

/// A single column value as read from or written to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldValue::Integer(v) => Some(v),
            FieldValue::Real(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            FieldValue::Integer(v) => Some(v as f64),
            FieldValue::Real(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self { FieldValue::Integer(v) }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self { FieldValue::Real(v) }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self { FieldValue::Text(v) }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(FieldValue::Null, Into::into)
    }
}

impl From<ValueRef<'_>> for FieldValue {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => FieldValue::Null,
            ValueRef::Integer(i) => FieldValue::Integer(i),
            ValueRef::Real(r) => FieldValue::Real(r),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                FieldValue::Text(String::from_utf8_lossy(t).into_owned())
            }
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            FieldValue::Real(r) => ToSqlOutput::Owned(Value::Real(*r)),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn v6_tuples_display_bracketed_and_slug_without_colons() {
        let t = FlowTuple::new(
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            22,
            "2001:db8::1".parse().unwrap(),
            5001,
        );
        assert_eq!(t.to_string(), "[::1]:22 -> [2001:db8::1]:5001");
        assert!(!t.slug().contains(':'));
    }

    #[test]
    fn optional_values_become_null() {
        assert_eq!(FieldValue::from(None::<i64>), FieldValue::Null);
        assert_eq!(FieldValue::from(Some(3_i64)).as_i64(), Some(3));
        assert_eq!(FieldValue::from(Some("eth0".to_string())).as_str(), Some("eth0"));
    }
}
