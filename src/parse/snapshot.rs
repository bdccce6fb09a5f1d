// src/parse/snapshot.rs

//! # Socket-statistics line parser
//!
//! One line of `ss -i -t -n` output (continuation lines already joined)
//! becomes a [`SnapshotRecord`]. Tokens after the endpoints are loosely
//! ordered `key:value` pairs; any metric that is missing or unreadable is
//! left as `None` and judged later by [`SnapshotRecord::validate`].
//!
//! A typical line:
//!
//! ```text
//! ESTAB 0 0 10.0.0.1:40000 10.0.0.2:5001 cubic wscale:7,7 rto:204 rtt:12.5/3
//!   mss:1460 cwnd:10 unacked:1 retrans:0/3 lost:0
//! ```

use crate::error::FlowError;
use crate::flow::record::{FlowTuple, Observation};
use std::net::IpAddr;

/// Everything the parser could pull out of one line.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SnapshotRecord {
    pub tuple:      Option<FlowTuple>,
    pub mss:        Option<i64>,
    pub rtt:        Option<f64>,
    pub wscale:     Option<f64>,
    pub cwnd:       Option<i64>,
    pub unacked:    Option<i64>,
    pub retrans:    Option<i64>,
    pub lost:       Option<i64>,
    pub tcp_state:  Option<String>,
    pub congestion: Option<String>,
}

/// Parse one connection line. Fails only when the two endpoints cannot be
/// found; missing metrics are reported as `None`.
pub fn parse_line(line: &str) -> Result<SnapshotRecord, FlowError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let mut rec = SnapshotRecord::default();

    let mut endpoints = tokens.iter().filter_map(|t| parse_endpoint(t));
    let (src, dst) = match (endpoints.next(), endpoints.next()) {
        (Some(s), Some(d)) => (s, d),
        _ => return Err(FlowError::ParseFailure(line.trim().to_owned())),
    };
    rec.tuple = Some(FlowTuple::new(src.0, src.1, dst.0, dst.1));

    rec.tcp_state = tokens
        .first()
        .filter(|t| is_state_label(t))
        .map(|t| (*t).to_owned());

    for (i, token) in tokens.iter().enumerate() {
        let Some((key, value)) = token.split_once(':') else { continue };
        match key {
            "mss" => rec.mss = parse_int(value),
            "rtt" => rec.rtt = parse_real(first_of(value, '/')),
            "wscale" => {
                rec.wscale = parse_real(first_of(value, ','));
                if rec.congestion.is_none() && i > 0 && is_bare_word(tokens[i - 1]) {
                    rec.congestion = Some(tokens[i - 1].to_owned());
                }
            }
            "cwnd" => rec.cwnd = parse_int(value),
            "unacked" => rec.unacked = parse_int(value),
            "retrans" => {
                let total = value.rsplit_once('/').map_or(value, |(_, total)| total);
                rec.retrans = parse_int(total);
            }
            "lost" => rec.lost = parse_int(value),
            _ => {}
        }
    }
    Ok(rec)
}

impl SnapshotRecord {
    /// Require mss, rtt, wscale and cwnd. Retransmits may be absent; the
    /// raw table fills them in later in the pass.
    pub fn validate(self, line: &str) -> Result<Observation, FlowError> {
        let invalid = |field| FlowError::FieldInvalid { field, line: line.trim().to_owned() };
        let tuple = self.tuple.ok_or_else(|| FlowError::ParseFailure(line.trim().to_owned()))?;
        Ok(Observation {
            tuple,
            mss: self.mss.ok_or_else(|| invalid("mss"))?,
            rtt: self.rtt.ok_or_else(|| invalid("rtt"))?,
            wscale: self.wscale.ok_or_else(|| invalid("wscaleavg"))?,
            cwnd: self.cwnd.ok_or_else(|| invalid("maxcwnd"))?,
            unacked: self.unacked,
            retrans: self.retrans,
            lost: self.lost,
            tcp_state: self.tcp_state,
            congestion: self.congestion,
        })
    }
}

/// `addr:port`, `[v6]:port` or `v6%scope:port`.
fn parse_endpoint(token: &str) -> Option<(IpAddr, u16)> {
    let (addr, port) = token.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    let addr = addr.trim_start_matches('[').trim_end_matches(']');
    let addr = addr.split_once('%').map_or(addr, |(a, _)| a);
    let ip = addr.parse::<IpAddr>().ok()?;
    Some((ip, port))
}

fn is_state_label(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_uppercase() || c == '-')
}

fn is_bare_word(token: &str) -> bool {
    !token.is_empty()
        && !token.contains(':')
        && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && token.chars().any(|c| c.is_ascii_alphabetic())
}

fn first_of(value: &str, sep: char) -> &str {
    value.split(sep).next().unwrap_or(value)
}

fn parse_int(value: &str) -> Option<i64> {
    value.parse::<u64>().ok().and_then(|v| i64::try_from(v).ok())
}

fn parse_real(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const ESTAB: &str = "ESTAB 0 0 10.0.0.1:40000 10.0.0.2:5001 cubic wscale:7,7 rto:204 \
                         rtt:12.5/3.25 ato:40 mss:1460 rcvmss:536 advmss:1460 cwnd:10 \
                         ssthresh:7 bytes_acked:100 unacked:2 retrans:0/3 lost:1 \
                         send 9.3Mbps rcv_space:29200";

    #[test]
    fn full_line_is_parsed() {
        let rec = parse_line(ESTAB).unwrap();
        let tuple = rec.tuple.unwrap();
        assert_eq!(tuple.src_ip.to_string(), "10.0.0.1");
        assert_eq!((tuple.src_port, tuple.dst_port), (40000, 5001));
        assert_eq!(rec.mss, Some(1460));
        assert_eq!(rec.rtt, Some(12.5));
        assert_eq!(rec.wscale, Some(7.0));
        assert_eq!(rec.cwnd, Some(10), "ssthresh and snd_cwnd must not leak in");
        assert_eq!(rec.unacked, Some(2));
        assert_eq!(rec.retrans, Some(3));
        assert_eq!(rec.lost, Some(1));
        assert_eq!(rec.tcp_state.as_deref(), Some("ESTAB"));
        assert_eq!(rec.congestion.as_deref(), Some("cubic"));
    }

    #[test]
    fn tokens_may_arrive_in_any_order() {
        let rec = parse_line("ESTAB 0 0 1.2.3.4:1 5.6.7.8:2 cwnd:3 mss:100 wscale:2,2 rtt:4/1")
            .unwrap();
        assert_eq!((rec.cwnd, rec.mss, rec.wscale, rec.rtt), (Some(3), Some(100), Some(2.0), Some(4.0)));
        assert_eq!(rec.retrans, None);
        assert_eq!(rec.congestion, None, "no bare word before wscale");
    }

    #[test]
    fn ipv6_and_scoped_endpoints() {
        let rec = parse_line("ESTAB 0 0 [2001:db8::1]:22 fe80::2%eth0:5001 mss:1440 rtt:1 wscale:7 cwnd:10")
            .unwrap();
        let t = rec.tuple.unwrap();
        assert!(t.src_ip.is_ipv6());
        assert_eq!(t.dst_ip.to_string(), "fe80::2");
        assert_eq!(t.dst_port, 5001);
    }

    #[test]
    fn missing_endpoint_is_a_parse_failure() {
        let err = parse_line("ESTAB 0 0 10.0.0.1:40000 mss:1460").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseFailure);
        assert!(parse_line("").is_err());
        assert!(parse_line("ESTAB 0 0 10.0.0.1:http 10.0.0.2:5001").is_err());
    }

    #[test]
    fn bare_retrans_count_is_accepted() {
        let rec = parse_line("ESTAB 0 0 1.2.3.4:1 5.6.7.8:2 retrans:4").unwrap();
        assert_eq!(rec.retrans, Some(4));
    }

    #[test]
    fn validation_names_the_first_missing_field() {
        let line = "ESTAB 0 0 10.0.0.1:40000 10.0.0.2:5001 rtt:1/1 wscale:7 cwnd:10";
        match parse_line(line).unwrap().validate(line) {
            Err(FlowError::FieldInvalid { field, .. }) => assert_eq!(field, "mss"),
            other => panic!("expected FieldInvalid, got {other:?}"),
        }
        let line = "ESTAB 0 0 10.0.0.1:40000 10.0.0.2:5001 mss:1460 rtt:x wscale:7 cwnd:10";
        assert!(matches!(
            parse_line(line).unwrap().validate(line),
            Err(FlowError::FieldInvalid { field: "rtt", .. })
        ));
    }

    #[test]
    fn missing_retrans_still_validates() {
        let line = "ESTAB 0 0 10.0.0.1:40000 10.0.0.2:5001 mss:1460 rtt:1 wscale:7 cwnd:10";
        let obs = parse_line(line).unwrap().validate(line).unwrap();
        assert_eq!(obs.retrans, None);
        assert_eq!(obs.cwnd, 10);
    }
}
