// src/parse/raw_table.rs

//! `/proc/net/tcp` row parser.
//!
//! Only used for the retransmit counter, which `ss` does not always report.
//! Addresses are hex words in host (little-endian) order, so `0100007F`
//! is `127.0.0.1`, not `1.0.0.127`.

use crate::error::FlowError;
use crate::flow::record::FlowTuple;
use std::net::{IpAddr, Ipv4Addr};

/// Endpoint text of an unbound/listening socket.
const WILDCARD: &str = "00000000:0000";

/// Column holding the retransmit counter (`retrnsmt`).
const RETRANS_COLUMN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTableRow {
    pub tuple:   FlowTuple,
    pub retrans: i64,
}

/// Parse one data row. `Ok(None)` for wildcard rows, which are sockets
/// rather than flows.
pub fn parse_row(line: &str) -> Result<Option<RawTableRow>, FlowError> {
    let cols: Vec<&str> = line.split_whitespace().collect();
    let fail = || FlowError::ParseFailure(line.trim().to_owned());
    if cols.len() <= RETRANS_COLUMN {
        return Err(fail());
    }
    if cols[1] == WILDCARD || cols[2] == WILDCARD {
        return Ok(None);
    }

    let (src_ip, src_port) = decode_endpoint(cols[1]).ok_or_else(fail)?;
    let (dst_ip, dst_port) = decode_endpoint(cols[2]).ok_or_else(fail)?;
    let retrans = u32::from_str_radix(cols[RETRANS_COLUMN], 16).map_err(|_| fail())?;

    Ok(Some(RawTableRow {
        tuple: FlowTuple::new(IpAddr::V4(src_ip), src_port, IpAddr::V4(dst_ip), dst_port),
        retrans: i64::from(retrans),
    }))
}

/// `AABBCCDD:PPPP` → (`DD.CC.BB.AA`, port).
fn decode_endpoint(field: &str) -> Option<(Ipv4Addr, u16)> {
    let (addr, port) = field.split_once(':')?;
    if addr.len() != 8 {
        return None;
    }
    let word = u32::from_str_radix(addr, 16).ok()?;
    let port = u16::from_str_radix(port, 16).ok()?;
    Some((Ipv4Addr::from(word.to_le_bytes()), port))
}
