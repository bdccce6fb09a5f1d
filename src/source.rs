// src/source.rs

//! External collaborators.
//!
//! The core only sees two traits: something that hands over the text of the
//! two connection sources, and something that names the interface behind a
//! destination address. The system-backed versions shell out to `ss` and
//! `ip`, and read `/proc/net/tcp`. Calls are blocking and carry no timeout.

use std::{
    fs,
    net::IpAddr,
    path::PathBuf,
    process::Command,
};

use crate::error::FlowError;

/// Supplies the raw text of one pass.
pub trait SnapshotSource: Send + Sync {
    /// One line per connection, header removed, continuation lines joined.
    fn poll_socket_stats(&self) -> Result<Vec<String>, FlowError>;

    /// One row per socket, header removed.
    fn poll_raw_table(&self) -> Result<Vec<String>, FlowError>;
}

/// Maps a destination address to the interface that routes it.
pub trait InterfaceResolver: Send + Sync {
    fn resolve(&self, addr: IpAddr) -> Option<String>;
}

// ───── system-backed source ─────────────────────────────────────────────────

/// `ss -i -t -n` plus `/proc/net/tcp`.
#[derive(Debug, Clone)]
pub struct SystemSource {
    pub ss_program: PathBuf,
    pub raw_table:  PathBuf,
}

impl Default for SystemSource {
    fn default() -> Self {
        Self { ss_program: "ss".into(), raw_table: "/proc/net/tcp".into() }
    }
}

impl SnapshotSource for SystemSource {
    fn poll_socket_stats(&self) -> Result<Vec<String>, FlowError> {
        let out = Command::new(&self.ss_program)
            .args(["-i", "-t", "-n"])
            .output()
            .map_err(|e| FlowError::SourceFatal(format!("{}: {}", self.ss_program.display(), e)))?;
        if !out.status.success() {
            return Err(FlowError::SourceFatal(format!(
                "{} exited with {}",
                self.ss_program.display(),
                out.status
            )));
        }
        Ok(join_continuations(&String::from_utf8_lossy(&out.stdout)))
    }

    fn poll_raw_table(&self) -> Result<Vec<String>, FlowError> {
        let text = fs::read_to_string(&self.raw_table)
            .map_err(|e| FlowError::SourceFatal(format!("{}: {}", self.raw_table.display(), e)))?;
        Ok(text
            .lines()
            .skip(1)
            .filter(|l| !l.trim().is_empty())
            .map(str::to_owned)
            .collect())
    }
}

/// Drop the header line and fold indented detail lines onto the connection
/// line above them.
pub fn join_continuations(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let is_detail = line.starts_with(char::is_whitespace);
        match out.last_mut() {
            Some(prev) if is_detail => {
                prev.push(' ');
                prev.push_str(line.trim());
            }
            _ => out.push(line.trim().to_owned()),
        }
    }
    out
}

// ───── interface resolution ─────────────────────────────────────────────────

/// `ip route get <addr>` (`ip -6 ...` for v6).
#[derive(Debug, Clone, Default)]
pub struct RouteResolver;

impl InterfaceResolver for RouteResolver {
    fn resolve(&self, addr: IpAddr) -> Option<String> {
        let mut cmd = Command::new("ip");
        if addr.is_ipv6() {
            cmd.arg("-6");
        }
        let out = cmd.args(["route", "get", &addr.to_string()]).output().ok()?;
        if !out.status.success() {
            log::debug!("no route to {}: {}", addr, String::from_utf8_lossy(&out.stderr).trim());
            return None;
        }
        route_device(&String::from_utf8_lossy(&out.stdout))
    }
}

/// Token following `dev` in `ip route get` output.
pub fn route_device(output: &str) -> Option<String> {
    let mut tokens = output.split_whitespace();
    while let Some(t) = tokens.next() {
        if t == "dev" {
            return tokens.next().map(str::to_owned);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_lines_fold_onto_their_connection() {
        let text = "State Recv-Q Send-Q Local Address:Port Peer Address:Port\n\
                    ESTAB 0 0 10.0.0.1:40000 10.0.0.2:5001\n\
                    \t cubic wscale:7,7 rtt:12.5/3 mss:1460 cwnd:10\n\
                    ESTAB 0 0 10.0.0.1:40001 10.0.0.3:22\n\
                    \t cubic wscale:7,7 rtt:1/1 mss:1448 cwnd:8\n";
        let lines = join_continuations(text);
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "ESTAB 0 0 10.0.0.1:40000 10.0.0.2:5001 cubic wscale:7,7 rtt:12.5/3 mss:1460 cwnd:10"
        );
        assert!(lines[1].ends_with("cwnd:8"));
    }

    #[test]
    fn header_only_output_is_empty() {
        assert!(join_continuations("State Recv-Q Send-Q\n").is_empty());
        assert!(join_continuations("").is_empty());
    }

    #[test]
    fn route_device_is_found() {
        let out = "10.0.0.2 via 10.0.0.254 dev eth1 src 10.0.0.1 uid 0 \n    cache \n";
        assert_eq!(route_device(out).as_deref(), Some("eth1"));
        assert_eq!(route_device("unreachable"), None);
    }

    #[test]
    fn missing_raw_table_is_source_fatal() {
        let src = SystemSource { raw_table: "/nonexistent/tcp".into(), ..Default::default() };
        let err = src.poll_raw_table().unwrap_err();
        assert!(err.is_pass_fatal());
    }
}
