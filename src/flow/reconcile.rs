// src/flow/reconcile.rs

//! # Flow reconciliation
//!
//! Decides, for every observation in a pass, whether it continues the most
//! recent instance of its 4-tuple or starts a new one:
//!
//! 1. Try to insert the tuple as flow 0. Success means a never-seen tuple.
//! 2. A key conflict means the tuple is known. Look up its highest flow
//!    number and how long ago that row was touched.
//! 3. Within `timeout`: merge into that row. Beyond it: insert a fresh row
//!    with the next flow number, leaving the stale one untouched.
//!
//! Raw-table rows come after the snapshot lines of the same pass and can
//! only raise the retransmit counter of the most recent instance.

use std::{collections::HashMap, net::IpAddr, time::Duration};

use chrono::{DateTime, Utc};

use super::aggregate::{continue_flow, merge_retrans, start_flow};
use super::record::{Field, Observation};
use crate::db::FlowTable;
use crate::error::{ErrorKind, FlowError};
use crate::export::FlowExporter;
use crate::parse::{parse_line, parse_row, RawTableRow};
use crate::source::InterfaceResolver;

/// What happened to one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// First sighting of the tuple; row `flow_num` = 0 created.
    Inserted { flow_num: u32 },
    /// Merged into the live row.
    Continued { flow_num: u32 },
    /// Tuple seen before but idle past the timeout; new row created.
    Reused { flow_num: u32 },
}

/// Per-pass counters, logged by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub new:            usize,
    pub updated:        usize,
    pub retrans_merged: usize,
    pub discarded:      usize,
}

pub struct Reconciler<'a> {
    timeout:  Duration,
    resolver: &'a dyn InterfaceResolver,
    exporter: Option<&'a FlowExporter>,
    ifaces:   HashMap<IpAddr, Option<String>>,
}

impl<'a> Reconciler<'a> {
    pub fn new(timeout: Duration, resolver: &'a dyn InterfaceResolver) -> Self {
        Self { timeout, resolver, exporter: None, ifaces: HashMap::new() }
    }

    /// Dump each completed instance when its tuple gets reused.
    pub fn with_exporter(mut self, exporter: Option<&'a FlowExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    /// Reconcile every line of both sources against `table`. Per-record
    /// problems are logged and counted; only store failures escape.
    pub fn run_pass(
        &mut self,
        table: &FlowTable<'_>,
        ss_lines: &[String],
        raw_lines: &[String],
        now: DateTime<Utc>,
    ) -> Result<PassSummary, FlowError> {
        let mut summary = PassSummary::default();

        for line in ss_lines {
            let obs = match parse_line(line).and_then(|rec| rec.validate(line)) {
                Ok(obs) => obs,
                Err(e) => {
                    log::warn!("{}", e);
                    summary.discarded += 1;
                    continue;
                }
            };
            if obs.retrans.is_none() {
                log::debug!("{} had no retrans from ss; left to the raw table", obs.tuple);
            }
            match self.reconcile(table, &obs, now) {
                Ok(Outcome::Inserted { .. } | Outcome::Reused { .. }) => summary.new += 1,
                Ok(Outcome::Continued { .. }) => summary.updated += 1,
                Err(e) if e.is_pass_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("{}: {}", obs.tuple, e);
                    summary.discarded += 1;
                }
            }
        }

        for line in raw_lines {
            let row = match parse_row(line) {
                Ok(Some(row)) => row,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("{}", e);
                    summary.discarded += 1;
                    continue;
                }
            };
            if self.apply_raw(table, &row, now)? {
                summary.retrans_merged += 1;
            }
        }

        Ok(summary)
    }

    /// Fold one validated observation into the store.
    pub fn reconcile(
        &mut self,
        table: &FlowTable<'_>,
        obs: &Observation,
        now: DateTime<Utc>,
    ) -> Result<Outcome, FlowError> {
        let iface = self.iface_for(obs.tuple.dst_ip);

        match table.insert_new(&start_flow(obs, 0, iface.clone(), now)) {
            Ok(()) => return Ok(Outcome::Inserted { flow_num: 0 }),
            Err(e) if e.kind() == ErrorKind::StoreConflict => {}
            Err(e) => return Err(e),
        }

        let (flow_num, modified) = table.most_recent_for_tuple(&obs.tuple)?.ok_or_else(|| {
            FlowError::StoreFatal(format!("{} conflicted but has no rows", obs.tuple))
        })?;
        let elapsed = idle_for(modified, now);

        if elapsed <= self.timeout {
            let existing = table.fetch_record(&obs.tuple, flow_num)?.ok_or_else(|| {
                FlowError::StoreFatal(format!("{} flow {} vanished", obs.tuple, flow_num))
            })?;
            let next = continue_flow(&existing, obs, iface, now);
            table.update_record(&obs.tuple, flow_num, &next.mutable_fields(), now)?;
            return Ok(Outcome::Continued { flow_num });
        }

        let next_num = flow_num + 1;
        table.insert_new(&start_flow(obs, next_num, iface, now))?;
        log::debug!(
            "{} idle for {:?}; starting flow {}",
            obs.tuple,
            elapsed,
            next_num
        );
        self.export_completed(table, obs, flow_num)?;
        Ok(Outcome::Reused { flow_num: next_num })
    }

    /// Raise the stored retransmit count of the tuple's latest instance to
    /// the kernel's cumulative counter. Instances idle past `timeout` are
    /// left alone, and `modified` is never refreshed: only a valid snapshot
    /// observation keeps a flow alive. Returns `true` when the row changed.
    pub fn apply_raw(
        &self,
        table: &FlowTable<'_>,
        row: &RawTableRow,
        now: DateTime<Utc>,
    ) -> Result<bool, FlowError> {
        let Some((flow_num, modified)) = table.most_recent_for_tuple(&row.tuple)? else {
            return Ok(false);
        };
        if idle_for(modified, now) > self.timeout {
            log::debug!("{} flow {} is stale; raw retrans ignored", row.tuple, flow_num);
            return Ok(false);
        }
        let stored = table
            .fetch_field(&row.tuple, flow_num, Field::Retrans)?
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        match merge_retrans(stored, row.retrans) {
            Some(v) => {
                table.set_fields(&row.tuple, flow_num, &[(Field::Retrans, v.into())])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn iface_for(&mut self, addr: IpAddr) -> Option<String> {
        let resolver = self.resolver;
        self.ifaces
            .entry(addr)
            .or_insert_with(|| {
                let iface = resolver.resolve(addr);
                if iface.is_none() {
                    log::debug!("no interface for {}", addr);
                }
                iface
            })
            .clone()
    }

    fn export_completed(
        &self,
        table: &FlowTable<'_>,
        obs: &Observation,
        flow_num: u32,
    ) -> Result<(), FlowError> {
        let Some(exporter) = self.exporter else { return Ok(()) };
        if let Some(done) = table.fetch_record(&obs.tuple, flow_num)? {
            match exporter.write(&done) {
                Ok(path) => log::debug!("exported {} flow {} to {}", obs.tuple, flow_num, path.display()),
                Err(e) => log::warn!("export of {} flow {} failed: {}", obs.tuple, flow_num, e),
            }
        }
        Ok(())
    }
}

/// Time since `modified`; a clock step backwards counts as zero.
fn idle_for(modified: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(modified).to_std().unwrap_or_default()
}
