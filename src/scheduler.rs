// src/scheduler.rs

//! Pass scheduler.
//!
//! One pass = poll both sources, reconcile every record inside a single
//! transaction, commit. The loop waits `interval` after each pass finishes,
//! so two passes never overlap on the store.

use std::time::Instant;

use chrono::{DateTime, Utc};
use crossbeam::channel::{after, select, Receiver};
use log::Level;
use metrics::{counter, histogram};

use crate::config::Config;
use crate::db::Store;
use crate::error::FlowError;
use crate::export::FlowExporter;
use crate::flow::{PassSummary, Reconciler};
use crate::source::{InterfaceResolver, SnapshotSource};

pub struct Scheduler {
    cfg:      Config,
    source:   Box<dyn SnapshotSource>,
    resolver: Box<dyn InterfaceResolver>,
    exporter: Option<FlowExporter>,
}

impl Scheduler {
    pub fn new(
        cfg: Config,
        source: Box<dyn SnapshotSource>,
        resolver: Box<dyn InterfaceResolver>,
    ) -> Self {
        let exporter = FlowExporter::from_config(&cfg.export);
        Self { cfg, source, resolver, exporter }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Open the store once at startup so a bad path fails before the loop.
    pub fn prepare(&self) -> Result<(), FlowError> {
        let store = Store::open(&self.cfg.database)?;
        if !store.ensure_schema()? {
            flowmon_log!(Level::Info, "scheduler", "Using existing table in {}", self.cfg.database.path.display());
        }
        Ok(())
    }

    /// Run passes until `shutdown` fires or its sender goes away. Returns
    /// the number of passes attempted.
    pub fn run(&self, shutdown: &Receiver<()>) -> u64 {
        let interval = self.cfg.monitor.interval;
        flowmon_log!(
            Level::Info,
            "scheduler",
            "Monitoring every {:?} (timeout {:?})",
            interval,
            self.cfg.monitor.timeout
        );

        let mut passes = 0;
        loop {
            if let Err(e) = self.run_pass() {
                counter!("flowmon_passes_failed_total").increment(1);
                flowmon_log!(Level::Error, "scheduler", "Pass aborted: {}", e);
            }
            passes += 1;

            select! {
                recv(shutdown) -> _ => break,
                recv(after(interval)) -> _ => {}
            }
        }
        flowmon_log!(Level::Info, "scheduler", "Stopped after {} pass(es)", passes);
        passes
    }

    pub fn run_pass(&self) -> Result<PassSummary, FlowError> {
        self.run_pass_at(Utc::now())
    }

    /// One pass stamped with `now`. Source failures abort before the store
    /// is opened; store failures roll the whole pass back.
    pub fn run_pass_at(&self, now: DateTime<Utc>) -> Result<PassSummary, FlowError> {
        let started = Instant::now();

        let ss_lines = self.source.poll_socket_stats()?;
        let raw_lines = self.source.poll_raw_table()?;
        log::debug!("polled {} ss line(s), {} raw row(s)", ss_lines.len(), raw_lines.len());

        let mut store = Store::open(&self.cfg.database)?;
        store.ensure_schema()?;
        let tx = store.begin_pass()?;
        let summary = Reconciler::new(self.cfg.monitor.timeout, self.resolver.as_ref())
            .with_exporter(self.exporter.as_ref())
            .run_pass(&tx.table(), &ss_lines, &raw_lines, now)?;
        tx.commit()?;

        counter!("flowmon_flows_inserted_total").increment(summary.new as u64);
        counter!("flowmon_flows_updated_total").increment(summary.updated as u64);
        counter!("flowmon_records_discarded_total").increment(summary.discarded as u64);
        histogram!("flowmon_pass_duration_seconds").record(started.elapsed().as_secs_f64());

        flowmon_log!(
            Level::Info,
            "scheduler",
            "{} new connections loaded and {} connections updated at {} \
             ({} retransmit merges, {} discarded)",
            summary.new,
            summary.updated,
            now.format("%Y/%m/%d %H:%M:%S"),
            summary.retrans_merged,
            summary.discarded
        );
        Ok(summary)
    }
}
