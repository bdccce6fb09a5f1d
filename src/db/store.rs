// src/db/store.rs

//! # Flow store
//!
//! Durable `conns` table keyed by (4-tuple, flow number).
//!
//! `Store` owns the connection for one pass. All reads and writes go through
//! a [`FlowTable`] view, either directly on the store or inside a
//! [`PassTx`]; the transaction commits once at the end of the pass and rolls
//! back if dropped, so a pass lands whole or not at all.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::Level;
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row, ToSql, Transaction};

use super::connection::open_db_connection;
use crate::config::model::DatabaseConfig;
use crate::error::FlowError;
use crate::flow::record::{Field, FieldValue, FlowRecord, FlowTuple};

const SCHEMA: &str = include_str!("../../resources/schema.sql");

const SELECT_RECORD: &str = "SELECT sourceip, sourceport, destip, destport, flownum, iface, mss, \
       rttavg, wscaleavg, maxcwnd, sumcwnd, unacked, retrans, lost, tcp, congestion, intervals, \
       created, modified \
     FROM conns \
     WHERE sourceip = ?1 AND sourceport = ?2 AND destip = ?3 AND destport = ?4 AND flownum = ?5";

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open the database file named by `cfg.path`.
    pub fn open(cfg: &DatabaseConfig) -> Result<Self, FlowError> {
        Self::open_at(&cfg.path, cfg)
    }

    pub fn open_at(path: &Path, cfg: &DatabaseConfig) -> Result<Self, FlowError> {
        let conn = open_db_connection(path, cfg)
            .map_err(|e| FlowError::StoreFatal(format!("{}: {}", path.display(), e)))?;
        Ok(Self { conn })
    }

    /// Create `conns` when it does not exist yet. Never alters an existing
    /// table. Returns `true` when the table was created.
    pub fn ensure_schema(&self) -> Result<bool, FlowError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'conns')",
            [],
            |r| r.get(0),
        )?;
        if exists {
            return Ok(false);
        }
        flowmon_log!(Level::Warn, "store", "Table doesn't exist; creating table conns");
        self.conn.execute_batch(SCHEMA)?;
        Ok(true)
    }

    /// Read-only access outside a pass.
    pub fn table(&self) -> FlowTable<'_> {
        FlowTable { conn: &self.conn }
    }

    /// Start the single transaction of a pass.
    pub fn begin_pass(&mut self) -> Result<PassTx<'_>, FlowError> {
        Ok(PassTx { tx: self.conn.transaction()? })
    }
}

/// Writes of one pass. Dropping without [`PassTx::commit`] rolls back.
pub struct PassTx<'c> {
    tx: Transaction<'c>,
}

impl PassTx<'_> {
    pub fn table(&self) -> FlowTable<'_> {
        FlowTable { conn: &self.tx }
    }

    pub fn commit(self) -> Result<(), FlowError> {
        self.tx.commit().map_err(|e| FlowError::StoreFatal(format!("commit failed: {e}")))
    }
}

/// Row-level operations on `conns`.
#[derive(Clone, Copy)]
pub struct FlowTable<'c> {
    conn: &'c Connection,
}

impl FlowTable<'_> {
    /// Insert a brand-new row. An existing key yields `StoreConflict`.
    pub fn insert_new(&self, rec: &FlowRecord) -> Result<(), FlowError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO conns \
               (sourceip, destip, sourceport, destport, flownum, iface, mss, rttavg, wscaleavg, \
                maxcwnd, sumcwnd, unacked, retrans, lost, tcp, congestion, intervals, \
                created, modified) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
        )?;
        stmt.execute(params![
            rec.tuple.src_ip.to_string(),
            rec.tuple.dst_ip.to_string(),
            rec.tuple.src_port,
            rec.tuple.dst_port,
            rec.flow_num,
            rec.iface,
            rec.mss,
            rec.rtt_avg,
            rec.wscale_avg,
            rec.max_cwnd,
            rec.sum_cwnd,
            rec.unacked,
            rec.retrans,
            rec.lost,
            rec.tcp_state,
            rec.congestion,
            rec.intervals,
            rec.created,
            rec.modified,
        ])?;
        Ok(())
    }

    /// Highest flow number stored for `tuple` and when it was last touched.
    pub fn most_recent_for_tuple(
        &self,
        tuple: &FlowTuple,
    ) -> Result<Option<(u32, DateTime<Utc>)>, FlowError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT flownum, modified FROM conns \
             WHERE sourceip = ?1 AND sourceport = ?2 AND destip = ?3 AND destport = ?4 \
             ORDER BY flownum DESC LIMIT 1",
        )?;
        let k = Key::of(tuple);
        let latest = stmt
            .query_row(params![k.src, k.sport, k.dst, k.dport], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?;
        Ok(latest)
    }

    /// One column of one row. `None` when the row does not exist; a NULL
    /// column comes back as `Some(FieldValue::Null)`.
    pub fn fetch_field(
        &self,
        tuple: &FlowTuple,
        flow_num: u32,
        field: Field,
    ) -> Result<Option<FieldValue>, FlowError> {
        let sql = format!(
            "SELECT {} FROM conns \
             WHERE sourceip = ?1 AND sourceport = ?2 AND destip = ?3 AND destport = ?4 \
               AND flownum = ?5",
            field.column()
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let k = Key::of(tuple);
        let value = stmt
            .query_row(params![k.src, k.sport, k.dst, k.dport, flow_num], |r| {
                Ok(FieldValue::from(r.get_ref(0)?))
            })
            .optional()?;
        Ok(value)
    }

    /// Whole row, if present.
    pub fn fetch_record(
        &self,
        tuple: &FlowTuple,
        flow_num: u32,
    ) -> Result<Option<FlowRecord>, FlowError> {
        let mut stmt = self.conn.prepare_cached(SELECT_RECORD)?;
        let k = Key::of(tuple);
        let rec = stmt
            .query_row(params![k.src, k.sport, k.dst, k.dport, flow_num], row_to_record)
            .optional()?;
        Ok(rec)
    }

    /// Overwrite `fields` on one row and stamp `modified = now`. Returns the
    /// number of rows touched (0 or 1).
    pub fn update_record(
        &self,
        tuple: &FlowTuple,
        flow_num: u32,
        fields: &[(Field, FieldValue)],
        now: DateTime<Utc>,
    ) -> Result<usize, FlowError> {
        self.write_fields(tuple, flow_num, fields, Some(now))
    }

    /// Overwrite `fields` on one row leaving `modified` as it was, so the
    /// row's place in the continuation window does not move.
    pub fn set_fields(
        &self,
        tuple: &FlowTuple,
        flow_num: u32,
        fields: &[(Field, FieldValue)],
    ) -> Result<usize, FlowError> {
        self.write_fields(tuple, flow_num, fields, None)
    }

    fn write_fields(
        &self,
        tuple: &FlowTuple,
        flow_num: u32,
        fields: &[(Field, FieldValue)],
        stamp: Option<DateTime<Utc>>,
    ) -> Result<usize, FlowError> {
        let fields: Vec<&(Field, FieldValue)> =
            fields.iter().filter(|(f, _)| *f != Field::Modified).collect();

        let mut set: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, (f, _))| format!("{} = ?{}", f.column(), i + 1))
            .collect();
        let mut n = fields.len();
        if stamp.is_some() {
            n += 1;
            set.push(format!("modified = ?{n}"));
        }
        if set.is_empty() {
            // nothing to write; still report whether the row exists
            return Ok(usize::from(self.fetch_field(tuple, flow_num, Field::Modified)?.is_some()));
        }
        let sql = format!(
            "UPDATE conns SET {} \
             WHERE sourceip = ?{} AND sourceport = ?{} AND destip = ?{} AND destport = ?{} \
               AND flownum = ?{}",
            set.join(", "),
            n + 1,
            n + 2,
            n + 3,
            n + 4,
            n + 5
        );

        let k = Key::of(tuple);
        let mut args: Vec<&dyn ToSql> = fields.iter().map(|(_, v)| v as &dyn ToSql).collect();
        if let Some(now) = &stamp {
            args.push(now);
        }
        let tail: [&dyn ToSql; 5] = [&k.src, &k.sport, &k.dst, &k.dport, &flow_num];
        args.extend(tail);

        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt.execute(args.as_slice())?)
    }

    pub fn count_rows(&self) -> Result<u64, FlowError> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM conns", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// Every instance of `tuple`, oldest first.
    pub fn history(&self, tuple: &FlowTuple) -> Result<Vec<FlowRecord>, FlowError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT flownum FROM conns \
             WHERE sourceip = ?1 AND sourceport = ?2 AND destip = ?3 AND destport = ?4 \
             ORDER BY flownum",
        )?;
        let k = Key::of(tuple);
        let nums = stmt
            .query_map(params![k.src, k.sport, k.dst, k.dport], |r| r.get::<_, u32>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut out = Vec::with_capacity(nums.len());
        for n in nums {
            if let Some(rec) = self.fetch_record(tuple, n)? {
                out.push(rec);
            }
        }
        Ok(out)
    }
}

// ───── helpers ──────────────────────────────────────────────────────────────

/// Key columns as bound parameters; addresses are stored as text.
struct Key {
    src:   String,
    sport: u16,
    dst:   String,
    dport: u16,
}

impl Key {
    fn of(t: &FlowTuple) -> Self {
        Self {
            src:   t.src_ip.to_string(),
            sport: t.src_port,
            dst:   t.dst_ip.to_string(),
            dport: t.dst_port,
        }
    }
}

fn parse_ip(row: &Row<'_>, idx: usize) -> rusqlite::Result<std::net::IpAddr> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_record(r: &Row<'_>) -> rusqlite::Result<FlowRecord> {
    Ok(FlowRecord {
        tuple: FlowTuple::new(parse_ip(r, 0)?, r.get(1)?, parse_ip(r, 2)?, r.get(3)?),
        flow_num: r.get(4)?,
        iface: r.get(5)?,
        mss: r.get::<_, Option<i64>>(6)?.unwrap_or(-1),
        rtt_avg: r.get::<_, Option<f64>>(7)?.unwrap_or(-1.0),
        wscale_avg: r.get::<_, Option<f64>>(8)?.unwrap_or(-1.0),
        max_cwnd: r.get::<_, Option<i64>>(9)?.unwrap_or(0),
        sum_cwnd: r.get::<_, Option<i64>>(10)?.unwrap_or(0),
        unacked: r.get(11)?,
        retrans: r.get::<_, Option<i64>>(12)?.unwrap_or(0),
        lost: r.get(13)?,
        tcp_state: r.get(14)?,
        congestion: r.get(15)?,
        intervals: r.get(16)?,
        created: r.get(17)?,
        modified: r.get(18)?,
    })
}
