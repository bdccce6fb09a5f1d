// src/export.rs

//! JSON dump of completed flow instances.
//!
//! A flow instance is known to be complete only once its tuple shows up
//! again after the timeout, so the reconciler calls this at that moment.

use std::{
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::config::model::ExportConfig;
use crate::flow::record::FlowRecord;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct FlowExporter {
    dir: PathBuf,
}

impl FlowExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(cfg: &ExportConfig) -> Option<Self> {
        cfg.json_dir.as_ref().map(Self::new)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<src>_<sport>_<dst>_<dport>_<flownum>.json`
    pub fn path_for(&self, rec: &FlowRecord) -> PathBuf {
        self.dir.join(format!("{}_{}.json", rec.tuple.slug(), rec.flow_num))
    }

    pub fn write(&self, rec: &FlowRecord) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(rec);
        fs::write(&path, serde_json::to_vec_pretty(rec)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::record::FlowTuple;
    use chrono::{TimeZone, Utc};

    #[test]
    fn writes_pretty_json_named_after_the_flow() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FlowExporter::new(dir.path().join("flows"));
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let rec = FlowRecord {
            tuple: FlowTuple::new("10.0.0.1".parse().unwrap(), 40000, "10.0.0.2".parse().unwrap(), 5001),
            flow_num: 2,
            iface: Some("eth0".into()),
            mss: 1460,
            rtt_avg: 10.0,
            wscale_avg: 7.0,
            max_cwnd: 20,
            sum_cwnd: 30,
            unacked: Some(0),
            retrans: 5,
            lost: None,
            tcp_state: Some("ESTAB".into()),
            congestion: None,
            intervals: 1,
            created: ts,
            modified: ts,
        };
        let path = exporter.write(&rec).unwrap();
        assert!(path.ends_with("10.0.0.1_40000_10.0.0.2_5001_2.json"));
        let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["sum_cwnd"], 30);
        assert_eq!(json["tuple"]["dst_port"], 5001);
        assert_eq!(json["lost"], serde_json::Value::Null);
    }
}
