// tests/store_tests.rs

//! SQLite flow store: key conflicts, schema idempotence, field-level reads
//! and writes, pass-level atomicity.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use tempfile::TempDir;

use flowmon::config::model::DatabaseConfig;
use flowmon::db::Store;
use flowmon::error::ErrorKind;
use flowmon::flow::{Field, FieldValue, FlowRecord, FlowTuple};

fn db_config(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig { path: dir.path().join("connections.db"), ..Default::default() }
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
}

fn tuple() -> FlowTuple {
    FlowTuple::new("192.168.1.10".parse().unwrap(), 51000, "192.168.1.20".parse().unwrap(), 443)
}

fn record(flow_num: u32, now: DateTime<Utc>) -> FlowRecord {
    FlowRecord {
        tuple: tuple(),
        flow_num,
        iface: Some("eth0".into()),
        mss: 1448,
        rtt_avg: 0.25,
        wscale_avg: 7.0,
        max_cwnd: 10,
        sum_cwnd: 10,
        unacked: Some(0),
        retrans: 0,
        lost: None,
        tcp_state: Some("ESTAB".into()),
        congestion: Some("cubic".into()),
        intervals: 0,
        created: now,
        modified: now,
    }
}

#[test]
fn ensure_schema_creates_once_and_keeps_rows() {
    let dir = TempDir::new().unwrap();
    let cfg = db_config(&dir);

    let store = Store::open(&cfg).unwrap();
    assert!(store.ensure_schema().unwrap(), "first call creates the table");
    store.table().insert_new(&record(0, at(0))).unwrap();
    assert!(!store.ensure_schema().unwrap());
    drop(store);

    let reopened = Store::open(&cfg).unwrap();
    assert!(!reopened.ensure_schema().unwrap());
    assert_eq!(reopened.table().count_rows().unwrap(), 1);
}

#[test]
fn duplicate_key_is_a_conflict_not_an_overwrite() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&db_config(&dir)).unwrap();
    store.ensure_schema().unwrap();

    store.table().insert_new(&record(0, at(0))).unwrap();
    let mut changed = record(0, at(9));
    changed.mss = 9000;
    let err = store.table().insert_new(&changed).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreConflict);
    assert!(!err.is_pass_fatal());

    let kept = store.table().fetch_field(&tuple(), 0, Field::Mss).unwrap();
    assert_eq!(kept, Some(FieldValue::Integer(1448)));

    store.table().insert_new(&record(1, at(9))).unwrap();
    assert_eq!(store.table().count_rows().unwrap(), 2);
}

#[test]
fn most_recent_is_the_highest_flow_number() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&db_config(&dir)).unwrap();
    store.ensure_schema().unwrap();
    assert_eq!(store.table().most_recent_for_tuple(&tuple()).unwrap(), None);

    // inserted out of time order on purpose; flow number decides
    store.table().insert_new(&record(2, at(10))).unwrap();
    store.table().insert_new(&record(0, at(50))).unwrap();
    store.table().insert_new(&record(1, at(20))).unwrap();
    assert_eq!(store.table().most_recent_for_tuple(&tuple()).unwrap(), Some((2, at(10))));

    let history = store.table().history(&tuple()).unwrap();
    assert_eq!(history.iter().map(|r| r.flow_num).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn fetch_field_distinguishes_missing_rows_from_null_columns() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&db_config(&dir)).unwrap();
    store.ensure_schema().unwrap();
    store.table().insert_new(&record(0, at(0))).unwrap();

    let t = store.table();
    assert_eq!(t.fetch_field(&tuple(), 0, Field::Lost).unwrap(), Some(FieldValue::Null));
    assert_eq!(t.fetch_field(&tuple(), 7, Field::Lost).unwrap(), None);
    assert_eq!(
        t.fetch_field(&tuple(), 0, Field::Tcp).unwrap().as_ref().and_then(FieldValue::as_str),
        Some("ESTAB")
    );
    assert_eq!(t.fetch_field(&tuple(), 0, Field::RttAvg).unwrap(), Some(FieldValue::Real(0.25)));
}

#[test]
fn partial_update_touches_only_named_fields_and_modified() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&db_config(&dir)).unwrap();
    store.ensure_schema().unwrap();
    store.table().insert_new(&record(0, at(0))).unwrap();

    let n = store
        .table()
        .update_record(
            &tuple(),
            0,
            &[(Field::Retrans, 12_i64.into()), (Field::Iface, FieldValue::Null)],
            at(7),
        )
        .unwrap();
    assert_eq!(n, 1);

    let row = store.table().fetch_record(&tuple(), 0).unwrap().unwrap();
    assert_eq!(row.retrans, 12);
    assert_eq!(row.iface, None);
    assert_eq!(row.mss, 1448);
    assert_eq!(row.created, at(0));
    assert_eq!(row.modified, at(7));

    let missing = store.table().update_record(&tuple(), 3, &[], at(8)).unwrap();
    assert_eq!(missing, 0);
}

#[test]
fn set_fields_leaves_modified_untouched() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&db_config(&dir)).unwrap();
    store.ensure_schema().unwrap();
    store.table().insert_new(&record(0, at(0))).unwrap();

    let n = store
        .table()
        .set_fields(&tuple(), 0, &[(Field::Retrans, 9_i64.into()), (Field::Modified, FieldValue::Null)])
        .unwrap();
    assert_eq!(n, 1);

    let row = store.table().fetch_record(&tuple(), 0).unwrap().unwrap();
    assert_eq!((row.retrans, row.modified), (9, at(0)));
    assert_eq!(store.table().set_fields(&tuple(), 4, &[(Field::Retrans, 1_i64.into())]).unwrap(), 0);
    assert_eq!(store.table().set_fields(&tuple(), 0, &[]).unwrap(), 1);
}

#[test]
fn hostile_text_is_stored_verbatim() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&db_config(&dir)).unwrap();
    store.ensure_schema().unwrap();
    let mut rec = record(0, at(0));
    rec.iface = Some("eth0'; DROP TABLE conns; --".into());
    store.table().insert_new(&rec).unwrap();

    let back = store.table().fetch_record(&tuple(), 0).unwrap().unwrap();
    assert_eq!(back.iface, rec.iface);
    assert_eq!(store.table().count_rows().unwrap(), 1);
}

#[test]
fn uncommitted_pass_rolls_back_entirely() {
    let dir = TempDir::new().unwrap();
    let cfg = db_config(&dir);
    let mut store = Store::open(&cfg).unwrap();
    store.ensure_schema().unwrap();

    {
        let tx = store.begin_pass().unwrap();
        tx.table().insert_new(&record(0, at(0))).unwrap();
        tx.table().insert_new(&record(1, at(1))).unwrap();
        // dropped without commit
    }
    assert_eq!(store.table().count_rows().unwrap(), 0);

    let tx = store.begin_pass().unwrap();
    tx.table().insert_new(&record(0, at(0))).unwrap();
    tx.commit().unwrap();

    let raw = Connection::open(&cfg.path).unwrap();
    let n: i64 = raw.query_row("SELECT COUNT(*) FROM conns", [], |r| r.get(0)).unwrap();
    assert_eq!(n, 1);
}

#[test]
fn ipv6_tuples_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&db_config(&dir)).unwrap();
    store.ensure_schema().unwrap();
    let mut rec = record(0, at(0));
    rec.tuple = FlowTuple::new("2001:db8::1".parse().unwrap(), 22, "2001:db8::2".parse().unwrap(), 5001);
    store.table().insert_new(&rec).unwrap();
    assert_eq!(store.table().fetch_record(&rec.tuple, 0).unwrap(), Some(rec));
}

#[test]
fn unopenable_path_is_store_fatal() {
    let dir = TempDir::new().unwrap();
    let cfg = DatabaseConfig {
        path: dir.path().join("missing").join("dir").join("connections.db"),
        ..Default::default()
    };
    let err = Store::open(&cfg).err().expect("open must fail");
    assert_eq!(err.kind(), ErrorKind::StoreFatal);
}
