use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;

use roadscan::store::shared_memory_uri;
use roadscan::{
    DetectionRecord, HazardWatch, Position, RecordId, RecordStore, SqliteRecordStore,
    DEFAULT_STATUS,
};

fn record(filename: &str, lat: Option<f64>, lon: Option<f64>, address: &str) -> DetectionRecord {
    DetectionRecord::new(
        filename,
        format!("file:///blobs/images/{}", filename),
        lat,
        lon,
        address,
        1_700_000_000_000,
    )
}

#[test]
fn records_survive_reopen_and_keep_push_order() -> Result<()> {
    let dir = TempDir::new()?;
    let db_path = dir.path().join("records.db");
    let db_path = db_path.to_string_lossy().to_string();

    let ids = {
        let store = SqliteRecordStore::open(&db_path)?;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(store.push(&record(&format!("{}.png", i), Some(1.0), Some(2.0), "Main St"))?);
        }
        ids
    };

    let store = SqliteRecordStore::open(&db_path)?;
    let listed = store.list()?;
    let listed_ids: Vec<RecordId> = listed.iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(listed_ids, ids);
    let names: Vec<&str> = listed.iter().map(|(_, r)| r.filename.as_str()).collect();
    assert_eq!(names, ["0.png", "1.png", "2.png", "3.png", "4.png"]);
    assert!(listed.iter().all(|(_, r)| r.status == DEFAULT_STATUS));
    Ok(())
}

#[test]
fn only_status_is_mutable() -> Result<()> {
    let store = SqliteRecordStore::in_memory()?;
    let id = store.push(&record("9.png", None, None, "unknown"))?;

    store.set_field(&id, "status", "fixed")?;
    let updated = store.get(&id)?.expect("record exists");
    assert!(updated.is_fixed());
    assert_eq!(updated.filename, "9.png");
    assert_eq!(updated.coordinates(), None);

    for field in ["filename", "imageUrl", "latitude", "longitude", "address", "timestamp"] {
        assert!(store.set_field(&id, field, "x").is_err(), "{} must be immutable", field);
    }
    assert_eq!(store.get(&id)?.expect("record exists").address, "unknown");
    Ok(())
}

#[test]
fn concurrent_pushes_get_distinct_ids() -> Result<()> {
    let store = Arc::new(SqliteRecordStore::open(&shared_memory_uri())?);
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            std::thread::spawn(move || -> Result<Vec<RecordId>> {
                (0..25)
                    .map(|i| store.push(&record(&format!("{}-{}.png", t, i), None, None, "unknown")))
                    .collect()
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.extend(handle.join().expect("push thread")?);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 100);
    assert_eq!(store.list()?.len(), 100);
    Ok(())
}

#[test]
fn hazard_watch_reads_unfixed_records_from_the_store() -> Result<()> {
    let store = SqliteRecordStore::in_memory()?;
    let near = store.push(&record("1.png", Some(52.5200), Some(13.4050), "Unter den Linden, Berlin, Germany"))?;
    store.push(&record("2.png", Some(52.5300), Some(13.4050), "Far Street, Berlin, Germany"))?;
    store.push(&record("3.png", None, None, "unknown"))?;

    let here = Position::new(52.5201, 13.4051, 0);
    let mut watch = HazardWatch::default();
    let alert = watch.poll(&store.list()?, &here).expect("nearby hazard");
    assert_eq!(alert.id, near);
    assert!(alert.distance_km < 0.05);
    assert!(watch.poll(&store.list()?, &here).is_none());

    store.set_field(&near, "status", "Fixed")?;
    watch.reset();
    assert!(watch.nearby(&store.list()?, &here).is_empty());
    Ok(())
}
