use std::sync::Arc;

use vdoc_core::{DataType, Doc, Error, FieldInfo, FieldValue, RetrievalType, Schema, Table, VectorInfo};
use vdoc_store::DocStore;

fn store(capacity: u32) -> DocStore {
    let table = Table::new("t")
        .field(FieldInfo::new("title", DataType::String))
        .field(FieldInfo::new("n", DataType::Int))
        .vector(VectorInfo::new("emb", 2, RetrievalType::Flat));
    DocStore::new(Arc::new(Schema::new(table).unwrap()), capacity)
}

fn doc(key: &str, n: i32) -> Doc {
    let mut d = Doc::with_key(key);
    d.set("n", FieldValue::Int(n))
        .set("emb", FieldValue::Vector(vec![n as f32, 0.0]));
    d
}

#[test]
fn put_get_and_overwrite() -> anyhow::Result<()> {
    let s = store(100);
    let first = s.put(doc("a", 1))?;
    assert_eq!(first.docid, 0);
    assert_eq!(first.replaced, None);

    let second = s.put(doc("a", 2))?;
    assert_eq!(second.docid, 1);
    assert_eq!(second.replaced, Some(0));
    assert!(!s.is_live(0));
    assert!(s.is_live(1));
    assert_eq!(s.len(), 1);
    assert_eq!(s.get("a")?.get("n"), Some(&FieldValue::Int(2)));
    assert_eq!(s.get_by_docid(1)?.key(), Some("a"));
    assert!(matches!(s.get_by_docid(0), Err(Error::NotFound(_))));
    Ok(())
}

#[test]
fn unknown_and_mistyped_fields_dropped() -> anyhow::Result<()> {
    let s = store(100);
    let mut d = doc("a", 1);
    d.set("nope", FieldValue::Int(3))
        .set("title", FieldValue::Int(4))
        .set("other_emb", FieldValue::Vector(vec![1.0]));
    let out = s.put(d)?;
    let mut dropped = out.dropped.clone();
    dropped.sort();
    assert_eq!(dropped, vec!["nope", "other_emb", "title"]);
    let stored = s.get("a")?;
    assert!(stored.get("nope").is_none());
    assert_eq!(stored.get("n"), Some(&FieldValue::Int(1)));
    Ok(())
}

#[test]
fn missing_key_rejected() {
    let s = store(100);
    let mut d = Doc::new();
    d.set("n", FieldValue::Int(1));
    assert!(matches!(s.put(d), Err(Error::InvalidDocument(_))));
}

#[test]
fn delete_and_not_found() -> anyhow::Result<()> {
    let s = store(100);
    s.put(doc("a", 1))?;
    assert_eq!(s.delete("a")?, 0);
    assert!(matches!(s.get("a"), Err(Error::NotFound(_))));
    assert!(matches!(s.delete("a"), Err(Error::NotFound(_))));
    assert!(s.is_empty());
    Ok(())
}

#[test]
fn capacity_bounds_doc_numbers() -> anyhow::Result<()> {
    let s = store(2);
    s.put(doc("a", 1))?;
    s.put(doc("b", 1))?;
    assert!(matches!(s.put(doc("c", 1)), Err(Error::Store(_))));
    Ok(())
}

#[test]
fn vector_scan_skips_tombstones() -> anyhow::Result<()> {
    let s = store(100);
    s.put(doc("a", 1))?;
    s.put(doc("b", 2))?;
    s.put(doc("a", 3))?;
    let mut seen = Vec::new();
    s.for_each_vector("emb", |id, v| seen.push((id, v[0])));
    assert_eq!(seen, vec![(1, 2.0), (2, 3.0)]);
    Ok(())
}

#[test]
fn snapshot_restore_keeps_doc_numbers() -> anyhow::Result<()> {
    let s = store(100);
    s.put(doc("a", 1))?;
    s.put(doc("b", 2))?;
    s.delete("a")?;
    let (next, docs) = s.snapshot();
    assert_eq!(next, 2);

    let t = store(100);
    t.restore(next, docs.iter().map(|(id, d)| (*id, d.as_ref().clone())).collect())?;
    assert_eq!(t.max_docid(), 2);
    assert_eq!(t.docid_of("b"), Some(1));
    assert!(!t.is_live(0));
    assert_eq!(t.memory(), s.memory());
    assert!(t.restore(next, Vec::new()).is_err());
    Ok(())
}

#[test]
fn concurrent_writers_on_one_key_leave_one_whole_value() -> anyhow::Result<()> {
    let s = store(10_000);
    std::thread::scope(|scope| {
        for t in 0..8 {
            let s = &s;
            scope.spawn(move || {
                for _ in 0..50 {
                    s.put(doc("same", t)).unwrap();
                }
            });
        }
    });
    let got = s.get("same")?;
    let n = match got.get("n") {
        Some(FieldValue::Int(n)) => *n,
        other => panic!("unexpected {:?}", other),
    };
    assert!((0..8).contains(&n));
    assert_eq!(got.get("emb"), Some(&FieldValue::Vector(vec![n as f32, 0.0])));
    assert_eq!(s.len(), 1);
    Ok(())
}
