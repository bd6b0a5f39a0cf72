use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use vdoc_core::config::EngineConfig;
use vdoc_core::request::{RangeFilter, Request, SearchResultCode, TermFilter, VectorQuery};
use vdoc_core::status::{EngineState, IndexStatus};
use vdoc_core::{DataType, Doc, Error, FieldInfo, FieldValue, MetricType, RetrievalType, Table, VectorInfo};
use vdoc_core::traits::{IndexFactory, VectorIndex};
use vdoc_engine::{Engine, RebuildOptions, StagedBatch};
use vdoc_index::{BackendRegistry, FlatFactory};

fn table() -> Table {
    Table::new("docs")
        .field(FieldInfo::new("title", DataType::String))
        .field(FieldInfo::new("price", DataType::Float).indexed())
        .field(FieldInfo::new("tags", DataType::MultiString).indexed())
        .vector(VectorInfo::new("emb", 2, RetrievalType::Flat))
}

fn engine(dir: &Path, table: Table) -> anyhow::Result<Engine> {
    let engine = Engine::new(EngineConfig::new(dir))?;
    engine.create_table(table)?;
    Ok(engine)
}

fn doc(key: &str, x: f32, y: f32) -> Doc {
    let mut d = Doc::with_key(key);
    d.set("title", FieldValue::str(key.to_uppercase()))
        .set("emb", FieldValue::Vector(vec![x, y]));
    d
}

fn priced(key: &str, x: f32, price: f32, tags: &[&str]) -> Doc {
    let mut d = doc(key, x, 0.0);
    d.set("price", FieldValue::Float(price)).set(
        "tags",
        FieldValue::MultiStr(tags.iter().map(|t| t.as_bytes().to_vec()).collect()),
    );
    d
}

fn nearest(v: &[f32]) -> Request {
    Request::new(10).query(VectorQuery::new("emb", v))
}

fn keys(engine: &Engine, request: &Request) -> anyhow::Result<Vec<String>> {
    let response = engine.search(request)?;
    Ok(response.results[0].items.iter().map(|i| i.key.clone()).collect())
}

#[test]
fn lifecycle_errors() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = Engine::new(EngineConfig::new(dir.path()))?;
    assert_eq!(engine.state(), EngineState::Created);
    assert!(matches!(engine.add_or_update_doc(doc("a", 0.0, 0.0)), Err(Error::NoTable)));
    assert!(matches!(engine.search(&nearest(&[0.0, 0.0])), Err(Error::NoTable)));

    engine.create_table(table())?;
    assert_eq!(engine.state(), EngineState::TableDefined);
    assert!(matches!(engine.create_table(table()), Err(Error::AlreadyExists(_))));
    assert_eq!(engine.table()?, table());

    engine.close()?;
    assert!(matches!(engine.close(), Err(Error::EngineClosed)));
    assert!(matches!(engine.add_or_update_doc(doc("a", 0.0, 0.0)), Err(Error::EngineClosed)));
    assert!(matches!(engine.search(&nearest(&[0.0, 0.0])), Err(Error::EngineClosed)));
    assert!(matches!(engine.get_doc("a"), Err(Error::EngineClosed)));
    assert!(matches!(engine.status(), Err(Error::EngineClosed)));
    assert!(matches!(engine.create_table(table()), Err(Error::EngineClosed)));
    Ok(())
}

#[test]
fn unsupported_backend_fails_create_table() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = Engine::new(EngineConfig::new(dir.path()))?;
    let hnsw = Table::new("t").vector(VectorInfo::new("emb", 4, RetrievalType::Hnsw));
    assert!(matches!(engine.create_table(hnsw), Err(Error::IndexBackend(_))));
    assert_eq!(engine.state(), EngineState::Created);
    Ok(())
}

#[test]
fn search_before_build() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    engine.add_or_update_doc(doc("a", 1.0, 0.0))?;

    let response = engine.search(&nearest(&[0.0, 0.0]))?;
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].code, SearchResultCode::IndexNotTrained);
    assert!(response.results[0].items.is_empty());

    let mut brute = nearest(&[0.0, 0.0]);
    brute.brute_force_search = true;
    assert_eq!(keys(&engine, &brute)?, vec!["a"]);
    Ok(())
}

#[test]
fn ties_break_by_doc_number() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    engine.add_or_update_doc(doc("far", 3.0, 0.0))?;
    engine.add_or_update_doc(doc("right", 1.0, 0.0))?;
    engine.add_or_update_doc(doc("up", 0.0, 1.0))?;
    let report = engine.build_index()?;
    assert_eq!(report.generation, 1);
    assert_eq!(engine.state(), EngineState::Serving);

    let request = nearest(&[0.0, 0.0]);
    let first = engine.search(&request)?;
    for _ in 0..5 {
        assert_eq!(engine.search(&request)?, first);
    }
    let result = &first.results[0];
    assert_eq!(result.total, 3);
    let got: Vec<(&str, f64)> = result.items.iter().map(|i| (i.key.as_str(), i.score)).collect();
    assert_eq!(got, vec![("right", 1.0), ("up", 1.0), ("far", 9.0)]);

    let mut sqrt = request.clone();
    sqrt.l2_sqrt = true;
    assert_eq!(engine.search(&sqrt)?.results[0].items[2].score, 3.0);
    Ok(())
}

#[test]
fn empty_score_range_keeps_total() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    engine.add_or_update_doc(doc("a", 1.0, 0.0))?;
    engine.add_or_update_doc(doc("b", 2.0, 0.0))?;
    engine.build_index()?;

    let request = Request::new(10).query(VectorQuery::new("emb", &[0.0, 0.0]).score_range(0.0, 0.0));
    let result = &engine.search(&request)?.results[0];
    assert!(result.is_success());
    assert!(result.items.is_empty());
    assert_eq!(result.total, 2);
    Ok(())
}

#[test]
fn multiple_queries_keep_submission_order() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    engine.add_or_update_doc(doc("a", 0.0, 0.0))?;
    engine.add_or_update_doc(doc("b", 10.0, 0.0))?;
    engine.build_index()?;

    let mut request = Request::new(1).query(VectorQuery::new("emb", &[9.0, 0.0, 1.0, 0.0]));
    request.req_num = 2;
    let response = engine.search(&request)?;
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].items[0].key, "b");
    assert_eq!(response.results[1].items[0].key, "a");
    Ok(())
}

#[test]
fn invalid_requests_fail_the_call() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    assert!(matches!(
        engine.search(&Request::new(10).query(VectorQuery::new("nope", &[0.0, 0.0]))),
        Err(Error::UnknownField(_))
    ));
    assert!(matches!(engine.search(&nearest(&[0.0, 0.0, 0.0])), Err(Error::InvalidRequest(_))));
    assert!(matches!(engine.search(&Request::new(10)), Err(Error::InvalidRequest(_))));
    let mut zero = nearest(&[0.0, 0.0]);
    zero.top_n = 0;
    assert!(matches!(engine.search(&zero), Err(Error::InvalidRequest(_))));
    let mut bad_params = nearest(&[0.0, 0.0]);
    bad_params.retrieval_params = "{nprobe".into();
    assert!(matches!(engine.search(&bad_params), Err(Error::InvalidRequest(_))));
    Ok(())
}

#[test]
fn batch_slots_fail_independently() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;

    let good = vdoc_codec::encode(&doc("good", 0.0, 0.0))?;
    let mut extra = doc("extra", 1.0, 0.0);
    extra.set("color", FieldValue::str("red"));
    let extra = vdoc_codec::encode(&extra)?;
    let wrong_dim = vdoc_codec::encode(&{
        let mut d = Doc::with_key("wide");
        d.set("emb", FieldValue::Vector(vec![0.0; 3]));
        d
    })?;
    let garbage = b"not a doc".to_vec();

    let result = engine.add_or_update_docs(&[&good, &garbage, &extra, &wrong_dim])?;
    let codes: Vec<i32> = result.items.iter().map(|i| i.code).collect();
    assert_eq!(codes, vec![0, -4, -7, -5]);
    assert!(result.items[2].msg.contains("color"));

    // the doc with a dropped field is still stored
    assert_eq!(engine.status()?.doc_num, 2);
    assert!(engine.get_doc("extra")?.get("color").is_none());
    assert!(matches!(engine.get_doc("wide"), Err(Error::NotFound(_))));
    Ok(())
}

#[test]
fn single_write_drops_unknown_fields() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    let mut d = doc("a", 0.0, 0.0);
    d.set("price", FieldValue::str("not a float"));
    engine.add_or_update_doc(d)?;
    assert!(engine.get_doc("a")?.get("price").is_none());

    let mut keyless = Doc::new();
    keyless.set("title", FieldValue::str("x"));
    assert!(matches!(engine.add_or_update_doc(keyless), Err(Error::InvalidDocument(_))));
    Ok(())
}

#[test]
fn staged_batch_is_all_or_nothing() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    let mut batch = StagedBatch::new(3);
    batch.stage(0, vdoc_codec::encode(&doc("a", 0.0, 0.0))?)?;
    batch.stage(2, vdoc_codec::encode(&doc("c", 2.0, 0.0))?)?;

    match engine.finish_batch(&mut batch, 3) {
        Err(Error::IncompleteBatch { missing }) => assert_eq!(missing, vec![1]),
        other => panic!("expected IncompleteBatch, got {:?}", other),
    }
    assert_eq!(engine.status()?.doc_num, 0);

    batch.stage(1, vdoc_codec::encode(&doc("b", 1.0, 0.0))?)?;
    let result = engine.finish_batch(&mut batch, 3)?;
    assert_eq!(result.len(), 3);
    assert_eq!(result.failures().count(), 0);
    assert_eq!(engine.status()?.doc_num, 3);
    assert_eq!(engine.get_doc_by_docid(1)?.key(), Some("b"));
    Ok(())
}

#[test]
fn staged_batch_survives_a_failed_finish() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = Engine::new(EngineConfig::new(dir.path()))?;
    let mut batch = StagedBatch::new(2);
    batch.stage(0, vdoc_codec::encode(&doc("a", 0.0, 0.0))?)?;
    batch.stage(1, vdoc_codec::encode(&doc("b", 1.0, 0.0))?)?;

    assert!(matches!(engine.finish_batch(&mut batch, 2), Err(Error::NoTable)));
    assert_eq!(batch.len(), 2);
    assert!(batch.missing().is_empty());

    engine.create_table(table())?;
    let result = engine.finish_batch(&mut batch, 2)?;
    assert_eq!(result.failures().count(), 0);
    assert_eq!(engine.status()?.doc_num, 2);
    assert!(batch.is_empty());
    Ok(())
}

#[test]
fn concurrent_writes_to_one_key() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    std::thread::scope(|s| {
        for i in 0..8u8 {
            let engine = &engine;
            s.spawn(move || {
                for _ in 0..20 {
                    let mut d = Doc::with_key("same");
                    d.set("title", FieldValue::str(format!("writer-{}", i)))
                        .set("emb", FieldValue::Vector(vec![f32::from(i), f32::from(i)]));
                    engine.add_or_update_doc(d).unwrap();
                }
            });
        }
    });

    let stored = engine.get_doc("same")?;
    let title = String::from_utf8(stored.get("title").and_then(FieldValue::as_str_bytes).unwrap().to_vec())?;
    let writer: u8 = title.trim_start_matches("writer-").parse()?;
    assert_eq!(
        stored.get("emb").and_then(FieldValue::as_vector),
        Some(&[f32::from(writer), f32::from(writer)][..])
    );
    let status = engine.status()?;
    assert_eq!(status.doc_num, 1);
    assert_eq!(status.dirty_num, 1);
    assert_eq!(status.max_docid, 160);
    Ok(())
}

#[test]
fn delete_and_lookup_by_doc_number() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    let a = engine.add_or_update(&vdoc_codec::encode(&doc("a", 0.0, 0.0))?)?;
    engine.add_or_update_doc(doc("b", 5.0, 0.0))?;
    engine.build_index()?;
    assert_eq!(engine.get_doc_by_docid(a)?.key(), Some("a"));

    engine.delete("a")?;
    assert!(matches!(engine.get_doc("a"), Err(Error::NotFound(_))));
    assert!(matches!(engine.get_doc_by_docid(a), Err(Error::NotFound(_))));
    assert!(matches!(engine.delete("a"), Err(Error::NotFound(_))));

    // the index still holds `a`; liveness hides it
    let result = &engine.search(&nearest(&[0.0, 0.0]))?.results[0];
    assert_eq!(result.total, 1);
    assert_eq!(result.items[0].key, "b");
    Ok(())
}

#[test]
fn scalar_filters_narrow_candidates() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    engine.add_or_update_doc(priced("cheap", 0.0, 5.0, &["red"]))?;
    engine.add_or_update_doc(priced("mid", 1.0, 15.0, &["red", "blue"]))?;
    engine.add_or_update_doc(priced("dear", 2.0, 25.0, &["blue"]))?;
    engine.build_index()?;

    let mut ranged = nearest(&[0.0, 0.0]);
    ranged
        .range_filters
        .push(RangeFilter::new("price", &FieldValue::Float(10.0), &FieldValue::Float(30.0)));
    let result = &engine.search(&ranged)?.results[0];
    assert_eq!(result.total, 2);
    assert_eq!(result.items.iter().map(|i| i.key.as_str()).collect::<Vec<_>>(), vec!["mid", "dear"]);

    let mut tagged = nearest(&[0.0, 0.0]);
    tagged.brute_force_search = true;
    tagged.term_filters.push(TermFilter { field: "tags".into(), terms: vec!["red".into()], is_union: true });
    assert_eq!(keys(&engine, &tagged)?, vec!["cheap", "mid"]);

    tagged.term_filters[0].terms.push("blue".into());
    tagged.term_filters[0].is_union = false;
    assert_eq!(keys(&engine, &tagged)?, vec!["mid"]);

    let mut unindexed = nearest(&[0.0, 0.0]);
    unindexed.term_filters.push(TermFilter { field: "title".into(), terms: vec![], is_union: true });
    assert!(matches!(engine.search(&unindexed), Err(Error::InvalidRequest(_))));
    Ok(())
}

#[test]
fn output_fields_follow_request() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    engine.add_or_update_doc(priced("a", 0.0, 5.0, &["red"]))?;
    engine.build_index()?;

    let all = &engine.search(&nearest(&[0.0, 0.0]))?.results[0].items[0];
    let mut names: Vec<&str> = all.fields.iter().map(|f| f.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["_id", "price", "tags", "title"]);

    let mut only_title = nearest(&[0.0, 0.0]);
    only_title.fields = vec!["title".into()];
    let item = &engine.search(&only_title)?.results[0].items[0];
    assert_eq!(item.fields.len(), 1);
    assert_eq!(item.field("title").map(|f| f.value.as_slice()), Some(&b"A"[..]));

    only_title.fields.push("missing".into());
    assert!(matches!(engine.search(&only_title), Err(Error::UnknownField(_))));
    Ok(())
}

fn two_vector_table() -> Table {
    Table::new("multi")
        .vector(VectorInfo::new("emb", 2, RetrievalType::Flat))
        .vector(VectorInfo::new("img", 2, RetrievalType::Flat))
}

fn two_vector_doc(key: &str, emb: [f32; 2], img: [f32; 2]) -> Doc {
    let mut d = Doc::with_key(key);
    d.set("emb", FieldValue::Vector(emb.to_vec()))
        .set("img", FieldValue::Vector(img.to_vec()));
    d
}

#[test]
fn rank_fusion_uses_weighted_sum() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), two_vector_table())?;
    engine.add_or_update_doc(two_vector_doc("a", [0.0, 0.0], [5.0, 5.0]))?;
    engine.add_or_update_doc(two_vector_doc("b", [1.0, 0.0], [0.0, 0.0]))?;
    engine.build_index()?;

    let origin = [0.0, 0.0];
    let fused = Request::new(10)
        .query(VectorQuery::new("emb", &origin))
        .query(VectorQuery::new("img", &origin));
    let result = &engine.search(&fused)?.results[0];
    let got: Vec<(&str, f64)> = result.items.iter().map(|i| (i.key.as_str(), i.score)).collect();
    assert_eq!(got, vec![("b", 1.0), ("a", 50.0)]);
    assert!(result.items.iter().all(|i| i.source.is_none()));

    let boosted = Request::new(10)
        .query(VectorQuery::new("emb", &origin).boost(100.0))
        .query(VectorQuery::new("img", &origin));
    let got: Vec<(String, f64)> = engine.search(&boosted)?.results[0]
        .items
        .iter()
        .map(|i| (i.key.clone(), i.score))
        .collect();
    assert_eq!(got, vec![("a".to_string(), 50.0), ("b".to_string(), 100.0)]);

    let mut separate = fused.clone();
    separate.has_rank = false;
    let result = &engine.search(&separate)?.results[0];
    assert_eq!(result.total, 4);
    assert_eq!(result.items.len(), 4);
    assert_eq!(result.items[0].source.as_deref(), Some("emb"));
    assert_eq!(result.items[3].source.as_deref(), Some("img"));
    Ok(())
}

#[test]
fn fusion_needs_one_metric() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let mixed = Table::new("mixed")
        .vector(VectorInfo::new("emb", 2, RetrievalType::Flat))
        .vector(VectorInfo::new("img", 2, RetrievalType::Flat).with_metric(MetricType::InnerProduct));
    let engine = engine(dir.path(), mixed)?;
    let request = Request::new(10)
        .query(VectorQuery::new("emb", &[0.0, 0.0]))
        .query(VectorQuery::new("img", &[0.0, 0.0]));
    assert!(matches!(engine.search(&request), Err(Error::InvalidRequest(_))));
    Ok(())
}

#[test]
fn auto_build_at_indexing_size() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table().indexing_size(3))?;
    engine.add_or_update_doc(doc("a", 0.0, 0.0))?;
    engine.add_or_update_doc(doc("b", 1.0, 0.0))?;
    assert_eq!(engine.status()?.index_status, IndexStatus::Unindexed);

    engine.add_or_update_doc(doc("c", 2.0, 0.0))?;
    let status = engine.status()?;
    assert_eq!(status.index_status, IndexStatus::Indexed);
    assert_eq!(status.index_generation, 1);
    assert_eq!(status.indexed_num, 3);
    assert_eq!(status.dirty_num, 0);
    assert_eq!(engine.state(), EngineState::Serving);

    // only the first build is automatic
    engine.add_or_update_doc(doc("d", 3.0, 0.0))?;
    assert_eq!(engine.status()?.index_generation, 1);
    Ok(())
}

#[test]
fn rebuild_describe_and_merge() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    for (i, key) in ["a", "b", "c"].iter().enumerate() {
        engine.add_or_update_doc(doc(key, i as f32, 0.0))?;
    }
    engine.build_index()?;
    engine.add_or_update_doc(doc("d", 9.0, 0.0))?;

    let described = engine.rebuild_index(RebuildOptions {
        drop_before_rebuild: false,
        limit_cpu: 2,
        describe: true,
    })?;
    assert!(described.dry_run);
    assert_eq!(described.generation, 1);
    assert_eq!(described.threads, 2);
    assert_eq!(described.fields.len(), 1);
    assert_eq!(described.fields[0].indexed, 3);
    assert_eq!(described.fields[0].dirty, 1);
    assert!(!described.fields[0].dropped);
    assert_eq!(engine.status()?.index_generation, 1);

    let merged = engine.rebuild_index(RebuildOptions { drop_before_rebuild: false, ..RebuildOptions::default() })?;
    assert!(!merged.dry_run);
    assert_eq!(merged.generation, 2);
    assert_eq!(merged.fields[0].indexed, 4);
    assert_eq!(engine.status()?.dirty_num, 0);
    assert_eq!(keys(&engine, &nearest(&[9.0, 0.0]))?[0], "d");

    let full = engine.rebuild_index(RebuildOptions::default())?;
    assert_eq!(full.generation, 3);
    assert!(full.fields[0].dropped);
    assert_eq!(full.fields[0].indexed, 4);
    Ok(())
}

#[test]
fn writes_after_build_stay_dirty_until_rebuild() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    engine.add_or_update_doc(doc("a", 0.0, 0.0))?;
    engine.build_index()?;
    engine.add_or_update_doc(doc("b", 0.5, 0.0))?;

    assert_eq!(engine.status()?.dirty_num, 1);
    assert_eq!(keys(&engine, &nearest(&[1.0, 0.0]))?, vec!["a"]);
    engine.build_index()?;
    assert_eq!(keys(&engine, &nearest(&[1.0, 0.0]))?, vec!["b", "a"]);
    Ok(())
}

#[test]
fn writes_during_builds_are_never_lost() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    std::thread::scope(|s| {
        for w in 0..4u32 {
            let engine = &engine;
            s.spawn(move || {
                for i in 0..100u32 {
                    let n = w * 100 + i;
                    engine.add_or_update_doc(doc(&format!("doc-{}", n), n as f32, 1.0)).unwrap();
                }
            });
        }
        let engine = &engine;
        s.spawn(move || {
            for round in 0..30 {
                let opts = RebuildOptions { drop_before_rebuild: round % 3 == 0, ..RebuildOptions::default() };
                engine.rebuild_index(opts).unwrap();
            }
        });
    });
    engine.rebuild_index(RebuildOptions { drop_before_rebuild: false, ..RebuildOptions::default() })?;

    let status = engine.status()?;
    assert_eq!(status.doc_num, 400);
    assert_eq!(status.dirty_num, 0);
    assert_eq!(status.indexed_num, 400);
    assert_eq!(engine.state(), EngineState::Serving);

    let mut request = Request::new(1000).query(VectorQuery::new("emb", &[0.0, 0.0]));
    let indexed: BTreeSet<String> = keys(&engine, &request)?.into_iter().collect();
    request.brute_force_search = true;
    let scanned: BTreeSet<String> = keys(&engine, &request)?.into_iter().collect();
    assert_eq!(indexed.len(), 400);
    assert_eq!(indexed, scanned);
    Ok(())
}

/// FLAT backend whose `create` fails while `offline` is set.
struct Switchable {
    offline: Arc<AtomicBool>,
}

impl IndexFactory for Switchable {
    fn create(&self, info: &VectorInfo) -> vdoc_core::Result<Box<dyn VectorIndex>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::IndexBackend("backend offline".into()));
        }
        FlatFactory.create(info)
    }

    fn deserialize(&self, info: &VectorInfo, bytes: &[u8]) -> vdoc_core::Result<Box<dyn VectorIndex>> {
        FlatFactory.deserialize(info, bytes)
    }
}

#[test]
fn failed_build_keeps_previous_index() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let offline = Arc::new(AtomicBool::new(false));
    let mut registry = BackendRegistry::empty();
    registry.register(RetrievalType::Flat, Arc::new(Switchable { offline: Arc::clone(&offline) }));
    let engine = Engine::with_registry(EngineConfig::new(dir.path()), registry)?;
    engine.create_table(table())?;

    engine.add_or_update_doc(doc("a", 0.0, 0.0))?;
    engine.build_index()?;
    engine.add_or_update_doc(doc("b", 1.0, 0.0))?;

    offline.store(true, Ordering::SeqCst);
    assert!(matches!(engine.build_index(), Err(Error::IndexBackend(_))));
    let status = engine.status()?;
    assert_eq!(engine.state(), EngineState::Serving);
    assert_eq!(status.index_generation, 1);
    assert_eq!(status.indexed_num, 1);
    assert_eq!(status.dirty_num, 1);
    assert_eq!(keys(&engine, &nearest(&[1.0, 0.0]))?, vec!["a"]);

    offline.store(false, Ordering::SeqCst);
    engine.build_index()?;
    assert_eq!(engine.status()?.index_generation, 2);
    assert_eq!(keys(&engine, &nearest(&[1.0, 0.0]))?, vec!["b", "a"]);
    Ok(())
}

#[test]
fn config_round_trip_and_path_guard() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    let mut config = engine.get_config()?;
    config.max_in_flight = 2;
    config.build_threads = 1;
    engine.set_config(config.clone())?;
    assert_eq!(engine.get_config()?, config);

    let mut moved = config.clone();
    moved.path = dir.path().join("elsewhere");
    assert!(matches!(engine.set_config(moved), Err(Error::InvalidConfig(_))));

    let mut zero = config;
    zero.max_in_flight = 0;
    assert!(matches!(engine.set_config(zero), Err(Error::InvalidConfig(_))));
    Ok(())
}

#[test]
fn memory_info_grows_with_data() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(dir.path(), table())?;
    let empty = engine.memory_info()?;
    engine.add_or_update_doc(doc("a", 0.0, 0.0))?;
    engine.build_index()?;
    let filled = engine.memory_info()?;
    assert!(filled.table_mem > empty.table_mem);
    assert!(filled.vector_mem > empty.vector_mem);
    assert!(filled.index_mem > 0);
    assert!(filled.total() > empty.total());
    Ok(())
}
