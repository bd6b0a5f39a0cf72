use std::env;
use std::path::Path;

use vdoc_core::config::EngineConfig;
use vdoc_core::request::{Request, VectorQuery};
use vdoc_core::{DataType, Doc, FieldInfo, FieldValue, RetrievalType, Table, VectorInfo};
use vdoc_engine::Engine;

// Create a table, write a few docs, build, search, then dump.
// Usage:
//   cargo run -p vdoc-engine --example quickstart -- [DATA_DIR]

fn main() -> anyhow::Result<()> {
    let ws_root = Path::new(env!("CARGO_MANIFEST_DIR")).ancestors().nth(2).unwrap_or(Path::new("."));
    let data_dir = env::args().nth(1).map_or_else(|| ws_root.join("dev_data/vdoc"), Into::into);

    let engine = Engine::open(EngineConfig::new(&data_dir))?;
    engine.create_table(
        Table::new("notes")
            .field(FieldInfo::new("title", DataType::String))
            .field(FieldInfo::new("year", DataType::Int).indexed())
            .vector(VectorInfo::new("emb", 4, RetrievalType::Flat)),
    )?;

    let notes = [
        ("n1", "garden plan", 2021, [0.9, 0.1, 0.0, 0.0]),
        ("n2", "seed list", 2022, [0.8, 0.2, 0.1, 0.0]),
        ("n3", "water filter", 2023, [0.0, 0.1, 0.9, 0.3]),
        ("n4", "solar wiring", 2024, [0.1, 0.0, 0.3, 0.9]),
    ];
    let docs = notes
        .iter()
        .map(|(key, title, year, emb)| {
            let mut d = Doc::with_key(key);
            d.set("title", FieldValue::str(title))
                .set("year", FieldValue::Int(*year))
                .set("emb", FieldValue::Vector(emb.to_vec()));
            d
        })
        .collect();
    let written = engine.add_or_update_doc_list(docs)?;
    println!("written: {} (failed {})", written.len(), written.failures().count());

    let report = engine.build_index()?;
    println!("index generation {} built with {} threads", report.generation, report.threads);

    let request = Request::new(3).query(VectorQuery::new("emb", &[1.0, 0.0, 0.0, 0.0]));
    for item in &engine.search(&request)?.results[0].items {
        let title = item
            .field("title")
            .map(|f| String::from_utf8_lossy(&f.value).into_owned())
            .unwrap_or_default();
        println!("{:>8.4}  {}  {}", item.score, item.key, title);
    }

    let manifest = engine.dump()?;
    println!("dumped {} docs to {}", manifest.doc_num, data_dir.join("dump").display());
    engine.close()?;
    Ok(())
}
