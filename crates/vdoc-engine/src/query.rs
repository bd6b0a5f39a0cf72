//! Request validation, per-field retrieval, rank fusion and result assembly.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};
use vdoc_core::request::{Request, ResultItem, Response, SearchResult, SearchResultCode, VectorQuery};
use vdoc_core::traits::{IndexHits, Neighbor, SearchOptions};
use vdoc_core::types::bytes_to_floats;
use vdoc_core::{Doc, DocId, Error, Field, MetricType, Result, Schema, VectorInfo};
use vdoc_index::top_k;

use crate::engine::{IndexSnapshot, TableCtx};
use crate::filter::ScalarFilter;

/// One vector sub-query after validation.
struct FieldQuery<'a> {
    query: &'a VectorQuery,
    info: &'a VectorInfo,
    metric: MetricType,
    vectors: Vec<f32>,
}

impl FieldQuery<'_> {
    fn vector(&self, i: usize) -> &[f32] {
        let dim = self.info.dim();
        &self.vectors[i * dim..(i + 1) * dim]
    }

    fn in_range(&self, score: f64) -> bool {
        score >= self.query.min_score && score <= self.query.max_score
    }
}

struct Plan<'a> {
    request: &'a Request,
    fields: Vec<FieldQuery<'a>>,
    filter: ScalarFilter,
    params: serde_json::Value,
    fuse: bool,
}

fn plan<'a>(schema: &'a Schema, request: &'a Request) -> Result<Plan<'a>> {
    if request.top_n == 0 {
        return Err(Error::InvalidRequest("top_n must be positive".into()));
    }
    if request.req_num == 0 {
        return Err(Error::InvalidRequest("req_num must be positive".into()));
    }
    if request.vec_fields.is_empty() {
        return Err(Error::InvalidRequest("request has no vector query".into()));
    }

    let req_num = request.req_num as usize;
    let mut fields = Vec::with_capacity(request.vec_fields.len());
    for query in &request.vec_fields {
        let info = schema
            .vector_info(&query.name)
            .ok_or_else(|| Error::UnknownField(query.name.clone()))?;
        if fields.iter().any(|f: &FieldQuery<'_>| f.info.name == info.name) {
            return Err(Error::InvalidRequest(format!("vector field '{}' queried twice", info.name)));
        }
        let vectors = bytes_to_floats(&query.value)
            .map_err(|e| Error::InvalidRequest(format!("query vector '{}': {}", query.name, e)))?;
        if vectors.len() != info.dim() * req_num {
            return Err(Error::InvalidRequest(format!(
                "query vector '{}' has {} floats, expected {} x {}",
                query.name,
                vectors.len(),
                info.dimension,
                req_num
            )));
        }
        let metric = schema.metric(&query.name).unwrap_or(MetricType::L2);
        fields.push(FieldQuery { query, info, metric, vectors });
    }

    for name in &request.fields {
        if schema.lookup(name).is_none() {
            return Err(Error::UnknownField(name.clone()));
        }
    }

    let filter = ScalarFilter::compile(schema, &request.range_filters, &request.term_filters)?;

    let params = if request.retrieval_params.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(&request.retrieval_params)
            .map_err(|e| Error::InvalidRequest(format!("retrieval_params is not valid JSON: {}", e)))?
    };

    let fuse = request.has_rank && fields.len() > 1;
    if fuse && fields.iter().any(|f| f.metric != fields[0].metric) {
        return Err(Error::InvalidRequest("rank fusion needs one metric across vector fields".into()));
    }

    Ok(Plan { request, fields, filter, params, fuse })
}

/// Runs every query of `request`. Validation failures fail the whole call;
/// backend failures only fail the affected query's result.
pub(crate) fn execute(ctx: &TableCtx, snapshot: &IndexSnapshot, request: &Request) -> Result<Response> {
    let plan = plan(&ctx.schema, request)?;
    let results = (0..request.req_num as usize)
        .map(|i| match run_query(ctx, snapshot, &plan, i) {
            Ok(result) => result,
            Err(e) => {
                warn!(query = i, error = %e, "search failed");
                SearchResult::empty(SearchResultCode::SearchError, e.to_string())
            }
        })
        .collect();
    Ok(Response { results })
}

fn run_query(ctx: &TableCtx, snapshot: &IndexSnapshot, plan: &Plan<'_>, i: usize) -> Result<SearchResult> {
    let top_n = plan.request.top_n as usize;
    let l2_sqrt = plan.request.l2_sqrt;

    let mut per_field = Vec::with_capacity(plan.fields.len());
    for fq in &plan.fields {
        let Some(hits) = retrieve(ctx, snapshot, plan, fq, fq.vector(i), top_n)? else {
            return Ok(SearchResult::empty(
                SearchResultCode::IndexNotTrained,
                format!("index for '{}' is not built", fq.info.name),
            ));
        };
        per_field.push(hits);
    }

    let (total, ranked) = if plan.fuse {
        fuse(ctx, plan, i, &per_field)
    } else {
        let total = per_field.iter().map(|h| h.total).sum();
        let mut ranked = Vec::new();
        for (fq, hits) in plan.fields.iter().zip(&per_field) {
            let source = (plan.fields.len() > 1).then(|| fq.info.name.clone());
            ranked.extend(
                hits.neighbors
                    .iter()
                    .map(|n| (n.docid, fq.metric.to_score(n.distance, l2_sqrt), source.clone())),
            );
        }
        (total, ranked)
    };

    let mut items = Vec::with_capacity(ranked.len());
    for (docid, score, source) in ranked {
        // a doc deleted after retrieval is skipped, not an error
        let Some(doc) = ctx.store.get_arc(docid) else { continue };
        items.push(ResultItem {
            docid,
            key: doc.key().unwrap_or_default().to_string(),
            score,
            fields: output_fields(&doc, &plan.request.fields),
            source,
        });
    }
    Ok(SearchResult { total, code: SearchResultCode::Success, msg: String::new(), items })
}

/// Candidates for one field, best first, at most `k`. `None` when the field
/// has no trained index and brute force was not requested.
fn retrieve(
    ctx: &TableCtx,
    snapshot: &IndexSnapshot,
    plan: &Plan<'_>,
    fq: &FieldQuery<'_>,
    query: &[f32],
    k: usize,
) -> Result<Option<IndexHits>> {
    let l2_sqrt = plan.request.l2_sqrt;
    let accept_distance = |d: f32| fq.in_range(fq.metric.to_score(d, l2_sqrt));

    if plan.request.brute_force_search {
        return Ok(Some(brute_force(ctx, plan, fq, query, k, &accept_distance)));
    }

    let Some(index) = snapshot.fields.get(&fq.info.name).filter(|idx| idx.is_trained()) else {
        return Ok(None);
    };
    let accept_doc = |docid: DocId| match ctx.store.get_arc(docid) {
        Some(doc) => plan.filter.is_empty() || plan.filter.matches(&doc),
        None => false,
    };
    let opts = SearchOptions { k, params: &plan.params, accept_doc: &accept_doc, accept_distance: &accept_distance };
    index.search(query, &opts).map(Some)
}

/// Exact scan over live documents, no index needed.
fn brute_force(
    ctx: &TableCtx,
    plan: &Plan<'_>,
    fq: &FieldQuery<'_>,
    query: &[f32],
    k: usize,
    accept_distance: &dyn Fn(f32) -> bool,
) -> IndexHits {
    let (_, docs) = ctx.store.snapshot();
    let mut total = 0u64;
    let mut hits = Vec::new();
    for (docid, doc) in &docs {
        let Some(v) = doc.get(&fq.info.name).and_then(|v| v.as_vector()) else { continue };
        if v.len() != query.len() || !plan.filter.matches(doc) {
            continue;
        }
        total += 1;
        let distance = fq.metric.distance(query, v);
        if accept_distance(distance) {
            hits.push(Neighbor { docid: *docid, distance });
        }
    }
    debug!(field = %fq.info.name, scanned = docs.len(), total, "brute force scan");
    IndexHits { total, neighbors: top_k(fq.metric, hits, k) }
}

/// Weighted-sum fusion across fields. With `multi_vector_rank` the union of
/// candidates is scored, computing missing per-field scores exactly from the
/// stored vectors; otherwise only candidates every field returned are kept.
fn fuse(
    ctx: &TableCtx,
    plan: &Plan<'_>,
    i: usize,
    per_field: &[IndexHits],
) -> (u64, Vec<(DocId, f64, Option<String>)>) {
    let l2_sqrt = plan.request.l2_sqrt;
    let metric = plan.fields[0].metric;
    let scores: Vec<HashMap<DocId, f64>> = plan
        .fields
        .iter()
        .zip(per_field)
        .map(|(fq, hits)| {
            hits.neighbors
                .iter()
                .map(|n| (n.docid, fq.metric.to_score(n.distance, l2_sqrt)))
                .collect()
        })
        .collect();

    let mut candidates: BTreeMap<DocId, usize> = BTreeMap::new();
    for field_scores in &scores {
        for docid in field_scores.keys() {
            *candidates.entry(*docid).or_default() += 1;
        }
    }
    let candidates: Vec<DocId> = candidates
        .into_iter()
        .filter(|(_, seen)| plan.request.multi_vector_rank || *seen == scores.len())
        .map(|(docid, _)| docid)
        .collect();

    let mut fused = Vec::with_capacity(candidates.len());
    'candidate: for docid in candidates {
        let mut sum = 0.0;
        let mut doc: Option<Arc<Doc>> = None;
        for (fq, field_scores) in plan.fields.iter().zip(&scores) {
            let score = match field_scores.get(&docid) {
                Some(s) => *s,
                None => {
                    if doc.is_none() {
                        doc = ctx.store.get_arc(docid);
                    }
                    let Some(v) = doc.as_ref().and_then(|d| d.get(&fq.info.name)).and_then(|v| v.as_vector())
                    else {
                        continue 'candidate;
                    };
                    let s = fq.metric.to_score(fq.metric.distance(fq.vector(i), v), l2_sqrt);
                    if !fq.in_range(s) {
                        continue 'candidate;
                    }
                    s
                }
            };
            sum += fq.query.weight() * score;
        }
        fused.push((docid, sum));
    }

    let total = per_field.iter().map(|h| h.total).max().unwrap_or(0);
    fused.sort_by(|a, b| metric.rank(a.1, b.1).then(a.0.cmp(&b.0)));
    fused.truncate(plan.request.top_n as usize);
    (total, fused.into_iter().map(|(docid, score)| (docid, score, None)).collect())
}

fn output_fields(doc: &Doc, requested: &[String]) -> Vec<Field> {
    if requested.is_empty() {
        return doc.scalar_fields().map(|(name, value)| Field::new(name, value)).collect();
    }
    requested
        .iter()
        .filter_map(|name| doc.get(name).map(|value| Field::new(name.clone(), value)))
        .collect()
}
