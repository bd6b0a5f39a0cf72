//! Payload layouts for each boundary entity.

use std::path::PathBuf;

use vdoc_core::config::{AdmissionPolicy, EngineConfig};
use vdoc_core::request::{
    BatchItem, BatchResult, RangeFilter, Request, Response, ResultItem, SearchResult,
    SearchResultCode, TermFilter, VectorQuery,
};
use vdoc_core::status::{EngineState, EngineStatus, IndexStatus, MemoryInfo};
use vdoc_core::{DataType, Doc, DocId, Error, Field, FieldInfo, Result, Table, VectorInfo};

use crate::buf::{Reader, Writer};
use crate::frame::Kind;

/// An entity with a framed wire representation.
pub trait WireEntity: Sized {
    const KIND: Kind;

    fn write(&self, w: &mut Writer) -> Result<()>;
    fn read(r: &mut Reader<'_>) -> Result<Self>;
}

/// Every document in a store together with the next doc number to assign.
/// Written by dump, read back by load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocSet {
    pub next_docid: DocId,
    pub docs: Vec<(DocId, Doc)>,
}

// Smallest encodings, used to bound counts before allocating.
const MIN_STR: usize = 4;
const MIN_FIELD: usize = MIN_STR + 1 + 4;
const MIN_DOC: usize = 4;

fn write_field(w: &mut Writer, f: &Field) -> Result<()> {
    w.string(&f.name)?;
    w.u8(f.datatype.as_u8());
    w.bytes(&f.value)
}

fn read_field(r: &mut Reader<'_>) -> Result<Field> {
    let name = r.string()?;
    let tag = r.u8()?;
    let datatype =
        DataType::from_u8(tag).ok_or_else(|| Error::malformed(format!("unknown data type {}", tag)))?;
    let value = r.bytes()?.to_vec();
    Ok(Field { name, value, datatype })
}

fn write_fields(w: &mut Writer, fields: &[Field]) -> Result<()> {
    w.length(fields.len())?;
    fields.iter().try_for_each(|f| write_field(w, f))
}

fn read_fields(r: &mut Reader<'_>) -> Result<Vec<Field>> {
    let n = r.field_count(MIN_FIELD, "field")?;
    (0..n).map(|_| read_field(r)).collect()
}

fn write_strings(w: &mut Writer, items: &[String]) -> Result<()> {
    w.length(items.len())?;
    items.iter().try_for_each(|s| w.string(s))
}

fn read_strings(r: &mut Reader<'_>) -> Result<Vec<String>> {
    let n = r.count(MIN_STR, "string")?;
    (0..n).map(|_| r.string()).collect()
}

fn write_doc(w: &mut Writer, doc: &Doc) -> Result<()> {
    write_fields(w, &doc.to_wire_fields())
}

fn read_doc(r: &mut Reader<'_>) -> Result<Doc> {
    Doc::from_wire_fields(read_fields(r)?).map_err(|e| match e {
        Error::InvalidDocument(msg) => Error::MalformedBuffer(msg),
        other => other,
    })
}

impl WireEntity for Table {
    const KIND: Kind = Kind::Table;

    fn write(&self, w: &mut Writer) -> Result<()> {
        w.string(&self.name)?;
        w.u32(self.indexing_size);
        w.length(self.fields.len())?;
        for f in &self.fields {
            w.string(&f.name)?;
            w.u8(f.data_type.as_u8());
            w.bool(f.is_index);
        }
        w.length(self.vectors.len())?;
        for v in &self.vectors {
            w.string(&v.name)?;
            w.u32(v.dimension);
            w.string(&v.model_id)?;
            w.string(&v.store_type)?;
            w.string(&v.store_param)?;
            w.string(&v.retrieval_type)?;
            w.string(&v.retrieval_param)?;
            w.bool(v.is_index);
        }
        Ok(())
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let name = r.string()?;
        let indexing_size = r.u32()?;
        let n = r.field_count(MIN_STR + 2, "table field")?;
        let mut fields = Vec::with_capacity(n);
        for _ in 0..n {
            let name = r.string()?;
            let tag = r.u8()?;
            let data_type = DataType::from_u8(tag)
                .ok_or_else(|| Error::malformed(format!("unknown data type {}", tag)))?;
            fields.push(FieldInfo { name, data_type, is_index: r.bool()? });
        }
        let n = r.field_count(6 * MIN_STR + 5, "vector field")?;
        let mut vectors = Vec::with_capacity(n);
        for _ in 0..n {
            vectors.push(VectorInfo {
                name: r.string()?,
                dimension: r.u32()?,
                model_id: r.string()?,
                store_type: r.string()?,
                store_param: r.string()?,
                retrieval_type: r.string()?,
                retrieval_param: r.string()?,
                is_index: r.bool()?,
            });
        }
        Ok(Table { name, indexing_size, fields, vectors })
    }
}

impl WireEntity for Doc {
    const KIND: Kind = Kind::Doc;

    fn write(&self, w: &mut Writer) -> Result<()> {
        write_doc(w, self)
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        read_doc(r)
    }
}

impl WireEntity for Vec<Doc> {
    const KIND: Kind = Kind::Docs;

    fn write(&self, w: &mut Writer) -> Result<()> {
        w.length(self.len())?;
        self.iter().try_for_each(|d| write_doc(w, d))
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let n = r.count(MIN_DOC, "doc")?;
        (0..n).map(|_| read_doc(r)).collect()
    }
}

impl WireEntity for DocSet {
    const KIND: Kind = Kind::DocSet;

    fn write(&self, w: &mut Writer) -> Result<()> {
        w.u32(self.next_docid);
        w.length(self.docs.len())?;
        for (docid, doc) in &self.docs {
            w.u32(*docid);
            write_doc(w, doc)?;
        }
        Ok(())
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let next_docid = r.u32()?;
        let n = r.count(4 + MIN_DOC, "doc")?;
        let mut docs = Vec::with_capacity(n);
        for _ in 0..n {
            let docid = r.u32()?;
            docs.push((docid, read_doc(r)?));
        }
        Ok(DocSet { next_docid, docs })
    }
}

impl WireEntity for Request {
    const KIND: Kind = Kind::Request;

    fn write(&self, w: &mut Writer) -> Result<()> {
        w.u32(self.top_n);
        w.u32(self.req_num);
        w.length(self.vec_fields.len())?;
        for q in &self.vec_fields {
            w.string(&q.name)?;
            w.bytes(&q.value)?;
            w.f64(q.min_score);
            w.f64(q.max_score);
            w.f64(q.boost);
            w.bool(q.has_boost);
        }
        write_strings(w, &self.fields)?;
        w.length(self.range_filters.len())?;
        for f in &self.range_filters {
            w.string(&f.field)?;
            w.bytes(&f.lower)?;
            w.bytes(&f.upper)?;
            w.bool(f.include_lower);
            w.bool(f.include_upper);
        }
        w.length(self.term_filters.len())?;
        for f in &self.term_filters {
            w.string(&f.field)?;
            write_strings(w, &f.terms)?;
            w.bool(f.is_union);
        }
        w.string(&self.retrieval_params)?;
        w.bool(self.brute_force_search);
        w.bool(self.has_rank);
        w.bool(self.multi_vector_rank);
        w.bool(self.l2_sqrt);
        Ok(())
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let top_n = r.u32()?;
        let req_num = r.u32()?;
        let n = r.field_count(2 * MIN_STR + 25, "vector query")?;
        let mut vec_fields = Vec::with_capacity(n);
        for _ in 0..n {
            vec_fields.push(VectorQuery {
                name: r.string()?,
                value: r.bytes()?.to_vec(),
                min_score: r.f64()?,
                max_score: r.f64()?,
                boost: r.f64()?,
                has_boost: r.bool()?,
            });
        }
        let fields = read_strings(r)?;
        let n = r.field_count(3 * MIN_STR + 2, "range filter")?;
        let mut range_filters = Vec::with_capacity(n);
        for _ in 0..n {
            range_filters.push(RangeFilter {
                field: r.string()?,
                lower: r.bytes()?.to_vec(),
                upper: r.bytes()?.to_vec(),
                include_lower: r.bool()?,
                include_upper: r.bool()?,
            });
        }
        let n = r.field_count(2 * MIN_STR + 1, "term filter")?;
        let mut term_filters = Vec::with_capacity(n);
        for _ in 0..n {
            term_filters.push(TermFilter {
                field: r.string()?,
                terms: read_strings(r)?,
                is_union: r.bool()?,
            });
        }
        Ok(Request {
            top_n,
            req_num,
            vec_fields,
            fields,
            range_filters,
            term_filters,
            retrieval_params: r.string()?,
            brute_force_search: r.bool()?,
            has_rank: r.bool()?,
            multi_vector_rank: r.bool()?,
            l2_sqrt: r.bool()?,
        })
    }
}

impl WireEntity for Response {
    const KIND: Kind = Kind::Response;

    fn write(&self, w: &mut Writer) -> Result<()> {
        w.length(self.results.len())?;
        for res in &self.results {
            w.u64(res.total);
            w.u8(res.code.as_u8());
            w.string(&res.msg)?;
            w.length(res.items.len())?;
            for item in &res.items {
                w.u32(item.docid);
                w.string(&item.key)?;
                w.f64(item.score);
                write_fields(w, &item.fields)?;
                w.opt_string(item.source.as_deref())?;
            }
        }
        Ok(())
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let n = r.count(8 + 1 + MIN_STR + 4, "search result")?;
        let mut results = Vec::with_capacity(n);
        for _ in 0..n {
            let total = r.u64()?;
            let tag = r.u8()?;
            let code = SearchResultCode::from_u8(tag)
                .ok_or_else(|| Error::malformed(format!("unknown result code {}", tag)))?;
            let msg = r.string()?;
            let m = r.count(4 + MIN_STR + 8 + 4 + 1, "result item")?;
            let mut items = Vec::with_capacity(m);
            for _ in 0..m {
                items.push(ResultItem {
                    docid: r.u32()?,
                    key: r.string()?,
                    score: r.f64()?,
                    fields: read_fields(r)?,
                    source: r.opt_string()?,
                });
            }
            results.push(SearchResult { total, code, msg, items });
        }
        Ok(Response { results })
    }
}

impl WireEntity for BatchResult {
    const KIND: Kind = Kind::BatchResult;

    fn write(&self, w: &mut Writer) -> Result<()> {
        w.length(self.items.len())?;
        for item in &self.items {
            // Codes are negative; stored as the two's complement bit pattern.
            w.u32(item.code as u32);
            w.string(&item.msg)?;
        }
        Ok(())
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let n = r.count(4 + MIN_STR, "batch item")?;
        let mut items = Vec::with_capacity(n);
        for _ in 0..n {
            items.push(BatchItem { code: r.u32()? as i32, msg: r.string()? });
        }
        Ok(BatchResult { items })
    }
}

impl WireEntity for EngineStatus {
    const KIND: Kind = Kind::EngineStatus;

    fn write(&self, w: &mut Writer) -> Result<()> {
        w.u8(self.state.as_u8());
        w.u8(self.index_status.as_u8());
        w.u64(self.doc_num);
        w.u64(self.max_docid);
        w.u64(self.indexed_num);
        w.u64(self.dirty_num);
        w.u64(self.index_generation);
        w.u64(self.in_flight);
        Ok(())
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let tag = r.u8()?;
        let state = EngineState::from_u8(tag)
            .ok_or_else(|| Error::malformed(format!("unknown engine state {}", tag)))?;
        let tag = r.u8()?;
        let index_status = IndexStatus::from_u8(tag)
            .ok_or_else(|| Error::malformed(format!("unknown index status {}", tag)))?;
        Ok(EngineStatus {
            state,
            index_status,
            doc_num: r.u64()?,
            max_docid: r.u64()?,
            indexed_num: r.u64()?,
            dirty_num: r.u64()?,
            index_generation: r.u64()?,
            in_flight: r.u64()?,
        })
    }
}

impl WireEntity for MemoryInfo {
    const KIND: Kind = Kind::MemoryInfo;

    fn write(&self, w: &mut Writer) -> Result<()> {
        w.u64(self.table_mem);
        w.u64(self.vector_mem);
        w.u64(self.index_mem);
        Ok(())
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(MemoryInfo {
            table_mem: r.u64()?,
            vector_mem: r.u64()?,
            index_mem: r.u64()?,
        })
    }
}

impl WireEntity for EngineConfig {
    const KIND: Kind = Kind::Config;

    fn write(&self, w: &mut Writer) -> Result<()> {
        w.string(&self.path.to_string_lossy())?;
        let log_dir = self.log_dir.as_ref().map(|d| d.to_string_lossy().into_owned());
        w.opt_string(log_dir.as_deref())?;
        w.u32(self.max_doc_size);
        w.u64(self.max_in_flight as u64);
        w.u8(match self.admission {
            AdmissionPolicy::Block => 0,
            AdmissionPolicy::Reject => 1,
        });
        w.u64(self.build_threads as u64);
        Ok(())
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let path = PathBuf::from(r.string()?);
        let log_dir = r.opt_string()?.map(PathBuf::from);
        let max_doc_size = r.u32()?;
        let max_in_flight = usize::try_from(r.u64()?).map_err(|_| Error::malformed("max_in_flight overflows usize"))?;
        let admission = match r.u8()? {
            0 => AdmissionPolicy::Block,
            1 => AdmissionPolicy::Reject,
            other => return Err(Error::malformed(format!("unknown admission policy {}", other))),
        };
        let build_threads = usize::try_from(r.u64()?).map_err(|_| Error::malformed("build_threads overflows usize"))?;
        Ok(EngineConfig { path, log_dir, max_doc_size, max_in_flight, admission, build_threads })
    }
}
