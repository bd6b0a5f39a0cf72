//! Exact exhaustive-scan backend. Always trained; ignores request params.

use bytes::{Buf, BufMut};
use vdoc_core::traits::{IndexFactory, IndexHits, Neighbor, SearchOptions, VectorIndex};
use vdoc_core::{DocId, Error, MetricType, Result, RetrievalType, VectorInfo};

use crate::metric::top_k;

#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    metric: MetricType,
    ids: Vec<DocId>,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize, metric: MetricType) -> Self {
        Self { dimension, metric, ids: Vec::new(), data: Vec::new() }
    }

    fn vectors(&self) -> impl Iterator<Item = (DocId, &[f32])> {
        self.ids.iter().copied().zip(self.data.chunks_exact(self.dimension.max(1)))
    }

    /// Layout: metric u8, dimension u32, count u32, ids, then packed floats.
    pub fn from_bytes(mut buf: &[u8]) -> Result<Self> {
        let corrupt = |what: &str| Error::CorruptState(format!("flat index: {}", what));
        if buf.remaining() < 9 {
            return Err(corrupt("truncated header"));
        }
        let metric = MetricType::from_u8(buf.get_u8()).ok_or_else(|| corrupt("unknown metric"))?;
        let dimension = buf.get_u32_le() as usize;
        let count = buf.get_u32_le() as usize;
        let need = count
            .checked_mul(4)
            .and_then(|ids| dimension.checked_mul(count)?.checked_mul(4)?.checked_add(ids))
            .ok_or_else(|| corrupt("size overflow"))?;
        if buf.remaining() != need {
            return Err(corrupt("length mismatch"));
        }
        let ids = (0..count).map(|_| buf.get_u32_le()).collect();
        let data = (0..count * dimension).map(|_| buf.get_f32_le()).collect();
        Ok(Self { dimension, metric, ids, data })
    }
}

impl VectorIndex for FlatIndex {
    fn kind(&self) -> RetrievalType {
        RetrievalType::Flat
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> MetricType {
        self.metric
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn add(&mut self, docid: DocId, vector: &[f32]) -> Result<()> {
        self.validate(vector).map_err(|e| Error::IndexBackend(e.to_string()))?;
        self.ids.push(docid);
        self.data.extend_from_slice(vector);
        Ok(())
    }

    fn search(&self, query: &[f32], opts: &SearchOptions<'_>) -> Result<IndexHits> {
        if query.len() != self.dimension {
            return Err(Error::IndexBackend(format!(
                "query has dimension {}, index has {}",
                query.len(),
                self.dimension
            )));
        }
        let mut total = 0u64;
        let mut hits = Vec::new();
        for (docid, v) in self.vectors() {
            if !(opts.accept_doc)(docid) {
                continue;
            }
            total += 1;
            let distance = self.metric.distance(query, v);
            if (opts.accept_distance)(distance) {
                hits.push(Neighbor { docid, distance });
            }
        }
        Ok(IndexHits { total, neighbors: top_k(self.metric, hits, opts.k) })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let count = u32::try_from(self.ids.len()).map_err(|_| Error::IndexBackend("too many vectors".into()))?;
        let dim = u32::try_from(self.dimension).map_err(|_| Error::IndexBackend("dimension overflow".into()))?;
        let mut out = Vec::with_capacity(9 + self.ids.len() * 4 + self.data.len() * 4);
        out.put_u8(self.metric.as_u8());
        out.put_u32_le(dim);
        out.put_u32_le(count);
        self.ids.iter().for_each(|id| out.put_u32_le(*id));
        self.data.iter().for_each(|x| out.put_f32_le(*x));
        Ok(out)
    }

    fn memory_bytes(&self) -> usize {
        self.ids.capacity() * std::mem::size_of::<DocId>() + self.data.capacity() * std::mem::size_of::<f32>()
    }

    fn box_clone(&self) -> Box<dyn VectorIndex> {
        Box::new(self.clone())
    }
}

pub struct FlatFactory;

impl IndexFactory for FlatFactory {
    fn create(&self, info: &VectorInfo) -> Result<Box<dyn VectorIndex>> {
        Ok(Box::new(FlatIndex::new(info.dim(), info.metric()?)))
    }

    fn deserialize(&self, info: &VectorInfo, bytes: &[u8]) -> Result<Box<dyn VectorIndex>> {
        let index = FlatIndex::from_bytes(bytes)?;
        if index.dimension != info.dim() || index.metric != info.metric()? {
            return Err(Error::CorruptState(format!(
                "flat index for '{}' does not match its field definition",
                info.name
            )));
        }
        Ok(Box::new(index))
    }
}
