//! Scalar range and term constraints evaluated against stored documents.

use std::cmp::Ordering;

use vdoc_core::request::{decode_bound, RangeFilter, TermFilter};
use vdoc_core::{DataType, Doc, Error, FieldValue, Result, Schema};

struct Range {
    field: String,
    lower: Option<FieldValue>,
    upper: Option<FieldValue>,
    include_lower: bool,
    include_upper: bool,
}

struct Terms {
    field: String,
    terms: Vec<Vec<u8>>,
    is_union: bool,
}

#[derive(Default)]
pub(crate) struct ScalarFilter {
    ranges: Vec<Range>,
    terms: Vec<Terms>,
}

fn indexed_type(schema: &Schema, field: &str) -> Result<DataType> {
    if schema.lookup(field).is_none() {
        return Err(Error::UnknownField(field.to_string()));
    }
    match schema.scalar(field) {
        Some(info) if info.is_index => Ok(info.data_type),
        Some(_) => Err(Error::InvalidRequest(format!("field '{}' is not indexed", field))),
        None => Err(Error::InvalidRequest(format!("field '{}' is not a scalar field", field))),
    }
}

impl ScalarFilter {
    pub(crate) fn compile(schema: &Schema, ranges: &[RangeFilter], terms: &[TermFilter]) -> Result<Self> {
        let mut filter = Self::default();
        for r in ranges {
            let datatype = indexed_type(schema, &r.field)?;
            if !(datatype.is_numeric() || datatype == DataType::String) {
                return Err(Error::InvalidRequest(format!("range filter on {} field '{}'", datatype, r.field)));
            }
            let bound = |raw: &[u8]| {
                decode_bound(datatype, raw)
                    .map_err(|e| Error::InvalidRequest(format!("range bound for '{}': {}", r.field, e)))
            };
            filter.ranges.push(Range {
                field: r.field.clone(),
                lower: bound(&r.lower)?,
                upper: bound(&r.upper)?,
                include_lower: r.include_lower,
                include_upper: r.include_upper,
            });
        }
        for t in terms {
            let datatype = indexed_type(schema, &t.field)?;
            if !matches!(datatype, DataType::String | DataType::MultiString) {
                return Err(Error::InvalidRequest(format!("term filter on {} field '{}'", datatype, t.field)));
            }
            filter.terms.push(Terms {
                field: t.field.clone(),
                terms: t.terms.iter().map(|s| s.as_bytes().to_vec()).collect(),
                is_union: t.is_union,
            });
        }
        Ok(filter)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ranges.is_empty() && self.terms.is_empty()
    }

    pub(crate) fn matches(&self, doc: &Doc) -> bool {
        self.ranges.iter().all(|r| r.matches(doc)) && self.terms.iter().all(|t| t.matches(doc))
    }
}

impl Range {
    fn matches(&self, doc: &Doc) -> bool {
        let Some(value) = doc.get(&self.field) else { return false };
        let lower_ok = match &self.lower {
            None => true,
            Some(lo) => match value.compare(lo) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Equal) => self.include_lower,
                _ => false,
            },
        };
        let upper_ok = match &self.upper {
            None => true,
            Some(hi) => match value.compare(hi) {
                Some(Ordering::Less) => true,
                Some(Ordering::Equal) => self.include_upper,
                _ => false,
            },
        };
        lower_ok && upper_ok
    }
}

impl Terms {
    fn matches(&self, doc: &Doc) -> bool {
        let values: Vec<&[u8]> = match doc.get(&self.field) {
            Some(FieldValue::Str(s)) => vec![s.as_slice()],
            Some(FieldValue::MultiStr(items)) => items.iter().map(Vec::as_slice).collect(),
            _ => return false,
        };
        let present = |t: &Vec<u8>| values.iter().any(|v| *v == t.as_slice());
        if self.is_union {
            self.terms.iter().any(present)
        } else {
            self.terms.iter().all(present)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdoc_core::{FieldInfo, Table};

    fn schema() -> Schema {
        Schema::new(
            Table::new("t")
                .field(FieldInfo::new("price", DataType::Float).indexed())
                .field(FieldInfo::new("tags", DataType::MultiString).indexed())
                .field(FieldInfo::new("note", DataType::String)),
        )
        .unwrap()
    }

    fn doc(price: f32, tags: &[&str]) -> Doc {
        let mut d = Doc::with_key("k");
        d.set("price", FieldValue::Float(price)).set(
            "tags",
            FieldValue::MultiStr(tags.iter().map(|t| t.as_bytes().to_vec()).collect()),
        );
        d
    }

    #[test]
    fn range_bounds_respect_inclusion() {
        let mut r = RangeFilter::new("price", &FieldValue::Float(1.0), &FieldValue::Float(2.0));
        r.include_upper = false;
        let f = ScalarFilter::compile(&schema(), &[r], &[]).unwrap();
        assert!(f.matches(&doc(1.0, &[])));
        assert!(f.matches(&doc(1.5, &[])));
        assert!(!f.matches(&doc(2.0, &[])));
        assert!(!f.matches(&Doc::with_key("no-price")));
    }

    #[test]
    fn term_union_and_intersection() {
        let any = TermFilter { field: "tags".into(), terms: vec!["a".into(), "z".into()], is_union: true };
        let all = TermFilter { is_union: false, ..any.clone() };
        let f_any = ScalarFilter::compile(&schema(), &[], &[any]).unwrap();
        let f_all = ScalarFilter::compile(&schema(), &[], &[all]).unwrap();
        assert!(f_any.matches(&doc(0.0, &["a", "b"])));
        assert!(!f_all.matches(&doc(0.0, &["a", "b"])));
        assert!(f_all.matches(&doc(0.0, &["z", "a"])));
    }

    #[test]
    fn filters_need_indexed_known_fields() {
        let s = schema();
        let unknown = TermFilter { field: "nope".into(), terms: vec![], is_union: true };
        assert!(matches!(ScalarFilter::compile(&s, &[], &[unknown]), Err(Error::UnknownField(_))));
        let unindexed = TermFilter { field: "note".into(), terms: vec![], is_union: true };
        assert!(matches!(ScalarFilter::compile(&s, &[], &[unindexed]), Err(Error::InvalidRequest(_))));
        let bad_bound = RangeFilter {
            field: "price".into(),
            lower: vec![1, 2],
            upper: vec![],
            include_lower: true,
            include_upper: true,
        };
        assert!(matches!(ScalarFilter::compile(&s, &[bad_bound], &[]), Err(Error::InvalidRequest(_))));
    }
}
