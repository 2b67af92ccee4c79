//! The query model: filter predicate trees, sort orders, pagination.
//!
//! Filters are evaluated per record. The reference backend evaluates them
//! in Rust with [`Filter::matches`]; an SQL-backed driver would translate
//! the same tree into its dialect instead. Comparison predicates follow
//! [`Value::compare`]: values of different kinds never match.

use std::cmp::Ordering;

use opal_object::FieldPayload;
use opal_types::{FieldKey, ObjectId, Value};

use crate::record::ObjectRecord;

/// A predicate over stored records.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Matches every record.
    All,
    /// Element equality. A missing value matches nothing.
    Eq(FieldKey, Value),
    /// Element inequality: the negation of [`Eq`](Self::Eq).
    Ne(FieldKey, Value),
    Gt(FieldKey, Value),
    Ge(FieldKey, Value),
    Lt(FieldKey, Value),
    Le(FieldKey, Value),
    /// Element collection containment.
    Contains(FieldKey, Value),
    /// Reference field (single or collection) holds the given object.
    References(FieldKey, ObjectId),
    /// Element or single reference unset; collections match when empty.
    IsNull(FieldKey),
    /// Identity membership.
    IdIn(Vec<ObjectId>),
    /// Case-insensitive needle search over the container's
    /// full-text-indexed text fields.
    FullText(String),
    Not(Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    /// Evaluate against one record. `full_text_keys` are the container's
    /// full-text-indexed fields.
    pub fn matches(&self, record: &ObjectRecord, full_text_keys: &[FieldKey]) -> bool {
        match self {
            Self::All => true,
            Self::Eq(key, value) => element_of(record, *key)
                .map(|v| v == value)
                .unwrap_or(false),
            Self::Ne(key, value) => !Self::Eq(*key, value.clone()).matches(record, full_text_keys),
            Self::Gt(key, value) => compares(record, *key, value, Ordering::is_gt),
            Self::Ge(key, value) => compares(record, *key, value, Ordering::is_ge),
            Self::Lt(key, value) => compares(record, *key, value, Ordering::is_lt),
            Self::Le(key, value) => compares(record, *key, value, Ordering::is_le),
            Self::Contains(key, value) => match record.fields.get(key) {
                Some(FieldPayload::ElementList(list)) => list.contains(value),
                _ => false,
            },
            Self::References(key, id) => match record.fields.get(key) {
                Some(FieldPayload::Reference(Some(r))) => r == id,
                Some(FieldPayload::ReferenceList(list)) => list.contains(id),
                _ => false,
            },
            Self::IsNull(key) => match record.fields.get(key) {
                Some(FieldPayload::Element(v)) => v.is_none(),
                Some(FieldPayload::Reference(r)) => r.is_none(),
                Some(FieldPayload::ElementList(list)) => list.is_empty(),
                Some(FieldPayload::ReferenceList(list)) => list.is_empty(),
                None => true,
            },
            Self::IdIn(ids) => ids.contains(&record.id),
            Self::FullText(needle) => {
                let needle = needle.to_lowercase();
                full_text_keys.iter().any(|key| {
                    texts_of(record, *key)
                        .iter()
                        .any(|text| text.to_lowercase().contains(&needle))
                })
            }
            Self::Not(inner) => !inner.matches(record, full_text_keys),
            Self::And(parts) => parts.iter().all(|p| p.matches(record, full_text_keys)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(record, full_text_keys)),
        }
    }
}

fn element_of(record: &ObjectRecord, key: FieldKey) -> Option<&Value> {
    match record.fields.get(&key) {
        Some(FieldPayload::Element(v)) => v.as_ref(),
        _ => None,
    }
}

fn texts_of(record: &ObjectRecord, key: FieldKey) -> Vec<&str> {
    match record.fields.get(&key) {
        Some(FieldPayload::Element(Some(v))) => v.as_text().into_iter().collect(),
        Some(FieldPayload::ElementList(list)) => {
            list.iter().filter_map(Value::as_text).collect()
        }
        _ => Vec::new(),
    }
}

fn compares(
    record: &ObjectRecord,
    key: FieldKey,
    value: &Value,
    accept: fn(Ordering) -> bool,
) -> bool {
    element_of(record, key)
        .and_then(|v| v.compare(value))
        .map(accept)
        .unwrap_or(false)
}

/// Sort direction of one order term.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One term of a sort specification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortOrder {
    pub key: FieldKey,
    pub direction: SortDirection,
}

impl SortOrder {
    pub fn ascending(key: FieldKey) -> Self {
        Self {
            key,
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(key: FieldKey) -> Self {
        Self {
            key,
            direction: SortDirection::Descending,
        }
    }
}

/// Pagination window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    /// Zero-based index of the first result.
    pub start: usize,
    /// Maximum number of results.
    pub max: usize,
}

/// A complete query: filter, sort terms, optional page.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub sort: Vec<SortOrder>,
    pub page: Option<Page>,
}

impl Query {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: Vec::new(),
            page: None,
        }
    }

    /// Every record, unsorted, unpaged.
    pub fn all() -> Self {
        Self::new(Filter::All)
    }

    pub fn sorted_by(mut self, order: SortOrder) -> Self {
        self.sort.push(order);
        self
    }

    pub fn paged(mut self, start: usize, max: usize) -> Self {
        self.page = Some(Page { start, max });
        self
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::all()
    }
}

/// Order records by the given sort terms; unset values sort before set
/// ones on ascending terms. Ties keep their incoming order, and identity
/// is the final tiebreak so results are stable across runs.
pub fn sort_records(records: &mut [ObjectRecord], sort: &[SortOrder]) {
    records.sort_by(|a, b| {
        for order in sort {
            let ordering = cmp_optional(element_of(a, order.key), element_of(b, order.key));
            let ordering = match order.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.id.cmp(&b.id)
    });
}

fn cmp_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}

/// Apply a page window to sorted results.
pub fn apply_page(records: Vec<ObjectRecord>, page: Option<Page>) -> Vec<ObjectRecord> {
    match page {
        Some(page) => records.into_iter().skip(page.start).take(page.max).collect(),
        None => records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use opal_types::{TypeName, Value};

    const NOTE: TypeName = TypeName::new("note");
    const TITLE: FieldKey = FieldKey::new("title");
    const RANK: FieldKey = FieldKey::new("rank");
    const TAGS: FieldKey = FieldKey::new("tags");
    const AUTHOR: FieldKey = FieldKey::new("author");

    fn note(title: &str, rank: i64) -> ObjectRecord {
        let mut fields = BTreeMap::new();
        fields.insert(TITLE, FieldPayload::Element(Some(Value::from(title))));
        fields.insert(RANK, FieldPayload::Element(Some(Value::from(rank))));
        fields.insert(
            TAGS,
            FieldPayload::ElementList(vec![Value::from("draft")]),
        );
        fields.insert(AUTHOR, FieldPayload::Reference(None));
        ObjectRecord {
            id: ObjectId::new(),
            type_name: NOTE,
            created: None,
            modified: None,
            expires_at: None,
            fields,
        }
    }

    #[test]
    fn equality_and_negation() {
        let record = note("alpha", 3);
        assert!(Filter::Eq(TITLE, Value::from("alpha")).matches(&record, &[]));
        assert!(!Filter::Eq(TITLE, Value::from("beta")).matches(&record, &[]));
        assert!(Filter::Ne(TITLE, Value::from("beta")).matches(&record, &[]));
    }

    #[test]
    fn comparisons_respect_kind() {
        let record = note("alpha", 3);
        assert!(Filter::Gt(RANK, Value::from(2i64)).matches(&record, &[]));
        assert!(Filter::Le(RANK, Value::from(3i64)).matches(&record, &[]));
        // Cross-kind comparison never matches.
        assert!(!Filter::Gt(RANK, Value::from("2")).matches(&record, &[]));
    }

    #[test]
    fn containment_and_references() {
        let mut record = note("alpha", 1);
        assert!(Filter::Contains(TAGS, Value::from("draft")).matches(&record, &[]));
        assert!(!Filter::Contains(TAGS, Value::from("final")).matches(&record, &[]));

        let author = ObjectId::new();
        record
            .fields
            .insert(AUTHOR, FieldPayload::Reference(Some(author)));
        assert!(Filter::References(AUTHOR, author).matches(&record, &[]));
        assert!(!Filter::References(AUTHOR, ObjectId::new()).matches(&record, &[]));
    }

    #[test]
    fn null_checks() {
        let record = note("alpha", 1);
        assert!(Filter::IsNull(AUTHOR).matches(&record, &[]));
        assert!(!Filter::IsNull(TITLE).matches(&record, &[]));
        // Unknown keys count as unset.
        assert!(Filter::IsNull(FieldKey::new("missing")).matches(&record, &[]));
    }

    #[test]
    fn boolean_composition() {
        let record = note("alpha", 3);
        let both = Filter::And(vec![
            Filter::Eq(TITLE, Value::from("alpha")),
            Filter::Gt(RANK, Value::from(1i64)),
        ]);
        assert!(both.matches(&record, &[]));

        let either = Filter::Or(vec![
            Filter::Eq(TITLE, Value::from("beta")),
            Filter::Gt(RANK, Value::from(1i64)),
        ]);
        assert!(either.matches(&record, &[]));

        assert!(!Filter::Not(Box::new(both)).matches(&record, &[]));
    }

    #[test]
    fn full_text_is_case_insensitive_and_scoped() {
        let record = note("Alpha Centauri", 1);
        assert!(Filter::FullText("centauri".into()).matches(&record, &[TITLE]));
        // Not indexed: no match.
        assert!(!Filter::FullText("centauri".into()).matches(&record, &[]));
        assert!(!Filter::FullText("vega".into()).matches(&record, &[TITLE]));
    }

    #[test]
    fn id_membership() {
        let record = note("alpha", 1);
        assert!(Filter::IdIn(vec![record.id]).matches(&record, &[]));
        assert!(!Filter::IdIn(vec![ObjectId::new()]).matches(&record, &[]));
    }

    #[test]
    fn sorting_and_paging() {
        let mut records = vec![note("c", 2), note("a", 3), note("b", 1)];
        sort_records(&mut records, &[SortOrder::ascending(TITLE)]);
        let titles: Vec<_> = records
            .iter()
            .map(|r| r.fields.get(&TITLE).cloned())
            .collect();
        assert_eq!(
            titles,
            vec![
                Some(FieldPayload::Element(Some(Value::from("a")))),
                Some(FieldPayload::Element(Some(Value::from("b")))),
                Some(FieldPayload::Element(Some(Value::from("c")))),
            ]
        );

        sort_records(&mut records, &[SortOrder::descending(RANK)]);
        let first = records[0].fields.get(&RANK).cloned();
        assert_eq!(first, Some(FieldPayload::Element(Some(Value::from(3i64)))));

        let paged = apply_page(records, Some(Page { start: 1, max: 1 }));
        assert_eq!(paged.len(), 1);
    }
}
