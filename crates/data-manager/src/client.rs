//! In-memory query engine for client-side views
//!
//! Client-side data sources return the whole dataset once; filtering,
//! sorting and paging are applied here.

use crate::source::{PageQuery, PageResult};
use grid_shared::{row_field, FilterItem, FilterModel, FilterOperator, Row, SortDirection, SortItem};
use serde_json::Value;
use std::cmp::Ordering;

/// Filter, sort and slice `rows`. `total_count` is the filtered size.
pub fn apply_query(rows: &[Row], query: &PageQuery, searchable_fields: &[String]) -> PageResult {
    let mut matching: Vec<&Row> = rows
        .iter()
        .filter(|row| matches_filter(row, &query.filter, searchable_fields))
        .collect();

    sort_rows(&mut matching, &query.sort);

    let total_count = matching.len();
    let items = matching
        .into_iter()
        .skip(query.pagination.offset())
        .take(query.pagination.page_size.max(1))
        .cloned()
        .collect();

    PageResult::new(items, total_count)
}

pub fn matches_filter(row: &Row, filter: &FilterModel, searchable_fields: &[String]) -> bool {
    if !filter.items.iter().all(|item| matches_item(row, item)) {
        return false;
    }

    match filter.quick_filter_text() {
        Some(text) => matches_quick_filter(row, text, searchable_fields),
        None => true,
    }
}

/// Case-insensitive substring match over the searchable fields, or every
/// top-level field when none are declared
fn matches_quick_filter(row: &Row, text: &str, searchable_fields: &[String]) -> bool {
    let needle = text.to_lowercase();
    let haystack = |value: &Value| display_text(value).to_lowercase().contains(&needle);

    if searchable_fields.is_empty() {
        return row
            .as_object()
            .map(|obj| obj.values().any(haystack))
            .unwrap_or(false);
    }

    searchable_fields
        .iter()
        .filter_map(|field| row_field(row, field))
        .any(haystack)
}

fn matches_item(row: &Row, item: &FilterItem) -> bool {
    let actual = row_field(row, &item.field).unwrap_or(&Value::Null);

    match item.operator {
        FilterOperator::Eq => values_equal(actual, &item.value),
        FilterOperator::Ne => !values_equal(actual, &item.value),
        FilterOperator::Contains => text_matches(actual, &item.value, |a, b| a.contains(b)),
        FilterOperator::StartsWith => text_matches(actual, &item.value, |a, b| a.starts_with(b)),
        FilterOperator::EndsWith => text_matches(actual, &item.value, |a, b| a.ends_with(b)),
        FilterOperator::Gt => ordered(actual, &item.value, |o| o == Ordering::Greater),
        FilterOperator::Gte => ordered(actual, &item.value, |o| o != Ordering::Less),
        FilterOperator::Lt => ordered(actual, &item.value, |o| o == Ordering::Less),
        FilterOperator::Lte => ordered(actual, &item.value, |o| o != Ordering::Greater),
        FilterOperator::In => match &item.value {
            Value::Array(options) => options.iter().any(|option| values_equal(actual, option)),
            single => values_equal(actual, single),
        },
        FilterOperator::IsEmpty => is_empty(actual),
        FilterOperator::IsNotEmpty => !is_empty(actual),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a == b;
    }
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
        (Value::Bool(a), Value::String(b)) | (Value::String(b), Value::Bool(a)) => {
            b.eq_ignore_ascii_case(if *a { "true" } else { "false" })
        }
        _ => actual == expected,
    }
}

fn text_matches(actual: &Value, expected: &Value, test: impl Fn(&str, &str) -> bool) -> bool {
    if actual.is_null() {
        return false;
    }
    let needle = display_text(expected).to_lowercase();
    test(&display_text(actual).to_lowercase(), &needle)
}

fn ordered(actual: &Value, expected: &Value, test: impl Fn(Ordering) -> bool) -> bool {
    if actual.is_null() || expected.is_null() {
        return false;
    }
    test(compare_values(actual, expected))
}

fn display_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Sort class of a value. Numeric strings rank with numbers so that every
/// pair of values is compared under one rule.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) if as_number(value).is_some() => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: nulls first, then booleans, numbers
/// numerically (including numeric strings), other strings
/// case-insensitively, arrays and objects by their JSON text
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) if rank_a == 3 => x
            .to_lowercase()
            .cmp(&y.to_lowercase())
            .then_with(|| x.cmp(y)),
        _ if rank_a == 2 => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Stable multi-key sort; ties keep their original order
pub fn sort_rows(rows: &mut [&Row], sort: &[SortItem]) {
    if sort.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        sort.iter()
            .map(|item| {
                let left = row_field(a, &item.field).unwrap_or(&Value::Null);
                let right = row_field(b, &item.field).unwrap_or(&Value::Null);
                let ordering = compare_values(left, right);
                match item.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_shared::Pagination;
    use serde_json::json;

    fn products() -> Vec<Row> {
        vec![
            json!({"sku": "A-1", "name": "Blue Shirt", "price": 20, "status": "enabled"}),
            json!({"sku": "A-2", "name": "Red Shirt", "price": "15.5", "status": "disabled"}),
            json!({"sku": "B-1", "name": "Blue Jeans", "price": 60, "status": "enabled"}),
            json!({"sku": "B-2", "name": "Socks", "price": 5, "status": null}),
        ]
    }

    fn skus(result: &PageResult) -> Vec<&str> {
        result
            .items
            .iter()
            .map(|row| row["sku"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn test_filter_sort_and_page() {
        let query = PageQuery {
            pagination: Pagination::new(0, 2),
            sort: vec![SortItem::desc("price")],
            filter: FilterModel::default().with_item(FilterItem::new(
                "price",
                FilterOperator::Gte,
                json!(10),
            )),
        };

        let result = apply_query(&products(), &query, &[]);
        assert_eq!(result.total_count, 3);
        assert_eq!(skus(&result), vec!["B-1", "A-1"]);

        let next = PageQuery {
            pagination: Pagination::new(1, 2),
            ..query
        };
        assert_eq!(skus(&apply_query(&products(), &next, &[])), vec!["A-2"]);
    }

    #[test]
    fn test_quick_filter_uses_searchable_fields() {
        let query = PageQuery {
            pagination: Pagination::new(0, 10),
            filter: FilterModel::default().with_quick_filter("blue"),
            ..PageQuery::default()
        };
        let searchable = vec!["name".to_string()];
        assert_eq!(skus(&apply_query(&products(), &query, &searchable)), vec!["A-1", "B-1"]);

        let by_sku = vec!["sku".to_string()];
        assert_eq!(apply_query(&products(), &query, &by_sku).total_count, 0);
    }

    #[test]
    fn test_operators() {
        let rows = products();
        let count = |item: FilterItem| {
            rows.iter()
                .filter(|row| matches_item(row, &item))
                .count()
        };

        assert_eq!(count(FilterItem::new("status", FilterOperator::Eq, json!("ENABLED"))), 2);
        assert_eq!(count(FilterItem::new("status", FilterOperator::IsEmpty, Value::Null)), 1);
        assert_eq!(count(FilterItem::new("sku", FilterOperator::StartsWith, json!("b-"))), 2);
        assert_eq!(count(FilterItem::new("name", FilterOperator::EndsWith, json!("shirt"))), 2);
        assert_eq!(count(FilterItem::new("sku", FilterOperator::In, json!(["A-1", "B-2"]))), 2);
        assert_eq!(count(FilterItem::new("price", FilterOperator::Lt, json!("16"))), 2);
        assert_eq!(count(FilterItem::new("price", FilterOperator::Eq, json!(15.5))), 1);
    }

    #[test]
    fn test_sort_is_stable_with_nulls_first() {
        let rows = products();
        let mut refs: Vec<&Row> = rows.iter().collect();
        sort_rows(&mut refs, &[SortItem::asc("status")]);
        let order: Vec<&str> = refs.iter().map(|r| r["sku"].as_str().unwrap()).collect();
        // null, then "disabled", then the two "enabled" rows in original order
        assert_eq!(order, vec!["B-2", "A-2", "A-1", "B-1"]);
    }

    #[test]
    fn test_mixed_values_compare_consistently() {
        let (ten, three_x, five) = (json!("10"), json!("3x"), json!(5));
        assert_eq!(compare_values(&five, &ten), Ordering::Less);
        assert_eq!(compare_values(&ten, &three_x), Ordering::Less);
        assert_eq!(compare_values(&five, &three_x), Ordering::Less);
        assert_eq!(compare_values(&json!(true), &five), Ordering::Less);
        assert_eq!(compare_values(&json!("10"), &json!(10.0)), Ordering::Equal);
    }

    #[test]
    fn test_sort_mixed_column() {
        let rows: Vec<Row> = ["10", "3x", "5", "abc", "2", "B", "1e1"]
            .iter()
            .enumerate()
            .map(|(i, code)| json!({"sku": i.to_string(), "code": code}))
            .chain([json!({"sku": "n", "code": null}), json!({"sku": "k", "code": 7})])
            .collect();
        let mut refs: Vec<&Row> = rows.iter().collect();
        sort_rows(&mut refs, &[SortItem::asc("code")]);

        let codes: Vec<String> = refs.iter().map(|r| r["code"].to_string()).collect();
        assert_eq!(
            codes,
            vec!["null", "\"2\"", "\"5\"", "7", "\"10\"", "\"1e1\"", "\"3x\"", "\"abc\"", "\"B\""]
        );
    }
}
