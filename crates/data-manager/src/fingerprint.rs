//! Canonical query keys
//!
//! A fingerprint encodes everything that determines a result set. Equal
//! queries built in a different order (filter predicates, `in` lists, object
//! keys) produce the same string; numeric values written as `0`, `0.0` or
//! `"0"` collapse to one form.

use grid_shared::{FilterItem, FilterModel, FilterOperator, Fingerprint, Pagination, SortItem, ViewId};
use serde_json::Value;

/// Prefix shared by every fingerprint of a view
pub fn prefix_for(view: &ViewId) -> String {
    format!("grid:{}|", escape(view.as_str()))
}

/// Key of a server-side page
pub fn fingerprint(
    view: &ViewId,
    pagination: &Pagination,
    sort: &[SortItem],
    filter: &FilterModel,
    variant: &str,
) -> Fingerprint {
    let mut key = prefix_for(view);
    key.push_str(&format!("p={}:{}", pagination.page, pagination.page_size.max(1)));
    push_query(&mut key, sort, filter, variant);
    Fingerprint::from_canonical(key)
}

/// Key of a client-side dataset. Paging and sorting happen in memory, so only
/// the filter handed to `fetch_all` and the variant matter.
pub fn client_fingerprint(view: &ViewId, filter: &FilterModel, variant: &str) -> Fingerprint {
    let mut key = prefix_for(view);
    key.push_str("all");
    push_query(&mut key, &[], filter, variant);
    Fingerprint::from_canonical(key)
}

pub fn belongs_to(fingerprint: &Fingerprint, view: &ViewId) -> bool {
    fingerprint.starts_with(&prefix_for(view))
}

fn push_query(key: &mut String, sort: &[SortItem], filter: &FilterModel, variant: &str) {
    if !sort.is_empty() {
        let sort = sort
            .iter()
            .map(|item| format!("{}:{}", escape(&item.field), item.direction.as_str()))
            .collect::<Vec<_>>()
            .join(",");
        key.push_str("|s=");
        key.push_str(&sort);
    }

    if !filter.items.is_empty() {
        let mut predicates: Vec<String> = filter.items.iter().map(canonical_predicate).collect();
        // Conjunction is order independent
        predicates.sort();
        predicates.dedup();
        key.push_str("|f=");
        key.push_str(&predicates.join(";"));
    }

    if let Some(quick) = filter.quick_filter_text() {
        key.push_str("|q=");
        key.push_str(&escape(quick));
    }

    if !variant.is_empty() {
        key.push_str("|v=");
        key.push_str(&escape(variant));
    }
}

fn canonical_predicate(item: &FilterItem) -> String {
    let head = format!("{}~{}", escape(&item.field), item.operator.as_str());
    let value = match item.operator {
        // Unary operators ignore their value
        FilterOperator::IsEmpty | FilterOperator::IsNotEmpty => None,
        FilterOperator::In => canonical_set(&item.value),
        _ => canonical_value(&item.value),
    };
    match value {
        Some(value) => format!("{head}~{value}"),
        None => head,
    }
}

/// `in` lists have set semantics
fn canonical_set(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => {
            let mut parts: Vec<String> = items.iter().filter_map(canonical_value).collect();
            parts.sort();
            parts.dedup();
            Some(format!("[{}]", parts.join(",")))
        }
        other => canonical_value(other),
    }
}

/// Canonical text of a JSON value; `None` for null
pub fn canonical_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => Some(i.to_string()),
            (None, Some(u)) => Some(u.to_string()),
            _ => n.as_f64().map(normalize_number),
        },
        Value::String(s) => Some(canonical_numeric_text(s.trim()).unwrap_or_else(|| escape(s))),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|v| canonical_value(v).unwrap_or_default())
                .collect();
            Some(format!("[{}]", parts.join(",")))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .filter_map(|k| canonical_value(&map[k]).map(|v| format!("{}:{v}", escape(k))))
                .collect();
            Some(format!("{{{}}}", parts.join(",")))
        }
    }
}

/// Integers keep every digit; other numbers go through `f64`
fn canonical_numeric_text(text: &str) -> Option<String> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(i.to_string());
    }
    if let Ok(u) = text.parse::<u64>() {
        return Some(u.to_string());
    }
    match text.parse::<f64>() {
        Ok(n) if n.is_finite() && !text.is_empty() => Some(normalize_number(n)),
        _ => None,
    }
}

fn normalize_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        // Also folds -0 into 0
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Percent-escape the characters used as separators
fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' | '|' | ';' | '~' | ',' | ':' | '=' | '[' | ']' | '{' | '}' => {
                out.push_str(&format!("%{:02X}", c as u32));
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_shared::FilterOperator;
    use serde_json::json;

    fn view() -> ViewId {
        ViewId::new("orders").unwrap()
    }

    fn status_pending() -> FilterItem {
        FilterItem::new("status", FilterOperator::Eq, json!("pending"))
    }

    fn total_over() -> FilterItem {
        FilterItem::new("grand_total", FilterOperator::Gt, json!(100))
    }

    #[test]
    fn test_filter_order_does_not_matter() {
        let a = FilterModel::default()
            .with_item(status_pending())
            .with_item(total_over());
        let b = FilterModel::default()
            .with_item(total_over())
            .with_item(status_pending());

        let p = Pagination::new(0, 25);
        assert_eq!(
            fingerprint(&view(), &p, &[], &a, ""),
            fingerprint(&view(), &p, &[], &b, "")
        );
    }

    #[test]
    fn test_numeric_values_collapse() {
        let p = Pagination::new(0, 25);
        let keys: Vec<Fingerprint> = [json!(0), json!(0.0), json!("0"), json!(-0.0)]
            .into_iter()
            .map(|value| {
                let filter = FilterModel::default().with_item(FilterItem::new(
                    "qty",
                    FilterOperator::Eq,
                    value,
                ));
                fingerprint(&view(), &p, &[], &filter, "")
            })
            .collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_large_integer_ids_stay_distinct() {
        let big = 9_007_199_254_740_993_u64;
        assert_eq!(canonical_value(&json!(big)), Some(big.to_string()));
        assert_ne!(canonical_value(&json!(big)), canonical_value(&json!(big - 1)));
        assert_eq!(
            canonical_value(&json!(big.to_string())),
            canonical_value(&json!(big))
        );
        assert_eq!(canonical_value(&json!(u64::MAX)), Some(u64::MAX.to_string()));
        assert_eq!(canonical_value(&json!(12.0)), canonical_value(&json!(12)));
    }

    #[test]
    fn test_in_list_is_a_set() {
        let p = Pagination::new(0, 25);
        let a = FilterModel::default().with_item(FilterItem::new(
            "status",
            FilterOperator::In,
            json!(["pending", "complete"]),
        ));
        let b = FilterModel::default().with_item(FilterItem::new(
            "status",
            FilterOperator::In,
            json!(["complete", "pending", "pending"]),
        ));
        assert_eq!(
            fingerprint(&view(), &p, &[], &a, ""),
            fingerprint(&view(), &p, &[], &b, "")
        );
    }

    #[test]
    fn test_sort_order_is_significant() {
        let p = Pagination::new(0, 25);
        let f = FilterModel::default();
        let ab = [SortItem::asc("a"), SortItem::desc("b")];
        let ba = [SortItem::desc("b"), SortItem::asc("a")];
        assert_ne!(
            fingerprint(&view(), &p, &ab, &f, ""),
            fingerprint(&view(), &p, &ba, &f, "")
        );
    }

    #[test]
    fn test_empty_optionals_are_omitted() {
        let p = Pagination::new(2, 50);
        let blank = FilterModel::default().with_quick_filter("  ");
        let key = fingerprint(&view(), &p, &[], &blank, "");
        assert_eq!(key.as_str(), "grid:orders|p=2:50");
    }

    #[test]
    fn test_separators_cannot_collide() {
        let p = Pagination::new(0, 25);
        let f = FilterModel::default();
        let tricky = ViewId::new("a|p=0:25").unwrap();
        let key = fingerprint(&tricky, &p, &[], &f, "");
        assert!(belongs_to(&key, &tricky));
        assert!(!belongs_to(&key, &ViewId::new("a").unwrap()));
    }

    #[test]
    fn test_prefix_groups_view_keys() {
        let f = FilterModel::default().with_quick_filter("blue shirt");
        let page = fingerprint(&view(), &Pagination::new(3, 10), &[], &f, "store-2");
        let all = client_fingerprint(&view(), &f, "store-2");
        assert!(belongs_to(&page, &view()));
        assert!(belongs_to(&all, &view()));
        assert_ne!(page, all);
        assert!(page.as_str().ends_with("|q=blue shirt|v=store-2"));
    }
}
