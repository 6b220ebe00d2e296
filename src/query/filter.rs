//! Filter compiler
//!
//! Compiles the client-supplied recursive filter value into a boolean
//! expression tree over dotted store paths. The reduction rule:
//!
//! - a sequence combines its elements with OR
//! - a mapping combines its entries with AND
//! - a leaf value under a field is an equality test on that field
//!
//! Field names arrive in API display form (camelCase) and are translated
//! through the Entity Catalog; nested entity fields recurse with the target
//! entity as the new context. The compiler is pure: it never touches the
//! store, and the same input always yields the same tree.

use bson::{doc, Bson, Document};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::catalog::{self, EntityDef, FieldDef, RelationDef, Resolved};
use crate::types::{ApiError, Result};

/// Client filter value as a tagged variant
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Leaf(Bson),
    Sequence(Vec<FilterExpr>),
    Mapping(Vec<(String, FilterExpr)>),
}

impl FilterExpr {
    /// Parse a JSON value into the tagged filter shape
    pub fn from_json(value: &Value) -> FilterExpr {
        match value {
            Value::Array(items) => {
                FilterExpr::Sequence(items.iter().map(FilterExpr::from_json).collect())
            }
            Value::Object(entries) => FilterExpr::Mapping(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), FilterExpr::from_json(v)))
                    .collect(),
            ),
            scalar => FilterExpr::Leaf(scalar_to_bson(scalar)),
        }
    }
}

fn scalar_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else {
                Bson::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        // Arrays and objects are handled structurally before this point
        other => Bson::String(other.to_string()),
    }
}

/// Compiled boolean expression tree
///
/// Each level keeps exactly one operator; mixed AND/OR always materializes
/// a child node, never flattens.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Matches every record (degenerate filter)
    True,
    Eq(String, Bson),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    /// Render as a MongoDB match document
    pub fn to_match(&self) -> Document {
        match self {
            Expr::True => doc! {},
            Expr::Eq(path, value) => {
                let mut eq = Document::new();
                eq.insert(path.clone(), value.clone());
                eq
            }
            Expr::And(children) => {
                doc! { "$and": children.iter().map(Expr::to_match).collect::<Vec<_>>() }
            }
            Expr::Or(children) => {
                doc! { "$or": children.iter().map(Expr::to_match).collect::<Vec<_>>() }
            }
        }
    }
}

/// Compiler output: the expression plus every relationship its paths traverse
#[derive(Debug, Clone)]
pub struct Compiled {
    pub expr: Expr,
    /// Dotted store paths of touched relationships, e.g. `collections.biosamples`
    pub touched: BTreeSet<String>,
}

/// Compile an optional filter rooted at the File entity
pub fn compile(filter: Option<&FilterExpr>) -> Result<Compiled> {
    let mut touched = BTreeSet::new();
    let expr = match filter {
        None => Expr::True,
        Some(f) => compile_entity(f, catalog::file_entity(), "", "input", &mut touched)?,
    };
    Ok(Compiled { expr, touched })
}

/// Compile a filter value in entity context (fields of `entity` are in scope)
fn compile_entity(
    filter: &FilterExpr,
    entity: &'static EntityDef,
    rel_prefix: &str,
    api_path: &str,
    touched: &mut BTreeSet<String>,
) -> Result<Expr> {
    match filter {
        FilterExpr::Leaf(_) => Err(ApiError::UnknownField(format!(
            "{}: expected a mapping of {} fields, got a scalar",
            api_path, entity.name
        ))),
        FilterExpr::Sequence(items) => {
            if items.is_empty() {
                return Ok(Expr::True);
            }
            let children = items
                .iter()
                .map(|item| compile_entity(item, entity, rel_prefix, api_path, touched))
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::Or(children))
        }
        FilterExpr::Mapping(entries) => {
            if entries.is_empty() {
                return Ok(Expr::True);
            }
            let children = entries
                .iter()
                .map(|(key, value)| {
                    let child_api = format!("{}.{}", api_path, key);
                    match entity.resolve(key) {
                        None => Err(ApiError::UnknownField(child_api)),
                        Some(Resolved::Field(field)) => {
                            compile_field(value, field, rel_prefix, &child_api)
                        }
                        Some(Resolved::Relation(relation)) => {
                            compile_relation(value, relation, rel_prefix, &child_api, touched)
                        }
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::And(children))
        }
    }
}

/// Compile a constraint on one scalar field
fn compile_field(
    value: &FilterExpr,
    field: &'static FieldDef,
    rel_prefix: &str,
    api_path: &str,
) -> Result<Expr> {
    match value {
        FilterExpr::Leaf(scalar) => Ok(Expr::Eq(
            join_path(rel_prefix, field.store),
            scalar.clone(),
        )),
        FilterExpr::Sequence(items) => {
            if items.is_empty() {
                return Ok(Expr::True);
            }
            let children = items
                .iter()
                .map(|item| compile_field(item, field, rel_prefix, api_path))
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::Or(children))
        }
        FilterExpr::Mapping(entries) => {
            let offending = entries
                .first()
                .map(|(k, _)| format!("{}.{}", api_path, k))
                .unwrap_or_else(|| api_path.to_string());
            Err(ApiError::UnknownField(offending))
        }
    }
}

/// Compile a constraint on a nested entity, recursing with the target entity
fn compile_relation(
    value: &FilterExpr,
    relation: &'static RelationDef,
    rel_prefix: &str,
    api_path: &str,
    touched: &mut BTreeSet<String>,
) -> Result<Expr> {
    let rel_path = join_path(rel_prefix, relation.store);
    touched.insert(rel_path.clone());

    let target = catalog::entity(relation.target)
        .ok_or_else(|| ApiError::UnknownField(api_path.to_string()))?;

    compile_entity(value, target, &rel_path, api_path, touched)
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", prefix, segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile_json(value: serde_json::Value) -> Result<Compiled> {
        let filter = FilterExpr::from_json(&value);
        compile(Some(&filter))
    }

    #[test]
    fn absent_filter_matches_everything() {
        let compiled = compile(None).unwrap();
        assert_eq!(compiled.expr, Expr::True);
        assert_eq!(compiled.expr.to_match(), doc! {});
        assert!(compiled.touched.is_empty());
    }

    #[test]
    fn empty_sequence_and_mapping_match_everything() {
        assert_eq!(compile_json(json!([])).unwrap().expr, Expr::True);
        assert_eq!(compile_json(json!({})).unwrap().expr, Expr::True);
    }

    #[test]
    fn sequence_is_or_of_elements() {
        let compiled = compile_json(json!([
            { "filename": "data.csv" },
            { "filename": "results.tsv" }
        ]))
        .unwrap();

        let a = compile_json(json!({ "filename": "data.csv" })).unwrap().expr;
        let b = compile_json(json!({ "filename": "results.tsv" })).unwrap().expr;
        assert_eq!(compiled.expr, Expr::Or(vec![a, b]));
    }

    #[test]
    fn mapping_is_and_of_entries() {
        let compiled = compile_json(json!({
            "filename": "data.csv",
            "localId": "f-1"
        }))
        .unwrap();

        // serde_json orders object keys, so the AND order is deterministic
        assert_eq!(
            compiled.expr,
            Expr::And(vec![
                Expr::Eq("filename".into(), Bson::String("data.csv".into())),
                Expr::Eq("local_id".into(), Bson::String("f-1".into())),
            ])
        );
    }

    #[test]
    fn value_list_is_union_of_equalities() {
        let compiled = compile_json(json!([
            { "filename": ["data.csv", "results.tsv"] }
        ]))
        .unwrap();

        assert_eq!(
            compiled.expr,
            Expr::Or(vec![Expr::And(vec![Expr::Or(vec![
                Expr::Eq("filename".into(), Bson::String("data.csv".into())),
                Expr::Eq("filename".into(), Bson::String("results.tsv".into())),
            ])])])
        );
    }

    #[test]
    fn nested_entity_translates_paths_and_records_touch() {
        let compiled = compile_json(json!([
            { "filename": "data.csv", "dcc": { "dccAbbreviation": ["4DN"] } }
        ]))
        .unwrap();

        let rendered = compiled.expr.to_match();
        let text = format!("{}", rendered);
        assert!(text.contains("dcc.dcc_abbreviation"));
        assert!(text.contains("filename"));
        assert_eq!(
            compiled.touched.iter().collect::<Vec<_>>(),
            vec!["dcc"]
        );
    }

    #[test]
    fn deep_nesting_touches_every_prefix() {
        let compiled = compile_json(json!({
            "collections": { "biosamples": { "anatomy": { "name": "brain" } } }
        }))
        .unwrap();

        assert_eq!(
            compiled.touched.iter().collect::<Vec<_>>(),
            vec![
                "collections",
                "collections.biosamples",
                "collections.biosamples.anatomy"
            ]
        );

        assert_eq!(
            compiled.expr,
            Expr::And(vec![Expr::And(vec![Expr::And(vec![Expr::And(vec![
                Expr::Eq(
                    "collections.biosamples.anatomy.name".into(),
                    Bson::String("brain".into())
                )
            ])])])])
        );
    }

    #[test]
    fn no_flattening_across_nested_sequences() {
        let compiled = compile_json(json!([[{ "filename": "x" }]])).unwrap();
        match compiled.expr {
            Expr::Or(outer) => {
                assert_eq!(outer.len(), 1);
                assert!(matches!(outer[0], Expr::Or(_)));
            }
            other => panic!("expected nested OR, got {:?}", other),
        }
    }

    #[test]
    fn unknown_field_names_the_full_path() {
        let err = compile_json(json!({ "dcc": { "bogus": "x" } })).unwrap_err();
        match err {
            ApiError::UnknownField(path) => assert_eq!(path, "input.dcc.bogus"),
            other => panic!("expected UnknownField, got {:?}", other),
        }
    }

    #[test]
    fn scalar_under_entity_field_is_rejected() {
        let err = compile_json(json!({ "dcc": "4DN" })).unwrap_err();
        assert!(matches!(err, ApiError::UnknownField(_)));
    }

    #[test]
    fn mapping_under_scalar_field_is_rejected() {
        let err = compile_json(json!({ "filename": { "like": "x" } })).unwrap_err();
        match err {
            ApiError::UnknownField(path) => assert_eq!(path, "input.filename.like"),
            other => panic!("expected UnknownField, got {:?}", other),
        }
    }

    #[test]
    fn compilation_is_deterministic() {
        let input = json!([
            { "filename": ["a", "b"], "dcc": { "dccAbbreviation": "4DN" } }
        ]);
        let first = compile_json(input.clone()).unwrap();
        let second = compile_json(input).unwrap();
        assert_eq!(first.expr, second.expr);
        assert_eq!(first.touched, second.touched);
    }
}
