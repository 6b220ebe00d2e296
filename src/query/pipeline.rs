//! Join engine
//!
//! Turns the catalog's static join graph plus a compiled filter expression
//! into an ordered MongoDB aggregation pipeline over the `file` collection.
//!
//! Stage order:
//!
//! 1. one `$lookup` per relationship the filter reads, one-to-one joins
//!    before the cardinality-expanding `collections` join
//! 2. `$match` with the compiled expression
//! 3. `$sort {_id: 1}`, `$skip`, `$limit` (stable pagination windows)
//! 4. `$lookup`s needed only for the requested output shape
//! 5. `$project` dropping joined `_id`s
//!
//! Every relationship joins at most once: a relationship referenced by both
//! the filter and the selection is joined up front with the union of its
//! nested sub-joins.

use bson::{doc, oid::ObjectId, Document};
use std::collections::BTreeSet;

use crate::catalog::{self, Cardinality, EntityDef, JoinKind, RelationDef};
use crate::query::filter::{Compiled, Expr};
use crate::types::{ApiError, Result};

/// Validated pagination window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: i64,
    pub limit: i64,
}

/// Enforce `page >= 0` and `pageSize >= 1`, computing the window
pub fn validate_pagination(page: i64, page_size: i64) -> Result<Page> {
    if page < 0 {
        return Err(ApiError::InvalidPagination(format!(
            "page must be >= 0, got {}",
            page
        )));
    }
    if page_size < 1 {
        return Err(ApiError::InvalidPagination(format!(
            "pageSize must be >= 1, got {}",
            page_size
        )));
    }
    let skip = page.checked_mul(page_size).ok_or_else(|| {
        ApiError::InvalidPagination(format!("page {} * pageSize {} overflows", page, page_size))
    })?;
    Ok(Page { skip, limit: page_size })
}

/// Resolve a client selection of nested entities to relationship store paths
///
/// `None` selects the full nested entity graph. Entries are dotted API
/// names (`"collections.biosamples.anatomy"`); every prefix is implied.
pub fn resolve_selection(select: Option<&[String]>) -> Result<BTreeSet<String>> {
    let Some(entries) = select else {
        return Ok(all_relation_paths());
    };

    let mut paths = BTreeSet::new();
    for entry in entries {
        let mut entity = catalog::file_entity();
        let mut store_path = String::new();
        for segment in entry.split('.') {
            let relation = entity
                .relations
                .iter()
                .find(|r| r.api == segment)
                .ok_or_else(|| ApiError::UnknownField(format!("select.{}", entry)))?;
            if !store_path.is_empty() {
                store_path.push('.');
            }
            store_path.push_str(relation.store);
            paths.insert(store_path.clone());
            entity = catalog::entity(relation.target)
                .ok_or_else(|| ApiError::UnknownField(format!("select.{}", entry)))?;
        }
    }
    Ok(paths)
}

/// Every relationship path reachable from the File entity
pub fn all_relation_paths() -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    collect_paths(catalog::file_entity(), "", &mut paths);
    paths
}

fn collect_paths(entity: &'static EntityDef, prefix: &str, out: &mut BTreeSet<String>) {
    for relation in entity.relations {
        let path = if prefix.is_empty() {
            relation.store.to_string()
        } else {
            format!("{}.{}", prefix, relation.store)
        };
        out.insert(path.clone());
        if let Some(target) = catalog::entity(relation.target) {
            collect_paths(target, &path, out);
        }
    }
}

/// Plan the paginated `files` query
pub fn plan_files(compiled: &Compiled, selection: &BTreeSet<String>, page: Page) -> Vec<Document> {
    let mut union: BTreeSet<String> = compiled.touched.clone();
    union.extend(selection.iter().cloned());

    // A top-level relationship is filter-relevant when any touched path
    // passes through it; its whole nested subtree then joins before $match.
    let filter_roots: BTreeSet<&str> = compiled
        .touched
        .iter()
        .map(|p| top_segment(p))
        .collect();

    let pre: BTreeSet<String> = union
        .iter()
        .filter(|p| filter_roots.contains(top_segment(p)))
        .cloned()
        .collect();
    let post: BTreeSet<String> = union.difference(&pre).cloned().collect();

    let mut stages = Vec::new();

    let (ones, manys): (Vec<_>, Vec<_>) = build_tree(catalog::file_entity(), "", &pre)
        .into_iter()
        .partition(|n| n.relation.cardinality == Cardinality::One);
    for node in ones.iter().chain(manys.iter()) {
        stages.extend(relation_stages(node));
    }

    if compiled.expr != Expr::True {
        stages.push(doc! { "$match": compiled.expr.to_match() });
    }

    stages.push(doc! { "$sort": { "_id": 1 } });
    stages.push(doc! { "$skip": page.skip });
    stages.push(doc! { "$limit": page.limit });

    for node in build_tree(catalog::file_entity(), "", &post) {
        stages.extend(relation_stages(&node));
    }

    if let Some(project) = id_exclusion_project(&union) {
        stages.push(project);
    }

    stages
}

/// Plan the single-entity `file(id)` lookup
///
/// Bypasses pagination and the filter compiler entirely.
pub fn plan_file_by_id(id: ObjectId, selection: &BTreeSet<String>) -> Vec<Document> {
    let mut stages = vec![doc! { "$match": { "_id": id } }];

    let (ones, manys): (Vec<_>, Vec<_>) = build_tree(catalog::file_entity(), "", selection)
        .into_iter()
        .partition(|n| n.relation.cardinality == Cardinality::One);
    for node in ones.iter().chain(manys.iter()) {
        stages.extend(relation_stages(node));
    }

    if let Some(project) = id_exclusion_project(selection) {
        stages.push(project);
    }

    stages
}

fn top_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Active relationship with its active nested sub-joins
struct RelNode {
    relation: &'static RelationDef,
    children: Vec<RelNode>,
}

fn build_tree(entity: &'static EntityDef, prefix: &str, active: &BTreeSet<String>) -> Vec<RelNode> {
    entity
        .relations
        .iter()
        .filter_map(|relation| {
            let path = if prefix.is_empty() {
                relation.store.to_string()
            } else {
                format!("{}.{}", prefix, relation.store)
            };
            if !active.contains(&path) {
                return None;
            }
            let children = catalog::entity(relation.target)
                .map(|target| build_tree(target, &path, active))
                .unwrap_or_default();
            Some(RelNode { relation, children })
        })
        .collect()
}

/// Stages joining one relationship, nested sub-joins included
fn relation_stages(node: &RelNode) -> Vec<Document> {
    let relation = node.relation;
    match relation.join {
        JoinKind::Field { local, foreign } => {
            vec![
                doc! { "$lookup": {
                    "from": relation.collection,
                    "localField": local,
                    "foreignField": foreign,
                    "as": relation.store,
                }},
                doc! { "$unwind": {
                    "path": format!("${}", relation.store),
                    "preserveNullAndEmptyArrays": true,
                }},
            ]
        }
        JoinKind::Term { local } => {
            vec![
                doc! { "$lookup": {
                    "from": relation.collection,
                    "let": { "sub": "$submission", "term": format!("${}", local) },
                    "pipeline": [
                        { "$match": { "$expr": { "$and": [
                            { "$eq": ["$submission", "$$sub"] },
                            { "$eq": ["$id", "$$term"] },
                        ]}}},
                    ],
                    "as": relation.store,
                }},
                doc! { "$unwind": {
                    "path": format!("${}", relation.store),
                    "preserveNullAndEmptyArrays": true,
                }},
            ]
        }
        JoinKind::Junction {
            junction,
            junction_local,
            junction_foreign,
        } => {
            // Inner pipeline resolves the target row per junction row, with
            // the active nested joins applied before the row is lifted out.
            let mut target_pipeline = vec![doc! { "$match": { "$expr": { "$and": [
                { "$eq": ["$id_namespace", "$$target_ns"] },
                { "$eq": ["$local_id", "$$target_id"] },
            ]}}}];
            for child in &node.children {
                target_pipeline.extend(relation_stages(child));
            }

            vec![doc! { "$lookup": {
                "from": junction,
                "let": { "ns": "$id_namespace", "lid": "$local_id" },
                "pipeline": [
                    { "$match": { "$expr": { "$and": [
                        { "$eq": [format!("${}", junction_local[0]), "$$ns"] },
                        { "$eq": [format!("${}", junction_local[1]), "$$lid"] },
                    ]}}},
                    { "$lookup": {
                        "from": relation.collection,
                        "let": {
                            "target_ns": format!("${}", junction_foreign[0]),
                            "target_id": format!("${}", junction_foreign[1]),
                        },
                        "pipeline": target_pipeline,
                        "as": "entity",
                    }},
                    { "$unwind": "$entity" },
                    { "$replaceRoot": { "newRoot": "$entity" } },
                ],
                "as": relation.store,
            }}]
        }
    }
}

/// `$project` dropping the `_id` of every joined document
fn id_exclusion_project(active: &BTreeSet<String>) -> Option<Document> {
    if active.is_empty() {
        return None;
    }
    let mut project = Document::new();
    for path in active {
        project.insert(format!("{}._id", path), 0);
    }
    Some(doc! { "$project": project })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::{compile, FilterExpr};
    use serde_json::json;

    fn compiled(value: serde_json::Value) -> Compiled {
        let filter = FilterExpr::from_json(&value);
        compile(Some(&filter)).unwrap()
    }

    fn lookup_as(stage: &Document) -> Option<&str> {
        stage
            .get_document("$lookup")
            .ok()
            .and_then(|l| l.get_str("as").ok())
    }

    fn stage_index(stages: &[Document], key: &str) -> Option<usize> {
        stages.iter().position(|s| s.contains_key(key))
    }

    fn lookup_index(stages: &[Document], name: &str) -> Option<usize> {
        stages.iter().position(|s| lookup_as(s) == Some(name))
    }

    #[test]
    fn pagination_window_math() {
        assert_eq!(
            validate_pagination(0, 10).unwrap(),
            Page { skip: 0, limit: 10 }
        );
        assert_eq!(
            validate_pagination(3, 25).unwrap(),
            Page { skip: 75, limit: 25 }
        );
    }

    #[test]
    fn pagination_bounds_enforced() {
        assert!(matches!(
            validate_pagination(-1, 10).unwrap_err(),
            ApiError::InvalidPagination(_)
        ));
        assert!(matches!(
            validate_pagination(0, 0).unwrap_err(),
            ApiError::InvalidPagination(_)
        ));
        assert!(matches!(
            validate_pagination(i64::MAX, 2).unwrap_err(),
            ApiError::InvalidPagination(_)
        ));
    }

    #[test]
    fn empty_filter_emits_no_match_stage() {
        let plan = plan_files(
            &compile(None).unwrap(),
            &all_relation_paths(),
            Page { skip: 0, limit: 100 },
        );
        assert!(stage_index(&plan, "$match").is_none());
        assert!(stage_index(&plan, "$sort").is_some());
        assert_eq!(
            plan[stage_index(&plan, "$skip").unwrap()].get_i64("$skip").unwrap(),
            0
        );
        assert_eq!(
            plan[stage_index(&plan, "$limit").unwrap()].get_i64("$limit").unwrap(),
            100
        );
    }

    #[test]
    fn relationship_joins_at_most_once() {
        // dcc referenced by both the filter and the selection
        let c = compiled(json!({ "dcc": { "dccAbbreviation": "4DN" } }));
        let selection = resolve_selection(Some(&["dcc".to_string()])).unwrap();
        let plan = plan_files(&c, &selection, Page { skip: 0, limit: 10 });

        let dcc_lookups = plan.iter().filter(|s| lookup_as(s) == Some("dcc")).count();
        assert_eq!(dcc_lookups, 1);
    }

    #[test]
    fn filter_joins_precede_match_and_expanding_join_is_last_of_them() {
        let c = compiled(json!({
            "fileFormat": { "name": "TSV" },
            "collections": { "name": "c1" }
        }));
        let selection = BTreeSet::new();
        let plan = plan_files(&c, &selection, Page { skip: 0, limit: 10 });

        let format_at = lookup_index(&plan, "file_format").unwrap();
        let collections_at = lookup_index(&plan, "collections").unwrap();
        let match_at = stage_index(&plan, "$match").unwrap();

        assert!(format_at < collections_at, "one-to-one join before expanding join");
        assert!(collections_at < match_at, "match runs after its dependencies");
    }

    #[test]
    fn selection_only_joins_run_after_pagination() {
        let c = compiled(json!({ "filename": "data.csv" }));
        let selection = resolve_selection(Some(&["collections".to_string()])).unwrap();
        let plan = plan_files(&c, &selection, Page { skip: 10, limit: 10 });

        let limit_at = stage_index(&plan, "$limit").unwrap();
        let collections_at = lookup_index(&plan, "collections").unwrap();
        assert!(limit_at < collections_at);
    }

    #[test]
    fn filter_touched_subtree_joins_up_front_even_when_also_selected() {
        let c = compiled(json!({ "collections": { "name": "c1" } }));
        let selection =
            resolve_selection(Some(&["collections.biosamples.anatomy".to_string()])).unwrap();
        let plan = plan_files(&c, &selection, Page { skip: 0, limit: 10 });

        // One collections join, before $match, carrying the biosample subtree
        let collections_at = lookup_index(&plan, "collections").unwrap();
        let match_at = stage_index(&plan, "$match").unwrap();
        assert!(collections_at < match_at);
        assert_eq!(
            plan.iter().filter(|s| lookup_as(s) == Some("collections")).count(),
            1
        );
        let rendered = format!("{}", plan[collections_at]);
        assert!(rendered.contains("biosample_in_collection"));
        assert!(rendered.contains("anatomy"));
    }

    #[test]
    fn term_join_pairs_submission_with_id() {
        let c = compiled(json!({ "fileFormat": { "id": "format:3475" } }));
        let plan = plan_files(&c, &BTreeSet::new(), Page { skip: 0, limit: 10 });
        let stage = &plan[lookup_index(&plan, "file_format").unwrap()];
        let rendered = format!("{}", stage);
        assert!(rendered.contains("$submission"));
        assert!(rendered.contains("$$sub"));
        assert!(rendered.contains("$$term"));
    }

    #[test]
    fn sort_skip_limit_are_ordered() {
        let c = compiled(json!({ "filename": "x" }));
        let plan = plan_files(&c, &BTreeSet::new(), Page { skip: 30, limit: 15 });
        let sort_at = stage_index(&plan, "$sort").unwrap();
        let skip_at = stage_index(&plan, "$skip").unwrap();
        let limit_at = stage_index(&plan, "$limit").unwrap();
        assert!(sort_at < skip_at && skip_at < limit_at);
        assert_eq!(plan[skip_at].get_i64("$skip").unwrap(), 30);
        assert_eq!(plan[limit_at].get_i64("$limit").unwrap(), 15);
    }

    #[test]
    fn single_file_plan_bypasses_pagination() {
        let id = ObjectId::new();
        let plan = plan_file_by_id(id, &all_relation_paths());

        assert_eq!(
            plan[0].get_document("$match").unwrap().get_object_id("_id").unwrap(),
            id
        );
        assert!(stage_index(&plan, "$skip").is_none());
        assert!(stage_index(&plan, "$limit").is_none());
        assert!(lookup_index(&plan, "dcc").is_some());
        assert!(lookup_index(&plan, "collections").is_some());
    }

    #[test]
    fn selection_resolution_implies_prefixes() {
        let selection =
            resolve_selection(Some(&["collections.biosamples.anatomy".to_string()])).unwrap();
        assert!(selection.contains("collections"));
        assert!(selection.contains("collections.biosamples"));
        assert!(selection.contains("collections.biosamples.anatomy"));
    }

    #[test]
    fn unknown_selection_entry_is_rejected() {
        let err = resolve_selection(Some(&["bogus".to_string()])).unwrap_err();
        match err {
            ApiError::UnknownField(path) => assert_eq!(path, "select.bogus"),
            other => panic!("expected UnknownField, got {:?}", other),
        }
    }

    #[test]
    fn project_drops_joined_ids() {
        let plan = plan_files(
            &compile(None).unwrap(),
            &all_relation_paths(),
            Page { skip: 0, limit: 10 },
        );
        let project = plan.last().unwrap().get_document("$project").unwrap();
        assert_eq!(project.get_i32("dcc._id").unwrap(), 0);
        assert_eq!(
            project.get_i32("collections.biosamples.anatomy._id").unwrap(),
            0
        );
    }
}
