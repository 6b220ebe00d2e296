//! Response shaping
//!
//! Converts aggregation output documents into API-shaped JSON: camelCase
//! field names from the catalog, nested entity sub-objects, and the root
//! `_id` exposed as the opaque `id`. Only catalog-known fields are emitted,
//! so internal attributes (`submission`, loader bookkeeping) never leak.

use bson::{Bson, Document};
use serde_json::{Map, Value};

use crate::catalog::{self, Cardinality, EntityDef};

/// Shape one File document into an API record
pub fn shape_file(doc: &Document) -> Value {
    let mut shaped = shape_entity(doc, catalog::file_entity());
    if let Ok(id) = doc.get_object_id("_id") {
        shaped.insert("id".to_string(), Value::String(id.to_hex()));
    }
    Value::Object(shaped)
}

fn shape_entity(doc: &Document, entity: &'static EntityDef) -> Map<String, Value> {
    let mut out = Map::new();

    for field in entity.fields {
        if let Some(value) = doc.get(field.store) {
            out.insert(field.api.to_string(), bson_to_json(value));
        }
    }

    for relation in entity.relations {
        let Some(value) = doc.get(relation.store) else {
            continue;
        };
        let Some(target) = catalog::entity(relation.target) else {
            continue;
        };
        match (relation.cardinality, value) {
            (Cardinality::One, Bson::Document(nested)) => {
                out.insert(
                    relation.api.to_string(),
                    Value::Object(shape_entity(nested, target)),
                );
            }
            (Cardinality::Many, Bson::Array(items)) => {
                let shaped: Vec<Value> = items
                    .iter()
                    .filter_map(|item| match item {
                        Bson::Document(nested) => {
                            Some(Value::Object(shape_entity(nested, target)))
                        }
                        _ => None,
                    })
                    .collect();
                out.insert(relation.api.to_string(), Value::Array(shaped));
            }
            // An unjoined scalar FK (e.g. a raw CV id) stays hidden: the API
            // name denotes the nested entity, not the reference value
            _ => {}
        }
    }

    out
}

fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::Null => Value::Null,
        other => other.clone().into_relaxed_extjson(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[test]
    fn renames_fields_and_exposes_id() {
        let id = ObjectId::new();
        let doc = doc! {
            "_id": id,
            "id_namespace": "ns",
            "local_id": "f-1",
            "filename": "data.csv",
            "size_in_bytes": 1024_i64,
            "submission": "4dn",
        };
        let shaped = shape_file(&doc);

        assert_eq!(shaped["id"], id.to_hex());
        assert_eq!(shaped["idNamespace"], "ns");
        assert_eq!(shaped["localId"], "f-1");
        assert_eq!(shaped["filename"], "data.csv");
        assert_eq!(shaped["sizeInBytes"], 1024);
        // internal tag never leaks
        assert!(shaped.get("submission").is_none());
    }

    #[test]
    fn nests_joined_entities() {
        let doc = doc! {
            "_id": ObjectId::new(),
            "filename": "data.csv",
            "dcc": { "id": "cfde_registry_dcc:4dn", "dcc_abbreviation": "4DN" },
            "collections": [
                {
                    "local_id": "c-1",
                    "name": "Collection One",
                    "biosamples": [
                        {
                            "local_id": "b-1",
                            "anatomy": { "id": "UBERON:0000955", "name": "brain" },
                        }
                    ],
                }
            ],
        };
        let shaped = shape_file(&doc);

        assert_eq!(shaped["dcc"]["dccAbbreviation"], "4DN");
        assert_eq!(shaped["collections"][0]["name"], "Collection One");
        assert_eq!(
            shaped["collections"][0]["biosamples"][0]["anatomy"]["name"],
            "brain"
        );
    }

    #[test]
    fn unjoined_scalar_reference_is_hidden() {
        let doc = doc! {
            "_id": ObjectId::new(),
            "filename": "data.csv",
            "file_format": "format:3475",
        };
        let shaped = shape_file(&doc);
        assert!(shaped.get("fileFormat").is_none());
    }
}
