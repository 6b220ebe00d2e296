//! Entity Catalog - static description of the C2M2 entity graph
//!
//! One table per entity: the API (camelCase) to store (snake_case) field
//! mapping and the relationships leaving the entity. The join graph is
//! explicit data, not runtime introspection, so the filter compiler and
//! join engine stay exhaustive and statically checkable.
//!
//! Join paths rooted at `file`:
//!
//! ```text
//! file -> dcc                          (shared submission tag)
//! file -> file_format | data_type | assay_type   ((submission, id) CV terms)
//! file -> collections                  (file_in_collection junction)
//! collections -> biosamples            (biosample_in_collection junction)
//! biosamples -> anatomy                ((submission, id) CV term)
//! ```

use crate::db::collections;

/// Result-set multiplicity of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one target row per source row
    One,
    /// Zero or more target rows per source row
    Many,
}

/// One scalar field: API display name and underlying store name
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub api: &'static str,
    pub store: &'static str,
}

/// How a relationship's rows are matched in the store
#[derive(Debug, Clone, Copy)]
pub enum JoinKind {
    /// Equality on one shared scalar field (file -> dcc via `submission`)
    Field {
        local: &'static str,
        foreign: &'static str,
    },
    /// Controlled-vocabulary term: local scalar id resolved within the
    /// same submission, `(submission, <local>) -> (submission, id)`
    Term { local: &'static str },
    /// Through a junction collection; source and target both use the
    /// composite `(id_namespace, local_id)` key
    Junction {
        junction: &'static str,
        junction_local: [&'static str; 2],
        junction_foreign: [&'static str; 2],
    },
}

/// One relationship leaving an entity
#[derive(Debug, Clone, Copy)]
pub struct RelationDef {
    pub api: &'static str,
    /// Output field on the joined document, also the path segment used by
    /// compiled filter paths
    pub store: &'static str,
    pub target: &'static str,
    pub collection: &'static str,
    pub cardinality: Cardinality,
    pub join: JoinKind,
}

/// One entity type
#[derive(Debug)]
pub struct EntityDef {
    pub name: &'static str,
    pub fields: &'static [FieldDef],
    pub relations: &'static [RelationDef],
}

/// Outcome of resolving an API name against an entity
#[derive(Debug, Clone, Copy)]
pub enum Resolved {
    Field(&'static FieldDef),
    Relation(&'static RelationDef),
}

impl EntityDef {
    /// Resolve an API display name to a field or relationship
    pub fn resolve(&self, api_name: &str) -> Option<Resolved> {
        if let Some(f) = self.fields.iter().find(|f| f.api == api_name) {
            return Some(Resolved::Field(f));
        }
        self.relations
            .iter()
            .find(|r| r.api == api_name)
            .map(Resolved::Relation)
    }

    /// Find a field by its store name
    pub fn field_by_store(&self, store: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|f| f.store == store)
    }

    /// Find a relationship by its store name
    pub fn relation_by_store(&self, store: &str) -> Option<&'static RelationDef> {
        self.relations.iter().find(|r| r.store == store)
    }
}

const CV_TERM_FIELDS: &[FieldDef] = &[
    FieldDef { api: "id", store: "id" },
    FieldDef { api: "name", store: "name" },
    FieldDef { api: "description", store: "description" },
];

const FILE_FIELDS: &[FieldDef] = &[
    FieldDef { api: "idNamespace", store: "id_namespace" },
    FieldDef { api: "localId", store: "local_id" },
    FieldDef { api: "projectIdNamespace", store: "project_id_namespace" },
    FieldDef { api: "projectLocalId", store: "project_local_id" },
    FieldDef { api: "persistentId", store: "persistent_id" },
    FieldDef { api: "creationTime", store: "creation_time" },
    FieldDef { api: "sizeInBytes", store: "size_in_bytes" },
    FieldDef { api: "sha256", store: "sha256" },
    FieldDef { api: "md5", store: "md5" },
    FieldDef { api: "filename", store: "filename" },
    FieldDef { api: "compressionFormat", store: "compression_format" },
    FieldDef { api: "analysisType", store: "analysis_type" },
    FieldDef { api: "mimeType", store: "mime_type" },
    FieldDef { api: "bundleCollectionIdNamespace", store: "bundle_collection_id_namespace" },
    FieldDef { api: "bundleCollectionLocalId", store: "bundle_collection_local_id" },
    FieldDef { api: "dbgapStudyId", store: "dbgap_study_id" },
    FieldDef { api: "accessUrl", store: "access_url" },
    FieldDef { api: "status", store: "status" },
    FieldDef { api: "dataAccessLevel", store: "data_access_level" },
];

const FILE_RELATIONS: &[RelationDef] = &[
    RelationDef {
        api: "dcc",
        store: "dcc",
        target: "dcc",
        collection: collections::DCC,
        cardinality: Cardinality::One,
        join: JoinKind::Field { local: "submission", foreign: "submission" },
    },
    RelationDef {
        api: "fileFormat",
        store: "file_format",
        target: "file_format",
        collection: collections::FILE_FORMAT,
        cardinality: Cardinality::One,
        join: JoinKind::Term { local: "file_format" },
    },
    RelationDef {
        api: "dataType",
        store: "data_type",
        target: "data_type",
        collection: collections::DATA_TYPE,
        cardinality: Cardinality::One,
        join: JoinKind::Term { local: "data_type" },
    },
    RelationDef {
        api: "assayType",
        store: "assay_type",
        target: "assay_type",
        collection: collections::ASSAY_TYPE,
        cardinality: Cardinality::One,
        join: JoinKind::Term { local: "assay_type" },
    },
    RelationDef {
        api: "collections",
        store: "collections",
        target: "collection",
        collection: collections::COLLECTION,
        cardinality: Cardinality::Many,
        join: JoinKind::Junction {
            junction: collections::FILE_IN_COLLECTION,
            junction_local: ["file_id_namespace", "file_local_id"],
            junction_foreign: ["collection_id_namespace", "collection_local_id"],
        },
    },
];

const DCC_FIELDS: &[FieldDef] = &[
    FieldDef { api: "id", store: "id" },
    FieldDef { api: "dccName", store: "dcc_name" },
    FieldDef { api: "dccAbbreviation", store: "dcc_abbreviation" },
    FieldDef { api: "dccDescription", store: "dcc_description" },
    FieldDef { api: "contactEmail", store: "contact_email" },
    FieldDef { api: "contactName", store: "contact_name" },
    FieldDef { api: "dccUrl", store: "dcc_url" },
    FieldDef { api: "projectIdNamespace", store: "project_id_namespace" },
    FieldDef { api: "projectLocalId", store: "project_local_id" },
];

const COLLECTION_FIELDS: &[FieldDef] = &[
    FieldDef { api: "idNamespace", store: "id_namespace" },
    FieldDef { api: "localId", store: "local_id" },
    FieldDef { api: "persistentId", store: "persistent_id" },
    FieldDef { api: "creationTime", store: "creation_time" },
    FieldDef { api: "abbreviation", store: "abbreviation" },
    FieldDef { api: "name", store: "name" },
    FieldDef { api: "description", store: "description" },
];

const COLLECTION_RELATIONS: &[RelationDef] = &[RelationDef {
    api: "biosamples",
    store: "biosamples",
    target: "biosample",
    collection: collections::BIOSAMPLE,
    cardinality: Cardinality::Many,
    join: JoinKind::Junction {
        junction: collections::BIOSAMPLE_IN_COLLECTION,
        junction_local: ["collection_id_namespace", "collection_local_id"],
        junction_foreign: ["biosample_id_namespace", "biosample_local_id"],
    },
}];

const BIOSAMPLE_FIELDS: &[FieldDef] = &[
    FieldDef { api: "idNamespace", store: "id_namespace" },
    FieldDef { api: "localId", store: "local_id" },
    FieldDef { api: "projectIdNamespace", store: "project_id_namespace" },
    FieldDef { api: "projectLocalId", store: "project_local_id" },
    FieldDef { api: "persistentId", store: "persistent_id" },
    FieldDef { api: "creationTime", store: "creation_time" },
    FieldDef { api: "samplePrepMethod", store: "sample_prep_method" },
    FieldDef { api: "biofluid", store: "biofluid" },
];

const BIOSAMPLE_RELATIONS: &[RelationDef] = &[RelationDef {
    api: "anatomy",
    store: "anatomy",
    target: "anatomy",
    collection: collections::ANATOMY,
    cardinality: Cardinality::One,
    join: JoinKind::Term { local: "anatomy" },
}];

const ENTITIES: &[EntityDef] = &[
    EntityDef { name: "file", fields: FILE_FIELDS, relations: FILE_RELATIONS },
    EntityDef { name: "dcc", fields: DCC_FIELDS, relations: &[] },
    EntityDef { name: "collection", fields: COLLECTION_FIELDS, relations: COLLECTION_RELATIONS },
    EntityDef { name: "biosample", fields: BIOSAMPLE_FIELDS, relations: BIOSAMPLE_RELATIONS },
    EntityDef { name: "file_format", fields: CV_TERM_FIELDS, relations: &[] },
    EntityDef { name: "data_type", fields: CV_TERM_FIELDS, relations: &[] },
    EntityDef { name: "assay_type", fields: CV_TERM_FIELDS, relations: &[] },
    EntityDef { name: "anatomy", fields: CV_TERM_FIELDS, relations: &[] },
];

/// Look up an entity by name
pub fn entity(name: &str) -> Option<&'static EntityDef> {
    ENTITIES.iter().find(|e| e.name == name)
}

/// The query root: File
pub fn file_entity() -> &'static EntityDef {
    entity("file").expect("file entity is always registered")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_relation_target_exists() {
        for e in ENTITIES {
            for r in e.relations {
                assert!(
                    entity(r.target).is_some(),
                    "relation {}.{} points at unregistered entity {}",
                    e.name,
                    r.api,
                    r.target
                );
            }
        }
    }

    #[test]
    fn api_names_are_unique_per_entity() {
        for e in ENTITIES {
            let mut names: Vec<&str> = e
                .fields
                .iter()
                .map(|f| f.api)
                .chain(e.relations.iter().map(|r| r.api))
                .collect();
            let before = names.len();
            names.sort_unstable();
            names.dedup();
            assert_eq!(before, names.len(), "duplicate API name on {}", e.name);
        }
    }

    #[test]
    fn resolves_fields_and_relations() {
        let file = file_entity();
        match file.resolve("filename") {
            Some(Resolved::Field(f)) => assert_eq!(f.store, "filename"),
            other => panic!("unexpected: {:?}", other),
        }
        match file.resolve("dcc") {
            Some(Resolved::Relation(r)) => {
                assert_eq!(r.collection, "dcc");
                assert_eq!(r.cardinality, Cardinality::One);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(file.resolve("bogus").is_none());
    }

    #[test]
    fn nested_path_exists_to_anatomy() {
        let file = file_entity();
        let colls = match file.resolve("collections") {
            Some(Resolved::Relation(r)) => entity(r.target).unwrap(),
            _ => panic!("collections missing"),
        };
        let bios = match colls.resolve("biosamples") {
            Some(Resolved::Relation(r)) => entity(r.target).unwrap(),
            _ => panic!("biosamples missing"),
        };
        match bios.resolve("anatomy") {
            Some(Resolved::Relation(r)) => assert_eq!(r.collection, "anatomy"),
            _ => panic!("anatomy missing"),
        }
    }
}
