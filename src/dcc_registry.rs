//! Static registry of supported Data Coordinating Centers
//!
//! Mirrors the CFDE-CC publication layout: each DCC has a normalized
//! lowercase name, a display name, and the URL its normalized datapackage
//! is fetched from. Lookups are case-insensitive.

use crate::types::{ApiError, Result};

/// One supported DCC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DccConfig {
    /// Normalized lowercase name, also used as the `submission` tag
    pub name: &'static str,
    /// Short display label
    pub display_name: &'static str,
    /// Default datapackage endpoint for the materializer service
    pub datapackage_url: &'static str,
}

const REGISTRY: &[DccConfig] = &[
    DccConfig {
        name: "4dn",
        display_name: "4D Nucleome Data Coordination and Integration Center",
        datapackage_url: "https://cfde-drc.s3.amazonaws.com/4DN/C2M2/latest/datapackage.json",
    },
    DccConfig {
        name: "hubmap",
        display_name: "Human BioMolecular Atlas Program",
        datapackage_url: "https://cfde-drc.s3.amazonaws.com/HuBMAP/C2M2/latest/datapackage.json",
    },
];

/// Normalize a DCC name for comparison
pub fn normalize_dcc_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Look up a DCC by name (case-insensitive)
pub fn get_dcc_config(name: &str) -> Result<&'static DccConfig> {
    let normalized = normalize_dcc_name(name);
    REGISTRY
        .iter()
        .find(|d| d.name == normalized)
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Unknown DCC '{}'. Valid DCCs: {}",
                name,
                all_dcc_names().join(", ")
            ))
        })
}

/// All supported DCC names, sorted
pub fn all_dcc_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = REGISTRY.iter().map(|d| d.name).collect();
    names.sort_unstable();
    names
}

/// All registry entries
pub fn all_dccs() -> &'static [DccConfig] {
    REGISTRY
}
