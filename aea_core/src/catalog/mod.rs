//! # Reference Catalogs
//!
//! Read-mostly reference data shared by every structure: cables, load
//! hypotheses and commercial poles. Defaults are JSON documents embedded
//! in the library.

pub mod cables;
pub mod hypotheses;
pub mod poles;

use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;

use crate::errors::{CalcError, CalcResult};

pub use cables::{default_catalog, Cable, CableCatalog, CableCore};
pub use hypotheses::{
    HypothesisCatalog, HypothesisSet, LoadHypothesis, TensionPattern, TensionSpec, WeightSpec, WindDirection,
    WindLevel, WindSpec,
};
pub use poles::PoleCatalog;

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Assets;

/// Parse one of the embedded JSON documents.
pub(crate) fn load_embedded<T: DeserializeOwned>(name: &str) -> CalcResult<T> {
    let file = Assets::get(name).ok_or_else(|| CalcError::missing_reference("embedded asset", name))?;
    serde_json::from_slice(&file.data).map_err(|e| CalcError::SerializationError {
        reason: format!("Invalid JSON in embedded {}: {}", name, e),
    })
}
