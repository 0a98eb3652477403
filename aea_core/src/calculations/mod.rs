//! # Solver Stages
//!
//! Each stage is a pure function of the structure document and its
//! upstream artifacts:
//!
//! ```text
//! CMC → DGE → DME → Trees
//!              ├──→ SPH → Fundacion ──┐
//!              └──→ AEE ──────────────┴→ Costeo
//! ```
//!
//! - [`cmc`] - Cable mechanics (change of state)
//! - [`dge`] - Structure geometry
//! - [`dme`] - Mechanical envelope: nodal loads and reactions
//! - [`trees`] - Load-tree drawings
//! - [`sph`] - Commercial pole selection
//! - [`foundation`] - Sulzberger monobloc foundation
//! - [`aee`] - Static stress analysis of the frame
//! - [`costing`] - Cost roll-up

pub mod aee;
pub mod cmc;
pub mod costing;
pub mod dge;
pub mod dme;
pub mod foundation;
pub mod sph;
pub mod trees;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use aee::{AeeParams, AeeResult};
pub use cmc::CmcResult;
pub use costing::{CostParams, CostResult};
pub use dge::Geometry;
pub use dme::DmeResult;
pub use foundation::{FoundationParams, FoundationResult};
pub use sph::{PoleParams, SphResult};
pub use trees::{TreeParams, TreesResult};

/// A node of the stage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Stage {
    Cmc,
    Dge,
    Dme,
    Trees,
    Sph,
    Foundation,
    Aee,
    Costing,
}

impl Stage {
    /// Every stage in topological order.
    pub const ALL: [Stage; 8] = [
        Stage::Cmc,
        Stage::Dge,
        Stage::Dme,
        Stage::Trees,
        Stage::Sph,
        Stage::Foundation,
        Stage::Aee,
        Stage::Costing,
    ];

    /// Identifier used in artifact file names
    pub fn code(&self) -> &'static str {
        match self {
            Stage::Cmc => "CMC",
            Stage::Dge => "DGE",
            Stage::Dme => "DME",
            Stage::Trees => "ArbolesCarga",
            Stage::Sph => "SPH",
            Stage::Foundation => "Fundacion",
            Stage::Costing => "Costeo",
            Stage::Aee => "AEE",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::Cmc => "Cable mechanics",
            Stage::Dge => "Structure geometry",
            Stage::Dme => "Mechanical envelope",
            Stage::Trees => "Load trees",
            Stage::Sph => "Pole selection",
            Stage::Foundation => "Foundation",
            Stage::Costing => "Costing",
            Stage::Aee => "Static stress analysis",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.code().eq_ignore_ascii_case(s.trim()))
    }

    /// Declared direct upstreams
    pub fn upstream(&self) -> &'static [Stage] {
        match self {
            Stage::Cmc => &[],
            Stage::Dge => &[Stage::Cmc],
            Stage::Dme => &[Stage::Dge, Stage::Cmc],
            Stage::Trees => &[Stage::Dme, Stage::Dge],
            Stage::Sph => &[Stage::Dme, Stage::Dge],
            Stage::Foundation => &[Stage::Sph, Stage::Dme],
            Stage::Costing => &[Stage::Dge, Stage::Sph, Stage::Foundation, Stage::Aee],
            Stage::Aee => &[Stage::Dme, Stage::Dge],
        }
    }

    /// `self` and every stage it transitively depends on, in topological order.
    pub fn closure(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| s == self || self.depends_on(*s))
            .collect()
    }

    /// Whether `other` is a transitive upstream of `self`.
    pub fn depends_on(&self, other: Stage) -> bool {
        self.upstream()
            .iter()
            .any(|u| *u == other || u.depends_on(other))
    }

    /// Document keys this stage reads. `group.key` names one entry of a
    /// top-level group.
    pub fn config_keys(&self) -> &'static [&'static str] {
        match self {
            Stage::Cmc => &[
                "cable_conductor_id",
                "cable_guardia_id",
                "cable_guardia2_id",
                "CANT_HG",
                "L_vano",
                "estados_climaticos",
                "restricciones_cables",
                "viento",
                "SALTO_PORCENTUAL",
                "PASO_AFINADO",
                "cables_personalizados",
            ],
            Stage::Dge => &[
                "TENSION",
                "TIPO_ESTRUCTURA",
                "DISPOSICION",
                "TERNA",
                "CANT_HG",
                "L_vano",
                "Lk",
                "estados_climaticos",
                "cable_conductor_id",
                "cable_guardia_id",
                "cable_guardia2_id",
                "nodos_editados",
                "Altura_MSNM",
                "altura_minima_cable",
                "HADD",
                "HADD_ENTRE_AMARRES",
                "HADD_HG",
                "LONGITUD_MENSULA_MINIMA",
                "LONGITUD_MENSULA_MAXIMA",
                "LMENHG_MIN",
                "AUTOAJUSTAR_LMENHG",
                "HG_CENTRADO",
                "ANG_APANTALLAMIENTO",
                "PCADENA",
                "D_CIMA_ESTIMADO",
                "CONICIDAD",
            ],
            Stage::Dme => &[
                "TIPO_ESTRUCTURA",
                "alpha",
                "L_vano",
                "Lk",
                "CANT_HG",
                "estados_climaticos",
                "viento",
                "PCADENA",
                "HIPOTESIS_ACTIVA",
                "hipotesis_personalizadas",
                "REDUCIR_A5_CADENA_LARGA",
                "SOBRECARGA",
                "cable_conductor_id",
                "cable_guardia_id",
                "cable_guardia2_id",
                "cables_personalizados",
            ],
            Stage::Trees => &["arboles"],
            Stage::Sph => &["postes", "costeo.A", "costeo.B", "costeo.C"],
            Stage::Foundation => &["fundacion"],
            Stage::Costing => &["costeo"],
            Stage::Aee => &["AnalisisEstaticoEsfuerzos"],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl TryFrom<String> for Stage {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Stage::parse(&s).ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

impl From<Stage> for String {
    fn from(s: Stage) -> Self {
        s.code().to_string()
    }
}
