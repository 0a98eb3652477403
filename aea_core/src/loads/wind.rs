//! Wind-load codebook.
//!
//! Wind loads are tabulated once per structure and looked up by a typed
//! code. The string form (`Vc_max_t`, `Vg1_med_l`, `Vcad_max_o`,
//! `Vest_max_t`) is what appears in artifacts.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::calculations::cmc::{CableRole, CmcResult};
use crate::calculations::dge::Geometry;
use crate::catalog::{WindDirection, WindLevel};
use crate::config::StructureConfig;
use crate::errors::{CalcError, CalcResult};

/// What the wind acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WindTarget {
    Conductor,
    /// Guard wire 1 or 2
    Guard(u8),
    /// Insulator string
    Chain,
    /// Pole, applied at `V`
    Structure,
}

impl WindTarget {
    fn code(&self) -> String {
        match self {
            WindTarget::Conductor => "c".to_string(),
            WindTarget::Guard(n) => format!("g{}", n),
            WindTarget::Chain => "cad".to_string(),
            WindTarget::Structure => "est".to_string(),
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "c" => Some(WindTarget::Conductor),
            "cad" => Some(WindTarget::Chain),
            "est" => Some(WindTarget::Structure),
            _ => s
                .strip_prefix('g')
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| *n >= 1)
                .map(WindTarget::Guard),
        }
    }
}

/// Typed key of the wind table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WindCode {
    pub target: WindTarget,
    pub level: WindLevel,
    pub direction: WindDirection,
}

impl WindCode {
    pub fn new(target: WindTarget, level: WindLevel, direction: WindDirection) -> Self {
        WindCode {
            target,
            level,
            direction,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix('V')?;
        let mut parts = rest.split('_');
        let target = WindTarget::parse(parts.next()?)?;
        let level = match parts.next()? {
            "max" => WindLevel::Max,
            "med" => WindLevel::Mean,
            _ => return None,
        };
        let direction = match parts.next()? {
            "t" => WindDirection::Transversal,
            "l" => WindDirection::Longitudinal,
            "o" => WindDirection::Oblicua,
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(WindCode::new(target, level, direction))
    }
}

impl fmt::Display for WindCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}_{}_{}", self.target.code(), self.level.code(), self.direction.code())
    }
}

impl TryFrom<String> for WindCode {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        WindCode::parse(&s).ok_or_else(|| format!("invalid wind code '{}'", s))
    }
}

impl From<WindCode> for String {
    fn from(code: WindCode) -> Self {
        code.to_string()
    }
}

/// Wind forces `[Fx, Fy, Fz]` per code, for full-span loading.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindTable {
    pub entries: BTreeMap<String, [f64; 3]>,
}

impl WindTable {
    pub fn get(&self, code: WindCode) -> CalcResult<[f64; 3]> {
        let key = code.to_string();
        self.entries
            .get(&key)
            .copied()
            .ok_or_else(|| CalcError::incomplete_load_catalog(key))
    }

    fn insert(&mut self, code: WindCode, force: [f64; 3]) {
        self.entries.insert(code.to_string(), force);
    }

    /// Tabulate every code the structure can use. Levels whose state
    /// cannot be resolved are left out, so a lookup reports them.
    pub fn build(config: &StructureConfig, cmc: &CmcResult, geometry: &Geometry) -> CalcResult<Self> {
        let mut table = WindTable::default();
        let half_alpha = (config.alpha / 2.0).to_radians();
        let span = config.l_vano;
        let wind = &config.viento;

        for level in WindLevel::ALL {
            let Ok(state) = level.selector().resolve(&config.estados_climaticos, None) else {
                continue;
            };
            let v = state.wind_ms();

            let mut cables = vec![(WindTarget::Conductor, CableRole::Conductor)];
            for i in 0..cmc.guardias.len() {
                cables.push((WindTarget::Guard(i as u8 + 1), CableRole::guard(i + 1)));
            }
            for (target, role) in cables {
                let w_h = cmc.cable(role)?.row(&state.id)?.w_used.horizontal;
                let trans = w_h * span * half_alpha.cos();
                table.insert(WindCode::new(target, level, WindDirection::Transversal), [trans, 0.0, 0.0]);
                table.insert(
                    WindCode::new(target, level, WindDirection::Longitudinal),
                    [0.0, w_h * span * half_alpha.sin(), 0.0],
                );
                table.insert(WindCode::new(target, level, WindDirection::Oblicua), [trans / 2.0, 0.0, 0.0]);
            }

            let chain = wind.pressure(v, 1.0, wind.cf_cadena) * wind.d_cadena * config.lk;
            let pole = wind.pressure(v, 1.0, wind.cf_poste) * geometry.dimensions.area_poste_m2;
            for (target, p) in [(WindTarget::Chain, chain), (WindTarget::Structure, pole)] {
                let diag = p * std::f64::consts::FRAC_1_SQRT_2;
                table.insert(WindCode::new(target, level, WindDirection::Transversal), [p, 0.0, 0.0]);
                table.insert(WindCode::new(target, level, WindDirection::Longitudinal), [0.0, p, 0.0]);
                table.insert(WindCode::new(target, level, WindDirection::Oblicua), [diag, diag, 0.0]);
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculations::dge::tests::sample_geometry;
    use approx::assert_relative_eq;

    #[test]
    fn test_code_strings() {
        let c = WindCode::new(WindTarget::Conductor, WindLevel::Max, WindDirection::Transversal);
        assert_eq!(c.to_string(), "Vc_max_t");
        let g = WindCode::new(WindTarget::Guard(1), WindLevel::Mean, WindDirection::Longitudinal);
        assert_eq!(g.to_string(), "Vg1_med_l");
        assert_eq!(WindCode::parse("Vcad_max_o").unwrap().target, WindTarget::Chain);
        assert_eq!(WindCode::parse("Vest_max_t").unwrap().target, WindTarget::Structure);
        assert!(WindCode::parse("Vx_max_t").is_none());
        assert!(WindCode::parse("Vc_max_t_2").is_none());
        assert!(WindCode::parse("Vg0_max_t").is_none());
    }

    #[test]
    fn test_sample_table() {
        let (config, cmc, geometry) = sample_geometry();
        let table = WindTable::build(&config, &cmc, &geometry).unwrap();
        let t = table
            .get(WindCode::new(WindTarget::Conductor, WindLevel::Max, WindDirection::Transversal))
            .unwrap();
        let w_h = cmc.conductor.row("III").unwrap().w_used.horizontal;
        assert_relative_eq!(t[0], w_h * 350.0, epsilon = 1e-9);
        // alpha = 0: no longitudinal component on cables
        let l = table
            .get(WindCode::new(WindTarget::Guard(1), WindLevel::Max, WindDirection::Longitudinal))
            .unwrap();
        assert_eq!(l[1], 0.0);
        let o = table
            .get(WindCode::new(WindTarget::Structure, WindLevel::Mean, WindDirection::Oblicua))
            .unwrap();
        assert_relative_eq!(o[0], o[1]);
    }

    #[test]
    fn test_absent_code_is_incomplete() {
        let (config, cmc, geometry) = sample_geometry();
        let table = WindTable::build(&config, &cmc, &geometry).unwrap();
        let err = table
            .get(WindCode::new(WindTarget::Guard(2), WindLevel::Max, WindDirection::Transversal))
            .unwrap_err();
        assert_eq!(err.error_code(), "INCOMPLETE_LOAD_CATALOG");
    }
}
