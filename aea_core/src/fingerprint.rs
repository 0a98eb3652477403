//! Stage fingerprints
//!
//! A stage's fingerprint is the SHA-256 of:
//!
//! 1. the stage code,
//! 2. the scope prefix (`{title}` or `{family}:{member}:{title}`),
//! 3. the canonical JSON of the document keys the stage reads,
//! 4. the canonical JSON of inputs resolved outside the document (the
//!    hypothesis set DME loads from a catalog file),
//! 5. the fingerprints of its direct upstreams.
//!
//! Canonical JSON sorts object keys and renders every number as an `f64`
//! in `{:.9e}`, so `350`, `350.0` and `3.5e2` hash alike and key order in
//! the source document never matters.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::calculations::{dme, Stage};
use crate::config::StructureConfig;
use crate::errors::{CalcError, CalcResult};

/// Cache scope of a structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub title: String,
    /// `(family, member)` when run inside a family
    pub family: Option<(String, String)>,
}

impl Scope {
    pub fn standalone(title: impl Into<String>) -> Self {
        Scope {
            title: title.into(),
            family: None,
        }
    }

    pub fn member(family: impl Into<String>, member: impl Into<String>, title: impl Into<String>) -> Self {
        Scope {
            title: title.into(),
            family: Some((family.into(), member.into())),
        }
    }

    pub fn prefix(&self) -> String {
        match &self.family {
            Some((family, member)) => format!("{}:{}:{}", family, member, self.title),
            None => self.title.clone(),
        }
    }
}

/// Render `value` canonically.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{:.9e}", n.as_f64().unwrap_or(0.0));
        }
        Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
    }
}

/// The part of the document `stage` reads.
pub fn config_subset(config: &StructureConfig, stage: Stage) -> CalcResult<Value> {
    let doc = serde_json::to_value(config).map_err(CalcError::serialization)?;
    let Value::Object(map) = doc else {
        return Err(CalcError::internal("structure document is not an object"));
    };
    let subset = stage
        .config_keys()
        .iter()
        .filter_map(|k| {
            let value = match k.split_once('.') {
                Some((group, key)) => map.get(group).and_then(|g| g.get(key)),
                None => map.get(*k),
            };
            value.map(|v| (k.to_string(), v.clone()))
        })
        .collect();
    Ok(Value::Object(subset))
}

/// Inputs a stage reads from outside the structure document, kept as
/// canonical JSON per stage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExternalInputs {
    by_stage: BTreeMap<Stage, String>,
}

impl ExternalInputs {
    pub fn none() -> Self {
        ExternalInputs::default()
    }

    /// Resolve what the stages of `config` read from disk or the embedded
    /// plantillas. A catalog that does not resolve adds nothing; DME
    /// reports the error when it runs.
    pub fn resolve(config: &StructureConfig, hypothesis_dir: Option<&Path>) -> CalcResult<Self> {
        let mut inputs = ExternalInputs::none();
        if let Ok(catalog) = dme::hypothesis_catalog(config, hypothesis_dir) {
            if let Ok(set) = catalog.for_typology(config.tipo_estructura) {
                let value = serde_json::to_value(set).map_err(CalcError::serialization)?;
                inputs = inputs.with(Stage::Dme, &value);
            }
        }
        Ok(inputs)
    }

    pub fn with(mut self, stage: Stage, value: &Value) -> Self {
        self.by_stage.insert(stage, canonical_json(value));
        self
    }

    pub fn get(&self, stage: Stage) -> Option<&str> {
        self.by_stage.get(&stage).map(String::as_str)
    }
}

/// Fingerprint of one stage given its upstream fingerprints.
pub fn stage_fingerprint(
    config: &StructureConfig,
    stage: Stage,
    scope: &Scope,
    inputs: &ExternalInputs,
    upstream: &BTreeMap<Stage, String>,
) -> CalcResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(stage.code().as_bytes());
    hasher.update([0u8]);
    hasher.update(scope.prefix().as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(&config_subset(config, stage)?).as_bytes());
    if let Some(external) = inputs.get(stage) {
        hasher.update([1u8]);
        hasher.update(external.as_bytes());
    }
    for up in stage.upstream() {
        let fp = upstream
            .get(up)
            .ok_or_else(|| CalcError::internal(format!("fingerprint of {} computed before {}", stage, up)))?;
        hasher.update([0u8]);
        hasher.update(fp.as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Fingerprints of every stage, in topological order.
pub fn fingerprint_all(
    config: &StructureConfig,
    scope: &Scope,
    inputs: &ExternalInputs,
) -> CalcResult<BTreeMap<Stage, String>> {
    let mut out = BTreeMap::new();
    for stage in Stage::ALL {
        let fp = stage_fingerprint(config, stage, scope, inputs, &out)?;
        out.insert(stage, fp);
    }
    Ok(out)
}

/// Fingerprint of a single stage.
pub fn fingerprint(config: &StructureConfig, stage: Stage, scope: &Scope, inputs: &ExternalInputs) -> CalcResult<String> {
    let mut out = BTreeMap::new();
    for s in stage.closure() {
        let fp = stage_fingerprint(config, s, scope, inputs, &out)?;
        out.insert(s, fp);
    }
    out.remove(&stage)
        .ok_or_else(|| CalcError::internal(format!("no fingerprint for {}", stage)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{sample, sample_json};

    #[test]
    fn test_canonical_numbers_and_keys() {
        let a: Value = serde_json::from_str(r#"{"b": 350, "a": [1.0, "x"]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": [1, "x"], "b": 3.5e2}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":[1.000000000e0,"x"],"b":3.500000000e2}"#);
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let none = ExternalInputs::none();
        let v = sample_json();
        let Value::Object(map) = v.clone() else { unreachable!() };
        let reversed: serde_json::Map<String, Value> = map.into_iter().rev().collect();
        let a = StructureConfig::from_value(v).unwrap();
        let b = StructureConfig::from_value(Value::Object(reversed)).unwrap();
        let scope = Scope::standalone("S132");
        assert_eq!(fingerprint_all(&a, &scope, &none).unwrap(), fingerprint_all(&b, &scope, &none).unwrap());
    }

    #[test]
    fn test_roundtrip_keeps_fingerprint() {
        let none = ExternalInputs::none();
        let config = sample();
        let json = serde_json::to_string(&config).unwrap();
        let back = StructureConfig::from_json_str(&json).unwrap();
        let scope = Scope::standalone(&config.titulo);
        assert_eq!(fingerprint_all(&config, &scope, &none).unwrap(), fingerprint_all(&back, &scope, &none).unwrap());
    }

    #[test]
    fn test_span_change_invalidates_everything() {
        let none = ExternalInputs::none();
        let a = sample();
        let mut b = sample();
        b.l_vano = 360.0;
        let scope = Scope::standalone("S132");
        let fa = fingerprint_all(&a, &scope, &none).unwrap();
        let fb = fingerprint_all(&b, &scope, &none).unwrap();
        for stage in Stage::ALL {
            assert_ne!(fa[&stage], fb[&stage], "{} should change", stage);
        }
    }

    #[test]
    fn test_cost_change_touches_costing_only() {
        let none = ExternalInputs::none();
        let a = sample();
        let mut b = sample();
        b.costeo.precio_cruceta += 10.0;
        let scope = Scope::standalone("S132");
        let fa = fingerprint_all(&a, &scope, &none).unwrap();
        let fb = fingerprint_all(&b, &scope, &none).unwrap();
        for stage in Stage::ALL {
            assert_eq!(fa[&stage] != fb[&stage], stage == Stage::Costing, "{}", stage);
        }
    }

    #[test]
    fn test_pole_price_touches_pole_selection() {
        let none = ExternalInputs::none();
        let a = sample();
        let mut b = sample();
        b.costeo.a += 10.0;
        let scope = Scope::standalone("S132");
        let fa = fingerprint_all(&a, &scope, &none).unwrap();
        let fb = fingerprint_all(&b, &scope, &none).unwrap();
        for stage in Stage::ALL {
            let repriced = stage == Stage::Sph || stage.depends_on(Stage::Sph);
            assert_eq!(fa[&stage] != fb[&stage], repriced, "{}", stage);
        }
        let subset = config_subset(&b, Stage::Sph).unwrap();
        assert!(subset.get("costeo.A").is_some());
        assert!(subset.get("costeo").is_none());
    }

    #[test]
    fn test_scope_separates_members() {
        let none = ExternalInputs::none();
        let config = sample();
        let a = fingerprint(&config, Stage::Cmc, &Scope::member("F1", "E1", "S132"), &none).unwrap();
        let b = fingerprint(&config, Stage::Cmc, &Scope::member("F1", "E2", "S132"), &none).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_single_stage_matches_all() {
        let none = ExternalInputs::none();
        let config = sample();
        let scope = Scope::standalone("S132");
        let all = fingerprint_all(&config, &scope, &none).unwrap();
        assert_eq!(fingerprint(&config, Stage::Aee, &scope, &none).unwrap(), all[&Stage::Aee]);
    }

    #[test]
    fn test_external_inputs_only_touch_their_stage() {
        let config = sample();
        let scope = Scope::standalone("S132");
        let plain = fingerprint_all(&config, &scope, &ExternalInputs::none()).unwrap();
        let resolved = ExternalInputs::resolve(&config, None).unwrap();
        assert!(resolved.get(Stage::Dme).is_some());
        let with = fingerprint_all(&config, &scope, &resolved).unwrap();
        for stage in Stage::ALL {
            let downstream = stage == Stage::Dme || stage.depends_on(Stage::Dme);
            assert_eq!(plain[&stage] != with[&stage], downstream, "{}", stage);
        }
    }

    #[test]
    fn test_edited_catalog_changes_dme() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = sample();
        config.hipotesis_activa = Some("propia".into());
        let path = dir.path().join("propia.hipotesis.json");
        let scope = Scope::standalone("S132");
        let mut catalog = dme::hypothesis_catalog(&sample(), None).unwrap();
        crate::file_io::write_json_atomic(&catalog, &path).unwrap();
        let before = ExternalInputs::resolve(&config, Some(dir.path())).unwrap();

        let set = catalog.typologies.get_mut(&config.tipo_estructura).unwrap();
        set.get_mut("A0").unwrap().peso.factor = 1.1;
        crate::file_io::write_json_atomic(&catalog, &path).unwrap();
        let after = ExternalInputs::resolve(&config, Some(dir.path())).unwrap();

        let fa = fingerprint_all(&config, &scope, &before).unwrap();
        let fb = fingerprint_all(&config, &scope, &after).unwrap();
        assert_eq!(fa[&Stage::Dge], fb[&Stage::Dge]);
        assert_ne!(fa[&Stage::Dme], fb[&Stage::Dme]);

        // a catalog that cannot be found leaves DME to report it
        let missing = ExternalInputs::resolve(&config, None).unwrap();
        assert!(missing.get(Stage::Dme).is_none());
    }
}
