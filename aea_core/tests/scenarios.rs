//! End-to-end runs of the stage chain through the public API.

use approx::assert_relative_eq;
use serde_json::{json, Value};
use tempfile::TempDir;

use aea_core::calculations::costing::CostParams;
use aea_core::calculations::dge::builder::{chain_node_name, segment_distance, swing_positions};
use aea_core::calculations::dge::{ConnectionKind, Geometry, NodeType};
use aea_core::calculations::dme::NodeRole;
use aea_core::catalog::hypotheses::HypothesisCatalog;
use aea_core::file_io::write_json_atomic;
use aea_core::fingerprint::{fingerprint_all, ExternalInputs};
use aea_core::loads::LoadOrigin;
use aea_core::{Pipeline, PipelineOptions, PipelineRun, Scope, Stage, StageOutcome, StructureConfig};

fn base_document() -> Value {
    json!({
        "TITULO": "S132",
        "TIPO_ESTRUCTURA": "Suspensión Recta",
        "TENSION": 132.0,
        "DISPOSICION": "vertical",
        "TERNA": "Simple",
        "CANT_HG": 1,
        "L_vano": 350.0,
        "Lk": 1.8,
        "alpha": 0.0,
        "cable_conductor_id": "Al/Ac 300/50",
        "cable_guardia_id": "Ac 50",
        "estados_climaticos": {
            "I":   { "temperatura": 35.0,  "viento": 0.0,   "hielo": 0.0,  "descripcion": "Tmax" },
            "II":  { "temperatura": -10.0, "viento": 0.0,   "hielo": 0.0,  "descripcion": "Tmin" },
            "III": { "temperatura": 10.0,  "viento": 140.0, "hielo": 0.0,  "descripcion": "Vmax" },
            "IV":  { "temperatura": -5.0,  "viento": 50.0,  "hielo": 0.01, "descripcion": "Vmed con hielo" },
            "V":   { "temperatura": 16.0,  "viento": 0.0,   "hielo": 0.0,  "descripcion": "TMA" }
        },
        "restricciones_cables": {
            "conductor": { "II": 0.4, "III": 0.4, "IV": 0.4, "V": 0.25 },
            "guardia":   { "II": 0.4, "III": 0.4, "IV": 0.4, "V": 0.25 }
        }
    })
}

fn config_from(doc: Value) -> StructureConfig {
    StructureConfig::from_value(doc).unwrap()
}

fn run(dir: &TempDir, config: &StructureConfig, targets: &[Stage]) -> PipelineRun {
    Pipeline::new(dir.path())
        .run(config, &Scope::standalone(&config.titulo), targets)
        .unwrap()
}

fn assert_all_succeeded(run: &PipelineRun) {
    let failures: Vec<_> = run.log.failures().map(|(s, e)| format!("{}: {}", s.code(), e)).collect();
    assert!(failures.is_empty(), "failed stages: {:?}", failures);
    assert!(run.log.is_success());
}

#[test]
fn suspension_132kv_full_chain() {
    let dir = TempDir::new().unwrap();
    let config = config_from(base_document());
    let run = run(&dir, &config, &[]);
    assert_all_succeeded(&run);
    assert_eq!(run.log.computed().len(), Stage::ALL.len());

    let cmc = run.outputs.cmc.as_ref().unwrap();
    assert_eq!(cmc.conductor.rows.len(), 5);
    assert_eq!(cmc.conductor.max_tension_row().unwrap().state_id, "III");

    let geometry = run.outputs.dge.as_ref().unwrap();
    let dims = &geometry.dimensions;
    assert_relative_eq!(
        dims.h1a,
        config.geometria.altura_minima_cable + config.lk + cmc.conductor.f_vert_max(),
        epsilon = 1e-9
    );
    assert!(geometry.nodes.values().all(|n| n.z >= 0.0));
    assert!(geometry.conductor_nodes().all(|n| n.z >= dims.h1a - 1e-9));

    let dme = run.outputs.dme.as_ref().unwrap();
    let a1 = dme.hypothesis("A1").unwrap();
    assert_relative_eq!(a1.reaccion.tiro_y, 0.0, epsilon = 1e-9);
    assert_eq!(a1.cargas.total_force(Some(LoadOrigin::Tension)), [0.0; 3]);
    let max = dme.reactions().map(|r| r.tiro).fold(0.0, f64::max);
    assert_eq!(dme.dominant().unwrap().reaccion.tiro, max);

    let costing = run.outputs.costing.as_ref().unwrap();
    let c = &costing.costos;
    assert_relative_eq!(
        c.total,
        c.postes + c.crucetas + c.mensulas + c.vinculos + c.hormigon + c.estructura + c.adicional,
        epsilon = 1e-6
    );
    assert!(c.total > 0.0);
}

#[test]
fn retention_220kv_double_circuit_broken_conductor() {
    let dir = TempDir::new().unwrap();
    let mut doc = base_document();
    doc["TITULO"] = "R220".into();
    doc["TENSION"] = 220.0.into();
    doc["TIPO_ESTRUCTURA"] = "Retención".into();
    doc["TERNA"] = "Doble".into();
    doc["alpha"] = 30.0.into();
    let config = config_from(doc);
    let run = run(&dir, &config, &[Stage::Dme]);
    assert_all_succeeded(&run);
    assert!(run.outputs.sph.is_none());

    let dme = run.outputs.dme.as_ref().unwrap();
    let c1 = dme.hypothesis("C1").unwrap();
    let a0 = dme.hypothesis("A0").unwrap();
    let weight = |h: &aea_core::calculations::dme::HypothesisLoads, node: &str| {
        h.cargas.node_force(node, Some(LoadOrigin::Weight))[2]
    };

    // One broken conductor plus the first shield wire go unilateral
    let unilateral: Vec<&String> = c1
        .roles
        .iter()
        .filter(|(_, r)| **r == NodeRole::Unilateral)
        .map(|(n, _)| n)
        .collect();
    assert_eq!(unilateral.len(), 2, "{:?}", c1.roles);
    assert!(unilateral.iter().any(|n| n.as_str() == "HG1"));
    let broken = unilateral.iter().find(|n| n.starts_with('C')).unwrap().as_str();
    let intact = c1
        .roles
        .iter()
        .find(|(n, r)| n.starts_with('C') && **r == NodeRole::Bilateral)
        .map(|(n, _)| n.as_str())
        .unwrap();

    // Cable weight halves on the broken side; the string weight does not
    let pcadena = config.geometria.pcadena;
    assert_relative_eq!(
        weight(c1, broken) + pcadena,
        0.5 * (weight(c1, intact) + pcadena),
        max_relative = 1e-12
    );
    assert_relative_eq!(weight(c1, "HG1"), 0.5 * weight(a0, "HG1"), max_relative = 1e-12);

    let b1 = dme.hypothesis("B1").unwrap();
    assert_relative_eq!(b1.reaccion.fz, 2.5 * a0.reaccion.fz, max_relative = 1e-12);
}

#[test]
fn terminal_66kv_two_shield_wires() {
    let dir = TempDir::new().unwrap();
    let mut doc = base_document();
    doc["TITULO"] = "T66".into();
    doc["TENSION"] = 66.0.into();
    doc["TIPO_ESTRUCTURA"] = "Terminal".into();
    doc["CANT_HG"] = 2.into();
    doc["HG_CENTRADO"] = false.into();
    let config = config_from(doc);
    let run = run(&dir, &config, &[Stage::Dme]);
    assert_all_succeeded(&run);

    let geometry = run.outputs.dge.as_ref().unwrap();
    assert_eq!(geometry.guard_nodes().count(), 2);

    let dme = run.outputs.dme.as_ref().unwrap();
    let c1 = dme.hypothesis("C1").unwrap();
    let a0 = dme.hypothesis("A0").unwrap();

    let unloaded: Vec<&str> = geometry
        .conductor_nodes()
        .filter(|n| c1.cargas.node_force(&n.name, None) == [0.0; 3])
        .map(|n| n.name.as_str())
        .collect();
    assert_eq!(unloaded.len(), 1);
    assert_eq!(c1.roles[unloaded[0]], NodeRole::Eliminated);

    for (node, role) in &c1.roles {
        if *role == NodeRole::Eliminated {
            continue;
        }
        assert_eq!(*role, NodeRole::Unilateral);
        let pull_c1 = c1.cargas.node_force(node, Some(LoadOrigin::Tension))[1];
        let pull_a0 = a0.cargas.node_force(node, Some(LoadOrigin::Tension))[1];
        assert!(pull_c1 >= pull_a0 - 1e-9, "{}: {} < {}", node, pull_c1, pull_a0);
    }
}

#[test]
fn long_string_reduces_a5() {
    let dir = TempDir::new().unwrap();
    let mut doc = base_document();
    doc["Lk"] = 3.0.into();
    let config = config_from(doc);
    let run = run(&dir, &config, &[Stage::Dme]);
    assert_all_succeeded(&run);

    let dme = run.outputs.dme.as_ref().unwrap();
    let a5 = dme.hypothesis("A5").unwrap();
    assert_eq!(dme.a5_aplicado, vec![a5.nombre.clone()]);

    let h_max = run.outputs.cmc.as_ref().unwrap().conductor.max_tension_row().unwrap().h_dan;
    let pull = a5.cargas.node_force("C1_L", Some(LoadOrigin::Tension))[1];
    assert_relative_eq!(pull, 2.0 * h_max * 0.075, max_relative = 1e-12);
}

#[test]
fn pole_cost_coefficients() {
    let params = CostParams::default();
    assert_relative_eq!(2.0 * params.pole_cost(18.0, 800.0), 5792.38, epsilon = 0.01);

    let dir = TempDir::new().unwrap();
    let config = config_from(base_document());
    let run = run(&dir, &config, &[Stage::Costing]);
    assert_all_succeeded(&run);
    let sph = run.outputs.sph.as_ref().unwrap();
    let costing = run.outputs.costing.as_ref().unwrap();
    assert_eq!(costing.cantidades.n_postes, sph.n_postes);
    assert_relative_eq!(
        costing.costos.postes,
        sph.n_postes as f64 * config.costeo.pole_cost(sph.longitud_m, sph.rc_dan),
        max_relative = 1e-12
    );
    assert_relative_eq!(costing.costos.postes, sph.costo_postes, max_relative = 1e-12);
    // The costing reports the governing member of the stress analysis
    assert_eq!(run.log.outcome(Stage::Aee), Some(&StageOutcome::Computed));
    let aee = run.outputs.aee.as_ref().unwrap();
    assert_eq!(costing.verificacion.miembro_critico, aee.miembro_critico);
    assert_eq!(costing.verificacion.hipotesis_critica, aee.hipotesis_critica);
    assert!(run.log.outcome(Stage::Trees).is_none());
}

#[test]
fn stress_analysis_change_reruns_costing() {
    let dir = TempDir::new().unwrap();
    run(&dir, &config_from(base_document()), &[]);

    let mut doc = base_document();
    doc["AnalisisEstaticoEsfuerzos"] = json!({ "E": 2.0e9 });
    let changed = run(&dir, &config_from(doc), &[]);
    assert_all_succeeded(&changed);
    assert_eq!(changed.log.computed(), vec![Stage::Aee, Stage::Costing]);
}

#[test]
fn span_change_invalidates_everything() {
    let dir = TempDir::new().unwrap();
    let config = config_from(base_document());
    run(&dir, &config, &[]);

    let mut doc = base_document();
    doc["L_vano"] = 300.0.into();
    let changed = run(&dir, &config_from(doc), &[]);
    assert_all_succeeded(&changed);
    assert_eq!(changed.log.computed(), Stage::ALL.to_vec());
    assert!(changed.log.cached().is_empty());
}

#[test]
fn cost_change_reruns_only_costing() {
    let dir = TempDir::new().unwrap();
    let config = config_from(base_document());
    let first = run(&dir, &config, &[]);

    let mut doc = base_document();
    doc["costeo"] = json!({ "precio_mensula": 250.0 });
    let changed = run(&dir, &config_from(doc), &[]);
    assert_all_succeeded(&changed);
    assert_eq!(changed.log.computed(), vec![Stage::Costing]);
    assert_eq!(changed.log.cached().len(), Stage::ALL.len() - 1);
    assert_eq!(changed.outputs.sph, first.outputs.sph);
    assert!(changed.outputs.costing.as_ref().unwrap().costos.mensulas > first.outputs.costing.as_ref().unwrap().costos.mensulas);
}

#[test]
fn pole_price_change_reprices_the_pole_search() {
    let dir = TempDir::new().unwrap();
    let config = config_from(base_document());
    let first = run(&dir, &config, &[]);

    let mut doc = base_document();
    doc["costeo"] = json!({ "A": 250.0 });
    let changed = run(&dir, &config_from(doc), &[]);
    assert_all_succeeded(&changed);
    assert_eq!(changed.log.computed(), vec![Stage::Sph, Stage::Foundation, Stage::Costing]);
    let sph = changed.outputs.sph.as_ref().unwrap();
    assert_relative_eq!(
        sph.costo_postes,
        f64::from(sph.n_postes) * (250.0 * sph.longitud_m + 1.544 * sph.rc_dan - 631.85),
        max_relative = 1e-12
    );
    assert!(sph.costo_postes > first.outputs.sph.as_ref().unwrap().costo_postes);
}

#[test]
fn reload_from_cache_matches_computed() {
    let dir = TempDir::new().unwrap();
    let config = config_from(base_document());
    let first = run(&dir, &config, &[]);
    let second = run(&dir, &config, &[]);
    assert_eq!(second.log.cached(), Stage::ALL.to_vec());
    assert_eq!(second.outputs, first.outputs);
}

#[test]
fn key_order_does_not_change_fingerprints() {
    let doc = base_document();
    let Value::Object(map) = &doc else { unreachable!() };
    let reversed = format!(
        "{{{}}}",
        map.iter()
            .rev()
            .map(|(k, v)| format!("{}:{}", serde_json::to_string(k).unwrap(), v))
            .collect::<Vec<_>>()
            .join(",")
    );
    let a = config_from(doc.clone());
    let b = StructureConfig::from_json_str(&reversed).unwrap();
    let scope = Scope::standalone("S132");
    let none = ExternalInputs::none();
    assert_eq!(
        fingerprint_all(&a, &scope, &none).unwrap(),
        fingerprint_all(&b, &scope, &none).unwrap()
    );

    let dir = TempDir::new().unwrap();
    run(&dir, &a, &[]);
    assert_eq!(run(&dir, &b, &[]).log.cached(), Stage::ALL.to_vec());
}

#[test]
fn failed_pole_selection_skips_dependants_only() {
    let dir = TempDir::new().unwrap();
    let mut doc = base_document();
    doc["postes"] = json!({ "forzar_longitud": 12.0 });
    let config = config_from(doc);
    let run = run(&dir, &config, &[]);
    assert!(!run.log.is_success());

    match run.log.outcome(Stage::Sph) {
        Some(StageOutcome::Failed(e)) => assert_eq!(e.error_code(), "NO_SOLUTION"),
        other => panic!("unexpected SPH outcome {:?}", other),
    }
    for stage in [Stage::Foundation, Stage::Costing] {
        assert_eq!(
            run.log.outcome(stage),
            Some(&StageOutcome::Skipped { upstream: Stage::Sph })
        );
    }
    for stage in [Stage::Cmc, Stage::Dge, Stage::Dme, Stage::Trees, Stage::Aee] {
        assert_eq!(run.log.outcome(stage), Some(&StageOutcome::Computed));
    }
    assert!(run.outputs.aee.is_some());
    assert!(run.outputs.costing.is_none());

    // Nothing was written for the failed stage
    let sph_files = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".calculoSPH."))
        .count();
    assert_eq!(sph_files, 0);
}

#[test]
fn edited_hypothesis_file_reruns_dme() {
    let cache = TempDir::new().unwrap();
    let folder = TempDir::new().unwrap();
    let mut doc = base_document();
    doc["HIPOTESIS_ACTIVA"] = "propia".into();
    let config = config_from(doc);
    let scope = Scope::standalone(&config.titulo);
    let path = folder.path().join("propia.hipotesis.json");
    let mut catalog = HypothesisCatalog::embedded().unwrap();
    write_json_atomic(&catalog, &path).unwrap();

    let pipeline = || {
        Pipeline::new(cache.path()).with_options(PipelineOptions {
            hypothesis_dir: Some(folder.path().to_path_buf()),
            ..PipelineOptions::default()
        })
    };
    let first = pipeline().run(&config, &scope, &[Stage::Dme]).unwrap();
    assert_all_succeeded(&first);
    let again = pipeline().run(&config, &scope, &[Stage::Dme]).unwrap();
    assert_eq!(again.log.cached(), vec![Stage::Cmc, Stage::Dge, Stage::Dme]);

    let a0 = catalog.typologies.get_mut(&config.tipo_estructura).unwrap().get_mut("A0").unwrap();
    assert!(a0.sobrecarga.is_none());
    let factor = a0.peso.factor;
    a0.peso.factor = 1.1 * factor;
    write_json_atomic(&catalog, &path).unwrap();

    let edited = pipeline().run(&config, &scope, &[Stage::Dme]).unwrap();
    assert_all_succeeded(&edited);
    assert_eq!(edited.log.cached(), vec![Stage::Cmc, Stage::Dge]);
    assert_eq!(edited.log.computed(), vec![Stage::Dme]);
    let weight = |r: &PipelineRun| {
        let a0 = r.outputs.dme.as_ref().unwrap().hypothesis("A0").unwrap();
        a0.cargas.total_force(Some(LoadOrigin::Weight))[2]
    };
    assert_relative_eq!(weight(&edited), 1.1 * weight(&first), max_relative = 1e-9);
}

/// Every arrangement the geometry builder supports, as document edits.
fn arrangements() -> Vec<(&'static str, &'static str, &'static str)> {
    vec![
        ("vertical", "Simple", "Suspensión Recta"),
        ("vertical", "Doble", "Suspensión Recta"),
        ("triangular", "Simple", "Suspensión Recta"),
        ("bandera", "Simple", "Suspensión Recta"),
        ("rect", "Doble", "Suspensión Recta"),
        ("horizontal", "Simple", "Suspensión Recta"),
        ("vertical", "Simple", "Retención"),
        ("rect", "Doble", "Retención"),
        ("horizontal", "Simple", "Terminal"),
    ]
}

fn geometry_of(disposicion: &str, terna: &str, tipo: &str, cant_hg: u8) -> (StructureConfig, Geometry) {
    let dir = TempDir::new().unwrap();
    let mut doc = base_document();
    doc["DISPOSICION"] = disposicion.into();
    doc["TERNA"] = terna.into();
    doc["TIPO_ESTRUCTURA"] = tipo.into();
    doc["CANT_HG"] = cant_hg.into();
    if cant_hg == 0 {
        doc.as_object_mut().unwrap().remove("cable_guardia_id");
    }
    let config = config_from(doc);
    let run = run(&dir, &config, &[Stage::Dge]);
    assert_all_succeeded(&run);
    let geometry = run.outputs.dge.unwrap();
    (config, geometry)
}

#[test]
fn swung_phases_clear_the_frame_in_every_arrangement() {
    for (disposicion, terna, tipo) in arrangements() {
        for cant_hg in [0, 1, 2] {
            let (config, g) = geometry_of(disposicion, terna, tipo, cant_hg);
            let d = &g.dimensions;
            let lk = if config.tipo_estructura.is_suspension() { config.lk } else { 0.0 };
            for c in g.conductor_nodes() {
                for p in swing_positions(c.position(), lk, d.theta_max) {
                    for m in g.members().filter(|m| !m.touches(&c.name)) {
                        let gap = segment_distance(p, g.node(&m.a).unwrap().position(), g.node(&m.b).unwrap().position());
                        assert!(
                            gap >= d.s_estructura - 1e-9,
                            "{} {} {} hg={}: {} swings {:.3} m from {}-{}",
                            disposicion, terna, tipo, cant_hg, c.name, gap, m.a, m.b
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn phases_sit_on_arms_above_the_ground_floor() {
    for (disposicion, terna, tipo) in arrangements() {
        for cant_hg in [0, 1, 2] {
            let (config, g) = geometry_of(disposicion, terna, tipo, cant_hg);
            let d = &g.dimensions;
            let floor = config.geometria.altura_minima_cable;
            assert!(g.nodes.values().all(|n| n.z >= 0.0));
            for c in g.conductor_nodes() {
                let label = format!("{} {} {} hg={} {}", disposicion, terna, tipo, cant_hg, c.name);
                // lowest point of the span under the hanging string
                assert!(c.z - config.lk - d.f_vert_max >= floor - 1e-9, "{}", label);
                assert!(
                    g.members()
                        .any(|m| m.touches(&c.name) && matches!(m.kind, ConnectionKind::Cross | ConnectionKind::Bracket)),
                    "{} is not on an arm",
                    label
                );
                for other in g.conductor_nodes().filter(|o| o.name != c.name && (o.z - c.z).abs() < 1e-6) {
                    assert!(c.distance_to(other) >= d.d_fases - 1e-9, "{} and {}", label, other.name);
                }
            }
        }
    }
}

#[test]
fn suspension_strings_are_chains() {
    for (disposicion, terna, tipo) in arrangements() {
        let (config, g) = geometry_of(disposicion, terna, tipo, 1);
        let strings: Vec<_> = g.connections.iter().filter(|c| c.kind == ConnectionKind::Chain).collect();
        if !config.tipo_estructura.is_suspension() {
            assert!(strings.is_empty(), "{} {} {}", disposicion, terna, tipo);
            assert_eq!(g.nodes_of(NodeType::Cadena).count(), 0);
            continue;
        }
        assert_eq!(strings.len(), g.conductor_nodes().count());
        for c in g.conductor_nodes() {
            let end = g.node(&chain_node_name(&c.name)).unwrap();
            assert_eq!(end.tipo, NodeType::Cadena);
            assert_relative_eq!(c.z - end.z, config.lk, epsilon = 1e-9);
            assert!(strings.iter().any(|s| s.joins(&c.name, &end.name)));
            assert!(g.members().all(|m| !m.touches(&end.name)));
        }
        assert!(g.guard_nodes().all(|hg| !g.nodes.contains_key(&chain_node_name(&hg.name))));
    }
}
