//! # aea
//!
//! Command-line front end for the structure pipeline.
//!
//! ```text
//! aea run S132.json --cache cache           # full pipeline
//! aea run S132.json --stage SPH --stage AEE # just what those need
//! aea family linea.familia.json --cache cache
//! aea fingerprint S132.json
//! aea cables
//! ```
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG` to change the
//! level (default `info`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use aea_core::catalog::{default_catalog, CableCatalog};
use aea_core::family::{load_family, FamilyRunner};
use aea_core::fingerprint::{fingerprint_all, ExternalInputs};
use aea_core::pipeline::{Pipeline, PipelineOptions, PipelineRun, StageOutcome};
use aea_core::{CalcError, CalcResult, Scope, Stage, StructureConfig};

#[derive(Parser, Debug)]
#[command(name = "aea", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline for one structure document
    Run {
        /// Structure document (JSON)
        config: PathBuf,
        /// Cache directory
        #[arg(long, default_value = "cache")]
        cache: PathBuf,
        /// Stage to bring up to date (repeatable); every stage when omitted
        #[arg(long = "stage", value_parser = parse_stage)]
        stages: Vec<Stage>,
        /// Directory holding HIPOTESIS_ACTIVA catalogs
        #[arg(long)]
        hipotesis_dir: Option<PathBuf>,
        /// Cable catalog replacing the embedded one
        #[arg(long)]
        cables: Option<PathBuf>,
        /// Fail instead of recomputing stale upstream stages
        #[arg(long)]
        no_auto: bool,
        /// Print the run log and outputs as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run every member of a family document
    Family {
        /// Family document (`*.familia.json`)
        family: PathBuf,
        #[arg(long, default_value = "cache")]
        cache: PathBuf,
        #[arg(long)]
        hipotesis_dir: Option<PathBuf>,
        /// Run on a worker thread and wait for it
        #[arg(long)]
        background: bool,
    },
    /// Print the fingerprint of every stage
    Fingerprint {
        config: PathBuf,
        /// Family and member names, for a family-scoped fingerprint
        #[arg(long, requires = "member")]
        family: Option<String>,
        #[arg(long, requires = "family")]
        member: Option<String>,
    },
    /// List the cable catalog
    Cables {
        /// Catalog document; the embedded catalog when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    Stage::parse(s).ok_or_else(|| {
        let known: Vec<&str> = Stage::ALL.iter().map(|s| s.code()).collect();
        format!("unknown stage '{}' (expected one of {})", s, known.join(", "))
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match dispatch(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(code = e.error_code(), "{}", e);
            ExitCode::from(2)
        }
    }
}

/// `Ok(false)` when some stage failed.
fn dispatch(command: Commands) -> CalcResult<bool> {
    match command {
        Commands::Run {
            config,
            cache,
            stages,
            hipotesis_dir,
            cables,
            no_auto,
            json,
        } => {
            let structure = StructureConfig::from_path(&config)?;
            let options = PipelineOptions {
                auto_recompute: !no_auto,
                hypothesis_dir: hipotesis_dir.or_else(|| config.parent().map(Path::to_path_buf)),
                cables: cables.as_deref().map(CableCatalog::from_path).transpose()?,
                ..PipelineOptions::default()
            };
            let run = Pipeline::new(cache)
                .with_options(options)
                .run(&structure, &Scope::standalone(&structure.titulo), &stages)?;
            if json {
                print_json(&serde_json::json!({ "log": run.log, "resumen": summary(&run) }))?;
            } else {
                print_run(&run);
            }
            Ok(run.log.is_success())
        }
        Commands::Family {
            family,
            cache,
            hipotesis_dir,
            background,
        } => {
            let doc = load_family(&family)?;
            let options = PipelineOptions {
                hypothesis_dir: hipotesis_dir.or_else(|| family.parent().map(Path::to_path_buf)),
                ..PipelineOptions::default()
            };
            let runner = FamilyRunner::new(Pipeline::new(cache).with_options(options));
            let report = if background {
                runner
                    .spawn(doc)
                    .join()
                    .map_err(|_| CalcError::internal("family worker panicked"))??
            } else {
                runner.run(&doc)?
            };
            for m in &report.miembros {
                let status = if m.succeeded() { "ok" } else { "FALLA" };
                let cost = m.costo.as_ref().map(|c| format!("{:.2} UM", c.total)).unwrap_or_else(|| "-".into());
                println!("{:<20} {:<6} {}", m.miembro, status, cost);
                if let Some(e) = &m.error {
                    println!("    {}", e);
                }
            }
            println!("Total familia: {:.2} UM", report.costo_total);
            Ok(report.completo)
        }
        Commands::Fingerprint { config, family, member } => {
            let structure = StructureConfig::from_path(&config)?;
            let scope = match (family, member) {
                (Some(f), Some(m)) => Scope::member(f, m, &structure.titulo),
                _ => Scope::standalone(&structure.titulo),
            };
            let inputs = ExternalInputs::resolve(&structure, config.parent())?;
            for (stage, fp) in fingerprint_all(&structure, &scope, &inputs)? {
                println!("{:<14} {}", stage.code(), fp);
            }
            Ok(true)
        }
        Commands::Cables { file } => {
            let owned;
            let catalog = match file {
                Some(path) => {
                    owned = CableCatalog::from_path(&path)?;
                    &owned
                }
                None => default_catalog(),
            };
            for name in catalog.names() {
                let cable = catalog.get(name)?;
                println!(
                    "{:<20} d = {:>6.2} mm  p = {:.4} daN/m  UTS = {:.0} daN",
                    name, cable.diametro_mm, cable.peso_dan_m, cable.carga_rotura_dan
                );
            }
            Ok(true)
        }
    }
}

fn summary(run: &PipelineRun) -> serde_json::Value {
    let o = &run.outputs;
    serde_json::json!({
        "altura_total": o.dge.as_ref().map(|g| g.dimensions.altura_total),
        "hipotesis_dimensionante": o.dme.as_ref().and_then(|d| d.dominant().ok()).map(|h| h.nombre.clone()),
        "poste": o.sph.as_ref().map(|s| format!("{}x {:.1} m / {:.0} daN", s.n_postes, s.longitud_m, s.rc_dan)),
        "fundacion_m3": o.foundation.as_ref().map(|f| f.total_volume()),
        "costo_total": o.costing.as_ref().map(|c| c.costos.total),
        "mf_max": o.aee.as_ref().map(|a| a.mf_max),
    })
}

fn print_run(run: &PipelineRun) {
    println!("Run {} ({})", run.log.id, run.log.scope);
    for entry in &run.log.entries {
        let outcome = match &entry.outcome {
            StageOutcome::Cached => "vigente".to_string(),
            StageOutcome::Computed => format!("calculado ({} ms)", entry.elapsed_ms),
            StageOutcome::Failed(e) => format!("ERROR {}: {}", e.error_code(), e),
            StageOutcome::Skipped { upstream } => format!("omitido (falla {})", upstream),
            StageOutcome::Cancelled => "cancelado".to_string(),
        };
        println!("  {:<14} {}", entry.stage.code(), outcome);
    }
    if let serde_json::Value::Object(map) = summary(run) {
        for (k, v) in map.iter().filter(|(_, v)| !v.is_null()) {
            println!("  {:<24} {}", k, v);
        }
    }
}

fn print_json(value: &serde_json::Value) -> CalcResult<()> {
    println!("{}", serde_json::to_string_pretty(value).map_err(CalcError::serialization)?);
    Ok(())
}
