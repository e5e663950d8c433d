use std::process;
use std::sync::Arc;
use std::time::Duration;

use atlas_adapters::{builtin_registry, demo_snapshot_payload, demo_specs, LocalSnapshotStore, MEADOW_DEMO};
use atlas_core::{BuildScheduler, SchedulerOptions, SnapshotStore, StepGraph, StepId};
use atlas_persistence::{CatalogConfig, FileBuildRecord, LocalCatalog};

// Códigos de salida: 0 ok, 2 uso, 3 steps fallidos, 4 error de validación
// de grafo, 5 error fatal del scheduler.

fn load_graph(path: Option<&str>) -> Result<StepGraph, atlas_core::CoreEngineError> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .map_err(|e| atlas_core::CoreEngineError::Internal(format!("no se pudo leer '{p}': {e}")))?;
            StepGraph::from_json(&text)
        }
        // sin --graph se usa el grafo demo embebido
        None => StepGraph::load(&demo_specs()),
    }
}

fn main() {
    // Cargar .env si existe para obtener ATLAS_CATALOG_DIR / ATLAS_WORKERS
    let _ = dotenvy::dotenv();
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Uso: atlas-cli <run|validate|closure> [opciones]");
        process::exit(2);
    }
    if args[1] == "run" {
        // `atlas run [--graph <FILE>] [--filter <SUBSTR>] [--workers <N>]
        //            [--force] [--timeout-secs <N>] [--deadline-secs <N>]`
        let mut graph_path: Option<String> = None;
        let mut filter: Option<String> = None;
        let mut workers: Option<usize> = None;
        let mut force = false;
        let mut timeout_secs: Option<u64> = None;
        let mut deadline_secs: Option<u64> = None;
        let mut i = 2;
        while i < args.len() {
            match args[i].as_str() {
                "--graph" => {
                    i += 1;
                    if i < args.len() { graph_path = Some(args[i].clone()); }
                }
                "--filter" => {
                    i += 1;
                    if i < args.len() { filter = Some(args[i].clone()); }
                }
                "--workers" => {
                    i += 1;
                    if i < args.len() { workers = args[i].parse::<usize>().ok(); }
                }
                "--force" => force = true,
                "--timeout-secs" => {
                    i += 1;
                    if i < args.len() { timeout_secs = args[i].parse::<u64>().ok(); }
                }
                "--deadline-secs" => {
                    i += 1;
                    if i < args.len() { deadline_secs = args[i].parse::<u64>().ok(); }
                }
                _ => {}
            }
            i += 1;
        }

        let config = CatalogConfig::from_env();
        let graph = match load_graph(graph_path.as_deref()) {
            Ok(g) => g,
            Err(e) => { eprintln!("[atlas run] grafo inválido: {e}"); process::exit(4); }
        };
        let graph = match &filter {
            Some(f) => match graph.subset(f) {
                Ok(g) => g,
                Err(e) => { eprintln!("[atlas run] filtro sin resultados: {e}"); process::exit(4); }
            },
            None => graph,
        };
        let registry = match builtin_registry() {
            Ok(r) => r,
            Err(e) => { eprintln!("[atlas run] registry: {e}"); process::exit(5); }
        };

        let snapshots = LocalSnapshotStore::new(config.snapshots_dir());
        if graph_path.is_none() {
            // demo autocontenido: registrar el snapshot si todavía no existe
            let id: StepId = match MEADOW_DEMO.parse() {
                Ok(id) => id,
                Err(e) => { eprintln!("[atlas run] {e}"); process::exit(5); }
            };
            if snapshots.checksum(&id).is_err() {
                if let Err(e) = snapshots.register(&id, &demo_snapshot_payload()) {
                    eprintln!("[atlas run] no se pudo registrar el snapshot demo: {e}");
                    process::exit(5);
                }
            }
        }

        let mut options = SchedulerOptions::default();
        if let Some(w) = workers.or(config.workers) {
            options.workers = w;
        }
        options.force = force;
        options.step_timeout = timeout_secs.map(Duration::from_secs);
        options.deadline = deadline_secs.map(Duration::from_secs);

        let catalog = Arc::new(LocalCatalog::new(&config.root));
        let record = Arc::new(FileBuildRecord::new(config.record_path()));
        let sched = BuildScheduler::new(graph, registry, catalog, Arc::new(snapshots), record)
            .with_options(options);

        let runtime = match tokio::runtime::Runtime::new() {
            Ok(r) => r,
            Err(e) => { eprintln!("[atlas run] runtime: {e}"); process::exit(5); }
        };
        match runtime.block_on(sched.run()) {
            Ok(summary) => {
                print!("{}", summary.render());
                if summary.ok() { process::exit(0); } else { process::exit(3); }
            }
            Err(e) => { eprintln!("[atlas run] error fatal del scheduler: {e}"); process::exit(5); }
        }
    } else if args[1] == "validate" {
        // `atlas validate [--graph <FILE>]`: ciclos y referencias, sin ejecutar
        let mut graph_path: Option<String> = None;
        let mut i = 2;
        while i < args.len() {
            match args[i].as_str() {
                "--graph" => {
                    i += 1;
                    if i < args.len() { graph_path = Some(args[i].clone()); }
                }
                _ => {}
            }
            i += 1;
        }
        match load_graph(graph_path.as_deref()) {
            Ok(graph) => {
                println!("grafo válido: {} steps", graph.len());
                process::exit(0);
            }
            Err(e) => { eprintln!("[atlas validate] {e}"); process::exit(4); }
        }
    } else if args[1] == "closure" {
        // `atlas closure --step <URI> [--graph <FILE>]`
        let mut graph_path: Option<String> = None;
        let mut step_uri: Option<String> = None;
        let mut i = 2;
        while i < args.len() {
            match args[i].as_str() {
                "--graph" => {
                    i += 1;
                    if i < args.len() { graph_path = Some(args[i].clone()); }
                }
                "--step" => {
                    i += 1;
                    if i < args.len() { step_uri = Some(args[i].clone()); }
                }
                _ => {}
            }
            i += 1;
        }
        let step_uri = match step_uri {
            Some(s) => s,
            None => {
                eprintln!("Uso: atlas-cli closure --step <URI> [--graph <FILE>]");
                process::exit(2);
            }
        };
        let graph = match load_graph(graph_path.as_deref()) {
            Ok(g) => g,
            Err(e) => { eprintln!("[atlas closure] grafo inválido: {e}"); process::exit(4); }
        };
        let step: StepId = match step_uri.parse() {
            Ok(s) => s,
            Err(e) => { eprintln!("[atlas closure] {e}"); process::exit(2); }
        };
        match graph.closure(&step) {
            Ok(ids) => {
                for id in ids {
                    println!("{}", id.uri());
                }
                process::exit(0);
            }
            Err(e) => { eprintln!("[atlas closure] {e}"); process::exit(4); }
        }
    } else {
        eprintln!("atlas-cli: use 'run', 'validate' o 'closure'");
        process::exit(2);
    }
}
