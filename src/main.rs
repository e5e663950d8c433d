//! Demo ejecutable del pipeline: corre el grafo meadow -> garden dos veces
//! (la segunda pasada debe salir completamente fresca) y muestra la
//! procedencia del ratio derivado, reconstruida desde el catálogo.

use atlas_core::CatalogStore;
use atlasflow_rust::demo;

fn main() {
    let (sched, catalog) = match demo::in_memory_scheduler() {
        Ok(x) => x,
        Err(e) => {
            eprintln!("[demo] no se pudo armar el pipeline: {e}");
            std::process::exit(5);
        }
    };
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[demo] runtime: {e}");
            std::process::exit(5);
        }
    };

    println!("=== primera corrida ===");
    match runtime.block_on(sched.run()) {
        Ok(summary) => print!("{}", summary.render()),
        Err(e) => {
            eprintln!("[demo] scheduler: {e}");
            std::process::exit(5);
        }
    }

    let garden_id = match atlas_adapters::GARDEN_DEMO.parse::<atlas_core::StepId>() {
        Ok(id) => id,
        Err(e) => {
            eprintln!("[demo] {e}");
            std::process::exit(5);
        }
    };
    let garden = match catalog.load(&garden_id) {
        Ok(ds) => ds,
        Err(e) => {
            eprintln!("[demo] no se pudo leer el dataset publicado: {e}");
            std::process::exit(5);
        }
    };
    if let Ok(table) = garden.table("demo") {
        if let Ok(ratio) = table.column("ratio") {
            println!("ratio[0] = {}", ratio.values[0]);
            println!("unidad: {}", ratio.meta.unit.as_deref().unwrap_or("(sin unidad)"));
            println!("origins del ratio:");
            for origin in &ratio.meta.origins {
                println!("  - {} ({})", origin.title, origin.producer);
            }
            println!("processing log:");
            for entry in &ratio.meta.processing_log {
                println!("  - {} {:?}", entry.operation, entry.columns);
            }
        }
    }

    println!("=== segunda corrida (debe salir fresca) ===");
    match runtime.block_on(sched.run()) {
        Ok(summary) => {
            print!("{}", summary.render());
            if !summary.executed.is_empty() {
                eprintln!("[demo] se esperaba una segunda corrida sin ejecuciones");
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("[demo] scheduler: {e}");
            std::process::exit(5);
        }
    }
}
