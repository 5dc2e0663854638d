use std::path::{Path, PathBuf};

use wirecell_core::{Binding, GraphConfig, RuntimeSettings};
use wirecell_primitives::builtin_types;
use wirecell_runtime::{build_graph, Agent, BuildOptions};

/// Build every graph at `path` (a file or a directory) and report its wiring
/// or its configuration issues. Fails if any graph does not build.
pub fn run(settings: &RuntimeSettings, path: &Path) -> anyhow::Result<()> {
    let configs: Vec<(PathBuf, GraphConfig)> = if path.is_dir() {
        GraphConfig::load_directory(path)?
    } else {
        vec![(path.to_path_buf(), GraphConfig::load(path)?)]
    };
    if configs.is_empty() {
        anyhow::bail!("no graph files found in {}", path.display());
    }

    let types = builtin_types();
    let options = BuildOptions::from_settings(settings);
    let mut failed = 0;

    for (file, config) in &configs {
        println!("{} ({})", config.id, file.display());
        match build_graph(config, &types, &options) {
            Ok(agent) => print_wiring(&agent),
            Err(e) if !e.issues().is_empty() => {
                failed += 1;
                println!("  ✗ {} issue(s):", e.issues().len());
                for issue in e.issues() {
                    println!("    - {}", issue);
                }
            }
            Err(e) => {
                failed += 1;
                println!("  ✗ {}", e);
            }
        }
        println!();
    }

    if failed > 0 {
        anyhow::bail!("{} of {} graph(s) failed to build", failed, configs.len());
    }
    println!("✓ {} graph(s) OK", configs.len());
    Ok(())
}

fn print_wiring(agent: &Agent) {
    let bindings = agent.bindings();
    println!("  entry: {}", agent.entry_module_id());
    for consumer in bindings.consumers() {
        for (parameter, resolved) in bindings.for_consumer(consumer) {
            let providers = match &resolved.binding {
                Binding::Single(id) => id.clone(),
                Binding::List(ids) => format!("[{}]", ids.join(", ")),
                Binding::Absent => "(none)".to_string(),
            };
            println!(
                "  {}.{} <- {} ({}{})",
                consumer,
                parameter,
                providers,
                resolved.capability,
                if resolved.explicit { ", explicit" } else { "" }
            );
        }
    }
}
