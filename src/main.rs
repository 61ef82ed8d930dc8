//! relay-emu: instruction-level emulator for the Relay tensor accelerator

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use relay_emu::config::Config;
use relay_emu::ila::{Design, UnitId};
use relay_emu::relay::RelayAccelerator;
use relay_emu::testing::ManifestRunner;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut describe = false;
    let mut fail_fast = false;
    let mut dump_state = false;
    let mut paths = Vec::new();

    for arg in &args[1..] {
        match arg.as_str() {
            "--sample-config" => {
                print!("{}", Config::sample_config());
                return Ok(());
            }
            "--describe" => describe = true,
            "--fail-fast" => fail_fast = true,
            "--dump-state" => dump_state = true,
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            other if other.starts_with('-') => bail!("unknown option '{}'", other),
            other => paths.push(PathBuf::from(other)),
        }
    }

    if describe {
        let acc = RelayAccelerator::with_defaults()?;
        print_unit_tree(acc.engine().design(), UnitId::ROOT, 0);
        if paths.is_empty() {
            return Ok(());
        }
    }

    if paths.is_empty() {
        print_usage();
        return Ok(());
    }

    let manifests = collect_manifests(&paths)?;
    let runner = ManifestRunner::new().with_dump_state(dump_state);
    let mut failed = 0;

    for path in &manifests {
        let result = runner.run_file(path);
        println!("{}", result.summary());
        if let Some(state) = &result.state {
            print!("{}", state);
        }
        if !result.passed {
            failed += 1;
            if fail_fast {
                break;
            }
        }
    }

    println!();
    println!("{} passed, {} failed", manifests.len() - failed, failed);
    if failed > 0 {
        bail!("{} of {} tests failed", failed, manifests.len());
    }
    Ok(())
}

fn print_usage() {
    println!("Usage: relay-emu [OPTIONS] <MANIFEST.toml | DIR>...");
    println!();
    println!("Options:");
    println!("  --describe        Print the unit tree and its instructions");
    println!("  --dump-state      Print final register values after each manifest");
    println!("  --fail-fast       Stop at the first failing manifest");
    println!("  --sample-config   Print a sample configuration file");
}

/// Expand directories into the `.toml` files they contain, sorted by name.
fn collect_manifests(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut manifests = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("reading {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_manifest(p))
                .collect();
            found.sort();
            log::info!("{}: {} manifests", path.display(), found.len());
            manifests.extend(found);
        } else {
            manifests.push(path.clone());
        }
    }
    Ok(manifests)
}

fn is_manifest(path: &Path) -> bool {
    path.extension().map(|ext| ext == "toml").unwrap_or(false)
}

fn print_unit_tree(design: &Design, id: UnitId, depth: usize) {
    let unit = design.unit(id);
    let indent = "  ".repeat(depth);
    println!(
        "{}{} ({} registers, {} instructions)",
        indent,
        unit.name(),
        unit.registers().len(),
        unit.instructions().len()
    );
    for &instr in unit.instructions() {
        println!("{}  - {}", indent, design.instruction(instr).name());
    }
    for &child in unit.children() {
        print_unit_tree(design, child, depth + 1);
    }
}
