//! rtio-emu: cycle-stepped emulator for an ARTIQ-style RTIO interconnect

use std::env;
use std::path::Path;

use anyhow::Context;
use rtio_emu::board::SystemConfig;
use rtio_emu::config::Config;
use rtio_emu::testing::Scenario;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let command = args.iter().skip(1).find(|a| !a.starts_with('-')).map(|s| s.as_str());

    match command {
        Some("board") => show_board(),
        Some("sample-config") => {
            print!("{}", Config::sample_config());
            Ok(())
        }
        Some("run") => {
            let path = args
                .iter()
                .skip(1)
                .filter(|a| !a.starts_with('-'))
                .nth(1)
                .context("usage: rtio-emu run <scenario.toml>")?;
            run_scenario(Path::new(path), args.iter().any(|a| a == "--quiet" || a == "-q"))
        }
        Some(other) => {
            print_usage();
            anyhow::bail!("unknown command '{}'", other)
        }
        None => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("Usage: rtio-emu <command>");
    println!();
    println!("Commands:");
    println!("  board                  Print the configured channel table");
    println!("  sample-config          Print an example rtio-emu.toml");
    println!("  run <scenario.toml>    Run a scenario and report the results");
    println!();
    println!("Options:");
    println!("  -q, --quiet            Only print the pass/fail line for `run`");
}

fn show_board() -> anyhow::Result<()> {
    let config = Config::get();
    let system = SystemConfig::from_config(config)
        .with_context(|| format!("cannot build board '{}'", config.board()))?;
    system.print_summary();
    Ok(())
}

fn run_scenario(path: &Path, quiet: bool) -> anyhow::Result<()> {
    let scenario = Scenario::from_file(path)?;
    let report = scenario
        .run()
        .with_context(|| format!("scenario {} aborted", path.display()))?;

    if quiet {
        println!("{}: {}", report.name, if report.passed() { "PASS" } else { "FAIL" });
    } else {
        report.print_summary();
    }

    if !report.passed() {
        anyhow::bail!("scenario {} failed", path.display());
    }
    Ok(())
}
