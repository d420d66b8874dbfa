//! qa - main entry point
//!
//! Loads the configuration, resolves it, and dispatches to the engine.

use anyhow::{Context, Result, bail};
use std::path::Path;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use qubes_automation::cli::{Cli, Commands, StatesCommands};
use qubes_automation::salt::templates;
use qubes_automation::{
    Engine, Inventory, ProcessGuard, QubesConfig, QvmCli, Report, SaltCall, SaltTarget, Settings,
    missing_salt_files, process_guard, resolve, salt_plan, sanity,
};

/// Exit code of `check` when drift was found
const EXIT_DRIFT: i32 = 2;

/// Initialize tracing; RUST_LOG wins over `-v`
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse_args();
    init_tracing(&cli);

    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    let code = {
        let _guard = ProcessGuard::new();
        match run(&cli) {
            Ok(code) => code,
            Err(e) => {
                error!("{:#}", e);
                1
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    if let Commands::States {
        action: StatesCommands::Install { dest },
    } = &cli.command
    {
        let dest = match dest {
            Some(dest) => dest.clone(),
            None => Settings::load_or_default(&cli.config)?.states_dir(),
        };
        install_states(&dest)?;
        return Ok(0);
    }

    let config = QubesConfig::load_from_file(&cli.config)?;
    let settings = config.settings.clone();
    debug!("Loaded {} qubes from {:?}", config.vms.len(), cli.config);

    match &cli.command {
        // handled before the configuration is loaded
        Commands::States { .. } => {}
        Commands::Validate => {
            let inventory = load_inventory(&config, &settings)?;
            println!("✓ Configuration is valid: {} qubes", inventory.len());
        }
        Commands::List => {
            let inventory = resolve(&config)?;
            for vm in inventory.iter() {
                println!(
                    "{:<28} {:<15} {}",
                    vm.name,
                    vm.class().to_string(),
                    vm.kind.parent().unwrap_or("-")
                );
            }
        }
        Commands::Render { vm } => {
            let inventory = resolve(&config)?;
            let definition = inventory
                .get(vm)
                .with_context(|| format!("qube '{}' is not declared", vm))?;
            for call in salt_plan(definition) {
                println!("# {} on {} pillar={}", call.sls(), target_name(&call), call.pillar_json());
                let source = templates::template(&call.state)
                    .with_context(|| format!("no bundled state '{}'", call.state))?;
                println!("{}", templates::render(source, &call.pillar)?);
            }
        }
        Commands::Check { vms } => {
            let inventory = resolve(&config)?;
            let mut host = open_host(cli, &settings)?;
            let report = Engine::new(&mut host, &inventory).check_all(vms, false)?;
            print_report(&report, false);
            if !report.is_clean() {
                return Ok(EXIT_DRIFT);
            }
        }
        Commands::Apply { vms } => {
            let inventory = load_inventory(&config, &settings)?;
            let mut host = open_host(cli, &settings)?;
            let report = Engine::new(&mut host, &inventory).check_all(vms, true)?;
            print_report(&report, true);
        }
        Commands::Regenerate { vm } => {
            let inventory = load_inventory(&config, &settings)?;
            let mut host = open_host(cli, &settings)?;
            Engine::new(&mut host, &inventory).regenerate(vm)?;
            println!("✓ Regenerated {}", vm);
        }
        Commands::Upgrade { all, vms } => {
            let inventory = resolve(&config)?;
            let mut host = open_host(cli, &settings)?;
            let upgraded = Engine::new(&mut host, &inventory).upgrade_templates(vms, *all)?;
            if upgraded.is_empty() {
                println!("No templates upgraded");
            } else {
                println!("Upgraded: {}", upgraded.join(", "));
            }
        }
    }
    Ok(0)
}

/// Resolve and make sure every `file-manage` source exists
fn load_inventory(config: &QubesConfig, settings: &Settings) -> Result<Inventory> {
    let inventory = resolve(config)?;
    let missing = missing_salt_files(&inventory, settings);
    if !missing.is_empty() {
        for path in &missing {
            error!("Missing salt file {}", path.display());
        }
        bail!("{} salt file(s) missing", missing.len());
    }
    Ok(inventory)
}

fn open_host(cli: &Cli, settings: &Settings) -> Result<QvmCli> {
    if cli.dry_run {
        info!("Dry-run mode: no changes will be made");
    } else if let Err(report) = sanity::run_preflight_checks(settings.use_sudo) {
        bail!("Pre-flight check failed\n{}", report);
    }
    Ok(QvmCli::new(settings.clone(), cli.dry_run))
}

fn install_states(dest: &Path) -> Result<()> {
    let written = templates::install_states(dest)
        .with_context(|| format!("Failed to install states into {:?}", dest))?;
    println!("✓ Installed {} states into {}", written.len(), dest.display());
    Ok(())
}

fn target_name(call: &SaltCall) -> &str {
    match &call.target {
        SaltTarget::Dom0 => "dom0",
        SaltTarget::Vm(vm) => vm,
    }
}

fn print_report(report: &Report, applied: bool) {
    if report.is_clean() {
        println!("✓ {} qubes match the configuration", report.checked.len());
        return;
    }
    let verb = if applied { "updated" } else { "drifted" };
    println!(
        "{} of {} qubes {}: {}",
        report.drifted.len(),
        report.checked.len(),
        verb,
        report.drifted.join(", ")
    );
}
