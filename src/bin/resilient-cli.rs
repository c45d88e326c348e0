use clap::{Arg, ArgAction, ArgMatches, Command};
use resilient_dataset::{
    init_from_config, CoreConfig, JsonFileLoader, JsonFileStore, ResilientCore, ValidationLevel,
};
use resilient_dataset::integrity::{HealingReport, ValidationSummary};
use serde::Serialize;
use std::sync::Arc;

/// Operator CLI for a resilient dataset
///
/// Loads a dataset through the full redundancy stack and reports on it:
/// - Served records, optionally filtered by tag
/// - Integrity validation with optional healing
/// - Component statistics and a full health report
/// - A forced primary reload

fn main() {
    let matches = create_cli().get_matches();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_command(matches)) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn create_cli() -> Command {
    Command::new("resilient-cli")
        .about("Resilient dataset operator CLI")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(Arg::new("dataset")
            .help("Primary dataset JSON file")
            .long("dataset")
            .short('d')
            .required(true)
            .global(true))
        .arg(Arg::new("store")
            .help("JSON file backing the persistent snapshot layer")
            .long("store")
            .global(true))
        .arg(Arg::new("config")
            .help("JSON configuration file")
            .long("config")
            .short('c')
            .global(true))
        .arg(Arg::new("log-level")
            .help("Log level (trace, debug, info, warn, error)")
            .long("log-level")
            .global(true))
        .arg(Arg::new("json-logs")
            .help("Emit JSON log lines")
            .long("json-logs")
            .action(ArgAction::SetTrue)
            .global(true))
        .subcommand(
            Command::new("records")
                .about("Print the served records")
                .arg(Arg::new("tag")
                    .help("Only records with a subgroup carrying this tag")
                    .long("tag")
                    .short('t')))
        .subcommand(
            Command::new("validate")
                .about("Validate the served records")
                .arg(Arg::new("level")
                    .help("Validation level (basic, standard, comprehensive, strict)")
                    .long("level")
                    .short('l'))
                .arg(Arg::new("heal")
                    .help("Attempt to heal invalid records and print the results")
                    .long("heal")
                    .action(ArgAction::SetTrue)))
        .subcommand(
            Command::new("stats")
                .about("Print component statistics"))
        .subcommand(
            Command::new("health")
                .about("Run a full health check and print the report"))
        .subcommand(
            Command::new("refresh")
                .about("Reload the primary dataset"))
}

async fn run_command(matches: ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let core = open_core(&matches).await?;
    match matches.subcommand() {
        Some(("records", sub_matches)) => cmd_records(&core, sub_matches),
        Some(("validate", sub_matches)) => cmd_validate(&core, sub_matches),
        Some(("stats", _)) => print_json(&core.get_system_stats()),
        Some(("health", _)) => print_json(&core.force_health_check().await),
        Some(("refresh", _)) => {
            let health = core.force_refresh().await?;
            print_json(&health)
        }
        _ => unreachable!(),
    }
}

async fn open_core(matches: &ArgMatches) -> Result<Arc<ResilientCore>, Box<dyn std::error::Error>> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => CoreConfig::from_json_file(path)?,
        None => CoreConfig::default(),
    };
    config.apply_env_overrides()?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
    if matches.get_flag("json-logs") {
        config.logging.json = true;
    }
    init_from_config(&config.logging);

    let dataset = matches
        .get_one::<String>("dataset")
        .ok_or("--dataset is required")?;
    let mut builder = ResilientCore::builder(Arc::new(JsonFileLoader::new(dataset))).config(config);
    if let Some(store) = matches.get_one::<String>("store") {
        builder = builder.store(Arc::new(JsonFileStore::new(store)));
    }

    let core = builder.build()?;
    core.initialize().await;
    core.redundancy().wait_for_writeback().await;
    Ok(core)
}

fn cmd_records(core: &ResilientCore, matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let records = core.get_all_records();
    match matches.get_one::<String>("tag") {
        Some(tag) => {
            let filtered: Vec<_> = records.iter().filter(|r| r.has_tag(tag)).collect();
            print_json(&filtered)
        }
        None => print_json(records.as_ref()),
    }
}

fn cmd_validate(core: &ResilientCore, matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let level = match matches.get_one::<String>("level") {
        Some(level) => level.parse::<ValidationLevel>()?,
        None => core.integrity().default_level(),
    };

    let records = core.get_all_records();
    let batch = core.integrity().validate_batch(&records, level);

    if !matches.get_flag("heal") {
        return print_json(&batch);
    }

    let healed: Vec<_> = records
        .iter()
        .zip(&batch.results)
        .filter(|(_, result)| !result.valid)
        .map(|(record, result)| {
            core.integrity()
                .heal_in_context(record, result, Some(records.as_slice()))
        })
        .collect();

    #[derive(Serialize)]
    struct ValidateOutput<'a> {
        summary: &'a ValidationSummary,
        healing: Vec<HealingReport>,
    }

    print_json(&ValidateOutput {
        summary: &batch.summary,
        healing: healed,
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
