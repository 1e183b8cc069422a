//! `tagsheet` - CLI for printable QR tag sheets
//!
//! This binary issues QR codes into the registry and exports them as
//! printable PDF sheets.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use tagsheet::cli::{
    Cli, Command, ConfigCommand, ExportCommand, GenerateCommand, LayoutCommand, ListCommand,
    Selection, ShowCommand,
};
use tagsheet::{
    init_logging, parse_id_list, Config, Error, ExportReport, Exporter, QrRecord, Registry,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    // Validation must run before loading, which would fail on the same errors.
    if let Command::Config(ConfigCommand::Validate { file }) = &cli.command {
        return handle_validate(file.clone().or_else(|| cli.config.clone()));
    }

    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Export(cmd) => handle_export(config, &cmd),
        Command::Layout(cmd) => handle_layout(&config, &cmd),
        Command::Generate(cmd) => handle_generate(&config, &cmd),
        Command::List(cmd) => handle_list(&config, &cmd),
        Command::Show(cmd) => handle_show(&config, &cmd),
        Command::Config(cmd) => handle_config(&config, &cmd, cli.config),
    }
}

/// Collect the ids named by a selection, in order.
fn resolve_ids(config: &Config, selection: &Selection) -> Result<Vec<String>> {
    if let Some(count) = selection.inactive {
        let registry = open_registry(config)?;
        let records = registry.list_inactive(count)?;
        return Ok(records.into_iter().map(|r| r.id).collect());
    }

    let mut ids = selection.ids.clone();
    if let Some(path) = &selection.ids_file {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read id list {}", path.display()))?;
        ids.extend(parse_id_list(&contents));
    }
    Ok(ids)
}

fn open_registry(config: &Config) -> Result<Registry> {
    let path = config.database_path();
    Registry::open(&path).with_context(|| format!("failed to open registry {}", path.display()))
}

fn handle_export(mut config: Config, cmd: &ExportCommand) -> Result<()> {
    if let Some(origin) = &cmd.origin {
        config.export.origin.clone_from(origin);
    }
    if let Some(policy) = cmd.policy {
        config.export.failure_policy = policy.into();
    }
    if let Some(source) = cmd.source {
        config.assets.source = source.into();
    }
    config.validate()?;

    let ids = resolve_ids(&config, &cmd.selection)?;
    let exporter = Exporter::from_config(config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime.block_on(async {
        match &cmd.output {
            Some(path) => exporter.run_to(&ids, path).await,
            None => exporter.run(&ids).await,
        }
    });

    let report = match result {
        Ok(report) => report,
        Err(e @ Error::AssetFetch { .. }) => {
            for id in e.failed_item_ids() {
                eprintln!("  failed: {id}");
            }
            return Err(e).context("export aborted");
        }
        Err(e) if e.is_fatal_for_export() => return Err(e).context("nothing was exported"),
        Err(e) => return Err(e).context("export failed"),
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ExportReport) {
    println!("Wrote {}", report.output.display());
    println!("  Pages:  {}", report.page_count);
    println!("  Labels: {}", report.labels);
    if !report.is_clean() {
        println!(
            "  {} code(s) without an image ({} policy):",
            report.failures.len(),
            report.policy
        );
        for failure in &report.failures {
            println!("    {:<16} {}", failure.id, failure.reason);
        }
    }
}

fn handle_layout(config: &Config, cmd: &LayoutCommand) -> Result<()> {
    let ids = resolve_ids(config, &cmd.selection)?;
    let exporter = Exporter::from_config(config.clone())?;
    let plan = exporter.plan(&ids)?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!(
        "{} label(s), {} per page, {} page(s)",
        plan.placements.len(),
        plan.items_per_page,
        plan.page_count
    );
    println!();
    println!("{:>4} {:>3} {:>3} {:>8} {:>8}  ID", "PAGE", "ROW", "COL", "X", "Y");
    for p in &plan.placements {
        println!(
            "{:>4} {:>3} {:>3} {:>8.2} {:>8.2}  {}",
            p.page_index + 1,
            p.row,
            p.col,
            p.x,
            p.y,
            p.item.id
        );
    }
    Ok(())
}

fn handle_generate(config: &Config, cmd: &GenerateCommand) -> Result<()> {
    let registry = open_registry(config)?;
    let count = usize::try_from(cmd.count)?;
    let records = registry.generate_batch(count, config.registry.id_length)?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in &records {
            println!("{}", record.id);
        }
    }
    Ok(())
}

fn handle_list(config: &Config, cmd: &ListCommand) -> Result<()> {
    let registry = open_registry(config)?;
    let page = registry.list_page(cmd.page, cmd.size)?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    println!("{:<12} {:<8} {:<20} OWNER", "ID", "STATUS", "CREATED");
    for record in &page.records {
        println!(
            "{:<12} {:<8} {:<20} {}",
            record.id,
            status(record),
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.name.as_deref().unwrap_or("-")
        );
    }
    println!();
    println!(
        "Page {} of {} ({} code(s))",
        page.page + 1,
        page.total_pages.max(1),
        page.total
    );
    Ok(())
}

fn handle_show(config: &Config, cmd: &ShowCommand) -> Result<()> {
    let registry = open_registry(config)?;
    let Some(record) = registry.get(&cmd.id)? else {
        return Err(Error::RecordNotFound { id: cmd.id.clone() }.into());
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("ID:         {}", record.id);
    println!("Status:     {}", status(&record));
    println!("Created:    {}", record.created_at.to_rfc3339());
    if let Some(at) = record.activated_at {
        println!("Activated:  {}", at.to_rfc3339());
    }
    let fields = [
        ("Name", &record.name),
        ("Email", &record.email),
        ("Address", &record.address),
        ("Phone", &record.phone_number),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            println!("{:<11} {value}", format!("{label}:"));
        }
    }
    println!(
        "Scan URL:   {}",
        tagsheet::label::target_url_for(&config.export.origin, &record.id)
    );
    Ok(())
}

fn status(record: &QrRecord) -> &'static str {
    if record.is_active {
        "active"
    } else {
        "inactive"
    }
}

fn handle_config(
    config: &Config,
    cmd: &ConfigCommand,
    config_path: Option<PathBuf>,
) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if *json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                let g = &config.geometry;
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Geometry]");
                println!("  Page (pt):          {} x {}", g.page_width, g.page_height);
                println!("  Margin (pt):        {}", g.margin);
                println!("  Label size (pt):    {}", g.label_size);
                println!("  Labels per row:     {}", g.qr_per_row);
                if let Ok(derived) = g.derive() {
                    println!("  Labels per page:    {}", derived.items_per_page);
                }
                println!();
                println!("[Export]");
                println!("  Origin:             {}", config.export.origin);
                println!("  Title:              {}", config.export.title);
                println!("  Output directory:   {}", config.output_dir().display());
                println!("  Failure policy:     {}", config.export.failure_policy);
                println!();
                println!("[Assets]");
                println!("  Source:             {}", config.assets.source);
                println!("  Service URL:        {}", config.assets.service_url);
                println!("  Concurrency:        {}", config.assets.concurrency);
                println!("  Retries:            {}", config.assets.retries);
                println!("  Timeout (ms):       {}", config.assets.timeout_ms);
                println!();
                println!("[Registry]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Id length:          {}", config.registry.id_length);
            }
        }
        ConfigCommand::Path => {
            let path = config_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => {
            return handle_validate(file.clone().or(config_path));
        }
    }
    Ok(())
}

fn handle_validate(file: Option<PathBuf>) -> Result<()> {
    let path = file.unwrap_or_else(Config::default_config_path);
    if !path.exists() {
        bail!("configuration file not found: {}", path.display());
    }
    println!("Validating configuration: {}", path.display());
    match Config::load_from(Some(path)) {
        Ok(_) => {
            println!("Configuration is valid.");
            Ok(())
        }
        Err(e) => Err(e).context("configuration is invalid"),
    }
}
