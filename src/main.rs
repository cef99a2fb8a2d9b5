use anyhow::{Context, Result};
use clap::Parser;
use lockreplay::cli::{Cli, OutputFormat};
use lockreplay::config::{LockStackScope, RecordPolicy, ReplayConfig, RwLockPolicy};
use lockreplay::html_output::HtmlOutput;
use lockreplay::json_output::JsonOutput;
use lockreplay::replay::ReplayDriver;
use lockreplay::report::Report;
use lockreplay::symbols::{DwarfResolver, ExternalResolver, SymbolCache};
use lockreplay::text_output;
use lockreplay::trace_file::Trace;
use std::fs;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// File configuration (if any) with command line overrides applied
fn build_config(args: &Cli) -> Result<ReplayConfig> {
    let mut config = match &args.config {
        Some(path) => ReplayConfig::from_toml(path)?,
        None => ReplayConfig::default(),
    };

    if args.skip_unknown {
        config.unknown_records = RecordPolicy::Skip;
    }
    if let Some(depth) = args.max_stack_depth {
        config.max_lock_stack_depth = depth;
    }
    if args.per_thread_stacks {
        config.lock_stack_scope = LockStackScope::PerThread;
    }
    if args.exclusive_rwlocks {
        config.rwlock_policy = RwLockPolicy::Exclusive;
    }
    if args.lock_stacks {
        config.include_lock_stacks = true;
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid replay configuration: {}", e))?;
    Ok(config)
}

fn build_symbols(args: &Cli) -> Result<SymbolCache> {
    if let Some(executable) = &args.executable {
        let resolver = DwarfResolver::load(executable)?;
        return Ok(SymbolCache::new(Box::new(resolver)));
    }

    match &args.core {
        Some(core) => Ok(SymbolCache::new(Box::new(ExternalResolver::new(
            args.resolver.clone(),
            core.clone(),
        )))),
        None => Ok(SymbolCache::disabled()),
    }
}

fn render(report: &Report, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Html => HtmlOutput::new(report).to_html(),
        OutputFormat::Text => text_output::render(report),
        OutputFormat::Json => JsonOutput::new(report).to_json()?,
    })
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let config = build_config(&args)?;
    let mut symbols = build_symbols(&args)?;

    let trace = Trace::load(&args.trace)?;
    let mut meta = trace.meta.clone();
    meta.core_file = args.core.as_ref().map(|p| p.display().to_string());

    let mut driver = ReplayDriver::new(config, trace.kinds.clone());
    driver
        .replay(trace.events())
        .with_context(|| format!("Failed to replay {}", args.trace.display()))?;

    let report = driver.finish(meta, &mut symbols);
    tracing::debug!("Symbol cache after report: {:?}", symbols);

    let output = render(&report, args.format)?;
    match &args.file {
        Some(path) => fs::write(path, output)
            .with_context(|| format!("Failed to write report to {}", path.display()))?,
        None => print!("{}", output),
    }

    Ok(())
}
