use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cloudrecon::api::ApiClient;
use cloudrecon::config::Config;
use cloudrecon::engine::{AttrValue, Block, ProjectScope, ResourceData};
use cloudrecon::resource::{self, get_all_resource_keys, get_resource, Provider, ResourceKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Declarative reconciliation of cloud resources
#[derive(Parser, Debug)]
#[command(name = "cloudrecon", version = cloudrecon::VERSION, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: <config_dir>/cloudrecon/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API endpoint, optionally a `{service}` template
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Region sent with every action
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// Project scope (repeatable)
    #[arg(short, long = "project", global = true)]
    projects: Vec<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List known resource types
    Resources,
    /// Print a resource schema as JSON
    Schema { key: String },
    /// Refresh one resource and print its state
    Read {
        key: String,
        #[arg(long)]
        id: String,
    },
    /// Query a data source
    List {
        key: String,
        #[arg(long)]
        name_regex: Option<String>,
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long)]
        output_file: Option<String>,
    },
    /// Create, replace or update a resource from a desired-state file
    Apply {
        key: String,
        /// Desired state (JSON or YAML)
        #[arg(long)]
        desired: PathBuf,
        /// Recorded state of an existing resource (JSON or YAML)
        #[arg(long, requires = "id")]
        prior: Option<PathBuf>,
        #[arg(long)]
        id: Option<String>,
        /// Run the pre-flight dry-run pass (overrides config)
        #[arg(long)]
        dry_run: Option<bool>,
    },
    /// Delete a resource
    Destroy {
        key: String,
        #[arg(long)]
        id: String,
        /// Recorded state, for resources whose delete call needs it
        #[arg(long)]
        state: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {:?}: {}", log_path, e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudrecon started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("cloudrecon").join("cloudrecon.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cloudrecon").join("cloudrecon.log");
    }
    PathBuf::from("cloudrecon.log")
}

/// Read a JSON or YAML attribute block
fn load_block(path: &Path) -> Result<Block> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let block = if is_json {
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))?
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("Invalid YAML in {}", path.display()))?
    };
    Ok(block)
}

/// Settings passed on the command line, ahead of env and config file
struct Overrides<'a> {
    endpoint: Option<&'a str>,
    region: Option<&'a str>,
    projects: &'a [String],
}

fn provider_for(config: &Config, overrides: &Overrides<'_>, key: &str, dry_run: Option<bool>) -> Result<Provider> {
    let def = get_resource(key).with_context(|| format!("Unknown resource: {}", key))?;
    let endpoint = overrides
        .endpoint
        .map(str::to_string)
        .unwrap_or_else(|| config.effective_endpoint());
    let region = overrides
        .region
        .map(str::to_string)
        .or_else(|| config.effective_region());
    let projects = if overrides.projects.is_empty() {
        config.effective_projects()
    } else {
        overrides.projects.to_vec()
    };

    let client = ApiClient::new(&endpoint, &def.service, &config.effective_api_version())?
        .with_region(region)
        .with_token(config.effective_token());

    Ok(Provider::new(Arc::new(client))
        .with_scope(ProjectScope::new(projects))
        .with_dry_run(dry_run.unwrap_or_else(|| config.effective_dry_run()))
        .with_timeouts(config.timeouts())
        .with_poll_interval(config.poll_interval()))
}

fn print_state(data: &ResourceData) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&data.to_json())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    let overrides = Overrides {
        endpoint: args.endpoint.as_deref(),
        region: args.region.as_deref(),
        projects: &args.projects,
    };

    match &args.command {
        Command::Resources => {
            for key in get_all_resource_keys() {
                if let Some(def) = get_resource(key) {
                    let kind = match def.kind {
                        ResourceKind::Resource => "resource",
                        ResourceKind::DataSource => "data source",
                    };
                    println!("{:<20} {:<12} {}", key, kind, def.display_name);
                }
            }
        }
        Command::Schema { key } => {
            let def = get_resource(key).with_context(|| format!("Unknown resource: {}", key))?;
            println!("{}", serde_json::to_string_pretty(&def.schema)?);
        }
        Command::Read { key, id } => {
            let provider = provider_for(&config, &overrides, key, None)?;
            let resource = resource::lookup(key)?;
            let mut data = ResourceData::existing(id, Block::new(), Block::new());
            resource.read(&provider, &mut data).await?;
            if data.id().is_none() {
                bail!("{} {} not found", key, id);
            }
            print_state(&data)?;
        }
        Command::List {
            key,
            name_regex,
            ids,
            output_file,
        } => {
            let provider = provider_for(&config, &overrides, key, None)?;
            let resource = resource::lookup(key)?;
            if resource.def().kind != ResourceKind::DataSource {
                bail!("{} is not a data source", key);
            }

            let mut query = Block::new();
            if !ids.is_empty() {
                query.insert(
                    "ids".into(),
                    AttrValue::List(ids.iter().cloned().map(AttrValue::String).collect()),
                );
            }
            if let Some(pattern) = name_regex {
                query.insert("name_regex".into(), AttrValue::String(pattern.clone()));
            }
            if let Some(path) = output_file {
                query.insert("output_file".into(), AttrValue::String(path.clone()));
            }

            let mut data = ResourceData::new(query);
            resource.read(&provider, &mut data).await?;
            print_state(&data)?;
        }
        Command::Apply {
            key,
            desired,
            prior,
            id,
            dry_run,
        } => {
            let provider = provider_for(&config, &overrides, key, *dry_run)?;
            let resource = resource::lookup(key)?;
            let desired = load_block(desired)?;

            let mut data = match (prior, id) {
                (Some(prior), Some(id)) => ResourceData::existing(id, load_block(prior)?, desired),
                _ => ResourceData::new(desired),
            };
            resource::apply(resource.as_ref(), &provider, &mut data).await?;
            print_state(&data)?;
        }
        Command::Destroy { key, id, state } => {
            let provider = provider_for(&config, &overrides, key, None)?;
            let resource = resource::lookup(key)?;
            let recorded = match state {
                Some(path) => load_block(path)?,
                None => Block::new(),
            };
            let mut data = ResourceData::existing(id, recorded.clone(), recorded);
            resource.delete(&provider, &mut data).await?;
            println!("{} {} destroyed", key, id);
        }
    }

    Ok(())
}
