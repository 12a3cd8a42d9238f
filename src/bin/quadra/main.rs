//! Command-line tool for inspecting and maintaining a quadra data directory.
#![forbid(unsafe_code)]

mod config;
mod ui;

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use quadra::{ContextPattern, NativeStore, StoreOptions, Value};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use config::CliConfig;
use ui::{format_duration, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "quadra",
    version,
    about = "Inspect and maintain a quadra RDF store",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        env = "QUADRA_CONFIG",
        value_name = "FILE",
        help = "CLI config file (defaults to the user config dir)"
    )]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Log storage activity at debug level")]
    verbose: bool,

    #[arg(long, global = true, help = "Disable colors and spinners")]
    plain: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print statement, index, value and namespace counts")]
    Info {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    #[command(about = "Print stored statements, one quad per line")]
    Dump {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,

        #[arg(long, value_name = "IRI", help = "Only statements in this named graph")]
        context: Option<String>,

        #[arg(long, conflicts_with = "context", help = "Only statements in the default graph")]
        default_graph: bool,
    },

    #[command(about = "List or edit namespace prefixes")]
    Ns {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,

        #[command(subcommand)]
        action: NsAction,
    },

    #[command(about = "Cross-check the statement indexes")]
    Verify {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum NsAction {
    #[command(about = "Show every prefix binding")]
    List,
    #[command(about = "Bind a prefix to a namespace IRI")]
    Set { prefix: String, iri: String },
    #[command(about = "Drop a prefix binding")]
    Remove { prefix: String },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

struct Env {
    format: OutputFormat,
    ui: Ui,
    config: CliConfig,
}

impl Env {
    fn open(&self, dir: Option<PathBuf>) -> Result<NativeStore, Box<dyn Error>> {
        let dir = dir
            .or_else(|| self.config.default_dir().cloned())
            .ok_or("no data directory given and no default configured")?;
        let options: &StoreOptions = self.config.store_options();
        debug!(dir = %dir.display(), "opening store");
        Ok(NativeStore::open(&dir, options)?)
    }

    fn json<T: Serialize>(&self, value: &T) -> Result<(), Box<dyn Error>> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

#[derive(Serialize)]
struct InfoReport {
    dir: String,
    statements: u64,
    contexts: usize,
    values: u32,
    indexes: Vec<String>,
    namespaces: Vec<NamespaceEntry>,
}

#[derive(Serialize)]
struct NamespaceEntry {
    prefix: String,
    namespace: String,
}

#[derive(Serialize)]
struct QuadEntry {
    subject: String,
    predicate: String,
    object: String,
    context: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let ui = Ui::new(cli.plain || cli.format == OutputFormat::Json);
    let config = match CliConfig::load(cli.config.clone()) {
        Ok(config) => config,
        Err(err) => {
            ui.warn(&err.to_string());
            return ExitCode::from(2);
        }
    };
    if let Some(path) = config.path() {
        debug!(path = %path.display(), "cli config");
    }
    let env = Env {
        format: cli.format,
        ui,
        config,
    };
    match run(&env, cli.command) {
        Ok(code) => code,
        Err(err) => {
            env.ui.warn(&err.to_string());
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("quadra=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(env: &Env, command: Command) -> Result<ExitCode, Box<dyn Error>> {
    match command {
        Command::Info { dir } => cmd_info(env, dir),
        Command::Dump {
            dir,
            context,
            default_graph,
        } => cmd_dump(env, dir, context, default_graph),
        Command::Ns { dir, action } => cmd_ns(env, dir, action),
        Command::Verify { dir } => cmd_verify(env, dir),
    }
}

fn cmd_info(env: &Env, dir: Option<PathBuf>) -> Result<ExitCode, Box<dyn Error>> {
    let store = env.open(dir)?;
    let report = InfoReport {
        dir: store.dir().display().to_string(),
        statements: store.size(ContextPattern::Any)?,
        contexts: store.contexts()?.len(),
        values: store.value_store().entry_count()?,
        indexes: store
            .triple_store()
            .index_orders()
            .iter()
            .map(ToString::to_string)
            .collect(),
        namespaces: store
            .namespaces()
            .into_iter()
            .map(|(prefix, namespace)| NamespaceEntry { prefix, namespace })
            .collect(),
    };
    match env.format {
        OutputFormat::Json => env.json(&report)?,
        OutputFormat::Text => {
            env.ui.section(
                "Store",
                [
                    ("directory", report.dir.clone()),
                    ("statements", report.statements.to_string()),
                    ("named graphs", report.contexts.to_string()),
                    ("values", report.values.to_string()),
                    ("indexes", report.indexes.join(", ")),
                ],
            );
            env.ui.list(
                "Namespaces",
                report
                    .namespaces
                    .iter()
                    .map(|ns| format!("{}: <{}>", ns.prefix, ns.namespace)),
            );
        }
    }
    store.close()?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_dump(
    env: &Env,
    dir: Option<PathBuf>,
    context: Option<String>,
    default_graph: bool,
) -> Result<ExitCode, Box<dyn Error>> {
    let store = env.open(dir)?;
    let named = context.map(Value::iri);
    let pattern = match (&named, default_graph) {
        (Some(value), _) => ContextPattern::Named(value),
        (None, true) => ContextPattern::Default,
        (None, false) => ContextPattern::Any,
    };
    let mut entries = Vec::new();
    {
        let statements = store.statements(None, None, None, pattern, true)?;
        for statement in statements {
            let statement = statement?;
            match env.format {
                OutputFormat::Text => println!("{statement}"),
                OutputFormat::Json => entries.push(QuadEntry {
                    subject: statement.subject.to_string(),
                    predicate: statement.predicate.to_string(),
                    object: statement.object.to_string(),
                    context: statement.context.as_ref().map(ToString::to_string),
                }),
            }
        }
    }
    if env.format == OutputFormat::Json {
        env.json(&entries)?;
    }
    store.close()?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_ns(env: &Env, dir: Option<PathBuf>, action: NsAction) -> Result<ExitCode, Box<dyn Error>> {
    let store = env.open(dir)?;
    match action {
        NsAction::List => {
            let entries: Vec<NamespaceEntry> = store
                .namespaces()
                .into_iter()
                .map(|(prefix, namespace)| NamespaceEntry { prefix, namespace })
                .collect();
            match env.format {
                OutputFormat::Json => env.json(&entries)?,
                OutputFormat::Text => env.ui.list(
                    "Namespaces",
                    entries
                        .iter()
                        .map(|ns| format!("{}: <{}>", ns.prefix, ns.namespace)),
                ),
            }
        }
        NsAction::Set { prefix, iri } => {
            let mut txn = store.begin()?;
            txn.set_namespace(&prefix, &iri)?;
            txn.commit()?;
            env.ui.success(&format!("{prefix}: bound to <{iri}>"));
        }
        NsAction::Remove { prefix } => {
            let mut txn = store.begin()?;
            let removed = txn.remove_namespace(&prefix);
            txn.commit()?;
            match removed {
                Some(iri) => env.ui.success(&format!("{prefix}: unbound from <{iri}>")),
                None => env.ui.warn(&format!("{prefix}: no such prefix")),
            }
        }
    }
    store.close()?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_verify(env: &Env, dir: Option<PathBuf>) -> Result<ExitCode, Box<dyn Error>> {
    let store = env.open(dir)?;
    let task = env.ui.task("verifying indexes");
    let report = store.verify()?;
    let elapsed = task.finish();
    match env.format {
        OutputFormat::Json => env.json(&report)?,
        OutputFormat::Text => {
            for index in &report.indexes {
                let depth = index
                    .structure
                    .as_ref()
                    .map_or_else(|| "broken".to_owned(), |s| s.depth.to_string());
                env.ui.section(
                    &format!("Index {}", index.order),
                    [
                        ("records", index.records.to_string()),
                        ("depth", depth),
                    ],
                );
            }
            if report.is_consistent() {
                env.ui.success(&format!(
                    "indexes consistent ({})",
                    format_duration(elapsed)
                ));
            } else {
                env.ui.list("Mismatches", report.mismatches.iter().cloned());
            }
        }
    }
    let consistent = report.is_consistent();
    store.close()?;
    Ok(if consistent {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
