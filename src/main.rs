//! querychain CLI
//!
//! Runs a query chain over a JSON array read from a file or stdin:
//!
//! ```text
//! querychain -i orders.json --where 'o => o.count > 5' --order-by 'o => o.supplier' --take 3
//! cat orders.json | querychain --inline-count --skip 10 --take 10
//! querychain -i orders.json --sum 'o => o.count'
//! ```
//!
//! Chaining flags apply in the order they are given.

use anyhow::Context;
use clap::parser::ValueSource;
use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use querychain::config::{generate_default_config, Config, LoggingConfig};
use querychain::{LocalProvider, PartArgument, Query, QueryFunc, QueryPart, QueryProvider};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "querychain")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run deferred query chains over JSON arrays")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Input file with a JSON array (default: stdin)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Config file (default: user config dir, then ./querychain.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print compact JSON regardless of config
    #[arg(long)]
    pub compact: bool,

    /// Keep elements matching a predicate
    #[arg(long = "where", value_name = "LAMBDA")]
    pub where_: Vec<String>,

    /// Project each element
    #[arg(long, value_name = "LAMBDA")]
    pub select: Vec<String>,

    /// Sort ascending by a key
    #[arg(long, value_name = "LAMBDA")]
    pub order_by: Vec<String>,

    /// Sort descending by a key
    #[arg(long, value_name = "LAMBDA")]
    pub order_by_desc: Vec<String>,

    /// Break ties ascending
    #[arg(long, value_name = "LAMBDA")]
    pub then_by: Vec<String>,

    /// Break ties descending
    #[arg(long, value_name = "LAMBDA")]
    pub then_by_desc: Vec<String>,

    /// Drop the first N elements
    #[arg(long, value_name = "N")]
    pub skip: Vec<usize>,

    /// Keep the first N elements
    #[arg(long, value_name = "N")]
    pub take: Vec<usize>,

    /// Remove duplicates
    #[arg(long, action = ArgAction::Count)]
    pub distinct: u8,

    /// Reverse element order
    #[arg(long, action = ArgAction::Count)]
    pub reverse: u8,

    /// Report the element count before paging alongside the results
    #[arg(long, action = ArgAction::Count)]
    pub inline_count: u8,

    /// Print the number of elements
    #[arg(long, group = "terminal")]
    pub count: bool,

    /// Print the first element
    #[arg(long, group = "terminal")]
    pub first: bool,

    /// Print the sum of a selector
    #[arg(long, value_name = "LAMBDA", group = "terminal")]
    pub sum: Option<String>,

    /// Print the average of a selector
    #[arg(long, value_name = "LAMBDA", group = "terminal")]
    pub average: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// One chaining flag, in command-line order
#[derive(Debug, Clone, PartialEq)]
enum Step {
    Where(String),
    Select(String),
    OrderBy(String),
    OrderByDesc(String),
    ThenBy(String),
    ThenByDesc(String),
    Skip(usize),
    Take(usize),
    Distinct,
    Reverse,
    InlineCount,
}

impl Step {
    fn apply(self, query: Query) -> Query {
        match self {
            Step::Where(lambda) => query.where_(lambda),
            Step::Select(lambda) => query.select(lambda),
            Step::OrderBy(lambda) => query.order_by(lambda),
            Step::OrderByDesc(lambda) => query.order_by_descending(lambda),
            Step::ThenBy(lambda) => query.then_by(lambda),
            Step::ThenByDesc(lambda) => query.then_by_descending(lambda),
            Step::Skip(n) => query.skip(n),
            Step::Take(n) => query.take(n),
            Step::Distinct => query.distinct(),
            Step::Reverse => query.reverse(),
            Step::InlineCount => query.append(QueryPart::of(QueryFunc::InlineCount, Vec::new())),
        }
    }
}

/// Chaining flags sorted by their position on the command line
fn collect_steps(matches: &ArgMatches) -> Vec<Step> {
    let given = |id: &str| matches.value_source(id) == Some(ValueSource::CommandLine);
    let mut steps: Vec<(usize, Step)> = Vec::new();

    let lambdas: [(&str, fn(String) -> Step); 6] = [
        ("where_", Step::Where),
        ("select", Step::Select),
        ("order_by", Step::OrderBy),
        ("order_by_desc", Step::OrderByDesc),
        ("then_by", Step::ThenBy),
        ("then_by_desc", Step::ThenByDesc),
    ];
    for (id, step) in lambdas.into_iter().filter(|(id, _)| given(*id)) {
        if let (Some(values), Some(indices)) = (matches.get_many::<String>(id), matches.indices_of(id)) {
            steps.extend(indices.zip(values.cloned().map(step)));
        }
    }

    let counts: [(&str, fn(usize) -> Step); 2] = [("skip", Step::Skip), ("take", Step::Take)];
    for (id, step) in counts.into_iter().filter(|(id, _)| given(*id)) {
        if let (Some(values), Some(indices)) = (matches.get_many::<usize>(id), matches.indices_of(id)) {
            steps.extend(indices.zip(values.copied().map(step)));
        }
    }

    let flags = [
        ("distinct", Step::Distinct),
        ("reverse", Step::Reverse),
        ("inline_count", Step::InlineCount),
    ];
    for (id, step) in flags.into_iter().filter(|(id, _)| given(*id)) {
        if let Some(indices) = matches.indices_of(id) {
            steps.extend(indices.map(|i| (i, step.clone())));
        }
    }

    steps.sort_by_key(|(index, _)| *index);
    steps.into_iter().map(|(_, step)| step).collect()
}

fn terminal_part(cli: &Cli) -> QueryPart {
    if cli.count {
        QueryPart::of(QueryFunc::Count, Vec::new())
    } else if cli.first {
        QueryPart::of(QueryFunc::First, Vec::new())
    } else if let Some(selector) = &cli.sum {
        QueryPart::of(QueryFunc::Sum, vec![PartArgument::from_text(selector.as_str())])
    } else if let Some(selector) = &cli.average {
        QueryPart::of(QueryFunc::Average, vec![PartArgument::from_text(selector.as_str())])
    } else {
        QueryPart::of(QueryFunc::ToArray, Vec::new())
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("querychain={}", config.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn read_input(input: Option<&PathBuf>) -> anyhow::Result<Value> {
    let text = match input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?,
        None => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            text
        }
    };
    serde_json::from_str(&text).context("Input is not valid JSON")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    if let Some(Commands::Config { output }) = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging);

    let source = read_input(cli.input.as_ref()).await?;
    let provider = LocalProvider::from_json(source)?.trace_parts(config.engine.trace_parts);

    let query = collect_steps(&matches)
        .into_iter()
        .fold(provider.query(), |query, step| step.apply(query));
    let parts = query.parts().push(terminal_part(&cli)).to_vec();
    tracing::info!("Executing {} parts", parts.len());

    let execution = query.provider().execute_async(&parts).await?;
    let output = match execution.inline_count {
        Some(count) => json!({ "results": execution.value, "inlineCount": count }),
        None => execution.value,
    };

    let text = if config.output.pretty && !cli.compact {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", text);

    Ok(())
}
