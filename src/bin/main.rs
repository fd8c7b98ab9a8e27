//! querygraph CLI - compile JSON query requests to PostgreSQL
//!
//! Usage:
//!   querygraph compile --schema <schema.toml> --request <request.json> [--placeholder format]
//!   querygraph run --schema <schema.toml> --request <request.json> [--url <postgres url>]
//!   querygraph check --schema <schema.toml>
//!
//! A request is a JSON object:
//!
//! ```json
//! {
//!   "table": "actor",
//!   "filter": {"address__country": "NZ"},
//!   "select": {"fields": ["first_name"], "lookups": {"movie": ["title"]}},
//!   "order_by": ["-first_name"],
//!   "limit": 10
//! }
//! ```
//!
//! `insert` and `update` take an object of changes, `delete` takes `true`.

use clap::{Parser, Subcommand, ValueEnum};
use querygraph::config::Settings;
use querygraph::prelude::*;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "querygraph")]
#[command(about = "querygraph - composable queries compiled to a single PostgreSQL statement")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a request to SQL without running it
    Compile {
        #[command(flatten)]
        request: RequestArgs,

        /// Output format
        #[arg(short, long, default_value = "sql")]
        output: OutputFormat,
    },

    /// Compile a request and run it in one transaction
    Run {
        #[command(flatten)]
        request: RequestArgs,

        /// Database URL (defaults to database.url from querygraph.toml)
        #[arg(long)]
        url: Option<String>,

        /// Fail unless the query returns at most one row
        #[arg(long)]
        one: bool,
    },

    /// Validate a schema file
    Check {
        /// Path to the schema TOML file
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct RequestArgs {
    /// Path to the schema TOML file (defaults to schema.path from querygraph.toml)
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Path to the JSON request
    #[arg(short, long)]
    request: PathBuf,

    /// Placeholder style for bound arguments
    #[arg(short, long)]
    placeholder: Option<PlaceholderArg>,

    /// Role for SET LOCAL ROLE
    #[arg(long)]
    role: Option<String>,

    /// Session variable as name=value; value is parsed as JSON, else taken as text
    #[arg(long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum PlaceholderArg {
    /// $1, $2, ...
    Numbered,
    /// %s
    Format,
}

impl From<PlaceholderArg> for Placeholder {
    fn from(arg: PlaceholderArg) -> Self {
        match arg {
            PlaceholderArg::Numbered => Placeholder::Numbered,
            PlaceholderArg::Format => Placeholder::Format,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// SQL only
    Sql,
    /// The batch as JSON, arguments included
    Json,
}

/// Serde form of a request file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Request {
    table: String,
    #[serde(default)]
    filter: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    insert: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    update: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    delete: bool,
    #[serde(default)]
    select: Option<SelectionSpec>,
    #[serde(default)]
    order_by: Vec<String>,
    #[serde(default)]
    limit: Option<u64>,
    #[serde(default)]
    offset: Option<u64>,
}

impl Request {
    fn build<'g>(self, graph: &'g QueryGraph) -> QueryResult<Query<'g>> {
        let mut query = graph.table(&self.table)?;
        if let Some(insert) = self.insert {
            query = query.insert(Changes::from_json(insert))?;
        }
        if let Some(filter) = self.filter {
            query = query.filter(Filter::from_json(filter))?;
        }
        if let Some(update) = self.update {
            query = query.update(Changes::from_json(update))?;
        }
        if self.delete {
            query = query.delete()?;
        }
        if let Some(select) = self.select {
            query = query.select(select.into())?;
        }
        for spec in &self.order_by {
            query = query.order_by(spec)?;
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit)?;
        }
        if let Some(offset) = self.offset {
            query = query.offset(offset)?;
        }
        Ok(query)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&settings);

    match cli.command {
        Commands::Compile { request, output } => cmd_compile(&settings, request, output),
        Commands::Run { request, url, one } => cmd_run(&settings, request, url, one),
        Commands::Check { schema } => cmd_check(&settings, schema),
    }
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_env("QUERYGRAPH_LOG")
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_compile(settings: &Settings, args: RequestArgs, output: OutputFormat) -> ExitCode {
    let Some(graph) = load_graph(settings, args.schema.as_deref()) else {
        return ExitCode::FAILURE;
    };
    let Some((batch, _)) = prepare(settings, &graph, &args) else {
        return ExitCode::FAILURE;
    };

    match output {
        OutputFormat::Sql => {
            for part in &batch.parts {
                println!("{};", part.sql);
            }
        }
        OutputFormat::Json => match serde_json::to_string_pretty(&batch.parts) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing batch: {}", e);
                return ExitCode::FAILURE;
            }
        },
    }
    ExitCode::SUCCESS
}

fn cmd_run(settings: &Settings, args: RequestArgs, url: Option<String>, one: bool) -> ExitCode {
    let url = match url.map(Ok).unwrap_or_else(|| settings.database.resolved_url()) {
        Ok(url) => url,
        Err(e) => {
            eprintln!("No database url: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let Some(graph) = load_graph(settings, args.schema.as_deref()) else {
        return ExitCode::FAILURE;
    };
    let Some((batch, options)) = prepare(settings, &graph, &args) else {
        return ExitCode::FAILURE;
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let executor = Executor::new(url, options);

    let result = runtime.block_on(async {
        if one {
            executor
                .get(&batch)
                .await
                .map(|row| row.into_iter().collect::<Vec<_>>())
        } else {
            executor.fetch_all(&batch).await
        }
    });

    match result {
        Ok(rows) => {
            for row in rows {
                println!("{}", row);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Execution error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_check(settings: &Settings, schema: Option<PathBuf>) -> ExitCode {
    let Some(graph) = load_graph(settings, schema.as_deref()) else {
        return ExitCode::FAILURE;
    };

    println!("OK: {} relations", graph.schema().relations().count());
    for relation in graph.schema().relations() {
        println!("  - {} (primary key: {})", relation.name, relation.primary_key());
    }
    ExitCode::SUCCESS
}

fn load_graph(settings: &Settings, schema: Option<&Path>) -> Option<QueryGraph> {
    let Some(path) = schema.or(settings.schema.path.as_deref()) else {
        eprintln!("No schema given: pass --schema or set schema.path in querygraph.toml");
        return None;
    };
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading schema '{}': {}", path.display(), e);
            return None;
        }
    };
    match Schema::from_toml(&source) {
        Ok(schema) => Some(QueryGraph::new(schema)),
        Err(e) => {
            eprintln!("Schema error: {}", e);
            None
        }
    }
}

fn prepare(
    settings: &Settings,
    graph: &QueryGraph,
    args: &RequestArgs,
) -> Option<(Batch, CompileOptions)> {
    let source = match fs::read_to_string(&args.request) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading request '{}': {}", args.request.display(), e);
            return None;
        }
    };
    let request: Request = match serde_json::from_str(&source) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Invalid request: {}", e);
            return None;
        }
    };

    let mut options = settings.compiler.options();
    if let Some(placeholder) = args.placeholder {
        options.placeholder = placeholder.into();
    }

    let session = match parse_session(args) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid session: {}", e);
            return None;
        }
    };

    match request.build(graph).and_then(|q| q.prepare(&session, &options)) {
        Ok(batch) => Some((batch, options)),
        Err(e) => {
            eprintln!("Compilation error: {}", e);
            None
        }
    }
}

fn parse_session(args: &RequestArgs) -> Result<Session, String> {
    let mut session = Session::new();
    if let Some(role) = &args.role {
        session = session.role(role.clone());
    }
    for var in &args.vars {
        let (name, raw) = var
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", var))?;
        let value = serde_json::from_str::<serde_json::Value>(raw)
            .map(Value::from_json)
            .unwrap_or_else(|_| Value::Text(raw.to_string()));
        session = session.variable(name, value);
    }
    Ok(session)
}
