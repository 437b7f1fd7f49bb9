use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use restsync::commands::{self, Action};
use restsync::{
  Config, Engine, EngineConfig, HttpTransport, LifecycleBus, MutationOptions, ParamValue, Params,
  Transport,
};

#[derive(Parser, Debug)]
#[command(name = "restsync")]
#[command(about = "Keep a local, normalized view of a REST collection in sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/restsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// API root; overrides the config file
  #[arg(short, long, global = true)]
  base_url: Option<String>,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch once and print the normalized response
  Get(QueryArgs),
  /// Keep fetching and print every change; reads commands from stdin
  Watch(QueryArgs),
  /// POST a JSON record
  Create { endpoint: String, json: String },
  /// PUT (or PATCH) a JSON record
  Update {
    endpoint: String,
    id: String,
    json: String,
    /// Send a partial update
    #[arg(long)]
    patch: bool,
  },
  /// DELETE a record
  Delete { endpoint: String, id: String },
}

#[derive(ClapArgs, Debug)]
struct QueryArgs {
  /// Endpoint name from the config, or a literal path such as /assets
  endpoint: String,

  /// Bind to a single record
  #[arg(long)]
  id: Option<String>,

  /// Query parameter, repeatable
  #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
  params: Vec<(String, ParamValue)>,

  /// Start at this page (turns pagination on)
  #[arg(long)]
  page: Option<i64>,

  #[arg(short, long)]
  search: Option<String>,
}

fn parse_param(raw: &str) -> std::result::Result<(String, ParamValue), String> {
  match raw.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key.to_string(), ParamValue::parse(value))),
    _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
  }
}

impl QueryArgs {
  /// Fold the command-line query into the endpoint's engine settings
  fn engine_config(&self, mut engine: EngineConfig) -> EngineConfig {
    let mut initial = engine.initial_params.clone();
    for (key, value) in &self.params {
      initial.insert(key.as_str(), value.clone());
    }
    if let Some(search) = &self.search {
      initial.insert(restsync::params::SEARCH, search.as_str());
    }
    if let Some(page) = self.page {
      engine.pagination = true;
      initial.insert(restsync::params::PAGE, page);
    }
    if let Some(id) = &self.id {
      engine.resource_id = Some(id.clone());
    }
    engine.initial_params = initial;
    engine
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = restsync::logging::init(args.log_stderr)?;

  // Load configuration, falling back to a bare base URL
  let mut config = match (Config::load(args.config.as_deref()), &args.base_url) {
    (Ok(config), _) => config,
    (Err(_), Some(base_url)) if args.config.is_none() => Config::with_base_url(base_url.clone()),
    (Err(e), _) => return Err(e),
  };
  if let Some(base_url) = args.base_url {
    config.base_url = base_url;
  }

  let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config)?);

  match args.command {
    Command::Get(query) => {
      let (path, engine) = config.resolve_endpoint(&query.endpoint);
      let engine = Engine::bind(path, query.engine_config(engine).with_enabled(false), transport);
      let data = engine.get().await.map_err(|e| eyre!("{}", e))?;
      print_json(&data)?;
    }
    Command::Watch(query) => {
      let (path, engine) = config.resolve_endpoint(&query.endpoint);
      watch(path, query.engine_config(engine), transport).await?;
    }
    Command::Create { endpoint, json } => {
      let engine = mutation_engine(&config, &endpoint, transport);
      let body = engine
        .post(parse_json(&json)?, MutationOptions::new())
        .await
        .map_err(|e| eyre!("{}", e))?;
      print_json(&body)?;
    }
    Command::Update {
      endpoint,
      id,
      json,
      patch,
    } => {
      let engine = mutation_engine(&config, &endpoint, transport);
      let payload = parse_json(&json)?;
      let result = if patch {
        engine.patch(Some(&id), payload, MutationOptions::new()).await
      } else {
        engine.put(Some(&id), payload, MutationOptions::new()).await
      };
      print_json(&result.map_err(|e| eyre!("{}", e))?)?;
    }
    Command::Delete { endpoint, id } => {
      let engine = mutation_engine(&config, &endpoint, transport);
      let body = engine
        .delete(&id, MutationOptions::new())
        .await
        .map_err(|e| eyre!("{}", e))?;
      print_json(&body)?;
    }
  }

  Ok(())
}

/// One-shot mutations never need the list, so fetching stays off
fn mutation_engine(config: &Config, endpoint: &str, transport: Arc<dyn Transport>) -> Engine {
  let (path, engine) = config.resolve_endpoint(endpoint);
  Engine::bind(path, engine.with_enabled(false).with_optimistic_updates(false), transport)
}

async fn watch(path: String, config: EngineConfig, transport: Arc<dyn Transport>) -> Result<()> {
  let bus = LifecycleBus::new();
  let engine = Engine::with_lifecycle(path, config, transport, &bus);
  let mut snapshots = engine.subscribe();
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  info!(endpoint = engine.endpoint(), "watching");
  eprintln!("Type 'help' for commands.");

  loop {
    tokio::select! {
      changed = snapshots.changed() => {
        if changed.is_err() {
          break;
        }
        let snapshot = snapshots.borrow_and_update().clone();
        print_json(&snapshot)?;
      }
      line = lines.next_line() => {
        let Some(line) = line? else {
          break;
        };
        if line.trim().is_empty() {
          continue;
        }
        match commands::parse(&line) {
          Ok(Action::Quit) => break,
          Ok(action) => apply(&engine, &bus, action),
          Err(message) => eprintln!("{}", message),
        }
      }
      _ = tokio::signal::ctrl_c() => break,
    }
  }

  engine.shutdown();
  Ok(())
}

/// Run a line command against the engine. Fetch results arrive as snapshots.
fn apply(engine: &Engine, bus: &LifecycleBus, action: Action) {
  match action {
    Action::Search(text) => engine.update_params(Params::new().with(restsync::params::SEARCH, text)),
    Action::Page(page) => {
      if let Err(e) = engine.update_page(page) {
        eprintln!("{}", e);
      }
    }
    Action::More => {
      if !engine.load_more() {
        eprintln!("Nothing more to load.");
      }
    }
    Action::Set(params) => engine.update_params(params),
    Action::Refresh => spawn_fetch(engine, false),
    Action::Retry => spawn_fetch(engine, true),
    Action::Cancel => engine.cancel(),
    Action::Reset => engine.reset(),
    Action::Lifecycle(event) => bus.emit(event),
    Action::Help => eprintln!("{}", commands::help_text()),
    Action::Quit => {}
  }
}

fn spawn_fetch(engine: &Engine, retry: bool) {
  let engine = engine.clone();
  tokio::spawn(async move {
    let result = if retry {
      engine.retry().await
    } else {
      engine.refetch().await
    };
    if let Err(e) = result {
      eprintln!("{}", e);
    }
  });
}

fn parse_json(raw: &str) -> Result<Value> {
  serde_json::from_str(raw).map_err(|e| eyre!("Invalid JSON payload: {}", e))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let out = serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to encode output: {}", e))?;
  println!("{}", out);
  Ok(())
}
