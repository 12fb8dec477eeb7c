use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use clap::{builder::ArgAction, Parser, Subcommand};
use console::{style, Emoji};
use errors::PulsedErrors;
use pulse::{
  article::Article,
  clients::ChatClient,
  config::Config,
  database::Database,
  format,
  pipeline::{GraphLookup, Pipeline},
};
use tracing::{debug, trace};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub mod errors;

static LOOKING_GLASS: Emoji<'_, '_> = Emoji("🔍 ", "");
static BOOKS: Emoji<'_, '_> = Emoji("📚 ", "");
static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
static PAPER: Emoji<'_, '_> = Emoji("📄 ", "");
static GRAPH: Emoji<'_, '_> = Emoji("🧭 ", "");
static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "");
static SUCCESS: Emoji<'_, '_> = Emoji("✨ ", "");

/// SQLite side files removed together with the database.
const SIDE_FILE_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

#[derive(Parser)]
#[command(author, version, about = "Batch runner and maintenance CLI for the pulse journal pipeline")]
struct Cli {
  /// Verbose mode (-v, -vv, -vvv)
  #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase logging verbosity"
    )]
  verbose: u8,

  /// Path to the database file
  #[arg(long, short, global = true)]
  path: Option<PathBuf>,

  /// Path to a JSON config file
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Also write logs to daily-rotated files in this directory
  #[arg(long, global = true)]
  log_dir: Option<PathBuf>,

  /// Skip interactive confirmations
  #[arg(long, global = true)]
  accept_defaults: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Initialize a new article database
  Init,
  /// Fetch today's articles from every journal and store them
  Ingest {
    /// Maximum number of entries taken from each journal
    #[arg(long)]
    limit:     Option<usize>,
    /// Do not generate logic graphs for new articles
    #[arg(long)]
    no_graphs: bool,
  },
  /// Show the logic graph of an article, generating it when missing
  Graph {
    /// Article id
    id:         i64,
    /// Generate a new graph even when one is stored
    #[arg(long)]
    regenerate: bool,
  },
  /// Generate logic graphs for stored articles that have none
  BackfillGraphs {
    /// Maximum number of articles to process
    #[arg(long, default_value_t = 20)]
    limit: usize,
  },
  /// Classify stored articles that have no research fields
  Reclassify {
    /// Maximum number of articles to process
    #[arg(long, default_value_t = 50)]
    limit: usize,
  },
  /// List recently published articles
  Recent {
    /// How many days back to look
    #[arg(long, default_value_t = 7)]
    days:  u32,
    /// Only articles assigned to this research field
    #[arg(long)]
    field: Option<String>,
  },
  /// List the research fields that have articles
  Fields,
  /// Removes the entire database
  Clean,
}

/// Setup logging with the specified verbosity level, optionally mirrored to log files.
///
/// The returned guard must live until the program exits so buffered file logs are flushed.
fn setup_logging(verbosity: u8, log_dir: Option<&Path>) -> Option<WorkerGuard> {
  let filter = match verbosity {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

  let stderr_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .with_file(true)
    .with_line_number(true)
    .with_thread_ids(true)
    .with_target(true);

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "pulsed.log"));
      (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
    },
    None => (None, None),
  };

  tracing_subscriber::registry().with(filter).with(stderr_layer).with(file_layer).init();
  guard
}

/// Asks for a yes/no confirmation, answering yes without asking when defaults are accepted.
fn confirm(prompt: &str, accept_defaults: bool) -> Result<bool, PulsedErrors> {
  if accept_defaults {
    return Ok(true);
  }
  Ok(dialoguer::Confirm::new().with_prompt(prompt).default(false).wait_for_newline(true).interact()?)
}

/// Asks the user to type `word` to confirm a destructive action.
fn confirm_typed(word: &str, action: &str, accept_defaults: bool) -> Result<bool, PulsedErrors> {
  if accept_defaults {
    return Ok(true);
  }
  let input = dialoguer::Input::<String>::new()
    .with_prompt(format!("{} Type {} to confirm {action}", style("⚠️").red(), style(word).red().bold()))
    .interact_text()?;
  Ok(input == word)
}

/// Removes the database file and its SQLite side files.
fn remove_database(path: &Path) -> Result<(), PulsedErrors> {
  std::fs::remove_file(path)?;
  for file in glob::glob(&format!("{}-*", path.display()))?.flatten() {
    let name = file.to_string_lossy();
    if SIDE_FILE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
      trace!("Removing side file {}", file.display());
      std::fs::remove_file(&file)?;
    }
  }
  Ok(())
}

/// Builds the pipeline for commands that talk to the model.
async fn build_pipeline(config: Config, db_path: &Path) -> Result<Pipeline, PulsedErrors> {
  config.require_api_key()?;
  let db = Database::open(db_path).await?;
  let model = Arc::new(ChatClient::new(&config.llm)?);
  debug!(base_url = %model.base_url(), "Model client ready");
  Ok(Pipeline::new(config, db, model)?)
}

/// Prints one article with its fields.
async fn print_article(db: &Database, index: usize, article: &Article) -> Result<(), PulsedErrors> {
  println!("\n{}. {}", style(index).yellow(), style(article.display_title()).white().bold());
  if article.display_title() != article.original_title {
    println!("   {} {}", style("Original:").green(), style(&article.original_title).white());
  }
  println!(
    "   {} {} · {} · id {}",
    style("Journal:").green(),
    style(&article.journal).cyan(),
    style(article.publish_date).white(),
    style(article.id).yellow()
  );

  let authors = article.author_list();
  let author_display = if authors.is_empty() {
    style("No authors listed").red().italic().to_string()
  } else {
    style(authors.join(", ")).white().to_string()
  };
  println!("   {} {}", style("Authors:").green(), author_display);

  let fields = db.fields_for(article.id).await?;
  if !fields.is_empty() {
    let fields =
      fields.iter().map(|f| format!("{} ({:.2})", f.field, f.confidence)).collect::<Vec<_>>().join(", ");
    println!("   {} {}", style("Fields:").green(), style(fields).cyan());
  }

  if article.has_usable_abstract() {
    println!(
      "   {} {}",
      style("Abstract:").green(),
      style(format::preview(&article.abstract_text, 100)).white().italic()
    );
  }
  println!("   {} {}", style("Link:").green(), style(&article.link).blue().underlined());
  Ok(())
}

/// Prints a logic graph.
fn print_graph(graph: &pulse::article::LogicGraph) {
  println!("\n{} Logic graph (updated {}):", style(GRAPH).green(), style(graph.updated_at).yellow());
  println!("{}", style(&graph.diagram).white());
  println!("\n{} {}", style("Verification:").green().bold(), style(&graph.verification).white());
}

#[tokio::main]
async fn main() -> Result<(), PulsedErrors> {
  let cli = Cli::parse();
  let _guard = setup_logging(cli.verbose, cli.log_dir.as_deref());

  let mut config = Config::load(cli.config.as_deref())?;
  let db_path = cli.path.clone().unwrap_or_else(|| config.database_path());
  trace!("Using database at: {}", db_path.display());

  match cli.command {
    Commands::Init => {
      if cli.path.is_none() {
        println!(
          "{} Using default database path: {}",
          style(BOOKS).cyan(),
          style(db_path.display()).yellow()
        );
      }

      if db_path.exists() {
        println!(
          "{} Database already exists at: {}",
          style(WARNING).yellow(),
          style(db_path.display()).yellow()
        );

        if cli.accept_defaults {
          Database::open(&db_path).await?;
          println!("{} Keeping existing database, schema is up to date", style("ℹ").blue());
          return Ok(());
        }

        if !confirm("Do you want to reinitialize this database? This will erase all existing data", false)?
          || !confirm_typed("INIT", "reinitialization", false)?
        {
          println!("{} Operation cancelled, keeping existing database", style("ℹ").blue());
          return Ok(());
        }

        println!("{} Removing existing database", style(WARNING).yellow());
        remove_database(&db_path)?;
      }

      println!(
        "{} Initializing database at: {}",
        style(ROCKET).cyan(),
        style(db_path.display()).yellow()
      );
      Database::open(&db_path).await?;
      println!("{} Database initialized successfully!", style(SUCCESS).green());
      Ok(())
    },

    Commands::Ingest { limit, no_graphs } => {
      if let Some(limit) = limit {
        config.ingest.per_journal_limit = limit;
      }
      if no_graphs {
        config.ingest.logic_graphs = false;
      }
      config.validate()?;

      println!(
        "{} Ingesting today's articles from {} journals",
        style(LOOKING_GLASS).cyan(),
        style(config.journals.len()).yellow()
      );
      let pipeline = build_pipeline(config, &db_path).await?;
      let report = pipeline.run_today().await;

      println!("\n{} Batch finished:", style(SUCCESS).green());
      for line in report.to_string().lines() {
        println!("   {}", style(line).white());
      }
      if report.failed > 0 {
        println!(
          "\n{} {} entries failed, see the logs for details",
          style(WARNING).yellow(),
          style(report.failed).red()
        );
      }
      Ok(())
    },

    Commands::Graph { id, regenerate } => {
      let db = Database::open(&db_path).await?;
      let Some(article) = db.article(id).await? else {
        println!("{} Article {} not found", style(WARNING).yellow(), style(id).yellow());
        return Ok(());
      };
      println!("{} {}", style(PAPER).green(), style(article.display_title()).white().bold());

      if !regenerate {
        if let Some(graph) = db.logic_graph(id).await? {
          print_graph(&graph);
          return Ok(());
        }
      }

      let pipeline = build_pipeline(config, &db_path).await?;
      let lookup = if regenerate {
        pipeline.regenerate_logic_graph(id).await?
      } else {
        pipeline.logic_graph_for(id).await?
      };
      match lookup {
        GraphLookup::Ready(graph) => print_graph(&graph),
        GraphLookup::Unavailable(reason) => {
          println!("{} No logic graph available: {}", style(WARNING).yellow(), style(reason).red());
        },
      }
      Ok(())
    },

    Commands::BackfillGraphs { limit } => {
      let pipeline = build_pipeline(config, &db_path).await?;
      println!("{} Generating missing logic graphs (up to {limit})", style(ROCKET).cyan());
      let report = pipeline.backfill_logic_graphs(limit).await?;
      println!("{} Backfill finished: {}", style(SUCCESS).green(), style(report).white());
      Ok(())
    },

    Commands::Reclassify { limit } => {
      let pipeline = build_pipeline(config, &db_path).await?;
      println!("{} Classifying articles without fields (up to {limit})", style(ROCKET).cyan());
      let report = pipeline.reclassify_unclassified(limit).await?;
      println!("{} Reclassification finished: {}", style(SUCCESS).green(), style(report).white());
      Ok(())
    },

    Commands::Recent { days, field } => {
      if let Some(field) = &field {
        config.taxonomy.require(field)?;
      }
      let db = Database::open(&db_path).await?;
      let today = chrono::Local::now().date_naive();
      let articles = db.recent_articles(days, field.as_deref(), today).await?;

      if articles.is_empty() {
        println!(
          "{} No articles from the last {} days",
          style(WARNING).yellow(),
          style(days).yellow()
        );
        return Ok(());
      }

      println!("{} Found {} articles:", style(SUCCESS).green(), style(articles.len()).yellow());
      for (i, article) in articles.iter().enumerate() {
        debug!("Article details: {:?}", article);
        print_article(&db, i + 1, article).await?;
      }
      Ok(())
    },

    Commands::Fields => {
      let db = Database::open(&db_path).await?;
      let fields = db.distinct_fields().await?;
      if fields.is_empty() {
        println!("{} No classified articles yet", style(WARNING).yellow());
        println!("   {} {}", style("Taxonomy:").green(), style(config.taxonomy.fields().join(", ")).white());
      } else {
        println!("{} Fields with articles:", style(BOOKS).cyan());
        for field in fields {
          println!("   {}", style(field).cyan());
        }
      }
      Ok(())
    },

    Commands::Clean => {
      if !db_path.exists() {
        println!(
          "{} No database found at: {}",
          style(WARNING).yellow(),
          style(db_path.display()).yellow()
        );
        return Ok(());
      }

      println!("{} Database found at: {}", style(WARNING).yellow(), style(db_path.display()).yellow());
      if !confirm("Are you sure you want to delete this database?", cli.accept_defaults)?
        || !confirm_typed("DELETE", "deletion", cli.accept_defaults)?
      {
        println!("{} Operation cancelled", style("✖").red());
        return Ok(());
      }

      println!("{} Removing database: {}", style(WARNING).yellow(), style(db_path.display()).yellow());
      remove_database(&db_path)?;
      println!("{} Database files cleaned", style(SUCCESS).green());
      Ok(())
    },
  }
}
