use clap::{Parser, Subcommand, ValueEnum};
use quire::query::meta_projection;
use quire::{ContentStore, Filter, Page, QuireError, Strictness};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process;

/// Quire CLI: build, check and query a content tree from the command line
#[derive(Parser)]
#[command(name = "quire", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "content.yaml")]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Build the index and print the build report
    Build {
        /// Fail on any excluded file
        #[arg(long, conflicts_with = "lenient")]
        strict: bool,
        /// Exclude offending files and index the rest
        #[arg(long)]
        lenient: bool,
    },

    /// Report every offending file without failing
    Check,

    /// Get a single record by slug
    Get {
        /// Collection name
        collection: String,
        /// Record slug
        slug: String,
        /// Locale to look up (falls back to the default locale)
        #[arg(long)]
        locale: Option<String>,
    },

    /// List the records of a collection in order
    List {
        /// Collection name
        collection: String,
        #[arg(long)]
        locale: Option<String>,
        /// Field filters (e.g. --filter draft=false)
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
        /// Page number, starting at 1
        #[arg(long, requires = "per_page")]
        page: Option<usize>,
        #[arg(long)]
        per_page: Option<usize>,
        /// Only print these fields (comma separated)
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },

    /// Show configured collections and record counts
    Status,

    /// Rebuild incrementally whenever content files change
    Watch,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((key.to_string(), value.to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        if let QuireError::RebuildFailed { report, .. } = &e {
            eprint!("{report}");
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> quire::Result<()> {
    match cli.command {
        Command::Build { strict, lenient } => {
            let mut store = ContentStore::load(&cli.config)?;
            if strict {
                store.set_strictness(Strictness::Strict);
            } else if lenient {
                store.set_strictness(Strictness::Lenient);
            }
            let report = store.rebuild()?;
            print_output(&report, &cli.format)?;
        }

        Command::Check => {
            let store = ContentStore::load(&cli.config)?;
            let report = store.check()?;
            print_output(&report, &cli.format)?;
        }

        Command::Get {
            collection,
            slug,
            locale,
        } => {
            let store = open_lenient(&cli.config)?;
            let found = store
                .query()
                .get_by_slug(&collection, locale.as_deref(), &slug)?;
            print_output(
                &json!({ "fallback": found.fallback, "record": found.record.to_json() }),
                &cli.format,
            )?;
        }

        Command::List {
            collection,
            locale,
            filters,
            page,
            per_page,
            fields,
        } => {
            let store = open_lenient(&cli.config)?;
            let filter = filters
                .into_iter()
                .map(|(key, value)| Filter::eq(key, parse_value(&value)))
                .reduce(Filter::and);
            let page = per_page.map(|size| Page::new(page.unwrap_or(1), size));

            let listing = store
                .query()
                .list(&collection, locale.as_deref(), filter, page)?;
            let field_names: Vec<&str> = fields.iter().map(String::as_str).collect();
            let items: Vec<Value> = listing
                .iter()
                .map(|record| {
                    if field_names.is_empty() {
                        Ok(record.to_json())
                    } else {
                        serde_json::to_value(meta_projection(record, &field_names))
                    }
                })
                .collect::<Result<_, _>>()?;

            print_output(
                &json!({
                    "collection": collection,
                    "locale": listing.locale(),
                    "total": listing.total(),
                    "page": listing.page(),
                    "items": items,
                }),
                &cli.format,
            )?;
        }

        Command::Status => {
            let store = open_lenient(&cli.config)?;
            print_output(&store.status(), &cli.format)?;
        }

        Command::Watch => {
            let store = open_lenient(&cli.config)?;
            let watcher = store.watch()?;
            log::info!("Watching {} for changes", store.root().display());

            while let Some(batch) = watcher.next_batch() {
                match store.apply_events(&batch) {
                    Ok(report) if report.is_clean() => {}
                    Ok(report) => eprint!("{report}"),
                    Err(QuireError::Cancelled) => log::debug!("Change batch superseded"),
                    Err(e) => log::error!("Rebuild after change failed: {e}"),
                }
            }
        }
    }

    Ok(())
}

/// Open the store for reading. Offending files are left out rather than
/// aborting the command.
fn open_lenient(config: &Path) -> quire::Result<ContentStore> {
    let mut store = ContentStore::load(config)?;
    store.set_strictness(Strictness::Lenient);
    let report = store.rebuild()?;
    if !report.is_clean() {
        log::warn!("{} file(s) excluded from the index", report.issue_count());
    }
    Ok(store)
}

/// Filter values are read as JSON when they parse (numbers, booleans, arrays),
/// otherwise as plain strings.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_output<T: Serialize>(value: &T, format: &OutputFormat) -> quire::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
