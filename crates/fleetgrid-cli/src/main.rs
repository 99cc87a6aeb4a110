//! fleetgrid console binary.
//!
//! Mounts a windowed view over the vehicle or owner collection of a fleet
//! server and prints it.
//!
//! Usage:
//!   # One window, sorted and filtered
//!   fleetgrid rows vehicles --sort fuelConsumption:desc --filter 'fuelConsumption>10' --end 20
//!
//!   # Follow live changes through the push channel
//!   fleetgrid watch persons
//!
//!   # Delete an owner, moving their vehicles to owner 9 if needed
//!   fleetgrid delete-person 7 --reassign-to 9
//!
//!   # Preset queries
//!   fleetgrid min-distance
//!   fleetgrid count-fuel 10
//!
//! Configuration comes from `~/.config/fleetgrid/console.ron` (see
//! `ConsoleConfig`); flags override it. Set `RUST_LOG=fleetgrid_client=debug`
//! for cache and reconnect tracing.

mod expr;
mod table;

use std::ops::Range;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use fleetgrid_client::{
    ChannelOptions, ConsoleConfig, DataView, HttpBackend, InvalidationChannel, NullSink,
    ReassignmentWorkflow, RowsOutcome, ViewControls, WorkflowState, WsConnector,
};
use fleetgrid_types::{Collection, FilterSpec, RecordId, SortSpec};
use tracing_subscriber::{EnvFilter, fmt};

use crate::table::TableSink;

/// Terminal console for fleetgrid collections.
#[derive(Parser, Debug)]
#[command(name = "fleetgrid")]
#[command(about = "Windowed, live-refreshing views over fleet records")]
struct Args {
    /// Config file (RON). Defaults to the platform config dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// REST base URL, e.g. http://localhost:8080
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Rows per cached block
    #[arg(long, global = true)]
    block_size: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct QueryArgs {
    /// Sort key as field[:asc|desc]; repeat for secondary keys
    #[arg(long = "sort")]
    sort: Vec<String>,

    /// Filter expression such as 'fuelConsumption>10' or 'enginePower=100..250'
    #[arg(long = "filter")]
    filter: Vec<String>,

    /// Columns to print (dotted paths allowed); defaults to every top-level field
    #[arg(long = "column", short = 'c')]
    columns: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and print one row window
    Rows {
        /// vehicles or persons
        collection: Collection,
        #[command(flatten)]
        query: QueryArgs,
        #[arg(long, default_value_t = 0)]
        start: u64,
        /// Exclusive end row; defaults to one block past --start
        #[arg(long)]
        end: Option<u64>,
    },
    /// Print the first window and reprint it whenever the server pushes a change
    Watch {
        collection: Collection,
        #[command(flatten)]
        query: QueryArgs,
        /// Window height
        #[arg(long)]
        rows: Option<u64>,
    },
    /// Delete an owner, resolving reference conflicts by reassignment
    DeletePerson {
        id: i64,
        /// Owner that takes over the deleted owner's vehicles
        #[arg(long)]
        reassign_to: Option<i64>,
        /// Name fragment used to list replacement candidates on conflict
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Print the vehicle with the smallest recorded distance
    MinDistance,
    /// Count vehicles whose fuel consumption exceeds a threshold
    CountFuel {
        /// Threshold, greater than zero
        threshold: f64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<ConsoleConfig> {
    let path = args.config.clone().or_else(ConsoleConfig::default_path);
    let mut config = match &path {
        Some(path) => ConsoleConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => ConsoleConfig::default(),
    };
    if let Some(api_base) = &args.api_base {
        config.api_base = api_base.clone();
    }
    if let Some(block_size) = args.block_size {
        config.block_size = block_size;
    }
    config.validate()?;
    Ok(config)
}

/// Rows `start..end`; without `--end`, one block from `start`.
fn row_window(start: u64, end: Option<u64>, block_size: u64) -> Result<Range<u64>> {
    let end = end.unwrap_or(start.saturating_add(block_size));
    if end <= start {
        bail!("--end must be greater than --start");
    }
    Ok(start..end)
}

fn build_query(collection: Collection, args: &QueryArgs) -> Result<(SortSpec, FilterSpec)> {
    let sort = if args.sort.is_empty() {
        collection.default_sort()
    } else {
        args.sort.iter().try_fold(SortSpec::new(), |spec, expr| {
            let (field, direction) = expr::parse_sort(expr)?;
            Ok::<_, expr::ExprError>(spec.then(field, direction))
        })?
    };
    let mut filter = FilterSpec::new();
    for expr in &args.filter {
        let (field, predicate) = expr::parse_filter(expr)?;
        filter.insert(field, predicate);
    }
    Ok((sort, filter))
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load_config(&args)?;
    let backend = Arc::new(HttpBackend::from_config(&config)?);

    match args.command {
        Command::Rows { collection, query, start, end } => {
            let (sort, filter) = build_query(collection, &query)?;
            let window = row_window(start, end, config.block_size)?;
            let sink = Arc::new(TableSink::new(query.columns));
            let view = DataView::from_config(collection, backend, sink, &config);
            view.replace_query(sort, filter);
            view.set_viewport(window);
            match view.refresh_visible().await {
                RowsOutcome::Failed(e) => Err(e.into()),
                _ => Ok(ExitCode::SUCCESS),
            }
        }

        Command::Watch { collection, query, rows } => {
            let (sort, filter) = build_query(collection, &query)?;
            let sink = Arc::new(TableSink::new(query.columns));
            let view = DataView::from_config(collection, backend, sink, &config);
            view.replace_query(sort, filter);
            view.set_viewport(0..rows.unwrap_or(config.block_size));
            view.refresh_visible().await;

            let url = collection.push_url(&config.api_base)?;
            let channel = InvalidationChannel::spawn(
                Arc::new(WsConnector),
                url.clone(),
                view.clone(),
                ChannelOptions::from(&config),
            );
            let mut status = channel.subscribe();
            tracing::info!(%url, "watching; Ctrl-C to stop");
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = *status.borrow_and_update();
                        tracing::debug!(?current, "push channel status");
                    }
                }
            }
            channel.stop();
            Ok(ExitCode::SUCCESS)
        }

        Command::DeletePerson { id, reassign_to, search } => {
            let persons = ViewControls::new(DataView::from_config(
                Collection::Persons,
                backend.clone(),
                Arc::new(NullSink),
                &config,
            ));
            let vehicles = ViewControls::new(DataView::from_config(
                Collection::Vehicles,
                backend,
                Arc::new(NullSink),
                &config,
            ));
            let workflow = ReassignmentWorkflow::new(persons, vec![vehicles]);

            let ctx = match workflow.delete(RecordId(id)).await? {
                WorkflowState::ConflictNeedsReassign(ctx) => ctx,
                _ => {
                    println!("deleted person {id}");
                    return Ok(ExitCode::SUCCESS);
                }
            };

            let Some(target) = reassign_to else {
                println!(
                    "person {id} is still referenced by {} vehicle(s); pass --reassign-to <id>",
                    ctx.blocking_ref_count
                );
                let candidates = workflow.search_candidates(&search).await?;
                if !candidates.is_empty() {
                    println!("candidates:");
                    for person in candidates {
                        println!("  {:>6}  {}", person.id.0, person.full_name);
                    }
                }
                workflow.cancel();
                return Ok(ExitCode::FAILURE);
            };

            workflow.select_replacement(RecordId(target))?;
            workflow.confirm().await?;
            println!(
                "moved {} vehicle(s) to person {target} and deleted person {id}",
                ctx.blocking_ref_count
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::MinDistance => {
            let vehicles = vehicle_controls(backend, &config);
            match vehicles.min_distance_vehicle().await? {
                Some(vehicle) => println!("{}", serde_json::to_string_pretty(&vehicle)?),
                None => println!("no vehicle has a recorded distance"),
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::CountFuel { threshold } => {
            let vehicles = vehicle_controls(backend, &config);
            let count = vehicles.count_fuel_consumption_above(threshold).await?;
            println!("{count} vehicle(s) with fuel consumption above {threshold}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn vehicle_controls(backend: Arc<HttpBackend>, config: &ConsoleConfig) -> ViewControls {
    ViewControls::new(DataView::from_config(Collection::Vehicles, backend, Arc::new(NullSink), config))
}
