//! Cohortgraph CLI: replay editing sessions against an in-memory dataset.
//!
//! Usage:
//!   cohortgraph run --dataset data.json --script intents.json [--workspace w] [--db path]
//!   cohortgraph show --workspace w [--db path]
//!   cohortgraph list [--db path]

use clap::{Parser, Subcommand};
use cohortgraph::{
    bloodline, describe, CohortFetcher, ControllerConfig, DataSource, Dataset,
    InMemoryCohortService, Intent, LineageStore, LineageSummary, MaterializationEngine,
    OpenStore, PreviewController, Snapshot, SnapshotStore, SqliteSnapshotStore,
};
use cohortgraph::session::ChannelSink;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Parser)]
#[command(
    name = "cohortgraph",
    version,
    about = "Cohort lineage graphs with preview-then-commit derivation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Log at DEBUG instead of INFO
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a script of intents against a dataset and save the confirmed graph
    Run {
        /// Dataset JSON: rows, optional score tables and panels, root label and source
        #[arg(long)]
        dataset: PathBuf,
        /// Script JSON: an array of intents; the root cohort is `cohort-1`
        #[arg(long)]
        script: PathBuf,
        /// Workspace name the snapshot is saved under
        #[arg(long, default_value = "default")]
        workspace: String,
        /// Controller configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print a saved workspace
    Show {
        #[arg(long, default_value = "default")]
        workspace: String,
    },
    /// List saved workspaces
    List,
}

/// Dataset file: the service's dataset plus how to label the root
#[derive(Deserialize)]
struct DatasetFile {
    #[serde(default = "default_root_label")]
    label: String,
    #[serde(default)]
    source: DataSource,
    #[serde(flatten)]
    dataset: Dataset,
}

fn default_root_label() -> String {
    "All".to_string()
}

/// Get the default database path (~/.local/share/cohortgraph/cohortgraph.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("cohortgraph").join("cohortgraph.db")
}

fn open_store(db: Option<PathBuf>) -> Result<SqliteSnapshotStore, String> {
    let db_path = db.unwrap_or_else(default_db_path);
    SqliteSnapshotStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| format!("cannot parse '{}': {}", path.display(), e))
}

fn print_graph(store: &LineageStore, history: usize) {
    print!("{}", LineageSummary::render(store));
    println!();
    let mut leaves: Vec<_> = store
        .cohorts()
        .filter(|c| c.children.is_empty() && !c.is_root)
        .map(|c| c.id.clone())
        .collect();
    leaves.sort();
    for leaf in leaves {
        if let Ok(line) = bloodline(store, &leaf) {
            println!("{}: {}", leaf, describe(&line));
        }
    }
    println!(
        "{} elements, {} confirmed tasks",
        store.len(),
        history
    );
}

fn cmd_run(
    store: &SqliteSnapshotStore,
    dataset: &Path,
    script: &Path,
    workspace: &str,
    config: Option<&Path>,
) -> i32 {
    let file: DatasetFile = match read_json(dataset) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let intents: Vec<Intent> = match read_json(script) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let config: ControllerConfig = match config.map(read_json::<ControllerConfig>).transpose() {
        Ok(c) => c.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let service = Arc::new(InMemoryCohortService::new(file.dataset));
        let (sink, mut events) = ChannelSink::new();
        let mut controller = PreviewController::new(
            Arc::new(Mutex::new(LineageStore::new())),
            MaterializationEngine::new(service.clone()),
            CohortFetcher::new(service.clone()),
            Arc::new(sink),
            config,
        );

        if let Err(e) = controller.select_dataset(&file.label, "", file.source).await {
            eprintln!("Error: cannot create root cohort: {}", e);
            return 1;
        }

        let mut failures = 0;
        for (step, intent) in intents.into_iter().enumerate() {
            match controller.dispatch(intent).await {
                Ok(outcome) => tracing::debug!(step, ?outcome, "intent handled"),
                Err(e) => {
                    failures += 1;
                    eprintln!("step {}: {}", step, e);
                }
            }
            while let Ok(event) = events.try_recv() {
                match serde_json::to_string(&event) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("cannot print event: {}", e),
                }
            }
        }

        let snapshot = {
            let lineage = match controller.store().lock() {
                Ok(l) => l,
                Err(_) => {
                    eprintln!("Error: lineage store lock poisoned");
                    return 1;
                }
            };
            println!();
            print_graph(&lineage, controller.task_history().len());
            Snapshot::capture(workspace, &lineage, controller.task_history())
        };

        match store.save(&snapshot) {
            Ok(()) => {
                println!("Saved workspace '{}'", workspace);
                if failures > 0 {
                    1
                } else {
                    0
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        }
    })
}

fn cmd_show(store: &SqliteSnapshotStore, workspace: &str) -> i32 {
    let snapshot = match store.load(workspace) {
        Ok(Some(s)) => s,
        Ok(None) => {
            eprintln!("Error: workspace '{}' not found", workspace);
            return 1;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match snapshot.restore() {
        Ok(lineage) => {
            println!("Workspace '{}' saved {}", workspace, snapshot.saved_at.to_rfc3339());
            print_graph(&lineage, snapshot.history.len());
            for (i, task) in snapshot.history.iter().enumerate() {
                if let Ok(t) = lineage.task(task) {
                    println!("{:>3}. {} {} ({})", i + 1, t.kind, t.label, task);
                }
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_list(store: &SqliteSnapshotStore) -> i32 {
    let infos = match store.list() {
        Ok(infos) => infos,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if infos.is_empty() {
        println!("No workspaces saved.");
        return 0;
    }
    println!("{:<24}  {:<25}  {:>8}  {:>5}", "WORKSPACE", "SAVED", "ELEMENTS", "TASKS");
    println!("{}", "-".repeat(68));
    for info in infos {
        println!(
            "{:<24}  {:<25}  {:>8}  {:>5}",
            info.workspace,
            info.saved_at.format("%Y-%m-%d %H:%M:%S UTC"),
            info.elements,
            info.history
        );
    }
    0
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    let store = match open_store(cli.db) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let code = match cli.command {
        Commands::Run {
            dataset,
            script,
            workspace,
            config,
        } => cmd_run(&store, &dataset, &script, &workspace, config.as_deref()),
        Commands::Show { workspace } => cmd_show(&store, &workspace),
        Commands::List => cmd_list(&store),
    };
    std::process::exit(code);
}
