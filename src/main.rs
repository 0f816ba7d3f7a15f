//! testvault CLI

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use testvault::repo::{TestFilter, TestStatus};
use testvault::{ParsedPath, Vault};

#[derive(Parser)]
#[command(name = "testvault")]
#[command(about = "A transactional file-backed store for tests, executions and recordings", long_about = None)]
struct Cli {
    /// Storage root (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage layout and a default config file
    Init,

    /// Show projects and entity counts
    Status,

    /// Rebuild indexes from entity directories
    Reconcile {
        /// Only this project (default: every project)
        #[arg(short, long)]
        project: Option<String>,
    },

    /// List tests of a project
    Tests {
        #[arg(short, long)]
        project: String,

        /// Tag to filter by (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Require every tag instead of any
        #[arg(long)]
        match_all: bool,

        /// draft, active or deprecated
        #[arg(short, long)]
        status: Option<TestStatus>,

        /// Name pattern, `%` and `_` wildcards
        #[arg(short, long)]
        name: Option<String>,

        /// Substring of name or description
        #[arg(long)]
        text: Option<String>,
    },

    /// Classify a logical path and print what it holds
    Inspect {
        /// e.g. projects/3/tests/_tags.json
        path: String,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init_vault(&cli.root),
        Commands::Status => show_status(&cli.root),
        Commands::Reconcile { project } => reconcile(&cli.root, project.as_deref()),
        Commands::Tests {
            project,
            tags,
            match_all,
            status,
            name,
            text,
        } => {
            let filter = TestFilter {
                tags,
                match_all_tags: match_all,
                status,
                name_pattern: name,
                text,
                ..Default::default()
            };
            list_tests(&cli.root, &project, &filter)
        }
        Commands::Inspect { path } => inspect(&cli.root, &path),
    }
}

fn open(root: &Path) -> anyhow::Result<Vault> {
    Vault::open(root).with_context(|| format!("failed to open vault at {}", root.display()))
}

fn init_vault(root: &Path) -> anyhow::Result<()> {
    println!("Initializing testvault at {:?}...", root);
    let vault = Vault::init(root)?;

    println!("Vault initialized successfully!");
    println!();
    println!("Directory structure:");
    println!("  projects/               - One directory per project");
    println!("  .testvault/config.yaml  - Lock and durability settings");
    println!();
    println!("Lock timeout: {:?}", vault.config().lock_timeout());
    Ok(())
}

fn show_status(root: &Path) -> anyhow::Result<()> {
    let vault = open(root)?;

    println!("testvault Status");
    println!("================");
    println!("Path: {:?}", vault.root());
    println!();

    let projects = vault.list_projects()?;
    if projects.is_empty() {
        println!("No projects found.");
        return Ok(());
    }

    for project in projects {
        let status = vault.project_status(&project)?;
        println!("{} ({} entities)", status.project, status.total());
        for (kind, count) in &status.counts {
            println!("  {:<12} {}", kind.dir_name(), count);
        }
    }
    Ok(())
}

fn reconcile(root: &Path, project: Option<&str>) -> anyhow::Result<()> {
    let vault = open(root)?;
    let reports = match project {
        Some(project) => vault.reconcile_project(project)?,
        None => vault.reconcile_all()?,
    };

    if reports.is_empty() {
        println!("Nothing to reconcile.");
        return Ok(());
    }

    for report in &reports {
        let state = if report.is_clean() { "ok" } else { "repaired" };
        println!(
            "{}/{}: {} indexed, {}",
            report.project,
            report.kind.dir_name(),
            report.indexed,
            state
        );
        for id in &report.added {
            println!("  + {}", id);
        }
        for id in &report.removed {
            println!("  - {}", id);
        }
        for path in &report.corrupt {
            println!("  ! corrupt: {}", path);
        }
        for id in &report.missing_document {
            println!("  ? no document: {}", id);
        }
    }
    Ok(())
}

fn list_tests(root: &Path, project: &str, filter: &TestFilter) -> anyhow::Result<()> {
    let vault = open(root)?;
    let tests = vault.tests().find_by_filters(project, filter)?;

    if tests.is_empty() {
        println!("No tests found.");
        return Ok(());
    }

    for test in &tests {
        let tags: Vec<&str> = test.tags.iter().map(String::as_str).collect();
        println!(
            "{}  [{}]  {}  {}",
            test.id,
            test.status,
            test.name,
            tags.join(",")
        );
    }
    println!("({} test(s))", tests.len());
    Ok(())
}

fn inspect(root: &Path, path: &str) -> anyhow::Result<()> {
    let parsed = vaultpath::parse(path).with_context(|| format!("not a vault path: {}", path))?;
    let vault = open(root)?;
    let store = vault.store();

    println!("{}: {:?}", path, parsed);
    match parsed {
        ParsedPath::Entity { .. } | ParsedPath::IdIndex { .. } | ParsedPath::InvertedIndex { .. } => {
            match store.read::<serde_json::Value>(path)? {
                Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
                None => println!("(absent)"),
            }
        }
        ParsedPath::Attachment { .. } => match store.read_bytes(path)? {
            Some(bytes) => println!("{} bytes", bytes.len()),
            None => println!("(absent)"),
        },
        ParsedPath::Root
        | ParsedPath::Project { .. }
        | ParsedPath::KindDir { .. }
        | ParsedPath::EntityDir { .. } => {
            for name in store.list_dir(path)? {
                println!("  {}", name);
            }
        }
    }
    Ok(())
}
