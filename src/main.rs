use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use project_tree::archive;
use project_tree::blocking::{BlockingTask, ProgressEvent};
use project_tree::config::TreeConfig;
use project_tree::metadata::{ChannelDelivery, CollectingConsumer, MetadataEngine, MetadataRegistry};
use project_tree::tree::{render_tree, Project, Task, TaskType};

#[derive(Parser)]
#[command(name = "ptree")]
#[command(about = "Inspect, package and unpack project folders")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the member tree of a project
    Tree {
        /// Project folder
        project: PathBuf,
    },
    /// Resolve a file to its project member
    Find {
        /// Project folder
        project: PathBuf,
        /// File inside the project
        file: PathBuf,
    },
    /// Pack a project folder into an archive
    Pack {
        /// Folder to pack
        folder: PathBuf,
        /// Archive to write
        archive: PathBuf,
    },
    /// Unpack an archive and print the project folder it contains
    Unpack {
        /// Archive to read
        archive: PathBuf,
        /// Folder to extract into
        #[arg(long, default_value = ".")]
        into: PathBuf,
    },
    /// Show the metadata of a member
    Info {
        /// Project folder
        project: PathBuf,
        /// File inside the project
        file: PathBuf,
    },
    /// Mark a folder as a task
    Init {
        /// Folder to mark
        folder: PathBuf,
        /// Task type tag
        #[arg(long = "type", default_value = "PROJECT")]
        task_type: String,
    },
}

/// Initialize tracing with output to stderr so stdout carries only results.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "project_tree=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_progress(event: ProgressEvent) {
    match event {
        ProgressEvent::Begin(total) => eprintln!("{} entries", total),
        ProgressEvent::Step(entry) => eprintln!("  {}", entry),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let config = TreeConfig::load();

    match cli.command {
        Commands::Tree { project } => {
            let project = Project::open(&project)?;
            project.root().synchronize_all()?;
            print!("{}", render_tree(project.root()));
        }
        Commands::Find { project, file } => {
            let project = Project::open(&project)?;
            match project.find_member(&file) {
                Some(member) => println!("{} ({:?})", member.path().display(), member.kind()),
                None => {
                    println!("not found");
                    std::process::exit(1);
                }
            }
        }
        Commands::Pack { folder, archive: output } => {
            let summary = BlockingTask::spawn(move |progress| {
                archive::pack(&folder, &output, &config, progress)
            })
            .run(print_progress)
            .await??;
            println!(
                "{} files, {} folders, {} bytes",
                summary.files, summary.directories, summary.bytes
            );
        }
        Commands::Unpack { archive: input, into } => {
            let unpacked = BlockingTask::spawn(move |progress| {
                archive::unpack(&input, Some(&into), &config, progress)
            })
            .run(print_progress)
            .await??;
            println!("{}", unpacked.root().display());
        }
        Commands::Info { project, file } => {
            let project = Project::open(&project)?;
            let Some(member) = project.find_member(&file) else {
                println!("not found");
                std::process::exit(1);
            };

            let delivery = Arc::new(ChannelDelivery::new());
            let engine = MetadataEngine::spawn(&config, delivery.clone())?;
            let registry = MetadataRegistry::with_defaults(&engine);
            let consumer = CollectingConsumer::new();

            registry.fill_in_metadata(&member, consumer.clone());
            let deadline = Instant::now() + Duration::from_secs(10);
            while consumer.done_count() == 0 && Instant::now() < deadline {
                delivery.pump_one(Duration::from_millis(50));
            }

            for (label, value) in consumer.properties() {
                println!("{:<12} {}", label, value);
            }
        }
        Commands::Init { folder, task_type } => {
            Task::create(&folder, TaskType::from_str(&task_type))?;
            println!("{} is now a {} folder", folder.display(), task_type);
        }
    }

    Ok(())
}
