//! # LabelSync CLI (`lsync`)
//!
//! The `lsync` binary drives the project loading core from the command line:
//! create projects, load image folders or files into them, re-validate and
//! prune stored data points.
//!
//! ## Usage
//!
//! ```bash
//! lsync --config ./config/lsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lsync init` | Create the SQLite database and schema |
//! | `lsync create <name> --type bbox` | Register and persist a project |
//! | `lsync list` | List projects with status and progress |
//! | `lsync load <name> --type bbox --folder DIR` | Scan a folder into a project |
//! | `lsync load <name> --type seg --file A.png --file B.pdf` | Load chosen files |
//! | `lsync reload <name> --type bbox` | Re-validate stored data points |
//! | `lsync uuids <name> --type bbox` | Re-validate, then list readable UUIDs |
//! | `lsync data <name> --type bbox <uuid>` | One data point with thumbnail |
//! | `lsync image <name> --type bbox <uuid>` | Full image as a base64 data URL |
//! | `lsync update <name> --type bbox <uuid> --json FILE` | Save an annotation edit |
//! | `lsync delete-uuids <name> --type bbox <uuid>...` | Delete data points |
//! | `lsync delete <name> --type bbox` | Delete a project |
//!
//! Every command prints a reply envelope as JSON on stdout and exits with
//! status 1 when the reply is not ok. Logs and progress go to stderr;
//! `RUST_LOG` overrides the default `labelsync=info` filter.

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use labelsync::config;
use labelsync::error::{LoaderError, Result};
use labelsync::migrate;
use labelsync::models::{AnnotationType, DataPointUpdate, SelectionKind};
use labelsync::progress::ProgressMode;
use labelsync::reply::Reply;
use labelsync::traits::StaticSelection;
use labelsync::workspace::Workspace;

/// LabelSync CLI: keep annotation projects in step with image folders.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Only the `[db]` section is required.
#[derive(Parser)]
#[command(
    name = "lsync",
    about = "LabelSync: load image folders into annotation projects and keep them reconciled",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lsync.toml")]
    config: PathBuf,

    /// Progress output on stderr: `off`, `human` or `json`.
    ///
    /// Defaults to `human` when stderr is a terminal and `off` otherwise.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Register a new project.
    Create {
        name: String,
        /// Annotation type: `bbox` or `seg`.
        #[arg(long = "type")]
        annotation_type: String,
    },

    /// List projects with their loader status and progress.
    List,

    /// Load a folder or a set of files into a project.
    ///
    /// Folders are scanned recursively. PDFs contribute their pre-rendered
    /// pages (`<stem>_<n>.png`), capped by `loader.max_pdf_pages`.
    Load {
        name: String,
        #[arg(long = "type")]
        annotation_type: String,
        /// Folder to scan.
        #[arg(long, conflicts_with = "file")]
        folder: Option<PathBuf>,
        /// Individual image or PDF file. Repeatable.
        #[arg(long)]
        file: Vec<PathBuf>,
    },

    /// Re-validate the data points a project already stores.
    Reload {
        name: String,
        #[arg(long = "type")]
        annotation_type: String,
    },

    /// Re-validate a project and print the UUIDs whose images are readable.
    Uuids {
        name: String,
        #[arg(long = "type")]
        annotation_type: String,
    },

    /// Print one data point with image metadata and a thumbnail.
    Data {
        name: String,
        #[arg(long = "type")]
        annotation_type: String,
        uuid: String,
    },

    /// Print the full image of one data point as a base64 data URL.
    Image {
        name: String,
        #[arg(long = "type")]
        annotation_type: String,
        uuid: String,
    },

    /// Save an annotation edit for one data point.
    ///
    /// The JSON object carries `annotation` (an array) and optionally
    /// `img_depth`, `img_x`, `img_y`, `img_w`, `img_h`, `file_size`,
    /// `img_ori_w` and `img_ori_h`. Pass `-` to read it from stdin.
    Update {
        name: String,
        #[arg(long = "type")]
        annotation_type: String,
        uuid: String,
        #[arg(long = "json")]
        json: PathBuf,
    },

    /// Delete data points from a project.
    DeleteUuids {
        name: String,
        #[arg(long = "type")]
        annotation_type: String,
        #[arg(required = true)]
        uuids: Vec<String>,
    },

    /// Delete a project and all of its data points.
    Delete {
        name: String,
        #[arg(long = "type")]
        annotation_type: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "labelsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        let reply = Reply::ok(&serde_json::json!({ "db": cfg.db.path.display().to_string() }));
        println!("{}", serde_json::to_string_pretty(&reply)?);
        return Ok(());
    }

    let mode = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let workspace = Workspace::open(&cfg).await?.with_reporter(mode.reporter());

    let reply = Reply::from_result(&dispatch(&workspace, cli.command).await);
    println!("{}", serde_json::to_string_pretty(&reply)?);
    if !reply.ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn dispatch(ws: &Workspace, command: Commands) -> Result<Value> {
    match command {
        Commands::Init => Err(LoaderError::UserDefined(
            "init is handled before the workspace opens".to_string(),
        )),
        Commands::Create {
            name,
            annotation_type,
        } => to_json(ws.create_project(&name, parse_type(&annotation_type)?).await?),
        Commands::List => to_json(ws.list_projects()),
        Commands::Load {
            name,
            annotation_type,
            folder,
            file,
        } => {
            let annotation_type = parse_type(&annotation_type)?;
            let (kind, paths) = match folder {
                Some(dir) => (SelectionKind::Folder, vec![dir]),
                None if !file.is_empty() => (SelectionKind::File, file),
                None => {
                    return Err(LoaderError::UserDefined(
                        "Nothing selected: pass --folder DIR or --file PATH".to_string(),
                    ))
                }
            };
            let paths = paths
                .into_iter()
                .map(|p| std::fs::canonicalize(&p).unwrap_or(p))
                .collect();
            let picker = StaticSelection::new(paths);
            to_json(
                ws.load_project(&name, annotation_type, kind, &picker)
                    .await?,
            )
        }
        Commands::Reload {
            name,
            annotation_type,
        } => to_json(
            ws.reload_project(&name, parse_type(&annotation_type)?)
                .await?,
        ),
        Commands::Uuids {
            name,
            annotation_type,
        } => {
            let annotation_type = parse_type(&annotation_type)?;
            ws.reload_project(&name, annotation_type).await?;
            to_json(serde_json::json!({
                "uuid_list": ws.uuid_list(&name, annotation_type)?,
            }))
        }
        Commands::Data {
            name,
            annotation_type,
            uuid,
        } => to_json(
            ws.retrieve_data(&name, parse_type(&annotation_type)?, parse_uuid(&uuid)?)
                .await?,
        ),
        Commands::Image {
            name,
            annotation_type,
            uuid,
        } => to_json(
            ws.retrieve_data_path(&name, parse_type(&annotation_type)?, parse_uuid(&uuid)?)
                .await?,
        ),
        Commands::Update {
            name,
            annotation_type,
            uuid,
            json,
        } => {
            let annotation_type = parse_type(&annotation_type)?;
            let uuid = parse_uuid(&uuid)?;
            let update = read_update(&json)?;
            to_json(ws.update_data(&name, annotation_type, uuid, &update).await?)
        }
        Commands::DeleteUuids {
            name,
            annotation_type,
            uuids,
        } => {
            let annotation_type = parse_type(&annotation_type)?;
            let uuids = uuids
                .iter()
                .map(|s| parse_uuid(s))
                .collect::<Result<Vec<Uuid>>>()?;
            to_json(ws.delete_uuids(&name, annotation_type, &uuids).await?)
        }
        Commands::Delete {
            name,
            annotation_type,
        } => to_json(
            ws.delete_project(&name, parse_type(&annotation_type)?)
                .await?,
        ),
    }
}

fn parse_type(s: &str) -> Result<AnnotationType> {
    s.parse()
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| LoaderError::UserDefined(format!("Invalid uuid '{}': {}", s, e)))
}

fn read_update(source: &Path) -> Result<DataPointUpdate> {
    let text = if source == Path::new("-") {
        std::io::read_to_string(std::io::stdin())
    } else {
        std::fs::read_to_string(source)
    }
    .map_err(|e| {
        LoaderError::UserDefined(format!("Failed to read {}: {}", source.display(), e))
    })?;
    serde_json::from_str(&text)
        .map_err(|e| LoaderError::UserDefined(format!("Invalid annotation update: {}", e)))
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| LoaderError::UserDefined(format!("Failed to encode reply payload: {}", e)))
}
