use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use common::storage::types::task::{TaskSettings, DEFAULT_IMAGE_QUALITY};

#[derive(Debug, Parser)]
#[command(
    name = "taskdata",
    about = "Create annotation tasks, queue their media and inspect the result"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create an empty task with its directory tree
    CreateTask(CreateTaskArgs),
    /// Change the display name of a task
    Rename { task_id: String, name: String },
    /// Queue media for ingestion into an existing task
    Enqueue(EnqueueArgs),
    /// Show the ingestion state of a task
    Status { task_id: String },
    /// Print the original frame sizes, rebuilding the cache when needed
    Meta { task_id: String },
    /// Print the file that holds a frame
    Frame { task_id: String, frame: u64 },
    /// Run the ingestion worker until interrupted
    Worker,
}

#[derive(Debug, Clone, Args)]
pub struct CreateTaskArgs {
    #[arg(long)]
    pub name: String,

    /// Frames per segment; 0 puts every frame in one segment
    #[arg(long, default_value_t = 0)]
    pub segment_size: u32,

    /// Frames shared by neighbouring segments
    #[arg(long)]
    pub overlap: Option<u32>,

    /// JPEG quality for normalized frames (1-100)
    #[arg(long, default_value_t = DEFAULT_IMAGE_QUALITY)]
    pub image_quality: u8,

    /// Rotate every frame by 180 degrees
    #[arg(long)]
    pub flip: bool,
}

impl From<CreateTaskArgs> for TaskSettings {
    fn from(args: CreateTaskArgs) -> Self {
        Self {
            name: args.name,
            overlap: args.overlap,
            segment_size: args.segment_size,
            image_quality: args.image_quality,
            flipped: args.flip,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct EnqueueArgs {
    pub task_id: String,

    /// Local file to copy into the task's upload directory
    #[arg(long = "upload")]
    pub uploads: Vec<PathBuf>,

    /// Name of a file already present in the upload directory
    #[arg(long = "client-file")]
    pub client_files: Vec<String>,

    /// Path below the share root
    #[arg(long = "server-file")]
    pub server_files: Vec<String>,

    /// URL fetched by the worker
    #[arg(long = "remote-file")]
    pub remote_files: Vec<String>,
}
