use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use shesocial_core::models::{AdminLevel, Priority};
use shesocial_core::Collection;

#[derive(Parser)]
#[command(name = "shesocial")]
#[command(about = "Work with the SheSocial offline store and sync it with the API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Base URL of the SheSocial API (overrides SHESOCIAL_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Access token (overrides SHESOCIAL_TOKEN)
    #[arg(long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Refresh token (overrides SHESOCIAL_REFRESH_TOKEN)
    #[arg(long, global = true, value_name = "TOKEN")]
    pub refresh_token: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a document and queue it for upload
    #[command(alias = "new")]
    Add {
        #[arg(value_parser = parse_collection)]
        collection: Collection,
        /// Document fields as a JSON object
        fields: String,
        #[arg(long, value_enum, default_value_t = PriorityArg::Medium)]
        priority: PriorityArg,
    },
    /// Patch fields of an existing document
    Update {
        #[arg(value_parser = parse_collection)]
        collection: Collection,
        id: String,
        /// Fields to merge, as a JSON object
        fields: String,
        #[arg(long, value_enum, default_value_t = PriorityArg::Medium)]
        priority: PriorityArg,
    },
    /// Delete a document
    Delete {
        #[arg(value_parser = parse_collection)]
        collection: Collection,
        id: String,
        #[arg(long, value_enum, default_value_t = PriorityArg::Medium)]
        priority: PriorityArg,
    },
    /// Print one document as JSON
    Get {
        #[arg(value_parser = parse_collection)]
        collection: Collection,
        id: String,
    },
    /// List documents of a collection, most recently updated first
    List {
        #[arg(value_parser = parse_collection)]
        collection: Collection,
        /// Number of documents to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search member profiles on behalf of a member
    Search {
        query: String,
        /// Id of the member performing the search
        #[arg(long = "as", value_name = "USER_ID")]
        searcher: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// List events starting within a time range
    Events {
        /// Range start (Unix ms or RFC 3339)
        #[arg(long)]
        from: String,
        /// Range end (Unix ms or RFC 3339)
        #[arg(long)]
        to: String,
        #[arg(long)]
        json: bool,
    },
    /// List bookings made by a member
    Bookings {
        user_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Push queued changes, then pull server changes
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Show sync status
    Status {
        /// Probe the API before reporting
        #[arg(long)]
        probe: bool,
        #[arg(long)]
        json: bool,
    },
    /// Inspect the sync queue
    Queue {
        /// Show abandoned high-priority operations instead of pending ones
        #[arg(long)]
        failed: bool,
        #[arg(short, long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Inspect the built-in admin permission catalog
    Permissions {
        #[command(subcommand)]
        command: PermissionCommands,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Only drain the upload queue
    Push,
    /// Only pull server changes
    Pull {
        /// Limit the pull to one collection
        #[arg(long, value_parser = parse_collection)]
        collection: Option<Collection>,
    },
}

#[derive(Subcommand)]
pub enum PermissionCommands {
    /// List permission atoms
    Atoms {
        #[arg(long)]
        json: bool,
    },
    /// List roles and their atoms
    Roles {
        #[arg(long)]
        json: bool,
    },
    /// Check a set of atoms for conflicts and missing requirements
    Validate {
        #[arg(required = true)]
        atoms: Vec<String>,
    },
    /// Check whether an administrator profile holds an atom
    Check {
        atom: String,
        #[arg(long)]
        role: String,
        #[arg(long, value_enum, default_value_t = LevelArg::Staff)]
        level: LevelArg,
        /// Extra atoms granted outside the role, comma separated
        #[arg(long, value_delimiter = ',')]
        custom: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PriorityArg {
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::High => Self::High,
            PriorityArg::Medium => Self::Medium,
            PriorityArg::Low => Self::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LevelArg {
    Owner,
    Founder,
    Manager,
    Staff,
}

impl From<LevelArg> for AdminLevel {
    fn from(value: LevelArg) -> Self {
        match value {
            LevelArg::Owner => Self::Owner,
            LevelArg::Founder => Self::Founder,
            LevelArg::Manager => Self::Manager,
            LevelArg::Staff => Self::Staff,
        }
    }
}

fn parse_collection(raw: &str) -> Result<Collection, String> {
    raw.parse::<Collection>().map_err(|error| error.to_string())
}
