use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod errors;

pub use commands::{parse_categories, run};

#[derive(Parser, Debug)]
#[command(version, about = "Visual and semantic jewelry search", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate cli docs in markdown format
    #[cfg(feature = "markdown-docs")]
    #[clap(hide = true)]
    MarkdownDocs {},

    /// Start the HTTP API.
    Serve {},

    /// Embed the catalog and update the vector cache.
    Index {
        /// Drop the vector cache and embed every image again
        #[clap(long, default_value = "false")]
        rebuild: bool,
    },

    /// Search the catalog with a text query
    Search {
        /// e.g. "gold ring without diamonds"
        query: String,

        /// Comma separated category allow-list
        #[clap(short, long)]
        category: Option<String>,

        /// Number of results
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Drop results more decorated than this (0..1)
        #[clap(long)]
        max_decoration: Option<f32>,

        /// Drop results plainer than this (0..1)
        #[clap(long)]
        min_plain: Option<f32>,

        /// Neighbors fetched before filtering
        #[clap(long)]
        pool: Option<usize>,

        /// Print the full response as json
        #[clap(long, default_value = "false")]
        json: bool,

        /// Results shown before asking to show more
        #[clap(long, default_value_t = crate::view::DEFAULT_PAGE_SIZE)]
        page_size: usize,
    },

    /// Items similar to a catalog item
    Recommend {
        id: u64,

        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Only recommend items of the same category
        #[clap(short, long, default_value = "false")]
        same_category: bool,
    },

    /// Search the catalog with an image file
    Image {
        path: PathBuf,

        /// Text describing what to look for
        #[clap(short, long)]
        text: Option<String>,

        /// Comma separated category allow-list
        #[clap(short, long)]
        category: Option<String>,

        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Skip reading text out of the image
        #[clap(long, default_value = "false")]
        no_ocr: bool,
    },

    /// Show categories and item counts
    Categories {},
}
