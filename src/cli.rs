use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP server
    Serve {
        /// Address to listen on (overrides server.listen)
        #[clap(short, long)]
        listen: Option<String>,
    },

    /// Index a found item
    Add {
        /// Unique item id
        #[clap(long)]
        id: String,

        /// What was found and where
        #[clap(short, long)]
        description: String,

        /// Item category (e.g. Wallet, Phone)
        #[clap(short, long)]
        category: String,
    },

    /// Match a lost item description against found items
    Search {
        /// Lost item description
        text: String,

        /// Boost items in this category
        #[clap(short, long)]
        category: Option<String>,

        /// Maximum number of matches
        #[clap(short, long)]
        limit: Option<usize>,
    },

    /// Drop cached vectors and embed every stored item again
    Reindex {},
}
