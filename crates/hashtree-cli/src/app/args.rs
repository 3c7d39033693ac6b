use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "htree")]
#[command(version)]
#[command(about = "Content-addressed filesystem", long_about = None)]
pub(crate) struct Cli {
    /// Data directory (default: ~/.hashtree/data)
    #[arg(long, global = true, env = "HTREE_DATA_DIR")]
    pub(crate) data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

impl Cli {
    /// Get the data directory, defaulting to ~/.hashtree/data
    pub(crate) fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| hashtree_cli::config::get_hashtree_dir().join("data"))
    }
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Add a file or directory to the hashtree (like ipfs add)
    Add {
        /// Path to file or directory
        path: PathBuf,
        /// Store without encryption (public, unencrypted)
        #[arg(long)]
        public: bool,
        /// Include files ignored by .gitignore (default: respect .gitignore)
        #[arg(long)]
        no_ignore: bool,
        /// Publish to Nostr under this ref name (e.g., "mydata" -> npub.../mydata)
        #[arg(long)]
        publish: Option<String>,
    },

    /// Get/download content by CID
    Get {
        /// Target: nhash1..., <hex>[:<key>], or npub.../name[/path]
        target: String,
        /// Output path (default: current dir, uses hash as filename)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Output file content to stdout (like cat)
    Cat {
        /// Target: nhash1..., <hex>[:<key>], or npub.../name[/path]
        target: String,
    },

    /// List a directory's entries
    Ls {
        /// Target: nhash1..., <hex>[:<key>], or npub.../name[/path]
        target: String,
    },

    /// Resolve a CLI-facing target to its hash (and key, if any)
    Resolve {
        /// Target: nhash1..., <hex>[:<key>], or npub.../name[/path]
        target: String,
        /// Nostr relays to resolve against (comma-separated)
        #[arg(long)]
        relays: Option<String>,
    },

    /// Publish a hash to Nostr under a ref name, optionally pushing to Blossom servers
    Publish {
        /// The ref name to publish under (e.g., "mydata" -> npub.../mydata)
        ref_name: String,
        /// The hash to publish (hex encoded)
        hash: String,
        /// Optional decryption key (hex encoded, for encrypted content)
        #[arg(long)]
        key: Option<String>,
        /// Also push the tree's blocks to configured Blossom servers
        #[arg(long)]
        push: bool,
        /// Nostr relays to publish to (comma-separated)
        #[arg(long)]
        relays: Option<String>,
    },

    /// Verify a tree's blocks are present and its hashes check out
    Verify {
        /// Target: nhash1..., <hex>[:<key>], or npub.../name[/path]
        target: String,
    },

    /// Show connected P2P peers on a running daemon
    Peers {
        /// Daemon address (default: 127.0.0.1:8080)
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
    },

    /// Start the hashtree daemon (HTTP server + P2P exchange)
    #[command(alias = "start")]
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
        /// Override Nostr relays (comma-separated)
        #[arg(long)]
        relays: Option<String>,
    },
}
