use clap::{ArgAction, Parser, Subcommand};
use serversync::config::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "serversync")]
#[command(about = "Keep client directories identical to a server's copy", long_about = None)]
#[command(version)]
#[command(after_help = "EXAMPLES:
    # Serve ./mods and ./config from the current directory
    serversync server --root . --dir mods --dir config

    # Sync against a server, keeping local optifine jars
    serversync client --server play.example.com:38067 --ignore 'mods/optifine*.jar'

CONFIG:
    Defaults are read from ~/.config/serversync/config.toml when present.
    Command line options override the file.")]
pub struct Cli {
    /// Verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of the default location
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the managed directories to clients
    Server {
        /// Address to listen on (host:port)
        #[arg(short, long)]
        listen: Option<String>,

        /// Directory containing the managed directories
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Managed directory relative to the root (repeatable)
        #[arg(short, long = "dir", value_name = "DIR")]
        dirs: Vec<String>,
    },

    /// Sync the local managed directories from a server
    Client {
        /// Server address (host:port)
        #[arg(short, long)]
        server: Option<String>,

        /// Directory the managed directories are synced into
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Glob protecting local files from deletion (repeatable)
        #[arg(short, long, value_name = "GLOB")]
        ignore: Vec<String>,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },
}

impl Cli {
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Config file contents with command line overrides applied.
    pub fn resolve_config(&self) -> serversync::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::load_default()?,
        };

        match &self.command {
            Command::Server { listen, root, dirs } => {
                if let Some(listen) = listen {
                    config.server.listen = listen.clone();
                }
                if let Some(root) = root {
                    config.server.root = root.clone();
                }
                if !dirs.is_empty() {
                    config.server.directories = dirs.clone();
                }
            }
            Command::Client {
                server,
                root,
                ignore,
                ..
            } => {
                if let Some(server) = server {
                    config.client.server = server.clone();
                }
                if let Some(root) = root {
                    config.client.root = root.clone();
                }
                config.client.ignore.extend(ignore.iter().cloned());
            }
        }
        Ok(config)
    }
}
