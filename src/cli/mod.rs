use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)] // Read from `Cargo.toml`
pub struct Cli {
    #[arg(short, long, default_value_t = String::from("./server_parameters.yaml"))]
    config: String,

    /// Accepted for compatibility with the Python server's flag; the curses dashboard
    /// is out of scope here, so this only emits a warning.
    #[arg(long)]
    enable_curses: bool,

    #[arg(long)]
    print_debug_info: bool,
}

impl Cli {
    /// Parses command line arguments
    pub fn init() -> Self {
        Self::parse()
    }

    pub fn config_path(&self) -> PathBuf {
        PathBuf::from(&self.config)
    }

    pub fn enable_curses(&self) -> bool {
        self.enable_curses
    }

    pub fn print_debug_info(&self) -> bool {
        self.print_debug_info
    }
}
