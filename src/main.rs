use dut_fleet_supervisor::cli::Cli;
use dut_fleet_supervisor::config::ServerConfig;
use dut_fleet_supervisor::logging::Logging;
use dut_fleet_supervisor::orchestrator::Orchestrator;

fn main() {
    let cli = Cli::init();

    if let Err(e) = Logging::try_init() {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(-1);
    }

    if cli.enable_curses() {
        tracing::warn!("--enable_curses was set but the curses dashboard is not implemented; ignoring");
    }

    if cli.print_debug_info() {
        println!("config path: {}", cli.config_path().display());
        println!("enable_curses: {}", cli.enable_curses());
        std::process::exit(0);
    }

    let config = match ServerConfig::load(&cli.config_path()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load server config");
            std::process::exit(-1);
        }
    };

    let outcome = Orchestrator::run(config);
    std::process::exit(outcome.code());
}
