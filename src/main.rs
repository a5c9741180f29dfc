use std::io::stdout;
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rowscope::config::context::build_context;
use rowscope::config::schema::{load_config, LogFormat};
use rowscope::utils::run_one_off_command;

const DEFAULT_LOG_FILTER: &str = "rowscope=info,warn";

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long = "config", default_value = "rowscope.toml")]
    config_path: PathBuf,

    #[clap(
        help = "Command to run, e.g. `tables public` or `browse public readings 2`",
        required = true,
        multiple_values = true
    )]
    command: Vec<String>,
}

fn prepare_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);

    let installed = match format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish()),
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
    };
    installed.expect("Error installing the tracing subscriber");

    // sqlx logs through the `log` crate
    tracing_log::LogTracer::init().expect("Error bridging log records into tracing");
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config from {:?}: {e}", args.config_path);
            exit(1);
        }
    };
    prepare_tracing(config.misc.log_format);
    info!("Starting rowscope {}", env!("CARGO_PKG_VERSION"));

    let context = match build_context(config).await {
        Ok(context) => context,
        Err(e) => {
            error!("Error connecting to the store: {e}");
            exit(1);
        }
    };

    let command = args.command.join(" ");
    if let Err(e) = run_one_off_command(&context, &command, stdout().lock()).await {
        error!("{e}");
        exit(1);
    }
}
