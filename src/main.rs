use anyhow::Context;
use clap::{Parser, Subcommand};
use debugger_cdp::{HangCheckConfig, HangDetector};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "debugger_cdp")]
#[command(about = "Debugger orchestrator for V8 inspector targets", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script under the hang detector and print the verdict as JSON
    HangCheck {
        /// Script to execute (passed to the runtime)
        script: String,

        /// Arguments forwarded to the script (after `--`)
        #[arg(last = true)]
        args: Vec<String>,

        /// Runtime executable
        #[arg(long, default_value = "node")]
        runtime: String,

        /// Working directory for the target
        #[arg(long)]
        cwd: Option<String>,

        /// Overall deadline in milliseconds
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,

        /// Enable the periodic stack sampler with this interval (ms)
        #[arg(long)]
        sample_interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { &cli.log_level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::HangCheck {
            script,
            args,
            runtime,
            cwd,
            timeout_ms,
            sample_interval_ms,
        } => {
            let mut target_args = vec![script];
            target_args.extend(args);

            let config = HangCheckConfig {
                command: runtime,
                args: target_args,
                cwd,
                timeout: Duration::from_millis(timeout_ms),
                sample_interval: sample_interval_ms.map(Duration::from_millis),
            };

            let result = HangDetector::run(config)
                .await
                .context("hang detection failed")?;

            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.hung {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}
