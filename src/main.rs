use clap::{Parser, Subcommand};
use remark_compose::{builder, config, output, serve, settings};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "remarkc")]
#[command(about = "Build HTML slide decks from an rconf rule file")]
#[command(long_about = "\
Build HTML slide decks from an rconf rule file

The rule file lists inputs, the template that wraps them and the parameters
templates can use. Each input is rendered as a template, then placed into
its layout as `content`. Outputs are only rebuilt when the input, the
template or the rule file changed.

Project layout:

  talks/
  ├── talk.rconf            # rules (the .rconf extension may be omitted)
  ├── remarkc.toml          # tool settings (optional)
  ├── base.html             # layout template, uses {{ content }}
  └── slides/
      ├── 01-intro.md       # → slides/01-intro.html
      └── 02-ownership.md

Run 'remarkc gen-config' to generate a documented remarkc.toml.")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build every stale output once
    Build {
        /// Rule file
        rconf: PathBuf,
        /// Rebuild outputs even when they are up to date
        #[arg(short, long)]
        force: bool,
        /// Print the build summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build, then rebuild on change and serve the results
    Serve {
        /// Rule file
        rconf: PathBuf,
        /// Port of the development server
        #[arg(short, long)]
        port: Option<u16>,
        /// Interface the development server binds to
        #[arg(long)]
        host: Option<String>,
        /// Rebuild every output, on startup and on every change
        #[arg(short, long)]
        force: bool,
    },
    /// Print a stock remarkc.toml with all options documented
    GenConfig,
}

/// Initialize tracing from `-v`, unless `RUST_LOG` is set.
fn init_tracing(verbose: u8) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match verbose {
        0 => "remark_compose=warn",
        1 => "remark_compose=info",
        2 => "remark_compose=debug",
        _ => "remark_compose=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Directory holding the rule file, where `remarkc.toml` is looked up.
fn config_dir(rconf: &Path) -> &Path {
    match rconf.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Build { rconf, force, json } => {
            let rconf = config::normalize_config_path(&rconf);
            let settings = settings::load_settings(config_dir(&rconf))?;
            let options = builder::BuildOptions {
                force,
                report_all: false,
                base_url: None,
                render: settings.render,
            };
            let summary = builder::build(&rconf, &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&output::build_summary_json(&summary))?);
            } else {
                let root = std::path::absolute(config_dir(&rconf))?;
                output::print_build_summary(&summary, &root);
            }
        }
        Command::Serve {
            rconf,
            port,
            host,
            force,
        } => {
            let rconf = config::normalize_config_path(&rconf);
            let mut settings = settings::load_settings(config_dir(&rconf))?;
            if let Some(port) = port {
                settings.serve.port = port;
            }
            if let Some(host) = host {
                settings.serve.host = host;
            }
            settings.validate()?;
            serve::serve(&rconf, &settings, force)?;
        }
        Command::GenConfig => {
            print!("{}", settings::stock_settings_toml());
        }
    }

    Ok(())
}
