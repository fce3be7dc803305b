use std::path::PathBuf;

use colored::Colorize;
use nats_memory_server::{BuildCommand, ConfigLayer, EffectiveConfig, NatsServerBuilder};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    use clap::Parser;

    let cli = Cli::parse();
    init_tracing(&cli.verbose);

    match cli.command {
        Command::Download { project } => {
            let config = project.resolve()?;
            tracing::info!(version = %config.version, dir = %config.download_dir.display(), "Acquiring nats-server.");

            let bin_path = nats_memory_server::ensure_binary(&config).await?;
            println!("nats-server is available at {}", bin_path.display().to_string().green());
        }
        Command::Build { project } => {
            let config = project.resolve()?;
            tracing::info!(dir = %config.download_dir.display(), "Building nats-server from source.");

            BuildCommand::default().run(&config.download_dir).await?;
            println!("Built nats-server in {}", config.download_dir.display().to_string().green());
        }
        Command::Config { project } => {
            let config = project.resolve()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Run {
            project,
            ip,
            port,
            silent,
            args,
        } => {
            let config = project.resolve()?;
            let bin_path = nats_memory_server::ensure_binary(&config).await?;

            let mut builder = NatsServerBuilder::new()
                .bin_path(bin_path)
                .verbose(!silent)
                .ip(ip)
                .args(args);
            if let Some(port) = port {
                builder = builder.port(port);
            }

            let mut server = builder.launch().await?;
            match server.url() {
                Some(url) => {
                    println!("NATS server running at {}", url.green());
                    println!("Press {} to stop it.", "Ctrl-C".yellow());
                }
                None => {
                    // broker exited with an accepted code before reporting readiness
                    eprintln!("{}", "nats-server exited right after starting.".yellow());
                    return Ok(());
                }
            }

            tokio::signal::ctrl_c().await?;
            tracing::info!("Received Ctrl-C, stopping nats-server.");
            server.stop().await?;
        }
    }

    Ok(())
}

fn init_tracing<L: clap_verbosity_flag::LogLevel>(verbose: &clap_verbosity_flag::Verbosity<L>) {
    use tracing_subscriber::EnvFilter;

    // RUST_LOG wins over -v/-q
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = verbose
            .log_level()
            .map(|l| l.to_string().to_lowercase())
            .unwrap_or_else(|| "off".to_string());
        EnvFilter::new(level)
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(clap::Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    #[clap(about = "Download (and if configured, build) the nats-server binary")]
    Download {
        #[command(flatten)]
        project: ProjectArgs,
    },
    #[clap(about = "Run the build step in the download directory")]
    Build {
        #[command(flatten)]
        project: ProjectArgs,
    },
    #[clap(about = "Print the effective configuration as JSON")]
    Config {
        #[command(flatten)]
        project: ProjectArgs,
    },
    #[clap(about = "Start a nats-server and keep it running until Ctrl-C")]
    Run {
        #[command(flatten)]
        project: ProjectArgs,
        #[arg(long, default_value = nats_memory_server::DEFAULT_IP, help = "Address the broker listens on.")]
        ip: String,
        #[arg(long, short('p'), help = "Port the broker listens on. A free port is picked if omitted.")]
        port: Option<u16>,
        #[arg(long, help = "Do not forward broker output.")]
        silent: bool,
        #[arg(last = true, help = "Extra arguments passed to nats-server.")]
        args: Vec<String>,
    },
}

#[derive(clap::Args, Debug)]
pub struct ProjectArgs {
    #[arg(
        long,
        help = "Directory the configuration is looked up in. Defaults to the project containing the current directory."
    )]
    project_root: Option<PathBuf>,
    #[arg(long, help = "nats-server version, e.g. v2.9.16.")]
    version: Option<String>,
    #[arg(long, help = "Where the binary (or source tree) is placed.")]
    download_dir: Option<PathBuf>,
    #[arg(long, help = "Download the source archive and build it with `go build`.")]
    build_from_source: bool,
    #[arg(long, help = "Download from this URL instead of the GitHub release.")]
    download_url: Option<String>,
    #[arg(long, env = "HTTP_PROXY", help = "Proxy for http downloads.")]
    http_proxy: Option<String>,
    #[arg(long, env = "HTTPS_PROXY", help = "Proxy for https downloads.")]
    https_proxy: Option<String>,
    #[arg(long, env = "NO_PROXY", help = "Comma separated hosts that bypass the proxies.")]
    no_proxy: Option<String>,
}

impl ProjectArgs {
    fn resolve(self) -> eyre::Result<EffectiveConfig> {
        let root = match self.project_root {
            Some(root) => root,
            None => nats_memory_server::find_project_root(&std::env::current_dir()?),
        };

        let overrides = ConfigLayer {
            version: self.version,
            download_dir: self.download_dir,
            build_from_source: self.build_from_source.then_some(true),
            download_url: self.download_url,
            http_proxy: self.http_proxy,
            https_proxy: self.https_proxy,
            no_proxy: self.no_proxy,
            ..Default::default()
        };

        tracing::debug!(root = %root.display(), ?overrides, "resolving configuration");
        Ok(nats_memory_server::resolve_with(&root, &overrides)?)
    }
}
