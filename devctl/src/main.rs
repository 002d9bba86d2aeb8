use clap::{Args, Parser, Subcommand};
use common::{Scheme, StatusPolicy};
use devctl::checks::SecondaryChecks;
use devctl::commands::shutdown_signal;
use devctl::process::ProcessSpec;
use devctl::ws::WsReadiness;
use devctl::{Config, DevctlResult, Output, Runner};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "devctl")]
#[command(about = "Wait for a dev server to become ready, check it, and manage its process", long_about = None)]
struct Cli {
    /// Host to probe [env: DEVCTL_HOST]
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to probe [env: DEVCTL_PORT]
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Readiness path [env: DEVCTL_HEALTH_PATH]
    #[arg(long, global = true)]
    path: Option<String>,

    /// Use https and wss
    #[arg(long, global = true)]
    https: bool,

    /// http, https, or auto (https first, falling back to http) [env: DEVCTL_SCHEME]
    #[arg(long, global = true, conflicts_with = "https")]
    scheme: Option<Scheme>,

    /// Accepted status codes, e.g. "200,304" [env: DEVCTL_EXPECT]
    #[arg(long, global = true)]
    expect: Option<StatusPolicy>,

    /// Overall readiness timeout in seconds [env: DEVCTL_TIMEOUT_SECS]
    #[arg(short, long, global = true, value_name = "SECS")]
    timeout: Option<f64>,

    /// Seconds between attempts [env: DEVCTL_POLL_INTERVAL_SECS]
    #[arg(short, long, global = true, value_name = "SECS")]
    interval: Option<f64>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the readiness path until it answers with an accepted status
    Wait,
    /// Wait for readiness, then check extra routes and the WebSocket endpoint
    Check(CheckArgs),
    /// Show the recorded process and a single probe
    Status,
    /// Start a dev server, wait for it, and keep it running until Ctrl-C
    Run {
        #[command(flatten)]
        checks: CheckArgs,

        /// Command that starts the server
        #[arg(
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "COMMAND"
        )]
        command: Vec<String>,
    },
    /// Stop the process recorded in the pid file
    Stop,
}

#[derive(Args, Debug, Default)]
struct CheckArgs {
    /// Extra route that must answer with an accepted status (repeatable) [env: DEVCTL_ROUTES]
    #[arg(long = "route", value_name = "PATH")]
    routes: Vec<String>,

    /// WebSocket path [env: DEVCTL_WS_PATH]
    #[arg(long, value_name = "PATH")]
    ws_path: Option<String>,

    /// Skip the WebSocket check
    #[arg(long, conflicts_with = "ws_path")]
    no_ws: bool,

    /// Require a pong reply instead of just a completed handshake
    #[arg(long)]
    require_pong: bool,
}

impl Cli {
    fn apply(&self, mut config: Config) -> anyhow::Result<Config> {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = &self.path {
            config.health_path = path.clone();
        }
        if self.https {
            config.scheme = Scheme::Https;
        }
        if let Some(scheme) = self.scheme {
            config.scheme = scheme;
        }
        if let Some(expect) = &self.expect {
            config.expected_status = expect.clone();
        }
        if let Some(secs) = self.timeout {
            config.timeout = Duration::try_from_secs_f64(secs)?;
        }
        if let Some(secs) = self.interval {
            config.poll_interval = Duration::try_from_secs_f64(secs)?;
        }
        Ok(config)
    }
}

impl CheckArgs {
    fn apply(&self, config: &mut Config) {
        if !self.routes.is_empty() {
            config.routes = self.routes.clone();
        }
        if let Some(path) = &self.ws_path {
            config.ws_path = Some(path.clone());
        }
        if self.no_ws {
            config.ws_path = None;
        }
        if self.require_pong {
            config.ws_readiness = WsReadiness::Pong;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env().and_then(|config| cli.apply(config)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("devctl: invalid configuration: {:#}", e);
            return ExitCode::from(4);
        }
    };

    // Logs go to stderr so stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(config.log_level.clone())
        .with_writer(std::io::stderr)
        .init();

    let output = if cli.json { Output::Json } else { Output::Text };

    match dispatch(cli.command, config, output).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("devctl: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn dispatch(command: Commands, mut config: Config, output: Output) -> DevctlResult<ExitCode> {
    match command {
        Commands::Wait => {
            Runner::new(config, output)?.wait().await?;
        }
        Commands::Check(args) => {
            args.apply(&mut config);
            let checks = config.secondary_checks();
            Runner::new(config, output)?.check(&checks).await?;
        }
        Commands::Status => {
            let report = Runner::new(config, output)?.status().await?;
            if !report.ready {
                return Ok(ExitCode::from(1));
            }
        }
        Commands::Run { checks, command } => {
            checks.apply(&mut config);
            let secondary: SecondaryChecks = config.secondary_checks();
            let spec = ProcessSpec::from_command_line(&command)?;
            Runner::new(config, output)?
                .run(&spec, &secondary, shutdown_signal())
                .await?;
        }
        Commands::Stop => {
            Runner::new(config, output)?.stop().await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
