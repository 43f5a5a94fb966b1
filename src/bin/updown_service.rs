//! updown-service: mark a local service up or down in the service mesh

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use nerve_tools::updown::{
    DesiredState, Hacheck, MeshStateController, ServiceTarget, SoaCatalog, UpdownOptions,
    DEFAULT_WAIT_TIME, POLL_INTERVAL,
};

#[derive(Parser, Debug)]
#[command(name = "updown-service")]
#[command(about = "Mark a service up or down and wait for the mesh to agree")]
struct Cli {
    /// Service as name.namespace, optionally with :port
    #[arg(value_parser = ServiceTarget::parse)]
    service: ServiceTarget,

    #[arg(value_enum)]
    state: DesiredState,

    /// Maximum seconds to wait; defaults to the service's updown_timeout_s, else 300
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Extra seconds to wait once the state is reached
    #[arg(short, long, default_value_t = DEFAULT_WAIT_TIME.as_secs())]
    wait_time: u64,

    /// Only wait for the state, do not change it
    #[arg(short = 'x', long)]
    wait_only: bool,

    /// Envoy EDS snapshot directory to poll for convergence
    #[arg(long, env = "ENVOY_EDS_DIR")]
    envoy_eds_dir: Option<PathBuf>,

    #[arg(long, env = "SOA_DIR", default_value = "/nail/etc/services")]
    soa_dir: PathBuf,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "nerve_tools=warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(cli.log_level.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let catalog = SoaCatalog::new(cli.soa_dir);
    let hacheck = Hacheck::default();
    let controller = MeshStateController::new(&catalog, &hacheck);

    let options = UpdownOptions {
        timeout: cli.timeout.map(Duration::from_secs),
        wait_time: Duration::from_secs(cli.wait_time),
        wait_only: cli.wait_only,
        eds_dir: cli.envoy_eds_dir,
        poll_interval: POLL_INTERVAL,
        local_ip: None,
    };

    let code = match controller.set_state(&cli.service, cli.state, &options).await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}
