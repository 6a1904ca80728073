//! ecgpipe CLI entry point

use anyhow::{Context, Result};
use crossbeam::channel::RecvTimeoutError;
use ecgpipe::channel::{fifo, DuplexChannel, Side, CONTROL_CHANNEL};
use ecgpipe::client::{self, Orchestrator};
use ecgpipe::config::cli::{Cli, ExecutionMode};
use ecgpipe::config::{validator, ClientConfig, Workload};
use ecgpipe::output::{json, text};
use ecgpipe::server::dataset::Dataset;
use ecgpipe::server::Server;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.debug);

    match cli.mode {
        ExecutionMode::Client => run_client(cli),
        ExecutionMode::Server => run_server(cli),
    }
}

/// Log to stderr; `RUST_LOG` wins over `--debug`
fn init_tracing(debug: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .with_target(false),
        )
        .with(filter)
        .try_init();
}

/// Run in server mode (launched by the client)
fn run_server(cli: Cli) -> Result<()> {
    let config = cli.server_config();
    validator::validate_server_config(&config).context("Configuration validation failed")?;

    // Fully loaded before the control channel opens
    let dataset = Dataset::load(&config.data_dir, config.num_persons, config.sample_period)
        .context("Failed to load ECG dataset")?;

    let summary = Server::new(config, dataset).run()?;
    tracing::info!(
        channels = summary.channels.len(),
        requests = summary.data_requests(),
        "Server finished"
    );
    Ok(())
}

/// Run in client mode: launch the server, run the workload, report
fn run_client(cli: Cli) -> Result<()> {
    let config = cli.client_config()?;
    validator::validate_client_config(&config).context("Configuration validation failed")?;

    println!("ecgpipe v{}", env!("CARGO_PKG_VERSION"));
    println!();
    print_configuration(&config);
    println!();

    let mut server = launch_server(&config, cli.debug)?;
    tracing::debug!(pid = server.id(), "Server launched");

    let mut control = match connect_control(&config.paths.fifo_dir, &mut server) {
        Ok(control) => control,
        Err(e) => {
            let _ = server.kill();
            let _ = server.wait();
            return Err(e);
        }
    };

    let result = Orchestrator::new(config.clone()).run(&mut control);

    // The server is told to stop whether or not the workload succeeded
    if let Err(e) = client::shutdown_server(&mut control) {
        tracing::warn!(error = %e, "Failed to stop server");
    }
    drop(control);
    wait_for_server(server)?;

    let report = result?;
    text::print_report(&report);

    if let Some(path) = &config.json_output {
        let doc = json::build_report(&config, &report);
        json::write_json_output(path, &doc, true)?;
        println!("JSON report: {}", path.display());
    }

    Ok(())
}

fn print_configuration(config: &ClientConfig) {
    println!("Configuration:");
    match config.workload() {
        Workload::Data => {
            println!("  Workload: data");
            println!("    Patients: {}", config.patients);
            println!("    Requests per patient: {}", config.requests_per_patient);
            println!("    Lead: {}", config.lead);
            println!(
                "    Histogram: {} buckets over [{}, {})",
                config.histogram.buckets, config.histogram.min, config.histogram.max
            );
        }
        Workload::File(name) => {
            println!("  Workload: file");
            println!("    File: {}", name);
        }
    }
    println!("  Threads:");
    println!("    Workers: {}", config.workers);
    println!("    Sinks: {}", config.sinks);
    println!("    Queue capacity: {}", config.queue_capacity);
    println!("    Max message: {} bytes", config.max_message);
}

/// Launch this executable in server mode
fn launch_server(config: &ClientConfig, debug: bool) -> Result<Child> {
    let exe_path = std::env::current_exe().context("Failed to get current executable path")?;

    let mut cmd = Command::new(&exe_path);
    cmd.arg("--mode").arg("server");
    cmd.arg("--max-message").arg(config.max_message.to_string());
    cmd.arg("--data-dir").arg(&config.paths.data_dir);
    cmd.arg("--fifo-dir").arg(&config.paths.fifo_dir);
    if config.jitter_us > 0 {
        cmd.arg("--jitter-us").arg(config.jitter_us.to_string());
    }

    // Redirect output to /dev/null (or log file if debug)
    if debug {
        cmd.arg("--debug");
        let log_path = format!("/tmp/ecgpipe_server_{}.log", std::process::id());
        let log_file = std::fs::File::create(&log_path).context("Failed to create server log file")?;
        cmd.stdout(Stdio::from(log_file.try_clone()?));
        cmd.stderr(Stdio::from(log_file));
        tracing::debug!(path = %log_path, "Server log");
    } else {
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
    }

    cmd.spawn().context("Failed to spawn server process")
}

/// Open the control channel, giving up if the server exits first
///
/// Opening a FIFO blocks until the peer opens it, so the open runs on a
/// helper thread while this thread watches the child.
fn connect_control(fifo_dir: &Path, server: &mut Child) -> Result<DuplexChannel> {
    let (tx, rx) = crossbeam::channel::bounded(1);
    let dir = fifo_dir.to_path_buf();
    thread::Builder::new()
        .name("control-open".into())
        .spawn(move || {
            let _ = tx.send(DuplexChannel::open(&dir, CONTROL_CHANNEL, Side::Acceptor));
        })
        .context("Failed to spawn control channel thread")?;

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(channel) => return channel.context("Failed to open control channel"),
            Err(RecvTimeoutError::Timeout) => {
                if let Some(status) = server.try_wait()? {
                    // Nobody else will remove the pipes
                    let (forward, backward) = fifo::pipe_paths(fifo_dir, CONTROL_CHANNEL);
                    let _ = fifo::remove_fifo(&forward);
                    let _ = fifo::remove_fifo(&backward);
                    anyhow::bail!("Server exited before opening the control channel ({})", status);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                anyhow::bail!("Control channel thread exited without a result")
            }
        }
    }
}

/// Wait for the server to exit after QUIT
fn wait_for_server(mut server: Child) -> Result<()> {
    let status = server.wait().context("Failed to wait for server process")?;
    if status.success() {
        tracing::debug!(%status, "Server exited");
    } else {
        tracing::warn!(%status, "Server exited with failure");
    }
    Ok(())
}
