use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

mod simulate;

#[zbus::proxy(
    interface = "org.skinscan.Scanner1",
    default_service = "org.skinscan.Scanner1",
    default_path = "/org/skinscan/Scanner1"
)]
trait Scanner {
    fn start(&self) -> zbus::Result<String>;
    fn stop_camera(&self) -> zbus::Result<bool>;
    fn status(&self) -> zbus::Result<String>;
    fn snapshot(&self) -> zbus::Result<String>;
    fn last_result(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "skinscan", about = "Decorative skin scan: daemon control and offline simulation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a scan cycle
    Start {
        /// Wait for the result and print it
        #[arg(short, long)]
        wait: bool,
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Stop the daemon's camera loop
    StopCamera,
    /// Show daemon status
    Status,
    /// Save the current overlay and print its path
    Snapshot,
    /// Print the latest result of this session
    Result,
    /// Run a scan offline on a synthetic clock and write overlay PNGs
    Simulate {
        /// Output directory for frames
        #[arg(short, long)]
        out: PathBuf,
        /// RNG seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Use a synthetic face instead of the timed fallback
        #[arg(long)]
        face: bool,
        /// Write every n-th frame
        #[arg(long, default_value_t = 10)]
        every: usize,
        #[arg(long, default_value_t = 375)]
        width: u32,
        #[arg(long, default_value_t = 812)]
        height: u32,
    },
    /// List V4L2 capture devices
    Devices {
        /// Capture one frame from each device and report brightness
        #[arg(long)]
        probe: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { wait, timeout } => {
            let proxy = connect().await?;
            let scan_id = proxy.start().await?;
            println!("scan started: {scan_id}");
            if wait {
                let record = wait_for_result(&proxy, &scan_id, Duration::from_secs(timeout)).await?;
                print_json(&record)?;
            }
        }
        Commands::StopCamera => {
            let proxy = connect().await?;
            if proxy.stop_camera().await? {
                println!("camera stopped");
            } else {
                println!("camera was not running");
            }
        }
        Commands::Status => {
            let proxy = connect().await?;
            print_json(&proxy.status().await?)?;
        }
        Commands::Snapshot => {
            let proxy = connect().await?;
            println!("{}", proxy.snapshot().await?);
        }
        Commands::Result => {
            let proxy = connect().await?;
            print_json(&proxy.last_result().await?)?;
        }
        Commands::Simulate {
            out,
            seed,
            face,
            every,
            width,
            height,
        } => {
            let opts = simulate::SimulateOptions {
                out,
                seed,
                face,
                every,
                width,
                height,
            };
            let outcome = simulate::run(&opts)?;
            println!(
                "{} frames, {} written to {}",
                outcome.frames,
                outcome.written.len(),
                opts.out.display()
            );
            println!(
                "hydration {:.2}  oil {:.2}  type {}",
                outcome.metrics.hydration, outcome.metrics.oil, outcome.metrics.skin_type
            );
            match outcome.score {
                Some(score) => println!("score: {score}"),
                None => bail!("no result after {} frames", outcome.frames),
            }
        }
        Commands::Devices { probe } => {
            let devices = skinscan_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("no V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
                if probe {
                    probe_device(&dev.path);
                }
            }
        }
    }

    Ok(())
}

async fn connect() -> Result<ScannerProxy<'static>> {
    let connection = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    ScannerProxy::new(&connection)
        .await
        .context("skinscand is not running")
}

/// Poll `LastResult` until it reports the given scan.
async fn wait_for_result(proxy: &ScannerProxy<'_>, scan_id: &str, timeout: Duration) -> Result<String> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(json) = proxy.last_result().await {
            let value: serde_json::Value = serde_json::from_str(&json)?;
            if value["scan_id"] == scan_id {
                return Ok(json);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for scan {scan_id}");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn print_json(json: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn probe_device(path: &str) {
    match skinscan_hw::Camera::open(path).and_then(|cam| cam.capture_frame()) {
        Ok(frame) => println!(
            "    {}x{}  avg brightness {:.1}",
            frame.width,
            frame.height,
            frame.avg_brightness()
        ),
        Err(e) => println!("    probe failed: {e}"),
    }
}
