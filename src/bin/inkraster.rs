use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use inkraster::{
    ChannelVisibility, ClientKey, DecodeOptions, DisplayFormat, GhostscriptFactory, InkConfig,
    ProcessLauncher, RenderJob, RenderOptions, RenderOutput, WorkerPool, WorkerProcess,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "inkraster", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one PostScript/EPS file to a PNG.
    Render(RenderArgs),
    /// Render several files in parallel through the worker pool.
    Batch(BatchArgs),
    /// Validate a JSON config file and print it with defaults filled in.
    Config {
        /// Config file.
        path: PathBuf,
    },
    /// Serve render requests on stdin/stdout (used by the worker pool).
    #[command(hide = true)]
    Worker {
        /// Config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Parser, Debug)]
struct ViewArgs {
    /// Pixel format requested from the display device.
    #[arg(long, value_enum, default_value_t = FormatChoice::Bgrx)]
    format: FormatChoice,

    /// Hide an ink channel (0-based). Repeatable.
    #[arg(long = "hide", value_name = "CHANNEL")]
    hide: Vec<usize>,

    /// Show only this ink channel.
    #[arg(long, value_name = "CHANNEL", conflicts_with = "hide")]
    solo: Option<usize>,

    /// Show a solo channel as gray rather than in its ink color.
    #[arg(long, requires = "solo")]
    gray: bool,

    /// Image made available to the program as `InkAssetData`.
    #[arg(long)]
    asset: Option<PathBuf>,

    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the output resolution.
    #[arg(long)]
    dpi: Option<u32>,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input program.
    input: PathBuf,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    view: ViewArgs,
}

#[derive(Parser, Debug)]
struct BatchArgs {
    /// Input programs.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory receiving `<input stem>.png` for each input.
    #[arg(long)]
    out_dir: PathBuf,

    /// Override the number of worker processes.
    #[arg(long)]
    processes: Option<usize>,

    #[command(flatten)]
    view: ViewArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatChoice {
    Bgrx,
    Rgb24,
    Gray8,
    Cmyk8,
    Cmyk1,
    Separation8,
}

impl FormatChoice {
    fn display_format(self) -> DisplayFormat {
        match self {
            Self::Bgrx => DisplayFormat::BGRX,
            Self::Rgb24 => DisplayFormat::RGB24,
            Self::Gray8 => DisplayFormat::GRAY8,
            Self::Cmyk8 => DisplayFormat::CMYK8,
            Self::Cmyk1 => DisplayFormat::CMYK1,
            Self::Separation8 => DisplayFormat::SEPARATION8,
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Batch(args) => cmd_batch(args),
        Command::Config { path } => cmd_config(&path),
        Command::Worker { config } => cmd_worker(config.as_deref()),
    }
}

/// Logs go to stderr: a worker's stdout carries the protocol.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("INKRASTER_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<InkConfig> {
    match path {
        Some(path) => {
            InkConfig::load(path).with_context(|| format!("load config '{}'", path.display()))
        }
        None => Ok(InkConfig::default()),
    }
}

impl ViewArgs {
    fn config(&self) -> anyhow::Result<InkConfig> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(dpi) = self.dpi {
            config.render.resolution_dpi = dpi;
        }
        config.validate()?;
        Ok(config)
    }

    fn options(&self) -> RenderOptions {
        let visibility = match self.solo {
            Some(channel) => ChannelVisibility::solo(channel),
            None => self
                .hide
                .iter()
                .fold(ChannelVisibility::all(), |v, &c| v.with(c, false)),
        };
        RenderOptions {
            decode: DecodeOptions {
                visibility,
                gray_solo: self.gray,
            },
            keep_raw: false,
            asset: self.asset.clone(),
        }
    }
}

fn read_job(key: ClientKey, path: &Path, view: &ViewArgs) -> anyhow::Result<RenderJob> {
    let input = std::fs::read(path).with_context(|| format!("read '{}'", path.display()))?;
    Ok(RenderJob::new(key, input, view.format.display_format()).with_options(view.options()))
}

fn save_png(output: &RenderOutput, out: &Path) -> anyhow::Result<()> {
    let img = output.decoded.to_rgba_image()?;
    img.save(out)
        .with_context(|| format!("write '{}'", out.display()))?;
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let config = args.view.config()?;
    let job = read_job(ClientKey(0), &args.input, &args.view)?;

    let factory = GhostscriptFactory::new(&config.render);
    let mut worker = WorkerProcess::new(factory, config.render.clone());
    let output = worker
        .execute(&job)
        .map_err(|fault| anyhow::anyhow!("{}: {fault}", fault.summary()))?;

    save_png(&output, &args.out)?;
    eprintln!(
        "wrote {} ({}x{})",
        args.out.display(),
        output.decoded.width,
        output.decoded.height
    );
    Ok(())
}

fn cmd_batch(args: BatchArgs) -> anyhow::Result<()> {
    let mut config = args.view.config()?;
    if let Some(processes) = args.processes {
        config.pool.processes = processes;
    }
    if config.pool.worker_program.is_none()
        && let Some(path) = &args.view.config
    {
        config.pool.worker_args = vec![
            "worker".to_string(),
            "--config".to_string(),
            path.display().to_string(),
        ];
    }
    config.validate()?;
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("create '{}'", args.out_dir.display()))?;

    let launcher = ProcessLauncher::from_config(&config.pool)?;
    let pool = WorkerPool::new(&config.pool, launcher)?;

    let mut pending = HashMap::new();
    for (i, input) in args.inputs.iter().enumerate() {
        let job = read_job(ClientKey(i as u64), input, &args.view)?;
        let ticket = pool.submit(job);
        pending.insert(ticket, input.clone());
    }

    let mut failed = 0usize;
    while !pending.is_empty() {
        let Some(done) = pool.wait_completion(Duration::from_millis(500)) else {
            continue;
        };
        let Some(input) = pending.remove(&done.ticket) else {
            continue;
        };
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("page-{}", done.key.0));
        let out = args.out_dir.join(format!("{stem}.png"));
        match done.outcome {
            Ok(output) => {
                save_png(&output, &out)?;
                eprintln!("{} -> {}", input.display(), out.display());
            }
            Err(fault) => {
                failed += 1;
                eprintln!("{}: {}: {fault}", input.display(), fault.summary());
            }
        }
    }
    pool.shutdown();

    if failed > 0 {
        anyhow::bail!("{failed} of {} renders failed", args.inputs.len());
    }
    Ok(())
}

fn cmd_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(Some(path))?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_worker(config: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let factory = GhostscriptFactory::new(&config.render);
    let mut worker = WorkerProcess::new(factory, config.render);
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    worker.serve(stdin.lock(), stdout.lock())?;
    Ok(())
}
