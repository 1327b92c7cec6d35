//! `qacurator` command line: `generate` candidates, then finalize them with `dataset`.
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use qacurator::candidates::GenerationService;
use qacurator::config::{self, DatasetConfig, GenerationConfig};
use qacurator::dataset::{self, DatasetMode};
use qacurator::llm::OllamaChatClient;
use qacurator::logging;
use qacurator::retrieval::QdrantRetriever;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "qacurator", about = "Generate and finalize grounded QA datasets")]
struct Cli {
    /// Log level used when RUST_LOG is unset (error, warn, info, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Common {
    /// JSON configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Workspace root that relative paths resolve against.
    #[arg(long)]
    workspace_root: Option<PathBuf>,
    /// Compute everything but write nothing.
    #[arg(long)]
    dry_run: bool,
    /// Process at most this many input files.
    #[arg(long)]
    limit_num_files: Option<usize>,
    /// Number of independent workers.
    #[arg(long)]
    num_shards: Option<u32>,
    /// Zero-based index of this worker.
    #[arg(long)]
    shard_id: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate QA candidates from annotated chunk files.
    Generate {
        #[command(flatten)]
        common: Common,
        /// Process at most this many chunks per file.
        #[arg(long)]
        limit_num_chunks: Option<usize>,
        /// Start over instead of resuming from checkpoints.
        #[arg(long)]
        overwrite: bool,
    },
    /// Filter, deduplicate, and version candidates into the final dataset.
    Dataset {
        #[command(flatten)]
        common: Common,
        /// Finalization mode.
        #[arg(long, value_enum, default_value_t = Mode::Single)]
        mode: Mode,
        /// Dataset version: `auto` (single mode only) or `vN`.
        #[arg(long = "version")]
        dataset_version: Option<String>,
        /// Keep at most this many records.
        #[arg(long)]
        limit_num_examples: Option<usize>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Single,
    Map,
    Reduce,
}

impl From<Mode> for DatasetMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Single => DatasetMode::Single,
            Mode::Map => DatasetMode::Map,
            Mode::Reduce => DatasetMode::Reduce,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    config::load_dotenv();
    logging::init_tracing(cli.log_level.as_deref());

    if let Err(err) = run(cli.command).await {
        tracing::error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Generate {
            common,
            limit_num_chunks,
            overwrite,
        } => {
            let mut cfg: GenerationConfig = load(common.config.as_deref(), GenerationConfig::from_file)?;
            if let Some(root) = common.workspace_root {
                cfg.workspace_root = Some(root);
            }
            cfg.runtime.dry_run |= common.dry_run;
            if overwrite {
                cfg.runtime.resume_mode = config::ResumeMode::Overwrite;
            }
            if let Some(limit) = common.limit_num_files {
                cfg.debug.limit_num_files = limit;
            }
            if let Some(limit) = limit_num_chunks {
                cfg.debug.limit_num_chunks = limit;
            }
            if let Some(num_shards) = common.num_shards {
                cfg.sharding.num_shards = num_shards;
            }
            if let Some(shard_id) = common.shard_id {
                cfg.sharding.shard_id = shard_id;
            }
            cfg.apply_env_overrides();
            log_generation_config(&cfg);

            let retriever = QdrantRetriever::new(&cfg.retrieval).context("failed to build Qdrant client")?;
            let llm = OllamaChatClient::from_config(&cfg.llm).context("failed to build Ollama client")?;
            let service = GenerationService::new(cfg, Box::new(retriever), Box::new(llm))
                .context("failed to start generation")?;
            let summary = service.run().await.context("candidate generation failed")?;
            tracing::info!(
                files = summary.files.len(),
                written = summary.written(),
                global_quota_reached = summary.global_quota_reached,
                "Done"
            );
        }
        Command::Dataset {
            common,
            mode,
            dataset_version,
            limit_num_examples,
        } => {
            let mut cfg: DatasetConfig = load(common.config.as_deref(), DatasetConfig::from_file)?;
            if let Some(root) = common.workspace_root {
                cfg.workspace_root = Some(root);
            }
            cfg.dry_run |= common.dry_run;
            if let Some(version) = dataset_version {
                cfg.output.version = version;
            }
            if let Some(limit) = common.limit_num_files {
                cfg.limits.limit_num_files = limit;
            }
            if let Some(limit) = limit_num_examples {
                cfg.limits.limit_num_examples = limit;
            }
            if let Some(num_shards) = common.num_shards {
                cfg.sharding.num_shards = num_shards;
            }
            if let Some(shard_id) = common.shard_id {
                cfg.sharding.shard_id = shard_id;
            }
            let mode = DatasetMode::from(mode);
            tracing::debug!(
                workspace_root = ?cfg.workspace_root,
                dataset = %cfg.output.dataset_name,
                version = %cfg.output.version,
                num_shards = cfg.sharding.num_shards,
                shard_id = cfg.sharding.shard_id,
                "Loaded dataset configuration"
            );
            let report = dataset::run(&cfg, mode).with_context(|| format!("dataset {mode} failed"))?;
            tracing::info!(
                mode = %report.mode,
                version = %report.version,
                output = ?report.output,
                kept = report.counters.kept,
                "Done"
            );
        }
    }
    Ok(())
}

fn log_generation_config(cfg: &GenerationConfig) {
    tracing::debug!(
        workspace_root = ?cfg.workspace_root,
        model = %cfg.llm.model,
        llm_url = %cfg.llm.base_url,
        qdrant_url = %cfg.retrieval.qdrant_url,
        collection = %cfg.retrieval.collection,
        "Loaded generation configuration"
    );
}

fn load<T, E>(path: Option<&Path>, from_file: fn(&Path) -> Result<T, E>) -> Result<T>
where
    T: Default,
    E: std::error::Error + Send + Sync + 'static,
{
    match path {
        Some(path) => from_file(path).with_context(|| format!("failed to load {}", path.display())),
        None => Ok(T::default()),
    }
}
