//! persona-atlas CLI: build atlas bundles and drift reports

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use persona_atlas::{
    write_bundle_json, write_feature_csv, write_json, ActivationTransform, AggregationMode,
    AssistantAxis, AtlasConfig, BundleBuilder, ConversationTrace, DescriptionLookup, DriftConfig,
    DriftScorer, MatrixOptions, Pooling, ResponseCorpus, RoleFeatureMatrix,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "persona-atlas")]
#[command(about = "Persona feature atlas and assistant-axis drift analysis")]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Select features, lay them out and write bundle.json + features.csv
    Bundle {
        #[command(flatten)]
        input: MatrixInput,

        /// Atlas config JSON (defaults apply to absent fields)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Feature description cache JSON
        #[arg(short, long)]
        descriptions: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "outputs")]
        output: PathBuf,
    },
    /// Score conversation traces against the assistant axis
    Drift {
        #[command(flatten)]
        input: MatrixInput,

        /// Conversation trace JSON files
        #[arg(short, long, required = true, num_args = 1..)]
        trace: Vec<PathBuf>,

        /// Role treated as the assistant
        #[arg(long, default_value = "assistant")]
        assistant_role: String,

        /// Contrast roles (default: every other role)
        #[arg(long)]
        contrast: Vec<String>,

        /// Drift config JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "outputs")]
        output: PathBuf,
    },
}

#[derive(clap::Args)]
struct MatrixInput {
    /// Response-level activations JSON (enables split-half stability)
    #[arg(long, conflicts_with = "matrix", required_unless_present = "matrix")]
    responses: Option<PathBuf>,

    /// Pooled role matrix JSON
    #[arg(long)]
    matrix: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = PoolingArg::Mean)]
    pooling: PoolingArg,

    #[arg(long, value_enum, default_value_t = ModeArg::Raw)]
    mode: ModeArg,

    /// Activation transform (default: log1p for bundle, identity for drift)
    #[arg(long, value_enum)]
    transform: Option<TransformArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum PoolingArg {
    Mean,
    Max,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Raw,
    QuestionCentered,
}

#[derive(Clone, Copy, ValueEnum)]
enum TransformArg {
    Identity,
    Log1p,
}

impl MatrixInput {
    fn options(&self, default_transform: ActivationTransform) -> MatrixOptions {
        MatrixOptions {
            pooling: match self.pooling {
                PoolingArg::Mean => Pooling::Mean,
                PoolingArg::Max => Pooling::Max,
            },
            mode: match self.mode {
                ModeArg::Raw => AggregationMode::Raw,
                ModeArg::QuestionCentered => AggregationMode::QuestionCentered,
            },
            transform: match self.transform {
                Some(TransformArg::Identity) => ActivationTransform::Identity,
                Some(TransformArg::Log1p) => ActivationTransform::Log1p,
                None => default_transform,
            },
        }
    }

    /// Load the role matrix and, when given, the response corpus behind it
    fn load(
        &self,
        default_transform: ActivationTransform,
    ) -> Result<(RoleFeatureMatrix, Option<ResponseCorpus>)> {
        let options = self.options(default_transform);
        if let Some(path) = &self.responses {
            let corpus = ResponseCorpus::load(path)
                .with_context(|| format!("loading responses from {}", path.display()))?;
            info!(
                "Responses: {} roles, {} features",
                corpus.len(),
                corpus.n_features()
            );
            let matrix = RoleFeatureMatrix::from_responses(&corpus, options)?;
            return Ok((matrix, Some(corpus)));
        }
        let Some(path) = &self.matrix else {
            bail!("either --responses or --matrix is required");
        };
        if options.mode == AggregationMode::QuestionCentered {
            bail!("question-centering needs --responses with question ids");
        }
        let pooled = RoleFeatureMatrix::load(path)
            .with_context(|| format!("loading role matrix from {}", path.display()))?;
        if pooled.pooling() != options.pooling {
            warn!(
                "Matrix file declares {:?} pooling; --pooling is ignored",
                pooled.pooling()
            );
        }
        let matrix = RoleFeatureMatrix::with_transform(
            pooled.roles().to_vec(),
            pooled.raw().clone(),
            pooled.pooling(),
            options.transform,
        )?;
        Ok((matrix, None))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Bundle {
            input,
            config,
            descriptions,
            output,
        } => run_bundle(&input, config.as_deref(), descriptions.as_deref(), &output),
        Command::Drift {
            input,
            trace,
            assistant_role,
            contrast,
            config,
            output,
        } => run_drift(
            &input,
            &trace,
            &assistant_role,
            &contrast,
            config.as_deref(),
            &output,
        ),
    }
}

fn run_bundle(
    input: &MatrixInput,
    config: Option<&Path>,
    descriptions: Option<&Path>,
    output: &Path,
) -> Result<()> {
    let config = match config {
        Some(path) => AtlasConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AtlasConfig::default(),
    };
    let (matrix, corpus) = input.load(ActivationTransform::Log1p)?;
    let lookup = match descriptions {
        Some(path) => DescriptionLookup::load(path)
            .with_context(|| format!("loading descriptions from {}", path.display()))?,
        None => DescriptionLookup::new(),
    };

    println!("=== persona-atlas: bundle ===");
    println!("Dataset: {}", config.dataset_name);
    println!("Roles:   {}", matrix.n_roles());
    println!("Width:   {}", matrix.n_features());

    let mut builder = BundleBuilder::new(config).with_descriptions(&lookup);
    if let Some(corpus) = &corpus {
        builder = builder.with_responses(corpus);
    }
    let bundle = builder.build(&matrix)?;

    let dir = output.join(&bundle.dataset.name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating output directory {}", dir.display()))?;
    write_bundle_json(&bundle, dir.join("bundle.json"))?;
    write_feature_csv(&bundle.features, dir.join("features.csv"))?;

    println!("\n=== Results ===");
    println!("Selected features: {}", bundle.features.len());
    println!(
        "kNN overlap @ {}:  {:.3}",
        bundle.guardrails.k, bundle.guardrails.overlap_score
    );
    println!("Output: {}", dir.display());
    Ok(())
}

fn run_drift(
    input: &MatrixInput,
    traces: &[PathBuf],
    assistant_role: &str,
    contrast: &[String],
    config: Option<&Path>,
    output: &Path,
) -> Result<()> {
    let config = match config {
        Some(path) => DriftConfig::load(path)
            .with_context(|| format!("loading drift config from {}", path.display()))?,
        None => DriftConfig::default(),
    };
    let (matrix, _) = input.load(ActivationTransform::Identity)?;
    let axis = if contrast.is_empty() {
        AssistantAxis::derive(&matrix, assistant_role)?
    } else {
        AssistantAxis::derive_with_contrast(&matrix, assistant_role, contrast)?
    };

    let loaded = traces
        .iter()
        .map(|path| {
            ConversationTrace::load(path)
                .with_context(|| format!("loading trace from {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    std::fs::create_dir_all(output)
        .with_context(|| format!("creating output directory {}", output.display()))?;
    let scorer = DriftScorer::new(&axis, config);
    let mut failures = 0;
    for ((path, trace), report) in traces.iter().zip(&loaded).zip(scorer.analyze_many(&loaded)) {
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                warn!("Drift analysis failed for {}: {}", path.display(), e);
                failures += 1;
                continue;
            }
        };
        let stem = trace
            .id()
            .map(str::to_string)
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "trace".to_string());
        println!("\n=== {} ===", stem);
        for score in &report.turn_scores {
            println!("Turn {:3}: {:+.4}", score.turn, score.score);
        }
        write_json(&report, output.join(format!("drift_{stem}.json")))?;
    }

    if failures > 0 {
        bail!("{failures} of {} traces failed", traces.len());
    }
    Ok(())
}
