//! Command-line driver for the speech-to-speech inference pipeline.
//!
//! Two mutually exclusive input modes: a single WAV file, or a two-column
//! manifest of utterances processed in fixed-size groups. Input selectors and
//! critical assets are validated before any model is loaded; per-utterance
//! failures are logged and the run continues.

use anyhow::Result;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tolk::config::Config;
use tolk::manifest::{parse_manifest, Utterance};
use tolk::runtime::PipelineContext;
use tolk::{load_config, Task};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

type Backend = NdArray<f32>;

#[derive(Parser)]
#[command(name = "tolk")]
#[command(about = "Speech-to-speech translation and spoken chat inference", long_about = None)]
#[command(group(ArgGroup::new("input").required(true).multiple(false)))]
struct Cli {
    /// Decode a single WAV file.
    #[arg(long, group = "input")]
    wav_path: Option<PathBuf>,

    /// Decode every utterance in a `<utt_id> <wav_path>` manifest.
    #[arg(long, group = "input")]
    wav_scp: Option<PathBuf>,

    /// Inference task: asr, ast, s2s_trans or s2s_chat.
    #[arg(long, default_value = "s2s_chat", value_parser = parse_task)]
    task: Task,

    /// Utterances per inference group (currently fixed at 1).
    #[arg(long, default_value_t = 1)]
    batch_size: usize,

    /// Pipeline configuration YAML.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Normalization statistics file.
    #[arg(long)]
    cmvn_path: Option<String>,

    /// SentencePiece tokenizer model.
    #[arg(long)]
    tokenizer_path: Option<String>,

    /// Speech encoder checkpoint.
    #[arg(long)]
    encoder_path: Option<String>,

    /// Modality adapter checkpoint.
    #[arg(long)]
    adapter_path: Option<String>,

    /// Language model checkpoint.
    #[arg(long)]
    llm_path: Option<String>,

    /// Optional LoRA delta checkpoint.
    #[arg(long)]
    lora_path: Option<String>,

    /// Vocoder checkpoint.
    #[arg(long)]
    vocoder_path: Option<String>,

    /// Speaker encoder checkpoint.
    #[arg(long)]
    spk_encoder_path: Option<String>,

    /// Prompt voice sample for the run-wide speaker embedding.
    #[arg(long)]
    prompt_wav_path: Option<String>,

    /// Directory for synthesized waveforms.
    #[arg(long, default_value = "response_wavs")]
    output_dir: PathBuf,
}

fn parse_task(value: &str) -> Result<Task, String> {
    value.parse::<Task>().map_err(|err| err.to_string())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failures) => {
            error!("{failures} utterance(s) failed");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Run the pipeline; returns the number of failed utterances.
fn run() -> Result<usize> {
    let cli = Cli::parse();

    anyhow::ensure!(
        cli.batch_size == 1,
        "only --batch-size 1 is supported for speech-to-speech inference"
    );

    // Resolve the input selection before any model is loaded, so a bad
    // invocation fails fast.
    let (utterances, manifest_mode) = if let Some(scp) = &cli.wav_scp {
        (parse_manifest(scp)?, true)
    } else if let Some(wav) = &cli.wav_path {
        anyhow::ensure!(wav.exists(), "input wav not found: {}", wav.display());
        (vec![Utterance::from_wav_path(wav)], false)
    } else {
        anyhow::bail!("specify --wav-scp or --wav-path as the input");
    };

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    apply_path_overrides(&mut config, &cli);

    std::fs::create_dir_all(&cli.output_dir)?;
    info!("response wavs will be written to {}", cli.output_dir.display());
    info!(
        "task {}: {:?}",
        cli.task,
        cli.task.instruction().trim_end()
    );

    let device = NdArrayDevice::default();
    let ctx = PipelineContext::<Backend>::load(config, cli.task, &device)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupt_flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        interrupt_flag.store(true, Ordering::SeqCst);
    })?;

    let mut failures = 0_usize;
    let mut total_inference = Duration::ZERO;
    for group in utterances.chunks(cli.batch_size) {
        if interrupted.load(Ordering::SeqCst) {
            anyhow::bail!("interrupted");
        }
        let report = ctx.process_group(group, &cli.output_dir);
        total_inference += report.generation_time;
        info!(
            "infer time: {:.3}s",
            report.generation_time.as_secs_f64()
        );
        for utterance in &report.reports {
            if let Err(err) = &utterance.result {
                failures += 1;
                error!("uttid {} failed ({}): {err}", utterance.id, err.reason_code());
            }
        }
    }

    if manifest_mode {
        info!("total inference cost: {:.3}s", total_inference.as_secs_f64());
        info!(
            "attempted {} utterance(s), {} failed",
            utterances.len(),
            failures
        );
    }

    Ok(failures)
}

/// CLI checkpoint flags override whatever the config file provided.
fn apply_path_overrides(config: &mut Config, cli: &Cli) {
    let paths = &mut config.paths;
    let overrides = [
        (&cli.cmvn_path, &mut paths.cmvn_path),
        (&cli.tokenizer_path, &mut paths.tokenizer_path),
        (&cli.encoder_path, &mut paths.encoder_path),
        (&cli.adapter_path, &mut paths.adapter_path),
        (&cli.llm_path, &mut paths.llm_path),
        (&cli.lora_path, &mut paths.lora_path),
        (&cli.vocoder_path, &mut paths.vocoder_path),
        (&cli.spk_encoder_path, &mut paths.spk_encoder_path),
        (&cli.prompt_wav_path, &mut paths.prompt_wav_path),
    ];
    for (flag, slot) in overrides {
        if flag.is_some() {
            *slot = flag.clone();
        }
    }
}
