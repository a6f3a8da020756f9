use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use herobatch_contracts::prompt::{build_image_prompt, DEFAULT_COPY_LANGUAGE};
use herobatch_contracts::records::ColumnMap;
use herobatch_engine::config::{DEFAULT_DISPLAY_NAME, DEFAULT_MODEL};
use herobatch_engine::{
    load_products, BatchPipeline, DryrunService, GeminiService, GenerationService,
    HttpAssetSource, PipelineConfig, PollPolicy,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug, Parser)]
#[command(name = "herobatch", version, about = "Batch hero-image generation for product catalogs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate hero images for every row of a product CSV or xlsx sheet.
    Run(RunArgs),
    /// Load a product sheet and report what a run would do, without network access.
    Inspect(InspectArgs),
    /// Print the prompt used for one product.
    Prompt(PromptArgs),
}

#[derive(Debug, Clone, Args)]
struct ColumnArgs {
    #[arg(long, default_value = "SKU")]
    key_column: String,
    #[arg(long, default_value = "productName")]
    name_column: String,
    #[arg(long, default_value = "description")]
    description_column: String,
    #[arg(long, default_value = "imageURL")]
    image_url_column: String,
}

impl ColumnArgs {
    fn to_map(&self) -> ColumnMap {
        ColumnMap {
            key: self.key_column.clone(),
            name: self.name_column.clone(),
            description: self.description_column.clone(),
            image_url: self.image_url_column.clone(),
        }
    }
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value = "herobatch_run")]
    work_dir: PathBuf,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    skip_report: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    #[arg(long, default_value = DEFAULT_DISPLAY_NAME)]
    display_name: String,
    /// Language of the text drawn onto the images.
    #[arg(long, default_value = DEFAULT_COPY_LANGUAGE)]
    copy_language: String,
    #[arg(long, default_value_t = 30)]
    download_timeout_secs: u64,
    #[arg(long, default_value_t = 30)]
    batch_poll_secs: u64,
    #[arg(long, default_value_t = 24 * 60 * 60)]
    batch_timeout_secs: u64,
    #[arg(long, default_value_t = 5 * 60)]
    asset_timeout_secs: u64,
    /// Use the in-memory service instead of the Gemini API.
    #[arg(long)]
    dryrun: bool,
    #[command(flatten)]
    columns: ColumnArgs,
}

impl RunArgs {
    fn to_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::new(&self.input, &self.work_dir);
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        if let Some(skip_report) = &self.skip_report {
            config.skip_report_path = skip_report.clone();
        }
        config.columns = self.columns.to_map();
        config.model = self.model.clone();
        config.display_name = self.display_name.clone();
        config.copy_language = self.copy_language.clone();
        config.download_timeout = Duration::from_secs(self.download_timeout_secs);
        config.asset_poll = PollPolicy::asset_processing()
            .with_max_elapsed(Duration::from_secs(self.asset_timeout_secs));
        config.batch_poll = PollPolicy::batch_job()
            .with_initial_interval(Duration::from_secs(self.batch_poll_secs))
            .with_max_elapsed(Duration::from_secs(self.batch_timeout_secs));
        config
    }
}

#[derive(Debug, Args)]
struct InspectArgs {
    #[arg(long)]
    input: PathBuf,
    #[command(flatten)]
    columns: ColumnArgs,
}

#[derive(Debug, Args)]
struct PromptArgs {
    #[arg(long, default_value = "")]
    name: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, default_value = DEFAULT_COPY_LANGUAGE)]
    language: String,
}

fn main() {
    init_logging();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("herobatch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(filter),
    );
    if subscriber.try_init().is_err() {
        tracing::debug!("tracing subscriber already set");
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_batch(args),
        Command::Inspect(args) => run_inspect(args),
        Command::Prompt(args) => {
            println!("{}", build_image_prompt(&args.name, &args.description, &args.language));
            Ok(0)
        }
    }
}

fn run_batch(args: RunArgs) -> Result<i32> {
    let config = args.to_config();
    let service: Box<dyn GenerationService> = if args.dryrun {
        Box::new(DryrunService::new())
    } else {
        Box::new(GeminiService::from_env()?)
    };
    let source = HttpAssetSource::new(config.download_timeout)?;

    let report = BatchPipeline::new(&config, service.as_ref(), Box::new(source)).run()?;

    println!(
        "{} of {} products rendered into {}",
        report.summary.produced,
        report.summary.input_rows,
        config.output_dir.display()
    );
    match &report.skip_report {
        Some(path) => println!("{} skipped; see {}", report.summary.skipped, path.display()),
        None => println!("no products skipped"),
    }
    if report.batch_status.is_whole_batch_failure() {
        println!("batch did not succeed: {}", report.batch_status.label());
    }
    Ok(0)
}

fn run_inspect(args: InspectArgs) -> Result<i32> {
    let table = load_products(&args.input, &args.columns.to_map())?;
    let without_url = table
        .records()
        .iter()
        .filter(|record| record.image_url.is_empty())
        .count();
    println!("columns: {}", table.columns().join(", "));
    println!("rows: {}", table.len());
    println!("rows without image URL: {without_url}");
    for record in table.records() {
        println!("{}\t{}", record.key, record.name);
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn run_args_build_config() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "herobatch",
            "run",
            "--input",
            "products.csv",
            "--work-dir",
            "out",
            "--key-column",
            "id",
            "--batch-timeout-secs",
            "60",
            "--dryrun",
        ])?;
        let Command::Run(args) = cli.command else {
            anyhow::bail!("expected run command");
        };
        assert!(args.dryrun);
        let config = args.to_config();
        assert_eq!(config.input_path, Path::new("products.csv"));
        assert_eq!(config.output_dir, Path::new("out/output_images"));
        assert_eq!(config.columns.key, "id");
        assert_eq!(config.columns.name, "productName");
        assert_eq!(config.batch_poll.max_elapsed, Duration::from_secs(60));
        assert_eq!(config.batch_poll.initial_interval, Duration::from_secs(30));
        assert_eq!(config.download_timeout, Duration::from_secs(30));
        assert_eq!(config.copy_language, "Traditional Chinese (Taiwan)");
        assert_eq!(config.skip_report_path, Path::new("out/skipped_products.csv"));
        Ok(())
    }

    #[test]
    fn explicit_output_paths_override_work_dir() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "herobatch",
            "run",
            "--input",
            "p.csv",
            "--output-dir",
            "images",
            "--skip-report",
            "skipped.csv",
        ])?;
        let Command::Run(args) = cli.command else {
            anyhow::bail!("expected run command");
        };
        let config = args.to_config();
        assert_eq!(config.output_dir, Path::new("images"));
        assert_eq!(config.skip_report_path, Path::new("skipped.csv"));
        assert_eq!(config.work_dir, Path::new("herobatch_run"));
        Ok(())
    }

    #[test]
    fn copy_language_and_workbook_input_flow_into_config() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "herobatch",
            "run",
            "--input",
            "products.xlsx",
            "--copy-language",
            "English",
        ])?;
        let Command::Run(args) = cli.command else {
            anyhow::bail!("expected run command");
        };
        let config = args.to_config();
        assert_eq!(config.copy_language, "English");
        assert_eq!(
            config.skip_report_path,
            Path::new("herobatch_run/skipped_products.xlsx")
        );
        Ok(())
    }

    #[test]
    fn run_requires_input() {
        assert!(Cli::try_parse_from(["herobatch", "run"]).is_err());
    }
}
