//! # ratemon-cli
//!
//! Command-line interface for trigger-rate monitoring: fit rate-vs-pileup
//! models on reference runs and certify new runs against them.

use clap::{Parser, Subcommand};
use ratemon::prelude::*;
use ratemon::{load_fits, save_fits, JsonReportWriter, ReportWriter};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type CliResult<T> = std::result::Result<T, String>;

#[derive(Parser)]
#[command(name = "ratemon")]
#[command(about = "Trigger-rate monitoring CLI", long_about = None)]
struct Cli {
    /// Configuration file (JSON); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit rate models on reference runs
    Fit {
        /// Rate fixture file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Runs to fit, comma separated (default: every run of the configured groups)
        #[arg(short, long, value_delimiter = ',')]
        runs: Vec<u32>,

        /// Where to write the fitted models
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Certify runs against previously saved fits
    Certify {
        /// Rate fixture file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Saved fits
        #[arg(short, long)]
        fits: PathBuf,

        /// Runs to certify, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        runs: Vec<u32>,

        /// Override the band multiplier
        #[arg(short, long)]
        sigma: Option<f64>,

        /// Report file, one JSON object per line (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fit reference runs, then certify runs against the new fits
    Run {
        /// Rate fixture file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Runs to fit, comma separated
        #[arg(long, value_delimiter = ',')]
        fit_runs: Vec<u32>,

        /// Runs to certify, comma separated (default: the fitted runs)
        #[arg(long, value_delimiter = ',')]
        certify_runs: Vec<u32>,

        /// Also save the fitted models here
        #[arg(long)]
        save_fits: Option<PathBuf>,

        /// Report file, one JSON object per line (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the selected model of every trigger in a fits file
    Show {
        /// Saved fits
        #[arg(short, long)]
        fits: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> CliResult<RateMonConfig> {
    match path {
        Some(path) => RateMonConfig::from_path(path).map_err(|e| e.to_string()),
        None => Ok(RateMonConfig::default()),
    }
}

fn load_source(path: &PathBuf) -> CliResult<FixtureRateSource> {
    FixtureRateSource::from_path(path).map_err(|e| e.to_string())
}

fn run_ids(runs: &[u32]) -> Vec<RunId> {
    runs.iter().copied().map(RunId::new).collect()
}

fn report_writer(output: Option<&PathBuf>) -> CliResult<JsonReportWriter<Box<dyn Write>>> {
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path).map_err(|e| format!("Failed to create {:?}: {}", path, e))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    Ok(JsonReportWriter::new(sink))
}

fn run_fit(config: RateMonConfig, input: PathBuf, runs: Vec<u32>, output: PathBuf) -> CliResult<()> {
    let source = load_source(&input)?;
    let monitor = RateMonitor::new(config).map_err(|e| e.to_string())?;
    let fitted = monitor
        .fit(&source, &run_ids(&runs))
        .map_err(|e| e.to_string())?;
    save_fits(&fitted.fits, &output).map_err(|e| e.to_string())?;

    println!(
        "Fitted {} models for {} triggers",
        fitted.fits.len(),
        fitted.fits.triggers().count()
    );
    print!("{}", fitted.summary());
    println!("Fits written to {:?}", output);
    Ok(())
}

fn run_certify(
    mut config: RateMonConfig,
    input: PathBuf,
    fits: PathBuf,
    runs: Vec<u32>,
    sigma: Option<f64>,
    output: Option<PathBuf>,
) -> CliResult<()> {
    if let Some(sigma) = sigma {
        config.detector.sigma_multiplier = sigma;
    }
    let source = load_source(&input)?;
    let fits = load_fits(&fits).map_err(|e| e.to_string())?;
    let monitor = RateMonitor::new(config)
        .map_err(|e| e.to_string())?
        .with_fits(fits);

    let certified = monitor
        .certify_runs(&source, &run_ids(&runs))
        .map_err(|e| e.to_string())?;
    let mut writer = report_writer(output.as_ref())?;
    for report in &certified.reports {
        writer.write_report(report).map_err(|e| e.to_string())?;
    }
    eprint!("{}", certified.summary());
    Ok(())
}

fn run_pipeline(
    config: RateMonConfig,
    input: PathBuf,
    fit_runs: Vec<u32>,
    certify_runs: Vec<u32>,
    fits_path: Option<PathBuf>,
    output: Option<PathBuf>,
) -> CliResult<()> {
    let source = load_source(&input)?;
    let monitor = RateMonitor::new(config).map_err(|e| e.to_string())?;
    let mut writer = report_writer(output.as_ref())?;

    let result = monitor
        .run(&source, &run_ids(&fit_runs), &run_ids(&certify_runs), &mut writer)
        .map_err(|e| e.to_string())?;
    if let Some(path) = fits_path {
        save_fits(&result.fits, &path).map_err(|e| e.to_string())?;
        info!(path = ?path, "fits saved");
    }
    eprint!("{}", result.summary());
    Ok(())
}

fn run_show(config: RateMonConfig, fits: PathBuf) -> CliResult<()> {
    let fits = load_fits(&fits).map_err(|e| e.to_string())?;
    let selector = FitSelector::new(config.selection);

    for (group, runs) in fits.run_groups() {
        let runs: Vec<String> = runs.iter().map(|r| r.to_string()).collect();
        println!("group {}: runs {}", group, runs.join(", "));
    }
    for trigger in fits.triggers() {
        for group in fits.groups() {
            let Some(model) = selector.best_for(&fits, trigger, group) else {
                continue;
            };
            println!(
                "{} [{}] {}: mse={:.4} chi2/dof={} coefficients={:?}",
                trigger,
                group,
                model.kind,
                model.residual_mse,
                model
                    .chi_square_per_dof()
                    .map(|v| format!("{:.3}", v))
                    .unwrap_or_else(|| "-".to_string()),
                model.coefficients
            );
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ratemon=info,ratemon_core=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_ref()).and_then(|config| match cli.command {
        Commands::Fit {
            input,
            runs,
            output,
        } => run_fit(config, input, runs, output),

        Commands::Certify {
            input,
            fits,
            runs,
            sigma,
            output,
        } => run_certify(config, input, fits, runs, sigma, output),

        Commands::Run {
            input,
            fit_runs,
            certify_runs,
            save_fits,
            output,
        } => run_pipeline(config, input, fit_runs, certify_runs, save_fits, output),

        Commands::Show { fits } => run_show(config, fits),
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
