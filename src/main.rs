use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{debug, LevelFilter};
use std::path::PathBuf;

use imgbundle::{
    ArtifactKind, Notifier, PullOptions, PullOutcome, Puller, PushOptions, Pusher, RefSource,
    RegistryClient, RegistryOpts, RewriteOutcome, UsageError,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    registry: RegistryArgs,

    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v for info, -vv for debug, -vvv for trace). Also switches to text-based progress"
    )]
    verbose: u8,
}

#[derive(Args)]
struct RegistryArgs {
    #[arg(
        long,
        global = true,
        env = "IMGBUNDLE_REGISTRY_USERNAME",
        help = "Username for registry authentication"
    )]
    registry_username: Option<String>,

    #[arg(
        long,
        global = true,
        env = "IMGBUNDLE_REGISTRY_PASSWORD",
        hide_env_values = true,
        help = "Password for registry authentication"
    )]
    registry_password: Option<String>,

    #[arg(
        long,
        global = true,
        env = "IMGBUNDLE_REGISTRY_INSECURE",
        help = "Talk to the registry over plain HTTP"
    )]
    registry_insecure: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Download an image or bundle into a directory
    Pull {
        #[arg(short, long, help = "Image reference to pull (e.g., registry.example.com/app:v1)")]
        image: Option<String>,

        #[arg(short, long, help = "Bundle reference to pull")]
        bundle: Option<String>,

        #[arg(long, help = "BundleLock file naming the bundle to pull")]
        lock: Option<PathBuf>,

        #[arg(short, long, help = "Output directory (replaced if it exists)")]
        output: PathBuf,
    },

    /// Package files and upload them as an image or bundle
    Push {
        #[arg(short, long, help = "Image reference to push to")]
        image: Option<String>,

        #[arg(short, long, help = "Bundle reference to push to")]
        bundle: Option<String>,

        #[arg(short, long = "file", required = true, help = "File or directory to include (repeatable)")]
        files: Vec<PathBuf>,

        #[arg(long = "file-exclusion", help = "Relative path to leave out (repeatable)")]
        file_exclusions: Vec<String>,

        #[arg(long, help = "Write a BundleLock for the pushed bundle to this path")]
        lock_output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(log_level)
        .init();

    let notifier = Notifier::new(cli.verbose);
    let registry_opts = RegistryOpts {
        username: cli.registry.registry_username,
        password: cli.registry.registry_password,
        insecure: cli.registry.registry_insecure,
    };
    debug!("Registry insecure: {}", registry_opts.insecure);

    match cli.command {
        Command::Pull {
            image,
            bundle,
            lock,
            output,
        } => {
            // Flag mistakes are reported before any registry connection.
            let source = RefSource::from_flags(image, bundle, lock)?;
            let opts = PullOptions {
                source,
                output_path: output,
            };
            imgbundle::pull::check_output_path(&opts.output_path)?;

            let registry = RegistryClient::new(&registry_opts)
                .context("Failed to initialize registry client")?;
            let outcome = Puller::new(&registry, &notifier)
                .pull(&opts)
                .with_context(|| format!("Failed to pull into {}", opts.output_path.display()))?;
            report_pull(&outcome);
        }
        Command::Push {
            image,
            bundle,
            files,
            file_exclusions,
            lock_output,
        } => {
            let (reference, kind) = match (image, bundle) {
                (Some(image), None) => (image, ArtifactKind::Image),
                (None, Some(bundle)) => (bundle, ArtifactKind::Bundle),
                (Some(_), Some(_)) => return Err(UsageError::MultipleReferenceSources.into()),
                (None, None) => return Err(UsageError::MissingReferenceSource.into()),
            };
            let opts = PushOptions {
                reference,
                kind,
                files,
                file_exclusions,
                lock_output,
            };

            let registry = RegistryClient::new(&registry_opts)
                .context("Failed to initialize registry client")?;
            let outcome = Pusher::new(&registry, &notifier)
                .push(&opts)
                .with_context(|| format!("Failed to push '{}'", opts.reference))?;
            println!("{}", outcome.digest_ref);
        }
    }

    Ok(())
}

fn report_pull(outcome: &PullOutcome) {
    match &outcome.rewrite {
        Some(RewriteOutcome::Skipped { missing }) => {
            debug!("Lock file kept as is, {} is not in the bundle repository", missing)
        }
        Some(RewriteOutcome::Rewritten { count }) => {
            debug!("Relocated {} image(s) into the bundle repository", count)
        }
        Some(RewriteOutcome::NoImages) | None => {}
    }
    println!("{}", outcome.digest_ref);
}
