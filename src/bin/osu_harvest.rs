use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use osu_beatmap_harvester::batch::{BatchSpec, run_batch};
use osu_beatmap_harvester::config::{ConfigLoader, HarvestConfig};
use osu_beatmap_harvester::credentials::{Credential, CredentialStore};
use osu_beatmap_harvester::domain::Category;
use osu_beatmap_harvester::error::HarvestError;
use osu_beatmap_harvester::library::Library;
use osu_beatmap_harvester::output::JsonOutput;
use osu_beatmap_harvester::paginator::SearchQuery;
use osu_beatmap_harvester::pipeline::{HarvestJob, Harvester, RunOutcome};
use osu_beatmap_harvester::session::OsuSession;
use osu_beatmap_harvester::upload::{ConfiguredStore, UploadSync};

const EXIT_ABORTED: u8 = 4;

#[derive(Parser)]
#[command(name = "osu-harvest")]
#[command(about = "Scrape osu! beatmap sets and keep their artwork and audio")]
#[command(version)]
struct Cli {
    /// Path to a JSON config file (default: ./osu-harvest.json if present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Scrape, download and extract one category")]
    Download(DownloadArgs),
    #[command(about = "Run a list of download jobs from a JSON file")]
    Batch(BatchArgs),
    #[command(about = "Manage stored login credentials")]
    Credentials(CredentialArgs),
    #[command(about = "Inspect the local library")]
    Library(LibraryArgs),
}

#[derive(Args, Clone)]
struct LoginArgs {
    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Store the given credentials for later runs
    #[arg(long)]
    remember: bool,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(short, long)]
    category: Category,

    #[arg(short, long, default_value_t = 200)]
    limit: usize,

    /// Free-text search filter
    #[arg(short, long)]
    query: Option<String>,

    #[arg(long, default_value = "favourites_desc")]
    sort: String,

    /// Extra search parameter as key=value
    #[arg(long = "param", value_parser = parse_key_value)]
    params: Vec<(String, String)>,

    #[arg(long)]
    no_video: bool,

    /// Skip remote upload even if configured
    #[arg(long)]
    no_upload: bool,

    #[command(flatten)]
    login: LoginArgs,
}

#[derive(Args)]
struct BatchArgs {
    #[arg(long)]
    jobs: PathBuf,

    #[arg(long)]
    no_upload: bool,

    #[command(flatten)]
    login: LoginArgs,
}

#[derive(Args)]
#[command(group(ArgGroup::new("action").required(true).args(["check", "delete", "set"])))]
struct CredentialArgs {
    #[arg(long)]
    check: bool,

    #[arg(long)]
    delete: bool,

    #[arg(long, requires_all = ["username", "password"])]
    set: bool,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,
}

#[derive(Args)]
struct LibraryArgs {
    #[command(subcommand)]
    command: LibraryCommand,
}

#[derive(Subcommand)]
enum LibraryCommand {
    #[command(about = "List categories, or items of one category")]
    List { category: Option<Category> },
    #[command(about = "List the media files of one item")]
    Show { category: Category, item: String },
}

fn parse_key_value(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{value}`"))
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            match report.downcast_ref::<HarvestError>() {
                Some(err) => ExitCode::from(map_exit_code(err)),
                None => ExitCode::from(1),
            }
        }
    }
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        err if err.is_auth() => 2,
        HarvestError::ItemNotFound(_) => 2,
        HarvestError::SiteHttp(_)
        | HarvestError::Schema(_)
        | HarvestError::ExhaustedResults { .. }
        | HarvestError::DownloadFailed { .. }
        | HarvestError::ObjectStoreHttp(_)
        | HarvestError::ObjectStoreStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Download(args) => run_download(args, config),
        Commands::Batch(args) => run_batch_command(args, config),
        Commands::Credentials(args) => run_credentials(args),
        Commands::Library(args) => run_library(args, config),
    }
}

fn resolve_credential(login: &LoginArgs) -> Result<Credential, HarvestError> {
    let store = CredentialStore::new()?;
    if let (Some(username), Some(password)) = (&login.username, &login.password) {
        let credential = Credential::new(username, password);
        if login.remember {
            store.save(&credential)?;
        }
        return Ok(credential);
    }
    if let Some(credential) = store.load()? {
        return Ok(credential);
    }
    Credential::from_env().ok_or(HarvestError::MissingCredentials)
}

fn build_harvester(
    config: &HarvestConfig,
    login: &LoginArgs,
    no_upload: bool,
) -> miette::Result<Harvester<OsuSession, ConfiguredStore>> {
    let credential = resolve_credential(login)?;
    let session = OsuSession::authenticate(&config.site, &credential)?;
    let library = Library::new(config.download_root.clone())?;
    let mut harvester = Harvester::new(
        session,
        library,
        config.filter.clone(),
        config.run.clone(),
        config.site.cursor_mode,
    );
    if let Some(upload) = config.upload.as_ref().filter(|_| !no_upload) {
        let store = ConfiguredStore::from_config(upload)?;
        harvester = harvester.with_uploader(UploadSync::new(store, upload, config.filter.clone()));
    }
    Ok(harvester)
}

fn run_download(args: DownloadArgs, mut config: HarvestConfig) -> miette::Result<ExitCode> {
    config.run.no_video |= args.no_video;
    let harvester = build_harvester(&config, &args.login, args.no_upload)?;

    let mut query = SearchQuery::new().with("sort", args.sort);
    if let Some(text) = args.query {
        query = query.with("q", text);
    }
    for (key, value) in args.params {
        query = query.with(key, value);
    }
    let job = HarvestJob {
        category: args.category,
        query,
        limit: args.limit,
    };

    let outcome = harvester.harvest(&job)?;
    JsonOutput::print_run(&outcome).into_diagnostic()?;
    Ok(exit_for(&outcome))
}

fn run_batch_command(args: BatchArgs, config: HarvestConfig) -> miette::Result<ExitCode> {
    let spec = BatchSpec::load(&args.jobs)?;
    let harvester = build_harvester(&config, &args.login, args.no_upload)?;
    let report = run_batch(&harvester, &spec)?;
    JsonOutput::print_batch(&report).into_diagnostic()?;
    if report.all_completed() {
        Ok(ExitCode::SUCCESS)
    } else if report.jobs.iter().any(|job| job.error.is_some()) {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::from(EXIT_ABORTED))
    }
}

fn exit_for(outcome: &RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Completed { .. } => ExitCode::SUCCESS,
        RunOutcome::Aborted { .. } => ExitCode::from(EXIT_ABORTED),
    }
}

fn run_credentials(args: CredentialArgs) -> miette::Result<ExitCode> {
    let store = CredentialStore::new()?;
    if args.check {
        if store.exists() {
            println!("Credential file exists: {}", store.path().display());
        } else {
            println!("There is no credential file");
        }
    } else if args.delete {
        if store.delete()? {
            println!("Credential file successfully deleted");
        } else {
            println!("There is no credential file to delete");
        }
    } else if let (Some(username), Some(password)) = (args.username, args.password) {
        store.save(&Credential::new(username, password))?;
        println!("Credentials saved to {}", store.path().display());
    }
    Ok(ExitCode::SUCCESS)
}

fn run_library(args: LibraryArgs, config: HarvestConfig) -> miette::Result<ExitCode> {
    let library = Library::new(config.download_root.clone())?;
    match args.command {
        LibraryCommand::List { category: None } => {
            JsonOutput::print_names(&library.categories()?).into_diagnostic()?;
        }
        LibraryCommand::List {
            category: Some(category),
        } => {
            JsonOutput::print_names(&library.items(&category)?).into_diagnostic()?;
        }
        LibraryCommand::Show { category, item } => {
            let manifest = library.manifest(&category, &item, &config.filter)?;
            JsonOutput::print_manifest(&manifest).into_diagnostic()?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
