use clap::{Args, Parser, Subcommand, ValueEnum};
use planfit::report::{AssignmentReport, PreferenceReport};
use planfit::roster::load_planning_input;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "planfit",
    about = "Assign employees to health insurance plans with a mixed integer program",
    version
)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Solve a roster and print the assignment
    Solve(SolveArgs),
    /// Print the preference score of every offered plan
    Scores(ScoresArgs),
}

#[derive(Args, Debug)]
struct SolveArgs {
    /// Planning document (.yaml) or wide roster export (.csv)
    input: PathBuf,
    /// Configuration file replacing the one in the input
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Format::Yaml)]
    format: Format,
    /// Override the maximum number of distinct plans
    #[arg(long)]
    max_plans: Option<usize>,
    /// Solver time limit in seconds
    #[arg(long)]
    time_limit: Option<f64>,
    /// Do not require an HSA-eligible plan to be in use
    #[arg(long)]
    allow_no_hsa: bool,
}

#[derive(Args, Debug)]
struct ScoresArgs {
    input: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Yaml,
    Table,
}

fn init_logging(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| -> Box<dyn std::error::Error> { err })?;
    Ok(())
}

fn solve(args: SolveArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut input = load_planning_input(&args.input, args.config.as_deref())?;
    if let Some(max) = args.max_plans {
        input.config = input.config.with_max_distinct_plans(max);
    }
    if let Some(seconds) = args.time_limit {
        input.config = input.config.with_time_limit_secs(seconds);
    }
    if args.allow_no_hsa {
        input.config = input.config.with_require_hsa(false);
    }

    let result = input.solve()?;
    match args.format {
        Format::Yaml => println!("{}", serde_yaml::to_string(&result)?),
        Format::Table => print!("{}", AssignmentReport(&result)),
    }

    if result.is_optimal() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}

fn scores(args: ScoresArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let input = load_planning_input(&args.input, args.config.as_deref())?;
    let scores = input.preference_scores()?;
    print!("{}", PreferenceReport(&scores.rows()));
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Command::Solve(args) => solve(args),
        Command::Scores(args) => scores(args),
    }
}
