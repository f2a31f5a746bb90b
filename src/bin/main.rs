use anyhow::Context;
use clap::{Parser, Subcommand};
use eoka_harvest::{
    Config, EokaDriver, Harvester, HttpLlm, Params, PatchLoop, PatchOutcome, Policy,
    SelectorOracle, TokioProcessRunner,
};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "eoka-harvest")]
#[command(about = "Self-repairing listing scraper")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Set a parameter (can be used multiple times)
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE", global = true)]
    params: Vec<String>,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Log in if configured and harvest the listing to JSONL
    Scrape {
        config: PathBuf,

        /// Run in headless mode (overrides config)
        #[arg(long)]
        headless: bool,

        /// Locator policy (defaults to patch.policy when it exists)
        #[arg(long)]
        policy: Option<PathBuf>,
    },

    /// Ask the oracle what the listing page contains
    Explore {
        config: PathBuf,

        #[arg(long)]
        headless: bool,

        /// Seed a locator policy from the resolved selectors
        #[arg(long, value_name = "FILE")]
        write_policy: Option<PathBuf>,
    },

    /// Run the configured command, repairing the locator policy on failure
    Patch { config: PathBuf },

    /// Print the reduced form of an HTML file
    Reduce {
        file: PathBuf,

        #[arg(long, default_value_t = 7000)]
        budget: usize,
    },

    /// Validate config without running
    Check { config: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    // stderr, so a supervising patch loop sees the warnings
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let params = Params::from_args(&cli.params)?;

    match cli.command {
        Command::Scrape {
            config,
            headless,
            policy,
        } => scrape(&config, &params, headless, policy).await,
        Command::Explore {
            config,
            headless,
            write_policy,
        } => explore(&config, &params, headless, write_policy).await,
        Command::Patch { config } => patch(&config, &cli.params, &params).await,
        Command::Reduce { file, budget } => {
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            println!("{}", eoka_harvest::Reducer::new(budget).reduce(&html).as_str());
            Ok(())
        }
        Command::Check { config } => check(&config, &params),
    }
}

fn load(path: &Path, params: &Params) -> anyhow::Result<Config> {
    Config::load_with_params(path, params).with_context(|| format!("loading {}", path.display()))
}

fn oracle(config: &Config) -> anyhow::Result<SelectorOracle> {
    Ok(SelectorOracle::new(
        HttpLlm::new(&config.oracle)?,
        config.oracle.token_budget,
    ))
}

async fn scrape(
    path: &Path,
    params: &Params,
    headless: bool,
    policy: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = load(path, params)?;
    if headless {
        config.browser.headless = true;
    }
    let policy_path = policy.unwrap_or_else(|| config.patch.policy.clone());
    let policy = Policy::load_or_default(&policy_path)
        .with_context(|| format!("loading policy {}", policy_path.display()))?;

    println!("Harvesting: {}", config.name);
    if policy.version > 0 {
        println!("  Policy: v{} ({} locators)", policy.version, policy.locators.len());
    }

    let oracle = oracle(&config)?;
    let driver = EokaDriver::launch(&config.browser).await?;
    let result = Harvester::new(&driver, &oracle, &config)
        .with_policy(policy)
        .harvest()
        .await;
    driver.close().await?;
    let traversal = result?;

    println!();
    println!("  Records: {}", traversal.records.len());
    println!("  Pages: {}", traversal.pages_visited.len());
    println!("  Output: {}", config.output.records.display());
    println!("  Stopped: {}", traversal.end);

    if !traversal.is_complete() {
        eprintln!("Error: traversal {}", traversal.end);
        std::process::exit(1);
    }
    Ok(())
}

async fn explore(
    path: &Path,
    params: &Params,
    headless: bool,
    write_policy: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = load(path, params)?;
    if headless {
        config.browser.headless = true;
    }

    let oracle = oracle(&config)?;
    let driver = EokaDriver::launch(&config.browser).await?;
    let result = Harvester::new(&driver, &oracle, &config).explore().await;
    driver.close().await?;
    let exploration = result?;

    println!("Site: {}", exploration.url);
    match exploration.useful {
        Some(true) => println!("  Content: useful"),
        Some(false) => println!("  Content: banners or loaders only"),
        None => println!("  Content: no verdict"),
    }
    println!("  Type: {}", exploration.profile.site_type);
    println!("  Login: {}", exploration.profile.has_login);
    if !exploration.plan.reasoning.is_empty() {
        println!("\n{}\n", exploration.plan.reasoning.trim());
    }
    for (target, result) in &exploration.locators {
        println!("  {:<24} {}", target, result);
    }

    if let Some(out) = write_policy {
        match exploration.to_policy() {
            Some(policy) => {
                policy.save(&out)?;
                println!("\nWrote {} locators to {}", policy.locators.len(), out.display());
            }
            None => println!("\nNo selectors resolved; {} not written", out.display()),
        }
    }
    Ok(())
}

async fn patch(path: &Path, raw_params: &[String], params: &Params) -> anyhow::Result<()> {
    let config = load(path, params)?;
    let oracle = oracle(&config)?;
    let runner = TokioProcessRunner;

    let mut patch_loop = PatchLoop::new(&runner, &oracle, &config.patch);
    if patch_loop.command().is_empty() {
        let exe = std::env::current_exe().context("locating own executable")?;
        let mut command = vec![
            exe.display().to_string(),
            "scrape".to_string(),
            path.display().to_string(),
            "--policy".to_string(),
            config.patch.policy.display().to_string(),
        ];
        for p in raw_params {
            command.push("-P".to_string());
            command.push(p.clone());
        }
        patch_loop = patch_loop.with_command(command);
    }

    let report = patch_loop.run().await?;
    println!();
    match report.outcome {
        PatchOutcome::Succeeded => println!("✓ Succeeded"),
        PatchOutcome::TimedOut => println!("✗ Timed out"),
        PatchOutcome::OutOfScope => println!("✗ Failed outside the locator policy"),
        PatchOutcome::CycleLimit => println!("✗ Gave up after {} runs", report.cycles),
    }
    println!("  Runs: {}", report.cycles);
    println!("  Patches applied: {}", report.applied);
    println!("  Patches rejected: {}", report.rejected);

    if report.outcome != PatchOutcome::Succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn check(path: &Path, params: &Params) -> anyhow::Result<()> {
    let config = load(path, params)?;
    println!("Config valid: {}", config.name);
    println!("  Target: {}", config.target.url);
    if let Some(ref login) = config.target.login_url {
        println!("  Login: {}", login);
    }
    println!("  Oracle: {:?} {}", config.oracle.provider, config.oracle.model);
    println!("  Cards: {}", config.listing.card);
    println!("  Full page: {}", config.listing.full_page);
    println!("  Policy: {}", config.patch.policy.display());
    println!("  Max patch cycles: {}", config.patch.max_cycles);
    if !config.params.is_empty() {
        println!("  Parameters: {}", config.params.len());
        for (name, def) in &config.params {
            let req = if def.required { " (required)" } else { "" };
            let desc = def.description.as_deref().unwrap_or("");
            println!("    - {}{}: {}", name, req, desc);
        }
    }
    Ok(())
}
