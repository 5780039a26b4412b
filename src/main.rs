use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use forgor::assistant::{Assistant, GenerateOptions};
use forgor::clock::{SystemTimeProvider, TimeProvider};
use forgor::config::{Config, OutputFormat, parse_tool_list};
use forgor::context::ToolCategory;
use forgor::context::cache::ContextCache;
use forgor::context::disk::DiskStore;
use forgor::llm::factory::ProviderFactory;
use std::process::{ExitCode, Stdio};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const VERBOSE_ENV: &str = "FORGOR_VERBOSE";

fn cli() -> Command {
    Command::new("forgor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Turns a plain-language request into a shell command")
        .long_about(
            "forgor asks an LLM for the shell command you forgot, checks how dangerous it is \
             and only runs it when you say so",
        )
        .args_conflicts_with_subcommands(true)
        .arg(Arg::new("query")
            .help("What you want to do, in plain language")
            .num_args(1..))
        .arg(Arg::new("profile")
            .short('p')
            .long("profile")
            .help("Profile to use instead of the default")
            .value_name("PROFILE")
            .global(true))
        .arg(Arg::new("explain")
            .short('e')
            .long("explain")
            .help("Include an explanation of the command")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("format")
            .short('f')
            .long("format")
            .help("Output format")
            .value_parser(["plain", "json"])
            .global(true))
        .arg(Arg::new("confirm")
            .short('c')
            .long("confirm")
            .help("Offer to run the command after showing it")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("run")
            .short('R')
            .long("run")
            .help("Run the command without asking (critical commands still ask)")
            .action(ArgAction::SetTrue)
            .global(true))
        .arg(Arg::new("allow-critical")
            .long("allow-critical")
            .help("With --run, also skip the prompt for critical commands")
            .action(ArgAction::SetTrue)
            .global(true))
        .arg(Arg::new("history")
            .long("history")
            .help("Number of recent shell commands to send as context")
            .value_name("N")
            .value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("local-only")
            .long("local-only")
            .help("Refuse any network call")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .help("Debug logging and extra detail")
            .action(ArgAction::SetTrue)
            .global(true))
        .subcommand(Command::new("explain")
            .about("Explain what a command does")
            .arg(Arg::new("command")
                .help("The command to explain")
                .required(true)
                .num_args(1..)))
        .subcommand(Command::new("run")
            .about("Run the last generated command after re-checking it"))
        .subcommand(config_command())
        .subcommand(Command::new("version")
            .about("Show version information"))
}

fn config_command() -> Command {
    Command::new("config")
        .about("Manage configuration, custom tools and the context cache")
        .subcommand_required(true)
        .subcommand(Command::new("init")
            .about("Write a default config file")
            .arg(Arg::new("force")
                .long("force")
                .help("Overwrite an existing file")
                .action(ArgAction::SetTrue)))
        .subcommand(Command::new("show")
            .about("Show the configuration with credentials masked"))
        .subcommand(Command::new("set-default")
            .about("Set the default profile")
            .arg(Arg::new("profile").required(true)))
        .subcommand(Command::new("list-providers")
            .about("List profiles and whether each one is usable"))
        .subcommand(Command::new("tools")
            .about("Manage tools that detection cannot find")
            .subcommand_required(true)
            .subcommand(Command::new("list")
                .about("List custom tools")
                .arg(Arg::new("category")))
            .subcommand(Command::new("add")
                .about("Add comma-separated tools to a category")
                .arg(Arg::new("category").required(true))
                .arg(Arg::new("tools").required(true)))
            .subcommand(Command::new("remove")
                .about("Remove comma-separated tools from a category")
                .arg(Arg::new("category").required(true))
                .arg(Arg::new("tools").required(true)))
            .subcommand(Command::new("clear")
                .about("Clear one category, or all of them")
                .arg(Arg::new("category").required(true).help("A category or 'all'")))
            .subcommand(Command::new("categories")
                .about("List valid categories")))
        .subcommand(Command::new("cache")
            .about("Inspect or rebuild the system-context cache")
            .subcommand_required(true)
            .subcommand(Command::new("status")
                .about("Show cache age and contents"))
            .subcommand(Command::new("refresh")
                .about("Rebuild the cache now")
                .arg(Arg::new("background")
                    .long("background")
                    .help("Rebuild in a detached process and return immediately")
                    .action(ArgAction::SetTrue)))
            .subcommand(Command::new("clear")
                .about("Delete the cache"))
            .subcommand(Command::new("location")
                .about("Print the cache file path")))
}

fn verbose_requested(matches: &ArgMatches) -> bool {
    matches.get_flag("verbose")
        || std::env::var(VERBOSE_ENV)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
}

/// `RUST_LOG` wins; otherwise `warn`, or `debug` when verbose.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn format_arg(matches: &ArgMatches) -> Result<Option<OutputFormat>> {
    matches
        .get_one::<String>("format")
        .map(|f| f.parse::<OutputFormat>().map_err(anyhow::Error::msg))
        .transpose()
}

fn joined(matches: &ArgMatches, id: &str) -> String {
    matches
        .get_many::<String>(id)
        .unwrap_or_default()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

fn profile_arg(matches: &ArgMatches) -> String {
    matches.get_one::<String>("profile").cloned().unwrap_or_default()
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    let verbose = verbose_requested(&matches);
    init_tracing(verbose);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted, cancelling in-flight requests");
            on_signal.cancel();
        }
    });

    match run(&matches, verbose, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if verbose {
                for cause in e.chain().skip(1) {
                    eprintln!("  Caused by: {}", cause);
                }
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(matches: &ArgMatches, verbose: bool, cancel: CancellationToken) -> Result<()> {
    match matches.subcommand() {
        Some(("version", _)) => {
            println!(
                "forgor {} ({}-{})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            );
            Ok(())
        }
        Some(("config", sub)) => run_config(sub).await,
        Some(("explain", sub)) => {
            let assistant = Assistant::new(Config::load_or_minimal(), verbose, cancel);
            let result = assistant
                .explain(&joined(sub, "command"), &profile_arg(sub), format_arg(sub)?)
                .await;
            assistant.finish().await;
            result
        }
        Some(("run", sub)) => {
            let assistant = Assistant::new(Config::load_or_minimal(), verbose, cancel);
            let result = assistant
                .run_last(sub.get_flag("run"), sub.get_flag("allow-critical"))
                .await;
            assistant.finish().await;
            result
        }
        Some((other, _)) => bail!("Unknown command '{}'", other),
        None => {
            let options = GenerateOptions {
                query: joined(matches, "query"),
                profile: profile_arg(matches),
                include_explanation: matches.get_flag("explain"),
                format: format_arg(matches)?,
                confirm: matches.get_flag("confirm"),
                force_run: matches.get_flag("run"),
                allow_critical: matches.get_flag("allow-critical"),
                history_count: matches.get_one::<usize>("history").copied(),
                local_only: matches.get_flag("local-only"),
            };
            if options.query.trim().is_empty() {
                bail!("No query provided. Use 'forgor --help' for usage information.");
            }
            info!("Processing query: {:?}", options.query);

            let assistant = Assistant::new(Config::load_or_minimal(), verbose, cancel);
            let result = assistant.generate(&options).await;
            assistant.finish().await;
            result
        }
    }
}

async fn run_config(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("init", sub)) => {
            let path = Config::config_path()?;
            if path.exists() && !sub.get_flag("force") {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save_to(&path)?;
            println!("✅ Wrote default configuration to {}", path.display());
            println!("   Set OPENAI_API_KEY, ANTHROPIC_API_KEY or GOOGLE_AI_API_KEY, or edit the profiles.");
            Ok(())
        }
        Some(("show", _)) => {
            let config = Config::load_or_minimal();
            println!("# {}", Config::config_path()?.display());
            print!("{}", config.to_masked_yaml()?);
            Ok(())
        }
        Some(("set-default", sub)) => {
            let name = sub
                .get_one::<String>("profile")
                .context("profile name is required")?;
            let mut config = Config::load()?;
            config.set_default_profile(name)?;
            config.save()?;
            println!("✅ Default profile is now '{}'", name);
            Ok(())
        }
        Some(("list-providers", _)) => {
            let factory = ProviderFactory::new(Config::load_or_minimal());
            for listing in factory.list_providers() {
                let marker = if listing.is_default { "*" } else { " " };
                match &listing.result {
                    Ok(info) => println!(
                        "{} {:<12} {:<10} {:<28} ✅ {}",
                        marker,
                        listing.profile,
                        listing.vendor,
                        listing.model,
                        info.capabilities.join(", ")
                    ),
                    Err(e) => println!(
                        "{} {:<12} {:<10} {:<28} ❌ {}",
                        marker, listing.profile, listing.vendor, listing.model, e
                    ),
                }
            }
            Ok(())
        }
        Some(("tools", sub)) => run_tools(sub).await,
        Some(("cache", sub)) => run_cache(sub).await,
        _ => bail!("Unknown config command. Use 'forgor config --help'."),
    }
}

fn category_arg(matches: &ArgMatches) -> Result<ToolCategory> {
    let raw = matches
        .get_one::<String>("category")
        .context("category is required")?;
    raw.parse::<ToolCategory>().map_err(anyhow::Error::msg)
}

fn tools_arg(matches: &ArgMatches) -> Vec<String> {
    matches
        .get_one::<String>("tools")
        .map(|csv| parse_tool_list(csv))
        .unwrap_or_default()
}

fn context_cache(config: &Config) -> ContextCache {
    let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    Assistant::context_cache(config, clock)
}

/// Custom tools feed the inventory, so every change drops the cache.
async fn invalidate_cache(config: &Config) {
    match context_cache(config).clear().await {
        Ok(_) => debug!("Context cache invalidated after custom tool change"),
        Err(e) => debug!("Could not invalidate context cache: {:#}", e),
    }
}

async fn run_tools(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("categories", _)) => {
            for category in ToolCategory::ALL {
                println!("{:<20} {}", category.tag(), category.title());
            }
            Ok(())
        }
        Some(("list", sub)) => {
            let config = Config::load_or_minimal();
            let only = sub
                .get_one::<String>("category")
                .map(|c| c.parse::<ToolCategory>().map_err(anyhow::Error::msg))
                .transpose()?;
            if config.custom_tools.is_empty() {
                println!("No custom tools configured.");
                return Ok(());
            }
            for (category, tools) in config.custom_tools.iter() {
                if only.is_some_and(|c| c != category) || tools.is_empty() {
                    continue;
                }
                println!("{}: {}", category.tag(), tools.join(", "));
            }
            Ok(())
        }
        Some(("add", sub)) => {
            let category = category_arg(sub)?;
            let tools = tools_arg(sub);
            if tools.is_empty() {
                bail!("No tools given");
            }
            let mut config = Config::load_for_update()?;
            let added = config.custom_tools.add(category, &tools);
            for tool in &added {
                if which::which(tool).is_err() {
                    eprintln!("⚠️  '{}' is not on PATH; it will be listed anyway", tool);
                }
            }
            config.save()?;
            invalidate_cache(&config).await;
            if added.is_empty() {
                println!("Nothing to add; all tools were already listed under {}", category.tag());
            } else {
                println!("✅ Added to {}: {}", category.tag(), added.join(", "));
            }
            Ok(())
        }
        Some(("remove", sub)) => {
            let category = category_arg(sub)?;
            let tools = tools_arg(sub);
            let mut config = Config::load_for_update()?;
            let removed = config.custom_tools.remove(category, &tools);
            if removed.is_empty() {
                println!("Nothing removed from {}", category.tag());
                return Ok(());
            }
            config.save()?;
            invalidate_cache(&config).await;
            println!("✅ Removed from {}: {}", category.tag(), removed.join(", "));
            Ok(())
        }
        Some(("clear", sub)) => {
            let raw = sub
                .get_one::<String>("category")
                .context("category is required")?;
            let category = if raw.trim().eq_ignore_ascii_case("all") {
                None
            } else {
                Some(raw.parse::<ToolCategory>().map_err(anyhow::Error::msg)?)
            };
            let mut config = Config::load_for_update()?;
            config.custom_tools.clear(category);
            config.save()?;
            invalidate_cache(&config).await;
            match category {
                Some(c) => println!("✅ Cleared custom tools in {}", c.tag()),
                None => println!("✅ Cleared all custom tools"),
            }
            Ok(())
        }
        _ => bail!("Unknown tools command. Use 'forgor config tools --help'."),
    }
}

async fn run_cache(matches: &ArgMatches) -> Result<()> {
    let config = Config::load_or_minimal();
    match matches.subcommand() {
        Some(("location", _)) => {
            println!("{}", DiskStore::default_location()?.path().display());
            Ok(())
        }
        Some(("status", _)) => {
            let cache = context_cache(&config);
            let Some(status) = cache.status() else {
                bail!("No cache location available");
            };
            println!("📁 Path:        {}", status.path.display());
            if !status.exists || status.built_at.is_none() {
                println!("📭 No usable cache; it will be built on the next request.");
                return Ok(());
            }
            if let (Some(age), Some(freshness)) = (status.age_secs, status.freshness) {
                println!("⏱️  Age:         {}s ({})", age, freshness);
            }
            if let Some(count) = status.tool_count {
                println!("🔧 Tools:       {}", count);
            }
            if let Some(fingerprint) = &status.fingerprint {
                println!("🔑 Fingerprint: {}", &fingerprint[..fingerprint.len().min(16)]);
            }
            Ok(())
        }
        Some(("refresh", sub)) => {
            if sub.get_flag("background") {
                let exe = std::env::current_exe().context("Cannot locate the forgor executable")?;
                let child = std::process::Command::new(exe)
                    .args(["config", "cache", "refresh"])
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .context("Failed to start background refresh")?;
                println!("🔄 Refreshing in the background (pid {})", child.id());
                return Ok(());
            }
            let context = context_cache(&config).refresh().await;
            println!(
                "✅ Context rebuilt: {} tools, {} runtimes",
                context.tools.total(),
                context.tools.runtimes().len()
            );
            Ok(())
        }
        Some(("clear", _)) => {
            if context_cache(&config).clear().await? {
                println!("🗑️  Context cache cleared");
            } else {
                println!("No context cache to clear");
            }
            Ok(())
        }
        _ => bail!("Unknown cache command. Use 'forgor config cache --help'."),
    }
}
