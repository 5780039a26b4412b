//! The per-invocation pipeline.
//!
//! context → prompt → HTTP → parse → danger → render → optional execution.
//! One [`Assistant`] serves one invocation; the cancellation token it holds
//! is cancelled by the binary on Ctrl-C.

use crate::clock::{SystemTimeProvider, TimeProvider};
use crate::config::{Config, OutputFormat};
use crate::confirm::{ConfirmUI, Decision, RunPolicy, decide};
use crate::context::SystemContext;
use crate::context::cache::ContextCache;
use crate::context::detector::SystemDetector;
use crate::context::disk::DiskStore;
use crate::danger::{AssessmentContext, DangerAnalyzer, DangerAssessment, DangerLevel};
use crate::executor::Executor;
use crate::history::HistoryReader;
use crate::last_command::LastCommand;
use crate::llm::factory::ProviderFactory;
use crate::llm::{CommandRequest, RequestContext, RequestOptions};
use crate::output::{self, GenerationReport};
use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long the binary waits for a background cache refresh before exiting.
pub const BACKGROUND_WAIT: Duration = Duration::from_secs(15);

/// Flags of the default generate command.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub query: String,
    /// Empty means the default profile.
    pub profile: String,
    pub include_explanation: bool,
    /// Overrides `output.format` from the config.
    pub format: Option<OutputFormat>,
    pub confirm: bool,
    pub force_run: bool,
    pub allow_critical: bool,
    /// Overrides `history.max_commands`.
    pub history_count: Option<usize>,
    pub local_only: bool,
}

pub struct Assistant {
    config: Config,
    factory: ProviderFactory,
    cache: ContextCache,
    analyzer: DangerAnalyzer,
    clock: Arc<dyn TimeProvider>,
    cancel: CancellationToken,
    verbose: bool,
    working_dir: Option<String>,
    home_dir: Option<PathBuf>,
}

impl Assistant {
    /// Wires the real detector, disk cache and network client.
    pub fn new(config: Config, verbose: bool, cancel: CancellationToken) -> Self {
        let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let cache = Self::context_cache(&config, Arc::clone(&clock));
        let factory = ProviderFactory::new(config.clone());
        Self::with_parts(config, factory, cache, clock, verbose, cancel)
    }

    pub fn with_parts(
        config: Config,
        factory: ProviderFactory,
        cache: ContextCache,
        clock: Arc<dyn TimeProvider>,
        verbose: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            factory,
            cache,
            analyzer: DangerAnalyzer::new(),
            clock,
            cancel,
            verbose,
            working_dir: None,
            home_dir: None,
        }
    }

    /// Pins the working and home directories instead of reading them from the process.
    pub fn with_dirs(mut self, working_dir: &str, home_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.to_string());
        self.home_dir = Some(home_dir.into());
        self
    }

    /// The two-tier cache over the real detector, shared by `config cache` commands.
    pub fn context_cache(config: &Config, clock: Arc<dyn TimeProvider>) -> ContextCache {
        let detector = SystemDetector::new(Arc::clone(&clock), config.custom_tools.clone());
        let disk = match DiskStore::default_location() {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("Context cache is memory-only: {:#}", e);
                None
            }
        };
        ContextCache::new(Arc::new(detector), clock, disk)
    }

    /// Builds, sends and assesses one request without printing anything.
    pub async fn prepare(&self, options: &GenerateOptions) -> Result<(GenerationReport, Arc<SystemContext>)> {
        if options.local_only {
            bail!("--local-only is not supported: every provider needs a network call");
        }
        if options.query.trim().is_empty() {
            bail!("No query provided. Use 'forgor --help' for usage information.");
        }

        let profile = self.config.resolve_profile_name(&options.profile).to_string();
        let provider = self.factory.get_provider(&profile)?;
        let controls = self.config.profile(&profile)?;

        let cached = self.cache.get().await;
        let context = Arc::new(cached.with_working_dir(self.current_dir(&cached)));
        debug!(
            "Using context collected at {} ({} tools)",
            context.collected_at,
            context.tools.total()
        );

        let limit = options.history_count.unwrap_or(self.config.history.max_commands);
        let home = self
            .home_dir
            .clone()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from(&context.home_dir));
        let history = HistoryReader::new(&self.config.history, &self.config.security)
            .recent(&context.shell, &home, limit);

        let request = CommandRequest {
            query: options.query.trim().to_string(),
            context: RequestContext {
                system: (*context).clone(),
                history,
                user_hint: None,
            },
            options: RequestOptions {
                max_tokens: controls.max_tokens,
                temperature: controls.temperature,
                include_explanation: options.include_explanation,
                safety_level: self.config.security.safety_level,
                ..RequestOptions::default()
            },
        };

        info!("Generating command with profile '{}'", profile);
        let mut response = provider.generate_command(&request, &self.cancel).await?;
        response
            .metadata
            .entry("model".to_string())
            .or_insert_with(|| controls.model.clone());
        let assessment = self.assess(&response.command, &context);

        let report = GenerationReport {
            query: request.query,
            profile,
            provider: provider.info().name,
            response,
            assessment,
        };
        Ok((report, context))
    }

    /// The default command: generate, print, remember and maybe run.
    pub async fn generate(&self, options: &GenerateOptions) -> Result<()> {
        let (report, context) = self.prepare(options).await?;

        let format = options.format.unwrap_or(self.config.output.format);
        println!("{}", output::render(&report, format, self.verbose)?.trim_end());

        let record = LastCommand::new(
            &report.response.command,
            &report.query,
            &context.shell,
            report.assessment.level,
            self.clock.now(),
        );
        if let Err(e) = record.save() {
            warn!("Could not remember the last command: {:#}", e);
        }

        let policy = RunPolicy {
            confirm: options.confirm,
            force_run: options.force_run,
            allow_critical: options.allow_critical,
            confirm_before_run: self.config.output.confirm_before_run,
        };
        self.gate_and_run(&report.response.command, &report.assessment, &context.shell, &policy)
    }

    /// `forgor explain <command>`.
    pub async fn explain(&self, command: &str, profile: &str, format: Option<OutputFormat>) -> Result<()> {
        let command = command.trim();
        if command.is_empty() {
            bail!("No command to explain");
        }

        let provider = self.factory.get_provider(profile)?;
        let response = provider.explain_command(command, &self.cancel).await?;

        let cached = self.cache.get().await;
        let context = cached.with_working_dir(self.current_dir(&cached));
        let assessment = self.assess(command, &context);

        let format = format.unwrap_or(self.config.output.format);
        let rendered = output::render_explanation(command, &response, &assessment, &provider.info().name, format)?;
        println!("{}", rendered.trim_end());
        Ok(())
    }

    /// `forgor run`: re-assess and execute the last generated command.
    pub async fn run_last(&self, force_run: bool, allow_critical: bool) -> Result<()> {
        let Some(record) = LastCommand::load()? else {
            bail!("No command has been generated yet");
        };

        let cached = self.cache.get().await;
        let context = cached.with_working_dir(self.current_dir(&cached));
        let assessment = self.assess(&record.command, &context);
        if assessment.level != record.danger_level {
            info!(
                "Danger level changed since generation: {} -> {}",
                record.danger_level, assessment.level
            );
        }

        println!("💡 {}", record.command);
        let policy = RunPolicy {
            confirm: true,
            force_run,
            allow_critical,
            confirm_before_run: self.config.output.confirm_before_run,
        };
        self.gate_and_run(&record.command, &assessment, &record.shell, &policy)
    }

    /// Waits (bounded) for a background refresh started during this invocation.
    pub async fn finish(&self) {
        if self.cache.is_refreshing() && !self.cache.wait_for_background(BACKGROUND_WAIT).await {
            debug!("Background context refresh still running at exit");
        }
    }

    fn assess(&self, command: &str, context: &SystemContext) -> DangerAssessment {
        let ctx = AssessmentContext::new(context.working_dir.clone(), context.os.clone());
        self.analyzer.assess(command, &ctx)
    }

    fn current_dir(&self, context: &SystemContext) -> String {
        if let Some(dir) = &self.working_dir {
            return dir.clone();
        }
        std::env::current_dir()
            .map(|d| d.to_string_lossy().into_owned())
            .unwrap_or_else(|_| context.working_dir.clone())
    }

    fn gate_and_run(&self, command: &str, assessment: &DangerAssessment, shell: &str, policy: &RunPolicy) -> Result<()> {
        let ui = ConfirmUI::new(self.verbose);
        match decide(assessment.level, policy) {
            Decision::DisplayOnly => Ok(()),
            Decision::Run => {
                if assessment.level >= DangerLevel::High {
                    ui.show_danger(assessment);
                }
                Executor::new(self.verbose, shell)
                    .execute(command)
                    .context("Generated command failed")
            }
            Decision::Prompt => {
                if ui.prompt_to_run(command, assessment)? {
                    Executor::new(self.verbose, shell)
                        .execute(command)
                        .context("Generated command failed")
                } else {
                    ui.show_cancelled();
                    Ok(())
                }
            }
        }
    }
}
