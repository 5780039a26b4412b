//! forgor - turns a plain-language request into a shell command.
//!
//! The library holds everything the `forgor` binary does:
//!
//! - **Providers** for OpenAI, Anthropic, Gemini and self-hosted
//!   OpenAI-compatible servers behind one [`llm::Provider`] trait
//! - **System context** detection with a two-tier (memory + disk) cache
//! - **Danger assessment** of every generated command before it can run
//! - **Confirmation and execution** through the user's shell
//!
//! # Architecture
//!
//! - [`config`] - YAML configuration, profiles, custom tools
//! - [`llm`] - provider trait, vendor adapters, response parsing, factory
//! - [`prompt`] - system and user prompts from a request
//! - [`context`] - host detection, tool catalogue, context cache
//! - [`history`] - recent shell history with redaction
//! - [`danger`] - rule-based danger engine
//! - [`safety`] - quick substring scan that fills response warnings
//! - [`confirm`] - run/prompt/display gating and the confirmation dialog
//! - [`executor`] - runs an accepted command through the shell
//! - [`last_command`] - the last generated command for `forgor run`
//! - [`output`] - plain and JSON rendering
//! - [`assistant`] - the per-invocation pipeline
//! - [`http_client`], [`clock`], [`error`] - seams and shared types
//!
//! # Example
//!
//! ```ignore
//! use forgor::assistant::{Assistant, GenerateOptions};
//! use forgor::config::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let assistant = Assistant::new(Config::load_or_minimal(), false, CancellationToken::new());
//!     let options = GenerateOptions {
//!         query: "find all txt files with hello in them".to_string(),
//!         include_explanation: true,
//!         ..GenerateOptions::default()
//!     };
//!     assistant.generate(&options).await?;
//!     assistant.finish().await;
//!     Ok(())
//! }
//! ```

pub mod assistant;
pub mod clock;
pub mod config;
pub mod confirm;
pub mod context;
pub mod danger;
pub mod error;
pub mod executor;
pub mod history;
pub mod http_client;
pub mod last_command;
pub mod llm;
pub mod output;
pub mod prompt;
pub mod safety;
