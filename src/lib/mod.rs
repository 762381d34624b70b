//! Keep a project's env files in sync with a single remote secret.
//!
//! Every `.env`, `.env.production`, … file under a project root is folded
//! into one flat `file.KEY -> value` record, stored as one opaque secret,
//! and later split back into the original files.
//!
//! # Features
//!
//! - **Namespaced encoding**: many files share one secret without losing
//!   which file a variable came from
//! - **Partial failure tolerance**: one malformed file does not stop a push,
//!   one unwritable file does not stop a pull
//! - **Overwrite guard**: pull never replaces an existing file unless asked
//! - **Pluggable store**: anything implementing [`gateway::SecretGateway`];
//!   AWS Secrets Manager with the `aws` feature
//! - **Optional tracing**: detailed logging when the `tracing` feature is enabled
//!
//! # Example
//!
//! ```rust,no_run
//! use env_stash::aws::AwsSecretsManager;
//! use env_stash::config::{Config, Overrides};
//! use env_stash::sync::SyncEngine;
//! use std::path::Path;
//!
//! let root = Path::new(".");
//! let settings = Config::load(root)?.resolve(root, Overrides::default(), |key| {
//!   std::env::var(key).ok()
//! });
//!
//! let gateway = AwsSecretsManager::new(&settings.remote)?;
//! let engine = SyncEngine::new(gateway);
//! engine.push(&settings.collector()?, root, &settings.project_name)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#[cfg(feature = "aws")]
pub mod aws;
pub mod codec;
pub mod collect;
pub mod config;
pub mod gateway;
pub mod hook;
pub mod parse;
pub mod sync;
