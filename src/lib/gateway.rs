//! The remote secret store as seen by the sync engine.
//!
//! A gateway stores one opaque string per secret name and never looks
//! inside it. [`MemoryGateway`] keeps secrets in process; the AWS Secrets
//! Manager implementation lives in [`crate::aws`].

use std::{cell::RefCell, collections::BTreeMap};

#[cfg(feature = "tracing")]
use tracing::debug;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings handed to a gateway constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
  pub region: String,
  pub profile: Option<String>,
  pub account_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
  #[error("Secret not found: {0}")]
  NotFound(String),
  #[error("Secret {0} has no string value")]
  EmptySecret(String),
  #[error("Remote store error: {0}")]
  Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl GatewayError {
  pub fn transport<E>(err: E) -> Self
  where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
  {
    Self::Transport(err.into())
  }
}

pub trait SecretGateway {
  fn exists(&self, name: &str) -> Result<bool, GatewayError>;

  fn create(&self, name: &str, blob: &str, description: &str) -> Result<(), GatewayError>;

  fn update(&self, name: &str, blob: &str) -> Result<(), GatewayError>;

  /// Returns the latest value, or [`GatewayError::NotFound`].
  fn fetch(&self, name: &str) -> Result<String, GatewayError>;
}

impl<G: SecretGateway + ?Sized> SecretGateway for &G {
  fn exists(&self, name: &str) -> Result<bool, GatewayError> {
    (**self).exists(name)
  }

  fn create(&self, name: &str, blob: &str, description: &str) -> Result<(), GatewayError> {
    (**self).create(name, blob, description)
  }

  fn update(&self, name: &str, blob: &str) -> Result<(), GatewayError> {
    (**self).update(name, blob)
  }

  fn fetch(&self, name: &str) -> Result<String, GatewayError> {
    (**self).fetch(name)
  }
}

impl<G: SecretGateway + ?Sized> SecretGateway for Box<G> {
  fn exists(&self, name: &str) -> Result<bool, GatewayError> {
    (**self).exists(name)
  }

  fn create(&self, name: &str, blob: &str, description: &str) -> Result<(), GatewayError> {
    (**self).create(name, blob, description)
  }

  fn update(&self, name: &str, blob: &str) -> Result<(), GatewayError> {
    (**self).update(name, blob)
  }

  fn fetch(&self, name: &str) -> Result<String, GatewayError> {
    (**self).fetch(name)
  }
}

/// A call made against a [`MemoryGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
  Exists(String),
  Create { name: String, blob: String },
  Update { name: String, blob: String },
  Fetch(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSecret {
  pub value: String,
  pub description: String,
}

/// In-process secret store that records every call made against it.
#[derive(Debug, Default)]
pub struct MemoryGateway {
  secrets: RefCell<BTreeMap<String, StoredSecret>>,
  calls: RefCell<Vec<Call>>,
}

impl MemoryGateway {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seeds a secret without recording a call.
  pub fn with_secret(self, name: &str, value: &str) -> Self {
    self.secrets.borrow_mut().insert(
      name.to_string(),
      StoredSecret {
        value: value.to_string(),
        description: String::new(),
      },
    );
    self
  }

  pub fn get(&self, name: &str) -> Option<StoredSecret> {
    self.secrets.borrow().get(name).cloned()
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.borrow().clone()
  }

  pub fn clear_calls(&self) {
    self.calls.borrow_mut().clear();
  }

  fn record(&self, call: Call) {
    #[cfg(feature = "tracing")]
    debug!(?call, "Memory gateway call");

    self.calls.borrow_mut().push(call);
  }
}

impl SecretGateway for MemoryGateway {
  fn exists(&self, name: &str) -> Result<bool, GatewayError> {
    self.record(Call::Exists(name.to_string()));
    Ok(self.secrets.borrow().contains_key(name))
  }

  fn create(&self, name: &str, blob: &str, description: &str) -> Result<(), GatewayError> {
    self.record(Call::Create {
      name: name.to_string(),
      blob: blob.to_string(),
    });

    let mut secrets = self.secrets.borrow_mut();
    if secrets.contains_key(name) {
      return Err(GatewayError::transport(format!("secret {name} already exists")));
    }
    secrets.insert(
      name.to_string(),
      StoredSecret {
        value: blob.to_string(),
        description: description.to_string(),
      },
    );
    Ok(())
  }

  fn update(&self, name: &str, blob: &str) -> Result<(), GatewayError> {
    self.record(Call::Update {
      name: name.to_string(),
      blob: blob.to_string(),
    });

    match self.secrets.borrow_mut().get_mut(name) {
      Some(secret) => {
        secret.value = blob.to_string();
        Ok(())
      }
      None => Err(GatewayError::NotFound(name.to_string())),
    }
  }

  fn fetch(&self, name: &str) -> Result<String, GatewayError> {
    self.record(Call::Fetch(name.to_string()));

    self
      .secrets
      .borrow()
      .get(name)
      .map(|secret| secret.value.clone())
      .ok_or_else(|| GatewayError::NotFound(name.to_string()))
  }
}
