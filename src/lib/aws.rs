//! AWS Secrets Manager gateway.
//!
//! The SDK is async; each call is driven to completion on a private
//! current-thread runtime so the rest of the crate stays synchronous.

use aws_config::BehaviorVersion;
use aws_sdk_secretsmanager::Client;
use aws_sdk_secretsmanager::config::Region;
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use tokio::runtime::{Builder, Runtime};

#[cfg(feature = "tracing")]
use tracing::{debug, info};

use crate::gateway::{GatewayError, RemoteConfig, SecretGateway};

pub struct AwsSecretsManager {
  client: Client,
  runtime: Runtime,
}

impl AwsSecretsManager {
  /// Builds a client for the given region and (optional) named profile.
  pub fn new(config: &RemoteConfig) -> Result<Self, GatewayError> {
    let runtime = Builder::new_current_thread()
      .enable_all()
      .build()
      .map_err(GatewayError::transport)?;

    #[cfg(feature = "tracing")]
    debug!(
      region = %config.region,
      profile = ?config.profile,
      account = ?config.account_id,
      "Loading AWS configuration"
    );

    let mut loader =
      aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
    if let Some(profile) = &config.profile {
      loader = loader.profile_name(profile);
    }
    let sdk_config = runtime.block_on(loader.load());

    Ok(Self {
      client: Client::new(&sdk_config),
      runtime,
    })
  }
}

fn transport<E>(err: E) -> GatewayError
where
  E: std::error::Error + Send + Sync + 'static,
{
  GatewayError::transport(DisplayErrorContext(err).to_string())
}

impl SecretGateway for AwsSecretsManager {
  fn exists(&self, name: &str) -> Result<bool, GatewayError> {
    let request = self.client.describe_secret().secret_id(name).send();

    match self.runtime.block_on(request) {
      Ok(_) => Ok(true),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_resource_not_found_exception() {
          Ok(false)
        } else {
          Err(transport(err))
        }
      }
    }
  }

  fn create(&self, name: &str, blob: &str, description: &str) -> Result<(), GatewayError> {
    let request = self
      .client
      .create_secret()
      .name(name)
      .secret_string(blob)
      .description(description)
      .send();

    self
      .runtime
      .block_on(request)
      .map_err(|err| transport(err.into_service_error()))?;

    #[cfg(feature = "tracing")]
    info!("Created secret: {}", name);

    Ok(())
  }

  fn update(&self, name: &str, blob: &str) -> Result<(), GatewayError> {
    let request = self
      .client
      .update_secret()
      .secret_id(name)
      .secret_string(blob)
      .send();

    match self.runtime.block_on(request) {
      Ok(_) => {
        #[cfg(feature = "tracing")]
        info!("Updated secret: {}", name);

        Ok(())
      }
      Err(err) => {
        let err = err.into_service_error();
        if err.is_resource_not_found_exception() {
          Err(GatewayError::NotFound(name.to_string()))
        } else {
          Err(transport(err))
        }
      }
    }
  }

  fn fetch(&self, name: &str) -> Result<String, GatewayError> {
    let request = self.client.get_secret_value().secret_id(name).send();

    let output = match self.runtime.block_on(request) {
      Ok(output) => output,
      Err(err) => {
        let err = err.into_service_error();
        return Err(if err.is_resource_not_found_exception() {
          GatewayError::NotFound(name.to_string())
        } else {
          transport(err)
        });
      }
    };

    output
      .secret_string()
      .map(str::to_string)
      .ok_or_else(|| GatewayError::EmptySecret(name.to_string()))
  }
}
