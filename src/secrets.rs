use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};
use vaultrs::auth::approle;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::kv2;

use crate::config::ExchangeConfig;

/// Exchange credentials as stored under `secret/exchange`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSecrets {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub webhook_secret: Option<String>,
}

impl ExchangeSecrets {
    fn from_map(secret: &HashMap<String, String>) -> Self {
        let get = |key: &str| secret.get(key).filter(|v| !v.trim().is_empty()).cloned();
        Self {
            api_key: get("api_key"),
            api_secret: get("api_secret"),
            webhook_secret: get("webhook_secret"),
        }
    }

    /// Vault values win over whatever the environment provided.
    pub fn apply(self, config: &mut ExchangeConfig) {
        if let Some(api_key) = self.api_key {
            config.api_key = Some(api_key);
        }
        if let Some(api_secret) = self.api_secret {
            config.api_secret = Some(api_secret);
        }
        if let Some(webhook_secret) = self.webhook_secret {
            config.webhook_secret = webhook_secret;
        }
    }
}

pub struct SecretsManager {
    client: VaultClient,
    kv_mount: String,
}

impl SecretsManager {
    /// `None` when `VAULT_ADDR` is unset, so local runs need no Vault.
    pub async fn from_env() -> Result<Option<Self>> {
        let Ok(vault_addr) = env::var("VAULT_ADDR") else {
            return Ok(None);
        };
        let role_id = env::var("VAULT_ROLE_ID").context("VAULT_ROLE_ID is required")?;
        let secret_id = env::var("VAULT_SECRET_ID").context("VAULT_SECRET_ID is required")?;
        let auth_mount = env::var("VAULT_AUTH_MOUNT").unwrap_or_else(|_| "auth/approle".to_string());
        let kv_mount = env::var("VAULT_KV_MOUNT").unwrap_or_else(|_| "secret".to_string());

        let mut client = VaultClient::new(
            VaultClientSettingsBuilder::default()
                .address(&vault_addr)
                .build()
                .context("failed to build Vault client settings")?,
        )
        .context("failed to create Vault client")?;

        let auth = approle::login(&mut client, &auth_mount, &role_id, &secret_id)
            .await
            .context("failed to authenticate to Vault with AppRole")?;
        client.set_token(&auth.client_token);

        Ok(Some(Self { client, kv_mount }))
    }

    pub async fn get_exchange_secrets(&self) -> Result<ExchangeSecrets> {
        let secret: HashMap<String, String> = kv2::read(&self.client, &self.kv_mount, "exchange")
            .await
            .context("failed to read secret/exchange from Vault")?;
        Ok(ExchangeSecrets::from_map(&secret))
    }
}

/// Overrides exchange credentials from Vault when it is configured.
pub async fn load_exchange_secrets(config: &mut ExchangeConfig) -> Result<()> {
    let Some(manager) = SecretsManager::from_env().await? else {
        return Ok(());
    };
    manager.get_exchange_secrets().await?.apply(config);
    tracing::info!("Exchange credentials loaded from Vault");
    Ok(())
}
