use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Error;
use crate::model::ProviderKind;

fn default_aws_region() -> String {
    "us-east-1".to_string()
}

/// Provider-specific secret bundle
///
/// The `Debug` impl never prints secret material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum Credential {
    Cloudflare {
        api_token: String,
        /// When set, `api_token` is treated as a Global API Key
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account_email: Option<String>,
    },
    Aliyun {
        access_key_id: String,
        access_key_secret: String,
    },
    Tencent {
        secret_id: String,
        secret_key: String,
    },
    Aws {
        access_key_id: String,
        secret_access_key: String,
        #[serde(default = "default_aws_region")]
        region: String,
    },
    Huawei {
        access_key: String,
        secret_key: String,
    },
    Baidu {
        access_key_id: String,
        access_key_secret: String,
    },
    Jdcloud {
        access_key: String,
        secret_key: String,
    },
}

impl Credential {
    /// Provider this credential belongs to
    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::Cloudflare { .. } => ProviderKind::Cloudflare,
            Self::Aliyun { .. } => ProviderKind::Aliyun,
            Self::Tencent { .. } => ProviderKind::Tencent,
            Self::Aws { .. } => ProviderKind::Aws,
            Self::Huawei { .. } => ProviderKind::Huawei,
            Self::Baidu { .. } => ProviderKind::Baidu,
            Self::Jdcloud { .. } => ProviderKind::Jdcloud,
        }
    }

    /// Public half of the credential (token for Cloudflare)
    fn identity(&self) -> &str {
        match self {
            Self::Cloudflare {
                api_token,
                account_email,
            } => account_email.as_deref().unwrap_or(api_token),
            Self::Aliyun { access_key_id, .. }
            | Self::Baidu { access_key_id, .. }
            | Self::Aws { access_key_id, .. } => access_key_id,
            Self::Tencent { secret_id, .. } => secret_id,
            Self::Huawei { access_key, .. } | Self::Jdcloud { access_key, .. } => access_key,
        }
    }

    /// Check that every required field is non-blank
    pub fn validate(&self) -> Result<(), Error> {
        let fields: Vec<(&str, &str)> = match self {
            Self::Cloudflare { api_token, .. } => vec![("api_token", api_token)],
            Self::Aliyun {
                access_key_id,
                access_key_secret,
            }
            | Self::Baidu {
                access_key_id,
                access_key_secret,
            } => vec![
                ("access_key_id", access_key_id),
                ("access_key_secret", access_key_secret),
            ],
            Self::Tencent {
                secret_id,
                secret_key,
            } => vec![("secret_id", secret_id), ("secret_key", secret_key)],
            Self::Aws {
                access_key_id,
                secret_access_key,
                region,
            } => vec![
                ("access_key_id", access_key_id),
                ("secret_access_key", secret_access_key),
                ("region", region),
            ],
            Self::Huawei {
                access_key,
                secret_key,
            }
            | Self::Jdcloud {
                access_key,
                secret_key,
            } => vec![("access_key", access_key), ("secret_key", secret_key)],
        };

        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(Error::invalid_input(format!(
                    "{} credential field '{}' cannot be empty",
                    self.provider(),
                    name
                )));
            }
        }
        Ok(())
    }

    /// Stable, non-reversible identifier of the provider account
    pub fn account_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provider().as_str().as_bytes());
        hasher.update(b":");
        hasher.update(self.identity().as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    /// Error for an adapter handed another provider's credential
    pub fn mismatch(&self, expected: ProviderKind) -> Error {
        Error::credential(format!(
            "expected {} credential, got {}",
            expected,
            self.provider()
        ))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider())
            .field("secret", &"<redacted>")
            .finish()
    }
}
