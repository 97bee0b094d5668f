//! Staff provisioning: the irreversible action behind the approval gate.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ProvisionError};
use crate::onboarding::model::BuildPlan;

/// What gets sent to the provisioning backend.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionRequest<'a> {
    /// Used by the backend to make repeated submissions of the same thread a no-op.
    pub idempotency_key: &'a str,
    pub location_id: &'a str,
    pub plan: &'a BuildPlan,
}

/// Outcome reported by the provisioning backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub success: bool,
    #[serde(default)]
    pub staff_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Selected roles and config in, success/failure plus payload out.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, request: &ProvisionRequest<'_>) -> Result<DeploymentResult, ProvisionError>;
}

/// Configuration for [`HttpProvisioner`].
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    pub endpoint: String,
    pub api_token: SecretString,
}

impl ProvisioningConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = std::env::var("ONBOARD_PROVISIONING_URL")
            .map_err(|_| ConfigError::MissingEnvVar("ONBOARD_PROVISIONING_URL".to_string()))?;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "ONBOARD_PROVISIONING_URL".to_string(),
                message: format!("expected an http(s) URL, got {endpoint}"),
            });
        }
        let api_token = std::env::var("ONBOARD_PROVISIONING_TOKEN").unwrap_or_default();
        Ok(Self {
            endpoint,
            api_token: SecretString::from(api_token),
        })
    }
}

/// POSTs the approved plan to the staff deployment service.
pub struct HttpProvisioner {
    client: reqwest::Client,
    config: ProvisioningConfig,
}

impl HttpProvisioner {
    pub fn new(config: ProvisioningConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn shared(config: ProvisioningConfig) -> Arc<dyn Provisioner> {
        Arc::new(Self::new(config))
    }
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    async fn provision(&self, request: &ProvisionRequest<'_>) -> Result<DeploymentResult, ProvisionError> {
        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .header("Idempotency-Key", request.idempotency_key)
            .json(request);
        let token = self.config.api_token.expose_secret();
        if !token.is_empty() {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProvisionError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<DeploymentResult>()
            .await
            .map_err(|e| ProvisionError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_result_tolerates_missing_fields() {
        let result: DeploymentResult = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(result.success);
        assert!(result.staff_ids.is_empty());
        assert!(result.payload.is_null());
    }

    #[test]
    fn request_serializes_plan_and_key() {
        let plan = BuildPlan {
            revision: 2,
            location_id: "L1".into(),
            business_name: "Acme".into(),
            brand_summary: "roofers".into(),
            staff: vec![],
            summary: "plan".into(),
            revision_notes: vec!["pricing wrong".into()],
        };
        let request = ProvisionRequest {
            idempotency_key: "thread-1",
            location_id: "L1",
            plan: &plan,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["idempotency_key"], "thread-1");
        assert_eq!(json["plan"]["revision"], 2);
        assert_eq!(json["plan"]["revision_notes"][0], "pricing wrong");
    }
}
