use crate::error::EnvironmentError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use serde::de::DeserializeOwned;

#[async_trait]
pub trait SecretRepository: Send + Sync {
    async fn open() -> Self;

    async fn get_secret<T: DeserializeOwned>(
        &self,
        name: &'static str,
    ) -> Result<T, lambda_http::Error>;
}

/// Secrets stored as JSON strings in AWS Secrets Manager. The region comes from the Lambda
/// environment; `AWS_ENDPOINT_URL` overrides the endpoint for local stacks.
pub struct AwsSecretsManagerSecretRepository(aws_sdk_secretsmanager::Client);

#[async_trait]
impl SecretRepository for AwsSecretsManagerSecretRepository {
    async fn open() -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Ok(url) = std::env::var("AWS_ENDPOINT_URL") {
            loader = loader.endpoint_url(url);
        }
        let config = loader.load().await;
        Self(aws_sdk_secretsmanager::Client::new(&config))
    }

    async fn get_secret<T: DeserializeOwned>(
        &self,
        name: &'static str,
    ) -> Result<T, lambda_http::Error> {
        let secret = self.0.get_secret_value().secret_id(name).send().await?;
        let Some(secret_value) = secret.secret_string() else {
            return Err(Box::new(EnvironmentError::MissingSecret(name)));
        };
        Ok(serde_json::from_str(secret_value)?)
    }
}
