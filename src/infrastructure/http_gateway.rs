use crate::config::GatewayConfig;
use crate::domain::gateway::{CreateIntent, PaymentIntent};
use crate::domain::ports::PaymentGateway;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::time::Duration;
use tracing::debug;

/// Client for a Stripe-style payment intents API.
///
/// Every request carries the API secret as a bearer token and is bounded by
/// the configured timeout. Transport failures, timeouts and 5xx answers map
/// to the transient gateway errors; 4xx answers are definitive rejections.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/payment_intents{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<PaymentIntent> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<PaymentIntent>()
                .await
                .map_err(|e| PaymentError::GatewayUnavailable(format!("Invalid gateway response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        debug!(%status, body = %body, "Gateway returned an error");
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(PaymentError::GatewayUnavailable(format!("{}: {}", status, body)))
        } else {
            Err(PaymentError::GatewayRejected(format!("{}: {}", status, body)))
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> PaymentError {
        if e.is_timeout() {
            PaymentError::GatewayTimeout(self.timeout)
        } else {
            PaymentError::GatewayUnavailable(e.to_string())
        }
    }
}

/// Converts a major-unit amount into the gateway's minor units.
fn minor_units(amount: Decimal) -> Result<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| PaymentError::ValidationError(format!("Amount out of range: {}", amount)))
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent> {
        let amount = minor_units(request.amount)?.to_string();
        let application_id = request.application_id.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", request.currency.as_str()),
            ("payment_method_types[]", request.method.as_ref()),
            ("receipt_email", request.customer_email.as_str()),
            ("metadata[application_id]", application_id.as_str()),
        ];
        let builder = self
            .client
            .post(self.url(""))
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form);
        self.send(builder).await
    }

    async fn confirm_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        self.send(self.client.post(self.url(&format!("/{}/confirm", intent_id))))
            .await
    }

    async fn capture_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        self.send(self.client.post(self.url(&format!("/{}/capture", intent_id))))
            .await
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        self.send(self.client.post(self.url(&format!("/{}/cancel", intent_id))))
            .await
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        self.send(self.client.get(self.url(&format!("/{}", intent_id))))
            .await
    }
}
