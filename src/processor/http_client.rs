use async_trait::async_trait;
use std::time::Duration;

use super::{HealthReport, ProcessorClient, ProcessorError};
use crate::domain::{ProcessorKind, ProcessorPayment};

const PAYMENTS_PATH: &str = "/payments";
const HEALTH_PATH: &str = "/payments/service-health";

/// Base URLs and timeouts of both processors.
#[derive(Debug, Clone)]
pub struct ProcessorEndpoints {
    pub default_url: String,
    pub fallback_url: String,
    pub payment_timeout: Duration,
    pub probe_timeout: Duration,
}

impl ProcessorEndpoints {
    fn base_url(&self, processor: ProcessorKind) -> &str {
        match processor {
            ProcessorKind::Default => &self.default_url,
            ProcessorKind::Fallback => &self.fallback_url,
        }
    }
}

/// `reqwest`-backed processor client sharing one connection pool.
pub struct HttpProcessorClient {
    client: reqwest::Client,
    endpoints: ProcessorEndpoints,
}

impl HttpProcessorClient {
    pub fn new(endpoints: ProcessorEndpoints) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(endpoints.payment_timeout.max(endpoints.probe_timeout))
            .build()?;

        tracing::info!(
            default = %endpoints.default_url,
            fallback = %endpoints.fallback_url,
            payment_timeout_ms = endpoints.payment_timeout.as_millis() as u64,
            "Processor client ready"
        );

        Ok(Self { client, endpoints })
    }

    fn url(&self, processor: ProcessorKind, path: &str) -> String {
        format!("{}{}", self.endpoints.base_url(processor).trim_end_matches('/'), path)
    }
}

fn classify(processor: ProcessorKind, source: reqwest::Error) -> ProcessorError {
    if source.is_timeout() {
        ProcessorError::Timeout { processor }
    } else {
        ProcessorError::Transport { processor, source }
    }
}

#[async_trait]
impl ProcessorClient for HttpProcessorClient {
    async fn send(
        &self,
        processor: ProcessorKind,
        payment: &ProcessorPayment,
    ) -> Result<(), ProcessorError> {
        let response = self
            .client
            .post(self.url(processor, PAYMENTS_PATH))
            .timeout(self.endpoints.payment_timeout)
            .json(payment)
            .send()
            .await
            .map_err(|e| classify(processor, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProcessorError::Rejected {
                processor,
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn probe_health(&self, processor: ProcessorKind) -> Result<HealthReport, ProcessorError> {
        let response = self
            .client
            .get(self.url(processor, HEALTH_PATH))
            .timeout(self.endpoints.probe_timeout)
            .send()
            .await
            .map_err(|e| classify(processor, e))?;

        // 429 here means the processor is rate-limiting probes.
        let status = response.status();
        if !status.is_success() {
            return Err(ProcessorError::Rejected {
                processor,
                status: status.as_u16(),
            });
        }

        response
            .json::<HealthReport>()
            .await
            .map_err(|e| classify(processor, e))
    }

    fn endpoint(&self, processor: ProcessorKind) -> String {
        self.endpoints.base_url(processor).to_string()
    }
}
