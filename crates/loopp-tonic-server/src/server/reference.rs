//! Reference execution factory served by the standalone binary.
//!
//! A deliberately small implementation used to bring a bridge session up
//! end to end before a real plugin is linked in: the plugin it produces
//! observes the provider's expected next sequence number and reports the
//! concatenation of attributed observations. Integration tests drive the
//! same wiring in-process.

use loopp::types::{
    AttributedObservation, ExecProvider, ExecutionFactoryGenerator, ReportingPlugin,
    ReportingPluginConfig, ReportingPluginFactory, ReportingPluginInfo, ReportingPluginLimits,
};
use loopp::{Error, Result};
use std::sync::Arc;

pub struct ReferenceExecutionFactory;

#[tonic::async_trait]
impl ExecutionFactoryGenerator for ReferenceExecutionFactory {
    async fn new_execution_factory(
        &self,
        provider: Arc<dyn ExecProvider>,
    ) -> Result<Arc<dyn ReportingPluginFactory>> {
        Ok(Arc::new(ReferenceFactory { provider }))
    }
}

struct ReferenceFactory {
    provider: Arc<dyn ExecProvider>,
}

#[tonic::async_trait]
impl ReportingPluginFactory for ReferenceFactory {
    async fn new_reporting_plugin(
        &self,
        config: ReportingPluginConfig,
    ) -> Result<(Arc<dyn ReportingPlugin>, ReportingPluginInfo)> {
        if config.f == 0 || config.n <= 3 * config.f {
            return Err(Error::invalid_value(
                "config",
                format!("n = {} must exceed 3f (f = {})", config.n, config.f),
            ));
        }
        let plugin = Arc::new(ReferencePlugin {
            provider: Arc::clone(&self.provider),
        });
        let info = ReportingPluginInfo {
            name: "reference".to_string(),
            limits: ReportingPluginLimits {
                max_query_len: 1024,
                max_observation_len: 1024,
                max_report_len: 4096,
            },
        };
        Ok((plugin, info))
    }

    async fn close(&self) -> Result<()> {
        self.provider.close().await
    }
}

struct ReferencePlugin {
    provider: Arc<dyn ExecProvider>,
}

#[tonic::async_trait]
impl ReportingPlugin for ReferencePlugin {
    async fn observation(&self, _sequence_number: u64, _query: &[u8]) -> Result<Vec<u8>> {
        let next = self
            .provider
            .commit_store_reader()
            .expected_next_sequence_number()
            .await?;
        Ok(next.to_be_bytes().to_vec())
    }

    async fn report(
        &self,
        _sequence_number: u64,
        _query: &[u8],
        observations: Vec<AttributedObservation>,
    ) -> Result<Option<Vec<u8>>> {
        if observations.is_empty() {
            return Ok(None);
        }
        let mut report = Vec::new();
        for obs in observations {
            report.push(obs.observer);
            report.extend(obs.observation);
        }
        Ok(Some(report))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn factory_rejects_unsafe_quorum() {
        struct NoProvider;

        #[tonic::async_trait]
        impl ExecProvider for NoProvider {
            fn commit_store_reader(&self) -> Arc<dyn loopp::types::CommitStoreReader> {
                unreachable!("not used by this test")
            }
            fn offramp_reader(&self) -> Arc<dyn loopp::types::OffRampReader> {
                unreachable!("not used by this test")
            }
            fn onramp_reader(&self) -> Arc<dyn loopp::types::OnRampReader> {
                unreachable!("not used by this test")
            }
            fn price_getter(&self) -> Arc<dyn loopp::types::PriceGetter> {
                unreachable!("not used by this test")
            }
            async fn close(&self) -> Result<()> {
                Ok(())
            }
        }

        let factory = ReferenceFactory {
            provider: Arc::new(NoProvider),
        };
        let config = ReportingPluginConfig {
            config_digest: [0u8; 32],
            oracle_id: 0,
            n: 3,
            f: 1,
            max_duration_ms: 100,
            offchain_config: Vec::new(),
        };
        let err = factory
            .new_reporting_plugin(config)
            .await
            .err()
            .expect("expected an error");
        assert!(err.to_string().contains("must exceed 3f"));
    }
}
