//! End-to-end bridge tests: host and plugin side wired through one broker,
//! all traffic over real gRPC on loopback listeners.

use loopp::adapter::{ExecutionAdapterClient, ExecutionAdapterServer};
use loopp::broker::{Broker, BrokerConfig, IdParity};
use loopp::ext::BrokerExt;
use loopp::resource::Resource;
use loopp::shims::{OffRampReaderClient, OffRampReaderServer, PriceGetterServer};
use loopp::types::{
    Address, AttributedObservation, CommitStoreReader, ExecProvider, ExecutionFactoryGenerator,
    ExecutionState, OffRampReader, OnRampReader, PriceGetter, ReportingPlugin,
    ReportingPluginConfig, ReportingPluginFactory, ReportingPluginInfo, ReportingPluginLimits,
    SendRequest,
};
use loopp::{Error, Result, proto};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn addr(seed: u8) -> Address {
    Address::from([seed; 20])
}

struct TestPriceGetter;

#[tonic::async_trait]
impl PriceGetter for TestPriceGetter {
    async fn token_prices_usd(&self, tokens: &[Address]) -> Result<HashMap<Address, u128>> {
        Ok(tokens
            .iter()
            .enumerate()
            .map(|(i, token)| (*token, (i as u128 + 1) << 100))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct TestCommitStore;

#[tonic::async_trait]
impl CommitStoreReader for TestCommitStore {
    async fn expected_next_sequence_number(&self) -> Result<u64> {
        Ok(42)
    }

    async fn verify_execution_report(&self, report: &[u8]) -> Result<bool> {
        Ok(!report.is_empty())
    }

    async fn is_blessed(&self, root: [u8; 32]) -> Result<bool> {
        Ok(root[0] == 0xff)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct TestOffRamp;

#[tonic::async_trait]
impl OffRampReader for TestOffRamp {
    async fn address(&self) -> Result<Address> {
        Ok(addr(0x0f))
    }

    async fn get_execution_state(&self, sequence_number: u64) -> Result<ExecutionState> {
        Ok(if sequence_number < 42 {
            ExecutionState::Success
        } else {
            ExecutionState::Untouched
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct TestOnRamp;

#[tonic::async_trait]
impl OnRampReader for TestOnRamp {
    async fn address(&self) -> Result<Address> {
        Ok(addr(0x01))
    }

    async fn router_address(&self) -> Result<Address> {
        Ok(addr(0x02))
    }

    async fn get_send_requests_between(&self, min: u64, max: u64) -> Result<Vec<SendRequest>> {
        Ok((min..=max)
            .map(|seq| SendRequest {
                sequence_number: seq,
                data: vec![seq as u8],
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct TestProvider;

#[tonic::async_trait]
impl ExecProvider for TestProvider {
    fn commit_store_reader(&self) -> Arc<dyn CommitStoreReader> {
        Arc::new(TestCommitStore)
    }

    fn offramp_reader(&self) -> Arc<dyn OffRampReader> {
        Arc::new(TestOffRamp)
    }

    fn onramp_reader(&self) -> Arc<dyn OnRampReader> {
        Arc::new(TestOnRamp)
    }

    fn price_getter(&self) -> Arc<dyn PriceGetter> {
        Arc::new(TestPriceGetter)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Reporting plugin that answers by calling back into the provider the host
/// served — proving the dial-back path works.
struct EchoPlugin {
    provider: Arc<dyn ExecProvider>,
    closed: Arc<AtomicBool>,
}

#[tonic::async_trait]
impl ReportingPlugin for EchoPlugin {
    async fn observation(&self, _sequence_number: u64, _query: &[u8]) -> Result<Vec<u8>> {
        let seq = self
            .provider
            .commit_store_reader()
            .expected_next_sequence_number()
            .await?;
        Ok(seq.to_be_bytes().to_vec())
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
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct EchoFactory {
    provider: Arc<dyn ExecProvider>,
    plugin_closed: Arc<AtomicBool>,
}

#[tonic::async_trait]
impl ReportingPluginFactory for EchoFactory {
    async fn new_reporting_plugin(
        &self,
        config: ReportingPluginConfig,
    ) -> Result<(Arc<dyn ReportingPlugin>, ReportingPluginInfo)> {
        let plugin = Arc::new(EchoPlugin {
            provider: Arc::clone(&self.provider),
            closed: Arc::clone(&self.plugin_closed),
        });
        let info = ReportingPluginInfo {
            name: format!("echo-{}", config.oracle_id),
            limits: ReportingPluginLimits {
                max_query_len: 64,
                max_observation_len: 64,
                max_report_len: 256,
            },
        };
        Ok((plugin, info))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct EchoFactoryGenerator {
    plugin_closed: Arc<AtomicBool>,
}

#[tonic::async_trait]
impl ExecutionFactoryGenerator for EchoFactoryGenerator {
    async fn new_execution_factory(
        &self,
        provider: Arc<dyn ExecProvider>,
    ) -> Result<Arc<dyn ReportingPluginFactory>> {
        // Sanity-check the dialed-back provider during construction.
        let prices = provider.price_getter().token_prices_usd(&[addr(0xaa)]).await?;
        if prices.len() != 1 {
            return Err(Error::serve("provider returned unexpected price set"));
        }
        Ok(Arc::new(EchoFactory {
            provider,
            plugin_closed: Arc::clone(&self.plugin_closed),
        }))
    }
}

struct FailingFactoryGenerator;

#[tonic::async_trait]
impl ExecutionFactoryGenerator for FailingFactoryGenerator {
    async fn new_execution_factory(
        &self,
        _provider: Arc<dyn ExecProvider>,
    ) -> Result<Arc<dyn ReportingPluginFactory>> {
        Err(Error::Rpc(tonic::Status::internal(
            "execution factory backend unavailable",
        )))
    }
}

/// Wires a host and a plugin side through one shared broker and serves the
/// adapter service. Returns the host-side adapter client, the host ext, and
/// the resource owning the adapter server.
async fn bridge(
    factory: Arc<dyn ExecutionFactoryGenerator>,
) -> (ExecutionAdapterClient, BrokerExt, Resource, Arc<Broker>) {
    let broker = Arc::new(Broker::new(IdParity::Odd));
    let host = BrokerExt::new(Arc::clone(&broker), BrokerConfig::new("host"));
    let plugin = BrokerExt::new(Arc::clone(&broker), BrokerConfig::new("plugin"));

    let adapter_ext = plugin.clone();
    let (adapter_id, adapter_res) = plugin
        .serve("ExecutionFactoryGenerator", move |registry| {
            registry.add_service(
                ExecutionAdapterServer::new(factory, adapter_ext).into_service(),
            );
        })
        .await
        .expect("serve adapter");

    let conn = host.dial(adapter_id).await.expect("dial adapter");
    (
        ExecutionAdapterClient::new(conn, host.clone()),
        host,
        adapter_res,
        broker,
    )
}

fn test_config() -> ReportingPluginConfig {
    ReportingPluginConfig {
        config_digest: [7u8; 32],
        oracle_id: 3,
        n: 4,
        f: 1,
        max_duration_ms: 250,
        offchain_config: b"opaque".to_vec(),
    }
}

#[tokio::test]
async fn factory_construction_and_plugin_round_trip() {
    let plugin_closed = Arc::new(AtomicBool::new(false));
    let generator = Arc::new(EchoFactoryGenerator {
        plugin_closed: Arc::clone(&plugin_closed),
    });
    let (adapter, host, adapter_res, broker) = bridge(generator).await;

    let (factory, resources) = adapter
        .new_execution_factory_with_resources(Arc::new(TestProvider))
        .await
        .expect("construct factory");
    assert!(!resources.is_empty());

    let (plugin, info) = factory
        .new_reporting_plugin(test_config())
        .await
        .expect("construct plugin");
    assert_eq!(info.name, "echo-3");
    assert_eq!(info.limits.max_report_len, 256);

    // Observation calls back through the brokered provider.
    let observation = plugin.observation(1, b"query").await.unwrap();
    assert_eq!(observation, 42u64.to_be_bytes().to_vec());

    // Report logic round-trips attributed observations.
    let report = plugin
        .report(
            1,
            b"query",
            vec![AttributedObservation {
                observation: vec![9, 9],
                observer: 5,
            }],
        )
        .await
        .unwrap();
    assert_eq!(report, Some(vec![5, 9, 9]));
    let no_report = plugin.report(1, b"query", Vec::new()).await.unwrap();
    assert_eq!(no_report, None);

    // Closing the plugin client reaches the real implementation remotely.
    plugin.close().await.unwrap();
    assert!(plugin_closed.load(Ordering::SeqCst));

    factory.close().await.unwrap();
    host.close_all(resources).await.unwrap();

    adapter_res.close().await.unwrap();
    broker.close();
}

#[tokio::test]
async fn failed_factory_construction_leaves_no_resources_open() {
    let (adapter, _host, adapter_res, broker) = bridge(Arc::new(FailingFactoryGenerator)).await;
    let baseline = broker.endpoint_count();

    let err = adapter
        .new_execution_factory_with_resources(Arc::new(TestProvider))
        .await
        .err()
        .expect("expected an error");

    // The domain error's message survives the wire unmodified.
    assert!(err.to_string().contains("execution factory backend unavailable"));

    // Everything served for the provider in step 1 was rolled back.
    assert_eq!(broker.endpoint_count(), baseline);

    adapter_res.close().await.unwrap();
    broker.close();
}

#[tokio::test]
async fn remote_provider_is_proxied_through_without_reserving() {
    let plugin_closed = Arc::new(AtomicBool::new(false));
    let generator = Arc::new(EchoFactoryGenerator {
        plugin_closed: Arc::clone(&plugin_closed),
    });
    let (adapter, host, adapter_res, broker) = bridge(generator).await;

    // Serve a provider once, dial it, and hand the proxy to the adapter: it
    // must pass the existing id through instead of serving a second copy.
    let provider_impl: Arc<dyn ExecProvider> = Arc::new(TestProvider);
    let serve_impl = Arc::clone(&provider_impl);
    let (provider_id, provider_res) = host
        .serve("ExecProvider", move |registry| {
            registry
                .add_service(
                    loopp::shims::CommitStoreReaderServer::new(serve_impl.commit_store_reader())
                        .into_service(),
                )
                .add_service(
                    loopp::shims::OffRampReaderServer::new(serve_impl.offramp_reader())
                        .into_service(),
                )
                .add_service(
                    loopp::shims::OnRampReaderServer::new(serve_impl.onramp_reader())
                        .into_service(),
                )
                .add_service(
                    PriceGetterServer::new(serve_impl.price_getter()).into_service(),
                );
        })
        .await
        .unwrap();
    let provider_conn = host.dial(provider_id).await.unwrap();
    let remote_provider = Arc::new(loopp::shims::ExecProviderClient::new(provider_conn));
    assert_eq!(remote_provider.as_remote(), Some(provider_id));

    let before = broker.endpoint_count();
    let (factory, resources) = adapter
        .new_execution_factory_with_resources(remote_provider)
        .await
        .unwrap();
    // Only the produced factory was added; no second provider server.
    assert_eq!(broker.endpoint_count(), before + 1);

    factory.close().await.unwrap();
    host.close_all(resources).await.unwrap();
    provider_res.close().await.unwrap();
    adapter_res.close().await.unwrap();
    broker.close();
}

#[tokio::test]
async fn short_address_is_rejected_before_domain_logic() {
    let broker = Arc::new(Broker::new(IdParity::Odd));
    let host = BrokerExt::new(Arc::clone(&broker), BrokerConfig::new("host"));

    let (id, resource) = host
        .serve("PriceGetter", |registry| {
            registry.add_service(
                PriceGetterServer::new(Arc::new(TestPriceGetter)).into_service(),
            );
        })
        .await
        .unwrap();

    let conn = host.dial(id).await.unwrap();
    let mut raw = proto::price_getter_client::PriceGetterClient::new(
        conn.channel().await.unwrap(),
    );
    let status = raw
        .token_prices_usd(proto::TokenPricesUsdRequest {
            tokens: vec![vec![1, 2, 3]],
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
    assert!(status.message().contains("expected 20 bytes, got 3"));

    resource.close().await.unwrap();
    broker.close();
}

#[tokio::test]
async fn unimplemented_rpc_surfaces_as_hard_error() {
    let broker = Arc::new(Broker::new(IdParity::Odd));
    let host = BrokerExt::new(Arc::clone(&broker), BrokerConfig::new("host"));

    let (id, resource) = host
        .serve("OffRampReader", |registry| {
            registry.add_service(OffRampReaderServer::new(Arc::new(TestOffRamp)).into_service());
        })
        .await
        .unwrap();

    let reader = OffRampReaderClient::new(host.dial(id).await.unwrap());
    let err = reader.gas_price_estimator().await.unwrap_err();
    assert!(matches!(err, Error::Unimplemented { .. }));

    // The implemented methods still work over the same connection.
    assert_eq!(reader.address().await.unwrap(), addr(0x0f));
    assert_eq!(
        reader.get_execution_state(1).await.unwrap(),
        ExecutionState::Success
    );
    assert_eq!(
        reader.get_execution_state(100).await.unwrap(),
        ExecutionState::Untouched
    );

    resource.close().await.unwrap();
    broker.close();
}
