use super::{decode_u128, encode_u128, finish_close};
use crate::ext::ClientConn;
use crate::resource::DepSet;
use crate::types::{Address, PriceGetter};
use loopp_tonic_core::{Error, Result, proto};
use std::collections::HashMap;
use std::sync::Arc;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

type Grpc = proto::price_getter_client::PriceGetterClient<Channel>;

/// [`PriceGetter`] implemented over a brokered connection.
pub struct PriceGetterClient {
    conn: ClientConn,
}

impl PriceGetterClient {
    pub fn new(conn: ClientConn) -> Self {
        Self { conn }
    }

    async fn grpc(&self) -> Result<Grpc> {
        Ok(Grpc::new(self.conn.channel().await?))
    }
}

#[tonic::async_trait]
impl PriceGetter for PriceGetterClient {
    async fn token_prices_usd(&self, tokens: &[Address]) -> Result<HashMap<Address, u128>> {
        let request = proto::TokenPricesUsdRequest {
            tokens: tokens.iter().map(Address::to_vec).collect(),
        };
        let reply = self
            .grpc()
            .await?
            .token_prices_usd(request)
            .await
            .map_err(Error::from)?
            .into_inner();

        let mut prices = HashMap::with_capacity(reply.prices.len());
        for price in reply.prices {
            let token = Address::try_from(price.token.as_slice())?;
            let value = decode_u128("price value", &price.value)?;
            prices.insert(token, value);
        }
        Ok(prices)
    }

    async fn close(&self) -> Result<()> {
        self.grpc()
            .await?
            .close(proto::Empty {})
            .await
            .map_err(Error::from)?;
        Ok(())
    }
}

/// Serves a concrete [`PriceGetter`] implementation over gRPC, owning its
/// lifetime.
pub struct PriceGetterServer {
    inner: Arc<dyn PriceGetter>,
    deps: DepSet,
}

impl PriceGetterServer {
    pub fn new(inner: Arc<dyn PriceGetter>) -> Self {
        Self {
            inner,
            deps: DepSet::new(),
        }
    }

    pub fn into_service(self) -> proto::price_getter_server::PriceGetterServer<Self> {
        proto::price_getter_server::PriceGetterServer::new(self)
    }
}

#[tonic::async_trait]
impl proto::price_getter_server::PriceGetter for PriceGetterServer {
    async fn token_prices_usd(
        &self,
        request: Request<proto::TokenPricesUsdRequest>,
    ) -> std::result::Result<Response<proto::TokenPricesUsdReply>, Status> {
        let req = request.into_inner();
        let mut tokens = Vec::with_capacity(req.tokens.len());
        for token in &req.tokens {
            tokens.push(Address::try_from(token.as_slice())?);
        }

        let prices = self.inner.token_prices_usd(&tokens).await?;
        let prices = prices
            .into_iter()
            .map(|(token, value)| proto::TokenPrice {
                token: token.to_vec(),
                value: encode_u128(value),
            })
            .collect();
        Ok(Response::new(proto::TokenPricesUsdReply { prices }))
    }

    async fn close(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::Empty>, Status> {
        finish_close("PriceGetter", self.inner.close().await, &self.deps).await
    }
}
