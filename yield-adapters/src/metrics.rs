//! Protocol metrics source backed by DefiLlama volume summaries

use std::sync::Arc;

use async_trait::async_trait;

use yield_core::{ProtocolMetricsSource, VolumeData, YieldResult};

use crate::client::LlamaYieldsClient;

/// Volume metrics from `/summary/dexs/{protocol}`.
///
/// DefiLlama publishes no user activity, so this source keeps the default
/// `tracks_users() == false` and sync never asks it for users.
pub struct LlamaMetricsClient {
    client: Arc<LlamaYieldsClient>,
}

impl LlamaMetricsClient {
    pub fn new(client: Arc<LlamaYieldsClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProtocolMetricsSource for LlamaMetricsClient {
    async fn volume(&self, protocol: &str) -> YieldResult<VolumeData> {
        let summary = self.client.dex_summary(protocol).await?;
        Ok(summary.to_volume_data(protocol))
    }
}
