//! Channel selection

use std::sync::Arc;

use crate::delivery::channel::DeliveryChannel;
use crate::delivery::direct::DirectApply;
use crate::delivery::handoff::GitHandoff;
use crate::errors::FleetError;
use crate::models::downstream::{DeliveryMode, DownstreamTarget, ExternalHandoffConfig};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::ToolSettings;

/// Builds the channel implementations for a downstream
pub trait ChannelProvider: Send + Sync {
    fn direct(&self, target: &DownstreamTarget) -> Arc<dyn DeliveryChannel>;

    fn handoff(
        &self,
        target: &DownstreamTarget,
        config: &ExternalHandoffConfig,
    ) -> Arc<dyn DeliveryChannel>;
}

/// Channels backed by the locally installed kubectl, kustomize and git
#[derive(Debug, Clone)]
pub struct SystemChannels {
    tools: ToolSettings,
    layout: StorageLayout,
}

impl SystemChannels {
    pub fn new(tools: ToolSettings, layout: StorageLayout) -> Self {
        Self { tools, layout }
    }
}

impl ChannelProvider for SystemChannels {
    fn direct(&self, _target: &DownstreamTarget) -> Arc<dyn DeliveryChannel> {
        Arc::new(DirectApply::new(&self.tools.kubectl, &self.tools.kustomize))
    }

    fn handoff(
        &self,
        _target: &DownstreamTarget,
        config: &ExternalHandoffConfig,
    ) -> Arc<dyn DeliveryChannel> {
        Arc::new(GitHandoff::new(
            &self.tools.git,
            &self.tools.kustomize,
            self.layout.clone(),
            config.clone(),
        ))
    }
}

/// Pick the channel for a downstream from its delivery mode.
///
/// A handoff downstream whose repository is unreachable gets no channel;
/// there is no silent fallback to direct apply.
pub fn select_channel(
    target: &DownstreamTarget,
    provider: &dyn ChannelProvider,
) -> Result<Arc<dyn DeliveryChannel>, FleetError> {
    match &target.delivery {
        DeliveryMode::Direct => Ok(provider.direct(target)),
        DeliveryMode::Handoff(config) if config.is_connected() => {
            Ok(provider.handoff(target, config))
        }
        DeliveryMode::Handoff(_) => Err(FleetError::HandoffUnreachable {
            downstream: target.id.clone(),
        }),
    }
}
