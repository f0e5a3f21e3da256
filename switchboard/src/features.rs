//! DTMF feature hooks and the built-in transfer and hangup features.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bitflags::bitflags;
use futures::future::BoxFuture;
use strum_macros::{self, EnumString};
use thiserror::Error;
use tracing::{info, warn};

use crate::bridge::{Bridge, BridgeCapability, BridgeChannel, BridgeChannelState, BridgeFlags};
use crate::channel::Channel;

pub const DEFAULT_DIGIT_TIMEOUT: Duration = Duration::from_millis(3000);

pub type FeatureCallback =
    Arc<dyn Fn(Arc<Bridge>, Arc<BridgeChannel>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FeatureFlags: u32 {
        // this channel hanging up ends the bridge
        const DISSOLVE = 1 << 0;
    }
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("{0} needs a transfer configuration")]
    NoTransferConfig(BuiltinFeature),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, EnumString)]
pub enum BuiltinFeature {
    #[strum(serialize = "blindxfer")]
    BlindTransfer,
    #[strum(serialize = "atxfer")]
    AttendedTransfer,
    #[strum(serialize = "disconnect")]
    Hangup,
}

impl BuiltinFeature {
    pub fn default_dtmf(&self) -> &'static str {
        match self {
            BuiltinFeature::BlindTransfer => "#1",
            BuiltinFeature::AttendedTransfer => "*2",
            BuiltinFeature::Hangup => "*",
        }
    }
}

/// Creates the channel a transfer goes to.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn originate(
        &self,
        transferor: &Arc<Channel>,
        context: &str,
        exten: &str,
    ) -> Result<Arc<Channel>>;
}

pub struct TransferConfig {
    pub context: String,
    pub dialer: Arc<dyn Dialer>,
    // keys recognised while talking to the transfer target
    pub complete: String,
    pub threeway: String,
    pub abort: String,
    pub max_digits: usize,
    pub digit_timeout: Duration,
}

impl TransferConfig {
    pub fn new(context: &str, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            context: context.to_string(),
            dialer,
            complete: "*1".to_string(),
            threeway: "*2".to_string(),
            abort: "*3".to_string(),
            max_digits: 20,
            digit_timeout: DEFAULT_DIGIT_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct FeatureHook {
    pub dtmf: String,
    pub callback: FeatureCallback,
}

pub enum HookMatch {
    Exact(FeatureCallback),
    // a longer hook starts with the same digits
    Ambiguous(FeatureCallback),
    Partial,
    NoMatch,
}

/// Hooks a bridge channel answers to.
#[derive(Clone)]
pub struct BridgeFeatures {
    hooks: Vec<FeatureHook>,
    pub flags: FeatureFlags,
    pub digit_timeout: Duration,
}

impl Default for BridgeFeatures {
    fn default() -> Self {
        Self {
            hooks: Vec::new(),
            flags: FeatureFlags::empty(),
            digit_timeout: DEFAULT_DIGIT_TIMEOUT,
        }
    }
}

impl BridgeFeatures {
    pub fn hook(&mut self, dtmf: &str, callback: FeatureCallback) {
        self.hooks.push(FeatureHook {
            dtmf: dtmf.to_string(),
            callback,
        });
    }

    pub fn hook_fn<F, Fut>(&mut self, dtmf: &str, f: F)
    where
        F: Fn(Arc<Bridge>, Arc<BridgeChannel>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.hook(dtmf, Arc::new(move |bridge, bc| Box::pin(f(bridge, bc))));
    }

    /// Turn on a built-in feature, on its default key unless `dtmf` is given.
    pub fn enable(
        &mut self,
        feature: BuiltinFeature,
        dtmf: Option<&str>,
        config: Option<Arc<TransferConfig>>,
    ) -> Result<()> {
        let dtmf = dtmf.unwrap_or_else(|| feature.default_dtmf());
        let callback = match (feature, config) {
            (BuiltinFeature::Hangup, _) => hangup(),
            (BuiltinFeature::BlindTransfer, Some(config)) => blind_transfer(config),
            (BuiltinFeature::AttendedTransfer, Some(config)) => attended_transfer(config),
            (feature, None) => return Err(FeatureError::NoTransferConfig(feature))?,
        };
        self.hook(dtmf, callback);
        Ok(())
    }

    pub fn set_flag(&mut self, flag: FeatureFlags) {
        self.flags |= flag;
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty() && self.flags.is_empty()
    }

    /// Whether some hook starts with `digits`.
    pub fn has_prefix(&self, digits: &str) -> bool {
        self.hooks.iter().any(|h| h.dtmf.starts_with(digits))
    }

    pub fn lookup(&self, digits: &str) -> HookMatch {
        let exact = self
            .hooks
            .iter()
            .find(|h| h.dtmf == digits)
            .map(|h| h.callback.clone());
        let longer = self
            .hooks
            .iter()
            .any(|h| h.dtmf.len() > digits.len() && h.dtmf.starts_with(digits));
        match (exact, longer) {
            (Some(callback), false) => HookMatch::Exact(callback),
            (Some(callback), true) => HookMatch::Ambiguous(callback),
            (None, true) => HookMatch::Partial,
            (None, false) => HookMatch::NoMatch,
        }
    }
}

fn hangup() -> FeatureCallback {
    Arc::new(|_bridge, bc| {
        Box::pin(async move {
            bc.set_state(BridgeChannelState::End);
            Ok(())
        })
    })
}

fn blind_transfer(config: Arc<TransferConfig>) -> FeatureCallback {
    Arc::new(move |bridge, bc| Box::pin(run_blind_transfer(config.clone(), bridge, bc)))
}

fn attended_transfer(config: Arc<TransferConfig>) -> FeatureCallback {
    Arc::new(move |bridge, bc| Box::pin(run_attended_transfer(config.clone(), bridge, bc)))
}

// prompt, collect the extension, dial it; None when there is nothing to dial
async fn dial_target(config: &TransferConfig, transferor: &Arc<Channel>) -> Result<Option<Arc<Channel>>> {
    transferor.play("pbx-transfer")?;
    let exten = transferor
        .collect_digits(config.max_digits, config.digit_timeout)
        .await?;
    if exten.is_empty() {
        transferor.play("pbx-invalid")?;
        return Ok(None);
    }
    match config
        .dialer
        .originate(transferor, &config.context, &exten)
        .await
    {
        Ok(target) => {
            info!(
                channel = transferor.name(),
                "transfer to {}@{} via {}",
                exten,
                config.context,
                target.name()
            );
            Ok(Some(target))
        }
        Err(e) => {
            warn!(channel = transferor.name(), "can't dial {}: {}", exten, e);
            transferor.play("pbx-invalid")?;
            Ok(None)
        }
    }
}

async fn run_blind_transfer(
    config: Arc<TransferConfig>,
    bridge: Arc<Bridge>,
    bc: Arc<BridgeChannel>,
) -> Result<()> {
    let transferor = bc.chan.clone();
    let target = match dial_target(&config, &transferor).await? {
        Some(target) => target,
        None => return Ok(()),
    };
    bridge.impart(target, Some(&transferor), BridgeFeatures::default())?;
    Ok(())
}

async fn run_attended_transfer(
    config: Arc<TransferConfig>,
    bridge: Arc<Bridge>,
    bc: Arc<BridgeChannel>,
) -> Result<()> {
    let transferor = bc.chan.clone();
    let target = match dial_target(&config, &transferor).await? {
        Some(target) => target,
        None => return Ok(()),
    };

    let private = Bridge::new(BridgeCapability::ONE_TO_ONE_MIX, BridgeFlags::empty())?;
    private.impart(target.clone(), None, BridgeFeatures::default())?;

    let mut features = BridgeFeatures::default();
    {
        let (original, target, transferor) = (bridge.clone(), target.clone(), transferor.clone());
        features.hook_fn(&config.complete, move |private, me| {
            let (original, target, transferor) =
                (original.clone(), target.clone(), transferor.clone());
            async move {
                private.depart(&target).await?;
                original.impart(target, Some(&transferor), BridgeFeatures::default())?;
                me.set_state(BridgeChannelState::End);
                Ok(())
            }
        });
    }
    {
        let (original, target) = (bridge.clone(), target.clone());
        features.hook_fn(&config.threeway, move |private, me| {
            let (original, target) = (original.clone(), target.clone());
            async move {
                private.depart(&target).await?;
                original.impart(target, None, BridgeFeatures::default())?;
                me.set_state(BridgeChannelState::End);
                Ok(())
            }
        });
    }
    {
        let target = target.clone();
        features.hook_fn(&config.abort, move |private, me| {
            let target = target.clone();
            async move {
                if let Some(called) = private.find(&target) {
                    called.set_state(BridgeChannelState::Hangup);
                }
                me.set_state(BridgeChannelState::End);
                Ok(())
            }
        });
    }

    let state = private.join(transferor.clone(), features).await?;
    info!(
        channel = transferor.name(),
        "attended transfer to {} done ({})",
        target.name(),
        state
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> FeatureCallback {
        Arc::new(|_, _| Box::pin(async { Ok(()) }))
    }

    #[test]
    fn matching() {
        let mut features = BridgeFeatures::default();
        assert!(features.is_empty());
        features.hook("*", noop());
        features.hook("*2", noop());
        features.hook("#1", noop());

        assert!(features.has_prefix("*"));
        assert!(features.has_prefix("#"));
        assert!(!features.has_prefix("1"));
        assert!(matches!(features.lookup("*"), HookMatch::Ambiguous(_)));
        assert!(matches!(features.lookup("*2"), HookMatch::Exact(_)));
        assert!(matches!(features.lookup("#"), HookMatch::Partial));
        assert!(matches!(features.lookup("#2"), HookMatch::NoMatch));
    }

    #[test]
    fn builtins() {
        let mut features = BridgeFeatures::default();
        features.enable(BuiltinFeature::Hangup, None, None).unwrap();
        assert!(matches!(features.lookup("*"), HookMatch::Exact(_)));
        assert!(features
            .enable(BuiltinFeature::AttendedTransfer, None, None)
            .is_err());
        assert_eq!(BuiltinFeature::BlindTransfer.to_string(), "blindxfer");
        assert_eq!(
            "atxfer".parse::<BuiltinFeature>().unwrap(),
            BuiltinFeature::AttendedTransfer
        );

        let mut flagged = BridgeFeatures::default();
        flagged.set_flag(FeatureFlags::DISSOLVE);
        assert!(!flagged.is_empty());
    }
}
