//! Delivery transports.
//!
//! A destination delegates the actual byte moving to a [`Transport`]. Which
//! transport a destination gets is decided once, at load time, by looking its
//! protocol tag up in a [`ProtocolRegistry`]. Tags that are not registered use
//! the shell command template transport.

pub mod chunked_http;
pub mod command;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::deliverable::DeliverableFile;
use crate::destination::DestinationIdentity;
use crate::error::Result;

pub use chunked_http::ChunkedHttpTransport;
pub use command::CommandTransport;

/// Moves one file to one destination.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs.
    fn kind(&self) -> &'static str;

    /// Pause observed after every attempt, before the delivery permit is released.
    fn settle_delay(&self) -> Duration;

    /// Work done before the delivery permit is taken, e.g. hashing.
    async fn prepare(&self, _file: &DeliverableFile) -> Result<()> {
        Ok(())
    }

    /// Transfer the file. Called while holding the delivery permit.
    async fn transfer(&self, target: &DestinationIdentity, file: &DeliverableFile) -> Result<()>;
}

/// Inputs available to a transport constructor.
#[derive(Debug, Clone, Copy)]
pub struct TransportContext<'a> {
    /// Destination the transport is built for.
    pub identity: &'a DestinationIdentity,
    /// Upload command template for the destination's protocol tag, if one was found.
    pub template: Option<&'a str>,
    /// Log instead of contacting the device.
    pub dry_run: bool,
}

/// Constructor for a protocol variant.
pub type TransportFactory = fn(&TransportContext<'_>) -> Arc<dyn Transport>;

/// Protocol tag to transport constructor mapping.
#[derive(Clone)]
pub struct ProtocolRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl ProtocolRegistry {
    /// Registry with no variants; every tag falls back to the command template.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in variants.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(chunked_http::PROTOCOL_TAG, chunked_http_factory);
        registry
    }

    /// Register `factory` under `tag`. Tags compare case-insensitively.
    pub fn register(&mut self, tag: &str, factory: TransportFactory) {
        self.factories.insert(tag.to_ascii_lowercase(), factory);
    }

    /// Returns true if `tag` has a dedicated variant.
    pub fn is_registered(&self, tag: &str) -> bool {
        self.factories.contains_key(&tag.to_ascii_lowercase())
    }

    /// True when destinations with this tag need an upload command template.
    pub fn needs_template(&self, tag: &str) -> bool {
        !self.is_registered(tag)
    }

    /// Build the transport for a destination.
    pub fn build(&self, ctx: &TransportContext<'_>) -> Arc<dyn Transport> {
        match self.factories.get(&ctx.identity.protocol.to_ascii_lowercase()) {
            Some(factory) => factory(ctx),
            None => command_factory(ctx),
        }
    }
}

fn chunked_http_factory(ctx: &TransportContext<'_>) -> Arc<dyn Transport> {
    Arc::new(ChunkedHttpTransport::new().dry_run(ctx.dry_run))
}

fn command_factory(ctx: &TransportContext<'_>) -> Arc<dyn Transport> {
    Arc::new(CommandTransport::from_template(ctx.template, ctx.identity).dry_run(ctx.dry_run))
}
