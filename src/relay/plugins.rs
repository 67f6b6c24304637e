// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Result, bail};
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::{
    logging::{EventLogger, LogArg},
    relay::client::{PluginState, RelayClient},
};

/// Builds one plugin instance; registered under the plugin's name.
pub type PluginFactory = fn() -> Arc<dyn RelayPlugin>;

/// An ordered filter applied to every inbound payload before fan-out.
pub trait RelayPlugin: Send + Sync {
    /// The name this plugin logs under.
    fn name(&self) -> &str;

    /// Transforms one payload. Returning several payloads splices them in
    /// place of the one consumed; `state` is the client's scratch bag and
    /// survives across frames.
    fn handle_data(
        &self,
        log: &PluginLogger<'_>,
        payload: Bytes,
        state: &mut PluginState,
    ) -> Result<Vec<Bytes>>;
}

/// Lets a plugin emit events tagged with its own name under the
/// originating client's origin and session.
pub struct PluginLogger<'a> {
    logger: &'a EventLogger,
    tag: &'a str,
    origin: &'a str,
    session: Option<u8>,
}

impl PluginLogger<'_> {
    pub fn log(&self, args: Vec<LogArg>) {
        self.logger.log(self.tag, args, self.origin, self.session);
    }
}

static REGISTRY: Lazy<DashMap<String, PluginFactory>> = Lazy::new(DashMap::new);

/// Registers a plugin constructor under `name`. Later registrations win,
/// which lets tests shadow built-ins.
pub fn register_plugin(name: &str, factory: PluginFactory) {
    REGISTRY.insert(name.to_string(), factory);
}

/// The configured, ordered filter pipeline.
pub struct PluginChain {
    plugins: Vec<Arc<dyn RelayPlugin>>,
}

impl PluginChain {
    /// Instantiates the named plugins in order. Unknown names are a
    /// startup error.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut plugins = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let Some(factory) = REGISTRY.get(name).map(|entry| *entry.value()) else {
                bail!("unknown plugin: {name}");
            };
            plugins.push(factory());
        }
        Ok(PluginChain { plugins })
    }

    pub fn empty() -> Self {
        PluginChain { plugins: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Runs the chain over one inbound payload.
    ///
    /// The working value is a payload sequence seeded with the inbound
    /// payload. Each plugin consumes the head; its output replaces it,
    /// the rest passes untouched. A failing plugin leaves the sequence
    /// unchanged.
    pub fn filter(
        &self,
        logger: &EventLogger,
        client: &RelayClient,
        payload: Bytes,
    ) -> Vec<Bytes> {
        let mut data = vec![payload];
        for plugin in &self.plugins {
            let Some(first) = data.first().cloned() else { break };
            let log = PluginLogger {
                logger,
                tag: plugin.name(),
                origin: client.origin(),
                session: client.session(),
            };
            match client.with_state(|state| plugin.handle_data(&log, first, state)) {
                Ok(replacement) => {
                    data.splice(0..1, replacement);
                },
                Err(e) => {
                    debug!("plugin {} failed: {e}", plugin.name());
                },
            }
        }
        data
    }
}
