//! Registries for methods, hooks, subscriptions, and options.
//!
//! All registration happens before the run loop starts consuming input;
//! after that the registries are read-only, except for the controlled
//! `init` handler swap performed at run start. Methods and hooks share one
//! name namespace; subscription topics live in their own.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use crate::binder::{Args, ParamSpec};
use crate::error::{Error, Result};
use crate::plugin::Plugin;
use crate::request::PluginRequest;

/// Boxed handler future: every handler yields a result value or an error
/// that the dispatcher turns into a Failed reply.
pub(crate) type Handler =
    Arc<dyn Fn(Plugin, Arc<PluginRequest>, Args) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// How a named handler is exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Reachable via RPC passthrough; listed under `rpcmethods`.
    Rpc,
    /// Called synchronously by the host at lifecycle points; listed under
    /// `hooks`.
    Hook,
}

/// A named handler entry in the dispatch table.
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) kind: MethodKind,
    pub(crate) asynchronous: bool,
    pub(crate) handler: Handler,
}

/// A topic-keyed notification handler.
pub(crate) struct Subscription {
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) handler: Handler,
}

/// A registered configuration option, populated once by the `init` call.
#[derive(Debug, Clone, Serialize)]
pub struct OptionDef {
    pub name: String,
    #[serde(rename = "type")]
    pub opt_type: &'static str,
    pub default: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl OptionDef {
    pub(crate) fn new(name: &str, default: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            opt_type: "string",
            default: default.to_string(),
            description: description.to_string(),
            value: None,
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) methods: BTreeMap<String, Arc<Method>>,
    pub(crate) subscriptions: BTreeMap<String, Arc<Subscription>>,
    pub(crate) options: BTreeMap<String, OptionDef>,
}

impl Registry {
    /// Insert a method or hook; names are unique across both kinds.
    pub(crate) fn insert_method(&mut self, method: Method) -> Result<()> {
        if self.methods.contains_key(&method.name) {
            return Err(Error::MethodExists(method.name));
        }
        self.methods.insert(method.name.clone(), Arc::new(method));
        Ok(())
    }

    /// Replace a method unconditionally, returning the previous entry.
    /// Only the `init` swap uses this.
    pub(crate) fn replace_method(&mut self, method: Arc<Method>) -> Option<Arc<Method>> {
        self.methods.insert(method.name.clone(), method)
    }

    pub(crate) fn method(&self, name: &str) -> Option<Arc<Method>> {
        self.methods.get(name).cloned()
    }

    pub(crate) fn insert_subscription(
        &mut self,
        topic: &str,
        subscription: Subscription,
    ) -> Result<()> {
        if self.subscriptions.contains_key(topic) {
            return Err(Error::SubscriptionExists(topic.to_string()));
        }
        self.subscriptions
            .insert(topic.to_string(), Arc::new(subscription));
        Ok(())
    }

    pub(crate) fn subscription(&self, topic: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.get(topic).cloned()
    }

    pub(crate) fn insert_option(&mut self, option: OptionDef) -> Result<()> {
        if self.options.contains_key(&option.name) {
            return Err(Error::OptionExists(option.name));
        }
        self.options.insert(option.name.clone(), option);
        Ok(())
    }

    /// Record the host-supplied value for a registered option. Returns
    /// false when no such option exists.
    pub(crate) fn set_option_value(&mut self, name: &str, value: String) -> bool {
        match self.options.get_mut(name) {
            Some(option) => {
                option.value = Some(value);
                true
            }
            None => false,
        }
    }

    pub(crate) fn option_value(&self, name: &str) -> Option<String> {
        self.options
            .get(name)
            .map(|option| option.value.clone().unwrap_or_else(|| option.default.clone()))
    }
}
