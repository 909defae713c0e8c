//! The plugin runtime: registration, dispatch, handshake, and the run loop.
//!
//! A [`Plugin`] is built in two phases. Before [`run`](Plugin::run), the
//! integrator registers methods, hooks, subscriptions, and options. `run`
//! then takes over stdin/stdout, answers the host's `getmanifest` probe,
//! absorbs the `init` call (wiring up options and the node RPC client
//! before handing control to any integrator-registered `init` handler), and
//! dispatches host traffic until EOF.
//!
//! The handle is cheap to clone and every handler receives one, so async
//! handlers can log, notify, and call the node from spawned tasks.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError, RwLock};

use futures_util::{FutureExt, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, warn};

use crate::binder::{Args, ParamSpec, bind};
use crate::error::{Error, Result};
use crate::logsink::{LogLevel, LogRecord, LogSink};
use crate::outbox::Outbox;
use crate::registry::{Handler, Method, MethodKind, OptionDef, Registry, Subscription};
use crate::request::{PluginRequest, RequestState};
use lnplug_rpc::client::NodeRpc;
use lnplug_rpc::transport::{Frame, JsonRpcCodec};
use lnplug_rpc::{Message, Notification, Request};

/// Description used in the manifest for methods registered without one.
const UNDOCUMENTED: &str = "Undocumented RPC method from a plugin.";

/// Environment marker the host sets when it spawns a plugin. Its presence
/// means stdout belongs to the protocol and diagnostics must be redirected.
pub const HOST_ENV_MARKER: &str = "LIGHTNINGD_PLUGIN";

/// Node-side configuration delivered with the `init` call.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(rename = "rpc-file")]
    pub rpc_file: String,
    #[serde(rename = "lightning-dir")]
    pub lightning_dir: String,
}

struct PluginInner {
    registry: RwLock<Registry>,
    /// Integrator-registered `init` handler, parked while the built-in
    /// handshake handler occupies the name.
    stashed_init: StdMutex<Option<Arc<Method>>>,
    outbox: OnceLock<Outbox>,
    node: OnceLock<NodeRpc>,
    config: OnceLock<NodeConfig>,
    log_tx: mpsc::UnboundedSender<LogRecord>,
    log_rx: StdMutex<Option<mpsc::UnboundedReceiver<LogRecord>>>,
}

/// Handle to the plugin runtime. Clones share all state.
#[derive(Clone)]
pub struct Plugin {
    inner: Arc<PluginInner>,
}

fn boxed_handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Plugin, Arc<PluginRequest>, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |plugin, request, args| f(plugin, request, args).boxed())
}

/// Collapse each run of newlines in `text` to a single space.
fn collapse_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_break = false;
    for ch in text.chars() {
        if ch == '\n' {
            in_break = true;
        } else {
            if in_break {
                out.push(' ');
                in_break = false;
            }
            out.push(ch);
        }
    }
    out
}

/// Misuse errors from a finalizer are already logged at their source and
/// must not tear down the run loop; transport errors must.
fn swallow_misuse(result: Result<()>) -> Result<()> {
    match result {
        Ok(()) | Err(Error::NotPending { .. } | Error::NoRequestId) => Ok(()),
        Err(e) => Err(e),
    }
}

impl Plugin {
    #[must_use]
    pub fn new() -> Self {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let mut registry = Registry::default();
        // Fresh registry; the built-in cannot collide.
        let _ = registry.insert_method(Self::builtin_getmanifest());

        Self {
            inner: Arc::new(PluginInner {
                registry: RwLock::new(registry),
                stashed_init: StdMutex::new(None),
                outbox: OnceLock::new(),
                node: OnceLock::new(),
                config: OnceLock::new(),
                log_tx,
                log_rx: StdMutex::new(Some(log_rx)),
            }),
        }
    }

    // ---- registration -----------------------------------------------------

    /// Register an RPC method the host will route to this plugin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MethodExists`] for a duplicate name and
    /// [`Error::ReservedName`] for runtime-owned names.
    pub fn add_method<F, Fut>(
        &self,
        name: &str,
        description: Option<&str>,
        params: Vec<ParamSpec>,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(Plugin, Arc<PluginRequest>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(name, description, params, MethodKind::Rpc, false, boxed_handler(handler))
    }

    /// Register an RPC method whose handler finalizes the request itself,
    /// from whatever task completes the work.
    ///
    /// # Errors
    ///
    /// Same conditions as [`add_method`](Self::add_method).
    pub fn add_async_method<F, Fut>(
        &self,
        name: &str,
        description: Option<&str>,
        params: Vec<ParamSpec>,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(Plugin, Arc<PluginRequest>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(name, description, params, MethodKind::Rpc, true, boxed_handler(handler))
    }

    /// Register a hook. Hooks share the method namespace but are listed
    /// separately in the manifest and carry no description.
    ///
    /// # Errors
    ///
    /// Same conditions as [`add_method`](Self::add_method).
    pub fn add_hook<F, Fut>(&self, name: &str, params: Vec<ParamSpec>, handler: F) -> Result<()>
    where
        F: Fn(Plugin, Arc<PluginRequest>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(name, None, params, MethodKind::Hook, false, boxed_handler(handler))
    }

    /// Register a hook finalized by its handler rather than the dispatcher.
    ///
    /// # Errors
    ///
    /// Same conditions as [`add_method`](Self::add_method).
    pub fn add_async_hook<F, Fut>(
        &self,
        name: &str,
        params: Vec<ParamSpec>,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(Plugin, Arc<PluginRequest>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(name, None, params, MethodKind::Hook, true, boxed_handler(handler))
    }

    /// Subscribe to a host notification topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SubscriptionExists`] if the topic already has a
    /// handler.
    pub fn add_subscription<F, Fut>(
        &self,
        topic: &str,
        params: Vec<ParamSpec>,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(Plugin, Arc<PluginRequest>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.registry_mut().insert_subscription(
            topic,
            Subscription {
                params,
                handler: boxed_handler(handler),
            },
        )
    }

    /// Declare a string-valued startup option the host will configure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OptionExists`] for a duplicate name.
    pub fn add_option(&self, name: &str, default: &str, description: &str) -> Result<()> {
        self.registry_mut()
            .insert_option(OptionDef::new(name, default, description))
    }

    fn register(
        &self,
        name: &str,
        description: Option<&str>,
        params: Vec<ParamSpec>,
        kind: MethodKind,
        asynchronous: bool,
        handler: Handler,
    ) -> Result<()> {
        if name == "getmanifest" {
            return Err(Error::ReservedName(name.to_string()));
        }
        self.registry_mut().insert_method(Method {
            name: name.to_string(),
            description: description.map(str::to_string),
            params,
            kind,
            asynchronous,
            handler,
        })
    }

    // ---- post-init accessors ----------------------------------------------

    /// Current value of a registered option: host-supplied after `init`,
    /// otherwise the declared default.
    #[must_use]
    pub fn option(&self, name: &str) -> Option<String> {
        self.registry().option_value(name)
    }

    /// Client for the node's RPC socket. `None` before `init`.
    #[must_use]
    pub fn rpc(&self) -> Option<NodeRpc> {
        self.inner.node.get().cloned()
    }

    /// Node configuration delivered with `init`. `None` before `init`.
    #[must_use]
    pub fn configuration(&self) -> Option<NodeConfig> {
        self.inner.config.get().cloned()
    }

    #[must_use]
    pub fn lightning_dir(&self) -> Option<String> {
        self.inner.config.get().map(|c| c.lightning_dir.clone())
    }

    #[must_use]
    pub fn rpc_filename(&self) -> Option<String> {
        self.inner.config.get().map(|c| c.rpc_file.clone())
    }

    // ---- outbound traffic -------------------------------------------------

    /// Send a custom notification to the host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] before the run loop starts, or a
    /// transport error if the write fails.
    pub async fn notify(&self, topic: &str, params: Value) -> Result<()> {
        self.outbox()?
            .send(Message::Notification(Notification::new(topic, Some(params))))
            .await
    }

    /// Queue a `log` notification for the host, one per line of `message`.
    ///
    /// Never blocks and never fails: lines queued before the run loop
    /// starts are flushed once it does.
    pub fn log(&self, level: LogLevel, message: &str) {
        for line in message.split('\n') {
            // The receiver only disappears at shutdown.
            let _ = self.inner.log_tx.send(LogRecord {
                level,
                message: line.to_string(),
            });
        }
    }

    /// A [`LogSink`] feeding this plugin's `log` notification channel, for
    /// redirecting integrator-owned byte output (a child process's stderr,
    /// a legacy logger) at the given default level.
    #[must_use]
    pub fn log_sink(&self, level: LogLevel) -> LogSink {
        LogSink::new(level, self.inner.log_tx.clone())
    }

    // ---- run loop ---------------------------------------------------------

    /// Run the plugin over stdin/stdout until the host closes the stream.
    ///
    /// # Errors
    ///
    /// Returns a transport error if reading or writing the host stream
    /// fails; EOF is a normal return.
    pub async fn run(&self) -> Result<()> {
        self.run_with(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// [`run`](Self::run) over explicit streams.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus [`Error::AlreadyRunning`] if called
    /// twice.
    pub async fn run_with<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let outbox = Outbox::new(writer);
        if self.inner.outbox.set(outbox.clone()).is_err() {
            return Err(Error::AlreadyRunning);
        }

        let forwarder = self.spawn_log_forwarder(&outbox);

        if std::env::var_os(HOST_ENV_MARKER).is_some() {
            self.redirect_tracing();
        }

        // Park any integrator-registered `init` behind the handshake
        // handler; `handle_init` restores and invokes it.
        {
            let mut registry = self.registry_mut();
            if let Some(user_init) = registry.replace_method(Arc::new(Self::builtin_init())) {
                *self
                    .inner
                    .stashed_init
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(user_init);
            }
        }

        let result = self.read_loop(reader).await;
        if let Some(handle) = forwarder {
            handle.abort();
        }
        result
    }

    fn spawn_log_forwarder(&self, outbox: &Outbox) -> Option<JoinHandle<()>> {
        let mut rx = self
            .inner
            .log_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let outbox = outbox.clone();
        Some(tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let params = json!({"level": record.level, "message": record.message});
                let message = Message::Notification(Notification::new("log", Some(params)));
                if outbox.send(message).await.is_err() {
                    break;
                }
            }
        }))
    }

    /// Route tracing diagnostics into `log` notifications. Stdout belongs
    /// to the protocol once the host owns it.
    fn redirect_tracing(&self) {
        let sink = LogSink::new(LogLevel::Info, self.inner.log_tx.clone());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_writer(sink)
            .with_ansi(false)
            .without_time()
            .try_init();
    }

    async fn read_loop<R: AsyncRead + Unpin>(&self, reader: R) -> Result<()> {
        let mut frames = FramedRead::new(reader, JsonRpcCodec::new());
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Frame::Message(Message::Request(request))) => {
                    if request.id.is_some() {
                        self.dispatch_request(request).await?;
                    } else {
                        let params = request.params.unwrap_or(Value::Null);
                        self.dispatch_notification(&request.method, params).await;
                    }
                }
                Ok(Frame::Message(Message::Notification(notification))) => {
                    let params = notification.params.unwrap_or(Value::Null);
                    self.dispatch_notification(&notification.method, params).await;
                }
                Ok(Frame::Message(Message::Response(response))) => {
                    warn!(id = %response.id, "unexpected response on the host stream");
                }
                Ok(Frame::Invalid(e)) => {
                    warn!(error = %e, "discarding malformed message");
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!("host closed the stream");
        Ok(())
    }

    // ---- dispatch ---------------------------------------------------------

    async fn dispatch_request(&self, request: Request) -> Result<()> {
        let outbox = self.outbox()?;
        let method = self.registry().method(&request.method);
        let params = request.params.unwrap_or(Value::Null);

        let Some(method) = method else {
            let plugin_request = Arc::new(PluginRequest::new(
                request.id,
                request.method.clone(),
                params,
                false,
                outbox,
            ));
            warn!(method = %request.method, "request for unknown method");
            return swallow_misuse(
                plugin_request
                    .set_error(format!("No method {} found.", request.method))
                    .await,
            );
        };

        let plugin_request = Arc::new(PluginRequest::new(
            request.id,
            request.method,
            params,
            method.asynchronous,
            outbox,
        ));

        let args = match bind(&method.params, plugin_request.params()) {
            Ok(args) => args,
            Err(e) => return swallow_misuse(plugin_request.set_error(e.to_string()).await),
        };

        match (method.handler)(self.clone(), Arc::clone(&plugin_request), args).await {
            Ok(value) => {
                if !method.asynchronous {
                    swallow_misuse(plugin_request.set_result(value).await)?;
                }
                Ok(())
            }
            Err(e) => {
                error!(method = %plugin_request.method(), error = ?e, "handler failed");
                if plugin_request.state() == RequestState::Pending {
                    return swallow_misuse(plugin_request.set_error(e.to_string()).await);
                }
                Ok(())
            }
        }
    }

    async fn dispatch_notification(&self, topic: &str, params: Value) {
        let Some(subscription) = self.registry().subscription(topic) else {
            debug!(topic, "notification with no subscription");
            return;
        };

        let Some(outbox) = self.inner.outbox.get().cloned() else {
            return;
        };
        let plugin_request = Arc::new(PluginRequest::new(
            None,
            topic.to_string(),
            params,
            false,
            outbox,
        ));

        let args = match bind(&subscription.params, plugin_request.params()) {
            Ok(args) => args,
            Err(e) => {
                warn!(topic, error = %e, "notification parameters failed to bind");
                return;
            }
        };

        if let Err(e) = (subscription.handler)(self.clone(), plugin_request, args).await {
            error!(topic, error = ?e, "notification handler failed");
        }
    }

    // ---- built-ins --------------------------------------------------------

    fn builtin_getmanifest() -> Method {
        Method {
            name: "getmanifest".to_string(),
            description: None,
            params: Vec::new(),
            kind: MethodKind::Rpc,
            asynchronous: false,
            handler: boxed_handler(|plugin, _request, _args| async move {
                Ok(plugin.build_manifest())
            }),
        }
    }

    fn builtin_init() -> Method {
        Method {
            name: "init".to_string(),
            description: None,
            params: vec![
                ParamSpec::required("options"),
                ParamSpec::required("configuration"),
            ],
            kind: MethodKind::Rpc,
            asynchronous: false,
            handler: boxed_handler(|plugin, request, args| async move {
                plugin.handle_init(request, args).await
            }),
        }
    }

    /// Assemble the `getmanifest` reply from the current registries.
    ///
    /// Built-ins are excluded; an RPC method registered without a
    /// description gets a placeholder and a log warning, matching what the
    /// host expects from sloppy plugins.
    fn build_manifest(&self) -> Value {
        let registry = self.registry();
        let mut rpcmethods = Vec::new();
        let mut hooks = Vec::new();

        for (name, method) in &registry.methods {
            if name == "getmanifest" || name == "init" {
                continue;
            }
            match method.kind {
                MethodKind::Rpc => {
                    let description = match &method.description {
                        Some(d) => collapse_newlines(d),
                        None => {
                            self.log(
                                LogLevel::Warn,
                                &format!("RPC method '{name}' does not have a docstring."),
                            );
                            UNDOCUMENTED.to_string()
                        }
                    };
                    rpcmethods.push(json!({"name": name, "description": description}));
                }
                MethodKind::Hook => hooks.push(json!(name)),
            }
        }

        let options: Vec<&OptionDef> = registry.options.values().collect();
        let subscriptions: Vec<&String> = registry.subscriptions.keys().collect();
        json!({
            "options": options,
            "rpcmethods": rpcmethods,
            "subscriptions": subscriptions,
            "hooks": hooks,
        })
    }

    /// The handshake: record option values, wire up the node RPC client,
    /// then restore and invoke any integrator-registered `init` handler.
    async fn handle_init(&self, request: Arc<PluginRequest>, args: Args) -> anyhow::Result<Value> {
        let options: Map<String, Value> = args.demand("options")?;
        let config: NodeConfig = args.demand("configuration")?;

        {
            let mut registry = self.registry_mut();
            for (name, value) in options {
                let text = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                if !registry.set_option_value(&name, text) {
                    warn!(option = %name, "host configured an unregistered option");
                }
            }
        }

        let socket = Path::new(&config.lightning_dir).join(&config.rpc_file);
        if self.inner.node.set(NodeRpc::new(socket)).is_err() {
            warn!("init received more than once");
        }
        let _ = self.inner.config.set(config);

        let stashed = self
            .inner
            .stashed_init
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(user_init) = stashed {
            let args = bind(&user_init.params, request.params())?;
            self.registry_mut().replace_method(Arc::clone(&user_init));
            return (user_init.handler)(self.clone(), request, args).await;
        }
        Ok(Value::Null)
    }

    // ---- plumbing ---------------------------------------------------------

    fn outbox(&self) -> Result<Outbox> {
        self.inner.outbox.get().cloned().ok_or(Error::NotRunning)
    }

    fn registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registered option names and their current values, for diagnostics.
    #[must_use]
    pub fn options(&self) -> BTreeMap<String, String> {
        let registry = self.registry();
        registry
            .options
            .values()
            .map(|o| {
                let value = o.value.clone().unwrap_or_else(|| o.default.clone());
                (o.name.clone(), value)
            })
            .collect()
    }
}

impl Default for Plugin {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin").finish_non_exhaustive()
    }
}
