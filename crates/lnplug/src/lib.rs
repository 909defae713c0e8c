//! Plugin runtime for a Lightning node host.
//!
//! The host spawns a plugin as a child process and speaks line-delimited
//! JSON-RPC over its stdin/stdout: a `getmanifest` probe, an `init` call
//! carrying configuration, then regular method calls, hook invocations, and
//! event notifications until it closes the stream. This crate owns that
//! whole conversation; the integrator registers handlers and calls
//! [`Plugin::run`].
//!
//! ```no_run
//! use lnplug::{ParamSpec, Plugin};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let plugin = Plugin::new();
//!     plugin.add_option("greeting", "Hello", "The greeting to use")?;
//!     plugin.add_method(
//!         "hello",
//!         Some("Greets the given name."),
//!         vec![ParamSpec::required("name")],
//!         |plugin, _request, args| async move {
//!             let name: String = args.demand("name")?;
//!             let greeting = plugin.option("greeting").unwrap_or_default();
//!             Ok(json!(format!("{greeting}, {name}")))
//!         },
//!     )?;
//!     plugin.run().await?;
//!     Ok(())
//! }
//! ```

pub mod binder;
pub mod error;
pub mod logsink;
pub mod plugin;
pub mod registry;
pub mod request;

mod outbox;

pub use binder::{Args, BindError, ParamSpec, bind};
pub use error::{Error, Result};
pub use logsink::{LogLevel, LogSink};
pub use plugin::{HOST_ENV_MARKER, NodeConfig, Plugin};
pub use registry::{MethodKind, OptionDef};
pub use request::{PluginRequest, RequestState};

// The node client lives in the wire crate; re-export it for integrators.
pub use lnplug_rpc::client::{ClientError, NodeRpc};
