//! # RPC Template
//!
//! Maps a synchronous remote interface onto bus messages.
//!
//! ## Protocol
//!
//! - **Call**: a message of the call type addressed to the server, whose action
//!   path is `method/arg1/arg2/...` (each segment escaped) and whose payload
//!   carries any binary argument.
//! - **Reply**: a message of the success or error type with the same correlation
//!   id and the same action. Success carries the return value in the payload;
//!   error carries a `RemoteFault` record.
//!
//! The correlation id is the only correlation token. The server side is a
//! `CommandTable` of named handlers, populated once; an unknown method is
//! answered with an `UnknownCommand` fault.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use plugpack::Decoder;
use plugpack::Encoder;
use plugpack::Record;
use tracing::debug;
use tracing::warn;

use crate::dispatch::MessageListener;
use crate::error::BusError;
use crate::message::Message;
use crate::message::MessageType;
use crate::message::StructuredUrl;
use crate::node::Node;
use crate::node::NodeRef;

// ============================================================================
//  Faults
// ============================================================================

/// A fault raised on the far side of a call, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct RemoteFault {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl RemoteFault {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into(), stack: None }
    }

    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn unknown_command(method: &str) -> Self {
        Self::new("UnknownCommand", format!("no handler registered for '{}'", method))
    }

    pub fn missing_argument(method: &str, index: usize) -> Self {
        Self::new("MissingArgument", format!("'{}' expects an argument at position {}", method, index))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BadRequest", message)
    }
}

impl Record for RemoteFault {
    const MARKER: i64 = 6_677_211_093;

    fn encode_fields(&self, enc: &mut Encoder) -> plugpack::Result<()> {
        enc.str(&self.name)?;
        enc.str(&self.message)?;
        enc.opt_str(self.stack.as_deref())
    }

    fn decode_fields(dec: &mut Decoder<'_>) -> plugpack::Result<Self> {
        Ok(Self {
            name: dec.str()?.to_owned(),
            message: dec.str()?.to_owned(),
            stack: dec.opt_str()?.map(str::to_owned),
        })
    }
}

/// Failures of a client-side call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error(transparent)]
    Bus(#[from] BusError),
    /// The server answered with an error reply.
    #[error("remote fault: {0}")]
    Remote(RemoteFault),
    /// The reply did not follow the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;

// ============================================================================
//  Paths
// ============================================================================

fn escape(segment: &str) -> String {
    segment.replace('%', "%25").replace('/', "%2F")
}

fn unescape(segment: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3).ok_or_else(|| format!("truncated escape in '{}'", segment))?;
        match code {
            "25" => out.push('%'),
            "2F" | "2f" => out.push('/'),
            other => return Err(format!("unknown escape '%{}' in '{}'", other, segment)),
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Builds `method/arg1/arg2/...` with every segment escaped.
pub fn encode_path(method: &str, args: &[&str]) -> String {
    let mut path = escape(method);
    for arg in args {
        path.push('/');
        path.push_str(&escape(arg));
    }
    path
}

/// Splits a call path back into the method name and its arguments.
pub fn decode_path(path: &str) -> std::result::Result<(String, Vec<String>), String> {
    let mut segments = path.split('/');
    let method = unescape(segments.next().unwrap_or_default())?;
    if method.is_empty() {
        return Err("empty method name".into());
    }
    let args = segments.map(unescape).collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((method, args))
}

// ============================================================================
//  Server
// ============================================================================

/// The message types one RPC interface uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RpcTypes {
    pub call: MessageType,
    pub success: MessageType,
    pub error: MessageType,
}

/// A decoded inbound call.
#[derive(Debug, Clone)]
pub struct RpcCall {
    pub method: String,
    pub args: Vec<String>,
    pub payload: Option<Vec<u8>>,
    /// Peer id of the caller.
    pub source: String,
}

impl RpcCall {
    /// Returns argument `index`, or a `MissingArgument` fault.
    pub fn arg(&self, index: usize) -> std::result::Result<&str, RemoteFault> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| RemoteFault::missing_argument(&self.method, index))
    }
}

pub type CommandResult = std::result::Result<Option<Vec<u8>>, RemoteFault>;

/// A named server-side operation.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, call: RpcCall) -> CommandResult;
}

#[async_trait::async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(RpcCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CommandResult> + Send + 'static,
{
    async fn handle(&self, call: RpcCall) -> CommandResult {
        self(call).await
    }
}

/// Command name to handler.
#[derive(Default)]
pub struct CommandTable {
    commands: HashMap<String, Arc<dyn CommandHandler>>,
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.commands.keys().collect();
        names.sort();
        f.debug_struct("CommandTable").field("commands", &names).finish()
    }
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the handler for `name`.
    pub fn register(&mut self, name: impl Into<String>, handler: impl CommandHandler) -> &mut Self {
        self.commands.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Runs the handler named by `call.method`.
    pub async fn dispatch(&self, call: RpcCall) -> CommandResult {
        match self.commands.get(&call.method) {
            Some(handler) => handler.handle(call).await,
            None => Err(RemoteFault::unknown_command(&call.method)),
        }
    }
}

/// A command table bound to a node.
pub struct RpcServer {
    node: NodeRef,
    listener: Arc<dyn MessageListener>,
    types: RpcTypes,
}

impl RpcServer {
    /// Starts answering `types.call` messages arriving at `node` from `table`.
    pub fn install(node: &Node, table: CommandTable, types: RpcTypes) -> Self {
        let listener: Arc<dyn MessageListener> = Arc::new(CallListener {
            node: node.downgrade(),
            table: Arc::new(table),
            types,
        });
        node.register_listener(&[types.call], listener.clone());
        debug!(peer = node.id(), call = %types.call, "rpc server installed");
        Self { node: node.downgrade(), listener, types }
    }

    /// Stops answering calls.
    pub fn uninstall(self) {
        if let Some(node) = self.node.upgrade() {
            node.deregister_listener(&self.listener, Some(&[self.types.call]));
        }
    }
}

struct CallListener {
    node: NodeRef,
    table: Arc<CommandTable>,
    types: RpcTypes,
}

impl MessageListener for CallListener {
    fn on_message(&self, message: &Message) {
        let node = self.node.clone();
        let table = self.table.clone();
        let types = self.types;
        let call = message.clone();
        // handlers are async; the listener itself must not block the dispatcher
        tokio::spawn(async move {
            let result = match decode_call(&call) {
                Ok(rpc) => {
                    debug!(method = %rpc.method, source = %rpc.source, "rpc call");
                    table.dispatch(rpc).await
                }
                Err(fault) => Err(fault),
            };
            let reply = match result {
                Ok(payload) => call.reply(types.success, payload),
                Err(fault) => {
                    debug!(fault = %fault, "rpc call failed");
                    match fault.to_bytes() {
                        Ok(bytes) => call.reply(types.error, Some(bytes)),
                        Err(e) => {
                            warn!(error = %e, "cannot encode fault");
                            call.reply(types.error, None)
                        }
                    }
                }
            };
            let Some(node) = node.upgrade() else {
                return;
            };
            if let Err(e) = node.send(reply).await {
                warn!(peer = call.source_id(), error = %e, "failed to send rpc reply");
            }
        });
    }
}

fn decode_call(message: &Message) -> std::result::Result<RpcCall, RemoteFault> {
    let action = message
        .action()
        .ok_or_else(|| RemoteFault::bad_request("call carries no action"))?;
    let (method, args) = decode_path(action.path()).map_err(RemoteFault::bad_request)?;
    Ok(RpcCall {
        method,
        args,
        payload: message.payload().map(<[u8]>::to_vec),
        source: message.source_id().to_string(),
    })
}

// ============================================================================
//  Client
// ============================================================================

/// Calls methods on a remote command table.
#[derive(Debug, Clone)]
pub struct RpcClient {
    node: Node,
    target: String,
    types: RpcTypes,
    timeout: Duration,
}

impl RpcClient {
    /// A client for the table served by `target`, with the settings' RPC timeout.
    pub fn new(node: Node, target: impl Into<String>, types: RpcTypes) -> Self {
        let timeout = node.settings().rpc_timeout();
        Self { node, target: target.into(), types, timeout }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Calls `method` and waits for its reply.
    ///
    /// # Errors
    ///
    /// - `RpcError::Bus` if the call could not be delivered or timed out.
    /// - `RpcError::Remote` with the server's fault on an error reply.
    /// - `RpcError::Protocol` if the reply names a different method or its
    ///   fault payload cannot be decoded.
    pub async fn call(&self, method: &str, args: &[&str], payload: Option<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        let action = StructuredUrl::with_protocol(
            self.node.settings().protocol.as_str(),
            self.target.as_str(),
            encode_path(method, args),
        )
        .map_err(BusError::from)?;
        let mut request = Message::new(self.node.id(), self.target.as_str(), self.types.call).with_action(action);
        request.set_payload(payload);

        let reply = self
            .node
            .request(request, &[self.types.success, self.types.error], self.timeout)
            .await?;

        let replied_method = reply
            .action()
            .and_then(|a| decode_path(a.path()).ok())
            .map(|(m, _)| m);
        if replied_method.as_deref() != Some(method) {
            return Err(RpcError::Protocol(format!(
                "reply for '{}' names {:?}",
                method, replied_method
            )));
        }

        if reply.message_type() == Some(self.types.error) {
            let fault = RemoteFault::from_bytes(reply.payload().unwrap_or_default())
                .map_err(|e| RpcError::Protocol(format!("undecodable fault: {}", e)))?;
            return Err(RpcError::Remote(fault));
        }
        Ok(reply.payload().map(<[u8]>::to_vec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_escaping() {
        let path = encode_path("get", &["a/b", "100%", ""]);
        assert_eq!(path, "get/a%2Fb/100%25/");
        let (method, args) = decode_path(&path).unwrap();
        assert_eq!(method, "get");
        assert_eq!(args, vec!["a/b", "100%", ""]);
    }

    #[test]
    fn test_path_without_args() {
        assert_eq!(decode_path("flush").unwrap(), ("flush".to_string(), vec![]));
    }

    #[test]
    fn test_bad_paths() {
        assert!(decode_path("").is_err());
        assert!(decode_path("get/%4").is_err());
        assert!(decode_path("get/%41").is_err());
    }

    #[test]
    fn test_fault_record() {
        let fault = RemoteFault::new("StorageException", "no such node").with_stack("at get\nat main");
        let decoded = RemoteFault::from_bytes(&fault.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, fault);
        assert_eq!(fault.to_string(), "StorageException: no such node");
    }

    #[tokio::test]
    async fn test_command_table() {
        let mut table = CommandTable::new();
        table.register("echo", |call: RpcCall| async move {
            let word = call.arg(0)?;
            CommandResult::Ok(Some(word.as_bytes().to_vec()))
        });

        let call = |method: &str, args: Vec<String>| RpcCall {
            method: method.into(),
            args,
            payload: None,
            source: "peer".into(),
        };

        assert_eq!(table.dispatch(call("echo", vec!["hi".into()])).await, Ok(Some(b"hi".to_vec())));
        assert_eq!(
            table.dispatch(call("echo", vec![])).await,
            Err(RemoteFault::missing_argument("echo", 0))
        );
        assert_eq!(
            table.dispatch(call("nope", vec![])).await.unwrap_err().name,
            "UnknownCommand"
        );
    }
}
