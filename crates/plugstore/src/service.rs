//! # Storage Service
//!
//! Hub-side half of the storage RPC. Each command decodes its arguments,
//! forwards to a local `StorageController` and encodes the result; any
//! `StorageError` goes back to the caller as its `RemoteFault`.

use std::sync::Arc;

use plugbus::CommandTable;
use plugbus::Node;
use plugbus::RemoteFault;
use plugbus::RpcCall;
use plugbus::RpcServer;
use plugbus::rpc::CommandResult;
use plugpack::Record;
use tracing::debug;

use crate::STORAGE_TYPES;
use crate::command;
use crate::controller::StorageController;
use crate::error::StorageError;
use crate::record::SearchCriteria;
use crate::record::StorageNode;
use crate::record::encode_flag;
use crate::record::encode_names;
use crate::record::encode_nodes;

pub struct StorageService;

impl StorageService {
    /// The command table serving every storage operation from `controller`.
    pub fn table(controller: Arc<dyn StorageController>) -> CommandTable {
        let mut table = CommandTable::new();

        let c = controller.clone();
        table.register(command::GET, move |call: RpcCall| {
            let c = c.clone();
            async move {
                let node = c.get(call.arg(0)?).await.map_err(fault)?;
                encoded(&node)
            }
        });

        let c = controller.clone();
        table.register(command::ADD, move |call: RpcCall| {
            let c = c.clone();
            async move {
                c.add(node_payload(&call)?).await.map_err(fault)?;
                CommandResult::Ok(None)
            }
        });

        let c = controller.clone();
        table.register(command::UPDATE, move |call: RpcCall| {
            let c = c.clone();
            async move {
                c.update(node_payload(&call)?).await.map_err(fault)?;
                CommandResult::Ok(None)
            }
        });

        let c = controller.clone();
        table.register(command::ADD_OR_UPDATE, move |call: RpcCall| {
            let c = c.clone();
            async move {
                let created = c.add_or_update(node_payload(&call)?).await.map_err(fault)?;
                CommandResult::Ok(Some(encode_flag(created)))
            }
        });

        let c = controller.clone();
        table.register(command::DELETE, move |call: RpcCall| {
            let c = c.clone();
            async move {
                let node = c.delete(call.arg(0)?).await.map_err(fault)?;
                encoded(&node)
            }
        });

        let c = controller.clone();
        table.register(command::RENAME, move |call: RpcCall| {
            let c = c.clone();
            async move {
                c.rename(call.arg(0)?, call.arg(1)?).await.map_err(fault)?;
                CommandResult::Ok(None)
            }
        });

        let c = controller.clone();
        table.register(command::LIST, move |call: RpcCall| {
            let c = c.clone();
            async move {
                let names = c.list(call.arg(0)?).await.map_err(fault)?;
                let bytes = encode_names(&names).map_err(codec_fault)?;
                CommandResult::Ok(Some(bytes))
            }
        });

        let c = controller.clone();
        table.register(command::SEARCH, move |call: RpcCall| {
            let c = c.clone();
            async move {
                let bytes = call.payload.as_deref().ok_or_else(|| missing_payload(&call))?;
                let criteria = SearchCriteria::from_bytes(bytes).map_err(codec_fault)?;
                let nodes = c.search(&criteria).await.map_err(fault)?;
                let bytes = encode_nodes(&nodes).map_err(codec_fault)?;
                CommandResult::Ok(Some(bytes))
            }
        });

        let c = controller.clone();
        table.register(command::FLUSH, move |_call: RpcCall| {
            let c = c.clone();
            async move {
                c.flush().await.map_err(fault)?;
                CommandResult::Ok(None)
            }
        });

        let c = controller;
        table.register(command::ZAP, move |_call: RpcCall| {
            let c = c.clone();
            async move {
                c.zap().await.map_err(fault)?;
                CommandResult::Ok(None)
            }
        });

        table
    }

    /// Serves `controller` on `node` (normally the hub).
    pub fn install(node: &Node, controller: Arc<dyn StorageController>) -> RpcServer {
        debug!(peer = node.id(), "storage service installed");
        RpcServer::install(node, Self::table(controller), STORAGE_TYPES)
    }
}

fn fault(e: StorageError) -> RemoteFault {
    debug!(error = %e, "storage command failed");
    e.to_fault()
}

fn codec_fault(e: plugpack::Error) -> RemoteFault {
    StorageError::Codec(e).to_fault()
}

fn missing_payload(call: &RpcCall) -> RemoteFault {
    RemoteFault::bad_request(format!("'{}' requires a payload", call.method))
}

fn node_payload(call: &RpcCall) -> Result<StorageNode, RemoteFault> {
    let bytes = call.payload.as_deref().ok_or_else(|| missing_payload(call))?;
    StorageNode::from_bytes(bytes).map_err(codec_fault)
}

fn encoded(node: &StorageNode) -> CommandResult {
    Ok(Some(node.to_bytes().map_err(codec_fault)?))
}
