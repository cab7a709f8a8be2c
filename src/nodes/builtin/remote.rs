//! Remote compute: remote
//!
//! A remote node forwards its inputs to a service and emits whatever tensors
//! come back. Its channels are not fixed at compile time; they come from the
//! service's [`IoDescription`]. The wire protocol lives behind
//! [`RemoteTransport`].

use crate::core::context::EvalContext;
use crate::core::error::{EvalErrorKind, EvalResult};
use crate::core::node::{Category, NodeKind, NodeMetadata, Pinout};
use crate::core::port::{Arity, ChannelDef, Direction};
use crate::core::tensor::Tensor;
use futures::future::{self, try_join_all, BoxFuture, FutureExt};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// I/O Description
// ============================================================================

/// One channel offered by a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoPort {
    pub kind: Direction,
    pub channel: String,
    pub access: Arity,
}

/// The channels of a remote endpoint, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IoDescription {
    pub ports: Vec<IoPort>,
}

impl IoDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input channel.
    pub fn input(mut self, channel: impl Into<String>, access: Arity) -> Self {
        self.ports.push(IoPort {
            kind: Direction::In,
            channel: channel.into(),
            access,
        });
        self
    }

    /// Add an output channel.
    pub fn output(mut self, channel: impl Into<String>) -> Self {
        self.ports.push(IoPort {
            kind: Direction::Out,
            channel: channel.into(),
            access: Arity::One,
        });
        self
    }

    fn names(&self, kind: Direction) -> Vec<&str> {
        self.ports
            .iter()
            .filter(|p| p.kind == kind)
            .map(|p| p.channel.as_str())
            .collect()
    }

    /// Input channel names.
    pub fn in_names(&self) -> Vec<&str> {
        self.names(Direction::In)
    }

    /// Output channel names.
    pub fn out_names(&self) -> Vec<&str> {
        self.names(Direction::Out)
    }

    /// Declared access of a channel.
    pub fn access(&self, kind: Direction, channel: &str) -> Option<Arity> {
        self.ports
            .iter()
            .find(|p| p.kind == kind && p.channel == channel)
            .map(|p| p.access)
    }

    /// Whether `count` edges satisfy the channel's access. Unknown channels
    /// accept nothing.
    pub fn channel_access_valid(&self, kind: Direction, channel: &str, count: usize) -> bool {
        self.access(kind, channel)
            .is_some_and(|access| access.satisfied_by(count))
    }
}

// ============================================================================
// Transport
// ============================================================================

/// A compute request: every input tensor tagged with its input channel.
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub endpoint: String,
    pub params: IndexMap<String, String>,
    pub tensors: Vec<(String, Tensor)>,
}

/// A failure reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFault {
    pub message: String,
    /// Indices of the remote-side nodes leading to the failure.
    pub remote_path: Vec<u32>,
}

impl RemoteFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            remote_path: Vec::new(),
        }
    }

    /// Attribute the fault to a remote-side node path.
    pub fn at(mut self, path: Vec<u32>) -> Self {
        self.remote_path = path;
        self
    }
}

/// Tensors returned by a compute call, tagged with output channels.
pub type RemoteResult = Result<Vec<(String, Tensor)>, RemoteFault>;

/// Moves requests to a compute service and back.
pub trait RemoteTransport: Send + Sync {
    /// Fetch the channel layout of `endpoint`.
    fn describe(
        &self,
        endpoint: &str,
        params: &IndexMap<String, String>,
    ) -> BoxFuture<'static, Result<IoDescription, RemoteFault>>;

    /// Run one computation.
    fn compute(&self, request: RemoteRequest) -> BoxFuture<'static, RemoteResult>;
}

type Handler = dyn Fn(&RemoteRequest) -> RemoteResult + Send + Sync;

/// In-process transport: each request is answered by a local handler.
#[derive(Clone)]
pub struct LoopbackTransport {
    handler: Arc<Handler>,
    descriptions: IndexMap<String, IoDescription>,
}

impl LoopbackTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&RemoteRequest) -> RemoteResult + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            descriptions: IndexMap::new(),
        }
    }

    /// Returns every input tensor unchanged on the channel it arrived on.
    pub fn echo() -> Self {
        Self::new(|request| Ok(request.tensors.clone()))
    }

    /// Answer `describe(endpoint)` with `io`.
    pub fn with_description(mut self, endpoint: impl Into<String>, io: IoDescription) -> Self {
        self.descriptions.insert(endpoint.into(), io);
        self
    }
}

impl fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("endpoints", &self.descriptions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RemoteTransport for LoopbackTransport {
    fn describe(
        &self,
        endpoint: &str,
        _params: &IndexMap<String, String>,
    ) -> BoxFuture<'static, Result<IoDescription, RemoteFault>> {
        let result = self
            .descriptions
            .get(endpoint)
            .cloned()
            .ok_or_else(|| RemoteFault::new(format!("unknown endpoint '{endpoint}'")));
        future::ready(result).boxed()
    }

    fn compute(&self, request: RemoteRequest) -> BoxFuture<'static, RemoteResult> {
        future::ready((self.handler)(&request)).boxed()
    }
}

// ============================================================================
// Node
// ============================================================================

/// Offloads its computation to a remote endpoint.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RemoteNode {
    pub endpoint: String,
    #[serde(default)]
    pub io: IoDescription,
    #[serde(default)]
    pub params: IndexMap<String, String>,
    #[serde(skip)]
    transport: Option<Arc<dyn RemoteTransport>>,
}

impl fmt::Debug for RemoteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteNode")
            .field("endpoint", &self.endpoint)
            .field("io", &self.io)
            .field("params", &self.params)
            .field("transport", &self.transport.as_ref().map(|_| "<transport>"))
            .finish()
    }
}

impl RemoteNode {
    pub const KIND: &'static str = "remote";

    pub fn new(endpoint: impl Into<String>, io: IoDescription) -> Self {
        Self {
            endpoint: endpoint.into(),
            io,
            ..Self::default()
        }
    }

    /// Ask `transport` for the endpoint's channels and build a node for it.
    pub async fn discover(
        transport: Arc<dyn RemoteTransport>,
        endpoint: impl Into<String>,
        params: IndexMap<String, String>,
    ) -> Result<Self, RemoteFault> {
        let endpoint = endpoint.into();
        let io = transport.describe(&endpoint, &params).await?;
        Ok(Self {
            endpoint,
            io,
            params,
            transport: Some(transport),
        })
    }

    /// Add a request parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Send requests through `transport`.
    pub fn with_transport(mut self, transport: Arc<dyn RemoteTransport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

impl NodeKind for RemoteNode {
    fn metadata(&self) -> NodeMetadata {
        let mut builder = NodeMetadata::builder(Self::KIND, "Remote")
            .description("Run a computation on a remote service")
            .category(Category::Remote);
        for port in &self.io.ports {
            let channel = ChannelDef::new(port.channel.clone()).with_arity(port.access);
            builder = match port.kind {
                Direction::In => builder.input(channel),
                Direction::Out => builder.output(channel),
            };
        }
        builder.build()
    }

    fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
        let endpoint = self.endpoint.clone();
        let params = self.params.clone();
        let desc = self.io.clone();
        let transport = self.transport.clone();
        async move {
            let remote_error = |message: String, remote_path: Vec<u32>| EvalErrorKind::Remote {
                endpoint: endpoint.clone(),
                message,
                remote_path,
            };
            let Some(transport) = transport else {
                return Err(io.fail(remote_error("no transport configured".into(), Vec::new())));
            };

            let mut tensors = Vec::new();
            for channel in desc.in_names() {
                let edges = io.edges(channel).to_vec();
                if !desc.channel_access_valid(Direction::In, channel, edges.len()) {
                    return Err(io.fail(if edges.is_empty() {
                        EvalErrorKind::MissingInput(channel.to_string())
                    } else {
                        EvalErrorKind::Arity {
                            channel: channel.to_string(),
                            arity: desc.access(Direction::In, channel).unwrap_or_default(),
                            count: edges.len(),
                        }
                    }));
                }
                let values = try_join_all(edges.iter().map(|edge| io.read(edge))).await?;
                tensors.extend(values.into_iter().map(|t| (channel.to_string(), t)));
            }

            let request = RemoteRequest {
                endpoint: endpoint.clone(),
                params,
                tensors,
            };
            let outputs = transport
                .compute(request)
                .await
                .map_err(|fault| io.fail(remote_error(fault.message, fault.remote_path)))?;

            let mut pinout = Pinout::new();
            for (channel, tensor) in outputs {
                if desc.access(Direction::Out, &channel).is_none() {
                    log::warn!("remote '{endpoint}' returned undeclared channel '{channel}'");
                    continue;
                }
                pinout.set(channel, tensor);
            }
            Ok(pinout)
        }
        .boxed()
    }

    fn config(&self) -> serde_json::Value {
        crate::core::node::tagged_config(Self::KIND, self)
    }

    fn clone_box(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{GraphError, NodeId};
    use crate::execution::memo::MemoStatus;
    use crate::graph::context::Context;
    use crate::nodes::registry::NodeRegistry;
    use crate::nodes::builtin::{BinOpNode, ConstNode};

    fn doubler() -> LoopbackTransport {
        LoopbackTransport::new(|request| {
            let (_, x) = request
                .tensors
                .iter()
                .find(|(ch, _)| ch == "x")
                .ok_or_else(|| RemoteFault::new("no x"))?;
            let data = x.to_vec().iter().map(|v| v * 2.0).collect();
            let y = Tensor::from_dims(x.dims(), Some(data)).map_err(|e| RemoteFault::new(e.to_string()))?;
            Ok(vec![("y".to_string(), y)])
        })
        .with_description("double", IoDescription::new().input("x", Arity::One).output("y"))
    }

    fn remote(ctx: &Context, transport: LoopbackTransport) -> (NodeId, NodeId) {
        let node = pollster::block_on(RemoteNode::discover(
            Arc::new(transport),
            "double",
            IndexMap::new(),
        ))
        .unwrap();
        let src = ctx.add_node(Box::new(ConstNode::with_data(vec![2], vec![1.0, 2.5])));
        let id = ctx.add_node(Box::new(node));
        ctx.link(src, "o", id, "x").unwrap();
        (src, id)
    }

    #[test]
    fn test_access_rules() {
        let desc = IoDescription::new()
            .input("one", Arity::One)
            .input("many", Arity::AtLeastOne)
            .input("any", Arity::Any)
            .output("out");
        assert!(desc.channel_access_valid(Direction::In, "one", 1));
        assert!(!desc.channel_access_valid(Direction::In, "one", 2));
        assert!(!desc.channel_access_valid(Direction::In, "many", 0));
        assert!(desc.channel_access_valid(Direction::In, "any", 0));
        assert!(!desc.channel_access_valid(Direction::In, "out", 1));
        assert_eq!(desc.in_names(), vec!["one", "many", "any"]);
        assert_eq!(desc.out_names(), vec!["out"]);
    }

    #[test]
    fn test_description_wire_format() {
        let desc: IoDescription = serde_json::from_str(
            r#"[{"kind":"in","channel":"x","access":"1+"},{"kind":"out","channel":"y","access":"1"}]"#,
        )
        .unwrap();
        assert_eq!(desc.access(Direction::In, "x"), Some(Arity::AtLeastOne));
        assert_eq!(desc.out_names(), vec!["y"]);
    }

    #[test]
    fn test_remote_round_trip() {
        let ctx = Context::new();
        let (_, id) = remote(&ctx, doubler());
        let y = pollster::block_on(ctx.get(id, "y")).unwrap();
        assert_eq!(y.to_vec(), vec![2.0, 5.0]);
    }

    #[test]
    fn test_configure_cannot_change_channels() {
        let ctx = Context::new();
        let (src, id) = remote(&ctx, doubler());
        pollster::block_on(ctx.eval(id)).unwrap();

        let renamed = ctx.configure::<RemoteNode, _>(id, |node| {
            node.io = IoDescription::new().input("z", Arity::One).output("y");
        });
        assert!(matches!(renamed, Err(GraphError::ChannelsChanged { node }) if node == id));

        let widened = ctx.configure::<RemoteNode, _>(id, |node| {
            node.io = IoDescription::new().input("x", Arity::AtLeastOne).output("y");
        });
        assert!(matches!(widened, Err(GraphError::ChannelsChanged { .. })));

        assert_eq!(ctx.memo_status(id), Some(MemoStatus::Resolved));
        assert_eq!(ctx.inputs(id, Some("x")).len(), 1);
        assert!(matches!(
            ctx.link(src, "o", id, "z"),
            Err(GraphError::ChannelNotFound { .. })
        ));

        let doc = ctx.save();
        let copy = Context::new();
        let registry = NodeRegistry::with_transport(Arc::new(doubler()));
        let report = pollster::block_on(copy.load(&registry, &doc));
        assert!(report.rejected_edges.is_empty());
        assert_eq!(copy.edge_count(), 1);
    }

    #[test]
    fn test_configure_params_keeps_channels() {
        let ctx = Context::new();
        let (_, id) = remote(&ctx, doubler());
        ctx.configure::<RemoteNode, _>(id, |node| {
            node.params.insert("scale".to_string(), "3".to_string());
        })
        .unwrap();
        assert_eq!(ctx.memo_status(id), Some(MemoStatus::Empty));
        let y = pollster::block_on(ctx.get(id, "y")).unwrap();
        assert_eq!(y.to_vec(), vec![2.0, 5.0]);
    }

    #[test]
    fn test_remote_fault_keeps_attribution() {
        let ctx = Context::new();
        let failing = LoopbackTransport::new(|_| Err(RemoteFault::new("kernel exploded").at(vec![0, 3])))
            .with_description("double", IoDescription::new().input("x", Arity::One).output("y"));
        let (_, id) = remote(&ctx, failing);

        let consumer = ctx.add_node(Box::new(BinOpNode::default()));
        ctx.link(id, "y", consumer, "a").unwrap();
        ctx.link(id, "y", consumer, "b").unwrap();

        let err = pollster::block_on(ctx.get(consumer, "c")).unwrap_err();
        assert_eq!(err.origin(), id);
        assert_eq!(err.relayed_by(), &[consumer]);
        match err.kind() {
            EvalErrorKind::Remote {
                endpoint,
                remote_path,
                ..
            } => {
                assert_eq!(endpoint, "double");
                assert_eq!(remote_path, &vec![0, 3]);
            }
            other => panic!("unexpected failure: {other}"),
        }
    }

    #[test]
    fn test_unknown_endpoint() {
        let transport: Arc<dyn RemoteTransport> = Arc::new(LoopbackTransport::echo());
        let result = pollster::block_on(RemoteNode::discover(transport, "nowhere", IndexMap::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_skips_transport() {
        let node = RemoteNode::new("double", IoDescription::new().output("y"))
            .with_param("scale", "2")
            .with_transport(Arc::new(LoopbackTransport::echo()));
        let config = node.config();
        assert_eq!(config["kind"], "remote");
        assert_eq!(config["params"]["scale"], "2");
        assert!(config.get("transport").is_none());
    }
}
