//! Forwards WAN traffic to the cloud functions backing the ecosystem.
//!
//! The simulation never waits on the network. A forwarder process turns each
//! WAN packet into a [`CloudRequest`] and hands it to a [`CloudSink`]. With
//! an endpoint configured, the sink is a channel drained by
//! [`run_worker`] on the tokio runtime. Without one, requests are only
//! logged.

use ges_core::{
    packet::{Packet, PacketBody, Payload},
    sim::{ProcessId, SimError},
    OperationType, SimHandle, Tunnel,
};
use serde::Deserialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

/// Where the hosted cloud functions live.
pub const DEFAULT_ENDPOINT: &str =
    "https://us-central1-guardian-ecoystem-simulator.cloudfunctions.net";

/// A call to one cloud function.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudRequest {
    pub function: &'static str,
    pub payload: Payload,
}

impl CloudRequest {
    /// Maps an operation or event packet to the cloud function that handles
    /// it. Other packets have no cloud counterpart.
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        let (function, payload) = match &packet.body {
            PacketBody::Operation { kind, data } => (kind.cloud_function()?, data.clone()),
            PacketBody::Event { data, .. } => (OperationType::EventsCreate.cloud_function()?, data.clone()),
            PacketBody::Data { .. } | PacketBody::Radio(_) => return None,
        };
        Some(Self { function, payload })
    }
}

/// The body cloud functions answer with.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudResponse {
    pub status: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Receives requests from the forwarder.
#[derive(Debug, Clone)]
pub enum CloudSink {
    /// Log each request at debug level and drop it.
    Log,
    Channel(UnboundedSender<CloudRequest>),
}

impl CloudSink {
    fn accept(&self, request: CloudRequest) {
        match self {
            Self::Log => debug!(function = request.function, "cloud request"),
            Self::Channel(tx) => {
                if let Err(e) = tx.send(request) {
                    warn!(function = e.0.function, "cloud worker is gone, request dropped");
                }
            }
        }
    }
}

/// Subscribes to `wan` and starts a process that passes every packet with a
/// cloud counterpart on to `sink`.
pub fn spawn_forwarder(sim: &SimHandle, wan: &Tunnel<Packet>, sink: CloudSink) -> Result<ProcessId, SimError> {
    let rx = wan.subscribe();
    sim.spawn("cloud-forwarder", move |process| async move {
        loop {
            let Some(packet) = process.receive(&rx).await.ready() else {
                continue;
            };
            match CloudRequest::from_packet(&packet) {
                Some(request) => sink.accept(request),
                None => debug!(sender = %packet.sender, "no cloud function for packet"),
            }
        }
    })
}

/// Posts requests to `endpoint` until every sender is dropped. Failures are
/// logged and the request is dropped.
pub async fn run_worker(endpoint: String, mut requests: UnboundedReceiver<CloudRequest>) {
    let client = reqwest::Client::new();
    let endpoint = endpoint.trim_end_matches('/').to_string();
    info!(%endpoint, "cloud worker started");
    while let Some(request) = requests.recv().await {
        let url = format!("{endpoint}/{}", request.function);
        let sent = client.post(&url).json(&request.payload).send().await;
        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                error!(%url, error = %e, "cloud request failed");
                continue;
            }
        };
        let status = response.status();
        match response.json::<CloudResponse>().await {
            Ok(body) if status.is_success() => {
                debug!(%url, status = %body.status, data = ?body.data, "cloud request done");
            }
            Ok(body) => error!(%url, %status, body = ?body, "cloud function refused request"),
            Err(e) => error!(%url, %status, error = %e, "unreadable cloud response"),
        }
    }
    info!("cloud worker stopped");
}
