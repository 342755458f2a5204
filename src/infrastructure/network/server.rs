/// TCP Agent Server
///
/// Accepts remote agents over TCP. Each connection speaks length-prefixed
/// JSON frames (`PmMessage`):
///
/// 1. the client sends `REGISTER {agentId, desiredParentId}`
/// 2. the connection becomes a `RemoteAgentProxy` in the `SessionManager`
/// 3. the server sends `CLUSTERINFO` whenever a session is established and
///    `PRICE_UPDATE` whenever a price arrives (latest wins)
/// 4. the client sends `BID` frames; a rejected bid is logged and the
///    connection stays open
///
/// Closing the socket unregisters the proxy, which tears its session down.

use super::codec::{frame_codec, Codec, MessageCodec};
use super::messages::{PmMessage, PriceUpdateModel};
use super::remote_agent::{Control, ProxyOutbox, RemoteAgentProxy};
use crate::application::endpoints::AgentEndpoint;
use crate::application::services::SessionManager;
use crate::shared::error::{PowerMatcherError, Result};
use crate::shared::metrics::METRICS;
use futures::stream::StreamExt;
use futures::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

pub struct AgentServer {
    listener: TcpListener,
    manager: Arc<SessionManager>,
}

impl AgentServer {
    pub async fn bind(addr: SocketAddr, manager: Arc<SessionManager>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, manager })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 接受连接直到任务被取消
    pub async fn run(self) -> Result<()> {
        info!("服务器正在监听: {}", self.local_addr()?);
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("接受连接失败: {}", e);
                    continue;
                }
            };
            debug!("接受新连接: {}", peer);
            let manager = self.manager.clone();
            tokio::spawn(async move {
                match handle_connection(stream, manager).await {
                    Ok(()) => debug!("连接 {} 已关闭", peer),
                    Err(e) => warn!("连接 {} 异常关闭: {}", peer, e),
                }
            });
        }
    }
}

// 处理单个远程代理连接
async fn handle_connection(stream: TcpStream, manager: Arc<SessionManager>) -> Result<()> {
    let mut framed = Framed::new(stream, frame_codec());
    let mut codec = MessageCodec::new();

    let register = match framed.next().await {
        Some(Ok(frame)) => match codec.decode(&frame)? {
            Some(PmMessage::Register(register)) => register,
            other => {
                return Err(PowerMatcherError::Wire(format!(
                    "first frame must be REGISTER, got {}",
                    other.as_ref().map_or("nothing", |m| m.payload_type())
                )))
            }
        },
        Some(Err(e)) => return Err(e.into()),
        None => return Ok(()),
    };
    info!(agent_id = %register.agent_id, parent = %register.desired_parent_id, "远程代理注册");

    let (proxy, outbox) = RemoteAgentProxy::new(register);
    let as_agent: Arc<dyn AgentEndpoint> = proxy.clone();
    manager.add_agent_endpoint(as_agent.clone());

    let result = drive(&mut framed, &mut codec, &proxy, outbox).await;
    manager.remove_agent_endpoint(&as_agent);
    result
}

async fn drive(
    framed: &mut FramedStream,
    codec: &mut MessageCodec,
    proxy: &RemoteAgentProxy,
    mut outbox: ProxyOutbox,
) -> Result<()> {
    let agent_id = proxy.agent_id().to_string();
    loop {
        tokio::select! {
            // 集群信息先于同一会话的价格发送
            biased;
            Some(control) = outbox.control.recv() => {
                let Control::ClusterInfo(info) = control;
                let bytes = codec.encode(&PmMessage::ClusterInfo(info))?;
                framed.send(bytes).await?;
            }
            // 从客户端接收数据
            frame = framed.next() => match frame {
                Some(Ok(frame)) => handle_frame(codec, proxy, &frame),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()), // 连接已关闭
            },
            changed = outbox.prices.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let latest = outbox.prices.borrow_and_update().clone();
                if let Some(update) = latest {
                    let bytes = codec.encode(&PmMessage::PriceUpdate(PriceUpdateModel::from(&update)))?;
                    framed.send(bytes).await?;
                    debug!(agent_id = %agent_id, "价格已发送: {}", update.price());
                }
            }
        }
    }
}

fn handle_frame(codec: &mut MessageCodec, proxy: &RemoteAgentProxy, frame: &[u8]) {
    let agent_id = proxy.agent_id();
    match codec.decode(frame) {
        Ok(Some(PmMessage::Bid(model))) => {
            if let Err(e) = proxy.submit_bid(&model) {
                let reason = if e.is_state_error() { "state" } else { "argument" };
                METRICS.bids_rejected.with_label_values(&[agent_id, reason]).inc();
                warn!(agent_id = %agent_id, "出价被拒绝: {}", e);
            }
        }
        Ok(Some(other)) => {
            warn!(agent_id = %agent_id, "忽略消息: {}", other.payload_type());
        }
        Ok(None) => {}
        Err(e) => {
            METRICS.bids_rejected.with_label_values(&[agent_id, "argument"]).inc();
            warn!(agent_id = %agent_id, "无法解析的消息: {}", e);
        }
    }
}
