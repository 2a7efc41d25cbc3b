#![allow(dead_code)]

use std::future::Future;

use futures_util::SinkExt;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

pub struct ChannelTestServer {
    pub url: String,
    task: JoinHandle<anyhow::Result<()>>,
}

impl ChannelTestServer {
    pub async fn finish(self) -> anyhow::Result<()> {
        self.task.await??;
        Ok(())
    }
}

/// Accepts exactly one websocket client and hands it to `handler`.
pub async fn start_channel_server<H, F>(handler: H) -> anyhow::Result<ChannelTestServer>
where
    H: FnOnce(WebSocketStream<TcpStream>) -> F + Send + 'static,
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let websocket = accept_async(stream).await?;
        handler(websocket).await
    });

    Ok(ChannelTestServer {
        url: format!("ws://{addr}"),
        task,
    })
}

/// Binds a port and immediately releases it, yielding a ws URL nothing
/// listens on.
pub async fn dead_channel_url() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("ws://{addr}"))
}

/// Encodes one gateway event frame the way the channel expects it.
pub fn event_frame(event: &str, data: Value) -> Message {
    json!({ "event": event, "data": data }).to_string().into()
}

/// Sends `frames` to the client, then drains it until it closes.
pub async fn serve_frames(
    mut websocket: WebSocketStream<TcpStream>,
    frames: Vec<Message>,
) -> anyhow::Result<()> {
    use futures_util::StreamExt;

    for frame in frames {
        websocket.send(frame).await?;
    }
    while let Some(message) = websocket.next().await {
        if message?.is_close() {
            break;
        }
    }
    Ok(())
}
