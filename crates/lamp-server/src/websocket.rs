//! WebSocket handler for real-time updates

use axum::extract::ws::{Message, WebSocket};
use device_store::{Device, DeviceEvent};
use event_engine::EngineEvent;
use futures::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;

/// WebSocket events sent to clients
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    Connected,
    DeviceChanged { device: Device },
    EventDispatched { event: String, handlers: usize },
    HandlerFailed { event: String, handler: String, error: String },
}

impl From<DeviceEvent> for WsEvent {
    fn from(event: DeviceEvent) -> Self {
        match event {
            DeviceEvent::StateChanged(device) => Self::DeviceChanged { device },
        }
    }
}

impl From<EngineEvent> for WsEvent {
    fn from(event: EngineEvent) -> Self {
        match event {
            EngineEvent::Dispatched { event, handlers } => Self::EventDispatched { event, handlers },
            EngineEvent::HandlerFailed(failure) => Self::HandlerFailed {
                event: failure.event,
                handler: failure.handler,
                error: failure.error,
            },
        }
    }
}

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    if send(&mut sender, &WsEvent::Connected).await.is_err() {
        return;
    }

    let mut device_rx = state.store.subscribe();
    let mut engine_rx = state.engine.dispatcher().subscribe();

    // Forward device and engine events until the client goes away
    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = device_rx.recv() => match received {
                    Ok(event) => WsEvent::from(event),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket client lagged by {} device events", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                received = engine_rx.recv() => match received {
                    Ok(event) => WsEvent::from(event),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket client lagged by {} engine events", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            if send(&mut sender, &event).await.is_err() {
                break;
            }
        }
    });

    // Incoming messages are ignored
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
}

async fn send<S>(sender: &mut S, event: &WsEvent) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let json = serde_json::to_string(event).map_err(|e| {
        tracing::warn!("Failed to encode WebSocket event: {}", e);
    })?;
    sender.send(Message::Text(json)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_engine::HandlerFailure;

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(WsEvent::from(EngineEvent::HandlerFailed(HandlerFailure {
            event: "'turnOnLampUpstairs'".into(),
            handler: "turnOnLampUpstairs".into(),
            error: "Device not found: 2".into(),
        })))
        .unwrap();
        assert_eq!(json["type"], "handler_failed");
        assert_eq!(json["handler"], "turnOnLampUpstairs");

        let json = serde_json::to_value(WsEvent::from(DeviceEvent::StateChanged(Device::new(
            "1",
            "Downstairs",
        ))))
        .unwrap();
        assert_eq!(json["type"], "device_changed");
        assert_eq!(json["device"]["id"], "1");
    }
}
