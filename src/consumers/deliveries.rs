use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use lapin::{message::Delivery, options::BasicAckOptions};
use tracing::info;

use crate::{
    dispatch::DispatchMessage,
    events::{DELIVERY_ASSIGNED, DELIVERY_REQUESTED},
    infra::app_state::AppState,
};

pub fn delivery_requested(
    delivery: Delivery,
    state: Arc<AppState>,
) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move { relay(DELIVERY_REQUESTED, delivery, state).await })
}

pub fn delivery_assigned(
    delivery: Delivery,
    state: Arc<AppState>,
) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move { relay(DELIVERY_ASSIGNED, delivery, state).await })
}

async fn relay(event_type: &str, delivery: Delivery, state: Arc<AppState>) -> Result<()> {
    let message = DispatchMessage::decode(event_type, &delivery.data);
    // Malformed payloads are acked too and never redelivered.
    delivery.ack(BasicAckOptions::default()).await?;

    if let Some(message) = message? {
        info!("Received event: {:?}", message);
        let receivers = state.dispatch.broadcast(message);
        info!("Dispatched {} to {} connected partners", event_type, receivers);
    }

    Ok(())
}
