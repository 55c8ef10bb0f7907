//! Order Relay Example
//!
//! Two listeners on an in-memory broker:
//!
//! ```text
//! "orders" (multi-type)
//! ├── OrderPlaced    -> ShipmentRequested on "shipments"
//! │                     (quantity 0 is dead-lettered)
//! └── OrderCancelled -> logged and completed
//!
//! "shipments" (single-type)
//! └── ShipmentRequested -> fails on first delivery of fragile items,
//!                          succeeds on redelivery
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package order-relay
//! ```
//!
//! Stops after a few seconds or on Ctrl+C.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use quay::core::{HandlerResult, PropertyValue};
use quay::prelude::*;
use quay::runtime::{LoggingBuilder, SpanEvents};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const ORDERS: &str = "orders";
const SHIPMENTS: &str = "shipments";

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Serialize, Deserialize, MessageType)]
#[message_type(crate = "quay::core", name = "orders.v1.OrderPlaced")]
struct OrderPlaced {
    order_id: u64,
    sku: String,
    quantity: u32,
    fragile: bool,
}

#[derive(Debug, Serialize, Deserialize, MessageType)]
#[message_type(crate = "quay::core", name = "orders.v1.OrderCancelled")]
struct OrderCancelled {
    order_id: u64,
    reason: String,
}

#[derive(Debug, Serialize, Deserialize, MessageType)]
#[message_type(crate = "quay::core", name = "shipments.v1.ShipmentRequested")]
struct ShipmentRequested {
    order_id: u64,
    sku: String,
    quantity: u32,
    fragile: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Forwards placed orders to the shipment queue.
struct OrderPlacedHandler {
    shipments: SendingGateway,
}

#[async_trait]
impl MessageHandler<OrderPlaced> for OrderPlacedHandler {
    async fn handle(
        &self,
        order: OrderPlaced,
        _context: MessageContext,
        _cancellation: CancellationToken,
    ) -> HandlerResult<HandlingResult> {
        if order.quantity == 0 {
            return Ok(HandlingResult::dead_lettered(
                format!("Order {} has no items", order.order_id),
                None,
            ));
        }

        let mut properties = UserProperties::new();
        properties.insert("OrderId".into(), PropertyValue::from(order.order_id as i64));

        self.shipments
            .send(
                ShipmentRequested {
                    order_id: order.order_id,
                    sku: order.sku,
                    quantity: order.quantity,
                    fragile: order.fragile,
                },
                Some(properties),
            )
            .await
            .map_err(HandlerError::failed)?;

        Ok(HandlingResult::completed(None))
    }
}

async fn request_shipment(
    shipment: ShipmentRequested,
    context: MessageContext,
    _cancellation: CancellationToken,
) -> HandlerResult<HandlingResult> {
    if shipment.fragile && !context.is_redelivery() {
        warn!(order_id = shipment.order_id, "Packing station busy, retrying");
        return Err(HandlerError::failed("packing station busy"));
    }

    info!(
        order_id = shipment.order_id,
        sku = %shipment.sku,
        quantity = shipment.quantity,
        attempt = context.delivery_count,
        "Shipment booked"
    );
    Ok(HandlingResult::completed(None))
}

// ============================================================================
// Wiring
// ============================================================================

fn orders_listener(broker: &InMemoryBroker) -> Result<MessageListener> {
    let shipments = SendingGateway::new(Arc::new(broker.sender(SHIPMENTS)))
        .instrumentor(TracingInstrumentor::boxed());

    let registry = ProcessorRegistry::new()
        .with(
            Processor::<OrderPlaced, _>::new(OrderPlacedHandler { shipments })
                .instrumentor(TracingInstrumentor::boxed()),
        )
        .with(Processor::<OrderCancelled, _>::new(handler_fn(
            |cancelled: OrderCancelled, _: MessageContext, _: CancellationToken| async move {
                info!(
                    order_id = cancelled.order_id,
                    reason = %cancelled.reason,
                    "Order cancelled"
                );
                Ok(HandlingResult::completed(None))
            },
        )));

    let endpoint = EndpointConfig::new(broker.endpoint(), ORDERS)?;
    let config = EndpointHandlingConfig::builder(endpoint)
        .max_concurrent_calls(4)
        .build()?;

    Ok(MessageListener::builder(config, Arc::new(broker.receiver(ORDERS)))
        .name("orders")
        .instrumentor(TracingInstrumentor::boxed())
        .multi_type(Arc::new(PropertyDispatcher::new(registry))))
}

fn shipments_listener(broker: &InMemoryBroker) -> Result<MessageListener> {
    let handler = handler_fn(request_shipment).named("request_shipment");
    let processor = Processor::<ShipmentRequested, _>::new(handler)
        .instrumentor(TracingInstrumentor::boxed());

    let endpoint = EndpointConfig::new(broker.endpoint(), SHIPMENTS)?;
    let config = EndpointHandlingConfig::builder(endpoint)
        .auto_complete(true)
        .build()?;

    Ok(MessageListener::builder(config, Arc::new(broker.receiver(SHIPMENTS)))
        .name("shipments")
        .instrumentor(TracingInstrumentor::boxed())
        .single_type(processor.boxed()))
}

#[tokio::main]
async fn main() -> Result<()> {
    LoggingBuilder::new()
        .with_level(tracing::Level::INFO)
        .directive("quay::telemetry=warn")
        .span_events(SpanEvents::NONE)
        .init();

    // Short locks so the failed fragile shipment is redelivered quickly
    let broker = InMemoryBroker::builder()
        .lock_duration(Duration::from_millis(500))
        .poll_interval(Duration::from_millis(100))
        .build();

    let host = ListenerHost::new()
        .with_listener(orders_listener(&broker)?)?
        .with_listener(shipments_listener(&broker)?)?;

    let orders = SendingGateway::new(Arc::new(broker.sender(ORDERS)));
    orders
        .send_multiple(
            [
                OrderPlaced {
                    order_id: 1,
                    sku: "QUAY-MUG".into(),
                    quantity: 2,
                    fragile: true,
                },
                OrderPlaced {
                    order_id: 2,
                    sku: "QUAY-TEE".into(),
                    quantity: 1,
                    fragile: false,
                },
                OrderPlaced {
                    order_id: 3,
                    sku: "QUAY-CAP".into(),
                    quantity: 0,
                    fragile: false,
                },
            ],
            None,
        )
        .await?;
    orders
        .send(
            OrderCancelled {
                order_id: 2,
                reason: "Customer changed their mind".into(),
            },
            None,
        )
        .await?;

    host.run_until(async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = tokio::time::sleep(Duration::from_secs(3)) => {}
        }
    })
    .await?;

    for message in broker.dead_letters(ORDERS) {
        info!(
            message_id = %message.message_id,
            properties = ?message.user_properties,
            "Dead-lettered order"
        );
    }
    Ok(())
}
