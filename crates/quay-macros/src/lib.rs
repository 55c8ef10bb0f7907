//! Procedural macros for the Quay message pipeline.
//!
//! - `#[derive(MessageType)]` - Implements `MessageType`, giving a payload
//!   the stable type tag the sending gateway stamps and the dispatcher routes
//!   by.
//!
//! ```rust,ignore
//! use quay::prelude::*;
//!
//! #[derive(Serialize, Deserialize, MessageType)]
//! #[message_type(crate = "quay::core")]
//! pub struct OrderPlaced {
//!     pub order_id: u64,
//! }
//!
//! // OrderPlaced::TYPE_NAME == "my_app::orders::OrderPlaced"
//! ```

mod message_type;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derives `MessageType` for a struct or enum.
///
/// The type tag defaults to the fully-qualified path of the type
/// (`module_path!()` followed by the type name).
///
/// # Attributes
///
/// - `#[message_type(name = "...")]` - Use a fixed tag instead. Pin the tag
///   when the type may move between modules while messages are in flight.
/// - `#[message_type(crate = "...")]` - Path to the crate exporting
///   `MessageType` (default: `quay_core`). Use `quay::core` when depending on
///   the facade crate only.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize, MessageType)]
/// #[message_type(name = "orders.v1.OrderShipped")]
/// pub struct OrderShipped {
///     pub order_id: u64,
///     pub carrier: String,
/// }
/// ```
#[proc_macro_derive(MessageType, attributes(message_type))]
pub fn derive_message_type(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match message_type::derive_message_type(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
