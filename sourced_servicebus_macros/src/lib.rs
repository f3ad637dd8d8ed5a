mod payload;

use proc_macro::TokenStream;

// ============================================================================
// #[derive(Payload)]
// ============================================================================

/// Derive macro that implements `sourced_servicebus::Payload`.
///
/// The payload type id defaults to the simple struct name, which is what
/// ends up in the `PayloadTypeId` application property of every outgoing
/// message. Override it when the wire name has to differ from the Rust name:
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Payload)]
/// struct Order { id: String }                  // TYPE_ID = "Order"
///
/// #[derive(Serialize, Deserialize, Payload)]
/// #[payload(type_id = "OrderCreated")]
/// struct OrderCreatedV2 { id: String }         // TYPE_ID = "OrderCreated"
/// ```
#[proc_macro_derive(Payload, attributes(payload))]
pub fn derive_payload(input: TokenStream) -> TokenStream {
    payload::derive_payload(input)
}
