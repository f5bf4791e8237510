//! Delivery of queued chat messages to the backend.
//!
//! The queue only depends on [`MessageDeliverer`]; [`SupabaseMessageClient`]
//! is the production implementation writing to the Supabase REST API.

mod client;
mod error;
mod message;

pub use client::{DeliveryContext, SupabaseMessageClient};
pub use error::{DeliveryError, DeliveryResult};
pub use message::{MessageDeliverer, OutgoingMessage};
