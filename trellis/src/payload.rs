//! Sample payloads
//!
//! Producers send one JSON object per event. The object describes an order;
//! `amount` is the sample value and `seq` the producer's sequence number. The
//! remaining fields are carried for completeness and ignored by the
//! accumulator.

use serde::{Deserialize, Serialize};

/// Errors produced by [`decode`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The payload is not a well-formed order object.
    #[error("Failed to decode payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
/// A single order event as sent over the wire.
pub struct Order {
    /// Customer first name
    #[serde(default)]
    pub first_name: String,
    /// Customer last name
    #[serde(default)]
    pub last_name: String,
    /// Order identifier
    #[serde(default)]
    pub order_no: String,
    /// Order amount, the sample value
    pub amount: f64,
    /// Producer timestamp, opaque to trellis
    #[serde(default)]
    pub ts: String,
    /// Producer sequence number
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// A numeric observation and the sequence identifier it arrived with.
///
/// The sequence identifier is only reported, never used to order samples.
pub struct Sample {
    /// Sequence identifier supplied by the producer
    pub seq: u64,
    /// The observed value
    pub value: f64,
}

impl From<Order> for Sample {
    fn from(order: Order) -> Self {
        Self {
            seq: order.seq,
            value: order.amount,
        }
    }
}

/// Decode a single payload into a [`Sample`].
///
/// Surrounding whitespace is tolerated.
///
/// # Errors
///
/// Function will return an error if `payload` is not an order object with a
/// numeric `amount` and an unsigned `seq`.
pub fn decode(payload: &[u8]) -> Result<Sample, Error> {
    let order: Order = serde_json::from_slice(payload)?;
    Ok(order.into())
}
