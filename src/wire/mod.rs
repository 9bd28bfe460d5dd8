//! The Wire
//!
//! Responsible for:
//! - The fixed 22-byte quote frame
//! - Subscription requests
//! - Sending and receiving raw datagrams (UDP, optionally lossy)

pub mod codec;
pub mod subscription;
pub mod transport;

pub use codec::{decode, encode, now_millis, CurrencyCode, DecodeError, Millis, Quote, QUOTE_FRAME_SIZE};
pub use subscription::{decode_subscription, encode_subscription, SubscriptionError, SUBSCRIPTION_FRAME_SIZE};
pub use transport::{DatagramTransport, LossyTransport, TransportError, UdpTransport};
