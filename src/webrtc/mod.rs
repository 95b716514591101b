//! Peer-connection delivery: browser offers in, answers and an outbound
//! video track out.

pub mod negotiation;
pub mod peer;

pub use negotiation::{NegotiationConfig, NegotiationSession, NegotiationState, SampleSink};
pub use peer::{ConnectionState, SdpType, SessionDescription};
