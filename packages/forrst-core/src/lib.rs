//! Forrst core: envelope model, error taxonomy, URNs and protocol codecs.
//!
//! Everything here is transport-agnostic and free of async: the server crate
//! builds the request pipeline on top of these types.

pub mod codec;
pub mod duration;
pub mod envelope;
pub mod error;
pub mod urn;

pub use codec::{JsonCodec, MsgPackCodec, ProtocolCodec, DEFAULT_MAX_DEPTH};
pub use duration::{ProtocolDuration, TimeUnit};
pub use envelope::{
    Call, ErrorEntry, ErrorSource, ExtensionData, ExtensionMetadata, ProtocolHeader,
    RequestEnvelope, ResponseEnvelope, ANONYMOUS_CALLER, CALLER_ID_CONTEXT_KEY, PROTOCOL_NAME,
    PROTOCOL_VERSION,
};
pub use error::{ErrorCode, ForrstError, REDACTED_INTERNAL_MESSAGE};
pub use urn::{FunctionUrn, SystemFunction, SYSTEM_FUNCTION_VERSION};
