//! Hemera Core: pattern model, inverted-index router, wire envelope and call context.
//!
//! This crate holds no I/O. The `hemera` crate builds the request/reply
//! dispatch runtime on top of it.

pub mod context;
pub mod envelope;
pub mod error;
pub mod pattern;
pub mod router;

pub use context::Context;
pub use envelope::{Envelope, RequestInfo, RequestType, Trace};
pub use error::{Error, HemeraError, Operation, TransportError};
pub use pattern::{
    clean_pattern, method_name, topic_of, Carrier, Pattern, PatternField, PatternFields,
    PatternSet, PatternValue, Patterned, RESERVED_SUFFIX, TOPIC_FIELD,
};
pub use router::{IndexingStrategy, ParseStrategyError, Router};
