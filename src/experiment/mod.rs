//! Run documents and the callbacks that consume them.
//!
//! # Architecture (Bluesky-inspired)
//!
//! - **Documents**: structured data streams (Start, Descriptor, Event, Stop)
//! - **Callbacks**: the four-method protocol every consumer implements
//! - **Dispatcher**: re-emits a derived stream so consumers can be chained

pub mod callback;
pub mod dispatcher;
pub mod document;

pub use callback::{CallbackCounter, DocumentCallback, DocumentCollector};
pub use dispatcher::LiveDispatcher;
pub use document::{
    DataKey, DataValue, DescriptorDoc, Document, Dtype, EventDoc, StartDoc, StopDoc,
};
