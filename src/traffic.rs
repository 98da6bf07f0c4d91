//! Traffic model
//!
//! Types and pure functions describing captured HTTP transactions:
//! - `record`: the `TrafficRecord` persisted by the store and its views.
//! - `resource_type`: content-type/URL based resource classification.
//! - `encoding`: text vs. base64 rendering of bodies.
//! - `converter`: raw exchange to `TrafficRecord` conversion.
//! - `recorder`: capture-side sink writing converted records into a store.

pub mod converter;
pub mod encoding;
pub mod record;
pub mod recorder;
pub mod resource_type;

pub use converter::{CapturedExchange, CapturedRequest, CapturedResponse};
pub use encoding::{encode_body, is_binary_content};
pub use record::{TrafficDetail, TrafficRecord, TrafficSummary};
pub use recorder::TrafficRecorder;
pub use resource_type::{infer_resource_type, ResourceType};
