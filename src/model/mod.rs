//! Request, result and feature types flowing through the pipeline.

pub mod cursor;
pub mod feature;
pub mod request;
pub mod result;

pub use cursor::{FeatureCursor, HeapCacheCursor};
pub use feature::{BBox, Feature};
pub use request::{AdminAction, PropertyFilter, Request, RequestOp, WriteMode};
pub use result::{ErrorKind, ErrorResult, HubResult, SuccessResult, WireResult};
