//! Reconciliation engine
//!
//! Maps a typed attribute tree to the flat wire maps the remote API speaks
//! and back, and sequences the remote calls behind each logical operation.
//!
//! # Module Structure
//!
//! - [`schema`] - typed attribute descriptors
//! - [`tree`] - the attribute tree ([`ResourceData`])
//! - [`wire`] - flat-map key encoding
//! - [`transform`] / [`request`] - tree to wire map
//! - [`response`] - remote object to tree
//! - [`collection`] - listings, match plug-ins, pagination
//! - [`orchestrator`] - call chains, dry runs, retries, convergence waits
//! - [`scope`] / [`tags`] - project scope and tag handling
//! - [`diff`] - keyed set differences

pub mod collection;
pub mod diff;
pub mod executor;
pub mod orchestrator;
pub mod request;
pub mod response;
pub mod schema;
pub mod scope;
pub mod tags;
pub mod transform;
pub mod tree;
pub mod wire;

pub use collection::{page_action, page_query, reconcile_listing, ListingSpec, MatchOutcome, MatchPlugin, PageQuery};
pub use executor::ActionExecutor;
pub use orchestrator::{
    CallContext, CallDescriptor, HookContext, Operation, Orchestrator, Recovery, StateWaiter, Timeouts,
};
pub use request::RequestBuilder;
pub use response::{FieldMapping, MappingRegistry, ReadMode, ResponseMapper};
pub use schema::{AttrKind, AttrMode, Attribute, ScalarType, Schema};
pub use scope::ProjectScope;
pub use transform::{FieldRule, ListMode, TransformRegistry};
pub use tree::{AttrValue, Block, ResourceData};
pub use wire::WireParams;
