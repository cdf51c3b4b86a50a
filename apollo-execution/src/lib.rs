//! Executes validated GraphQL operations against a schema with attached resolvers.
//!
//! The entry point is [`ExecutionEngine`]: it walks the selected operation, calls
//! resolvers through an [`ExecutorBackend`], completes the returned values against
//! the schema types and collects located errors, propagating `null` upwards from
//! non-null positions until a nullable one absorbs it.
//!
//! Resolvers may answer immediately or later. Either way they hand back a
//! [`Deferred`], which lets synchronous resolvers on the [`InlineBackend`]
//! complete a whole operation without scheduling anything.

#![warn(unreachable_pub)]

pub mod backend;
pub mod batch;
mod configuration;
pub mod deferred;
pub mod error;
pub mod execution;
pub mod graphql;
pub mod json_ext;
pub mod schema;

pub use backend::CooperativeBackend;
pub use backend::ExecutorBackend;
pub use backend::InlineBackend;
pub use backend::ProcessBackend;
pub use backend::ResolverCall;
pub use backend::ThreadBackend;
pub use batch::BatchFn;
pub use batch::BatchLoader;
pub use batch::BatchScheduler;
pub use configuration::BackendConfiguration;
pub use configuration::Configuration;
pub use deferred::Deferred;
pub use error::ConfigurationError;
pub use error::FieldError;
pub use error::FieldFailure;
pub use execution::ExecutionEngine;
pub use execution::Request;
pub use schema::Context;
pub use schema::ExecutableSchema;
pub use schema::FieldResolver;
pub use schema::ResolveInfo;
