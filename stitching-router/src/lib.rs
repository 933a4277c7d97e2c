//! Plans and executes GraphQL requests across a stitched supergraph.
//!
//! A request is prepared against the supergraph schema, split into per-location
//! sub-queries by the [`query_planner`], fetched tier by tier by the executor,
//! then shaped back into exactly what the client asked for.

#![cfg_attr(feature = "failfast", allow(unreachable_code))]
#![warn(unreachable_pub)]

macro_rules! failfast_debug {
    ($($tokens:tt)+) => {{
        tracing::debug!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

macro_rules! failfast_error {
    ($($tokens:tt)+) => {{
        tracing::error!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

pub mod json_ext;

mod client;
mod configuration;
mod context;
pub mod error;
mod executor;
pub mod graphql;
pub mod query_planner;
mod request;
pub mod resolver;
mod response;
pub mod services;
mod shaper;
pub mod spec;
pub mod supergraph;

pub use client::Client;
pub use client::QUERY_COUNT_CONTEXT_KEY;
pub use configuration::Configuration;
pub use configuration::ConfigurationError;
pub use configuration::generate_config_schema;
pub use configuration::Execution;
pub use configuration::Planning;
pub use context::Context;
pub use supergraph::Supergraph;
