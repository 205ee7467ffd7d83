pub mod case_name;
pub mod config;
pub mod export;
pub mod github;
pub mod issue;
pub mod logging;
pub mod migrate;
pub mod namelist;
pub mod period;
pub mod pipeline;
pub mod remote;
pub mod resolver;
pub mod runtime;
pub mod stats;
pub mod store;
