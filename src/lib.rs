pub mod config;
pub mod errors;
pub mod functions;
pub mod github;
pub mod ledger;
pub mod migrate;
pub mod provision;
pub mod proxy;
pub mod remote;
pub mod report;
pub mod request;
