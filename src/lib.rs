//! NVD Mirror - local mirror of public vulnerability intelligence
//!
//! This crate maintains a queryable local copy of CVE, CPE, CWE and EPSS
//! data by pulling from the rate-limited NVD 2.0 REST API and the bulk
//! CWE/EPSS feeds, correlating vulnerable-configuration ranges against
//! the product inventory along the way.

pub mod api;
pub mod config;
pub mod correlate;
pub mod error;
pub mod feeds;
pub mod model;
pub mod store;
pub mod update;
pub mod version;
