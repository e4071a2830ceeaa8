// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Apple software update catalogs.
//!
//! Apple publishes the products available through Software Update in
//! *catalogs*: property lists served from `swscan.apple.com`. Each macOS seed
//! program (developer, public and customer betas) has its own catalog. See
//! [seed_program].
//!
//! A catalog maps product keys to products. A product has a set of packages
//! (the files that get installed) and a *distribution* file per language. The
//! distribution is an `installer-gui-script` XML document describing the
//! product, including its macOS build and version. See [catalog] and
//! [distribution].
//!
//! This crate also provides the primitives for fetching catalogs and
//! downloading packages ([http]) and for comparing macOS versions against a
//! volume's installed system ([os_version]).

pub mod catalog;
pub use catalog::{Catalog, Package, Product, ProductKind};
pub mod distribution;
pub use distribution::DistributionInfo;
pub mod http;
pub mod install_script;
pub mod os_version;
pub use os_version::{BuildComparison, OsVersion, SystemVersion};
pub mod seed_program;
pub use seed_program::SeedProgram;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("plist error: {0}")]
    Plist(#[from] plist::Error),

    #[error("XML error: {0}")]
    Xml(#[from] xml::reader::Error),

    #[error("HTTP request to {0} failed with status {1}")]
    HttpStatus(String, u16),

    #[error("invalid version string: {0}")]
    BadVersion(String),

    #[error("unknown product kind: {0} (expected install or update)")]
    UnknownProductKind(String),

    #[error("product {0} has no {1} distribution")]
    MissingDistribution(String, String),

    #[error("unexpected distribution URL: {0}")]
    MalformedDistributionUrl(String),

    #[error("no matching product found: {0}")]
    ProductNotFound(String),
}

/// Result type for this crate.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
