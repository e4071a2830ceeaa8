// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    apple_firmware_payload::Error as PayloadError, apple_seed_catalog::CatalogError,
    std::path::PathBuf, thiserror::Error,
};

/// Exit code when the unpack destination already exists.
pub const EXIT_UNPACK_TARGET_EXISTS: i32 = 17;

#[derive(Debug, Error)]
pub enum SeedToolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Catalog(#[from] CatalogError),

    #[error("{0}")]
    Payload(#[from] PayloadError),

    #[error("unknown command")]
    UnknownCommand,

    #[error("--unpack requires a specific package (via --package)")]
    UnpackRequiresPackage,

    #[error("unpack target {} already exists; remove it or use a different path", .0.display())]
    UnpackTargetExists(PathBuf),

    #[error("no volumes found under {0}")]
    NoVolumes(String),

    #[error("target macOS version ({0}) not found; you may need to use --macos-version")]
    VersionNotFound(String),
}

impl SeedToolError {
    /// Process exit code to use for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnpackTargetExists(_) => EXIT_UNPACK_TARGET_EXISTS,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, SeedToolError>;
