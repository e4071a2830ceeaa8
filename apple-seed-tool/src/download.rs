// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Locating and downloading seed packages.

use {
    crate::error::{Result, SeedToolError},
    apple_seed_catalog::{
        catalog::{url_file_name, Catalog, Package, Product, ProductKind},
        distribution::{DistributionInfo, UNKNOWN},
        http::{download_to_path, DownloadEvent},
        os_version::{compare_builds, BuildComparison, OsVersion, SystemVersion},
        seed_program::{enrolled_seed_program, SeedProgram},
    },
    duct::cmd,
    log::{debug, info, warn},
    reqwest::blocking::Client,
    std::path::{Path, PathBuf},
};

/// Directory under the target volume receiving downloads.
pub const TMP_DIRECTORY: &str = "tmp";

/// What to download and where.
#[derive(Clone, Debug)]
pub struct DownloadRequest {
    pub kind: ProductKind,
    /// Package file name, or `*` for all packages of the product.
    pub package: String,
    pub volume: PathBuf,
    /// Expand the downloaded package into this directory.
    pub unpack: Option<PathBuf>,
    pub macos_version: String,
    /// Seed program to use. Defaults to the volume's enrollment.
    pub seed_program: Option<SeedProgram>,
    pub language: String,
    pub confirm: bool,
}

/// A product whose distribution satisfies a request.
#[derive(Clone, Debug)]
pub struct Candidate<'a> {
    pub key: &'a str,
    pub product: &'a Product,
    pub distribution: PathBuf,
    pub build: String,
    pub version: String,
    pub beta: bool,
}

/// Result of a completed download.
#[derive(Clone, Debug)]
pub struct DownloadOutcome {
    pub key: String,
    pub distribution: PathBuf,
    pub downloaded: Vec<PathBuf>,
    pub unpacked: Option<PathBuf>,
}

/// Resolve the version a candidate delivers.
///
/// Updates are searched for by version, so an update distribution lacking a
/// version delivers the requested one.
pub fn resolve_version(kind: ProductKind, requested: &str, version: Option<&str>) -> Option<String> {
    match (version, kind) {
        (Some(version), _) => Some(version.to_string()),
        (None, ProductKind::Update) => Some(requested.to_string()),
        (None, ProductKind::Install) => None,
    }
}

/// Whether a candidate version satisfies the requested minimum.
///
/// Versions that can't be evaluated are let through.
pub fn version_qualifies(version: Option<&str>, requested: &OsVersion) -> bool {
    match version.map(OsVersion::parse) {
        Some(Ok(version)) => &version >= requested,
        Some(Err(e)) => {
            warn!("{}; keeping candidate", e);
            true
        }
        None => {
            warn!("distribution does not state a version; keeping candidate");
            true
        }
    }
}

/// Warning and prompt to show given how the candidate relates to the installed build.
pub fn confirmation_for(comparison: Option<BuildComparison>) -> (Option<&'static str>, &'static str) {
    match comparison {
        Some(BuildComparison::Same) => (
            Some("Warning: Seed BuildID is the same as macOS on this Mac!"),
            "Are you sure that you want to continue?",
        ),
        Some(BuildComparison::Older) => (
            Some("Warning: Seed BuildID is older than macOS on this Mac!"),
            "Are you absolutely sure that you want to continue?",
        ),
        Some(BuildComparison::Newer) => (
            Some("Seed BuildID is newer than macOS on this Mac (Ok)"),
            "Do you want to continue?",
        ),
        None => (None, "Do you want to continue?"),
    }
}

/// Ensure a package can be expanded into `target`.
pub fn check_unpack_target(target: &Path) -> Result<()> {
    if target.exists() {
        Err(SeedToolError::UnpackTargetExists(target.to_path_buf()))
    } else {
        Ok(())
    }
}

/// Prompt for a target volume among the entries of `volumes_dir`.
pub fn select_volume(volumes_dir: &Path) -> Result<PathBuf> {
    let pattern = format!("{}/*", volumes_dir.display());

    let volumes = glob::glob(&pattern)?
        .filter_map(|x| x.ok())
        .collect::<Vec<_>>();

    if volumes.is_empty() {
        return Err(SeedToolError::NoVolumes(volumes_dir.display().to_string()));
    }

    let names = volumes
        .iter()
        .map(|p| {
            p.file_name()
                .map(|x| x.to_string_lossy().to_string())
                .unwrap_or_else(|| p.display().to_string())
        })
        .collect::<Vec<_>>();

    let index = dialoguer::Select::new()
        .with_prompt("Select a target volume")
        .items(&names)
        .default(0)
        .interact()?;

    Ok(volumes[index].clone())
}

/// Download a file, drawing a progress bar.
pub fn download_with_progress(client: &Client, url: &str, dest: &Path) -> Result<u64> {
    let mut bar: Option<pbr::ProgressBar<std::io::Stdout>> = None;

    let written = download_to_path(client, url, dest, &mut |event| match event {
        DownloadEvent::Start(name, total) => {
            let mut pb = pbr::ProgressBar::new(total.unwrap_or(0));
            pb.set_units(pbr::Units::Bytes);
            pb.message(&format!("{} ", name));
            bar.replace(pb);
        }
        DownloadEvent::Progress(count) => {
            if let Some(pb) = bar.as_mut() {
                pb.set(count);
            }
        }
        DownloadEvent::Finish(_) => {
            if let Some(mut pb) = bar.take() {
                pb.finish();
            }
        }
    })?;

    Ok(written)
}

/// Download the distribution of a product into `dir`.
fn fetch_distribution(client: &Client, url: &str, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let dest = dir.join(url_file_name(url));
    info!("downloading {}", url_file_name(url));
    download_to_path(client, url, &dest, &mut |_| {})?;

    Ok(dest)
}

/// Evaluate the distribution of each product, keeping those satisfying the request.
fn find_candidates<'a>(
    client: &Client,
    request: &DownloadRequest,
    products: Vec<(&'a str, &'a Product)>,
) -> Result<Vec<Candidate<'a>>> {
    let requested = OsVersion::parse(&request.macos_version)?;
    let mut candidates = vec![];

    for (key, product) in products {
        let url = match product.distribution_url(&request.language) {
            Some(url) => url,
            None => {
                warn!("product {} has no {} distribution; skipping", key, request.language);
                continue;
            }
        };

        let dir = request.volume.join(TMP_DIRECTORY).join(key);
        let distribution = fetch_distribution(client, url, &dir)?;
        let info = DistributionInfo::from_path(&distribution)?;

        let build = info.build_version(&request.package, request.unpack.is_some());
        let version = resolve_version(request.kind, &request.macos_version, build.version.as_deref());

        if !version_qualifies(version.as_deref(), &requested) {
            debug!(
                "skipping {}: version {} predates {}",
                key,
                version.as_deref().unwrap_or(UNKNOWN),
                requested
            );
            continue;
        }

        candidates.push(Candidate {
            key,
            product,
            distribution,
            build: build.build,
            version: version.unwrap_or_else(|| UNKNOWN.to_string()),
            beta: info.is_beta(),
        });
    }

    Ok(candidates)
}

fn describe(candidate: &Candidate) -> String {
    format!(
        "macOS {}{} ({}) with key: {}",
        candidate.version,
        if candidate.beta { " Beta" } else { "" },
        candidate.build,
        candidate.key
    )
}

fn select_candidate(candidates: &[Candidate]) -> Result<usize> {
    if candidates.len() == 1 {
        println!("Found {}", describe(&candidates[0]));
        return Ok(0);
    }

    let items = candidates.iter().map(describe).collect::<Vec<_>>();

    Ok(dialoguer::Select::new()
        .with_prompt(format!("Select package to install [1-{}]", candidates.len()))
        .items(&items)
        .default(0)
        .interact()?)
}

fn print_queue(packages: &[&Package]) {
    println!("Queued Download(s):");
    for package in packages {
        match package.size {
            Some(size) => println!("{} [{} bytes]", package.file_name(), size),
            None => println!("{}", package.file_name()),
        }
    }
    println!(
        "Total: {} bytes",
        Product::total_size(packages.iter().copied())
    );
}

/// Expand a flat package with `pkgutil`.
pub fn expand_package(package: &Path, target: &Path) -> Result<()> {
    check_unpack_target(target)?;

    println!("Expanding {} to {}", package.display(), target.display());
    cmd!("pkgutil", "--expand", package, target).run()?;

    Ok(())
}

/// Find, confirm and download the packages described by `request`.
///
/// Returns `None` if the user declined to continue.
pub fn run_download(client: &Client, request: &DownloadRequest) -> Result<Option<DownloadOutcome>> {
    if request.unpack.is_some() && request.package == "*" {
        return Err(SeedToolError::UnpackRequiresPackage);
    }
    if let Some(target) = &request.unpack {
        check_unpack_target(target)?;
    }

    let system = match SystemVersion::from_volume(&request.volume) {
        Ok(system) => {
            let name = system
                .version()
                .map(|v| v.name())
                .unwrap_or(UNKNOWN);
            println!(
                "Currently running on macOS {} {} Build ({})",
                name, system.product_version, system.product_build_version
            );
            Some(system)
        }
        Err(e) => {
            warn!(
                "unable to read system version of {}: {}",
                request.volume.display(),
                e
            );
            None
        }
    };

    let program = match (request.seed_program, &system) {
        (Some(program), _) => program,
        (None, Some(system)) => enrolled_seed_program(&request.volume, system)?,
        (None, None) => SeedProgram::Regular,
    };

    let catalog = Catalog::fetch(client, program)?;

    if request.package == "*" {
        println!("Searching for macOS: {}", request.macos_version);
    } else {
        println!(
            "Searching for: {} for macOS {}",
            request.package, request.macos_version
        );
    }

    let products = catalog.find_products(request.kind, &request.macos_version);
    debug!("{} products match {}", products.len(), request.kind);

    let candidates = find_candidates(client, request, products)?;
    if candidates.is_empty() {
        return Err(SeedToolError::VersionNotFound(request.macos_version.clone()));
    }

    let candidate = &candidates[select_candidate(&candidates)?];

    let comparison = system
        .as_ref()
        .map(|s| compare_builds(&candidate.build, &s.product_build_version));
    let (message, prompt) = confirmation_for(comparison);

    if let Some(message) = message {
        println!("{}", message);
    }

    if request.confirm
        && !dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?
    {
        println!("Aborting ...");
        return Ok(None);
    }

    let dir = request.volume.join(TMP_DIRECTORY).join(candidate.key);
    let packages = candidate.product.packages_named(&request.package);

    let mut downloaded = vec![];

    if packages.is_empty() {
        if request.package != "*" {
            warn!("target package > {} < not found!", request.package);
        }
    } else {
        print_queue(&packages);

        for package in packages {
            let dest = dir.join(package.file_name());
            download_with_progress(client, &package.url, &dest)?;
            println!("Download of {} finished", package.file_name());
            downloaded.push(dest);
        }
    }

    let unpacked = match &request.unpack {
        Some(target) => match downloaded.first() {
            Some(package) => {
                expand_package(package, target)?;
                Some(target.clone())
            }
            None => {
                warn!("nothing downloaded; not expanding to {}", target.display());
                None
            }
        },
        None => None,
    };

    Ok(Some(DownloadOutcome {
        key: candidate.key.to_string(),
        distribution: candidate.distribution.clone(),
        downloaded,
        unpacked,
    }))
}
