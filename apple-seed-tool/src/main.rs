// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod download;
mod error;
mod firmware;
mod host;
mod report;
mod settings;

use {
    crate::{
        download::{run_download, select_volume, DownloadRequest},
        error::{Result, SeedToolError},
        firmware::{
            ensure_firmware_payloads, ensure_firmware_update, scan_directory, scan_file,
            smc_payloads, write_efi_table, write_report, write_smc_table, HostFirmware,
        },
        settings::Settings,
    },
    apple_firmware_payload::board,
    apple_seed_catalog::{
        catalog::{Catalog, ProductKind},
        distribution::DistributionInfo,
        http::{fetch_bytes, get_http_client},
        install_script::{load_template, script_file_name, InstallScriptParams, TEMPLATE_FILE_NAME},
        os_version::SystemVersion,
        seed_program::{enrolled_seed_program, SeedProgram},
        CatalogError,
    },
    clap::{Arg, ArgMatches, Command},
    log::{info, warn, LevelFilter},
    std::{
        path::{Path, PathBuf},
        time::SystemTime,
    },
};

const DOWNLOAD_ABOUT: &str = "\
Download packages of a macOS installer or update.

The software update catalog of the seed program the target volume is enrolled
in (or the one given via --seed-program) is searched for products of the
requested kind:

install
   Full install assistants (Install macOS <name>.app).

update
   OS updates whose version is exactly --macos-version.

The distribution file of each matching product is downloaded to
`<volume>/tmp/<product key>/` and inspected to determine the macOS build and
version it delivers. Products older than --macos-version are ignored. When
more than one product remains, you are asked to pick one.

The packages of the selected product are then downloaded to the same
directory. --package selects a single package by file name. The default of `*`
downloads all of them.

--unpack expands the downloaded package with `pkgutil --expand`. The target
directory must not exist.
";

const EFIVER_ABOUT: &str = "\
Show the EFI firmware versions shipped with macOS.

FirmwareUpdate.pkg and InstallAssistantAuto.pkg are downloaded and expanded
when missing. EFI images bundled in the install assistant payload are copied
next to the images of the firmware update.

Every image is then scanned for its BIOS ID and the board IDs it applies to.
The row of this machine is framed with `>` and `<`. A warning is printed when
the installed EFI ROM predates the shipped one.

The board ID and ROM version of this machine are read via `ioreg` and
`efiupdater`. Use --board-id and --rom-version to report on another machine.
";

const SMCVER_ABOUT: &str = "\
Show the SMC firmware versions shipped with macOS.

FirmwareUpdate.pkg is downloaded and expanded when missing. The SMC version
of every board with a JSON file under Scripts/Tools/SMCJSONs is printed. A
warning is printed when the SMC firmware of this machine is older.
";

const MAKE_INSTALL_SCRIPT_ABOUT: &str = "\
Write a shell script downloading the current install assistant.

The most recent install assistant of the seed program is located in the
catalog and its distribution URL is substituted into a script template. The
template is downloaded if it doesn't exist at --template.

The script is written as installSeed-<build>.sh.
";

fn add_catalog_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("macos-version")
                .long("macos-version")
                .short('m')
                .takes_value(true)
                .help("macOS version to look for (defaults to 10.13)"),
        )
        .arg(
            Arg::new("seed-program")
                .long("seed-program")
                .takes_value(true)
                .possible_values(["DeveloperSeed", "PublicSeed", "CustomerSeed", "Regular"])
                .help("Seed program catalog to use (defaults to the volume's enrollment)"),
        )
        .arg(
            Arg::new("language")
                .long("language")
                .takes_value(true)
                .help("Language of the distribution file (defaults to English)"),
        )
}

/// Load settings from the `--config` file, if any.
fn load_settings(args: &ArgMatches) -> Result<Settings> {
    Settings::load(args.value_of_os("config").map(Path::new))
}

/// Resolve settings, applying the catalog arguments of a command.
fn resolve_settings(args: &ArgMatches) -> Result<Settings> {
    let mut settings = load_settings(args)?;

    if let Some(version) = args.value_of("macos-version") {
        settings.macos_version = version.to_string();
    }
    if let Some(language) = args.value_of("language") {
        settings.language = language.to_string();
    }
    if let Some(program) = args.value_of("seed-program") {
        settings.seed_program = Some(program.to_string());
    }

    Ok(settings)
}

fn seed_program_override(settings: &Settings) -> Option<SeedProgram> {
    settings.seed_program.as_deref().map(SeedProgram::from)
}

fn host_value(res: Result<Option<String>>, what: &str) -> Option<String> {
    match res {
        Ok(Some(value)) => Some(value),
        Ok(None) => {
            warn!("unable to determine {} of this machine", what);
            None
        }
        Err(e) => {
            warn!("unable to determine {} of this machine: {}", what, e);
            None
        }
    }
}

fn command_download(args: &ArgMatches) -> Result<()> {
    let settings = resolve_settings(args)?;

    let kind = args
        .value_of("action")
        .unwrap_or("install")
        .parse::<ProductKind>()?;
    let package = args.value_of("package").unwrap_or("*").to_string();
    let unpack = args.value_of_os("unpack").map(PathBuf::from);

    if unpack.is_some() && package == "*" {
        return Err(SeedToolError::UnpackRequiresPackage);
    }

    let volume = match args.value_of_os("volume") {
        Some(volume) => PathBuf::from(volume),
        None => select_volume(&settings.volumes_dir)?,
    };

    let request = DownloadRequest {
        kind,
        package,
        volume,
        unpack,
        macos_version: settings.macos_version.clone(),
        seed_program: seed_program_override(&settings),
        language: settings.language.clone(),
        confirm: !args.is_present("no-confirm"),
    };

    let client = get_http_client()?;

    if let Some(outcome) = run_download(&client, &request)? {
        println!(
            "Product {}: distribution at {}",
            outcome.key,
            outcome.distribution.display()
        );
        for path in &outcome.downloaded {
            println!("  {}", path.display());
        }
        if let Some(path) = outcome.unpacked {
            println!("Expanded to {}", path.display());
        }
    }

    Ok(())
}

fn command_efiver(args: &ArgMatches) -> Result<()> {
    let settings = resolve_settings(args)?;

    if !args.is_present("offline") {
        let client = get_http_client()?;
        ensure_firmware_payloads(&client, &settings, seed_program_override(&settings))?;
    }

    let board_id = match args.value_of("board-id") {
        Some(value) => Some(value.to_string()),
        None => host_value(host::board_id(), "board ID"),
    };

    let rom_version = match args.value_of("rom-version") {
        Some(value) => Some(value.to_string()),
        None => host_value(
            host::efi_versions(&settings.efiupdater).map(|versions| {
                versions.map(|v| {
                    info!("installed EFI version: {}", v.current);
                    if v.update != v.current {
                        info!("efiupdater would update to: {}", v.update);
                    }
                    v.raw
                })
            }),
            "EFI ROM version",
        ),
    };

    let dir = settings.efi_payload_dir();
    let reports = scan_directory(&dir)?;
    if reports.is_empty() {
        warn!("no firmware images found in {}", dir.display());
    }

    let host = HostFirmware {
        board_id,
        rom_version,
        smc_version: None,
    };

    write_efi_table(std::io::stdout(), &reports, &host)?;

    Ok(())
}

fn command_smcver(args: &ArgMatches) -> Result<()> {
    let settings = resolve_settings(args)?;

    if !args.is_present("offline") {
        let client = get_http_client()?;
        ensure_firmware_update(&client, &settings, seed_program_override(&settings))?;
    }

    let board_id = match args.value_of("board-id") {
        Some(value) => Some(value.to_string()),
        None => host_value(host::board_id(), "board ID"),
    };

    let smc_version = match args.value_of("smc-version") {
        Some(value) => Some(value.to_string()),
        None => host_value(host::smc_version(), "SMC version"),
    };

    let dir = settings.smc_json_dir();
    let payloads = smc_payloads(&dir)?;
    if payloads.is_empty() {
        warn!("no SMC payloads found in {}", dir.display());
    }

    let host = HostFirmware {
        board_id,
        rom_version: None,
        smc_version,
    };

    write_smc_table(std::io::stdout(), &payloads, &host)?;

    Ok(())
}

fn command_scan(args: &ArgMatches) -> Result<()> {
    let paths = args
        .values_of_os("path")
        .map(|x| x.map(PathBuf::from).collect::<Vec<_>>())
        .unwrap_or_default();

    let mut stdout = std::io::stdout();

    for path in paths {
        let report = scan_file(&path)?;
        write_report(&mut stdout, &report)?;
    }

    Ok(())
}

/// Split board IDs into those with a known model and those without.
fn partition_board_ids(board_ids: Vec<String>) -> (Vec<(String, &'static str)>, Vec<String>) {
    let mut known = vec![];
    let mut unknown = vec![];

    for board_id in board_ids {
        match board::model_for_board_id(&board_id) {
            board::UNKNOWN => unknown.push(board_id),
            model => known.push((board_id, model)),
        }
    }

    (known, unknown)
}

/// Board IDs named by the `*.plist` resources in a directory.
fn resource_board_ids(dir: &Path) -> Result<Vec<String>> {
    let pattern = format!("{}/*.plist", dir.display());

    let mut board_ids = glob::glob(&pattern)?
        .filter_map(|x| x.ok())
        .filter_map(|p| p.file_stem().map(|x| x.to_string_lossy().to_string()))
        .collect::<Vec<_>>();
    board_ids.sort();

    Ok(board_ids)
}

fn command_board_ids(args: &ArgMatches) -> Result<()> {
    let settings = load_settings(args)?;

    let dir = args
        .value_of_os("dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| settings.platform_resources_dir.clone());

    let board_ids = resource_board_ids(&dir)?;

    println!("{}", "-".repeat(37));
    println!("{} Resource files (plists) found", board_ids.len());
    println!("{}", "-".repeat(37));

    let (known, unknown) = partition_board_ids(board_ids);

    for (board_id, model) in known {
        println!("{} - {}", board_id, model);
    }

    if !unknown.is_empty() {
        println!("{}", "-".repeat(39));
        for board_id in unknown {
            println!("-- No match for {} --", board_id);
        }
        println!("{}", "-".repeat(39));
    }

    Ok(())
}

/// Seed program whose catalog is searched for the install assistant.
///
/// An explicit choice is used as is. Otherwise the machine's enrollment is
/// used, with unenrolled machines getting the public seed.
fn install_script_seed_program(
    requested: Option<SeedProgram>,
    enrolled: impl FnOnce() -> Option<SeedProgram>,
) -> SeedProgram {
    match requested {
        Some(program) => program,
        None => match enrolled() {
            Some(SeedProgram::Regular) | None => SeedProgram::PublicSeed,
            Some(program) => program,
        },
    }
}

fn command_make_install_script(args: &ArgMatches) -> Result<()> {
    let settings = resolve_settings(args)?;
    let client = get_http_client()?;

    // Machines not enrolled in a seed program get the public seed.
    let program = install_script_seed_program(seed_program_override(&settings), || {
        let volume = Path::new("/");

        match SystemVersion::from_volume(volume)
            .and_then(|system| enrolled_seed_program(volume, &system))
        {
            Ok(program) => Some(program),
            Err(e) => {
                warn!("unable to determine seed enrollment: {}", e);
                None
            }
        }
    });
    println!("Using the {} catalog", program);

    let catalog = Catalog::fetch(&client, program)?;

    let (key, product) = catalog
        .find_products(ProductKind::Install, &settings.macos_version)
        .into_iter()
        .max_by_key(|(_, product)| product.post_date.map(SystemTime::from))
        .ok_or_else(|| CatalogError::ProductNotFound("install assistant".to_string()))?;

    let url = product
        .distribution_url(&settings.language)
        .ok_or_else(|| CatalogError::MissingDistribution(key.to_string(), settings.language.clone()))?;

    let info = DistributionInfo::from_bytes(&fetch_bytes(&client, url)?)?;
    let build = info.build_version("*", false).build;
    println!("Found install assistant {} with build {}", key, build);

    let params = InstallScriptParams::from_distribution_url(key, url)?;

    let template_path = args
        .value_of_os("template")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(TEMPLATE_FILE_NAME));
    let template = load_template(&client, &template_path)?;

    let output_dir = args
        .value_of_os("output-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let dest = output_dir.join(script_file_name(&build));

    std::fs::write(&dest, params.render(&template))?;
    println!("wrote {}", dest.display());

    Ok(())
}

fn seedtool_app() -> Command<'static> {
    let app = Command::new("seedtool")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Download macOS seed packages and inspect the firmware they ship")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .takes_value(true)
                .global(true)
                .allow_invalid_utf8(true)
                .help("Path to a YAML settings file"),
        );

    let app = app.subcommand(add_catalog_args(
        Command::new("download")
            .about("Download packages of a macOS installer or update")
            .long_about(DOWNLOAD_ABOUT)
            .arg(
                Arg::new("action")
                    .long("action")
                    .short('a')
                    .takes_value(true)
                    .possible_values(["install", "update"])
                    .default_value("install")
                    .help("Kind of product to download"),
            )
            .arg(
                Arg::new("package")
                    .long("package")
                    .short('f')
                    .takes_value(true)
                    .default_value("*")
                    .help("File name of the package to download"),
            )
            .arg(
                Arg::new("volume")
                    .long("volume")
                    .short('t')
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Target volume (prompted for when missing)"),
            )
            .arg(
                Arg::new("unpack")
                    .long("unpack")
                    .short('u')
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Expand the downloaded package into this directory"),
            )
            .arg(
                Arg::new("no-confirm")
                    .long("no-confirm")
                    .help("Do not ask for confirmation before downloading"),
            ),
    ));

    let app = app.subcommand(add_catalog_args(
        Command::new("efiver")
            .about("Show EFI firmware versions shipped with macOS")
            .long_about(EFIVER_ABOUT)
            .arg(
                Arg::new("board-id")
                    .long("board-id")
                    .takes_value(true)
                    .help("Board ID to highlight instead of this machine's"),
            )
            .arg(
                Arg::new("rom-version")
                    .long("rom-version")
                    .takes_value(true)
                    .help("Installed BIOS ID to compare against"),
            )
            .arg(
                Arg::new("offline")
                    .long("offline")
                    .help("Only use payloads already on disk"),
            ),
    ));

    let app = app.subcommand(add_catalog_args(
        Command::new("smcver")
            .about("Show SMC firmware versions shipped with macOS")
            .long_about(SMCVER_ABOUT)
            .arg(
                Arg::new("board-id")
                    .long("board-id")
                    .takes_value(true)
                    .help("Board ID to highlight instead of this machine's"),
            )
            .arg(
                Arg::new("smc-version")
                    .long("smc-version")
                    .takes_value(true)
                    .help("Installed SMC version to compare against"),
            )
            .arg(
                Arg::new("offline")
                    .long("offline")
                    .help("Only use payloads already on disk"),
            ),
    ));

    let app = app.subcommand(
        Command::new("scan")
            .about("Print the BIOS ID and board IDs of EFI firmware images")
            .arg(
                Arg::new("path")
                    .required(true)
                    .multiple_occurrences(true)
                    .allow_invalid_utf8(true)
                    .help(".scap or .fd file to scan"),
            ),
    );

    let app = app.subcommand(
        Command::new("board-ids")
            .about("Map board IDs of platform plugin resources to models")
            .arg(
                Arg::new("dir")
                    .long("dir")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Directory holding <board-id>.plist resources"),
            ),
    );

    let app = app.subcommand(add_catalog_args(
        Command::new("make-install-script")
            .about("Write a script downloading the current install assistant")
            .long_about(MAKE_INSTALL_SCRIPT_ABOUT)
            .arg(
                Arg::new("template")
                    .long("template")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Path of the script template"),
            )
            .arg(
                Arg::new("output-dir")
                    .long("output-dir")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Directory to write the script to"),
            ),
    ));

    app
}

fn dispatch(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("board-ids", args)) => command_board_ids(args),
        Some(("download", args)) => command_download(args),
        Some(("efiver", args)) => command_efiver(args),
        Some(("make-install-script", args)) => command_make_install_script(args),
        Some(("scan", args)) => command_scan(args),
        Some(("smcver", args)) => command_smcver(args),
        _ => Err(SeedToolError::UnknownCommand),
    }
}

fn main_impl() -> Result<()> {
    let matches = seedtool_app().get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    // This spews unwanted output at default level. Nerf it by default.
    if log_level == LevelFilter::Info {
        builder.filter_module("rustls", LevelFilter::Error);
    }

    builder.init();

    dispatch(&matches)
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            err.exit_code()
        }
    };

    std::process::exit(exit_code)
}
