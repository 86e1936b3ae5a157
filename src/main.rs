use std::path::PathBuf;
use std::process::ExitCode;

use argh::FromArgs;
use log::error;

use rpmrepo_gen::{
    ChecksumType, CompressionType, Generator, GeneratorOptions, MetadataError,
};

#[derive(FromArgs, Debug)]
/// Creates a repomd (xml-based rpm metadata) repository from a set of rpms.
struct CreaterepoArgs {
    /// optional base URL location for all files
    #[argh(option, short = 'u')]
    baseurl: Option<String>,

    /// optional output directory
    #[argh(option, short = 'o')]
    outputdir: Option<String>,

    /// file globs to exclude, can be specified multiple times
    #[argh(option, short = 'x')]
    excludes: Vec<String>,

    /// text file with the complete list of files to include in the
    /// repository, one package per line, no wildcards or globs
    #[argh(option, short = 'i')]
    pkglist: Option<String>,

    /// pkgs to include on the command line, can be specified multiple times
    #[argh(option, short = 'n')]
    includepkg: Vec<String>,

    /// run quietly
    #[argh(switch, short = 'q')]
    quiet: bool,

    /// run verbosely
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// if metadata already exists in the outputdir and an rpm is unchanged
    /// (based on file size and mtime) since the metadata was generated,
    /// reuse the existing metadata rather than recalculating it
    #[argh(switch)]
    update: bool,

    /// use the existing repodata for --update from this path, can be
    /// specified multiple times
    #[argh(option)]
    update_md_path: Vec<String>,

    /// skip the stat() call on a --update, assumes if the filename is the
    /// same then the file is still the same
    #[argh(switch)]
    skip_stat: bool,

    /// ignore symlinks of packages
    #[argh(switch, short = 'S')]
    skip_symlinks: bool,

    /// choose the checksum type used in repomd.xml and for packages in the
    /// metadata, one of sha256 (the default), sha1 or md5
    #[argh(option, short = 's')]
    checksum: Option<String>,

    /// only import the last N changelog entries from each rpm into the
    /// metadata
    #[argh(option)]
    changelog_limit: Option<usize>,

    /// include the file's checksum in the metadata filename, helps HTTP
    /// caching (default)
    #[argh(switch)]
    unique_md_filenames: bool,

    /// do not include the file's checksum in the metadata filename
    #[argh(switch)]
    simple_md_filenames: bool,

    /// number of workers to spawn to read rpms
    #[argh(option)]
    workers: Option<usize>,

    /// directory where the persistent package checksum cache is kept
    #[argh(option, short = 'c')]
    cachedir: Option<String>,

    /// remove an existing .repodata/ lock directory instead of failing
    #[argh(switch)]
    ignore_lock: bool,

    /// which compression type to use for the metadata, one of gz (the
    /// default), bz2, xz or none
    #[argh(option)]
    compress_type: Option<String>,

    /// remove this many leading path components from package locations
    #[argh(option)]
    cut_dirs: Option<usize>,

    /// prepend this prefix to package location hrefs
    #[argh(option)]
    location_prefix: Option<String>,

    /// serialize the metadata single-threaded after all packages were read
    #[argh(switch)]
    delayed_dump: bool,

    /// write the paths of all newly read packages to this file
    #[argh(option)]
    read_pkgs_list: Option<String>,

    /// user-specified revision for the repomd.xml
    #[argh(option)]
    revision: Option<String>,

    /// distro tag for the repomd.xml, "cpeid,name" or plain name, can be
    /// specified multiple times
    #[argh(option)]
    distro: Vec<String>,

    /// content tag for the repomd.xml, can be specified multiple times
    #[argh(option)]
    content: Vec<String>,

    /// repo tag for the repomd.xml, can be specified multiple times
    #[argh(option)]
    repo: Vec<String>,

    /// output version
    #[argh(switch, short = 'V')]
    version: bool,

    /// directory of packages to index
    #[argh(positional)]
    directory: Option<String>,
}

fn build_options(args: CreaterepoArgs) -> Result<GeneratorOptions, MetadataError> {
    let input_dir = args.directory.map(PathBuf::from).ok_or_else(|| {
        MetadataError::ConfigError("must specify exactly one directory to index".to_owned())
    })?;

    let checksum_type = match args.checksum.as_deref() {
        // the value is case-folded; only these three are accepted here
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "sha256" | "sha1" | "md5" => ChecksumType::try_from(value)?,
            _ => {
                return Err(MetadataError::ConfigError(format!(
                    "unknown/unsupported checksum type \"{}\"",
                    value
                )));
            }
        },
        None => ChecksumType::Sha256,
    };

    let compression = match args.compress_type.as_deref() {
        Some(value) => CompressionType::try_from(value)
            .map_err(|_| MetadataError::ConfigError(format!("unknown compression \"{}\"", value)))?,
        None => CompressionType::Gzip,
    };

    if args.unique_md_filenames && args.simple_md_filenames {
        return Err(MetadataError::ConfigError(
            "--unique-md-filenames and --simple-md-filenames are mutually exclusive".to_owned(),
        ));
    }

    let distro_tags = args
        .distro
        .iter()
        .map(|value| match value.split_once(',') {
            Some((cpeid, name)) => (Some(cpeid.to_owned()), name.to_owned()),
            None => (None, value.clone()),
        })
        .collect();

    let defaults = GeneratorOptions::default();
    Ok(GeneratorOptions {
        input_dir,
        location_base: args.baseurl,
        outputdir: args.outputdir.map(PathBuf::from),
        excludes: args.excludes,
        pkglist: args.pkglist.map(PathBuf::from),
        includepkg: args.includepkg,
        update: args.update,
        update_md_paths: args.update_md_path.into_iter().map(PathBuf::from).collect(),
        skip_stat: args.skip_stat,
        skip_symlinks: args.skip_symlinks,
        checksum_type,
        changelog_limit: args.changelog_limit.or(defaults.changelog_limit),
        unique_md_filenames: !args.simple_md_filenames,
        workers: args.workers.unwrap_or(defaults.workers),
        checksum_cachedir: args.cachedir.map(PathBuf::from),
        ignore_lock: args.ignore_lock,
        compression,
        cut_dirs: args.cut_dirs.unwrap_or(0),
        location_prefix: args.location_prefix,
        delayed_dump: args.delayed_dump,
        read_pkgs_list: args.read_pkgs_list.map(PathBuf::from),
        revision: args.revision,
        distro_tags,
        content_tags: args.content,
        repo_tags: args.repo,
    })
}

fn run(args: CreaterepoArgs) -> Result<bool, MetadataError> {
    let options = build_options(args)?;
    let generator = Generator::new(options)?;
    let summary = generator.run()?;
    Ok(summary.had_errors)
}

fn main() -> ExitCode {
    let args: CreaterepoArgs = argh::from_env();

    if args.version {
        println!("rpmrepo-gen {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let level = if args.quiet {
        log::LevelFilter::Error
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.parse_default_env();
    builder.init();

    match run(args) {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => ExitCode::from(2),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
