use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_parser, Arg, ArgAction,
    ArgMatches, Command,
};
use colored::Colorize;
use destfs::{api::DestfsError, DestOptions, SrcOptions, VirtualFile};
use std::path::PathBuf;

fn parse_mode(value: &str) -> Result<u32, String> {
    let digits = value.strip_prefix("0o").unwrap_or(value);

    u32::from_str_radix(digits, 8)
        .map_err(|_| format!("'{}' is not an octal mode (e.g. '644', '0o755')", value))
}

// The CLI layer should only parse inputs and forward them to library code.
#[tokio::main]
async fn main() -> miette::Result<()> {
    let matches = Command::new(crate_name!())
        .about(crate_description!())
        .author(crate_authors!())
        .version(crate_version!())
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("copy")
                .about("Copies the files matching globs into a destination directory")
                .arg(
                    Arg::new("globs")
                        .help("glob patterns selecting the source files")
                        .required(true)
                        .num_args(1..),
                )
                .arg(
                    Arg::new("dest")
                        .short('d')
                        .long("dest")
                        .help("The destination directory files are written to")
                        .required(true),
                )
                .arg(
                    Arg::new("cwd")
                        .long("cwd")
                        .help("Directory globs and the destination are resolved against")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("no-read")
                        .long("no-read")
                        .help("Replicate the layout without writing file contents")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("stream")
                        .long("stream")
                        .help("Stream file contents instead of buffering them")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("no-overwrite")
                        .long("no-overwrite")
                        .help("Keep files that already exist in the destination")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .help("Octal permission bits for written files")
                        .value_parser(parse_mode),
                )
                .arg(
                    Arg::new("dir-mode")
                        .long("dir-mode")
                        .help("Octal permission bits for created directories")
                        .value_parser(parse_mode),
                )
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .help("TOML file holding destination options")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .get_matches();

    let is_verbose = matches.get_flag("verbose");

    init_logger(is_verbose);

    match matches.subcommand() {
        Some(("copy", args)) => handle_copy(args).await?,
        _ => unreachable!(),
    }

    Ok(())
}

fn init_logger(is_verbose: bool) {
    let level = if is_verbose { "debug" } else { "warn" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

async fn handle_copy(args: &ArgMatches) -> Result<(), DestfsError> {
    let globs: Vec<String> = args
        .get_many::<String>("globs")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let destination = args
        .get_one::<String>("dest")
        .cloned()
        .unwrap_or_default();
    let cwd = args.get_one::<PathBuf>("cwd").cloned();

    let mut dest_options = match args.get_one::<PathBuf>("config") {
        Some(path) => DestOptions::from_file(path)?,
        None => DestOptions::default(),
    };
    if cwd.is_some() {
        dest_options.cwd = cwd.clone();
    }
    if let Some(mode) = args.get_one::<u32>("mode") {
        dest_options.mode = Some(*mode);
    }
    if let Some(mode) = args.get_one::<u32>("dir-mode") {
        dest_options.dir_mode = Some(*mode);
    }
    if args.get_flag("no-overwrite") {
        dest_options.overwrite = false;
    }

    let src_options = SrcOptions {
        cwd,
        read: !args.get_flag("no-read"),
        buffer: !args.get_flag("stream"),
    };

    let written = destfs::api::copy(
        globs,
        destination,
        src_options,
        dest_options,
        report,
    )
    .await?;

    log::debug!("forwarded {} files", written);

    Ok(())
}

fn report(file: &VirtualFile) {
    let action = if file.is_directory() {
        "mkdir".blue()
    } else if file.contents.is_null() {
        "skip".yellow()
    } else {
        "create".green()
    };

    println!("{} {}", action, file.path.display());
}
