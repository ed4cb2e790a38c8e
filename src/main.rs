#[macro_use]
extern crate clap;

use std::env;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Arg, ArgAction, Command};
use log::{error, info, LevelFilter};
use log4rs::{
    append::console::{ConsoleAppender, Target},
    append::rolling_file::policy::compound::{
        roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
    },
    append::rolling_file::RollingFileAppender,
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};
use serde_json::Value;

use vault_backup::backup::BackupExecutor;
use vault_backup::configuration::{credential, Configuration, Overrides};
use vault_backup::connector::{Connector, RemoteConnector};
use vault_backup::{helper, BackupResult};

const LOG_FILE_SIZE: u64 = 5 * 1024 * 1024;
const LOG_FILE_BACKUPS: u32 = 5;

struct Arguments {
    config_file: PathBuf,
    log_file: Option<PathBuf>,
    overrides: Overrides,
    verbose: bool,
    working_directory: PathBuf,
}

fn run(arguments: &Arguments) -> BackupResult<()> {
    let mut configuration = Configuration::load(&arguments.config_file, &arguments.overrides)?;

    let remote: Option<Box<dyn Connector>> = match &configuration.ssh {
        Some(ssh) if configuration.require_ssh => Some(Box::new(RemoteConnector::connect(ssh)?)),
        _ => None,
    };
    let executor = BackupExecutor::new(
        configuration.force,
        arguments.working_directory.clone(),
        remote,
    );
    let result = executor.execute(&mut configuration.archives);
    drop(executor);

    // failed archives still hold their previous last_run values
    configuration.save(&arguments.config_file)?;
    result
}

fn main() {
    let arguments = match get_arguments() {
        Ok(arguments) => arguments,
        Err(why) => {
            eprintln!("{}", why);
            process::exit(2);
        }
    };

    if let Err(why) = init_logging(arguments.verbose, arguments.log_file.as_deref()) {
        eprintln!("unable to initialize logging: {}", why);
        process::exit(1);
    }

    info!("Execution started");
    let success = match run(&arguments) {
        Ok(_) => true,
        Err(why) => {
            error!("{}", why);
            false
        }
    };
    info!(
        "Execution ended ({})",
        if success { "success" } else { "failure" }
    );

    if !success {
        process::exit(1);
    }
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{h({d(%Y-%m-%d %H:%M:%S)} [{l}] {M} ({P}))} {m}{n}",
        )))
        .build();
    let mut config = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(level)))
            .build("stderr", Box::new(stderr)),
    );
    let mut root = Root::builder().appender("stderr");

    if let Some(log_file) = log_file {
        let roller = FixedWindowRoller::builder()
            .build(&format!("{}.{{}}", log_file.display()), LOG_FILE_BACKUPS)?;
        let policy = CompoundPolicy::new(
            Box::new(SizeTrigger::new(LOG_FILE_SIZE)),
            Box::new(roller),
        );
        let file = RollingFileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(
                "{d(%Y-%m-%d %H:%M:%S)} [{l}] {M} ({P}) {m}{n}",
            )))
            .build(log_file, Box::new(policy))?;
        config = config.appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(level)))
                .build("file", Box::new(file)),
        );
        root = root.appender("file");
    }

    log4rs::init_config(config.build(root.build(level))?)?;
    Ok(())
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match helper::convert_bool("force", Some(&Value::String(value.to_string()))) {
        Ok(Some(flag)) => Ok(flag),
        Ok(None) => Err(String::from("missing value")),
        Err(why) => Err(why.to_string()),
    }
}

fn get_arguments() -> BackupResult<Arguments> {
    let matches = Command::new("vault-backup")
        .version(crate_version!())
        .about("Creates versioned zip backups of directories and copies them to local and SSH destinations.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .default_value("config.json")
                .help("The JSON configuration to run and update"),
        )
        .arg(
            Arg::new("force")
                .short('f')
                .long("force")
                .value_name("BOOL")
                .value_parser(parse_flag)
                .help("Back up every destination even without changes (true/false, yes/no, 1/0)"),
        )
        .arg(
            Arg::new("password")
                .long("password")
                .value_name("PASSWORD")
                .help("Archive password for every backup, as enc(<plain>) or an obfuscated token"),
        )
        .arg(
            Arg::new("password-ssh")
                .long("password-ssh")
                .value_name("PASSWORD")
                .help("SSH password, as enc(<plain>) or an obfuscated token"),
        )
        .arg(
            Arg::new("working-directory")
                .short('w')
                .long("working-directory")
                .value_name("DIR")
                .help("Where archives are built before distribution (default: <tmp>/vault-backup)"),
        )
        .arg(
            Arg::new("log-file")
                .short('l')
                .long("log-file")
                .value_name("FILE")
                .help("Also log to this file, rotated at 5 MB"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log debug messages"),
        )
        .get_matches();

    let password = match matches.get_one::<String>("password") {
        Some(value) => Some(credential::handle_password(value)?),
        None => None,
    };
    let password_ssh = match matches.get_one::<String>("password-ssh") {
        Some(value) => Some(credential::handle_password(value)?),
        None => None,
    };
    let working_directory = match matches.get_one::<String>("working-directory") {
        Some(dir) => helper::absolute_path(helper::expand_home(dir))?,
        None => env::temp_dir().join("vault-backup"),
    };
    let config_file = matches
        .get_one::<String>("config")
        .map(|file| helper::expand_home(file))
        .unwrap_or_else(|| PathBuf::from("config.json"));

    Ok(Arguments {
        config_file,
        log_file: matches
            .get_one::<String>("log-file")
            .map(|file| helper::expand_home(file)),
        overrides: Overrides {
            force: matches.get_one::<bool>("force").copied(),
            password,
            password_ssh,
        },
        verbose: matches.get_flag("verbose"),
        working_directory,
    })
}
