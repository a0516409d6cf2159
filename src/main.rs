use colour::{e_red_ln, green_ln_bold, grey_ln};
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tml::build_system::build::{BuildDriver, BuildOptions};
use tml::build_system::build_cache::BuildCache;
use tml::build_system::object::LlvmToolchain;
use tml::build_system::rlib::read_rlib_metadata;
use tml::compiler::diagnostics::{print_errors, print_errors_json, CompilerMessages};
use tml::settings;
use tml::tester::test_cache::TestCacheManager;
use tml::tester::{run_tests, TestOptions};

const EXIT_SUCCESS: u8 = 0;
const EXIT_RUNTIME_ERROR: u8 = 1;
const EXIT_COMPILE_ERROR: u8 = 2;

enum Command {
    Build { file: PathBuf, args: Vec<String> },
    Run { file: PathBuf, args: Vec<String> },
    Test { args: Vec<String> },
    Cache { args: Vec<String> },
    RlibInfo { file: PathBuf },
}

fn main() -> ExitCode {
    let compiler_args: Vec<String> = env::args().collect();

    if compiler_args.len() < 2 {
        print_help();
        return ExitCode::from(EXIT_SUCCESS);
    }

    // --log= anywhere on the line wins over TML_LOG
    for arg in &compiler_args {
        if let Some(spec) = arg.strip_prefix("--log=") {
            tml::logging::set_filter(spec);
        }
    }

    let command = match get_command(&compiler_args[1..]) {
        Ok(command) => command,
        Err(message) => {
            e_red_ln!("{}", message);
            print_help();
            return ExitCode::from(EXIT_COMPILE_ERROR);
        }
    };

    let code = match command {
        Command::Build { file, args } => cmd_build(&file, &args),
        Command::Run { file, args } => cmd_run(&file, &args),
        Command::Test { args } => cmd_test(&args),
        Command::Cache { args } => cmd_cache(&args),
        Command::RlibInfo { file } => cmd_rlib_info(&file),
    };
    ExitCode::from(code)
}

fn get_command(args: &[String]) -> Result<Command, String> {
    let command = args.first().map(String::as_str);
    let rest: Vec<String> = args.iter().skip(1).cloned().collect();

    match command {
        Some("build") => {
            let file = first_positional(&rest)
                .ok_or_else(|| "build needs a source file".to_string())?;
            Ok(Command::Build { file, args: rest })
        }
        Some("run") => {
            let file = first_positional(&rest)
                .ok_or_else(|| "run needs a source file".to_string())?;
            Ok(Command::Run { file, args: rest })
        }
        Some("test") => Ok(Command::Test { args: rest }),
        Some("cache") => Ok(Command::Cache { args: rest }),
        Some("rlib") => match rest.first().map(String::as_str) {
            Some("info") => {
                let file = rest
                    .get(1)
                    .map(PathBuf::from)
                    .ok_or_else(|| "rlib info needs a .rlib file".to_string())?;
                Ok(Command::RlibInfo { file })
            }
            _ => Err("rlib supports: info <file>".to_string()),
        },
        Some(other) => Err(format!("'{other}' is not a command")),
        None => Err("missing command".to_string()),
    }
}

fn first_positional(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .find(|arg| !arg.starts_with('-'))
        .map(PathBuf::from)
}

fn report(messages: &CompilerMessages, json: bool) {
    if json {
        print_errors_json(messages);
    } else {
        print_errors(messages);
    }
}

fn cmd_build(file: &Path, args: &[String]) -> u8 {
    let (options, _) = match BuildOptions::parse(args) {
        Ok(parsed) => parsed,
        Err(error) => {
            report(&CompilerMessages::from_error(error), false);
            return EXIT_COMPILE_ERROR;
        }
    };

    let backend = LlvmToolchain::default();
    let project_root = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let driver = BuildDriver::new(&backend, project_root);

    let mut messages = CompilerMessages::new();
    match driver.build_file(file, &options, &mut messages) {
        Some(outcome) => {
            report(&messages, options.error_format_json);
            if let Some(ir) = outcome.ir_text {
                println!("{ir}");
            } else if let Some(artifact) = outcome.artifact {
                green_ln_bold!("built {}", artifact.display());
            }
            EXIT_SUCCESS
        }
        None => {
            report(&messages, options.error_format_json);
            EXIT_COMPILE_ERROR
        }
    }
}

fn cmd_run(file: &Path, args: &[String]) -> u8 {
    let (options, _) = match BuildOptions::parse(args) {
        Ok(parsed) => parsed,
        Err(error) => {
            report(&CompilerMessages::from_error(error), false);
            return EXIT_COMPILE_ERROR;
        }
    };

    let backend = LlvmToolchain::default();
    let project_root = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut run_options = options.clone();
    run_options.out_dir = Some(project_root.join(settings::dirs::RUN_CACHE));
    let driver = BuildDriver::new(&backend, project_root);

    let mut messages = CompilerMessages::new();
    let Some(outcome) = driver.build_file(file, &run_options, &mut messages) else {
        report(&messages, options.error_format_json);
        return EXIT_COMPILE_ERROR;
    };
    report(&messages, options.error_format_json);
    let Some(artifact) = outcome.artifact else {
        return EXIT_COMPILE_ERROR;
    };

    // Propagate the program's own exit code
    match std::process::Command::new(&artifact).status() {
        Ok(status) => status.code().unwrap_or(EXIT_RUNTIME_ERROR as i32) as u8,
        Err(error) => {
            e_red_ln!("could not run {}: {}", artifact.display(), error);
            EXIT_RUNTIME_ERROR
        }
    }
}

fn cmd_test(args: &[String]) -> u8 {
    let options = match TestOptions::parse(args) {
        Ok(options) => options,
        Err(error) => {
            report(&CompilerMessages::from_error(error), false);
            return EXIT_COMPILE_ERROR;
        }
    };
    let backend = LlvmToolchain::default();
    let root = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    run_tests(&root, &options, &backend) as u8
}

fn cmd_cache(args: &[String]) -> u8 {
    let root = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let cache_file = root.join(settings::TEST_CACHE_FILE_NAME);
    let build_cache = BuildCache::new(root.join(settings::dirs::OBJECT_CACHE));

    match args.first().map(String::as_str) {
        Some("stats") => {
            let mut test_cache = TestCacheManager::new();
            test_cache.load(&cache_file);
            let stats = test_cache.stats();
            println!("test cache: {} entries ({} passed, {} failed)",
                stats.total_entries, stats.passed_entries, stats.failed_entries);
            println!(
                "build cache: {} entries, {} KiB",
                build_cache.entry_count(),
                build_cache.total_size() / 1024
            );
            EXIT_SUCCESS
        }
        Some("clear") => {
            let mut test_cache = TestCacheManager::new();
            test_cache.load(&cache_file);
            test_cache.clear();
            test_cache.save(&cache_file);
            let removed = build_cache.clear();
            grey_ln!("cleared {} build cache entries", removed);
            EXIT_SUCCESS
        }
        Some("invalidate") => {
            let paths: Vec<PathBuf> = args[1..]
                .iter()
                .filter(|arg| !arg.starts_with('-'))
                .map(PathBuf::from)
                .collect();
            if paths.is_empty() {
                e_red_ln!("cache invalidate needs at least one path");
                return EXIT_COMPILE_ERROR;
            }
            // The test cache document is parsed and re-emitted, never
            // substring-edited
            let mut test_cache = TestCacheManager::new();
            test_cache.load(&cache_file);
            for path in &paths {
                test_cache.remove(&path.to_string_lossy());
            }
            test_cache.save(&cache_file);
            let removed = build_cache.invalidate(&paths);
            grey_ln!("invalidated {} build cache entries", removed);
            EXIT_SUCCESS
        }
        Some(limit) if limit.starts_with("limit=") => {
            let megabytes: u64 = limit
                .trim_start_matches("limit=")
                .parse()
                .unwrap_or(settings_default_cache_mb());
            let removed = build_cache.enforce_cache_limit(megabytes);
            grey_ln!("evicted {} entries to fit {} MiB", removed, megabytes);
            EXIT_SUCCESS
        }
        _ => {
            println!("cache supports: stats | clear | invalidate <paths..> | limit=<mb>");
            EXIT_COMPILE_ERROR
        }
    }
}

fn settings_default_cache_mb() -> u64 {
    512
}

fn cmd_rlib_info(file: &Path) -> u8 {
    match read_rlib_metadata(file) {
        Ok(metadata) => {
            println!(
                "{} v{} (tml {})",
                metadata.library.name, metadata.library.version, metadata.library.tml_version
            );
            for module in &metadata.modules {
                println!("  module {} ({}) hash {}", module.name, module.file, module.hash);
                for export in &module.exports {
                    if export.is_public {
                        println!("    pub {} = {} : {}", export.name, export.symbol, export.type_text);
                    }
                }
            }
            for dependency in &metadata.dependencies {
                println!("  dep {} v{} hash {}", dependency.name, dependency.version, dependency.hash);
            }
            EXIT_SUCCESS
        }
        Err(error) => {
            e_red_ln!("{}", error.msg);
            EXIT_RUNTIME_ERROR
        }
    }
}

fn print_help() {
    grey_ln!("------------------------------------");
    green_ln_bold!("The TML compiler");
    println!("Usage: tml <command> <args>");
    green_ln_bold!("Commands:");
    println!("  build <file>    - Compiles a file to a native artifact");
    println!("  run <file>      - Builds then runs, propagating the exit code");
    println!("  test            - Runs the test suites");
    println!("  cache           - stats | clear | invalidate | limit=<mb>");
    println!("  rlib info <f>   - Prints library metadata");
    println!();
    println!("Exit codes: 0 success, 1 runtime/test failure, 2 compilation error");
}
