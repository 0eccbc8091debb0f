// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The lus command: run scripts, with bundle bootstrap and the
//! standalone builder.

mod help;
mod output;
mod repl;
mod standalone;
mod warnings;

use std::io::Read;
use std::process;

use lus_bundle::Bundle;
use lus_interp::{Interpreter, Value};
use lus_interp::{Table, TableKey};

/// One `-e` chunk or `-l` require, kept in command-line order.
enum Action {
    Exec(String),
    Require { global: String, module: String },
}

struct Options {
    actions: Vec<Action>,
    interactive: bool,
    version: bool,
    ignore_env: bool,
    /// `-W` enables the static warning pass; `-Wpedantic` widens it.
    warnings: bool,
    pedantic: bool,
    pledges: Vec<String>,
    standalone: Option<String>,
    includes: Vec<String>,
    /// Options replayed by a standalone bundle at startup.
    preserved: Vec<String>,
    script: Option<String>,
    script_args: Vec<String>,
}

impl Options {
    fn new() -> Options {
        Options {
            actions: Vec::new(),
            interactive: false,
            version: false,
            ignore_env: false,
            warnings: false,
            pedantic: false,
            pledges: Vec::new(),
            standalone: None,
            includes: Vec::new(),
            preserved: Vec::new(),
            script: None,
            script_args: Vec::new(),
        }
    }
}

fn parse_args(argv: &[String]) -> Result<Options, String> {
    let mut opts = Options::new();
    let mut i = 1;

    // An option with an attached or following value: `-eSTAT` or
    // `-e STAT`.
    fn value_of(argv: &[String], i: &mut usize, flag: &str) -> Result<String, String> {
        let current = &argv[*i];
        if current.len() > flag.len() {
            return Ok(current[flag.len()..].to_string());
        }
        *i += 1;
        argv.get(*i)
            .cloned()
            .ok_or_else(|| format!("'{flag}' needs argument"))
    }

    while i < argv.len() {
        let arg = argv[i].as_str();
        match arg {
            "--" => {
                i += 1;
                if i < argv.len() {
                    opts.script = Some(argv[i].clone());
                    opts.script_args = argv[i + 1..].to_vec();
                }
                return Ok(opts);
            }
            "-" => {
                opts.script = Some("-".to_string());
                opts.script_args = argv[i + 1..].to_vec();
                return Ok(opts);
            }
            "-i" => opts.interactive = true,
            "-v" => opts.version = true,
            "-E" => {
                opts.ignore_env = true;
                opts.preserved.push(arg.to_string());
            }
            "-W" => {
                opts.warnings = true;
                opts.preserved.push(arg.to_string());
            }
            "-Wpedantic" => {
                opts.warnings = true;
                opts.pedantic = true;
                opts.preserved.push(arg.to_string());
            }
            "--pledge" => {
                i += 1;
                let spec = argv
                    .get(i)
                    .cloned()
                    .ok_or_else(|| "'--pledge' needs argument".to_string())?;
                opts.preserved.push("-P".to_string());
                opts.preserved.push(spec.clone());
                opts.pledges.push(spec);
            }
            "--standalone" => {
                i += 1;
                opts.standalone = Some(
                    argv.get(i)
                        .cloned()
                        .ok_or_else(|| "'--standalone' needs argument".to_string())?,
                );
            }
            "--include" => {
                i += 1;
                opts.includes.push(
                    argv.get(i)
                        .cloned()
                        .ok_or_else(|| "'--include' needs argument".to_string())?,
                );
            }
            _ if arg.starts_with("-e") => {
                let stat = value_of(argv, &mut i, "-e")?;
                opts.actions.push(Action::Exec(stat));
            }
            _ if arg.starts_with("-l") => {
                let spec = value_of(argv, &mut i, "-l")?;
                opts.preserved.push("-l".to_string());
                opts.preserved.push(spec.clone());
                let (global, module) = match spec.split_once('=') {
                    Some((global, module)) => (global.to_string(), module.to_string()),
                    None => (spec.clone(), spec),
                };
                opts.actions.push(Action::Require { global, module });
            }
            _ if arg.starts_with("-P") => {
                let spec = value_of(argv, &mut i, "-P")?;
                opts.preserved.push("-P".to_string());
                opts.preserved.push(spec.clone());
                opts.pledges.push(spec);
            }
            _ if arg.starts_with('-') => {
                return Err(format!("unrecognized option '{arg}'"));
            }
            _ => {
                opts.script = Some(arg.to_string());
                opts.script_args = argv[i + 1..].to_vec();
                return Ok(opts);
            }
        }
        i += 1;
    }
    Ok(opts)
}

/// Grant `-P` pledges before any user code runs. The host-side
/// `all` expands to a global grant on every registered granter.
fn apply_cli_pledges(interp: &mut Interpreter, specs: &[String]) -> Result<(), String> {
    for spec in specs {
        if spec == "all" {
            for base in interp.pledges.granter_names() {
                interp
                    .pledges
                    .pledge(&base, None)
                    .map_err(|e| e.to_string())?;
            }
            continue;
        }
        let granted = interp
            .pledges
            .apply_spec(spec)
            .map_err(|e| e.to_string())?;
        if !granted {
            return Err(format!("pledge '{spec}' was denied"));
        }
    }
    Ok(())
}

/// Resolve script or module source: the bundle first, then the
/// filesystem.
fn load_source(name: &str, bundle: Option<&Bundle>) -> Result<String, String> {
    if let Some(bundle) = bundle {
        if bundle.has(name) {
            let bytes = bundle.file(name).map_err(|e| e.to_string())?;
            return String::from_utf8(bytes)
                .map_err(|_| format!("bundled module '{name}' is not valid source"));
        }
    }
    std::fs::read_to_string(name).map_err(|e| format!("cannot open {name}: {e}"))
}

/// Warning level from `-W` / `-Wpedantic`.
#[derive(Clone, Copy)]
struct WarnLevel {
    enabled: bool,
    pedantic: bool,
}

fn run_chunk(
    interp: &mut Interpreter,
    source: &str,
    name: &str,
    warn: WarnLevel,
) -> Result<Vec<Value>, String> {
    match lus_parser::parse(source) {
        Ok(chunk) => {
            if warn.enabled {
                for message in warnings::check(&chunk, warn.pedantic) {
                    eprintln!("{}: {name}: {message}", output::warn_label());
                }
            }
            interp.run(&chunk).map_err(|e| e.to_string())
        }
        Err(e) => {
            output::report_error(name, Some(source), &e.to_string(), Some(e.span().start));
            Err(String::new()) // already reported with location
        }
    }
}

fn set_arg_table(interp: &mut Interpreter, script: &str, args: &[String]) {
    let mut table = Table::new();
    table.set(TableKey::Int(0), Value::str(script));
    for (i, a) in args.iter().enumerate() {
        table.set(TableKey::Int(i as i64 + 1), Value::str(a));
    }
    interp.define_global("arg", Value::table(table));
}

fn main() {
    output::init();
    lus_interp::engine::ensure_engine();

    let mut argv: Vec<String> = std::env::args().collect();

    // A bundled executable replays its preserved options and runs
    // its entry module; user arguments follow the entry name.
    let bundle = Bundle::detect();
    if let Some(bundle) = &bundle {
        let mut synthesized = vec![argv.first().cloned().unwrap_or_default()];
        synthesized.extend(bundle.args.iter().cloned());
        synthesized.push("--".to_string());
        synthesized.push(bundle.entrypoint.clone());
        synthesized.extend(argv.iter().skip(1).cloned());
        argv = synthesized;
    }

    // `run` is the default subcommand; the explicit spelling is
    // accepted too.
    if argv.get(1).map(String::as_str) == Some("run") {
        argv.remove(1);
    }

    let opts = match parse_args(&argv) {
        Ok(opts) => opts,
        Err(message) => {
            eprintln!("{}: {message}", output::error_label());
            help::print_usage();
            process::exit(1);
        }
    };

    if opts.version {
        help::print_version();
        if opts.script.is_none() && opts.actions.is_empty() && !opts.interactive {
            return;
        }
    }

    if let Some(entry) = &opts.standalone {
        match standalone::build(entry, &opts.includes, &opts.preserved) {
            Ok(output_path) => {
                println!("created standalone executable: {}", output_path.display());
                return;
            }
            Err(message) => {
                eprintln!("{}: {message}", output::error_label());
                process::exit(1);
            }
        }
    }

    if opts.script.is_none() && opts.actions.is_empty() && !opts.interactive && !opts.version {
        help::print_usage();
        process::exit(1);
    }

    let mut interp = Interpreter::new();
    let warn = WarnLevel {
        enabled: opts.warnings,
        pedantic: opts.pedantic,
    };

    if let Err(message) = apply_cli_pledges(&mut interp, &opts.pledges) {
        eprintln!("{}: {message}", output::error_label());
        process::exit(1);
    }

    // LUS_INIT runs before user code: a `=`-prefixed value names a
    // file, anything else is an inline chunk. The versioned variable
    // wins over the plain one.
    if !opts.ignore_env {
        let init = std::env::var("LUS_INIT_0_1").or_else(|_| std::env::var("LUS_INIT"));
        if let Ok(init) = init {
            let result = if let Some(path) = init.strip_prefix('=') {
                load_source(path, bundle.as_ref())
                    .and_then(|source| run_chunk(&mut interp, &source, path, warn).map(|_| ()))
            } else {
                run_chunk(&mut interp, &init, "LUS_INIT", warn).map(|_| ())
            };
            if let Err(message) = result {
                if !message.is_empty() {
                    output::report_error("LUS_INIT", None, &message, None);
                }
                process::exit(1);
            }
        }
    }

    if let Some(script) = &opts.script {
        set_arg_table(&mut interp, script, &opts.script_args);
    }

    let mut failed = false;

    for action in &opts.actions {
        let result = match action {
            Action::Exec(stat) => run_chunk(&mut interp, stat, "command line", warn).map(|_| ()),
            Action::Require { global, module } => {
                require(&mut interp, global, module, bundle.as_ref(), warn)
            }
        };
        if let Err(message) = result {
            if !message.is_empty() {
                eprintln!("{}: {message}", output::error_label());
            }
            failed = true;
            break;
        }
    }

    if !failed {
        if let Some(script) = &opts.script {
            let loaded = if script == "-" {
                let mut source = String::new();
                std::io::stdin()
                    .read_to_string(&mut source)
                    .map_err(|e| format!("cannot read stdin: {e}"))
                    .map(|_| (source, "stdin".to_string()))
            } else {
                load_source(script, bundle.as_ref()).map(|s| (s, script.clone()))
            };
            match loaded {
                Ok((source, name)) => {
                    if let Err(message) = run_chunk(&mut interp, &source, &name, warn) {
                        if !message.is_empty() {
                            output::report_error(&name, None, &message, None);
                        }
                        failed = true;
                    }
                }
                Err(message) => {
                    eprintln!("{}: {message}", output::error_label());
                    failed = true;
                }
            }
        }
    }

    if !failed && opts.interactive {
        repl::run(&mut interp);
    }

    lus_worker::shutdown_pool();
    process::exit(if failed { 1 } else { 0 });
}

/// `-l mod` / `-l g=mod`: load a module from the bundle or the
/// filesystem and bind its first return value (or `true`) to the
/// global.
fn require(
    interp: &mut Interpreter,
    global: &str,
    module: &str,
    bundle: Option<&Bundle>,
    warn: WarnLevel,
) -> Result<(), String> {
    let (source, name) = match load_source(module, bundle) {
        Ok(source) => (source, module.to_string()),
        Err(_) => {
            let file = format!("{module}.lus");
            (load_source(&file, bundle)?, file)
        }
    };
    let mut values = run_chunk(interp, &source, &name, warn)?;
    let value = if values.is_empty() {
        Value::Bool(true)
    } else {
        values.swap_remove(0)
    };
    interp.define_global(global, value);
    Ok(())
}
