// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Usage text.

use crate::output;

pub fn print_usage() {
    eprintln!(
        "usage: {} [run] [options] [script [args]]",
        output::command("lus")
    );
    eprintln!("Available options are:");
    eprintln!("  -e stat            execute string 'stat'");
    eprintln!("  -i                 enter interactive mode after executing 'script'");
    eprintln!("  -l mod             require library 'mod' into global 'mod'");
    eprintln!("  -l g=mod           require library 'mod' into global 'g'");
    eprintln!("  -v                 show version information");
    eprintln!("  -E                 ignore environment variables");
    eprintln!("  -W                 turn warnings on");
    eprintln!("  -Wpedantic         turn on pedantic warnings");
    eprintln!("  -P perm            grant permission 'perm' to the state");
    eprintln!("  --pledge perm      same as -P");
    eprintln!("  --standalone file  create a standalone executable from 'file'");
    eprintln!("  --include path[:alias]  add a module to the standalone bundle");
    eprintln!("  --                 stop handling options");
    eprintln!("  -                  stop handling options and execute stdin");
}

pub fn print_version() {
    println!("Lus {}", env!("CARGO_PKG_VERSION"));
}
