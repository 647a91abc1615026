extern crate dlang_demangler;

use std::env;
use std::io;
use std::io::BufRead;
use std::io::Write;

/// Find the start of the next potential mangled symbol in `haystack`:
/// a `_D` followed by more symbol characters.  Whether the candidate
/// really demangles is decided by the library.
fn find_mangled(haystack: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    for i in 0..bytes.len().saturating_sub(2) {
        if bytes[i] == b'_'
            && bytes[i + 1] == b'D'
            && char::from(bytes[i + 2]).is_ascii_alphanumeric()
        {
            return Some(i);
        }
    }
    None
}

/// Length of the symbol-shaped run at the start of `rest`.  Mangled
/// names only contain ASCII letters, digits and underscores.
fn symbol_len(rest: &str) -> usize {
    rest.bytes()
        .take_while(|&c| char::from(c).is_ascii_alphanumeric() || c == b'_')
        .count()
}

/// Print `line` with every embedded mangled symbol replaced by its
/// demangled form.  Symbols that do not demangle pass through as they
/// are, so the tool is safe in a pipeline.
fn demangle_line<W: Write>(out: &mut W, mut line: &str) -> io::Result<()> {
    while let Some(idx) = find_mangled(line) {
        write!(out, "{}", &line[..idx])?;

        let len = symbol_len(&line[idx..]);
        let (symbol, rest) = line[idx..].split_at(len);
        match dlang_demangler::demangle(symbol) {
            Ok(demangled) => write!(out, "{}", demangled)?,
            Err(_) => write!(out, "{}", symbol)?,
        }
        line = rest;
    }
    writeln!(out, "{}", line)
}

fn main() {
    let mut args: Vec<_> = env::args().collect();
    args.remove(0);

    let verbose = if args.get(0).map(|x| x.as_str()) == Some("-v") {
        args.remove(0);
        true
    } else {
        false
    };

    let print_demangled = |sym: &str| {
        match dlang_demangler::demangle(sym) {
            Ok(demangled) => println!("{}", demangled),
            Err(err) => {
                if verbose {
                    eprintln!("error: {}", err);
                }
                println!("{}", sym);
            }
        }
    };

    if args.is_empty() {
        let stdin = io::stdin();
        let handle = stdin.lock();
        let stdout = io::stdout();
        let mut out = stdout.lock();

        for line in handle.lines() {
            match line {
                Ok(line) => {
                    if demangle_line(&mut out, &line).is_err() {
                        return;
                    }
                }
                _ => continue,
            }
        }
    } else {
        for arg in args {
            print_demangled(&arg);
        }
    }
}
