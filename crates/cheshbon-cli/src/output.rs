use std::io::Write;

use serde::Serialize;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    println!("{s}");
    Ok(())
}

pub fn eprintln_line(msg: &str) {
    let _ = writeln!(std::io::stderr(), "{msg}");
}

/// Colored one-line verdict on stderr; stdout stays machine-readable.
pub fn print_verdict(ok: bool, label: &str) {
    let mut stream = StandardStream::stderr(ColorChoice::Auto);
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(if ok { Color::Green } else { Color::Red }))
        .set_bold(true);
    let _ = stream.set_color(&spec);
    let _ = write!(stream, "{}", if ok { "ok" } else { "failed" });
    let _ = stream.reset();
    let _ = writeln!(stream, ": {label}");
}
