use anyhow::Result;

use crate::args::{Cli, Command};

mod diff;
mod doctor;
mod validate;

pub fn dispatch(cli: Cli) -> Result<u8> {
    match cli.command {
        Command::Diff {
            from,
            to,
            from_registry,
            to_registry,
            bindings,
            raw_schema,
            report,
            out,
        } => diff::run(
            &from,
            &to,
            from_registry.as_deref(),
            to_registry.as_deref(),
            bindings.as_deref(),
            raw_schema.as_deref(),
            report,
            out.as_deref(),
        ),
        Command::Validate {
            spec,
            registry,
            bindings,
            raw_schema,
        } => validate::run(
            &spec,
            registry.as_deref(),
            bindings.as_deref(),
            raw_schema.as_deref(),
        ),
        Command::Doctor {
            report,
            from,
            to,
            from_registry,
            to_registry,
            bindings,
            raw_schema,
            strict,
        } => doctor::run(
            &report,
            &from,
            &to,
            from_registry.as_deref(),
            to_registry.as_deref(),
            bindings.as_deref(),
            raw_schema.as_deref(),
            strict,
        ),
    }
}
