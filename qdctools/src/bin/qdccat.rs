use argh::FromArgs;
use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{stdin, stdout, Read, Write};

use qdctools::{de, ser, RecordKind};

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

#[derive(Debug, FromArgs, Clone)]
/// Decode stored units of digitizer records and print them as
/// tab-separated values to standard output. The record layout of each
/// unit is read from the digitizer.json next to it.
pub struct CliArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// record kind when reading raw records from standard input:
    /// 1 (compact), 2 (extended) or 3 (waveform)
    #[argh(option, short = 't')]
    pub data_type: Option<u16>,
    /// record size in bytes when reading from standard input
    #[argh(option, short = 's')]
    pub element_size: Option<usize>,
    /// unit files; with no input or when input is '-', read from standard input
    #[argh(positional)]
    pub input: Vec<String>,
}

fn main() -> Result<()> {
    let args: CliArgs = argh::from_env();
    if args.version {
        let stdout = stdout();
        let mut stdout = stdout.lock();
        writeln!(
            stdout,
            concat!(
                env!("CARGO_BIN_NAME"),
                " ",
                "{}",
            ),
            GIT_VERSION,
        )?;
        return Ok(())
    }

    // Collect inputs, None is standard input
    let mut inputs: Vec<Option<String>> = Vec::new();
    if args.input.is_empty() {
        inputs.push(None);
    } else {
        let mut contains_stdin = false;
        for i in args.input {
            if i == "-" {
                if contains_stdin {
                    bail!("cannot specify '-' for stdin twice");
                }
                contains_stdin = true;
                inputs.push(None);
            } else {
                let m = fs::metadata(&i).with_context(|| format!("cannot open {}", &i))?;
                if !m.is_file() {
                    bail!("{} is not a file", &i);
                }
                inputs.push(Some(i));
            }
        }
    }

    let stdout = stdout();
    let stdout = stdout.lock();
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .from_writer(stdout);

    for i in inputs {
        let events = match i {
            None => {
                let kind = args
                    .data_type
                    .and_then(RecordKind::from_code)
                    .context("reading standard input needs a valid --data-type")?;
                let size = match (kind, args.element_size) {
                    (_, Some(s)) => s,
                    (RecordKind::Waveform, None) => bail!("reading waveforms needs --element-size"),
                    (k, None) => k.element_size(0),
                };
                let mut bytes = Vec::new();
                stdin().lock().read_to_end(&mut bytes)?;
                de::unit(&bytes, kind, size)?
            }
            Some(path) => de::unit_file(&path).with_context(|| format!("cannot decode {}", path))?,
        };
        ser::tsv(&mut wtr, &events)?;
    }
    wtr.flush()?;
    Ok(())
}
