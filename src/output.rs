use std::io::Write as _;
use std::marker::PhantomData;
use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write the rows to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a row to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

/// Something that can be rendered as one row of output.
pub trait Record: serde::Serialize {
    /// Column names of the table and CSV renderings.
    const HEADERS: &'static [&'static str];

    fn cells(&self) -> Vec<String>;
}

impl Args {
    pub fn to_output<R: Record>(self) -> Result<Output<R>, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        let formatter = match &self.format {
            Format::Table => {
                let mut comfy = comfy_table::Table::new();
                comfy
                    .set_header(R::HEADERS.to_vec())
                    .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                Formatter::Table { comfy }
            }
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv,
        };
        let mut output = Output { path: self.output, io, formatter, record: PhantomData };
        if let Formatter::Csv = output.formatter {
            let headers = R::HEADERS.iter().map(|h| h.to_string()).collect::<Vec<_>>();
            output.write_csv_row(&headers)?;
        }
        Ok(output)
    }
}

pub struct Output<R> {
    path: Option<PathBuf>,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
    record: PhantomData<fn(&R)>,
}

enum Formatter {
    Csv,
    Table { comfy: comfy_table::Table },
    Jsonl,
}

/// Run a `csv_core` writer step until it has nothing more to emit.
fn drain_into(
    row: &mut Vec<u8>,
    buffer: &mut [u8],
    mut step: impl FnMut(&mut [u8]) -> (WriteResult, usize),
) {
    loop {
        let (result, written) = step(buffer);
        row.extend_from_slice(&buffer[..written]);
        if let WriteResult::InputEmpty = result {
            break;
        }
    }
}

fn csv_row(values: &[String]) -> Vec<u8> {
    let mut writer = csv_core::Writer::new();
    let mut buffer = [0; 256];
    let mut row = Vec::new();
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            drain_into(&mut row, &mut buffer, |out| writer.delimiter(out));
        }
        let mut input = value.as_bytes();
        drain_into(&mut row, &mut buffer, |out| {
            let (result, read, written) = writer.field(input, out);
            input = &input[read..];
            (result, written)
        });
    }
    drain_into(&mut row, &mut buffer, |out| writer.terminator(out));
    row
}

impl<R: Record> Output<R> {
    fn write_csv_row(&mut self, values: &[String]) -> Result<(), Error> {
        let row = csv_row(values);
        self.io.write_all(&row).map_err(|e| self.write_error(e))
    }

    pub fn write(&mut self, record: &R) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv => {
                let values = record.cells();
                self.write_csv_row(&values)?;
            }
            Formatter::Table { comfy } => {
                comfy.add_row(record.cells());
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, record).map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?
            }
        }
        Ok(())
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.path {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.into()),
        }
    }

    pub fn commit(mut self) -> Result<(), Error> {
        if let Formatter::Table { comfy } = &self.formatter {
            self.io.write_fmt(format_args!("{}\n", comfy)).map_err(|e| self.write_error(e))?;
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }
}
