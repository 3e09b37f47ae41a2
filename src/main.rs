use std::io::{BufWriter, Write};

use anyhow::{Context, Error, Result};
use clap::{Parser, Subcommand};
use heapscan::buffer::buffer_manager::BufferManager;
use heapscan::common::{FileId, PageNo, SlotNo};
use heapscan::storage::file_manager::FileManager;
use heapscan::storage::heap::{HeapFile, HeapFileOptions, RecordId};
use tracing::info;

#[derive(Parser)]
struct Config {
    #[arg(long, help = "Directory where data is stored")]
    data: String,

    #[arg(long, default_value_t = 8, help = "Size of buffer pool")]
    pool_size: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Creates an empty heap file
    Create {
        #[arg(long)]
        file: FileId,

        #[arg(long, help = "Size of every record in bytes")]
        record_size: usize,

        #[arg(long, help = "Slots per page, as many as fit if omitted")]
        records_per_page: Option<usize>,
    },
    /// Inserts one record per value, padded with zero bytes to the record size
    Insert {
        #[arg(long)]
        file: FileId,

        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Deletes the record in the given slot
    Delete {
        #[arg(long)]
        file: FileId,

        #[arg(long)]
        page: PageNo,

        #[arg(long)]
        slot: SlotNo,
    },
    /// Prints every record of a heap file in storage order
    Scan {
        #[arg(long)]
        file: FileId,
    },
}

/// Sets up tracing subscriber.
fn setup_tracing() {
    use tracing_subscriber::{fmt::layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(layer().with_writer(std::io::stderr))
        .init();
}

fn to_record(value: &str, record_size: usize) -> Result<Vec<u8>> {
    if value.len() > record_size {
        return Err(Error::msg(format!(
            "Value '{value}' has {} bytes, but records hold only {record_size} bytes",
            value.len()
        )));
    }
    let mut record = value.as_bytes().to_vec();
    record.resize(record_size, 0);
    Ok(record)
}

fn scan(file: &HeapFile) -> Result<()> {
    let stdout = std::io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    let mut count = 0;
    for entry in file.records()? {
        let (rid, record) = entry?;
        let end = record.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
        writeln!(writer, "{rid}\t{}", String::from_utf8_lossy(&record[..end]))?;
        count += 1;
    }
    writer.flush()?;
    info!(file_id = file.file_id(), records = count, "scan finished");
    Ok(())
}

fn run(config: Config, buffer_manager: &BufferManager) -> Result<()> {
    match config.command {
        Command::Create {
            file,
            record_size,
            records_per_page,
        } => {
            let options = HeapFileOptions {
                record_size,
                records_per_page,
            };
            HeapFile::create(buffer_manager, file, options)
                .with_context(|| format!("Failed to create heap file {file}"))?;
        }
        Command::Insert { file, values } => {
            let file = HeapFile::open(buffer_manager, file)?;
            let record_size = file.record_size();
            for value in values {
                let rid = file.insert_record(&to_record(&value, record_size)?)?;
                println!("{rid}");
            }
        }
        Command::Delete { file, page, slot } => {
            let file = HeapFile::open(buffer_manager, file)?;
            file.delete_record(RecordId::new(page, slot))?;
        }
        Command::Scan { file } => {
            let file = HeapFile::open(buffer_manager, file)?;
            scan(&file)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    setup_tracing();
    let config = Config::parse();
    if config.pool_size == 0 {
        return Err(Error::msg("Size of buffer pool must be at least 1"));
    }

    let file_manager = FileManager::new(&config.data)?;
    let buffer_manager = BufferManager::new(file_manager, config.pool_size);

    let result = run(config, &buffer_manager);
    buffer_manager
        .flush_all()
        .context("Failed to write pages back to disk")?;
    result
}

#[cfg(test)]
mod tests {

    use super::to_record;

    #[test]
    fn values_are_padded_to_record_size() {
        assert_eq!(to_record("ab", 4).unwrap(), b"ab\0\0".to_vec());
        assert_eq!(to_record("abcd", 4).unwrap(), b"abcd".to_vec());
        assert!(to_record("abcde", 4).is_err());
    }
}
