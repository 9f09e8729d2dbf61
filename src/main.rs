use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use hoard::{hash, Error, PackfileReader, PackfileWriter, StreamReader, StreamWriter};

#[derive(Parser)]
#[command(name = "hoard")]
#[command(about = "Hoard content-addressed block repository manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a file of at most 65535 bytes into a new packfile and print its hash
    Write { repofile: PathBuf, filename: PathBuf },
    /// Stream a file of any size into a new packfile and print its root hash
    Writelong { repofile: PathBuf, filename: PathBuf },
    /// Print the block with the given hash to standard out
    Read { repofile: PathBuf, hash: String },
    /// Stream the data rooted at the given hash into an output file
    Readlong {
        repofile: PathBuf,
        hash: String,
        output: PathBuf,
    },
}

/// Exit code when requested data is not in the repository.
const EXIT_NOT_PRESENT: u8 = 1;
/// Exit code for every other failure.
const EXIT_ERROR: u8 = 255;

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(io::stderr).init();
    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Write { repofile, filename } => write_block(&repofile, &filename),
        Commands::Writelong { repofile, filename } => write_stream(&repofile, &filename),
        Commands::Read { repofile, hash } => read_block(&repofile, &hash),
        Commands::Readlong { repofile, hash, output } => read_stream(&repofile, &hash, &output),
    };
    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("ERROR: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn write_block(repofile: &Path, filename: &Path) -> Result<u8, Error> {
    let data = std::fs::read(filename)?;
    if data.len() > 65_535 {
        return Err(Error::InvalidState("input file is larger than 65535 bytes"));
    }
    let mut writer = PackfileWriter::new();
    let hash = writer.write(&data)?;
    writer.dump(repofile)?;
    println!("{}", hash::to_hex(&hash));
    Ok(0)
}

fn write_stream(repofile: &Path, filename: &Path) -> Result<u8, Error> {
    let mut input = BufReader::with_capacity(65_536, File::open(filename)?);
    let mut writer = PackfileWriter::new();
    let mut stream = StreamWriter::new(&mut writer);
    io::copy(&mut input, &mut stream)?;
    let root = stream.finish()?;
    writer.dump(repofile)?;
    println!("{}", hash::to_hex(&root));
    Ok(0)
}

fn read_block(repofile: &Path, hash_text: &str) -> Result<u8, Error> {
    let hash = hash::from_hex(hash_text)?;
    let reader = PackfileReader::open(repofile)?;
    match reader.read(&hash)? {
        Some(data) => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            out.write_all(&data)?;
            out.flush()?;
            Ok(0)
        }
        None => {
            println!("<not present>");
            Ok(EXIT_NOT_PRESENT)
        }
    }
}

fn read_stream(repofile: &Path, hash_text: &str, output: &Path) -> Result<u8, Error> {
    let root = hash::from_hex(hash_text)?;
    let reader = PackfileReader::open(repofile)?;
    if reader.find_entry(&root)?.is_none() {
        println!("<not present>");
        return Ok(EXIT_NOT_PRESENT);
    }
    let mut stream = StreamReader::new(&reader, root);
    let mut out = BufWriter::with_capacity(65_536, File::create(output)?);
    io::copy(&mut stream, &mut out)?;
    out.flush()?;
    Ok(0)
}
