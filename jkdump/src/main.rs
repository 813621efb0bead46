use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use serde::Serialize;

use common::{BoxError, Format};
use loader::{Loader, LoaderConfig};

#[derive(Parser)]
#[clap(version, about = "Inspect Jedi Knight game archives")]
struct Opts {
    #[clap(short = 'v', long)]
    verbose: bool,
    /// Game install directory holding Resource/ and Episode/.
    #[clap(short = 'g', long, parse(from_os_str), default_value = ".")]
    game_dir: PathBuf,
    /// JSON loader config; relative archive paths resolve against the game directory.
    #[clap(short = 'c', long, parse(from_os_str))]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// List archive members. `.ext` matches extensions, anything else a name prefix.
    List {
        #[clap(default_value = "")]
        filter: String,
    },
    /// Copy the raw bytes of a member out of the archives.
    Extract {
        name: String,
        #[clap(short = 'o', long, parse(from_os_str))]
        output: Option<PathBuf>,
    },
    /// Decode a member and print it as JSON.
    Dump { name: String },
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), BoxError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(data)?;
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), BoxError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn dump(loader: &Loader, name: &str) -> Result<(), BoxError> {
    let format = Format::from_name(name)
        .ok_or_else::<BoxError, _>(|| format!("unknown asset type: {}", name).into())?;
    match format {
        Format::Palette => print_json(&*loader.load_cmp(name)?),
        Format::Material => print_json(&*loader.load_mat(name)?),
        Format::Bitmap => print_json(&*loader.load_bm(name)?),
        Format::Font => print_json(&*loader.load_sft(name)?),
        Format::Model => print_json(&*loader.load_3do(name)?),
        Format::Level => print_json(&*loader.load_jkl(name)?),
        Format::Keyframe => print_json(&*loader.load_key(name)?),
        Format::Puppet => print_json(&*loader.load_pup(name)?),
        Format::Gob => Err(format!("{} archives can only be listed", format).into()),
    }
}

fn main() -> Result<(), BoxError> {
    let opts: Opts = Opts::parse();
    env_logger::builder()
        .filter_level(if opts.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let config = match &opts.config {
        Some(path) => LoaderConfig::from_json_file(path)?.relative_to(&opts.game_dir),
        None => LoaderConfig::for_game_dir(&opts.game_dir),
    };
    log::debug!("config = {:?}", config);
    let loader = Loader::new(config);

    match opts.subcommand {
        SubCommand::List { filter } => {
            let listings = loader.list_manifest(&filter)?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for listing in &listings {
                writeln!(
                    out,
                    "{:>10} {} ({})",
                    listing.item.length,
                    listing.item.name,
                    listing.archive.display()
                )?;
            }
            log::info!("{} matching entries", listings.len());
        }
        SubCommand::Extract { name, output } => {
            let data = loader
                .extract(&name)?
                .ok_or_else::<BoxError, _>(|| format!("{} not found", name).into())?;
            let output = output.unwrap_or_else(|| PathBuf::from("output"));
            let file_name = name.rsplit(|c| c == '\\' || c == '/').next().unwrap_or(&name);
            let path = output.join(file_name);
            write_file(&path, &data)?;
            log::info!("wrote {} bytes to {:?}", data.len(), path);
        }
        SubCommand::Dump { name } => dump(&loader, &name)?,
    }

    Ok(())
}
