use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use tessera::footprint::Footprint;
use tessera::index::builder::build_bricks;
use tessera::index::{store, BrickIndex};
use tessera::readout::readout;
use tessera::repo::FitsImageRepo;

#[derive(Parser)]
#[command(name = "tessera", about = "Sky brick catalogue and batched pixel readout")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a full-sky brick catalogue.
    MakeBricks {
        /// Output path for the brick table.
        out: PathBuf,

        /// Number of declination rows, including the two pole caps.
        #[arg(long, default_value = "721")]
        rows: u32,

        /// Write CSV instead of the binary store.
        #[arg(long)]
        csv: bool,
    },

    /// Locate the brick containing each coordinate.
    Query {
        /// Path to the brick table (.csv or binary store).
        #[arg(short, long)]
        bricks: PathBuf,

        /// Coordinates as RA,DEC pairs in decimal degrees.
        coords: Vec<String>,

        /// Read whitespace-separated "RA DEC" lines from a file
        /// ("-" for stdin).
        #[arg(long)]
        coords_file: Option<PathBuf>,
    },

    /// Summarize the covered footprint of a data directory.
    Footprint {
        /// Path to the brick table (.csv or binary store).
        #[arg(short, long)]
        bricks: PathBuf,

        /// Directory tree to scan for per-brick files.
        #[arg(long)]
        root: Option<PathBuf>,

        /// Load a previously saved covered-brick set instead of
        /// scanning.
        #[arg(long)]
        covered: Option<PathBuf>,

        /// Save the covered-brick set for later runs.
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Read one pixel value per coordinate from per-brick rasters.
    Readout {
        /// Path to the brick table (.csv or binary store).
        #[arg(short, long)]
        bricks: PathBuf,

        /// Repository root directory.
        #[arg(long)]
        root: PathBuf,

        /// Raster filename pattern relative to the root, with
        /// {brickid}, {brickname} and {pre} placeholders.
        #[arg(long)]
        pattern: String,

        /// Covered-brick set file; the root is scanned when omitted.
        #[arg(long)]
        covered: Option<PathBuf>,

        /// Fill value for coordinates outside the footprint.
        #[arg(long, default_value = "NaN")]
        default: f32,

        /// Treat missing raster files as outside the footprint.
        #[arg(long)]
        ignore_missing: bool,

        /// Coordinates as RA,DEC pairs in decimal degrees.
        coords: Vec<String>,

        /// Read whitespace-separated "RA DEC" lines from a file
        /// ("-" for stdin).
        #[arg(long)]
        coords_file: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::MakeBricks { out, rows, csv } => {
            if rows < 2 {
                eprintln!("--rows must be at least 2");
                process::exit(1);
            }
            let table = build_bricks(rows);
            let result = if csv {
                store::save_bricks_csv(&out, &table)
            } else {
                store::save_bricks(&out, &table)
            };
            result.unwrap_or_else(|e| {
                eprintln!("Failed to write {}: {e}", out.display());
                process::exit(1);
            });
            eprintln!("wrote {} bricks to {}", table.len(), out.display());
        }

        Commands::Query {
            bricks,
            coords,
            coords_file,
        } => {
            let index = load_index(&bricks);
            let coords = gather_coords(&coords, coords_file.as_deref());
            for (&(ra, dec), found) in coords.iter().zip(index.query(&coords)) {
                match found {
                    Some(i) => {
                        let b = index.get_brick(i);
                        println!("{ra} {dec} -> {} {} row={} col={}", b.id, b.name, b.row, b.col);
                    }
                    None => println!("{ra} {dec} -> no brick"),
                }
            }
        }

        Commands::Footprint {
            bricks,
            root,
            covered,
            save,
        } => {
            let index = load_index(&bricks);
            let footprint = load_footprint(&index, root.as_deref(), covered.as_deref());
            println!("{footprint}");
            if let Some(path) = save {
                footprint.save_covered(&path).unwrap_or_else(|e| {
                    eprintln!("Failed to write {}: {e}", path.display());
                    process::exit(1);
                });
                eprintln!("saved covered set to {}", path.display());
            }
        }

        Commands::Readout {
            bricks,
            root,
            pattern,
            covered,
            default,
            ignore_missing,
            coords,
            coords_file,
        } => {
            let index = load_index(&bricks);
            let footprint = load_footprint(&index, Some(&root), covered.as_deref());
            let coords = gather_coords(&coords, coords_file.as_deref());
            let mut repo = FitsImageRepo::new(&root, pattern);
            let values = readout(
                &coords,
                &index,
                &footprint,
                &mut repo,
                default,
                ignore_missing,
            )
            .unwrap_or_else(|e| {
                eprintln!("Readout failed: {e}");
                process::exit(1);
            });
            for (&(ra, dec), value) in coords.iter().zip(values) {
                println!("{ra} {dec} {value}");
            }
        }
    }
}

fn load_index(path: &Path) -> BrickIndex {
    let table = if path.extension().and_then(|e| e.to_str()) == Some("csv") {
        store::load_bricks_csv(path)
    } else {
        store::load_bricks(path)
    };
    let table = table.unwrap_or_else(|e| {
        eprintln!("Failed to load brick table {}: {e}", path.display());
        process::exit(1);
    });
    BrickIndex::new(table).unwrap_or_else(|e| {
        eprintln!("Invalid brick table {}: {e}", path.display());
        process::exit(1);
    })
}

fn load_footprint(index: &BrickIndex, root: Option<&Path>, covered: Option<&Path>) -> Footprint {
    if let Some(path) = covered {
        let ids = Footprint::load_covered(path).unwrap_or_else(|e| {
            eprintln!("Failed to load covered set {}: {e}", path.display());
            process::exit(1);
        });
        return Footprint::from_ids(index, &ids).unwrap_or_else(|e| {
            eprintln!("Stale covered set {}: {e}", path.display());
            process::exit(1);
        });
    }
    let Some(root) = root else {
        eprintln!("Either --root or --covered is required");
        process::exit(1);
    };
    let indices = Footprint::scan(root, index).unwrap_or_else(|e| {
        eprintln!("Failed to scan {}: {e}", root.display());
        process::exit(1);
    });
    Footprint::new(index, indices)
}

/// Parse one "RA,DEC" pair in decimal degrees.
fn parse_coord(arg: &str) -> Option<(f64, f64)> {
    let (ra, dec) = arg.split_once(',')?;
    Some((ra.trim().parse().ok()?, dec.trim().parse().ok()?))
}

/// Collect coordinates from command-line pairs and/or a file of
/// "RA DEC" lines ("-" reads stdin).
fn gather_coords(args: &[String], file: Option<&Path>) -> Vec<(f64, f64)> {
    let mut coords = Vec::new();
    for arg in args {
        match parse_coord(arg) {
            Some(c) => coords.push(c),
            None => {
                eprintln!("Bad coordinate {arg:?}, expected RA,DEC in degrees");
                process::exit(1);
            }
        }
    }

    if let Some(path) = file {
        let reader: Box<dyn BufRead> = if path == Path::new("-") {
            Box::new(BufReader::new(std::io::stdin()))
        } else {
            match std::fs::File::open(path) {
                Ok(f) => Box::new(BufReader::new(f)),
                Err(e) => {
                    eprintln!("Failed to open {}: {e}", path.display());
                    process::exit(1);
                }
            }
        };
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.unwrap_or_else(|e| {
                eprintln!("Failed to read coordinates: {e}");
                process::exit(1);
            });
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let coord = (|| {
                let ra: f64 = fields.next()?.parse().ok()?;
                let dec: f64 = fields.next()?.parse().ok()?;
                Some((ra, dec))
            })();
            match coord {
                Some(c) => coords.push(c),
                None => {
                    eprintln!("Bad coordinate line {}: {line:?}", lineno + 1);
                    process::exit(1);
                }
            }
        }
    }

    if coords.is_empty() {
        eprintln!("No coordinates given");
        process::exit(1);
    }
    coords
}
