//! Brick table persistence: a compact binary store plus CSV
//! interchange with the survey's tabular column layout.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::BrickTableRow;

const MAGIC: &[u8; 4] = b"TSBK";
const VERSION: u32 = 1;

/// Column names of the tabular interchange format.
const COLUMNS: [&str; 10] = [
    "BRICKID", "BRICKNAME", "RA", "DEC", "RA1", "RA2", "DEC1", "DEC2", "BRICKROW", "BRICKCOL",
];

fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_f64(w: &mut impl Write, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_str(w: &mut impl Write, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    w.write_all(&(bytes.len() as u16).to_le_bytes())?;
    w.write_all(bytes)
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64(r: &mut impl Read) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_str(r: &mut impl Read) -> io::Result<String> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    let mut bytes = vec![0u8; u16::from_le_bytes(buf) as usize];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Save a brick table to the binary store format.
pub fn save_bricks(path: &Path, table: &[BrickTableRow]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    w.write_all(MAGIC)?;
    write_u32(&mut w, VERSION)?;
    write_u64(&mut w, table.len() as u64)?;

    for r in table {
        write_u32(&mut w, r.id)?;
        write_str(&mut w, &r.name)?;
        for v in [r.ra, r.dec, r.ra1, r.ra2, r.dec1, r.dec2] {
            write_f64(&mut w, v)?;
        }
        write_u32(&mut w, r.row)?;
        write_u32(&mut w, r.col)?;
    }

    w.flush()
}

/// Load a brick table from the binary store format.
pub fn load_bricks(path: &Path) -> io::Result<Vec<BrickTableRow>> {
    let file = File::open(path)?;
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid magic bytes",
        ));
    }

    let version = read_u32(&mut r)?;
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported version: {version}"),
        ));
    }

    let count = read_u64(&mut r)? as usize;
    let mut table = Vec::with_capacity(count);
    for _ in 0..count {
        let id = read_u32(&mut r)?;
        let name = read_str(&mut r)?;
        let ra = read_f64(&mut r)?;
        let dec = read_f64(&mut r)?;
        let ra1 = read_f64(&mut r)?;
        let ra2 = read_f64(&mut r)?;
        let dec1 = read_f64(&mut r)?;
        let dec2 = read_f64(&mut r)?;
        let row = read_u32(&mut r)?;
        let col = read_u32(&mut r)?;
        table.push(BrickTableRow {
            id,
            name,
            ra,
            dec,
            ra1,
            ra2,
            dec1,
            dec2,
            row,
            col,
        });
    }
    Ok(table)
}

/// Save a brick table as CSV with the survey's column names.
pub fn save_bricks_csv(path: &Path, table: &[BrickTableRow]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    writeln!(w, "{}", COLUMNS.join(","))?;
    for r in table {
        writeln!(
            w,
            "{},{},{},{},{},{},{},{},{},{}",
            r.id, r.name, r.ra, r.dec, r.ra1, r.ra2, r.dec1, r.dec2, r.row, r.col
        )?;
    }
    w.flush()
}

/// Load a brick table from CSV.
///
/// The header line must name all ten survey columns; any column order
/// is accepted.
pub fn load_bricks_csv(path: &Path) -> io::Result<Vec<BrickTableRow>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let header = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "empty brick table",
                ));
            }
        }
    };

    let names: Vec<&str> = header.split(',').map(str::trim).collect();
    let mut positions = [0usize; COLUMNS.len()];
    for (slot, column) in positions.iter_mut().zip(COLUMNS) {
        *slot = names.iter().position(|&n| n == column).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("missing column {column}"),
            )
        })?;
    }

    let mut table = Vec::new();
    for (lineno, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |i: usize| -> io::Result<&str> {
            fields.get(positions[i]).copied().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line {}: missing field {}", lineno + 2, COLUMNS[i]),
                )
            })
        };
        let number = |i: usize| -> io::Result<f64> {
            field(i)?.parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line {}: bad {} value", lineno + 2, COLUMNS[i]),
                )
            })
        };
        let integer = |i: usize| -> io::Result<u32> {
            field(i)?.parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line {}: bad {} value", lineno + 2, COLUMNS[i]),
                )
            })
        };

        table.push(BrickTableRow {
            id: integer(0)?,
            name: field(1)?.to_string(),
            ra: number(2)?,
            dec: number(3)?,
            ra1: number(4)?,
            ra2: number(5)?,
            dec1: number(6)?,
            dec2: number(7)?,
            row: integer(8)?,
            col: integer(9)?,
        });
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::builder::build_bricks;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tessera_test_{name}_{}", std::process::id()))
    }

    #[test]
    fn binary_round_trip() {
        let table = build_bricks(9);
        let path = temp_path("bricks_bin");
        save_bricks(&path, &table).unwrap();
        let loaded = load_bricks(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, table);
    }

    #[test]
    fn magic_validation() {
        let path = temp_path("bricks_bad_magic");
        std::fs::write(&path, b"BAADxxxx").unwrap();
        let err = load_bricks(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn version_validation() {
        let path = temp_path("bricks_bad_version");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(MAGIC).unwrap();
            f.write_all(&99u32.to_le_bytes()).unwrap();
        }
        let err = load_bricks(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn csv_round_trip() {
        let table = build_bricks(7);
        let path = temp_path("bricks_csv");
        save_bricks_csv(&path, &table).unwrap();
        let loaded = load_bricks_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, table);
    }

    #[test]
    fn csv_accepts_any_column_order() {
        let path = temp_path("bricks_csv_order");
        std::fs::write(
            &path,
            "BRICKNAME,BRICKID,DEC,RA,RA2,RA1,DEC2,DEC1,BRICKCOL,BRICKROW\n\
             1800m450,1,-45,180,360,0,0,-90,0,0\n",
        )
        .unwrap();
        let loaded = load_bricks_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, 1);
        assert_eq!(loaded[0].name, "1800m450");
        assert_eq!(loaded[0].ra, 180.0);
        assert_eq!(loaded[0].dec1, -90.0);
        assert_eq!(loaded[0].row, 0);
    }

    #[test]
    fn csv_missing_column_rejected() {
        let path = temp_path("bricks_csv_missing");
        std::fs::write(&path, "BRICKID,BRICKNAME,RA,DEC\n1,x,0,0\n").unwrap();
        let err = load_bricks_csv(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("RA1"), "{err}");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn csv_bad_field_rejected() {
        let path = temp_path("bricks_csv_badfield");
        let header = COLUMNS.join(",");
        std::fs::write(&path, format!("{header}\n1,x,abc,0,0,1,0,1,0,0\n")).unwrap();
        let err = load_bricks_csv(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("bad RA value"), "{err}");
        std::fs::remove_file(&path).ok();
    }
}
