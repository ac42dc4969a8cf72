//! Snapshot files: a stream of census documents, one after another.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::info;
use serde_json::Deserializer;

use crate::census::Census;
use crate::errors::{CensusError, CensusResult};

/// Write `censuses` to `path`, one JSON document per census.
pub fn write_snapshot(path: &Path, censuses: &[Census]) -> CensusResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    for census in censuses {
        serde_json::to_writer(&mut out, census).map_err(std::io::Error::from)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    info!("wrote {} censuses to {}", censuses.len(), path.display());
    Ok(())
}

/// Read every census stored at `path`, until end of stream.
pub fn read_snapshot(path: &Path) -> CensusResult<Vec<Census>> {
    let parse_failure = |source| CensusError::SnapshotParse {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(|err| parse_failure(serde_json::Error::io(err)))?;
    Deserializer::from_reader(BufReader::new(file))
        .into_iter::<Census>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(parse_failure)
}
