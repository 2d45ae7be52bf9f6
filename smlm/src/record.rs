//! Length-delimited record stream for registries.
//!
//! Each frame is a little-endian `u32` byte count followed by a JSON payload.
//! The first frame holds the [`RecordHeader`], every following frame one
//! [`Localization`].

use std::io::{ErrorKind, Read, Write};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::RecordError;
use crate::localization::Localization;
use crate::registry::{RegistryInfo, SpotRegistry};

/// Unit of every stored length.
pub const LENGTH_UNIT: &str = "nm";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub info: RegistryInfo,
    pub units: String,
}

/// Writes `registry` as a header frame plus one frame per localization.
pub fn write_registry<W: Write>(writer: &mut W, registry: &SpotRegistry) -> Result<(), RecordError> {
    let header = RecordHeader {
        info: registry.info().clone(),
        units: LENGTH_UNIT.to_string(),
    };
    write_frame(writer, &header)?;
    for spot in registry {
        write_frame(writer, spot)?;
    }
    writer.flush()?;
    tracing::debug!(spots = registry.len(), "Wrote registry records");
    Ok(())
}

/// Reads a stream written by [`write_registry`].
pub fn read_registry<R: Read>(reader: &mut R) -> Result<SpotRegistry, RecordError> {
    let header: RecordHeader = read_frame(reader)?.ok_or(RecordError::MissingHeader)?;
    let mut spots = Vec::new();
    while let Some(spot) = read_frame::<_, Localization>(reader)? {
        spots.push(spot);
    }
    tracing::debug!(spots = spots.len(), name = %header.info.name, "Read registry records");
    Ok(SpotRegistry::new(header.info, spots))
}

fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<(), RecordError> {
    let payload = serde_json::to_vec(value)?;
    let len = u32::try_from(payload.len()).map_err(|_| RecordError::FrameTooLarge(payload.len()))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    Ok(())
}

/// `Ok(None)` on a clean end of stream before a length prefix.
fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>, RecordError> {
    let mut prefix = [0u8; 4];
    let got = read_fully(reader, &mut prefix)?;
    if got == 0 {
        return Ok(None);
    }
    if got < prefix.len() {
        return Err(RecordError::Truncated {
            expected: prefix.len(),
            actual: got,
        });
    }

    let len = u32::from_le_bytes(prefix) as usize;
    let mut payload = Vec::new();
    let got = reader.by_ref().take(len as u64).read_to_end(&mut payload)?;
    if got < len {
        return Err(RecordError::Truncated {
            expected: len,
            actual: got,
        });
    }
    Ok(Some(serde_json::from_slice(&payload)?))
}

/// Reads until `buf` is full or the stream ends; returns the byte count read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, RecordError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
