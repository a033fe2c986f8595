use crate::source::{self, RegisterSource};
use crate::sunspec::{
    AddressClass, HEADER_WORDS, MARKER, ModelBlock, ModelHeader, RegisterAddress,
    STANDARD_BASE_ADDRESSES,
};
use tracing::{debug, info};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no SunSpec marker at {}", list(.0))]
    InvalidMarker(Vec<RegisterAddress>),
    /// Carries the last header (or the marker) read before the chain left the bounds.
    #[error("no terminator found within bounds, the chain leaves them after {0} ({1} models)")]
    DiscoveryOverrun(RegisterAddress, usize),
    #[error("could not read {2} registers at {1}")]
    TransportFailure(#[source] source::Error, RegisterAddress, u16),
}

fn list(addresses: &[RegisterAddress]) -> String {
    addresses.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

/// Bounds that make a scan terminate on devices that never produce a terminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_models: usize,
    /// Exclusive end of the addresses a scan may read.
    pub end: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_models: 1024, end: 1 << 16 }
    }
}

async fn read<S: RegisterSource>(
    source: &mut S,
    address: RegisterAddress,
    count: u16,
) -> Result<Vec<u16>, Error> {
    source.read(address, count).await.map_err(|e| Error::TransportFailure(e, address, count))
}

/// Find which of the standard base addresses holds the SunSpec marker.
///
/// Addresses the device reports as not existing are skipped over, any other read failure ends
/// the search.
pub async fn locate<S: RegisterSource>(
    source: &mut S,
    class: AddressClass,
) -> Result<RegisterAddress, Error> {
    let candidates =
        STANDARD_BASE_ADDRESSES.map(|offset| RegisterAddress { class, offset }).to_vec();
    for &address in &candidates {
        debug!(message = "probing for the marker", %address);
        match source.read(address, 2).await {
            Ok(words) if words == MARKER => {
                info!(message = "found the marker", %address);
                return Ok(address);
            }
            Ok(words) => debug!(message = "not a marker", %address, ?words),
            Err(e) if e.is_absent_register() => {
                debug!(message = "nothing there", %address, error = (&e as &dyn std::error::Error))
            }
            Err(e) => return Err(Error::TransportFailure(e, address, 2)),
        }
    }
    Err(Error::InvalidMarker(candidates))
}

/// Walk the model chain that starts with the marker at `start`.
///
/// Returns every model block up to, not including, the terminator.
pub async fn scan<S: RegisterSource>(
    source: &mut S,
    start: RegisterAddress,
    limits: &Limits,
) -> Result<Vec<ModelBlock>, Error> {
    let end = limits.end.min(1 << 16);
    let class = start.class;
    let address_at =
        |offset: u32| u16::try_from(offset).ok().map(|offset| RegisterAddress { class, offset });

    let marker_words = u32::from(start.offset) + MARKER.len() as u32;
    if marker_words > end {
        return Err(Error::DiscoveryOverrun(start, 0));
    }
    let marker = read(source, start, 2).await?;
    if marker != MARKER {
        debug!(message = "not a marker", address = %start, words = ?marker);
        return Err(Error::InvalidMarker(vec![start]));
    }

    let mut blocks = Vec::new();
    let mut last_read = start;
    let mut cursor = marker_words;
    loop {
        let body_start = cursor + u32::from(HEADER_WORDS);
        let Some(header_address) = address_at(cursor).filter(|_| body_start <= end) else {
            return Err(Error::DiscoveryOverrun(last_read, blocks.len()));
        };
        let header = read(source, header_address, HEADER_WORDS).await?;
        let [model_id, model_length] = header[..] else {
            let e = source::Error::ShortResponse(HEADER_WORDS, header.len());
            return Err(Error::TransportFailure(e, header_address, HEADER_WORDS));
        };
        last_read = header_address;
        let header = ModelHeader::from_words([model_id, model_length]);
        if header.is_terminator() {
            info!(message = "end of the model chain", address = %header_address, models = blocks.len());
            return Ok(blocks);
        }
        if blocks.len() >= limits.max_models {
            return Err(Error::DiscoveryOverrun(header_address, blocks.len()));
        }
        let body_end = body_start + u32::from(header.model_length);
        // Even an empty body needs an address of its own.
        let address = address_at(body_start).filter(|_| body_start < end && body_end <= end);
        let Some(address) = address else {
            return Err(Error::DiscoveryOverrun(header_address, blocks.len()));
        };
        info!(
            message = "found model",
            model = header.model_id,
            length = header.model_length,
            address = %header_address
        );
        let words = if header.model_length == 0 {
            Vec::new()
        } else {
            read(source, address, header.model_length).await?
        };
        if words.len() != usize::from(header.model_length) {
            let e = source::Error::ShortResponse(header.model_length, words.len());
            return Err(Error::TransportFailure(e, address, header.model_length));
        }
        blocks.push(ModelBlock { header, address, words });
        cursor = body_end;
    }
}
