use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use lopdf::{Dictionary as LoDictionary, Object as LoObject, Stream};

pub(crate) fn zlib_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 64), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Builds a `FlateDecode` stream, replacing whatever filter chain `dict` carried.
pub(crate) fn flate_stream(mut dict: LoDictionary, data: &[u8]) -> std::io::Result<Stream> {
    let compressed = zlib_compress(data)?;
    dict.remove(b"DecodeParms");
    dict.set("Filter", LoObject::Name(b"FlateDecode".to_vec()));
    let mut stream = Stream::new(dict, compressed);
    stream.allows_compression = false;
    Ok(stream)
}
